//! CLI entry point for the route delay tracker.
//!
//! Provides subcommands for polling registered realtime feeds into the sample
//! store, inspecting a single snapshot, and querying or publishing bucketed
//! delay charts.

use anyhow::{Context, Result, bail};
use chrono::DateTime;
use clap::{Args, Parser, Subcommand, ValueEnum};
use route_delays::analyzers::aggregate::aggregate_routes;
use route_delays::analyzers::buckets::{DEFAULT_UNIT_COUNT, run_query};
use route_delays::analyzers::types::{BucketQuery, ChartSeries, DelayUnit, Reducer, RouteSelection};
use route_delays::analyzers::writetos3::write_json_to_s3;
use route_delays::config::{PollerConfig, RetryPolicy, resolve_timezone};
use route_delays::fetch::{BasicClient, EnvKeyStore, FeedFetcher, HttpFeedFetcher};
use route_delays::output::print_json;
use route_delays::parser::decode_snapshot;
use route_delays::poller::PollingOrchestrator;
use route_delays::registry::{FeedRecord, JsonFeedRegistry};
use route_delays::routes::{
    Alphabetical, PublishedIds, RouteDirectory, RouteOrdering, RouteResolver,
};
use route_delays::schedule::StaticSchedule;
use route_delays::schedule::attribution::attribute_delays;
use route_delays::store::CsvStore;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "route_delays")]
#[command(about = "Track and chart transit route delays from GTFS-RT feeds", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Poll every registered feed and store per-route delay samples
    Poll {
        /// JSON feed registry
        #[arg(short, long, default_value = "feeds.json")]
        registry: PathBuf,

        /// Directory for per-route sample CSVs
        #[arg(short, long, default_value = "data")]
        data_dir: PathBuf,

        /// Seconds between poll cycles
        #[arg(short = 'i', long, default_value_t = 300)]
        interval: u64,

        /// Maximum number of feeds processed concurrently
        #[arg(short, long, default_value_t = 5)]
        concurrency: usize,

        /// Per-feed realtime fetch timeout in seconds
        #[arg(long, default_value_t = 60)]
        feed_timeout: u64,

        /// Per-feed store write timeout in seconds
        #[arg(long, default_value_t = 30)]
        write_timeout: u64,

        /// Wait before retrying an unhealthy feed, in seconds
        #[arg(long, default_value_t = 30)]
        backoff: u64,

        /// Static schedule refresh timeout in seconds
        #[arg(long, default_value_t = 240)]
        static_timeout: u64,

        /// Number of cycles to run (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        num_cycles: usize,

        /// IANA timezone for service days (defaults to REFERENCE_TIMEZONE)
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Decode one GTFS-RT snapshot and print its route samples
    Inspect {
        /// Path to file or URL to fetch
        #[arg(value_name = "FILE_OR_URL")]
        source: String,

        /// GTFS static zip used for route names and delay attribution
        #[arg(short, long)]
        gtfs: Option<PathBuf>,

        /// Agency id the samples are attributed to
        #[arg(short, long, default_value = "local")]
        agency: String,

        /// IANA timezone for service days (defaults to REFERENCE_TIMEZONE)
        #[arg(long)]
        timezone: Option<String>,
    },
    /// Print a bucketed delay chart as JSON
    Query(QueryArgs),
    /// Upload a bucketed delay chart to S3
    Publish {
        #[command(flatten)]
        query: QueryArgs,

        /// S3 bucket name (e.g., "my-bucket")
        #[arg(long)]
        s3_bucket: String,

        /// Object key; defaults to charts/<reducer>.json
        #[arg(long)]
        key: Option<String>,

        /// Gzip compress the JSON before uploading
        #[arg(long, default_value_t = false)]
        gzip: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ReducerArg {
    Average,
    Max,
    OnTime,
}

#[derive(Args)]
struct QueryArgs {
    /// Directory holding per-route sample CSVs
    #[arg(short, long, default_value = "data")]
    data_dir: PathBuf,

    /// Range start: epoch seconds or RFC 3339
    #[arg(long, value_parser = parse_time)]
    start: i64,

    /// Range end (exclusive): epoch seconds or RFC 3339
    #[arg(long, value_parser = parse_time)]
    end: i64,

    /// Only this route (all routes when omitted)
    #[arg(short, long)]
    route: Option<String>,

    /// Number of buckets
    #[arg(short, long, default_value_t = DEFAULT_UNIT_COUNT)]
    units: usize,

    #[arg(long, value_enum, default_value_t = ReducerArg::Average)]
    reducer: ReducerArg,

    /// Report delays in whole minutes instead of seconds
    #[arg(long, default_value_t = false)]
    minutes: bool,

    /// Lower on-time bound in seconds (negative = early)
    #[arg(long, default_value_t = -60.0, allow_hyphen_values = true)]
    on_time_lower: f64,

    /// Upper on-time bound in seconds
    #[arg(long, default_value_t = 300.0)]
    on_time_upper: f64,

    /// GTFS static zip whose route_sort_order orders the series
    #[arg(short, long)]
    gtfs: Option<PathBuf>,

    /// IANA timezone for labels (defaults to REFERENCE_TIMEZONE)
    #[arg(long)]
    timezone: Option<String>,
}

impl QueryArgs {
    fn bucket_query(&self) -> BucketQuery {
        let unit = if self.minutes {
            DelayUnit::Minutes
        } else {
            DelayUnit::Seconds
        };
        let reducer = match self.reducer {
            ReducerArg::Average => Reducer::Average { unit },
            ReducerArg::Max => Reducer::Max { unit },
            ReducerArg::OnTime => Reducer::PercentWithin {
                lower: self.on_time_lower,
                upper: self.on_time_upper,
            },
        };
        BucketQuery {
            start: self.start,
            end: self.end,
            unit_count: self.units,
            routes: self
                .route
                .clone()
                .map_or(RouteSelection::All, RouteSelection::One),
            reducer,
        }
    }
}

/// Accepts epoch seconds or an RFC 3339 timestamp.
fn parse_time(value: &str) -> Result<i64, String> {
    if let Ok(secs) = value.parse::<i64>() {
        return Ok(secs);
    }
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.timestamp())
        .map_err(|e| format!("expected epoch seconds or RFC 3339 time: {e}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path =
        std::env::var("LOG_FILE_PATH").unwrap_or_else(|_| "logs/route_delays.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("route_delays.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Poll {
            registry,
            data_dir,
            interval,
            concurrency,
            feed_timeout,
            write_timeout,
            backoff,
            static_timeout,
            num_cycles,
            timezone,
        } => {
            let config = PollerConfig {
                interval: Duration::from_secs(interval),
                concurrency,
                feed_timeout: Duration::from_secs(feed_timeout),
                write_timeout: Duration::from_secs(write_timeout),
                retry: RetryPolicy {
                    backoff: Duration::from_secs(backoff),
                    static_timeout: Duration::from_secs(static_timeout),
                    realtime_timeout: Duration::from_secs(feed_timeout),
                },
                timezone: resolve_timezone(timezone.as_deref())?,
            };
            config.validate()?;
            poll(&registry, &data_dir, config, num_cycles).await?;
        }
        Commands::Inspect {
            source,
            gtfs,
            agency,
            timezone,
        } => {
            let tz = resolve_timezone(timezone.as_deref())?;
            inspect(&source, gtfs.as_deref(), &agency, tz).await?;
        }
        Commands::Query(args) => {
            let chart = query(&args).await?;
            print_json(&chart)?;
        }
        Commands::Publish {
            query: args,
            s3_bucket,
            key,
            gzip,
        } => {
            if s3_bucket.is_empty() {
                bail!("S3 bucket name must not be empty");
            }
            let chart = query(&args).await?;
            let key = key.unwrap_or_else(|| format!("charts/{}.json", chart.reducer.name()));

            let config = aws_config::load_from_env().await;
            let s3 = aws_sdk_s3::Client::new(&config);
            write_json_to_s3(&s3, &s3_bucket, &key, &chart, gzip).await?;
        }
    }

    Ok(())
}

/// Polls the registered feeds into a CSV-backed sample store.
#[tracing::instrument(skip(config), fields(registry = %registry.display(), data_dir = %data_dir.display()))]
async fn poll(
    registry: &Path,
    data_dir: &Path,
    config: PollerConfig,
    num_cycles: usize,
) -> Result<()> {
    let registry = Arc::new(JsonFeedRegistry::load(registry)?);
    let store = Arc::new(CsvStore::new(data_dir)?);
    let client = BasicClient::with_timeout(config.feed_timeout).context("building HTTP client")?;
    let fetcher = Arc::new(HttpFeedFetcher::new(client, EnvKeyStore));

    if num_cycles == 0 {
        info!(interval_secs = config.interval.as_secs(), "Polling until Ctrl+C");
    } else {
        info!(num_cycles, interval_secs = config.interval.as_secs(), "Starting polling");
    }

    let orchestrator = PollingOrchestrator::new(registry, fetcher, store, config);
    orchestrator.prime_static_schedules().await?;
    orchestrator
        .run((num_cycles > 0).then_some(num_cycles))
        .await
}

/// Loads a snapshot from a local file path or URL and prints its samples.
#[tracing::instrument(skip(gtfs, tz), fields(source = %source))]
async fn inspect(
    source: &str,
    gtfs: Option<&Path>,
    agency: &str,
    tz: chrono_tz::Tz,
) -> Result<()> {
    let fetcher = HttpFeedFetcher::new(BasicClient::new(), EnvKeyStore);
    let bytes = fetcher
        .fetch_realtime(&FeedRecord::new(agency, source))
        .await?;
    let mut snapshot = decode_snapshot(&bytes)?;

    let schedule = gtfs.map(load_gtfs).transpose()?;
    let attributed = schedule.as_ref().map_or(0, |s| {
        attribute_delays(&mut snapshot.reports, s, snapshot.timestamp, tz)
    });

    let directory = schedule.as_ref().map(|s| {
        RouteDirectory::new().with_agency(agency, Arc::clone(&s.routes))
    });
    let resolver: &dyn RouteResolver = match &directory {
        Some(d) => d,
        None => &PublishedIds,
    };
    let aggregation = aggregate_routes(agency, snapshot.timestamp, &snapshot.reports, resolver);

    info!(
        reports = snapshot.reports.len(),
        attributed,
        routes = aggregation.samples.len(),
        unresolved = aggregation.unresolved,
        "Snapshot inspected"
    );
    print_json(&serde_json::json!({
        "timestamp": snapshot.timestamp,
        "unresolved": aggregation.unresolved,
        "samples": aggregation.samples,
    }))
}

fn load_gtfs(path: &Path) -> Result<StaticSchedule> {
    let bytes = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    Ok(StaticSchedule::from_zip_bytes(&bytes)?)
}

async fn query(args: &QueryArgs) -> Result<ChartSeries> {
    let tz = resolve_timezone(args.timezone.as_deref())?;
    let store = CsvStore::new(&args.data_dir)?;
    let schedule = args.gtfs.as_deref().map(load_gtfs).transpose()?;
    let ordering: &dyn RouteOrdering = match &schedule {
        Some(s) => s.routes.as_ref(),
        None => &Alphabetical,
    };

    Ok(run_query(&store, ordering, &args.bucket_query(), tz).await?)
}
