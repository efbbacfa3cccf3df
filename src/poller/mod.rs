//! Fixed-rate polling of every registered feed.
//!
//! A cycle lists the registry and spawns one task per ACTIVE feed on a
//! [`JoinSet`], bounded by a semaphore, and joins them before it completes.
//! Every other feed is handed to the [`FeedHealthRetryCoordinator`] on a
//! separate set of recovery tasks. Under [`PollingOrchestrator::run`] those
//! recoveries may outlive the cycle that started them, so a slow static
//! refresh never delays the next tick for healthy feeds. One feed failing,
//! timing out or panicking never affects its siblings.

mod pipeline;

pub use pipeline::{FeedPipeline, IngestError, IngestSummary, ScheduleCache, ScheduleSet};

use anyhow::Result;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinError, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{Instrument, debug, error, info, warn};

use crate::config::PollerConfig;
use crate::fetch::FeedFetcher;
use crate::health::FeedHealthRetryCoordinator;
use crate::model::FeedHealth;
use crate::registry::{FeedRecord, FeedRegistry};
use crate::store::TimeSeriesStore;

/// Totals for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CycleReport {
    pub feeds: usize,
    pub healthy: usize,
    pub failures: usize,
    pub samples_written: usize,
    /// Recoveries started this cycle.
    pub recovering: usize,
    /// Feeds skipped because an earlier recovery is still running.
    pub skipped: usize,
}

impl CycleReport {
    fn record(&mut self, joined: Result<Result<FeedOutcome>, JoinError>) {
        match joined {
            Ok(Ok(outcome)) => {
                self.samples_written += outcome.samples_written;
                if outcome.failed {
                    self.failures += 1;
                } else {
                    self.healthy += 1;
                }
            }
            Ok(Err(e)) => {
                error!(error = %e, "Feed task failed");
                self.failures += 1;
            }
            Err(e) => {
                error!(error = %e, "Feed task panicked");
                self.failures += 1;
            }
        }
    }
}

#[derive(Debug)]
struct FeedOutcome {
    samples_written: usize,
    failed: bool,
}

/// Coordinator runs that are not tied to a single cycle.
#[derive(Default)]
struct Recoveries {
    tasks: JoinSet<Result<FeedOutcome>>,
    in_flight: HashMap<String, AbortHandle>,
}

impl Recoveries {
    fn is_running(&self, feed_id: &str) -> bool {
        self.in_flight
            .get(feed_id)
            .is_some_and(|handle| !handle.is_finished())
    }

    fn finish(&mut self, joined: Result<Result<FeedOutcome>, JoinError>) {
        self.in_flight.retain(|_, handle| !handle.is_finished());
        match joined {
            Ok(Ok(outcome)) => debug!(failed = outcome.failed, "Recovery finished"),
            Ok(Err(e)) => error!(error = %e, "Recovery task failed"),
            Err(e) => error!(error = %e, "Recovery task panicked"),
        }
    }
}

pub struct PollingOrchestrator {
    registry: Arc<dyn FeedRegistry>,
    pipeline: Arc<FeedPipeline>,
    coordinator: Arc<FeedHealthRetryCoordinator>,
    recovery_permits: Arc<Semaphore>,
    config: PollerConfig,
}

impl PollingOrchestrator {
    pub fn new(
        registry: Arc<dyn FeedRegistry>,
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<dyn TimeSeriesStore>,
        config: PollerConfig,
    ) -> Self {
        let pipeline = Arc::new(FeedPipeline::new(
            fetcher,
            store,
            Arc::new(ScheduleCache::new()),
            config.feed_timeout,
            config.write_timeout,
            config.timezone,
        ));
        let coordinator = Arc::new(FeedHealthRetryCoordinator::new(
            Arc::clone(&registry),
            config.retry,
        ));
        Self::from_parts(registry, pipeline, coordinator, config)
    }

    pub fn from_parts(
        registry: Arc<dyn FeedRegistry>,
        pipeline: Arc<FeedPipeline>,
        coordinator: Arc<FeedHealthRetryCoordinator>,
        config: PollerConfig,
    ) -> Self {
        Self {
            registry,
            pipeline,
            coordinator,
            recovery_permits: Arc::new(Semaphore::new(config.concurrency)),
            config,
        }
    }

    pub fn pipeline(&self) -> &FeedPipeline {
        &self.pipeline
    }

    /// Loads the static schedule of every feed that has one. Feeds whose
    /// schedule cannot be loaded are marked OUTDATED.
    #[tracing::instrument(skip(self))]
    pub async fn prime_static_schedules(&self) -> Result<usize> {
        let feeds = self.registry.list_feeds().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();

        for feed in feeds
            .into_iter()
            .filter(|f| f.static_url.is_some() && !f.status.is_terminal())
        {
            let sem = Arc::clone(&semaphore);
            let pipeline = Arc::clone(&self.pipeline);
            let coordinator = Arc::clone(&self.coordinator);
            let span = tracing::info_span!("load_static", feed_id = %feed.id);

            tasks.spawn(
                async move {
                    let _permit = sem.acquire_owned().await?;
                    load_feed_static(&feed, &pipeline, &coordinator).await
                }
                .instrument(span),
            );
        }

        let mut loaded = 0;
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(true)) => loaded += 1,
                Ok(Ok(false)) => {}
                Ok(Err(e)) => error!(error = %e, "Static schedule task failed"),
                Err(e) => error!(error = %e, "Static schedule task panicked"),
            }
        }

        info!(loaded, "Static schedules primed");
        Ok(loaded)
    }

    /// Processes every registered feed once, recoveries included, and waits
    /// for all of them.
    #[tracing::instrument(skip(self))]
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let mut recoveries = Recoveries::default();
        let mut report = self.poll_feeds(&mut recoveries).await?;

        while let Some(joined) = recoveries.tasks.join_next().await {
            report.record(joined);
        }

        info!(
            feeds = report.feeds,
            healthy = report.healthy,
            failures = report.failures,
            samples_written = report.samples_written,
            "Poll cycle complete"
        );
        Ok(report)
    }

    /// Ingests ACTIVE feeds and joins them. Unhealthy feeds get a recovery
    /// task on `recoveries` unless one is already running for them.
    async fn poll_feeds(&self, recoveries: &mut Recoveries) -> Result<CycleReport> {
        let feeds = self.registry.list_feeds().await?;
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency));
        let mut tasks = JoinSet::new();
        let mut report = CycleReport {
            feeds: feeds.len(),
            ..CycleReport::default()
        };

        for feed in feeds {
            let pipeline = Arc::clone(&self.pipeline);
            let coordinator = Arc::clone(&self.coordinator);
            let feed_span = tracing::info_span!(
                "process_feed",
                feed_id = %feed.id,
                feed_name = %feed.name,
                status = %feed.status,
            );

            if feed.status == FeedHealth::Active {
                let sem = Arc::clone(&semaphore);
                tasks.spawn(
                    async move {
                        let _permit = sem.acquire_owned().await?;
                        ingest_feed(&feed, &pipeline, &coordinator).await
                    }
                    .instrument(feed_span),
                );
                continue;
            }

            if recoveries.is_running(&feed.id) {
                debug!(feed_id = %feed.id, "Recovery still running, skipping feed");
                report.skipped += 1;
                continue;
            }

            let sem = Arc::clone(&self.recovery_permits);
            let feed_id = feed.id.clone();
            let handle = recoveries.tasks.spawn(
                async move {
                    let _permit = sem.acquire_owned().await?;
                    recover_feed(&feed, &pipeline, &coordinator).await
                }
                .instrument(feed_span),
            );
            recoveries.in_flight.insert(feed_id, handle);
            report.recovering += 1;
        }

        while let Some(joined) = tasks.join_next().await {
            report.record(joined);
        }
        Ok(report)
    }

    /// Polls at the configured interval until `max_cycles` cycles have run
    /// (`None` = forever) or Ctrl+C is received. Recoveries still running
    /// when polling stops are aborted; their feeds keep the stored status.
    pub async fn run(&self, max_cycles: Option<usize>) -> Result<()> {
        self.run_until(max_cycles, tokio::signal::ctrl_c()).await
    }

    /// [`run`](Self::run) with an arbitrary shutdown signal. The signal is
    /// also raced against each cycle, so a long cycle is cut short.
    pub async fn run_until<F>(&self, max_cycles: Option<usize>, shutdown: F) -> Result<()>
    where
        F: Future,
    {
        let mut interval = tokio::time::interval(self.config.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        let mut recoveries = Recoveries::default();
        tokio::pin!(shutdown);
        let mut cycles = 0;

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!(cycles, "Shutdown requested");
                    break;
                }
                Some(joined) = recoveries.tasks.join_next(), if !recoveries.tasks.is_empty() => {
                    recoveries.finish(joined);
                    continue;
                }
                _ = interval.tick() => {}
            }

            tokio::select! {
                _ = &mut shutdown => {
                    info!(cycles, "Shutdown requested during cycle");
                    break;
                }
                polled = self.poll_feeds(&mut recoveries) => match polled {
                    Ok(report) => info!(
                        feeds = report.feeds,
                        healthy = report.healthy,
                        failures = report.failures,
                        recovering = report.recovering,
                        skipped = report.skipped,
                        samples_written = report.samples_written,
                        "Poll cycle complete"
                    ),
                    Err(e) => error!(error = %e, "Poll cycle failed"),
                },
            }
            cycles += 1;

            if max_cycles.is_some_and(|max| cycles >= max) {
                break;
            }
            info!(interval_secs = self.config.interval.as_secs(), "Waiting for next cycle");
        }

        if !recoveries.tasks.is_empty() {
            warn!(pending = recoveries.tasks.len(), "Aborting unfinished recoveries");
            recoveries.tasks.shutdown().await;
        }
        info!(cycles, "Polling stopped");
        Ok(())
    }
}

async fn load_feed_static(
    feed: &FeedRecord,
    pipeline: &FeedPipeline,
    coordinator: &FeedHealthRetryCoordinator,
) -> Result<bool> {
    match pipeline.load_static(feed).await {
        Ok(()) => Ok(true),
        Err(e) => {
            warn!(error = %e, "Static schedule load failed");
            coordinator
                .record_transition(feed, FeedHealth::Outdated)
                .await?;
            Ok(false)
        }
    }
}

async fn recover_feed(
    feed: &FeedRecord,
    pipeline: &FeedPipeline,
    coordinator: &FeedHealthRetryCoordinator,
) -> Result<FeedOutcome> {
    let status = coordinator.advance(feed, pipeline).await?;
    Ok(FeedOutcome {
        samples_written: 0,
        failed: status != FeedHealth::Active,
    })
}

async fn ingest_feed(
    feed: &FeedRecord,
    pipeline: &FeedPipeline,
    coordinator: &FeedHealthRetryCoordinator,
) -> Result<FeedOutcome> {
    match pipeline.ingest(feed).await {
        Ok(summary) => Ok(FeedOutcome {
            samples_written: summary.samples_written,
            failed: false,
        }),
        Err(e) => {
            let samples_written = match &e {
                IngestError::Outdated { written, .. } => *written,
                _ => 0,
            };
            match e.status() {
                Some(next) => {
                    warn!(error = %e, next_status = %next, "Feed ingest failed");
                    coordinator.record_transition(feed, next).await?;
                }
                None => error!(error = %e, "Feed ingest failed, status unchanged"),
            }
            Ok(FeedOutcome {
                samples_written,
                failed: true,
            })
        }
    }
}
