//! Per-feed ingest: fetch, decode, attribute, aggregate, store.

use anyhow::anyhow;
use async_trait::async_trait;
use chrono_tz::Tz;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tokio::time::timeout;
use tracing::{debug, info};

use crate::analyzers::aggregate::{Aggregation, aggregate_routes};
use crate::fetch::{FeedFetcher, FetchError};
use crate::health::RecoveryActions;
use crate::model::FeedHealth;
use crate::parser::{DecodeError, decode_snapshot};
use crate::registry::FeedRecord;
use crate::routes::{PublishedIds, RouteDirectory, RouteResolver};
use crate::schedule::attribution::attribute_delays;
use crate::schedule::{ScheduleError, StaticSchedule};
use crate::store::TimeSeriesStore;

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("snapshot decode failed: {0}")]
    Decode(#[from] DecodeError),
    #[error("static schedule invalid: {0}")]
    Schedule(#[from] ScheduleError),
    #[error("background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
    /// Samples were written, but some ids are missing from the static schedule.
    #[error("{unresolved} reports reference routes or trips missing from the static schedule")]
    Outdated { unresolved: usize, written: usize },
    #[error("sample store write failed: {0:#}")]
    Store(anyhow::Error),
}

impl IngestError {
    /// The feed status this failure leads to. `None` leaves the status as is.
    pub fn status(&self) -> Option<FeedHealth> {
        match self {
            IngestError::Fetch(e) => Some(e.health()),
            IngestError::Decode(_) | IngestError::Schedule(_) | IngestError::Task(_) => {
                Some(FeedHealth::Unavailable)
            }
            IngestError::Outdated { .. } => Some(FeedHealth::Outdated),
            IngestError::Store(_) => None,
        }
    }
}

/// Counts from one successful realtime ingest.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    pub reports: usize,
    pub attributed: usize,
    pub samples_written: usize,
}

/// An immutable view of every loaded static schedule.
#[derive(Debug, Default)]
pub struct ScheduleSet {
    pub directory: RouteDirectory,
    schedules: HashMap<String, Arc<StaticSchedule>>,
}

impl ScheduleSet {
    pub fn schedule(&self, feed_id: &str) -> Option<&StaticSchedule> {
        self.schedules.get(feed_id).map(Arc::as_ref)
    }

    fn with_schedule(&self, feed_id: &str, schedule: StaticSchedule) -> Self {
        let directory = self
            .directory
            .with_agency(feed_id, Arc::clone(&schedule.routes));
        let mut schedules = self.schedules.clone();
        schedules.insert(feed_id.to_string(), Arc::new(schedule));
        Self {
            directory,
            schedules,
        }
    }
}

/// Holder of the current [`ScheduleSet`]. Installing a schedule swaps in a
/// new set; readers keep whichever set they already hold.
#[derive(Debug, Default)]
pub struct ScheduleCache {
    current: RwLock<Arc<ScheduleSet>>,
}

impl ScheduleCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn current(&self) -> Arc<ScheduleSet> {
        Arc::clone(&*self.current.read().await)
    }

    pub async fn install(&self, feed_id: &str, schedule: StaticSchedule) {
        let mut current = self.current.write().await;
        *current = Arc::new(current.with_schedule(feed_id, schedule));
    }
}

/// Runs the ingest steps for one feed against shared collaborators.
pub struct FeedPipeline {
    fetcher: Arc<dyn FeedFetcher>,
    store: Arc<dyn TimeSeriesStore>,
    schedules: Arc<ScheduleCache>,
    feed_timeout: Duration,
    write_timeout: Duration,
    timezone: Tz,
}

impl FeedPipeline {
    pub fn new(
        fetcher: Arc<dyn FeedFetcher>,
        store: Arc<dyn TimeSeriesStore>,
        schedules: Arc<ScheduleCache>,
        feed_timeout: Duration,
        write_timeout: Duration,
        timezone: Tz,
    ) -> Self {
        Self {
            fetcher,
            store,
            schedules,
            feed_timeout,
            write_timeout,
            timezone,
        }
    }

    pub fn schedules(&self) -> &ScheduleCache {
        &self.schedules
    }

    /// Fetches one realtime snapshot and appends its route samples.
    ///
    /// Unresolved ids still write their samples before returning
    /// [`IngestError::Outdated`].
    pub async fn ingest(&self, feed: &FeedRecord) -> Result<IngestSummary, IngestError> {
        let bytes = timeout(self.feed_timeout, self.fetcher.fetch_realtime(feed))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let mut snapshot = decode_snapshot(&bytes)?;
        let set = self.schedules.current().await;

        let attributed = match set.schedule(&feed.id) {
            Some(schedule) => attribute_delays(
                &mut snapshot.reports,
                schedule,
                snapshot.timestamp,
                self.timezone,
            ),
            None => 0,
        };

        let resolver: &dyn RouteResolver = if feed.static_url.is_none() {
            &PublishedIds
        } else {
            &set.directory
        };
        let Aggregation {
            samples,
            unresolved,
        } = aggregate_routes(&feed.id, snapshot.timestamp, &snapshot.reports, resolver);

        let written = timeout(self.write_timeout, self.store.append(&samples))
            .await
            .map_err(|_| {
                IngestError::Store(anyhow!("write timed out after {:?}", self.write_timeout))
            })?
            .map_err(IngestError::Store)?;

        info!(
            snapshot_timestamp = snapshot.timestamp,
            reports = snapshot.reports.len(),
            attributed,
            routes = samples.len(),
            written,
            unresolved,
            "Snapshot ingested"
        );

        if unresolved > 0 {
            return Err(IngestError::Outdated {
                unresolved,
                written,
            });
        }
        Ok(IngestSummary {
            reports: snapshot.reports.len(),
            attributed,
            samples_written: written,
        })
    }

    /// Downloads and installs the feed's static schedule.
    pub async fn load_static(&self, feed: &FeedRecord) -> Result<(), IngestError> {
        let bytes = self.fetcher.fetch_static(feed).await?;
        let schedule =
            tokio::task::spawn_blocking(move || StaticSchedule::from_zip_bytes(&bytes)).await??;
        debug!(
            routes = schedule.routes.route_count(),
            trips = schedule.stop_times.len(),
            "Installing static schedule"
        );
        self.schedules.install(&feed.id, schedule).await;
        Ok(())
    }
}

#[async_trait]
impl RecoveryActions for FeedPipeline {
    async fn refresh_static(&self, feed: &FeedRecord) -> Result<(), IngestError> {
        self.load_static(feed).await
    }

    async fn ingest_realtime(&self, feed: &FeedRecord) -> Result<IngestSummary, IngestError> {
        self.ingest(feed).await
    }
}
