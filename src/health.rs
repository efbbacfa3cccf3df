//! Per-cycle recovery of unhealthy feeds.
//!
//! Each non-ACTIVE feed gets at most one recovery attempt per poll cycle.
//! OUTDATED feeds refresh their static schedule before retrying realtime;
//! TIMEOUT and UNAVAILABLE feeds only retry realtime. UNAUTHORIZED and
//! DELETED feeds stay put until they are re-registered.

use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::config::RetryPolicy;
use crate::fetch::FetchError;
use crate::model::FeedHealth;
use crate::poller::{IngestError, IngestSummary};
use crate::registry::{FeedRecord, FeedRegistry};

/// The two recovery steps the coordinator can ask for.
#[async_trait]
pub trait RecoveryActions: Send + Sync {
    async fn refresh_static(&self, feed: &FeedRecord) -> Result<(), IngestError>;
    async fn ingest_realtime(&self, feed: &FeedRecord) -> Result<IngestSummary, IngestError>;
}

#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

pub struct FeedHealthRetryCoordinator {
    registry: Arc<dyn FeedRegistry>,
    policy: RetryPolicy,
    timer: Arc<dyn Timer>,
}

impl FeedHealthRetryCoordinator {
    pub fn new(registry: Arc<dyn FeedRegistry>, policy: RetryPolicy) -> Self {
        Self::with_timer(registry, policy, Arc::new(TokioTimer))
    }

    pub fn with_timer(
        registry: Arc<dyn FeedRegistry>,
        policy: RetryPolicy,
        timer: Arc<dyn Timer>,
    ) -> Self {
        Self {
            registry,
            policy,
            timer,
        }
    }

    /// Runs one recovery step for `feed` and persists the resulting status.
    #[tracing::instrument(skip_all, fields(feed_id = %feed.id, status = %feed.status))]
    pub async fn advance(
        &self,
        feed: &FeedRecord,
        actions: &dyn RecoveryActions,
    ) -> Result<FeedHealth> {
        let next = match feed.status {
            FeedHealth::Active => return Ok(FeedHealth::Active),
            FeedHealth::Unauthorized | FeedHealth::Deleted => feed.status,
            FeedHealth::Outdated => self.recover_outdated(feed, actions).await,
            FeedHealth::Timeout | FeedHealth::Unavailable => {
                match self.retry_realtime(feed, actions).await {
                    Ok(_) => FeedHealth::Active,
                    Err(e) => {
                        warn!(error = %e, "Realtime retry failed");
                        match e.status() {
                            Some(s @ (FeedHealth::Unauthorized
                            | FeedHealth::Deleted
                            | FeedHealth::Outdated)) => s,
                            Some(_) => FeedHealth::Timeout,
                            None => FeedHealth::Active,
                        }
                    }
                }
            }
        };

        self.record_transition(feed, next).await?;
        Ok(next)
    }

    async fn recover_outdated(&self, feed: &FeedRecord, actions: &dyn RecoveryActions) -> FeedHealth {
        match timeout(self.policy.static_timeout, actions.refresh_static(feed)).await {
            Ok(Ok(())) => debug!("Static schedule refreshed"),
            Ok(Err(e)) => {
                warn!(error = %e, "Static refresh failed");
                return FeedHealth::Unavailable;
            }
            Err(_) => {
                warn!(timeout = ?self.policy.static_timeout, "Static refresh timed out");
                return FeedHealth::Unavailable;
            }
        }

        match self.retry_realtime(feed, actions).await {
            Ok(_) => FeedHealth::Active,
            Err(e) => {
                warn!(error = %e, "Realtime retry after static refresh failed");
                match e.status() {
                    Some(s) if s.is_terminal() => s,
                    Some(_) => FeedHealth::Outdated,
                    None => FeedHealth::Active,
                }
            }
        }
    }

    /// One backoff, then exactly one realtime attempt.
    async fn retry_realtime(
        &self,
        feed: &FeedRecord,
        actions: &dyn RecoveryActions,
    ) -> Result<IngestSummary, IngestError> {
        self.timer.sleep(self.policy.backoff).await;
        timeout(self.policy.realtime_timeout, actions.ingest_realtime(feed))
            .await
            .map_err(|_| IngestError::Fetch(FetchError::Timeout))?
    }

    /// Persists `next` for `feed` and logs the change.
    pub async fn record_transition(&self, feed: &FeedRecord, next: FeedHealth) -> Result<()> {
        self.registry.set_status(&feed.id, next).await?;
        if next == feed.status {
            debug!(feed_id = %feed.id, status = %next, "Feed status unchanged");
        } else {
            info!(
                feed_id = %feed.id,
                old_status = %feed.status,
                new_status = %next,
                "Feed status changed"
            );
        }
        Ok(())
    }
}
