//! Registry of agency feeds and their health status.

mod json;

pub use json::JsonFeedRegistry;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::model::FeedHealth;

/// Describes how a feed requires authentication.
///
/// The key itself is never stored in the registry. `key_env` names the
/// environment variable holding it.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedAuth {
    /// No authentication required.
    #[default]
    None,
    /// API key must be appended as a URL query parameter with the given name.
    UrlParam { param_name: String, key_env: String },
    /// API key must be sent as an HTTP header with the given name.
    Header { header_name: String, key_env: String },
}

impl FeedAuth {
    /// Returns `true` if any authentication credentials are needed.
    pub fn requires_auth(&self) -> bool {
        !matches!(self, FeedAuth::None)
    }
}

/// One agency feed as persisted in the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    pub id: String,
    pub name: String,
    pub realtime_url: String,
    #[serde(default)]
    pub static_url: Option<String>,
    #[serde(default)]
    pub auth: FeedAuth,
    #[serde(default = "default_status")]
    pub status: FeedHealth,
}

fn default_status() -> FeedHealth {
    FeedHealth::Active
}

impl FeedRecord {
    pub fn new(id: &str, realtime_url: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            realtime_url: realtime_url.to_string(),
            static_url: None,
            auth: FeedAuth::None,
            status: FeedHealth::Active,
        }
    }
}

/// Source of feed records and sink for their status transitions.
#[async_trait::async_trait]
pub trait FeedRegistry: Send + Sync {
    /// Every registered feed, in a stable order.
    async fn list_feeds(&self) -> Result<Vec<FeedRecord>>;

    /// Persists a new status for one feed.
    async fn set_status(&self, feed_id: &str, status: FeedHealth) -> Result<()>;
}
