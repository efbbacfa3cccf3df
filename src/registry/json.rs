use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::debug;

use super::{FeedRecord, FeedRegistry};
use crate::model::FeedHealth;

/// Registry stored as a JSON array of [`FeedRecord`]s on disk:
/// ```json
/// [
///   {
///     "id": "translink",
///     "name": "TransLink",
///     "realtime_url": "https://gtfsapi.translink.ca/v3/gtfsrealtime",
///     "static_url": "https://gtfs-static.translink.ca/gtfs/google_transit.zip",
///     "auth": { "type": "url_param", "param_name": "apikey", "key_env": "TRANSLINK_API_KEY" },
///     "status": "ACTIVE"
///   }
/// ]
/// ```
///
/// Status changes are written back to the file immediately. The record
/// lock is only held for the in-memory update; file writes serialize on
/// their own lock and always write the latest state.
pub struct JsonFeedRegistry {
    path: Option<PathBuf>,
    feeds: Mutex<Vec<FeedRecord>>,
    writer: Mutex<()>,
}

impl JsonFeedRegistry {
    /// Loads the registry from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading feed registry {}", path.display()))?;
        let feeds: Vec<FeedRecord> = serde_json::from_str(&content)
            .with_context(|| format!("parsing feed registry {}", path.display()))?;
        debug!(path = %path.display(), feeds = feeds.len(), "Feed registry loaded");

        Ok(Self {
            path: Some(path.to_path_buf()),
            feeds: Mutex::new(feeds),
            writer: Mutex::new(()),
        })
    }

    /// A registry that is never written to disk.
    pub fn in_memory(feeds: Vec<FeedRecord>) -> Self {
        Self {
            path: None,
            feeds: Mutex::new(feeds),
            writer: Mutex::new(()),
        }
    }

    async fn persist(&self) -> Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let _writer = self.writer.lock().await;
        // snapshot under the writer lock, so the last write carries every update
        let feeds = self.feeds.lock().await.clone();
        let body = serde_json::to_vec_pretty(&feeds)?;
        // Readers never see a partially written file.
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, body).await?;
        tokio::fs::rename(&tmp, path).await?;
        Ok(())
    }
}

#[async_trait]
impl FeedRegistry for JsonFeedRegistry {
    async fn list_feeds(&self) -> Result<Vec<FeedRecord>> {
        Ok(self.feeds.lock().await.clone())
    }

    async fn set_status(&self, feed_id: &str, status: FeedHealth) -> Result<()> {
        {
            let mut feeds = self.feeds.lock().await;
            let Some(feed) = feeds.iter_mut().find(|f| f.id == feed_id) else {
                bail!("unknown feed {feed_id}");
            };
            feed.status = status;
        }
        self.persist().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::FeedAuth;
    use std::env;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn test_set_status_persists_to_file() {
        let path = env::temp_dir().join("route_delays_registry_test.json");
        let mut feed = FeedRecord::new("translink", "https://example.com/rt");
        feed.auth = FeedAuth::UrlParam {
            param_name: "apikey".to_string(),
            key_env: "TRANSLINK_API_KEY".to_string(),
        };
        std::fs::write(&path, serde_json::to_string(&vec![feed]).unwrap()).unwrap();

        let registry = JsonFeedRegistry::load(&path).unwrap();
        registry
            .set_status("translink", FeedHealth::Outdated)
            .await
            .unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        assert!(raw.contains("\"OUTDATED\""));
        assert!(raw.contains("\"url_param\""));

        let reloaded = JsonFeedRegistry::load(&path).unwrap();
        let feeds = reloaded.list_feeds().await.unwrap();
        assert_eq!(feeds[0].status, FeedHealth::Outdated);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_status_visible_while_file_write_waits() {
        let path = env::temp_dir().join("route_delays_registry_writer_test.json");
        let feeds = vec![
            FeedRecord::new("a", "https://example.com/a"),
            FeedRecord::new("b", "https://example.com/b"),
        ];
        std::fs::write(&path, serde_json::to_string(&feeds).unwrap()).unwrap();
        let registry = Arc::new(JsonFeedRegistry::load(&path).unwrap());

        let writer = registry.writer.lock().await;
        let pending: Vec<_> = [("a", FeedHealth::Timeout), ("b", FeedHealth::Deleted)]
            .into_iter()
            .map(|(id, status)| {
                let registry = Arc::clone(&registry);
                tokio::spawn(async move { registry.set_status(id, status).await })
            })
            .collect();

        tokio::time::timeout(Duration::from_secs(1), async {
            loop {
                let feeds = registry.list_feeds().await.unwrap();
                if feeds[0].status == FeedHealth::Timeout && feeds[1].status == FeedHealth::Deleted {
                    break;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        drop(writer);
        for task in pending {
            task.await.unwrap().unwrap();
        }

        let reloaded = JsonFeedRegistry::load(&path).unwrap();
        let statuses: Vec<_> = reloaded
            .list_feeds()
            .await
            .unwrap()
            .into_iter()
            .map(|f| f.status)
            .collect();
        assert_eq!(statuses, vec![FeedHealth::Timeout, FeedHealth::Deleted]);

        std::fs::remove_file(&path).unwrap();
    }

    #[tokio::test]
    async fn test_unknown_feed_is_an_error() {
        let registry = JsonFeedRegistry::in_memory(vec![]);
        assert!(
            registry
                .set_status("missing", FeedHealth::Active)
                .await
                .is_err()
        );
    }

    #[test]
    fn test_minimal_record_defaults() {
        let feeds: Vec<FeedRecord> =
            serde_json::from_str(r#"[{"id": "a", "name": "A", "realtime_url": "file:a.pb"}]"#)
                .unwrap();
        assert_eq!(feeds[0].status, FeedHealth::Active);
        assert_eq!(feeds[0].auth, FeedAuth::None);
        assert!(!feeds[0].auth.requires_auth());
        assert_eq!(feeds[0].static_url, None);
    }
}
