use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use super::auth::{ApiKey, UrlParam};
use super::keys::KeyStore;
use super::{BasicClient, FetchError, fetch_bytes};
use crate::registry::{FeedAuth, FeedRecord};

/// Downloads the payloads of one registered feed.
#[async_trait]
pub trait FeedFetcher: Send + Sync {
    /// GTFS-Realtime protobuf bytes.
    async fn fetch_realtime(&self, feed: &FeedRecord) -> Result<Bytes, FetchError>;

    /// GTFS static zip bytes.
    async fn fetch_static(&self, feed: &FeedRecord) -> Result<Bytes, FetchError>;
}

/// Fetches over HTTP with the feed's credentials applied.
///
/// URLs that are not `http(s)` are read as local file paths, with an
/// optional `file://` prefix.
pub struct HttpFeedFetcher<K> {
    client: BasicClient,
    keys: K,
}

impl<K: KeyStore> HttpFeedFetcher<K> {
    pub fn new(client: BasicClient, keys: K) -> Self {
        Self { client, keys }
    }

    async fn key(&self, reference: &str) -> Result<String, FetchError> {
        self.keys
            .get(reference)
            .await
            .map_err(|e| FetchError::MissingKey(format!("{e:#}")))
    }

    async fn fetch(&self, feed: &FeedRecord, url: &str) -> Result<Bytes, FetchError> {
        if !url.starts_with("http") {
            let path = url.strip_prefix("file://").unwrap_or(url);
            debug!(path, "Reading feed from local file");
            return tokio::fs::read(path)
                .await
                .map(Bytes::from)
                .map_err(|e| FetchError::Unavailable(format!("{path}: {e}")));
        }

        match &feed.auth {
            FeedAuth::None => fetch_bytes(&self.client, url).await,
            FeedAuth::UrlParam {
                param_name,
                key_env,
            } => {
                let client = UrlParam {
                    inner: self.client.clone(),
                    param_name: param_name.clone(),
                    key: self.key(key_env).await?,
                };
                fetch_bytes(&client, url).await
            }
            FeedAuth::Header {
                header_name,
                key_env,
            } => {
                let key = self.key(key_env).await?;
                let client = ApiKey::new(self.client.clone(), header_name, &key)?;
                fetch_bytes(&client, url).await
            }
        }
    }
}

#[async_trait]
impl<K: KeyStore> FeedFetcher for HttpFeedFetcher<K> {
    #[tracing::instrument(skip_all, fields(feed_id = %feed.id))]
    async fn fetch_realtime(&self, feed: &FeedRecord) -> Result<Bytes, FetchError> {
        let bytes = self.fetch(feed, &feed.realtime_url).await?;
        debug!(bytes = bytes.len(), "Realtime payload fetched");
        Ok(bytes)
    }

    #[tracing::instrument(skip_all, fields(feed_id = %feed.id))]
    async fn fetch_static(&self, feed: &FeedRecord) -> Result<Bytes, FetchError> {
        let url = feed.static_url.as_deref().ok_or(FetchError::NoStaticUrl)?;
        let bytes = self.fetch(feed, url).await?;
        debug!(bytes = bytes.len(), "Static payload fetched");
        Ok(bytes)
    }
}
