//! HTTP fetching of realtime and static feed payloads.

pub mod auth;
mod basic;
mod client;
mod feed;
mod keys;

pub use basic::BasicClient;
pub use client::HttpClient;
pub use feed::{FeedFetcher, HttpFeedFetcher};
pub use keys::{EnvKeyStore, KeyStore};

use bytes::Bytes;
use reqwest::StatusCode;

use crate::model::FeedHealth;

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("request timed out")]
    Timeout,
    #[error("feed rejected credentials (HTTP {0})")]
    Unauthorized(u16),
    #[error("feed no longer exists (HTTP {0})")]
    Gone(u16),
    #[error("unexpected HTTP status {0}")]
    Http(u16),
    #[error("feed unavailable: {0}")]
    Unavailable(String),
    #[error("API key not available: {0}")]
    MissingKey(String),
    #[error("feed has no static schedule URL")]
    NoStaticUrl,
}

impl FetchError {
    pub fn from_status(status: StatusCode) -> Self {
        match status.as_u16() {
            code @ (401 | 403) => FetchError::Unauthorized(code),
            code @ (404 | 410) => FetchError::Gone(code),
            code => FetchError::Http(code),
        }
    }

    /// The feed status this failure leads to.
    pub fn health(&self) -> FeedHealth {
        match self {
            FetchError::Timeout => FeedHealth::Timeout,
            FetchError::Unauthorized(_) | FetchError::MissingKey(_) => FeedHealth::Unauthorized,
            FetchError::Gone(_) => FeedHealth::Deleted,
            FetchError::Http(_) | FetchError::Unavailable(_) => FeedHealth::Unavailable,
            FetchError::NoStaticUrl => FeedHealth::Outdated,
        }
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            FetchError::Timeout
        } else if let Some(status) = err.status() {
            FetchError::from_status(status)
        } else {
            FetchError::Unavailable(err.to_string())
        }
    }
}

/// GETs `url` and returns the body. Non-success statuses become [`FetchError`]s.
pub async fn fetch_bytes<C: HttpClient + ?Sized>(client: &C, url: &str) -> Result<Bytes, FetchError> {
    let url = url
        .parse()
        .map_err(|e| FetchError::Unavailable(format!("invalid URL {url}: {e}")))?;
    let req = reqwest::Request::new(reqwest::Method::GET, url);

    let resp = client.execute(req).await?;
    let status = resp.status();
    if !status.is_success() {
        return Err(FetchError::from_status(status));
    }
    Ok(resp.bytes().await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        let cases = [
            (401, FeedHealth::Unauthorized),
            (403, FeedHealth::Unauthorized),
            (404, FeedHealth::Deleted),
            (410, FeedHealth::Deleted),
            (500, FeedHealth::Unavailable),
            (503, FeedHealth::Unavailable),
            (429, FeedHealth::Unavailable),
        ];
        for (code, expected) in cases {
            let status = StatusCode::from_u16(code).unwrap();
            assert_eq!(FetchError::from_status(status).health(), expected, "{code}");
        }
        assert_eq!(FetchError::Timeout.health(), FeedHealth::Timeout);
    }
}
