use super::client::HttpClient;
use async_trait::async_trait;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct BasicClient(reqwest::Client);

impl BasicClient {
    pub fn new() -> Self {
        Self(reqwest::Client::new())
    }

    /// A client whose requests fail with a timeout error after `timeout`.
    pub fn with_timeout(timeout: Duration) -> reqwest::Result<Self> {
        reqwest::Client::builder().timeout(timeout).build().map(Self)
    }
}

#[async_trait]
impl HttpClient for BasicClient {
    async fn execute(&self, req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.0.execute(req).await
    }
}
