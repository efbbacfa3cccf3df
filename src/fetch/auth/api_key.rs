use crate::fetch::FetchError;
use crate::fetch::client::HttpClient;
use async_trait::async_trait;
use reqwest::header::{HeaderName, HeaderValue};

/// An [`HttpClient`] wrapper that injects an API key as an HTTP header.
pub struct ApiKey<C> {
    inner: C,
    header_name: HeaderName,
    value: HeaderValue,
}

impl<C> ApiKey<C> {
    /// Fails when the header name or key are not valid header text.
    pub fn new(inner: C, header_name: &str, key: &str) -> Result<Self, FetchError> {
        let header_name = HeaderName::from_bytes(header_name.as_bytes())
            .map_err(|e| FetchError::MissingKey(format!("invalid header name {header_name}: {e}")))?;
        let mut value = HeaderValue::from_str(key)
            .map_err(|e| FetchError::MissingKey(format!("invalid header value: {e}")))?;
        value.set_sensitive(true);
        Ok(Self {
            inner,
            header_name,
            value,
        })
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for ApiKey<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        req.headers_mut()
            .insert(self.header_name.clone(), self.value.clone());
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_header_text_is_validated() {
        assert!(ApiKey::new(BasicClient::new(), "x-api-key", "secret").is_ok());
        assert!(matches!(
            ApiKey::new(BasicClient::new(), "bad header", "secret"),
            Err(FetchError::MissingKey(_))
        ));
        assert!(matches!(
            ApiKey::new(BasicClient::new(), "x-api-key", "line\nbreak"),
            Err(FetchError::MissingKey(_))
        ));
    }
}
