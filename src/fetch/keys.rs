use anyhow::{Context, Result};

/// Resolves a key reference from the feed registry into its plaintext value.
#[async_trait::async_trait]
pub trait KeyStore: Send + Sync {
    async fn get(&self, reference: &str) -> Result<String>;
}

/// Treats the reference as the name of an environment variable.
#[derive(Debug, Clone, Copy, Default)]
pub struct EnvKeyStore;

#[async_trait::async_trait]
impl KeyStore for EnvKeyStore {
    async fn get(&self, reference: &str) -> Result<String> {
        std::env::var(reference).with_context(|| format!("environment variable {reference} not set"))
    }
}
