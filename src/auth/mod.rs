//! Bearer-credential provider for webhook intentions.
//!
//! The engine only needs "a valid token for this agent, refreshed if
//! expired"; how that happens (OAuth refresh flows, vaults) is opaque.

use anyhow::Result;
use async_trait::async_trait;

#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// A currently-valid access token for the given agent.
    async fn access_token(&self, agent_id: &str) -> Result<String>;
}

/// Fixed token from tenant config. Real deployments substitute a refreshing
/// OAuth provider behind the same trait.
#[derive(Debug, Clone, Default)]
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: &str) -> Self {
        Self {
            token: token.to_string(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self, _agent_id: &str) -> Result<String> {
        Ok(self.token.clone())
    }
}
