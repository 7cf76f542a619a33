//! Profile-provider interface: a pluggable source of user profile/chart
//! context, resolved optionally before `GenerateBuffer` (§4.4, §4.5 step 4).
//! Out of scope per §1; kept to a narrow trait so the Orchestrator never
//! knows the vendor details.

use async_trait::async_trait;
use tracing::warn;

use crate::config::ProfileConfig;
use crate::llm::ProfileContext;

/// `ProfileFetchFailed` is non-fatal (§7): regeneration proceeds without
/// profile context, logged.
#[async_trait]
pub trait ProfileProvider: Send + Sync {
    async fn fetch(&self, connection_id: &str) -> Option<ProfileContext>;
}

/// Used when no profile credentials are configured (§6 "absent disables
/// profile context").
pub struct NullProfileProvider;

#[async_trait]
impl ProfileProvider for NullProfileProvider {
    async fn fetch(&self, _connection_id: &str) -> Option<ProfileContext> {
        None
    }
}

/// HTTP-backed profile/chart lookup, following the same plain
/// `reqwest::Client` pattern as `HttpLlmClient`.
pub struct HttpProfileProvider {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl HttpProfileProvider {
    /// Returns `None` when profile credentials aren't configured, so callers
    /// fall back to `NullProfileProvider` (§6).
    pub fn from_config(config: &ProfileConfig) -> Option<Self> {
        Some(Self {
            http: reqwest::Client::new(),
            api_key: config.api_key.clone()?,
            base_url: config.base_url.clone()?,
        })
    }
}

#[async_trait]
impl ProfileProvider for HttpProfileProvider {
    async fn fetch(&self, connection_id: &str) -> Option<ProfileContext> {
        let url = format!("{}/profiles/{connection_id}", self.base_url);
        match self.http.get(&url).bearer_auth(&self.api_key).send().await {
            Ok(response) if response.status().is_success() => match response.json().await {
                Ok(value) => Some(ProfileContext(value)),
                Err(e) => {
                    warn!(error = %e, "profile fetch returned unparseable body");
                    None
                }
            },
            Ok(response) => {
                warn!(status = %response.status(), "profile fetch failed");
                None
            }
            Err(e) => {
                warn!(error = %e, "profile fetch failed");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn null_provider_always_returns_none() {
        assert!(NullProfileProvider.fetch("conn-1").await.is_none());
    }
}
