//! LLM Client interface (§4.4): the two operations the Orchestrator calls out
//! to, kept as a pluggable trait so vendor specifics, prompt text, and
//! markdown/JSON extraction stay out of the core state machine.

use async_trait::async_trait;
use rand::Rng;
use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::LlmConfig;
use crate::error::LlmError;
use crate::session::{Block, HistoryEntry, Role};

/// Optional profile/chart context resolved by the profile provider and handed
/// to `GenerateBuffer` unchanged (§4.4).
#[derive(Debug, Clone, Default)]
pub struct ProfileContext(pub serde_json::Value);

/// The pluggable LLM backend interface (§4.4).
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// `GenerateBuffer(history, pendingBlocks, profileContext) -> blocks`.
    async fn generate_buffer(
        &self,
        history: &[HistoryEntry],
        pending_blocks: &[Block],
        profile: Option<&ProfileContext>,
    ) -> Result<Vec<Block>, LlmError>;

    /// `RelevanceCheck(recentHistory, sentBlocks, pendingBlocks) -> bool`.
    ///
    /// On any error this must return `false` (conservative, no interrupt) to
    /// defeat infinite interrupt loops (§4.4, §7 RelevanceCheckFailed).
    async fn relevance_check(
        &self,
        recent_history: &[HistoryEntry],
        sent_blocks: &[Block],
        pending_blocks: &[Block],
    ) -> bool;
}

/// Validated wire shape for a single block returned by the backend.
#[derive(Debug, Deserialize)]
struct RawBlock {
    text: String,
    #[serde(rename = "typingTime")]
    typing_time: f64,
    group: i64,
}

impl TryFrom<RawBlock> for Block {
    type Error = LlmError;

    fn try_from(raw: RawBlock) -> Result<Self, Self::Error> {
        if raw.text.is_empty() {
            return Err(LlmError::BadResponse("block text must not be empty".into()));
        }
        if !raw.typing_time.is_finite() {
            return Err(LlmError::BadResponse("block typingTime must be finite".into()));
        }
        Ok(Block::new(raw.text, raw.typing_time, raw.group))
    }
}

#[derive(Debug, Deserialize)]
struct RawBufferResponse {
    blocks: Vec<RawBlock>,
}

#[derive(Debug, Deserialize)]
struct RawRelevanceResponse {
    relevant: bool,
}

/// HTTP-backed `LlmClient` talking to an OpenAI-compatible chat-completions
/// endpoint, following the reference `DeepSeekProvider`'s plain
/// `reqwest::Client` + JSON-body pattern rather than the streaming Responses
/// API path (GenerateBuffer/RelevanceCheck are one-shot, non-streaming calls).
pub struct HttpLlmClient {
    http: reqwest::Client,
    api_key: String,
    model: String,
    base_url: String,
    max_retries: usize,
    retry_base_ms: u64,
}

impl HttpLlmClient {
    pub fn new(config: &LlmConfig) -> Option<Self> {
        let api_key = config.api_key.clone()?;
        Some(Self {
            http: reqwest::Client::new(),
            api_key,
            model: config.model.clone(),
            base_url: config.base_url.clone(),
            max_retries: config.max_retries,
            retry_base_ms: config.retry_base_ms,
        })
    }

    /// Bounded exponential-backoff retry on `BackendUnavailable` only (§4.4):
    /// `BackendRefused` and `BadResponse` are not retried.
    async fn with_retry<T, F, Fut>(&self, op_name: &str, mut attempt: F) -> Result<T, LlmError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Result<T, LlmError>>,
    {
        let mut last_err = None;
        for attempt_no in 0..self.max_retries.max(1) {
            match attempt().await {
                Ok(value) => return Ok(value),
                Err(LlmError::BackendUnavailable(msg)) => {
                    warn!(op_name, attempt_no, %msg, "llm backend unavailable, retrying");
                    last_err = Some(LlmError::BackendUnavailable(msg));
                    if attempt_no + 1 < self.max_retries.max(1) {
                        let backoff_ms = self.retry_base_ms * (1u64 << attempt_no);
                        let jitter_ms = rand::rng().random_range(0..=self.retry_base_ms / 2 + 1);
                        tokio::time::sleep(std::time::Duration::from_millis(backoff_ms + jitter_ms))
                            .await;
                    }
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| LlmError::BackendUnavailable("retries exhausted".into())))
    }

    async fn post_json<B: serde::Serialize>(&self, path: &str, body: &B) -> Result<serde_json::Value, LlmError> {
        let response = self
            .http
            .post(format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| LlmError::BackendUnavailable(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Err(LlmError::BackendUnavailable(format!("http {status}")));
        }
        if status.as_u16() == 403 {
            return Err(LlmError::BackendRefused(format!("http {status}")));
        }
        if !status.is_success() {
            return Err(LlmError::BadResponse(format!("http {status}")));
        }

        response
            .json::<serde_json::Value>()
            .await
            .map_err(|e| LlmError::BadResponse(e.to_string()))
    }
}

fn history_to_messages(history: &[HistoryEntry]) -> Vec<serde_json::Value> {
    history
        .iter()
        .map(|entry| {
            let role = match entry.role {
                Role::User => "user",
                Role::Model => "assistant",
            };
            serde_json::json!({ "role": role, "content": entry.content })
        })
        .collect()
}

#[async_trait]
impl LlmClient for HttpLlmClient {
    async fn generate_buffer(
        &self,
        history: &[HistoryEntry],
        pending_blocks: &[Block],
        profile: Option<&ProfileContext>,
    ) -> Result<Vec<Block>, LlmError> {
        let pending_json: Vec<serde_json::Value> = pending_blocks
            .iter()
            .map(|b| serde_json::json!({ "text": b.text, "typingTime": b.typing_time, "group": b.group }))
            .collect();

        let body = serde_json::json!({
            "model": self.model,
            "messages": history_to_messages(history),
            "pending_blocks": pending_json,
            "profile": profile.map(|p| p.0.clone()),
            "response_format": { "type": "json_object" },
        });

        debug!(blocks_pending = pending_blocks.len(), "generating buffer");

        self.with_retry("generate_buffer", || async {
            let raw = self.post_json("/chat/completions", &body).await?;
            let content = raw["choices"][0]["message"]["content"]
                .as_str()
                .ok_or_else(|| LlmError::BadResponse("missing message content".into()))?;
            let parsed: RawBufferResponse = serde_json::from_str(content)
                .map_err(|e| LlmError::BadResponse(e.to_string()))?;
            parsed
                .blocks
                .into_iter()
                .map(Block::try_from)
                .collect::<Result<Vec<_>, _>>()
        })
        .await
    }

    async fn relevance_check(
        &self,
        recent_history: &[HistoryEntry],
        sent_blocks: &[Block],
        pending_blocks: &[Block],
    ) -> bool {
        let body = serde_json::json!({
            "model": self.model,
            "messages": history_to_messages(recent_history),
            "sent_blocks": sent_blocks.iter().map(|b| &b.text).collect::<Vec<_>>(),
            "pending_blocks": pending_blocks.iter().map(|b| &b.text).collect::<Vec<_>>(),
            "response_format": { "type": "json_object" },
        });

        let result = self
            .with_retry("relevance_check", || async {
                let raw = self.post_json("/chat/completions", &body).await?;
                let content = raw["choices"][0]["message"]["content"]
                    .as_str()
                    .ok_or_else(|| LlmError::BadResponse("missing message content".into()))?;
                serde_json::from_str::<RawRelevanceResponse>(content)
                    .map(|r| r.relevant)
                    .map_err(|e| LlmError::BadResponse(e.to_string()))
            })
            .await;

        match result {
            Ok(relevant) => relevant,
            Err(e) => {
                warn!(error = %e, "relevance check failed, defaulting to not-relevant");
                false
            }
        }
    }
}

/// Stand-in used when no `LLM_API_KEY` is configured (§6): the server still
/// comes up and serves `/health` and `/ws`, but every generation attempt
/// fails as `BackendUnavailable` and every relevance check defaults to "not
/// relevant", so Orchestrator flows degrade the same way they would against
/// a backend that is simply down.
pub struct DisabledLlmClient;

#[async_trait]
impl LlmClient for DisabledLlmClient {
    async fn generate_buffer(
        &self,
        _history: &[HistoryEntry],
        _pending_blocks: &[Block],
        _profile: Option<&ProfileContext>,
    ) -> Result<Vec<Block>, LlmError> {
        Err(LlmError::BackendUnavailable("no LLM backend configured".into()))
    }

    async fn relevance_check(
        &self,
        _recent_history: &[HistoryEntry],
        _sent_blocks: &[Block],
        _pending_blocks: &[Block],
    ) -> bool {
        false
    }
}

/// Test double for `LlmClient` (§10.6): scripted responses with optional
/// latency and a strict mode that panics on an unexpected call.
#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tokio::sync::Mutex;

    pub struct MockLlmClient {
        pub generate_responses: Mutex<Vec<Result<Vec<Block>, LlmError>>>,
        pub relevance_responses: Mutex<Vec<bool>>,
        pub latency: std::time::Duration,
        pub strict: bool,
        pub generate_calls: AtomicUsize,
        pub relevance_calls: AtomicUsize,
    }

    impl Default for MockLlmClient {
        fn default() -> Self {
            Self {
                generate_responses: Mutex::new(Vec::new()),
                relevance_responses: Mutex::new(Vec::new()),
                latency: std::time::Duration::ZERO,
                strict: false,
                generate_calls: AtomicUsize::new(0),
                relevance_calls: AtomicUsize::new(0),
            }
        }
    }

    impl MockLlmClient {
        pub fn with_generate(blocks: Vec<Block>) -> Self {
            let mock = Self::default();
            mock.generate_responses.try_lock().unwrap().push(Ok(blocks));
            mock
        }

        pub fn push_generate(&self, result: Result<Vec<Block>, LlmError>) {
            self.generate_responses.try_lock().unwrap().push(result);
        }

        pub fn push_relevance(&self, relevant: bool) {
            self.relevance_responses.try_lock().unwrap().push(relevant);
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn generate_buffer(
            &self,
            _history: &[HistoryEntry],
            _pending_blocks: &[Block],
            _profile: Option<&ProfileContext>,
        ) -> Result<Vec<Block>, LlmError> {
            self.generate_calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut responses = self.generate_responses.lock().await;
            if responses.is_empty() {
                if self.strict {
                    panic!("MockLlmClient: unexpected generate_buffer call");
                }
                return Ok(Vec::new());
            }
            responses.remove(0)
        }

        async fn relevance_check(
            &self,
            _recent_history: &[HistoryEntry],
            _sent_blocks: &[Block],
            _pending_blocks: &[Block],
        ) -> bool {
            self.relevance_calls.fetch_add(1, Ordering::SeqCst);
            if !self.latency.is_zero() {
                tokio::time::sleep(self.latency).await;
            }
            let mut responses = self.relevance_responses.lock().await;
            if responses.is_empty() {
                if self.strict {
                    panic!("MockLlmClient: unexpected relevance_check call");
                }
                return false;
            }
            responses.remove(0)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn raw_block_rejects_empty_text() {
        let raw = RawBlock { text: String::new(), typing_time: 1.0, group: 1 };
        assert!(Block::try_from(raw).is_err());
    }

    #[test]
    fn raw_block_accepts_valid_shape() {
        let raw = RawBlock { text: "hi".into(), typing_time: 1.5, group: 2 };
        let block = Block::try_from(raw).unwrap();
        assert_eq!(block.text, "hi");
        assert_eq!(block.group, 2);
    }

    #[tokio::test]
    async fn disabled_client_fails_generation_and_refuses_relevance() {
        let client = DisabledLlmClient;
        assert!(client.generate_buffer(&[], &[], None).await.is_err());
        assert!(!client.relevance_check(&[], &[], &[]).await);
    }
}
