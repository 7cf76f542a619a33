//! Error taxonomy for the orchestrator core.
//!
//! Mirrors the reference split between small, call-scoped `thiserror` enums
//! and `anyhow` at the application-glue layer (config loading, transport).

use thiserror::Error;

/// Errors the LLM Client interface can surface from `GenerateBuffer`.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm backend unavailable: {0}")]
    BackendUnavailable(String),

    #[error("llm backend refused: {0}")]
    BackendRefused(String),

    #[error("llm returned a bad response: {0}")]
    BadResponse(String),
}

/// Orchestrator-level error taxonomy (§7).
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("transport dead")]
    TransportDead,

    #[error("llm generation failed: {0}")]
    LlmFailed(#[from] LlmError),
}
