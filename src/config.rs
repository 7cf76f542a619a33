//! Domain-split, environment-driven configuration (§10.3).
//!
//! Each config struct owns a `from_env()` that never panics on a missing
//! value; absence of optional credentials is recorded and surfaced later
//! (e.g. `LlmConfig::validate()` returns a soft diagnostic, not a hard error),
//! matching the reference's "server runs but rejects AI flows" posture.

pub mod helpers {
    use std::str::FromStr;

    /// `env_or`: read `key`, falling back to `default` when unset or empty.
    pub fn env_or(key: &str, default: &str) -> String {
        std::env::var(key)
            .ok()
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| default.to_string())
    }

    /// `env_usize`: parsed numeric env var with a default, never panics.
    pub fn env_usize(key: &str, default: usize) -> usize {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    pub fn env_u64(key: &str, default: u64) -> u64 {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }

    /// `require_env_parsed`: the one place a missing/invalid value really is
    /// fatal (bind port); still returns `Result` rather than panicking.
    pub fn require_env_parsed<T: FromStr>(key: &str, default: T) -> T {
        std::env::var(key)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(default)
    }
}

/// `PORT` / `HOST` (§6 Configuration).
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self {
            host: helpers::env_or("HOST", "0.0.0.0"),
            port: helpers::require_env_parsed("PORT", 3000),
        }
    }
}

/// LLM credentials and retry knobs. Absence of `api_key` disables AI flows
/// but the server still runs (§6, §10.3).
#[derive(Debug, Clone)]
pub struct LlmConfig {
    pub api_key: Option<String>,
    pub model: String,
    pub base_url: String,
    pub max_retries: usize,
    pub retry_base_ms: u64,
}

impl LlmConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("LLM_API_KEY").ok().filter(|v| !v.is_empty()),
            model: helpers::env_or("LLM_MODEL", "gpt-4o-mini"),
            base_url: helpers::env_or("LLM_BASE_URL", "https://api.openai.com/v1"),
            max_retries: helpers::env_usize("LLM_MAX_RETRIES", 3),
            retry_base_ms: helpers::env_u64("LLM_RETRY_BASE_MS", 800),
        }
    }

    /// Soft diagnostic rather than a hard error (§10.3): callers log the
    /// message and proceed with AI features disabled.
    pub fn validate(&self) -> Option<String> {
        if self.api_key.is_none() {
            Some("LLM_API_KEY not set; AI flows will reject with an error".to_string())
        } else {
            None
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// Optional user-profile/chart provider credentials. Absence disables
/// profile context entirely (§4.4, §6).
#[derive(Debug, Clone)]
pub struct ProfileConfig {
    pub api_key: Option<String>,
    pub base_url: Option<String>,
}

impl ProfileConfig {
    pub fn from_env() -> Self {
        Self {
            api_key: std::env::var("PROFILE_API_KEY").ok().filter(|v| !v.is_empty()),
            base_url: std::env::var("PROFILE_BASE_URL").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.api_key.is_some()
    }
}

/// The aggregate of every domain-split config, loaded once at startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub llm: LlmConfig,
    pub profile: ProfileConfig,
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self {
            server: ServerConfig::from_env(),
            llm: LlmConfig::from_env(),
            profile: ProfileConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn server_config_defaults() {
        // SAFETY: tests run single-threaded enough for this narrow check;
        // avoid clobbering a real PORT/HOST if the harness sets one.
        if std::env::var("PORT").is_err() && std::env::var("HOST").is_err() {
            let cfg = ServerConfig::from_env();
            assert_eq!(cfg.port, 3000);
            assert_eq!(cfg.host, "0.0.0.0");
        }
    }

    #[test]
    fn llm_config_disabled_without_key_validates_with_message() {
        let cfg = LlmConfig {
            api_key: None,
            model: "m".into(),
            base_url: "http://x".into(),
            max_retries: 3,
            retry_base_ms: 800,
        };
        assert!(!cfg.is_enabled());
        assert!(cfg.validate().is_some());
    }

    #[test]
    fn llm_config_enabled_with_key_validates_clean() {
        let cfg = LlmConfig {
            api_key: Some("k".into()),
            model: "m".into(),
            base_url: "http://x".into(),
            max_retries: 3,
            retry_base_ms: 800,
        };
        assert!(cfg.is_enabled());
        assert!(cfg.validate().is_none());
    }

    #[test]
    fn env_or_falls_back_on_empty() {
        assert_eq!(helpers::env_or("RELAY_CHAT_TEST_UNSET_VAR", "fallback"), "fallback");
    }
}
