//! Fetcher and authentication configuration.
//!
//! Configuration is loaded from environment variables (`CHATMEDIA_*`) with
//! defaults from [`chatmedia_core::defaults`], and can be adjusted with the
//! chainable `with_*` builders.
//!
//! # Example
//!
//! ```rust,no_run
//! use chatmedia_fetch::config::FetchConfig;
//!
//! let config = FetchConfig::from_env().with_max_redirects(3);
//! ```

use std::env;
use std::str::FromStr;
use std::time::Duration;

use chatmedia_core::defaults;
use serde::{Deserialize, Serialize};

/// Read an env var and parse it, falling back to `default` when unset or invalid.
pub(crate) fn env_parse<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_non_empty(name: &str) -> Option<String> {
    env::var(name)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

// =============================================================================
// FETCH
// =============================================================================

/// HTTP behavior of the media fetcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Per-request timeout in seconds, covering the whole body.
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Redirect hops followed before giving up.
    pub max_redirects: usize,
    /// Payloads larger than this fail with `TooLarge`.
    pub max_payload_bytes: u64,
    pub user_agent: String,
    /// Base URL of the Drive API.
    pub drive_api_url: String,
    /// Base URL of the Chat API.
    pub chat_api_url: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            timeout_secs: defaults::FETCH_TIMEOUT_SECS,
            connect_timeout_secs: defaults::FETCH_CONNECT_TIMEOUT_SECS,
            max_redirects: defaults::MAX_REDIRECTS,
            max_payload_bytes: defaults::MAX_PAYLOAD_BYTES,
            user_agent: defaults::USER_AGENT.to_string(),
            drive_api_url: defaults::DRIVE_API_URL.to_string(),
            chat_api_url: defaults::CHAT_API_URL.to_string(),
        }
    }
}

impl FetchConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CHATMEDIA_FETCH_TIMEOUT_SECS` | `60` |
    /// | `CHATMEDIA_MAX_REDIRECTS` | `5` |
    /// | `CHATMEDIA_MAX_PAYLOAD_BYTES` | 512 MiB |
    /// | `CHATMEDIA_DRIVE_API_URL` | `https://www.googleapis.com` |
    /// | `CHATMEDIA_CHAT_API_URL` | `https://chat.googleapis.com` |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            timeout_secs: env_parse(defaults::ENV_FETCH_TIMEOUT_SECS, default.timeout_secs),
            max_redirects: env_parse(defaults::ENV_MAX_REDIRECTS, default.max_redirects),
            max_payload_bytes: env_parse(
                defaults::ENV_MAX_PAYLOAD_BYTES,
                default.max_payload_bytes,
            ),
            drive_api_url: env_non_empty(defaults::ENV_DRIVE_API_URL)
                .unwrap_or(default.drive_api_url),
            chat_api_url: env_non_empty(defaults::ENV_CHAT_API_URL)
                .unwrap_or(default.chat_api_url),
            ..default
        }
    }

    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn with_max_redirects(mut self, max: usize) -> Self {
        self.max_redirects = max;
        self
    }

    pub fn with_max_payload_bytes(mut self, max: u64) -> Self {
        self.max_payload_bytes = max;
        self
    }

    /// Point both API clients at one base URL (used against mock servers).
    pub fn with_api_base(mut self, base: impl Into<String>) -> Self {
        let base = base.into();
        self.drive_api_url = base.clone();
        self.chat_api_url = base;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

// =============================================================================
// AUTH
// =============================================================================

/// Where bearer tokens come from. Both unset means anonymous runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Fixed token, takes precedence over `token_command`.
    #[serde(skip_serializing)]
    pub access_token: Option<String>,
    /// Shell command whose stdout is a bearer token.
    pub token_command: Option<String>,
    /// Lifetime assumed for command tokens.
    pub token_ttl_secs: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            access_token: None,
            token_command: None,
            token_ttl_secs: defaults::TOKEN_TTL_SECS,
        }
    }
}

impl AuthConfig {
    /// Load configuration from environment variables.
    ///
    /// | Variable | Default |
    /// |----------|---------|
    /// | `CHATMEDIA_ACCESS_TOKEN` | unset |
    /// | `CHATMEDIA_TOKEN_COMMAND` | unset |
    /// | `CHATMEDIA_TOKEN_TTL_SECS` | `3300` |
    pub fn from_env() -> Self {
        Self {
            access_token: env_non_empty(defaults::ENV_ACCESS_TOKEN),
            token_command: env_non_empty(defaults::ENV_TOKEN_COMMAND),
            token_ttl_secs: env_parse(defaults::ENV_TOKEN_TTL_SECS, defaults::TOKEN_TTL_SECS),
        }
    }

    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    pub fn with_token_command(mut self, command: impl Into<String>) -> Self {
        self.token_command = Some(command.into());
        self
    }

    /// Whether any token source is configured.
    pub fn is_configured(&self) -> bool {
        self.access_token.is_some() || self.token_command.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fetch_config_defaults() {
        let config = FetchConfig::default();
        assert_eq!(config.timeout_secs, 60);
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.max_payload_bytes, 512 * 1024 * 1024);
        assert_eq!(config.timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_fetch_config_builders() {
        let config = FetchConfig::default()
            .with_timeout_secs(5)
            .with_max_redirects(1)
            .with_max_payload_bytes(10)
            .with_api_base("http://127.0.0.1:9");
        assert_eq!(config.timeout_secs, 5);
        assert_eq!(config.max_redirects, 1);
        assert_eq!(config.max_payload_bytes, 10);
        assert_eq!(config.drive_api_url, "http://127.0.0.1:9");
        assert_eq!(config.chat_api_url, "http://127.0.0.1:9");
    }

    #[test]
    fn test_env_parse_falls_back_on_garbage() {
        assert_eq!(env_parse("CHATMEDIA_TEST_UNSET_VARIABLE", 7u64), 7);
    }

    #[test]
    fn test_auth_config_default_ttl() {
        assert_eq!(AuthConfig::default().token_ttl_secs, defaults::TOKEN_TTL_SECS);
        let config = AuthConfig::default().with_token_command("gcloud auth print-access-token");
        assert_eq!(config.token_ttl_secs, 3300);
    }

    #[test]
    fn test_auth_config_is_configured() {
        assert!(!AuthConfig::default().is_configured());
        assert!(AuthConfig::default().with_access_token("t").is_configured());
        assert!(AuthConfig::default()
            .with_token_command("gcloud auth print-access-token")
            .is_configured());
    }

    #[test]
    fn test_auth_config_never_serializes_token() {
        let config = AuthConfig::default().with_access_token("secret");
        let json = serde_json::to_string(&config).unwrap();
        assert!(!json.contains("secret"));
    }
}
