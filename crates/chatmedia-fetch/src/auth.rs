//! Token providers and the per-run authentication context.
//!
//! A run builds one [`AuthContext`] and shares it read-only with every fetch
//! attempt. The context caches the provider's token and refreshes it when it
//! is about to expire.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chatmedia_core::{defaults, AccessToken, Error, Result, TokenProvider};
use chrono::Utc;
use tokio::process::Command;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

use crate::config::AuthConfig;

// =============================================================================
// PROVIDERS
// =============================================================================

/// A fixed token that never expires.
pub struct StaticTokenProvider {
    token: String,
}

impl StaticTokenProvider {
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }
}

#[async_trait]
impl TokenProvider for StaticTokenProvider {
    async fn access_token(&self) -> Result<AccessToken> {
        if self.token.is_empty() {
            return Err(Error::Unauthorized("static token is empty".to_string()));
        }
        Ok(AccessToken::new(self.token.clone(), None))
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Runs a shell command and uses the first line of its stdout as the token.
///
/// Works with `gcloud auth print-access-token` and similar helpers.
pub struct CommandTokenProvider {
    command: String,
    ttl_secs: u64,
}

impl CommandTokenProvider {
    pub fn new(command: impl Into<String>, ttl_secs: u64) -> Self {
        Self {
            command: command.into(),
            ttl_secs,
        }
    }

    fn shell(&self) -> Command {
        #[cfg(windows)]
        {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(&self.command);
            cmd
        }
        #[cfg(not(windows))]
        {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(&self.command);
            cmd
        }
    }
}

#[async_trait]
impl TokenProvider for CommandTokenProvider {
    async fn access_token(&self) -> Result<AccessToken> {
        let output = self
            .shell()
            .output()
            .await
            .map_err(|e| Error::Unauthorized(format!("token command failed to start: {}", e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Unauthorized(format!(
                "token command exited with {}: {}",
                output.status,
                stderr.trim()
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        let token = stdout.lines().next().map(str::trim).unwrap_or_default();
        if token.is_empty() {
            return Err(Error::Unauthorized(
                "token command printed no token".to_string(),
            ));
        }

        let expires_at = chrono::Duration::from_std(Duration::from_secs(self.ttl_secs))
            .ok()
            .and_then(|ttl| Utc::now().checked_add_signed(ttl));
        Ok(AccessToken::new(token, expires_at))
    }

    fn name(&self) -> &str {
        "command"
    }
}

/// Build the configured token provider, if any.
///
/// A static token takes precedence over a token command.
pub fn provider_from_config(config: &AuthConfig) -> Option<Arc<dyn TokenProvider>> {
    if let Some(token) = &config.access_token {
        return Some(Arc::new(StaticTokenProvider::new(token.clone())));
    }
    config.token_command.as_ref().map(|command| {
        Arc::new(CommandTokenProvider::new(command.clone(), config.token_ttl_secs))
            as Arc<dyn TokenProvider>
    })
}

// =============================================================================
// CONTEXT
// =============================================================================

/// Per-run token cache shared by all fetch attempts.
pub struct AuthContext {
    provider: Option<Arc<dyn TokenProvider>>,
    cached: RwLock<Option<AccessToken>>,
    refresh_margin: chrono::Duration,
}

impl AuthContext {
    /// A context that never has a token.
    pub fn anonymous() -> Self {
        Self {
            provider: None,
            cached: RwLock::new(None),
            refresh_margin: chrono::Duration::seconds(defaults::TOKEN_REFRESH_MARGIN_SECS),
        }
    }

    pub fn new(provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            provider: Some(provider),
            ..Self::anonymous()
        }
    }

    pub fn from_config(config: &AuthConfig) -> Self {
        match provider_from_config(config) {
            Some(provider) => Self::new(provider),
            None => Self::anonymous(),
        }
    }

    pub fn with_refresh_margin(mut self, margin: chrono::Duration) -> Self {
        self.refresh_margin = margin;
        self
    }

    pub fn is_anonymous(&self) -> bool {
        self.provider.is_none()
    }

    /// Obtain the first token of the run. Failure here is fatal to the run.
    pub async fn prime(&self) -> Result<()> {
        let Some(provider) = &self.provider else {
            info!("No token provider configured, running anonymously");
            return Ok(());
        };
        let token = provider.access_token().await?;
        info!(
            provider = provider.name(),
            expires_at = ?token.expires_at,
            "Access token obtained"
        );
        *self.cached.write().await = Some(token);
        Ok(())
    }

    /// Current bearer token, refreshed when it is about to expire.
    ///
    /// Returns `None` for anonymous runs and when a refresh fails.
    pub async fn token(&self) -> Option<String> {
        let provider = self.provider.as_ref()?;

        if let Some(token) = self.fresh(&*self.cached.read().await) {
            return Some(token);
        }

        let mut cached = self.cached.write().await;
        // Another attempt may have refreshed while we waited for the lock
        if let Some(token) = self.fresh(&cached) {
            return Some(token);
        }
        match provider.access_token().await {
            Ok(token) => {
                debug!(provider = provider.name(), "Access token refreshed");
                let value = token.token.clone();
                *cached = Some(token);
                Some(value)
            }
            Err(e) => {
                warn!(provider = provider.name(), error = %e, "Access token refresh failed");
                None
            }
        }
    }

    fn fresh(&self, cached: &Option<AccessToken>) -> Option<String> {
        cached
            .as_ref()
            .filter(|t| !t.expires_within(Utc::now(), self.refresh_margin))
            .map(|t| t.token.clone())
    }
}

impl std::fmt::Debug for AuthContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthContext")
            .field("provider", &self.provider.as_ref().map(|p| p.name()))
            .finish_non_exhaustive()
    }
}
