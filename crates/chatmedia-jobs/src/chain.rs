//! Resolution strategy chain.
//!
//! Turns a descriptor's candidate sources into an ordered list of fetch
//! attempts and runs them until one returns validated bytes. Full-resolution
//! sources come first; thumbnail sources are a degraded last resort whose
//! results carry the `thumbnail` method.

use std::sync::Arc;
use std::time::Duration;

use chatmedia_core::{
    defaults, AllStrategiesExhausted, AttachmentDescriptor, AttemptFailure, CandidateSource,
    FetchError, FetchedPayload, MediaFetcher, SourceKind, THUMBNAIL_METHOD,
};
use chatmedia_fetch::AuthContext;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::throttle::HostThrottle;

pub const METHOD_DIRECT_AUTH: &str = "direct_auth";
pub const METHOD_DIRECT: &str = "direct";
pub const METHOD_DRIVE_API: &str = "drive_api";
pub const METHOD_CHAT_API: &str = "chat_api";

fn env_bool(name: &str, default: bool) -> bool {
    std::env::var(name)
        .map(|v| !matches!(v.trim(), "false" | "0" | "no" | ""))
        .unwrap_or(default)
}

/// Configuration for the resolution chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainConfig {
    /// Try thumbnail sources after every full-resolution source failed.
    pub thumbnail_fallback: bool,
    /// Only fall back to thumbnails for image attachments.
    pub thumbnails_images_only: bool,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            thumbnail_fallback: true,
            thumbnails_images_only: false,
        }
    }
}

impl ChainConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `CHATMEDIA_THUMBNAIL_FALLBACK` | `true` | Try thumbnails last |
    /// | `CHATMEDIA_THUMBNAILS_IMAGES_ONLY` | `false` | Thumbnails only for images |
    pub fn from_env() -> Self {
        let default = Self::default();
        Self {
            thumbnail_fallback: env_bool(
                defaults::ENV_THUMBNAIL_FALLBACK,
                default.thumbnail_fallback,
            ),
            thumbnails_images_only: env_bool(
                defaults::ENV_THUMBNAILS_IMAGES_ONLY,
                default.thumbnails_images_only,
            ),
        }
    }

    pub fn with_thumbnail_fallback(mut self, enabled: bool) -> Self {
        self.thumbnail_fallback = enabled;
        self
    }

    pub fn with_thumbnails_images_only(mut self, images_only: bool) -> Self {
        self.thumbnails_images_only = images_only;
        self
    }
}

/// One planned fetch against one source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Attempt<'a> {
    pub source: &'a CandidateSource,
    pub authenticated: bool,
    pub method: &'static str,
}

/// Bytes obtained by the chain, with the attempt that produced them.
#[derive(Debug, Clone)]
pub struct ResolvedPayload {
    pub payload: FetchedPayload,
    pub method: String,
    pub source: CandidateSource,
}

/// Ordered fallback over a descriptor's candidate sources.
pub struct ResolutionChain {
    fetcher: Arc<dyn MediaFetcher>,
    throttle: Arc<HostThrottle>,
    config: ChainConfig,
}

impl ResolutionChain {
    pub fn new(fetcher: Arc<dyn MediaFetcher>, throttle: Arc<HostThrottle>) -> Self {
        Self {
            fetcher,
            throttle,
            config: ChainConfig::default(),
        }
    }

    /// Chain without request spacing (tests and one-off resolutions).
    pub fn unthrottled(fetcher: Arc<dyn MediaFetcher>) -> Self {
        Self::new(fetcher, Arc::new(HostThrottle::new(Duration::ZERO)))
    }

    pub fn with_config(mut self, config: ChainConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &ChainConfig {
        &self.config
    }

    /// Attempts in the order they will be tried.
    pub fn plan<'a>(&self, descriptor: &'a AttachmentDescriptor) -> Vec<Attempt<'a>> {
        let (thumbnails, full): (Vec<_>, Vec<_>) = descriptor
            .candidate_sources
            .iter()
            .partition(|s| s.kind == SourceKind::ThumbnailUrl);

        let mut attempts: Vec<Attempt<'a>> = full.into_iter().flat_map(full_attempts).collect();

        let thumbnails_allowed = self.config.thumbnail_fallback
            && (!self.config.thumbnails_images_only || descriptor.is_image());
        if thumbnails_allowed {
            attempts.extend(thumbnails.into_iter().flat_map(thumbnail_attempts));
        }
        attempts
    }

    /// Run the plan, stopping at the first attempt that returns validated bytes.
    pub async fn resolve(
        &self,
        descriptor: &AttachmentDescriptor,
        auth: &AuthContext,
    ) -> Result<ResolvedPayload, AllStrategiesExhausted> {
        let mut failures = Vec::new();

        for attempt in self.plan(descriptor) {
            let source = attempt.source;
            let token = if attempt.authenticated {
                match auth.token().await {
                    Some(token) => Some(token),
                    None => {
                        trace!(method = attempt.method, "No token for authenticated attempt");
                        failures.push(failure(&attempt, FetchError::auth_token_unavailable()));
                        continue;
                    }
                }
            } else {
                None
            };

            let host = source
                .host()
                .unwrap_or_else(|| source.kind.as_str().to_string());
            self.throttle.wait(&host).await;

            match self.fetcher.fetch(source, token.as_deref()).await {
                Ok(payload) => {
                    debug!(
                        method = attempt.method,
                        source_kind = %source.kind,
                        host = %host,
                        byte_size = payload.bytes.len(),
                        failed_attempts = failures.len(),
                        "Attachment resolved"
                    );
                    return Ok(ResolvedPayload {
                        payload,
                        method: attempt.method.to_string(),
                        source: source.clone(),
                    });
                }
                Err(e) => {
                    warn!(
                        method = attempt.method,
                        source_kind = %source.kind,
                        host = %host,
                        status_code = e.status,
                        failure_kind = %e.kind,
                        "Fetch attempt failed"
                    );
                    failures.push(failure(&attempt, e));
                }
            }
        }

        Err(AllStrategiesExhausted { attempts: failures })
    }
}

fn full_attempts(source: &CandidateSource) -> Vec<Attempt<'_>> {
    let attempt = |authenticated, method| Attempt {
        source,
        authenticated,
        method,
    };
    match source.kind {
        SourceKind::DriveFileRef => vec![attempt(true, METHOD_DRIVE_API)],
        SourceKind::ChatResourceRef => vec![attempt(true, METHOD_CHAT_API)],
        _ if source.requires_auth => vec![
            attempt(true, METHOD_DIRECT_AUTH),
            attempt(false, METHOD_DIRECT),
        ],
        _ => vec![attempt(false, METHOD_DIRECT)],
    }
}

fn thumbnail_attempts(source: &CandidateSource) -> Vec<Attempt<'_>> {
    let auth_modes: &[bool] = if source.requires_auth {
        &[true, false]
    } else {
        &[false]
    };
    auth_modes
        .iter()
        .map(|&authenticated| Attempt {
            source,
            authenticated,
            method: THUMBNAIL_METHOD,
        })
        .collect()
}

fn failure(attempt: &Attempt<'_>, error: FetchError) -> AttemptFailure {
    AttemptFailure {
        method: attempt.method.to_string(),
        source_kind: attempt.source.kind,
        source: attempt.source.uri.clone(),
        // The fetcher drops the token for sources that do not accept one
        authenticated: attempt.authenticated && attempt.source.accepts_token(),
        kind: error.kind,
        status: error.status,
        message: error.message,
    }
}
