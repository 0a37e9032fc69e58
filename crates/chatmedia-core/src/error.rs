//! Error types for chatmedia.
//!
//! Two layers of errors exist:
//!
//! - [`Error`] is returned by operations whose failure is meaningful for the
//!   whole run (storage, configuration, authentication).
//! - [`FetchError`], [`AllStrategiesExhausted`] and [`NormalizeError`] describe
//!   per-attachment failures. They are recovered locally and persisted on the
//!   owning record as a failed outcome.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{DownloadStatus, SourceKind};

/// Result type alias using chatmedia's Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for chatmedia operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Record or media storage failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Download outcome moved through an illegal status transition
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidTransition {
        from: DownloadStatus,
        to: DownloadStatus,
    },

    /// HTTP/network request failed
    #[error("Request error: {0}")]
    Request(String),

    /// No access token could be obtained
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),

    /// File I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Request(e.to_string())
    }
}

// =============================================================================
// NORMALIZATION
// =============================================================================

/// Raised by the descriptor normalizer.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum NormalizeError {
    /// The raw object carries no recognizable media reference.
    #[error("Not an attachment: {0}")]
    NotAnAttachment(String),
}

// =============================================================================
// FETCH
// =============================================================================

/// Classification of a single failed fetch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FetchErrorKind {
    /// The request exceeded its timeout.
    Timeout,
    /// The server answered with a non-2xx, non-redirect status.
    HttpStatus,
    /// HTTP 200 whose body is an HTML error or login page.
    DisguisedErrorPage,
    /// The attempt needed a bearer token and none was available.
    AuthTokenUnavailable,
    /// The server answered with an empty body.
    EmptyPayload,
    /// The body exceeded the configured payload cap.
    TooLarge,
    /// The redirect chain exceeded the configured depth.
    TooManyRedirects,
    /// Connection, DNS, TLS or body read failure.
    Network,
    /// No client is configured for this source kind.
    Unsupported,
}

impl FetchErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "Timeout",
            Self::HttpStatus => "HttpStatus",
            Self::DisguisedErrorPage => "DisguisedErrorPage",
            Self::AuthTokenUnavailable => "AuthTokenUnavailable",
            Self::EmptyPayload => "EmptyPayload",
            Self::TooLarge => "TooLarge",
            Self::TooManyRedirects => "TooManyRedirects",
            Self::Network => "Network",
            Self::Unsupported => "Unsupported",
        }
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure of one fetch attempt against one candidate source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchError {
    pub kind: FetchErrorKind,
    /// HTTP status code, set for [`FetchErrorKind::HttpStatus`].
    pub status: Option<u16>,
    pub message: String,
}

impl FetchError {
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Timeout, message)
    }

    pub fn http_status(code: u16) -> Self {
        Self {
            kind: FetchErrorKind::HttpStatus,
            status: Some(code),
            message: format!("server returned HTTP {}", code),
        }
    }

    pub fn disguised_error_page() -> Self {
        Self::new(
            FetchErrorKind::DisguisedErrorPage,
            "HTTP 200 response body is an HTML page",
        )
    }

    pub fn auth_token_unavailable() -> Self {
        Self::new(
            FetchErrorKind::AuthTokenUnavailable,
            "source requires a bearer token and none is available",
        )
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Network, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FetchErrorKind::Unsupported, message)
    }
}

impl fmt::Display for FetchError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.status {
            Some(code) => write!(f, "{} {}: {}", self.kind, code, self.message),
            None => write!(f, "{}: {}", self.kind, self.message),
        }
    }
}

impl std::error::Error for FetchError {}

// =============================================================================
// RESOLUTION
// =============================================================================

/// Persisted classification of a failed download outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FailureKind {
    NoSourceAvailable,
    Timeout,
    HttpStatus,
    DisguisedErrorPage,
    AuthTokenUnavailable,
    EmptyPayload,
    TooLarge,
    TooManyRedirects,
    Network,
    Unsupported,
    /// The payload was valid but could not be written to the media root.
    Storage,
    AllStrategiesExhausted,
}

impl From<FetchErrorKind> for FailureKind {
    fn from(kind: FetchErrorKind) -> Self {
        match kind {
            FetchErrorKind::Timeout => Self::Timeout,
            FetchErrorKind::HttpStatus => Self::HttpStatus,
            FetchErrorKind::DisguisedErrorPage => Self::DisguisedErrorPage,
            FetchErrorKind::AuthTokenUnavailable => Self::AuthTokenUnavailable,
            FetchErrorKind::EmptyPayload => Self::EmptyPayload,
            FetchErrorKind::TooLarge => Self::TooLarge,
            FetchErrorKind::TooManyRedirects => Self::TooManyRedirects,
            FetchErrorKind::Network => Self::Network,
            FetchErrorKind::Unsupported => Self::Unsupported,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::NoSourceAvailable => "NoSourceAvailable",
            Self::Storage => "Storage",
            Self::AllStrategiesExhausted => "AllStrategiesExhausted",
            Self::Timeout => FetchErrorKind::Timeout.as_str(),
            Self::HttpStatus => FetchErrorKind::HttpStatus.as_str(),
            Self::DisguisedErrorPage => FetchErrorKind::DisguisedErrorPage.as_str(),
            Self::AuthTokenUnavailable => FetchErrorKind::AuthTokenUnavailable.as_str(),
            Self::EmptyPayload => FetchErrorKind::EmptyPayload.as_str(),
            Self::TooLarge => FetchErrorKind::TooLarge.as_str(),
            Self::TooManyRedirects => FetchErrorKind::TooManyRedirects.as_str(),
            Self::Network => FetchErrorKind::Network.as_str(),
            Self::Unsupported => FetchErrorKind::Unsupported.as_str(),
        };
        f.write_str(s)
    }
}

/// One failed sub-attempt, kept for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttemptFailure {
    /// Strategy method that made the attempt.
    pub method: String,
    pub source_kind: SourceKind,
    /// URI or resource reference that was tried.
    pub source: String,
    pub authenticated: bool,
    pub kind: FetchErrorKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub message: String,
}

impl fmt::Display for AttemptFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.method, self.source, self.kind)?;
        if let Some(code) = self.status {
            write!(f, " {}", code)?;
        }
        Ok(())
    }
}

/// Every candidate source and sub-attempt failed.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AllStrategiesExhausted {
    pub attempts: Vec<AttemptFailure>,
}

impl AllStrategiesExhausted {
    /// The kind recorded on the outcome.
    ///
    /// When every attempt failed the same way, that kind is more useful to an
    /// operator than the generic exhaustion marker.
    pub fn primary_kind(&self) -> FailureKind {
        let mut kinds = self.attempts.iter().map(|a| a.kind);
        match kinds.next() {
            Some(first) if kinds.all(|k| k == first) => first.into(),
            Some(_) => FailureKind::AllStrategiesExhausted,
            None => FailureKind::NoSourceAvailable,
        }
    }
}

impl fmt::Display for AllStrategiesExhausted {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "all {} attempt(s) failed", self.attempts.len())?;
        for (i, attempt) in self.attempts.iter().enumerate() {
            let sep = if i == 0 { ": " } else { "; " };
            write!(f, "{}{}", sep, attempt)?;
        }
        Ok(())
    }
}

impl std::error::Error for AllStrategiesExhausted {}
