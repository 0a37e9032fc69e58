//! Mock media fetcher for deterministic testing.
//!
//! Responses are scripted per source URI. Every call is logged so tests can
//! assert how many network operations a pipeline performed.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chatmedia_core::{CandidateSource, MediaFetcher};
//! use chatmedia_fetch::mock::MockFetcher;
//!
//! let fetcher = MockFetcher::new().with_bytes("https://h/a.png", b"\x89PNG....".to_vec());
//! let payload = fetcher
//!     .fetch(&CandidateSource::direct_url("https://h/a.png", false), None)
//!     .await?;
//! assert_eq!(fetcher.call_count(), 1);
//! ```

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chatmedia_core::{CandidateSource, FetchError, FetchedPayload, MediaFetcher, SourceKind};

use crate::http::validate_payload;

/// What a scripted URI answers.
#[derive(Debug, Clone)]
enum MockRoute {
    /// Same answer with or without a token.
    Always(Result<Vec<u8>, FetchError>),
    /// Bytes only with a token, 403 without.
    AuthenticatedOnly(Vec<u8>),
    /// Bytes only without a token, 403 with one.
    AnonymousOnly(Vec<u8>),
}

/// One recorded fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MockCall {
    pub uri: String,
    pub kind: SourceKind,
    pub authenticated: bool,
}

/// Scripted [`MediaFetcher`]. Unknown URIs answer HTTP 404.
#[derive(Debug, Clone, Default)]
pub struct MockFetcher {
    routes: Arc<HashMap<String, MockRoute>>,
    call_log: Arc<Mutex<Vec<MockCall>>>,
}

impl MockFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    fn route(mut self, uri: impl Into<String>, route: MockRoute) -> Self {
        Arc::make_mut(&mut self.routes).insert(uri.into(), route);
        self
    }

    /// Answer `bytes` regardless of authentication.
    pub fn with_bytes(self, uri: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.route(uri, MockRoute::Always(Ok(bytes.into())))
    }

    /// Answer `error` regardless of authentication.
    pub fn with_error(self, uri: impl Into<String>, error: FetchError) -> Self {
        self.route(uri, MockRoute::Always(Err(error)))
    }

    pub fn with_authenticated_only(self, uri: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.route(uri, MockRoute::AuthenticatedOnly(bytes.into()))
    }

    pub fn with_anonymous_only(self, uri: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        self.route(uri, MockRoute::AnonymousOnly(bytes.into()))
    }

    /// All calls in order.
    pub fn calls(&self) -> Vec<MockCall> {
        self.log().clone()
    }

    pub fn call_count(&self) -> usize {
        self.log().len()
    }

    pub fn calls_for(&self, uri: &str) -> usize {
        self.log().iter().filter(|c| c.uri == uri).count()
    }

    pub fn clear_calls(&self) {
        self.log().clear();
    }

    fn log(&self) -> std::sync::MutexGuard<'_, Vec<MockCall>> {
        self.call_log.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl MediaFetcher for MockFetcher {
    async fn fetch(
        &self,
        source: &CandidateSource,
        token: Option<&str>,
    ) -> Result<FetchedPayload, FetchError> {
        let authenticated = token.is_some() && source.accepts_token();
        self.log().push(MockCall {
            uri: source.uri.clone(),
            kind: source.kind,
            authenticated,
        });

        let bytes = match self.routes.get(&source.uri) {
            None => return Err(FetchError::http_status(404)),
            Some(MockRoute::Always(result)) => result.clone()?,
            Some(MockRoute::AuthenticatedOnly(bytes)) if authenticated => bytes.clone(),
            Some(MockRoute::AnonymousOnly(bytes)) if !authenticated => bytes.clone(),
            Some(_) => return Err(FetchError::http_status(403)),
        };

        validate_payload(&bytes)?;
        Ok(FetchedPayload {
            bytes,
            content_type: None,
            final_url: Some(source.uri.clone()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatmedia_core::FetchErrorKind;

    fn url(uri: &str, auth: bool) -> CandidateSource {
        CandidateSource::direct_url(uri, auth)
    }

    #[tokio::test]
    async fn test_scripted_bytes_and_call_log() {
        let fetcher = MockFetcher::new().with_bytes("https://h/a", b"abc".to_vec());
        let payload = fetcher.fetch(&url("https://h/a", true), Some("t")).await.unwrap();
        assert_eq!(payload.bytes, b"abc");
        assert_eq!(
            fetcher.calls(),
            vec![MockCall {
                uri: "https://h/a".to_string(),
                kind: SourceKind::DirectUrl,
                authenticated: true,
            }]
        );
    }

    #[tokio::test]
    async fn test_unknown_uri_is_404() {
        let fetcher = MockFetcher::new();
        let err = fetcher.fetch(&url("https://h/x", false), None).await.unwrap_err();
        assert_eq!(err.status, Some(404));
        assert_eq!(fetcher.call_count(), 1);
    }

    #[tokio::test]
    async fn test_token_ignored_when_source_needs_no_auth() {
        let fetcher = MockFetcher::new().with_authenticated_only("https://h/a", b"abc".to_vec());
        let err = fetcher
            .fetch(&url("https://h/a", false), Some("t"))
            .await
            .unwrap_err();
        assert_eq!(err.status, Some(403));
        assert!(!fetcher.calls()[0].authenticated);
    }

    #[tokio::test]
    async fn test_anonymous_only_rejects_token() {
        let fetcher = MockFetcher::new().with_anonymous_only("https://h/a", b"abc".to_vec());
        assert!(fetcher.fetch(&url("https://h/a", true), Some("t")).await.is_err());
        assert!(fetcher.fetch(&url("https://h/a", true), None).await.is_ok());
        assert_eq!(fetcher.calls_for("https://h/a"), 2);
    }

    #[tokio::test]
    async fn test_html_body_is_disguised_error() {
        let fetcher = MockFetcher::new().with_bytes("https://h/a", b"<html>login</html>".to_vec());
        let err = fetcher.fetch(&url("https://h/a", false), None).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::DisguisedErrorPage);
    }
}
