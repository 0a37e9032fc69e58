//! HTTP media fetcher.
//!
//! [`HttpDownloader`] performs a single validated GET: redirects are followed
//! manually so the `Authorization` header survives each hop, the body is
//! streamed under a size cap, and a 200 whose body is an HTML page is
//! rejected as a disguised error page.
//!
//! [`HttpFetcher`] implements [`MediaFetcher`] on top of it, routing URL
//! sources to the downloader and API-mediated sources to a
//! [`MediaApiClient`].

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chatmedia_core::{
    looks_like_error_page, CandidateSource, Error, FetchError, FetchErrorKind, FetchedPayload,
    MediaApiClient, MediaFetcher, Result, SourceKind,
};
use reqwest::header::{CONTENT_TYPE, LOCATION};
use reqwest::{redirect, Client, StatusCode, Url};
use tracing::{debug, trace};

use crate::config::FetchConfig;
use crate::google::GoogleMediaClient;

/// Redirect statuses that are followed with a fresh GET.
const FOLLOWED_REDIRECTS: [StatusCode; 5] = [
    StatusCode::MOVED_PERMANENTLY,
    StatusCode::FOUND,
    StatusCode::SEE_OTHER,
    StatusCode::TEMPORARY_REDIRECT,
    StatusCode::PERMANENT_REDIRECT,
];

/// Reject payloads that cannot be stored as a media file.
pub fn validate_payload(bytes: &[u8]) -> std::result::Result<(), FetchError> {
    if bytes.is_empty() {
        return Err(FetchError::new(
            FetchErrorKind::EmptyPayload,
            "response body is empty",
        ));
    }
    if looks_like_error_page(bytes) {
        return Err(FetchError::disguised_error_page());
    }
    Ok(())
}

fn classify(e: reqwest::Error) -> FetchError {
    if e.is_timeout() {
        FetchError::timeout(e.to_string())
    } else {
        FetchError::network(e.to_string())
    }
}

// =============================================================================
// DOWNLOADER
// =============================================================================

/// Validated HTTP GET with manual redirect handling.
#[derive(Debug, Clone)]
pub struct HttpDownloader {
    client: Client,
    config: FetchConfig,
}

impl HttpDownloader {
    pub fn new(config: FetchConfig) -> Result<Self> {
        let client = Client::builder()
            .redirect(redirect::Policy::none())
            .timeout(config.timeout())
            .connect_timeout(config.connect_timeout())
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Config(format!("Failed to create HTTP client: {}", e)))?;

        debug!(
            timeout_secs = config.timeout_secs,
            max_redirects = config.max_redirects,
            max_payload_bytes = config.max_payload_bytes,
            "HTTP downloader initialized"
        );

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &FetchConfig {
        &self.config
    }

    /// GET `url`, sending `token` as a bearer token on every hop when given.
    pub async fn get(
        &self,
        url: &str,
        token: Option<&str>,
    ) -> std::result::Result<FetchedPayload, FetchError> {
        let mut current = Url::parse(url)
            .map_err(|e| FetchError::network(format!("invalid URL {}: {}", url, e)))?;
        let start = Instant::now();

        for hop in 0..=self.config.max_redirects {
            let mut request = self.client.get(current.clone());
            if let Some(token) = token {
                request = request.bearer_auth(token);
            }
            let response = request.send().await.map_err(classify)?;
            let status = response.status();

            if FOLLOWED_REDIRECTS.contains(&status) {
                let location = response
                    .headers()
                    .get(LOCATION)
                    .and_then(|v| v.to_str().ok())
                    .ok_or_else(|| FetchError::http_status(status.as_u16()))?;
                let next = current.join(location).map_err(|e| {
                    FetchError::network(format!("bad redirect target {:?}: {}", location, e))
                })?;
                trace!(hop, status = status.as_u16(), from = %current, to = %next, "Following redirect");
                current = next;
                continue;
            }

            if !status.is_success() {
                debug!(url = %current, status_code = status.as_u16(), "Non-success response");
                return Err(FetchError::http_status(status.as_u16()));
            }

            let payload = self.read_body(response, current).await?;
            debug!(
                subsystem = "fetch",
                byte_size = payload.bytes.len(),
                duration_ms = start.elapsed().as_millis() as u64,
                authenticated = token.is_some(),
                "Fetched payload"
            );
            return Ok(payload);
        }

        Err(FetchError::new(
            FetchErrorKind::TooManyRedirects,
            format!("more than {} redirects", self.config.max_redirects),
        ))
    }

    async fn read_body(
        &self,
        mut response: reqwest::Response,
        final_url: Url,
    ) -> std::result::Result<FetchedPayload, FetchError> {
        let limit = self.config.max_payload_bytes;
        if let Some(len) = response.content_length() {
            if len > limit {
                return Err(too_large(limit));
            }
        }
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(classify)? {
            if bytes.len() as u64 + chunk.len() as u64 > limit {
                return Err(too_large(limit));
            }
            bytes.extend_from_slice(&chunk);
        }

        validate_payload(&bytes)?;
        Ok(FetchedPayload {
            bytes,
            content_type,
            final_url: Some(final_url.to_string()),
        })
    }
}

fn too_large(limit: u64) -> FetchError {
    FetchError::new(
        FetchErrorKind::TooLarge,
        format!("payload exceeds {} bytes", limit),
    )
}

// =============================================================================
// FETCHER
// =============================================================================

/// [`MediaFetcher`] over HTTP with an optional API client for references.
#[derive(Clone)]
pub struct HttpFetcher {
    downloader: Arc<HttpDownloader>,
    api: Option<Arc<dyn MediaApiClient>>,
}

impl HttpFetcher {
    /// Build a fetcher with the Google media API client for reference sources.
    pub fn new(config: FetchConfig) -> Result<Self> {
        let downloader = Arc::new(HttpDownloader::new(config)?);
        let api: Arc<dyn MediaApiClient> = Arc::new(GoogleMediaClient::new(downloader.clone()));
        Ok(Self {
            downloader,
            api: Some(api),
        })
    }

    /// Fetcher for URL sources only; reference sources fail as `Unsupported`.
    pub fn url_only(config: FetchConfig) -> Result<Self> {
        Ok(Self {
            downloader: Arc::new(HttpDownloader::new(config)?),
            api: None,
        })
    }

    pub fn with_api_client(mut self, api: Arc<dyn MediaApiClient>) -> Self {
        self.api = Some(api);
        self
    }

    fn api(&self, kind: SourceKind) -> std::result::Result<&dyn MediaApiClient, FetchError> {
        self.api
            .as_deref()
            .ok_or_else(|| FetchError::unsupported(format!("no API client for {} sources", kind)))
    }
}

#[async_trait]
impl MediaFetcher for HttpFetcher {
    async fn fetch(
        &self,
        source: &CandidateSource,
        token: Option<&str>,
    ) -> std::result::Result<FetchedPayload, FetchError> {
        let token = token.filter(|_| source.accepts_token());
        match source.kind {
            SourceKind::DirectUrl | SourceKind::ThumbnailUrl => {
                self.downloader.get(&source.uri, token).await
            }
            SourceKind::DriveFileRef => {
                self.api(source.kind)?
                    .download_drive_file(&source.uri, token)
                    .await
            }
            SourceKind::ChatResourceRef => {
                self.api(source.kind)?
                    .download_chat_media(&source.uri, token)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_payload() {
        assert!(validate_payload(b"\x89PNG\r\n").is_ok());
        assert_eq!(
            validate_payload(b"").unwrap_err().kind,
            FetchErrorKind::EmptyPayload
        );
        assert_eq!(
            validate_payload(b"<!DOCTYPE html><html>Sign in</html>")
                .unwrap_err()
                .kind,
            FetchErrorKind::DisguisedErrorPage
        );
    }

    #[tokio::test]
    async fn test_invalid_url_is_network_error() {
        let downloader = HttpDownloader::new(FetchConfig::default()).unwrap();
        let err = downloader.get("not a url", None).await.unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Network);
    }

    #[tokio::test]
    async fn test_url_only_rejects_references() {
        let fetcher = HttpFetcher::url_only(FetchConfig::default()).unwrap();
        let err = fetcher
            .fetch(&CandidateSource::drive_file("abc"), Some("t"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, FetchErrorKind::Unsupported);
    }
}
