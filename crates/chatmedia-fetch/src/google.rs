//! Google Drive and Google Chat media download client.

use std::sync::Arc;

use async_trait::async_trait;
use chatmedia_core::{FetchError, FetchedPayload, MediaApiClient};
use reqwest::Url;
use tracing::trace;

use crate::http::HttpDownloader;

/// Downloads Drive files and Chat attachment media through their REST APIs.
///
/// - Drive: `GET {drive}/drive/v3/files/{fileId}?alt=media`
/// - Chat: `GET {chat}/v1/media/{resourceName}?alt=media`
#[derive(Debug, Clone)]
pub struct GoogleMediaClient {
    downloader: Arc<HttpDownloader>,
    drive_api_url: String,
    chat_api_url: String,
}

impl GoogleMediaClient {
    /// Create a client using the API base URLs from the downloader's config.
    pub fn new(downloader: Arc<HttpDownloader>) -> Self {
        let config = downloader.config();
        Self {
            drive_api_url: config.drive_api_url.clone(),
            chat_api_url: config.chat_api_url.clone(),
            downloader,
        }
    }

    pub fn drive_file_url(&self, file_id: &str) -> Result<Url, FetchError> {
        let mut url = media_url(&self.drive_api_url, &["drive", "v3", "files", file_id])?;
        url.query_pairs_mut()
            .append_pair("alt", "media")
            .append_pair("supportsAllDrives", "true");
        Ok(url)
    }

    pub fn chat_media_url(&self, resource_name: &str) -> Result<Url, FetchError> {
        let mut segments = vec!["v1", "media"];
        segments.extend(resource_name.split('/').filter(|s| !s.is_empty()));
        let mut url = media_url(&self.chat_api_url, &segments)?;
        url.query_pairs_mut().append_pair("alt", "media");
        Ok(url)
    }
}

/// Append percent-encoded path segments to an API base URL.
fn media_url(base: &str, segments: &[&str]) -> Result<Url, FetchError> {
    let mut url = Url::parse(base)
        .map_err(|e| FetchError::unsupported(format!("invalid API base URL {}: {}", base, e)))?;
    url.path_segments_mut()
        .map_err(|_| FetchError::unsupported(format!("API base URL {} cannot take a path", base)))?
        .pop_if_empty()
        .extend(segments);
    Ok(url)
}

#[async_trait]
impl MediaApiClient for GoogleMediaClient {
    async fn download_drive_file(
        &self,
        file_id: &str,
        token: Option<&str>,
    ) -> Result<FetchedPayload, FetchError> {
        let url = self.drive_file_url(file_id)?;
        trace!(file_id, "Downloading Drive file");
        self.downloader.get(url.as_str(), token).await
    }

    async fn download_chat_media(
        &self,
        resource_name: &str,
        token: Option<&str>,
    ) -> Result<FetchedPayload, FetchError> {
        let url = self.chat_media_url(resource_name)?;
        trace!(resource_name, "Downloading Chat media");
        self.downloader.get(url.as_str(), token).await
    }
}
