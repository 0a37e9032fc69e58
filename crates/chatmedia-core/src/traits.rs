//! Core traits for chatmedia collaborators.
//!
//! These traits define the seams between the pipeline and the outside world:
//! authentication, network retrieval, media storage and record persistence.
//! Concrete implementations live in `chatmedia-fetch` and `chatmedia-store`.

use std::path::Path;

use async_trait::async_trait;

use crate::error::{FetchError, Result};
use crate::models::{AccessToken, CandidateSource, ChatRecord, FetchedPayload, StoredFile};

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// Source of bearer tokens.
#[async_trait]
pub trait TokenProvider: Send + Sync {
    /// Obtain a fresh access token.
    async fn access_token(&self) -> Result<AccessToken>;

    /// Short name for logs.
    fn name(&self) -> &str;
}

// =============================================================================
// RETRIEVAL
// =============================================================================

/// Retrieves and validates the bytes behind one candidate source.
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    /// Fetch `source`, sending `token` only if the source requires auth.
    ///
    /// A returned payload is non-empty and is not a disguised error page.
    async fn fetch(
        &self,
        source: &CandidateSource,
        token: Option<&str>,
    ) -> std::result::Result<FetchedPayload, FetchError>;
}

/// Typed client for API-mediated downloads.
#[async_trait]
pub trait MediaApiClient: Send + Sync {
    /// Download a Drive file's content by file id.
    async fn download_drive_file(
        &self,
        file_id: &str,
        token: Option<&str>,
    ) -> std::result::Result<FetchedPayload, FetchError>;

    /// Download chat message media by attachment resource name.
    async fn download_chat_media(
        &self,
        resource_name: &str,
        token: Option<&str>,
    ) -> std::result::Result<FetchedPayload, FetchError>;
}

// =============================================================================
// STORAGE
// =============================================================================

/// Directory that receives downloaded media files.
#[async_trait]
pub trait MediaStorage: Send + Sync {
    /// Write `data` under `file_name`, never overwriting an existing file.
    ///
    /// When the name is taken a numeric suffix is added before the extension.
    async fn write_unique(&self, file_name: &str, data: &[u8]) -> Result<StoredFile>;

    /// Delete a previously written file. Missing files are not an error.
    async fn remove(&self, path: &Path) -> Result<()>;

    /// Root directory of the media store.
    fn root(&self) -> &Path;
}

/// Persistence collaborator for owning records.
#[async_trait]
pub trait RecordStore: Send + Sync {
    /// Identifiers of every stored record.
    async fn list_record_ids(&self) -> Result<Vec<String>>;

    /// Load one record.
    async fn load(&self, id: &str) -> Result<ChatRecord>;

    /// Persist a whole record under `id`, the key it was loaded from,
    /// replacing the stored copy. The record's own `id` field is not a key.
    async fn save(&self, id: &str, record: &ChatRecord) -> Result<()>;
}
