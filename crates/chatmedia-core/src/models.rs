//! Core data models for chatmedia.
//!
//! Owning records (chats holding messages holding attachments) come from the
//! ingestion side in upstream shape. Every attachment entry keeps its raw
//! upstream fields untouched and carries one [`DownloadOutcome`] next to them.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::error::{AllStrategiesExhausted, AttemptFailure, Error, FailureKind};
use crate::normalize::coerce_attachment_list;

/// Key under which the download outcome is embedded in a raw attachment object.
pub const DOWNLOAD_FIELD: &str = "download";

/// Method recorded for results obtained from a thumbnail source.
pub const THUMBNAIL_METHOD: &str = "thumbnail";

// =============================================================================
// DESCRIPTOR
// =============================================================================

/// Kind of candidate source an attachment can be fetched from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SourceKind {
    /// Plain URL to the full-resolution media.
    DirectUrl,
    /// URL to a reduced-quality preview.
    ThumbnailUrl,
    /// Drive file identifier, downloaded through the Drive API.
    DriveFileRef,
    /// Chat attachment resource name, downloaded through the Chat media API.
    ChatResourceRef,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectUrl => "direct-url",
            Self::ThumbnailUrl => "thumbnail-url",
            Self::DriveFileRef => "drive-file-ref",
            Self::ChatResourceRef => "chat-resource-ref",
        }
    }

    /// True for kinds fetched by plain HTTP GET.
    pub fn is_url(&self) -> bool {
        matches!(self, Self::DirectUrl | Self::ThumbnailUrl)
    }

    /// True for kinds delegated to a typed API client.
    pub fn is_api_mediated(&self) -> bool {
        matches!(self, Self::DriveFileRef | Self::ChatResourceRef)
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SourceKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "direct-url" => Ok(Self::DirectUrl),
            "thumbnail-url" => Ok(Self::ThumbnailUrl),
            "drive-file-ref" => Ok(Self::DriveFileRef),
            "chat-resource-ref" => Ok(Self::ChatResourceRef),
            other => Err(Error::InvalidInput(format!("unknown source kind: {}", other))),
        }
    }
}

/// One place an attachment's bytes can be obtained from.
///
/// API-mediated kinds always require auth, whatever the input says.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "CandidateSourceFields")]
pub struct CandidateSource {
    pub kind: SourceKind,
    /// URL for URL kinds, file id or resource name for API-mediated kinds.
    pub uri: String,
    pub requires_auth: bool,
}

/// Wire shape of [`CandidateSource`] before the auth rule is applied.
#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct CandidateSourceFields {
    kind: SourceKind,
    #[serde(alias = "resourceRef")]
    uri: String,
    #[serde(default)]
    requires_auth: bool,
}

impl From<CandidateSourceFields> for CandidateSource {
    fn from(fields: CandidateSourceFields) -> Self {
        Self {
            kind: fields.kind,
            uri: fields.uri,
            requires_auth: fields.requires_auth || fields.kind.is_api_mediated(),
        }
    }
}

impl CandidateSource {
    /// Whether a bearer token may be sent for this source.
    pub fn accepts_token(&self) -> bool {
        self.requires_auth || self.kind.is_api_mediated()
    }

    pub fn direct_url(uri: impl Into<String>, requires_auth: bool) -> Self {
        Self {
            kind: SourceKind::DirectUrl,
            uri: uri.into(),
            requires_auth,
        }
    }

    pub fn thumbnail_url(uri: impl Into<String>, requires_auth: bool) -> Self {
        Self {
            kind: SourceKind::ThumbnailUrl,
            uri: uri.into(),
            requires_auth,
        }
    }

    pub fn drive_file(file_id: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::DriveFileRef,
            uri: file_id.into(),
            requires_auth: true,
        }
    }

    pub fn chat_resource(resource_name: impl Into<String>) -> Self {
        Self {
            kind: SourceKind::ChatResourceRef,
            uri: resource_name.into(),
            requires_auth: true,
        }
    }

    /// Host of a URL source, `None` for resource references and bad URLs.
    pub fn host(&self) -> Option<String> {
        if !self.kind.is_url() {
            return None;
        }
        reqwest::Url::parse(&self.uri)
            .ok()
            .and_then(|u| u.host_str().map(str::to_string))
    }
}

/// Canonical, strategy-agnostic representation of one piece of media.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachmentDescriptor {
    pub id: Option<String>,
    pub display_name: Option<String>,
    pub mime_type: Option<String>,
    /// Filesystem-safe base name including extension.
    pub file_name: String,
    /// Ordered by decreasing preference, full resolution first.
    pub candidate_sources: Vec<CandidateSource>,
}

impl AttachmentDescriptor {
    pub fn is_image(&self) -> bool {
        self.mime_type
            .as_deref()
            .is_some_and(|m| m.to_ascii_lowercase().starts_with("image/"))
    }

    pub fn has_sources(&self) -> bool {
        !self.candidate_sources.is_empty()
    }

    /// Name used in log lines.
    pub fn label(&self) -> &str {
        self.display_name
            .as_deref()
            .or(self.id.as_deref())
            .unwrap_or(&self.file_name)
    }
}

// =============================================================================
// OUTCOME
// =============================================================================

/// Lifecycle of one attachment download.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DownloadStatus {
    #[default]
    Pending,
    Downloading,
    Completed,
    Failed,
}

impl DownloadStatus {
    /// Whether `self -> next` is a legal transition.
    ///
    /// `downloading -> downloading` covers a run that crashed mid-attachment.
    /// `completed -> downloading` is only taken for self-healing or forced runs.
    pub fn can_transition_to(&self, next: DownloadStatus) -> bool {
        use DownloadStatus::*;
        matches!(
            (self, next),
            (Pending, Downloading)
                | (Failed, Downloading)
                | (Completed, Downloading)
                | (Downloading, Downloading)
                | (Downloading, Completed)
                | (Downloading, Failed)
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for DownloadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Downloading => "downloading",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// Why an attachment ended up `failed`. Only the most recent failure is kept.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureReason {
    pub kind: FailureKind,
    pub message: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<AttemptFailure>,
}

impl FailureReason {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            attempts: Vec::new(),
        }
    }

    pub fn no_source_available() -> Self {
        Self::new(
            FailureKind::NoSourceAvailable,
            "attachment has no candidate source",
        )
    }

    pub fn storage(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Storage, message)
    }
}

impl From<AllStrategiesExhausted> for FailureReason {
    fn from(exhausted: AllStrategiesExhausted) -> Self {
        Self {
            kind: exhausted.primary_kind(),
            message: exhausted.to_string(),
            attempts: exhausted.attempts,
        }
    }
}

/// Persisted result for one attachment, embedded in the owning record.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DownloadOutcome {
    pub status: DownloadStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_path: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub byte_size: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default)]
    pub last_attempt_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub failure_reason: Option<FailureReason>,
    /// Number of times a download was started for this attachment.
    #[serde(default)]
    pub attempts: u32,
}

impl DownloadOutcome {
    pub fn pending() -> Self {
        Self::default()
    }

    /// True when the stored media came from a thumbnail source.
    pub fn is_degraded(&self) -> bool {
        self.method.as_deref() == Some(THUMBNAIL_METHOD)
    }
}

/// A successful resolution, ready to be recorded on the outcome.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DownloadResult {
    pub method: String,
    pub local_path: PathBuf,
    pub byte_size: u64,
}

/// Validated bytes returned by a fetch attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPayload {
    pub bytes: Vec<u8>,
    /// `Content-Type` header of the final response, if any.
    pub content_type: Option<String>,
    /// URL of the final response after redirects.
    pub final_url: Option<String>,
}

/// A file written under the media root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredFile {
    pub path: PathBuf,
    pub byte_size: u64,
}

/// Bearer token handed out by the authentication collaborator.
#[derive(Clone, PartialEq, Eq)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Option<DateTime<Utc>>,
}

impl AccessToken {
    pub fn new(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            token: token.into(),
            expires_at,
        }
    }

    /// Whether the token expires within `margin` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, margin: chrono::Duration) -> bool {
        self.expires_at.is_some_and(|at| at - margin <= now)
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessToken")
            .field("token", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

// =============================================================================
// OWNING RECORDS
// =============================================================================

/// One raw upstream attachment plus its download outcome.
///
/// Serialized back as the raw object with the outcome under [`DOWNLOAD_FIELD`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AttachmentEntry {
    pub raw: Value,
    pub download: Option<DownloadOutcome>,
}

impl AttachmentEntry {
    /// Split a raw upstream value into fields and a previously stored outcome.
    ///
    /// Bare URL strings become `{"url": ...}` objects so an outcome can be
    /// embedded next to them.
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(mut map) => {
                let download = map
                    .remove(DOWNLOAD_FIELD)
                    .and_then(|v| serde_json::from_value(v).ok());
                Self {
                    raw: Value::Object(map),
                    download,
                }
            }
            Value::String(url) => {
                let mut map = Map::new();
                map.insert("url".to_string(), Value::String(url));
                Self {
                    raw: Value::Object(map),
                    download: None,
                }
            }
            other => Self {
                raw: other,
                download: None,
            },
        }
    }

    pub fn status(&self) -> Option<DownloadStatus> {
        self.download.as_ref().map(|d| d.status)
    }
}

impl Serialize for AttachmentEntry {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match (&self.raw, &self.download) {
            (Value::Object(map), Some(download)) => {
                let mut map = map.clone();
                let value = serde_json::to_value(download).map_err(S::Error::custom)?;
                map.insert(DOWNLOAD_FIELD.to_string(), value);
                map.serialize(serializer)
            }
            _ => self.raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for AttachmentEntry {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Ok(Self::from_value(value))
    }
}

/// A chat message holding zero or more attachments.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(from = "ChatMessageFields")]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Read from `attachments` and the singular `attachment` field, in that
    /// order; written back as `attachments`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<AttachmentEntry>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Wire shape of [`ChatMessage`] before the attachment fields are merged.
#[derive(Deserialize)]
struct ChatMessageFields {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    attachments: Value,
    #[serde(default)]
    attachment: Value,
    #[serde(flatten)]
    extra: Map<String, Value>,
}

impl From<ChatMessageFields> for ChatMessage {
    fn from(fields: ChatMessageFields) -> Self {
        let attachments = coerce_attachment_list(&fields.attachments)
            .into_iter()
            .chain(coerce_attachment_list(&fields.attachment))
            .map(AttachmentEntry::from_value)
            .collect();
        Self {
            id: fields.id,
            attachments,
            extra: fields.extra,
        }
    }
}

impl ChatMessage {
    /// Stable key for logs: `id`, then upstream `name`, then the position.
    pub fn key(&self, index: usize) -> String {
        self.id
            .clone()
            .or_else(|| {
                self.extra
                    .get("name")
                    .and_then(Value::as_str)
                    .map(str::to_string)
            })
            .unwrap_or_else(|| format!("#{}", index))
    }
}

/// The owning record: unit of persistence for attachment outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChatRecord {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub messages: Vec<ChatMessage>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ChatRecord {
    pub fn attachment_count(&self) -> usize {
        self.messages.iter().map(|m| m.attachments.len()).sum()
    }

    pub fn has_attachments(&self) -> bool {
        self.messages.iter().any(|m| !m.attachments.is_empty())
    }

    /// All outcomes in message order, skipping entries without one.
    pub fn outcomes(&self) -> impl Iterator<Item = &DownloadOutcome> {
        self.messages
            .iter()
            .flat_map(|m| m.attachments.iter())
            .filter_map(|a| a.download.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_reference_always_requires_auth() {
        let drive: CandidateSource =
            serde_json::from_value(json!({"kind": "drive-file-ref", "uri": "file-9"})).unwrap();
        assert!(drive.requires_auth);
        let chat: CandidateSource = serde_json::from_value(json!({
            "kind": "chat-resource-ref",
            "resourceRef": "spaces/S/messages/M/attachments/A",
            "requiresAuth": false
        }))
        .unwrap();
        assert!(chat.requires_auth);
        assert!(chat.accepts_token());

        let url: CandidateSource =
            serde_json::from_value(json!({"kind": "direct-url", "uri": "https://h/a"})).unwrap();
        assert!(!url.requires_auth);
        assert!(!url.accepts_token());
    }

    #[test]
    fn test_source_kind_round_trip_str() {
        for kind in [
            SourceKind::DirectUrl,
            SourceKind::ThumbnailUrl,
            SourceKind::DriveFileRef,
            SourceKind::ChatResourceRef,
        ] {
            assert_eq!(kind.as_str().parse::<SourceKind>().unwrap(), kind);
        }
        assert!("ftp".parse::<SourceKind>().is_err());
    }

    #[test]
    fn test_candidate_source_accepts_resource_ref_alias() {
        let source: CandidateSource = serde_json::from_value(json!({
            "kind": "drive-file-ref",
            "resourceRef": "abc123",
            "requiresAuth": true
        }))
        .unwrap();
        assert_eq!(source, CandidateSource::drive_file("abc123"));
    }

    #[test]
    fn test_candidate_source_host() {
        let source = CandidateSource::direct_url("https://cdn.example.com/a.png", false);
        assert_eq!(source.host().as_deref(), Some("cdn.example.com"));
        assert_eq!(CandidateSource::drive_file("x").host(), None);
    }

    #[test]
    fn test_status_transitions() {
        use DownloadStatus::*;
        assert!(Pending.can_transition_to(Downloading));
        assert!(Failed.can_transition_to(Downloading));
        assert!(Downloading.can_transition_to(Completed));
        assert!(Downloading.can_transition_to(Failed));
        assert!(!Pending.can_transition_to(Completed));
        assert!(!Completed.can_transition_to(Failed));
        assert!(!Failed.can_transition_to(Completed));
    }

    #[test]
    fn test_outcome_serializes_camel_case() {
        let outcome = DownloadOutcome {
            status: DownloadStatus::Completed,
            local_path: Some(PathBuf::from("/media/a.png")),
            byte_size: Some(10),
            method: Some("direct".to_string()),
            ..Default::default()
        };
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["status"], "completed");
        assert_eq!(value["localPath"], "/media/a.png");
        assert_eq!(value["byteSize"], 10);
        assert!(value.get("lastAttemptAt").is_some());
    }

    #[test]
    fn test_outcome_degraded_for_thumbnail() {
        let outcome = DownloadOutcome {
            method: Some(THUMBNAIL_METHOD.to_string()),
            ..Default::default()
        };
        assert!(outcome.is_degraded());
        assert!(!DownloadOutcome::pending().is_degraded());
    }

    #[test]
    fn test_attachment_entry_embeds_download() {
        let mut entry = AttachmentEntry::from_value(json!({"url": "https://x/1"}));
        entry.download = Some(DownloadOutcome::pending());

        let value = serde_json::to_value(&entry).unwrap();
        assert_eq!(value["url"], "https://x/1");
        assert_eq!(value["download"]["status"], "pending");

        let back: AttachmentEntry = serde_json::from_value(value).unwrap();
        assert_eq!(back, entry);
    }

    #[test]
    fn test_attachment_entry_from_bare_url() {
        let entry = AttachmentEntry::from_value(json!("https://x/photo.jpg"));
        assert_eq!(entry.raw, json!({"url": "https://x/photo.jpg"}));
    }

    #[test]
    fn test_message_reads_singular_attachment_field() {
        let message: ChatMessage = serde_json::from_value(json!({
            "name": "spaces/A/messages/B",
            "text": "hi",
            "attachment": {"contentName": "a.png", "downloadUri": "https://x/a"}
        }))
        .unwrap();
        assert_eq!(message.attachments.len(), 1);
        assert_eq!(message.key(0), "spaces/A/messages/B");
        assert_eq!(message.extra["text"], "hi");
    }

    #[test]
    fn test_message_merges_both_attachment_fields() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": "m1",
            "attachments": [{"url": "https://x/plural"}],
            "attachment": {"url": "https://x/singular"}
        }))
        .unwrap();
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].raw["url"], "https://x/plural");
        assert_eq!(message.attachments[1].raw["url"], "https://x/singular");
        assert!(!message.extra.contains_key("attachment"));

        let written = serde_json::to_value(&message).unwrap();
        assert_eq!(written["attachments"].as_array().unwrap().len(), 2);
        assert!(written.get("attachment").is_none());
    }

    #[test]
    fn test_message_reads_numeric_keyed_attachments() {
        let message: ChatMessage = serde_json::from_value(json!({
            "id": "m1",
            "attachments": {
                "1": {"url": "https://x/second"},
                "0": {"url": "https://x/first"}
            }
        }))
        .unwrap();
        assert_eq!(message.attachments.len(), 2);
        assert_eq!(message.attachments[0].raw["url"], "https://x/first");
        assert_eq!(message.attachments[1].raw["url"], "https://x/second");
    }

    #[test]
    fn test_record_counts_attachments() {
        let record: ChatRecord = serde_json::from_value(json!({
            "id": "chat-1",
            "title": "Team",
            "messages": [
                {"id": "m1", "attachments": [{"url": "https://x/1"}, {"url": "https://x/2"}]},
                {"id": "m2", "text": "no media"}
            ]
        }))
        .unwrap();
        assert_eq!(record.attachment_count(), 2);
        assert!(record.has_attachments());
        assert_eq!(record.extra["title"], "Team");

        let value = serde_json::to_value(&record).unwrap();
        assert!(value["messages"][1].get("attachments").is_none());
    }

    #[test]
    fn test_access_token_expiry_margin() {
        let now = Utc::now();
        let token = AccessToken::new("t", Some(now + chrono::Duration::seconds(30)));
        assert!(token.expires_within(now, chrono::Duration::seconds(60)));
        assert!(!token.expires_within(now, chrono::Duration::seconds(10)));
        assert!(!AccessToken::new("t", None).expires_within(now, chrono::Duration::zero()));
    }

    #[test]
    fn test_access_token_debug_redacts() {
        let token = AccessToken::new("secret-value", None);
        assert!(!format!("{:?}", token).contains("secret-value"));
    }
}
