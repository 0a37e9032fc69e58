//! Descriptor normalizer.
//!
//! Turns heterogeneous upstream attachment shapes into one canonical
//! [`AttachmentDescriptor`]. Runs once at the system boundary; nothing past
//! this module looks at raw upstream fields.

use serde_json::{Map, Value};
use tracing::trace;

use crate::error::NormalizeError;
use crate::file_safety::{is_valid_mime_type, safe_file_name};
use crate::models::{AttachmentDescriptor, CandidateSource, SourceKind};

const ID_FIELDS: &[&str] = &["id", "attachmentId", "name"];
const NAME_FIELDS: &[&str] = &["contentName", "displayName", "filename", "fileName", "title"];
const MIME_FIELDS: &[&str] = &["contentType", "mimeType", "mime_type"];
const DIRECT_FIELDS: &[&str] = &["downloadUri", "downloadUrl", "url", "uri", "mediaUrl"];
const THUMBNAIL_FIELDS: &[&str] = &["thumbnailUri", "thumbnailUrl", "thumbnail"];

/// Coerce an attachment field into an ordered list of raw entries.
///
/// Accepts an array, a single object or string, or an object whose keys are
/// all numeric (`{"0": ..., "1": ...}`), which is ordered by key.
pub fn coerce_attachment_list(value: &Value) -> Vec<Value> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.clone(),
        Value::Object(map) if is_numeric_keyed(map) => {
            let mut indexed: Vec<(usize, &Value)> = map
                .iter()
                .filter_map(|(k, v)| k.parse::<usize>().ok().map(|i| (i, v)))
                .collect();
            indexed.sort_by_key(|(i, _)| *i);
            indexed.into_iter().map(|(_, v)| v.clone()).collect()
        }
        other => vec![other.clone()],
    }
}

fn is_numeric_keyed(map: &Map<String, Value>) -> bool {
    !map.is_empty() && map.keys().all(|k| k.parse::<usize>().is_ok())
}

/// Normalize any raw attachment value.
///
/// Objects go through [`normalize_object`]; a bare `http(s)` string becomes
/// a single direct-url source. Anything else is [`NormalizeError::NotAnAttachment`].
pub fn normalize(raw: &Value) -> Result<AttachmentDescriptor, NormalizeError> {
    match raw {
        Value::Object(map) => normalize_object(map),
        Value::String(s) if is_http_url(s) => {
            let mut map = Map::new();
            map.insert("url".to_string(), Value::String(s.clone()));
            normalize_object(&map)
        }
        Value::String(_) => Err(NormalizeError::NotAnAttachment(
            "string is not an http(s) URL".to_string(),
        )),
        other => Err(NormalizeError::NotAnAttachment(format!(
            "unexpected {} value",
            json_type(other)
        ))),
    }
}

/// Normalize a raw attachment object.
///
/// A descriptor with zero candidate sources is a valid result; the caller
/// records it as `NoSourceAvailable`. Only objects without any recognizable
/// media field are rejected.
pub fn normalize_object(map: &Map<String, Value>) -> Result<AttachmentDescriptor, NormalizeError> {
    if !has_media_fields(map) {
        return Err(NormalizeError::NotAnAttachment(
            "object has no recognizable media fields".to_string(),
        ));
    }

    let id = first_str(map, ID_FIELDS);
    let display_name = first_str(map, NAME_FIELDS).filter(|n| !n.trim().is_empty());
    let mime_type = first_str(map, MIME_FIELDS).filter(|m| is_valid_mime_type(m));
    let explicit_auth = map.get("requiresAuth").and_then(Value::as_bool);

    let mut sources: Vec<CandidateSource> = Vec::new();
    let mut push = |source: CandidateSource| {
        if !sources.contains(&source) {
            sources.push(source);
        }
    };

    if let Some(Value::Array(items)) = map.get("candidateSources") {
        for item in items {
            match serde_json::from_value::<CandidateSource>(item.clone()) {
                Ok(source) if !source.uri.is_empty() => push(source),
                _ => trace!(?item, "normalize: skipping malformed candidate source"),
            }
        }
    }

    for field in DIRECT_FIELDS {
        if let Some(url) = map.get(*field).and_then(Value::as_str) {
            if is_http_url(url) {
                push(CandidateSource::direct_url(url, explicit_auth.unwrap_or(true)));
            }
        }
    }

    if let Some(file_id) = nested_str(map, "driveDataRef", "driveFileId")
        .or_else(|| map.get("driveFileId").and_then(Value::as_str))
    {
        push(CandidateSource::drive_file(file_id));
    }

    if let Some(resource) = nested_str(map, "attachmentDataRef", "resourceName")
        .or_else(|| map.get("resourceName").and_then(Value::as_str))
    {
        push(CandidateSource::chat_resource(resource));
    }

    for field in THUMBNAIL_FIELDS {
        if let Some(url) = map.get(*field).and_then(Value::as_str) {
            if is_http_url(url) {
                push(CandidateSource::thumbnail_url(url, false));
            }
        }
    }

    let file_name = safe_file_name(display_name.as_deref(), id.as_deref(), mime_type.as_deref());

    Ok(AttachmentDescriptor {
        id,
        display_name,
        mime_type,
        file_name,
        candidate_sources: order_sources(sources),
    })
}

/// Keep upstream order but move thumbnails behind every full-resolution source.
fn order_sources(sources: Vec<CandidateSource>) -> Vec<CandidateSource> {
    let (thumbnails, full): (Vec<_>, Vec<_>) = sources
        .into_iter()
        .partition(|s| s.kind == SourceKind::ThumbnailUrl);
    full.into_iter().chain(thumbnails).collect()
}

fn has_media_fields(map: &Map<String, Value>) -> bool {
    let flat = ID_FIELDS
        .iter()
        .chain(NAME_FIELDS)
        .chain(MIME_FIELDS)
        .chain(DIRECT_FIELDS)
        .chain(THUMBNAIL_FIELDS)
        .chain(&[
            "candidateSources",
            "driveDataRef",
            "driveFileId",
            "attachmentDataRef",
            "resourceName",
        ]);
    flat.into_iter().any(|k| map.contains_key(*k))
}

fn first_str(map: &Map<String, Value>, fields: &[&str]) -> Option<String> {
    fields
        .iter()
        .find_map(|f| map.get(*f).and_then(Value::as_str))
        .map(str::to_string)
}

fn nested_str<'a>(map: &'a Map<String, Value>, outer: &str, inner: &str) -> Option<&'a str> {
    map.get(outer)
        .and_then(Value::as_object)
        .and_then(|o| o.get(inner))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn is_http_url(s: &str) -> bool {
    let lower = s.trim_start().to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce_array() {
        let list = coerce_attachment_list(&json!([{"url": "a"}, {"url": "b"}]));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_coerce_single_object() {
        let list = coerce_attachment_list(&json!({"url": "a"}));
        assert_eq!(list, vec![json!({"url": "a"})]);
    }

    #[test]
    fn test_coerce_numeric_keyed_object_in_order() {
        let list = coerce_attachment_list(&json!({
            "10": {"url": "third"},
            "2": {"url": "second"},
            "0": {"url": "first"}
        }));
        let urls: Vec<_> = list.iter().map(|v| v["url"].as_str().unwrap()).collect();
        assert_eq!(urls, vec!["first", "second", "third"]);
    }

    #[test]
    fn test_coerce_null_and_empty() {
        assert!(coerce_attachment_list(&Value::Null).is_empty());
        assert!(coerce_attachment_list(&json!([])).is_empty());
        assert_eq!(coerce_attachment_list(&json!({})).len(), 1);
    }

    #[test]
    fn test_normalize_google_chat_shape() {
        let descriptor = normalize(&json!({
            "name": "spaces/AAA/messages/BBB/attachments/CCC",
            "contentName": "diagram.png",
            "contentType": "image/png",
            "thumbnailUri": "https://chat.example.com/thumb/CCC",
            "downloadUri": "https://chat.example.com/download/CCC",
            "attachmentDataRef": {"resourceName": "spaces/AAA/attachments/CCC"},
            "source": "UPLOADED_CONTENT"
        }))
        .unwrap();

        assert_eq!(descriptor.display_name.as_deref(), Some("diagram.png"));
        assert_eq!(descriptor.mime_type.as_deref(), Some("image/png"));
        assert_eq!(descriptor.file_name, "diagram.png");
        let kinds: Vec<_> = descriptor.candidate_sources.iter().map(|s| s.kind).collect();
        assert_eq!(
            kinds,
            vec![
                SourceKind::DirectUrl,
                SourceKind::ChatResourceRef,
                SourceKind::ThumbnailUrl
            ]
        );
        assert!(descriptor.candidate_sources[0].requires_auth);
        assert!(!descriptor.candidate_sources[2].requires_auth);
    }

    #[test]
    fn test_normalize_drive_shape() {
        let descriptor = normalize(&json!({
            "contentName": "Budget",
            "contentType": "application/vnd.ms-excel",
            "driveDataRef": {"driveFileId": "1AbC"}
        }))
        .unwrap();
        assert_eq!(
            descriptor.candidate_sources,
            vec![CandidateSource::drive_file("1AbC")]
        );
        assert_eq!(descriptor.file_name, "Budget.xls");
    }

    #[test]
    fn test_normalize_canonical_sources_kept_first() {
        let descriptor = normalize(&json!({
            "displayName": "report.pdf",
            "mimeType": "application/pdf",
            "candidateSources": [
                {"kind": "thumbnail-url", "uri": "https://x/2", "requiresAuth": false},
                {"kind": "direct-url", "uri": "https://x/1", "requiresAuth": true}
            ]
        }))
        .unwrap();
        assert_eq!(
            descriptor.candidate_sources,
            vec![
                CandidateSource::direct_url("https://x/1", true),
                CandidateSource::thumbnail_url("https://x/2", false),
            ]
        );
        assert_eq!(descriptor.file_name, "report.pdf");
    }

    #[test]
    fn test_normalize_deduplicates_sources() {
        let descriptor = normalize(&json!({
            "url": "https://x/1",
            "downloadUrl": "https://x/1"
        }))
        .unwrap();
        assert_eq!(descriptor.candidate_sources.len(), 1);
    }

    #[test]
    fn test_normalize_explicit_requires_auth() {
        let descriptor = normalize(&json!({"url": "https://cdn/x", "requiresAuth": false})).unwrap();
        assert!(!descriptor.candidate_sources[0].requires_auth);
    }

    #[test]
    fn test_normalize_unsafe_name() {
        let descriptor = normalize(&json!({
            "filename": "a/b\\c:d*e?.png",
            "url": "https://x/1"
        }))
        .unwrap();
        for c in ['/', '\\', ':', '*', '?'] {
            assert!(!descriptor.file_name.contains(c));
        }
        assert!(descriptor.file_name.ends_with(".png"));
        // The original name is kept for display
        assert_eq!(descriptor.display_name.as_deref(), Some("a/b\\c:d*e?.png"));
    }

    #[test]
    fn test_normalize_no_sources_is_valid_descriptor() {
        let descriptor = normalize(&json!({"contentName": "lost.jpg"})).unwrap();
        assert!(!descriptor.has_sources());
        assert_eq!(descriptor.file_name, "lost.jpg");
    }

    #[test]
    fn test_normalize_invalid_mime_dropped() {
        let descriptor = normalize(&json!({"url": "https://x/1", "mimeType": "garbage"})).unwrap();
        assert!(descriptor.mime_type.is_none());
        assert_eq!(descriptor.file_name, "attachment.bin");
    }

    #[test]
    fn test_normalize_bare_url_string() {
        let descriptor = normalize(&json!("https://x/photo.jpg")).unwrap();
        assert_eq!(
            descriptor.candidate_sources,
            vec![CandidateSource::direct_url("https://x/photo.jpg", true)]
        );
    }

    #[test]
    fn test_normalize_rejects_non_attachments() {
        assert!(matches!(
            normalize(&json!(42)),
            Err(NormalizeError::NotAnAttachment(_))
        ));
        assert!(matches!(
            normalize(&json!("just text")),
            Err(NormalizeError::NotAnAttachment(_))
        ));
        assert!(matches!(
            normalize(&json!({"foo": "bar"})),
            Err(NormalizeError::NotAnAttachment(_))
        ));
    }

    #[test]
    fn test_normalize_ignores_non_http_urls() {
        let descriptor = normalize(&json!({"url": "file:///etc/passwd", "filename": "x"})).unwrap();
        assert!(descriptor.candidate_sources.is_empty());
    }
}
