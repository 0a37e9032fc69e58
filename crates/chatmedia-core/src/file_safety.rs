//! Filename and payload safety for downloaded media.
//!
//! - Sanitized, extension-preserving file names
//! - Extension resolution: display name, then MIME table, then `.bin`
//! - Disguised error page detection on successful responses

use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::defaults;

/// Runs of characters that are not ASCII alphanumerics, `.` or `-`.
static UNSAFE_CHARS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^A-Za-z0-9.\-]+").expect("static regex is valid"));

/// Markers of an HTML document, matched case-insensitively.
const HTML_MARKERS: &[&str] = &["<html", "<!doctype"];

/// Fallback extension when nothing better is known.
pub const FALLBACK_EXTENSION: &str = ".bin";

/// Map a MIME type to a file extension (with leading dot).
///
/// Parameters such as `; charset=utf-8` are ignored.
pub fn extension_for_mime(mime: &str) -> Option<&'static str> {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    match essence.to_ascii_lowercase().as_str() {
        // Images
        "image/png" => Some(".png"),
        "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(".jpg"),
        "image/gif" => Some(".gif"),
        "image/webp" => Some(".webp"),
        "image/heic" => Some(".heic"),
        "image/heif" => Some(".heif"),
        "image/bmp" => Some(".bmp"),
        "image/tiff" => Some(".tiff"),
        "image/svg+xml" => Some(".svg"),
        // Video
        "video/mp4" => Some(".mp4"),
        "video/quicktime" => Some(".mov"),
        "video/webm" => Some(".webm"),
        "video/x-msvideo" => Some(".avi"),
        "video/mpeg" => Some(".mpeg"),
        "video/3gpp" => Some(".3gp"),
        // Audio
        "audio/mpeg" | "audio/mp3" => Some(".mp3"),
        "audio/mp4" | "audio/x-m4a" => Some(".m4a"),
        "audio/ogg" => Some(".ogg"),
        "audio/wav" | "audio/x-wav" => Some(".wav"),
        "audio/webm" => Some(".weba"),
        // Documents
        "application/pdf" => Some(".pdf"),
        "application/msword" => Some(".doc"),
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document" => {
            Some(".docx")
        }
        "application/vnd.ms-excel" => Some(".xls"),
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet" => Some(".xlsx"),
        "application/vnd.ms-powerpoint" => Some(".ppt"),
        "application/vnd.openxmlformats-officedocument.presentationml.presentation" => {
            Some(".pptx")
        }
        "text/plain" => Some(".txt"),
        "text/csv" => Some(".csv"),
        "application/json" => Some(".json"),
        // Archives
        "application/zip" => Some(".zip"),
        "application/gzip" => Some(".gz"),
        _ => None,
    }
}

/// Split `name` into stem and extension (with leading dot, lowercased).
///
/// Only short alphanumeric suffixes count as extensions, so `v1.2 final`
/// has none.
pub fn split_extension(name: &str) -> (&str, Option<String>) {
    match name.rfind('.') {
        Some(pos) if pos > 0 => {
            let ext = &name[pos + 1..];
            if !ext.is_empty()
                && ext.len() <= defaults::MAX_EXTENSION_LEN
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
            {
                (&name[..pos], Some(format!(".{}", ext.to_ascii_lowercase())))
            } else {
                (name, None)
            }
        }
        _ => (name, None),
    }
}

/// Resolve the extension for an attachment.
///
/// Prefers the extension embedded in the display name, then the MIME table,
/// then [`FALLBACK_EXTENSION`].
pub fn extension_for(display_name: Option<&str>, mime_type: Option<&str>) -> String {
    if let Some((_, Some(ext))) = display_name.map(split_extension) {
        return ext;
    }
    mime_type
        .and_then(extension_for_mime)
        .unwrap_or(FALLBACK_EXTENSION)
        .to_string()
}

/// Extension detected from the payload's magic bytes.
pub fn extension_from_content(data: &[u8]) -> Option<String> {
    infer::get(data).map(|kind| format!(".{}", kind.extension()))
}

/// Replace a `.bin` extension with one detected from the payload.
pub fn refine_extension(file_name: &str, data: &[u8]) -> String {
    match file_name.strip_suffix(FALLBACK_EXTENSION) {
        Some(stem) => match extension_from_content(data) {
            Some(ext) => format!("{}{}", stem, ext),
            None => file_name.to_string(),
        },
        None => file_name.to_string(),
    }
}

/// Sanitize a name for use as a path component.
///
/// Everything but ASCII alphanumerics, `.` and `-` becomes `_`. Leading dots
/// are stripped so the result can never be hidden or a relative path, and the
/// length is capped while keeping the extension.
pub fn sanitize_filename(name: &str) -> String {
    let replaced = UNSAFE_CHARS.replace_all(name, "_");
    let trimmed = replaced.trim_start_matches('.');
    if trimmed.is_empty() || trimmed.chars().all(|c| c == '_' || c == '.') {
        return defaults::UNNAMED_ATTACHMENT.to_string();
    }

    if trimmed.len() <= defaults::MAX_FILE_NAME_LEN {
        return trimmed.to_string();
    }

    // Sanitized output is pure ASCII, so byte slicing is safe
    let (stem, ext) = split_extension(trimmed);
    let ext = ext.unwrap_or_default();
    let keep = defaults::MAX_FILE_NAME_LEN.saturating_sub(ext.len());
    format!("{}{}", &stem[..keep.min(stem.len())], ext)
}

/// Safe base name (stem plus extension) for a descriptor.
///
/// Uses the display name when present, the upstream id otherwise.
pub fn safe_file_name(
    display_name: Option<&str>,
    id: Option<&str>,
    mime_type: Option<&str>,
) -> String {
    let ext = extension_for(display_name, mime_type);
    let raw_stem = match display_name.map(split_extension) {
        Some((stem, _)) if !stem.trim().is_empty() => stem.to_string(),
        _ => id
            .map(|i| i.rsplit('/').next().unwrap_or(i).to_string())
            .unwrap_or_default(),
    };
    let stem = sanitize_filename(&raw_stem);
    sanitize_filename(&format!("{}{}", stem, ext))
}

/// Final on-disk name: `<method>_<timestamp>_<safe name>`.
pub fn build_file_name(method: &str, at: DateTime<Utc>, safe_name: &str) -> String {
    format!(
        "{}_{}_{}",
        sanitize_filename(method),
        at.format("%Y%m%dT%H%M%S%3f"),
        safe_name
    )
}

/// True when the leading bytes of a payload are an HTML document.
///
/// Upstream services answer with a 200 login or error page when
/// authorization silently fails.
pub fn looks_like_error_page(data: &[u8]) -> bool {
    let head = &data[..data.len().min(defaults::ERROR_PAGE_SNIFF_BYTES)];
    let text = String::from_utf8_lossy(head).to_ascii_lowercase();
    HTML_MARKERS.iter().any(|marker| text.contains(marker))
}

/// Validate MIME type format per RFC 2045 (type/subtype).
///
/// Parameters after `;` are ignored. Returns `true` if the essence has
/// exactly one `/`, both parts non-empty and only token characters.
pub fn is_valid_mime_type(mime: &str) -> bool {
    let essence = mime.split(';').next().unwrap_or(mime).trim();
    let parts: Vec<&str> = essence.split('/').collect();
    if parts.len() != 2 {
        return false;
    }
    let (media_type, subtype) = (parts[0], parts[1]);
    if media_type.is_empty() || subtype.is_empty() {
        return false;
    }
    let is_token_char = |c: char| -> bool {
        c.is_ascii_alphanumeric() || matches!(c, '!' | '#' | '$' | '&' | '-' | '^' | '_' | '.' | '+')
    };
    media_type.chars().all(is_token_char) && subtype.chars().all(is_token_char)
}
