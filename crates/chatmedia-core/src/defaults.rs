//! Centralized default constants for chatmedia.
//!
//! **This module is the single source of truth** for shared default values.
//! Config structs in the other crates reference these constants instead of
//! defining their own magic numbers.

// =============================================================================
// FETCH
// =============================================================================

/// Per-request timeout in seconds.
pub const FETCH_TIMEOUT_SECS: u64 = 60;

/// Connect timeout in seconds.
pub const FETCH_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Maximum number of 301/302 hops followed for one request.
pub const MAX_REDIRECTS: usize = 5;

/// Payload cap in bytes (512 MiB).
pub const MAX_PAYLOAD_BYTES: u64 = 512 * 1024 * 1024;

/// Leading bytes inspected for HTML error page markers.
pub const ERROR_PAGE_SNIFF_BYTES: usize = 200;

/// User agent sent with every request.
pub const USER_AGENT: &str = concat!("chatmedia/", env!("CARGO_PKG_VERSION"));

/// Drive API base URL.
pub const DRIVE_API_URL: &str = "https://www.googleapis.com";

/// Chat API base URL.
pub const CHAT_API_URL: &str = "https://chat.googleapis.com";

// =============================================================================
// AUTH
// =============================================================================

/// Assumed lifetime of a token produced by a token command (55 minutes).
pub const TOKEN_TTL_SECS: u64 = 3300;

/// Tokens expiring within this margin are refreshed before use.
pub const TOKEN_REFRESH_MARGIN_SECS: i64 = 60;

// =============================================================================
// FILE NAMES
// =============================================================================

/// Maximum length of a sanitized file name component.
pub const MAX_FILE_NAME_LEN: usize = 120;

/// Maximum length of a recognized file extension (without the dot).
pub const MAX_EXTENSION_LEN: usize = 10;

/// Stem used when no usable name exists.
pub const UNNAMED_ATTACHMENT: &str = "attachment";

// =============================================================================
// ORCHESTRATION
// =============================================================================

/// Delay between network operations against the same host, in milliseconds.
pub const DOWNLOAD_DELAY_MS: u64 = 1500;

/// Owning records processed concurrently.
pub const MAX_CONCURRENT_RECORDS: usize = 1;

/// Broadcast channel capacity for pipeline events.
pub const EVENT_BUS_CAPACITY: usize = 256;

/// Default media root directory.
pub const MEDIA_ROOT: &str = "./media";

/// Default record store directory.
pub const RECORDS_DIR: &str = "./records";

// =============================================================================
// ENVIRONMENT VARIABLES
// =============================================================================

pub const ENV_MEDIA_ROOT: &str = "CHATMEDIA_MEDIA_ROOT";
pub const ENV_RECORDS_DIR: &str = "CHATMEDIA_RECORDS_DIR";
pub const ENV_DELAY_MS: &str = "CHATMEDIA_DELAY_MS";
pub const ENV_MAX_CONCURRENT_RECORDS: &str = "CHATMEDIA_MAX_CONCURRENT_RECORDS";
pub const ENV_FORCE: &str = "CHATMEDIA_FORCE";
pub const ENV_FETCH_TIMEOUT_SECS: &str = "CHATMEDIA_FETCH_TIMEOUT_SECS";
pub const ENV_MAX_REDIRECTS: &str = "CHATMEDIA_MAX_REDIRECTS";
pub const ENV_MAX_PAYLOAD_BYTES: &str = "CHATMEDIA_MAX_PAYLOAD_BYTES";
pub const ENV_DRIVE_API_URL: &str = "CHATMEDIA_DRIVE_API_URL";
pub const ENV_CHAT_API_URL: &str = "CHATMEDIA_CHAT_API_URL";
pub const ENV_ACCESS_TOKEN: &str = "CHATMEDIA_ACCESS_TOKEN";
pub const ENV_TOKEN_COMMAND: &str = "CHATMEDIA_TOKEN_COMMAND";
pub const ENV_TOKEN_TTL_SECS: &str = "CHATMEDIA_TOKEN_TTL_SECS";
pub const ENV_THUMBNAIL_FALLBACK: &str = "CHATMEDIA_THUMBNAIL_FALLBACK";
pub const ENV_THUMBNAILS_IMAGES_ONLY: &str = "CHATMEDIA_THUMBNAILS_IMAGES_ONLY";
