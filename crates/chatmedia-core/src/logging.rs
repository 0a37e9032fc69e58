//! Structured logging field name constants for chatmedia.
//!
//! All crates use these names so log queries work across subsystems.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Failure that ends the run (storage unreachable, no token) |
//! | WARN  | Attachment failed or an attempt failed and a fallback applies |
//! | INFO  | Run lifecycle, attachment completed, record saved |
//! | DEBUG | Decision points: skips, strategy selection, token refresh |
//! | TRACE | Per-attempt detail, redirects, throttle waits |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "fetch", "store", "jobs", "cli"
pub const SUBSYSTEM: &str = "subsystem";

/// Owning record identifier.
pub const RECORD_ID: &str = "record_id";

/// Message key inside the owning record.
pub const MESSAGE_ID: &str = "message_id";

/// Position of the attachment inside its message.
pub const ATTACHMENT_INDEX: &str = "attachment_index";

// ─── Resolution fields ─────────────────────────────────────────────────────

/// Strategy method that produced or attempted a download.
pub const METHOD: &str = "method";

/// Candidate source kind.
pub const SOURCE_KIND: &str = "source_kind";

/// Upstream host of a request.
pub const HOST: &str = "host";

/// HTTP status code of a response.
pub const STATUS_CODE: &str = "status_code";

/// Whether a bearer token was attached.
pub const AUTHENTICATED: &str = "authenticated";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Size of a payload or stored file.
pub const BYTE_SIZE: &str = "byte_size";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Persisted failure kind.
pub const FAILURE_KIND: &str = "failure_kind";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
