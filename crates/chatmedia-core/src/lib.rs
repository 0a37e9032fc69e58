//! # chatmedia-core
//!
//! Core types, traits, and abstractions for retrieving chat attachments.
//!
//! This crate provides the foundational data structures and trait definitions
//! that the other chatmedia crates depend on: the canonical attachment
//! descriptor, the persisted download outcome, the descriptor normalizer and
//! the download state tracker.

pub mod defaults;
pub mod error;
pub mod file_safety;
pub mod logging;
pub mod models;
pub mod normalize;
pub mod tracker;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{
    AllStrategiesExhausted, AttemptFailure, Error, FailureKind, FetchError, FetchErrorKind,
    NormalizeError, Result,
};
pub use file_safety::{
    build_file_name, extension_for, looks_like_error_page, refine_extension, safe_file_name,
    sanitize_filename,
};
pub use models::*;
pub use normalize::{coerce_attachment_list, normalize, normalize_object};
pub use tracker::DownloadStateTracker;
pub use traits::*;
