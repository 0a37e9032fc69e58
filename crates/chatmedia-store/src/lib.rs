//! # chatmedia-store
//!
//! Storage layer for chatmedia.
//!
//! This crate provides:
//! - [`MediaDirectory`]: the media root that receives downloaded files, with
//!   atomic, never-overwriting writes
//! - [`JsonDirectoryStore`]: owning records persisted as one JSON document each
//! - [`MemoryRecordStore`]: in-memory records for tests and embedding
//!
//! ## Example
//!
//! ```rust,ignore
//! use chatmedia_store::{JsonDirectoryStore, MediaDirectory, MediaStorage, RecordStore};
//!
//! let media = MediaDirectory::new("/var/chatmedia/media");
//! media.validate().await?;
//!
//! let records = JsonDirectoryStore::new("/var/chatmedia/records");
//! for id in records.list_record_ids().await? {
//!     let record = records.load(&id).await?;
//!     println!("{}: {} attachment(s)", id, record.attachment_count());
//! }
//! ```

pub mod file_storage;
pub mod records;

// Re-export core types
pub use chatmedia_core::*;

pub use file_storage::MediaDirectory;
pub use records::{JsonDirectoryStore, MemoryRecordStore};
