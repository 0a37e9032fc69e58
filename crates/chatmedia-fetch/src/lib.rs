//! # chatmedia-fetch
//!
//! Authenticated retrieval of attachment bytes.
//!
//! This crate provides:
//! - [`HttpFetcher`]: the [`MediaFetcher`](chatmedia_core::MediaFetcher)
//!   used in production, with bearer injection, manual redirects, timeouts,
//!   a payload cap and disguised error page detection
//! - [`GoogleMediaClient`]: Drive file and Chat media downloads by reference
//! - Token providers and the per-run [`AuthContext`]
//!
//! # Feature Flags
//!
//! - `mock`: Enable [`mock::MockFetcher`] outside this crate's own tests
//!
//! # Example
//!
//! ```rust,no_run
//! use chatmedia_core::{CandidateSource, MediaFetcher};
//! use chatmedia_fetch::{FetchConfig, HttpFetcher};
//!
//! #[tokio::main]
//! async fn main() {
//!     let fetcher = HttpFetcher::new(FetchConfig::from_env()).unwrap();
//!     let source = CandidateSource::direct_url("https://example.com/a.png", false);
//!     let payload = fetcher.fetch(&source, None).await.unwrap();
//!     println!("{} bytes", payload.bytes.len());
//! }
//! ```

pub mod auth;
pub mod config;
pub mod google;
pub mod http;

// Mock fetcher for testing
#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use auth::{
    provider_from_config, AuthContext, CommandTokenProvider, StaticTokenProvider,
};
pub use config::{AuthConfig, FetchConfig};
pub use google::GoogleMediaClient;
pub use http::{validate_payload, HttpDownloader, HttpFetcher};
