//! # chatmedia-jobs
//!
//! Resolution and batch processing for chat attachments.
//!
//! This crate provides:
//! - The resolution strategy chain with thumbnail fallback
//! - Per-host request spacing
//! - The batch orchestrator with bounded concurrency across records,
//!   cooperative cancellation and run events via broadcast channels
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use chatmedia_fetch::{AuthConfig, AuthContext, FetchConfig, HttpFetcher};
//! use chatmedia_jobs::{BatchOrchestrator, OrchestratorConfig};
//! use chatmedia_store::{JsonDirectoryStore, MediaDirectory};
//!
//! let orchestrator = BatchOrchestrator::new(
//!     Arc::new(JsonDirectoryStore::new("./records")),
//!     Arc::new(MediaDirectory::new("./media")),
//!     Arc::new(HttpFetcher::new(FetchConfig::from_env())?),
//!     Arc::new(AuthContext::from_config(&AuthConfig::from_env())),
//!     OrchestratorConfig::from_env(),
//! );
//!
//! // Start the run and get a handle
//! let handle = orchestrator.start();
//!
//! // Listen for events
//! let mut events = handle.events();
//! tokio::spawn(async move {
//!     while let Ok(event) = events.recv().await {
//!         println!("Event: {:?}", event);
//!     }
//! });
//!
//! let summary = handle.join().await?;
//! println!("{}", summary);
//! ```

pub mod chain;
pub mod orchestrator;
pub mod throttle;

// Re-export core types
pub use chatmedia_core::*;

pub use chain::{Attempt, ChainConfig, ResolutionChain, ResolvedPayload};
pub use orchestrator::{
    BatchOrchestrator, OrchestratorConfig, OrchestratorHandle, PipelineEvent, RunSummary,
    ShutdownSignal,
};
pub use throttle::HostThrottle;
