//! Download state tracker.
//!
//! Owns the per-attachment status machine:
//!
//! ```text
//! pending -> downloading -> completed
//!                        -> failed -> downloading (next run)
//! ```
//!
//! `completed` is terminal unless its file disappeared from disk, in which
//! case the attachment is processed again (self-healing skip), or the run is
//! forced.

use std::path::Path;

use chrono::Utc;
use tracing::debug;

use crate::error::{Error, Result};
use crate::models::{DownloadOutcome, DownloadResult, DownloadStatus, FailureReason};

/// Decides which attachments need work and records state transitions.
#[derive(Debug, Clone, Copy, Default)]
pub struct DownloadStateTracker {
    force: bool,
}

impl DownloadStateTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reprocess completed attachments even when their file exists.
    pub fn with_force(mut self, force: bool) -> Self {
        self.force = force;
        self
    }

    pub fn is_forced(&self) -> bool {
        self.force
    }

    /// Whether an attachment with this outcome must go through the pipeline.
    ///
    /// A completed outcome is skipped only while its file still exists and is
    /// non-empty.
    pub async fn should_process(&self, outcome: &DownloadOutcome) -> bool {
        if outcome.status != DownloadStatus::Completed || self.force {
            return true;
        }
        match outcome.local_path.as_deref() {
            Some(path) if file_is_present(path).await => false,
            Some(path) => {
                debug!(path = %path.display(), "Completed attachment lost its file, reprocessing");
                true
            }
            None => true,
        }
    }

    /// Enter `downloading`.
    pub fn record_start(&self, outcome: &mut DownloadOutcome) -> Result<()> {
        transition(outcome, DownloadStatus::Downloading)?;
        outcome.local_path = None;
        outcome.byte_size = None;
        outcome.method = None;
        outcome.completed_at = None;
        outcome.attempts = outcome.attempts.saturating_add(1);
        Ok(())
    }

    /// Enter `completed` with the stored file.
    pub fn record_success(&self, outcome: &mut DownloadOutcome, result: &DownloadResult) -> Result<()> {
        transition(outcome, DownloadStatus::Completed)?;
        outcome.local_path = Some(result.local_path.clone());
        outcome.byte_size = Some(result.byte_size);
        outcome.method = Some(result.method.clone());
        outcome.completed_at = outcome.last_attempt_at;
        outcome.failure_reason = None;
        Ok(())
    }

    /// Enter `failed`, replacing any earlier failure reason.
    pub fn record_failure(&self, outcome: &mut DownloadOutcome, reason: FailureReason) -> Result<()> {
        transition(outcome, DownloadStatus::Failed)?;
        outcome.local_path = None;
        outcome.byte_size = None;
        outcome.method = None;
        outcome.completed_at = None;
        outcome.failure_reason = Some(reason);
        Ok(())
    }
}

/// Apply a status change and stamp `last_attempt_at`.
fn transition(outcome: &mut DownloadOutcome, next: DownloadStatus) -> Result<()> {
    if !outcome.status.can_transition_to(next) {
        return Err(Error::InvalidTransition {
            from: outcome.status,
            to: next,
        });
    }
    outcome.status = next;
    outcome.last_attempt_at = Some(Utc::now());
    Ok(())
}

async fn file_is_present(path: &Path) -> bool {
    tokio::fs::metadata(path)
        .await
        .map(|m| m.is_file() && m.len() > 0)
        .unwrap_or(false)
}
