//! Derived progress view of an import job
//!
//! Progress is recomputed on every poll from the stored job plus the live
//! per-chunk counters of a run in this process. It is never persisted.

use serde::Serialize;

use super::types::{ImportJob, JobStatus};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressPhase {
    Queued,
    /// Planning, backup and cleanup
    Preparing,
    Importing,
    Paused,
    Finished,
}

/// Live state of a chunk currently executing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LiveChunk {
    pub finished_items: u64,
    pub chunk_items: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportProgress {
    pub phase: ProgressPhase,
    pub phase_progress: f64,
    pub overall_progress: f64,
    pub chunk_progress: f64,
    pub current_operation: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        (numerator as f64 / denominator as f64).clamp(0.0, 1.0)
    }
}

impl ImportProgress {
    /// `preparing` is whether a live run is still before its first chunk;
    /// `live_chunk` describes the chunk at `current_chunk`, if it is running.
    pub fn from_job(job: &ImportJob, preparing: bool, live_chunk: Option<LiveChunk>) -> Self {
        let overall = match job.status {
            JobStatus::Completed | JobStatus::CompletedWithErrors if job.total_items == 0 => 1.0,
            _ => ratio(job.processed_items, job.total_items),
        };
        let chunk_progress = live_chunk
            .map(|c| ratio(c.finished_items, c.chunk_items))
            .unwrap_or(0.0);

        let (phase, phase_progress, current_operation) = match job.status {
            JobStatus::Pending => (ProgressPhase::Queued, 0.0, "Waiting to start".to_string()),
            JobStatus::Running if preparing => (
                ProgressPhase::Preparing,
                0.0,
                "Planning work items and taking backup".to_string(),
            ),
            JobStatus::Running => (
                ProgressPhase::Importing,
                overall,
                format!(
                    "Importing chunk {} of {}",
                    (job.current_chunk + 1).min(job.total_chunks.max(1)),
                    job.total_chunks
                ),
            ),
            JobStatus::Paused => (
                ProgressPhase::Paused,
                overall,
                format!("Paused after chunk {} of {}", job.current_chunk, job.total_chunks),
            ),
            JobStatus::Completed => (
                ProgressPhase::Finished,
                1.0,
                format!("Imported {} items", job.successful_items),
            ),
            JobStatus::CompletedWithErrors => (
                ProgressPhase::Finished,
                1.0,
                format!(
                    "Imported {} items with {} errors",
                    job.successful_items, job.failed_items
                ),
            ),
            JobStatus::Failed => (ProgressPhase::Finished, 1.0, "Import failed".to_string()),
        };

        Self {
            phase,
            phase_progress,
            overall_progress: overall,
            chunk_progress,
            current_operation,
            details: job.last_error.clone(),
        }
    }
}
