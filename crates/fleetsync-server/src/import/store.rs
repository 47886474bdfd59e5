//! Persistence seams for the import pipeline
//!
//! Three stores back an import:
//! - [`JobStore`]: job rows, their persisted plan and error logs
//! - [`BackupStore`]: write-once backup tables holding record pre-images
//! - [`LocalRecordStore`]: the local fleet records the import writes to
//!
//! [`MemoryStore`](super::memory::MemoryStore) implements all three for
//! tests and local runs; [`PgStore`](super::postgres::PgStore) is the
//! PostgreSQL implementation.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use super::types::{
    BackupEntry, ErrorLogEntry, ImportJob, ItemKind, JobStatus, ProgressUpdate, WorkItem,
};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Import job not found: {0}")]
    NotFound(Uuid),

    #[error("Job {id} is {actual}, expected {expected}")]
    Conflict {
        id: Uuid,
        expected: JobStatus,
        actual: JobStatus,
    },

    #[error("Job {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
    },

    #[error("Invalid progress for job {id}: {reason}")]
    InvalidProgress { id: Uuid, reason: String },

    #[error("Backup table already exists: {0}")]
    BackupExists(String),

    #[error("Store unavailable: {0}")]
    Unavailable(String),

    #[error("Corrupt row: {0}")]
    Corrupt(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl StoreError {
    /// Errors caused by the store itself rather than by the request
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            StoreError::Unavailable(_)
                | StoreError::Corrupt(_)
                | StoreError::Database(_)
                | StoreError::Serialization(_)
        )
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Durable storage for import jobs
///
/// Status changes go through [`JobStore::transition`], a compare-and-swap on
/// the stored status; a job in a terminal status is never modified again.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn insert_job(&self, job: &ImportJob) -> StoreResult<()>;

    async fn get_job(&self, id: Uuid) -> StoreResult<ImportJob>;

    /// Most recently created first
    async fn list_jobs(&self, limit: usize) -> StoreResult<Vec<ImportJob>>;

    /// Move `id` from `from` to `to` if it is still in `from`
    ///
    /// Sets `started_at` when leaving `pending` and `completed_at` when
    /// entering a terminal status. Entering `running` clears `last_error`;
    /// otherwise `reason` replaces it when given.
    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        reason: Option<String>,
    ) -> StoreResult<ImportJob>;

    /// Persist the ordered work plan and derive `total_items`/`total_chunks`
    async fn save_plan(&self, id: Uuid, items: &[WorkItem]) -> StoreResult<ImportJob>;

    /// Plan saved by [`JobStore::save_plan`]; `None` before planning
    async fn load_plan(&self, id: Uuid) -> StoreResult<Option<Vec<WorkItem>>>;

    /// Commit one chunk: new counters plus the chunk's error entries
    ///
    /// Only valid while the job is `running`.
    async fn save_progress(
        &self,
        id: Uuid,
        progress: ProgressUpdate,
        errors: &[ErrorLogEntry],
    ) -> StoreResult<ImportJob>;

    async fn set_backup_tables(&self, id: Uuid, tables: &[String]) -> StoreResult<ImportJob>;

    /// Raise `dispatched_chunks` to `chunks`; never lowers it
    ///
    /// Only valid while the job is `running`.
    async fn mark_dispatched(&self, id: Uuid, chunks: u64) -> StoreResult<()>;
}

/// Write-once backup tables keyed by name
#[async_trait]
pub trait BackupStore: Send + Sync {
    /// Fails with [`StoreError::BackupExists`] if `table` was already written
    async fn create_backup(&self, table: &str, entries: &[BackupEntry]) -> StoreResult<()>;

    async fn load_backup(&self, table: &str) -> StoreResult<Option<Vec<BackupEntry>>>;
}

/// Local fleet records keyed by [`WorkItem`]
#[async_trait]
pub trait LocalRecordStore: Send + Sync {
    async fn get(&self, item: &WorkItem) -> StoreResult<Option<Value>>;

    /// Existing records among `items`; absent items are left out
    async fn get_many(&self, items: &[WorkItem]) -> StoreResult<HashMap<WorkItem, Value>>;

    /// Identifiers of every local record of `kind`
    async fn list_identifiers(&self, kind: ItemKind) -> StoreResult<Vec<String>>;

    async fn upsert(&self, item: &WorkItem, record: &Value) -> StoreResult<()>;

    /// Returns whether a record was removed
    async fn delete(&self, item: &WorkItem) -> StoreResult<bool>;
}

/// Bundle of the stores an orchestrator needs
#[derive(Clone)]
pub struct Stores {
    pub jobs: Arc<dyn JobStore>,
    pub backups: Arc<dyn BackupStore>,
    pub records: Arc<dyn LocalRecordStore>,
}

impl Stores {
    /// Use one value for all three stores
    pub fn shared<S>(store: Arc<S>) -> Self
    where
        S: JobStore + BackupStore + LocalRecordStore + 'static,
    {
        Self {
            jobs: store.clone(),
            backups: store.clone(),
            records: store,
        }
    }
}

/// Checks shared by store implementations before a progress commit
pub(crate) fn check_progress(job: &ImportJob, progress: &ProgressUpdate) -> StoreResult<()> {
    let invalid = |reason: String| StoreError::InvalidProgress { id: job.id, reason };

    if job.status != JobStatus::Running {
        return Err(StoreError::Conflict {
            id: job.id,
            expected: JobStatus::Running,
            actual: job.status,
        });
    }
    if progress.processed_items != progress.successful_items + progress.failed_items {
        return Err(invalid(format!(
            "processed {} != successful {} + failed {}",
            progress.processed_items, progress.successful_items, progress.failed_items
        )));
    }
    if progress.processed_items > job.total_items {
        return Err(invalid(format!(
            "processed {} exceeds total {}",
            progress.processed_items, job.total_items
        )));
    }
    if progress.processed_items < job.processed_items
        || progress.successful_items < job.successful_items
        || progress.failed_items < job.failed_items
        || progress.current_chunk < job.current_chunk
    {
        return Err(invalid("counters cannot decrease".to_string()));
    }
    if progress.current_chunk > job.total_chunks {
        return Err(invalid(format!(
            "chunk {} beyond total {}",
            progress.current_chunk, job.total_chunks
        )));
    }
    Ok(())
}

/// Checks shared by store implementations before a status change
pub(crate) fn check_transition(
    job: &ImportJob,
    from: JobStatus,
    to: JobStatus,
) -> StoreResult<()> {
    if job.status != from {
        return Err(StoreError::Conflict {
            id: job.id,
            expected: from,
            actual: job.status,
        });
    }
    if !from.can_transition_to(to) {
        return Err(StoreError::InvalidTransition { id: job.id, from, to });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::types::{ImportOptions, ImportType};

    fn running_job(total: u64) -> ImportJob {
        let mut job = ImportJob::new("t", ImportType::UsersOnly, ImportOptions::default(), 10);
        job.status = JobStatus::Running;
        job.total_items = total;
        job.total_chunks = crate::import::types::total_chunks(total, 10);
        job
    }

    #[test]
    fn test_progress_must_balance() {
        let job = running_job(30);
        let progress = ProgressUpdate {
            processed_items: 10,
            successful_items: 8,
            failed_items: 1,
            current_chunk: 1,
        };
        assert!(matches!(
            check_progress(&job, &progress),
            Err(StoreError::InvalidProgress { .. })
        ));
    }

    #[test]
    fn test_progress_requires_running() {
        let mut job = running_job(30);
        job.status = JobStatus::Paused;
        let progress = ProgressUpdate {
            processed_items: 10,
            successful_items: 10,
            failed_items: 0,
            current_chunk: 1,
        };
        assert!(matches!(
            check_progress(&job, &progress),
            Err(StoreError::Conflict { .. })
        ));
    }

    #[test]
    fn test_progress_cannot_go_backwards() {
        let mut job = running_job(30);
        job.processed_items = 20;
        job.successful_items = 20;
        job.current_chunk = 2;
        let progress = ProgressUpdate {
            processed_items: 10,
            successful_items: 10,
            failed_items: 0,
            current_chunk: 1,
        };
        assert!(check_progress(&job, &progress).is_err());
    }

    #[test]
    fn test_transition_checks() {
        let job = running_job(30);
        assert!(check_transition(&job, JobStatus::Running, JobStatus::Paused).is_ok());
        assert!(matches!(
            check_transition(&job, JobStatus::Paused, JobStatus::Running),
            Err(StoreError::Conflict { .. })
        ));
        assert!(matches!(
            check_transition(&job, JobStatus::Running, JobStatus::Pending),
            Err(StoreError::InvalidTransition { .. })
        ));
    }
}
