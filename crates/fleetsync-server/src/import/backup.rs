//! Backup and rollback of local records
//!
//! Before an import's first write, the pre-image of every record it may
//! touch is copied into write-once backup tables (one per item kind). A
//! rollback replays those pre-images: existing rows are restored, rows the
//! import created are deleted. Rollback refuses to write anything if any
//! referenced backup table is gone.

use serde::Serialize;
use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use super::error::{ImportError, ImportResult};
use super::store::{BackupStore, JobStore, LocalRecordStore, StoreError};
use super::types::{BackupEntry, ImportJob, ItemKind, JobStatus, WorkItem};

/// Name of the backup table holding `kind` pre-images for `job_id`
pub fn backup_table_name(job_id: Uuid, kind: ItemKind) -> String {
    format!("backup_{}_{}", job_id.simple(), kind.as_str())
}

/// Outcome of a successful rollback
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RollbackReport {
    pub job_id: Uuid,
    pub tables: Vec<String>,
    pub restored: u64,
    pub deleted: u64,
}

pub struct BackupManager {
    jobs: Arc<dyn JobStore>,
    backups: Arc<dyn BackupStore>,
    records: Arc<dyn LocalRecordStore>,
}

impl BackupManager {
    pub fn new(
        jobs: Arc<dyn JobStore>,
        backups: Arc<dyn BackupStore>,
        records: Arc<dyn LocalRecordStore>,
    ) -> Self {
        Self {
            jobs,
            backups,
            records,
        }
    }

    /// Capture pre-images of `items` once per job
    ///
    /// Returns the job's backup table references. A job that already has
    /// backup tables is returned unchanged.
    pub async fn snapshot(&self, job: &ImportJob, items: &[WorkItem]) -> ImportResult<Vec<String>> {
        if !job.backup_tables.is_empty() {
            return Ok(job.backup_tables.clone());
        }

        let mut by_kind: BTreeMap<ItemKind, Vec<WorkItem>> = BTreeMap::new();
        for item in items {
            by_kind.entry(item.kind).or_default().push(item.clone());
        }

        let mut tables = Vec::with_capacity(by_kind.len());
        for (kind, kind_items) in by_kind {
            let mut existing = self.records.get_many(&kind_items).await?;
            let entries: Vec<BackupEntry> = kind_items
                .into_iter()
                .map(|item| BackupEntry {
                    pre_image: existing.remove(&item),
                    item,
                })
                .collect();

            let table = backup_table_name(job.id, kind);
            match self.backups.create_backup(&table, &entries).await {
                Ok(()) => {},
                // Left behind by an earlier attempt that died before recording it
                Err(StoreError::BackupExists(_)) => {
                    warn!(job_id = %job.id, table = %table, "Reusing existing backup table");
                },
                Err(e) => return Err(e.into()),
            }

            info!(
                job_id = %job.id,
                table = %table,
                entries = entries.len(),
                "Backup table written"
            );
            tables.push(table);
        }

        self.jobs.set_backup_tables(job.id, &tables).await?;
        Ok(tables)
    }

    /// Restore the records `job_id` touched
    ///
    /// Pre-images are replayed for items of dispatched chunks and for
    /// records removed by cleanup; plan items the job never reached are
    /// left alone. Only `failed` and `completed_with_errors` jobs can be
    /// rolled back. The job record itself is not modified.
    pub async fn rollback(&self, job_id: Uuid) -> ImportResult<RollbackReport> {
        let job = self.jobs.get_job(job_id).await?;
        if !matches!(job.status, JobStatus::Failed | JobStatus::CompletedWithErrors) {
            return Err(ImportError::invalid_state(job_id, job.status, "roll back"));
        }
        if job.backup_tables.is_empty() {
            return Err(ImportError::NoBackup(job_id));
        }

        let mut loaded = Vec::with_capacity(job.backup_tables.len());
        for table in &job.backup_tables {
            match self.backups.load_backup(table).await? {
                Some(entries) => loaded.push(entries),
                None => {
                    warn!(job_id = %job_id, table = %table, "Rollback aborted: backup table missing");
                    return Err(ImportError::BackupMissing(table.clone()));
                },
            }
        }

        let untouched: HashSet<WorkItem> = match self.jobs.load_plan(job_id).await? {
            Some(plan) => {
                let (reached, _) = job.chunk_bounds(job.dispatched_chunks);
                plan.into_iter().skip(reached).collect()
            },
            None => HashSet::new(),
        };

        let mut report = RollbackReport {
            job_id,
            tables: job.backup_tables.clone(),
            restored: 0,
            deleted: 0,
        };

        for entry in loaded.into_iter().flatten() {
            if untouched.contains(&entry.item) {
                continue;
            }
            match entry.pre_image {
                Some(ref record) => {
                    self.records.upsert(&entry.item, record).await?;
                    report.restored += 1;
                },
                None => {
                    if self.records.delete(&entry.item).await? {
                        report.deleted += 1;
                    }
                },
            }
        }

        info!(
            job_id = %job_id,
            restored = report.restored,
            deleted = report.deleted,
            "Rollback completed"
        );
        Ok(report)
    }
}
