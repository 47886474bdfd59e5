//! In-memory implementation of every import store

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::store::{
    check_progress, check_transition, BackupStore, JobStore, LocalRecordStore, StoreError,
    StoreResult,
};
use super::types::{
    total_chunks, BackupEntry, ErrorLogEntry, ImportJob, ItemKind, JobStatus, ProgressUpdate,
    WorkItem,
};

#[derive(Default)]
struct Tables {
    jobs: HashMap<Uuid, ImportJob>,
    plans: HashMap<Uuid, Vec<WorkItem>>,
    backups: HashMap<String, Vec<BackupEntry>>,
    records: BTreeMap<WorkItem, Value>,
}

/// Process-local store; state is lost on drop
#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed local records, e.g. rows that existed before an import
    pub async fn seed_records<I>(&self, records: I)
    where
        I: IntoIterator<Item = (WorkItem, Value)>,
    {
        let mut tables = self.tables.write().await;
        tables.records.extend(records);
    }

    /// Snapshot of every local record
    pub async fn records(&self) -> BTreeMap<WorkItem, Value> {
        self.tables.read().await.records.clone()
    }

    pub async fn backup_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.read().await.backups.keys().cloned().collect();
        names.sort();
        names
    }

    /// Remove a backup table, simulating an operator dropping it
    pub async fn drop_backup(&self, table: &str) -> bool {
        self.tables.write().await.backups.remove(table).is_some()
    }
}

fn job_mut(tables: &mut Tables, id: Uuid) -> StoreResult<&mut ImportJob> {
    tables.jobs.get_mut(&id).ok_or(StoreError::NotFound(id))
}

#[async_trait]
impl JobStore for MemoryStore {
    async fn insert_job(&self, job: &ImportJob) -> StoreResult<()> {
        self.tables.write().await.jobs.insert(job.id, job.clone());
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<ImportJob> {
        self.tables
            .read()
            .await
            .jobs
            .get(&id)
            .cloned()
            .ok_or(StoreError::NotFound(id))
    }

    async fn list_jobs(&self, limit: usize) -> StoreResult<Vec<ImportJob>> {
        let tables = self.tables.read().await;
        let mut jobs: Vec<ImportJob> = tables.jobs.values().cloned().collect();
        jobs.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        jobs.truncate(limit);
        Ok(jobs)
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        reason: Option<String>,
    ) -> StoreResult<ImportJob> {
        let mut tables = self.tables.write().await;
        let job = job_mut(&mut tables, id)?;
        check_transition(job, from, to)?;

        let now = Utc::now();
        job.status = to;
        job.updated_at = now;
        if from == JobStatus::Pending && job.started_at.is_none() {
            job.started_at = Some(now);
        }
        if to.is_terminal() {
            job.completed_at = Some(now);
        }
        if to == JobStatus::Running {
            job.last_error = None;
        } else if reason.is_some() {
            job.last_error = reason;
        }
        Ok(job.clone())
    }

    async fn save_plan(&self, id: Uuid, items: &[WorkItem]) -> StoreResult<ImportJob> {
        let mut tables = self.tables.write().await;
        let job = job_mut(&mut tables, id)?;
        if job.status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        if job.processed_items > 0 {
            return Err(StoreError::InvalidProgress {
                id,
                reason: "plan cannot change after items were processed".to_string(),
            });
        }

        job.total_items = items.len() as u64;
        job.total_chunks = total_chunks(job.total_items, job.chunk_size);
        job.updated_at = Utc::now();
        let job = job.clone();
        tables.plans.insert(id, items.to_vec());
        Ok(job)
    }

    async fn load_plan(&self, id: Uuid) -> StoreResult<Option<Vec<WorkItem>>> {
        let tables = self.tables.read().await;
        if !tables.jobs.contains_key(&id) {
            return Err(StoreError::NotFound(id));
        }
        Ok(tables.plans.get(&id).cloned())
    }

    async fn save_progress(
        &self,
        id: Uuid,
        progress: ProgressUpdate,
        errors: &[ErrorLogEntry],
    ) -> StoreResult<ImportJob> {
        let mut tables = self.tables.write().await;
        let job = job_mut(&mut tables, id)?;
        check_progress(job, &progress)?;

        job.processed_items = progress.processed_items;
        job.successful_items = progress.successful_items;
        job.failed_items = progress.failed_items;
        job.current_chunk = progress.current_chunk;
        job.error_log.extend_from_slice(errors);
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn set_backup_tables(&self, id: Uuid, tables_ref: &[String]) -> StoreResult<ImportJob> {
        let mut tables = self.tables.write().await;
        let job = job_mut(&mut tables, id)?;
        if job.status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        job.backup_tables = tables_ref.to_vec();
        job.updated_at = Utc::now();
        Ok(job.clone())
    }

    async fn mark_dispatched(&self, id: Uuid, chunks: u64) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        let job = job_mut(&mut tables, id)?;
        if job.status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        job.dispatched_chunks = job.dispatched_chunks.max(chunks.min(job.total_chunks));
        Ok(())
    }
}

#[async_trait]
impl BackupStore for MemoryStore {
    async fn create_backup(&self, table: &str, entries: &[BackupEntry]) -> StoreResult<()> {
        let mut tables = self.tables.write().await;
        if tables.backups.contains_key(table) {
            return Err(StoreError::BackupExists(table.to_string()));
        }
        tables.backups.insert(table.to_string(), entries.to_vec());
        Ok(())
    }

    async fn load_backup(&self, table: &str) -> StoreResult<Option<Vec<BackupEntry>>> {
        Ok(self.tables.read().await.backups.get(table).cloned())
    }
}

#[async_trait]
impl LocalRecordStore for MemoryStore {
    async fn get(&self, item: &WorkItem) -> StoreResult<Option<Value>> {
        Ok(self.tables.read().await.records.get(item).cloned())
    }

    async fn get_many(&self, items: &[WorkItem]) -> StoreResult<HashMap<WorkItem, Value>> {
        let tables = self.tables.read().await;
        Ok(items
            .iter()
            .filter_map(|item| tables.records.get(item).map(|v| (item.clone(), v.clone())))
            .collect())
    }

    async fn list_identifiers(&self, kind: ItemKind) -> StoreResult<Vec<String>> {
        let tables = self.tables.read().await;
        Ok(tables
            .records
            .keys()
            .filter(|item| item.kind == kind)
            .map(|item| item.identifier.clone())
            .collect())
    }

    async fn upsert(&self, item: &WorkItem, record: &Value) -> StoreResult<()> {
        self.tables
            .write()
            .await
            .records
            .insert(item.clone(), record.clone());
        Ok(())
    }

    async fn delete(&self, item: &WorkItem) -> StoreResult<bool> {
        Ok(self.tables.write().await.records.remove(item).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::types::{ImportOptions, ImportType};
    use serde_json::json;

    async fn running(store: &MemoryStore, items: usize) -> ImportJob {
        let job = ImportJob::new("mem", ImportType::UsersOnly, ImportOptions::default(), 2);
        store.insert_job(&job).await.unwrap();
        store
            .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap();
        let plan: Vec<WorkItem> = (0..items).map(|i| WorkItem::user(format!("u{i}"))).collect();
        store.save_plan(job.id, &plan).await.unwrap()
    }

    #[tokio::test]
    async fn test_transition_sets_timestamps_once() {
        let store = MemoryStore::new();
        let job = running(&store, 3).await;
        let started = job.started_at.unwrap();
        assert!(job.completed_at.is_none());

        let paused = store
            .transition(job.id, JobStatus::Running, JobStatus::Paused, Some("operator".into()))
            .await
            .unwrap();
        assert_eq!(paused.last_error.as_deref(), Some("operator"));
        let resumed = store
            .transition(job.id, JobStatus::Paused, JobStatus::Running, None)
            .await
            .unwrap();
        assert_eq!(resumed.started_at, Some(started));
        assert_eq!(resumed.last_error, None);

        let done = store
            .transition(job.id, JobStatus::Running, JobStatus::Completed, None)
            .await
            .unwrap();
        assert!(done.completed_at.is_some());
    }

    #[tokio::test]
    async fn test_cas_conflict_reported() {
        let store = MemoryStore::new();
        let job = running(&store, 3).await;
        let err = store
            .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict { actual: JobStatus::Running, .. }));
    }

    #[tokio::test]
    async fn test_terminal_job_is_immutable() {
        let store = MemoryStore::new();
        let job = running(&store, 2).await;
        store
            .transition(job.id, JobStatus::Running, JobStatus::Failed, Some("boom".into()))
            .await
            .unwrap();

        let progress = ProgressUpdate {
            processed_items: 2,
            successful_items: 2,
            failed_items: 0,
            current_chunk: 1,
        };
        assert!(store.save_progress(job.id, progress, &[]).await.is_err());
        assert!(store.set_backup_tables(job.id, &["b".into()]).await.is_err());
        assert!(store
            .transition(job.id, JobStatus::Failed, JobStatus::Running, None)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_plan_derives_totals() {
        let store = MemoryStore::new();
        let job = running(&store, 5).await;
        assert_eq!(job.total_items, 5);
        assert_eq!(job.total_chunks, 3);
        assert_eq!(store.load_plan(job.id).await.unwrap().unwrap().len(), 5);
    }

    #[tokio::test]
    async fn test_dispatch_mark_only_rises() {
        let store = MemoryStore::new();
        let job = running(&store, 5).await;

        store.mark_dispatched(job.id, 2).await.unwrap();
        store.mark_dispatched(job.id, 1).await.unwrap();
        store.mark_dispatched(job.id, 9).await.unwrap();
        assert_eq!(store.get_job(job.id).await.unwrap().dispatched_chunks, 3);

        store
            .transition(job.id, JobStatus::Running, JobStatus::Paused, None)
            .await
            .unwrap();
        assert!(matches!(
            store.mark_dispatched(job.id, 3).await,
            Err(StoreError::Conflict { .. })
        ));
    }

    #[tokio::test]
    async fn test_backup_is_write_once() {
        let store = MemoryStore::new();
        let entries = vec![BackupEntry {
            item: WorkItem::user("a"),
            pre_image: Some(json!({"username": "a"})),
        }];
        store.create_backup("backup_x_user", &entries).await.unwrap();
        let err = store.create_backup("backup_x_user", &[]).await.unwrap_err();
        assert!(matches!(err, StoreError::BackupExists(_)));
        assert_eq!(store.load_backup("backup_x_user").await.unwrap(), Some(entries));
        assert_eq!(store.load_backup("missing").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_records_by_kind() {
        let store = MemoryStore::new();
        store
            .seed_records([
                (WorkItem::user("a"), json!({"username": "a"})),
                (WorkItem::vehicle("1"), json!({"name": "Van"})),
            ])
            .await;
        assert_eq!(store.list_identifiers(ItemKind::Vehicle).await.unwrap(), vec!["1"]);
        assert!(store.delete(&WorkItem::user("a")).await.unwrap());
        assert!(!store.delete(&WorkItem::user("a")).await.unwrap());
    }
}
