//! PostgreSQL-backed import stores
//!
//! Status changes and progress commits lock the job row (`FOR UPDATE`) and
//! run the same checks as the in-memory store inside one transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{PgPool, Postgres, Transaction};
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

use super::store::{
    check_progress, check_transition, BackupStore, JobStore, LocalRecordStore, StoreError,
    StoreResult,
};
use super::types::{
    total_chunks, BackupEntry, ErrorLogEntry, ImportJob, ImportOptions, ItemKind, JobStatus,
    ProgressUpdate, WorkItem,
};

const JOB_COLUMNS: &str = r#"
    id, job_name, status, import_type, options, total_items, processed_items,
    successful_items, failed_items, current_chunk, dispatched_chunks, total_chunks, chunk_size,
    error_log, backup_tables, last_error, created_at, updated_at, started_at,
    completed_at
"#;

#[derive(sqlx::FromRow)]
struct JobRow {
    id: Uuid,
    job_name: String,
    status: String,
    import_type: String,
    options: Json<ImportOptions>,
    total_items: i64,
    processed_items: i64,
    successful_items: i64,
    failed_items: i64,
    current_chunk: i64,
    dispatched_chunks: i64,
    total_chunks: i64,
    chunk_size: i64,
    error_log: Json<Vec<ErrorLogEntry>>,
    backup_tables: Vec<String>,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    started_at: Option<DateTime<Utc>>,
    completed_at: Option<DateTime<Utc>>,
}

fn to_u64(value: i64, column: &str) -> StoreResult<u64> {
    u64::try_from(value).map_err(|_| StoreError::Corrupt(format!("negative {column}: {value}")))
}

fn to_i64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

impl TryFrom<JobRow> for ImportJob {
    type Error = StoreError;

    fn try_from(row: JobRow) -> StoreResult<Self> {
        Ok(ImportJob {
            id: row.id,
            job_name: row.job_name,
            status: row.status.parse().map_err(StoreError::Corrupt)?,
            import_type: row.import_type.parse().map_err(StoreError::Corrupt)?,
            options: row.options.0,
            total_items: to_u64(row.total_items, "total_items")?,
            processed_items: to_u64(row.processed_items, "processed_items")?,
            successful_items: to_u64(row.successful_items, "successful_items")?,
            failed_items: to_u64(row.failed_items, "failed_items")?,
            current_chunk: to_u64(row.current_chunk, "current_chunk")?,
            dispatched_chunks: to_u64(row.dispatched_chunks, "dispatched_chunks")?,
            total_chunks: to_u64(row.total_chunks, "total_chunks")?,
            chunk_size: to_u64(row.chunk_size, "chunk_size")?,
            error_log: row.error_log.0,
            backup_tables: row.backup_tables,
            last_error: row.last_error,
            created_at: row.created_at,
            updated_at: row.updated_at,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

/// Import stores on a shared connection pool
#[derive(Clone)]
pub struct PgStore {
    pool: Arc<PgPool>,
}

impl PgStore {
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    async fn lock_job(tx: &mut Transaction<'_, Postgres>, id: Uuid) -> StoreResult<ImportJob> {
        let query = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1 FOR UPDATE");
        let row: Option<JobRow> = sqlx::query_as(&query).bind(id).fetch_optional(&mut **tx).await?;
        row.ok_or(StoreError::NotFound(id))?.try_into()
    }

    async fn fetch_job(&self, id: Uuid) -> StoreResult<ImportJob> {
        let query = format!("SELECT {JOB_COLUMNS} FROM import_jobs WHERE id = $1");
        let row: Option<JobRow> = sqlx::query_as(&query)
            .bind(id)
            .fetch_optional(&*self.pool)
            .await?;
        row.ok_or(StoreError::NotFound(id))?.try_into()
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn insert_job(&self, job: &ImportJob) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO import_jobs (
                id, job_name, status, import_type, options, chunk_size,
                created_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(job.id)
        .bind(&job.job_name)
        .bind(job.status.as_str())
        .bind(job.import_type.as_str())
        .bind(Json(&job.options))
        .bind(to_i64(job.chunk_size))
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&*self.pool)
        .await?;

        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> StoreResult<ImportJob> {
        self.fetch_job(id).await
    }

    async fn list_jobs(&self, limit: usize) -> StoreResult<Vec<ImportJob>> {
        let query = format!("SELECT {JOB_COLUMNS} FROM import_jobs ORDER BY created_at DESC LIMIT $1");
        let rows: Vec<JobRow> = sqlx::query_as(&query)
            .bind(to_i64(limit as u64))
            .fetch_all(&*self.pool)
            .await?;
        rows.into_iter().map(ImportJob::try_from).collect()
    }

    async fn transition(
        &self,
        id: Uuid,
        from: JobStatus,
        to: JobStatus,
        reason: Option<String>,
    ) -> StoreResult<ImportJob> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, id).await?;
        check_transition(&job, from, to)?;

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET status = $2,
                updated_at = NOW(),
                started_at = CASE WHEN $3 THEN COALESCE(started_at, NOW()) ELSE started_at END,
                completed_at = CASE WHEN $4 THEN NOW() ELSE completed_at END,
                last_error = CASE WHEN $6 THEN NULL ELSE COALESCE($5, last_error) END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(to.as_str())
        .bind(from == JobStatus::Pending)
        .bind(to.is_terminal())
        .bind(reason)
        .bind(to == JobStatus::Running)
        .execute(&mut *tx)
        .await?;

        let updated = Self::lock_job(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn save_plan(&self, id: Uuid, items: &[WorkItem]) -> StoreResult<ImportJob> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, id).await?;
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

        sqlx::query("DELETE FROM import_job_items WHERE job_id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        let positions: Vec<i64> = (0..items.len() as i64).collect();
        let kinds: Vec<&str> = items.iter().map(|i| i.kind.as_str()).collect();
        let identifiers: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
        sqlx::query(
            r#"
            INSERT INTO import_job_items (job_id, position, item_kind, identifier)
            SELECT $1, p, k, i FROM UNNEST($2::bigint[], $3::text[], $4::text[]) AS t(p, k, i)
            "#,
        )
        .bind(id)
        .bind(&positions)
        .bind(&kinds)
        .bind(&identifiers)
        .execute(&mut *tx)
        .await?;

        let total = items.len() as u64;
        sqlx::query(
            r#"
            UPDATE import_jobs
            SET total_items = $2, total_chunks = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(to_i64(total))
        .bind(to_i64(total_chunks(total, job.chunk_size)))
        .execute(&mut *tx)
        .await?;

        let updated = Self::lock_job(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn load_plan(&self, id: Uuid) -> StoreResult<Option<Vec<WorkItem>>> {
        let job = self.fetch_job(id).await?;
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT item_kind, identifier FROM import_job_items WHERE job_id = $1 ORDER BY position",
        )
        .bind(id)
        .fetch_all(&*self.pool)
        .await?;

        if rows.is_empty() && job.total_items == 0 {
            return Ok(None);
        }
        if rows.len() as u64 != job.total_items {
            return Err(StoreError::Corrupt(format!(
                "plan of job {id} has {} items, expected {}",
                rows.len(),
                job.total_items
            )));
        }

        rows.into_iter()
            .map(|(kind, identifier)| {
                Ok(WorkItem {
                    kind: kind.parse().map_err(StoreError::Corrupt)?,
                    identifier,
                })
            })
            .collect::<StoreResult<Vec<_>>>()
            .map(Some)
    }

    async fn save_progress(
        &self,
        id: Uuid,
        progress: ProgressUpdate,
        errors: &[ErrorLogEntry],
    ) -> StoreResult<ImportJob> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, id).await?;
        check_progress(&job, &progress)?;

        sqlx::query(
            r#"
            UPDATE import_jobs
            SET processed_items = $2,
                successful_items = $3,
                failed_items = $4,
                current_chunk = $5,
                error_log = error_log || $6::jsonb,
                updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(to_i64(progress.processed_items))
        .bind(to_i64(progress.successful_items))
        .bind(to_i64(progress.failed_items))
        .bind(to_i64(progress.current_chunk))
        .bind(Json(errors))
        .execute(&mut *tx)
        .await?;

        let updated = Self::lock_job(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn set_backup_tables(&self, id: Uuid, tables: &[String]) -> StoreResult<ImportJob> {
        let mut tx = self.pool.begin().await?;
        let job = Self::lock_job(&mut tx, id).await?;
        if job.status != JobStatus::Running {
            return Err(StoreError::Conflict {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }

        sqlx::query("UPDATE import_jobs SET backup_tables = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(tables)
            .execute(&mut *tx)
            .await?;

        let updated = Self::lock_job(&mut tx, id).await?;
        tx.commit().await?;
        Ok(updated)
    }

    async fn mark_dispatched(&self, id: Uuid, chunks: u64) -> StoreResult<()> {
        let updated = sqlx::query(
            r#"
            UPDATE import_jobs
            SET dispatched_chunks = GREATEST(dispatched_chunks, LEAST($2, total_chunks)),
                updated_at = NOW()
            WHERE id = $1 AND status = 'running'
            "#,
        )
        .bind(id)
        .bind(to_i64(chunks))
        .execute(&*self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            let job = self.fetch_job(id).await?;
            return Err(StoreError::Conflict {
                id,
                expected: JobStatus::Running,
                actual: job.status,
            });
        }
        Ok(())
    }
}

#[async_trait]
impl BackupStore for PgStore {
    async fn create_backup(&self, table: &str, entries: &[BackupEntry]) -> StoreResult<()> {
        let mut tx = self.pool.begin().await?;

        let created = sqlx::query("INSERT INTO import_backups (name) VALUES ($1) ON CONFLICT DO NOTHING")
            .bind(table)
            .execute(&mut *tx)
            .await?;
        if created.rows_affected() == 0 {
            return Err(StoreError::BackupExists(table.to_string()));
        }

        let positions: Vec<i64> = (0..entries.len() as i64).collect();
        let kinds: Vec<&str> = entries.iter().map(|e| e.item.kind.as_str()).collect();
        let identifiers: Vec<&str> = entries.iter().map(|e| e.item.identifier.as_str()).collect();
        let pre_images: Vec<Option<Value>> = entries.iter().map(|e| e.pre_image.clone()).collect();
        sqlx::query(
            r#"
            INSERT INTO import_backup_entries (backup_name, position, item_kind, identifier, pre_image)
            SELECT $1, p, k, i, img
            FROM UNNEST($2::bigint[], $3::text[], $4::text[], $5::jsonb[]) AS t(p, k, i, img)
            "#,
        )
        .bind(table)
        .bind(&positions)
        .bind(&kinds)
        .bind(&identifiers)
        .bind(&pre_images)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn load_backup(&self, table: &str) -> StoreResult<Option<Vec<BackupEntry>>> {
        let exists: Option<(String,)> = sqlx::query_as("SELECT name FROM import_backups WHERE name = $1")
            .bind(table)
            .fetch_optional(&*self.pool)
            .await?;
        if exists.is_none() {
            return Ok(None);
        }

        let rows: Vec<(String, String, Option<Json<Value>>)> = sqlx::query_as(
            r#"
            SELECT item_kind, identifier, pre_image
            FROM import_backup_entries
            WHERE backup_name = $1
            ORDER BY position
            "#,
        )
        .bind(table)
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter()
            .map(|(kind, identifier, pre_image)| {
                Ok(BackupEntry {
                    item: WorkItem {
                        kind: kind.parse().map_err(StoreError::Corrupt)?,
                        identifier,
                    },
                    pre_image: pre_image.map(|j| j.0),
                })
            })
            .collect::<StoreResult<Vec<_>>>()
            .map(Some)
    }
}

#[async_trait]
impl LocalRecordStore for PgStore {
    async fn get(&self, item: &WorkItem) -> StoreResult<Option<Value>> {
        let row: Option<(Json<Value>,)> =
            sqlx::query_as("SELECT payload FROM fleet_records WHERE item_kind = $1 AND identifier = $2")
                .bind(item.kind.as_str())
                .bind(&item.identifier)
                .fetch_optional(&*self.pool)
                .await?;
        Ok(row.map(|(payload,)| payload.0))
    }

    async fn get_many(&self, items: &[WorkItem]) -> StoreResult<HashMap<WorkItem, Value>> {
        if items.is_empty() {
            return Ok(HashMap::new());
        }

        let kinds: Vec<&str> = items.iter().map(|i| i.kind.as_str()).collect();
        let identifiers: Vec<&str> = items.iter().map(|i| i.identifier.as_str()).collect();
        let rows: Vec<(String, String, Json<Value>)> = sqlx::query_as(
            r#"
            SELECT r.item_kind, r.identifier, r.payload
            FROM fleet_records r
            JOIN UNNEST($1::text[], $2::text[]) AS k(kind, ident)
              ON r.item_kind = k.kind AND r.identifier = k.ident
            "#,
        )
        .bind(&kinds)
        .bind(&identifiers)
        .fetch_all(&*self.pool)
        .await?;

        rows.into_iter()
            .map(|(kind, identifier, payload)| {
                let kind: ItemKind = kind.parse().map_err(StoreError::Corrupt)?;
                Ok((WorkItem { kind, identifier }, payload.0))
            })
            .collect()
    }

    async fn list_identifiers(&self, kind: ItemKind) -> StoreResult<Vec<String>> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT identifier FROM fleet_records WHERE item_kind = $1 ORDER BY identifier")
                .bind(kind.as_str())
                .fetch_all(&*self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    async fn upsert(&self, item: &WorkItem, record: &Value) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO fleet_records (item_kind, identifier, payload)
            VALUES ($1, $2, $3)
            ON CONFLICT (item_kind, identifier)
            DO UPDATE SET payload = EXCLUDED.payload, updated_at = NOW()
            "#,
        )
        .bind(item.kind.as_str())
        .bind(&item.identifier)
        .bind(Json(record))
        .execute(&*self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, item: &WorkItem) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM fleet_records WHERE item_kind = $1 AND identifier = $2")
            .bind(item.kind.as_str())
            .bind(&item.identifier)
            .execute(&*self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
