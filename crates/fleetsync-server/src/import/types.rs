//! Core types for the import pipeline

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Kind of record pulled from the tracking platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemKind {
    User,
    Vehicle,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::User => "user",
            ItemKind::Vehicle => "vehicle",
        }
    }
}

impl std::str::FromStr for ItemKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(ItemKind::User),
            "vehicle" => Ok(ItemKind::Vehicle),
            other => Err(format!("unknown item kind: {other}")),
        }
    }
}

/// One unit of import work; its display form is the local record key
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkItem {
    pub kind: ItemKind,
    pub identifier: String,
}

impl WorkItem {
    pub fn user(username: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::User,
            identifier: username.into(),
        }
    }

    pub fn vehicle(vehicle_id: impl Into<String>) -> Self {
        Self {
            kind: ItemKind::Vehicle,
            identifier: vehicle_id.into(),
        }
    }

    /// Key used by the local and backup stores, e.g. `user:alice`
    pub fn key(&self) -> String {
        self.to_string()
    }

    /// Inverse of [`WorkItem::key`]
    pub fn parse_key(key: &str) -> Option<Self> {
        let (kind, identifier) = key.split_once(':')?;
        Some(Self {
            kind: kind.parse().ok()?,
            identifier: identifier.to_string(),
        })
    }
}

impl std::fmt::Display for WorkItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.identifier)
    }
}

/// Import job status
///
/// `Completed`, `CompletedWithErrors` and `Failed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Running,
    Paused,
    Completed,
    CompletedWithErrors,
    Failed,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Paused => "paused",
            JobStatus::Completed => "completed",
            JobStatus::CompletedWithErrors => "completed_with_errors",
            JobStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Completed | JobStatus::CompletedWithErrors | JobStatus::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Pending, Running)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, CompletedWithErrors)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Failed)
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for JobStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "paused" => Ok(JobStatus::Paused),
            "completed" => Ok(JobStatus::Completed),
            "completed_with_errors" => Ok(JobStatus::CompletedWithErrors),
            "failed" => Ok(JobStatus::Failed),
            other => Err(format!("unknown job status: {other}")),
        }
    }
}

/// What an import run pulls from the platform
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportType {
    UsersOnly,
    VehiclesOnly,
    CompleteSystem,
    Selective,
}

impl ImportType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImportType::UsersOnly => "users_only",
            ImportType::VehiclesOnly => "vehicles_only",
            ImportType::CompleteSystem => "complete_system",
            ImportType::Selective => "selective",
        }
    }

    /// Item kinds listed from the platform, in plan order
    pub fn kinds(&self) -> &'static [ItemKind] {
        match self {
            ImportType::UsersOnly | ImportType::Selective => &[ItemKind::User],
            ImportType::VehiclesOnly => &[ItemKind::Vehicle],
            ImportType::CompleteSystem => &[ItemKind::User, ItemKind::Vehicle],
        }
    }
}

impl std::str::FromStr for ImportType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "users_only" => Ok(ImportType::UsersOnly),
            "vehicles_only" => Ok(ImportType::VehiclesOnly),
            "complete_system" => Ok(ImportType::CompleteSystem),
            "selective" => Ok(ImportType::Selective),
            other => Err(format!("unknown import type: {other}")),
        }
    }
}

/// Options captured from the start request and stored with the job
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOptions {
    #[serde(default)]
    pub selected_usernames: Vec<String>,
    #[serde(default)]
    pub perform_cleanup: bool,
    #[serde(default)]
    pub preserve_admin_email: Option<String>,
}

/// Start-import request as accepted from callers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartImportRequest {
    pub import_type: ImportType,
    #[serde(default)]
    pub selected_usernames: Option<Vec<String>>,
    #[serde(default)]
    pub perform_cleanup: Option<bool>,
    #[serde(default)]
    pub preserve_admin_email: Option<String>,
    #[serde(default)]
    pub batch_size: Option<usize>,
    #[serde(default)]
    pub job_name: Option<String>,
}

impl StartImportRequest {
    pub fn new(import_type: ImportType) -> Self {
        Self {
            import_type,
            selected_usernames: None,
            perform_cleanup: None,
            preserve_admin_email: None,
            batch_size: None,
            job_name: None,
        }
    }

    pub fn with_batch_size(mut self, batch_size: usize) -> Self {
        self.batch_size = Some(batch_size);
        self
    }

    pub fn with_selection(mut self, usernames: Vec<String>) -> Self {
        self.selected_usernames = Some(usernames);
        self
    }

    pub fn with_cleanup(mut self, preserve_admin_email: Option<String>) -> Self {
        self.perform_cleanup = Some(true);
        self.preserve_admin_email = preserve_admin_email;
        self
    }
}

/// One terminally failed item
///
/// Written once, never mutated. The wire form uses `error` for the message
/// and accepts `username` in place of `item_identifier`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorLogEntry {
    #[serde(alias = "username")]
    pub item_identifier: String,
    #[serde(rename = "error", alias = "error_message")]
    pub error_message: String,
    pub timestamp: DateTime<Utc>,
    pub step: ImportStep,
    pub attempts: u32,
}

/// Stage of per-item processing where a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStep {
    Fetch,
    Validate,
    Write,
}

/// Import job (maps to the import_jobs table)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ImportJob {
    pub id: Uuid,
    pub job_name: String,
    pub status: JobStatus,
    pub import_type: ImportType,
    pub options: ImportOptions,
    pub total_items: u64,
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub current_chunk: u64,
    /// Chunks below this index have been handed to the processor
    pub dispatched_chunks: u64,
    pub total_chunks: u64,
    pub chunk_size: u64,
    pub error_log: Vec<ErrorLogEntry>,
    pub backup_tables: Vec<String>,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ImportJob {
    pub fn new(
        job_name: impl Into<String>,
        import_type: ImportType,
        options: ImportOptions,
        chunk_size: u64,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            job_name: job_name.into(),
            status: JobStatus::Pending,
            import_type,
            options,
            total_items: 0,
            processed_items: 0,
            successful_items: 0,
            failed_items: 0,
            current_chunk: 0,
            dispatched_chunks: 0,
            total_chunks: 0,
            chunk_size,
            error_log: Vec::new(),
            backup_tables: Vec::new(),
            last_error: None,
            created_at: now,
            updated_at: now,
            started_at: None,
            completed_at: None,
        }
    }

    /// Half-open item range `[start, end)` covered by chunk `index`
    pub fn chunk_bounds(&self, index: u64) -> (usize, usize) {
        let start = index.saturating_mul(self.chunk_size).min(self.total_items);
        let end = start.saturating_add(self.chunk_size).min(self.total_items);
        (start as usize, end as usize)
    }

    pub fn failure_ratio(&self) -> f64 {
        if self.processed_items == 0 {
            0.0
        } else {
            self.failed_items as f64 / self.processed_items as f64
        }
    }
}

/// `ceil(total_items / chunk_size)`
pub fn total_chunks(total_items: u64, chunk_size: u64) -> u64 {
    if chunk_size == 0 {
        return 0;
    }
    total_items.div_ceil(chunk_size)
}

/// Counters written after a chunk commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ProgressUpdate {
    pub processed_items: u64,
    pub successful_items: u64,
    pub failed_items: u64,
    pub current_chunk: u64,
}

impl From<&ImportJob> for ProgressUpdate {
    fn from(job: &ImportJob) -> Self {
        Self {
            processed_items: job.processed_items,
            successful_items: job.successful_items,
            failed_items: job.failed_items,
            current_chunk: job.current_chunk,
        }
    }
}

/// Why a chunk stopped before its last item
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkHalt {
    /// Pause/cancel observed at the top of an item's retry loop
    Interrupted,
    /// Credential or platform schema rejection; invalidates the whole job
    Fatal(String),
    /// Local store unavailable
    Structural(String),
}

/// Outcome of processing one chunk
#[derive(Debug, Clone, Default)]
pub struct ChunkResult {
    pub chunk_index: u64,
    pub success_count: u64,
    pub failure_count: u64,
    pub errors: Vec<ErrorLogEntry>,
    pub halt: Option<ChunkHalt>,
}

impl ChunkResult {
    pub fn new(chunk_index: u64) -> Self {
        Self {
            chunk_index,
            ..Default::default()
        }
    }

    pub fn processed(&self) -> u64 {
        self.success_count + self.failure_count
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self.halt, Some(ChunkHalt::Interrupted))
    }
}

/// Pre-image of one local record captured before the job wrote to it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupEntry {
    pub item: WorkItem,
    /// `None` when the record did not exist before the job
    pub pre_image: Option<serde_json::Value>,
}
