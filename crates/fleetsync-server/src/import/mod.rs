//! Chunked import of users and vehicles from the tracking platform
//!
//! - **types**: work items, jobs, requests and chunk results
//! - **client**: platform adapter trait, error taxonomy and the HTTP client
//! - **store**: job, backup and local-record store traits
//! - **memory** / **postgres**: store implementations
//! - **chunk**: per-chunk item processing with retries
//! - **backup**: pre-image snapshots and rollback
//! - **progress**: derived progress view
//! - **orchestrator**: job state machine, dispatch and commit

pub mod backup;
pub mod chunk;
pub mod client;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod postgres;
pub mod progress;
pub mod store;
pub mod types;

pub use backup::{backup_table_name, BackupManager, RollbackReport};
pub use chunk::{ChunkProcessor, RetryPolicy};
pub use client::{validate_record, ClientError, ErrorClass, HttpPlatformClient, PlatformClient};
pub use error::{ImportError, ImportResult};
pub use memory::MemoryStore;
pub use orchestrator::ImportOrchestrator;
pub use postgres::PgStore;
pub use progress::{ImportProgress, LiveChunk, ProgressPhase};
pub use store::{BackupStore, JobStore, LocalRecordStore, StoreError, StoreResult, Stores};
pub use types::{
    BackupEntry, ChunkHalt, ChunkResult, ErrorLogEntry, ImportJob, ImportOptions, ImportStep,
    ImportType, ItemKind, JobStatus, ProgressUpdate, StartImportRequest, WorkItem,
};
