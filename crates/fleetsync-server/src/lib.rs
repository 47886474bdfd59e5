//! FleetSync Server Library
//!
//! Imports users and vehicles from a remote vehicle-tracking platform into
//! local storage.
//!
//! # Overview
//!
//! - **Import pipeline**: work is planned once per job, split into
//!   fixed-size chunks and processed with bounded concurrency; progress is
//!   committed in chunk order so a paused job resumes where it stopped
//! - **Health monitoring**: every platform call feeds a rolling window that
//!   throttles or pauses imports when the platform degrades
//! - **Backup and rollback**: pre-images of every record a job may touch
//!   are saved before the first write
//! - **API**: REST endpoints to start, inspect, pause, resume, abandon and
//!   roll back imports
//!
//! ## Framework Stack
//!
//! - **Axum**: HTTP API
//! - **SQLx**: PostgreSQL persistence and migrations
//! - **Reqwest**: platform client
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use fleetsync_server::config::ImportConfig;
//! use fleetsync_server::health::HealthMonitor;
//! use fleetsync_server::import::{
//!     ImportOrchestrator, ImportType, MemoryStore, PlatformClient, StartImportRequest, Stores,
//! };
//!
//! async fn run(client: Arc<dyn PlatformClient>) -> anyhow::Result<()> {
//!     let config = ImportConfig::default();
//!     let monitor = HealthMonitor::new(config.health.clone());
//!     let stores = Stores::shared(Arc::new(MemoryStore::new()));
//!     let orchestrator = ImportOrchestrator::new(config, stores, client, monitor);
//!
//!     let job = orchestrator
//!         .create_job(StartImportRequest::new(ImportType::UsersOnly))
//!         .await?;
//!     let job = orchestrator.execute(job.id).await?;
//!     println!("{} items imported", job.successful_items);
//!     Ok(())
//! }
//! ```

pub mod api;
pub mod config;
pub mod error;
pub mod health;
pub mod import;
pub mod middleware;

// Re-export commonly used types
pub use error::AppError;
