//! Import orchestration
//!
//! The orchestrator owns the job state machine. A run moves a job through
//! planning, backup and cleanup, then dispatches chunks to the
//! [`ChunkProcessor`] with a concurrency limit derived from platform health
//! and commits finished chunks strictly in chunk order.
//!
//! ```text
//! pending -> running -> paused | completed | completed_with_errors | failed
//! paused  -> running | failed
//! ```
//!
//! Every status change is a compare-and-swap in the [`JobStore`](super::store::JobStore), which is
//! what keeps a job to a single active run. Within this process, each run
//! is also registered in a live table holding its pause token and the
//! per-chunk counters that back progress polling.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::backup::{BackupManager, RollbackReport};
use super::chunk::{ChunkProcessor, RetryPolicy};
use super::client::PlatformClient;
use super::error::{ImportError, ImportResult};
use super::progress::{ImportProgress, LiveChunk};
use super::store::{StoreError, Stores};
use super::types::{
    ChunkHalt, ChunkResult, ImportJob, ImportOptions, ImportType, ItemKind, JobStatus,
    ProgressUpdate, StartImportRequest, WorkItem,
};
use crate::config::ImportConfig;
use crate::health::{HealthMetrics, HealthMonitor, HealthStatus};

const OPERATOR_PAUSE: &str = "Paused by operator";
const OPERATOR_ABANDON: &str = "Abandoned by operator";

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Why dispatch stopped before the plan was exhausted
#[derive(Debug)]
enum Stop {
    Pause(String),
    Fail(String),
}

/// In-process state of an active run
struct LiveRun {
    pause: CancellationToken,
    done: CancellationToken,
    preparing: AtomicBool,
    /// May send one chunk while the platform is unhealthy
    recovery_trial: bool,
    /// chunk index -> (items finished, chunk length)
    chunks: Mutex<BTreeMap<u64, (Arc<AtomicU64>, u64)>>,
}

impl LiveRun {
    fn new(recovery_trial: bool) -> Self {
        Self {
            pause: CancellationToken::new(),
            done: CancellationToken::new(),
            preparing: AtomicBool::new(true),
            recovery_trial,
            chunks: Mutex::new(BTreeMap::new()),
        }
    }

    fn track_chunk(&self, index: u64, len: usize) -> Arc<AtomicU64> {
        let counter = Arc::new(AtomicU64::new(0));
        lock(&self.chunks).insert(index, (counter.clone(), len as u64));
        counter
    }

    fn untrack_chunk(&self, index: u64) {
        lock(&self.chunks).remove(&index);
    }

    fn chunk(&self, index: u64) -> Option<LiveChunk> {
        lock(&self.chunks).get(&index).map(|(counter, len)| LiveChunk {
            finished_items: counter.load(Ordering::Relaxed),
            chunk_items: *len,
        })
    }
}

/// Removes the live entry and signals completion when a run ends
struct LiveGuard {
    inner: Arc<Inner>,
    id: Uuid,
    run: Arc<LiveRun>,
}

impl Drop for LiveGuard {
    fn drop(&mut self) {
        lock(&self.inner.live).remove(&self.id);
        self.run.done.cancel();
    }
}

struct Inner {
    config: ImportConfig,
    stores: Stores,
    monitor: HealthMonitor,
    processor: ChunkProcessor,
    backups: BackupManager,
    live: Mutex<HashMap<Uuid, Arc<LiveRun>>>,
}

/// Drives import jobs; cheap to clone
#[derive(Clone)]
pub struct ImportOrchestrator {
    inner: Arc<Inner>,
}

impl ImportOrchestrator {
    pub fn new(
        config: ImportConfig,
        stores: Stores,
        client: Arc<dyn PlatformClient>,
        monitor: HealthMonitor,
    ) -> Self {
        let processor = ChunkProcessor::new(
            client,
            stores.records.clone(),
            monitor.clone(),
            RetryPolicy::from(&config),
            config.item_concurrency,
        );
        let backups = BackupManager::new(
            stores.jobs.clone(),
            stores.backups.clone(),
            stores.records.clone(),
        );

        Self {
            inner: Arc::new(Inner {
                config,
                stores,
                monitor,
                processor,
                backups,
                live: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn monitor(&self) -> &HealthMonitor {
        &self.inner.monitor
    }

    pub fn config(&self) -> &ImportConfig {
        &self.inner.config
    }

    /// Validate a start request and store a `pending` job
    pub async fn create_job(&self, request: StartImportRequest) -> ImportResult<ImportJob> {
        let config = &self.inner.config;
        let chunk_size = config
            .resolve_batch_size(request.batch_size)
            .map_err(ImportError::InvalidRequest)?;

        let mut seen = HashSet::new();
        let selected: Vec<String> = request
            .selected_usernames
            .unwrap_or_default()
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty() && seen.insert(u.clone()))
            .collect();
        let perform_cleanup = request.perform_cleanup.unwrap_or(false);

        match request.import_type {
            ImportType::Selective if selected.is_empty() => {
                return Err(ImportError::InvalidRequest(
                    "selective import requires at least one selected username".to_string(),
                ));
            },
            ImportType::Selective if perform_cleanup => {
                return Err(ImportError::InvalidRequest(
                    "cleanup is not available for selective imports".to_string(),
                ));
            },
            ImportType::Selective => {},
            _ if !selected.is_empty() => {
                return Err(ImportError::InvalidRequest(format!(
                    "selectedUsernames only applies to selective imports, not {}",
                    request.import_type.as_str()
                )));
            },
            _ => {},
        }

        let preserve_admin_email = request
            .preserve_admin_email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());
        if let Some(ref email) = preserve_admin_email {
            if !email.contains('@') {
                return Err(ImportError::InvalidRequest(format!(
                    "preserveAdminEmail is not an email address: {email}"
                )));
            }
        }

        let job_name = request
            .job_name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| {
                format!(
                    "{} import {}",
                    request.import_type.as_str(),
                    chrono::Utc::now().format("%Y-%m-%d %H:%M")
                )
            });

        let job = ImportJob::new(
            job_name,
            request.import_type,
            ImportOptions {
                selected_usernames: selected,
                perform_cleanup,
                preserve_admin_email,
            },
            chunk_size as u64,
        );
        self.inner.stores.jobs.insert_job(&job).await?;

        info!(
            job_id = %job.id,
            import_type = job.import_type.as_str(),
            chunk_size,
            "Import job created"
        );
        Ok(job)
    }

    /// Create a job and run it in the background; returns its id at once
    pub async fn start_import(&self, request: StartImportRequest) -> ImportResult<Uuid> {
        let job = self.create_job(request).await?;
        let id = job.id;
        let guard = self.register(id, false)?;

        let inner = self.inner.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.start(job, guard).await {
                error!(job_id = %id, error = %e, "Import run ended with an error");
            }
        });

        Ok(id)
    }

    /// Run a `pending` job in the current task until it comes to rest
    pub async fn execute(&self, id: Uuid) -> ImportResult<ImportJob> {
        let job = self.inner.stores.jobs.get_job(id).await?;
        let guard = self.register(id, false)?;
        self.inner.start(job, guard).await
    }

    /// Ask a running job to pause and wait until it has stopped
    ///
    /// Pausing a paused job is a no-op. In-flight chunks are interrupted at
    /// their next retry boundary and re-run on resume.
    pub async fn pause(&self, id: Uuid) -> ImportResult<ImportJob> {
        let job = self.inner.stores.jobs.get_job(id).await?;
        match job.status {
            JobStatus::Paused => return Ok(job),
            JobStatus::Running | JobStatus::Pending => {},
            status => return Err(ImportError::invalid_state(id, status, "pause")),
        }

        if let Some(run) = self.live_run(id) {
            info!(job_id = %id, "Pause requested");
            run.pause.cancel();
            run.done.cancelled().await;
            return Ok(self.inner.stores.jobs.get_job(id).await?);
        }

        if job.status == JobStatus::Pending {
            return Err(ImportError::invalid_state(id, job.status, "pause"));
        }

        // Running with no run in this process, e.g. left over from a restart
        warn!(job_id = %id, "Pausing job without an active run");
        Ok(self
            .inner
            .stores
            .jobs
            .transition(id, JobStatus::Running, JobStatus::Paused, Some(OPERATOR_PAUSE.to_string()))
            .await?)
    }

    /// Resume a paused job in the background from its last committed chunk
    ///
    /// Resuming a running job is a no-op. If the platform is still
    /// unhealthy, the resumed run sends a single trial chunk and pauses
    /// again only if health has not recovered once it commits.
    pub async fn resume(&self, id: Uuid) -> ImportResult<ImportJob> {
        let job = self.inner.stores.jobs.get_job(id).await?;
        match job.status {
            JobStatus::Running => return Ok(job),
            JobStatus::Paused => {},
            status => return Err(ImportError::invalid_state(id, status, "resume")),
        }

        // A run that just paused may still be unregistering
        if let Some(run) = self.live_run(id) {
            run.done.cancelled().await;
        }

        let guard = self.register(id, true)?;
        let job = self
            .inner
            .stores
            .jobs
            .transition(id, JobStatus::Paused, JobStatus::Running, None)
            .await?;
        info!(job_id = %id, from_chunk = job.current_chunk, "Import resumed");

        let inner = self.inner.clone();
        let running = job.clone();
        tokio::spawn(async move {
            if let Err(e) = inner.drive(running, guard).await {
                error!(job_id = %id, error = %e, "Resumed run ended with an error");
            }
        });

        Ok(job)
    }

    /// Give up on a paused job
    pub async fn abandon(&self, id: Uuid) -> ImportResult<ImportJob> {
        let job = self.inner.stores.jobs.get_job(id).await?;
        if job.status != JobStatus::Paused {
            return Err(ImportError::invalid_state(id, job.status, "abandon"));
        }
        if let Some(run) = self.live_run(id) {
            run.done.cancelled().await;
        }

        let job = self
            .inner
            .stores
            .jobs
            .transition(id, JobStatus::Paused, JobStatus::Failed, Some(OPERATOR_ABANDON.to_string()))
            .await?;
        info!(job_id = %id, "Import abandoned");
        Ok(job)
    }

    /// Wait for the active run of `id`, if any, then return the job
    pub async fn wait(&self, id: Uuid) -> ImportResult<ImportJob> {
        if let Some(run) = self.live_run(id) {
            run.done.cancelled().await;
        }
        Ok(self.inner.stores.jobs.get_job(id).await?)
    }

    pub async fn progress(&self, id: Uuid) -> ImportResult<ImportProgress> {
        let job = self.inner.stores.jobs.get_job(id).await?;
        let (preparing, live_chunk) = match self.live_run(id) {
            Some(run) => (
                run.preparing.load(Ordering::Relaxed),
                run.chunk(job.current_chunk),
            ),
            None => (false, None),
        };
        Ok(ImportProgress::from_job(&job, preparing, live_chunk))
    }

    pub async fn get_job(&self, id: Uuid) -> ImportResult<ImportJob> {
        Ok(self.inner.stores.jobs.get_job(id).await?)
    }

    pub async fn list_jobs(&self, limit: usize) -> ImportResult<Vec<ImportJob>> {
        Ok(self.inner.stores.jobs.list_jobs(limit).await?)
    }

    /// Restore local records from the job's backup
    pub async fn rollback(&self, id: Uuid) -> ImportResult<RollbackReport> {
        self.inner.backups.rollback(id).await
    }

    /// Pause every active run and wait for them to stop
    pub async fn shutdown(&self) {
        let runs: Vec<(Uuid, Arc<LiveRun>)> = lock(&self.inner.live)
            .iter()
            .map(|(id, run)| (*id, run.clone()))
            .collect();

        for (id, run) in &runs {
            info!(job_id = %id, "Pausing import for shutdown");
            run.pause.cancel();
        }
        for (_, run) in runs {
            run.done.cancelled().await;
        }
    }

    pub fn active_runs(&self) -> usize {
        lock(&self.inner.live).len()
    }

    fn live_run(&self, id: Uuid) -> Option<Arc<LiveRun>> {
        lock(&self.inner.live).get(&id).cloned()
    }

    fn register(&self, id: Uuid, recovery_trial: bool) -> ImportResult<LiveGuard> {
        let mut live = lock(&self.inner.live);
        if live.contains_key(&id) {
            return Err(ImportError::AlreadyActive(id));
        }
        let run = Arc::new(LiveRun::new(recovery_trial));
        live.insert(id, run.clone());
        Ok(LiveGuard {
            inner: self.inner.clone(),
            id,
            run,
        })
    }
}

impl Inner {
    /// `pending -> running`, then drive
    async fn start(&self, job: ImportJob, guard: LiveGuard) -> ImportResult<ImportJob> {
        let job = self
            .stores
            .jobs
            .transition(job.id, JobStatus::Pending, JobStatus::Running, None)
            .await?;
        info!(job_id = %job.id, "Import started");
        self.drive(job, guard).await
    }

    /// Run a `running` job until it pauses or reaches a terminal status
    async fn drive(&self, job: ImportJob, guard: LiveGuard) -> ImportResult<ImportJob> {
        let id = job.id;
        let outcome = match self.run(job, &guard.run).await {
            Ok(job) => Ok(job),
            Err(e) => {
                error!(job_id = %id, error = %e, "Import failed");
                match self
                    .stores
                    .jobs
                    .transition(id, JobStatus::Running, JobStatus::Failed, Some(e.to_string()))
                    .await
                {
                    Ok(job) => Ok(job),
                    Err(te) => {
                        error!(job_id = %id, error = %te, "Could not record import failure");
                        Err(e)
                    },
                }
            },
        };

        // Waiters wake only once the final status is stored
        drop(guard);
        outcome
    }

    async fn run(&self, job: ImportJob, live: &LiveRun) -> ImportResult<ImportJob> {
        let id = job.id;
        live.preparing.store(true, Ordering::Relaxed);

        if live.pause.is_cancelled() {
            return self.settle(id, Some(Stop::Pause(OPERATOR_PAUSE.to_string())), false).await;
        }

        let (job, plan) = self.prepare_plan(job).await?;
        if job.total_items == 0 {
            info!(job_id = %id, "Nothing to import");
            return Ok(self
                .stores
                .jobs
                .transition(id, JobStatus::Running, JobStatus::Completed, None)
                .await?);
        }

        let cleanup = if cleanup_enabled(&job) && job.processed_items == 0 {
            self.cleanup_candidates(&job, &plan).await?
        } else {
            Vec::new()
        };

        let job = if job.backup_tables.is_empty() {
            let mut covered = plan.clone();
            covered.extend(cleanup.iter().cloned());
            self.backups.snapshot(&job, &covered).await?;
            self.stores.jobs.get_job(id).await?
        } else {
            job
        };

        self.apply_cleanup(id, &cleanup).await?;
        live.preparing.store(false, Ordering::Relaxed);

        self.dispatch(job, &plan, live).await
    }

    async fn prepare_plan(&self, job: ImportJob) -> ImportResult<(ImportJob, Vec<WorkItem>)> {
        if let Some(plan) = self.stores.jobs.load_plan(job.id).await? {
            if plan.len() as u64 != job.total_items {
                return Err(StoreError::Corrupt(format!(
                    "plan of job {} has {} items, expected {}",
                    job.id,
                    plan.len(),
                    job.total_items
                ))
                .into());
            }
            return Ok((job, plan));
        }

        let items = match job.import_type {
            ImportType::Selective => job
                .options
                .selected_usernames
                .iter()
                .map(WorkItem::user)
                .collect(),
            import_type => {
                let mut items = Vec::new();
                for &kind in import_type.kinds() {
                    let mut seen = HashSet::new();
                    let ids = self.processor.list_identifiers(kind).await?;
                    items.extend(
                        ids.into_iter()
                            .filter(|id| seen.insert(id.clone()))
                            .map(|identifier| WorkItem { kind, identifier }),
                    );
                }
                items
            },
        };

        let job = self.stores.jobs.save_plan(job.id, &items).await?;
        info!(
            job_id = %job.id,
            total_items = job.total_items,
            total_chunks = job.total_chunks,
            "Import planned"
        );
        Ok((job, items))
    }

    /// Local records of the imported kinds that the platform no longer has
    async fn cleanup_candidates(&self, job: &ImportJob, plan: &[WorkItem]) -> ImportResult<Vec<WorkItem>> {
        let planned: HashSet<&WorkItem> = plan.iter().collect();
        let mut candidates = Vec::new();
        for &kind in job.import_type.kinds() {
            for identifier in self.stores.records.list_identifiers(kind).await? {
                let item = WorkItem { kind, identifier };
                if !planned.contains(&item) {
                    candidates.push(item);
                }
            }
        }

        if let Some(ref admin) = job.options.preserve_admin_email {
            let users: Vec<WorkItem> = candidates
                .iter()
                .filter(|i| i.kind == ItemKind::User)
                .cloned()
                .collect();
            let existing = self.stores.records.get_many(&users).await?;
            candidates.retain(|item| {
                let email = existing
                    .get(item)
                    .and_then(|r| r.get("email"))
                    .and_then(Value::as_str);
                !email.is_some_and(|e| e.eq_ignore_ascii_case(admin))
            });
        }

        Ok(candidates)
    }

    async fn apply_cleanup(&self, id: Uuid, candidates: &[WorkItem]) -> ImportResult<()> {
        if candidates.is_empty() {
            return Ok(());
        }
        let mut removed = 0u64;
        for item in candidates {
            if self.stores.records.delete(item).await? {
                removed += 1;
            }
        }
        info!(job_id = %id, removed, "Cleanup removed stale local records");
        Ok(())
    }

    async fn dispatch(&self, job: ImportJob, plan: &[WorkItem], live: &LiveRun) -> ImportResult<ImportJob> {
        let id = job.id;
        let total = job.total_chunks;
        let halt = live.pause.child_token();

        let mut committed = ProgressUpdate::from(&job);
        let mut next_dispatch = job.current_chunk;
        let mut commit_open = true;
        let mut stop: Option<Stop> = None;
        let mut finished: BTreeMap<u64, ChunkResult> = BTreeMap::new();
        let mut in_flight = FuturesUnordered::new();
        let mut trial_ready = live.recovery_trial;
        let mut trial_chunk: Option<u64> = None;

        loop {
            while stop.is_none() && next_dispatch < total {
                if live.pause.is_cancelled() {
                    stop = Some(Stop::Pause(OPERATOR_PAUSE.to_string()));
                    break;
                }

                let health = self.monitor.get_health_metrics();
                if health.status == HealthStatus::Unhealthy && trial_chunk.is_some() {
                    break;
                }
                if health.status == HealthStatus::Unhealthy && trial_ready && in_flight.is_empty() {
                    info!(
                        job_id = %id,
                        chunk = next_dispatch,
                        "Platform unhealthy, trying a single chunk"
                    );
                    trial_ready = false;
                    trial_chunk = Some(next_dispatch);
                } else if health.status == HealthStatus::Unhealthy {
                    warn!(
                        job_id = %id,
                        chunk = next_dispatch,
                        success_rate = health.success_rate,
                        consecutive_failures = health.consecutive_failures,
                        "Platform unhealthy, pausing import"
                    );
                    stop = Some(Stop::Pause(format!(
                        "Platform unhealthy (success rate {:.0}%, {} consecutive failures)",
                        health.success_rate * 100.0,
                        health.consecutive_failures
                    )));
                    break;
                } else if in_flight.len() >= chunk_concurrency(self.config.max_concurrent_chunks, &health) {
                    break;
                }

                let index = next_dispatch;
                if let Err(e) = self.stores.jobs.mark_dispatched(id, index + 1).await {
                    halt.cancel();
                    stop = Some(Stop::Fail(format!("Failed to record dispatch of chunk {index}: {e}")));
                    break;
                }
                let (start, end) = job.chunk_bounds(index);
                let items = &plan[start..end];
                let counter = live.track_chunk(index, items.len());
                let token = halt.clone();
                let processor = &self.processor;
                in_flight.push(async move {
                    processor.process_chunk(id, index, items, &token, &counter).await
                });
                next_dispatch += 1;
            }

            let Some(result) = in_flight.next().await else {
                break;
            };
            if trial_chunk == Some(result.chunk_index) {
                trial_chunk = None;
            }
            finished.insert(result.chunk_index, result);

            while commit_open {
                let Some(result) = finished.remove(&committed.current_chunk) else {
                    break;
                };
                live.untrack_chunk(result.chunk_index);

                match result.halt {
                    Some(ChunkHalt::Interrupted) => {
                        commit_open = false;
                        stop.get_or_insert_with(|| Stop::Pause(OPERATOR_PAUSE.to_string()));
                    },
                    Some(ChunkHalt::Structural(ref reason)) => {
                        commit_open = false;
                        halt.cancel();
                        stop = Some(Stop::Fail(format!(
                            "Local store failure in chunk {}: {reason}",
                            result.chunk_index
                        )));
                    },
                    Some(ChunkHalt::Fatal(ref reason)) => {
                        commit_open = false;
                        halt.cancel();
                        let progress = fold(committed, &result, false);
                        if self.stores.jobs.save_progress(id, progress, &result.errors).await.is_ok() {
                            committed = progress;
                        }
                        stop = Some(Stop::Fail(format!(
                            "Platform rejected import in chunk {}: {reason}",
                            result.chunk_index
                        )));
                    },
                    None => {
                        let progress = fold(committed, &result, true);
                        match self.stores.jobs.save_progress(id, progress, &result.errors).await {
                            Ok(_) => {
                                committed = progress;
                                info!(
                                    job_id = %id,
                                    chunk = result.chunk_index,
                                    processed = committed.processed_items,
                                    failed = committed.failed_items,
                                    "Chunk committed"
                                );
                            },
                            Err(e) => {
                                commit_open = false;
                                halt.cancel();
                                stop = Some(Stop::Fail(format!("Failed to persist progress: {e}")));
                                continue;
                            },
                        }

                        let failure_ratio = ratio(committed.failed_items, committed.processed_items);
                        if failure_ratio > self.config.max_failure_ratio {
                            commit_open = false;
                            halt.cancel();
                            stop = Some(Stop::Fail(format!(
                                "Failure ratio {:.2} exceeded limit {:.2}",
                                failure_ratio, self.config.max_failure_ratio
                            )));
                        }
                    },
                }
            }
        }

        let job = self.settle(id, stop, committed.current_chunk >= total).await?;
        info!(
            job_id = %id,
            status = job.status.as_str(),
            processed = job.processed_items,
            failed = job.failed_items,
            "Import run finished"
        );
        Ok(job)
    }

    /// Final transition of a run
    async fn settle(&self, id: Uuid, stop: Option<Stop>, complete: bool) -> ImportResult<ImportJob> {
        let jobs = &self.stores.jobs;
        let job = match stop {
            Some(Stop::Fail(reason)) => {
                jobs.transition(id, JobStatus::Running, JobStatus::Failed, Some(reason))
                    .await?
            },
            _ if complete => {
                let current = jobs.get_job(id).await?;
                let status = if current.failed_items == 0 {
                    JobStatus::Completed
                } else {
                    JobStatus::CompletedWithErrors
                };
                jobs.transition(id, JobStatus::Running, status, None).await?
            },
            Some(Stop::Pause(reason)) => {
                jobs.transition(id, JobStatus::Running, JobStatus::Paused, Some(reason))
                    .await?
            },
            None => {
                jobs.transition(
                    id,
                    JobStatus::Running,
                    JobStatus::Paused,
                    Some("Dispatch stopped unexpectedly".to_string()),
                )
                .await?
            },
        };
        Ok(job)
    }
}

/// Chunks allowed in flight under `health`, for a configured limit of `k`
fn chunk_concurrency(k: usize, health: &HealthMetrics) -> usize {
    let k = k.max(1);
    if health.recovering {
        1
    } else if health.status == HealthStatus::Degraded {
        k.div_ceil(2)
    } else {
        k
    }
}

fn cleanup_enabled(job: &ImportJob) -> bool {
    job.options.perform_cleanup && job.import_type != ImportType::Selective
}

fn ratio(numerator: u64, denominator: u64) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}

/// Counters after committing `result` on top of `committed`
fn fold(committed: ProgressUpdate, result: &ChunkResult, advance: bool) -> ProgressUpdate {
    ProgressUpdate {
        processed_items: committed.processed_items + result.processed(),
        successful_items: committed.successful_items + result.success_count,
        failed_items: committed.failed_items + result.failure_count,
        current_chunk: if advance {
            committed.current_chunk + 1
        } else {
            committed.current_chunk
        },
    }
}
