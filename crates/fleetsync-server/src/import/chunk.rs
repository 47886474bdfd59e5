//! Chunk execution
//!
//! A chunk is a contiguous slice of the job plan. Each item is fetched from
//! the platform (with timeout and retry), validated, then written to the
//! local record store. Items run concurrently up to `item_concurrency`;
//! their outcomes are folded in item order so counters and the error log
//! have a single writer.

use futures::stream::{self, StreamExt};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

use super::client::{validate_record, ClientError, PlatformClient};
use super::store::LocalRecordStore;
use super::types::{ChunkHalt, ChunkResult, ErrorLogEntry, ImportStep, ItemKind, WorkItem};
use crate::config::ImportConfig;
use crate::health::HealthMonitor;

/// Retry and timeout policy for platform calls
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
    pub call_timeout: Duration,
}

impl RetryPolicy {
    /// Backoff before attempt `attempt + 1`: `base * 2^(attempt - 1)`, capped
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

impl From<&ImportConfig> for RetryPolicy {
    fn from(config: &ImportConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            base_delay: config.retry_base_delay(),
            max_delay: config.retry_max_delay(),
            call_timeout: config.call_timeout(),
        }
    }
}

enum ItemOutcome {
    Imported,
    Failed(ErrorLogEntry),
    /// Item is recorded as failed and the rest of the chunk is abandoned
    Halted(ErrorLogEntry, ChunkHalt),
    Interrupted,
}

fn failure(item: &WorkItem, step: ImportStep, message: impl Into<String>, attempts: u32) -> ErrorLogEntry {
    ErrorLogEntry {
        item_identifier: item.key(),
        error_message: message.into(),
        timestamp: chrono::Utc::now(),
        step,
        attempts,
    }
}

/// Executes chunks against the platform adapter
pub struct ChunkProcessor {
    client: Arc<dyn PlatformClient>,
    records: Arc<dyn LocalRecordStore>,
    monitor: HealthMonitor,
    policy: RetryPolicy,
    item_concurrency: usize,
}

impl ChunkProcessor {
    pub fn new(
        client: Arc<dyn PlatformClient>,
        records: Arc<dyn LocalRecordStore>,
        monitor: HealthMonitor,
        policy: RetryPolicy,
        item_concurrency: usize,
    ) -> Self {
        Self {
            client,
            records,
            monitor,
            policy,
            item_concurrency: item_concurrency.max(1),
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Process `items` as chunk `chunk_index` of `job_id`
    ///
    /// `finished` is incremented once per item folded into the result and
    /// backs live chunk progress. Cancelling `cancel` interrupts the chunk
    /// at the next retry-loop boundary.
    ///
    /// Once the chunk halts no further item is started. Items already in
    /// flight run to their next retry boundary and their outcomes are
    /// discarded; their platform calls still reach the health monitor.
    pub async fn process_chunk(
        &self,
        job_id: Uuid,
        chunk_index: u64,
        items: &[WorkItem],
        cancel: &CancellationToken,
        finished: &AtomicU64,
    ) -> ChunkResult {
        let mut result = ChunkResult::new(chunk_index);
        let stop = cancel.child_token();

        let mut outcomes = stream::iter(0..items.len())
            .map(|i| self.process_item(&items[i], &stop))
            .buffered(self.item_concurrency);

        while let Some(outcome) = outcomes.next().await {
            if result.halt.is_some() {
                continue;
            }
            match outcome {
                ItemOutcome::Imported => result.success_count += 1,
                ItemOutcome::Failed(entry) => {
                    result.failure_count += 1;
                    result.errors.push(entry);
                },
                ItemOutcome::Halted(entry, halt) => {
                    error!(
                        job_id = %job_id,
                        chunk = chunk_index,
                        item = %entry.item_identifier,
                        error = %entry.error_message,
                        "Chunk halted"
                    );
                    result.failure_count += 1;
                    result.errors.push(entry);
                    result.halt = Some(halt);
                    stop.cancel();
                },
                ItemOutcome::Interrupted => {
                    debug!(job_id = %job_id, chunk = chunk_index, "Chunk interrupted");
                    result.halt = Some(ChunkHalt::Interrupted);
                    stop.cancel();
                    continue;
                },
            }
            finished.fetch_add(1, Ordering::Relaxed);
        }

        debug!(
            job_id = %job_id,
            chunk = chunk_index,
            succeeded = result.success_count,
            failed = result.failure_count,
            "Chunk processed"
        );
        result
    }

    async fn process_item(&self, item: &WorkItem, cancel: &CancellationToken) -> ItemOutcome {
        let mut attempt = 0u32;

        let record = loop {
            if cancel.is_cancelled() {
                return ItemOutcome::Interrupted;
            }
            attempt += 1;

            match self.observed(self.client.fetch(item)).await {
                Ok(record) => break record,
                Err(e) if e.is_fatal() => {
                    return ItemOutcome::Halted(
                        failure(item, ImportStep::Fetch, e.to_string(), 1),
                        ChunkHalt::Fatal(e.to_string()),
                    );
                },
                Err(e @ ClientError::Validation(_)) => {
                    return ItemOutcome::Failed(failure(item, ImportStep::Validate, e.to_string(), attempt));
                },
                Err(e) if attempt >= self.policy.max_attempts => {
                    warn!(
                        item = %item,
                        attempts = attempt,
                        error = %e,
                        "Giving up on item after retries"
                    );
                    return ItemOutcome::Failed(failure(item, ImportStep::Fetch, e.to_string(), attempt));
                },
                Err(e) => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        item = %item,
                        attempt,
                        max_attempts = self.policy.max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Recoverable platform error, retrying"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return ItemOutcome::Interrupted,
                        _ = tokio::time::sleep(delay) => {},
                    }
                },
            }
        };

        if let Err(reason) = validate_record(item, &record) {
            return ItemOutcome::Failed(failure(item, ImportStep::Validate, reason, attempt));
        }

        match self.records.upsert(item, &record).await {
            Ok(()) => ItemOutcome::Imported,
            Err(e) if e.is_structural() => ItemOutcome::Halted(
                failure(item, ImportStep::Write, e.to_string(), attempt),
                ChunkHalt::Structural(e.to_string()),
            ),
            Err(e) => ItemOutcome::Failed(failure(item, ImportStep::Write, e.to_string(), attempt)),
        }
    }

    /// List platform identifiers of `kind`, retrying recoverable errors
    pub async fn list_identifiers(&self, kind: ItemKind) -> Result<Vec<String>, ClientError> {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match self.observed(self.client.list(kind)).await {
                Ok(ids) => return Ok(ids),
                Err(e) if e.is_recoverable() && attempt < self.policy.max_attempts => {
                    let delay = self.policy.delay_after(attempt);
                    warn!(
                        kind = kind.as_str(),
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "Listing failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                },
                Err(e) => return Err(e),
            }
        }
    }

    /// One platform call, bounded by the call timeout and reported to the monitor
    pub async fn observed<T, F>(&self, call: F) -> Result<T, ClientError>
    where
        F: Future<Output = Result<T, ClientError>>,
    {
        let started = Instant::now();
        let result = match tokio::time::timeout(self.policy.call_timeout, call).await {
            Ok(result) => result,
            Err(_) => Err(ClientError::Timeout(self.policy.call_timeout)),
        };
        let latency = started.elapsed();

        match &result {
            Ok(_) => self.monitor.record_outcome(true, latency, None),
            Err(e) if e.counts_as_platform_success() => self.monitor.record_outcome(true, latency, None),
            Err(e) => self.monitor.record_outcome(false, latency, Some(e.kind())),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::import::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::{HashMap, VecDeque};
    use std::sync::Mutex;

    #[derive(Default)]
    struct ScriptedClient {
        scripts: Mutex<HashMap<String, VecDeque<Result<Value, ClientError>>>>,
        calls: AtomicU64,
        hang: bool,
        slow: Option<(String, Duration)>,
    }

    impl ScriptedClient {
        fn script(self, username: &str, outcomes: Vec<Result<Value, ClientError>>) -> Self {
            self.scripts
                .lock()
                .unwrap()
                .insert(username.to_string(), outcomes.into());
            self
        }
    }

    #[async_trait]
    impl PlatformClient for ScriptedClient {
        async fn list(&self, _kind: ItemKind) -> Result<Vec<String>, ClientError> {
            Ok(vec![])
        }

        async fn fetch(&self, item: &WorkItem) -> Result<Value, ClientError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.hang {
                futures::future::pending::<()>().await;
            }
            if let Some((ref name, delay)) = self.slow {
                if *name == item.identifier {
                    tokio::time::sleep(delay).await;
                }
            }
            let scripted = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&item.identifier)
                .and_then(VecDeque::pop_front);
            scripted.unwrap_or_else(|| Ok(json!({"username": item.identifier, "email": "x@fleet.io"})))
        }
    }

    fn policy() -> RetryPolicy {
        RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            call_timeout: Duration::from_secs(5),
        }
    }

    fn users(n: usize) -> Vec<WorkItem> {
        (0..n).map(|i| WorkItem::user(format!("u{i}"))).collect()
    }

    fn processor(client: ScriptedClient, store: Arc<MemoryStore>, monitor: HealthMonitor) -> ChunkProcessor {
        ChunkProcessor::new(Arc::new(client), store, monitor, policy(), 2)
    }

    #[test]
    fn test_backoff_is_exponential_and_capped() {
        let p = policy();
        assert_eq!(p.delay_after(1), Duration::from_millis(100));
        assert_eq!(p.delay_after(2), Duration::from_millis(200));
        assert_eq!(p.delay_after(3), Duration::from_millis(400));
        assert_eq!(p.delay_after(10), Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_recoverable_error_is_retried() {
        let client = ScriptedClient::default().script(
            "u1",
            vec![Err(ClientError::RateLimited), Err(ClientError::Server("502".into()))],
        );
        let store = Arc::new(MemoryStore::new());
        let monitor = HealthMonitor::default();
        let processor = processor(client, store.clone(), monitor.clone());

        let finished = AtomicU64::new(0);
        let result = processor
            .process_chunk(Uuid::new_v4(), 0, &users(3), &CancellationToken::new(), &finished)
            .await;

        assert_eq!(result.success_count, 3);
        assert_eq!(result.failure_count, 0);
        assert!(result.halt.is_none());
        assert_eq!(finished.load(Ordering::SeqCst), 3);
        assert_eq!(store.records().await.len(), 3);

        let metrics = monitor.get_health_metrics();
        assert_eq!(metrics.total_requests, 5);
        assert_eq!(metrics.error_count, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_retries_record_attempts() {
        let client = ScriptedClient::default().script(
            "u0",
            vec![
                Err(ClientError::Network("reset".into())),
                Err(ClientError::Network("reset".into())),
                Err(ClientError::Network("reset".into())),
            ],
        );
        let store = Arc::new(MemoryStore::new());
        let processor = processor(client, store, HealthMonitor::default());

        let result = processor
            .process_chunk(Uuid::new_v4(), 0, &users(2), &CancellationToken::new(), &AtomicU64::new(0))
            .await;

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.errors[0].item_identifier, "user:u0");
        assert_eq!(result.errors[0].attempts, 3);
        assert_eq!(result.errors[0].step, ImportStep::Fetch);
    }

    #[tokio::test]
    async fn test_validation_is_not_retried() {
        let client = ScriptedClient::default()
            .script("u0", vec![Err(ClientError::Validation("404".into()))])
            .script("u1", vec![Ok(json!({"username": "u1", "email": "broken"}))]);
        let store = Arc::new(MemoryStore::new());
        let monitor = HealthMonitor::default();
        let processor = processor(client, store, monitor.clone());

        let result = processor
            .process_chunk(Uuid::new_v4(), 0, &users(3), &CancellationToken::new(), &AtomicU64::new(0))
            .await;

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 2);
        assert!(result.errors.iter().all(|e| e.attempts == 1 && e.step == ImportStep::Validate));
        assert_eq!(monitor.get_health_metrics().error_count, 0);
    }

    #[tokio::test]
    async fn test_fatal_error_halts_chunk() {
        let client = ScriptedClient::default()
            .script("u1", vec![Err(ClientError::Unauthorized("401".into()))]);
        let store = Arc::new(MemoryStore::new());
        let processor = ChunkProcessor::new(
            Arc::new(client),
            store,
            HealthMonitor::default(),
            policy(),
            1,
        );

        let result = processor
            .process_chunk(Uuid::new_v4(), 4, &users(5), &CancellationToken::new(), &AtomicU64::new(0))
            .await;

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.errors[0].attempts, 1);
        assert!(matches!(result.halt, Some(ChunkHalt::Fatal(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_halt_lets_started_items_finish() {
        let client = ScriptedClient {
            slow: Some(("u1".to_string(), Duration::from_millis(50))),
            ..Default::default()
        }
        .script("u0", vec![Err(ClientError::Unauthorized("401".into()))]);
        let client = Arc::new(client);
        let store = Arc::new(MemoryStore::new());
        let monitor = HealthMonitor::default();
        let processor = ChunkProcessor::new(client.clone(), store.clone(), monitor.clone(), policy(), 2);

        let result = processor
            .process_chunk(Uuid::new_v4(), 0, &users(4), &CancellationToken::new(), &AtomicU64::new(0))
            .await;

        assert!(matches!(result.halt, Some(ChunkHalt::Fatal(_))));
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.success_count, 0);

        // u1 was already fetching; u2 and u3 never started
        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(monitor.get_health_metrics().total_requests, 2);
        assert!(store.records().await.contains_key(&WorkItem::user("u1")));
    }

    #[tokio::test]
    async fn test_cancelled_chunk_is_interrupted() {
        let store = Arc::new(MemoryStore::new());
        let processor = processor(ScriptedClient::default(), store.clone(), HealthMonitor::default());
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = processor
            .process_chunk(Uuid::new_v4(), 0, &users(4), &cancel, &AtomicU64::new(0))
            .await;

        assert!(result.is_interrupted());
        assert_eq!(result.processed(), 0);
        assert!(store.records().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_call_timeout_counts_as_recoverable() {
        let client = ScriptedClient {
            hang: true,
            ..Default::default()
        };
        let store = Arc::new(MemoryStore::new());
        let monitor = HealthMonitor::default();
        let processor = ChunkProcessor::new(Arc::new(client), store, monitor.clone(), policy(), 1);

        let result = processor
            .process_chunk(Uuid::new_v4(), 0, &users(1), &CancellationToken::new(), &AtomicU64::new(0))
            .await;

        assert_eq!(result.failure_count, 1);
        assert_eq!(result.errors[0].attempts, 3);
        assert!(result.errors[0].error_message.contains("timed out"));
        assert_eq!(monitor.get_health_metrics().consecutive_failures, 3);
    }
}
