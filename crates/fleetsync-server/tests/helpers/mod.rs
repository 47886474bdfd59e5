//! Test helpers for FleetSync server integration tests
//!
//! - [`FakePlatform`]: scripted in-process platform with per-item outcomes
//!   and gates that hold fetches until released
//! - [`FlakyRecords`]: local-record store that can be switched off
//! - builders for an orchestrator over a [`MemoryStore`]

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Semaphore;
use uuid::Uuid;

use fleetsync_server::config::ImportConfig;
use fleetsync_server::health::HealthMonitor;
use fleetsync_server::import::{
    ClientError, ImportJob, ImportOrchestrator, ItemKind, LocalRecordStore, MemoryStore,
    PlatformClient, StoreError, StoreResult, Stores, WorkItem,
};

/// Default platform record for an item
pub fn record_for(item: &WorkItem) -> Value {
    match item.kind {
        ItemKind::User => json!({
            "username": item.identifier,
            "email": format!("{}@fleet.io", item.identifier),
        }),
        ItemKind::Vehicle => json!({
            "id": item.identifier,
            "name": format!("Truck {}", item.identifier),
        }),
    }
}

pub fn usernames(prefix: &str, n: usize) -> Vec<String> {
    (0..n).map(|i| format!("{prefix}{i}")).collect()
}

/// Scripted tracking platform
pub struct FakePlatform {
    users: Mutex<Vec<String>>,
    vehicles: Mutex<Vec<String>>,
    scripts: Mutex<HashMap<String, VecDeque<Result<Value, ClientError>>>>,
    gated: Mutex<HashSet<String>>,
    gate: Semaphore,
    waiting: AtomicUsize,
    fetches: AtomicUsize,
}

impl FakePlatform {
    pub fn new() -> Self {
        Self {
            users: Mutex::new(Vec::new()),
            vehicles: Mutex::new(Vec::new()),
            scripts: Mutex::new(HashMap::new()),
            gated: Mutex::new(HashSet::new()),
            gate: Semaphore::new(0),
            waiting: AtomicUsize::new(0),
            fetches: AtomicUsize::new(0),
        }
    }

    pub fn with_users(self, users: Vec<String>) -> Self {
        *self.users.lock().unwrap() = users;
        self
    }

    pub fn with_vehicles(self, vehicles: Vec<String>) -> Self {
        *self.vehicles.lock().unwrap() = vehicles;
        self
    }

    /// Outcomes returned for successive fetches of `identifier`; the default
    /// record is returned once they run out
    pub fn script(self, identifier: &str, outcomes: Vec<Result<Value, ClientError>>) -> Self {
        self.scripts
            .lock()
            .unwrap()
            .insert(identifier.to_string(), outcomes.into());
        self
    }

    /// Hold fetches of these identifiers until [`FakePlatform::release`]
    pub fn gate<I: IntoIterator<Item = String>>(self, identifiers: I) -> Self {
        self.gated.lock().unwrap().extend(identifiers);
        self
    }

    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    /// Fetches currently held at the gate
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::SeqCst)
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PlatformClient for FakePlatform {
    async fn list(&self, kind: ItemKind) -> Result<Vec<String>, ClientError> {
        Ok(match kind {
            ItemKind::User => self.users.lock().unwrap().clone(),
            ItemKind::Vehicle => self.vehicles.lock().unwrap().clone(),
        })
    }

    async fn fetch(&self, item: &WorkItem) -> Result<Value, ClientError> {
        self.fetches.fetch_add(1, Ordering::SeqCst);

        let gated = self.gated.lock().unwrap().contains(&item.identifier);
        if gated {
            self.waiting.fetch_add(1, Ordering::SeqCst);
            // The permit goes back on drop, so one release opens the gate for good
            let _permit = self.gate.acquire().await.unwrap();
            self.waiting.fetch_sub(1, Ordering::SeqCst);
        }

        let scripted = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&item.identifier)
            .and_then(VecDeque::pop_front);
        scripted.unwrap_or_else(|| Ok(record_for(item)))
    }
}

/// Record store that fails every write while switched off
pub struct FlakyRecords {
    inner: Arc<MemoryStore>,
    down: AtomicBool,
}

impl FlakyRecords {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            down: AtomicBool::new(false),
        }
    }

    pub fn set_down(&self, down: bool) {
        self.down.store(down, Ordering::SeqCst);
    }

    fn check(&self) -> StoreResult<()> {
        if self.down.load(Ordering::SeqCst) {
            Err(StoreError::Unavailable("connection refused".to_string()))
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl LocalRecordStore for FlakyRecords {
    async fn get(&self, item: &WorkItem) -> StoreResult<Option<Value>> {
        self.inner.get(item).await
    }

    async fn get_many(&self, items: &[WorkItem]) -> StoreResult<HashMap<WorkItem, Value>> {
        self.inner.get_many(items).await
    }

    async fn list_identifiers(&self, kind: ItemKind) -> StoreResult<Vec<String>> {
        self.inner.list_identifiers(kind).await
    }

    async fn upsert(&self, item: &WorkItem, record: &Value) -> StoreResult<()> {
        self.check()?;
        self.inner.upsert(item, record).await
    }

    async fn delete(&self, item: &WorkItem) -> StoreResult<bool> {
        self.check()?;
        self.inner.delete(item).await
    }
}

/// Import settings with millisecond retries for tests
pub fn test_config() -> ImportConfig {
    ImportConfig {
        retry_base_delay_ms: 1,
        retry_max_delay_ms: 5,
        call_timeout_secs: 5,
        ..ImportConfig::default()
    }
}

pub struct Harness {
    pub orchestrator: ImportOrchestrator,
    pub platform: Arc<FakePlatform>,
    pub store: Arc<MemoryStore>,
    pub monitor: HealthMonitor,
}

impl Harness {
    pub fn new(platform: FakePlatform) -> Self {
        Self::with_config(platform, test_config())
    }

    pub fn with_config(platform: FakePlatform, config: ImportConfig) -> Self {
        let store = Arc::new(MemoryStore::new());
        Self::with_stores(platform, config, store.clone(), Stores::shared(store))
    }

    pub fn with_stores(
        platform: FakePlatform,
        config: ImportConfig,
        store: Arc<MemoryStore>,
        stores: Stores,
    ) -> Self {
        let platform = Arc::new(platform);
        let monitor = HealthMonitor::new(config.health.clone());
        let orchestrator =
            ImportOrchestrator::new(config, stores, platform.clone(), monitor.clone());
        Self {
            orchestrator,
            platform,
            store,
            monitor,
        }
    }

    /// Poll the stored job until `check` holds
    pub async fn wait_until<F>(&self, id: Uuid, check: F) -> ImportJob
    where
        F: Fn(&ImportJob) -> bool,
    {
        for _ in 0..500 {
            let job = self.orchestrator.get_job(id).await.unwrap();
            if check(&job) {
                return job;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("job {id} never reached the expected state");
    }

    /// Poll until the platform holds `n` fetches at the gate
    pub async fn wait_for_gate(&self, n: usize) {
        for _ in 0..500 {
            if self.platform.waiting() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} fetches at the gate, saw {}", self.platform.waiting());
    }

    /// Poll until the platform has seen at least `n` fetches
    pub async fn wait_for_fetches(&self, n: usize) {
        for _ in 0..500 {
            if self.platform.fetches() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("expected {n} fetches, saw {}", self.platform.fetches());
    }
}
