//! Shared fakes for worker integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use sdpool_core::job::{Job, JobState, COMPLETED_PROGRESS};
use sdpool_core::ledger::LedgerEntry;
use sdpool_core::store::{CreditLedger, CreditOutcome, ExpireOutcome, JobStore, StoreError};
use sdpool_core::task::Task;
use sdpool_core::types::{DbId, Power};
use sdpool_worker::config::ServiceConfig;
use sdpool_worker::generator::{GenerationError, Generator, GeneratorFactory, ProgressReporter};
use tokio::sync::Notify;

/// Wait until `cond` holds, polling every few milliseconds.
pub async fn eventually(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met in time");
}

pub fn service_config(enabled: bool) -> ServiceConfig {
    ServiceConfig {
        enabled,
        api_url: "http://127.0.0.1:7860".into(),
        api_key: None,
        model: None,
        name: None,
    }
}

pub fn task(user_id: DbId, power: Power) -> Task {
    Task::new(user_id, serde_json::json!({"prompt": "a lighthouse at dusk"}), power)
}

// ---------------------------------------------------------------------------
// InMemoryJobStore
// ---------------------------------------------------------------------------

/// [`JobStore`] over a mutex-guarded map with the same conditional
/// semantics as the PostgreSQL store.
#[derive(Default)]
pub struct InMemoryJobStore {
    jobs: Mutex<HashMap<String, Job>>,
    failing_scans: AtomicU32,
    scans: AtomicUsize,
}

impl InMemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` calls to `find_incomplete` fail.
    pub fn fail_next_scans(&self, count: u32) {
        self.failing_scans.store(count, Ordering::SeqCst);
    }

    pub fn scans(&self) -> usize {
        self.scans.load(Ordering::SeqCst)
    }

    /// Insert or overwrite a job without any checks.
    pub fn insert(&self, job: Job) {
        self.jobs.lock().unwrap().insert(job.task_id.clone(), job);
    }

    pub fn get(&self, task_id: &str) -> Option<Job> {
        self.jobs.lock().unwrap().get(task_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.jobs.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Remove `job` if its stored state still equals the observed one.
    fn take_if_unchanged(&self, job: &Job) -> Option<Job> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get(&job.task_id) {
            Some(stored) if stored.state == job.state => jobs.remove(&job.task_id),
            _ => None,
        }
    }
}

#[async_trait]
impl JobStore for InMemoryJobStore {
    async fn create(&self, job: &Job) -> Result<(), StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        if jobs.contains_key(&job.task_id) {
            return Err(StoreError::Conflict(format!(
                "Duplicate task id: {}",
                job.task_id
            )));
        }
        jobs.insert(job.task_id.clone(), job.clone());
        Ok(())
    }

    async fn update_progress(&self, task_id: &str, state: JobState) -> Result<bool, StoreError> {
        let mut jobs = self.jobs.lock().unwrap();
        match jobs.get_mut(task_id) {
            Some(job) if !job.state.is_terminal() => {
                job.state = state;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_incomplete(&self) -> Result<Vec<Job>, StoreError> {
        self.scans.fetch_add(1, Ordering::SeqCst);
        let left = self.failing_scans.load(Ordering::SeqCst);
        if left > 0 {
            self.failing_scans.store(left - 1, Ordering::SeqCst);
            return Err(StoreError::Backend("connection refused".into()));
        }

        let mut jobs: Vec<Job> = self
            .jobs
            .lock()
            .unwrap()
            .values()
            .filter(|job| job.state.progress() < COMPLETED_PROGRESS)
            .cloned()
            .collect();
        jobs.sort_by_key(|job| job.created_at);
        Ok(jobs)
    }

    async fn delete(&self, job: &Job) -> Result<bool, StoreError> {
        Ok(self.take_if_unchanged(job).is_some())
    }
}

// ---------------------------------------------------------------------------
// InMemoryLedger
// ---------------------------------------------------------------------------

/// [`CreditLedger`] over in-memory balances and an entry log.
///
/// `expire_and_refund` removes jobs from the shared [`InMemoryJobStore`] and
/// puts them back if an injected credit failure aborts the unit.
pub struct InMemoryLedger {
    store: Arc<InMemoryJobStore>,
    users: Mutex<HashMap<DbId, (String, Power)>>,
    entries: Mutex<Vec<LedgerEntry>>,
    failing_credits: AtomicU32,
}

impl InMemoryLedger {
    pub fn new(store: Arc<InMemoryJobStore>) -> Self {
        Self {
            store,
            users: Mutex::new(HashMap::new()),
            entries: Mutex::new(Vec::new()),
            failing_credits: AtomicU32::new(0),
        }
    }

    pub fn with_user(self, user_id: DbId, username: &str, balance: Power) -> Self {
        self.users
            .lock()
            .unwrap()
            .insert(user_id, (username.to_string(), balance));
        self
    }

    /// Make the next `count` credits fail after the job delete.
    pub fn fail_next_credits(&self, count: u32) {
        self.failing_credits.store(count, Ordering::SeqCst);
    }

    pub fn balance(&self, user_id: DbId) -> Option<Power> {
        self.users
            .lock()
            .unwrap()
            .get(&user_id)
            .map(|(_, balance)| *balance)
    }

    pub fn entries(&self) -> Vec<LedgerEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn credit_fails(&self) -> bool {
        self.failing_credits
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl CreditLedger for InMemoryLedger {
    async fn conditional_credit(
        &self,
        user_id: DbId,
        amount: Power,
    ) -> Result<CreditOutcome, StoreError> {
        let mut users = self.users.lock().unwrap();
        Ok(match users.get_mut(&user_id) {
            Some((username, balance)) => {
                *balance += amount;
                CreditOutcome::Applied {
                    username: username.clone(),
                    balance_after: *balance,
                }
            }
            None => CreditOutcome::NotApplied,
        })
    }

    async fn append_entry(&self, entry: &LedgerEntry) -> Result<(), StoreError> {
        self.entries.lock().unwrap().push(entry.clone());
        Ok(())
    }

    async fn expire_and_refund(
        &self,
        job: &Job,
        model: &str,
    ) -> Result<ExpireOutcome, StoreError> {
        let Some(removed) = self.store.take_if_unchanged(job) else {
            return Ok(ExpireOutcome::Lost);
        };

        if self.credit_fails() {
            // Rolled back: the job reappears as it was.
            self.store.insert(removed);
            return Err(StoreError::Backend("connection reset during credit".into()));
        }

        let mut users = self.users.lock().unwrap();
        let Some((username, balance)) = users.get_mut(&job.user_id) else {
            return Ok(ExpireOutcome::OwnerMissing);
        };
        *balance += job.power;
        let entry = LedgerEntry::refund(job, username.clone(), *balance, model);
        self.entries.lock().unwrap().push(entry);

        Ok(ExpireOutcome::Refunded {
            username: username.clone(),
            balance_after: *balance,
        })
    }
}

// ---------------------------------------------------------------------------
// Generators
// ---------------------------------------------------------------------------

/// Reports a little progress, records the task id, and succeeds.
#[derive(Default)]
pub struct RecordingGenerator {
    seen: Mutex<Vec<String>>,
}

impl RecordingGenerator {
    pub fn seen(&self) -> Vec<String> {
        self.seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl Generator for RecordingGenerator {
    async fn generate(
        &self,
        task: &Task,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, GenerationError> {
        progress.report(40).await;
        tokio::task::yield_now().await;
        progress.report(80).await;
        self.seen.lock().unwrap().push(task.task_id.clone());
        Ok(serde_json::json!({"images": [format!("{}.png", task.task_id)]}))
    }
}

/// Always fails with a backend error.
pub struct FailingGenerator;

#[async_trait]
impl Generator for FailingGenerator {
    async fn generate(
        &self,
        _task: &Task,
        progress: &ProgressReporter,
    ) -> Result<serde_json::Value, GenerationError> {
        progress.report(10).await;
        Err(GenerationError::Backend {
            status: 500,
            body: "CUDA out of memory".into(),
        })
    }
}

/// Signals `started` once a task begins, then waits for `release`.
#[derive(Default)]
pub struct GatedGenerator {
    pub started: Notify,
    pub release: Notify,
}

#[async_trait]
impl Generator for GatedGenerator {
    async fn generate(
        &self,
        task: &Task,
        _progress: &ProgressReporter,
    ) -> Result<serde_json::Value, GenerationError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(serde_json::json!({"task_id": task.task_id}))
    }
}

/// Hands out the same generator for every configuration and counts builds.
pub struct SharedFactory {
    generator: Arc<dyn Generator>,
    builds: AtomicUsize,
}

impl SharedFactory {
    pub fn new(generator: Arc<dyn Generator>) -> Self {
        Self {
            generator,
            builds: AtomicUsize::new(0),
        }
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl GeneratorFactory for SharedFactory {
    fn build(&self, _config: &ServiceConfig) -> Arc<dyn Generator> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Arc::clone(&self.generator)
    }
}
