//! Periodic reconciliation of the job store against the credit ledger.
//!
//! Every cycle scans jobs that have not completed, expires the ones that
//! are failed or older than the TTL, and refunds each expired job's power
//! to its owner exactly once. Each expiry is one atomic
//! [`CreditLedger::expire_and_refund`] call: the compare-and-delete, the
//! credit and the ledger entry land together or not at all, so a job whose
//! refund failed is still present and is retried by the next cycle.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sdpool_core::job::{Job, DEFAULT_JOB_TTL};
use sdpool_core::store::{CreditLedger, ExpireOutcome, JobStore, StoreError};
use sdpool_core::types::Timestamp;
use tokio_util::sync::CancellationToken;

/// Default time between cycles.
pub const DEFAULT_RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

/// Default model tag written on refund ledger entries.
pub const DEFAULT_MODEL_TAG: &str = "stable-diffusion";

#[derive(Debug, Clone)]
pub struct ReconcileSettings {
    /// Time between cycles, also the retry delay after a failed scan.
    pub interval: Duration,
    /// Age after which a job that has not completed is expired.
    pub job_ttl: Duration,
    /// Model tag recorded on refund entries.
    pub model_tag: String,
}

impl Default for ReconcileSettings {
    fn default() -> Self {
        Self {
            interval: DEFAULT_RECONCILE_INTERVAL,
            job_ttl: DEFAULT_JOB_TTL,
            model_tag: DEFAULT_MODEL_TAG.to_string(),
        }
    }
}

/// Summary of one cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Jobs returned by the scan.
    pub scanned: usize,
    /// Jobs this cycle removed.
    pub expired: usize,
    /// Expired jobs whose power was credited back.
    pub refunded: usize,
    /// Expired jobs lost to a concurrent writer, or whose expiry failed and
    /// will be retried.
    pub skipped: usize,
}

/// Cumulative counters across cycles.
#[derive(Debug, Default)]
pub struct ReconcileStats {
    cycles: AtomicU64,
    failed_cycles: AtomicU64,
    expired: AtomicU64,
    refunded: AtomicU64,
}

impl ReconcileStats {
    pub fn cycles(&self) -> u64 {
        self.cycles.load(Ordering::Relaxed)
    }

    pub fn failed_cycles(&self) -> u64 {
        self.failed_cycles.load(Ordering::Relaxed)
    }

    pub fn expired(&self) -> u64 {
        self.expired.load(Ordering::Relaxed)
    }

    pub fn refunded(&self) -> u64 {
        self.refunded.load(Ordering::Relaxed)
    }
}

/// What happened to one expired job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Resolution {
    Refunded,
    /// Deleted, but the owner account no longer exists.
    OwnerMissing,
    /// Someone else removed or changed the job first.
    Lost,
}

pub struct Reconciler {
    job_store: Arc<dyn JobStore>,
    ledger: Arc<dyn CreditLedger>,
    settings: ReconcileSettings,
    stats: Arc<ReconcileStats>,
}

impl Reconciler {
    pub fn new(
        job_store: Arc<dyn JobStore>,
        ledger: Arc<dyn CreditLedger>,
        settings: ReconcileSettings,
    ) -> Self {
        Self {
            job_store,
            ledger,
            settings,
            stats: Arc::new(ReconcileStats::default()),
        }
    }

    pub fn settings(&self) -> &ReconcileSettings {
        &self.settings
    }

    pub fn stats(&self) -> Arc<ReconcileStats> {
        Arc::clone(&self.stats)
    }

    /// Run cycles every `interval` until `cancel` fires. Never returns an
    /// error: a failed scan is logged and retried on the next tick.
    pub async fn run(&self, cancel: CancellationToken) {
        tracing::info!(
            interval_secs = self.settings.interval.as_secs(),
            ttl_secs = self.settings.job_ttl.as_secs(),
            "Reconciler started",
        );

        let mut interval = tokio::time::interval(self.settings.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!("Reconciler stopping");
                    break;
                }
                _ = interval.tick() => {
                    match self.run_cycle(Utc::now()).await {
                        Ok(report) if report.expired > 0 || report.skipped > 0 => {
                            tracing::info!(
                                scanned = report.scanned,
                                expired = report.expired,
                                refunded = report.refunded,
                                skipped = report.skipped,
                                "Reconcile cycle finished",
                            );
                        }
                        Ok(report) => {
                            tracing::debug!(scanned = report.scanned, "Reconcile cycle: nothing to expire");
                        }
                        Err(e) => {
                            tracing::error!(
                                error = %e,
                                retry_in_secs = self.settings.interval.as_secs(),
                                "Reconcile scan failed",
                            );
                        }
                    }
                }
            }
        }
    }

    /// Run one cycle as of `now`.
    ///
    /// Fails only if the scan itself fails; per-job failures are logged and
    /// counted as skipped.
    pub async fn run_cycle(&self, now: Timestamp) -> Result<CycleReport, StoreError> {
        self.stats.cycles.fetch_add(1, Ordering::Relaxed);

        let jobs = match self.job_store.find_incomplete().await {
            Ok(jobs) => jobs,
            Err(e) => {
                self.stats.failed_cycles.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };

        let mut report = CycleReport {
            scanned: jobs.len(),
            ..CycleReport::default()
        };

        for job in jobs
            .iter()
            .filter(|job| job.is_expired(now, self.settings.job_ttl))
        {
            match self.expire(job).await {
                Ok(Resolution::Refunded) => {
                    report.expired += 1;
                    report.refunded += 1;
                }
                Ok(Resolution::OwnerMissing) => report.expired += 1,
                Ok(Resolution::Lost) => report.skipped += 1,
                Err(e) => {
                    tracing::error!(
                        task_id = %job.task_id,
                        user_id = job.user_id,
                        power = job.power,
                        error = %e,
                        "Failed to expire job, retrying next cycle",
                    );
                    report.skipped += 1;
                }
            }
        }

        self.stats
            .expired
            .fetch_add(report.expired as u64, Ordering::Relaxed);
        self.stats
            .refunded
            .fetch_add(report.refunded as u64, Ordering::Relaxed);
        Ok(report)
    }

    async fn expire(&self, job: &Job) -> Result<Resolution, StoreError> {
        match self
            .ledger
            .expire_and_refund(job, &self.settings.model_tag)
            .await?
        {
            ExpireOutcome::Refunded { balance_after, .. } => {
                tracing::info!(
                    task_id = %job.task_id,
                    user_id = job.user_id,
                    power = job.power,
                    balance_after,
                    "Expired job refunded",
                );
                Ok(Resolution::Refunded)
            }
            ExpireOutcome::OwnerMissing => {
                tracing::warn!(
                    task_id = %job.task_id,
                    user_id = job.user_id,
                    "Expired job owner not found, no refund",
                );
                Ok(Resolution::OwnerMissing)
            }
            ExpireOutcome::Lost => {
                tracing::debug!(task_id = %job.task_id, "Job changed or removed concurrently, skipping");
                Ok(Resolution::Lost)
            }
        }
    }
}
