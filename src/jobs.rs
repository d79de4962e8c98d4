//! Periodic jobs driven by [`crate::scheduler`] ticks.
//!
//! Each job is a loop that owns the receiving end of a capacity-1 tick
//! channel. Jobs share nothing but the store; a failing item is logged and
//! the pass continues.

use std::sync::Arc;
use std::time::Duration;

use chrono::Duration as ChronoDuration;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::clock::Clock;
use crate::config::EngineConfig;
use crate::domain::SweepReport;
use crate::persistence::JournalSink;
use crate::scheduler::JobSpec;
use crate::service::ContestService;

/// Outcome of one status job pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusPass {
    /// Events whose cached status changed.
    pub changed: usize,
    /// Events finalized because their announcement date came.
    pub finalized: usize,
}

/// Reconciles every status, then finalizes due events and queues their
/// rewards.
pub async fn run_status_pass(service: &ContestService) -> StatusPass {
    let changed = service.sync_all_statuses().await;
    let finalized = service.finalize_due_events().await;
    StatusPass { changed, finalized }
}

/// Tick senders and worker handles of the spawned jobs.
#[derive(Debug, Default)]
pub struct JobSet {
    /// Specs to hand to [`crate::scheduler::start`].
    pub specs: Vec<JobSpec>,
    /// Job loops.
    pub workers: Vec<JoinHandle<()>>,
}

impl JobSet {
    fn channel(&mut self, name: &str, interval_secs: u64) -> mpsc::Receiver<()> {
        let (tx, rx) = mpsc::channel(1);
        self.specs.push(JobSpec {
            name: name.to_string(),
            interval: Duration::from_secs(interval_secs.max(1)),
            tick: tx,
        });
        rx
    }

    /// Spawns the status, reward sweep and retry sweep jobs.
    #[must_use]
    pub fn engine(service: &ContestService, config: &EngineConfig) -> Self {
        let mut set = Self::default();

        let ticks = set.channel("status_sync", config.status_sync_interval_secs);
        set.workers.push(tokio::spawn(status_job(service.clone(), ticks)));

        let ticks = set.channel("reward_sweep", config.reward_sweep_interval_secs);
        set.workers.push(tokio::spawn(reward_sweep_job(service.clone(), ticks)));

        let ticks = set.channel("reward_retry", config.reward_retry_interval_secs);
        set.workers.push(tokio::spawn(retry_sweep_job(service.clone(), ticks)));

        set
    }

    /// Adds the journal cleanup job. A retention of zero days disables it.
    pub fn with_cleanup<S: JournalSink>(
        &mut self,
        sink: Arc<S>,
        clock: Arc<dyn Clock>,
        config: &EngineConfig,
    ) {
        if config.journal_cleanup_after_days == 0 {
            tracing::info!("journal cleanup disabled");
            return;
        }
        let ticks = self.channel("journal_cleanup", config.journal_cleanup_interval_secs);
        self.workers.push(tokio::spawn(cleanup_job(
            sink,
            clock,
            config.journal_cleanup_after_days,
            ticks,
        )));
    }
}

/// Status reconciliation and automatic finalization.
pub async fn status_job(service: ContestService, mut ticks: mpsc::Receiver<()>) {
    while ticks.recv().await.is_some() {
        let pass = run_status_pass(&service).await;
        if pass.changed > 0 || pass.finalized > 0 {
            tracing::info!(changed = pass.changed, finalized = pass.finalized, "status pass");
        }
    }
}

/// Primary sweep over PENDING reward rows.
pub async fn reward_sweep_job(service: ContestService, mut ticks: mpsc::Receiver<()>) {
    let batch = service.settlement().settings().batch_size;
    while ticks.recv().await.is_some() {
        let report = service.settlement().process_pending(batch).await;
        log_sweep("reward_sweep", &report);
    }
}

/// Retry sweep over FAILED reward rows with attempts left.
pub async fn retry_sweep_job(service: ContestService, mut ticks: mpsc::Receiver<()>) {
    let batch = service.settlement().settings().batch_size;
    while ticks.recv().await.is_some() {
        let report = service.settlement().retry_failed(batch).await;
        log_sweep("reward_retry", &report);
    }
}

fn log_sweep(job: &str, report: &SweepReport) {
    if report.loaded == 0 {
        tracing::debug!(job, "nothing to settle");
        return;
    }
    tracing::info!(
        job,
        loaded = report.loaded,
        claimed = report.claimed,
        processed = report.processed,
        failed = report.failed,
        "sweep finished"
    );
}

/// Deletes journal rows older than `retention_days`.
pub async fn cleanup_job<S: JournalSink>(
    sink: Arc<S>,
    clock: Arc<dyn Clock>,
    retention_days: u64,
    mut ticks: mpsc::Receiver<()>,
) {
    let retention = i64::try_from(retention_days)
        .ok()
        .and_then(ChronoDuration::try_days);
    while ticks.recv().await.is_some() {
        let Some(cutoff) = retention.and_then(|r| clock.now().checked_sub_signed(r)) else {
            tracing::debug!(
                retention_days,
                "retention reaches past the calendar, nothing to prune"
            );
            continue;
        };
        match sink.prune(cutoff).await {
            Ok(removed) => tracing::info!(removed, %cutoff, "journal pruned"),
            Err(e) => tracing::warn!(error = %e, "journal cleanup failed"),
        }
    }
}
