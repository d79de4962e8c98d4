//! Interval tickers for the periodic jobs.
//!
//! Each job gets its own task and interval. A tick is delivered through a
//! bounded channel; the job loop owns the receiver, so a slow run delays
//! only that job's next tick. Missed ticks are skipped, never queued.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

/// One periodic job as seen by the scheduler.
#[derive(Debug, Clone)]
pub struct JobSpec {
    /// Name used in logs.
    pub name: String,
    /// Time between ticks. The first tick fires one interval after start.
    pub interval: Duration,
    /// Channel the tick is delivered on.
    pub tick: mpsc::Sender<()>,
}

/// Spawns one ticker task per job.
///
/// A ticker stops once its receiver is dropped.
pub fn start(jobs: Vec<JobSpec>) -> Vec<JoinHandle<()>> {
    jobs.into_iter()
        .map(|job| {
            tokio::spawn(async move {
                let start_at = Instant::now() + job.interval;
                let mut interval = tokio::time::interval_at(start_at, job.interval);
                interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    interval.tick().await;
                    tracing::debug!(job = %job.name, "scheduler tick");
                    if job.tick.send(()).await.is_err() {
                        tracing::debug!(job = %job.name, "job receiver gone, ticker stopped");
                        break;
                    }
                }
            })
        })
        .collect()
}
