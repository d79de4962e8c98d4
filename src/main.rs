//! contest-engine entry point.
//!
//! Runs the engine standalone: in-memory collaborators, periodic status,
//! settlement and retry jobs, and the optional PostgreSQL journal.

use std::sync::Arc;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use contest_engine::app_state::AppState;
use contest_engine::config::EngineConfig;
use contest_engine::jobs::JobSet;
use contest_engine::persistence::{PostgresJournal, spawn_writer};
use contest_engine::scheduler;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));
    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    // Load configuration
    let config = EngineConfig::from_env().context("invalid configuration")?;
    tracing::info!(
        utc_offset_hours = config.clock_utc_offset_hours,
        batch_size = config.reward_batch_size,
        max_retries = config.reward_max_retries,
        journal = config.journal_enabled,
        "starting contest-engine"
    );

    // Build engine
    let (state, _backends) = AppState::standalone(&config).context("building engine")?;
    let mut jobs = JobSet::engine(&state.service, &config);

    // Optional journal
    let mut writer = None;
    if config.journal_enabled {
        let journal = Arc::new(
            PostgresJournal::connect(&config)
                .await
                .context("connecting to the journal database")?,
        );
        writer = Some(spawn_writer(Arc::clone(&journal), &state.event_bus));
        jobs.with_cleanup(journal, Arc::clone(&state.clock), &config);
    }

    // Start tickers
    let JobSet { specs, workers } = jobs;
    let tickers = scheduler::start(specs);
    tracing::info!(jobs = workers.len(), "scheduler running");

    tokio::signal::ctrl_c()
        .await
        .context("listening for shutdown signal")?;
    tracing::info!("shutting down");

    for handle in tickers.iter().chain(workers.iter()).chain(writer.iter()) {
        handle.abort();
    }
    Ok(())
}
