//! PostgreSQL implementation of the event journal.

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use super::journal::JournalSink;
use super::models::JournalEntry;
use crate::config::EngineConfig;
use crate::error::EngineError;

/// PostgreSQL-backed journal using `sqlx::PgPool`.
#[derive(Debug, Clone)]
pub struct PostgresJournal {
    pool: PgPool,
}

impl PostgresJournal {
    /// Creates a new journal over the given connection pool.
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool sized by `config` and applies the bundled
    /// migrations.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] if the database is unreachable
    /// or a migration fails.
    pub async fn connect(config: &EngineConfig) -> Result<Self, EngineError> {
        let pool = PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connect_timeout_secs))
            .connect(&config.database_url)
            .await?;
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::Persistence(e.to_string()))?;
        tracing::info!(
            max_connections = config.database_max_connections,
            "journal database ready"
        );
        Ok(Self::new(pool))
    }

    /// Appends an entry to the journal and returns its row id.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn save_event(&self, entry: &JournalEntry) -> Result<i64, EngineError> {
        let row = sqlx::query_scalar::<_, i64>(
            "INSERT INTO engine_events (event_id, event_type, payload, occurred_at) \
             VALUES ($1, $2, $3, $4) RETURNING id",
        )
        .bind(entry.event_id)
        .bind(&entry.event_type)
        .bind(&entry.payload)
        .bind(entry.occurred_at)
        .fetch_one(&self.pool)
        .await?;

        Ok(row)
    }

    /// Deletes entries recorded before `cutoff`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Persistence`] on database failure.
    pub async fn delete_old_events(&self, cutoff: DateTime<Utc>) -> Result<u64, EngineError> {
        let result = sqlx::query("DELETE FROM engine_events WHERE occurred_at < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

impl JournalSink for PostgresJournal {
    fn append(
        &self,
        entry: JournalEntry,
    ) -> impl Future<Output = Result<i64, EngineError>> + Send {
        async move { self.save_event(&entry).await }
    }

    fn prune(
        &self,
        cutoff: DateTime<Utc>,
    ) -> impl Future<Output = Result<u64, EngineError>> + Send {
        self.delete_old_events(cutoff)
    }
}
