//! PostgreSQL ledger and script executor
//!
//! Versions are stored as strings in a tracking table that is created on
//! demand before the ledger is first read.
//!
//! A ledger and the executors taken from it share one session. Each step runs
//! inside a transaction opened by `begin_step`: the script statements and the
//! version record commit together or not at all.

use async_trait::async_trait;
use sqlx::postgres::PgQueryResult;
use sqlx::{PgPool, Postgres, Row, Transaction};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::VersionLedger;
use crate::error::{MigrateResult, MigrationError};
use crate::script::ScriptExecutor;

/// Pool plus the transaction of the step in progress, if any
struct PgSession {
    pool: PgPool,
    step: Mutex<Option<Transaction<'static, Postgres>>>,
}

impl PgSession {
    fn new(pool: PgPool) -> Arc<Self> {
        Arc::new(Self {
            pool,
            step: Mutex::new(None),
        })
    }

    /// Run a prepared query inside the open step, or on the pool
    async fn run(
        &self,
        query: sqlx::query::Query<'_, Postgres, sqlx::postgres::PgArguments>,
    ) -> Result<PgQueryResult, sqlx::Error> {
        let mut step = self.step.lock().await;
        match step.as_mut() {
            Some(tx) => query.execute(&mut **tx).await,
            None => query.execute(&self.pool).await,
        }
    }

    /// Run raw SQL over the simple query protocol, which accepts several
    /// statements and dollar-quoted bodies in one batch
    async fn run_raw(&self, sql: &str) -> Result<PgQueryResult, sqlx::Error> {
        let mut step = self.step.lock().await;
        match step.as_mut() {
            Some(tx) => sqlx::Executor::execute(&mut **tx, sql).await,
            None => sqlx::Executor::execute(&self.pool, sql).await,
        }
    }
}

impl fmt::Debug for PgSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PgSession")
            .field("pool", &self.pool)
            .finish_non_exhaustive()
    }
}

/// Ledger stored in a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgLedger {
    session: Arc<PgSession>,
    table: String,
}

impl PgLedger {
    /// Create a ledger on an existing pool
    pub fn new(pool: PgPool, table: impl Into<String>) -> Self {
        Self {
            session: PgSession::new(pool),
            table: table.into(),
        }
    }

    /// Executor whose statements join this ledger's step transactions
    pub fn executor(&self) -> PgExecutor {
        PgExecutor {
            session: Arc::clone(&self.session),
        }
    }

    /// Create a ledger from a database URL
    pub async fn connect(database_url: &str, table: impl Into<String>) -> MigrateResult<Self> {
        let pool = PgPool::connect(database_url)
            .await
            .map_err(|e| MigrationError::ledger("Failed to connect to database", e))?;
        Ok(Self::new(pool, table))
    }

    pub fn pool(&self) -> &PgPool {
        &self.session.pool
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Ensure the tracking table exists
    pub async fn ensure_table(&self) -> MigrateResult<()> {
        sqlx::query(&create_table_sql(&self.table))
            .execute(&self.session.pool)
            .await
            .map_err(|e| MigrationError::ledger("Failed to create ledger table", e))?;
        Ok(())
    }
}

/// SQL to create the tracking table
pub fn create_table_sql(table: &str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} (\n    \
            version VARCHAR(255) PRIMARY KEY,\n    \
            applied_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP\n\
        );",
        table
    )
}

/// SQL to list applied versions
pub fn select_versions_sql(table: &str) -> String {
    format!("SELECT version FROM {}", table)
}

/// SQL to record a version as applied
pub fn insert_version_sql(table: &str) -> String {
    format!(
        "INSERT INTO {} (version) VALUES ($1) ON CONFLICT (version) DO NOTHING",
        table
    )
}

/// SQL to remove a version record
pub fn delete_version_sql(table: &str) -> String {
    format!("DELETE FROM {} WHERE version = $1", table)
}

#[async_trait]
impl VersionLedger for PgLedger {
    async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>> {
        self.ensure_table().await?;

        let rows = sqlx::query(&select_versions_sql(&self.table))
            .fetch_all(&self.session.pool)
            .await
            .map_err(|e| MigrationError::ledger("Failed to query applied versions", e))?;

        let mut versions = BTreeSet::new();
        for row in rows {
            let raw: String = row
                .try_get("version")
                .map_err(|e| MigrationError::ledger("Failed to get version", e))?;
            let version = raw.trim().parse::<u64>().map_err(|e| {
                MigrationError::ledger(format!("Invalid version '{}' in ledger", raw), e)
            })?;
            versions.insert(version);
        }
        Ok(versions)
    }

    async fn record_applied(&self, version: u64) -> MigrateResult<()> {
        let sql = insert_version_sql(&self.table);
        self.session
            .run(sqlx::query(&sql).bind(version.to_string()))
            .await
            .map_err(|e| MigrationError::ledger(format!("Failed to record version {}", version), e))?;
        Ok(())
    }

    async fn record_reverted(&self, version: u64) -> MigrateResult<()> {
        let sql = delete_version_sql(&self.table);
        self.session
            .run(sqlx::query(&sql).bind(version.to_string()))
            .await
            .map_err(|e| MigrationError::ledger(format!("Failed to remove version {}", version), e))?;
        Ok(())
    }

    async fn begin_step(&self) -> MigrateResult<()> {
        let tx = self
            .session
            .pool
            .begin()
            .await
            .map_err(|e| MigrationError::ledger("Failed to begin transaction", e))?;
        let mut step = self.session.step.lock().await;
        // a leftover transaction rolls back when dropped
        *step = Some(tx);
        Ok(())
    }

    async fn commit_step(&self) -> MigrateResult<()> {
        let Some(tx) = self.session.step.lock().await.take() else {
            return Ok(());
        };
        tx.commit()
            .await
            .map_err(|e| MigrationError::ledger("Failed to commit transaction", e))
    }

    async fn abort_step(&self) -> MigrateResult<()> {
        let Some(tx) = self.session.step.lock().await.take() else {
            return Ok(());
        };
        tx.rollback()
            .await
            .map_err(|e| MigrationError::ledger("Failed to roll back transaction", e))
    }
}

/// Runs SQL script statements against PostgreSQL
///
/// Taken from [`PgLedger::executor`], statements run inside the ledger's step
/// transaction. Built with [`PgExecutor::new`], each statement runs on its own.
#[derive(Debug, Clone)]
pub struct PgExecutor {
    session: Arc<PgSession>,
}

impl PgExecutor {
    pub fn new(pool: PgPool) -> Self {
        Self {
            session: PgSession::new(pool),
        }
    }

    pub fn pool(&self) -> &PgPool {
        &self.session.pool
    }
}

#[async_trait]
impl ScriptExecutor for PgExecutor {
    async fn execute(&self, statement: &str) -> anyhow::Result<u64> {
        let result = self.session.run_raw(statement).await?;
        Ok(result.rows_affected())
    }
}
