//! Postgres adapters for the enrichment collaborators, plus schema wiring.

pub mod postgres_ledger;
pub mod postgres_targets;

pub use postgres_ledger::PostgresCreditLedger;
pub use postgres_targets::PostgresTargetStore;

use sqlx::PgPool;
use tracing::info;

/// Idempotent DDL for every table the service owns.
pub const SCHEMA: &str = include_str!("../../schema.sql");

/// Create missing tables and indexes.
pub async fn apply_schema(pool: &PgPool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(pool).await?;
    info!("database schema applied");
    Ok(())
}
