//! SurrealDB schema initialization for Briefcast.
//!
//! Safe to call multiple times (idempotent).

use surrealdb::engine::any::Any;
use surrealdb::Surreal;
use tracing::{debug, info};

use crate::error::{StoreError, StoreResult};

/// Initialize all Briefcast tables in SurrealDB.
///
/// Called once on connection by the store constructors.
pub async fn init_schema(db: &Surreal<Any>) -> StoreResult<()> {
    info!("initializing Briefcast SurrealDB schema");
    init_runs_table(db).await?;
    info!("Briefcast schema initialization complete");
    Ok(())
}

/// Initialize the `runs` table.
///
/// Schema:
/// ```text
/// TABLE runs {
///   run_id:          STRING (calendar-date key, unique)
///   status:          STRING (enum: pending | running | completed | failed)
///   started_at:      DATETIME (indexed)
///   ended_at:        DATETIME?
///   total_cost:      FLOAT
///   quality:         OBJECT
///   stages:          OBJECT (stage name -> stage record)
///   outputs:         OBJECT (stage name -> persisted payload)
///   output_digests:  OBJECT (stage name -> sha256 hex)
///   error:           OBJECT?
///   decision:        OBJECT?
/// }
/// ```
///
/// Constraints:
/// - `run_id` is unique (one document per logical run)
/// - status transitions running -> completed | failed enforced via app logic
async fn init_runs_table(db: &Surreal<Any>) -> StoreResult<()> {
    debug!("initializing runs table");

    let sql = r#"
        DEFINE TABLE IF NOT EXISTS runs SCHEMALESS
            PERMISSIONS
                FOR create FULL
                FOR select FULL
                FOR update FULL
                FOR delete NONE;

        -- One document per run key
        DEFINE INDEX IF NOT EXISTS idx_run_id ON TABLE runs COLUMNS run_id UNIQUE;

        -- Index status for finding active runs
        DEFINE INDEX IF NOT EXISTS idx_status ON TABLE runs COLUMNS status;

        -- Index started_at for time-range queries and staleness sweeps
        DEFINE INDEX IF NOT EXISTS idx_started_at ON TABLE runs COLUMNS started_at;

        -- Composite index (run_id, status) for lock checks
        DEFINE INDEX IF NOT EXISTS idx_run_id_status ON TABLE runs COLUMNS run_id, status;
    "#;

    db.query(sql)
        .await
        .and_then(|response| response.check())
        .map_err(|e| StoreError::SchemaSetup(e.to_string()))?;
    info!("✓ runs table initialized");
    Ok(())
}
