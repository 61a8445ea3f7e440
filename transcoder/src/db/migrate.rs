//! Embedded schema migrations for the queue database.

use anyhow::anyhow;
use diesel_migrations::{EmbeddedMigrations, MigrationHarness, embed_migrations};

use crate::db::connection::connect_sqlite;

/// Embedded Diesel migrations bundled with this crate.
///
/// These are applied by [`run`] to bring a freshly-created (or reopened)
/// queue database file up to date before any other table access.
pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

/// Runs pending Diesel migrations on the SQLite database at `database_url`.
///
/// Reuses [`connect_sqlite`] so the WAL/foreign_keys/busy_timeout PRAGMAs are
/// already in effect before migrations run.
pub fn run(database_url: &str, busy_timeout_ms: u32) -> anyhow::Result<()> {
    let mut conn = connect_sqlite(database_url, busy_timeout_ms)?;
    conn.run_pending_migrations(MIGRATIONS)
        .map_err(|e| anyhow!(e))?;
    Ok(())
}
