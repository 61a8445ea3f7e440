//! SQLite connection helpers.
//!
//! Provides [`connect_sqlite`] that opens a connection and applies recommended PRAGMAs:
//! WAL journaling, foreign_keys=ON, and a caller-supplied busy_timeout (the
//! Diesel-level analogue of the `--db-timeout` worker flag).
//!
//! Example:
//! ```no_run
//! use transcoder::db::connection::connect_sqlite;
//!
//! let path = std::env::temp_dir().join("transcoder_example.db");
//! let _conn = connect_sqlite(path.to_str().unwrap(), 5_000).expect("open sqlite");
//! ```

use diesel::{Connection, RunQueryDsl, SqliteConnection, sql_query};

/// Open a SQLite connection and apply connection-wide PRAGMAs.
///
/// `busy_timeout_ms` bounds how long SQLite blocks a statement waiting on
/// another connection's write lock before returning `SQLITE_BUSY`; the
/// queue's reservation transaction relies on this to turn contention into
/// a bounded wait instead of an immediate error.
pub fn connect_sqlite(database_url: &str, busy_timeout_ms: u32) -> anyhow::Result<SqliteConnection> {
    let mut conn = SqliteConnection::establish(database_url)?;

    // Better read concurrency + predictable multi-writer behavior.
    sql_query("PRAGMA journal_mode=WAL;").execute(&mut conn)?;
    sql_query("PRAGMA foreign_keys=ON;").execute(&mut conn)?;
    sql_query(format!("PRAGMA busy_timeout={busy_timeout_ms};")).execute(&mut conn)?;
    Ok(conn)
}
