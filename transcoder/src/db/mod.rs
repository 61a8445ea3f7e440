//! Database utilities for connections and schema migrations.
//!
//! This module provides:
//! - SQLite connection helpers: [`connection::connect_sqlite`] applies WAL, foreign_keys=ON,
//!   and a caller-supplied busy_timeout.
//! - Embedded Diesel migrations: [`migrate::run`] creates `xfermeta`, `filelist`, `stats`,
//!   and `errors` (see [`crate::schema`]) the first time a queue database is opened.
//!
//! Example:
//! ```no_run
//! use transcoder::db::{migrate, connection};
//!
//! let db_path = std::env::temp_dir().join("transcoder_example.db");
//! migrate::run(db_path.to_str().unwrap(), 5_000).expect("migrations");
//! let _conn = connection::connect_sqlite(db_path.to_str().unwrap(), 5_000).expect("connect");
//! ```

pub mod connection;
pub mod migrate;
