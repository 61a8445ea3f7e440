#![allow(dead_code)]

use std::path::PathBuf;

use diesel::QueryableByName;
use diesel::prelude::*;
use diesel::sql_query;
use diesel::sql_types::{BigInt, Integer, Text};
use tempfile::TempDir;
use transcoder::db::{connection, migrate};

#[derive(QueryableByName)]
struct JournalMode {
    #[diesel(sql_type = Text)]
    journal_mode: String,
}
#[derive(QueryableByName)]
struct ForeignKeys {
    #[diesel(sql_type = Integer)]
    foreign_keys: i32,
}
#[derive(QueryableByName)]
struct BusyTimeout {
    #[diesel(sql_type = Integer, column_name = "timeout")]
    busy_timeout: i32,
}

pub struct TestDb {
    _dir: TempDir,
    pub path: String,
}

/// Runs migrations against a fresh database in a temp directory and opens a
/// connection with the usual PRAGMAs applied.
pub fn setup_db(busy_timeout_ms: u32) -> (TestDb, SqliteConnection) {
    let dir = TempDir::new().expect("tempdir");
    let mut p = PathBuf::from(dir.path());
    p.push("queue.sqlite3");
    let path = p.to_string_lossy().to_string();

    migrate::run(&path, busy_timeout_ms).expect("migrations");
    let conn = connection::connect_sqlite(&path, busy_timeout_ms).expect("connect");
    (TestDb { _dir: dir, path }, conn)
}

pub fn assert_sqlite_pragmas(conn: &mut SqliteConnection, expected_busy_timeout_ms: i32) {
    let jm: JournalMode = sql_query("PRAGMA journal_mode;").get_result(conn).unwrap();
    assert_eq!(jm.journal_mode.to_lowercase(), "wal");

    let fk: ForeignKeys = sql_query("PRAGMA foreign_keys;").get_result(conn).unwrap();
    assert_eq!(fk.foreign_keys, 1);

    let bt: BusyTimeout = sql_query("PRAGMA busy_timeout;").get_result(conn).unwrap();
    assert_eq!(bt.busy_timeout, expected_busy_timeout_ms);
}

pub fn fk_check_empty(conn: &mut SqliteConnection) {
    #[derive(diesel::QueryableByName, Debug)]
    struct Row {
        #[diesel(sql_type = Text, column_name = "table")]
        table_name: String,
    }
    let rows: Vec<Row> = sql_query("PRAGMA foreign_key_check;").load(conn).expect("fk_check");
    assert!(rows.is_empty(), "foreign key check not empty: {rows:?}");
}

pub fn count(conn: &mut SqliteConnection, table: &str) -> i64 {
    #[derive(diesel::QueryableByName)]
    struct C {
        #[diesel(sql_type = BigInt)]
        c: i64,
    }
    let q = format!("SELECT COUNT(*) AS c FROM {table}");
    sql_query(q).get_result::<C>(conn).unwrap().c
}
