//! Diesel models mapping to the queue schema in [`crate::schema`].

use diesel::prelude::*;

use crate::schema::{errors, filelist, stats, xfermeta};

/// A row in [`xfermeta`][crate::schema::xfermeta]: the single, immutable job
/// description shared by every worker touching this database.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = xfermeta, check_for_backend(diesel::sqlite::Sqlite))]
pub struct JobMetaRow {
    /// Always `1`; one job per database.
    pub id: i32,
    /// Source URI (normalized, `file://`-prefixed for bare paths).
    pub source: String,
    /// Destination URI.
    pub dest: String,
    /// Destination-side bitstream compression name (`gzip`, `br`, `zstd`), or `None`.
    pub recompress: Option<String>,
    /// Target encoding format name (`jpeg`, `jpegxl`, `png`, `bmp`, `tiff`), or `None` for "same".
    pub reencode: Option<String>,
    /// Encoding level; format-specific meaning (see [`crate::pipeline`]).
    pub encoding_level: Option<i32>,
    /// `;`-joined `key=value` encoding options (`effort`, `decodingspeed`, `num_threads`).
    pub encoding_options: Option<String>,
    /// [`crate::resin::ResinMode`] as a small integer.
    pub resin_handling: i32,
    /// Whether successfully-transcoded sources should be deleted.
    pub delete_original: bool,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
}

/// Insertable form of [`JobMetaRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = xfermeta)]
pub struct NewJobMeta<'a> {
    /// Always `1`; one job per database.
    pub id: i32,
    /// Source URI.
    pub source: &'a str,
    /// Destination URI.
    pub dest: &'a str,
    /// Destination-side bitstream compression name, or `None`.
    pub recompress: Option<&'a str>,
    /// Target encoding format name, or `None`.
    pub reencode: Option<&'a str>,
    /// Encoding level.
    pub encoding_level: Option<i32>,
    /// `;`-joined `key=value` encoding options.
    pub encoding_options: Option<&'a str>,
    /// [`crate::resin::ResinMode`] as a small integer.
    pub resin_handling: i32,
    /// Whether successfully-transcoded sources should be deleted.
    pub delete_original: bool,
    /// Creation timestamp, epoch milliseconds.
    pub created_at: i64,
}

/// A row in [`filelist`][crate::schema::filelist]: one tile to transcode.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = filelist, check_for_backend(diesel::sqlite::Sqlite))]
pub struct ItemRow {
    /// Row id (autoincrement).
    pub id: Option<i32>,
    /// Tile filename relative to the job's source namespace.
    pub filename: String,
    /// 0 = pending, 1 = done, 2 = errored.
    pub finished: i32,
    /// Lease deadline, epoch milliseconds; 0 = unleased.
    pub lease: i64,
}

/// Insertable form of [`ItemRow`] used by [`crate::queue::WorkQueue::insert`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = filelist)]
pub struct NewItem<'a> {
    /// Tile filename relative to the job's source namespace.
    pub filename: &'a str,
    /// 0 = pending, 1 = done, 2 = errored.
    pub finished: i32,
    /// Lease deadline, epoch milliseconds; 0 = unleased.
    pub lease: i64,
}

/// A row in [`errors`][crate::schema::errors]: append-only post-mortem log.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = errors, check_for_backend(diesel::sqlite::Sqlite))]
pub struct ErrorRow {
    /// Row id (autoincrement).
    pub id: Option<i32>,
    /// Filename that failed to transcode.
    pub filename: String,
    /// Error message captured at failure time.
    pub error: String,
    /// Timestamp the error was recorded, epoch milliseconds.
    pub created_at: i64,
}

/// Insertable form of [`ErrorRow`].
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = errors)]
pub struct NewError<'a> {
    /// Filename that failed to transcode.
    pub filename: &'a str,
    /// Error message captured at failure time.
    pub error: &'a str,
    /// Timestamp the error was recorded, epoch milliseconds.
    pub created_at: i64,
}

/// A row in [`stats`][crate::schema::stats]: the finished-item counter.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = stats, check_for_backend(diesel::sqlite::Sqlite))]
pub struct StatRow {
    /// Always `1`.
    pub id: i32,
    /// Counter name; always `"finished"` today.
    pub key: String,
    /// Counter value.
    pub value: i64,
}
