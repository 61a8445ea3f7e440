//! The SQLite-backed work queue: one `xfermeta` job description and a
//! `filelist` of tiles, reserved under an exclusive transaction so
//! concurrent reservers see disjoint sets.
//!
//! A queue database goes through three states: [`WorkQueue::create`] builds
//! one from scratch (dropping and recreating every table so repeated `init`
//! runs are idempotent), [`WorkQueue::open`] attaches to an existing one, and
//! the two share every other operation.

pub mod job;

use std::cell::Cell;

use diesel::prelude::*;
use diesel::sql_query;
use thiserror::Error;

use crate::clock::now_msec;
use crate::db::connection::connect_sqlite;
use crate::db::migrate;
use crate::models::{ErrorRow, ItemRow, JobMetaRow, NewError, NewItem, NewJobMeta};
use crate::schema::{errors, filelist, stats, xfermeta};

pub use job::{JobMeta, JobMetaError, NewJob};

/// Maximum number of `?` bind parameters SQLite accepts in one statement.
/// Batch operations over filenames are chunked to stay under this.
const SQLITE_MAX_PARAMS: usize = 999;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// A query or statement failed.
    #[error(transparent)]
    Diesel(#[from] diesel::result::Error),
    /// Connecting to or migrating the database failed.
    #[error(transparent)]
    Connection(#[from] anyhow::Error),
    /// The stored job metadata was malformed.
    #[error(transparent)]
    JobMeta(#[from] JobMetaError),
    /// `xfermeta` had no row with id 1.
    #[error("no job found in xfermeta; was this database created with `init`?")]
    MissingJob,
}

/// A reserved-tile work queue backed by one SQLite database.
pub struct WorkQueue {
    conn: SqliteConnection,
    lease_msec: i64,
    total_cache: Cell<Option<i64>>,
}

impl WorkQueue {
    /// Creates a fresh queue database at `database_url`, dropping any
    /// existing queue tables first so `init` is safe to rerun. Inserts the
    /// single job row described by `job`.
    pub fn create(
        database_url: &str,
        busy_timeout_ms: u32,
        job: &NewJob,
    ) -> Result<Self, QueueError> {
        {
            let mut conn = connect_sqlite(database_url, busy_timeout_ms)?;
            for table in ["stats", "errors", "filelist", "xfermeta", "__diesel_schema_migrations"] {
                sql_query(format!("DROP TABLE IF EXISTS {table}")).execute(&mut conn)?;
            }
        }
        migrate::run(database_url, busy_timeout_ms)?;

        let mut conn = connect_sqlite(database_url, busy_timeout_ms)?;
        let serialized_options = job::serialize_encoding_options(&job.encoding_options);
        let encoding_options = (!serialized_options.is_empty()).then_some(serialized_options.as_str());
        let row = NewJobMeta {
            id: 1,
            source: &job.source,
            dest: &job.dest,
            recompress: job.recompress.as_deref(),
            reencode: job.reencode.as_deref(),
            encoding_level: job.encoding_level,
            encoding_options,
            resin_handling: job.resin_handling.to_db(),
            delete_original: job.delete_original,
            created_at: now_msec(),
        };
        diesel::insert_into(xfermeta::table)
            .values(&row)
            .execute(&mut conn)?;

        Ok(Self {
            conn,
            lease_msec: 0,
            total_cache: Cell::new(None),
        })
    }

    /// Attaches to an existing queue database. `lease_msec` is the lease
    /// duration this handle grants when reserving items; pass `0` for a
    /// single serial worker (the only configuration that skips leasing
    /// entirely, see [`WorkQueue::reserve_batch`]).
    pub fn open(database_url: &str, busy_timeout_ms: u32, lease_msec: i64) -> Result<Self, QueueError> {
        migrate::run(database_url, busy_timeout_ms)?;
        let conn = connect_sqlite(database_url, busy_timeout_ms)?;
        Ok(Self {
            conn,
            lease_msec,
            total_cache: Cell::new(None),
        })
    }

    /// Bulk-inserts `filenames` as unfinished, unleased items, chunked to
    /// respect SQLite's bound-parameter limit.
    pub fn insert(&mut self, filenames: &[String]) -> Result<(), QueueError> {
        for chunk in filenames.chunks(SQLITE_MAX_PARAMS) {
            let rows: Vec<NewItem<'_>> = chunk
                .iter()
                .map(|f| NewItem {
                    filename: f,
                    finished: 0,
                    lease: 0,
                })
                .collect();
            diesel::insert_into(filelist::table)
                .values(&rows)
                .execute(&mut self.conn)?;
        }
        self.total_cache.set(None);
        Ok(())
    }

    /// Reserves up to `limit` unfinished, unleased (or lease-expired) items
    /// under one exclusive transaction, extending their lease to `now +
    /// lease_msec`. Returns fewer than `limit` filenames, possibly zero, when
    /// the queue is drained or contended.
    pub fn reserve_batch(&mut self, limit: i64) -> Result<Vec<String>, QueueError> {
        use filelist::dsl::*;

        if limit <= 0 {
            return Ok(Vec::new());
        }

        let now = now_msec();
        let deadline = now + self.lease_msec;

        let reserved: Vec<String> = self.conn.immediate_transaction(|tx| {
            let candidates: Vec<i32> = filelist
                .filter(finished.eq(0).and(lease.lt(now)))
                .order(id.asc())
                .limit(limit)
                .select(id.assume_not_null())
                .load(tx)?;

            if candidates.is_empty() {
                return Ok(Vec::new());
            }

            diesel::update(
                filelist.filter(id.eq_any(&candidates).and(finished.eq(0)).and(lease.lt(now))),
            )
            .set(lease.eq(deadline))
            .returning(filename)
            .get_results(tx)
        })?;

        Ok(reserved)
    }

    /// Marks `filenames` done, incrementing the `finished` stats counter by
    /// the number of rows actually flipped from pending; an item already
    /// marked errored by a racing worker is left alone rather than double
    /// counted.
    pub fn mark_finished(&mut self, filenames: &[String]) -> Result<(), QueueError> {
        use filelist::dsl::*;

        for chunk in filenames.chunks(SQLITE_MAX_PARAMS) {
            let updated = diesel::update(
                filelist.filter(filename.eq_any(chunk).and(finished.eq(0))),
            )
            .set(finished.eq(1))
            .execute(&mut self.conn)?;

            if updated > 0 {
                diesel::update(stats::table.filter(stats::id.eq(1)))
                    .set(stats::value.eq(stats::value + updated as i64))
                    .execute(&mut self.conn)?;
            }
        }
        Ok(())
    }

    /// Records a transcoding failure: appends to `errors` and marks the item
    /// `finished = 2` so it is excluded from future reservations.
    pub fn record_error(&mut self, item_filename: &str, message: &str) -> Result<(), QueueError> {
        use filelist::dsl::*;

        diesel::insert_into(errors::table)
            .values(NewError {
                filename: item_filename,
                error: message,
                created_at: now_msec(),
            })
            .execute(&mut self.conn)?;

        diesel::update(filelist.filter(filename.eq(item_filename)))
            .set(finished.eq(2))
            .execute(&mut self.conn)?;

        Ok(())
    }

    /// Clears every item's lease, making them immediately reservable again.
    /// Used to recover a queue after a worker crashed mid-batch.
    pub fn release(&mut self) -> Result<(), QueueError> {
        use filelist::dsl::*;
        diesel::update(filelist).set(lease.eq(0)).execute(&mut self.conn)?;
        Ok(())
    }

    /// Total number of items ever inserted, cached after the first query and
    /// invalidated by [`Self::insert`].
    pub fn total(&mut self) -> Result<i64, QueueError> {
        if let Some(cached) = self.total_cache.get() {
            return Ok(cached);
        }
        let max_id: Option<i32> = filelist::table
            .select(diesel::dsl::max(filelist::id))
            .first(&mut self.conn)?;
        let total = max_id.unwrap_or(0) as i64;
        self.total_cache.set(Some(total));
        Ok(total)
    }

    /// Number of items marked done, read from the `stats` counter.
    pub fn finished(&mut self) -> Result<i64, QueueError> {
        let value: i64 = stats::table
            .filter(stats::id.eq(1))
            .select(stats::value)
            .first(&mut self.conn)?;
        Ok(value)
    }

    /// Number of items recorded in `errors` (`finished = 2`).
    pub fn num_errors(&mut self) -> Result<i64, QueueError> {
        use filelist::dsl::*;
        let count: i64 = filelist.filter(finished.eq(2)).count().get_result(&mut self.conn)?;
        Ok(count)
    }

    /// Number of items currently out on an unexpired lease.
    pub fn num_leased(&mut self) -> Result<i64, QueueError> {
        use filelist::dsl::*;
        let now = now_msec();
        let count: i64 = filelist
            .filter(finished.eq(0).and(lease.ge(now)))
            .count()
            .get_result(&mut self.conn)?;
        Ok(count)
    }

    /// `total - finished - errored`: items still eligible for reservation,
    /// whether or not they are currently leased.
    pub fn remaining(&mut self) -> Result<i64, QueueError> {
        Ok(self.total()? - self.finished()? - self.num_errors()?)
    }

    /// Whether any item has ever errored.
    pub fn has_errors(&mut self) -> Result<bool, QueueError> {
        Ok(self.num_errors()? > 0)
    }

    /// The job description shared by every worker attached to this database.
    pub fn metadata(&mut self) -> Result<JobMeta, QueueError> {
        let row: JobMetaRow = xfermeta::table
            .find(1)
            .select(JobMetaRow::as_select())
            .first(&mut self.conn)
            .optional()?
            .ok_or(QueueError::MissingJob)?;
        Ok(JobMeta::from_row(row)?)
    }

    /// Fetches one item's row, for callers that need its numeric id (e.g.
    /// deciding whether to retry vs. give up based on an error count per item).
    pub fn item(&mut self, item_filename: &str) -> Result<Option<ItemRow>, QueueError> {
        use filelist::dsl::*;
        Ok(filelist
            .filter(filename.eq(item_filename))
            .select(ItemRow::as_select())
            .first(&mut self.conn)
            .optional()?)
    }

    /// Fetches every recorded error, most recent first.
    pub fn errors(&mut self) -> Result<Vec<ErrorRow>, QueueError> {
        use errors::dsl::*;
        Ok(errors
            .order(created_at.desc())
            .select(ErrorRow::as_select())
            .load(&mut self.conn)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use indexmap::IndexMap;

    fn new_job(tmp: &std::path::Path) -> NewJob {
        NewJob {
            source: format!("file://{}", tmp.join("src").display()),
            dest: format!("file://{}", tmp.join("dst").display()),
            recompress: None,
            reencode: None,
            encoding_level: None,
            encoding_options: IndexMap::new(),
            resin_handling: crate::resin::ResinMode::Noop,
            delete_original: false,
        }
    }

    #[test]
    fn reservations_are_disjoint_and_leases_extend_into_the_future() {
        let tmp = tempfile::tempdir().unwrap();
        let db_path = tmp.path().join("queue.sqlite3");
        let db_url = db_path.to_str().unwrap().to_string();

        let job = new_job(tmp.path());
        let mut q = WorkQueue::create(&db_url, 5000, &job).unwrap();
        q.insert(&["a.png".into(), "b.png".into(), "c.png".into()]).unwrap();

        let mut q = WorkQueue::open(&db_url, 5000, 60_000).unwrap();
        let first = q.reserve_batch(2).unwrap();
        assert_eq!(first.len(), 2);

        let second = q.reserve_batch(2).unwrap();
        assert_eq!(second.len(), 1);
        assert!(first.iter().all(|f| !second.contains(f)));

        let third = q.reserve_batch(2).unwrap();
        assert!(third.is_empty());
    }

    #[test]
    fn mark_finished_increments_the_counter_once_per_item() {
        let tmp = tempfile::tempdir().unwrap();
        let db_url = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();

        let job = new_job(tmp.path());
        let mut q = WorkQueue::create(&db_url, 5000, &job).unwrap();
        q.insert(&["a.png".into(), "b.png".into()]).unwrap();

        q.mark_finished(&["a.png".into()]).unwrap();
        assert_eq!(q.finished().unwrap(), 1);
        assert_eq!(q.remaining().unwrap(), 1);

        // Re-marking the same item must not double count.
        q.mark_finished(&["a.png".into()]).unwrap();
        assert_eq!(q.finished().unwrap(), 1);
    }

    #[test]
    fn record_error_excludes_the_item_from_remaining_and_reservation() {
        let tmp = tempfile::tempdir().unwrap();
        let db_url = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();

        let job = new_job(tmp.path());
        let mut q = WorkQueue::create(&db_url, 5000, &job).unwrap();
        q.insert(&["a.png".into()]).unwrap();

        q.record_error("a.png", "decode failed").unwrap();
        assert!(q.has_errors().unwrap());
        assert_eq!(q.remaining().unwrap(), 0);
        assert!(q.reserve_batch(10).unwrap().is_empty());
    }

    #[test]
    fn release_clears_leases_so_items_are_reservable_again() {
        let tmp = tempfile::tempdir().unwrap();
        let db_url = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();

        let job = new_job(tmp.path());
        let mut q = WorkQueue::create(&db_url, 5000, &job).unwrap();
        q.insert(&["a.png".into()]).unwrap();

        let mut q = WorkQueue::open(&db_url, 5000, 60_000).unwrap();
        assert_eq!(q.reserve_batch(1).unwrap().len(), 1);
        assert!(q.reserve_batch(1).unwrap().is_empty());

        q.release().unwrap();
        assert_eq!(q.reserve_batch(1).unwrap().len(), 1);
    }

    #[test]
    fn concurrent_reservations_from_separate_connections_never_overlap() {
        let tmp = tempfile::tempdir().unwrap();
        let db_url = tmp.path().join("queue.sqlite3").to_str().unwrap().to_string();

        let job = new_job(tmp.path());
        let mut q = WorkQueue::create(&db_url, 5000, &job).unwrap();
        let names: Vec<String> = (0..40).map(|i| format!("tile-{i}.png")).collect();
        q.insert(&names).unwrap();
        drop(q);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let db_url = db_url.clone();
                std::thread::spawn(move || {
                    let mut q = WorkQueue::open(&db_url, 5000, 60_000).unwrap();
                    let mut mine = Vec::new();
                    loop {
                        let batch = q.reserve_batch(3).unwrap();
                        if batch.is_empty() {
                            break;
                        }
                        mine.extend(batch);
                    }
                    mine
                })
            })
            .collect();

        let mut all = Vec::new();
        for h in handles {
            all.extend(h.join().unwrap());
        }

        let mut sorted = all.clone();
        sorted.sort();
        sorted.dedup();
        assert_eq!(sorted.len(), all.len(), "every reservation must be disjoint across workers");
        assert_eq!(all.len(), names.len(), "every item must be reserved exactly once");
    }
}
