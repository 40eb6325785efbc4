//! Persistence for jobs and funding programs.
//!
//! The pipeline only sees the [`JobRepository`] trait. [`SqliteRepository`]
//! is the production implementation on top of rusqlite with a thread-safe
//! [`Database`] handle; [`MemoryRepository`] backs tests and dry runs.

use std::path::Path;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::Connection;

pub mod error;
pub mod job_repo;
pub mod memory;
pub mod migrations;
pub mod program_repo;
pub mod sqlite;

pub use error::DatabaseError;
pub use memory::MemoryRepository;
pub use sqlite::SqliteRepository;

use crate::program::FundingProgram;
use crate::worker::job::{Job, ProcessingStatus};

/// Shared rusqlite connection.
///
/// Clones share one connection behind a mutex. Separate processes on the
/// same file coordinate through WAL and the busy timeout.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Opens the database file, creating it and its directory when absent,
    /// and brings the schema up to date.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| DatabaseError::CreateDir {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let mut conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        migrations::run_all(&mut conn)?;
        log::info!("Job store ready at {}", path.display());

        Ok(Self::wrap(conn))
    }

    /// Private in-memory store with the full schema.
    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        let mut conn = Connection::open_in_memory()?;
        migrations::run_all(&mut conn)?;
        Ok(Self::wrap(conn))
    }

    fn wrap(conn: Connection) -> Self {
        Self {
            conn: Arc::new(Mutex::new(conn)),
        }
    }

    /// Runs `f` while holding the connection lock.
    pub fn with_conn<F, T>(&self, f: F) -> Result<T, DatabaseError>
    where
        F: FnOnce(&Connection) -> Result<T, DatabaseError>,
    {
        let conn = self.conn.lock().map_err(|_| DatabaseError::LockPoisoned)?;
        f(&conn)
    }
}

/// Proof of PROCESSING ownership handed out by a successful claim.
///
/// Writes made under a ticket only land while the job is still PROCESSING
/// under the same worker and claim time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimTicket {
    pub worker: String,
    pub started_at: DateTime<Utc>,
}

impl ClaimTicket {
    /// The ticket of the job's current claim, if it is claimed.
    pub fn of(job: &Job) -> Option<Self> {
        match (&job.processing_worker, job.processing_started_at) {
            (Some(worker), Some(started_at)) if job.status == ProcessingStatus::Processing => {
                Some(Self {
                    worker: worker.clone(),
                    started_at,
                })
            }
            _ => None,
        }
    }
}

/// Storage contract the job state machine depends on.
///
/// Every method is a single atomic operation. Correctness across worker
/// processes relies on `try_claim` and `save_job` being compare-and-set.
pub trait JobRepository: Send + Sync {
    /// Stores a new job. Fails with [`DatabaseError::DuplicateJob`] if the id
    /// is taken.
    fn insert_job(&self, job: &Job) -> Result<(), DatabaseError>;

    fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError>;

    /// Claimable jobs: PENDING, in `batch` if given, backoff elapsed at
    /// `now`. Oldest first.
    fn find_pending_jobs(
        &self,
        batch: Option<&str>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError>;

    fn find_job_ids_by_batch(&self, batch: &str) -> Result<Vec<String>, DatabaseError>;

    /// Moves a claimable job to PROCESSING under `worker`. `None` when the
    /// job is unknown, not PENDING or still backing off.
    fn try_claim(
        &self,
        id: &str,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError>;

    /// Writes the whole job if `ticket` still owns it. Returns `false` and
    /// writes nothing when ownership was lost.
    fn save_job(&self, job: &Job, ticket: &ClaimTicket) -> Result<bool, DatabaseError>;

    /// Unconditionally returns a job to PENDING, clearing claim and retry
    /// bookkeeping and cached attachment text. `None` for an unknown id.
    fn reset_job(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError>;

    /// PROCESSING jobs claimed before `cutoff`.
    fn find_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError>;

    fn upsert_funding_program(&self, program: &FundingProgram) -> Result<(), DatabaseError>;

    fn find_program(&self, id: &str) -> Result<Option<FundingProgram>, DatabaseError>;

    /// Most recently updated program with this content hash.
    fn find_program_by_content_hash(
        &self,
        hash: &str,
    ) -> Result<Option<FundingProgram>, DatabaseError>;

    /// Job counts for every status, in lifecycle order.
    fn count_by_status(&self) -> Result<Vec<(ProcessingStatus, u64)>, DatabaseError>;
}

/// Timestamps are stored as fixed-width RFC 3339 strings so that text
/// comparison orders them correctly.
pub(crate) fn format_ts(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn parse_ts(column: &'static str, value: &str) -> Result<DateTime<Utc>, DatabaseError> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| DatabaseError::InvalidData {
            column,
            reason: e.to_string(),
        })
}

pub(crate) fn parse_opt_ts(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<DateTime<Utc>>, DatabaseError> {
    value.map(|v| parse_ts(column, &v)).transpose()
}

pub(crate) fn parse_opt_date(
    column: &'static str,
    value: Option<String>,
) -> Result<Option<NaiveDate>, DatabaseError> {
    value
        .map(|v| {
            NaiveDate::parse_from_str(&v, "%Y-%m-%d").map_err(|e| DatabaseError::InvalidData {
                column,
                reason: e.to_string(),
            })
        })
        .transpose()
}
