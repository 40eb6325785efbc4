//! SQLite-backed [`JobRepository`].

use std::path::Path;

use chrono::{DateTime, Utc};

use super::{job_repo, program_repo, ClaimTicket, Database, DatabaseError, JobRepository};
use crate::program::FundingProgram;
use crate::worker::job::{Job, ProcessingStatus};

/// Production repository. Several processes may open the same file; claims
/// and ownership-guarded saves are single conditional UPDATE statements.
#[derive(Clone)]
pub struct SqliteRepository {
    db: Database,
}

impl SqliteRepository {
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        Ok(Self {
            db: Database::open(path)?,
        })
    }

    pub fn open_in_memory() -> Result<Self, DatabaseError> {
        Ok(Self {
            db: Database::open_in_memory()?,
        })
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}

impl JobRepository for SqliteRepository {
    fn insert_job(&self, job: &Job) -> Result<(), DatabaseError> {
        job_repo::insert(&self.db, job)
    }

    fn find_job(&self, id: &str) -> Result<Option<Job>, DatabaseError> {
        job_repo::find_by_id(&self.db, id)
    }

    fn find_pending_jobs(
        &self,
        batch: Option<&str>,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<Job>, DatabaseError> {
        job_repo::find_pending(&self.db, batch, now, limit)
    }

    fn find_job_ids_by_batch(&self, batch: &str) -> Result<Vec<String>, DatabaseError> {
        job_repo::find_ids_by_batch(&self.db, batch)
    }

    fn try_claim(
        &self,
        id: &str,
        worker: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<Job>, DatabaseError> {
        job_repo::try_claim(&self.db, id, worker, now)
    }

    fn save_job(&self, job: &Job, ticket: &ClaimTicket) -> Result<bool, DatabaseError> {
        job_repo::save(&self.db, job, ticket)
    }

    fn reset_job(&self, id: &str, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
        job_repo::reset(&self.db, id, now)
    }

    fn find_stale_jobs(&self, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
        job_repo::find_stale(&self.db, cutoff)
    }

    fn upsert_funding_program(&self, program: &FundingProgram) -> Result<(), DatabaseError> {
        program_repo::upsert(&self.db, program)
    }

    fn find_program(&self, id: &str) -> Result<Option<FundingProgram>, DatabaseError> {
        program_repo::find_by_id(&self.db, id)
    }

    fn find_program_by_content_hash(
        &self,
        hash: &str,
    ) -> Result<Option<FundingProgram>, DatabaseError> {
        program_repo::find_by_content_hash(&self.db, hash)
    }

    fn count_by_status(&self) -> Result<Vec<(ProcessingStatus, u64)>, DatabaseError> {
        job_repo::count_by_status(&self.db)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_two_handles_share_one_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("grantflow.db");
        let a = SqliteRepository::open(&path).unwrap();
        let b = SqliteRepository::open(&path).unwrap();

        let job = Job::new("https://example.com/ancm/1");
        a.insert_job(&job).unwrap();

        let now = Utc::now();
        assert!(b.try_claim(&job.id, "worker-b", now).unwrap().is_some());
        assert!(a.try_claim(&job.id, "worker-a", now).unwrap().is_none());
        assert_eq!(
            a.find_job(&job.id).unwrap().unwrap().processing_worker.as_deref(),
            Some("worker-b")
        );
    }
}
