//! Queries against the `jobs` table.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};

use super::{format_ts, parse_opt_ts, parse_ts, ClaimTicket, Database, DatabaseError};
use crate::worker::job::{DetailPageData, Job, ProcessingStatus};

const JOB_COLUMNS: &str = "id, source_url, batch_tag, status, processing_worker,
    processing_started_at, processing_attempts, processing_error, processed_at,
    next_attempt_at, detail_page_data, content_hash, funding_program_id,
    created_at, updated_at";

/// A raw job row from the database.
#[derive(Debug, Clone)]
struct JobRow {
    id: String,
    source_url: String,
    batch_tag: Option<String>,
    status: String,
    processing_worker: Option<String>,
    processing_started_at: Option<String>,
    processing_attempts: u32,
    processing_error: Option<String>,
    processed_at: Option<String>,
    next_attempt_at: Option<String>,
    detail_page_data: Option<String>,
    content_hash: Option<String>,
    funding_program_id: Option<String>,
    created_at: String,
    updated_at: String,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            source_url: row.get("source_url")?,
            batch_tag: row.get("batch_tag")?,
            status: row.get("status")?,
            processing_worker: row.get("processing_worker")?,
            processing_started_at: row.get("processing_started_at")?,
            processing_attempts: row.get("processing_attempts")?,
            processing_error: row.get("processing_error")?,
            processed_at: row.get("processed_at")?,
            next_attempt_at: row.get("next_attempt_at")?,
            detail_page_data: row.get("detail_page_data")?,
            content_hash: row.get("content_hash")?,
            funding_program_id: row.get("funding_program_id")?,
            created_at: row.get("created_at")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_job(self) -> Result<Job, DatabaseError> {
        let status = self
            .status
            .parse::<ProcessingStatus>()
            .map_err(|reason| DatabaseError::InvalidData {
                column: "status",
                reason,
            })?;
        let detail_page_data = self
            .detail_page_data
            .map(|json| serde_json::from_str::<DetailPageData>(&json))
            .transpose()?;

        Ok(Job {
            id: self.id,
            source_url: self.source_url,
            batch_tag: self.batch_tag,
            status,
            processing_worker: self.processing_worker,
            processing_started_at: parse_opt_ts(
                "processing_started_at",
                self.processing_started_at,
            )?,
            processing_attempts: self.processing_attempts,
            processing_error: self.processing_error,
            processed_at: parse_opt_ts("processed_at", self.processed_at)?,
            next_attempt_at: parse_opt_ts("next_attempt_at", self.next_attempt_at)?,
            detail_page_data,
            content_hash: self.content_hash,
            funding_program_id: self.funding_program_id,
            created_at: parse_ts("created_at", &self.created_at)?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

fn detail_json(job: &Job) -> Result<Option<String>, DatabaseError> {
    Ok(job
        .detail_page_data
        .as_ref()
        .map(serde_json::to_string)
        .transpose()?)
}

fn query_jobs(
    conn: &Connection,
    sql: &str,
    params: &[&dyn rusqlite::types::ToSql],
) -> Result<Vec<Job>, DatabaseError> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map(params, JobRow::from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(JobRow::into_job).collect()
}

fn find_in(conn: &Connection, id: &str) -> Result<Option<Job>, DatabaseError> {
    let sql = format!("SELECT {} FROM jobs WHERE id = ?1", JOB_COLUMNS);
    conn.query_row(&sql, params![id], JobRow::from_row)
        .optional()?
        .map(JobRow::into_job)
        .transpose()
}

/// Overwrites every mutable column of a job row. `guard` is appended to the
/// WHERE clause after the id match.
fn write_job(
    conn: &Connection,
    job: &Job,
    guard: &str,
    guard_params: &[&dyn rusqlite::types::ToSql],
) -> Result<usize, DatabaseError> {
    let sql = format!(
        "UPDATE jobs SET status = ?2, processing_worker = ?3, processing_started_at = ?4,
         processing_attempts = ?5, processing_error = ?6, processed_at = ?7,
         next_attempt_at = ?8, detail_page_data = ?9, content_hash = ?10,
         funding_program_id = ?11, updated_at = ?12, batch_tag = ?13
         WHERE id = ?1 {}",
        guard
    );

    let status = job.status.as_str();
    let detail = detail_json(job)?;
    let started_at = job.processing_started_at.map(format_ts);
    let processed_at = job.processed_at.map(format_ts);
    let next_attempt_at = job.next_attempt_at.map(format_ts);
    let updated_at = format_ts(job.updated_at);

    let mut values: Vec<&dyn rusqlite::types::ToSql> = vec![
        &job.id,
        &status,
        &job.processing_worker,
        &started_at,
        &job.processing_attempts,
        &job.processing_error,
        &processed_at,
        &next_attempt_at,
        &detail,
        &job.content_hash,
        &job.funding_program_id,
        &updated_at,
        &job.batch_tag,
    ];
    values.extend_from_slice(guard_params);

    Ok(conn.execute(&sql, values.as_slice())?)
}

/// Inserts a new job row.
pub fn insert(db: &Database, job: &Job) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        let detail = detail_json(job)?;
        let result = conn.execute(
            "INSERT INTO jobs (id, source_url, batch_tag, status, processing_worker,
             processing_started_at, processing_attempts, processing_error, processed_at,
             next_attempt_at, detail_page_data, content_hash, funding_program_id,
             created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
            params![
                job.id,
                job.source_url,
                job.batch_tag,
                job.status.as_str(),
                job.processing_worker,
                job.processing_started_at.map(format_ts),
                job.processing_attempts,
                job.processing_error,
                job.processed_at.map(format_ts),
                job.next_attempt_at.map(format_ts),
                detail,
                job.content_hash,
                job.funding_program_id,
                format_ts(job.created_at),
                format_ts(job.updated_at),
            ],
        );

        match result {
            Ok(_) => Ok(()),
            Err(rusqlite::Error::SqliteFailure(e, _))
                if e.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                Err(DatabaseError::DuplicateJob(job.id.clone()))
            }
            Err(e) => Err(e.into()),
        }
    })
}

/// Finds a job by its ID.
pub fn find_by_id(db: &Database, id: &str) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| find_in(conn, id))
}

pub fn find_pending(
    db: &Database,
    batch: Option<&str>,
    now: DateTime<Utc>,
    limit: usize,
) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs
             WHERE status = 'pending'
               AND (?1 IS NULL OR batch_tag = ?1)
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?2)
             ORDER BY created_at ASC
             LIMIT ?3",
            JOB_COLUMNS
        );
        let now = format_ts(now);
        let limit = limit as i64;
        query_jobs(conn, &sql, &[&batch, &now, &limit])
    })
}

pub fn find_ids_by_batch(db: &Database, batch: &str) -> Result<Vec<String>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt =
            conn.prepare("SELECT id FROM jobs WHERE batch_tag = ?1 ORDER BY created_at ASC")?;
        let ids = stmt
            .query_map(params![batch], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    })
}

/// Atomic PENDING -> PROCESSING transition.
pub fn try_claim(
    db: &Database,
    id: &str,
    worker: &str,
    now: DateTime<Utc>,
) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let now = format_ts(now);
        let changed = conn.execute(
            "UPDATE jobs SET status = 'processing', processing_worker = ?2,
             processing_started_at = ?3, updated_at = ?3
             WHERE id = ?1 AND status = 'pending'
               AND (next_attempt_at IS NULL OR next_attempt_at <= ?3)",
            params![id, worker, now],
        )?;
        if changed == 0 {
            return Ok(None);
        }
        find_in(conn, id)
    })
}

/// Compare-and-set write on the claim ticket.
pub fn save(db: &Database, job: &Job, ticket: &ClaimTicket) -> Result<bool, DatabaseError> {
    db.with_conn(|conn| {
        let started_at = format_ts(ticket.started_at);
        let changed = write_job(
            conn,
            job,
            "AND status = 'processing' AND processing_worker = ?14 AND processing_started_at = ?15",
            &[&ticket.worker, &started_at],
        )?;
        Ok(changed == 1)
    })
}

pub fn reset(db: &Database, id: &str, now: DateTime<Utc>) -> Result<Option<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let Some(mut job) = find_in(conn, id)? else {
            return Ok(None);
        };
        job.reset_for_reprocessing(now);
        write_job(conn, &job, "", &[])?;
        Ok(Some(job))
    })
}

pub fn find_stale(db: &Database, cutoff: DateTime<Utc>) -> Result<Vec<Job>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM jobs
             WHERE status = 'processing' AND processing_started_at < ?1
             ORDER BY processing_started_at ASC",
            JOB_COLUMNS
        );
        let cutoff = format_ts(cutoff);
        query_jobs(conn, &sql, &[&cutoff])
    })
}

/// Counts for every status, zero included.
pub fn count_by_status(db: &Database) -> Result<Vec<(ProcessingStatus, u64)>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ProcessingStatus::all()
            .into_iter()
            .map(|status| {
                let count = rows
                    .iter()
                    .find(|(s, _)| s == status.as_str())
                    .map_or(0, |(_, c)| *c as u64);
                (status, count)
            })
            .collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::job::Attachment;
    use chrono::Duration;

    fn db() -> Database {
        Database::open_in_memory().unwrap()
    }

    fn detail() -> DetailPageData {
        DetailPageData {
            title: "2024년 수소 실증 공고".to_string(),
            ministry: Some("산업통상자원부".to_string()),
            agency: None,
            description: "수소 연료전지 실증".to_string(),
            attachments: vec![Attachment::new("https://example.com/a.hwp", "a.hwp")],
        }
    }

    #[test]
    fn test_insert_and_find_round_trip() {
        let db = db();
        let job = Job::with_detail("https://example.com/ancm/1", detail());
        insert(&db, &job).unwrap();

        let found = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(found.id, job.id);
        assert_eq!(found.status, ProcessingStatus::Pending);
        assert_eq!(found.detail_page_data, job.detail_page_data);
        assert!(find_by_id(&db, "missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_insert() {
        let db = db();
        let job = Job::new("https://example.com/ancm/1");
        insert(&db, &job).unwrap();
        assert!(matches!(
            insert(&db, &job),
            Err(DatabaseError::DuplicateJob(_))
        ));
    }

    #[test]
    fn test_claim_is_exclusive() {
        let db = db();
        let job = Job::new("https://example.com/ancm/1");
        insert(&db, &job).unwrap();
        let now = Utc::now();

        let claimed = try_claim(&db, &job.id, "worker-a", now).unwrap().unwrap();
        assert_eq!(claimed.status, ProcessingStatus::Processing);
        assert_eq!(claimed.processing_worker.as_deref(), Some("worker-a"));

        assert!(try_claim(&db, &job.id, "worker-b", now).unwrap().is_none());
    }

    #[test]
    fn test_claim_respects_backoff() {
        let db = db();
        let now = Utc::now();
        let mut job = Job::new("https://example.com/ancm/1");
        job.next_attempt_at = Some(now + Duration::minutes(5));
        insert(&db, &job).unwrap();

        assert!(find_pending(&db, None, now, 10).unwrap().is_empty());
        assert!(try_claim(&db, &job.id, "w", now).unwrap().is_none());

        let later = now + Duration::minutes(6);
        assert_eq!(find_pending(&db, None, later, 10).unwrap().len(), 1);
        assert!(try_claim(&db, &job.id, "w", later).unwrap().is_some());
    }

    #[test]
    fn test_find_pending_filters_batch() {
        let db = db();
        insert(&db, &Job::new_in_batch("https://example.com/1", "2024-03")).unwrap();
        insert(&db, &Job::new_in_batch("https://example.com/2", "2024-04")).unwrap();
        insert(&db, &Job::new("https://example.com/3")).unwrap();

        let now = Utc::now();
        assert_eq!(find_pending(&db, None, now, 10).unwrap().len(), 3);
        let march = find_pending(&db, Some("2024-03"), now, 10).unwrap();
        assert_eq!(march.len(), 1);
        assert_eq!(march[0].source_url, "https://example.com/1");
        assert_eq!(find_pending(&db, None, now, 2).unwrap().len(), 2);
        assert_eq!(find_ids_by_batch(&db, "2024-04").unwrap().len(), 1);
    }

    #[test]
    fn test_save_requires_ticket() {
        let db = db();
        let job = Job::new("https://example.com/1");
        insert(&db, &job).unwrap();
        let mut claimed = try_claim(&db, &job.id, "worker-a", Utc::now()).unwrap().unwrap();
        let ticket = ClaimTicket::of(&claimed).unwrap();

        let stranger = ClaimTicket {
            worker: "worker-b".to_string(),
            started_at: ticket.started_at,
        };
        claimed.content_hash = Some("abc".to_string());
        assert!(!save(&db, &claimed, &stranger).unwrap());
        assert!(save(&db, &claimed, &ticket).unwrap());

        let stored = find_by_id(&db, &job.id).unwrap().unwrap();
        assert_eq!(stored.content_hash.as_deref(), Some("abc"));
    }

    #[test]
    fn test_reset_overwrites_claim() {
        let db = db();
        let job = Job::with_detail("https://example.com/1", detail());
        insert(&db, &job).unwrap();
        let mut claimed = try_claim(&db, &job.id, "worker-a", Utc::now()).unwrap().unwrap();
        let ticket = ClaimTicket::of(&claimed).unwrap();

        let reset_job = reset(&db, &job.id, Utc::now()).unwrap().unwrap();
        assert_eq!(reset_job.status, ProcessingStatus::Pending);
        assert!(reset_job.processing_worker.is_none());

        // The old claim can no longer write.
        claimed.status = ProcessingStatus::Completed;
        assert!(!save(&db, &claimed, &ticket).unwrap());
        assert!(reset(&db, "missing", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn test_find_stale() {
        let db = db();
        let job = Job::new("https://example.com/1");
        insert(&db, &job).unwrap();
        let claimed_at = Utc::now() - Duration::hours(2);
        try_claim(&db, &job.id, "w", claimed_at).unwrap().unwrap();

        assert!(find_stale(&db, claimed_at).unwrap().is_empty());
        let stale = find_stale(&db, Utc::now() - Duration::hours(1)).unwrap();
        assert_eq!(stale.len(), 1);
        assert_eq!(stale[0].id, job.id);
    }

    #[test]
    fn test_count_by_status_includes_zeroes() {
        let db = db();
        insert(&db, &Job::new("https://example.com/1")).unwrap();
        insert(&db, &Job::new("https://example.com/2")).unwrap();

        let counts = count_by_status(&db).unwrap();
        assert_eq!(counts.len(), 5);
        assert_eq!(counts[0], (ProcessingStatus::Pending, 2));
        assert!(counts[1..].iter().all(|(_, c)| *c == 0));
    }
}
