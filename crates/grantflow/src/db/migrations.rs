//! Schema versioning for the SQLite store.
//!
//! Every step is recorded in `schema_history` once it has been applied.
//! Steps that add a column carry the column they introduce so a database
//! that already has it is only stamped, not altered.

use rusqlite::{params, Connection};

use super::error::DatabaseError;

struct Step {
    version: u32,
    name: &'static str,
    sql: &'static str,
    /// `(table, column)` introduced by an `ADD COLUMN` step.
    adds: Option<(&'static str, &'static str)>,
}

const STEPS: &[Step] = &[
    Step {
        version: 1,
        name: "jobs",
        sql: include_str!("sql/001_create_jobs.sql"),
        adds: None,
    },
    Step {
        version: 2,
        name: "funding_programs",
        sql: include_str!("sql/002_create_funding_programs.sql"),
        adds: None,
    },
    Step {
        version: 3,
        name: "jobs.next_attempt_at",
        sql: include_str!("sql/003_add_next_attempt_at.sql"),
        adds: Some(("jobs", "next_attempt_at")),
    },
    Step {
        version: 4,
        name: "claim_indexes",
        sql: include_str!("sql/004_create_claim_index.sql"),
        adds: None,
    },
];

/// Brings the schema up to the latest version.
pub fn run_all(conn: &mut Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS schema_history (
            version INTEGER PRIMARY KEY,
            name TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let applied = schema_version(conn)?;
    for step in STEPS.iter().filter(|s| s.version > applied) {
        let tx = conn.transaction()?;

        let present = match step.adds {
            Some((table, column)) => has_column(&tx, table, column)?,
            None => false,
        };
        if present {
            log::debug!("Schema v{} ({}) already in place", step.version, step.name);
        } else {
            log::info!("Applying schema v{} ({})", step.version, step.name);
            tx.execute_batch(step.sql)
                .map_err(|e| DatabaseError::Migration {
                    version: step.version,
                    reason: e.to_string(),
                })?;
        }

        tx.execute(
            "INSERT INTO schema_history (version, name) VALUES (?1, ?2)",
            params![step.version, step.name],
        )?;
        tx.commit()?;
    }
    Ok(())
}

fn schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    Ok(conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_history",
        [],
        |row| row.get(0),
    )?)
}

fn has_column(conn: &Connection, table: &str, column: &str) -> Result<bool, DatabaseError> {
    // PRAGMA arguments cannot be bound, so the name is checked instead.
    if table.is_empty() || !table.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'_') {
        return Err(DatabaseError::InvalidData {
            column: "table",
            reason: format!("'{}' is not a plain identifier", table),
        });
    }
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", table))?;
    let names = stmt.query_map([], |row| row.get::<_, String>(1))?;
    for name in names {
        if name? == column {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn history_len(conn: &Connection) -> u32 {
        conn.query_row("SELECT COUNT(*) FROM schema_history", [], |r| r.get(0))
            .unwrap()
    }

    #[test]
    fn test_fresh_database_reaches_latest_version() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();

        assert_eq!(schema_version(&conn).unwrap(), STEPS.len() as u32);
        assert!(has_column(&conn, "jobs", "next_attempt_at").unwrap());
        assert!(has_column(&conn, "funding_programs", "content_hash").unwrap());
    }

    #[test]
    fn test_rerun_applies_nothing() {
        let mut conn = Connection::open_in_memory().unwrap();
        run_all(&mut conn).unwrap();
        run_all(&mut conn).unwrap();
        assert_eq!(history_len(&conn), STEPS.len() as u32);
    }

    #[test]
    fn test_existing_column_is_only_stamped() {
        let mut conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(include_str!("sql/001_create_jobs.sql"))
            .unwrap();
        conn.execute_batch("ALTER TABLE jobs ADD COLUMN next_attempt_at TEXT;")
            .unwrap();
        conn.execute_batch(
            "CREATE TABLE schema_history (
                version INTEGER PRIMARY KEY,
                name TEXT NOT NULL,
                applied_at TEXT NOT NULL DEFAULT (datetime('now'))
            );
            INSERT INTO schema_history (version, name) VALUES (1, 'jobs');",
        )
        .unwrap();

        run_all(&mut conn).unwrap();
        assert_eq!(schema_version(&conn).unwrap(), STEPS.len() as u32);
    }

    #[test]
    fn test_has_column_rejects_odd_table_names() {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch("CREATE TABLE sample (id TEXT, title TEXT);")
            .unwrap();

        assert!(has_column(&conn, "sample", "title").unwrap());
        assert!(!has_column(&conn, "sample", "deadline").unwrap());
        assert!(has_column(&conn, "sample; DROP TABLE sample", "id").is_err());
    }
}
