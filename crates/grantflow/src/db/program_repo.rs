//! Queries against the `funding_programs` table.

use rusqlite::{params, OptionalExtension, Row};
use serde::de::DeserializeOwned;

use super::{format_ts, parse_opt_date, parse_ts, Database, DatabaseError};
use crate::program::FundingProgram;

const PROGRAM_COLUMNS: &str = "id, job_id, source_url, title, ministry, agency, content_hash,
    budget_amount, min_trl, max_trl, trl_inferred, published_at, deadline,
    allowed_business_structures, required_certifications, category, category_confidence,
    category_keywords, requires_regional_filter, regional_keywords, eligibility_confidence,
    updated_at";

#[derive(Debug, Clone)]
struct ProgramRow {
    id: String,
    job_id: String,
    source_url: String,
    title: String,
    ministry: Option<String>,
    agency: Option<String>,
    content_hash: Option<String>,
    budget_amount: Option<i64>,
    min_trl: Option<u8>,
    max_trl: Option<u8>,
    trl_inferred: bool,
    published_at: Option<String>,
    deadline: Option<String>,
    allowed_business_structures: String,
    required_certifications: String,
    category: String,
    category_confidence: String,
    category_keywords: String,
    requires_regional_filter: bool,
    regional_keywords: String,
    eligibility_confidence: String,
    updated_at: String,
}

impl ProgramRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            job_id: row.get("job_id")?,
            source_url: row.get("source_url")?,
            title: row.get("title")?,
            ministry: row.get("ministry")?,
            agency: row.get("agency")?,
            content_hash: row.get("content_hash")?,
            budget_amount: row.get("budget_amount")?,
            min_trl: row.get("min_trl")?,
            max_trl: row.get("max_trl")?,
            trl_inferred: row.get("trl_inferred")?,
            published_at: row.get("published_at")?,
            deadline: row.get("deadline")?,
            allowed_business_structures: row.get("allowed_business_structures")?,
            required_certifications: row.get("required_certifications")?,
            category: row.get("category")?,
            category_confidence: row.get("category_confidence")?,
            category_keywords: row.get("category_keywords")?,
            requires_regional_filter: row.get("requires_regional_filter")?,
            regional_keywords: row.get("regional_keywords")?,
            eligibility_confidence: row.get("eligibility_confidence")?,
            updated_at: row.get("updated_at")?,
        })
    }

    fn into_program(self) -> Result<FundingProgram, DatabaseError> {
        Ok(FundingProgram {
            id: self.id,
            job_id: self.job_id,
            source_url: self.source_url,
            title: self.title,
            ministry: self.ministry,
            agency: self.agency,
            content_hash: self.content_hash,
            budget_amount: self.budget_amount,
            min_trl: self.min_trl,
            max_trl: self.max_trl,
            trl_inferred: self.trl_inferred,
            published_at: parse_opt_date("published_at", self.published_at)?,
            deadline: parse_opt_date("deadline", self.deadline)?,
            allowed_business_structures: serde_json::from_str(&self.allowed_business_structures)?,
            required_certifications: serde_json::from_str(&self.required_certifications)?,
            category: self
                .category
                .parse()
                .map_err(|reason| DatabaseError::InvalidData {
                    column: "category",
                    reason,
                })?,
            category_confidence: parse_label("category_confidence", &self.category_confidence)?,
            category_keywords: serde_json::from_str(&self.category_keywords)?,
            requires_regional_filter: self.requires_regional_filter,
            regional_keywords: serde_json::from_str(&self.regional_keywords)?,
            eligibility_confidence: parse_label(
                "eligibility_confidence",
                &self.eligibility_confidence,
            )?,
            updated_at: parse_ts("updated_at", &self.updated_at)?,
        })
    }
}

/// Parses an upper-case label column (`"HIGH"`, `"MEDIUM"`, ...) through the
/// enum's serde representation.
fn parse_label<T: DeserializeOwned>(column: &'static str, value: &str) -> Result<T, DatabaseError> {
    serde_json::from_value(serde_json::Value::String(value.to_string())).map_err(|e| {
        DatabaseError::InvalidData {
            column,
            reason: e.to_string(),
        }
    })
}

/// Inserts a program or replaces every column of the existing row with the
/// same id.
pub fn upsert(db: &Database, program: &FundingProgram) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "INSERT INTO funding_programs (id, job_id, source_url, title, ministry, agency,
             content_hash, budget_amount, min_trl, max_trl, trl_inferred, published_at, deadline,
             allowed_business_structures, required_certifications, category, category_confidence,
             category_keywords, requires_regional_filter, regional_keywords,
             eligibility_confidence, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?21, ?22)
             ON CONFLICT(id) DO UPDATE SET
                job_id = excluded.job_id,
                source_url = excluded.source_url,
                title = excluded.title,
                ministry = excluded.ministry,
                agency = excluded.agency,
                content_hash = excluded.content_hash,
                budget_amount = excluded.budget_amount,
                min_trl = excluded.min_trl,
                max_trl = excluded.max_trl,
                trl_inferred = excluded.trl_inferred,
                published_at = excluded.published_at,
                deadline = excluded.deadline,
                allowed_business_structures = excluded.allowed_business_structures,
                required_certifications = excluded.required_certifications,
                category = excluded.category,
                category_confidence = excluded.category_confidence,
                category_keywords = excluded.category_keywords,
                requires_regional_filter = excluded.requires_regional_filter,
                regional_keywords = excluded.regional_keywords,
                eligibility_confidence = excluded.eligibility_confidence,
                updated_at = excluded.updated_at",
            params![
                program.id,
                program.job_id,
                program.source_url,
                program.title,
                program.ministry,
                program.agency,
                program.content_hash,
                program.budget_amount,
                program.min_trl,
                program.max_trl,
                program.trl_inferred,
                program.published_at.map(|d| d.format("%Y-%m-%d").to_string()),
                program.deadline.map(|d| d.format("%Y-%m-%d").to_string()),
                serde_json::to_string(&program.allowed_business_structures)?,
                serde_json::to_string(&program.required_certifications)?,
                program.category.as_str(),
                program.category_confidence.as_str(),
                serde_json::to_string(&program.category_keywords)?,
                program.requires_regional_filter,
                serde_json::to_string(&program.regional_keywords)?,
                program.eligibility_confidence.as_str(),
                format_ts(program.updated_at),
            ],
        )?;
        Ok(())
    })
}

pub fn find_by_id(db: &Database, id: &str) -> Result<Option<FundingProgram>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!("SELECT {} FROM funding_programs WHERE id = ?1", PROGRAM_COLUMNS);
        conn.query_row(&sql, params![id], ProgramRow::from_row)
            .optional()?
            .map(ProgramRow::into_program)
            .transpose()
    })
}

pub fn find_by_content_hash(
    db: &Database,
    hash: &str,
) -> Result<Option<FundingProgram>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT {} FROM funding_programs WHERE content_hash = ?1
             ORDER BY updated_at DESC LIMIT 1",
            PROGRAM_COLUMNS
        );
        conn.query_row(&sql, params![hash], ProgramRow::from_row)
            .optional()?
            .map(ProgramRow::into_program)
            .transpose()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::program::{BusinessStructure, Confidence, EligibilityConfidence, IndustryCategory};
    use chrono::{Duration, NaiveDate, Utc};

    fn program(id: &str, hash: &str) -> FundingProgram {
        FundingProgram {
            id: id.to_string(),
            job_id: format!("job-{}", id),
            source_url: "https://example.com/ancm/1".to_string(),
            title: "2024년 수소 실증 공고".to_string(),
            ministry: Some("산업통상자원부".to_string()),
            agency: None,
            content_hash: Some(hash.to_string()),
            budget_amount: Some(500_000_000),
            min_trl: Some(4),
            max_trl: Some(6),
            trl_inferred: false,
            published_at: NaiveDate::from_ymd_opt(2024, 3, 1),
            deadline: NaiveDate::from_ymd_opt(2024, 4, 15),
            allowed_business_structures: vec![
                BusinessStructure::Corporation,
                BusinessStructure::ResearchInstitute,
            ],
            required_certifications: vec!["벤처기업".to_string()],
            category: IndustryCategory::Energy,
            category_confidence: Confidence::High,
            category_keywords: vec!["수소".to_string()],
            requires_regional_filter: true,
            regional_keywords: vec!["지역특화".to_string()],
            eligibility_confidence: EligibilityConfidence::Medium,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_upsert_and_find() {
        let db = Database::open_in_memory().unwrap();
        let p = program("fp_1", "hash-a");
        upsert(&db, &p).unwrap();

        let found = find_by_id(&db, "fp_1").unwrap().unwrap();
        assert_eq!(found.without_timestamps(), p.without_timestamps());
        assert!(find_by_id(&db, "fp_missing").unwrap().is_none());
    }

    #[test]
    fn test_upsert_replaces_existing_row() {
        let db = Database::open_in_memory().unwrap();
        let mut p = program("fp_1", "hash-a");
        upsert(&db, &p).unwrap();

        p.budget_amount = None;
        p.category = IndustryCategory::General;
        p.category_confidence = Confidence::Low;
        upsert(&db, &p).unwrap();

        let found = find_by_id(&db, "fp_1").unwrap().unwrap();
        assert_eq!(found.budget_amount, None);
        assert_eq!(found.category, IndustryCategory::General);
        db.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM funding_programs", [], |r| r.get(0))?;
            assert_eq!(count, 1);
            Ok(())
        })
        .unwrap();
    }

    #[test]
    fn test_find_by_content_hash_prefers_latest() {
        let db = Database::open_in_memory().unwrap();
        let mut older = program("fp_old", "hash-a");
        older.updated_at = Utc::now() - Duration::days(1);
        upsert(&db, &older).unwrap();
        upsert(&db, &program("fp_new", "hash-a")).unwrap();

        let found = find_by_content_hash(&db, "hash-a").unwrap().unwrap();
        assert_eq!(found.id, "fp_new");
        assert!(find_by_content_hash(&db, "hash-b").unwrap().is_none());
    }

    #[test]
    fn test_parse_label() {
        let c: Confidence = parse_label("c", "MEDIUM").unwrap();
        assert_eq!(c, Confidence::Medium);
        assert!(parse_label::<Confidence>("c", "SURE").is_err());
    }
}
