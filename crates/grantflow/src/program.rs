use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::categorizer::Classification;
use crate::fields::{Extracted, ExtractedFields};
use crate::hashing::short_digest;
use crate::worker::job::{DetailPageData, Job};

/// Deterministic program id for a job, so re-runs upsert the same record.
pub fn program_id_for(job_id: &str) -> String {
    format!("fp_{}", short_digest(job_id, 16))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BusinessStructure {
    Corporation,
    SoleProprietor,
    Cooperative,
    NonProfit,
    University,
    ResearchInstitute,
}

impl BusinessStructure {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Corporation => "CORPORATION",
            Self::SoleProprietor => "SOLE_PROPRIETOR",
            Self::Cooperative => "COOPERATIVE",
            Self::NonProfit => "NON_PROFIT",
            Self::University => "UNIVERSITY",
            Self::ResearchInstitute => "RESEARCH_INSTITUTE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IndustryCategory {
    Ict,
    BioHealth,
    Energy,
    Environment,
    Manufacturing,
    Agriculture,
    Marine,
    Defense,
    Construction,
    Transportation,
    Culture,
    General,
}

impl IndustryCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Ict => "ICT",
            Self::BioHealth => "BIO_HEALTH",
            Self::Energy => "ENERGY",
            Self::Environment => "ENVIRONMENT",
            Self::Manufacturing => "MANUFACTURING",
            Self::Agriculture => "AGRICULTURE",
            Self::Marine => "MARINE",
            Self::Defense => "DEFENSE",
            Self::Construction => "CONSTRUCTION",
            Self::Transportation => "TRANSPORTATION",
            Self::Culture => "CULTURE",
            Self::General => "GENERAL",
        }
    }

    pub fn all() -> [IndustryCategory; 12] {
        [
            Self::Ict,
            Self::BioHealth,
            Self::Energy,
            Self::Environment,
            Self::Manufacturing,
            Self::Agriculture,
            Self::Marine,
            Self::Defense,
            Self::Construction,
            Self::Transportation,
            Self::Culture,
            Self::General,
        ]
    }
}

impl fmt::Display for IndustryCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for IndustryCategory {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let upper = s.trim().to_uppercase();
        Self::all()
            .into_iter()
            .find(|c| c.as_str() == upper)
            .ok_or_else(|| format!("unknown industry category '{}'", s))
    }
}

/// Certainty of the industry classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// How certain the eligibility-relevant fields are. Says nothing about the
/// quality of the program itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EligibilityConfidence {
    Low,
    Medium,
    High,
}

impl EligibilityConfidence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

/// Structured record produced from a completed job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FundingProgram {
    pub id: String,
    pub job_id: String,
    pub source_url: String,
    pub title: String,
    pub ministry: Option<String>,
    pub agency: Option<String>,
    pub content_hash: Option<String>,

    /// KRW. `Some(0)` is a real zero budget, `None` means nothing matched.
    pub budget_amount: Option<i64>,
    pub min_trl: Option<u8>,
    pub max_trl: Option<u8>,
    pub trl_inferred: bool,
    pub published_at: Option<NaiveDate>,
    pub deadline: Option<NaiveDate>,
    pub allowed_business_structures: Vec<BusinessStructure>,
    pub required_certifications: Vec<String>,

    pub category: IndustryCategory,
    pub category_confidence: Confidence,
    pub category_keywords: Vec<String>,
    pub requires_regional_filter: bool,
    pub regional_keywords: Vec<String>,

    pub eligibility_confidence: EligibilityConfidence,
    pub updated_at: DateTime<Utc>,
}

impl FundingProgram {
    /// Combines the extraction and classification results for a job.
    pub fn assemble(
        job: &Job,
        detail: &DetailPageData,
        fields: &ExtractedFields,
        classification: &Classification,
        eligibility_confidence: EligibilityConfidence,
    ) -> Self {
        let (min_trl, max_trl, trl_inferred) = match &fields.trl {
            Extracted::Exact(range) => (range.min, range.max, false),
            Extracted::Inferred(range) => (range.min, range.max, true),
            Extracted::NotFound => (None, None, false),
        };

        Self {
            id: program_id_for(&job.id),
            job_id: job.id.clone(),
            source_url: job.source_url.clone(),
            title: detail.title.clone(),
            ministry: detail.ministry.clone(),
            agency: detail.agency.clone(),
            content_hash: job.content_hash.clone(),
            budget_amount: fields.budget.value().copied(),
            min_trl,
            max_trl,
            trl_inferred,
            published_at: fields.published_at.value().copied(),
            deadline: fields.deadline.value().copied(),
            allowed_business_structures: fields.business_structures.clone(),
            required_certifications: fields.certifications.clone(),
            category: classification.category,
            category_confidence: classification.confidence,
            category_keywords: classification.matched_keywords.clone(),
            requires_regional_filter: classification.requires_regional_filter,
            regional_keywords: classification.regional_keywords.clone(),
            eligibility_confidence,
            updated_at: Utc::now(),
        }
    }

    /// Same record with volatile bookkeeping cleared, for equality checks
    /// across re-runs.
    pub fn without_timestamps(&self) -> Self {
        let mut copy = self.clone();
        copy.updated_at = DateTime::<Utc>::UNIX_EPOCH;
        copy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_program_id_is_deterministic() {
        let id = program_id_for("7f1c2e9a-0000-4000-8000-000000000001");
        assert!(id.starts_with("fp_"));
        assert_eq!(id.len(), 3 + 16);
        assert_eq!(id, program_id_for("7f1c2e9a-0000-4000-8000-000000000001"));
        assert_ne!(id, program_id_for("7f1c2e9a-0000-4000-8000-000000000002"));
    }

    #[test]
    fn test_category_parse() {
        assert_eq!("ict".parse::<IndustryCategory>(), Ok(IndustryCategory::Ict));
        assert_eq!(
            "BIO_HEALTH".parse::<IndustryCategory>(),
            Ok(IndustryCategory::BioHealth)
        );
        assert!("SPACE".parse::<IndustryCategory>().is_err());
    }

    #[test]
    fn test_category_serde_matches_as_str() {
        for category in IndustryCategory::all() {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{}\"", category.as_str()));
        }
    }

    #[test]
    fn test_business_structure_serde() {
        let json = serde_json::to_string(&BusinessStructure::ResearchInstitute).unwrap();
        assert_eq!(json, "\"RESEARCH_INSTITUTE\"");
        assert_eq!(
            BusinessStructure::SoleProprietor.as_str(),
            "SOLE_PROPRIETOR"
        );
    }

    #[test]
    fn test_confidence_ordering() {
        assert!(Confidence::High > Confidence::Medium);
        assert!(EligibilityConfidence::Medium > EligibilityConfidence::Low);
    }
}
