//! Heuristic field extraction over announcement text.
//!
//! Every extractor takes the full combined text and returns a value tagged
//! with its provenance. Extractors never fail: when nothing matches the
//! result is [`Extracted::NotFound`], never a made-up default.

pub mod budget;
pub mod dates;
pub mod eligibility;
pub mod trl;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::program::BusinessStructure;

pub use trl::TrlRange;

/// A value with provenance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provenance", content = "value", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Extracted<T> {
    /// Read directly from an explicit statement in the text.
    Exact(T),
    /// Derived from indirect evidence (keywords, partial dates, offsets).
    Inferred(T),
    NotFound,
}

impl<T> Extracted<T> {
    pub fn value(&self) -> Option<&T> {
        match self {
            Self::Exact(v) | Self::Inferred(v) => Some(v),
            Self::NotFound => None,
        }
    }

    pub fn is_found(&self) -> bool {
        !matches!(self, Self::NotFound)
    }

    pub fn is_exact(&self) -> bool {
        matches!(self, Self::Exact(_))
    }

    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Extracted<U> {
        match self {
            Self::Exact(v) => Extracted::Exact(f(v)),
            Self::Inferred(v) => Extracted::Inferred(f(v)),
            Self::NotFound => Extracted::NotFound,
        }
    }

    /// Keeps `self` unless it is `NotFound`.
    pub fn or_else(self, f: impl FnOnce() -> Extracted<T>) -> Extracted<T> {
        match self {
            Self::NotFound => f(),
            found => found,
        }
    }
}

/// Everything the field extractors recovered from one announcement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedFields {
    pub budget: Extracted<i64>,
    pub trl: Extracted<TrlRange>,
    pub published_at: Extracted<NaiveDate>,
    pub deadline: Extracted<NaiveDate>,
    pub business_structures: Vec<BusinessStructure>,
    pub certifications: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct FieldExtractor {
    budget_window: usize,
}

impl FieldExtractor {
    pub fn new() -> Self {
        Self {
            budget_window: budget::DEFAULT_WINDOW_CHARS,
        }
    }

    /// Maximum distance in characters between a budget anchor and an amount.
    pub fn with_budget_window(mut self, chars: usize) -> Self {
        self.budget_window = chars;
        self
    }

    pub fn extract(&self, text: &str) -> ExtractedFields {
        let _span = tracing::debug_span!("fields.extract", chars = text.len()).entered();

        let budget = budget::extract_budget(text, self.budget_window);
        let trl = trl::extract_trl(text);
        let (published_at, deadline) = dates::extract_dates(text);
        let business_structures = eligibility::extract_business_structures(text);
        let certifications = eligibility::extract_certifications(text);

        tracing::debug!(
            budget = ?budget.value(),
            trl = ?trl.value(),
            deadline = ?deadline.value(),
            structures = business_structures.len(),
            certifications = certifications.len(),
            "Field extraction finished"
        );

        ExtractedFields {
            budget,
            trl,
            published_at,
            deadline,
            business_structures,
            certifications,
        }
    }
}

impl Default for FieldExtractor {
    fn default() -> Self {
        Self::new()
    }
}
