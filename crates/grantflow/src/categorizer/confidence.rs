use crate::categorizer::Classification;
use crate::fields::{Extracted, ExtractedFields};
use crate::program::{Confidence, EligibilityConfidence};

const HIGH_THRESHOLD: u32 = 5;
const MEDIUM_THRESHOLD: u32 = 3;

/// Evidence points behind the eligibility fields of a program.
pub fn eligibility_points(fields: &ExtractedFields, classification: &Classification) -> u32 {
    let category = match classification.confidence {
        Confidence::High => 2,
        Confidence::Medium => 1,
        Confidence::Low => 0,
    };
    let trl = match fields.trl {
        Extracted::Exact(_) => 2,
        Extracted::Inferred(_) => 1,
        Extracted::NotFound => 0,
    };

    category
        + trl
        + u32::from(fields.budget.is_found())
        + u32::from(fields.deadline.is_found())
        + u32::from(!fields.business_structures.is_empty())
}

pub fn eligibility_confidence(
    fields: &ExtractedFields,
    classification: &Classification,
) -> EligibilityConfidence {
    match eligibility_points(fields, classification) {
        p if p >= HIGH_THRESHOLD => EligibilityConfidence::High,
        p if p >= MEDIUM_THRESHOLD => EligibilityConfidence::Medium,
        _ => EligibilityConfidence::Low,
    }
}
