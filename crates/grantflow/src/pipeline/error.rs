use thiserror::Error;

use super::state::InvalidTransition;
use crate::db::DatabaseError;
use crate::error::{ConversionError, SourceError};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("Detail page unavailable: {0}")]
    DetailPage(SourceError),

    #[error("Attachment download failed: {0}")]
    Attachment(SourceError),

    #[error("Conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error(transparent)]
    Transition(#[from] InvalidTransition),

    /// Another worker or an operator reset took the job over.
    #[error("Ownership of job '{0}' was lost")]
    OwnershipLost(String),
}

impl PipelineError {
    /// Transient errors send the job back to PENDING with backoff; the rest
    /// mean this input will never succeed and the job is skipped.
    pub fn is_transient(&self) -> bool {
        match self {
            // Detail pages that vanish or change layout usually come back.
            Self::DetailPage(e) => !matches!(e, SourceError::InvalidUrl { .. }),
            Self::Attachment(e) => e.is_transient(),
            Self::Conversion(e) => e.is_transient(),
            Self::Database(_) => true,
            Self::Transition(_) | Self::OwnershipLost(_) => false,
        }
    }
}

/// Operator reset rejected before any state change.
#[derive(Error, Debug)]
pub enum ResetError {
    #[error("job id must not be empty")]
    EmptyId,

    #[error("job '{0}' not found")]
    NotFound(String),

    #[error("no jobs in batch '{0}'")]
    EmptyBatch(String),

    #[error(transparent)]
    Database(#[from] DatabaseError),
}
