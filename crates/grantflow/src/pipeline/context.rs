use crate::categorizer::Classification;
use crate::db::ClaimTicket;
use crate::fields::ExtractedFields;
use crate::worker::job::Job;

/// Per-run state threaded through the pipeline steps.
pub struct PipelineContext {
    pub job: Job,
    /// Ownership proof from the claim; every write is guarded by it.
    pub ticket: ClaimTicket,

    pub fields: Option<ExtractedFields>,
    pub classification: Option<Classification>,

    /// Attachments that were given up on without failing the job.
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineContext {
    pub fn new(job: Job, ticket: ClaimTicket) -> Self {
        Self {
            job,
            ticket,
            fields: None,
            classification: None,
            warnings: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PipelineWarning {
    AttachmentUnavailable { filename: String, error: String },
    NoTextRecovered { filename: String },
}
