use std::fmt::{self, Write};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::program::IndustryCategory;

/// Lifecycle state of an ingestion job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Skipped,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn all() -> [ProcessingStatus; 5] {
        [
            Self::Pending,
            Self::Processing,
            Self::Completed,
            Self::Failed,
            Self::Skipped,
        ]
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "skipped" => Ok(Self::Skipped),
            other => Err(format!("unknown processing status '{}'", other)),
        }
    }
}

/// A file linked from an announcement detail page.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub url: String,
    pub filename: String,
    /// Filled in by the attachment text extractor once text was recovered.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted_text: Option<String>,
}

impl Attachment {
    pub fn new(url: impl Into<String>, filename: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            filename: filename.into(),
            extracted_text: None,
        }
    }
}

/// Raw payload scraped from an announcement detail page.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetailPageData {
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ministry: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agency: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

impl DetailPageData {
    /// Creates a formatted header block for prepending to extracted text.
    /// This lets field extractors see ministry and agency labels alongside
    /// the announcement body.
    pub fn to_header_block(&self) -> String {
        let mut output = String::new();

        // Writing to a String cannot fail.
        let _ = writeln!(output, "공고명: {}", self.title);
        if let Some(ministry) = &self.ministry {
            let _ = writeln!(output, "소관부처: {}", ministry);
        }
        if let Some(agency) = &self.agency {
            let _ = writeln!(output, "전문기관: {}", agency);
        }
        output.push('\n');
        output
    }

    /// Returns true if the page carries any text worth extracting from.
    pub fn has_usable_text(&self, min_chars: usize) -> bool {
        self.description.trim().chars().count() >= min_chars
    }

    /// Detail text followed by every recovered attachment text, separated by
    /// blank lines. Attachments are appended in page order.
    pub fn combined_text(&self) -> String {
        let mut text = self.to_header_block();
        text.push_str(self.description.trim());

        for attachment in &self.attachments {
            if let Some(extracted) = &attachment.extracted_text {
                text.push_str("\n\n");
                text.push_str(extracted.trim());
            }
        }

        text
    }

    pub fn recovered_attachment_count(&self) -> usize {
        self.attachments
            .iter()
            .filter(|a| a.extracted_text.is_some())
            .count()
    }
}

/// One unit of ingestion work: a single announcement.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: String,
    pub source_url: String,
    /// Batch or date-range tag assigned when the announcement was discovered.
    pub batch_tag: Option<String>,
    pub status: ProcessingStatus,
    pub processing_worker: Option<String>,
    pub processing_started_at: Option<DateTime<Utc>>,
    pub processing_attempts: u32,
    pub processing_error: Option<String>,
    pub processed_at: Option<DateTime<Utc>>,
    /// Earliest time a PENDING job may be claimed again after a failure.
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub detail_page_data: Option<DetailPageData>,
    pub content_hash: Option<String>,
    pub funding_program_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Creates a new PENDING job for an announcement URL.
    pub fn new(source_url: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            source_url: source_url.into(),
            batch_tag: None,
            status: ProcessingStatus::Pending,
            processing_worker: None,
            processing_started_at: None,
            processing_attempts: 0,
            processing_error: None,
            processed_at: None,
            next_attempt_at: None,
            detail_page_data: None,
            content_hash: None,
            funding_program_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Creates a new job tagged with a batch.
    pub fn new_in_batch(source_url: impl Into<String>, batch_tag: impl Into<String>) -> Self {
        let mut job = Self::new(source_url);
        job.batch_tag = Some(batch_tag.into());
        job
    }

    /// Creates a new job whose detail page has already been scraped.
    pub fn with_detail(source_url: impl Into<String>, detail: DetailPageData) -> Self {
        let mut job = Self::new(source_url);
        job.detail_page_data = Some(detail);
        job
    }

    /// Operator re-queue: back to PENDING with claim and retry bookkeeping
    /// cleared. Cached attachment text is dropped so improved extractors
    /// see the attachments again.
    pub fn reset_for_reprocessing(&mut self, now: DateTime<Utc>) {
        self.status = ProcessingStatus::Pending;
        self.processing_worker = None;
        self.processing_started_at = None;
        self.processing_attempts = 0;
        self.processing_error = None;
        self.processed_at = None;
        self.next_attempt_at = None;
        if let Some(detail) = self.detail_page_data.as_mut() {
            for attachment in &mut detail.attachments {
                attachment.extracted_text = None;
            }
        }
        self.updated_at = now;
    }

    pub fn title(&self) -> &str {
        self.detail_page_data
            .as_ref()
            .map(|d| d.title.as_str())
            .unwrap_or("")
    }
}

/// Outcome of one `run` of the state machine over a job.
#[derive(Debug, Clone)]
pub struct JobReport {
    pub job_id: String,
    pub source_url: String,
    pub status: ProcessingStatus,
    pub attempts: u32,
    pub funding_program_id: Option<String>,
    pub error: Option<String>,
    /// Set when the worker lost ownership before it could persist the outcome.
    pub ownership_lost: bool,
    /// Category decided by this run. `None` when no program was built here,
    /// including completions that linked a duplicate's program.
    pub category: Option<IndustryCategory>,
}

impl JobReport {
    pub fn from_job(job: &Job, ownership_lost: bool) -> Self {
        Self {
            job_id: job.id.clone(),
            source_url: job.source_url.clone(),
            status: job.status,
            attempts: job.processing_attempts,
            funding_program_id: job.funding_program_id.clone(),
            error: job.processing_error.clone(),
            ownership_lost,
            category: None,
        }
    }

    pub fn success(&self) -> bool {
        self.status == ProcessingStatus::Completed
    }
}
