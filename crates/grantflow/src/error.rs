use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GrantflowError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Extraction error: {0}")]
    Extract(#[from] ExtractError),

    #[error("Conversion error: {0}")]
    Conversion(#[from] ConversionError),

    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] crate::pipeline::PipelineError),

    #[error("Reset rejected: {0}")]
    Reset(#[from] crate::pipeline::ResetError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file '{path}': {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse config JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("Config validation failed: {message}")]
    Validation { message: String },

    #[error("Schema validation failed: {errors}")]
    SchemaValidation { errors: String },

    #[error("Invalid classification rule '{id}': {reason}")]
    InvalidRule { id: String, reason: String },

    #[error("Failed to resolve secret: {0}")]
    Secret(#[from] crate::secrets::SecretError),
}

/// Errors raised by native (in-process) document parsers.
///
/// All of these are permanent for the attachment that produced them: the same
/// bytes will fail the same way on every retry.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("Unsupported document format: {0}")]
    UnsupportedFormat(String),

    #[error("Document is encrypted or distribution-locked: {0}")]
    Encrypted(String),

    #[error("Failed to parse HWP: {0}")]
    Hwp(String),

    #[error("Failed to parse HWPX: {0}")]
    Hwpx(String),

    #[error("Failed to parse PDF: {0}")]
    Pdf(String),

    #[error("Failed to decode text: {0}")]
    Text(String),

    #[error("Extracted text unusable ({chars} chars, minimum {min})")]
    Unusable { chars: usize, min: usize },
}

#[derive(Error, Debug)]
pub enum ConversionError {
    #[error("Conversion service unavailable: {0}")]
    Unavailable(String),

    #[error("Conversion service timed out during {operation} after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },

    #[error("Conversion service authentication failed: {0}")]
    Authentication(String),

    #[error("Conversion service rejected the upload: {0}")]
    Rejected(String),

    #[error("Conversion failed on the service side: {0}")]
    Failed(String),

    #[error("Browser automation error: {0}")]
    Browser(String),

    #[error("I/O error while preparing upload: {0}")]
    Io(#[from] std::io::Error),
}

impl ConversionError {
    /// Transient errors are bubbled up to the job state machine for a retry;
    /// the rest mean this attachment cannot be converted at all.
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::Rejected(_) | Self::Failed(_))
    }

    /// Whether the current authenticated session should be thrown away.
    pub fn invalidates_session(&self) -> bool {
        matches!(
            self,
            Self::Authentication(_) | Self::Browser(_) | Self::Timeout { .. }
        )
    }
}

#[derive(Error, Debug)]
pub enum SourceError {
    #[error("Request to '{url}' failed: {source}")]
    Http {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Request to '{url}' returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Request to '{url}' timed out")]
    Timeout { url: String },

    #[error("Invalid URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Response from '{url}' exceeds {limit} bytes")]
    TooLarge { url: String, limit: u64 },

    #[error("Could not parse detail page '{url}': {reason}")]
    Parse { url: String, reason: String },
}

impl SourceError {
    /// Network failures and unexpected page layouts may clear up on a later
    /// attempt. A malformed URL, an oversized file or a 4xx answer will not.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Http { .. } | Self::Timeout { .. } | Self::Parse { .. } => true,
            Self::Status { status, .. } => *status >= 500 || *status == 408 || *status == 429,
            Self::InvalidUrl { .. } | Self::TooLarge { .. } => false,
        }
    }
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Failed to spawn worker: {0}")]
    SpawnFailed(String),

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Failed to start async runtime: {0}")]
    Runtime(String),
}

pub type Result<T> = std::result::Result<T, GrantflowError>;
