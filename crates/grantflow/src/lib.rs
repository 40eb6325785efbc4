pub mod categorizer;
pub mod config;
pub mod conversion;
pub mod db;
pub mod error;
pub mod fields;
pub mod hashing;
pub mod logging;
pub mod pipeline;
pub mod processor;
pub mod program;
pub mod sanitize;
pub mod secrets;
pub mod source;
pub mod worker;

pub use categorizer::{Classification, Classifier};
pub use config::{load_config, Config};
pub use db::{JobRepository, MemoryRepository, SqliteRepository};
pub use error::{
    ConfigError, ConversionError, ExtractError, GrantflowError, Result, SourceError, WorkerError,
};
pub use fields::{ExtractedFields, FieldExtractor};
pub use pipeline::{JobStateMachine, PipelineConfig, PipelineError, ResetError};
pub use program::FundingProgram;
pub use secrets::{resolve_secret, SecretError};
pub use source::{HttpSource, SourceFetcher};
pub use worker::{Job, JobReport, ProcessingStatus};
