pub mod config;
pub mod context;
pub mod error;
pub mod runner;
pub mod state;

pub use config::{PipelineConfig, RetryPolicy};
pub use context::{PipelineContext, PipelineWarning};
pub use error::{PipelineError, ResetError};
pub use runner::{ClaimOutcome, JobStateMachine};
pub use state::{next_status, InvalidTransition, JobEvent};
