pub mod job;
pub mod poller;
pub mod pool;

pub use job::{Attachment, DetailPageData, Job, JobReport, ProcessingStatus};
pub use poller::{PollSummary, Poller};
pub use pool::{WorkOutcome, WorkResult, WorkerPool};
