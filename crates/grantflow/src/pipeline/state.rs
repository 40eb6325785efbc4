//! Job lifecycle transitions.
//!
//! ```text
//!            Claim              Complete
//! PENDING ----------> PROCESSING ---------> COMPLETED
//!    ^                  |    |    Skip
//!    |   Fail/Reclaim   |    +------------> SKIPPED
//!    +------------------+
//!        (attempts left)     Fail/Reclaim (ceiling reached)
//!                            -------------> FAILED
//! ```
//!
//! `Reset` returns any state to PENDING.

use std::fmt;

use thiserror::Error;

use crate::worker::job::ProcessingStatus;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobEvent {
    Claim,
    Complete,
    Skip,
    Fail,
    /// A claim went stale and was released by another worker.
    Reclaim,
    Reset,
}

impl fmt::Display for JobEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Claim => "claim",
            Self::Complete => "complete",
            Self::Skip => "skip",
            Self::Fail => "fail",
            Self::Reclaim => "reclaim",
            Self::Reset => "reset",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("cannot {event} a {from} job")]
pub struct InvalidTransition {
    pub from: ProcessingStatus,
    pub event: JobEvent,
}

/// Status after applying `event`. `attempts` is the attempt count including
/// the one that just ended, so `Fail` with `attempts >= max_attempts` lands
/// in FAILED.
pub fn next_status(
    current: ProcessingStatus,
    event: JobEvent,
    attempts: u32,
    max_attempts: u32,
) -> Result<ProcessingStatus, InvalidTransition> {
    use ProcessingStatus::*;

    match (current, event) {
        (_, JobEvent::Reset) => Ok(Pending),
        (Pending, JobEvent::Claim) => Ok(Processing),
        (Processing, JobEvent::Complete) => Ok(Completed),
        (Processing, JobEvent::Skip) => Ok(Skipped),
        (Processing, JobEvent::Fail | JobEvent::Reclaim) => {
            if attempts >= max_attempts {
                Ok(Failed)
            } else {
                Ok(Pending)
            }
        }
        (from, event) => Err(InvalidTransition { from, event }),
    }
}
