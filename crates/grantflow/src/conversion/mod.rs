//! Remote document conversion used when native extraction fails.
//!
//! The conversion service is a web application driven through an
//! authenticated session. One session is shared by the whole worker process
//! through a [`SessionLease`], so conversions are serialised while native
//! extraction keeps running in parallel.

#[cfg(feature = "browser")]
pub mod browser;
pub mod lease;

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::Instrument;

use crate::config::ConversionConfig;
use crate::error::ConversionError;
use crate::processor::DocumentFormat;

#[cfg(feature = "browser")]
pub use browser::{BrowserConversionService, BrowserSettings};
pub use lease::{SessionGuard, SessionLease};

/// An authenticated conversion session.
#[derive(Debug, Clone)]
pub struct ConversionSession {
    pub id: String,
    pub authenticated_at: tokio::time::Instant,
}

impl ConversionSession {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            authenticated_at: tokio::time::Instant::now(),
        }
    }

    pub fn age(&self) -> Duration {
        self.authenticated_at.elapsed()
    }
}

/// A file handed to the conversion service.
#[derive(Debug, Clone)]
pub struct ConversionFile {
    pub filename: String,
    pub format: DocumentFormat,
    pub bytes: Vec<u8>,
}

/// Handle to an uploaded file on the service side.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadTicket(pub String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversionStatus {
    Pending,
    Done,
    Failed(String),
}

#[async_trait]
pub trait ConversionService: Send + Sync {
    async fn authenticate(&self) -> Result<ConversionSession, ConversionError>;

    async fn upload(
        &self,
        session: &ConversionSession,
        file: &ConversionFile,
    ) -> Result<UploadTicket, ConversionError>;

    async fn poll_status(
        &self,
        session: &ConversionSession,
        ticket: &UploadTicket,
    ) -> Result<ConversionStatus, ConversionError>;

    async fn download_text(
        &self,
        session: &ConversionSession,
        ticket: &UploadTicket,
    ) -> Result<String, ConversionError>;

    /// Frees the upload slot on the service side.
    async fn discard(
        &self,
        _session: &ConversionSession,
        _ticket: &UploadTicket,
    ) -> Result<(), ConversionError> {
        Ok(())
    }

    async fn release(&self, session: ConversionSession) -> Result<(), ConversionError>;
}

#[derive(Debug, Clone)]
pub struct ConversionSettings {
    pub poll_interval: Duration,
    /// Limit for every single service call.
    pub call_timeout: Duration,
    /// Limit for upload + polling + download of one file.
    pub round_trip_timeout: Duration,
    pub session_max_age: Duration,
}

impl Default for ConversionSettings {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(2),
            call_timeout: Duration::from_secs(30),
            round_trip_timeout: Duration::from_secs(180),
            session_max_age: Duration::from_secs(30 * 60),
        }
    }
}

impl From<&ConversionConfig> for ConversionSettings {
    fn from(config: &ConversionConfig) -> Self {
        Self {
            poll_interval: Duration::from_secs(config.poll_interval_secs),
            call_timeout: Duration::from_secs(config.call_timeout_secs),
            round_trip_timeout: Duration::from_secs(config.round_trip_timeout_secs),
            session_max_age: Duration::from_secs(config.session_max_age_secs),
        }
    }
}

pub(crate) async fn with_timeout<T, F>(
    operation: &'static str,
    limit: Duration,
    fut: F,
) -> Result<T, ConversionError>
where
    F: Future<Output = Result<T, ConversionError>>,
{
    tokio::time::timeout(limit, fut)
        .await
        .map_err(|_| ConversionError::Timeout {
            operation,
            secs: limit.as_secs(),
        })?
}

/// Runs conversion round trips over the process-wide session lease.
pub struct Converter {
    service: Arc<dyn ConversionService>,
    lease: SessionLease,
    settings: ConversionSettings,
}

impl Converter {
    pub fn new(service: Arc<dyn ConversionService>, settings: ConversionSettings) -> Self {
        let lease = SessionLease::new(
            service.clone(),
            settings.session_max_age,
            settings.call_timeout,
        );
        Self {
            service,
            lease,
            settings,
        }
    }

    /// Converts one file to text. Holds the session lease for the whole
    /// round trip and drops the session when the error suggests it is dead.
    pub async fn convert(&self, file: &ConversionFile) -> Result<String, ConversionError> {
        let span = tracing::info_span!(
            "conversion",
            filename = %file.filename,
            format = file.format.as_str()
        );

        async move {
            let guard = self.lease.acquire().await?;

            match self.round_trip(guard.session(), file).await {
                Err(e) if e.invalidates_session() => {
                    tracing::warn!("Dropping conversion session after error: {}", e);
                    guard.invalidate().await;
                    Err(e)
                }
                other => other,
            }
        }
        .instrument(span)
        .await
    }

    /// Upload, poll and download under the round-trip deadline. Once an
    /// upload ticket exists the slot is discarded on every exit path,
    /// including a deadline expiry.
    async fn round_trip(
        &self,
        session: &ConversionSession,
        file: &ConversionFile,
    ) -> Result<String, ConversionError> {
        let timeout = self.settings.call_timeout;
        let deadline = tokio::time::Instant::now() + self.settings.round_trip_timeout;

        let ticket = with_timeout("upload", timeout, self.service.upload(session, file)).await?;
        tracing::debug!("Uploaded {} as {}", file.filename, ticket.0);

        let converted = async {
            self.await_completion(session, &ticket).await?;
            with_timeout("download", timeout, self.service.download_text(session, &ticket)).await
        };
        let text = tokio::time::timeout_at(deadline, converted)
            .await
            .unwrap_or_else(|_| {
                Err(ConversionError::Timeout {
                    operation: "round trip",
                    secs: self.settings.round_trip_timeout.as_secs(),
                })
            });

        if let Err(e) = with_timeout("discard", timeout, self.service.discard(session, &ticket)).await
        {
            tracing::debug!("Failed to discard upload {}: {}", ticket.0, e);
        }

        text
    }

    async fn await_completion(
        &self,
        session: &ConversionSession,
        ticket: &UploadTicket,
    ) -> Result<(), ConversionError> {
        loop {
            let status = with_timeout(
                "poll",
                self.settings.call_timeout,
                self.service.poll_status(session, ticket),
            )
            .await?;

            match status {
                ConversionStatus::Pending => tokio::time::sleep(self.settings.poll_interval).await,
                ConversionStatus::Done => return Ok(()),
                ConversionStatus::Failed(reason) => return Err(ConversionError::Failed(reason)),
            }
        }
    }

    /// Releases the shared session. Called once at worker shutdown.
    pub async fn close(&self) {
        self.lease.close().await;
    }
}
