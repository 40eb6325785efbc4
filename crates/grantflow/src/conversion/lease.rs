use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

use crate::conversion::{with_timeout, ConversionService, ConversionSession};
use crate::error::ConversionError;

/// Process-wide lease over a single authenticated conversion session.
///
/// The session is created lazily on first use and renewed once it is older
/// than `max_age` or after a caller invalidated it. Holding a [`SessionGuard`]
/// gives exclusive use of the session; other callers wait on the mutex.
pub struct SessionLease {
    service: Arc<dyn ConversionService>,
    slot: Mutex<Option<ConversionSession>>,
    max_age: Duration,
    auth_timeout: Duration,
}

impl SessionLease {
    pub fn new(service: Arc<dyn ConversionService>, max_age: Duration, auth_timeout: Duration) -> Self {
        Self {
            service,
            slot: Mutex::new(None),
            max_age,
            auth_timeout,
        }
    }

    pub async fn acquire(&self) -> Result<SessionGuard<'_>, ConversionError> {
        let mut slot = self.slot.lock().await;

        let current = match slot.take() {
            Some(session) if session.age() < self.max_age => session,
            stale => {
                if let Some(old) = stale {
                    log::info!("Conversion session {} expired, renewing", old.id);
                    release_quietly(self.service.as_ref(), old).await;
                }

                let session = with_timeout(
                    "authenticate",
                    self.auth_timeout,
                    self.service.authenticate(),
                )
                .await?;
                log::info!("Authenticated conversion session {}", session.id);
                session
            }
        };

        *slot = Some(current.clone());

        Ok(SessionGuard {
            slot,
            session: current,
            service: self.service.as_ref(),
        })
    }

    /// Releases the session if one is held. Safe to call more than once.
    pub async fn close(&self) {
        let mut slot = self.slot.lock().await;
        if let Some(session) = slot.take() {
            log::info!("Releasing conversion session {}", session.id);
            release_quietly(self.service.as_ref(), session).await;
        }
    }

    pub async fn is_active(&self) -> bool {
        self.slot.lock().await.is_some()
    }
}

async fn release_quietly(service: &dyn ConversionService, session: ConversionSession) {
    let id = session.id.clone();
    if let Err(e) = service.release(session).await {
        log::warn!("Failed to release conversion session {}: {}", id, e);
    }
}

/// Exclusive use of the leased session until dropped.
pub struct SessionGuard<'a> {
    slot: MutexGuard<'a, Option<ConversionSession>>,
    session: ConversionSession,
    service: &'a dyn ConversionService,
}

impl<'a> SessionGuard<'a> {
    pub fn session(&self) -> &ConversionSession {
        &self.session
    }

    /// Drops the session so the next `acquire` authenticates again.
    pub async fn invalidate(mut self) {
        if let Some(session) = self.slot.take() {
            release_quietly(self.service, session).await;
        }
    }
}
