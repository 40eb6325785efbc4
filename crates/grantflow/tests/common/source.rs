//! Scripted `SourceFetcher` for driving the pipeline without a network.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use grantflow::error::SourceError;
use grantflow::source::SourceFetcher;

/// Serves registered pages and files. Unknown detail URLs answer 503 and
/// unknown attachment URLs answer 404.
#[derive(Default)]
pub struct StubSource {
    pages: HashMap<String, String>,
    files: HashMap<String, Vec<u8>>,
    /// Remaining forced failures per URL, consumed before the real answer.
    failures: Mutex<HashMap<String, (usize, u16)>>,
    detail_calls: AtomicUsize,
    attachment_calls: AtomicUsize,
}

impl StubSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn page(mut self, url: &str, html: &str) -> Self {
        self.pages.insert(url.to_string(), html.to_string());
        self
    }

    pub fn file(mut self, url: &str, bytes: impl Into<Vec<u8>>) -> Self {
        self.files.insert(url.to_string(), bytes.into());
        self
    }

    /// Makes the next `times` requests for `url` fail with `status`.
    pub fn failing(self, url: &str, times: usize, status: u16) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(url.to_string(), (times, status));
        self
    }

    pub fn detail_calls(&self) -> usize {
        self.detail_calls.load(Ordering::SeqCst)
    }

    pub fn attachment_calls(&self) -> usize {
        self.attachment_calls.load(Ordering::SeqCst)
    }

    fn forced_failure(&self, url: &str) -> Option<SourceError> {
        let mut failures = self.failures.lock().unwrap();
        let (remaining, status) = failures.get_mut(url)?;
        if *remaining == 0 {
            return None;
        }
        *remaining -= 1;
        Some(SourceError::Status {
            url: url.to_string(),
            status: *status,
        })
    }
}

#[async_trait]
impl SourceFetcher for StubSource {
    async fn fetch_detail(&self, url: &str) -> Result<String, SourceError> {
        self.detail_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.forced_failure(url) {
            return Err(err);
        }
        self.pages.get(url).cloned().ok_or(SourceError::Status {
            url: url.to_string(),
            status: 503,
        })
    }

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        self.attachment_calls.fetch_add(1, Ordering::SeqCst);
        if let Some(err) = self.forced_failure(url) {
            return Err(err);
        }
        self.files.get(url).cloned().ok_or(SourceError::Status {
            url: url.to_string(),
            status: 404,
        })
    }
}
