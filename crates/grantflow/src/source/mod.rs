//! Where announcements come from: detail pages and their attachments.
//!
//! The pipeline talks to a [`SourceFetcher`]; [`HttpSource`] is the reqwest
//! implementation and [`parse_detail_page`] turns the fetched HTML into a
//! [`DetailPageData`](crate::worker::job::DetailPageData).

pub mod detail;
pub mod http;

use async_trait::async_trait;

use crate::error::SourceError;

pub use detail::parse_detail_page;
pub use http::HttpSource;

#[async_trait]
pub trait SourceFetcher: Send + Sync {
    /// Raw HTML of an announcement detail page.
    async fn fetch_detail(&self, url: &str) -> Result<String, SourceError>;

    /// Raw bytes of an attached document.
    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, SourceError>;
}
