//! Shared test utilities for grantflow integration tests.
//!
//! This module provides:
//! - `StubSource`, an in-memory `SourceFetcher` with scripted pages, files and failures
//! - Builders for detail pages and state machines wired to any repository

#![allow(dead_code)]

pub mod builders;
pub mod source;

pub use builders::*;
pub use source::StubSource;
