//! Shared test utilities for docextract integration tests.
//!
//! This module provides:
//! - `TestHarness` for isolated runs against an in-memory database
//! - Stub extractors with scripted behaviour
//! - A small PDF writer for real-extractor tests

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::*;
