//! Shared test utilities for kubetrail integration tests.
//!
//! This module provides:
//! - `TestHarness` for an isolated audit tree backed by an in-memory cluster
//! - Builders for admission reviews and Helm release Secrets

pub mod builders;
pub mod harness;

pub use builders::*;
pub use harness::TestHarness;
