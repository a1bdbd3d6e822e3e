//! Shared slot record storage
//!
//! The record is a single versioned document. Every backend offers the same
//! two primitives the reconciler builds on:
//! - idempotent create-if-absent
//! - versioned read plus write-if-version-unchanged (compare-and-swap)
//!
//! Backends:
//! - `memory` - in-process, for a single instance and for tests
//! - `http` - remote document store speaking ETag / If-Match

pub mod http;
pub mod memory;

use crate::domain::types::SlotRecord;
use crate::infra::config::{Config, StoreBackend};
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::info;

pub use http::HttpStore;
pub use memory::MemoryStore;

/// Errors at the store seam.
///
/// `Conflict` is the only variant the reconciler retries on.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Record changed since the version the caller read
    #[error("version conflict: record is no longer at version {expected}")]
    Conflict { expected: u64 },

    /// Record does not exist
    #[error("record not found")]
    NotFound,

    /// Store could not be reached
    #[error("transport error: {0}")]
    Transport(String),

    /// Store answered with an unexpected status
    #[error("unexpected status {status}: {body}")]
    Status { status: u16, body: String },

    /// Stored document or version could not be decoded
    #[error("invalid record: {0}")]
    Decode(String),
}

/// A value together with the store version it was read at
#[derive(Debug, Clone, PartialEq)]
pub struct Versioned<T> {
    pub version: u64,
    pub value: T,
}

#[async_trait]
pub trait SlotStore: Send + Sync {
    /// Create the record if it does not exist yet.
    /// Returns true when this call created it.
    async fn create_if_absent(&self, record: &SlotRecord) -> Result<bool, StoreError>;

    /// Read the record with its current version
    async fn load(&self) -> Result<Versioned<SlotRecord>, StoreError>;

    /// Replace the record only if it is still at `expected_version`.
    /// Returns the new version.
    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: &SlotRecord,
    ) -> Result<u64, StoreError>;
}

/// Construct the configured store backend
pub fn build_store(config: &Config) -> anyhow::Result<Arc<dyn SlotStore>> {
    match config.store_backend() {
        StoreBackend::Memory => {
            info!(backend = "memory", "store_initialized");
            Ok(Arc::new(MemoryStore::new()))
        }
        StoreBackend::Http => {
            let store = HttpStore::from_config(config)?;
            info!(backend = "http", url = %store.record_url(), "store_initialized");
            Ok(Arc::new(store))
        }
    }
}
