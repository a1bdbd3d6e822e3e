//! In-process store. Clones share the same record, so several reconcilers
//! built on clones behave like independent writers of one shared document.

use super::{SlotStore, StoreError, Versioned};
use crate::domain::types::SlotRecord;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::Arc;

#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<Option<Versioned<SlotRecord>>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with a record at version 1
    pub fn with_record(record: SlotRecord) -> Self {
        Self { inner: Arc::new(Mutex::new(Some(Versioned { version: 1, value: record }))) }
    }

    /// Current record, if any
    pub fn snapshot(&self) -> Option<SlotRecord> {
        self.inner.lock().as_ref().map(|v| v.value.clone())
    }
}

#[async_trait]
impl SlotStore for MemoryStore {
    async fn create_if_absent(&self, record: &SlotRecord) -> Result<bool, StoreError> {
        let mut guard = self.inner.lock();
        if guard.is_some() {
            return Ok(false);
        }
        *guard = Some(Versioned { version: 1, value: record.clone() });
        Ok(true)
    }

    async fn load(&self) -> Result<Versioned<SlotRecord>, StoreError> {
        self.inner.lock().clone().ok_or(StoreError::NotFound)
    }

    async fn compare_and_swap(
        &self,
        expected_version: u64,
        record: &SlotRecord,
    ) -> Result<u64, StoreError> {
        let mut guard = self.inner.lock();
        let current = guard.as_mut().ok_or(StoreError::NotFound)?;
        if current.version != expected_version {
            return Err(StoreError::Conflict { expected: expected_version });
        }
        current.version += 1;
        current.value = record.clone();
        Ok(current.version)
    }
}
