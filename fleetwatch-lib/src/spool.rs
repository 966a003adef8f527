//! Payload spool for deferred upload.
//!
//! Payloads the channel could not publish are parked here as opaque blobs
//! with their publication metadata. A retry path drains the spool in
//! priority-descending order, FIFO within one priority.

use crate::connectivity::SendParams;
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use thiserror::Error;
use tracing::warn;
use uuid::Uuid;

/// Spool errors.
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("spool capacity {capacity} exhausted")]
    Full { capacity: usize },

    #[error("spool storage failed: {0}")]
    StorageError(String),
}

/// One parked payload with the metadata needed to retry it later.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpooledPayload {
    /// Record identifier
    pub id: Uuid,

    /// Upload priority; higher drains first
    pub priority: u32,

    /// Payload was compressed by the serializer
    pub compress: bool,

    /// Collection scheme the payload belongs to
    pub collection_scheme_id: String,

    /// Opaque serialized payload
    pub payload: Vec<u8>,

    /// Admission order, for FIFO within one priority
    pub sequence: u64,
}

/// Store for payloads awaiting retry.
pub trait PayloadSpool: Send + Sync {
    /// Parks a payload. Implementations may evict to make room.
    fn store(&self, payload: &[u8], params: &SendParams) -> Result<(), SpoolError>;

    /// Removes and returns the next payload to retry: highest priority
    /// first, oldest within one priority.
    fn retrieve_next(&self) -> Option<SpooledPayload>;

    /// Number of parked payloads.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Bounded in-memory spool.
///
/// When full, the oldest record of the lowest priority is evicted to make
/// room for the incoming payload, so a flood of low-value data cannot starve
/// high-priority retries.
#[derive(Debug)]
pub struct MemorySpool {
    records: Mutex<Vec<SpooledPayload>>,
    next_sequence: AtomicU64,
    capacity: usize,
}

impl MemorySpool {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: Mutex::new(Vec::new()),
            next_sequence: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl PayloadSpool for MemorySpool {
    fn store(&self, payload: &[u8], params: &SendParams) -> Result<(), SpoolError> {
        let mut records = self.records.lock().expect("spool mutex poisoned");

        if records.len() >= self.capacity {
            let Some(evict) = records
                .iter()
                .enumerate()
                .min_by_key(|(_, record)| (record.priority, record.sequence))
                .map(|(index, _)| index)
            else {
                return Err(SpoolError::Full {
                    capacity: self.capacity,
                });
            };
            let evicted = records.remove(evict);
            warn!(
                priority = evicted.priority,
                collection_scheme_id = %evicted.collection_scheme_id,
                "spool full, evicted oldest low-priority payload"
            );
        }

        records.push(SpooledPayload {
            id: Uuid::new_v4(),
            priority: params.priority,
            compress: params.compress,
            collection_scheme_id: params.collection_scheme_id.clone(),
            payload: payload.to_vec(),
            sequence: self.next_sequence.fetch_add(1, Ordering::Relaxed),
        });
        Ok(())
    }

    fn retrieve_next(&self) -> Option<SpooledPayload> {
        let mut records = self.records.lock().expect("spool mutex poisoned");
        let index = records
            .iter()
            .enumerate()
            .max_by_key(|(_, record)| (record.priority, Reverse(record.sequence)))
            .map(|(index, _)| index)?;
        Some(records.remove(index))
    }

    fn len(&self) -> usize {
        self.records.lock().expect("spool mutex poisoned").len()
    }
}
