//! In-memory reading history.

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::Mutex;

use sensorhub_core::Reading;

use super::{ReadingStore, StoreError};

/// Readings kept by a [`MemoryStore`] before the oldest are discarded.
pub const DEFAULT_MEMORY_CAPACITY: usize = 1_000;

/// Bounded, non-durable store. Useful for development and tests.
pub struct MemoryStore {
    capacity: usize,
    readings: Mutex<VecDeque<Reading>>,
}

impl MemoryStore {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            readings: Mutex::new(VecDeque::with_capacity(capacity.min(DEFAULT_MEMORY_CAPACITY))),
        }
    }

    pub async fn len(&self) -> usize {
        self.readings.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.readings.lock().await.is_empty()
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(DEFAULT_MEMORY_CAPACITY)
    }
}

#[async_trait]
impl ReadingStore for MemoryStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn store(&self, reading: &Reading) -> Result<(), StoreError> {
        let mut readings = self.readings.lock().await;
        if readings.len() >= self.capacity {
            readings.pop_front();
        }
        readings.push_back(*reading);
        Ok(())
    }

    async fn recent(&self, limit: usize) -> Result<Vec<Reading>, StoreError> {
        let readings = self.readings.lock().await;
        let skip = readings.len().saturating_sub(limit);
        Ok(readings.iter().skip(skip).copied().collect())
    }
}
