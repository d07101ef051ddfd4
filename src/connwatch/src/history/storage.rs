//! Circular record store in the history region of durable storage.
//!
//! Layout at [`HISTORY_REGION_START`]: an `i32` count of stored records
//! (`-1` when the region was never written) followed by `capacity` slots of
//! [`RECORD_SIZE`] bytes. Only the count is persisted; on load the write
//! cursor is recovered from the record start times.
use std::sync::Arc;

use crate::history::item::{HistoryStorageItem, RecoveryStatus, RECORD_SIZE};
use crate::storage::{DurableStorage, StorageError};

pub const HISTORY_REGION_START: usize = 512;
const HEADER_LEN: usize = 4;
const UNINITIALIZED: i32 = -1;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("{records} history records do not fit in {capacity} bytes of storage")]
    RegionTooSmall { records: usize, capacity: usize },
    #[error("history slot {0} holds an undecodable record")]
    Corrupt(usize),
    #[error(transparent)]
    Storage(#[from] StorageError),
}

fn slot_offset(slot: usize) -> usize {
    HISTORY_REGION_START + HEADER_LEN + slot * RECORD_SIZE
}

fn last_recovery_of(item: &HistoryStorageItem) -> Option<i64> {
    match item.recovery_status {
        RecoveryStatus::RecoverySuccess => Some(item.recovery_time()),
        _ => None,
    }
}

/// Bounded ring of [`HistoryStorageItem`]s, oldest first.
pub struct HistoryStorage {
    storage: Arc<dyn DurableStorage>,
    capacity: usize,
    available: usize,
    start_index: usize,
    last_recovery: Option<i64>,
}

impl HistoryStorage {
    /// Loads the ring with room for `max_records`, shrinking the stored data
    /// when it holds more.
    pub fn init(
        storage: Arc<dyn DurableStorage>,
        max_records: usize,
    ) -> Result<Self, HistoryError> {
        let max_records = max_records.max(1);
        let mut history = Self {
            storage,
            capacity: max_records,
            available: 0,
            start_index: 0,
            last_recovery: None,
        };
        history.ensure_fits(max_records)?;

        let mut header = [0u8; HEADER_LEN];
        history.storage.read(HISTORY_REGION_START, &mut header)?;
        let stored = i32::from_le_bytes(header);
        if stored == UNINITIALIZED {
            tracing::info!("history region uninitialized");
            history.persist_header()?;
            history.storage.commit()?;
            return Ok(history);
        }
        let max_slots = history.storage.capacity().saturating_sub(slot_offset(0)) / RECORD_SIZE;
        if stored < 0 || stored as usize > max_slots {
            tracing::warn!(stored, "history header out of range, clearing history");
            history.persist_header()?;
            history.storage.commit()?;
            return Ok(history);
        }

        let available = stored as usize;
        let mut records = Vec::with_capacity(available);
        for slot in 0..available {
            match history.read_slot(slot) {
                Ok(item) => records.push(item),
                Err(HistoryError::Corrupt(slot)) => {
                    tracing::warn!(slot, "corrupt history record, clearing history");
                    history.persist_header()?;
                    history.storage.commit()?;
                    return Ok(history);
                }
                Err(err) => return Err(err),
            }
        }
        if available == 0 {
            return Ok(history);
        }

        let oldest = oldest_slot(&records);
        let newest = &records[(oldest + available - 1) % available];
        history.last_recovery = last_recovery_of(newest);
        history.available = available;

        if available > max_records || (available < max_records && oldest != 0) {
            history.capacity = available;
            history.start_index = oldest;
            history.resize(max_records)?;
        } else if available == max_records {
            history.start_index = oldest;
        } else {
            history.start_index = available;
        }
        tracing::debug!(
            available = history.available,
            capacity = history.capacity,
            "history loaded"
        );
        Ok(history)
    }

    pub fn available(&self) -> usize {
        self.available
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_full(&self) -> bool {
        self.available == self.capacity
    }

    /// Recovery time of the newest record when it was a success.
    pub fn last_recovery(&self) -> Option<i64> {
        self.last_recovery
    }

    /// Appends `item`, overwriting the oldest record when full.
    pub fn add_history(&mut self, item: &HistoryStorageItem) -> Result<(), HistoryError> {
        self.storage
            .write(slot_offset(self.start_index), &item.encode())?;
        if self.available < self.capacity {
            self.available += 1;
        }
        self.start_index = (self.start_index + 1) % self.capacity;
        self.last_recovery = last_recovery_of(item);
        self.persist_header()?;
        self.storage.commit()?;
        Ok(())
    }

    /// Record `index` in chronological order (0 is the oldest).
    pub fn item(&self, index: usize) -> Result<Option<HistoryStorageItem>, HistoryError> {
        if index >= self.available {
            return Ok(None);
        }
        let slot = (self.start_index + index) % self.available;
        self.read_slot(slot).map(Some)
    }

    /// All records, oldest first.
    pub fn items(&self) -> Result<Vec<HistoryStorageItem>, HistoryError> {
        (0..self.available)
            .map(|index| self.read_slot((self.start_index + index) % self.available))
            .collect()
    }

    /// Changes the capacity to `max_records`, keeping the most recent
    /// records in chronological order. Zero is ignored.
    pub fn resize(&mut self, max_records: usize) -> Result<(), HistoryError> {
        if max_records == 0 || max_records == self.capacity {
            return Ok(());
        }
        self.ensure_fits(max_records)?;
        let wrapped = self.is_full() && self.start_index != 0;
        if !wrapped && self.available <= max_records {
            self.capacity = max_records;
            self.start_index = self.available % max_records;
            tracing::info!(capacity = max_records, "history capacity changed");
            return Ok(());
        }

        let records = self.items()?;
        let keep = records.len().min(max_records);
        for (slot, item) in records[records.len() - keep..].iter().enumerate() {
            self.storage.write(slot_offset(slot), &item.encode())?;
        }
        self.capacity = max_records;
        self.available = keep;
        self.start_index = keep % max_records;
        self.persist_header()?;
        self.storage.commit()?;
        tracing::info!(
            capacity = max_records,
            kept = keep,
            dropped = records.len() - keep,
            "history resized"
        );
        Ok(())
    }

    fn read_slot(&self, slot: usize) -> Result<HistoryStorageItem, HistoryError> {
        let mut buf = [0u8; RECORD_SIZE];
        self.storage.read(slot_offset(slot), &mut buf)?;
        HistoryStorageItem::decode(&buf).ok_or(HistoryError::Corrupt(slot))
    }

    fn persist_header(&self) -> Result<(), HistoryError> {
        let count = self.available as i32;
        self.storage
            .write(HISTORY_REGION_START, &count.to_le_bytes())?;
        Ok(())
    }

    fn ensure_fits(&self, records: usize) -> Result<(), HistoryError> {
        let capacity = self.storage.capacity();
        if slot_offset(records) > capacity {
            return Err(HistoryError::RegionTooSmall { records, capacity });
        }
        Ok(())
    }
}

/// Slot of the oldest record in a ring written in start-time order.
///
/// Records are appended slot after slot, so start times only drop where the
/// newest record sits next to the oldest one. Equal start times never mark
/// that boundary. Without any drop the ring has not wrapped and slot 0 is the
/// oldest. Records written while the wall clock stepped backwards can hide
/// the boundary, since the layout keeps no write sequence.
fn oldest_slot(records: &[HistoryStorageItem]) -> usize {
    let len = records.len();
    (0..len)
        .filter(|&slot| records[slot].start_time < records[(slot + len - 1) % len].start_time)
        .last()
        .unwrap_or(0)
}
