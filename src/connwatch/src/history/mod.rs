//! Recovery history: the persistent ring and the tracker feeding it.
pub mod control;
pub mod item;
pub mod storage;

pub use control::{HistoryControl, RecoveryEvents};
pub use item::{HistoryStorageItem, RecoveryStatus, RECORD_SIZE};
pub use storage::{HistoryError, HistoryStorage, HISTORY_REGION_START};
