use serde::Serialize;

use crate::recovery::RecoverySource;

/// Encoded size of one record.
pub const RECORD_SIZE: usize = 24;

const UNBOUNDED_END: i64 = i64::MAX;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RecoveryStatus {
    OnGoingRecovery,
    RecoverySuccess,
    RecoveryFailure,
}

impl RecoveryStatus {
    fn to_byte(self) -> u8 {
        match self {
            RecoveryStatus::OnGoingRecovery => 0,
            RecoveryStatus::RecoverySuccess => 1,
            RecoveryStatus::RecoveryFailure => 2,
        }
    }

    fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            0 => Some(RecoveryStatus::OnGoingRecovery),
            1 => Some(RecoveryStatus::RecoverySuccess),
            2 => Some(RecoveryStatus::RecoveryFailure),
            _ => None,
        }
    }
}

fn source_to_byte(source: RecoverySource) -> u8 {
    match source {
        RecoverySource::UserInitiated => 0,
        RecoverySource::Auto => 1,
        RecoverySource::Periodic => 2,
    }
}

fn source_from_byte(byte: u8) -> Option<RecoverySource> {
    match byte {
        0 => Some(RecoverySource::UserInitiated),
        1 => Some(RecoverySource::Auto),
        2 => Some(RecoverySource::Periodic),
        _ => None,
    }
}

/// One recovery episode as stored in history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HistoryStorageItem {
    pub recovery_source: RecoverySource,
    pub start_time: i64,
    /// `None` while the recovery is still in progress.
    pub end_time: Option<i64>,
    pub modem_recoveries: u16,
    pub router_recoveries: u16,
    pub recovery_status: RecoveryStatus,
}

impl HistoryStorageItem {
    pub fn started(recovery_source: RecoverySource, start_time: i64) -> Self {
        Self {
            recovery_source,
            start_time,
            end_time: None,
            modem_recoveries: 0,
            router_recoveries: 0,
            recovery_status: RecoveryStatus::OnGoingRecovery,
        }
    }

    /// End time when bounded, start time otherwise.
    pub fn recovery_time(&self) -> i64 {
        self.end_time.unwrap_or(self.start_time)
    }

    pub fn has_device_recoveries(&self) -> bool {
        self.modem_recoveries > 0 || self.router_recoveries > 0
    }

    /// Little-endian layout: source, status, modem, router, reserved, start, end.
    pub fn encode(&self) -> [u8; RECORD_SIZE] {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = source_to_byte(self.recovery_source);
        buf[1] = self.recovery_status.to_byte();
        buf[2..4].copy_from_slice(&self.modem_recoveries.to_le_bytes());
        buf[4..6].copy_from_slice(&self.router_recoveries.to_le_bytes());
        buf[8..16].copy_from_slice(&self.start_time.to_le_bytes());
        let end = self.end_time.unwrap_or(UNBOUNDED_END);
        buf[16..24].copy_from_slice(&end.to_le_bytes());
        buf
    }

    /// Returns `None` for erased or foreign bytes.
    pub fn decode(buf: &[u8; RECORD_SIZE]) -> Option<Self> {
        let recovery_source = source_from_byte(buf[0])?;
        let recovery_status = RecoveryStatus::from_byte(buf[1])?;
        let word = |at: usize| u16::from_le_bytes([buf[at], buf[at + 1]]);
        let long = |at: usize| {
            let mut raw = [0u8; 8];
            raw.copy_from_slice(&buf[at..at + 8]);
            i64::from_le_bytes(raw)
        };
        let end = long(16);
        Some(Self {
            recovery_source,
            start_time: long(8),
            end_time: (end != UNBOUNDED_END).then_some(end),
            modem_recoveries: word(2),
            router_recoveries: word(4),
            recovery_status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovery_time_prefers_end() {
        let mut item = HistoryStorageItem::started(RecoverySource::Auto, 100);
        assert_eq!(item.recovery_time(), 100);
        item.end_time = Some(160);
        assert_eq!(item.recovery_time(), 160);
    }

    #[test]
    fn encoding_is_stable() {
        let item = HistoryStorageItem {
            recovery_source: RecoverySource::Periodic,
            start_time: 0x0102,
            end_time: None,
            modem_recoveries: 1,
            router_recoveries: 2,
            recovery_status: RecoveryStatus::RecoveryFailure,
        };
        let buf = item.encode();
        assert_eq!(&buf[..6], &[2, 2, 1, 0, 2, 0]);
        assert_eq!(&buf[8..10], &[0x02, 0x01]);
        assert_eq!(&buf[16..24], &[0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0xff, 0x7f]);
        assert_eq!(HistoryStorageItem::decode(&buf), Some(item));
    }

    #[test]
    fn erased_bytes_do_not_decode() {
        assert_eq!(HistoryStorageItem::decode(&[0xff; RECORD_SIZE]), None);
    }
}
