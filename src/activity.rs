use crate::store::RegisterBank;
use heapless::Deque;
use serde::{Deserialize, Serialize};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::{SystemTime, UNIX_EPOCH};

/// Number of mutations kept before the oldest entry is evicted.
pub const ACTIVITY_LOG_CAPACITY: usize = 100;

/// Who performed a mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteSource {
    /// A Modbus client writing through the protocol server.
    ProtocolWrite,
    /// A signal generator tick.
    Simulation,
    /// The operator-facing API (console, profile install, snapshot import).
    ExternalApi,
}

impl core::fmt::Display for WriteSource {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            WriteSource::ProtocolWrite => write!(f, "protocol-write"),
            WriteSource::Simulation => write!(f, "simulation"),
            WriteSource::ExternalApi => write!(f, "external-api"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActivityLogEntry {
    pub sequence: u64,
    pub timestamp_ms: u64,
    pub bank: RegisterBank,
    pub address: u16,
    pub previous: u16,
    pub new: u16,
    pub source: WriteSource,
}

#[derive(Debug)]
struct LogState {
    entries: Deque<ActivityLogEntry, ACTIVITY_LOG_CAPACITY>,
    next_sequence: u64,
}

/// Bounded history of register mutations shared by every writer.
#[derive(Debug)]
pub struct ActivityLog {
    state: Mutex<LogState>,
}

impl ActivityLog {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(LogState {
                entries: Deque::new(),
                next_sequence: 1,
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, LogState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stamp and append a mutation. Returns the assigned sequence number.
    pub fn record(
        &self,
        bank: RegisterBank,
        address: u16,
        previous: u16,
        new: u16,
        source: WriteSource,
    ) -> u64 {
        let mut state = self.lock();
        let sequence = state.next_sequence;
        state.next_sequence = state.next_sequence.wrapping_add(1);

        let entry = ActivityLogEntry {
            sequence,
            timestamp_ms: now_ms(),
            bank,
            address,
            previous,
            new,
            source,
        };
        push_evicting(&mut state.entries, entry);
        sequence
    }

    /// Append a prebuilt entry, evicting the oldest one when full.
    pub fn append(&self, entry: ActivityLogEntry) {
        let mut state = self.lock();
        if entry.sequence >= state.next_sequence {
            state.next_sequence = entry.sequence.wrapping_add(1);
        }
        push_evicting(&mut state.entries, entry);
    }

    /// The most recent `n` entries, oldest first and newest last.
    pub fn recent(&self, n: usize) -> Vec<ActivityLogEntry> {
        let state = self.lock();
        let skip = state.entries.len().saturating_sub(n);
        state.entries.iter().skip(skip).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().entries.is_empty()
    }

    /// Total number of entries ever recorded, including evicted ones.
    pub fn total_recorded(&self) -> u64 {
        self.lock().next_sequence - 1
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::new()
    }
}

fn push_evicting(entries: &mut Deque<ActivityLogEntry, ACTIVITY_LOG_CAPACITY>, entry: ActivityLogEntry) {
    if entries.is_full() {
        entries.pop_front();
    }
    // Cannot fail: a slot was freed above.
    let _ = entries.push_back(entry);
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_is_newest_last() {
        let log = ActivityLog::new();
        for i in 0..5 {
            log.record(RegisterBank::HoldingRegister, i, 0, i + 10, WriteSource::ExternalApi);
        }

        let recent = log.recent(3);
        assert_eq!(recent.len(), 3);
        assert_eq!(recent[0].address, 2);
        assert_eq!(recent[2].address, 4);
        assert!(recent[0].sequence < recent[2].sequence);
    }

    #[test]
    fn test_recent_more_than_available() {
        let log = ActivityLog::new();
        log.record(RegisterBank::Coil, 1, 0, 1, WriteSource::ProtocolWrite);

        assert_eq!(log.recent(50).len(), 1);
        assert!(log.recent(0).is_empty());
    }

    #[test]
    fn test_eviction_keeps_capacity() {
        let log = ActivityLog::new();
        for i in 0..(ACTIVITY_LOG_CAPACITY as u16 + 25) {
            log.record(RegisterBank::InputRegister, i, 0, 1, WriteSource::Simulation);
        }

        assert_eq!(log.len(), ACTIVITY_LOG_CAPACITY);
        assert_eq!(log.total_recorded(), ACTIVITY_LOG_CAPACITY as u64 + 25);

        // Oldest 25 were evicted
        let all = log.recent(ACTIVITY_LOG_CAPACITY);
        assert_eq!(all[0].address, 25);
        assert_eq!(all[ACTIVITY_LOG_CAPACITY - 1].address, ACTIVITY_LOG_CAPACITY as u16 + 24);
    }

    #[test]
    fn test_append_prebuilt_entry() {
        let log = ActivityLog::new();
        log.append(ActivityLogEntry {
            sequence: 42,
            timestamp_ms: 0,
            bank: RegisterBank::DiscreteInput,
            address: 3,
            previous: 0,
            new: 1,
            source: WriteSource::ExternalApi,
        });

        let next = log.record(RegisterBank::DiscreteInput, 4, 0, 1, WriteSource::ExternalApi);
        assert_eq!(next, 43);
        assert_eq!(log.len(), 2);
    }
}
