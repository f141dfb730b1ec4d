//! Fault log
//!
//! Newest entry first. A fault is recorded when its code differs from the
//! newest entry or when the dedup window has passed since that entry.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::state::{FaultLevel, MachineState};

/// One fault occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultLogEntry {
    /// Unique entry id
    pub id: Uuid,
    /// Epoch milliseconds
    pub timestamp: i64,
    /// Severity when recorded
    pub level: FaultLevel,
    /// Fault code
    pub code: u16,
    /// Human-readable summary
    pub description: String,
}

/// Human-readable summary of a fault
pub fn describe(level: FaultLevel, code: u16) -> String {
    let label = match level {
        FaultLevel::Normal => "Fault",
        FaultLevel::Warning => "Warning",
        FaultLevel::Severe => "Severe fault",
        FaultLevel::Emergency => "Emergency fault",
    };
    format!("{} (code 0x{:04X})", label, code)
}

/// Bounded, deduplicated fault history
#[derive(Debug, Clone)]
pub struct FaultLog {
    capacity: usize,
    dedup_ms: i64,
    entries: VecDeque<FaultLogEntry>,
}

impl FaultLog {
    /// Log keeping at most `capacity` entries; repeats of the newest code within `dedup_ms` are skipped
    pub fn new(capacity: usize, dedup_ms: i64) -> Self {
        Self {
            capacity,
            dedup_ms,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Record the fault in `state`, if any. Returns the new entry when one
    /// was added.
    pub fn record(&mut self, state: &MachineState, now_ms: i64) -> Option<&FaultLogEntry> {
        if !state.has_fault() || self.capacity == 0 {
            return None;
        }

        let code = state.io.fault_code;
        if let Some(newest) = self.entries.front() {
            if newest.code == code && now_ms - newest.timestamp < self.dedup_ms {
                return None;
            }
        }

        let level = state.status.fault_level;
        self.entries.push_front(FaultLogEntry {
            id: Uuid::new_v4(),
            timestamp: now_ms,
            level,
            code,
            description: describe(level, code),
        });
        self.entries.truncate(self.capacity);
        self.entries.front()
    }

    /// Entries, newest first
    pub fn entries(&self) -> impl Iterator<Item = &FaultLogEntry> {
        self.entries.iter()
    }

    /// Owned copy, newest first
    pub fn to_vec(&self) -> Vec<FaultLogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Entries held
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when no fault has been recorded
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;

    fn faulted(code: u16) -> MachineState {
        let mut state = MachineState::default();
        state.status.state = RunState::Fault;
        state.status.fault_level = FaultLevel::Severe;
        state.io.fault_code = code;
        state
    }

    #[test]
    fn test_dedup_window() {
        let mut log = FaultLog::new(50, 2000);
        assert!(log.record(&faulted(0x0102), 0).is_some());
        assert!(log.record(&faulted(0x0102), 500).is_none());
        assert_eq!(log.len(), 1);
        assert!(log.record(&faulted(0x0102), 2100).is_some());
        assert_eq!(log.len(), 2);
    }

    #[test]
    fn test_new_code_bypasses_window() {
        let mut log = FaultLog::new(50, 2000);
        log.record(&faulted(0x0102), 0);
        log.record(&faulted(0x0103), 100);
        let codes: Vec<u16> = log.entries().map(|e| e.code).collect();
        assert_eq!(codes, vec![0x0103, 0x0102]);
    }

    #[test]
    fn test_capacity() {
        let mut log = FaultLog::new(50, 2000);
        for code in 1..=60u16 {
            log.record(&faulted(code), i64::from(code));
        }
        assert_eq!(log.len(), 50);
        assert_eq!(log.entries().next().map(|e| e.code), Some(60));
        assert_eq!(log.entries().last().map(|e| e.code), Some(11));
    }

    #[test]
    fn test_healthy_state_not_recorded() {
        let mut log = FaultLog::new(50, 2000);
        assert!(log.record(&MachineState::default(), 0).is_none());
        assert!(log.is_empty());
    }

    #[test]
    fn test_fault_state_without_code() {
        let mut log = FaultLog::new(50, 2000);
        let entry = log.record(&faulted(0), 0).unwrap();
        assert_eq!(entry.description, "Severe fault (code 0x0000)");
    }

    #[test]
    fn test_code_without_fault_state() {
        let mut state = MachineState::default();
        state.status.state = RunState::Run;
        state.status.fault_level = FaultLevel::Warning;
        state.io.fault_code = 0x0201;
        let mut log = FaultLog::new(50, 2000);
        assert_eq!(
            log.record(&state, 0).map(|e| e.description.clone()),
            Some("Warning (code 0x0201)".to_string())
        );
    }
}
