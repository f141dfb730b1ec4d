//! Telemetry aggregation
//!
//! Turns the stream of machine states into what an operator looks at: a
//! ten-minute chart window, a deduplicated fault log and, while logging is
//! on, CSV rows queued for the log writer.

mod faults;
mod history;

pub use faults::{describe, FaultLog, FaultLogEntry};
pub use history::{ChartHistory, ChartPoint};

use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::warn;

use crate::config::TelemetryConfig;
use crate::datalog::{format_log_line, LogBuffer};
use crate::state::MachineState;

/// Per-snapshot aggregation state
#[derive(Debug)]
pub struct TelemetryAggregator {
    history: ChartHistory,
    faults: FaultLog,
    log: Option<LogBuffer>,
}

impl TelemetryAggregator {
    /// Aggregator with the configured windows, not logging
    pub fn new(config: &TelemetryConfig) -> Self {
        Self {
            history: ChartHistory::new(Duration::from_secs(config.history_window_secs)),
            faults: FaultLog::new(config.fault_log_capacity, config.fault_dedup_ms),
            log: None,
        }
    }

    /// Fold one snapshot taken at `now` into the aggregates. Returns the
    /// fault entry it produced, if any.
    pub fn ingest(&mut self, state: &MachineState, now: DateTime<Utc>) -> Option<FaultLogEntry> {
        let now_ms = now.timestamp_millis();
        self.history.push(state, now_ms);

        let fault = self.faults.record(state, now_ms).cloned();
        if let Some(entry) = &fault {
            warn!("{}", entry.description);
        }

        if let Some(buffer) = &self.log {
            buffer.push(format_log_line(state, now));
        }
        fault
    }

    /// Start queuing CSV rows into `buffer`
    pub fn attach_log(&mut self, buffer: LogBuffer) {
        self.log = Some(buffer);
    }

    /// Stop queuing CSV rows
    pub fn detach_log(&mut self) {
        self.log = None;
    }

    /// True while rows are being queued
    pub fn is_logging(&self) -> bool {
        self.log.is_some()
    }

    /// Chart history
    pub fn history(&self) -> &ChartHistory {
        &self.history
    }

    /// Fault log
    pub fn fault_log(&self) -> &FaultLog {
        &self.faults
    }
}

impl Default for TelemetryAggregator {
    fn default() -> Self {
        Self::new(&TelemetryConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::RunState;
    use chrono::TimeZone;

    fn at(ms: i64) -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_700_000_000_000 + ms).unwrap()
    }

    #[test]
    fn test_ingest_without_logging() {
        let mut aggregator = TelemetryAggregator::default();
        let state = MachineState::default();
        assert!(aggregator.ingest(&state, at(0)).is_none());
        assert_eq!(aggregator.history().len(), 1);
        assert!(!aggregator.is_logging());
    }

    #[test]
    fn test_ingest_queues_rows_while_logging() {
        let mut aggregator = TelemetryAggregator::default();
        let buffer = LogBuffer::new();
        aggregator.attach_log(buffer.clone());

        let mut state = MachineState::default();
        state.power.stack_voltage = 48.25;
        aggregator.ingest(&state, at(0));
        aggregator.ingest(&state, at(100));
        assert_eq!(buffer.len(), 2);

        aggregator.detach_log();
        aggregator.ingest(&state, at(200));
        assert_eq!(buffer.len(), 2);
        assert_eq!(aggregator.history().len(), 3);
    }

    #[test]
    fn test_fault_dedup_through_ingest() {
        let mut aggregator = TelemetryAggregator::default();
        let mut state = MachineState::default();
        state.status.state = RunState::Fault;
        state.io.fault_code = 0x00E1;

        assert!(aggregator.ingest(&state, at(0)).is_some());
        assert!(aggregator.ingest(&state, at(500)).is_none());
        assert!(aggregator.ingest(&state, at(2100)).is_some());
        assert_eq!(aggregator.fault_log().len(), 2);
    }
}
