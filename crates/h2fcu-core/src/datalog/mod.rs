//! Data Logging
//!
//! CSV logging of machine states. Rows are produced by the telemetry
//! aggregator, queued in a [`LogBuffer`] and written out periodically by a
//! [`LogBufferWriter`].

mod destination;
mod format;
mod writer;

pub use destination::{FileDestination, LogDestination, LogSink};
pub use format::{format_log_line, EXTENSION, HEADER};
pub use writer::LogBufferWriter;

use std::sync::{Arc, Mutex, MutexGuard};
use thiserror::Error;

/// Errors from the logging layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DatalogError {
    /// Nowhere to write the log
    #[error("Log destination unavailable: {0}")]
    ResourceUnavailable(String),

    /// The operator declined to pick a destination
    #[error("Log destination selection cancelled")]
    UserCancelled,

    /// Writing rows failed
    #[error("Log write failed: {0}")]
    WriteFailure(String),
}

/// Rows waiting to be flushed, shared between producer and writer
#[derive(Debug, Clone, Default)]
pub struct LogBuffer {
    rows: Arc<Mutex<Vec<String>>>,
}

impl LogBuffer {
    /// Empty buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue one CSV row
    pub fn push(&self, row: String) {
        self.lock().push(row);
    }

    /// Swap the pending rows out, leaving the buffer empty
    pub fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.lock())
    }

    /// Rows waiting
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    /// True when nothing is waiting
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> MutexGuard<'_, Vec<String>> {
        // A panic mid-push leaves the Vec intact
        self.rows.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_swaps_out() {
        let buffer = LogBuffer::new();
        let producer = buffer.clone();
        producer.push("a".to_string());
        producer.push("b".to_string());

        assert_eq!(buffer.take(), vec!["a".to_string(), "b".to_string()]);
        assert!(buffer.is_empty());
        assert!(buffer.take().is_empty());
    }
}
