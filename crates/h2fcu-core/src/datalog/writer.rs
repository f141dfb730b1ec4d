//! Periodic log writer
//!
//! Rows accumulate in a [`LogBuffer`]; a flush task swaps the buffer out on
//! every interval tick and appends the rows to the open [`LogSink`].
//! Stopping (or dropping the writer) drains the buffer one last time before
//! the sink is released.

use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::destination::{LogDestination, LogSink};
use super::format::HEADER;
use super::{DatalogError, LogBuffer};
use crate::config::DatalogConfig;

struct ActiveLog {
    name: String,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), DatalogError>>,
}

/// Scoped CSV log writer
pub struct LogBufferWriter {
    destination: Arc<dyn LogDestination>,
    buffer: LogBuffer,
    flush_interval: Duration,
    active: Option<ActiveLog>,
}

/// Shortest flush period; a zero period would stall the flush timer
pub const MIN_FLUSH_INTERVAL: Duration = Duration::from_millis(1);

impl LogBufferWriter {
    /// Writer flushing every `flush_interval`, floored at [`MIN_FLUSH_INTERVAL`]
    pub fn new(destination: Arc<dyn LogDestination>, flush_interval: Duration) -> Self {
        Self {
            destination,
            buffer: LogBuffer::new(),
            flush_interval: flush_interval.max(MIN_FLUSH_INTERVAL),
            active: None,
        }
    }

    /// Writer using the configured flush interval
    pub fn from_config(destination: Arc<dyn LogDestination>, config: &DatalogConfig) -> Self {
        Self::new(destination, config.flush_interval())
    }

    /// Pending rows; push into this while logging
    pub fn buffer(&self) -> LogBuffer {
        self.buffer.clone()
    }

    /// True between a successful `start` and `stop`
    pub fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Name of the open log, if any
    pub fn current_log(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.name.as_str())
    }

    /// Open a destination, write the header and start flushing.
    /// Does nothing if already active.
    pub async fn start(&mut self) -> Result<(), DatalogError> {
        if self.active.is_some() {
            return Ok(());
        }

        let mut sink = self.destination.acquire().await?;
        write_chunk(&mut sink, format!("{}\n", HEADER)).await?;

        // Rows queued before this log existed do not belong to it
        self.buffer.take();

        let name = sink.name.clone();
        let (stop, stop_rx) = oneshot::channel();
        let task = tokio::spawn(flush_loop(
            sink,
            self.buffer.clone(),
            self.flush_interval,
            stop_rx,
        ));
        info!("Log started: {}", name);
        self.active = Some(ActiveLog { name, stop, task });
        Ok(())
    }

    /// Final flush, release the destination and end the flush task
    pub async fn stop(&mut self) -> Result<(), DatalogError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        let _ = active.stop.send(());
        let result = active
            .task
            .await
            .map_err(|e| DatalogError::WriteFailure(format!("flush task failed: {}", e)))?;
        info!("Log stopped: {}", active.name);
        result
    }
}

impl Drop for LogBufferWriter {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            // The flush task drains and closes on its own
            let _ = active.stop.send(());
            debug!("Log writer dropped while active: {}", active.name);
        }
    }
}

async fn flush_loop(
    mut sink: LogSink,
    buffer: LogBuffer,
    every: Duration,
    mut stop: oneshot::Receiver<()>,
) -> Result<(), DatalogError> {
    let mut ticker = interval_at(Instant::now() + every, every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut failures: u32 = 0;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                if let Err(e) = flush(&mut sink, &buffer).await {
                    failures += 1;
                    if failures == 1 {
                        error!("Log write to {} failed: {}", sink.name, e);
                    } else {
                        warn!("Log write to {} failed again ({}): {}", sink.name, failures, e);
                    }
                }
            }
            // Sent by stop(), or the sender dropped with the writer
            _ = &mut stop => break,
        }
    }

    let result = flush(&mut sink, &buffer).await.map(|_| ());
    sink.close().await;
    result
}

/// Write everything pending. Returns the number of rows written.
async fn flush(sink: &mut LogSink, buffer: &LogBuffer) -> Result<usize, DatalogError> {
    let rows = buffer.take();
    if rows.is_empty() {
        return Ok(0);
    }

    let mut chunk = rows.join("\n");
    chunk.push('\n');
    write_chunk(sink, chunk).await?;
    debug!("Flushed {} rows to {}", rows.len(), sink.name);
    Ok(rows.len())
}

async fn write_chunk(sink: &mut LogSink, chunk: String) -> Result<(), DatalogError> {
    sink.writer
        .write_all(chunk.as_bytes())
        .await
        .map_err(|e| DatalogError::WriteFailure(e.to_string()))?;
    sink.writer
        .flush()
        .await
        .map_err(|e| DatalogError::WriteFailure(e.to_string()))
}
