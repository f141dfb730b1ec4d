//! CAN bus access
//!
//! [`CanBus`] is the seam a hardware adapter driver plugs into. The crate
//! ships [`VirtualBus`], which paces a [`DemoSimulator`] so the rest of the
//! pipeline can run without a physical bus.

use std::time::{Duration, Instant};

use thiserror::Error;
use tracing::{debug, info};

use crate::demo::DemoSimulator;
use crate::protocol::Frame;

/// Errors reported by a bus driver
#[derive(Error, Debug)]
pub enum BusError {
    /// The bus was closed
    #[error("Bus not open")]
    NotOpen,

    /// Failure reported by the driver
    #[error("Bus driver error: {0}")]
    Driver(String),
}

/// A frame-level CAN bus
pub trait CanBus: Send {
    /// Drain up to `max` pending frames without blocking
    fn receive(&mut self, max: usize) -> Result<Vec<Frame>, BusError>;

    /// Transmit one frame
    fn send(&mut self, frame: &Frame) -> Result<(), BusError>;

    /// Release the adapter
    fn close(&mut self) {}
}

/// Simulated bus producing one frame batch per update interval
pub struct VirtualBus {
    simulator: DemoSimulator,
    started: Instant,
    last_batch: Option<Instant>,
    update_interval: Duration,
    open: bool,
}

impl VirtualBus {
    /// Default pacing of simulated frame batches
    pub const DEFAULT_UPDATE_INTERVAL: Duration = Duration::from_millis(100);

    /// Bus driven by `simulator`, paced at [`Self::DEFAULT_UPDATE_INTERVAL`]
    pub fn new(simulator: DemoSimulator) -> Self {
        info!("Virtual CAN bus opened");
        Self {
            simulator,
            started: Instant::now(),
            last_batch: None,
            update_interval: Self::DEFAULT_UPDATE_INTERVAL,
            open: true,
        }
    }

    /// Override the batch interval
    pub fn with_update_interval(mut self, interval: Duration) -> Self {
        self.update_interval = interval;
        self
    }

    /// The simulator behind this bus
    pub fn simulator(&self) -> &DemoSimulator {
        &self.simulator
    }
}

impl Default for VirtualBus {
    fn default() -> Self {
        Self::new(DemoSimulator::new())
    }
}

impl CanBus for VirtualBus {
    fn receive(&mut self, max: usize) -> Result<Vec<Frame>, BusError> {
        if !self.open {
            return Err(BusError::NotOpen);
        }

        let now = Instant::now();
        if let Some(last) = self.last_batch {
            if now.duration_since(last) < self.update_interval {
                return Ok(Vec::new());
            }
        }
        self.last_batch = Some(now);

        let elapsed_ms = now.duration_since(self.started).as_millis() as u64;
        let mut frames = self.simulator.update(elapsed_ms);
        frames.truncate(max);
        Ok(frames)
    }

    fn send(&mut self, frame: &Frame) -> Result<(), BusError> {
        if !self.open {
            return Err(BusError::NotOpen);
        }
        debug!("[VirtualTX] {}", frame);
        self.simulator.apply_control(frame);
        Ok(())
    }

    fn close(&mut self) {
        if self.open {
            self.open = false;
            info!("Virtual CAN bus closed");
        }
    }
}
