//! Bus-to-network bridge
//!
//! Polls a [`CanBus`](crate::bus::CanBus), keeps the decoded machine state,
//! and serves it to observers as `machine_state` JSON payloads. Observers
//! connect over WebSocket by default, or over newline-delimited TCP when
//! the bridge is configured with [`ObserverProtocol::Lines`]. Control
//! payloads from observers are encoded and put on the bus.
//!
//! [`ObserverProtocol::Lines`]: crate::config::ObserverProtocol::Lines

mod server;

pub use server::{BridgeHandle, BridgeServer};

use thiserror::Error;

/// Errors starting or stopping the bridge
#[derive(Error, Debug)]
pub enum BridgeError {
    /// The listener could not be bound
    #[error("Failed to bind {address}: {source}")]
    Bind {
        /// Requested `host:port`
        address: String,
        /// Underlying socket error
        #[source]
        source: std::io::Error,
    },

    /// A bridge task panicked or was cancelled
    #[error("Bridge task failed: {0}")]
    Task(String),
}
