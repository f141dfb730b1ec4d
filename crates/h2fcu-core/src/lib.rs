//! # H2 FCU Core Library
//!
//! Core functionality for the hydrogen fuel-cell unit monitor.
//!
//! This library provides:
//! - CAN frame encoding and decoding for the FCU status, power, sensor, IO
//!   and control frames
//! - A simulated FCU and virtual bus for running without hardware
//! - A bridge serving decoded state to observers over WebSocket
//! - A reconnecting client session with subscriber fan-out
//! - Chart history, fault log and CSV data logging
//!
//! ## Example
//!
//! ```rust,ignore
//! use h2fcu_core::prelude::*;
//!
//! let session = SessionManager::spawn(Arc::new(WebSocketTransport), config.session.clone());
//! let _sub = session.subscribe_state(|state| {
//!     println!("Stack: {:.2} V", state.power.stack_voltage);
//!     Ok(())
//! });
//! session.connect("127.0.0.1:8765").await?;
//! ```

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod bridge;
pub mod bus;
pub mod config;
pub mod control;
pub mod datalog;
pub mod demo;
pub mod diagnosis;
pub mod monitor;
pub mod protocol;
pub mod session;
pub mod state;
pub mod telemetry;

/// Re-export commonly used types
pub mod prelude {
    pub use crate::bridge::{BridgeHandle, BridgeServer};
    pub use crate::bus::{CanBus, VirtualBus};
    pub use crate::config::{MonitorConfig, ObserverProtocol};
    pub use crate::control::{Command, ControlMode, ControlPatch, ControlState};
    pub use crate::datalog::{FileDestination, LogBufferWriter, LogDestination};
    pub use crate::demo::DemoSimulator;
    pub use crate::diagnosis::{DiagnosisLabel, DiagnosisResult};
    pub use crate::monitor::{MonitorHandle, MonitorPipeline, MonitorStore};
    pub use crate::protocol::{Frame, ProtocolError};
    pub use crate::session::{
        transport_for, LineTransport, SessionManager, SessionStatus, Subscription,
        WebSocketTransport,
    };
    pub use crate::state::{FaultLevel, MachineState, RunState};
    pub use crate::telemetry::TelemetryAggregator;
}

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
