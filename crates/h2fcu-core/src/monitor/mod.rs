//! Operator monitor
//!
//! [`MonitorStore`] holds what a renderer shows; [`MonitorPipeline`] feeds
//! it from a session and serialises operator requests against it.

mod pipeline;
mod store;

pub use pipeline::{MonitorHandle, MonitorPipeline};
pub use store::{MonitorSnapshot, MonitorStore};

use thiserror::Error;

use crate::datalog::DatalogError;
use crate::session::SessionError;

/// Errors returned through a [`MonitorHandle`]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MonitorError {
    /// The pipeline task has ended
    #[error("Monitor pipeline has stopped")]
    Stopped,

    /// Logging could not be started or stopped
    #[error(transparent)]
    Datalog(#[from] DatalogError),

    /// The session refused a send
    #[error(transparent)]
    Session(#[from] SessionError),
}
