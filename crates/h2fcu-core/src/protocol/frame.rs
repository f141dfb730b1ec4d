//! CAN frame container
//!
//! A frame is an extended identifier plus exactly eight data bytes. Frames
//! are immutable once built; the length check happens at construction so
//! every `Frame` in the system is well-formed.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::{ProtocolError, FRAME_LEN};

/// Which way a frame travels relative to the monitor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    /// Controller to monitor
    Rx,
    /// Monitor to controller
    Tx,
}

/// A single CAN frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    id: u32,
    data: [u8; FRAME_LEN],
    direction: Direction,
}

impl Frame {
    /// Build a frame from a raw payload, rejecting anything but 8 bytes
    pub fn new(id: u32, payload: &[u8], direction: Direction) -> Result<Self, ProtocolError> {
        let data: [u8; FRAME_LEN] = payload
            .try_into()
            .map_err(|_| ProtocolError::MalformedFrame { len: payload.len() })?;
        Ok(Self {
            id,
            data,
            direction,
        })
    }

    /// Build a frame from a fixed-size array
    pub fn from_array(id: u32, data: [u8; FRAME_LEN], direction: Direction) -> Self {
        Self {
            id,
            data,
            direction,
        }
    }

    /// Extended identifier
    pub fn id(&self) -> u32 {
        self.id
    }

    /// Payload bytes
    pub fn data(&self) -> &[u8; FRAME_LEN] {
        &self.data
    }

    /// Whether the frame was received or is to be sent
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Consume the frame, yielding its payload
    pub fn into_data(self) -> [u8; FRAME_LEN] {
        self.data
    }
}

impl fmt::Display for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:#010X} [", self.id)?;
        for (i, b) in self.data.iter().enumerate() {
            if i > 0 {
                write!(f, " ")?;
            }
            write!(f, "{:02X}", b)?;
        }
        write!(f, "]")
    }
}
