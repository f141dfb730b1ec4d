//! FCU CAN Protocol
//!
//! Bit-exact translation between the 8-byte CAN frames spoken by the FCU
//! and the typed [`MachineState`](crate::state::MachineState) /
//! [`ControlState`](crate::control::ControlState) values.
//!
//! All multi-byte fields are little-endian. Decoding and encoding are pure
//! functions; nothing in this module performs I/O.

pub mod codec;
mod error;
mod frame;

pub use codec::{
    apply_frame, apply_group, decode_io, decode_power, decode_sensors, decode_status,
    encode_control, encode_io_frame, encode_power_frame, encode_sensors_frame,
    encode_status_frame,
};
pub use error::ProtocolError;
pub use frame::{Direction, Frame};

/// Data length of every frame on this bus
pub const FRAME_LEN: usize = 8;

/// RX: heartbeat, run state and fault level
pub const STATUS_FRAME_ID: u32 = 0x18FF_01F0;

/// RX: stack and DC/DC voltage and current
pub const POWER_FRAME_ID: u32 = 0x18FF_02F0;

/// RX: temperatures, hydrogen pressures and concentration
pub const SENSORS_FRAME_ID: u32 = 0x18FF_03F0;

/// RX: actuator feedback, MOSFET temperature and fault code
pub const IO_FRAME_ID: u32 = 0x18FF_04F0;

/// TX: operator control
pub const CONTROL_FRAME_ID: u32 = 0x18FF_10A0;

/// All RX identifiers understood by the decoder
pub const RX_FRAME_IDS: [u32; 4] = [
    STATUS_FRAME_ID,
    POWER_FRAME_ID,
    SENSORS_FRAME_ID,
    IO_FRAME_ID,
];
