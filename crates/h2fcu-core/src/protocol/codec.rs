//! Frame encoding/decoding
//!
//! RX layout (all little-endian):
//!
//! | ID           | Bytes | Field                                  | Scale          |
//! |--------------|-------|----------------------------------------|----------------|
//! | `0x18FF01F0` | 0     | heartbeat                              | 1              |
//! |              | 1     | state `[1:0]`, fault level `[3:2]`     |                |
//! | `0x18FF02F0` | 0-1   | stack voltage (u16)                    | 0.01 V         |
//! |              | 2-3   | stack current (u16)                    | 0.1 A          |
//! |              | 4-5   | DC/DC output voltage (u16)             | 0.01 V         |
//! |              | 6-7   | DC/DC output current (u16)             | 0.1 A          |
//! | `0x18FF03F0` | 0-1   | stack temperature (i16)                | 0.1 °C, -40    |
//! |              | 2-3   | ambient temperature (i16)              | 0.1 °C, -40    |
//! |              | 4-5   | H2 cylinder pressure (u16)             | 0.01 MPa       |
//! |              | 6     | H2 inlet pressure (u8)                 | 0.01 MPa       |
//! |              | 7     | H2 concentration (u8)                  | 0.5 %vol       |
//! | `0x18FF04F0` | 0     | IO flags                               |                |
//! |              | 1     | fan1 duty                              | 1 %            |
//! |              | 2-3   | DC/DC MOSFET temperature (i16)         | 0.1 °C, -40    |
//! |              | 4-5   | fault code (u16)                       | 1              |
//!
//! TX `0x18FF10A0`: mode `[1:0]` and command `[4:2]` in byte 0, manual force
//! flags in byte 1, fan target in byte 2, DC/DC voltage and current targets
//! (0.1 resolution) in bytes 3-4 and 5-6.

use byteorder::{ByteOrder, LittleEndian};

use super::{
    Direction, Frame, ProtocolError, CONTROL_FRAME_ID, FRAME_LEN, IO_FRAME_ID, POWER_FRAME_ID,
    SENSORS_FRAME_ID, STATUS_FRAME_ID,
};
use crate::control::{ControlMode, ControlState};
use crate::state::{FaultLevel, Io, MachineState, Power, RunState, Sensors, Status};

/// Upper bound reported for DC/DC efficiency.
///
/// Ratios above this are treated as sensor noise and clipped. This is a
/// lossy guard, not a verified physical limit.
pub const EFFICIENCY_CLAMP: f64 = 99.9;

const TEMP_OFFSET: f64 = 40.0;

const IO_INLET_VALVE: u8 = 0x01;
const IO_PURGE_VALVE: u8 = 0x02;
const IO_PROPORTIONAL_VALVE: u8 = 0x04;
const IO_HEATER: u8 = 0x08;
const IO_FAN1: u8 = 0x10;
const IO_FAN2: u8 = 0x20;

const FORCE_INLET_VALVE: u8 = 0x01;
const FORCE_PURGE_VALVE: u8 = 0x02;
const FORCE_HEATER: u8 = 0x04;
const FORCE_FAN1: u8 = 0x08;
const FORCE_FAN2: u8 = 0x10;

/// Round to a fixed number of decimal places
pub(crate) fn round_to(value: f64, places: i32) -> f64 {
    let factor = 10f64.powi(places);
    (value * factor).round() / factor
}

fn payload(data: &[u8]) -> Result<&[u8; FRAME_LEN], ProtocolError> {
    data.try_into()
        .map_err(|_| ProtocolError::MalformedFrame { len: data.len() })
}

fn offset_temp(raw: i16) -> f64 {
    raw as f64 * 0.1 - TEMP_OFFSET
}

fn raw_u16(value: f64) -> u16 {
    value.round().clamp(0.0, u16::MAX as f64) as u16
}

fn raw_u8(value: f64) -> u8 {
    value.round().clamp(0.0, u8::MAX as f64) as u8
}

fn raw_offset_temp(celsius: f64) -> i16 {
    ((celsius + TEMP_OFFSET) * 10.0)
        .round()
        .clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

/// Efficiency in percent from the two (unrounded) powers
pub fn efficiency(stack_power: f64, dcf_power: f64) -> f64 {
    let ratio = if stack_power > 0.0 {
        dcf_power / stack_power * 100.0
    } else {
        0.0
    };
    // Anything the 1-place rounding would push past the clamp is clipped too
    if ratio > EFFICIENCY_CLAMP {
        EFFICIENCY_CLAMP
    } else {
        round_to(ratio.max(0.0), 1)
    }
}

/// Decode the status frame (`0x18FF01F0`). Byte 1 bits 4..7 are reserved.
pub fn decode_status(data: &[u8], previous: &MachineState) -> Result<MachineState, ProtocolError> {
    let data = payload(data)?;
    let status = Status {
        heartbeat: data[0],
        state: RunState::from_bits(data[1]),
        fault_level: FaultLevel::from_bits(data[1] >> 2),
    };
    Ok(MachineState { status, ..*previous })
}

/// Decode the power frame (`0x18FF02F0`) and derive power and efficiency
pub fn decode_power(data: &[u8], previous: &MachineState) -> Result<MachineState, ProtocolError> {
    let data = payload(data)?;
    let stack_v = LittleEndian::read_u16(&data[0..2]) as f64 * 0.01;
    let stack_i = LittleEndian::read_u16(&data[2..4]) as f64 * 0.1;
    let dcf_v = LittleEndian::read_u16(&data[4..6]) as f64 * 0.01;
    let dcf_i = LittleEndian::read_u16(&data[6..8]) as f64 * 0.1;

    let stack_p = stack_v * stack_i;
    let dcf_p = dcf_v * dcf_i;

    let power = Power {
        stack_voltage: round_to(stack_v, 2),
        stack_current: round_to(stack_i, 1),
        stack_power: round_to(stack_p, 1),
        dcf_out_voltage: round_to(dcf_v, 2),
        dcf_out_current: round_to(dcf_i, 1),
        dcf_power: round_to(dcf_p, 1),
        dcf_efficiency: efficiency(stack_p, dcf_p),
    };
    Ok(MachineState { power, ..*previous })
}

/// Decode the sensor frame (`0x18FF03F0`)
pub fn decode_sensors(data: &[u8], previous: &MachineState) -> Result<MachineState, ProtocolError> {
    let data = payload(data)?;
    let sensors = Sensors {
        stack_temp: round_to(offset_temp(LittleEndian::read_i16(&data[0..2])), 1),
        ambient_temp: round_to(offset_temp(LittleEndian::read_i16(&data[2..4])), 1),
        h2_cylinder_pressure: round_to(LittleEndian::read_u16(&data[4..6]) as f64 * 0.01, 2),
        h2_inlet_pressure: round_to(data[6] as f64 * 0.01, 2),
        h2_concentration: round_to(data[7] as f64 * 0.5, 1),
    };
    Ok(MachineState {
        sensors,
        ..*previous
    })
}

/// Decode the IO frame (`0x18FF04F0`)
pub fn decode_io(data: &[u8], previous: &MachineState) -> Result<MachineState, ProtocolError> {
    let data = payload(data)?;
    let flags = data[0];
    let io = Io {
        h2_inlet_valve: flags & IO_INLET_VALVE != 0,
        h2_purge_valve: flags & IO_PURGE_VALVE != 0,
        proportional_valve: flags & IO_PROPORTIONAL_VALVE != 0,
        heater: flags & IO_HEATER != 0,
        fan1: flags & IO_FAN1 != 0,
        fan2: flags & IO_FAN2 != 0,
        fan1_duty: data[1],
        dcf_mos_temp: round_to(offset_temp(LittleEndian::read_i16(&data[2..4])), 1),
        fault_code: LittleEndian::read_u16(&data[4..6]),
    };
    Ok(MachineState { io, ..*previous })
}

/// Decode any known RX frame by identifier
pub fn apply_frame(frame: &Frame, previous: &MachineState) -> Result<MachineState, ProtocolError> {
    let data = frame.data();
    match frame.id() {
        STATUS_FRAME_ID => decode_status(data, previous),
        POWER_FRAME_ID => decode_power(data, previous),
        SENSORS_FRAME_ID => decode_sensors(data, previous),
        IO_FRAME_ID => decode_io(data, previous),
        other => Err(ProtocolError::UnknownFrameId(other)),
    }
}

/// Apply a group of frames atomically: either every frame decodes and the
/// combined state is returned, or `previous` stays the authoritative state.
pub fn apply_group(frames: &[Frame], previous: &MachineState) -> Result<MachineState, ProtocolError> {
    frames
        .iter()
        .try_fold(*previous, |state, frame| apply_frame(frame, &state))
}

/// Encode the operator control frame (`0x18FF10A0`)
pub fn encode_control(control: &ControlState) -> Frame {
    let mut data = [0u8; FRAME_LEN];

    data[0] = (u8::from(control.mode) & 0b11) | ((u8::from(control.command) & 0b111) << 2);

    // Force flags never leak into an automatic-mode frame
    if control.mode == ControlMode::Manual {
        let mut flags = 0u8;
        if control.force_inlet_valve {
            flags |= FORCE_INLET_VALVE;
        }
        if control.force_purge_valve {
            flags |= FORCE_PURGE_VALVE;
        }
        if control.force_heater {
            flags |= FORCE_HEATER;
        }
        if control.force_fan1 {
            flags |= FORCE_FAN1;
        }
        if control.force_fan2 {
            flags |= FORCE_FAN2;
        }
        data[1] = flags;
    }

    data[2] = raw_u8(control.fan1_target_speed.clamp(0.0, 100.0));
    LittleEndian::write_u16(&mut data[3..5], raw_u16(control.dcf_target_voltage * 10.0));
    LittleEndian::write_u16(&mut data[5..7], raw_u16(control.dcf_target_current * 10.0));

    Frame::from_array(CONTROL_FRAME_ID, data, Direction::Tx)
}

/// Encode a status frame as the controller would send it
pub fn encode_status_frame(heartbeat: u8, state: RunState, fault_level: FaultLevel) -> Frame {
    let mut data = [0u8; FRAME_LEN];
    data[0] = heartbeat;
    data[1] = (u8::from(state) & 0x03) | ((u8::from(fault_level) & 0x03) << 2);
    Frame::from_array(STATUS_FRAME_ID, data, Direction::Rx)
}

/// Encode a power frame from physical values (V, A, V, A)
pub fn encode_power_frame(
    stack_voltage: f64,
    stack_current: f64,
    dcf_voltage: f64,
    dcf_current: f64,
) -> Frame {
    let mut data = [0u8; FRAME_LEN];
    LittleEndian::write_u16(&mut data[0..2], raw_u16(stack_voltage * 100.0));
    LittleEndian::write_u16(&mut data[2..4], raw_u16(stack_current * 10.0));
    LittleEndian::write_u16(&mut data[4..6], raw_u16(dcf_voltage * 100.0));
    LittleEndian::write_u16(&mut data[6..8], raw_u16(dcf_current * 10.0));
    Frame::from_array(POWER_FRAME_ID, data, Direction::Rx)
}

/// Encode a sensor frame from physical values
pub fn encode_sensors_frame(sensors: &Sensors) -> Frame {
    let mut data = [0u8; FRAME_LEN];
    LittleEndian::write_i16(&mut data[0..2], raw_offset_temp(sensors.stack_temp));
    LittleEndian::write_i16(&mut data[2..4], raw_offset_temp(sensors.ambient_temp));
    LittleEndian::write_u16(&mut data[4..6], raw_u16(sensors.h2_cylinder_pressure * 100.0));
    data[6] = raw_u8(sensors.h2_inlet_pressure * 100.0);
    data[7] = raw_u8(sensors.h2_concentration * 2.0);
    Frame::from_array(SENSORS_FRAME_ID, data, Direction::Rx)
}

/// Encode an IO frame from actuator states
pub fn encode_io_frame(io: &Io) -> Frame {
    let mut data = [0u8; FRAME_LEN];
    let mut flags = 0u8;
    if io.h2_inlet_valve {
        flags |= IO_INLET_VALVE;
    }
    if io.h2_purge_valve {
        flags |= IO_PURGE_VALVE;
    }
    if io.proportional_valve {
        flags |= IO_PROPORTIONAL_VALVE;
    }
    if io.heater {
        flags |= IO_HEATER;
    }
    if io.fan1 {
        flags |= IO_FAN1;
    }
    if io.fan2 {
        flags |= IO_FAN2;
    }
    data[0] = flags;
    data[1] = io.fan1_duty;
    LittleEndian::write_i16(&mut data[2..4], raw_offset_temp(io.dcf_mos_temp));
    LittleEndian::write_u16(&mut data[4..6], io.fault_code);
    Frame::from_array(IO_FRAME_ID, data, Direction::Rx)
}
