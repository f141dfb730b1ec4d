//! Machine state snapshot
//!
//! The typed view of the FCU assembled from the four RX frames. Each
//! sub-object is owned by exactly one frame and is replaced wholesale when
//! that frame is decoded.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Operating state reported in the status frame (byte1 bits 0..1)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum RunState {
    /// Stack is off
    #[default]
    Off = 0,
    /// Start-up sequence in progress
    Start = 1,
    /// Producing power
    Run = 2,
    /// Latched fault
    Fault = 3,
}

impl RunState {
    /// Decode from the two-bit field, ignoring higher bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => RunState::Off,
            1 => RunState::Start,
            2 => RunState::Run,
            _ => RunState::Fault,
        }
    }
}

impl From<RunState> for u8 {
    fn from(state: RunState) -> Self {
        state as u8
    }
}

impl TryFrom<u8> for RunState {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 3 {
            return Err(format!("invalid run state {}", value));
        }
        Ok(RunState::from_bits(value))
    }
}

/// Severity class of the active fault (byte1 bits 2..3)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum FaultLevel {
    /// No fault
    #[default]
    Normal = 0,
    /// Degraded, still running
    Warning = 1,
    /// Output limited
    Severe = 2,
    /// Stack shut down
    Emergency = 3,
}

impl FaultLevel {
    /// Decode from the two-bit field, ignoring higher bits
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0x03 {
            0 => FaultLevel::Normal,
            1 => FaultLevel::Warning,
            2 => FaultLevel::Severe,
            _ => FaultLevel::Emergency,
        }
    }
}

impl From<FaultLevel> for u8 {
    fn from(level: FaultLevel) -> Self {
        level as u8
    }
}

impl TryFrom<u8> for FaultLevel {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 3 {
            return Err(format!("invalid fault level {}", value));
        }
        Ok(FaultLevel::from_bits(value))
    }
}

impl fmt::Display for FaultLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FaultLevel::Normal => "normal",
            FaultLevel::Warning => "warning",
            FaultLevel::Severe => "severe",
            FaultLevel::Emergency => "emergency",
        };
        f.write_str(name)
    }
}

/// Status frame contents
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    /// Free-running counter, wraps at 256
    pub heartbeat: u8,
    /// Run state
    pub state: RunState,
    /// Active fault severity
    pub fault_level: FaultLevel,
}

/// Power frame contents plus derived quantities
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Power {
    /// V
    pub stack_voltage: f64,
    /// A
    pub stack_current: f64,
    /// W, derived
    pub stack_power: f64,
    /// V
    pub dcf_out_voltage: f64,
    /// A
    pub dcf_out_current: f64,
    /// W, derived
    pub dcf_power: f64,
    /// %, derived and clamped to 99.9
    pub dcf_efficiency: f64,
}

/// Sensor frame contents
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Sensors {
    /// °C
    pub stack_temp: f64,
    /// °C
    pub ambient_temp: f64,
    /// MPa
    pub h2_cylinder_pressure: f64,
    /// MPa
    pub h2_inlet_pressure: f64,
    /// %vol
    pub h2_concentration: f64,
}

/// Actuator feedback and fault code
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Io {
    /// H₂ inlet valve open
    pub h2_inlet_valve: bool,
    /// Purge valve open
    pub h2_purge_valve: bool,
    /// Proportional valve active
    pub proportional_valve: bool,
    /// Heater on
    pub heater: bool,
    /// Fan 1 on
    pub fan1: bool,
    /// Fan 2 on
    pub fan2: bool,
    /// %
    pub fan1_duty: u8,
    /// °C
    pub dcf_mos_temp: f64,
    /// Active fault code, 0 when none
    pub fault_code: u16,
}

/// Complete snapshot of the FCU
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MachineState {
    /// Set by the bridge once any known frame has been applied
    #[serde(default)]
    pub connected: bool,
    /// Epoch milliseconds of the last applied frame
    #[serde(default)]
    pub last_update: i64,
    /// Status frame
    pub status: Status,
    /// Power frame
    pub power: Power,
    /// Sensor frame
    pub sensors: Sensors,
    /// IO frame
    pub io: Io,
}

impl MachineState {
    /// Whether this snapshot describes an active fault
    pub fn has_fault(&self) -> bool {
        self.io.fault_code != 0 || self.status.state == RunState::Fault
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_default_is_zeroed() {
        let state = MachineState::default();
        assert_eq!(state.status.heartbeat, 0);
        assert_eq!(state.status.state, RunState::Off);
        assert_eq!(state.power.stack_voltage, 0.0);
        assert!(!state.io.fan1);
        assert!(!state.has_fault());
    }

    #[test]
    fn test_json_shape_matches_wire() {
        let mut state = MachineState::default();
        state.status.state = RunState::Run;
        state.status.fault_level = FaultLevel::Warning;
        state.sensors.h2_inlet_pressure = 0.5;

        let value = serde_json::to_value(state).unwrap();
        assert_eq!(value["status"]["state"], 2);
        assert_eq!(value["status"]["faultLevel"], 1);
        assert_eq!(value["sensors"]["h2InletPressure"], 0.5);
        assert_eq!(value["io"]["faultCode"], 0);
    }

    #[test]
    fn test_rejects_out_of_range_codes() {
        let json = r#"{"heartbeat":1,"state":7,"faultLevel":0}"#;
        assert!(serde_json::from_str::<Status>(json).is_err());
    }
}
