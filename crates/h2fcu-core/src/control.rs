//! Operator control intent
//!
//! `ControlState` is what the operator has dialled in. Commands are
//! momentary: they are sent once through [`ControlState::with_command`] and
//! never stored, so the held state always carries [`Command::None`].

use serde::{Deserialize, Serialize};

/// Control authority
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum ControlMode {
    /// Operator force flags are honoured
    Manual = 0,
    /// Controller runs its own strategy
    #[default]
    Auto = 1,
}

impl From<ControlMode> for u8 {
    fn from(mode: ControlMode) -> Self {
        mode as u8
    }
}

impl TryFrom<u8> for ControlMode {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ControlMode::Manual),
            1 => Ok(ControlMode::Auto),
            other => Err(format!("invalid control mode {}", other)),
        }
    }
}

/// One-shot command pulse
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Command {
    /// No command pending
    #[default]
    None = 0,
    /// Begin the start-up sequence
    Start = 1,
    /// Clear a latched fault
    Reset = 2,
    /// Immediate stop, latches a fault
    EmergencyStop = 3,
    /// Orderly stop
    Shutdown = 4,
}

impl Command {
    /// Decode from the three-bit field of a control frame
    pub fn from_bits(bits: u8) -> Option<Self> {
        match bits & 0x07 {
            0 => Some(Command::None),
            1 => Some(Command::Start),
            2 => Some(Command::Reset),
            3 => Some(Command::EmergencyStop),
            4 => Some(Command::Shutdown),
            _ => None,
        }
    }
}

impl From<Command> for u8 {
    fn from(command: Command) -> Self {
        command as u8
    }
}

impl TryFrom<u8> for Command {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        if value > 0x07 {
            return Err(format!("invalid command {}", value));
        }
        Command::from_bits(value).ok_or_else(|| format!("invalid command {}", value))
    }
}

/// Operator control state sent in the TX control frame
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlState {
    /// Auto or manual actuator control
    pub mode: ControlMode,
    /// One-shot command for this frame
    pub command: Command,
    /// Force the H₂ inlet valve open (manual only)
    pub force_inlet_valve: bool,
    /// Force the purge valve open (manual only)
    pub force_purge_valve: bool,
    /// Force the heater on (manual only)
    pub force_heater: bool,
    /// Force fan 1 on (manual only)
    pub force_fan1: bool,
    /// Force fan 2 on (manual only)
    pub force_fan2: bool,
    /// 0..100 %
    pub fan1_target_speed: f64,
    /// V, non-negative
    pub dcf_target_voltage: f64,
    /// A, non-negative
    pub dcf_target_current: f64,
}

impl Default for ControlState {
    fn default() -> Self {
        Self {
            mode: ControlMode::Auto,
            command: Command::None,
            force_inlet_valve: false,
            force_purge_valve: false,
            force_heater: false,
            force_fan1: false,
            force_fan2: false,
            fan1_target_speed: 50.0,
            dcf_target_voltage: 24.0,
            dcf_target_current: 5.0,
        }
    }
}

impl ControlState {
    /// Copy of this state carrying a one-shot command
    pub fn with_command(&self, command: Command) -> Self {
        Self { command, ..*self }
    }

    /// Apply a partial update. Commands in the patch are ignored here; use
    /// [`ControlState::with_command`] to pulse one.
    pub fn apply(&mut self, patch: &ControlPatch) {
        if let Some(mode) = patch.mode {
            self.mode = mode;
        }
        if let Some(v) = patch.force_inlet_valve {
            self.force_inlet_valve = v;
        }
        if let Some(v) = patch.force_purge_valve {
            self.force_purge_valve = v;
        }
        if let Some(v) = patch.force_heater {
            self.force_heater = v;
        }
        if let Some(v) = patch.force_fan1 {
            self.force_fan1 = v;
        }
        if let Some(v) = patch.force_fan2 {
            self.force_fan2 = v;
        }
        if let Some(v) = patch.fan1_target_speed {
            self.fan1_target_speed = v.clamp(0.0, 100.0);
        }
        if let Some(v) = patch.dcf_target_voltage {
            self.dcf_target_voltage = v.max(0.0);
        }
        if let Some(v) = patch.dcf_target_current {
            self.dcf_target_current = v.max(0.0);
        }
        self.command = Command::None;
    }
}

/// Partial control update emitted by the UI
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ControlPatch {
    /// New mode
    pub mode: Option<ControlMode>,
    /// New inlet valve override
    pub force_inlet_valve: Option<bool>,
    /// New purge valve override
    pub force_purge_valve: Option<bool>,
    /// New heater override
    pub force_heater: Option<bool>,
    /// New fan 1 override
    pub force_fan1: Option<bool>,
    /// New fan 2 override
    pub force_fan2: Option<bool>,
    /// New fan 1 target, %
    pub fan1_target_speed: Option<f64>,
    /// New DC/DC voltage target, V
    pub dcf_target_voltage: Option<f64>,
    /// New DC/DC current target, A
    pub dcf_target_current: Option<f64>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_match_controller_expectations() {
        let control = ControlState::default();
        assert_eq!(control.mode, ControlMode::Auto);
        assert_eq!(control.command, Command::None);
        assert_eq!(control.fan1_target_speed, 50.0);
        assert_eq!(control.dcf_target_voltage, 24.0);
        assert_eq!(control.dcf_target_current, 5.0);
    }

    #[test]
    fn test_with_command_leaves_original_untouched() {
        let control = ControlState::default();
        let pulse = control.with_command(Command::Start);
        assert_eq!(pulse.command, Command::Start);
        assert_eq!(control.command, Command::None);
    }

    #[test]
    fn test_apply_patch_clamps() {
        let mut control = ControlState::default();
        control.apply(&ControlPatch {
            mode: Some(ControlMode::Manual),
            force_heater: Some(true),
            fan1_target_speed: Some(140.0),
            dcf_target_voltage: Some(-3.0),
            ..Default::default()
        });
        assert_eq!(control.mode, ControlMode::Manual);
        assert!(control.force_heater);
        assert_eq!(control.fan1_target_speed, 100.0);
        assert_eq!(control.dcf_target_voltage, 0.0);
    }

    #[test]
    fn test_wire_names() {
        let json = serde_json::to_value(ControlState::default()).unwrap();
        assert_eq!(json["mode"], 1);
        assert_eq!(json["command"], 0);
        assert_eq!(json["fan1TargetSpeed"], 50.0);
        assert_eq!(json["forceInletValve"], false);
    }
}
