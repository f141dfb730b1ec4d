//! Demo Mode - Simulated FCU frame generator for testing
//!
//! Generates realistic CAN traffic for UI testing without a real bus.
//! Simulates a stack cycling its load with a DC/DC converter holding 24 V,
//! and follows start / shutdown / emergency-stop / reset commands sent to it.

use rand::rngs::StdRng;
use rand::Rng;
use rand::SeedableRng;

use crate::control::Command;
use crate::protocol::{
    apply_group, encode_io_frame, encode_power_frame, encode_sensors_frame, encode_status_frame,
    Frame, CONTROL_FRAME_ID,
};
use crate::state::{FaultLevel, Io, MachineState, RunState, Sensors};

/// Time spent in the start phase before the stack reports Run
const START_DURATION_MS: u64 = 3000;

/// Regulated DC/DC output voltage
const DCF_OUTPUT_V: f64 = 24.0;

/// Nominal stack voltage under load
const NOMINAL_STACK_V: f64 = 48.0;

const AMBIENT_C: f64 = 25.0;
const RUNNING_STACK_C: f64 = 65.0;

/// Fault code latched by an emergency stop
pub const EMERGENCY_STOP_FAULT: u16 = 0x00E1;

/// Demo FCU simulator that generates internally consistent frames
pub struct DemoSimulator {
    /// Time when simulation started (ms)
    start_time_ms: Option<u64>,
    /// Last update time, relative to start (ms)
    last_update_ms: u64,
    /// Current run phase
    phase: Phase,
    /// Heartbeat counter for the next status frame
    heartbeat: u8,
    /// Smoothed stack temperature
    stack_temp: f64,
    /// Snapshot decoded from the last batch of frames
    state: MachineState,
    /// Random number generator
    rng: StdRng,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum Phase {
    /// Stack off, nothing flowing
    Off,
    /// Start sequence running
    Starting { start_ms: u64 },
    /// Producing power
    Running,
    /// Latched emergency stop
    Faulted,
}

impl Default for DemoSimulator {
    fn default() -> Self {
        Self::new()
    }
}

impl DemoSimulator {
    /// Create a running simulator with an entropy-seeded RNG
    pub fn new() -> Self {
        Self::from_rng(StdRng::from_entropy())
    }

    /// Create a running simulator with a fixed seed for reproducible runs
    pub fn with_seed(seed: u64) -> Self {
        Self::from_rng(StdRng::seed_from_u64(seed))
    }

    fn from_rng(rng: StdRng) -> Self {
        Self {
            start_time_ms: None,
            last_update_ms: 0,
            phase: Phase::Running,
            heartbeat: 0,
            stack_temp: RUNNING_STACK_C,
            state: MachineState::default(),
            rng,
        }
    }

    /// Current modeled run state
    pub fn run_state(&self) -> RunState {
        match self.phase {
            Phase::Off => RunState::Off,
            Phase::Starting { .. } => RunState::Start,
            Phase::Running => RunState::Run,
            Phase::Faulted => RunState::Fault,
        }
    }

    /// Snapshot decoded from the most recent frames
    pub fn state(&self) -> &MachineState {
        &self.state
    }

    /// React to a control frame; frames with other identifiers are ignored
    pub fn apply_control(&mut self, frame: &Frame) {
        if frame.id() != CONTROL_FRAME_ID {
            return;
        }
        let Some(command) = Command::from_bits(frame.data()[0] >> 2) else {
            return;
        };
        self.apply_command(command);
    }

    /// Drive the modeled state machine directly
    pub fn apply_command(&mut self, command: Command) {
        self.phase = match (command, self.phase) {
            (Command::Start, Phase::Off) => Phase::Starting {
                start_ms: self.last_update_ms,
            },
            (Command::Shutdown, Phase::Starting { .. } | Phase::Running) => Phase::Off,
            (Command::EmergencyStop, _) => Phase::Faulted,
            (Command::Reset, Phase::Faulted) => Phase::Off,
            (_, phase) => phase,
        };
    }

    /// Advance the simulation and produce one frame of each RX type
    ///
    /// # Arguments
    /// * `elapsed_ms` - Milliseconds since an arbitrary epoch; the first call
    ///   becomes time zero
    pub fn update(&mut self, elapsed_ms: u64) -> Vec<Frame> {
        let start = *self.start_time_ms.get_or_insert(elapsed_ms);
        let sim_time = elapsed_ms.saturating_sub(start);
        let delta_ms = sim_time.saturating_sub(self.last_update_ms);
        self.last_update_ms = sim_time;

        if let Phase::Starting { start_ms } = self.phase {
            if sim_time >= start_ms + START_DURATION_MS {
                self.phase = Phase::Running;
            }
        }

        let t = sim_time as f64 / 1000.0;
        let running = self.phase == Phase::Running;

        // Thermal lag towards the operating point or ambient
        let target_temp = if running { RUNNING_STACK_C } else { AMBIENT_C };
        let alpha = (delta_ms as f64 / 30_000.0).min(1.0);
        self.stack_temp += (target_temp - self.stack_temp) * alpha;

        let (stack_v, stack_i, dcf_v, dcf_i) = match self.phase {
            Phase::Running => {
                let jitter = self.rng.gen_range(-0.05..0.05);
                let stack_v = NOMINAL_STACK_V + 4.0 * (t * 0.5).sin() + jitter;
                let stack_i = (20.0 + 10.0 * (t * 0.3).sin()).max(0.0);
                // Target efficiency oscillates inside 90..96 %
                let target_eff = 0.93 + 0.03 * (t * 0.2).sin();
                let dcf_i = stack_v * stack_i * target_eff / DCF_OUTPUT_V;
                (stack_v, stack_i, DCF_OUTPUT_V, dcf_i)
            }
            Phase::Starting { start_ms } => {
                // Open-circuit voltage builds up, no load drawn yet
                let progress =
                    ((sim_time - start_ms) as f64 / START_DURATION_MS as f64).min(1.0);
                (NOMINAL_STACK_V * 1.1 * progress, 0.0, 0.0, 0.0)
            }
            Phase::Off | Phase::Faulted => (0.0, 0.0, 0.0, 0.0),
        };

        let sensors = Sensors {
            stack_temp: self.stack_temp,
            ambient_temp: AMBIENT_C + 0.5 * (t * 0.05).sin(),
            h2_cylinder_pressure: 12.0 - 0.2 * (t / 600.0).min(1.0),
            h2_inlet_pressure: if running { 0.5 + 0.02 * (t * 0.7).sin() } else { 0.0 },
            h2_concentration: if running { 0.5 } else { 0.0 },
        };

        let io = if running {
            let duty = ((self.stack_temp - 40.0) * 3.0).clamp(20.0, 100.0);
            Io {
                h2_inlet_valve: true,
                // Short purge every ten seconds
                h2_purge_valve: sim_time % 10_000 < 500,
                proportional_valve: true,
                heater: false,
                fan1: true,
                fan2: self.stack_temp > 60.0,
                fan1_duty: duty.round() as u8,
                dcf_mos_temp: 35.0 + 0.3 * dcf_i,
                fault_code: 0,
            }
        } else {
            Io {
                heater: matches!(self.phase, Phase::Starting { .. }) && self.stack_temp < 40.0,
                dcf_mos_temp: AMBIENT_C + 5.0,
                fault_code: if self.phase == Phase::Faulted {
                    EMERGENCY_STOP_FAULT
                } else {
                    0
                },
                ..Io::default()
            }
        };

        let fault_level = if self.phase == Phase::Faulted {
            FaultLevel::Emergency
        } else {
            FaultLevel::Normal
        };

        let frames = vec![
            encode_status_frame(self.heartbeat, self.run_state(), fault_level),
            encode_power_frame(stack_v, stack_i, dcf_v, dcf_i),
            encode_sensors_frame(&sensors),
            encode_io_frame(&io),
        ];
        self.heartbeat = self.heartbeat.wrapping_add(1);

        // Frames built by the encoders are always well-formed
        if let Ok(state) = apply_group(&frames, &self.state) {
            self.state = state;
        }

        frames
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlState;
    use crate::protocol::codec::EFFICIENCY_CLAMP;
    use crate::protocol::encode_control;

    #[test]
    fn test_simulator_creates_frames() {
        let mut sim = DemoSimulator::with_seed(1);
        let frames = sim.update(0);
        assert_eq!(frames.len(), 4);
        assert_eq!(sim.state().status.state, RunState::Run);
    }

    #[test]
    fn test_efficiency_stays_in_band() {
        let mut sim = DemoSimulator::with_seed(7);
        for ms in (0..120_000).step_by(100) {
            sim.update(ms);
            let power = sim.state().power;
            assert!(power.dcf_efficiency <= EFFICIENCY_CLAMP);
            assert!(power.dcf_efficiency >= 85.0, "efficiency {}", power.dcf_efficiency);
            assert!(power.stack_current >= 0.0);
            assert!(power.dcf_out_current >= 0.0);
        }
    }

    #[test]
    fn test_heartbeat_wraps() {
        let mut sim = DemoSimulator::with_seed(3);
        for ms in 0..300u64 {
            sim.update(ms * 100);
        }
        // 300 frames: counter ran 0..=255 then 0..=43
        assert_eq!(sim.state().status.heartbeat, 43);
    }

    #[test]
    fn test_shutdown_zeroes_flow() {
        let mut sim = DemoSimulator::with_seed(5);
        sim.update(0);
        sim.update(1000);
        let stop = encode_control(&ControlState::default().with_command(Command::Shutdown));
        sim.apply_control(&stop);
        sim.update(1100);

        let state = sim.state();
        assert_eq!(state.status.state, RunState::Off);
        assert_eq!(state.power.stack_current, 0.0);
        assert_eq!(state.power.dcf_out_current, 0.0);
        assert_eq!(state.io.fan1_duty, 0);
        assert!(!state.io.h2_inlet_valve);
        assert!(!state.io.h2_purge_valve);
        assert!(!state.io.proportional_valve);
    }

    #[test]
    fn test_start_sequence_reaches_run() {
        let mut sim = DemoSimulator::with_seed(9);
        sim.update(0);
        sim.apply_command(Command::Shutdown);
        sim.update(100);
        sim.apply_command(Command::Start);
        sim.update(200);
        assert_eq!(sim.run_state(), RunState::Start);
        assert_eq!(sim.state().power.stack_current, 0.0);

        sim.update(3300);
        assert_eq!(sim.run_state(), RunState::Run);
    }

    #[test]
    fn test_emergency_stop_latches_until_reset() {
        let mut sim = DemoSimulator::with_seed(11);
        sim.update(0);
        sim.apply_command(Command::EmergencyStop);
        sim.update(100);
        assert_eq!(sim.state().status.fault_level, FaultLevel::Emergency);
        assert_eq!(sim.state().io.fault_code, EMERGENCY_STOP_FAULT);

        sim.apply_command(Command::Start);
        assert_eq!(sim.run_state(), RunState::Fault);

        sim.apply_command(Command::Reset);
        sim.update(200);
        assert_eq!(sim.run_state(), RunState::Off);
        assert_eq!(sim.state().io.fault_code, 0);
    }
}
