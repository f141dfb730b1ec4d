//! Operator-facing state

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{error, info};

use crate::config::MonitorConfig;
use crate::control::{Command, ControlPatch, ControlState};
use crate::datalog::{DatalogError, LogBufferWriter, LogDestination};
use crate::diagnosis::DiagnosisResult;
use crate::state::MachineState;
use crate::telemetry::{ChartPoint, FaultLogEntry, TelemetryAggregator};

/// Everything a renderer needs, copied out of the store
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorSnapshot {
    /// Latest machine state
    pub state: MachineState,
    /// Chart points, oldest first
    pub history: Vec<ChartPoint>,
    /// Fault entries, newest first
    pub fault_log: Vec<FaultLogEntry>,
    /// Latest diagnosis
    pub diagnosis: Option<DiagnosisResult>,
    /// Operator control state
    pub control: ControlState,
    /// Session connectivity
    pub connected: bool,
    /// CSV logging active
    pub logging: bool,
}

/// Latest machine state plus the aggregates derived from it
pub struct MonitorStore {
    state: MachineState,
    diagnosis: Option<DiagnosisResult>,
    control: ControlState,
    connected: bool,
    telemetry: TelemetryAggregator,
    writer: LogBufferWriter,
}

impl MonitorStore {
    /// Empty store logging to `destination`
    pub fn new(config: &MonitorConfig, destination: Arc<dyn LogDestination>) -> Self {
        Self {
            state: MachineState::default(),
            diagnosis: None,
            control: ControlState::default(),
            connected: false,
            telemetry: TelemetryAggregator::new(&config.telemetry),
            writer: LogBufferWriter::from_config(destination, &config.datalog),
        }
    }

    /// Latest machine state
    pub fn current_state(&self) -> &MachineState {
        &self.state
    }

    /// Chart points, oldest first
    pub fn history(&self) -> Vec<ChartPoint> {
        self.telemetry.history().to_vec()
    }

    /// Fault entries, newest first
    pub fn fault_log(&self) -> Vec<FaultLogEntry> {
        self.telemetry.fault_log().to_vec()
    }

    /// Latest diagnosis, if any arrived
    pub fn diagnosis(&self) -> Option<&DiagnosisResult> {
        self.diagnosis.as_ref()
    }

    /// Stored control state; never carries a command
    pub fn control(&self) -> ControlState {
        self.control
    }

    /// Session connectivity as last reported
    pub fn is_connected(&self) -> bool {
        self.connected
    }

    /// True while a CSV log is open
    pub fn is_logging(&self) -> bool {
        self.writer.is_active()
    }

    /// Merge a partial control change and return the new state
    pub fn update_control(&mut self, patch: &ControlPatch) -> ControlState {
        self.control.apply(patch);
        self.control
    }

    /// The control state to send for a one-shot command. The held state is
    /// not changed.
    pub fn trigger_command(&self, command: Command) -> ControlState {
        self.control.with_command(command)
    }

    /// Turn logging on or off and return whether it is now on.
    ///
    /// A cancelled destination choice leaves logging off without an error.
    pub async fn toggle_logging(&mut self) -> Result<bool, DatalogError> {
        if self.writer.is_active() {
            self.telemetry.detach_log();
            self.writer.stop().await?;
            return Ok(false);
        }

        match self.writer.start().await {
            Ok(()) => {
                self.telemetry.attach_log(self.writer.buffer());
                Ok(true)
            }
            Err(DatalogError::UserCancelled) => {
                info!("Logging not started: destination selection cancelled");
                Ok(false)
            }
            Err(e) => {
                error!("Logging not started: {}", e);
                Err(e)
            }
        }
    }

    /// Record a connectivity change
    pub fn set_connected(&mut self, connected: bool) {
        self.connected = connected;
    }

    /// Record a new machine state, and the diagnosis that came with it
    pub fn ingest(&mut self, state: MachineState, diagnosis: Option<DiagnosisResult>) {
        self.ingest_at(state, diagnosis, Utc::now());
    }

    /// [`ingest`](Self::ingest) with an explicit timestamp
    pub fn ingest_at(
        &mut self,
        state: MachineState,
        diagnosis: Option<DiagnosisResult>,
        now: DateTime<Utc>,
    ) {
        self.telemetry.ingest(&state, now);
        self.state = state;
        if diagnosis.is_some() {
            self.diagnosis = diagnosis;
        }
    }

    /// Record a diagnosis that arrived on its own
    pub fn set_diagnosis(&mut self, diagnosis: DiagnosisResult) {
        self.diagnosis = Some(diagnosis);
    }

    /// Copy out everything a renderer needs
    pub fn snapshot(&self) -> MonitorSnapshot {
        MonitorSnapshot {
            state: self.state,
            history: self.history(),
            fault_log: self.fault_log(),
            diagnosis: self.diagnosis.clone(),
            control: self.control,
            connected: self.connected,
            logging: self.is_logging(),
        }
    }

    /// Stop logging, if active, flushing what is pending
    pub async fn close(&mut self) -> Result<(), DatalogError> {
        self.telemetry.detach_log();
        self.writer.stop().await
    }
}
