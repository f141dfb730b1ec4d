//! Wire payloads
//!
//! Every message is a JSON object with a `type` tag. Payloads whose tag is
//! not understood are surfaced as [`Envelope::Unknown`] so callers can log
//! and drop them without treating them as errors.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::control::ControlState;
use crate::diagnosis::{DiagnosisLabel, DiagnosisResult};
use crate::state::MachineState;

/// Messages sent from the bridge to observers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Latest decoded state
    MachineState {
        /// Decoded machine state
        data: MachineState,
        /// Diagnosis for this state, when a model runs
        #[serde(default, skip_serializing_if = "Option::is_none")]
        diagnosis: Option<DiagnosisResult>,
    },
}

/// Messages sent from observers to the bridge
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Operator control state to encode onto the bus
    Control(ControlState),
    /// Operator correction of a diagnosis
    DiagnosisFeedback(DiagnosisFeedback),
}

/// Operator label for the last diagnosis
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DiagnosisFeedback {
    /// Label the operator chose
    pub label: DiagnosisLabel,
}

/// A message type with a fixed set of `type` tags
pub trait Tagged {
    /// Every accepted `type` value
    const TAGS: &'static [&'static str];
}

impl Tagged for ServerMessage {
    const TAGS: &'static [&'static str] = &["machine_state"];
}

impl Tagged for ClientMessage {
    const TAGS: &'static [&'static str] = &["control", "diagnosis_feedback"];
}

/// Result of parsing a tagged payload
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope<T> {
    /// A recognised message
    Known(T),
    /// Tag not understood; carries the tag (empty if missing)
    Unknown(String),
}

/// Parse a JSON text payload, separating unknown tags from malformed input
pub fn parse_envelope<T: Tagged + DeserializeOwned>(text: &str) -> Result<Envelope<T>, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let tag = value
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .to_string();

    if T::TAGS.contains(&tag.as_str()) {
        Ok(Envelope::Known(serde_json::from_value(value)?))
    } else {
        Ok(Envelope::Unknown(tag))
    }
}
