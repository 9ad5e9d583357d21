use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PayloadKind {
    None,
    Powered,
    Memory,
    Pulse,
    PulseLatch,
    Clock,
}

impl PayloadKind {
    pub fn name(self) -> &'static str {
        match self {
            PayloadKind::None => "none",
            PayloadKind::Powered => "powered",
            PayloadKind::Memory => "memory",
            PayloadKind::Pulse => "pulse",
            PayloadKind::PulseLatch => "pulse_latch",
            PayloadKind::Clock => "clock",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PoweredState {
    pub powered: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct MemoryState {
    pub powered: bool,
    pub stored: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PulseState {
    pub powered: bool,
    pub start_tick: u64,
    pub pulse_ticks: u32,
}

impl Default for PulseState {
    fn default() -> Self {
        Self {
            powered: false,
            start_tick: 0,
            pulse_ticks: DEFAULT_PULSE_TICKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PulseLatchState {
    pub powered: bool,
    pub pulse_battery: u32,
    pub pulse_ticks: u32,
}

impl Default for PulseLatchState {
    fn default() -> Self {
        Self {
            powered: false,
            pulse_battery: 0,
            pulse_ticks: DEFAULT_PULSE_TICKS,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct ClockState {
    pub powered: bool,
    pub start_tick: u64,
    pub rate: u32,
}

impl Default for ClockState {
    fn default() -> Self {
        Self {
            powered: false,
            start_tick: 0,
            rate: DEFAULT_CLOCK_RATE,
        }
    }
}

pub const DEFAULT_PULSE_TICKS: u32 = 10;
pub const DEFAULT_CLOCK_RATE: u32 = 10;

/// Extra per-block state carried next to an entity's id and position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockPayload {
    None,
    Powered(PoweredState),
    Memory(MemoryState),
    Pulse(PulseState),
    PulseLatch(PulseLatchState),
    Clock(ClockState),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PayloadError {
    #[error("{kind} payload must be a JSON object, got {found}")]
    NotAnObject { kind: &'static str, found: &'static str },
    #[error("{kind} block carries no payload fields, got {fields:?}")]
    UnexpectedFields {
        kind: &'static str,
        fields: Vec<String>,
    },
    #[error("invalid {kind} payload at {path}: {message}")]
    Invalid {
        kind: &'static str,
        path: String,
        message: String,
    },
}

impl BlockPayload {
    pub fn default_for(kind: PayloadKind) -> Self {
        match kind {
            PayloadKind::None => BlockPayload::None,
            PayloadKind::Powered => BlockPayload::Powered(PoweredState::default()),
            PayloadKind::Memory => BlockPayload::Memory(MemoryState::default()),
            PayloadKind::Pulse => BlockPayload::Pulse(PulseState::default()),
            PayloadKind::PulseLatch => BlockPayload::PulseLatch(PulseLatchState::default()),
            PayloadKind::Clock => BlockPayload::Clock(ClockState::default()),
        }
    }

    /// Decodes `raw` as the payload of `kind`. `null` yields the kind's default state.
    pub fn decode(kind: PayloadKind, raw: &Value) -> Result<Self, PayloadError> {
        let fields = match raw {
            Value::Null => return Ok(Self::default_for(kind)),
            Value::Object(fields) => fields,
            other => {
                return Err(PayloadError::NotAnObject {
                    kind: kind.name(),
                    found: json_type_name(other),
                })
            }
        };

        match kind {
            PayloadKind::None => {
                if fields.is_empty() {
                    Ok(BlockPayload::None)
                } else {
                    Err(PayloadError::UnexpectedFields {
                        kind: kind.name(),
                        fields: fields.keys().cloned().collect(),
                    })
                }
            }
            PayloadKind::Powered => decode_state(kind, raw).map(BlockPayload::Powered),
            PayloadKind::Memory => decode_state(kind, raw).map(BlockPayload::Memory),
            PayloadKind::Pulse => decode_state(kind, raw).map(BlockPayload::Pulse),
            PayloadKind::PulseLatch => decode_state(kind, raw).map(BlockPayload::PulseLatch),
            PayloadKind::Clock => decode_state(kind, raw).map(BlockPayload::Clock),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            BlockPayload::None => PayloadKind::None,
            BlockPayload::Powered(_) => PayloadKind::Powered,
            BlockPayload::Memory(_) => PayloadKind::Memory,
            BlockPayload::Pulse(_) => PayloadKind::Pulse,
            BlockPayload::PulseLatch(_) => PayloadKind::PulseLatch,
            BlockPayload::Clock(_) => PayloadKind::Clock,
        }
    }

    pub fn powered(&self) -> Option<bool> {
        match self {
            BlockPayload::None => None,
            BlockPayload::Powered(state) => Some(state.powered),
            BlockPayload::Memory(state) => Some(state.powered),
            BlockPayload::Pulse(state) => Some(state.powered),
            BlockPayload::PulseLatch(state) => Some(state.powered),
            BlockPayload::Clock(state) => Some(state.powered),
        }
    }

    pub fn to_json(&self) -> Value {
        let encoded = match self {
            BlockPayload::None => Ok(Value::Object(Map::new())),
            BlockPayload::Powered(state) => serde_json::to_value(state),
            BlockPayload::Memory(state) => serde_json::to_value(state),
            BlockPayload::Pulse(state) => serde_json::to_value(state),
            BlockPayload::PulseLatch(state) => serde_json::to_value(state),
            BlockPayload::Clock(state) => serde_json::to_value(state),
        };
        // Plain structs of bools and integers always encode.
        encoded.unwrap_or_else(|_| Value::Object(Map::new()))
    }

    /// Overlays `patch` onto the current fields and re-validates the result.
    pub fn merged(&self, patch: &Map<String, Value>) -> Result<Self, PayloadError> {
        if patch.is_empty() {
            return Ok(self.clone());
        }
        let mut fields = match self.to_json() {
            Value::Object(fields) => fields,
            _ => Map::new(),
        };
        for (key, value) in patch {
            fields.insert(key.clone(), value.clone());
        }
        Self::decode(self.kind(), &Value::Object(fields))
    }
}

fn decode_state<T: DeserializeOwned>(kind: PayloadKind, raw: &Value) -> Result<T, PayloadError> {
    serde_path_to_error::deserialize::<_, T>(raw).map_err(|error| {
        let path = error.path().to_string();
        PayloadError::Invalid {
            kind: kind.name(),
            path,
            message: error.into_inner().to_string(),
        }
    })
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
