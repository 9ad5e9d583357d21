use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::world::{EntityId, GridPos, Rotation};

/// Keys an update item may carry that are never payload fields.
const NON_PAYLOAD_UPDATE_KEYS: &[&str] = &["blockType", "block"];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaceItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<EntityId>,
    #[serde(rename = "blockType", alias = "block")]
    pub block_type: String,
    pub position: GridPos,
    #[serde(default)]
    pub rotation: Rotation,
    #[serde(default, skip_serializing_if = "Value::is_null")]
    pub payload: Value,
}

impl PlaceItem {
    pub fn new(id: EntityId, block_type: impl Into<String>, position: GridPos) -> Self {
        Self {
            id: Some(id),
            block_type: block_type.into(),
            position,
            rotation: Rotation::default(),
            payload: Value::Null,
        }
    }

    pub fn with_rotation(mut self, rotation: Rotation) -> Self {
        self.rotation = rotation;
        self
    }

    pub fn with_payload(mut self, payload: Value) -> Self {
        self.payload = payload;
        self
    }
}

/// Partial update. Payload fields may sit at the top level, under `payload`, or both
/// (top-level wins).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpdateItem {
    pub id: EntityId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub position: Option<GridPos>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Rotation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Map<String, Value>>,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl UpdateItem {
    pub fn new(id: EntityId) -> Self {
        Self {
            id,
            position: None,
            rotation: None,
            payload: None,
            fields: Map::new(),
        }
    }

    pub fn with_position(mut self, position: GridPos) -> Self {
        self.position = Some(position);
        self
    }

    pub fn with_field(mut self, key: impl Into<String>, value: Value) -> Self {
        self.fields.insert(key.into(), value);
        self
    }

    pub fn patch(&self) -> Map<String, Value> {
        let mut patch = self.payload.clone().unwrap_or_default();
        for (key, value) in &self.fields {
            if NON_PAYLOAD_UPDATE_KEYS.contains(&key.as_str()) {
                continue;
            }
            patch.insert(key.clone(), value.clone());
        }
        patch
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveItem {
    pub id: EntityId,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Response {
    pub ok: bool,
    pub message: String,
}

impl Response {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            ok: true,
            message: message.into(),
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            message: message.into(),
        }
    }

    pub fn invalid_action() -> Self {
        Self::err("Invalid Action")
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Outbound request envelope. Encodes as `{"action": <tag>, "data": [...]}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", content = "data", rename_all = "lowercase")]
pub enum ActionRequest {
    Place(Vec<PlaceItem>),
    Update(Vec<UpdateItem>),
    Remove(Vec<RemoveItem>),
    Players(Value),
}

impl ActionRequest {
    pub fn tag(&self) -> &'static str {
        match self {
            ActionRequest::Place(_) => "place",
            ActionRequest::Update(_) => "update",
            ActionRequest::Remove(_) => "remove",
            ActionRequest::Players(_) => "players",
        }
    }

    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Wraps pre-built item JSON in an envelope without checking the items.
pub fn build_request(tag: &str, items: Value) -> String {
    let data = match items {
        Value::Array(_) => items,
        Value::Null => Value::Array(Vec::new()),
        single => Value::Array(vec![single]),
    };
    let mut envelope = Map::new();
    envelope.insert("action".to_string(), Value::String(tag.to_string()));
    envelope.insert("data".to_string(), data);
    Value::Object(envelope).to_string()
}
