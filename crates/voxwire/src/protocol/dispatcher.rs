use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::world::EntityManager;

use super::envelope::{PlaceItem, RemoveItem, Response, UpdateItem};

/// Receives out-of-band `players` payloads. Avatar sync lives outside the world core.
pub trait MetadataSink {
    fn players(&mut self, data: &Value);
}

#[derive(Debug, Default)]
pub struct DiscardMetadata;

impl MetadataSink for DiscardMetadata {
    fn players(&mut self, _data: &Value) {}
}

/// Decodes envelopes and fans their items out to an [`EntityManager`].
pub struct ActionDispatcher {
    metadata: Box<dyn MetadataSink>,
}

impl Default for ActionDispatcher {
    fn default() -> Self {
        Self::new(Box::new(DiscardMetadata))
    }
}

impl ActionDispatcher {
    pub fn new(metadata: Box<dyn MetadataSink>) -> Self {
        Self { metadata }
    }

    /// Applies one frame. Returns one response per place/update/remove item in order, a
    /// single failure for unknown actions or malformed frames, and nothing for frames that
    /// are not actions at all.
    pub fn dispatch(&mut self, frame: &str, world: &mut EntityManager) -> Vec<Response> {
        let envelope = match serde_json::from_str::<Value>(frame) {
            Ok(Value::Object(envelope)) => envelope,
            Ok(_) => return vec![Response::err("Invalid Frame: expected a JSON object")],
            Err(err) => return vec![Response::err(format!("Invalid Frame: {err}"))],
        };

        let Some(action) = envelope.get("action") else {
            note_non_action_frame(&envelope);
            return Vec::new();
        };
        let Some(action) = action.as_str().map(str::to_owned) else {
            return vec![Response::invalid_action()];
        };
        let data = envelope.get("data").cloned().unwrap_or(Value::Null);

        match action.as_str() {
            "place" => each_item::<PlaceItem, _>(data, |item| world.place(item)),
            "update" => each_item::<UpdateItem, _>(data, |item| world.update(item)),
            "remove" => each_item::<RemoveItem, _>(data, |item| world.remove(item.id)),
            "players" => {
                self.metadata.players(&data);
                Vec::new()
            }
            other => {
                debug!(action = other, "unknown_action");
                vec![Response::invalid_action()]
            }
        }
    }
}

fn each_item<T, F>(data: Value, mut apply: F) -> Vec<Response>
where
    T: DeserializeOwned,
    F: FnMut(T) -> Response,
{
    as_item_list(data)
        .iter()
        .enumerate()
        .map(|(index, raw)| match decode_item::<T>(raw) {
            Ok(item) => apply(item),
            Err(reason) => Response::err(format!("Invalid Item {index}: {reason}")),
        })
        .collect()
}

// A lone object counts as a one-element list.
fn as_item_list(data: Value) -> Vec<Value> {
    match data {
        Value::Array(items) => items,
        Value::Null => Vec::new(),
        single => vec![single],
    }
}

fn decode_item<T: DeserializeOwned>(raw: &Value) -> Result<T, String> {
    serde_path_to_error::deserialize::<_, T>(raw).map_err(|error| {
        let path = error.path().to_string();
        let source = error.into_inner();
        if path.is_empty() || path == "." {
            source.to_string()
        } else {
            format!("at {path}: {source}")
        }
    })
}

fn note_non_action_frame(envelope: &Map<String, Value>) {
    match serde_json::from_value::<Response>(Value::Object(envelope.clone())) {
        Ok(response) if !response.ok => {
            warn!(message = %response.message, "peer_reported_failure");
        }
        Ok(response) => debug!(message = %response.message, "peer_acknowledged"),
        Err(_) => debug!("frame_without_action_ignored"),
    }
}
