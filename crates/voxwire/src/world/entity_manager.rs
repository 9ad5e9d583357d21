use std::collections::HashMap;

use thiserror::Error;
use tracing::{debug, warn};

use crate::protocol::{PlaceItem, Response, UpdateItem};

use super::payload::{BlockPayload, PayloadError, PayloadKind, PoweredState};
use super::registry::{is_wire_type, BlockBehavior, BlockRegistry};
use super::scene_bridge::SceneBridge;
use super::types::{Authority, EntityId, EntityIdAllocator, GridPos, Rotation};
use super::wire_graph::{WireError, WireGraph};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Entity {
    pub id: EntityId,
    pub block_type: String,
    pub position: GridPos,
    pub rotation: Rotation,
    pub payload: BlockPayload,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WorldError {
    #[error("entity {id} not found")]
    NotFound { id: EntityId },
    #[error("no handler for block type '{block_type}'")]
    NoHandlerForType { block_type: String },
    #[error("failed to instantiate {block_type} {id}: {reason}")]
    InstantiationFailed {
        id: EntityId,
        block_type: String,
        reason: String,
    },
    #[error("invalid payload for {id}: {source}")]
    InvalidPayload {
        id: EntityId,
        #[source]
        source: PayloadError,
    },
    #[error("missing or zero id")]
    MissingId,
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Successful place. `replaced` is set when an earlier holder of the id was evicted first.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Placed {
    pub id: EntityId,
    pub replaced: bool,
    pub assigned: bool,
}

/// The world table. Generic entities live here; wires are delegated to the [`WireGraph`].
/// An id is held by at most one of the two stores at any time.
pub struct EntityManager {
    authority: Authority,
    allocator: EntityIdAllocator,
    entities: HashMap<EntityId, Entity>,
    wires: WireGraph,
    registry: BlockRegistry,
    bridge: Box<dyn SceneBridge>,
    assigned_placements: Vec<PlaceItem>,
}

impl EntityManager {
    pub fn new(
        authority: Authority,
        registry: BlockRegistry,
        wires: WireGraph,
        bridge: Box<dyn SceneBridge>,
    ) -> Self {
        Self {
            authority,
            allocator: EntityIdAllocator::default(),
            entities: HashMap::new(),
            wires,
            registry,
            bridge,
            assigned_placements: Vec::new(),
        }
    }

    pub fn place(&mut self, item: PlaceItem) -> Response {
        let block_type = item.block_type.clone();
        let announcement = (self.authority == Authority::Authoritative).then(|| item.clone());
        match self.try_place(item) {
            Ok(placed) => {
                if let Some(mut announcement) = announcement {
                    announcement.id = Some(placed.id);
                    self.assigned_placements.push(announcement);
                }
                let mut message = format!("placed {block_type} {}", placed.id);
                if placed.assigned {
                    message.push_str(" (id assigned)");
                }
                if placed.replaced {
                    message.push_str(" (duplicate removed)");
                }
                Response::ok(message)
            }
            Err(err) => {
                debug!(error = %err, block_type = %block_type, "place_rejected");
                Response::err(err.to_string())
            }
        }
    }

    pub fn remove(&mut self, id: EntityId) -> Response {
        match self.try_remove(id) {
            Ok(()) => Response::ok(format!("removed {id}")),
            Err(err) => {
                debug!(error = %err, "remove_rejected");
                Response::err(err.to_string())
            }
        }
    }

    pub fn update(&mut self, item: UpdateItem) -> Response {
        let id = item.id;
        match self.try_update(item) {
            Ok(()) => Response::ok(format!("updated {id}")),
            Err(err) => {
                debug!(error = %err, "update_rejected");
                Response::err(err.to_string())
            }
        }
    }

    pub fn try_place(&mut self, item: PlaceItem) -> Result<Placed, WorldError> {
        let (id, assigned) = self.resolve_place_id(item.id)?;

        if is_wire_type(&item.block_type) {
            let powered = BlockPayload::decode(PayloadKind::Powered, &item.payload)
                .map_err(|source| WorldError::InvalidPayload { id, source })?
                .powered()
                .unwrap_or(false);
            if let Some(occupant) = self.wires.segment_at(item.position) {
                if occupant.id != id {
                    return Err(WireError::PositionOccupied {
                        position: item.position,
                        occupant: occupant.id,
                    }
                    .into());
                }
            }
            let replaced = self.evict(id);
            self.wires.place_wire(id, item.position, powered)?;
            return Ok(Placed {
                id,
                replaced,
                assigned,
            });
        }

        let behavior = self.behavior_for(&item.block_type)?;
        let payload = BlockPayload::decode(behavior.payload_kind, &item.payload)
            .map_err(|source| WorldError::InvalidPayload { id, source })?;

        let replaced = self.evict(id);
        let entity = Entity {
            id,
            block_type: item.block_type,
            position: item.position,
            rotation: item.rotation,
            payload,
        };
        self.bridge
            .materialize(&entity)
            .map_err(|reason| WorldError::InstantiationFailed {
                id,
                block_type: entity.block_type.clone(),
                reason,
            })?;
        self.load_connections(&entity, &behavior);
        self.entities.insert(id, entity);
        Ok(Placed {
            id,
            replaced,
            assigned,
        })
    }

    pub fn try_remove(&mut self, id: EntityId) -> Result<(), WorldError> {
        if self.wires.contains_id(id) {
            self.wires.remove_wire(id)?;
            return Ok(());
        }
        let entity = self
            .entities
            .remove(&id)
            .ok_or(WorldError::NotFound { id })?;
        self.unload(&entity);
        Ok(())
    }

    pub fn try_update(&mut self, item: UpdateItem) -> Result<(), WorldError> {
        let id = item.id;
        let patch = item.patch();

        if let Some(segment) = self.wires.segment(id).copied() {
            let current = BlockPayload::Powered(PoweredState {
                powered: segment.powered,
            });
            let powered = current
                .merged(&patch)
                .map_err(|source| WorldError::InvalidPayload { id, source })?
                .powered()
                .unwrap_or(segment.powered);
            let position = item.position.unwrap_or(segment.position);
            self.wires.update_wire(id, position, powered)?;
            return Ok(());
        }

        let current = self.entities.get(&id).ok_or(WorldError::NotFound { id })?;
        let behavior = self.behavior_for(&current.block_type)?;
        let payload = current
            .payload
            .merged(&patch)
            .map_err(|source| WorldError::InvalidPayload { id, source })?;
        let next = Entity {
            id,
            block_type: current.block_type.clone(),
            position: item.position.unwrap_or(current.position),
            rotation: item.rotation.unwrap_or(current.rotation),
            payload,
        };

        let previous = current.clone();
        self.unload_connections(&previous, &behavior);
        self.load_connections(&next, &behavior);
        self.bridge.refresh(&next);
        self.entities.insert(id, next);
        Ok(())
    }

    fn resolve_place_id(
        &mut self,
        proposed: Option<EntityId>,
    ) -> Result<(EntityId, bool), WorldError> {
        match self.authority {
            Authority::Authoritative => {
                let mut id = self.allocator.allocate();
                while self.contains(id) {
                    id = self.allocator.allocate();
                }
                Ok((id, true))
            }
            Authority::Predictive => match proposed {
                Some(id) if id.is_valid() => Ok((id, false)),
                _ => Err(WorldError::MissingId),
            },
        }
    }

    fn behavior_for(&self, block_type: &str) -> Result<BlockBehavior, WorldError> {
        self.registry
            .lookup(block_type)
            .cloned()
            .ok_or_else(|| WorldError::NoHandlerForType {
                block_type: block_type.to_string(),
            })
    }

    // Implicit remove ahead of a place that reuses `id`.
    fn evict(&mut self, id: EntityId) -> bool {
        if self.wires.contains_id(id) {
            return self.wires.remove_wire(id).is_ok();
        }
        match self.entities.remove(&id) {
            Some(entity) => {
                self.unload(&entity);
                true
            }
            None => false,
        }
    }

    fn unload(&mut self, entity: &Entity) {
        match self.registry.lookup(&entity.block_type).cloned() {
            Some(behavior) => self.unload_connections(entity, &behavior),
            None => warn!(
                id = %entity.id,
                block_type = %entity.block_type,
                "unload_without_behavior"
            ),
        }
        self.bridge.release(entity.id);
    }

    fn load_connections(&mut self, entity: &Entity, behavior: &BlockBehavior) {
        for point in behavior.connections.points(entity.position, entity.rotation) {
            self.wires.add_connection_point(point);
        }
    }

    fn unload_connections(&mut self, entity: &Entity, behavior: &BlockBehavior) {
        for point in behavior.connections.points(entity.position, entity.rotation) {
            if !self.wires.remove_connection_point(point) {
                warn!(id = %entity.id, position = %point, "connection_point_missing");
            }
        }
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id) || self.wires.contains_id(id)
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }

    /// Places accepted in authoritative mode since the last call, carrying the ids this
    /// side assigned. The remote peer needs them to address those entities later.
    pub fn take_assigned_placements(&mut self) -> Vec<PlaceItem> {
        std::mem::take(&mut self.assigned_placements)
    }

    pub fn authority(&self) -> Authority {
        self.authority
    }

    pub fn wires(&self) -> &WireGraph {
        &self.wires
    }

    pub fn wires_mut(&mut self) -> &mut WireGraph {
        &mut self.wires
    }

    pub fn bridge_mut(&mut self) -> &mut dyn SceneBridge {
        self.bridge.as_mut()
    }
}
