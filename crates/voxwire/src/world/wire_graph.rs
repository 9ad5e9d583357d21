use std::collections::HashMap;

use thiserror::Error;

use super::types::{EntityId, GridPos};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WireSegment {
    pub id: EntityId,
    pub position: GridPos,
    pub powered: bool,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum WireError {
    #[error("wire id {id} is already in use")]
    IdInUse { id: EntityId },
    #[error("position {position} is already held by wire {occupant}")]
    PositionOccupied {
        position: GridPos,
        occupant: EntityId,
    },
    #[error("wire {id} not found")]
    UnknownId { id: EntityId },
}

/// Sparse wire occupancy plus the cells other blocks expose to wires.
///
/// `id_to_position` and `segments` always describe the same set of wires: every id maps to
/// a position whose segment carries that id, and every segment's id maps back to its key.
#[derive(Debug, Default)]
pub struct WireGraph {
    id_to_position: HashMap<EntityId, GridPos>,
    segments: HashMap<GridPos, WireSegment>,
    connection_points: HashMap<GridPos, u32>,
    dirty: bool,
}

impl WireGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn place_wire(
        &mut self,
        id: EntityId,
        position: GridPos,
        powered: bool,
    ) -> Result<(), WireError> {
        if self.id_to_position.contains_key(&id) {
            return Err(WireError::IdInUse { id });
        }
        if let Some(occupant) = self.segments.get(&position) {
            return Err(WireError::PositionOccupied {
                position,
                occupant: occupant.id,
            });
        }

        self.id_to_position.insert(id, position);
        self.segments.insert(
            position,
            WireSegment {
                id,
                position,
                powered,
            },
        );
        self.dirty = true;
        Ok(())
    }

    /// Moves and/or repowers wire `id`. A target cell held by a different wire is rejected
    /// and leaves the graph untouched.
    pub fn update_wire(
        &mut self,
        id: EntityId,
        position: GridPos,
        powered: bool,
    ) -> Result<WireSegment, WireError> {
        let current = *self
            .id_to_position
            .get(&id)
            .ok_or(WireError::UnknownId { id })?;

        if current != position {
            self.rekey(id, current, position)?;
        }

        let segment = self
            .segments
            .get_mut(&position)
            .ok_or(WireError::UnknownId { id })?;
        if segment.powered != powered {
            segment.powered = powered;
            self.dirty = true;
        }
        Ok(*segment)
    }

    pub fn remove_wire(&mut self, id: EntityId) -> Result<WireSegment, WireError> {
        let position = self
            .id_to_position
            .remove(&id)
            .ok_or(WireError::UnknownId { id })?;
        let segment = self
            .segments
            .remove(&position)
            .ok_or(WireError::UnknownId { id })?;
        self.dirty = true;
        Ok(segment)
    }

    // Both indices move together or not at all.
    fn rekey(&mut self, id: EntityId, from: GridPos, to: GridPos) -> Result<(), WireError> {
        if let Some(occupant) = self.segments.get(&to) {
            return Err(WireError::PositionOccupied {
                position: to,
                occupant: occupant.id,
            });
        }
        let mut segment = self
            .segments
            .remove(&from)
            .ok_or(WireError::UnknownId { id })?;
        segment.position = to;
        self.segments.insert(to, segment);
        self.id_to_position.insert(id, to);
        self.dirty = true;
        Ok(())
    }

    pub fn add_connection_point(&mut self, position: GridPos) {
        let count = self.connection_points.entry(position).or_insert(0);
        *count = count.saturating_add(1);
        if *count == 1 {
            self.dirty = true;
        }
    }

    /// Drops one registration of `position`. Returns false if nothing was registered there.
    pub fn remove_connection_point(&mut self, position: GridPos) -> bool {
        let Some(count) = self.connection_points.get_mut(&position) else {
            return false;
        };
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.connection_points.remove(&position);
            self.dirty = true;
        }
        true
    }

    pub fn connection_count_at(&self, position: GridPos) -> u32 {
        self.connection_points.get(&position).copied().unwrap_or(0)
    }

    pub fn has_wire_or_connection_at(&self, position: GridPos) -> bool {
        self.segments.contains_key(&position) || self.connection_points.contains_key(&position)
    }

    pub fn has_wire_at(&self, position: GridPos) -> bool {
        self.segments.contains_key(&position)
    }

    pub fn contains_id(&self, id: EntityId) -> bool {
        self.id_to_position.contains_key(&id)
    }

    pub fn segment(&self, id: EntityId) -> Option<&WireSegment> {
        self.id_to_position
            .get(&id)
            .and_then(|position| self.segments.get(position))
    }

    pub fn segment_at(&self, position: GridPos) -> Option<&WireSegment> {
        self.segments.get(&position)
    }

    pub fn segments(&self) -> impl Iterator<Item = &WireSegment> {
        self.segments.values()
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn connection_point_count(&self) -> usize {
        self.connection_points.len()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub fn take_dirty(&mut self) -> bool {
        let was_dirty = self.dirty;
        self.dirty = false;
        was_dirty
    }

    /// True when both wire indices agree with each other.
    pub fn is_consistent(&self) -> bool {
        self.id_to_position.len() == self.segments.len()
            && self.id_to_position.iter().all(|(id, position)| {
                self.segments
                    .get(position)
                    .is_some_and(|segment| segment.id == *id && segment.position == *position)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(x: i32, y: i32, z: i32) -> GridPos {
        GridPos::new(x, y, z)
    }

    #[test]
    fn place_wire_indexes_both_directions_and_marks_dirty() {
        let mut graph = WireGraph::new();
        graph
            .place_wire(EntityId(10), pos(0, 0, 1), false)
            .expect("place");

        assert!(graph.take_dirty());
        assert!(!graph.take_dirty());
        assert_eq!(
            graph.segment(EntityId(10)).map(|segment| segment.position),
            Some(pos(0, 0, 1))
        );
        assert_eq!(
            graph.segment_at(pos(0, 0, 1)).map(|segment| segment.id),
            Some(EntityId(10))
        );
        assert!(graph.is_consistent());
    }

    #[test]
    fn place_wire_rejects_duplicate_id_and_occupied_cell() {
        let mut graph = WireGraph::new();
        graph
            .place_wire(EntityId(1), pos(0, 0, 0), false)
            .expect("place");

        assert_eq!(
            graph.place_wire(EntityId(1), pos(5, 0, 0), false),
            Err(WireError::IdInUse { id: EntityId(1) })
        );
        assert_eq!(
            graph.place_wire(EntityId(2), pos(0, 0, 0), true),
            Err(WireError::PositionOccupied {
                position: pos(0, 0, 0),
                occupant: EntityId(1),
            })
        );
        assert_eq!(graph.len(), 1);
    }

    #[test]
    fn update_wire_moves_segment_and_clears_old_cell() {
        let mut graph = WireGraph::new();
        graph
            .place_wire(EntityId(7), pos(1, 1, 1), false)
            .expect("place");
        graph.take_dirty();

        let moved = graph
            .update_wire(EntityId(7), pos(4, 1, 1), true)
            .expect("update");

        assert_eq!(moved.position, pos(4, 1, 1));
        assert!(moved.powered);
        assert!(graph.segment_at(pos(1, 1, 1)).is_none());
        assert!(!graph.has_wire_or_connection_at(pos(1, 1, 1)));
        assert!(graph.has_wire_at(pos(4, 1, 1)));
        assert!(graph.take_dirty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn update_wire_in_place_only_changes_power() {
        let mut graph = WireGraph::new();
        graph
            .place_wire(EntityId(7), pos(1, 1, 1), false)
            .expect("place");
        graph.take_dirty();

        graph
            .update_wire(EntityId(7), pos(1, 1, 1), false)
            .expect("noop update");
        assert!(!graph.take_dirty());

        graph
            .update_wire(EntityId(7), pos(1, 1, 1), true)
            .expect("power update");
        assert!(graph.take_dirty());
        assert_eq!(graph.segment(EntityId(7)).map(|s| s.powered), Some(true));
    }

    #[test]
    fn update_wire_onto_other_wire_leaves_graph_untouched() {
        let mut graph = WireGraph::new();
        graph
            .place_wire(EntityId(1), pos(0, 0, 0), false)
            .expect("place a");
        graph
            .place_wire(EntityId(2), pos(1, 0, 0), false)
            .expect("place b");

        assert_eq!(
            graph.update_wire(EntityId(1), pos(1, 0, 0), true),
            Err(WireError::PositionOccupied {
                position: pos(1, 0, 0),
                occupant: EntityId(2),
            })
        );
        assert_eq!(graph.segment(EntityId(1)).map(|s| s.position), Some(pos(0, 0, 0)));
        assert_eq!(graph.segment(EntityId(1)).map(|s| s.powered), Some(false));
        assert!(graph.is_consistent());
    }

    #[test]
    fn unknown_ids_are_reported() {
        let mut graph = WireGraph::new();
        assert_eq!(
            graph.update_wire(EntityId(3), pos(0, 0, 0), true),
            Err(WireError::UnknownId { id: EntityId(3) })
        );
        assert_eq!(
            graph.remove_wire(EntityId(3)),
            Err(WireError::UnknownId { id: EntityId(3) })
        );
        assert!(!graph.is_dirty());
    }

    #[test]
    fn connection_points_are_refcounted() {
        let mut graph = WireGraph::new();
        let cell = pos(2, 0, 2);
        graph.add_connection_point(cell);
        graph.add_connection_point(cell);
        assert!(graph.take_dirty());
        assert_eq!(graph.connection_count_at(cell), 2);

        assert!(graph.remove_connection_point(cell));
        assert!(graph.has_wire_or_connection_at(cell));
        assert!(!graph.take_dirty());

        assert!(graph.remove_connection_point(cell));
        assert!(!graph.has_wire_or_connection_at(cell));
        assert!(graph.take_dirty());
        assert!(!graph.remove_connection_point(cell));
    }

    #[test]
    fn adjacent_wires_see_each_other() {
        let mut graph = WireGraph::new();
        graph
            .place_wire(EntityId(10), pos(0, 0, 1), false)
            .expect("place 10");
        graph
            .place_wire(EntityId(11), pos(0, 0, 0), false)
            .expect("place 11");

        assert!(graph.has_wire_or_connection_at(pos(0, 0, 1)));
        assert!(graph.has_wire_or_connection_at(pos(0, 0, 0)));
        assert!(!graph.has_wire_or_connection_at(pos(0, 0, 2)));
    }
}
