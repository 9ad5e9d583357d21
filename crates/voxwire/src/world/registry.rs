use std::collections::HashMap;

use super::payload::PayloadKind;
use super::types::{GridPos, Rotation};

pub const WIRE_BLOCK_TYPE: &str = "wire";

const DIODE_OFFSETS: &[GridPos] = &[GridPos::new(0, 0, 1), GridPos::new(0, 0, 0)];
const LOGIC_GATE_OFFSETS: &[GridPos] = &[
    GridPos::new(0, 0, 1),
    GridPos::new(-1, 0, -1),
    GridPos::new(1, 0, -1),
];

/// Cells a loaded block exposes to neighbouring wires.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionLayout {
    None,
    SelfCell,
    Rotated(Vec<GridPos>),
}

impl ConnectionLayout {
    pub fn points(&self, position: GridPos, rotation: Rotation) -> Vec<GridPos> {
        match self {
            ConnectionLayout::None => Vec::new(),
            ConnectionLayout::SelfCell => vec![position],
            ConnectionLayout::Rotated(offsets) => offsets
                .iter()
                .map(|offset| position.offset(rotation.rotate(*offset)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockBehavior {
    pub payload_kind: PayloadKind,
    pub connections: ConnectionLayout,
}

impl BlockBehavior {
    pub fn new(payload_kind: PayloadKind, connections: ConnectionLayout) -> Self {
        Self {
            payload_kind,
            connections,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockRegistry {
    behaviors: HashMap<String, BlockBehavior>,
}

impl BlockRegistry {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn standard() -> Self {
        let diode = || ConnectionLayout::Rotated(DIODE_OFFSETS.to_vec());
        let gate = || ConnectionLayout::Rotated(LOGIC_GATE_OFFSETS.to_vec());

        let mut registry = Self::empty();
        registry.register("block", BlockBehavior::new(PayloadKind::None, ConnectionLayout::None));
        registry.register(
            "toggle",
            BlockBehavior::new(PayloadKind::Powered, ConnectionLayout::SelfCell),
        );
        registry.register(
            "pixel",
            BlockBehavior::new(PayloadKind::Powered, ConnectionLayout::SelfCell),
        );
        registry.register(
            "clock",
            BlockBehavior::new(PayloadKind::Clock, ConnectionLayout::SelfCell),
        );
        registry.register(
            "pulse",
            BlockBehavior::new(PayloadKind::Pulse, ConnectionLayout::SelfCell),
        );
        registry.register("diode", BlockBehavior::new(PayloadKind::Powered, diode()));
        registry.register("toggle_latch", BlockBehavior::new(PayloadKind::Memory, diode()));
        registry.register(
            "pulse_latch",
            BlockBehavior::new(PayloadKind::PulseLatch, diode()),
        );
        registry.register("gate_and", BlockBehavior::new(PayloadKind::Powered, gate()));
        registry.register("gate_or", BlockBehavior::new(PayloadKind::Powered, gate()));
        registry.register("gate_not", BlockBehavior::new(PayloadKind::Powered, diode()));
        registry
    }

    /// Registers or replaces the behaviour for `block_type`. Wires are handled by the graph
    /// and never live in the registry.
    pub fn register(&mut self, block_type: impl Into<String>, behavior: BlockBehavior) -> bool {
        let block_type = block_type.into();
        if is_wire_type(&block_type) {
            return false;
        }
        self.behaviors.insert(block_type, behavior);
        true
    }

    pub fn lookup(&self, block_type: &str) -> Option<&BlockBehavior> {
        self.behaviors.get(block_type)
    }

    pub fn len(&self) -> usize {
        self.behaviors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.behaviors.is_empty()
    }
}

pub fn is_wire_type(block_type: &str) -> bool {
    block_type == WIRE_BLOCK_TYPE
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn standard_registry_covers_known_blocks() {
        let registry = BlockRegistry::standard();
        for block_type in [
            "block",
            "toggle",
            "pixel",
            "clock",
            "pulse",
            "diode",
            "toggle_latch",
            "pulse_latch",
            "gate_and",
            "gate_or",
            "gate_not",
        ] {
            assert!(registry.lookup(block_type).is_some(), "{block_type}");
        }
        assert!(registry.lookup("wire").is_none());
        assert!(registry.lookup("teleporter").is_none());
    }

    #[test]
    fn wire_type_cannot_be_registered() {
        let mut registry = BlockRegistry::empty();
        assert!(!registry.register(
            WIRE_BLOCK_TYPE,
            BlockBehavior::new(PayloadKind::Powered, ConnectionLayout::SelfCell)
        ));
        assert!(registry.is_empty());
    }

    #[test]
    fn self_cell_layout_connects_at_position() {
        let points = ConnectionLayout::SelfCell.points(GridPos::new(4, 1, -2), Rotation::Left);
        assert_eq!(points, vec![GridPos::new(4, 1, -2)]);
    }

    #[test]
    fn diode_layout_follows_rotation() {
        let registry = BlockRegistry::standard();
        let diode = registry.lookup("diode").expect("diode");
        let points = diode
            .connections
            .points(GridPos::new(2, 0, 2), Rotation::Right);
        assert_eq!(points, vec![GridPos::new(3, 0, 2), GridPos::new(2, 0, 2)]);
    }

    #[test]
    fn gate_layout_places_inputs_behind_output() {
        let registry = BlockRegistry::standard();
        let gate = registry.lookup("gate_and").expect("gate");
        let points = gate
            .connections
            .points(GridPos::ORIGIN, Rotation::Forward);
        assert_eq!(
            points,
            vec![
                GridPos::new(0, 0, 1),
                GridPos::new(-1, 0, -1),
                GridPos::new(1, 0, -1),
            ]
        );
        let flipped = gate
            .connections
            .points(GridPos::ORIGIN, Rotation::Backward);
        assert_eq!(
            flipped,
            vec![
                GridPos::new(0, 0, -1),
                GridPos::new(1, 0, 1),
                GridPos::new(-1, 0, 1),
            ]
        );
    }
}
