mod entity_manager;
mod payload;
mod registry;
mod scene_bridge;
mod types;
mod wire_graph;

pub use entity_manager::{Entity, EntityManager, Placed, WorldError};
pub use payload::{
    BlockPayload, ClockState, MemoryState, PayloadError, PayloadKind, PoweredState,
    PulseLatchState, PulseState, DEFAULT_CLOCK_RATE, DEFAULT_PULSE_TICKS,
};
pub use registry::{is_wire_type, BlockBehavior, BlockRegistry, ConnectionLayout, WIRE_BLOCK_TYPE};
pub use scene_bridge::{HeadlessBridge, SceneBridge};
pub use types::{Authority, EntityId, EntityIdAllocator, GridPos, Rotation};
pub use wire_graph::{WireError, WireGraph, WireSegment};
