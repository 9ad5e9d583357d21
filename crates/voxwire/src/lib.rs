pub mod app;
pub mod mesh;
pub mod net;
pub mod protocol;
pub mod world;

pub use app::{run_peer, AppError, LoopConfig, MetricsHandle, TickRunner};
pub use mesh::{build_wire_mesh, MeshBuilder, WireMesh};
pub use net::{Endpoint, FrameAssembler, FrameTransport, TransportConfig};
pub use protocol::{ActionDispatcher, MetadataSink, Response};
pub use world::{Authority, BlockRegistry, EntityId, EntityManager, GridPos, SceneBridge, WireGraph};
