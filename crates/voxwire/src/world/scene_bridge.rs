use crate::mesh::WireMesh;

use super::entity_manager::Entity;
use super::types::EntityId;

/// Seam to whatever draws the world. The core never renders; it only reports changes.
pub trait SceneBridge {
    /// Creates the visual for a freshly placed entity. An error aborts the place.
    fn materialize(&mut self, entity: &Entity) -> Result<(), String>;

    fn refresh(&mut self, entity: &Entity);

    fn release(&mut self, id: EntityId);

    fn upload_wire_mesh(&mut self, mesh: &WireMesh);
}

/// Bridge for peers with no renderer attached.
#[derive(Debug, Default)]
pub struct HeadlessBridge;

impl SceneBridge for HeadlessBridge {
    fn materialize(&mut self, _entity: &Entity) -> Result<(), String> {
        Ok(())
    }

    fn refresh(&mut self, _entity: &Entity) {}

    fn release(&mut self, _id: EntityId) {}

    fn upload_wire_mesh(&mut self, _mesh: &WireMesh) {}
}
