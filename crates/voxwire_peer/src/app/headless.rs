use serde_json::Value;
use tracing::{debug, info};
use voxwire::mesh::WireMesh;
use voxwire::world::{Entity, EntityId, SceneBridge};
use voxwire::MetadataSink;

/// Stands in for a renderer: records what would be drawn and logs mesh uploads.
#[derive(Debug, Default)]
pub(crate) struct LoggingBridge {
    live_entities: usize,
    mesh_uploads: u64,
}

impl SceneBridge for LoggingBridge {
    fn materialize(&mut self, entity: &Entity) -> Result<(), String> {
        self.live_entities = self.live_entities.saturating_add(1);
        debug!(
            id = %entity.id,
            block_type = %entity.block_type,
            position = %entity.position,
            "entity_materialized"
        );
        Ok(())
    }

    fn refresh(&mut self, entity: &Entity) {
        debug!(id = %entity.id, position = %entity.position, "entity_refreshed");
    }

    fn release(&mut self, id: EntityId) {
        self.live_entities = self.live_entities.saturating_sub(1);
        debug!(%id, "entity_released");
    }

    fn upload_wire_mesh(&mut self, mesh: &WireMesh) {
        self.mesh_uploads = self.mesh_uploads.saturating_add(1);
        info!(
            vertices = mesh.vertex_count(),
            triangles = mesh.triangle_count(),
            uploads = self.mesh_uploads,
            live_entities = self.live_entities,
            "wire_mesh_uploaded"
        );
    }
}

#[derive(Debug, Default)]
pub(crate) struct LoggingPlayers;

impl MetadataSink for LoggingPlayers {
    fn players(&mut self, data: &Value) {
        let count = data.as_array().map_or(1, Vec::len);
        debug!(count, "players_received");
    }
}
