//! Procedural wire geometry.
//!
//! Every wire voxel is a small cube of edge [`WIRE_SIZE`] centred on its grid cell. A face
//! whose neighbour holds a wire or a connection point is replaced by a prism reaching the
//! neighbour; every other face gets a flat cap. Wire-to-wire prisms are emitted once, by
//! the voxel with the lower coordinate along the shared axis.

use tracing::debug;

use crate::world::{GridPos, WireGraph, WireSegment};

pub const WIRE_SIZE: f32 = 3.0 / 8.0;

/// Added to every UV of a powered segment. The atlas stores the powered tiles below the
/// unpowered ones.
pub const POWERED_UV_OFFSET: [f32; 2] = [0.0, -0.5];

const HALF: f32 = WIRE_SIZE / 2.0;

// +x, -x, +y, -y, +z, -z. Index / 2 is the axis, index % 2 == 0 is the positive side.
const DIRECTIONS: [GridPos; 6] = [
    GridPos::new(1, 0, 0),
    GridPos::new(-1, 0, 0),
    GridPos::new(0, 1, 0),
    GridPos::new(0, -1, 0),
    GridPos::new(0, 0, 1),
    GridPos::new(0, 0, -1),
];

const REVERSED_CAP_WINDING: [bool; 6] = [true, false, false, true, true, false];

// Offsets of a face's corners across the two axes orthogonal to the face normal.
const QUAD: [(f32, f32); 4] = [(HALF, HALF), (HALF, -HALF), (-HALF, HALF), (-HALF, -HALF)];

const CONNECTOR_TL: [f32; 2] = [WIRE_SIZE, 1.0];
const CONNECTOR_TR: [f32; 2] = [1.0, 1.0];
const CONNECTOR_BL: [f32; 2] = [WIRE_SIZE, 1.0 - WIRE_SIZE];
const CONNECTOR_BR: [f32; 2] = [1.0, 1.0 - WIRE_SIZE];

const CENTER_TL: [f32; 2] = [0.0, 1.0];
const CENTER_TR: [f32; 2] = [WIRE_SIZE, 1.0];
const CENTER_BL: [f32; 2] = [0.0, 1.0 - WIRE_SIZE];
const CENTER_BR: [f32; 2] = [WIRE_SIZE, 1.0 - WIRE_SIZE];

#[rustfmt::skip]
const PRISM_UVS: [[f32; 2]; 16] = [
    CONNECTOR_TL, CONNECTOR_TR, CONNECTOR_BL, CONNECTOR_BR,
    CONNECTOR_TR, CONNECTOR_TL, CONNECTOR_BR, CONNECTOR_BL,
    CONNECTOR_BL, CONNECTOR_TL, CONNECTOR_TL, CONNECTOR_BL,
    CONNECTOR_BR, CONNECTOR_TR, CONNECTOR_TR, CONNECTOR_BR,
];

const CAP_UVS: [[f32; 2]; 4] = [CENTER_TR, CENTER_TL, CENTER_BR, CENTER_BL];

// The y-axis prism winds the other way so its faces stay outward.
#[rustfmt::skip]
const PRISM_INDICES_Y: [u32; 24] = [
    4, 0, 6, 6, 0, 2, 1, 5, 7, 3, 1, 7,
    13, 8, 12, 9, 8, 13, 10, 11, 14, 14, 11, 15,
];
#[rustfmt::skip]
const PRISM_INDICES_XZ: [u32; 24] = [
    0, 4, 6, 0, 6, 2, 5, 1, 7, 1, 3, 7,
    8, 13, 12, 8, 9, 13, 11, 10, 14, 11, 14, 15,
];

const CAP_INDICES: [u32; 6] = [1, 0, 2, 1, 2, 3];
const CAP_INDICES_REVERSED: [u32; 6] = [1, 2, 0, 1, 3, 2];

/// One merged buffer for the whole wire graph.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WireMesh {
    pub positions: Vec<[f32; 3]>,
    pub normals: Vec<[f32; 3]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

impl WireMesh {
    pub fn vertex_count(&self) -> usize {
        self.positions.len()
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    fn base_index(&self) -> u32 {
        self.positions.len() as u32
    }

    fn push_prism(&mut self, base: GridPos, other: GridPos, axis: usize, sign: f32, powered: bool) {
        let offset = self.base_index();
        let along = HALF * sign;
        let corners: Vec<[f32; 3]> = QUAD
            .iter()
            .map(|&(u, v)| face_corner(base, axis, along, u, v))
            .chain(
                QUAD.iter()
                    .map(|&(u, v)| face_corner(other, axis, -along, u, v)),
            )
            .collect();

        // Each corner serves two faces with different normals.
        self.positions.extend_from_slice(&corners);
        self.positions.extend_from_slice(&corners);

        let table = if axis == 1 {
            &PRISM_INDICES_Y
        } else {
            &PRISM_INDICES_XZ
        };
        self.indices.extend(table.iter().map(|index| offset + index));

        self.uvs
            .extend(PRISM_UVS.iter().map(|uv| shade_uv(*uv, powered)));

        let (a, b) = prism_normals(axis);
        let (neg_a, neg_b) = (negate(a), negate(b));
        self.normals.extend_from_slice(&[
            a, neg_a, a, neg_a, a, neg_a, a, neg_a,
            b, b, neg_b, neg_b, b, b, neg_b, neg_b,
        ]);
    }

    fn push_cap(&mut self, base: GridPos, direction_index: usize, powered: bool) {
        let offset = self.base_index();
        let axis = direction_index / 2;
        let along = if direction_index % 2 == 0 { HALF } else { -HALF };

        self.positions.extend(
            QUAD.iter()
                .map(|&(u, v)| face_corner(base, axis, along, u, v)),
        );
        self.uvs
            .extend(CAP_UVS.iter().map(|uv| shade_uv(*uv, powered)));

        let table = if REVERSED_CAP_WINDING[direction_index] {
            &CAP_INDICES_REVERSED
        } else {
            &CAP_INDICES
        };
        self.indices.extend(table.iter().map(|index| offset + index));

        let normal = DIRECTIONS[direction_index].as_f32();
        self.normals.extend_from_slice(&[normal; 4]);
    }
}

/// Regenerates the full wire surface. Segments are visited in coordinate order so equal
/// graphs always yield identical buffers.
pub fn build_wire_mesh(graph: &WireGraph) -> WireMesh {
    let mut segments: Vec<&WireSegment> = graph.segments().collect();
    segments.sort_by_key(|segment| segment.position);

    let mut mesh = WireMesh::default();
    for segment in segments {
        for (index, direction) in DIRECTIONS.iter().enumerate() {
            let neighbour = segment.position.offset(*direction);
            let axis = index / 2;
            let positive = index % 2 == 0;

            if !graph.has_wire_or_connection_at(neighbour) {
                mesh.push_cap(segment.position, index, segment.powered);
                continue;
            }

            if graph.has_wire_at(neighbour) {
                if !positive {
                    continue;
                }
                // Built from the upper voxel looking back so both orders give one shape.
                mesh.push_prism(neighbour, segment.position, axis, -1.0, segment.powered);
            } else {
                let sign = if positive { 1.0 } else { -1.0 };
                mesh.push_prism(segment.position, neighbour, axis, sign, segment.powered);
            }
        }
    }
    mesh
}

/// Owns the latest wire mesh and rebuilds it at most once per call.
#[derive(Debug, Default)]
pub struct MeshBuilder {
    mesh: WireMesh,
    rebuild_count: u64,
}

impl MeshBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Consumes the graph's dirty flag. Returns the new mesh only when a rebuild happened.
    pub fn rebuild_if_dirty(&mut self, graph: &mut WireGraph) -> Option<&WireMesh> {
        if !graph.take_dirty() {
            return None;
        }
        self.mesh = build_wire_mesh(graph);
        self.rebuild_count = self.rebuild_count.saturating_add(1);
        debug!(
            segments = graph.len(),
            vertices = self.mesh.vertex_count(),
            triangles = self.mesh.triangle_count(),
            "wire_mesh_rebuilt"
        );
        Some(&self.mesh)
    }

    pub fn mesh(&self) -> &WireMesh {
        &self.mesh
    }

    pub fn rebuild_count(&self) -> u64 {
        self.rebuild_count
    }
}

fn face_corner(cell: GridPos, axis: usize, along: f32, u: f32, v: f32) -> [f32; 3] {
    let [x, y, z] = cell.as_f32();
    match axis {
        0 => [x + along, y + u, z + v],
        1 => [x + u, y + along, z + v],
        _ => [x + u, y + v, z + along],
    }
}

fn prism_normals(axis: usize) -> ([f32; 3], [f32; 3]) {
    match axis {
        0 => ([0.0, 0.0, 1.0], [0.0, 1.0, 0.0]),
        1 => ([1.0, 0.0, 0.0], [0.0, 0.0, 1.0]),
        _ => ([0.0, 1.0, 0.0], [1.0, 0.0, 0.0]),
    }
}

fn negate(v: [f32; 3]) -> [f32; 3] {
    [-v[0], -v[1], -v[2]]
}

fn shade_uv(uv: [f32; 2], powered: bool) -> [f32; 2] {
    if powered {
        [uv[0] + POWERED_UV_OFFSET[0], uv[1] + POWERED_UV_OFFSET[1]]
    } else {
        uv
    }
}
