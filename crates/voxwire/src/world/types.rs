use std::fmt;

use serde::{Deserialize, Serialize};

/// Integer voxel coordinate. Serialized as a `[x, y, z]` array.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(from = "[i32; 3]", into = "[i32; 3]")]
pub struct GridPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl GridPos {
    pub const ORIGIN: GridPos = GridPos { x: 0, y: 0, z: 0 };

    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, delta: GridPos) -> Self {
        Self {
            x: self.x.saturating_add(delta.x),
            y: self.y.saturating_add(delta.y),
            z: self.z.saturating_add(delta.z),
        }
    }

    pub fn as_f32(self) -> [f32; 3] {
        [self.x as f32, self.y as f32, self.z as f32]
    }
}

impl From<[i32; 3]> for GridPos {
    fn from(value: [i32; 3]) -> Self {
        Self::new(value[0], value[1], value[2])
    }
}

impl From<GridPos> for [i32; 3] {
    fn from(value: GridPos) -> Self {
        [value.x, value.y, value.z]
    }
}

impl fmt::Display for GridPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {}, {})", self.x, self.y, self.z)
    }
}

/// Facing of a placed block. The named axis is where the block's local +z points.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Rotation {
    #[default]
    Forward,
    Backward,
    #[serde(alias = "UPWARD")]
    Up,
    #[serde(alias = "DOWNWARD")]
    Down,
    Right,
    Left,
}

impl Rotation {
    /// Maps a block-local offset into world space. Exact on the integer grid.
    pub fn rotate(self, local: GridPos) -> GridPos {
        let GridPos { x, y, z } = local;
        match self {
            Rotation::Forward => GridPos::new(x, y, z),
            Rotation::Backward => GridPos::new(-x, y, -z),
            Rotation::Right => GridPos::new(z, y, -x),
            Rotation::Left => GridPos::new(-z, y, x),
            Rotation::Up => GridPos::new(x, z, -y),
            Rotation::Down => GridPos::new(x, -z, y),
        }
    }
}

/// World-wide identifier shared by entities and wire segments. Zero is never valid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct EntityId(pub u64);

impl EntityId {
    pub fn is_valid(self) -> bool {
        self.0 != 0
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether this peer trusts ids proposed by the remote side or hands out its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Authority {
    #[default]
    Predictive,
    Authoritative,
}

impl Authority {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "predictive" => Some(Self::Predictive),
            "authoritative" => Some(Self::Authoritative),
            _ => None,
        }
    }
}

#[derive(Debug)]
pub struct EntityIdAllocator {
    next: u64,
}

impl Default for EntityIdAllocator {
    fn default() -> Self {
        Self { next: 1 }
    }
}

impl EntityIdAllocator {
    pub fn allocate(&mut self) -> EntityId {
        let id = EntityId(self.next);
        self.next = self.next.saturating_add(1);
        id
    }
}
