//! Baked tile data ready to be added to a navmesh

use glam::Vec3;
use navmesh_common::{AreaType, OffMeshConnection};
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use std::mem::size_of;

/// Polygon may be walked on
pub const POLY_FLAG_WALK: u16 = 1 << 0;
/// Polygon is under water
pub const POLY_FLAG_SWIM: u16 = 1 << 1;
/// Polygon belongs to a door
pub const POLY_FLAG_OPEN_DOOR: u16 = 1 << 2;
/// Polygon follows a path grid
pub const POLY_FLAG_USE_PATHGRID: u16 = 1 << 3;

/// Default polygon flags of an area
pub fn poly_flags(area_type: AreaType) -> u16 {
    match area_type {
        AreaType::Null => 0,
        AreaType::Water => POLY_FLAG_SWIM,
        AreaType::Door => POLY_FLAG_OPEN_DOOR,
        AreaType::Pathgrid => POLY_FLAG_USE_PATHGRID,
        AreaType::Ground => POLY_FLAG_WALK,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Polygon {
    /// Indices into the tile's vertex array
    pub vertices: SmallVec<[u16; 6]>,
    pub area_type: AreaType,
    pub flags: u16,
}

/// Polygon mesh of one tile
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PreparedNavMeshData {
    pub bounds_min: Vec3,
    pub bounds_max: Vec3,
    pub vertices: Vec<Vec3>,
    pub polygons: Vec<Polygon>,
    pub off_mesh_connections: Vec<OffMeshConnection>,
}

impl PreparedNavMeshData {
    pub fn polygon_count(&self) -> usize {
        self.polygons.len()
    }

    pub fn is_empty(&self) -> bool {
        self.polygons.is_empty() && self.off_mesh_connections.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        size_of::<Self>()
            + self.vertices.len() * size_of::<Vec3>()
            + self.polygons.len() * size_of::<Polygon>()
            + self
                .polygons
                .iter()
                .filter(|polygon| polygon.vertices.spilled())
                .map(|polygon| polygon.vertices.len() * size_of::<u16>())
                .sum::<usize>()
            + self.off_mesh_connections.len() * size_of::<OffMeshConnection>()
    }
}
