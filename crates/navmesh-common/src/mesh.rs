//! Geometric description of one tile's walkable-surface inputs

use crate::{AreaType, Error, Result, ShapeSource, TileBounds, Version};
use glam::{Affine3A, IVec2, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::mem::size_of;

/// Triangle soup with one area type per triangle
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Mesh {
    /// Vertex indices, 3 per triangle
    pub indices: Vec<u32>,
    /// Flat array of [x, y, z] coordinates
    pub vertices: Vec<f32>,
    pub area_types: Vec<AreaType>,
}

impl Mesh {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn triangle_count(&self) -> usize {
        self.area_types.len()
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len() / 3
    }

    pub fn is_empty(&self) -> bool {
        self.area_types.is_empty()
    }

    pub fn vertex(&self, index: u32) -> Vec3 {
        let i = index as usize * 3;
        Vec3::new(self.vertices[i], self.vertices[i + 1], self.vertices[i + 2])
    }

    pub fn push_triangle(&mut self, triangle: [Vec3; 3], area_type: AreaType) {
        let base = self.vertex_count() as u32;
        for vertex in triangle {
            self.vertices.extend_from_slice(&vertex.to_array());
        }
        self.indices.extend_from_slice(&[base, base + 1, base + 2]);
        self.area_types.push(area_type);
    }

    pub fn triangles(&self) -> impl Iterator<Item = ([Vec3; 3], AreaType)> + '_ {
        self.indices
            .chunks_exact(3)
            .zip(self.area_types.iter())
            .map(|(triangle, &area)| {
                (
                    [
                        self.vertex(triangle[0]),
                        self.vertex(triangle[1]),
                        self.vertex(triangle[2]),
                    ],
                    area,
                )
            })
    }

    pub fn validate(&self) -> Result<()> {
        if self.vertices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "vertex array length is not a multiple of 3".to_string(),
            ));
        }
        if self.indices.len() != self.area_types.len() * 3 {
            return Err(Error::InvalidMesh(format!(
                "{} indices for {} area types",
                self.indices.len(),
                self.area_types.len()
            )));
        }
        let vertex_count = self.vertex_count() as u32;
        if let Some(index) = self.indices.iter().find(|&&index| index >= vertex_count) {
            return Err(Error::InvalidMesh(format!(
                "index {index} out of range for {vertex_count} vertices"
            )));
        }
        Ok(())
    }

    pub fn memory_usage(&self) -> usize {
        self.indices.len() * size_of::<u32>()
            + self.vertices.len() * size_of::<f32>()
            + self.area_types.len() * size_of::<AreaType>()
    }
}

/// Water plane of a cell
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Water {
    pub cell_size: i32,
    pub level: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CellWater {
    pub cell_position: IVec2,
    pub water: Water,
}

/// Regular grid of terrain heights covering one cell
///
/// `heights` holds `size * size` samples, row by row along world Z.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Heightfield {
    pub cell_position: IVec2,
    pub cell_size: i32,
    pub size: usize,
    pub min_height: f32,
    pub max_height: f32,
    pub heights: Vec<f32>,
}

impl Heightfield {
    pub fn height_at(&self, x: usize, z: usize) -> f32 {
        self.heights[z * self.size + x]
    }

    /// World position of the sample at grid coordinates
    pub fn sample_position(&self, x: usize, z: usize) -> Vec3 {
        let origin = cell_origin(self.cell_position, self.cell_size);
        let step = self.cell_size as f32 / (self.size.max(2) - 1) as f32;
        Vec3::new(
            origin.x + x as f32 * step,
            self.height_at(x, z),
            origin.y + z as f32 * step,
        )
    }
}

/// Terrain cell at a constant height
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FlatHeightfield {
    pub cell_position: IVec2,
    pub cell_size: i32,
    pub height: f32,
}

/// Terrain of one cell as handed to the tile index
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HeightfieldShape {
    Grid {
        size: usize,
        min_height: f32,
        max_height: f32,
        heights: Vec<f32>,
    },
    Flat(f32),
}

impl HeightfieldShape {
    pub fn validate(&self) -> Result<()> {
        match self {
            HeightfieldShape::Grid { size, heights, .. } => {
                if *size < 2 || heights.len() != size * size {
                    return Err(Error::InvalidArgument(format!(
                        "heightfield of size {size} has {} samples",
                        heights.len()
                    )));
                }
                Ok(())
            }
            HeightfieldShape::Flat(_) => Ok(()),
        }
    }
}

/// Link between two points that agents may traverse without walkable surface between them
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OffMeshConnection {
    pub start: Vec3,
    pub end: Vec3,
    pub area_type: AreaType,
}

/// World XZ origin of a cell
pub fn cell_origin(cell_position: IVec2, cell_size: i32) -> Vec2 {
    cell_position.as_vec2() * cell_size as f32
}

/// World XZ bounds of a cell
pub fn cell_bounds(cell_position: IVec2, cell_size: i32) -> TileBounds {
    let min = cell_origin(cell_position, cell_size);
    TileBounds::new(min, min + Vec2::splat(cell_size as f32))
}

/// Everything the bake step consumes for one tile
///
/// Equality is order sensitive and compares every triangle, water plane,
/// heightfield and connection; it is the content part of the tile cache key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RecastMeshData {
    pub mesh: Mesh,
    pub water: Vec<CellWater>,
    pub heightfields: Vec<Heightfield>,
    pub flat_heightfields: Vec<FlatHeightfield>,
    pub off_mesh_connections: Vec<OffMeshConnection>,
}

impl RecastMeshData {
    pub fn is_empty(&self) -> bool {
        self.mesh.is_empty()
            && self.water.is_empty()
            && self.heightfields.is_empty()
            && self.flat_heightfields.is_empty()
            && self.off_mesh_connections.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        size_of::<Self>()
            + self.mesh.memory_usage()
            + self.water.len() * size_of::<CellWater>()
            + self
                .heightfields
                .iter()
                .map(|h| size_of::<Heightfield>() + h.heights.len() * size_of::<f32>())
                .sum::<usize>()
            + self.flat_heightfields.len() * size_of::<FlatHeightfield>()
            + self.off_mesh_connections.len() * size_of::<OffMeshConnection>()
    }
}

/// Placement of a shared shape inside a tile, used to reference geometry by id
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeshSource {
    pub shape: ShapeSource,
    pub transform: Affine3A,
    pub area_type: AreaType,
}

/// Immutable snapshot of one tile's inputs
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecastMesh {
    pub version: Version,
    pub data: RecastMeshData,
    pub sources: Vec<MeshSource>,
}

impl RecastMesh {
    pub fn new(version: Version, data: RecastMeshData, sources: Vec<MeshSource>) -> Self {
        Self {
            version,
            data,
            sources,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn memory_usage(&self) -> usize {
        self.data.memory_usage() + self.sources.len() * size_of::<MeshSource>()
    }
}
