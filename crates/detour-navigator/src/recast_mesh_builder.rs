//! Assembly of a tile's `RecastMesh` from the geometry touching it

use crate::recast_mesh_manager::RecastMeshObject;
use glam::{IVec2, Vec2, Vec3};
use navmesh_common::{
    AreaType, CellWater, FlatHeightfield, Heightfield, HeightfieldShape, MeshSource,
    OffMeshConnection, RecastMesh, RecastMeshData, ShapeType, TileBounds, Version,
};

/// Collects geometry clipped to the bordered bounds of one tile
pub struct RecastMeshBuilder {
    bounds: TileBounds,
    data: RecastMeshData,
    sources: Vec<MeshSource>,
}

impl RecastMeshBuilder {
    pub fn new(bounds: TileBounds) -> Self {
        Self {
            bounds,
            data: RecastMeshData::default(),
            sources: Vec::new(),
        }
    }

    /// Adds the object's triangles overlapping the tile
    ///
    /// Avoidance shapes are added as non-walkable geometry.
    pub fn add_object(&mut self, object: &RecastMeshObject) {
        let area_type = match object.shape.shape_type() {
            ShapeType::Collision => object.area_type,
            ShapeType::Avoidance => AreaType::Null,
        };

        let mut added = false;
        for triangle in object.shape.transformed_triangles(&object.transform) {
            if triangle_intersects(&self.bounds, &triangle) {
                self.data.mesh.push_triangle(triangle, area_type);
                added = true;
            }
        }

        if added {
            self.sources.push(MeshSource {
                shape: object.shape.source().clone(),
                transform: object.transform,
                area_type,
            });
        }
    }

    pub fn add_water(&mut self, water: CellWater) {
        self.data.water.push(water);
    }

    pub fn add_heightfield(&mut self, cell_position: IVec2, cell_size: i32, shape: &HeightfieldShape) {
        match shape {
            HeightfieldShape::Grid {
                size,
                min_height,
                max_height,
                heights,
            } => self.data.heightfields.push(Heightfield {
                cell_position,
                cell_size,
                size: *size,
                min_height: *min_height,
                max_height: *max_height,
                heights: heights.clone(),
            }),
            HeightfieldShape::Flat(height) => self.data.flat_heightfields.push(FlatHeightfield {
                cell_position,
                cell_size,
                height: *height,
            }),
        }
    }

    pub fn add_off_mesh_connection(&mut self, connection: OffMeshConnection) {
        self.data.off_mesh_connections.push(connection);
    }

    pub fn create(self, version: Version) -> RecastMesh {
        RecastMesh::new(version, self.data, self.sources)
    }
}

fn triangle_intersects(bounds: &TileBounds, triangle: &[Vec3; 3]) -> bool {
    let xz = triangle.map(|v| Vec2::new(v.x, v.z));
    let min = xz[0].min(xz[1]).min(xz[2]);
    let max = xz[0].max(xz[1]).max(xz[2]);
    bounds.intersects(&TileBounds::new(min, max))
}
