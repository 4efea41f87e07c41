//! Tile bake step

use crate::prepared_navmesh_data::{poly_flags, Polygon, PreparedNavMeshData};
use glam::{Vec2, Vec3};
use navmesh_common::{
    cell_bounds, make_tile_bounds, AgentBounds, AreaType, Error, RecastMeshData, RecastSettings,
    Result, TileBounds, TilePosition,
};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;

/// Turns the inputs of one tile into navmesh polygons
///
/// `Ok(None)` means the tile has no walkable surface. Implementations must be
/// deterministic: equal inputs give equal outputs, which is what makes the
/// tile caches valid.
pub trait TileBaker: Send + Sync {
    fn bake(
        &self,
        settings: &RecastSettings,
        agent: &AgentBounds,
        tile: TilePosition,
        data: &RecastMeshData,
        previous: Option<&PreparedNavMeshData>,
    ) -> Result<Option<PreparedNavMeshData>>;
}

/// Reference baker emitting walkable input surfaces as polygons
///
/// Triangles are kept when their slope is walkable and their centroid lies
/// inside the tile. Flat heightfields and water become one quad per
/// overlapped tile; water is lowered by the agent's swim depth.
#[derive(Debug, Clone, Copy, Default)]
pub struct SurfaceTileBaker;

impl TileBaker for SurfaceTileBaker {
    fn bake(
        &self,
        settings: &RecastSettings,
        agent: &AgentBounds,
        tile: TilePosition,
        data: &RecastMeshData,
        _previous: Option<&PreparedNavMeshData>,
    ) -> Result<Option<PreparedNavMeshData>> {
        data.mesh
            .validate()
            .map_err(|e| Error::Bake(format!("tile {tile}: {e}")))?;

        let bounds = make_tile_bounds(settings, tile);
        let min_normal_y = settings.max_slope.to_radians().cos();
        let mut polygons = PolygonBuilder::default();

        for (triangle, area_type) in data.mesh.triangles() {
            if area_type.is_walkable() && is_walkable(&triangle, min_normal_y) && contains(&bounds, centroid(&triangle)) {
                polygons.add(&triangle, area_type)?;
            }
        }

        for heightfield in &data.heightfields {
            if !cell_bounds(heightfield.cell_position, heightfield.cell_size).intersects(&bounds) {
                continue;
            }
            for z in 0..heightfield.size.saturating_sub(1) {
                for x in 0..heightfield.size.saturating_sub(1) {
                    let p00 = heightfield.sample_position(x, z);
                    let p10 = heightfield.sample_position(x + 1, z);
                    let p01 = heightfield.sample_position(x, z + 1);
                    let p11 = heightfield.sample_position(x + 1, z + 1);
                    for triangle in [[p00, p01, p10], [p10, p01, p11]] {
                        if is_walkable(&triangle, min_normal_y) && contains(&bounds, centroid(&triangle)) {
                            polygons.add(&triangle, AreaType::Ground)?;
                        }
                    }
                }
            }
        }

        for flat in &data.flat_heightfields {
            let rect = cell_bounds(flat.cell_position, flat.cell_size);
            polygons.add_rect(&rect, &bounds, flat.height, AreaType::Ground)?;
        }

        let swim_depth = settings.swim_height_scale * agent.half_extents.y;
        for water in &data.water {
            let rect = cell_bounds(water.cell_position, water.water.cell_size);
            polygons.add_rect(&rect, &bounds, water.water.level - swim_depth, AreaType::Water)?;
        }

        let off_mesh_connections: Vec<_> = data
            .off_mesh_connections
            .iter()
            .filter(|connection| contains(&bounds, Vec2::new(connection.start.x, connection.start.z)))
            .copied()
            .collect();

        if polygons.polygons.is_empty() && off_mesh_connections.is_empty() {
            return Ok(None);
        }
        Ok(Some(polygons.finish(off_mesh_connections)))
    }
}

fn centroid(triangle: &[Vec3; 3]) -> Vec2 {
    let c = (triangle[0] + triangle[1] + triangle[2]) / 3.0;
    Vec2::new(c.x, c.z)
}

fn is_walkable(triangle: &[Vec3; 3], min_normal_y: f32) -> bool {
    let normal = (triangle[1] - triangle[0]).cross(triangle[2] - triangle[0]);
    if normal.length_squared() <= f32::EPSILON {
        return false;
    }
    normal.normalize().y.abs() >= min_normal_y
}

/// Half-open containment so shared tile edges belong to exactly one tile
fn contains(bounds: &TileBounds, point: Vec2) -> bool {
    point.x >= bounds.min.x && point.x < bounds.max.x && point.y >= bounds.min.y && point.y < bounds.max.y
}

#[derive(Default)]
struct PolygonBuilder {
    vertices: Vec<Vec3>,
    lookup: FxHashMap<[u32; 3], u16>,
    polygons: Vec<Polygon>,
}

impl PolygonBuilder {
    fn vertex(&mut self, vertex: Vec3) -> Result<u16> {
        let key = vertex.to_array().map(f32::to_bits);
        if let Some(&index) = self.lookup.get(&key) {
            return Ok(index);
        }
        let index = u16::try_from(self.vertices.len())
            .map_err(|_| Error::Bake("tile has too many vertices".to_string()))?;
        self.vertices.push(vertex);
        self.lookup.insert(key, index);
        Ok(index)
    }

    fn add(&mut self, points: &[Vec3], area_type: AreaType) -> Result<()> {
        let vertices = points
            .iter()
            .map(|point| self.vertex(*point))
            .collect::<Result<SmallVec<[u16; 6]>>>()?;
        self.polygons.push(Polygon {
            vertices,
            area_type,
            flags: poly_flags(area_type),
        });
        Ok(())
    }

    /// Adds the part of `rect` inside `bounds` as a horizontal quad
    fn add_rect(&mut self, rect: &TileBounds, bounds: &TileBounds, height: f32, area_type: AreaType) -> Result<()> {
        let min = rect.min.max(bounds.min);
        let max = rect.max.min(bounds.max);
        if min.x >= max.x || min.y >= max.y {
            return Ok(());
        }
        self.add(
            &[
                Vec3::new(min.x, height, min.y),
                Vec3::new(min.x, height, max.y),
                Vec3::new(max.x, height, max.y),
                Vec3::new(max.x, height, min.y),
            ],
            area_type,
        )
    }

    fn finish(self, off_mesh_connections: Vec<navmesh_common::OffMeshConnection>) -> PreparedNavMeshData {
        let points = self
            .vertices
            .iter()
            .copied()
            .chain(off_mesh_connections.iter().flat_map(|c| [c.start, c.end]));
        let (bounds_min, bounds_max) = points.fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(min, max), point| (min.min(point), max.max(point)),
        );
        PreparedNavMeshData {
            bounds_min,
            bounds_max,
            vertices: self.vertices,
            polygons: self.polygons,
            off_mesh_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::IVec2;
    use navmesh_common::{CellWater, FlatHeightfield, Heightfield, Mesh, OffMeshConnection, Water};

    fn settings() -> RecastSettings {
        RecastSettings {
            cell_size: 0.5,
            tile_size: 64,
            ..Default::default()
        }
    }

    fn agent() -> AgentBounds {
        AgentBounds::aabb(Vec3::new(0.3, 1.0, 0.3))
    }

    fn bake(tile: TilePosition, data: &RecastMeshData) -> Result<Option<PreparedNavMeshData>> {
        SurfaceTileBaker.bake(&settings(), &agent(), tile, data, None)
    }

    #[test]
    fn test_flat_heightfield_covers_tile() -> Result<()> {
        let data = RecastMeshData {
            flat_heightfields: vec![FlatHeightfield {
                cell_position: IVec2::ZERO,
                cell_size: 64,
                height: 1.5,
            }],
            ..Default::default()
        };

        let baked = bake(TilePosition::new(1, 1), &data)?.unwrap();
        assert_eq!(baked.polygon_count(), 1);
        assert_eq!(baked.vertices.len(), 4);
        assert_eq!(baked.bounds_min, Vec3::new(32.0, 1.5, 32.0));
        assert_eq!(baked.bounds_max, Vec3::new(64.0, 1.5, 64.0));

        assert!(bake(TilePosition::new(2, 0), &data)?.is_none());
        Ok(())
    }

    #[test]
    fn test_steep_and_unwalkable_triangles_are_dropped() -> Result<()> {
        let mut mesh = Mesh::new();
        mesh.push_triangle(
            [Vec3::new(1.0, 0.0, 1.0), Vec3::new(1.0, 0.0, 3.0), Vec3::new(3.0, 0.0, 1.0)],
            AreaType::Ground,
        );
        mesh.push_triangle(
            [Vec3::new(5.0, 0.0, 5.0), Vec3::new(5.0, 4.0, 5.0), Vec3::new(7.0, 0.0, 5.0)],
            AreaType::Ground,
        );
        mesh.push_triangle(
            [Vec3::new(9.0, 0.0, 9.0), Vec3::new(9.0, 0.0, 11.0), Vec3::new(11.0, 0.0, 9.0)],
            AreaType::Null,
        );
        let data = RecastMeshData {
            mesh,
            ..Default::default()
        };

        let baked = bake(TilePosition::new(0, 0), &data)?.unwrap();
        assert_eq!(baked.polygon_count(), 1);
        assert_eq!(baked.polygons[0].flags, crate::prepared_navmesh_data::POLY_FLAG_WALK);
        Ok(())
    }

    #[test]
    fn test_heightfield_water_and_connections() -> Result<()> {
        let data = RecastMeshData {
            heightfields: vec![Heightfield {
                cell_position: IVec2::ZERO,
                cell_size: 32,
                size: 3,
                min_height: 0.0,
                max_height: 0.0,
                heights: vec![0.0; 9],
            }],
            water: vec![CellWater {
                cell_position: IVec2::ZERO,
                water: Water {
                    cell_size: 32,
                    level: 2.0,
                },
            }],
            off_mesh_connections: vec![OffMeshConnection {
                start: Vec3::new(1.0, 0.0, 1.0),
                end: Vec3::new(40.0, 0.0, 1.0),
                area_type: AreaType::Door,
            }],
            ..Default::default()
        };

        let baked = bake(TilePosition::new(0, 0), &data)?.unwrap();
        // 2x2 grid quads split in triangles plus one water quad
        assert_eq!(baked.polygon_count(), 9);
        let water = baked.polygons.iter().find(|p| p.area_type == AreaType::Water).unwrap();
        assert_eq!(baked.vertices[water.vertices[0] as usize].y, 1.0);
        assert_eq!(baked.off_mesh_connections.len(), 1);

        // the connection only belongs to the tile of its start
        let neighbour = bake(TilePosition::new(1, 0), &data)?;
        assert!(neighbour.is_none());
        Ok(())
    }

    #[test]
    fn test_invalid_mesh_is_a_bake_error() {
        let data = RecastMeshData {
            mesh: Mesh {
                indices: vec![0, 1, 2],
                vertices: vec![0.0; 3],
                area_types: vec![AreaType::Ground],
            },
            ..Default::default()
        };
        assert!(matches!(bake(TilePosition::new(0, 0), &data), Err(Error::Bake(_))));
    }
}
