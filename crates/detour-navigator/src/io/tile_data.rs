use super::TileDataCompressor;
use crate::prepared_navmesh_data::PreparedNavMeshData;
use glam::Affine3A;
use navmesh_common::{
    AgentBounds, AreaType, CellWater, FlatHeightfield, Heightfield, OffMeshConnection,
    RecastMesh, RecastSettings, Result,
};
use serde::{Deserialize, Serialize};

/// Layout version of the encoded tile input
pub const TILE_INPUT_FORMAT: u32 = 1;

/// Object placement referencing its shape by store id
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DbRefGeometryObject {
    pub shape_id: i64,
    pub transform: Affine3A,
    pub area_type: AreaType,
}

#[derive(Serialize)]
struct TileInput<'a> {
    format: u32,
    agent: &'a AgentBounds,
    settings: &'a RecastSettings,
    objects: &'a [DbRefGeometryObject],
    water: &'a [CellWater],
    heightfields: &'a [Heightfield],
    flat_heightfields: &'a [FlatHeightfield],
    off_mesh_connections: &'a [OffMeshConnection],
}

/// Encodes everything a tile bake depends on
///
/// Object triangles are replaced by shape references: together with the
/// settings and the tile position they determine the clipped geometry.
pub fn make_tile_input(
    settings: &RecastSettings,
    agent: &AgentBounds,
    mesh: &RecastMesh,
    objects: &[DbRefGeometryObject],
) -> Result<Vec<u8>> {
    let input = TileInput {
        format: TILE_INPUT_FORMAT,
        agent,
        settings,
        objects,
        water: &mesh.data.water,
        heightfields: &mesh.data.heightfields,
        flat_heightfields: &mesh.data.flat_heightfields,
        off_mesh_connections: &mesh.data.off_mesh_connections,
    };
    Ok(postcard::to_allocvec(&input)?)
}

pub fn serialize_tile_data(
    data: &PreparedNavMeshData,
    compressor: &dyn TileDataCompressor,
) -> Result<Vec<u8>> {
    let bytes = postcard::to_allocvec(data)?;
    Ok(compressor.compress(&bytes)?)
}

pub fn deserialize_tile_data(
    bytes: &[u8],
    compressor: &dyn TileDataCompressor,
) -> Result<PreparedNavMeshData> {
    let bytes = compressor.decompress(bytes)?;
    Ok(postcard::from_bytes(&bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::Lz4Compressor;
    use crate::prepared_navmesh_data::{Polygon, POLY_FLAG_WALK};
    use glam::{IVec2, Vec3};
    use navmesh_common::{Error, RecastMeshData, Version};
    use smallvec::smallvec;

    fn mesh(height: f32) -> RecastMesh {
        RecastMesh::new(
            Version::new(1, 1),
            RecastMeshData {
                flat_heightfields: vec![FlatHeightfield {
                    cell_position: IVec2::ZERO,
                    cell_size: 32,
                    height,
                }],
                ..Default::default()
            },
            Vec::new(),
        )
    }

    #[test]
    fn test_input_depends_on_content_only() -> Result<()> {
        let settings = RecastSettings::default();
        let agent = AgentBounds::aabb(Vec3::new(0.3, 1.0, 0.3));
        let object = DbRefGeometryObject {
            shape_id: 4,
            transform: Affine3A::IDENTITY,
            area_type: AreaType::Ground,
        };

        let a = make_tile_input(&settings, &agent, &mesh(1.0), &[object])?;
        let mut newer = mesh(1.0);
        newer.version = Version::new(9, 9);
        assert_eq!(a, make_tile_input(&settings, &agent, &newer, &[object])?);

        assert_ne!(a, make_tile_input(&settings, &agent, &mesh(2.0), &[object])?);
        assert_ne!(a, make_tile_input(&settings, &agent, &mesh(1.0), &[])?);
        let other_agent = AgentBounds::aabb(Vec3::ONE);
        assert_ne!(a, make_tile_input(&settings, &other_agent, &mesh(1.0), &[object])?);
        Ok(())
    }

    #[test]
    fn test_tile_data_blob() -> Result<()> {
        let data = PreparedNavMeshData {
            bounds_min: Vec3::ZERO,
            bounds_max: Vec3::new(32.0, 0.0, 32.0),
            vertices: vec![Vec3::ZERO, Vec3::new(0.0, 0.0, 32.0), Vec3::new(32.0, 0.0, 32.0)],
            polygons: vec![Polygon {
                vertices: smallvec![0, 1, 2],
                area_type: AreaType::Ground,
                flags: POLY_FLAG_WALK,
            }],
            off_mesh_connections: Vec::new(),
        };
        let blob = serialize_tile_data(&data, &Lz4Compressor)?;
        assert_eq!(deserialize_tile_data(&blob, &Lz4Compressor)?, data);

        assert!(matches!(
            deserialize_tile_data(&[1, 2], &Lz4Compressor),
            Err(Error::Io(_))
        ));
        Ok(())
    }
}
