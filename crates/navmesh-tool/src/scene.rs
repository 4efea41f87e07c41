//! JSON scene descriptions consumed by `generate`

use anyhow::{Context, Result};
use detour_navigator::NavMeshManager;
use glam::{Affine3A, IVec2, Quat, Vec2, Vec3};
use navmesh_common::{
    cell_bounds, make_tiles_positions_range, AgentBounds, AreaType, CollisionShape,
    HeightfieldShape, ObjectId, RecastSettings, ShapeType, TilePosition, TilesPositionsRange,
};
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scene {
    pub worldspaces: Vec<Worldspace>,
}

impl Scene {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read scene file: {}", path.display()))?;
        serde_json::from_str(&text)
            .with_context(|| format!("Failed to parse scene file: {}", path.display()))
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Worldspace {
    pub name: String,
    /// Agent half extents
    #[serde(default)]
    pub agents: Vec<Vec3>,
    #[serde(default)]
    pub objects: Vec<SceneObject>,
    #[serde(default)]
    pub heightfields: Vec<SceneHeightfield>,
    #[serde(default)]
    pub water: Vec<SceneWater>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneObject {
    pub id: u64,
    pub shape: SceneShape,
    #[serde(default)]
    pub position: Vec3,
    /// Rotation around the vertical axis in degrees
    #[serde(default)]
    pub yaw: f32,
    #[serde(default)]
    pub area_type: AreaType,
}

impl SceneObject {
    fn transform(&self) -> Affine3A {
        Affine3A::from_rotation_translation(Quat::from_rotation_y(self.yaw.to_radians()), self.position)
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", deny_unknown_fields)]
pub enum SceneShape {
    Plane {
        name: String,
        half_size: f32,
    },
    Cuboid {
        name: String,
        half_extents: Vec3,
    },
    Mesh {
        name: String,
        vertices: Vec<Vec3>,
        indices: Vec<u32>,
    },
}

impl SceneShape {
    fn build(&self) -> navmesh_common::Result<CollisionShape> {
        match self {
            SceneShape::Plane { name, half_size } => CollisionShape::plane(name.as_str(), *half_size),
            SceneShape::Cuboid { name, half_extents } => CollisionShape::cuboid(name.as_str(), *half_extents),
            SceneShape::Mesh {
                name,
                vertices,
                indices,
            } => CollisionShape::new(name.as_str(), ShapeType::Collision, vertices.clone(), indices.clone()),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneHeightfield {
    pub cell: IVec2,
    pub cell_size: i32,
    pub shape: HeightfieldShape,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SceneWater {
    pub cell: IVec2,
    pub cell_size: i32,
    pub level: f32,
}

impl Worldspace {
    pub fn agents(&self) -> impl Iterator<Item = AgentBounds> + '_ {
        self.agents.iter().map(|half_extents| AgentBounds::aabb(*half_extents))
    }

    /// Smallest tile range covering every piece of geometry, `None` when empty
    pub fn tiles_range(&self, settings: &RecastSettings) -> Result<Option<TilesPositionsRange>> {
        let mut ranges = Vec::new();
        for object in &self.objects {
            let shape = object
                .shape
                .build()
                .with_context(|| format!("Invalid shape of object {}", object.id))?;
            let (min, max) = shape.world_aabb(&object.transform());
            ranges.push(make_tiles_positions_range(
                settings,
                Vec2::new(min.x, min.z),
                Vec2::new(max.x, max.z),
            ));
        }
        let cells = self
            .heightfields
            .iter()
            .map(|h| (h.cell, h.cell_size))
            .chain(self.water.iter().map(|w| (w.cell, w.cell_size)));
        for (cell, cell_size) in cells {
            let bounds = cell_bounds(cell, cell_size);
            ranges.push(make_tiles_positions_range(settings, bounds.min, bounds.max));
        }

        Ok(ranges.into_iter().reduce(|a, b| {
            TilesPositionsRange::new(
                TilePosition::new(a.begin.x.min(b.begin.x), a.begin.y.min(b.begin.y)),
                TilePosition::new(a.end.x.max(b.end.x), a.end.y.max(b.end.y)),
            )
        }))
    }

    /// Feeds all geometry of the worldspace into the manager
    pub fn populate(&self, manager: &mut NavMeshManager) -> Result<()> {
        for object in &self.objects {
            let shape = object
                .shape
                .build()
                .with_context(|| format!("Invalid shape of object {}", object.id))?;
            if !manager.add_object(ObjectId(object.id), Arc::new(shape), object.transform(), object.area_type) {
                log::warn!("Skipping duplicate object {} in worldspace {}", object.id, self.name);
            }
        }
        for heightfield in &self.heightfields {
            let added = manager
                .add_heightfield(heightfield.cell, heightfield.cell_size, heightfield.shape.clone())
                .with_context(|| format!("Invalid heightfield at cell {}", heightfield.cell))?;
            if !added {
                log::warn!("Skipping duplicate heightfield at cell {}", heightfield.cell);
            }
        }
        for water in &self.water {
            if !manager.add_water(water.cell, water.cell_size, water.level) {
                log::warn!("Skipping duplicate water at cell {}", water.cell);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SCENE: &str = r#"{
        "worldspaces": [{
            "name": "sys::default",
            "agents": [[0.3, 0.9, 0.3]],
            "objects": [
                {"id": 1, "shape": {"type": "plane", "name": "floor", "half_size": 4.0}, "position": [16.0, 0.0, 16.0]},
                {"id": 2, "shape": {"type": "cuboid", "name": "crate", "half_extents": [1.0, 1.0, 1.0]},
                 "position": [40.0, 1.0, 8.0], "yaw": 45.0, "area_type": "Null"}
            ],
            "heightfields": [{"cell": [0, 0], "cell_size": 32, "shape": {"Flat": 0.0}}],
            "water": [{"cell": [2, 0], "cell_size": 32, "level": -1.0}]
        }]
    }"#;

    fn settings() -> RecastSettings {
        RecastSettings {
            cell_size: 0.5,
            tile_size: 64,
            border_size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_parse_scene() -> Result<()> {
        let scene: Scene = serde_json::from_str(SCENE)?;
        assert_eq!(scene.worldspaces.len(), 1);
        let worldspace = &scene.worldspaces[0];
        assert_eq!(worldspace.agents().count(), 1);
        assert_eq!(worldspace.objects[1].area_type, AreaType::Null);
        assert!(matches!(worldspace.heightfields[0].shape, HeightfieldShape::Flat(_)));
        Ok(())
    }

    #[test]
    fn test_tiles_range_covers_all_geometry() -> Result<()> {
        let scene: Scene = serde_json::from_str(SCENE)?;
        let range = scene.worldspaces[0].tiles_range(&settings())?.unwrap();
        // water cell (2, 0) spans x in [64, 96], plus the 2 unit border
        assert_eq!(range.begin, TilePosition::new(-1, -1));
        assert_eq!(range.end, TilePosition::new(4, 2));
        Ok(())
    }

    #[test]
    fn test_empty_worldspace_has_no_range() -> Result<()> {
        let worldspace: Worldspace = serde_json::from_str(r#"{"name": "empty"}"#)?;
        assert!(worldspace.tiles_range(&settings())?.is_none());
        Ok(())
    }

    #[test]
    fn test_unknown_shape_type_is_rejected() {
        let result: serde_json::Result<SceneShape> =
            serde_json::from_str(r#"{"type": "sphere", "name": "ball", "radius": 1.0}"#);
        assert!(result.is_err());
    }
}
