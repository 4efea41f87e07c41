//! Geometry store of a single tile

use crate::recast_mesh_builder::RecastMeshBuilder;
use glam::{Affine3A, IVec2};
use navmesh_common::{
    same_transform, AreaType, CellWater, CollisionShape, HeightfieldShape, ObjectId,
    OffMeshConnection, RecastMesh, TileBounds, TilePosition, Version,
};
use std::collections::BTreeMap;
use std::sync::Arc;

/// Placement of a shared collision shape in the world
#[derive(Debug, Clone)]
pub struct RecastMeshObject {
    pub shape: Arc<CollisionShape>,
    pub transform: Affine3A,
    pub area_type: AreaType,
}

#[derive(Debug, Clone)]
struct HeightfieldEntry {
    cell_size: i32,
    shape: HeightfieldShape,
}

/// Last navmesh state a tile's mesh was baked into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NavMeshReport {
    pub revision: u64,
    pub nav_mesh_version: Version,
}

/// Holds every input intersecting one tile and produces its `RecastMesh`
///
/// Every successful mutation bumps the tile revision. Objects, water and
/// heightfields are kept in key order so that two stores with the same
/// contents produce equal meshes.
#[derive(Debug)]
pub struct RecastMeshManager {
    tile: TilePosition,
    bounds: TileBounds,
    generation: u64,
    revision: u64,
    objects: BTreeMap<ObjectId, RecastMeshObject>,
    water: BTreeMap<(i32, i32), CellWater>,
    heightfields: BTreeMap<(i32, i32), HeightfieldEntry>,
    off_mesh_connections: BTreeMap<ObjectId, Vec<OffMeshConnection>>,
    last_nav_mesh_report: Option<NavMeshReport>,
}

fn cell_key(cell_position: IVec2) -> (i32, i32) {
    (cell_position.x, cell_position.y)
}

impl RecastMeshManager {
    /// `bounds` are the tile bounds including the border
    pub fn new(tile: TilePosition, bounds: TileBounds, generation: u64) -> Self {
        Self {
            tile,
            bounds,
            generation,
            revision: 0,
            objects: BTreeMap::new(),
            water: BTreeMap::new(),
            heightfields: BTreeMap::new(),
            off_mesh_connections: BTreeMap::new(),
            last_nav_mesh_report: None,
        }
    }

    pub fn tile(&self) -> TilePosition {
        self.tile
    }

    pub fn add_object(&mut self, id: ObjectId, object: RecastMeshObject) -> bool {
        if self.objects.contains_key(&id) {
            return false;
        }
        self.objects.insert(id, object);
        self.revision += 1;
        true
    }

    /// Returns false when neither the transform nor the area type changed
    pub fn update_object(&mut self, id: ObjectId, transform: &Affine3A, area_type: AreaType) -> bool {
        let Some(object) = self.objects.get_mut(&id) else {
            return false;
        };
        if same_transform(&object.transform, transform) && object.area_type == area_type {
            return false;
        }
        object.transform = *transform;
        object.area_type = area_type;
        self.revision += 1;
        true
    }

    pub fn remove_object(&mut self, id: ObjectId) -> Option<RecastMeshObject> {
        let removed = self.objects.remove(&id)?;
        self.revision += 1;
        Some(removed)
    }

    pub fn add_water(&mut self, water: CellWater) -> bool {
        let key = cell_key(water.cell_position);
        if self.water.contains_key(&key) {
            return false;
        }
        self.water.insert(key, water);
        self.revision += 1;
        true
    }

    pub fn remove_water(&mut self, cell_position: IVec2) -> Option<CellWater> {
        let removed = self.water.remove(&cell_key(cell_position))?;
        self.revision += 1;
        Some(removed)
    }

    pub fn add_heightfield(&mut self, cell_position: IVec2, cell_size: i32, shape: HeightfieldShape) -> bool {
        let key = cell_key(cell_position);
        if self.heightfields.contains_key(&key) {
            return false;
        }
        self.heightfields.insert(key, HeightfieldEntry { cell_size, shape });
        self.revision += 1;
        true
    }

    pub fn remove_heightfield(&mut self, cell_position: IVec2) -> bool {
        if self.heightfields.remove(&cell_key(cell_position)).is_none() {
            return false;
        }
        self.revision += 1;
        true
    }

    pub fn add_off_mesh_connection(&mut self, id: ObjectId, connection: OffMeshConnection) {
        self.off_mesh_connections.entry(id).or_default().push(connection);
        self.revision += 1;
    }

    pub fn remove_off_mesh_connections(&mut self, id: ObjectId) -> bool {
        if self.off_mesh_connections.remove(&id).is_none() {
            return false;
        }
        self.revision += 1;
        true
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
            && self.water.is_empty()
            && self.heightfields.is_empty()
            && self.off_mesh_connections.is_empty()
    }

    pub fn version(&self) -> Version {
        Version::new(self.generation, self.revision)
    }

    /// Builds a fresh snapshot of the tile's inputs
    pub fn get_mesh(&self) -> RecastMesh {
        let mut builder = RecastMeshBuilder::new(self.bounds);
        for object in self.objects.values() {
            builder.add_object(object);
        }
        for water in self.water.values() {
            builder.add_water(*water);
        }
        for (&(x, y), entry) in &self.heightfields {
            builder.add_heightfield(IVec2::new(x, y), entry.cell_size, &entry.shape);
        }
        for connection in self.off_mesh_connections.values().flatten() {
            builder.add_off_mesh_connection(*connection);
        }
        builder.create(self.version())
    }

    /// Records the navmesh version a mesh of this tile was applied at
    ///
    /// Reports for another generation or older than the last one are ignored.
    pub fn report_nav_mesh_change(&mut self, recast_mesh_version: Version, nav_mesh_version: Version) {
        if recast_mesh_version.generation != self.generation {
            return;
        }
        if let Some(last) = &self.last_nav_mesh_report {
            if nav_mesh_version < last.nav_mesh_version {
                return;
            }
        }
        self.last_nav_mesh_report = Some(NavMeshReport {
            revision: recast_mesh_version.revision,
            nav_mesh_version,
        });
    }

    /// Whether the last reported bake saw every mutation made so far
    pub fn is_nav_mesh_up_to_date(&self) -> bool {
        self.last_nav_mesh_report
            .is_some_and(|report| report.revision == self.revision)
    }
}
