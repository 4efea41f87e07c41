//! Spatial index from world geometry to the tiles it overlaps

use crate::cached_recast_mesh_manager::CachedRecastMeshManager;
use crate::recast_mesh_manager::RecastMeshObject;
use glam::{Affine3A, IVec2, Vec2, Vec3};
use navmesh_common::{
    cell_bounds, get_tile_position, make_real_tile_bounds_with_border, make_tiles_positions_range,
    same_transform, AreaType, CellWater, CollisionShape, HeightfieldShape, ObjectId,
    OffMeshConnection, RecastMesh, RecastSettings, Result, TilePosition, TilesPositionsRange,
    Version, Water,
};
use smallvec::SmallVec;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Tiles touched by one mutation
pub type ChangedTiles = SmallVec<[TilePosition; 4]>;

/// Result of removing an object from the index
#[derive(Debug, Clone)]
pub struct RemovedObject {
    pub object: RecastMeshObject,
    pub changed_tiles: ChangedTiles,
}

#[derive(Debug)]
struct ObjectData {
    object: RecastMeshObject,
    range: TilesPositionsRange,
}

#[derive(Debug)]
struct WaterData {
    water: CellWater,
    range: TilesPositionsRange,
}

#[derive(Debug)]
struct HeightfieldData {
    cell_size: i32,
    shape: HeightfieldShape,
    range: TilesPositionsRange,
}

#[derive(Debug)]
struct OffMeshConnectionData {
    connection: OffMeshConnection,
    tiles: SmallVec<[TilePosition; 2]>,
}

#[derive(Debug)]
struct State {
    worldspace: String,
    generation: u64,
    range: TilesPositionsRange,
    tiles: BTreeMap<TilePosition, Arc<CachedRecastMeshManager>>,
    objects: BTreeMap<ObjectId, ObjectData>,
    water: BTreeMap<(i32, i32), WaterData>,
    heightfields: BTreeMap<(i32, i32), HeightfieldData>,
    off_mesh_connections: BTreeMap<ObjectId, Vec<OffMeshConnectionData>>,
}

impl State {
    fn tile_or_insert(&mut self, settings: &RecastSettings, tile: TilePosition) -> Arc<CachedRecastMeshManager> {
        let generation = self.generation;
        Arc::clone(self.tiles.entry(tile).or_insert_with(|| {
            Arc::new(CachedRecastMeshManager::new(
                tile,
                make_real_tile_bounds_with_border(settings, tile),
                generation,
            ))
        }))
    }

    fn with_existing_tile(&mut self, tile: TilePosition, f: impl FnOnce(&CachedRecastMeshManager)) {
        let Some(manager) = self.tiles.get(&tile) else {
            return;
        };
        f(manager);
        if manager.is_empty() {
            self.tiles.remove(&tile);
        }
    }
}

/// Index of all geometry in the current worldspace
///
/// Every piece of geometry remembers the range of tiles its bordered bounds
/// overlap; a per-tile store exists for tiles that hold geometry inside the
/// tracked range. All mutations are serialized by one mutex and each
/// successful one bumps the global revision exactly once.
#[derive(Debug)]
pub struct TileCachedRecastMeshManager {
    settings: RecastSettings,
    state: Mutex<State>,
    revision: AtomicU64,
}

impl TileCachedRecastMeshManager {
    pub fn new(settings: RecastSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(State {
                worldspace: String::new(),
                generation: 0,
                range: TilesPositionsRange::infinite(),
                tiles: BTreeMap::new(),
                objects: BTreeMap::new(),
                water: BTreeMap::new(),
                heightfields: BTreeMap::new(),
                off_mesh_connections: BTreeMap::new(),
            }),
            revision: AtomicU64::new(0),
        }
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn bump_revision(&self) {
        self.revision.fetch_add(1, Ordering::AcqRel);
    }

    pub fn settings(&self) -> &RecastSettings {
        &self.settings
    }

    /// Global revision; only ever increases
    pub fn revision(&self) -> u64 {
        self.revision.load(Ordering::Acquire)
    }

    pub fn worldspace(&self) -> String {
        self.lock().worldspace.clone()
    }

    pub fn range(&self) -> TilesPositionsRange {
        self.lock().range
    }

    fn object_range(&self, shape: &CollisionShape, transform: &Affine3A) -> TilesPositionsRange {
        let (min, max) = shape.world_aabb(transform);
        make_tiles_positions_range(&self.settings, Vec2::new(min.x, min.z), Vec2::new(max.x, max.z))
    }

    fn cell_range(&self, cell_position: IVec2, cell_size: i32) -> TilesPositionsRange {
        let bounds = cell_bounds(cell_position, cell_size);
        make_tiles_positions_range(&self.settings, bounds.min, bounds.max)
    }

    /// Drops all geometry and starts a new generation of tile stores
    ///
    /// Returns the tiles that held geometry; switching to the current
    /// worldspace changes nothing.
    pub fn set_worldspace(&self, worldspace: &str) -> ChangedTiles {
        let mut state = self.lock();
        if state.worldspace == worldspace {
            return ChangedTiles::new();
        }
        let changed = state.tiles.keys().copied().collect();
        state.worldspace = worldspace.to_string();
        state.generation += 1;
        state.tiles.clear();
        state.objects.clear();
        state.water.clear();
        state.heightfields.clear();
        state.off_mesh_connections.clear();
        self.bump_revision();
        log::info!("Tile index switched to worldspace \"{worldspace}\"");
        changed
    }

    /// Limits per-tile stores to `range`, materialising geometry that enters it
    pub fn set_range(&self, range: TilesPositionsRange) -> bool {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.range == range {
            return false;
        }
        let old_range = state.range;
        state.range = range;
        state.tiles.retain(|tile, _| range.contains(*tile));

        let entering = |tile: &TilePosition| !old_range.contains(*tile);

        let objects: Vec<_> = state
            .objects
            .iter()
            .map(|(id, data)| (*id, data.object.clone(), data.range))
            .collect();
        for (id, object, object_range) in objects {
            for tile in object_range.intersection(&range).iter().filter(entering) {
                state
                    .tile_or_insert(&self.settings, tile)
                    .add_object(id, object.clone());
            }
        }

        let water: Vec<_> = state.water.values().map(|data| (data.water, data.range)).collect();
        for (water, water_range) in water {
            for tile in water_range.intersection(&range).iter().filter(entering) {
                state.tile_or_insert(&self.settings, tile).add_water(water);
            }
        }

        let heightfields: Vec<_> = state
            .heightfields
            .iter()
            .map(|(&(x, y), data)| (IVec2::new(x, y), data.cell_size, data.shape.clone(), data.range))
            .collect();
        for (cell_position, cell_size, shape, heightfield_range) in heightfields {
            for tile in heightfield_range.intersection(&range).iter().filter(entering) {
                state
                    .tile_or_insert(&self.settings, tile)
                    .add_heightfield(cell_position, cell_size, shape.clone());
            }
        }

        let connections: Vec<_> = state
            .off_mesh_connections
            .iter()
            .flat_map(|(id, list)| list.iter().map(move |data| (*id, data.connection, data.tiles.clone())))
            .collect();
        for (id, connection, tiles) in connections {
            for tile in tiles.into_iter().filter(|t| range.contains(*t) && entering(t)) {
                state
                    .tile_or_insert(&self.settings, tile)
                    .add_off_mesh_connection(id, connection);
            }
        }

        self.bump_revision();
        true
    }

    /// Returns `None` when the id is already present
    pub fn add_object(
        &self,
        id: ObjectId,
        shape: Arc<CollisionShape>,
        transform: Affine3A,
        area_type: AreaType,
    ) -> Option<ChangedTiles> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.objects.contains_key(&id) {
            return None;
        }
        let object_range = self.object_range(&shape, &transform);
        let object = RecastMeshObject {
            shape,
            transform,
            area_type,
        };
        let mut changed = ChangedTiles::new();
        for tile in object_range.intersection(&state.range).iter() {
            state
                .tile_or_insert(&self.settings, tile)
                .add_object(id, object.clone());
            changed.push(tile);
        }
        state.objects.insert(
            id,
            ObjectData {
                object,
                range: object_range,
            },
        );
        self.bump_revision();
        Some(changed)
    }

    /// Moves an object or changes its area type
    ///
    /// Returns `None` for unknown ids and for a bit-for-bit identical
    /// transform with the same area type. Otherwise returns the union of the
    /// old and new footprints.
    pub fn update_object(&self, id: ObjectId, transform: Affine3A, area_type: AreaType) -> Option<ChangedTiles> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let data = state.objects.get_mut(&id)?;
        if same_transform(&data.object.transform, &transform) && data.object.area_type == area_type {
            return None;
        }
        let old_range = data.range;
        let new_range = self.object_range(&data.object.shape, &transform);
        data.object.transform = transform;
        data.object.area_type = area_type;
        data.range = new_range;
        let object = data.object.clone();

        let mut changed = ChangedTiles::new();
        for tile in old_range.intersection(&state.range).iter() {
            if new_range.contains(tile) {
                if let Some(manager) = state.tiles.get(&tile) {
                    manager.update_object(id, &transform, area_type);
                }
            } else {
                state.with_existing_tile(tile, |manager| {
                    manager.remove_object(id);
                });
            }
            changed.push(tile);
        }
        for tile in new_range.intersection(&state.range).iter() {
            if old_range.contains(tile) {
                continue;
            }
            state
                .tile_or_insert(&self.settings, tile)
                .add_object(id, object.clone());
            changed.push(tile);
        }
        self.bump_revision();
        Some(changed)
    }

    pub fn remove_object(&self, id: ObjectId) -> Option<RemovedObject> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let data = state.objects.remove(&id)?;
        let mut changed = ChangedTiles::new();
        for tile in data.range.intersection(&state.range).iter() {
            state.with_existing_tile(tile, |manager| {
                manager.remove_object(id);
            });
            changed.push(tile);
        }
        self.bump_revision();
        Some(RemovedObject {
            object: data.object,
            changed_tiles: changed,
        })
    }

    /// Returns `None` when the cell already has water
    pub fn add_water(&self, cell_position: IVec2, cell_size: i32, level: f32) -> Option<ChangedTiles> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let key = (cell_position.x, cell_position.y);
        if state.water.contains_key(&key) {
            return None;
        }
        let water = CellWater {
            cell_position,
            water: Water { cell_size, level },
        };
        let water_range = self.cell_range(cell_position, cell_size);
        let mut changed = ChangedTiles::new();
        for tile in water_range.intersection(&state.range).iter() {
            state.tile_or_insert(&self.settings, tile).add_water(water);
            changed.push(tile);
        }
        state.water.insert(
            key,
            WaterData {
                water,
                range: water_range,
            },
        );
        self.bump_revision();
        Some(changed)
    }

    pub fn remove_water(&self, cell_position: IVec2) -> Option<ChangedTiles> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let data = state.water.remove(&(cell_position.x, cell_position.y))?;
        let mut changed = ChangedTiles::new();
        for tile in data.range.intersection(&state.range).iter() {
            state.with_existing_tile(tile, |manager| {
                manager.remove_water(cell_position);
            });
            changed.push(tile);
        }
        self.bump_revision();
        Some(changed)
    }

    /// Returns `Ok(None)` when the cell already has a heightfield
    pub fn add_heightfield(
        &self,
        cell_position: IVec2,
        cell_size: i32,
        shape: HeightfieldShape,
    ) -> Result<Option<ChangedTiles>> {
        shape.validate()?;
        let mut guard = self.lock();
        let state = &mut *guard;
        let key = (cell_position.x, cell_position.y);
        if state.heightfields.contains_key(&key) {
            return Ok(None);
        }
        let heightfield_range = self.cell_range(cell_position, cell_size);
        let mut changed = ChangedTiles::new();
        for tile in heightfield_range.intersection(&state.range).iter() {
            state
                .tile_or_insert(&self.settings, tile)
                .add_heightfield(cell_position, cell_size, shape.clone());
            changed.push(tile);
        }
        state.heightfields.insert(
            key,
            HeightfieldData {
                cell_size,
                shape,
                range: heightfield_range,
            },
        );
        self.bump_revision();
        Ok(Some(changed))
    }

    pub fn remove_heightfield(&self, cell_position: IVec2) -> Option<ChangedTiles> {
        let mut guard = self.lock();
        let state = &mut *guard;
        let data = state.heightfields.remove(&(cell_position.x, cell_position.y))?;
        let mut changed = ChangedTiles::new();
        for tile in data.range.intersection(&state.range).iter() {
            state.with_existing_tile(tile, |manager| {
                manager.remove_heightfield(cell_position);
            });
            changed.push(tile);
        }
        self.bump_revision();
        Some(changed)
    }

    /// Adds a connection to the tiles of both of its ends
    pub fn add_off_mesh_connection(
        &self,
        id: ObjectId,
        start: Vec3,
        end: Vec3,
        area_type: AreaType,
    ) -> ChangedTiles {
        let mut guard = self.lock();
        let state = &mut *guard;
        let connection = OffMeshConnection {
            start,
            end,
            area_type,
        };
        let mut tiles: SmallVec<[TilePosition; 2]> = SmallVec::new();
        tiles.push(get_tile_position(&self.settings, start));
        let end_tile = get_tile_position(&self.settings, end);
        if !tiles.contains(&end_tile) {
            tiles.push(end_tile);
        }

        let range = state.range;
        let mut changed = ChangedTiles::new();
        for &tile in tiles.iter().filter(|tile| range.contains(**tile)) {
            state
                .tile_or_insert(&self.settings, tile)
                .add_off_mesh_connection(id, connection);
            changed.push(tile);
        }
        state
            .off_mesh_connections
            .entry(id)
            .or_default()
            .push(OffMeshConnectionData { connection, tiles });
        self.bump_revision();
        changed
    }

    /// Removes every connection registered under `id`
    pub fn remove_off_mesh_connections(&self, id: ObjectId) -> ChangedTiles {
        let mut guard = self.lock();
        let state = &mut *guard;
        let Some(connections) = state.off_mesh_connections.remove(&id) else {
            return ChangedTiles::new();
        };
        let mut changed = ChangedTiles::new();
        for tile in connections.iter().flat_map(|data| data.tiles.iter().copied()) {
            if !state.range.contains(tile) || changed.contains(&tile) {
                continue;
            }
            state.with_existing_tile(tile, |manager| {
                manager.remove_off_mesh_connections(id);
            });
            changed.push(tile);
        }
        self.bump_revision();
        changed
    }

    fn tile_manager(&self, worldspace: &str, tile: TilePosition) -> Option<Arc<CachedRecastMeshManager>> {
        let state = self.lock();
        if state.worldspace != worldspace {
            return None;
        }
        state.tiles.get(&tile).cloned()
    }

    /// Snapshot of a tile, `None` when it holds no geometry or the worldspace changed
    pub fn get_mesh(&self, worldspace: &str, tile: TilePosition) -> Option<Arc<RecastMesh>> {
        self.tile_manager(worldspace, tile).map(|manager| manager.get_mesh())
    }

    pub fn get_cached_mesh(&self, worldspace: &str, tile: TilePosition) -> Option<Arc<RecastMesh>> {
        self.tile_manager(worldspace, tile)
            .and_then(|manager| manager.get_cached_mesh())
    }

    pub fn report_nav_mesh_change(
        &self,
        tile: TilePosition,
        recast_mesh_version: Version,
        nav_mesh_version: Version,
    ) {
        let manager = self.lock().tiles.get(&tile).cloned();
        if let Some(manager) = manager {
            manager.report_nav_mesh_change(recast_mesh_version, nav_mesh_version);
        }
    }

    pub fn has_tile(&self, tile: TilePosition) -> bool {
        self.lock().tiles.contains_key(&tile)
    }

    pub fn tiles_count(&self) -> usize {
        self.lock().tiles.len()
    }

    /// Visits every tile store outside of the index lock
    pub fn for_each_tile(&self, mut f: impl FnMut(TilePosition, &CachedRecastMeshManager)) {
        let tiles: Vec<_> = self
            .lock()
            .tiles
            .iter()
            .map(|(tile, manager)| (*tile, Arc::clone(manager)))
            .collect();
        for (tile, manager) in tiles {
            f(tile, &manager);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use navmesh_common::get_tile_size;

    fn settings() -> RecastSettings {
        RecastSettings {
            cell_size: 0.5,
            tile_size: 64,
            border_size: 4,
            ..Default::default()
        }
    }

    fn cuboid() -> Arc<CollisionShape> {
        Arc::new(CollisionShape::cuboid("box", Vec3::ONE).unwrap())
    }

    fn at(x: f32, z: f32) -> Affine3A {
        Affine3A::from_translation(Vec3::new(x, 0.0, z))
    }

    fn sorted(tiles: ChangedTiles) -> Vec<TilePosition> {
        let mut tiles = tiles.into_vec();
        tiles.sort();
        tiles
    }

    #[test]
    fn test_add_object_reports_footprint() {
        let manager = TileCachedRecastMeshManager::new(settings());
        assert_eq!(get_tile_size(manager.settings()), 32.0);

        let changed = manager
            .add_object(ObjectId(1), cuboid(), at(16.0, 16.0), AreaType::Ground)
            .unwrap();
        assert_eq!(sorted(changed), vec![TilePosition::new(0, 0)]);
        assert_eq!(manager.revision(), 1);

        // near the corner the border pulls in the neighbours
        let changed = manager
            .add_object(ObjectId(2), cuboid(), at(31.5, 31.5), AreaType::Ground)
            .unwrap();
        assert_eq!(changed.len(), 4);
        assert_eq!(manager.revision(), 2);

        assert!(manager
            .add_object(ObjectId(1), cuboid(), at(0.0, 0.0), AreaType::Ground)
            .is_none());
        assert_eq!(manager.revision(), 2);
        assert_eq!(manager.tiles_count(), 4);
    }

    #[test]
    fn test_update_object_reports_old_and_new_tiles() {
        let manager = TileCachedRecastMeshManager::new(settings());
        manager.add_object(ObjectId(1), cuboid(), at(16.0, 16.0), AreaType::Ground);

        assert!(manager
            .update_object(ObjectId(1), at(16.0, 16.0), AreaType::Ground)
            .is_none());
        assert!(manager
            .update_object(ObjectId(9), at(16.0, 16.0), AreaType::Ground)
            .is_none());
        assert_eq!(manager.revision(), 1);

        let changed = manager
            .update_object(ObjectId(1), at(80.0, 16.0), AreaType::Ground)
            .unwrap();
        assert_eq!(sorted(changed), vec![TilePosition::new(0, 0), TilePosition::new(2, 0)]);
        assert_eq!(manager.revision(), 2);
        assert!(!manager.has_tile(TilePosition::new(0, 0)));
        assert!(manager.has_tile(TilePosition::new(2, 0)));

        // changing only the area type touches the same tiles
        let changed = manager
            .update_object(ObjectId(1), at(80.0, 16.0), AreaType::Door)
            .unwrap();
        assert_eq!(sorted(changed), vec![TilePosition::new(2, 0)]);
        let mesh = manager.get_mesh("", TilePosition::new(2, 0)).unwrap();
        assert!(mesh.data.mesh.area_types.iter().all(|area| *area == AreaType::Door));
    }

    #[test]
    fn test_remove_object_drops_empty_tiles() {
        let manager = TileCachedRecastMeshManager::new(settings());
        manager.add_object(ObjectId(1), cuboid(), at(16.0, 16.0), AreaType::Ground);
        manager.add_water(IVec2::ZERO, 32, 0.0);

        let removed = manager.remove_object(ObjectId(1)).unwrap();
        assert_eq!(sorted(removed.changed_tiles), vec![TilePosition::new(0, 0)]);
        assert!(manager.remove_object(ObjectId(1)).is_none());
        assert!(manager.has_tile(TilePosition::new(0, 0)));

        let changed = manager.remove_water(IVec2::ZERO).unwrap();
        assert!(changed.contains(&TilePosition::new(0, 0)));
        assert_eq!(manager.tiles_count(), 0);
        assert_eq!(manager.revision(), 4);
    }

    #[test]
    fn test_mesh_snapshots_by_worldspace() {
        let manager = TileCachedRecastMeshManager::new(settings());
        manager.set_worldspace("w");
        manager
            .add_heightfield(IVec2::ZERO, 32, HeightfieldShape::Flat(0.0))
            .unwrap();

        let tile = TilePosition::new(0, 0);
        assert!(manager.get_cached_mesh("w", tile).is_none());
        let mesh = manager.get_mesh("w", tile).unwrap();
        assert_eq!(mesh.data.flat_heightfields.len(), 1);
        assert!(Arc::ptr_eq(&mesh, &manager.get_cached_mesh("w", tile).unwrap()));
        assert!(manager.get_mesh("other", tile).is_none());

        let changed = manager.set_worldspace("other");
        assert!(changed.contains(&tile));
        assert!(manager.get_mesh("other", tile).is_none());
        assert!(manager.set_worldspace("other").is_empty());
    }

    #[test]
    fn test_invalid_heightfield_is_rejected() {
        let manager = TileCachedRecastMeshManager::new(settings());
        let shape = HeightfieldShape::Grid {
            size: 4,
            min_height: 0.0,
            max_height: 0.0,
            heights: vec![0.0; 3],
        };
        assert!(manager.add_heightfield(IVec2::ZERO, 32, shape).is_err());
        assert_eq!(manager.revision(), 0);
    }

    #[test]
    fn test_off_mesh_connections() {
        let manager = TileCachedRecastMeshManager::new(settings());
        let changed = manager.add_off_mesh_connection(
            ObjectId(3),
            Vec3::new(1.0, 0.0, 1.0),
            Vec3::new(40.0, 0.0, 1.0),
            AreaType::Door,
        );
        assert_eq!(sorted(changed), vec![TilePosition::new(0, 0), TilePosition::new(1, 0)]);

        let mesh = manager.get_mesh("", TilePosition::new(1, 0)).unwrap();
        assert_eq!(mesh.data.off_mesh_connections.len(), 1);

        let changed = manager.remove_off_mesh_connections(ObjectId(3));
        assert_eq!(changed.len(), 2);
        assert_eq!(manager.tiles_count(), 0);
        assert!(manager.remove_off_mesh_connections(ObjectId(3)).is_empty());
    }

    #[test]
    fn test_range_materialises_geometry() {
        let manager = TileCachedRecastMeshManager::new(settings());
        let far = TilePosition::new(10, 0);
        manager.add_object(ObjectId(1), cuboid(), at(16.0, 16.0), AreaType::Ground);
        manager.add_object(ObjectId(2), cuboid(), at(336.0, 16.0), AreaType::Ground);
        assert!(manager.has_tile(far));

        let near = TilesPositionsRange::new(TilePosition::new(-2, -2), TilePosition::new(3, 3));
        assert!(manager.set_range(near));
        assert!(!manager.set_range(near));
        assert!(!manager.has_tile(far));
        assert!(manager.has_tile(TilePosition::new(0, 0)));

        // objects outside the range still update the index
        assert!(manager
            .update_object(ObjectId(2), at(335.0, 16.0), AreaType::Ground)
            .unwrap()
            .is_empty());

        let around_far = TilesPositionsRange::new(TilePosition::new(8, -2), TilePosition::new(13, 3));
        assert!(manager.set_range(around_far));
        assert!(manager.has_tile(far));
        assert!(!manager.has_tile(TilePosition::new(0, 0)));
        let mesh = manager.get_mesh("", far).unwrap();
        assert_eq!(mesh.data.mesh.triangle_count(), 12);
    }
}
