//! Per-tile store with a lazily rebuilt mesh snapshot

use crate::recast_mesh_manager::{RecastMeshManager, RecastMeshObject};
use glam::{Affine3A, IVec2};
use navmesh_common::{
    AreaType, CellWater, HeightfieldShape, ObjectId, OffMeshConnection, RecastMesh, TileBounds,
    TilePosition, Version,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Wraps a tile's `RecastMeshManager` with a cached `RecastMesh`
///
/// Mutations flip `outdated` while holding the store lock; readers only take
/// the lock when the flag is set, so repeated reads between mutations share
/// one snapshot.
#[derive(Debug)]
pub struct CachedRecastMeshManager {
    manager: Mutex<RecastMeshManager>,
    outdated: AtomicBool,
    cached: Mutex<Option<Arc<RecastMesh>>>,
}

impl CachedRecastMeshManager {
    pub fn new(tile: TilePosition, bounds: TileBounds, generation: u64) -> Self {
        Self {
            manager: Mutex::new(RecastMeshManager::new(tile, bounds, generation)),
            outdated: AtomicBool::new(true),
            cached: Mutex::new(None),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RecastMeshManager> {
        self.manager.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_cached(&self) -> MutexGuard<'_, Option<Arc<RecastMesh>>> {
        self.cached.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn mutate<T>(&self, f: impl FnOnce(&mut RecastMeshManager) -> T, changed: impl FnOnce(&T) -> bool) -> T {
        let mut manager = self.lock();
        let result = f(&mut *manager);
        if changed(&result) {
            self.outdated.store(true, Ordering::Release);
        }
        result
    }

    pub fn add_object(&self, id: ObjectId, object: RecastMeshObject) -> bool {
        self.mutate(|m| m.add_object(id, object), |added| *added)
    }

    pub fn update_object(&self, id: ObjectId, transform: &Affine3A, area_type: AreaType) -> bool {
        self.mutate(|m| m.update_object(id, transform, area_type), |updated| *updated)
    }

    pub fn remove_object(&self, id: ObjectId) -> Option<RecastMeshObject> {
        self.mutate(|m| m.remove_object(id), Option::is_some)
    }

    pub fn add_water(&self, water: CellWater) -> bool {
        self.mutate(|m| m.add_water(water), |added| *added)
    }

    pub fn remove_water(&self, cell_position: IVec2) -> Option<CellWater> {
        self.mutate(|m| m.remove_water(cell_position), Option::is_some)
    }

    pub fn add_heightfield(&self, cell_position: IVec2, cell_size: i32, shape: HeightfieldShape) -> bool {
        self.mutate(|m| m.add_heightfield(cell_position, cell_size, shape), |added| *added)
    }

    pub fn remove_heightfield(&self, cell_position: IVec2) -> bool {
        self.mutate(|m| m.remove_heightfield(cell_position), |removed| *removed)
    }

    pub fn add_off_mesh_connection(&self, id: ObjectId, connection: OffMeshConnection) {
        self.mutate(|m| m.add_off_mesh_connection(id, connection), |_| true)
    }

    pub fn remove_off_mesh_connections(&self, id: ObjectId) -> bool {
        self.mutate(|m| m.remove_off_mesh_connections(id), |removed| *removed)
    }

    /// Current snapshot, rebuilt only when a mutation happened since the last one
    pub fn get_mesh(&self) -> Arc<RecastMesh> {
        if !self.outdated.load(Ordering::Acquire) {
            if let Some(mesh) = self.lock_cached().as_ref() {
                return Arc::clone(mesh);
            }
        }

        let manager = self.lock();
        let mut cached = self.lock_cached();
        if self.outdated.swap(false, Ordering::AcqRel) || cached.is_none() {
            *cached = Some(Arc::new(manager.get_mesh()));
        }
        match cached.as_ref() {
            Some(mesh) => Arc::clone(mesh),
            None => Arc::new(manager.get_mesh()),
        }
    }

    /// Last snapshot without forcing a rebuild; may be stale or absent
    pub fn get_cached_mesh(&self) -> Option<Arc<RecastMesh>> {
        self.lock_cached().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn version(&self) -> Version {
        self.lock().version()
    }

    pub fn report_nav_mesh_change(&self, recast_mesh_version: Version, nav_mesh_version: Version) {
        self.lock()
            .report_nav_mesh_change(recast_mesh_version, nav_mesh_version);
    }

    pub fn is_nav_mesh_up_to_date(&self) -> bool {
        self.lock().is_nav_mesh_up_to_date()
    }
}
