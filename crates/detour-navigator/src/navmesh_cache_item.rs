//! Per agent navmesh in progress

use crate::navmesh::{NavMesh, TileRef};
use crate::tile_cache::TileCacheValue;
use navmesh_common::{TilePosition, Version};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Arc, RwLock};

/// Outcome of applying one tile to a navmesh
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UpdateNavMeshStatus {
    /// Nothing to do, the tile was absent
    Ignored,
    Removed,
    Added,
    Replaced,
    /// The same data is already in the navmesh
    Unchanged,
    /// The tile was absent and could not be added
    Failed,
    /// The old tile was removed but the new one could not be added
    Lost,
}

impl UpdateNavMeshStatus {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Removed | Self::Added | Self::Replaced)
    }
}

#[derive(Debug)]
struct UsedTile {
    tile_ref: TileRef,
    value: TileCacheValue,
}

/// Live navmesh of one agent with its tile bookkeeping
///
/// Every tile added to the navmesh is backed by a tile cache checkout, so
/// cached data in use is never evicted. The version grows on every change.
#[derive(Debug)]
pub struct NavMeshCacheItem {
    nav_mesh: NavMesh,
    version: Version,
    used_tiles: BTreeMap<TilePosition, UsedTile>,
    empty_tiles: BTreeSet<TilePosition>,
}

impl NavMeshCacheItem {
    pub fn new(nav_mesh: NavMesh, generation: u64) -> Self {
        Self {
            nav_mesh,
            version: Version::new(generation, 0),
            used_tiles: BTreeMap::new(),
            empty_tiles: BTreeSet::new(),
        }
    }

    pub fn nav_mesh(&self) -> &NavMesh {
        &self.nav_mesh
    }

    pub fn version(&self) -> Version {
        self.version
    }

    pub fn generation(&self) -> u64 {
        self.version.generation
    }

    pub fn get_tile_ref_at(&self, tile: TilePosition) -> TileRef {
        self.nav_mesh.get_tile_ref_at(tile.x, tile.y, 0)
    }

    pub fn has_tile(&self, tile: TilePosition) -> bool {
        self.get_tile_ref_at(tile) != 0
    }

    pub fn is_empty_tile(&self, tile: TilePosition) -> bool {
        self.empty_tiles.contains(&tile)
    }

    /// Positions of the tiles present in the navmesh
    pub fn present_tiles(&self) -> impl Iterator<Item = TilePosition> + '_ {
        self.used_tiles.keys().copied()
    }

    pub fn update_tile(&mut self, tile: TilePosition, value: TileCacheValue) -> UpdateNavMeshStatus {
        let removed = match self.used_tiles.get(&tile) {
            Some(used) if Arc::ptr_eq(used.value.data(), value.data()) => {
                return UpdateNavMeshStatus::Unchanged;
            }
            Some(used) => self.nav_mesh.remove_tile(used.tile_ref).is_ok(),
            None => false,
        };
        if removed {
            self.used_tiles.remove(&tile);
        }
        self.empty_tiles.remove(&tile);

        let status = match self.nav_mesh.add_tile(tile.x, tile.y, 0, Arc::clone(value.data())) {
            Ok(tile_ref) => {
                self.used_tiles.insert(tile, UsedTile { tile_ref, value });
                if removed {
                    UpdateNavMeshStatus::Replaced
                } else {
                    UpdateNavMeshStatus::Added
                }
            }
            Err(e) => {
                log::warn!("Failed to add navmesh tile {tile}: {e}");
                if removed {
                    UpdateNavMeshStatus::Lost
                } else {
                    UpdateNavMeshStatus::Failed
                }
            }
        };
        if removed || status.is_success() {
            self.version.revision += 1;
        }
        status
    }

    pub fn remove_tile(&mut self, tile: TilePosition) -> UpdateNavMeshStatus {
        self.empty_tiles.remove(&tile);
        let Some(used) = self.used_tiles.remove(&tile) else {
            return UpdateNavMeshStatus::Ignored;
        };
        if let Err(e) = self.nav_mesh.remove_tile(used.tile_ref) {
            log::warn!("Failed to remove navmesh tile {tile}: {e}");
            return UpdateNavMeshStatus::Ignored;
        }
        self.version.revision += 1;
        UpdateNavMeshStatus::Removed
    }

    /// Removes a tile and remembers that its geometry bakes to nothing
    pub fn mark_as_empty(&mut self, tile: TilePosition) -> UpdateNavMeshStatus {
        let status = self.remove_tile(tile);
        self.empty_tiles.insert(tile);
        status
    }
}

pub type GuardedNavMeshCacheItem = RwLock<NavMeshCacheItem>;
pub type SharedNavMeshCacheItem = Arc<GuardedNavMeshCacheItem>;

/// Result of dropping a shared navmesh if no one else holds it
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetResult {
    Destroyed,
    StillReferenced,
    NotFound,
}

/// Drops the handle in `slot` when it is the last strong owner
///
/// The strong reference is released and then reacquired through a weak one.
/// If another owner kept it alive meanwhile, the handle goes back into
/// `slot` and the caller retries later.
pub fn reset_if_unique(slot: &mut Option<SharedNavMeshCacheItem>) -> ResetResult {
    let Some(item) = slot.take() else {
        return ResetResult::NotFound;
    };
    let weak = Arc::downgrade(&item);
    drop(item);
    match weak.upgrade() {
        Some(item) => {
            *slot = Some(item);
            ResetResult::StillReferenced
        }
        None => ResetResult::Destroyed,
    }
}
