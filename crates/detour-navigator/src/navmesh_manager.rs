//! Top level navigation mesh manager
//!
//! Owns one navmesh per agent, turns world mutations into changed tiles and
//! decides on every `update` which tiles the async updater has to build or
//! drop for the current player position.

use crate::async_updater::{AsyncNavMeshUpdater, WaitConditionType};
use crate::change_type::{ChangeTracker, ChangeType};
use crate::loading_listener::LoadingListener;
use crate::navmesh::{NavMesh, NavMeshParams};
use crate::navmesh_cache_item::{
    reset_if_unique, NavMeshCacheItem, ResetResult, SharedNavMeshCacheItem,
};
use crate::navmesh_db::NavMeshDb;
use crate::stats::{StatsSink, UpdaterStats};
use crate::tile_baker::TileBaker;
use crate::tile_cached_recast_mesh_manager::{ChangedTiles, TileCachedRecastMeshManager};
use glam::{Affine3A, IVec2, Vec3};
use navmesh_common::{
    get_tile_position, make_tiles_range_around, should_add_tile, AgentBounds, AreaType,
    CollisionShape, Error, HeightfieldShape, ObjectId, RecastMesh, Result, Settings,
    TilePosition, Version,
};
use std::collections::BTreeMap;
use std::sync::{Arc, PoisonError, RwLock};

pub struct NavMeshManager {
    settings: Settings,
    worldspace: String,
    recast_mesh_manager: Arc<TileCachedRecastMeshManager>,
    updater: AsyncNavMeshUpdater,
    cache: BTreeMap<AgentBounds, SharedNavMeshCacheItem>,
    changed_tiles: BTreeMap<AgentBounds, ChangeTracker>,
    last_recast_mesh_revision: BTreeMap<AgentBounds, u64>,
    player_tiles: BTreeMap<AgentBounds, TilePosition>,
    generation: u64,
}

impl NavMeshManager {
    /// Creates a manager and starts its updater threads
    ///
    /// `db` is used only when the disk cache is enabled in `settings`.
    pub fn new(settings: Settings, baker: Arc<dyn TileBaker>, db: Option<NavMeshDb>) -> Result<Self> {
        settings.validate()?;
        let recast_mesh_manager = Arc::new(TileCachedRecastMeshManager::new(settings.recast.clone()));
        let db = db.filter(|_| settings.enable_nav_mesh_disk_cache);
        let updater = AsyncNavMeshUpdater::new(
            settings.clone(),
            Arc::clone(&recast_mesh_manager),
            baker,
            db,
        )?;
        Ok(Self {
            worldspace: recast_mesh_manager.worldspace(),
            settings,
            recast_mesh_manager,
            updater,
            cache: BTreeMap::new(),
            changed_tiles: BTreeMap::new(),
            last_recast_mesh_revision: BTreeMap::new(),
            player_tiles: BTreeMap::new(),
            generation: 0,
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    pub fn worldspace(&self) -> &str {
        &self.worldspace
    }

    pub fn recast_mesh_manager(&self) -> &Arc<TileCachedRecastMeshManager> {
        &self.recast_mesh_manager
    }

    fn new_cache_item(&mut self) -> Result<SharedNavMeshCacheItem> {
        self.generation += 1;
        let nav_mesh = NavMesh::new(NavMeshParams::from_settings(&self.settings))?;
        Ok(Arc::new(RwLock::new(NavMeshCacheItem::new(nav_mesh, self.generation))))
    }

    /// Drops all geometry and starts every agent's navmesh over
    pub fn set_worldspace(&mut self, worldspace: &str) -> Result<()> {
        if worldspace == self.worldspace {
            return Ok(());
        }
        self.recast_mesh_manager.set_worldspace(worldspace);
        let agents: Vec<_> = self.cache.keys().copied().collect();
        for agent in agents {
            let item = self.new_cache_item()?;
            self.cache.insert(agent, item);
        }
        self.changed_tiles.clear();
        self.last_recast_mesh_revision.clear();
        self.player_tiles.clear();
        self.worldspace = worldspace.to_string();
        Ok(())
    }

    /// Limits tile stores to the area the budget can reach around the player
    pub fn update_bounds(&mut self, player_position: Vec3) {
        let player_tile = get_tile_position(&self.settings.recast, player_position);
        let max_tiles = self.settings.detour.max_tiles_number.max(0) as f32;
        let radius = ((max_tiles / std::f32::consts::PI).sqrt() + 1.0).ceil() as i32;
        if self
            .recast_mesh_manager
            .set_range(make_tiles_range_around(player_tile, radius))
        {
            log::debug!("Tracked tile range moved to {player_tile} with radius {radius}");
        }
    }

    /// Returns false when the agent is already known
    pub fn add_agent(&mut self, agent: &AgentBounds) -> Result<bool> {
        if self.cache.contains_key(agent) {
            return Ok(false);
        }
        let item = self.new_cache_item()?;
        self.cache.insert(*agent, item);
        log::info!("Added agent {agent}");
        Ok(true)
    }

    /// Forgets an agent unless its navmesh is still shared
    ///
    /// Returns false when another owner holds the navmesh; the caller retries
    /// later.
    pub fn reset(&mut self, agent: &AgentBounds) -> bool {
        let mut slot = self.cache.remove(agent);
        match reset_if_unique(&mut slot) {
            ResetResult::Destroyed => {
                self.changed_tiles.remove(agent);
                self.last_recast_mesh_revision.remove(agent);
                self.player_tiles.remove(agent);
                log::info!("Removed agent {agent}");
                true
            }
            ResetResult::StillReferenced => {
                if let Some(item) = slot {
                    self.cache.insert(*agent, item);
                }
                false
            }
            ResetResult::NotFound => true,
        }
    }

    fn add_changed_tiles(&mut self, tiles: &[TilePosition], change_type: ChangeType) {
        for agent in self.cache.keys() {
            let tracker = self.changed_tiles.entry(*agent).or_default();
            for tile in tiles {
                tracker.add_change(*tile, change_type);
            }
        }
    }

    fn apply(&mut self, changed: Option<ChangedTiles>, change_type: ChangeType) -> bool {
        match changed {
            Some(tiles) => {
                self.add_changed_tiles(&tiles, change_type);
                true
            }
            None => false,
        }
    }

    pub fn add_object(
        &mut self,
        id: ObjectId,
        shape: Arc<CollisionShape>,
        transform: Affine3A,
        area_type: AreaType,
    ) -> bool {
        let changed = self
            .recast_mesh_manager
            .add_object(id, shape, transform, area_type);
        self.apply(changed, ChangeType::Add)
    }

    pub fn update_object(&mut self, id: ObjectId, transform: Affine3A, area_type: AreaType) -> bool {
        let changed = self.recast_mesh_manager.update_object(id, transform, area_type);
        self.apply(changed, ChangeType::Update)
    }

    pub fn remove_object(&mut self, id: ObjectId) -> bool {
        let changed = self
            .recast_mesh_manager
            .remove_object(id)
            .map(|removed| removed.changed_tiles);
        self.apply(changed, ChangeType::Remove)
    }

    pub fn add_water(&mut self, cell_position: IVec2, cell_size: i32, level: f32) -> bool {
        let changed = self
            .recast_mesh_manager
            .add_water(cell_position, cell_size, level);
        self.apply(changed, ChangeType::Add)
    }

    pub fn remove_water(&mut self, cell_position: IVec2) -> bool {
        let changed = self.recast_mesh_manager.remove_water(cell_position);
        self.apply(changed, ChangeType::Remove)
    }

    pub fn add_heightfield(
        &mut self,
        cell_position: IVec2,
        cell_size: i32,
        shape: HeightfieldShape,
    ) -> Result<bool> {
        let changed = self
            .recast_mesh_manager
            .add_heightfield(cell_position, cell_size, shape)?;
        Ok(self.apply(changed, ChangeType::Add))
    }

    pub fn remove_heightfield(&mut self, cell_position: IVec2) -> bool {
        let changed = self.recast_mesh_manager.remove_heightfield(cell_position);
        self.apply(changed, ChangeType::Remove)
    }

    pub fn add_off_mesh_connection(&mut self, id: ObjectId, start: Vec3, end: Vec3, area_type: AreaType) {
        let changed = self
            .recast_mesh_manager
            .add_off_mesh_connection(id, start, end, area_type);
        self.add_changed_tiles(&changed, ChangeType::Add);
    }

    pub fn remove_off_mesh_connections(&mut self, id: ObjectId) {
        let changed = self.recast_mesh_manager.remove_off_mesh_connections(id);
        self.add_changed_tiles(&changed, ChangeType::Remove);
    }

    /// Posts the tiles an agent's navmesh needs for the player position
    ///
    /// Does nothing when neither the geometry revision nor the player tile
    /// changed since the previous call for this agent.
    pub fn update(&mut self, player_position: Vec3, agent: &AgentBounds) -> Result<()> {
        let Some(cached) = self.cache.get(agent).cloned() else {
            return Err(Error::InvalidArgument(format!("agent {agent} is not registered")));
        };
        let player_tile = get_tile_position(&self.settings.recast, player_position);
        let revision = self.recast_mesh_manager.revision();
        if self.last_recast_mesh_revision.get(agent) == Some(&revision)
            && self.player_tiles.get(agent) == Some(&player_tile)
        {
            return Ok(());
        }
        self.last_recast_mesh_revision.insert(*agent, revision);
        self.player_tiles.insert(*agent, player_tile);

        let changed = self.changed_tiles.remove(agent).unwrap_or_default();
        let mut tiles_to_post: BTreeMap<TilePosition, ChangeType> = BTreeMap::new();
        {
            let item = cached.read().unwrap_or_else(PoisonError::into_inner);
            for (tile, change_type) in changed.iter() {
                if item.has_tile(tile) {
                    tiles_to_post
                        .entry(tile)
                        .and_modify(|existing| *existing = existing.merge(change_type))
                        .or_insert(change_type);
                }
            }

            let max_tiles = self
                .settings
                .detour
                .max_tiles_number
                .min(item.nav_mesh().max_tiles());
            self.recast_mesh_manager.for_each_tile(|tile, manager| {
                if tiles_to_post.contains_key(&tile) {
                    return;
                }
                let should_add = should_add_tile(tile, player_tile, max_tiles);
                let present = item.has_tile(tile);
                if should_add && !present {
                    let change_type = if item.is_empty_tile(tile) {
                        ChangeType::Update
                    } else {
                        ChangeType::Add
                    };
                    tiles_to_post.insert(tile, change_type);
                } else if !should_add && present {
                    tiles_to_post.insert(tile, ChangeType::Mixed);
                } else {
                    manager.report_nav_mesh_change(manager.version(), Version::new(0, 0));
                }
            });

            // loaded tiles whose store left the tracked range
            for tile in item.present_tiles() {
                if !tiles_to_post.contains_key(&tile) && !should_add_tile(tile, player_tile, max_tiles) {
                    tiles_to_post.insert(tile, ChangeType::Mixed);
                }
            }
        }

        self.updater
            .post(agent, &cached, player_tile, &self.worldspace, &tiles_to_post);
        log::debug!(
            "Posted {} tiles for agent {agent} at player tile {player_tile}, revision {revision}",
            tiles_to_post.len()
        );
        Ok(())
    }

    pub fn wait(&self, listener: &mut dyn LoadingListener, condition: WaitConditionType) {
        self.updater.wait(listener, condition);
    }

    pub fn get_nav_mesh(&self, agent: &AgentBounds) -> Option<SharedNavMeshCacheItem> {
        self.cache.get(agent).cloned()
    }

    /// Last snapshots of all tile stores, possibly stale
    pub fn get_recast_mesh_tiles(&self) -> BTreeMap<TilePosition, Arc<RecastMesh>> {
        let mut result = BTreeMap::new();
        self.recast_mesh_manager.for_each_tile(|tile, manager| {
            if let Some(mesh) = manager.get_cached_mesh() {
                result.insert(tile, mesh);
            }
        });
        result
    }

    /// Tile stores changed since their mesh was last applied to a navmesh
    pub fn outdated_tiles_count(&self) -> usize {
        let mut count = 0;
        self.recast_mesh_manager.for_each_tile(|_, manager| {
            if !manager.is_nav_mesh_up_to_date() {
                count += 1;
            }
        });
        count
    }

    pub fn stats(&self) -> UpdaterStats {
        self.updater.stats()
    }

    pub fn report_stats(&self, frame: u64, sink: &mut dyn StatsSink) {
        self.updater.stats().report(frame, sink);
    }

    /// Runs a closure against the persistent store if one is in use
    pub fn with_db<R>(&self, f: impl FnOnce(&mut NavMeshDb) -> R) -> Option<R> {
        self.updater.with_db(f)
    }
}
