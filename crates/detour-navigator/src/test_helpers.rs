//! Shared fixtures for the updater and manager scenarios

use crate::loading_listener::LoadingListener;
use crate::navmesh::{NavMesh, NavMeshParams};
use crate::navmesh_cache_item::{NavMeshCacheItem, SharedNavMeshCacheItem};
use crate::prepared_navmesh_data::PreparedNavMeshData;
use crate::tile_baker::{SurfaceTileBaker, TileBaker};
use glam::Vec3;
use navmesh_common::{
    AgentBounds, DetourSettings, Error, RecastMeshData, RecastSettings, Result, Settings,
    TilePosition,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;

/// 32 world unit tiles with a 2 unit border
pub fn settings() -> Settings {
    Settings::default()
        .with_recast(RecastSettings {
            cell_size: 0.5,
            tile_size: 64,
            border_size: 4,
            ..Default::default()
        })
        .with_detour(DetourSettings {
            max_tiles_number: 64,
            ..Default::default()
        })
        .with_updater_threads(2)
        .with_min_update_interval(Duration::ZERO)
        .with_tile_cache_size(16 * 1024 * 1024)
}

pub fn agent() -> AgentBounds {
    AgentBounds::aabb(Vec3::new(0.3, 0.9, 0.3))
}

pub fn nav_mesh_item(settings: &Settings, generation: u64) -> Result<SharedNavMeshCacheItem> {
    let nav_mesh = NavMesh::new(NavMeshParams::from_settings(settings))?;
    Ok(Arc::new(RwLock::new(NavMeshCacheItem::new(nav_mesh, generation))))
}

/// Center of a tile in world coordinates
pub fn tile_center(settings: &Settings, tile: TilePosition) -> Vec3 {
    let size = navmesh_common::get_tile_size(&settings.recast);
    Vec3::new((tile.x as f32 + 0.5) * size, 0.0, (tile.y as f32 + 0.5) * size)
}

/// Reference baker counting its invocations
#[derive(Debug, Default)]
pub struct CountingBaker {
    pub calls: AtomicUsize,
}

impl CountingBaker {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl TileBaker for CountingBaker {
    fn bake(
        &self,
        settings: &RecastSettings,
        agent: &AgentBounds,
        tile: TilePosition,
        data: &RecastMeshData,
        previous: Option<&PreparedNavMeshData>,
    ) -> Result<Option<PreparedNavMeshData>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        SurfaceTileBaker.bake(settings, agent, tile, data, previous)
    }
}

/// Baker that fails for every tile
#[derive(Debug, Default)]
pub struct FailingBaker;

impl TileBaker for FailingBaker {
    fn bake(
        &self,
        _settings: &RecastSettings,
        _agent: &AgentBounds,
        tile: TilePosition,
        _data: &RecastMeshData,
        _previous: Option<&PreparedNavMeshData>,
    ) -> Result<Option<PreparedNavMeshData>> {
        Err(Error::Bake(format!("degenerate geometry in tile {tile}")))
    }
}

#[derive(Debug, Default)]
pub struct RecordingListener {
    pub label: Option<String>,
    pub range: Option<usize>,
    pub progress: Vec<usize>,
}

impl LoadingListener for RecordingListener {
    fn set_label(&mut self, label: &str) {
        self.label = Some(label.to_string());
    }

    fn set_progress_range(&mut self, range: usize) {
        self.range = Some(range);
    }

    fn set_progress(&mut self, value: usize) {
        self.progress.push(value);
    }
}
