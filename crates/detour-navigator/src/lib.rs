//! Incremental navigation mesh tile building
//!
//! This crate keeps navigation meshes for several agent sizes up to date
//! while world geometry is added, moved and removed at runtime. Only tiles
//! touched by a change are rebuilt, each (agent, tile) pair is built by at
//! most one worker at a time, and baked tiles are reused from an in-memory
//! cache or an optional sqlite store when their input did not change.
//!
//! # Layers
//!
//! - [`TileCachedRecastMeshManager`]: maps geometry to the tiles it overlaps
//!   and keeps a [`CachedRecastMeshManager`] per tile
//! - [`NavMeshManager`]: tracks changed tiles per agent and decides what to
//!   build for the player position
//! - [`AsyncNavMeshUpdater`]: worker pool resolving jobs through the
//!   [`TileCache`], the [`NavMeshDb`] and finally a [`TileBaker`]
//!
//! # Example
//!
//! ```rust,no_run
//! use detour_navigator::{NavMeshManager, NoopLoadingListener, SurfaceTileBaker, WaitConditionType};
//! use glam::{IVec2, Vec3};
//! use navmesh_common::{AgentBounds, HeightfieldShape, Settings};
//! use std::sync::Arc;
//!
//! # fn example() -> navmesh_common::Result<()> {
//! let settings = Settings::default();
//! let cell_size = settings.recast.tile_size;
//! let mut manager = NavMeshManager::new(settings, Arc::new(SurfaceTileBaker), None)?;
//!
//! let agent = AgentBounds::aabb(Vec3::new(0.3, 0.9, 0.3));
//! manager.add_agent(&agent)?;
//! manager.set_worldspace("world")?;
//! manager.add_heightfield(IVec2::ZERO, cell_size, HeightfieldShape::Flat(0.0))?;
//!
//! manager.update(Vec3::ZERO, &agent)?;
//! manager.wait(&mut NoopLoadingListener, WaitConditionType::AllJobsDone);
//!
//! let stats = manager.stats();
//! println!("cache hits: {}", stats.cache.hit_count);
//! # Ok(())
//! # }
//! ```

pub mod async_updater;
pub mod cached_recast_mesh_manager;
pub mod change_type;
pub mod io;
pub mod loading_listener;
pub mod navmesh;
pub mod navmesh_cache_item;
pub mod navmesh_db;
pub mod navmesh_manager;
pub mod prepared_navmesh_data;
pub mod recast_mesh_builder;
pub mod recast_mesh_manager;
pub mod stats;
pub mod tile_baker;
pub mod tile_cache;
pub mod tile_cached_recast_mesh_manager;

#[cfg(test)]
mod test_helpers;


#[cfg(test)]
mod navmesh_manager_tests;

pub use async_updater::{AsyncNavMeshUpdater, WaitConditionType};
pub use cached_recast_mesh_manager::CachedRecastMeshManager;
pub use change_type::{ChangeTracker, ChangeType};
pub use io::{Lz4Compressor, TileDataCompressor};
pub use loading_listener::{LoadingListener, NoopLoadingListener};
pub use navmesh::{NavMesh, NavMeshParams, TileRef};
pub use navmesh_cache_item::{
    GuardedNavMeshCacheItem, NavMeshCacheItem, ResetResult, SharedNavMeshCacheItem,
    UpdateNavMeshStatus,
};
pub use navmesh_db::{DbError, NavMeshDb};
pub use navmesh_manager::NavMeshManager;
pub use prepared_navmesh_data::PreparedNavMeshData;
pub use recast_mesh_manager::RecastMeshManager;
pub use stats::{StatsSink, UpdaterStats};
pub use tile_baker::{SurfaceTileBaker, TileBaker};
pub use tile_cache::{TileCache, TileCacheStats, TileCacheValue};
pub use tile_cached_recast_mesh_manager::{ChangedTiles, RemovedObject, TileCachedRecastMeshManager};
