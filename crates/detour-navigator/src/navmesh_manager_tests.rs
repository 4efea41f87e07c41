//! End to end scenarios for the navmesh manager

use crate::async_updater::WaitConditionType;
use crate::loading_listener::NoopLoadingListener;
use crate::navmesh_db::NavMeshDb;
use crate::navmesh_manager::NavMeshManager;
use crate::test_helpers::*;
use crate::tile_baker::SurfaceTileBaker;
use glam::{Affine3A, IVec2, Vec3};
use navmesh_common::{
    AreaType, CollisionShape, Error, HeightfieldShape, ObjectId, Result, Settings, TilePosition,
};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

const ORIGIN: TilePosition = TilePosition { x: 0, y: 0 };

fn manager(settings: Settings) -> Result<NavMeshManager> {
    let mut manager = NavMeshManager::new(settings, Arc::new(SurfaceTileBaker), None)?;
    assert!(manager.add_agent(&agent())?);
    manager.set_worldspace("w")?;
    Ok(manager)
}

/// Flat ground touching only the origin tile
fn add_ground(manager: &mut NavMeshManager) -> Result<()> {
    assert!(manager.add_heightfield(IVec2::new(1, 1), 8, HeightfieldShape::Flat(0.0))?);
    Ok(())
}

fn wait_all(manager: &NavMeshManager) {
    manager.wait(&mut NoopLoadingListener, WaitConditionType::AllJobsDone);
}

fn has_tile(manager: &NavMeshManager, tile: TilePosition) -> bool {
    manager
        .get_nav_mesh(&agent())
        .is_some_and(|item| item.read().unwrap().get_tile_ref_at(tile) != 0)
}

#[test]
fn test_update_builds_tiles_around_player() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;

    manager.update(tile_center(&settings, ORIGIN), &agent())?;
    wait_all(&manager);

    assert!(has_tile(&manager, ORIGIN));
    assert!(!has_tile(&manager, TilePosition::new(1, 0)));
    assert_eq!(manager.stats().pushed, 1);
    Ok(())
}

#[test]
fn test_update_without_changes_posts_nothing() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;

    let position = tile_center(&settings, ORIGIN);
    manager.update(position, &agent())?;
    wait_all(&manager);
    let pushed = manager.stats().pushed;

    manager.update(position, &agent())?;
    manager.update(position + Vec3::new(1.0, 0.0, 1.0), &agent())?;
    assert_eq!(manager.stats().pushed, pushed);
    Ok(())
}

#[test]
fn test_update_for_unknown_agent_fails() -> Result<()> {
    let mut manager = NavMeshManager::new(settings(), Arc::new(SurfaceTileBaker), None)?;
    let result = manager.update(Vec3::ZERO, &agent());
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
    Ok(())
}

#[test]
fn test_add_agent_twice() -> Result<()> {
    let mut manager = manager(settings())?;
    assert!(!manager.add_agent(&agent())?);
    Ok(())
}

#[test]
fn test_reset_waits_for_other_owners() -> Result<()> {
    let mut manager = manager(settings())?;

    let held = manager.get_nav_mesh(&agent());
    assert!(held.is_some());
    assert!(!manager.reset(&agent()));
    assert!(manager.get_nav_mesh(&agent()).is_some());

    drop(held);
    assert!(manager.reset(&agent()));
    assert!(manager.get_nav_mesh(&agent()).is_none());
    assert!(manager.reset(&agent()));
    Ok(())
}

#[test]
fn test_removed_geometry_removes_tile() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    let position = tile_center(&settings, ORIGIN);
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert!(has_tile(&manager, ORIGIN));

    assert!(manager.remove_heightfield(IVec2::new(1, 1)));
    assert!(!manager.remove_heightfield(IVec2::new(1, 1)));
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert!(!has_tile(&manager, ORIGIN));
    Ok(())
}

#[test]
fn test_far_player_drops_tiles_out_of_budget() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    manager.update(tile_center(&settings, ORIGIN), &agent())?;
    wait_all(&manager);
    assert!(has_tile(&manager, ORIGIN));

    manager.update(tile_center(&settings, TilePosition::new(10, 0)), &agent())?;
    wait_all(&manager);
    assert!(!has_tile(&manager, ORIGIN));

    manager.update(tile_center(&settings, ORIGIN), &agent())?;
    wait_all(&manager);
    assert!(has_tile(&manager, ORIGIN));
    // the rebuilt tile comes from the tile cache
    assert_eq!(manager.stats().cache.hit_count, 1);
    Ok(())
}

#[test]
fn test_moved_object_rebuilds_its_tiles() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    let shape = Arc::new(CollisionShape::plane("floor", 4.0)?);
    let id = ObjectId(7);
    assert!(manager.add_object(
        id,
        shape,
        Affine3A::from_translation(Vec3::new(16.0, 0.0, 16.0)),
        AreaType::Ground
    ));
    let position = tile_center(&settings, ORIGIN);
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert!(has_tile(&manager, ORIGIN));

    let moved = Affine3A::from_translation(Vec3::new(48.0, 0.0, 16.0));
    assert!(manager.update_object(id, moved, AreaType::Ground));
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert!(!has_tile(&manager, ORIGIN));
    assert!(has_tile(&manager, TilePosition::new(1, 0)));

    assert!(manager.remove_object(id));
    assert!(!manager.remove_object(id));
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert!(!has_tile(&manager, TilePosition::new(1, 0)));
    Ok(())
}

#[test]
fn test_worldspace_switch_starts_over() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    manager.update(tile_center(&settings, ORIGIN), &agent())?;
    wait_all(&manager);

    let old = manager.get_nav_mesh(&agent()).unwrap();
    let old_generation = old.read().unwrap().generation();

    manager.set_worldspace("other")?;
    assert_eq!(manager.worldspace(), "other");
    let new = manager.get_nav_mesh(&agent()).unwrap();
    assert!(!Arc::ptr_eq(&old, &new));
    assert!(new.read().unwrap().generation() > old_generation);
    assert!(!has_tile(&manager, ORIGIN));
    assert!(manager.get_recast_mesh_tiles().is_empty());
    Ok(())
}

#[test]
fn test_update_bounds_limits_tracked_tiles() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    manager.update_bounds(tile_center(&settings, TilePosition::new(100, 100)));
    add_ground(&mut manager)?;
    assert_eq!(manager.recast_mesh_manager().tiles_count(), 0);

    manager.update_bounds(tile_center(&settings, ORIGIN));
    assert_eq!(manager.recast_mesh_manager().tiles_count(), 1);
    Ok(())
}

#[test]
fn test_recast_mesh_tiles_after_build() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    manager.update(tile_center(&settings, ORIGIN), &agent())?;
    wait_all(&manager);

    let tiles = manager.get_recast_mesh_tiles();
    assert_eq!(tiles.len(), 1);
    assert_eq!(tiles[&ORIGIN].data.flat_heightfields.len(), 1);
    Ok(())
}

#[test]
fn test_report_stats() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    manager.update(tile_center(&settings, ORIGIN), &agent())?;
    wait_all(&manager);

    let mut sink: BTreeMap<String, f64> = BTreeMap::new();
    manager.report_stats(1, &mut sink);
    assert_eq!(sink["NavMesh Pushed"], 1.0);
    assert_eq!(sink["NavMesh Jobs"], 0.0);
    assert_eq!(sink["NavMesh UsedTiles"], 1.0);
    Ok(())
}

#[test]
fn test_store_is_ignored_when_disk_cache_is_disabled() -> Result<()> {
    let settings = settings().with_disk_cache(false);
    let db = NavMeshDb::open_in_memory(settings.max_db_file_size)?;
    let manager = NavMeshManager::new(settings, Arc::new(SurfaceTileBaker), Some(db))?;
    assert!(manager.with_db(|db| db.tiles_count()).is_none());
    Ok(())
}

#[test]
fn test_invalid_settings_are_rejected() {
    let settings = settings().with_max_tiles_number(0);
    let result = NavMeshManager::new(settings, Arc::new(SurfaceTileBaker), None);
    assert!(matches!(result, Err(Error::InvalidArgument(_))));
}

#[test]
fn test_teleport_with_update_bounds_evicts_loaded_tiles() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    let origin = tile_center(&settings, ORIGIN);
    manager.update_bounds(origin);
    add_ground(&mut manager)?;
    manager.update(origin, &agent())?;
    wait_all(&manager);
    assert!(has_tile(&manager, ORIGIN));

    let far = tile_center(&settings, TilePosition::new(100, 0));
    manager.update_bounds(far);
    assert_eq!(manager.recast_mesh_manager().tiles_count(), 0);
    manager.update(far, &agent())?;
    wait_all(&manager);
    assert!(!has_tile(&manager, ORIGIN));
    Ok(())
}

#[test]
fn test_worldspace_switch_with_delayed_job() -> Result<()> {
    let settings = settings().with_min_update_interval(Duration::from_millis(300));
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    let position = tile_center(&settings, ORIGIN);
    manager.update(position, &agent())?;
    wait_all(&manager);

    assert!(manager.add_water(IVec2::new(1, 1), 8, -1.0));
    manager.update(position, &agent())?;
    assert_eq!(manager.stats().delayed, 1);

    manager.set_worldspace("other")?;
    add_ground(&mut manager)?;
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert!(has_tile(&manager, ORIGIN));
    Ok(())
}

#[test]
fn test_outdated_tiles_until_built() -> Result<()> {
    let settings = settings();
    let mut manager = manager(settings.clone())?;
    add_ground(&mut manager)?;
    assert_eq!(manager.outdated_tiles_count(), 1);

    let position = tile_center(&settings, ORIGIN);
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert_eq!(manager.outdated_tiles_count(), 0);

    assert!(manager.add_water(IVec2::new(1, 1), 8, -1.0));
    assert_eq!(manager.outdated_tiles_count(), 1);
    manager.update(position, &agent())?;
    wait_all(&manager);
    assert_eq!(manager.outdated_tiles_count(), 0);
    Ok(())
}
