//! Navigator configuration
//!
//! All knobs are plain data passed by reference into the orchestrator and the
//! build scheduler; nothing here is process-global.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Parameters of the tile grid and of the external bake step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecastSettings {
    /// Horizontal voxel size in world units
    pub cell_size: f32,
    /// Vertical voxel size in world units
    pub cell_height: f32,
    /// Maximum walkable slope in degrees
    pub max_slope: f32,
    /// Maximum ledge height an agent can step over, in world units
    pub max_climb: f32,
    /// Tile border in cells; geometry this close to a tile also belongs to it
    pub border_size: i32,
    /// Tile edge length in cells
    pub tile_size: i32,
    pub max_edge_len: i32,
    pub max_simplification_error: f32,
    pub max_verts_per_poly: i32,
    pub region_min_area: i32,
    pub region_merge_area: i32,
    pub detail_sample_dist: f32,
    pub detail_sample_max_error: f32,
    /// Fraction of the agent height that may stay under water while walking
    pub swim_height_scale: f32,
}

impl Default for RecastSettings {
    fn default() -> Self {
        Self {
            cell_size: 0.25,
            cell_height: 0.1,
            max_slope: 45.0,
            max_climb: 0.5,
            border_size: 16,
            tile_size: 128,
            max_edge_len: 12,
            max_simplification_error: 1.3,
            max_verts_per_poly: 6,
            region_min_area: 8,
            region_merge_area: 20,
            detail_sample_dist: 6.0,
            detail_sample_max_error: 1.0,
            swim_height_scale: 1.0,
        }
    }
}

/// Limits of the live navigation meshes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetourSettings {
    pub max_polys: i32,
    /// Tile budget around the player
    pub max_tiles_number: i32,
    pub max_nav_mesh_query_nodes: i32,
    pub max_polygon_path_size: usize,
    pub max_smooth_path_size: usize,
}

impl Default for DetourSettings {
    fn default() -> Self {
        Self {
            max_polys: 4096,
            max_tiles_number: 512,
            max_nav_mesh_query_nodes: 2048,
            max_polygon_path_size: 1024,
            max_smooth_path_size: 1024,
        }
    }
}

/// Complete navigator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub recast: RecastSettings,
    pub detour: DetourSettings,
    /// Look up and store baked tiles in the persistent store when one is given
    pub enable_nav_mesh_disk_cache: bool,
    /// Write freshly baked tiles and shapes into the persistent store
    pub write_to_nav_mesh_db: bool,
    /// Byte budget of the in-memory tile cache
    pub max_nav_mesh_tiles_cache_size: usize,
    /// Worker threads of the async updater, 0 picks hardware concurrency - 1
    pub async_nav_mesh_updater_threads: usize,
    /// Minimum delay between two builds of the same tile for the same agent
    #[serde(with = "duration_millis")]
    pub min_update_interval: Duration,
    /// Tile distance around the player a loading screen waits for
    pub wait_until_min_distance_to_player: i32,
    /// Format version of baked tiles; stored tiles with another version are misses
    pub nav_mesh_version: i32,
    /// Size cap of the persistent store in bytes
    pub max_db_file_size: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            recast: RecastSettings::default(),
            detour: DetourSettings::default(),
            enable_nav_mesh_disk_cache: true,
            write_to_nav_mesh_db: true,
            max_nav_mesh_tiles_cache_size: 256 * 1024 * 1024,
            async_nav_mesh_updater_threads: 0,
            min_update_interval: Duration::from_millis(250),
            wait_until_min_distance_to_player: 5,
            nav_mesh_version: 1,
            max_db_file_size: 512 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn with_recast(mut self, recast: RecastSettings) -> Self {
        self.recast = recast;
        self
    }

    pub fn with_detour(mut self, detour: DetourSettings) -> Self {
        self.detour = detour;
        self
    }

    pub fn with_max_tiles_number(mut self, max_tiles_number: i32) -> Self {
        self.detour.max_tiles_number = max_tiles_number;
        self
    }

    pub fn with_tile_cache_size(mut self, max_nav_mesh_tiles_cache_size: usize) -> Self {
        self.max_nav_mesh_tiles_cache_size = max_nav_mesh_tiles_cache_size;
        self
    }

    pub fn with_updater_threads(mut self, threads: usize) -> Self {
        self.async_nav_mesh_updater_threads = threads;
        self
    }

    pub fn with_min_update_interval(mut self, min_update_interval: Duration) -> Self {
        self.min_update_interval = min_update_interval;
        self
    }

    pub fn with_write_to_db(mut self, write_to_nav_mesh_db: bool) -> Self {
        self.write_to_nav_mesh_db = write_to_nav_mesh_db;
        self
    }

    pub fn with_disk_cache(mut self, enable_nav_mesh_disk_cache: bool) -> Self {
        self.enable_nav_mesh_disk_cache = enable_nav_mesh_disk_cache;
        self
    }

    pub fn with_nav_mesh_version(mut self, nav_mesh_version: i32) -> Self {
        self.nav_mesh_version = nav_mesh_version;
        self
    }

    pub fn with_wait_distance(mut self, wait_until_min_distance_to_player: i32) -> Self {
        self.wait_until_min_distance_to_player = wait_until_min_distance_to_player;
        self
    }

    /// Number of worker threads the async updater should start
    pub fn updater_threads(&self) -> usize {
        if self.async_nav_mesh_updater_threads > 0 {
            return self.async_nav_mesh_updater_threads;
        }
        std::thread::available_parallelism()
            .map(|n| n.get().saturating_sub(1))
            .unwrap_or(1)
            .max(1)
    }

    pub fn validate(&self) -> Result<()> {
        let recast = &self.recast;
        if recast.cell_size <= 0.0 {
            return Err(invalid("cell size must be positive"));
        }
        if recast.cell_height <= 0.0 {
            return Err(invalid("cell height must be positive"));
        }
        if recast.tile_size <= 0 {
            return Err(invalid("tile size must be positive"));
        }
        if recast.border_size < 0 {
            return Err(invalid("border size cannot be negative"));
        }
        if !(0.0..=90.0).contains(&recast.max_slope) {
            return Err(invalid("max slope must be within [0, 90] degrees"));
        }
        if recast.max_verts_per_poly < 3 {
            return Err(invalid("polygons need at least 3 vertices"));
        }
        if self.detour.max_tiles_number <= 0 {
            return Err(invalid("max tiles number must be positive"));
        }
        if self.detour.max_polys <= 0 {
            return Err(invalid("max polys must be positive"));
        }
        Ok(())
    }
}

fn invalid(message: &str) -> Error {
    Error::InvalidArgument(message.to_string())
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_settings_are_valid() {
        assert!(Settings::default().validate().is_ok());
        assert!(Settings::default().updater_threads() >= 1);
    }

    #[test]
    fn test_invalid_settings() {
        let mut settings = Settings::default();
        settings.recast.cell_size = 0.0;
        assert!(matches!(
            settings.validate(),
            Err(Error::InvalidArgument(_))
        ));

        let settings = Settings::default().with_max_tiles_number(0);
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_from_partial_json() {
        let settings: Settings = serde_json::from_str(
            r#"{ "write_to_nav_mesh_db": false, "min_update_interval": 40, "detour": { "max_tiles_number": 64 } }"#,
        )
        .unwrap();

        assert!(!settings.write_to_nav_mesh_db);
        assert_eq!(settings.min_update_interval, Duration::from_millis(40));
        assert_eq!(settings.detour.max_tiles_number, 64);
        assert_eq!(settings.detour.max_polys, DetourSettings::default().max_polys);
        assert_eq!(settings.recast, RecastSettings::default());
    }
}
