//! CLI utility for pre-generating navigation mesh tile databases

mod scene;

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use detour_navigator::{
    LoadingListener, NavMeshDb, NavMeshManager, SurfaceTileBaker, WaitConditionType,
};
use glam::Vec3;
use navmesh_common::{get_tile_size, Settings, TilePosition, TilesPositionsRange};
use scene::{Scene, Worldspace};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Builds navigation mesh tiles for scene descriptions and stores them in a database
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Bake every tile of a scene into the database
    Generate {
        /// Scene description (JSON)
        #[clap(long, value_parser)]
        scene: PathBuf,

        /// Navigation mesh database, created when missing
        #[clap(long, value_parser)]
        db: PathBuf,

        /// Settings file (JSON), defaults are used for missing fields
        #[clap(long, value_parser)]
        settings: Option<PathBuf>,

        /// Number of updater threads, 0 picks one per spare core
        #[clap(long)]
        threads: Option<usize>,

        /// Delete stored tiles outside of the scene geometry
        #[clap(long)]
        remove_unused_tiles: bool,

        /// Compact the database when done
        #[clap(long)]
        vacuum: bool,
    },

    /// Print database statistics
    Info {
        /// Navigation mesh database
        #[clap(long, value_parser)]
        db: PathBuf,
    },
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    match args.command {
        Commands::Generate {
            scene,
            db,
            settings,
            threads,
            remove_unused_tiles,
            vacuum,
        } => generate(
            &scene,
            &db,
            settings.as_deref(),
            threads,
            remove_unused_tiles,
            vacuum,
        ),
        Commands::Info { db } => info(&db),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings> {
    let settings = match path {
        Some(path) => {
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read settings file: {}", path.display()))?;
            serde_json::from_str(&text)
                .with_context(|| format!("Failed to parse settings file: {}", path.display()))?
        }
        None => Settings::default(),
    };
    settings
        .validate()
        .map_err(|e| anyhow!("Invalid settings: {}", e))?;
    Ok(settings)
}

/// Player tile in the middle of `range` and a budget reaching all of it
fn budget_for(range: &TilesPositionsRange) -> (TilePosition, i32) {
    let center = TilePosition::new(
        range.begin.x + (range.end.x - range.begin.x) / 2,
        range.begin.y + (range.end.y - range.begin.y) / 2,
    );
    let corners = [
        TilePosition::new(range.begin.x, range.begin.y),
        TilePosition::new(range.end.x - 1, range.begin.y),
        TilePosition::new(range.begin.x, range.end.y - 1),
        TilePosition::new(range.end.x - 1, range.end.y - 1),
    ];
    let distance = corners
        .iter()
        .map(|corner| corner.distance(center))
        .fold(0.0_f32, f32::max);
    let max_tiles = (std::f32::consts::PI * distance * distance).ceil() as i64 + 1;
    (center, max_tiles.clamp(1, i32::MAX as i64) as i32)
}

fn tile_center(settings: &Settings, tile: TilePosition) -> Vec3 {
    let size = get_tile_size(&settings.recast);
    Vec3::new((tile.x as f32 + 0.5) * size, 0.0, (tile.y as f32 + 0.5) * size)
}

/// Logs build progress at most once per second
struct ProgressLog {
    label: String,
    total: usize,
    last_report: Instant,
}

impl ProgressLog {
    fn new() -> Self {
        Self {
            label: String::new(),
            total: 0,
            last_report: Instant::now(),
        }
    }
}

impl LoadingListener for ProgressLog {
    fn set_label(&mut self, label: &str) {
        self.label = label.to_string();
    }

    fn set_progress_range(&mut self, range: usize) {
        self.total = range;
    }

    fn set_progress(&mut self, value: usize) {
        if value < self.total && self.last_report.elapsed() < Duration::from_secs(1) {
            return;
        }
        self.last_report = Instant::now();
        log::info!("{}: {}/{} tiles", self.label, value, self.total);
    }
}

fn generate_worldspace(
    worldspace: &Worldspace,
    db_path: &Path,
    settings: &Settings,
    remove_unused_tiles: bool,
) -> Result<()> {
    let Some(range) = worldspace.tiles_range(&settings.recast)? else {
        log::warn!("Worldspace {} has no geometry", worldspace.name);
        return Ok(());
    };
    let (player_tile, max_tiles) = budget_for(&range);
    let settings = settings.clone().with_max_tiles_number(max_tiles);
    println!(
        "Worldspace {}: tiles {}..{}, budget {} tiles",
        worldspace.name, range.begin, range.end, max_tiles
    );

    let db = NavMeshDb::open(db_path, settings.max_db_file_size)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    let player_position = tile_center(&settings, player_tile);
    let mut manager = NavMeshManager::new(settings, Arc::new(SurfaceTileBaker), Some(db))?;
    manager.set_worldspace(&worldspace.name)?;

    let agents: Vec<_> = worldspace.agents().collect();
    if agents.is_empty() {
        log::warn!("Worldspace {} has no agents", worldspace.name);
        return Ok(());
    }
    for agent in &agents {
        manager.add_agent(agent)?;
    }
    worldspace.populate(&mut manager)?;

    let started = Instant::now();
    for agent in &agents {
        manager.update(player_position, agent)?;
    }
    manager.wait(&mut ProgressLog::new(), WaitConditionType::AllJobsDone);

    let stats = manager.stats();
    println!(
        "Processed {} jobs for {} agents in {:.2?}: {} loaded from database, {} from cache",
        stats.pushed,
        agents.len(),
        started.elapsed(),
        stats.db_get_tile_hits,
        stats.cache.hit_count
    );
    let outdated = manager.outdated_tiles_count();
    if outdated > 0 {
        log::warn!("{outdated} tiles of worldspace {} were not built", worldspace.name);
    }

    if remove_unused_tiles {
        let removed = manager
            .with_db(|db| db.delete_tiles_outside_range(&worldspace.name, &range))
            .transpose()?
            .unwrap_or(0);
        println!("Removed {removed} unused tiles");
    }
    Ok(())
}

fn generate(
    scene_path: &Path,
    db_path: &Path,
    settings_path: Option<&Path>,
    threads: Option<usize>,
    remove_unused_tiles: bool,
    vacuum: bool,
) -> Result<()> {
    let scene = Scene::load(scene_path)?;
    let mut settings = load_settings(settings_path)?
        .with_disk_cache(true)
        .with_write_to_db(true)
        .with_min_update_interval(Duration::ZERO);
    if let Some(threads) = threads {
        settings = settings.with_updater_threads(threads);
    }

    for worldspace in &scene.worldspaces {
        generate_worldspace(worldspace, db_path, &settings, remove_unused_tiles)
            .with_context(|| format!("Failed to generate worldspace {}", worldspace.name))?;
    }

    if vacuum {
        println!("Vacuuming database...");
        NavMeshDb::open(db_path, settings.max_db_file_size)?.vacuum()?;
    }
    info(db_path)
}

fn info(db_path: &Path) -> Result<()> {
    let db = NavMeshDb::open(db_path, Settings::default().max_db_file_size)
        .with_context(|| format!("Failed to open database: {}", db_path.display()))?;
    println!("Database: {}", db_path.display());
    println!("  tiles:         {}", db.tiles_count()?);
    println!("  shapes:        {}", db.shapes_count()?);
    println!("  max tile id:   {}", db.get_max_tile_id()?);
    println!("  max shape id:  {}", db.get_max_shape_id()?);
    Ok(())
}
