//! Asynchronous tile build pipeline
//!
//! Jobs are keyed by agent and tile. Posting a tile that already waits merges
//! the change into the waiting job, so a key has at most one job in flight
//! and one waiting behind it. A waiting job posted for another navmesh or
//! worldspace is rebound to the new one instead. Workers take jobs that may
//! remove a tile first, then the ready job closest to the current player
//! tile; the queue is scanned on every pop because the player keeps moving.
//!
//! A job resolves tile data from the in-memory tile cache, then from the
//! persistent store, and bakes only when both miss.

use crate::change_type::ChangeType;
use crate::io::{
    deserialize_tile_data, make_tile_input, serialize_tile_data, DbRefGeometryObject, Lz4Compressor,
};
use crate::loading_listener::LoadingListener;
use crate::navmesh_cache_item::{
    GuardedNavMeshCacheItem, NavMeshCacheItem, SharedNavMeshCacheItem, UpdateNavMeshStatus,
};
use crate::navmesh_db::{DbError, DbResult, NavMeshDb, ShapeId, TileId};
use crate::prepared_navmesh_data::PreparedNavMeshData;
use crate::stats::UpdaterStats;
use crate::tile_baker::TileBaker;
use crate::tile_cache::{TileCache, TileCacheValue};
use crate::tile_cached_recast_mesh_manager::TileCachedRecastMeshManager;
use navmesh_common::{should_add_tile, AgentBounds, RecastMesh, Result, Settings, TilePosition};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{
    Arc, Condvar, Mutex, MutexGuard, PoisonError, RwLockReadGuard, RwLockWriteGuard, Weak,
};
use std::thread::{self, JoinHandle};
use std::time::Instant;

/// What `AsyncNavMeshUpdater::wait` blocks for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitConditionType {
    /// Every posted job is done
    AllJobsDone,
    /// Jobs near the player are done
    RequiredTilesPresent,
}

type JobKey = (AgentBounds, TilePosition);

#[derive(Debug)]
struct Job {
    id: u64,
    agent: AgentBounds,
    nav_mesh: Weak<GuardedNavMeshCacheItem>,
    worldspace: Arc<str>,
    tile: TilePosition,
    change_type: ChangeType,
}

impl Job {
    fn key(&self) -> JobKey {
        (self.agent, self.tile)
    }
}

#[derive(Debug, Default)]
struct Queue {
    /// Waiting jobs by id
    jobs: BTreeMap<u64, Job>,
    waiting: FxHashMap<JobKey, u64>,
    processing: FxHashSet<JobKey>,
    last_updates: FxHashMap<JobKey, Instant>,
    player_tile: TilePosition,
    next_job_id: u64,
    pushed: usize,
    shutdown: bool,
}

enum Pick {
    Ready(u64),
    /// Only delayed jobs wait; the earliest becomes ready at this instant
    Delayed(Instant),
    Empty,
}

impl Queue {
    fn ready_at(&self, key: &JobKey, settings: &Settings) -> Option<Instant> {
        self.last_updates
            .get(key)
            .map(|last| *last + settings.min_update_interval)
    }

    /// Remembers when a key was last processed and forgets keys whose delay is over
    fn record_update(&mut self, key: JobKey, now: Instant, settings: &Settings) {
        let interval = settings.min_update_interval;
        self.last_updates
            .retain(|_, last| now.saturating_duration_since(*last) < interval);
        if !interval.is_zero() {
            self.last_updates.insert(key, now);
        }
    }

    fn pick(&self, now: Instant, settings: &Settings) -> Pick {
        let mut best: Option<(bool, u32, u64)> = None;
        let mut earliest: Option<Instant> = None;
        for job in self.jobs.values() {
            let key = job.key();
            if self.processing.contains(&key) {
                continue;
            }
            if let Some(ready_at) = self.ready_at(&key, settings).filter(|at| *at > now) {
                earliest = Some(earliest.map_or(ready_at, |e| e.min(ready_at)));
                continue;
            }
            let candidate = (
                !job.change_type.may_remove(),
                job.tile.manhattan_distance(self.player_tile),
                job.id,
            );
            if best.map_or(true, |b| candidate < b) {
                best = Some(candidate);
            }
        }
        match (best, earliest) {
            (Some((_, _, id)), _) => Pick::Ready(id),
            (None, Some(at)) => Pick::Delayed(at),
            (None, None) => Pick::Empty,
        }
    }

    fn count_relevant(&self, relevant: &dyn Fn(TilePosition, TilePosition) -> bool) -> usize {
        let waiting = self
            .jobs
            .values()
            .filter(|job| relevant(self.player_tile, job.tile))
            .count();
        let processing = self
            .processing
            .iter()
            .filter(|(_, tile)| relevant(self.player_tile, *tile))
            .count();
        waiting + processing
    }
}

/// Persistent store with the ids handed out by this process
struct DbState {
    db: NavMeshDb,
    write_enabled: bool,
    last_tile_id: TileId,
    last_shape_id: ShapeId,
}

impl DbState {
    fn new(db: NavMeshDb, write_enabled: bool) -> DbResult<Self> {
        let last_tile_id = db.get_max_tile_id()?;
        let last_shape_id = db.get_max_shape_id()?;
        Ok(Self {
            db,
            write_enabled,
            last_tile_id,
            last_shape_id,
        })
    }

    /// Encoded input of a tile whose shapes are all known to the store
    fn known_input(&self, settings: &Settings, agent: &AgentBounds, mesh: &RecastMesh) -> DbResult<Option<Vec<u8>>> {
        let mut objects = Vec::with_capacity(mesh.sources.len());
        for source in &mesh.sources {
            let Some(shape_id) = self.db.find_shape_id(&source.shape)? else {
                return Ok(None);
            };
            objects.push(DbRefGeometryObject {
                shape_id,
                transform: source.transform,
                area_type: source.area_type,
            });
        }
        Ok(Some(make_tile_input(&settings.recast, agent, mesh, &objects)?))
    }

    fn read_tile(&self, settings: &Settings, job: &Job, mesh: &RecastMesh) -> DbResult<Option<PreparedNavMeshData>> {
        let Some(input) = self.known_input(settings, &job.agent, mesh)? else {
            return Ok(None);
        };
        let Some(tile) = self.db.get_tile_data(&job.worldspace, job.tile, &input)? else {
            return Ok(None);
        };
        if tile.version != settings.nav_mesh_version {
            log::debug!(
                "Stored tile {} has version {}, expected {}",
                job.tile,
                tile.version,
                settings.nav_mesh_version
            );
            return Ok(None);
        }
        Ok(Some(deserialize_tile_data(&tile.data, &Lz4Compressor)?))
    }

    fn write_tile(
        &mut self,
        settings: &Settings,
        job: &Job,
        mesh: &RecastMesh,
        data: &PreparedNavMeshData,
    ) -> DbResult<()> {
        let blob = serialize_tile_data(data, &Lz4Compressor)?;
        let mut last_shape_id = self.last_shape_id;
        let mut last_tile_id = self.last_tile_id;
        let tx = self.db.transaction()?;

        let mut objects = Vec::with_capacity(mesh.sources.len());
        for source in &mesh.sources {
            let shape_id = match tx.find_shape_id(&source.shape)? {
                Some(shape_id) => shape_id,
                None => {
                    last_shape_id += 1;
                    tx.insert_shape(last_shape_id, &source.shape)?;
                    last_shape_id
                }
            };
            objects.push(DbRefGeometryObject {
                shape_id,
                transform: source.transform,
                area_type: source.area_type,
            });
        }

        let input = make_tile_input(&settings.recast, &job.agent, mesh, &objects)?;
        match tx.find_tile(&job.worldspace, job.tile, &input)? {
            Some(tile) if tile.version == settings.nav_mesh_version => {}
            Some(tile) => {
                tx.update_tile(tile.tile_id, settings.nav_mesh_version, &blob)?;
            }
            None => {
                last_tile_id += 1;
                tx.insert_tile(
                    last_tile_id,
                    &job.worldspace,
                    job.tile,
                    settings.nav_mesh_version,
                    &input,
                    &blob,
                )?;
            }
        }
        tx.commit()?;

        self.last_shape_id = last_shape_id;
        self.last_tile_id = last_tile_id;
        Ok(())
    }
}

struct Shared {
    settings: Settings,
    recast_mesh_manager: Arc<TileCachedRecastMeshManager>,
    baker: Arc<dyn TileBaker>,
    cache: TileCache,
    db: Option<Mutex<DbState>>,
    queue: Mutex<Queue>,
    has_job: Condvar,
    done: Condvar,
    db_get_tile_hits: AtomicUsize,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn read(item: &GuardedNavMeshCacheItem) -> RwLockReadGuard<'_, NavMeshCacheItem> {
    item.read().unwrap_or_else(PoisonError::into_inner)
}

fn write(item: &GuardedNavMeshCacheItem) -> RwLockWriteGuard<'_, NavMeshCacheItem> {
    item.write().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    fn next_job(&self) -> Option<Job> {
        let mut queue = lock(&self.queue);
        loop {
            if queue.shutdown {
                return None;
            }
            let now = Instant::now();
            match queue.pick(now, &self.settings) {
                Pick::Ready(id) => {
                    let Some(job) = queue.jobs.remove(&id) else {
                        continue;
                    };
                    let key = job.key();
                    queue.waiting.remove(&key);
                    queue.processing.insert(key);
                    return Some(job);
                }
                Pick::Delayed(at) => {
                    queue = self
                        .has_job
                        .wait_timeout(queue, at.saturating_duration_since(now))
                        .unwrap_or_else(PoisonError::into_inner)
                        .0;
                }
                Pick::Empty => {
                    queue = self.has_job.wait(queue).unwrap_or_else(PoisonError::into_inner);
                }
            }
        }
    }

    fn finish_job(&self, key: JobKey) {
        {
            let mut queue = lock(&self.queue);
            queue.processing.remove(&key);
            queue.record_update(key, Instant::now(), &self.settings);
        }
        self.done.notify_all();
        self.has_job.notify_all();
    }

    fn process_job(&self, job: &Job) {
        let Some(nav_mesh) = job.nav_mesh.upgrade() else {
            log::debug!("Dropping job for tile {}: navmesh is gone", job.tile);
            return;
        };
        let player_tile = lock(&self.queue).player_tile;
        log::debug!(
            "Processing {:?} job for tile {} of agent {}",
            job.change_type,
            job.tile,
            job.agent
        );

        let (max_tiles, previous) = {
            let item = read(&nav_mesh);
            let previous = item
                .nav_mesh()
                .get_tile_at(job.tile.x, job.tile.y, 0)
                .and_then(|tile| tile.data.clone());
            (
                self.settings.detour.max_tiles_number.min(item.nav_mesh().max_tiles()),
                previous,
            )
        };

        let mesh = self
            .recast_mesh_manager
            .get_mesh(&job.worldspace, job.tile)
            .filter(|mesh| !mesh.is_empty());
        let Some(mesh) = mesh else {
            let status = write(&nav_mesh).remove_tile(job.tile);
            log::debug!("Tile {} has no geometry: {status:?}", job.tile);
            return;
        };
        if !should_add_tile(job.tile, player_tile, max_tiles) {
            let status = write(&nav_mesh).remove_tile(job.tile);
            log::debug!("Tile {} is out of budget: {status:?}", job.tile);
            return;
        }

        let value = match self.cache.get(&job.agent, job.tile, &mesh.data) {
            Some(value) => Ok(Some(value)),
            None => self.load_or_bake(job, &mesh, previous.as_deref()),
        };

        let mut item = write(&nav_mesh);
        let (status, applied) = match value {
            Ok(Some(value)) => {
                let status = item.update_tile(job.tile, value);
                (status, status.is_success() || status == UpdateNavMeshStatus::Unchanged)
            }
            Ok(None) => (item.mark_as_empty(job.tile), true),
            Err(e) => {
                log::warn!("Failed to bake tile {} for agent {}: {e}", job.tile, job.agent);
                (item.remove_tile(job.tile), false)
            }
        };
        let nav_mesh_version = item.version();
        drop(item);

        if applied {
            self.recast_mesh_manager
                .report_nav_mesh_change(job.tile, mesh.version, nav_mesh_version);
        }
        log::debug!("Tile {} of agent {} done: {status:?}", job.tile, job.agent);
    }

    /// Resolves a tile cache miss from the store or by baking
    fn load_or_bake(
        &self,
        job: &Job,
        mesh: &RecastMesh,
        previous: Option<&PreparedNavMeshData>,
    ) -> Result<Option<TileCacheValue>> {
        if let Some(data) = self.read_from_db(job, mesh) {
            self.db_get_tile_hits.fetch_add(1, Ordering::Relaxed);
            return Ok(Some(self.store(job, mesh, data)));
        }

        let Some(data) = self.baker.bake(
            &self.settings.recast,
            &job.agent,
            job.tile,
            &mesh.data,
            previous,
        )?
        else {
            return Ok(None);
        };

        self.write_to_db(job, mesh, &data);
        Ok(Some(self.store(job, mesh, data)))
    }

    fn store(&self, job: &Job, mesh: &RecastMesh, data: PreparedNavMeshData) -> TileCacheValue {
        let data = Arc::new(data);
        self.cache
            .set(&job.agent, job.tile, mesh.data.clone(), Arc::clone(&data))
            .unwrap_or_else(|| TileCacheValue::detached(data))
    }

    fn read_from_db(&self, job: &Job, mesh: &RecastMesh) -> Option<PreparedNavMeshData> {
        let db = lock(self.db.as_ref()?);
        match db.read_tile(&self.settings, job, mesh) {
            Ok(data) => data,
            Err(e) => {
                log::error!("Failed to read tile {} from navmesh database: {e}", job.tile);
                None
            }
        }
    }

    fn write_to_db(&self, job: &Job, mesh: &RecastMesh, data: &PreparedNavMeshData) {
        let Some(db) = self.db.as_ref() else {
            return;
        };
        let mut db = lock(db);
        if !db.write_enabled {
            return;
        }
        match db.write_tile(&self.settings, job, mesh, data) {
            Ok(()) => {}
            Err(DbError::Full) => {
                log::warn!("Navmesh database is full, writing is disabled");
                db.write_enabled = false;
            }
            Err(e) => log::error!("Failed to write tile {} to navmesh database: {e}", job.tile),
        }
    }

    fn wait_until(&self, listener: &mut dyn LoadingListener, relevant: &dyn Fn(TilePosition, TilePosition) -> bool) {
        let mut queue = lock(&self.queue);
        let initial = queue.count_relevant(relevant);
        if initial == 0 {
            return;
        }
        listener.set_label("Building navigation mesh");
        listener.set_progress_range(initial);
        loop {
            let left = queue.count_relevant(relevant);
            listener.set_progress(initial.saturating_sub(left));
            if left == 0 || queue.shutdown {
                return;
            }
            queue = self.done.wait(queue).unwrap_or_else(PoisonError::into_inner);
        }
    }
}

/// Worker pool building navmesh tiles in the background
pub struct AsyncNavMeshUpdater {
    shared: Arc<Shared>,
    threads: Vec<JoinHandle<()>>,
}

impl AsyncNavMeshUpdater {
    pub fn new(
        settings: Settings,
        recast_mesh_manager: Arc<TileCachedRecastMeshManager>,
        baker: Arc<dyn TileBaker>,
        db: Option<NavMeshDb>,
    ) -> Result<Self> {
        let db = match db {
            Some(db) => Some(Mutex::new(DbState::new(db, settings.write_to_nav_mesh_db)?)),
            None => None,
        };
        let thread_count = settings.updater_threads();
        let shared = Arc::new(Shared {
            cache: TileCache::new(settings.max_nav_mesh_tiles_cache_size),
            settings,
            recast_mesh_manager,
            baker,
            db,
            queue: Mutex::new(Queue::default()),
            has_job: Condvar::new(),
            done: Condvar::new(),
            db_get_tile_hits: AtomicUsize::new(0),
        });

        let mut updater = Self {
            shared,
            threads: Vec::with_capacity(thread_count),
        };
        for index in 0..thread_count {
            let shared = Arc::clone(&updater.shared);
            let handle = thread::Builder::new()
                .name(format!("navmesh-updater-{index}"))
                .spawn(move || {
                    while let Some(job) = shared.next_job() {
                        let key = job.key();
                        shared.process_job(&job);
                        shared.finish_job(key);
                    }
                })?;
            updater.threads.push(handle);
        }
        log::info!("Started navmesh updater with {thread_count} threads");
        Ok(updater)
    }

    /// Queues the changed tiles of an agent's navmesh
    pub fn post(
        &self,
        agent: &AgentBounds,
        nav_mesh: &SharedNavMeshCacheItem,
        player_tile: TilePosition,
        worldspace: &str,
        changed_tiles: &BTreeMap<TilePosition, ChangeType>,
    ) {
        {
            let mut guard = lock(&self.shared.queue);
            let queue = &mut *guard;
            queue.player_tile = player_tile;
            let worldspace: Arc<str> = Arc::from(worldspace);
            let target = Arc::downgrade(nav_mesh);

            for (&tile, &change_type) in changed_tiles {
                let key = (*agent, tile);
                let waiting_id = queue.waiting.get(&key).copied();
                if let Some(job) = waiting_id.and_then(|id| queue.jobs.get_mut(&id)) {
                    if job.nav_mesh.ptr_eq(&target) && job.worldspace == worldspace {
                        job.change_type = job.change_type.merge(change_type);
                    } else {
                        job.nav_mesh = Weak::clone(&target);
                        job.worldspace = Arc::clone(&worldspace);
                        job.change_type = change_type;
                    }
                    continue;
                }

                let id = queue.next_job_id;
                queue.next_job_id += 1;
                queue.jobs.insert(
                    id,
                    Job {
                        id,
                        agent: *agent,
                        nav_mesh: Weak::clone(&target),
                        worldspace: Arc::clone(&worldspace),
                        tile,
                        change_type,
                    },
                );
                queue.waiting.insert(key, id);
                queue.pushed += 1;
            }
        }
        self.shared.has_job.notify_all();
    }

    /// Blocks until the condition holds, reporting progress to `listener`
    pub fn wait(&self, listener: &mut dyn LoadingListener, condition: WaitConditionType) {
        match condition {
            WaitConditionType::AllJobsDone => self.shared.wait_until(listener, &|_, _| true),
            WaitConditionType::RequiredTilesPresent => {
                let max_distance = self.shared.settings.wait_until_min_distance_to_player;
                if max_distance <= 0 {
                    return;
                }
                self.shared.wait_until(listener, &|player_tile, tile| {
                    tile.distance(player_tile) <= max_distance as f32
                });
            }
        }
    }

    pub fn stats(&self) -> UpdaterStats {
        let (jobs, waiting, delayed, pushed, processing) = {
            let queue = lock(&self.shared.queue);
            let now = Instant::now();
            let delayed = queue
                .jobs
                .values()
                .filter(|job| {
                    queue
                        .ready_at(&job.key(), &self.shared.settings)
                        .is_some_and(|at| at > now)
                })
                .count();
            (
                queue.jobs.len() + queue.processing.len(),
                queue.jobs.len(),
                delayed,
                queue.pushed,
                queue.processing.len(),
            )
        };
        UpdaterStats {
            jobs,
            waiting,
            delayed,
            pushed,
            processing,
            db_get_tile_hits: self.shared.db_get_tile_hits.load(Ordering::Relaxed),
            cache: self.shared.cache.stats(),
        }
    }

    pub fn settings(&self) -> &Settings {
        &self.shared.settings
    }

    /// Runs a closure against the persistent store if there is one
    pub fn with_db<R>(&self, f: impl FnOnce(&mut NavMeshDb) -> R) -> Option<R> {
        let db = self.shared.db.as_ref()?;
        Some(f(&mut lock(db).db))
    }

    pub fn is_db_write_enabled(&self) -> bool {
        self.shared
            .db
            .as_ref()
            .is_some_and(|db| lock(db).write_enabled)
    }
}

impl Drop for AsyncNavMeshUpdater {
    fn drop(&mut self) {
        lock(&self.shared.queue).shutdown = true;
        self.shared.has_job.notify_all();
        self.shared.done.notify_all();
        for handle in self.threads.drain(..) {
            if handle.join().is_err() {
                log::error!("Navmesh updater thread panicked");
            }
        }
        log::info!("Stopped navmesh updater");
    }
}
