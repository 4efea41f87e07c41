//! Content-addressed in-memory cache of baked tiles
//!
//! Items are keyed by agent bounds, tile position and the full tile input.
//! They live in an arena linked into two intrusive lists: busy items are
//! checked out by at least one `TileCacheValue`, free items are not. Only
//! free items are evicted, least recently released first.

use crate::prepared_navmesh_data::PreparedNavMeshData;
use navmesh_common::{AgentBounds, RecastMeshData, TilePosition};
use rustc_hash::FxHashMap;
use smallvec::SmallVec;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TileCacheStats {
    /// Bytes held by all items
    pub size: usize,
    /// Items currently checked out
    pub used_tiles: usize,
    /// Items kept for reuse
    pub cached_tiles: usize,
    pub hit_count: usize,
    pub get_count: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ListKind {
    Busy,
    Free,
}

#[derive(Debug)]
struct Item {
    agent: AgentBounds,
    tile: TilePosition,
    recast_mesh: RecastMeshData,
    data: Arc<PreparedNavMeshData>,
    size: usize,
    use_count: usize,
    list: ListKind,
    prev: Option<usize>,
    next: Option<usize>,
}

#[derive(Debug, Default)]
struct List {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

#[derive(Debug)]
struct Inner {
    max_size: usize,
    slots: Vec<Option<Item>>,
    vacant: Vec<usize>,
    busy: List,
    free: List,
    index: FxHashMap<(AgentBounds, TilePosition), SmallVec<[usize; 2]>>,
    used_size: usize,
    hit_count: usize,
    get_count: usize,
}

impl Inner {
    fn item(&self, slot: usize) -> Option<&Item> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    fn item_mut(&mut self, slot: usize) -> Option<&mut Item> {
        self.slots.get_mut(slot).and_then(Option::as_mut)
    }

    fn list_mut(&mut self, kind: ListKind) -> &mut List {
        match kind {
            ListKind::Busy => &mut self.busy,
            ListKind::Free => &mut self.free,
        }
    }

    fn unlink(&mut self, slot: usize) {
        let Some(item) = self.item_mut(slot) else {
            return;
        };
        let (prev, next, kind) = (item.prev.take(), item.next.take(), item.list);
        match prev {
            Some(prev) => {
                if let Some(item) = self.item_mut(prev) {
                    item.next = next;
                }
            }
            None => self.list_mut(kind).head = next,
        }
        match next {
            Some(next) => {
                if let Some(item) = self.item_mut(next) {
                    item.prev = prev;
                }
            }
            None => self.list_mut(kind).tail = prev,
        }
        self.list_mut(kind).len -= 1;
    }

    fn push_front(&mut self, slot: usize, kind: ListKind) {
        let head = self.list_mut(kind).head;
        if let Some(item) = self.item_mut(slot) {
            item.list = kind;
            item.prev = None;
            item.next = head;
        }
        if let Some(head) = head {
            if let Some(item) = self.item_mut(head) {
                item.prev = Some(slot);
            }
        }
        let list = self.list_mut(kind);
        list.head = Some(slot);
        if list.tail.is_none() {
            list.tail = Some(slot);
        }
        list.len += 1;
    }

    fn find(&self, agent: &AgentBounds, tile: TilePosition, recast_mesh: &RecastMeshData) -> Option<usize> {
        self.index.get(&(*agent, tile))?.iter().copied().find(|&slot| {
            self.item(slot)
                .is_some_and(|item| item.recast_mesh == *recast_mesh)
        })
    }

    fn acquire(&mut self, slot: usize) -> Option<Arc<PreparedNavMeshData>> {
        self.unlink(slot);
        self.push_front(slot, ListKind::Busy);
        let item = self.item_mut(slot)?;
        item.use_count += 1;
        Some(Arc::clone(&item.data))
    }

    fn release(&mut self, slot: usize) {
        let Some(item) = self.item_mut(slot) else {
            return;
        };
        item.use_count = item.use_count.saturating_sub(1);
        if item.use_count == 0 {
            self.unlink(slot);
            self.push_front(slot, ListKind::Free);
        }
    }

    fn remove_least_recently_used(&mut self) -> bool {
        let Some(slot) = self.free.tail else {
            return false;
        };
        self.unlink(slot);
        let Some(item) = self.slots.get_mut(slot).and_then(Option::take) else {
            return false;
        };
        let key = (item.agent, item.tile);
        if let Some(bucket) = self.index.get_mut(&key) {
            bucket.retain(|s| *s != slot);
            if bucket.is_empty() {
                self.index.remove(&key);
            }
        }
        self.used_size -= item.size;
        self.vacant.push(slot);
        true
    }

    fn insert(&mut self, item: Item) -> usize {
        let key = (item.agent, item.tile);
        let slot = match self.vacant.pop() {
            Some(slot) => {
                self.slots[slot] = Some(item);
                slot
            }
            None => {
                self.slots.push(Some(item));
                self.slots.len() - 1
            }
        };
        self.index.entry(key).or_default().push(slot);
        slot
    }
}

fn lock(inner: &Mutex<Inner>) -> MutexGuard<'_, Inner> {
    inner.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Bytes an entry accounts for against the cache budget
pub fn item_size(recast_mesh: &RecastMeshData, data: &PreparedNavMeshData) -> usize {
    std::mem::size_of::<Item>() + recast_mesh.memory_usage() + data.memory_usage()
}

/// Size bounded LRU of baked tiles
#[derive(Debug, Clone)]
pub struct TileCache {
    inner: Arc<Mutex<Inner>>,
}

impl TileCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                max_size,
                slots: Vec::new(),
                vacant: Vec::new(),
                busy: List::default(),
                free: List::default(),
                index: FxHashMap::default(),
                used_size: 0,
                hit_count: 0,
                get_count: 0,
            })),
        }
    }

    /// Checks out the item baked from exactly this input
    pub fn get(
        &self,
        agent: &AgentBounds,
        tile: TilePosition,
        recast_mesh: &RecastMeshData,
    ) -> Option<TileCacheValue> {
        let mut inner = lock(&self.inner);
        inner.get_count += 1;
        let slot = inner.find(agent, tile, recast_mesh)?;
        let data = inner.acquire(slot)?;
        inner.hit_count += 1;
        Some(TileCacheValue {
            owner: Some((Arc::clone(&self.inner), slot)),
            data,
        })
    }

    /// Stores a baked tile and checks it out
    ///
    /// Evicts free items until the new one fits. Returns `None` when it
    /// cannot fit even then; the caller keeps its data detached.
    pub fn set(
        &self,
        agent: &AgentBounds,
        tile: TilePosition,
        recast_mesh: RecastMeshData,
        data: Arc<PreparedNavMeshData>,
    ) -> Option<TileCacheValue> {
        let size = item_size(&recast_mesh, &data);
        let mut inner = lock(&self.inner);
        if size > inner.max_size {
            return None;
        }

        if let Some(slot) = inner.find(agent, tile, &recast_mesh) {
            let data = inner.acquire(slot)?;
            return Some(TileCacheValue {
                owner: Some((Arc::clone(&self.inner), slot)),
                data,
            });
        }

        while inner.used_size + size > inner.max_size && inner.remove_least_recently_used() {}
        if inner.used_size + size > inner.max_size {
            return None;
        }

        let slot = inner.insert(Item {
            agent: *agent,
            tile,
            recast_mesh,
            data: Arc::clone(&data),
            size,
            use_count: 1,
            list: ListKind::Busy,
            prev: None,
            next: None,
        });
        inner.push_front(slot, ListKind::Busy);
        inner.used_size += size;
        Some(TileCacheValue {
            owner: Some((Arc::clone(&self.inner), slot)),
            data,
        })
    }

    pub fn stats(&self) -> TileCacheStats {
        let inner = lock(&self.inner);
        TileCacheStats {
            size: inner.used_size,
            used_tiles: inner.busy.len,
            cached_tiles: inner.free.len,
            hit_count: inner.hit_count,
            get_count: inner.get_count,
        }
    }
}

/// Checked out tile data
///
/// While any value for an item is alive the item is busy and cannot be
/// evicted. Detached values carry data that never entered the cache.
pub struct TileCacheValue {
    owner: Option<(Arc<Mutex<Inner>>, usize)>,
    data: Arc<PreparedNavMeshData>,
}

impl TileCacheValue {
    pub fn detached(data: Arc<PreparedNavMeshData>) -> Self {
        Self { owner: None, data }
    }

    pub fn data(&self) -> &Arc<PreparedNavMeshData> {
        &self.data
    }

    pub fn is_cached(&self) -> bool {
        self.owner.is_some()
    }
}

impl Clone for TileCacheValue {
    fn clone(&self) -> Self {
        if let Some((inner, slot)) = &self.owner {
            lock(inner).acquire(*slot);
        }
        Self {
            owner: self.owner.clone(),
            data: Arc::clone(&self.data),
        }
    }
}

impl Drop for TileCacheValue {
    fn drop(&mut self) {
        if let Some((inner, slot)) = &self.owner {
            lock(inner).release(*slot);
        }
    }
}

impl fmt::Debug for TileCacheValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TileCacheValue")
            .field("slot", &self.owner.as_ref().map(|(_, slot)| *slot))
            .field("polygons", &self.data.polygon_count())
            .finish()
    }
}
