//! Live navigation mesh tile table
//!
//! Tiles live in a fixed number of slots linked into a free list. A tile
//! reference combines the slot index with the slot's salt, which changes every
//! time the slot is vacated, so references to removed tiles never resolve to a
//! newer tile in the same slot.

use crate::prepared_navmesh_data::PreparedNavMeshData;
use glam::Vec3;
use navmesh_common::{get_tile_size, Error, Result, Settings, TilePosition};
use rustc_hash::FxHashMap;
use std::sync::Arc;

/// Reference to a tile; 0 means no tile
pub type TileRef = u64;

/// Number of bits used for the slot index
const TILE_BITS: u32 = 32;
const TILE_MASK: u64 = (1 << TILE_BITS) - 1;

/// Creates a reference from a salt and a 0-based slot index
#[inline]
pub fn encode_tile_ref(salt: u32, index: usize) -> TileRef {
    ((salt as u64) << TILE_BITS) | ((index as u64 + 1) & TILE_MASK)
}

/// Decodes a reference into salt and 0-based slot index
#[inline]
pub fn decode_tile_ref(tile_ref: TileRef) -> Option<(u32, usize)> {
    let id = tile_ref & TILE_MASK;
    if id == 0 {
        return None;
    }
    Some(((tile_ref >> TILE_BITS) as u32, (id - 1) as usize))
}

#[derive(Debug, Clone, PartialEq)]
pub struct NavMeshParams {
    pub origin: Vec3,
    pub tile_width: f32,
    pub tile_height: f32,
    pub max_tiles: i32,
    pub max_polys: i32,
}

impl NavMeshParams {
    pub fn from_settings(settings: &Settings) -> Self {
        let tile_size = get_tile_size(&settings.recast);
        Self {
            origin: Vec3::ZERO,
            tile_width: tile_size,
            tile_height: tile_size,
            max_tiles: settings.detour.max_tiles_number,
            max_polys: settings.detour.max_polys,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MeshTile {
    pub x: i32,
    pub y: i32,
    pub layer: i32,
    pub salt: u32,
    pub data: Option<Arc<PreparedNavMeshData>>,
    next: Option<usize>,
}

#[derive(Debug)]
pub struct NavMesh {
    params: NavMeshParams,
    tiles: Vec<MeshTile>,
    next_free: Option<usize>,
    pos_lookup: FxHashMap<(i32, i32, i32), usize>,
    tile_count: usize,
}

impl NavMesh {
    pub fn new(params: NavMeshParams) -> Result<Self> {
        if !params.origin.is_finite() {
            return Err(Error::NavMesh("navmesh origin must be finite".to_string()));
        }
        if params.tile_width <= 0.0 || params.tile_height <= 0.0 {
            return Err(Error::NavMesh("tile dimensions must be positive".to_string()));
        }
        if params.max_tiles <= 0 || params.max_polys <= 0 {
            return Err(Error::NavMesh(format!(
                "invalid limits: {} tiles, {} polygons per tile",
                params.max_tiles, params.max_polys
            )));
        }

        let max_tiles = params.max_tiles as usize;
        let tiles = (0..max_tiles)
            .map(|i| MeshTile {
                x: 0,
                y: 0,
                layer: 0,
                salt: 1,
                data: None,
                next: (i + 1 < max_tiles).then_some(i + 1),
            })
            .collect();

        Ok(Self {
            params,
            tiles,
            next_free: Some(0),
            pos_lookup: FxHashMap::default(),
            tile_count: 0,
        })
    }

    pub fn params(&self) -> &NavMeshParams {
        &self.params
    }

    pub fn max_tiles(&self) -> i32 {
        self.params.max_tiles
    }

    pub fn tile_count(&self) -> usize {
        self.tile_count
    }

    /// Adds a tile at a free slot
    pub fn add_tile(&mut self, x: i32, y: i32, layer: i32, data: Arc<PreparedNavMeshData>) -> Result<TileRef> {
        if self.pos_lookup.contains_key(&(x, y, layer)) {
            return Err(Error::NavMesh(format!("tile ({x}, {y}, {layer}) already exists")));
        }
        if data.polygon_count() > self.params.max_polys as usize {
            return Err(Error::NavMesh(format!(
                "tile ({x}, {y}) has {} polygons, limit is {}",
                data.polygon_count(),
                self.params.max_polys
            )));
        }
        let Some(index) = self.next_free else {
            return Err(Error::NavMesh("out of tile slots".to_string()));
        };

        let tile = &mut self.tiles[index];
        self.next_free = tile.next.take();
        tile.x = x;
        tile.y = y;
        tile.layer = layer;
        tile.data = Some(data);
        let tile_ref = encode_tile_ref(tile.salt, index);

        self.pos_lookup.insert((x, y, layer), index);
        self.tile_count += 1;
        Ok(tile_ref)
    }

    /// Removes a tile and returns its data
    pub fn remove_tile(&mut self, tile_ref: TileRef) -> Result<Arc<PreparedNavMeshData>> {
        let index = self
            .resolve(tile_ref)
            .ok_or_else(|| Error::NavMesh(format!("invalid tile reference {tile_ref:#x}")))?;

        let tile = &mut self.tiles[index];
        let data = tile
            .data
            .take()
            .ok_or_else(|| Error::NavMesh(format!("tile slot {index} is empty")))?;
        self.pos_lookup.remove(&(tile.x, tile.y, tile.layer));
        tile.salt = tile.salt.wrapping_add(1);
        tile.next = self.next_free;
        self.next_free = Some(index);
        self.tile_count -= 1;
        Ok(data)
    }

    fn resolve(&self, tile_ref: TileRef) -> Option<usize> {
        let (salt, index) = decode_tile_ref(tile_ref)?;
        let tile = self.tiles.get(index)?;
        (tile.salt == salt && tile.data.is_some()).then_some(index)
    }

    /// Reference of the tile at a position, 0 when absent
    pub fn get_tile_ref_at(&self, x: i32, y: i32, layer: i32) -> TileRef {
        self.pos_lookup
            .get(&(x, y, layer))
            .map_or(0, |&index| encode_tile_ref(self.tiles[index].salt, index))
    }

    pub fn get_tile_at(&self, x: i32, y: i32, layer: i32) -> Option<&MeshTile> {
        self.pos_lookup.get(&(x, y, layer)).map(|&index| &self.tiles[index])
    }

    pub fn get_tile_by_ref(&self, tile_ref: TileRef) -> Option<&MeshTile> {
        self.resolve(tile_ref).map(|index| &self.tiles[index])
    }

    /// Positions of all present tiles
    pub fn tile_positions(&self) -> impl Iterator<Item = TilePosition> + '_ {
        self.pos_lookup
            .keys()
            .filter(|(_, _, layer)| *layer == 0)
            .map(|&(x, y, _)| TilePosition::new(x, y))
    }
}
