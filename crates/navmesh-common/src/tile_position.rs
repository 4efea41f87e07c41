//! Tile grid math
//!
//! World space is Y-up; the tile grid covers the XZ plane. A tile position's
//! `y` component therefore indexes world Z.

use crate::RecastSettings;
use glam::{Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer coordinate of a tile in the grid
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct TilePosition {
    pub x: i32,
    pub y: i32,
}

impl TilePosition {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }

    /// Manhattan distance, used to order jobs around the player
    pub fn manhattan_distance(self, other: TilePosition) -> u32 {
        self.x
            .abs_diff(other.x)
            .saturating_add(self.y.abs_diff(other.y))
    }

    /// Euclidean distance in tiles
    pub fn distance(self, other: TilePosition) -> f32 {
        let dx = self.x.abs_diff(other.x) as f32;
        let dy = self.y.abs_diff(other.y) as f32;
        (dx * dx + dy * dy).sqrt()
    }
}

impl From<(i32, i32)> for TilePosition {
    fn from((x, y): (i32, i32)) -> Self {
        Self::new(x, y)
    }
}

impl fmt::Display for TilePosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.x, self.y)
    }
}

/// Axis aligned rectangle on the XZ plane
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TileBounds {
    pub min: Vec2,
    pub max: Vec2,
}

impl TileBounds {
    pub fn new(min: Vec2, max: Vec2) -> Self {
        Self { min, max }
    }

    pub fn intersects(&self, other: &TileBounds) -> bool {
        self.min.x <= other.max.x
            && self.max.x >= other.min.x
            && self.min.y <= other.max.y
            && self.max.y >= other.min.y
    }

    pub fn contains(&self, point: Vec2) -> bool {
        point.x >= self.min.x && point.x <= self.max.x && point.y >= self.min.y && point.y <= self.max.y
    }
}

/// Half-open rectangle of tile positions, `begin` inclusive and `end` exclusive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TilesPositionsRange {
    pub begin: TilePosition,
    pub end: TilePosition,
}

impl TilesPositionsRange {
    pub const fn new(begin: TilePosition, end: TilePosition) -> Self {
        Self { begin, end }
    }

    /// Range covering every representable tile; never iterate it
    pub const fn infinite() -> Self {
        Self::new(
            TilePosition::new(i32::MIN, i32::MIN),
            TilePosition::new(i32::MAX, i32::MAX),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.begin.x >= self.end.x || self.begin.y >= self.end.y
    }

    pub fn len(&self) -> usize {
        if self.is_empty() {
            return 0;
        }
        let width = (self.end.x as i64 - self.begin.x as i64) as usize;
        let height = (self.end.y as i64 - self.begin.y as i64) as usize;
        width.saturating_mul(height)
    }

    pub fn contains(&self, position: TilePosition) -> bool {
        position.x >= self.begin.x
            && position.x < self.end.x
            && position.y >= self.begin.y
            && position.y < self.end.y
    }

    pub fn intersection(&self, other: &TilesPositionsRange) -> TilesPositionsRange {
        TilesPositionsRange::new(
            TilePosition::new(self.begin.x.max(other.begin.x), self.begin.y.max(other.begin.y)),
            TilePosition::new(self.end.x.min(other.end.x), self.end.y.min(other.end.y)),
        )
    }

    /// Tile positions row by row
    pub fn iter(&self) -> impl Iterator<Item = TilePosition> {
        let range = *self;
        let (xs, ys) = if range.is_empty() {
            (0..0, 0..0)
        } else {
            (range.begin.x..range.end.x, range.begin.y..range.end.y)
        };
        ys.flat_map(move |y| xs.clone().map(move |x| TilePosition::new(x, y)))
    }
}

/// Edge length of a tile in world units
pub fn get_tile_size(settings: &RecastSettings) -> f32 {
    settings.tile_size as f32 * settings.cell_size
}

/// Border around every tile in world units
pub fn get_border_size(settings: &RecastSettings) -> f32 {
    settings.border_size as f32 * settings.cell_size
}

/// Tile containing a world position
pub fn get_tile_position(settings: &RecastSettings, position: Vec3) -> TilePosition {
    let tile_size = get_tile_size(settings);
    TilePosition::new(
        (position.x / tile_size).floor() as i32,
        (position.z / tile_size).floor() as i32,
    )
}

/// World XZ bounds of a tile without its border
pub fn make_tile_bounds(settings: &RecastSettings, tile: TilePosition) -> TileBounds {
    let tile_size = get_tile_size(settings);
    let min = Vec2::new(tile.x as f32, tile.y as f32) * tile_size;
    TileBounds::new(min, min + Vec2::splat(tile_size))
}

/// World XZ bounds of a tile including its border
pub fn make_real_tile_bounds_with_border(settings: &RecastSettings, tile: TilePosition) -> TileBounds {
    let border = Vec2::splat(get_border_size(settings));
    let bounds = make_tile_bounds(settings, tile);
    TileBounds::new(bounds.min - border, bounds.max + border)
}

/// Tiles whose bordered bounds overlap the given XZ rectangle
pub fn make_tiles_positions_range(
    settings: &RecastSettings,
    min: Vec2,
    max: Vec2,
) -> TilesPositionsRange {
    let border = get_border_size(settings);
    let begin = get_tile_position(settings, Vec3::new(min.x - border, 0.0, min.y - border));
    let last = get_tile_position(settings, Vec3::new(max.x + border, 0.0, max.y + border));
    TilesPositionsRange::new(
        begin,
        TilePosition::new(last.x.saturating_add(1), last.y.saturating_add(1)),
    )
}

/// Square range of `radius` tiles around a center tile
pub fn make_tiles_range_around(center: TilePosition, radius: i32) -> TilesPositionsRange {
    TilesPositionsRange::new(
        TilePosition::new(center.x.saturating_sub(radius), center.y.saturating_sub(radius)),
        TilePosition::new(
            center.x.saturating_add(radius).saturating_add(1),
            center.y.saturating_add(radius).saturating_add(1),
        ),
    )
}

/// Budget test for a tile: the disc reaching it must not need more tiles than allowed
pub fn should_add_tile(tile: TilePosition, player_tile: TilePosition, max_tiles: i32) -> bool {
    let distance = tile.distance(player_tile);
    let expected_tiles = (std::f32::consts::PI * distance * distance).ceil();
    expected_tiles <= max_tiles as f32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> RecastSettings {
        RecastSettings {
            cell_size: 0.5,
            tile_size: 64,
            border_size: 4,
            ..Default::default()
        }
    }

    #[test]
    fn test_tile_position_from_world() {
        let settings = settings();
        assert_eq!(get_tile_size(&settings), 32.0);
        assert_eq!(get_tile_position(&settings, Vec3::new(0.0, 100.0, 0.0)), TilePosition::new(0, 0));
        assert_eq!(get_tile_position(&settings, Vec3::new(31.9, 0.0, 32.0)), TilePosition::new(0, 1));
        assert_eq!(get_tile_position(&settings, Vec3::new(-0.1, 0.0, -40.0)), TilePosition::new(-1, -2));
    }

    #[test]
    fn test_range_with_border() {
        let settings = settings();
        // 2 world units of border pull the neighbouring tiles in
        let range = make_tiles_positions_range(&settings, Vec2::new(1.0, 1.0), Vec2::new(2.0, 2.0));
        assert_eq!(range.begin, TilePosition::new(-1, -1));
        assert_eq!(range.end, TilePosition::new(1, 1));
        assert_eq!(range.len(), 4);

        let range = make_tiles_positions_range(&settings, Vec2::new(10.0, 10.0), Vec2::new(12.0, 12.0));
        assert_eq!(range.iter().collect::<Vec<_>>(), vec![TilePosition::new(0, 0)]);
    }

    #[test]
    fn test_range_iteration_and_intersection() {
        let a = make_tiles_range_around(TilePosition::new(0, 0), 1);
        assert_eq!(a.len(), 9);
        assert!(a.contains(TilePosition::new(1, -1)));
        assert!(!a.contains(TilePosition::new(2, 0)));

        let b = TilesPositionsRange::new(TilePosition::new(1, 1), TilePosition::new(5, 5));
        let both = a.intersection(&b);
        assert_eq!(both.iter().collect::<Vec<_>>(), vec![TilePosition::new(1, 1)]);

        let disjoint = TilesPositionsRange::new(TilePosition::new(9, 9), TilePosition::new(10, 10));
        assert!(a.intersection(&disjoint).is_empty());
        assert_eq!(a.intersection(&disjoint).iter().count(), 0);

        assert_eq!(TilesPositionsRange::infinite().intersection(&a), a);
    }

    #[test]
    fn test_tile_budget() {
        let player = TilePosition::new(0, 0);
        assert!(should_add_tile(player, player, 1));
        assert!(should_add_tile(TilePosition::new(1, 0), player, 4));
        assert!(!should_add_tile(TilePosition::new(1, 0), player, 3));
        assert!(!should_add_tile(TilePosition::new(10, 10), player, 512));
    }

    #[test]
    fn test_extreme_coordinates_saturate() {
        let settings = settings();
        let range = make_tiles_positions_range(&settings, Vec2::splat(-1.0e12), Vec2::splat(1.0e12));
        assert_eq!(range.begin, TilePosition::new(i32::MIN, i32::MIN));
        assert_eq!(range.end, TilePosition::new(i32::MAX, i32::MAX));

        let far = TilePosition::new(i32::MAX, i32::MAX);
        let near = TilePosition::new(i32::MIN, 0);
        assert_eq!(far.manhattan_distance(near), u32::MAX);
        assert!(!should_add_tile(far, near, i32::MAX));

        let around = make_tiles_range_around(far, 3);
        assert_eq!(around.end, far);
        assert!(around.contains(TilePosition::new(i32::MAX - 1, i32::MAX - 3)));
    }

    #[test]
    fn test_tile_bounds() {
        let settings = settings();
        let bounds = make_tile_bounds(&settings, TilePosition::new(1, -1));
        assert_eq!(bounds.min, Vec2::new(32.0, -32.0));
        assert_eq!(bounds.max, Vec2::new(64.0, 0.0));

        let bordered = make_real_tile_bounds_with_border(&settings, TilePosition::new(1, -1));
        assert_eq!(bordered.min, Vec2::new(30.0, -34.0));
        assert!(bordered.intersects(&bounds));
        assert!(bordered.contains(Vec2::new(31.0, -1.0)));
    }
}
