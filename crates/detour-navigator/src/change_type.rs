//! Change kinds and per-agent change accumulation

use navmesh_common::TilePosition;
use std::collections::BTreeMap;

/// How a tile changed since it was last dispatched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChangeType {
    Remove,
    Mixed,
    Add,
    Update,
}

impl ChangeType {
    /// Widening merge: equal kinds stay, different kinds become `Mixed`
    pub fn merge(self, other: ChangeType) -> ChangeType {
        if self == other {
            self
        } else {
            ChangeType::Mixed
        }
    }

    /// Whether the tile may end up evicted instead of rebuilt
    pub fn may_remove(self) -> bool {
        matches!(self, ChangeType::Remove | ChangeType::Mixed)
    }
}

/// Changed tiles of one agent between two dispatches
#[derive(Debug, Clone, Default)]
pub struct ChangeTracker {
    tiles: BTreeMap<TilePosition, ChangeType>,
}

impl ChangeTracker {
    pub fn add_change(&mut self, tile: TilePosition, change_type: ChangeType) {
        self.tiles
            .entry(tile)
            .and_modify(|current| *current = current.merge(change_type))
            .or_insert(change_type);
    }

    pub fn iter(&self) -> impl Iterator<Item = (TilePosition, ChangeType)> + '_ {
        self.tiles.iter().map(|(tile, change)| (*tile, *change))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_merge_widens() {
        use ChangeType::*;
        for change in [Remove, Mixed, Add, Update] {
            assert_eq!(change.merge(change), change);
        }
        assert_eq!(Add.merge(Remove), Mixed);
        assert_eq!(Remove.merge(Add), Mixed);
        assert_eq!(Update.merge(Add), Mixed);
        assert_eq!(Mixed.merge(Add), Mixed);
        assert_eq!(Add.merge(Mixed), Mixed);
    }

    #[test]
    fn test_mixed_is_never_demoted() {
        let tile = TilePosition::new(1, 2);
        let mut tracker = ChangeTracker::default();
        tracker.add_change(tile, ChangeType::Add);
        tracker.add_change(tile, ChangeType::Remove);
        tracker.add_change(tile, ChangeType::Add);
        tracker.add_change(tile, ChangeType::Add);

        assert_eq!(tracker.iter().collect::<Vec<_>>(), vec![(tile, ChangeType::Mixed)]);
    }

    #[test]
    fn test_only_removals_may_remove() {
        assert!(ChangeType::Remove.may_remove());
        assert!(ChangeType::Mixed.may_remove());
        assert!(!ChangeType::Add.may_remove());
        assert!(!ChangeType::Update.may_remove());
    }
}
