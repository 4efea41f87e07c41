use serde::{Deserialize, Serialize};
use std::fmt;

/// Staleness marker for meshes and navmeshes
///
/// `generation` changes when a navmesh is rebuilt from scratch (for example
/// after a worldspace switch), `revision` on every content-affecting change.
/// Versions are only ever compared, never subtracted.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Version {
    pub generation: u64,
    pub revision: u64,
}

impl Version {
    pub const fn new(generation: u64, revision: u64) -> Self {
        Self {
            generation,
            revision,
        }
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.generation, self.revision)
    }
}

/// Opaque identifier of a physical shape instance
///
/// Stable for the lifetime of the shape and unique within a worldspace.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl From<u64> for ObjectId {
    fn from(value: u64) -> Self {
        ObjectId(value)
    }
}
