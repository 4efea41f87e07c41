use glam::Vec3;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};

/// Collision volume used to derive an agent's walkable clearance
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum CollisionShapeType {
    #[default]
    Aabb,
    RotatingBox,
    Cylinder,
}

/// Identity of a navigating agent class
///
/// Every distinct set of bounds gets its own navmesh. Comparison, ordering and
/// hashing use the bit patterns of the half extents so the bounds can key
/// ordered and hashed maps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentBounds {
    pub shape_type: CollisionShapeType,
    pub half_extents: Vec3,
}

impl AgentBounds {
    pub fn new(shape_type: CollisionShapeType, half_extents: Vec3) -> Self {
        Self {
            shape_type,
            half_extents,
        }
    }

    pub fn aabb(half_extents: Vec3) -> Self {
        Self::new(CollisionShapeType::Aabb, half_extents)
    }

    /// Height of the agent's clearance volume
    pub fn height(&self) -> f32 {
        2.0 * self.half_extents.y
    }

    /// Horizontal radius used to erode walkable area
    pub fn radius(&self) -> f32 {
        match self.shape_type {
            CollisionShapeType::Aabb => self.half_extents.x.max(self.half_extents.z),
            CollisionShapeType::RotatingBox => {
                glam::Vec2::new(self.half_extents.x, self.half_extents.z).length()
            }
            CollisionShapeType::Cylinder => self.half_extents.x.max(self.half_extents.z),
        }
    }

    fn key(&self) -> (CollisionShapeType, [u32; 3]) {
        (
            self.shape_type,
            self.half_extents.to_array().map(f32::to_bits),
        )
    }
}

impl PartialEq for AgentBounds {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl Eq for AgentBounds {}

impl PartialOrd for AgentBounds {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for AgentBounds {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key().cmp(&other.key())
    }
}

impl Hash for AgentBounds {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}

impl fmt::Display for AgentBounds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ({}, {}, {})",
            self.shape_type, self.half_extents.x, self.half_extents.y, self.half_extents.z
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::{BTreeSet, HashSet};

    #[test]
    fn test_agent_bounds_as_map_key() {
        let a = AgentBounds::aabb(Vec3::new(0.3, 0.9, 0.3));
        let b = AgentBounds::aabb(Vec3::new(0.3, 0.9, 0.3));
        let c = AgentBounds::new(CollisionShapeType::Cylinder, Vec3::new(0.3, 0.9, 0.3));

        assert_eq!(a, b);
        assert_ne!(a, c);

        let hashed: HashSet<_> = [a, b, c].into_iter().collect();
        assert_eq!(hashed.len(), 2);

        let ordered: BTreeSet<_> = [c, a, b].into_iter().collect();
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_agent_dimensions() {
        let bounds = AgentBounds::aabb(Vec3::new(0.5, 1.0, 0.25));
        assert_eq!(bounds.height(), 2.0);
        assert_eq!(bounds.radius(), 0.5);
    }
}
