//! Collision shapes fed into the tile index

use crate::{content_hash, Error, Result};
use glam::{Affine3A, Vec3};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Purpose of a shape's geometry
#[repr(i32)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum ShapeType {
    #[default]
    Collision = 1,
    Avoidance = 2,
}

impl TryFrom<i32> for ShapeType {
    type Error = Error;

    fn try_from(value: i32) -> Result<Self> {
        match value {
            1 => Ok(ShapeType::Collision),
            2 => Ok(ShapeType::Avoidance),
            _ => Err(Error::InvalidArgument(format!("unknown shape type {value}"))),
        }
    }
}

/// Stable identity of shape geometry: where it came from and what it contains
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ShapeSource {
    pub name: String,
    pub shape_type: ShapeType,
    pub hash: u64,
}

impl fmt::Display for ShapeSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:016x})", self.name, self.shape_type, self.hash)
    }
}

/// Triangle mesh in shape-local coordinates
///
/// The content hash and local bounds are computed once on construction so
/// instances can be shared between many placements.
#[derive(Debug, Clone, PartialEq)]
pub struct CollisionShape {
    source: ShapeSource,
    vertices: Vec<Vec3>,
    indices: Vec<u32>,
    local_min: Vec3,
    local_max: Vec3,
}

impl CollisionShape {
    pub fn new(
        name: impl Into<String>,
        shape_type: ShapeType,
        vertices: Vec<Vec3>,
        indices: Vec<u32>,
    ) -> Result<Self> {
        if indices.len() % 3 != 0 {
            return Err(Error::InvalidMesh(
                "index count is not a multiple of 3".to_string(),
            ));
        }
        if let Some(index) = indices.iter().find(|&&i| i as usize >= vertices.len()) {
            return Err(Error::InvalidMesh(format!(
                "index {index} out of range for {} vertices",
                vertices.len()
            )));
        }

        let (local_min, local_max) = if vertices.is_empty() {
            (Vec3::ZERO, Vec3::ZERO)
        } else {
            vertices.iter().fold(
                (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
                |(min, max), v| (min.min(*v), max.max(*v)),
            )
        };

        let hash = content_hash(&(&vertices, &indices))?;

        Ok(Self {
            source: ShapeSource {
                name: name.into(),
                shape_type,
                hash,
            },
            vertices,
            indices,
            local_min,
            local_max,
        })
    }

    /// Axis aligned box centred on the origin
    pub fn cuboid(name: impl Into<String>, half_extents: Vec3) -> Result<Self> {
        let h = half_extents;
        let vertices = vec![
            Vec3::new(-h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, -h.z),
            Vec3::new(h.x, -h.y, h.z),
            Vec3::new(-h.x, -h.y, h.z),
            Vec3::new(-h.x, h.y, -h.z),
            Vec3::new(h.x, h.y, -h.z),
            Vec3::new(h.x, h.y, h.z),
            Vec3::new(-h.x, h.y, h.z),
        ];
        #[rustfmt::skip]
        let indices = vec![
            0, 1, 2, 0, 2, 3, // bottom
            4, 6, 5, 4, 7, 6, // top
            0, 4, 5, 0, 5, 1,
            1, 5, 6, 1, 6, 2,
            2, 6, 7, 2, 7, 3,
            3, 7, 4, 3, 4, 0,
        ];
        Self::new(name, ShapeType::Collision, vertices, indices)
    }

    /// Horizontal square of the given half size at local height 0
    pub fn plane(name: impl Into<String>, half_size: f32) -> Result<Self> {
        let s = half_size;
        let vertices = vec![
            Vec3::new(-s, 0.0, -s),
            Vec3::new(s, 0.0, -s),
            Vec3::new(s, 0.0, s),
            Vec3::new(-s, 0.0, s),
        ];
        Self::new(name, ShapeType::Collision, vertices, vec![0, 2, 1, 0, 3, 2])
    }

    pub fn source(&self) -> &ShapeSource {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.source.name
    }

    pub fn shape_type(&self) -> ShapeType {
        self.source.shape_type
    }

    pub fn hash(&self) -> u64 {
        self.source.hash
    }

    pub fn vertices(&self) -> &[Vec3] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn triangle_count(&self) -> usize {
        self.indices.len() / 3
    }

    /// World space triangles under a transform
    pub fn transformed_triangles<'a>(
        &'a self,
        transform: &'a Affine3A,
    ) -> impl Iterator<Item = [Vec3; 3]> + 'a {
        self.indices.chunks_exact(3).map(move |t| {
            [
                transform.transform_point3(self.vertices[t[0] as usize]),
                transform.transform_point3(self.vertices[t[1] as usize]),
                transform.transform_point3(self.vertices[t[2] as usize]),
            ]
        })
    }

    /// World space bounding box of the shape under a transform
    pub fn world_aabb(&self, transform: &Affine3A) -> (Vec3, Vec3) {
        let (lo, hi) = (self.local_min, self.local_max);
        let corners = [
            Vec3::new(lo.x, lo.y, lo.z),
            Vec3::new(hi.x, lo.y, lo.z),
            Vec3::new(lo.x, hi.y, lo.z),
            Vec3::new(hi.x, hi.y, lo.z),
            Vec3::new(lo.x, lo.y, hi.z),
            Vec3::new(hi.x, lo.y, hi.z),
            Vec3::new(lo.x, hi.y, hi.z),
            Vec3::new(hi.x, hi.y, hi.z),
        ];
        corners.iter().fold(
            (Vec3::splat(f32::MAX), Vec3::splat(f32::MIN)),
            |(min, max), corner| {
                let p = transform.transform_point3(*corner);
                (min.min(p), max.max(p))
            },
        )
    }
}

/// Bit-for-bit transform comparison, so `-0.0` and `0.0` differ and `NaN` equals itself
pub fn same_transform(a: &Affine3A, b: &Affine3A) -> bool {
    a.to_cols_array().map(f32::to_bits) == b.to_cols_array().map(f32::to_bits)
}
