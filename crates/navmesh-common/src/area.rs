use serde::{Deserialize, Serialize};

/// Area classification attached to every input triangle
///
/// `Null` marks geometry that blocks movement without providing walkable
/// surface.
#[repr(u8)]
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum AreaType {
    Null = 0,
    Water = 1,
    Door = 2,
    Pathgrid = 3,
    #[default]
    Ground = 4,
}

impl AreaType {
    pub fn is_walkable(self) -> bool {
        self != AreaType::Null
    }

    /// Path cost multiplier used by baked polygons
    pub fn cost(self) -> f32 {
        match self {
            AreaType::Null => f32::INFINITY,
            AreaType::Water => 10.0,
            AreaType::Door | AreaType::Pathgrid | AreaType::Ground => 1.0,
        }
    }
}

impl From<AreaType> for u8 {
    fn from(area: AreaType) -> Self {
        area as u8
    }
}

impl TryFrom<u8> for AreaType {
    type Error = crate::Error;

    fn try_from(value: u8) -> crate::Result<Self> {
        match value {
            0 => Ok(AreaType::Null),
            1 => Ok(AreaType::Water),
            2 => Ok(AreaType::Door),
            3 => Ok(AreaType::Pathgrid),
            4 => Ok(AreaType::Ground),
            _ => Err(crate::Error::InvalidArgument(format!(
                "unknown area type {value}"
            ))),
        }
    }
}
