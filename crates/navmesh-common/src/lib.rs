//! Common value types shared by the navigator layers
//!
//! Tile coordinates, geometry descriptions, agent bounds, settings and the
//! crate-wide error type live here so that the tile index, the caches and the
//! build pipeline all speak the same vocabulary.

mod agent_bounds;
mod area;
mod hash;
mod mesh;
mod settings;
mod shape;
mod tile_position;
mod version;

pub use agent_bounds::*;
pub use area::*;
pub use hash::*;
pub use mesh::*;
pub use settings::*;
pub use shape::*;
pub use tile_position::*;
pub use version::*;

/// Error types for the navigator
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid input mesh: {0}")]
    InvalidMesh(String),

    #[error("tile bake failed: {0}")]
    Bake(String),

    #[error("navigation mesh error: {0}")]
    NavMesh(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<postcard::Error> for Error {
    fn from(error: postcard::Error) -> Self {
        Error::Serialization(error.to_string())
    }
}

/// Result type for navigator operations
pub type Result<T> = std::result::Result<T, Error>;
