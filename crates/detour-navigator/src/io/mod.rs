//! Encoding of tiles for the persistent store

mod compressor;
mod tile_data;

pub use compressor::*;
pub use tile_data::*;
