//! Stable content hashing
//!
//! Hashes are computed over the postcard encoding of a value so they only
//! depend on content, never on addresses or allocation order.

use crate::Result;
use rustc_hash::FxHasher;
use serde::Serialize;
use std::hash::Hasher;

pub fn hash_bytes(bytes: &[u8]) -> u64 {
    let mut hasher = FxHasher::default();
    hasher.write_usize(bytes.len());
    hasher.write(bytes);
    hasher.finish()
}

pub fn content_hash<T: Serialize + ?Sized>(value: &T) -> Result<u64> {
    let bytes = postcard::to_allocvec(value)?;
    Ok(hash_bytes(&bytes))
}
