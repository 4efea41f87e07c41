use std::io::Result as IoResult;

/// Compression of stored tile blobs
pub trait TileDataCompressor: Send + Sync {
    fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>>;

    fn decompress(&self, data: &[u8]) -> IoResult<Vec<u8>>;
}

/// LZ4 block compression with the uncompressed size prepended
#[derive(Debug, Clone, Copy, Default)]
pub struct Lz4Compressor;

impl TileDataCompressor for Lz4Compressor {
    fn compress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        Ok(lz4_flex::compress_prepend_size(data))
    }

    fn decompress(&self, data: &[u8]) -> IoResult<Vec<u8>> {
        lz4_flex::decompress_size_prepended(data)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))
    }
}
