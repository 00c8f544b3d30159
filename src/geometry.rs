//! Block device geometry
//!
//! The flash region is carved into fixed 4KB blocks. Block count is always
//! derived from the region length, never hardcoded. The first blocks are
//! reserved for the superblock and the catalog region; everything after
//! them holds file content.

use crate::error::{Error, Result};

/// Erase unit and block size in bytes
pub const BLOCK_SIZE: usize = 4096;

/// Per-handle I/O buffer size; also the program granularity
pub const CACHE_SIZE: usize = 256;

/// Allocator lookahead window in bytes (8 blocks tracked per byte)
pub const LOOKAHEAD_SIZE: usize = 16;

/// Erase-cycle budget per block, informing external wear policy
pub const BLOCK_CYCLES: u32 = 500;

/// Block holding the superblock
pub const SUPERBLOCK_BLOCK: u32 = 0;

/// First block of the catalog region
pub const CATALOG_START: u32 = 1;

/// Catalog region length in blocks
pub const CATALOG_BLOCKS: u32 = 2;

/// Blocks reserved ahead of file content
pub const RESERVED_BLOCKS: u32 = CATALOG_START + CATALOG_BLOCKS;

/// Smallest usable region: reserved blocks plus one content block
pub const MIN_BLOCKS: u32 = RESERVED_BLOCKS + 1;

/// Geometry of one mounted flash region
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Geometry {
    /// Block size in bytes (always 4096)
    pub block_size: u32,

    /// Total number of blocks, derived from the region length
    pub block_count: u32,

    /// Per-handle cache buffer size; program granularity
    pub cache_size: u32,

    /// Allocator lookahead window in bytes
    pub lookahead_size: u32,

    /// Configured erase cycles per block
    pub block_cycles: u32,
}

impl Geometry {
    /// Derive geometry for a flash region of `region_len` bytes
    ///
    /// Trailing bytes that do not fill a whole block are ignored.
    pub fn for_region(region_len: usize) -> Result<Self> {
        let block_count = (region_len / BLOCK_SIZE) as u32;
        if block_count < MIN_BLOCKS {
            return Err(Error::RegionTooSmall {
                len: region_len,
                min_blocks: MIN_BLOCKS,
            });
        }

        Ok(Geometry {
            block_size: BLOCK_SIZE as u32,
            block_count,
            cache_size: CACHE_SIZE as u32,
            lookahead_size: LOOKAHEAD_SIZE as u32,
            block_cycles: BLOCK_CYCLES,
        })
    }

    /// Number of blocks available for file content
    pub fn content_blocks(&self) -> u32 {
        self.block_count - RESERVED_BLOCKS
    }

    /// Byte capacity of the catalog region
    pub fn catalog_capacity(&self) -> usize {
        CATALOG_BLOCKS as usize * BLOCK_SIZE
    }

    /// Byte capacity available for file content
    pub fn content_capacity(&self) -> u64 {
        self.content_blocks() as u64 * BLOCK_SIZE as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_geometry_from_region() {
        let geom = Geometry::for_region(1 << 20).unwrap();
        assert_eq!(geom.block_size, 4096);
        assert_eq!(geom.block_count, 256);
        assert_eq!(geom.content_blocks(), 253);
        assert_eq!(geom.cache_size, 256);
        assert_eq!(geom.lookahead_size, 16);
        assert_eq!(geom.block_cycles, 500);
    }

    #[test]
    fn test_trailing_bytes_ignored() {
        let geom = Geometry::for_region(8 * BLOCK_SIZE + 100).unwrap();
        assert_eq!(geom.block_count, 8);
    }

    #[test]
    fn test_region_too_small() {
        let result = Geometry::for_region(2 * BLOCK_SIZE);
        assert!(matches!(result, Err(Error::RegionTooSmall { .. })));
    }

    #[test]
    fn test_catalog_capacity() {
        let geom = Geometry::for_region(1 << 20).unwrap();
        assert_eq!(geom.catalog_capacity(), 8192);
        assert_eq!(geom.content_capacity(), 253 * 4096);
    }
}
