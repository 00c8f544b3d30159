//! Bitmap allocator for content blocks
//!
//! Tracks free/allocated state with one bit per 4KB block:
//! - 0 = free block
//! - 1 = allocated block
//!
//! Allocation scans from a rolling hint so successive saves spread across
//! the region instead of hammering the first free blocks.

use crate::error::{Error, Result};

/// Fixed-capacity bitmap block allocator
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    /// Bitmap words (each word = 64 bits = 64 blocks)
    bitmap: Vec<u64>,

    /// Total number of blocks tracked
    total_blocks: usize,

    /// Number of free blocks available
    free_blocks: usize,

    /// Next block to consider, wraps at `total_blocks`
    hint: usize,
}

impl BlockAllocator {
    /// Create an allocator with every block free
    pub fn new(total_blocks: usize) -> Self {
        let num_words = (total_blocks + 63) / 64;
        BlockAllocator {
            bitmap: vec![0u64; num_words],
            total_blocks,
            free_blocks: total_blocks,
            hint: 0,
        }
    }

    /// Create an allocator with the first `reserved` blocks pre-allocated
    pub fn with_reserved(total_blocks: usize, reserved: u32) -> Self {
        let mut alloc = Self::new(total_blocks);
        for block in 0..reserved {
            alloc.set(block as usize);
            alloc.free_blocks -= 1;
        }
        alloc.hint = reserved as usize;
        alloc
    }

    /// Allocate `count` blocks, not necessarily contiguous
    ///
    /// On failure nothing is allocated.
    pub fn allocate(&mut self, count: usize) -> Result<Vec<u32>> {
        if count > self.free_blocks {
            return Err(Error::OutOfSpace);
        }

        let mut allocated = Vec::with_capacity(count);
        for step in 0..self.total_blocks {
            if allocated.len() == count {
                break;
            }
            let block = (self.hint + step) % self.total_blocks;
            if !self.get(block) {
                self.set(block);
                allocated.push(block as u32);
            }
        }

        if allocated.len() != count {
            // free_blocks said there was room; the bitmap disagrees
            for &block in &allocated {
                self.clear(block as usize);
            }
            return Err(Error::OutOfSpace);
        }

        self.hint = (*allocated.last().unwrap_or(&0) as usize + 1) % self.total_blocks;
        self.free_blocks -= count;
        Ok(allocated)
    }

    /// Free previously allocated blocks
    pub fn free(&mut self, blocks: &[u32]) -> Result<()> {
        for &block in blocks {
            if block as usize >= self.total_blocks {
                return Err(Error::InvalidBlockId(block));
            }
            if !self.get(block as usize) {
                tracing::warn!("double-free detected for block {}", block);
                continue;
            }
            self.clear(block as usize);
            self.free_blocks += 1;
        }
        Ok(())
    }

    /// Mark one block allocated while rebuilding state at mount
    ///
    /// Fails on out-of-range ids and on blocks claimed twice, both of
    /// which mean the catalog is corrupt.
    pub fn mark_allocated(&mut self, block: u32) -> Result<()> {
        if block as usize >= self.total_blocks {
            return Err(Error::InvalidBlockId(block));
        }
        if self.get(block as usize) {
            return Err(Error::InvalidBlockId(block));
        }
        self.set(block as usize);
        self.free_blocks -= 1;
        Ok(())
    }

    pub fn is_allocated(&self, block: u32) -> bool {
        (block as usize) < self.total_blocks && self.get(block as usize)
    }

    pub fn total_blocks(&self) -> usize {
        self.total_blocks
    }

    pub fn free_blocks(&self) -> usize {
        self.free_blocks
    }

    fn get(&self, block: usize) -> bool {
        (self.bitmap[block / 64] & (1u64 << (block % 64))) != 0
    }

    fn set(&mut self, block: usize) {
        self.bitmap[block / 64] |= 1u64 << (block % 64);
    }

    fn clear(&mut self, block: usize) {
        self.bitmap[block / 64] &= !(1u64 << (block % 64));
    }
}
