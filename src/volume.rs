//! Mounted volume
//!
//! Owns the block device, superblock, catalog, and block allocator for one
//! flash region. Mounting validates the superblock and catalog and
//! rebuilds the allocator from the catalog's block references; a mount
//! failure on an unformatted or corrupt region formats and retries once.
//!
//! Commits are ordered so a device fault mid-write leaves the previous
//! catalog image intact on flash: content blocks are programmed first,
//! the catalog region last.

use crate::allocator::BlockAllocator;
use crate::catalog::{Catalog, EntryMeta, FileAttr};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::flash::FlashDriver;
use crate::geometry::{
    BLOCK_SIZE, CACHE_SIZE, CATALOG_BLOCKS, CATALOG_START, RESERVED_BLOCKS, SUPERBLOCK_BLOCK,
};
use crate::header::Header;

/// One mounted filesystem instance
pub struct Volume<F: FlashDriver> {
    device: BlockDevice<F>,
    header: Header,
    catalog: Catalog,
    allocator: BlockAllocator,
}

impl<F: FlashDriver> Volume<F> {
    /// Mount, formatting on first failure
    ///
    /// A second mount failure after a successful format is fatal and
    /// propagates to the caller; storage is mandatory for operation.
    pub fn mount_or_format(mut device: BlockDevice<F>) -> Result<Self> {
        match Self::try_mount(&device) {
            Ok((header, catalog, allocator)) => {
                tracing::info!(
                    "mounted volume: {} files, {} free blocks",
                    catalog.len(),
                    allocator.free_blocks()
                );
                Ok(Volume {
                    device,
                    header,
                    catalog,
                    allocator,
                })
            }
            Err(err) => {
                tracing::warn!("mount failed ({}), formatting", err);
                Self::format(&mut device)?;
                let (header, catalog, allocator) = Self::try_mount(&device)?;
                tracing::info!("formatted and mounted blank volume");
                Ok(Volume {
                    device,
                    header,
                    catalog,
                    allocator,
                })
            }
        }
    }

    /// Write a blank superblock and empty catalog
    pub fn format(device: &mut BlockDevice<F>) -> Result<()> {
        let geometry = device.geometry();
        let header = Header::for_geometry(&geometry);

        device.erase(SUPERBLOCK_BLOCK)?;
        device.program(SUPERBLOCK_BLOCK, 0, &header.to_bytes())?;

        let image = Catalog::new().to_bytes()?;
        program_catalog_region(device, &image)?;

        tracing::info!("formatted volume: {} blocks", geometry.block_count);
        Ok(())
    }

    fn try_mount(device: &BlockDevice<F>) -> Result<(Header, Catalog, BlockAllocator)> {
        let geometry = device.geometry();

        let mut sb = [0u8; CACHE_SIZE];
        device.read(SUPERBLOCK_BLOCK, 0, &mut sb)?;
        let header = Header::from_bytes(&sb)?;

        if header.block_count != geometry.block_count
            || header.block_size != geometry.block_size
            || header.catalog_start != CATALOG_START
            || header.catalog_blocks != CATALOG_BLOCKS
        {
            return Err(Error::GeometryMismatch {
                recorded: header.block_count,
                actual: geometry.block_count,
            });
        }

        let mut image = vec![0u8; CATALOG_BLOCKS as usize * BLOCK_SIZE];
        for i in 0..CATALOG_BLOCKS {
            let start = i as usize * BLOCK_SIZE;
            device.read(CATALOG_START + i, 0, &mut image[start..start + BLOCK_SIZE])?;
        }
        let catalog = Catalog::from_bytes(&image)?;

        // rebuild allocation state; duplicate or out-of-range references
        // mean the catalog is corrupt and the mount must fail
        let mut allocator =
            BlockAllocator::with_reserved(geometry.block_count as usize, RESERVED_BLOCKS);
        for block in catalog.allocated_blocks() {
            if block < RESERVED_BLOCKS {
                return Err(Error::InvalidBlockId(block));
            }
            allocator.mark_allocated(block)?;
        }

        Ok((header, catalog, allocator))
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn contains(&self, path: &str) -> bool {
        self.catalog.contains(path)
    }

    pub fn file_count(&self) -> usize {
        self.catalog.len()
    }

    pub fn free_blocks(&self) -> usize {
        self.allocator.free_blocks()
    }

    /// Byte capacity usable by a single file right now
    pub fn free_capacity(&self) -> u64 {
        self.allocator.free_blocks() as u64 * BLOCK_SIZE as u64
    }

    /// Entry metadata for `path`
    pub fn lookup(&self, path: &str) -> Result<&EntryMeta> {
        self.catalog
            .get(path)
            .ok_or_else(|| Error::NotFound(path.to_string()))
    }

    /// Attribute stored for `path`
    pub fn attr(&self, path: &str) -> Result<FileAttr> {
        Ok(self.lookup(path)?.attr)
    }

    /// Refresh the timestamp attribute and persist the catalog.
    /// Returns the entry size for the caller's handle state.
    pub fn touch(&mut self, path: &str, attr: FileAttr) -> Result<u64> {
        let size = {
            let entry = self
                .catalog
                .get_mut(path)
                .ok_or_else(|| Error::NotFound(path.to_string()))?;
            entry.attr = attr;
            entry.size
        };

        let image = self.catalog.to_bytes()?;
        self.check_catalog_capacity(image.len())?;
        program_catalog_region(&mut self.device, &image)?;
        Ok(size)
    }

    /// Read up to `buf.len()` bytes of `path` starting at byte `pos`
    ///
    /// Returns the number of bytes read; zero at or past end of file.
    pub fn read_at(&self, path: &str, pos: u64, buf: &mut [u8]) -> Result<usize> {
        let entry = self.lookup(path)?;
        if pos >= entry.size {
            return Ok(0);
        }

        let wanted = (buf.len() as u64).min(entry.size - pos) as usize;
        let mut copied = 0;
        let mut pos = pos as usize;
        while copied < wanted {
            let block_index = pos / BLOCK_SIZE;
            let offset = pos % BLOCK_SIZE;
            let chunk = (wanted - copied).min(BLOCK_SIZE - offset);
            let block = entry
                .blocks
                .get(block_index)
                .copied()
                .ok_or(Error::InvalidBlockId(block_index as u32))?;
            self.device
                .read(block, offset as u32, &mut buf[copied..copied + chunk])?;
            copied += chunk;
            pos += chunk;
        }
        Ok(wanted)
    }

    /// Replace the content of `path` with `data`, stamping `attr`
    ///
    /// The new catalog image is staged first so an oversized catalog
    /// rejects the commit before any flash is touched. Blocks of a
    /// previous version are freed only after the new image is on flash.
    pub fn commit(&mut self, path: &str, data: &[u8], attr: FileAttr) -> Result<()> {
        let needed = (data.len() + BLOCK_SIZE - 1) / BLOCK_SIZE;
        let blocks = self.allocator.allocate(needed)?;
        let meta = EntryMeta {
            size: data.len() as u64,
            blocks: blocks.clone(),
            attr,
        };

        let mut staged = self.catalog.clone();
        staged.insert(path.to_string(), meta.clone());
        let image = match staged.to_bytes() {
            Ok(image) => image,
            Err(err) => {
                self.allocator.free(&blocks)?;
                return Err(err);
            }
        };
        if let Err(err) = self.check_catalog_capacity(image.len()) {
            self.allocator.free(&blocks)?;
            return Err(err);
        }

        let programmed = self
            .program_content(&blocks, data)
            .and_then(|()| program_catalog_region(&mut self.device, &image));
        match programmed {
            Ok(()) => {
                if let Some(old) = self.catalog.insert(path.to_string(), meta) {
                    self.allocator.free(&old.blocks)?;
                }
                self.device.sync()
            }
            Err(err) => {
                self.allocator.free(&blocks)?;
                Err(err)
            }
        }
    }

    fn program_content(&mut self, blocks: &[u32], data: &[u8]) -> Result<()> {
        for (i, &block) in blocks.iter().enumerate() {
            self.device.erase(block)?;

            let start = i * BLOCK_SIZE;
            let end = (start + BLOCK_SIZE).min(data.len());
            let mut chunk = data[start..end].to_vec();
            let padded = (chunk.len() + CACHE_SIZE - 1) / CACHE_SIZE * CACHE_SIZE;
            chunk.resize(padded, 0xFF);
            self.device.program(block, 0, &chunk)?;
        }
        Ok(())
    }

    fn check_catalog_capacity(&self, needed: usize) -> Result<()> {
        let capacity = self.device.geometry().catalog_capacity();
        if needed > capacity {
            return Err(Error::CatalogOverflow { needed, capacity });
        }
        Ok(())
    }

    /// Tear down and recover the flash driver
    pub fn into_flash(self) -> F {
        self.device.into_flash()
    }
}

/// Erase the catalog region and program a fresh image
fn program_catalog_region<F: FlashDriver>(
    device: &mut BlockDevice<F>,
    image: &[u8],
) -> Result<()> {
    let mut padded = image.to_vec();
    let len = (padded.len() + CACHE_SIZE - 1) / CACHE_SIZE * CACHE_SIZE;
    padded.resize(len, 0xFF);

    for i in 0..CATALOG_BLOCKS {
        device.erase(CATALOG_START + i)?;
    }
    for (i, chunk) in padded.chunks(BLOCK_SIZE).enumerate() {
        device.program(CATALOG_START + i as u32, 0, chunk)?;
    }
    Ok(())
}
