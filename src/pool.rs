//! File handle pool and compression slot arbiter
//!
//! Fixed-capacity bitmask-backed arena of open-file slots. Capacity 2
//! covers the worst-case concurrent-open pattern: reading an old save
//! while writing its replacement. Each slot pre-embeds a private
//! cache-sized I/O buffer, so handle buffers never alias.
//!
//! The arbiter tracks the single compression slot owner. At most one
//! handle may hold it; ownership is cleared exactly when the owning
//! handle is released.

use crate::catalog::FileAttr;
use crate::error::{Error, Result};
use crate::geometry::CACHE_SIZE;

/// Maximum concurrently open handles
pub const POOL_CAPACITY: usize = 2;

/// Open mode selected at `open`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenMode {
    /// Must exist; read-only
    Read,
    /// Create or truncate; write-only
    Write,
}

/// Opaque handle to one pool slot
///
/// Carries the slot generation so a handle kept across a release is
/// detected as stale instead of aliasing a recycled slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle {
    index: usize,
    generation: u32,
}

impl FileHandle {
    pub fn index(&self) -> usize {
        self.index
    }
}

/// Per-slot open-file state
pub(crate) struct Slot {
    generation: u32,
    pub mode: OpenMode,
    pub path: String,
    pub size: u64,
    pub pos: u64,
    pub compressed: bool,
    pub attr: FileAttr,
    /// Private I/O buffer; reads are chunked through it
    pub cache: [u8; CACHE_SIZE],
    /// Staged content for write-mode handles, committed at close
    pub staging: Vec<u8>,
}

impl Slot {
    fn blank() -> Self {
        Slot {
            generation: 0,
            mode: OpenMode::Read,
            path: String::new(),
            size: 0,
            pos: 0,
            compressed: false,
            attr: FileAttr::timestamp(0),
            cache: [0xFF; CACHE_SIZE],
            staging: Vec::new(),
        }
    }

    fn reset(&mut self) {
        self.mode = OpenMode::Read;
        self.path.clear();
        self.size = 0;
        self.pos = 0;
        self.compressed = false;
        self.attr = FileAttr::timestamp(0);
        self.staging.clear();
    }
}

/// Fixed-capacity pool of open-file slots
pub struct HandlePool {
    used: u8,
    slots: [Slot; POOL_CAPACITY],
    compression_owner: Option<usize>,
}

impl HandlePool {
    pub fn new() -> Self {
        HandlePool {
            used: 0,
            slots: std::array::from_fn(|_| Slot::blank()),
            compression_owner: None,
        }
    }

    /// Claim a free slot, optionally claiming the compression slot too
    ///
    /// If compression is requested while the arbiter has an owner, the
    /// just-taken allocation bit is rolled back and the open fails with
    /// `CompressionBusy`.
    pub fn acquire(&mut self, wants_compression: bool) -> Result<FileHandle> {
        let index = (0..POOL_CAPACITY)
            .find(|i| self.used & (1 << i) == 0)
            .ok_or(Error::PoolExhausted)?;
        self.used |= 1 << index;

        if wants_compression {
            if let Some(owner) = self.compression_owner {
                self.used &= !(1 << index);
                return Err(Error::CompressionBusy(owner));
            }
            self.compression_owner = Some(index);
        }

        let slot = &mut self.slots[index];
        slot.generation = slot.generation.wrapping_add(1);
        slot.reset();

        Ok(FileHandle {
            index,
            generation: slot.generation,
        })
    }

    /// Return a slot to the pool
    ///
    /// Releasing a stale or never-issued handle is a programming defect
    /// and fails with `StaleHandle`. Compression ownership is dropped
    /// here if this slot held it.
    pub fn release(&mut self, handle: FileHandle) -> Result<()> {
        self.check(handle)?;
        self.used &= !(1 << handle.index);
        if self.compression_owner == Some(handle.index) {
            self.compression_owner = None;
        }
        Ok(())
    }

    pub(crate) fn slot(&self, handle: FileHandle) -> Result<&Slot> {
        self.check(handle)?;
        Ok(&self.slots[handle.index])
    }

    pub(crate) fn slot_mut(&mut self, handle: FileHandle) -> Result<&mut Slot> {
        self.check(handle)?;
        Ok(&mut self.slots[handle.index])
    }

    /// Current compression slot owner, if any
    pub fn compression_owner(&self) -> Option<usize> {
        self.compression_owner
    }

    /// Number of slots currently allocated
    pub fn open_count(&self) -> usize {
        self.used.count_ones() as usize
    }

    fn check(&self, handle: FileHandle) -> Result<()> {
        if handle.index >= POOL_CAPACITY
            || self.used & (1 << handle.index) == 0
            || self.slots[handle.index].generation != handle.generation
        {
            return Err(Error::StaleHandle);
        }
        Ok(())
    }
}

impl Default for HandlePool {
    fn default() -> Self {
        Self::new()
    }
}
