//! Raw flash driver collaborators
//!
//! [`FlashDriver`] models a NOR flash part behind a memory-mapped
//! controller. Reads go through the mapped view and are only valid while
//! memory-mapped mode is enabled; program and erase are only legal while it
//! is disabled. The driver enforces both directions so a missing coherency
//! bracket in the layer above surfaces as an error instead of a stale read.
//!
//! Two implementations are provided: [`RamFlash`], an in-memory simulation
//! with fault injection for tests, and [`FileFlash`], a file-backed region
//! via `memmap2` that persists across process runs.

use crate::error::{Error, Result};
use crate::geometry::BLOCK_SIZE;
use memmap2::MmapMut;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

/// Raw flash primitives consumed by the block device adapter
pub trait FlashDriver {
    /// Region length in bytes
    fn capacity(&self) -> usize;

    /// Copy from the memory-mapped view; requires mapped mode on
    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()>;

    /// Synchronous program (NOR semantics: bits only clear); requires
    /// mapped mode off and data cache off
    fn program(&mut self, addr: u32, data: &[u8]) -> Result<()>;

    /// Synchronous erase of whole blocks back to 0xFF; same mode
    /// requirements as `program`, and `addr`/`len` must be block-aligned
    fn erase(&mut self, addr: u32, len: u32) -> Result<()>;

    /// Enter or leave memory-mapped access mode
    fn set_memory_mapped(&mut self, enabled: bool);

    /// Enable or disable the data cache over the mapped region
    fn set_data_cache(&mut self, enabled: bool);

    /// Invalidate the data cache over the mapped region
    fn invalidate_data_cache(&mut self);
}

fn check_range(capacity: usize, addr: u32, len: usize) -> Result<()> {
    let end = addr as usize + len;
    if end > capacity {
        return Err(Error::OutOfRange {
            addr,
            len: len as u32,
        });
    }
    Ok(())
}

fn check_erase_alignment(addr: u32, len: u32) -> Result<()> {
    if addr as usize % BLOCK_SIZE != 0 || len as usize % BLOCK_SIZE != 0 || len == 0 {
        return Err(Error::UnalignedErase {
            addr,
            required: BLOCK_SIZE as u32,
        });
    }
    Ok(())
}

/// In-memory NOR flash simulation
///
/// Starts fully erased (0xFF). Tracks per-block erase counts and supports
/// injecting transient program faults to exercise the adapter's retry
/// policy.
pub struct RamFlash {
    mem: Vec<u8>,
    mapped: bool,
    cache_enabled: bool,
    erase_counts: Vec<u32>,
    program_faults: u32,
}

impl RamFlash {
    /// Create a fully erased region of `len` bytes
    pub fn new(len: usize) -> Self {
        RamFlash {
            mem: vec![0xFF; len],
            mapped: true,
            cache_enabled: true,
            erase_counts: vec![0; len / BLOCK_SIZE],
            program_faults: 0,
        }
    }

    /// Fail the next `n` program operations with a transient device fault
    pub fn inject_program_faults(&mut self, n: u32) {
        self.program_faults = n;
    }

    /// Erase count for one block
    pub fn erase_count(&self, block: u32) -> u32 {
        self.erase_counts.get(block as usize).copied().unwrap_or(0)
    }

    /// Overwrite one byte directly, bypassing program semantics.
    /// Test helper for simulating bit rot and torn writes.
    pub fn corrupt(&mut self, addr: u32, value: u8) {
        if let Some(byte) = self.mem.get_mut(addr as usize) {
            *byte = value;
        }
    }
}

impl FlashDriver for RamFlash {
    fn capacity(&self) -> usize {
        self.mem.len()
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        if !self.mapped {
            return Err(Error::CoherencyViolation(
                "read while memory-mapped mode is disabled",
            ));
        }
        check_range(self.mem.len(), addr, buf.len())?;
        let start = addr as usize;
        buf.copy_from_slice(&self.mem[start..start + buf.len()]);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if self.mapped {
            return Err(Error::CoherencyViolation(
                "program while memory-mapped mode is enabled",
            ));
        }
        if self.cache_enabled {
            return Err(Error::CoherencyViolation(
                "program while data cache is enabled",
            ));
        }
        check_range(self.mem.len(), addr, data.len())?;
        if self.program_faults > 0 {
            self.program_faults -= 1;
            return Err(Error::DeviceFault { addr });
        }
        let start = addr as usize;
        for (dst, src) in self.mem[start..start + data.len()].iter_mut().zip(data) {
            *dst &= src;
        }
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        if self.mapped {
            return Err(Error::CoherencyViolation(
                "erase while memory-mapped mode is enabled",
            ));
        }
        if self.cache_enabled {
            return Err(Error::CoherencyViolation(
                "erase while data cache is enabled",
            ));
        }
        check_erase_alignment(addr, len)?;
        check_range(self.mem.len(), addr, len as usize)?;
        let start = addr as usize;
        self.mem[start..start + len as usize].fill(0xFF);
        for block in (start / BLOCK_SIZE)..((start + len as usize) / BLOCK_SIZE) {
            self.erase_counts[block] += 1;
        }
        Ok(())
    }

    fn set_memory_mapped(&mut self, enabled: bool) {
        self.mapped = enabled;
    }

    fn set_data_cache(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    fn invalidate_data_cache(&mut self) {
        // the simulation has no stale lines to drop
    }
}

/// File-backed flash region
///
/// Memory-maps a fixed-size file so the mapped view plays the role of
/// memory-mapped flash. Contents persist across instances, which is what
/// the mount-idempotency tests exercise.
pub struct FileFlash {
    map: MmapMut,
    mapped: bool,
    cache_enabled: bool,
}

impl FileFlash {
    /// Create or reopen a region file of exactly `len` bytes
    ///
    /// A new or empty file is extended to `len` and filled with 0xFF
    /// (erased). An existing file must already be `len` bytes.
    pub fn create<P: AsRef<Path>>(path: P, len: usize) -> Result<Self> {
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .open(&path)?;

        let existing = file.metadata()?.len() as usize;
        if existing == 0 {
            file.write_all(&vec![0xFF; len])?;
            file.flush()?;
        } else if existing != len {
            return Err(Error::GeometryMismatch {
                recorded: (existing / BLOCK_SIZE) as u32,
                actual: (len / BLOCK_SIZE) as u32,
            });
        }

        let map = unsafe { MmapMut::map_mut(&file)? };
        Ok(FileFlash {
            map,
            mapped: true,
            cache_enabled: true,
        })
    }
}

impl FlashDriver for FileFlash {
    fn capacity(&self) -> usize {
        self.map.len()
    }

    fn read(&self, addr: u32, buf: &mut [u8]) -> Result<()> {
        if !self.mapped {
            return Err(Error::CoherencyViolation(
                "read while memory-mapped mode is disabled",
            ));
        }
        check_range(self.map.len(), addr, buf.len())?;
        let start = addr as usize;
        buf.copy_from_slice(&self.map[start..start + buf.len()]);
        Ok(())
    }

    fn program(&mut self, addr: u32, data: &[u8]) -> Result<()> {
        if self.mapped {
            return Err(Error::CoherencyViolation(
                "program while memory-mapped mode is enabled",
            ));
        }
        if self.cache_enabled {
            return Err(Error::CoherencyViolation(
                "program while data cache is enabled",
            ));
        }
        check_range(self.map.len(), addr, data.len())?;
        let start = addr as usize;
        for (dst, src) in self.map[start..start + data.len()].iter_mut().zip(data) {
            *dst &= src;
        }
        self.map.flush_range(start, data.len())?;
        Ok(())
    }

    fn erase(&mut self, addr: u32, len: u32) -> Result<()> {
        if self.mapped {
            return Err(Error::CoherencyViolation(
                "erase while memory-mapped mode is enabled",
            ));
        }
        if self.cache_enabled {
            return Err(Error::CoherencyViolation(
                "erase while data cache is enabled",
            ));
        }
        check_erase_alignment(addr, len)?;
        check_range(self.map.len(), addr, len as usize)?;
        let start = addr as usize;
        self.map[start..start + len as usize].fill(0xFF);
        self.map.flush_range(start, len as usize)?;
        Ok(())
    }

    fn set_memory_mapped(&mut self, enabled: bool) {
        self.mapped = enabled;
    }

    fn set_data_cache(&mut self, enabled: bool) {
        self.cache_enabled = enabled;
    }

    fn invalidate_data_cache(&mut self) {
        // mmap view is always coherent with the backing file
    }
}
