//! Public file API
//!
//! [`Storage`] is the explicit context object owning the mounted volume,
//! the handle pool, the compression arbiter state, and the wall clock.
//! Every call takes `&mut self`, so the single-consumer discipline of the
//! target platform is enforced by the borrow checker instead of a lock.
//!
//! Write-mode opens truncate: save files are whole-file rewrites, and a
//! shorter replacement must not leak the tail of its predecessor.

use crate::catalog::FileAttr;
use crate::clock::WallClock;
use crate::codec::{self, WindowBuf};
use crate::device::BlockDevice;
use crate::error::{Error, Result};
use crate::flash::FlashDriver;
use crate::geometry::CACHE_SIZE;
use crate::pool::{FileHandle, HandlePool, OpenMode};
use crate::volume::Volume;

/// Origin for [`Storage::seek`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Whence {
    /// From the start of the file
    Start,
    /// From the current position
    Current,
    /// From the end of the file
    End,
}

/// Save-data storage manager
pub struct Storage<F: FlashDriver, C: WallClock> {
    volume: Volume<F>,
    pool: HandlePool,
    window: WindowBuf,
    clock: C,
}

impl<F: FlashDriver, C: WallClock> Storage<F, C> {
    /// Mount the flash region, formatting it on first-mount failure
    pub fn init(flash: F, clock: C) -> Result<Self> {
        let device = BlockDevice::new(flash)?;
        let volume = Volume::mount_or_format(device)?;
        tracing::info!(
            "save storage ready: {} files, {} free blocks",
            volume.file_count(),
            volume.free_blocks()
        );
        Ok(Storage {
            volume,
            pool: HandlePool::new(),
            window: WindowBuf::new(),
            clock,
        })
    }

    /// Open a file
    ///
    /// `OpenMode::Write` creates or truncates; `OpenMode::Read` requires
    /// the path to exist. Every successful open stamps the file's
    /// timestamp attribute from the wall clock; a zero clock reading is a
    /// precondition violation and fails before anything is allocated.
    pub fn open(&mut self, path: &str, mode: OpenMode, compressed: bool) -> Result<FileHandle> {
        let now = self.clock.now();
        if now == 0 {
            return Err(Error::ClockNotSet);
        }
        if mode == OpenMode::Read && !self.volume.contains(path) {
            return Err(Error::NotFound(path.to_string()));
        }

        let handle = self.pool.acquire(compressed)?;
        let attr = FileAttr::timestamp(now);

        let size = match mode {
            // read opens refresh the persisted attribute immediately
            OpenMode::Read => match self.volume.touch(path, attr) {
                Ok(size) => size,
                Err(err) => {
                    self.pool.release(handle)?;
                    return Err(err);
                }
            },
            // write opens persist it with the close-time commit
            OpenMode::Write => 0,
        };

        let slot = self.pool.slot_mut(handle)?;
        slot.mode = mode;
        slot.path.push_str(path);
        slot.size = size;
        slot.compressed = compressed;
        slot.attr = attr;
        Ok(handle)
    }

    /// Read up to `buf.len()` bytes at the handle's position
    pub fn read(&mut self, handle: FileHandle, buf: &mut [u8]) -> Result<usize> {
        let Storage { volume, pool, .. } = self;
        let slot = pool.slot_mut(handle)?;
        if slot.compressed {
            return Err(Error::Unsupported("compressed reads are not yet available"));
        }
        if slot.mode != OpenMode::Read {
            return Err(Error::Unsupported("read on a write-mode handle"));
        }

        let mut total = 0;
        while total < buf.len() {
            let chunk = (buf.len() - total).min(CACHE_SIZE);
            let n = volume.read_at(&slot.path, slot.pos, &mut slot.cache[..chunk])?;
            if n == 0 {
                break;
            }
            buf[total..total + n].copy_from_slice(&slot.cache[..n]);
            slot.pos += n as u64;
            total += n;
        }
        Ok(total)
    }

    /// Write `data` at the handle's position
    ///
    /// Content is staged in the handle and committed to flash at close.
    pub fn write(&mut self, handle: FileHandle, data: &[u8]) -> Result<usize> {
        let free_capacity = self.volume.free_capacity();
        let slot = self.pool.slot_mut(handle)?;
        if slot.compressed {
            return Err(Error::Unsupported(
                "compressed writes are not yet available",
            ));
        }
        if slot.mode != OpenMode::Write {
            return Err(Error::Unsupported("write on a read-mode handle"));
        }

        let pos = slot.pos as usize;
        let end = pos + data.len();
        if end as u64 > free_capacity {
            return Err(Error::OutOfSpace);
        }

        if slot.staging.len() < end {
            slot.staging.resize(end, 0);
        }
        slot.staging[pos..end].copy_from_slice(data);
        slot.pos = end as u64;
        slot.size = slot.staging.len() as u64;
        Ok(data.len())
    }

    /// Flush and close the handle, releasing its slot
    ///
    /// Write-mode handles commit their staged content here. The slot is
    /// released even when the commit fails, and compression ownership is
    /// dropped with it, so a failed close never wedges the pool.
    pub fn close(&mut self, handle: FileHandle) -> Result<()> {
        let slot = self.pool.slot(handle)?;
        let commit = (slot.mode == OpenMode::Write && !slot.compressed)
            .then(|| (slot.path.clone(), slot.attr));

        let committed = match commit {
            Some((path, attr)) => {
                let staged = std::mem::take(&mut self.pool.slot_mut(handle)?.staging);
                self.volume.commit(&path, &staged, attr)
            }
            None => Ok(()),
        };

        self.pool.release(handle)?;
        committed
    }

    /// Reposition the handle; not available on compressed streams
    pub fn seek(&mut self, handle: FileHandle, offset: i64, whence: Whence) -> Result<u64> {
        let slot = self.pool.slot_mut(handle)?;
        if slot.compressed {
            return Err(Error::Unsupported(
                "seek on a compressed stream is not randomly addressable",
            ));
        }

        let base = match whence {
            Whence::Start => 0,
            Whence::Current => slot.pos as i64,
            Whence::End => slot.size as i64,
        };
        let target = base
            .checked_add(offset)
            .filter(|&t| t >= 0)
            .ok_or(Error::InvalidSeek(offset))?;

        slot.pos = target as u64;
        Ok(slot.pos)
    }

    /// Write a whole file in one call
    pub fn save(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let handle = self.open(path, OpenMode::Write, false)?;
        let written = self.write(handle, data).map(|_| ());
        let closed = self.close(handle);
        written.and(closed)
    }

    /// Read a whole file in one call
    pub fn load(&mut self, path: &str) -> Result<Vec<u8>> {
        let handle = self.open(path, OpenMode::Read, false)?;
        let size = match self.pool.slot(handle) {
            Ok(slot) => slot.size as usize,
            Err(err) => return Err(err),
        };

        let mut out = vec![0u8; size];
        let result = self.read(handle, &mut out);
        let closed = self.close(handle);
        let n = result?;
        closed?;
        out.truncate(n);
        Ok(out)
    }

    /// Whether `path` exists on the volume
    pub fn exists(&self, path: &str) -> bool {
        self.volume.contains(path)
    }

    /// Stored attribute for `path`
    pub fn attr(&self, path: &str) -> Result<FileAttr> {
        self.volume.attr(path)
    }

    /// Whether compressed file I/O is wired through the codec
    pub fn compression_available(&self) -> bool {
        codec::COMPRESSED_IO_AVAILABLE
    }

    /// Number of currently open handles
    pub fn open_handles(&self) -> usize {
        self.pool.open_count()
    }

    /// Number of files on the volume
    pub fn file_count(&self) -> usize {
        self.volume.file_count()
    }

    /// Free content blocks on the volume
    pub fn free_blocks(&self) -> usize {
        self.volume.free_blocks()
    }

    /// Borrow the shared compression working buffer
    ///
    /// Integration point for the streaming codec; see [`crate::codec`].
    pub fn compression_window(&mut self) -> &mut WindowBuf {
        &mut self.window
    }

    /// Tear down and recover the flash driver
    pub fn into_flash(self) -> F {
        self.volume.into_flash()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::flash::RamFlash;
    use crate::geometry::BLOCK_SIZE;

    fn storage() -> Storage<RamFlash, FixedClock> {
        Storage::init(RamFlash::new(64 * BLOCK_SIZE), FixedClock(1_700_000_000)).unwrap()
    }

    #[test]
    fn test_read_mode_requires_existing() {
        let mut s = storage();
        let result = s.open("missing", OpenMode::Read, false);
        assert!(matches!(result, Err(Error::NotFound(_))));
        // the failed open did not consume a slot
        assert_eq!(s.open_handles(), 0);
    }

    #[test]
    fn test_write_then_read_handle_mode_checks() {
        let mut s = storage();
        let w = s.open("f", OpenMode::Write, false).unwrap();
        let mut buf = [0u8; 4];
        assert!(matches!(s.read(w, &mut buf), Err(Error::Unsupported(_))));
        s.write(w, b"data").unwrap();
        s.close(w).unwrap();

        let r = s.open("f", OpenMode::Read, false).unwrap();
        assert!(matches!(s.write(r, b"x"), Err(Error::Unsupported(_))));
        s.close(r).unwrap();
    }

    #[test]
    fn test_seek_within_read_handle() {
        let mut s = storage();
        s.save("f", b"0123456789").unwrap();

        let h = s.open("f", OpenMode::Read, false).unwrap();
        assert_eq!(s.seek(h, 4, Whence::Start).unwrap(), 4);
        let mut buf = [0u8; 2];
        s.read(h, &mut buf).unwrap();
        assert_eq!(&buf, b"45");

        assert_eq!(s.seek(h, -2, Whence::End).unwrap(), 8);
        s.read(h, &mut buf).unwrap();
        assert_eq!(&buf, b"89");

        assert_eq!(s.seek(h, -4, Whence::Current).unwrap(), 6);
        assert!(matches!(
            s.seek(h, -100, Whence::Current),
            Err(Error::InvalidSeek(-100))
        ));
        s.close(h).unwrap();
    }

    #[test]
    fn test_seek_back_rewrites_staging() {
        let mut s = storage();
        let h = s.open("f", OpenMode::Write, false).unwrap();
        s.write(h, b"aaaaaaaa").unwrap();
        s.seek(h, 2, Whence::Start).unwrap();
        s.write(h, b"bb").unwrap();
        s.close(h).unwrap();

        assert_eq!(s.load("f").unwrap(), b"aabbaaaa");
    }

    #[test]
    fn test_sparse_write_zero_fills() {
        let mut s = storage();
        let h = s.open("f", OpenMode::Write, false).unwrap();
        s.seek(h, 4, Whence::Start).unwrap();
        s.write(h, b"x").unwrap();
        s.close(h).unwrap();

        assert_eq!(s.load("f").unwrap(), b"\0\0\0\0x");
    }

    #[test]
    fn test_write_beyond_capacity() {
        let mut s = storage();
        let free = s.free_blocks() as u64 * BLOCK_SIZE as u64;
        let h = s.open("f", OpenMode::Write, false).unwrap();
        let result = s.write(h, &vec![0u8; free as usize + 1]);
        assert!(matches!(result, Err(Error::OutOfSpace)));
        s.close(h).unwrap();
    }

    #[test]
    fn test_clock_precondition() {
        let mut s = Storage::init(RamFlash::new(16 * BLOCK_SIZE), FixedClock(0)).unwrap();
        let result = s.open("f", OpenMode::Write, false);
        assert!(matches!(result, Err(Error::ClockNotSet)));
        assert_eq!(s.open_handles(), 0);
    }

    #[test]
    fn test_compression_capability_flag() {
        let s = storage();
        assert!(!s.compression_available());
    }
}
