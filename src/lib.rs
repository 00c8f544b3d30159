//! Flash-backed save-data storage
//!
//! A bounded storage manager for game save data on a raw flash region.
//! It adapts byte-addressable flash to block-device semantics, keeps a
//! fixed-capacity pool of open-file handles, arbitrates the single shared
//! compression working buffer, and stamps every opened file with a
//! timestamp attribute.
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │          Flash region (4KB blocks)          │
//! ├─────────────────────────────────────────────┤
//! │ Block 0: Superblock                         │
//! │  - Magic: "SAVE\x00\x01\x00\x00"            │
//! │  - Version, geometry, crc32                 │
//! ├─────────────────────────────────────────────┤
//! │ Blocks 1-2: Catalog region                  │
//! │  - Path → blocks, size, 't' timestamp attr  │
//! │  - Length-prefixed, crc32-protected         │
//! ├─────────────────────────────────────────────┤
//! │ Blocks 3+: File content                     │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust
//! use savefs::{RamFlash, Storage, SystemClock};
//!
//! let flash = RamFlash::new(1 << 20);
//! let mut storage = Storage::init(flash, SystemClock)?;
//!
//! storage.save("boot_counter", &1u32.to_le_bytes())?;
//! let data = storage.load("boot_counter")?;
//! assert_eq!(data, 1u32.to_le_bytes());
//! # Ok::<(), savefs::Error>(())
//! ```
//!
//! ## Hardware coherency
//!
//! Programming flash while it is memory-mapped, or with a warm data
//! cache, yields stale reads afterwards. The block device adapter runs
//! every program/erase inside the mandatory bracket (cache off →
//! invalidate → unmap → operate → remap → cache on), and the drivers
//! refuse out-of-bracket operations so violations surface in tests.

pub mod allocator;
pub mod catalog;
pub mod clock;
pub mod codec;
pub mod device;
pub mod error;
pub mod flash;
pub mod geometry;
pub mod header;
pub mod pool;
pub mod storage;
pub mod volume;

// Re-export commonly used types
pub use allocator::BlockAllocator;
pub use catalog::{Catalog, EntryMeta, FileAttr, ATTR_SIZE, ATTR_TIMESTAMP};
pub use clock::{FixedClock, SystemClock, WallClock};
pub use device::BlockDevice;
pub use error::{Error, Result};
pub use flash::{FileFlash, FlashDriver, RamFlash};
pub use geometry::{Geometry, BLOCK_SIZE, CACHE_SIZE};
pub use header::Header;
pub use pool::{FileHandle, HandlePool, OpenMode, POOL_CAPACITY};
pub use storage::{Storage, Whence};
pub use volume::Volume;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
