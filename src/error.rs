use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("no free file handle slot")]
    PoolExhausted,

    #[error("compression slot already owned by handle slot {0}")]
    CompressionBusy(usize),

    #[error("file not found: {0}")]
    NotFound(String),

    #[error("operation not supported: {0}")]
    Unsupported(&'static str),

    #[error("device fault at 0x{addr:08x}")]
    DeviceFault { addr: u32 },

    #[error("program address 0x{addr:08x} not aligned to {required}-byte granularity")]
    UnalignedProgram { addr: u32, required: u32 },

    #[error("erase address 0x{addr:08x} not aligned to {required}-byte blocks")]
    UnalignedErase { addr: u32, required: u32 },

    #[error("flash coherency violation: {0}")]
    CoherencyViolation(&'static str),

    #[error("access beyond device range: 0x{addr:08x}+{len}")]
    OutOfRange { addr: u32, len: u32 },

    #[error("invalid magic number in superblock")]
    InvalidMagic,

    #[error("unsupported volume version: {major}.{minor}")]
    UnsupportedVersion { major: u16, minor: u16 },

    #[error("checksum verification failed")]
    ChecksumMismatch,

    #[error("volume geometry mismatch: superblock records {recorded} blocks, device has {actual}")]
    GeometryMismatch { recorded: u32, actual: u32 },

    #[error("flash region too small: {len} bytes, need at least {min_blocks} blocks")]
    RegionTooSmall { len: usize, min_blocks: u32 },

    #[error("out of space: no free content blocks")]
    OutOfSpace,

    #[error("catalog region full: image is {needed} bytes, capacity {capacity}")]
    CatalogOverflow { needed: usize, capacity: usize },

    #[error("invalid block id: {0}")]
    InvalidBlockId(u32),

    #[error("stale or untracked file handle")]
    StaleHandle,

    #[error("seek target out of range: {0}")]
    InvalidSeek(i64),

    #[error("wall clock not initialized")]
    ClockNotSet,

    #[error("compression codec error: {0}")]
    Codec(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("catalog serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
