//! Streaming LZ4 codec over the shared window buffer
//!
//! Exactly one compression working buffer exists per storage instance,
//! and the pool arbiter guarantees at most one handle is associated with
//! it. The codec itself is complete and tested standalone, but it is NOT
//! wired into the file I/O path: how partial reads and writes interact
//! with codec-internal buffering is an open protocol question, so
//! [`COMPRESSED_IO_AVAILABLE`] is `false` and compressed file I/O fails
//! with an explicit `Unsupported` error rather than silently bypassing
//! the codec.
//!
//! Frame format: each `u32` little-endian length prefix is followed by an
//! LZ4 block with its decompressed size prepended.

use crate::error::{Error, Result};

/// Whether compressed file I/O is wired through the codec
pub const COMPRESSED_IO_AVAILABLE: bool = false;

/// Shared compression window size in bytes
pub const WINDOW_SIZE: usize = 32 * 1024;

/// The single shared compression working buffer
pub struct WindowBuf {
    buf: Box<[u8; WINDOW_SIZE]>,
}

impl WindowBuf {
    pub fn new() -> Self {
        WindowBuf {
            buf: Box::new([0u8; WINDOW_SIZE]),
        }
    }
}

impl Default for WindowBuf {
    fn default() -> Self {
        Self::new()
    }
}

/// Streaming compressor borrowing the shared window
///
/// Input accumulates in the window; each time it fills, one frame is
/// emitted. `flush` frames whatever remains.
pub struct Compressor<'w> {
    window: &'w mut WindowBuf,
    fill: usize,
    out: Vec<u8>,
}

impl<'w> Compressor<'w> {
    pub fn init(window: &'w mut WindowBuf) -> Self {
        Compressor {
            window,
            fill: 0,
            out: Vec::new(),
        }
    }

    /// Feed input bytes, emitting frames as the window fills
    pub fn push(&mut self, mut input: &[u8]) {
        while !input.is_empty() {
            let room = WINDOW_SIZE - self.fill;
            let take = input.len().min(room);
            self.window.buf[self.fill..self.fill + take].copy_from_slice(&input[..take]);
            self.fill += take;
            input = &input[take..];

            if self.fill == WINDOW_SIZE {
                self.emit_frame();
            }
        }
    }

    /// Frame any buffered remainder
    pub fn flush(&mut self) {
        if self.fill > 0 {
            self.emit_frame();
        }
    }

    /// Drain all compressed output produced so far
    pub fn pull(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }

    fn emit_frame(&mut self) {
        let frame = lz4_flex::compress_prepend_size(&self.window.buf[..self.fill]);
        self.out
            .extend_from_slice(&(frame.len() as u32).to_le_bytes());
        self.out.extend_from_slice(&frame);
        self.fill = 0;
    }
}

/// Streaming decompressor for the compressor's frame stream
///
/// Frames decompress into the shared window, never past its bound.
pub struct Decompressor<'w> {
    window: &'w mut WindowBuf,
    pending: Vec<u8>,
    out: Vec<u8>,
}

impl<'w> Decompressor<'w> {
    pub fn init(window: &'w mut WindowBuf) -> Self {
        Decompressor {
            window,
            pending: Vec::new(),
            out: Vec::new(),
        }
    }

    /// Feed compressed bytes; whole frames decompress immediately
    pub fn push(&mut self, input: &[u8]) -> Result<()> {
        self.pending.extend_from_slice(input);

        loop {
            if self.pending.len() < 4 {
                return Ok(());
            }
            let frame_len = u32::from_le_bytes([
                self.pending[0],
                self.pending[1],
                self.pending[2],
                self.pending[3],
            ]) as usize;
            if self.pending.len() < 4 + frame_len {
                return Ok(());
            }

            let frame = &self.pending[4..4 + frame_len];
            if frame.len() < 4 {
                return Err(Error::Codec("frame shorter than its size prefix".into()));
            }
            let decoded_len =
                u32::from_le_bytes([frame[0], frame[1], frame[2], frame[3]]) as usize;
            if decoded_len > WINDOW_SIZE {
                return Err(Error::Codec(format!(
                    "frame claims {} bytes, window is {}",
                    decoded_len, WINDOW_SIZE
                )));
            }

            let written =
                lz4_flex::block::decompress_into(&frame[4..], &mut self.window.buf[..decoded_len])
                    .map_err(|e| Error::Codec(format!("LZ4 decompression failed: {}", e)))?;
            self.out.extend_from_slice(&self.window.buf[..written]);
            self.pending.drain(..4 + frame_len);
        }
    }

    /// A partial trailing frame means the stream was truncated
    pub fn flush(&mut self) -> Result<()> {
        if self.pending.is_empty() {
            Ok(())
        } else {
            Err(Error::Codec("truncated compressed stream".into()))
        }
    }

    /// Drain all decompressed output produced so far
    pub fn pull(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.out)
    }
}
