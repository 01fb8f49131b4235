//! Self-describing compressed stream container.
//!
//! A stream is one fixed header, a sequence of blocks, and a one-byte end
//! marker. Each block runs through two stages: a reversible byte transform,
//! then an entropy coder, both chosen once per stream by tag and rebuilt per
//! block so adaptive state cannot leak across blocks.
//!
//! Stream header (80 bits):
//!
//! ```text
//! magic         32 bits  0x4B414E5A ("KANZ")
//! version        7 bits  2
//! cksum flag     1 bit
//! entropy tag    7 bits
//! transform tag  7 bits
//! block size    26 bits
//! ```
//!
//! Block frame: an 8-bit mode byte. Bit 7 set marks a small block — the low
//! 4 bits hold the length, the raw bytes follow directly, and `0x80` alone
//! ends the stream. Otherwise the low 2 bits select a 1..4-byte transformed
//! length field, a 32-bit xxhash32 of the pre-transform bytes follows when
//! checksums are on, and bit 6 records that the transform was skipped
//! because it failed or expanded. The hash seed is the stream magic.

use std::io::{self, Read, Write};

use log::debug;
use xxhash_rust::xxh32::xxh32;

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::entropy::{entropy_codec_name, EntropyDecoder, EntropyEncoder};
use crate::transform::{transform_name, Transform};
use crate::{KzError, KzResult};

/// Stream magic, "KANZ". Also the block checksum seed.
pub const BITSTREAM_TYPE: u32 = 0x4B41_4E5A;
pub const BITSTREAM_FORMAT_VERSION: u32 = 2;

pub const DEFAULT_BLOCK_SIZE: usize = 1024 * 1024;
pub const MIN_BLOCK_SIZE: usize = 1024;
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024 - 4;

/// Blocks at or under this many bytes are stored raw under the mode byte.
const SMALL_BLOCK_SIZE: usize = 15;

const COPY_LENGTH_MASK: u8 = 0x0F;
const SMALL_BLOCK_MASK: u8 = 0x80;
const SKIP_FUNCTION_MASK: u8 = 0x40;

/// Bit-stream buffer size on the reading side.
const DEFAULT_BUFFER_SIZE: usize = 1024 * 1024;

fn to_io_error(e: KzError) -> io::Error {
    let kind = match &e {
        KzError::Io(inner) => inner.kind(),
        KzError::Format(_) | KzError::Checksum { .. } | KzError::Decode(_) => {
            io::ErrorKind::InvalidData
        }
        _ => io::ErrorKind::Other,
    };
    io::Error::new(kind, e)
}

/// Secondary buffer size: every transform's worst-case output for a block
/// of `block_size` bytes fits.
fn work_buffer_size(block_size: usize) -> usize {
    block_size * 5 / 4 + 64
}

/// Compressing writer. Fills a block-sized buffer from [`write`] calls and
/// emits one block per fill; [`close`] flushes the tail block and the end
/// marker. Also usable through `std::io::Write`.
pub struct CompressedOutputStream<W: Write> {
    obs: OutputBitStream<W>,
    buffer1: Vec<u8>,
    buffer2: Vec<u8>,
    block_size: usize,
    entropy_type: u8,
    transform_type: u8,
    checksum: bool,
    cur_idx: usize,
    block_id: u32,
    initialized: bool,
    closed: bool,
    failed: bool,
}

impl<W: Write> CompressedOutputStream<W> {
    /// Open an encoder over `sink`. `block_size` must lie in
    /// [[`MIN_BLOCK_SIZE`], [`MAX_BLOCK_SIZE`]]; tags must name a known
    /// transform and entropy codec.
    pub fn new(
        sink: W,
        transform_type: u8,
        entropy_type: u8,
        block_size: usize,
        checksum: bool,
    ) -> KzResult<Self> {
        if block_size > MAX_BLOCK_SIZE {
            return Err(KzError::Argument(format!(
                "the block size must be at most {}, got {}",
                MAX_BLOCK_SIZE, block_size
            )));
        }

        if block_size < MIN_BLOCK_SIZE {
            return Err(KzError::Argument(format!(
                "the block size must be at least {}, got {}",
                MIN_BLOCK_SIZE, block_size
            )));
        }

        entropy_codec_name(entropy_type)?;
        transform_name(transform_type)?;

        Ok(Self {
            obs: OutputBitStream::new(sink, block_size)?,
            buffer1: vec![0u8; block_size],
            buffer2: vec![0u8; work_buffer_size(block_size)],
            block_size,
            entropy_type,
            transform_type,
            checksum,
            cur_idx: 0,
            block_id: 0,
            initialized: false,
            closed: false,
            failed: false,
        })
    }

    fn write_header(&mut self) -> KzResult<()> {
        self.obs.write_bits(BITSTREAM_TYPE as u64, 32)?;
        self.obs
            .write_bits(BITSTREAM_FORMAT_VERSION as u64, 7)?;
        self.obs.write_bit(self.checksum as u32)?;
        self.obs.write_bits((self.entropy_type & 0x7F) as u64, 7)?;
        self.obs
            .write_bits((self.transform_type & 0x7F) as u64, 7)?;
        self.obs.write_bits(self.block_size as u64, 26)?;
        Ok(())
    }

    /// Buffer `data`, emitting a block each time the buffer fills.
    pub fn write(&mut self, data: &[u8]) -> KzResult<usize> {
        if self.closed || self.failed {
            return Err(KzError::BitStreamClosed);
        }

        let mut start = 0usize;

        while start < data.len() {
            let chunk = (data.len() - start).min(self.block_size - self.cur_idx);
            self.buffer1[self.cur_idx..self.cur_idx + chunk]
                .copy_from_slice(&data[start..start + chunk]);
            self.cur_idx += chunk;
            start += chunk;

            if self.cur_idx >= self.block_size {
                if let Err(e) = self.process_block() {
                    self.failed = true;
                    return Err(e);
                }
            }
        }

        Ok(data.len())
    }

    fn process_block(&mut self) -> KzResult<()> {
        if self.cur_idx == 0 {
            return Ok(());
        }

        if !self.initialized {
            self.write_header()?;
            self.initialized = true;
        }

        let len = self.cur_idx;
        self.encode_block(len)?;
        self.cur_idx = 0;
        self.block_id += 1;
        Ok(())
    }

    fn encode_block(&mut self, data_len: usize) -> KzResult<()> {
        // Small blocks bypass both stages: the bytes follow the mode byte.
        if data_len <= SMALL_BLOCK_SIZE {
            let mode = SMALL_BLOCK_MASK | (data_len as u8 & COPY_LENGTH_MASK);
            self.obs.write_bits(mode as u64, 8)?;

            for i in 0..data_len {
                self.obs.write_bits(self.buffer1[i] as u64, 8)?;
            }

            debug!("block {}: {} bytes stored raw", self.block_id, data_len);
            return Ok(());
        }

        // The checksum covers the pre-transform bytes.
        let checksum = if self.checksum {
            xxh32(&self.buffer1[..data_len], BITSTREAM_TYPE)
        } else {
            0
        };

        let mut mode = 0u8;

        // A transform only counts when it consumes the whole block without
        // growing it; anything else stores the raw bytes under the skip flag.
        let forward = Transform::new(self.transform_type, data_len)
            .and_then(|mut t| t.forward(&self.buffer1[..data_len], &mut self.buffer2));

        let compressed_length = match forward {
            Ok((consumed, produced)) if consumed == data_len && produced <= data_len => produced,
            _ => {
                self.buffer2[..data_len].copy_from_slice(&self.buffer1[..data_len]);
                mode |= SKIP_FUNCTION_MASK;
                data_len
            }
        };

        // Smallest byte count that can carry the length, stored as N - 1.
        let mut data_size = 1usize;
        while data_size < 4 && compressed_length >= 1usize << (8 * data_size) {
            data_size += 1;
        }
        mode |= ((data_size - 1) as u8) & 0x03;

        let written_before = self.obs.written();

        self.obs.write_bits(mode as u64, 8)?;
        self.obs
            .write_bits(compressed_length as u64, (8 * data_size) as u32)?;

        if self.checksum {
            self.obs.write_bits(checksum as u64, 32)?;
        }

        // Rebuild the entropy coder so its statistics start fresh.
        let mut ee = EntropyEncoder::new(&mut self.obs, self.entropy_type)?;
        ee.encode(&self.buffer2[..compressed_length])?;
        ee.dispose()?;

        debug!(
            "block {}: {} => {} => {} bytes{}{}",
            self.block_id,
            data_len,
            compressed_length,
            (self.obs.written() - written_before + 7) >> 3,
            if mode & SKIP_FUNCTION_MASK != 0 {
                " (transform skipped)"
            } else {
                ""
            },
            if self.checksum {
                format!("  [{:08x}]", checksum)
            } else {
                String::new()
            },
        );

        Ok(())
    }

    /// Flush the pending partial block, write the end marker and close the
    /// bitstream. Idempotent.
    pub fn close(&mut self) -> KzResult<()> {
        if self.closed {
            return Ok(());
        }

        if self.failed {
            return Err(KzError::BitStreamClosed);
        }

        let result = (|| {
            if self.cur_idx > 0 {
                self.process_block()?;
            }

            // An empty stream still carries its header.
            if !self.initialized {
                self.write_header()?;
                self.initialized = true;
            }

            self.obs.write_bits(SMALL_BLOCK_MASK as u64, 8)?;
            self.obs.close()
        })();

        match result {
            Ok(()) => {
                self.closed = true;
                Ok(())
            }
            Err(e) => {
                self.failed = true;
                Err(e)
            }
        }
    }

    /// Compressed bytes produced so far.
    pub fn written(&self) -> u64 {
        (self.obs.written() + 7) >> 3
    }

    /// Recover the sink. Call [`close`](Self::close) first.
    pub fn into_inner(self) -> W {
        self.obs.into_inner()
    }
}

impl<W: Write> Write for CompressedOutputStream<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        CompressedOutputStream::write(self, buf).map_err(to_io_error)
    }

    fn flush(&mut self) -> io::Result<()> {
        // Whole blocks are flushed as they complete; a partial block stays
        // buffered until close, like any block container.
        Ok(())
    }
}

/// Decompressing reader. Parses the stream header on first use, then decodes
/// one block at a time into an internal buffer drained by [`read`]. Also
/// usable through `std::io::Read`.
pub struct CompressedInputStream<R: Read> {
    ibs: InputBitStream<R>,
    buffer1: Vec<u8>,
    buffer2: Vec<u8>,
    block_size: usize,
    entropy_type: u8,
    transform_type: u8,
    checksum: bool,
    cur_idx: usize,
    max_idx: usize,
    block_id: u32,
    initialized: bool,
    ended: bool,
    closed: bool,
    failed: bool,
}

impl<R: Read> CompressedInputStream<R> {
    /// Open a decoder over `source`. The header is read lazily on the first
    /// [`read`](Self::read).
    pub fn new(source: R) -> KzResult<Self> {
        Ok(Self {
            ibs: InputBitStream::new(source, DEFAULT_BUFFER_SIZE)?,
            buffer1: Vec::new(),
            buffer2: Vec::new(),
            block_size: 0,
            entropy_type: 0,
            transform_type: 0,
            checksum: false,
            cur_idx: 0,
            max_idx: 0,
            block_id: 0,
            initialized: false,
            ended: false,
            closed: false,
            failed: false,
        })
    }

    fn read_header(&mut self) -> KzResult<()> {
        let magic = self.ibs.read_bits(32)? as u32;

        if magic != BITSTREAM_TYPE {
            return Err(KzError::Format(format!(
                "invalid stream type: expected {:#x}, got {:#x}",
                BITSTREAM_TYPE, magic
            )));
        }

        let header = self.ibs.read_bits(48)?;
        let version = ((header >> 41) & 0x7F) as u32;

        if version != BITSTREAM_FORMAT_VERSION {
            return Err(KzError::Format(format!(
                "cannot read version {} of the stream format",
                version
            )));
        }

        self.checksum = (header >> 40) & 1 == 1;
        self.entropy_type = ((header >> 33) & 0x7F) as u8;
        self.transform_type = ((header >> 26) & 0x7F) as u8;
        self.block_size = (header & 0x03FF_FFFF) as usize;

        if !(MIN_BLOCK_SIZE..=MAX_BLOCK_SIZE).contains(&self.block_size) {
            return Err(KzError::Format(format!(
                "invalid block size read from stream: {}",
                self.block_size
            )));
        }

        let entropy = entropy_codec_name(self.entropy_type)
            .map_err(|_| KzError::Format(format!("unknown entropy tag {:#x}", self.entropy_type)))?;
        let transform = transform_name(self.transform_type).map_err(|_| {
            KzError::Format(format!("unknown transform tag {:#x}", self.transform_type))
        })?;

        debug!(
            "stream: {} transform, {} entropy, {} byte blocks, checksums {}",
            transform,
            entropy,
            self.block_size,
            if self.checksum { "on" } else { "off" },
        );

        self.buffer1 = vec![0u8; self.block_size];
        self.buffer2 = vec![0u8; work_buffer_size(self.block_size)];
        Ok(())
    }

    /// Read up to `data.len()` decompressed bytes. Returns 0 only at end of
    /// stream.
    pub fn read(&mut self, data: &mut [u8]) -> KzResult<usize> {
        if self.closed || self.failed {
            return Err(KzError::BitStreamClosed);
        }

        let mut start = 0usize;

        loop {
            if self.cur_idx >= self.max_idx {
                if self.ended {
                    return Ok(start);
                }

                match self.process_block() {
                    Ok(decoded) => {
                        self.cur_idx = 0;
                        self.max_idx = decoded;

                        if decoded == 0 {
                            self.ended = true;
                            return Ok(start);
                        }
                    }
                    Err(e) => {
                        self.failed = true;
                        return Err(e);
                    }
                }
            }

            let chunk = (data.len() - start).min(self.max_idx - self.cur_idx);
            if chunk == 0 {
                break;
            }

            data[start..start + chunk]
                .copy_from_slice(&self.buffer1[self.cur_idx..self.cur_idx + chunk]);
            self.cur_idx += chunk;
            start += chunk;
        }

        Ok(start)
    }

    fn process_block(&mut self) -> KzResult<usize> {
        if !self.initialized {
            self.read_header()?;
            self.initialized = true;
        }

        self.decode_block()
    }

    fn decode_block(&mut self) -> KzResult<usize> {
        let mode = self.ibs.read_bits(8)? as u8;

        // Small blocks: raw bytes straight off the bitstream; length 0 is
        // the end-of-stream marker.
        if mode & SMALL_BLOCK_MASK != 0 {
            let n = (mode & COPY_LENGTH_MASK) as usize;

            for i in 0..n {
                self.buffer1[i] = self.ibs.read_bits(8)? as u8;
            }

            if n > 0 {
                debug!("block {}: {} bytes stored raw", self.block_id, n);
                self.block_id += 1;
            }

            return Ok(n);
        }

        let data_size = (mode & 0x03) as usize + 1;
        let compressed_length = self.ibs.read_bits((8 * data_size) as u32)? as usize;

        if compressed_length == 0 || compressed_length > self.block_size {
            return Err(KzError::Format(format!(
                "invalid compressed block length: {}",
                compressed_length
            )));
        }

        let checksum1 = if self.checksum {
            self.ibs.read_bits(32)? as u32
        } else {
            0
        };

        // Rebuild the entropy decoder so its statistics start fresh.
        {
            let mut ed = EntropyDecoder::new(&mut self.ibs, self.entropy_type)?;
            ed.decode(&mut self.buffer2[..compressed_length])?;
            ed.dispose()?;
        }

        let decoded = if mode & SKIP_FUNCTION_MASK != 0 {
            // The encoder stored the pre-transform bytes verbatim.
            self.buffer1[..compressed_length].copy_from_slice(&self.buffer2[..compressed_length]);
            compressed_length
        } else {
            let mut transform = Transform::new(self.transform_type, compressed_length)?;
            let (_, produced) =
                transform.inverse(&self.buffer2[..compressed_length], &mut self.buffer1)?;
            produced
        };

        if self.checksum {
            let checksum2 = xxh32(&self.buffer1[..decoded], BITSTREAM_TYPE);

            if checksum2 != checksum1 {
                return Err(KzError::Checksum {
                    expected: checksum1,
                    found: checksum2,
                });
            }
        }

        debug!(
            "block {}: {} => {} bytes{}",
            self.block_id,
            compressed_length,
            decoded,
            if self.checksum {
                format!("  [{:08x}]", checksum1)
            } else {
                String::new()
            },
        );

        self.block_id += 1;
        Ok(decoded)
    }

    /// Compressed bytes consumed so far.
    pub fn read_bytes(&self) -> u64 {
        (self.ibs.read() + 7) >> 3
    }

    /// Release the bitstream. Idempotent.
    pub fn close(&mut self) -> KzResult<()> {
        if self.closed {
            return Ok(());
        }

        self.closed = true;
        self.ibs.close()
    }
}

impl<R: Read> Read for CompressedInputStream<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        CompressedInputStream::read(self, buf).map_err(to_io_error)
    }
}
