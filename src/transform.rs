//! Byte transform selection by tag, and the composed BWT block transform.
//!
//! Transform tags stored in the stream header: 0 = NONE, 1 = BWT pipeline,
//! 2 = BWTS (bijective BWT pipeline), 3 = LZ4, 4 = SNAPPY, 5 = RLT. Only a
//! zero high nibble is recognized.
//!
//! Every transform exposes the same contract: `forward(src, dst)` and
//! `inverse(src, dst)`, both returning `(src_consumed, dst_produced)`. A
//! forward call that cannot consume all of `src`, or produces more than it
//! consumed, is treated by the block engine as "skip transform" and the raw
//! bytes are stored instead.

use crate::bwt;
use crate::lz4::Lz4;
use crate::mtf;
use crate::rle::{Rle, DEFAULT_THRESHOLD};
use crate::snappy::Snappy;
use crate::zle::Zle;
use crate::{KzError, KzResult};

pub const NONE_TYPE: u8 = 0;
pub const BWT_TYPE: u8 = 1;
pub const BWTS_TYPE: u8 = 2;
pub const LZ4_TYPE: u8 = 3;
pub const SNAPPY_TYPE: u8 = 4;
pub const RLT_TYPE: u8 = 5;

/// Human-readable name for a transform tag, or an error for unknown tags.
pub fn transform_name(tag: u8) -> KzResult<&'static str> {
    match tag {
        NONE_TYPE => Ok("NONE"),
        BWT_TYPE => Ok("BWT"),
        BWTS_TYPE => Ok("BWTS"),
        LZ4_TYPE => Ok("LZ4"),
        SNAPPY_TYPE => Ok("SNAPPY"),
        RLT_TYPE => Ok("RLT"),
        _ => Err(KzError::Argument(format!(
            "unknown transform tag: 0x{:02x}",
            tag
        ))),
    }
}

/// Transform tag for a name (case-insensitive).
pub fn transform_tag(name: &str) -> KzResult<u8> {
    match name.to_ascii_uppercase().as_str() {
        "NONE" => Ok(NONE_TYPE),
        "BWT" => Ok(BWT_TYPE),
        "BWTS" => Ok(BWTS_TYPE),
        "LZ4" => Ok(LZ4_TYPE),
        "SNAPPY" => Ok(SNAPPY_TYPE),
        "RLT" | "RLE" => Ok(RLT_TYPE),
        _ => Err(KzError::Argument(format!(
            "unknown transform name: {}",
            name
        ))),
    }
}

/// A transform instance, rebuilt per block by the engine.
pub enum Transform {
    None,
    Block(BlockTransform),
    Lz4(Lz4),
    Snappy(Snappy),
    Rle(usize),
}

impl Transform {
    /// Build the transform for `tag`, sized for blocks up to `block_size`.
    pub fn new(tag: u8, block_size: usize) -> KzResult<Self> {
        match tag {
            NONE_TYPE => Ok(Self::None),
            BWT_TYPE => Ok(Self::Block(BlockTransform::new(block_size, false)?)),
            BWTS_TYPE => Ok(Self::Block(BlockTransform::new(block_size, true)?)),
            LZ4_TYPE => Ok(Self::Lz4(Lz4::new())),
            SNAPPY_TYPE => Ok(Self::Snappy(Snappy::new())),
            RLT_TYPE => Ok(Self::Rle(DEFAULT_THRESHOLD)),
            _ => Err(KzError::Argument(format!(
                "unknown transform tag: 0x{:02x}",
                tag
            ))),
        }
    }

    pub fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        match self {
            Self::None => {
                if dst.len() < src.len() {
                    return Err(KzError::Argument(
                        "null transform destination too small".to_string(),
                    ));
                }
                dst[..src.len()].copy_from_slice(src);
                Ok((src.len(), src.len()))
            }
            Self::Block(t) => t.forward(src, dst),
            Self::Lz4(t) => t.forward(src, dst),
            Self::Snappy(t) => t.forward(src, dst),
            Self::Rle(threshold) => Rle::new(0, *threshold)?.forward(src, dst),
        }
    }

    pub fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        match self {
            Self::None => {
                if dst.len() < src.len() {
                    return Err(KzError::Argument(
                        "null transform destination too small".to_string(),
                    ));
                }
                dst[..src.len()].copy_from_slice(src);
                Ok((src.len(), src.len()))
            }
            Self::Block(t) => t.inverse(src, dst),
            Self::Lz4(t) => t.inverse(src, dst),
            Self::Snappy(t) => t.inverse(src, dst),
            Self::Rle(threshold) => Rle::new(0, *threshold)?.inverse(src, dst),
        }
    }
}

// Mode byte of the block transform's in-payload header.
const COPY_BLOCK_MASK: u8 = 0x80;
const COPY_LENGTH_MASK: u8 = 0x7F;
const NO_ZLE_MASK: u8 = 0x40;
const NO_RLE_MASK: u8 = 0x20;

/// Fixed part of the largest possible in-payload header for the BWT variant.
pub const MAX_BLOCK_HEADER_SIZE: usize = 7;

/// Largest block the composed transform accepts: lengths and the primary
/// index must fit 3 header bytes.
pub const MAX_BLOCK_SIZE: usize = 16 * 1024 * 1024 - MAX_BLOCK_HEADER_SIZE;

/// The composed block transform of the BWT pipeline.
///
/// Forward: (optional RLE) → BWT → MTF → (ZLE unless it expands).
/// Inverse: (ZLE⁻¹) → MTF⁻¹ → BWT⁻¹ → (RLE⁻¹).
///
/// Payload layout: one mode byte — copy flag, NO_RLE / NO_ZLE flags, header
/// field width N ∈ {1,2,3} in the low bits — then the post-transform length
/// in N bytes, then the BWT primary index in N bytes. The bijective variant
/// stores a 16-bit Lyndon factor count followed by N bytes per factor length
/// in place of the primary index (it has no primary index). Blocks under 16
/// bytes are stored as `0x80 | len` plus the raw bytes; the header would
/// cost more than the transform saves.
pub struct BlockTransform {
    buffer: Vec<u8>,
    bijective: bool,
    rle: bool,
}

impl BlockTransform {
    pub fn new(block_size: usize, bijective: bool) -> KzResult<Self> {
        if block_size > MAX_BLOCK_SIZE {
            return Err(KzError::Argument(format!(
                "block transform size must be at most {}, got {}",
                MAX_BLOCK_SIZE, block_size
            )));
        }

        Ok(Self {
            buffer: Vec::new(),
            bijective,
            rle: false,
        })
    }

    /// Enable the run-length pre-pass (threshold 3).
    pub fn with_rle(mut self, rle: bool) -> Self {
        self.rle = rle;
        self
    }

    /// Header field width for values bounded by `block_size`.
    fn header_data_size(block_size: usize) -> usize {
        if block_size <= 0xFF {
            1
        } else if block_size <= 0xFFFF {
            2
        } else {
            3
        }
    }

    fn put_field(dst: &mut [u8], n: usize, value: usize) {
        for i in 0..n {
            dst[i] = (value >> ((n - 1 - i) * 8)) as u8;
        }
    }

    fn get_field(src: &[u8], n: usize) -> usize {
        let mut value = 0usize;
        for &b in &src[..n] {
            value = (value << 8) | b as usize;
        }
        value
    }

    pub fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let block_size = src.len();

        if block_size > MAX_BLOCK_SIZE {
            return Err(KzError::Argument(format!(
                "block length {} exceeds the transform maximum {}",
                block_size, MAX_BLOCK_SIZE
            )));
        }

        if block_size < 16 {
            // The header would dominate; store the bytes under a short header.
            if dst.len() < block_size + 1 {
                return Err(KzError::Argument(
                    "block transform destination too small".to_string(),
                ));
            }

            dst[0] = COPY_BLOCK_MASK | block_size as u8;
            dst[1..=block_size].copy_from_slice(src);
            return Ok((block_size, block_size + 1));
        }

        let mut mode = 0u8;
        let n = Self::header_data_size(block_size);

        // Optional run-length pre-pass; reverted when it expands.
        let mut rle_out = Vec::new();
        let staged: &[u8] = if self.rle {
            rle_out.resize(block_size, 0);
            let rle = Rle::new(0, DEFAULT_THRESHOLD)?;
            let (consumed, produced) = rle.forward(src, &mut rle_out)?;

            if consumed < block_size || produced > block_size {
                mode |= NO_RLE_MASK;
                src
            } else {
                rle_out.truncate(produced);
                &rle_out
            }
        } else {
            mode |= NO_RLE_MASK;
            src
        };

        let data_len = staged.len();

        // BWT, then MTF over the permuted bytes.
        let (bwt_data, index_field_len, factors);
        let primary_index;

        if self.bijective {
            let (data, factor_lengths) = bwt::encode_bijective(staged)
                .ok_or_else(|| KzError::Argument("empty block".to_string()))?;

            if factor_lengths.len() > 0xFFFF {
                return Err(KzError::Argument(format!(
                    "{} Lyndon factors exceed the 16-bit header field",
                    factor_lengths.len()
                )));
            }

            index_field_len = 2 + n * factor_lengths.len();
            factors = factor_lengths;
            primary_index = 0;
            bwt_data = data;
        } else {
            let result =
                bwt::encode(staged).ok_or_else(|| KzError::Argument("empty block".to_string()))?;
            primary_index = result.primary_index as usize;
            index_field_len = n;
            factors = Vec::new();
            bwt_data = result.data;
        }

        let header_size = 1 + n + index_field_len;

        if header_size + data_len > dst.len() {
            return Err(KzError::Argument(format!(
                "block transform needs {} output bytes, has {}",
                header_size + data_len,
                dst.len()
            )));
        }

        if self.buffer.len() < data_len {
            self.buffer.resize(data_len, 0);
        }
        mtf::encode_to_buf(&bwt_data, &mut self.buffer)?;

        // Zero-length encode into place; fall back to the plain MTF output
        // when the block is not zero-biased enough to shrink.
        let zle = Zle::new(data_len);
        let (consumed, produced) = zle.forward(&self.buffer[..data_len], &mut dst[header_size..])?;

        let compressed_length = if consumed < data_len || header_size + produced > block_size {
            dst[header_size..header_size + data_len].copy_from_slice(&self.buffer[..data_len]);
            mode |= NO_ZLE_MASK;
            data_len
        } else {
            produced
        };

        // Header: mode byte, transformed length, then the inversion index.
        mode |= n as u8;
        dst[0] = mode;
        Self::put_field(&mut dst[1..], n, compressed_length);

        let mut idx = 1 + n;
        if self.bijective {
            dst[idx] = (factors.len() >> 8) as u8;
            dst[idx + 1] = factors.len() as u8;
            idx += 2;
            for &f in &factors {
                Self::put_field(&mut dst[idx..], n, f);
                idx += n;
            }
        } else {
            Self::put_field(&mut dst[idx..], n, primary_index);
        }

        Ok((block_size, header_size + compressed_length))
    }

    pub fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        if src.is_empty() {
            return Err(KzError::Decode("empty block payload".to_string()));
        }

        let mode = src[0];

        if mode & COPY_BLOCK_MASK != 0 {
            let length = (mode & COPY_LENGTH_MASK) as usize;

            if src.len() < length + 1 || dst.len() < length {
                return Err(KzError::Decode(format!(
                    "stored block of {} bytes does not fit",
                    length
                )));
            }

            dst[..length].copy_from_slice(&src[1..=length]);
            return Ok((length + 1, length));
        }

        let n = (mode & 0x0F) as usize;
        if !(1..=3).contains(&n) {
            return Err(KzError::Decode(format!(
                "invalid block header field width: {}",
                n
            )));
        }

        if src.len() < 1 + n {
            return Err(KzError::Decode("truncated block header".to_string()));
        }
        let compressed_length = Self::get_field(&src[1..], n);

        // Inversion index: primary index, or the Lyndon factor list.
        let mut idx = 1 + n;
        let mut factors = Vec::new();
        let mut primary_index = 0usize;

        if self.bijective {
            if src.len() < idx + 2 {
                return Err(KzError::Decode("truncated block header".to_string()));
            }
            let count = ((src[idx] as usize) << 8) | src[idx + 1] as usize;
            idx += 2;

            if src.len() < idx + n * count {
                return Err(KzError::Decode("truncated block header".to_string()));
            }
            for _ in 0..count {
                factors.push(Self::get_field(&src[idx..], n));
                idx += n;
            }
        } else {
            if src.len() < idx + n {
                return Err(KzError::Decode("truncated block header".to_string()));
            }
            primary_index = Self::get_field(&src[idx..], n);
            idx += n;
        }

        let header_size = idx;

        if src.len() < header_size + compressed_length {
            return Err(KzError::Decode(format!(
                "block payload of {} bytes is shorter than its declared {}",
                src.len() - header_size,
                compressed_length
            )));
        }

        if self.buffer.len() < dst.len() {
            self.buffer.resize(dst.len(), 0);
        }

        let payload = &src[header_size..header_size + compressed_length];

        // Stage 1: undo the zero-length encoding.
        let data_len = if mode & NO_ZLE_MASK == 0 {
            let zle = Zle::new(compressed_length);
            let (consumed, produced) = zle.inverse(payload, &mut self.buffer)?;

            if consumed < compressed_length {
                return Err(KzError::Decode(format!(
                    "zero-length decode consumed {} of {} payload bytes",
                    consumed, compressed_length
                )));
            }
            produced
        } else {
            if self.buffer.len() < compressed_length {
                return Err(KzError::Decode(
                    "block larger than its declared size".to_string(),
                ));
            }
            self.buffer[..compressed_length].copy_from_slice(payload);
            compressed_length
        };

        if data_len > dst.len() {
            return Err(KzError::Decode(
                "block larger than its declared size".to_string(),
            ));
        }

        // Stage 2: undo MTF (buffer → dst), then the BWT (dst → buffer).
        mtf::decode_to_buf(&self.buffer[..data_len], dst)?;

        if self.bijective {
            let decoded = bwt::decode_bijective(&dst[..data_len], &factors)?;
            self.buffer[..data_len].copy_from_slice(&decoded);
        } else {
            if primary_index >= data_len {
                return Err(KzError::Decode(format!(
                    "BWT primary index {} out of range for {} bytes",
                    primary_index, data_len
                )));
            }
            let (head, _) = self.buffer.split_at_mut(dst.len());
            bwt::decode_to_buf(&dst[..data_len], primary_index as u32, head)?;
        }

        // Stage 3: undo the run-length pre-pass.
        let produced = if mode & NO_RLE_MASK == 0 {
            let rle = Rle::new(data_len, DEFAULT_THRESHOLD)?;
            let (consumed, produced) = rle.inverse(&self.buffer[..data_len], dst)?;

            if consumed < data_len {
                return Err(KzError::Decode(format!(
                    "run-length decode consumed {} of {} bytes",
                    consumed, data_len
                )));
            }
            produced
        } else {
            dst[..data_len].copy_from_slice(&self.buffer[..data_len]);
            data_len
        };

        Ok((header_size + compressed_length, produced))
    }
}
