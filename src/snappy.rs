//! Snappy block format codec.
//!
//! Each encoded block starts with the varint-encoded length of the decoded
//! data, followed by chunks. The low 2 bits of a chunk's first byte are the
//! tag: 0 = literal run, 1 = copy with 1-byte offset (offset < 2048, length
//! 4..11), 2 = copy with 2-byte little-endian offset (length 1..64),
//! 3 = copy with 4-byte offset (accepted on decode, never emitted).
//! Literal lengths up to 60 live in the tag byte; longer runs put the length
//! in 1..4 trailing little-endian bytes.
//!
//! The match finder is the same shape as the LZ4 codec's: greedy probing of
//! a 4-byte prefix hash table.

use crate::{KzError, KzResult};

const HASH_SEED: u32 = 0x9E37_79B1;
const HASH_LOG: u32 = 13;

const TAG_LITERAL: u8 = 0x00;
const TAG_COPY_1: u8 = 0x01;
const TAG_COPY_2: u8 = 0x02;
const TAG_COPY_4: u8 = 0x03;

/// Longest offset a 2-byte copy can express.
const MAX_OFFSET: usize = 65_535;

/// Worst-case encoded size for `src_len` input bytes.
pub fn max_encoded_len(src_len: usize) -> usize {
    32 + src_len + src_len / 6
}

/// Snappy block encoder/decoder. The hash table is allocated once per
/// instance and cleared on each forward call.
pub struct Snappy {
    table: Vec<i32>,
}

impl Snappy {
    pub fn new() -> Self {
        Self {
            table: vec![0i32; 1 << HASH_LOG],
        }
    }

    /// Forward transform. Returns (source bytes consumed, bytes produced).
    pub fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let count = src.len();

        let needed = max_encoded_len(count);
        if dst.len() < needed {
            return Err(KzError::Argument(format!(
                "Snappy output buffer too small: {} < {}",
                dst.len(),
                needed
            )));
        }

        let mut dst_idx = write_varint(dst, count as u64);

        if count < 4 {
            if count > 0 {
                dst_idx += emit_literal(&src[..count], &mut dst[dst_idx..]);
            }
            return Ok((count, dst_idx));
        }

        for slot in &mut self.table {
            *slot = 0;
        }

        let hash = |v: u32| -> usize { (v.wrapping_mul(HASH_SEED) >> (32 - HASH_LOG)) as usize };
        let read4 = |s: &[u8], i: usize| -> u32 {
            u32::from_le_bytes([s[i], s[i + 1], s[i + 2], s[i + 3]])
        };

        let mut s = 1usize;
        let mut anchor = 0usize;

        while s + 3 < count {
            let h = hash(read4(src, s));
            let candidate = self.table[h] as usize;
            self.table[h] = s as i32;

            if s - candidate <= MAX_OFFSET && read4(src, candidate) == read4(src, s) {
                if s > anchor {
                    dst_idx += emit_literal(&src[anchor..s], &mut dst[dst_idx..]);
                }

                let mut matched = 4usize;
                while s + matched < count && src[candidate + matched] == src[s + matched] {
                    matched += 1;
                }

                dst_idx += emit_copy(&mut dst[dst_idx..], s - candidate, matched);
                s += matched;
                anchor = s;
            } else {
                s += 1;
            }
        }

        if anchor < count {
            dst_idx += emit_literal(&src[anchor..], &mut dst[dst_idx..]);
        }

        Ok((count, dst_idx))
    }

    /// Inverse transform. Returns (source bytes consumed, bytes produced).
    pub fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let src_end = src.len();
        let (expected, mut src_idx) = read_varint(src)?;
        let expected = expected as usize;

        if expected > dst.len() {
            return Err(KzError::Decode(format!(
                "Snappy declared length {} exceeds output buffer {}",
                expected,
                dst.len()
            )));
        }

        let mut dst_idx = 0usize;

        while src_idx < src_end {
            let tag = src[src_idx];
            src_idx += 1;

            match tag & 0x03 {
                TAG_LITERAL => {
                    let m = (tag >> 2) as usize;
                    let length = if m < 60 {
                        m + 1
                    } else {
                        // 60..63 select 1..4 trailing length bytes.
                        let n = m - 59;
                        if src_idx + n > src_end {
                            return Err(KzError::Decode(
                                "truncated Snappy literal length".to_string(),
                            ));
                        }
                        let mut v = 0usize;
                        for i in 0..n {
                            v |= (src[src_idx + i] as usize) << (8 * i);
                        }
                        src_idx += n;
                        v + 1
                    };

                    if src_idx + length > src_end || dst_idx + length > dst.len() {
                        return Err(KzError::Decode(
                            "Snappy literal run out of bounds".to_string(),
                        ));
                    }

                    dst[dst_idx..dst_idx + length]
                        .copy_from_slice(&src[src_idx..src_idx + length]);
                    src_idx += length;
                    dst_idx += length;
                }
                copy => {
                    let (length, offset) = match copy {
                        TAG_COPY_1 => {
                            if src_idx >= src_end {
                                return Err(KzError::Decode("truncated Snappy copy".to_string()));
                            }
                            let length = 4 + ((tag >> 2) & 0x07) as usize;
                            let offset =
                                (((tag >> 5) as usize) << 8) | src[src_idx] as usize;
                            src_idx += 1;
                            (length, offset)
                        }
                        TAG_COPY_2 => {
                            if src_idx + 2 > src_end {
                                return Err(KzError::Decode("truncated Snappy copy".to_string()));
                            }
                            let length = 1 + (tag >> 2) as usize;
                            let offset =
                                src[src_idx] as usize | ((src[src_idx + 1] as usize) << 8);
                            src_idx += 2;
                            (length, offset)
                        }
                        _ => {
                            if src_idx + 4 > src_end {
                                return Err(KzError::Decode("truncated Snappy copy".to_string()));
                            }
                            let length = 1 + (tag >> 2) as usize;
                            let offset = src[src_idx] as usize
                                | ((src[src_idx + 1] as usize) << 8)
                                | ((src[src_idx + 2] as usize) << 16)
                                | ((src[src_idx + 3] as usize) << 24);
                            src_idx += 4;
                            (length, offset)
                        }
                    };

                    if offset == 0 || offset > dst_idx || dst_idx + length > dst.len() {
                        return Err(KzError::Decode(format!(
                            "invalid Snappy copy: offset {} length {} at {}",
                            offset, length, dst_idx
                        )));
                    }

                    // May overlap; copy byte by byte.
                    let from = dst_idx - offset;
                    for i in 0..length {
                        dst[dst_idx + i] = dst[from + i];
                    }
                    dst_idx += length;
                }
            }
        }

        if dst_idx != expected {
            return Err(KzError::Decode(format!(
                "Snappy decoded {} bytes, header declared {}",
                dst_idx, expected
            )));
        }

        Ok((src_end, dst_idx))
    }
}

impl Default for Snappy {
    fn default() -> Self {
        Self::new()
    }
}

/// Write `v` as a little-endian base-128 varint. Returns the bytes written.
fn write_varint(dst: &mut [u8], mut v: u64) -> usize {
    let mut idx = 0;

    while v >= 0x80 {
        dst[idx] = (v as u8) | 0x80;
        v >>= 7;
        idx += 1;
    }

    dst[idx] = v as u8;
    idx + 1
}

/// Read a varint. Returns (value, bytes consumed).
fn read_varint(src: &[u8]) -> KzResult<(u64, usize)> {
    let mut v = 0u64;
    let mut shift = 0u32;
    let mut idx = 0usize;

    loop {
        if idx >= src.len() || shift > 63 {
            return Err(KzError::Decode("truncated Snappy varint header".to_string()));
        }

        let b = src[idx];
        idx += 1;
        v |= ((b & 0x7F) as u64) << shift;

        if b < 0x80 {
            return Ok((v, idx));
        }

        shift += 7;
    }
}

/// Emit one literal run (tag + optional length bytes + data).
/// Returns the bytes written.
fn emit_literal(lits: &[u8], dst: &mut [u8]) -> usize {
    let n = lits.len() - 1;

    let idx = if n < 60 {
        dst[0] = ((n as u8) << 2) | TAG_LITERAL;
        1
    } else {
        let bytes = match n {
            n if n < 1 << 8 => 1,
            n if n < 1 << 16 => 2,
            n if n < 1 << 24 => 3,
            _ => 4,
        };
        dst[0] = (((59 + bytes) as u8) << 2) | TAG_LITERAL;

        let mut idx = 1;
        for i in 0..bytes {
            dst[idx] = (n >> (8 * i)) as u8;
            idx += 1;
        }
        idx
    };

    dst[idx..idx + lits.len()].copy_from_slice(lits);
    idx + lits.len()
}

/// Emit copy chunks for a match of `length` bytes at `offset` back.
/// Returns the bytes written.
fn emit_copy(dst: &mut [u8], offset: usize, mut length: usize) -> usize {
    let mut idx = 0usize;

    // Long matches go out as 64-byte 2-byte-offset copies; leave at least 4
    // bytes so the tail can use the short form when it qualifies.
    while length >= 68 {
        dst[idx] = (63 << 2) | TAG_COPY_2;
        dst[idx + 1] = offset as u8;
        dst[idx + 2] = (offset >> 8) as u8;
        idx += 3;
        length -= 64;
    }

    if length > 64 {
        dst[idx] = (59 << 2) | TAG_COPY_2;
        dst[idx + 1] = offset as u8;
        dst[idx + 2] = (offset >> 8) as u8;
        idx += 3;
        length -= 60;
    }

    if length >= 12 || offset >= 2048 {
        dst[idx] = (((length - 1) as u8) << 2) | TAG_COPY_2;
        dst[idx + 1] = offset as u8;
        dst[idx + 2] = (offset >> 8) as u8;
        idx + 3
    } else {
        dst[idx] = (((length - 4) as u8) << 2) | (((offset >> 8) as u8) << 5) | TAG_COPY_1;
        dst[idx + 1] = offset as u8;
        idx + 2
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &[u8]) -> usize {
        let mut codec = Snappy::new();
        let mut encoded = vec![0u8; max_encoded_len(input.len())];
        let (consumed, produced) = codec.forward(input, &mut encoded).unwrap();
        assert_eq!(consumed, input.len());

        let mut decoded = vec![0u8; input.len()];
        let (_, written) = codec.inverse(&encoded[..produced], &mut decoded).unwrap();
        assert_eq!(written, input.len());
        assert_eq!(&decoded[..], input);
        produced
    }

    #[test]
    fn test_varint_round_trip() {
        for v in [0u64, 1, 127, 128, 300, 65_535, 1 << 20, (1 << 24) - 1] {
            let mut buf = [0u8; 10];
            let n = write_varint(&mut buf, v);
            let (back, consumed) = read_varint(&buf[..n]).unwrap();
            assert_eq!(back, v);
            assert_eq!(consumed, n);
        }
    }

    #[test]
    fn test_empty() {
        let mut codec = Snappy::new();
        let mut dst = vec![0u8; 32];
        let (consumed, produced) = codec.forward(&[], &mut dst).unwrap();
        assert_eq!(consumed, 0);
        assert_eq!(produced, 1); // varint 0 only

        let mut out = vec![0u8; 4];
        let (_, written) = codec.inverse(&dst[..produced], &mut out).unwrap();
        assert_eq!(written, 0);
    }

    #[test]
    fn test_short_literal_only() {
        round_trip(b"abc");
        round_trip(b"snappy");
    }

    #[test]
    fn test_repetitive_compresses() {
        let mut input = Vec::new();
        for _ in 0..300 {
            input.extend(b"0123456789");
        }
        let produced = round_trip(&input);
        assert!(produced < input.len() / 4, "produced {} bytes", produced);
    }

    #[test]
    fn test_long_run_uses_chained_copies() {
        let input = vec![b'r'; 5000];
        let produced = round_trip(&input);
        assert!(produced < 300, "produced {} bytes", produced);
    }

    #[test]
    fn test_long_literal_run() {
        // > 60 distinct bytes force the multi-byte literal length form.
        let input: Vec<u8> = (0u32..300).map(|i| (i * 7 + 3) as u8).collect();
        round_trip(&input);
    }

    #[test]
    fn test_text_round_trip() {
        let mut input = Vec::new();
        for i in 0..200 {
            input.extend(format!("packet {} payload field\n", i % 17).into_bytes());
        }
        round_trip(&input);
    }

    #[test]
    fn test_far_matches_use_two_byte_offset() {
        let mut input = vec![0u8; 4096];
        for (i, b) in input.iter_mut().enumerate() {
            *b = (i % 251) as u8;
        }
        // Repeat the prefix far away so the offset exceeds 2047.
        let prefix: Vec<u8> = input[..64].to_vec();
        input.extend_from_slice(&prefix);
        round_trip(&input);
    }

    #[test]
    fn test_inverse_rejects_bad_offset() {
        let mut codec = Snappy::new();
        // Declared length 4; copy2 with offset 9 before anything was written.
        let bad = [4u8, (3 << 2) | TAG_COPY_2, 9, 0];
        let mut dst = vec![0u8; 16];
        assert!(matches!(
            codec.inverse(&bad, &mut dst),
            Err(KzError::Decode(_))
        ));
    }

    #[test]
    fn test_inverse_rejects_length_mismatch() {
        let mut codec = Snappy::new();
        // Declared length 10 but only 3 literal bytes follow.
        let bad = [10u8, (2 << 2) | TAG_LITERAL, b'a', b'b', b'c'];
        let mut dst = vec![0u8; 16];
        assert!(matches!(
            codec.inverse(&bad, &mut dst),
            Err(KzError::Decode(_))
        ));
    }
}
