//! LZ4 block format codec.
//!
//! Produces and consumes the LZ4 block format: a token byte with 4-bit
//! literal and match lengths (0xFF continuation bytes past 15), literals,
//! then a 2-byte little-endian match offset. Minimum match 4 bytes, maximum
//! offset 65 535 — or effectively unlimited for blocks under 64 KiB + 11
//! bytes, where every position is reachable. The match finder hashes 4-byte
//! prefixes into a position table and backs off progressively when probes
//! keep missing, so incompressible data is scanned quickly.
//!
//! The encoder consumes every input byte and emits a valid block regardless
//! of compressibility; a block shorter than 14 bytes is emitted as literals
//! only.

use crate::{KzError, KzResult};

const HASH_SEED: u32 = 0x9E37_79B1;
const HASH_LOG: u32 = 12;
const HASH_LOG_64K: u32 = 13;
const MAX_DISTANCE: usize = 1 << 16;
const MAX_DISTANCE_64K: usize = 0x7FFF_FFFF;
const SKIP_STRENGTH: usize = 6;
const LAST_LITERALS: usize = 5;
const MIN_MATCH: usize = 4;
const MF_LIMIT: usize = 12;
const LZ4_64K_LIMIT: usize = (1 << 16) + (MF_LIMIT - 1);
const ML_BITS: usize = 4;
const ML_MASK: usize = (1 << ML_BITS) - 1;
const RUN_BITS: usize = 8 - ML_BITS;
const RUN_MASK: usize = (1 << RUN_BITS) - 1;
const COPY_LENGTH: usize = 8;
const MIN_LENGTH: usize = 14;
const DEFAULT_FIND_MATCH_ATTEMPTS: usize = (1 << SKIP_STRENGTH) + 3;

/// Worst-case encoded size for `src_len` input bytes.
pub fn max_encoded_len(src_len: usize) -> usize {
    src_len + (src_len / 255) + 16
}

/// LZ4 block encoder/decoder. The hash table is allocated once per instance
/// and cleared on each forward call.
pub struct Lz4 {
    table: Vec<i32>,
}

impl Lz4 {
    pub fn new() -> Self {
        Self {
            table: vec![0i32; 1 << HASH_LOG_64K],
        }
    }

    /// Forward transform. Returns (source bytes consumed, bytes produced).
    pub fn forward(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let count = src.len();

        let needed = max_encoded_len(count);
        if dst.len() < needed {
            return Err(KzError::Argument(format!(
                "LZ4 output buffer too small: {} < {}",
                dst.len(),
                needed
            )));
        }

        if count < LZ4_64K_LIMIT {
            self.compress(src, dst, HASH_LOG_64K, MAX_DISTANCE_64K)
        } else {
            self.compress(src, dst, HASH_LOG, MAX_DISTANCE)
        }
    }

    fn compress(
        &mut self,
        src: &[u8],
        dst: &mut [u8],
        hash_log: u32,
        dist: usize,
    ) -> KzResult<(usize, usize)> {
        let count = src.len();

        if count < MIN_LENGTH {
            let (_, produced, _) = emit_literals(src, dst, count, true);
            return Ok((count, produced));
        }

        let hash_shift = 32 - hash_log;
        let src_limit = count - LAST_LITERALS;
        let mf_limit = count - MF_LIMIT;
        let mut src_idx = 0usize;
        let mut dst_idx = 0usize;
        let mut anchor = 0usize;
        src_idx += 1;

        for slot in &mut self.table[..1 << hash_log] {
            *slot = 0;
        }

        let hash = |v: u32| -> usize { (v.wrapping_mul(HASH_SEED) >> hash_shift) as usize };
        let read4 = |s: &[u8], i: usize| -> u32 {
            u32::from_le_bytes([s[i], s[i + 1], s[i + 2], s[i + 3]])
        };

        loop {
            let mut attempts = DEFAULT_FIND_MATCH_ATTEMPTS;
            let mut r;

            // Probe for a 4-byte match, backing off as attempts accumulate.
            loop {
                let h = hash(read4(src, src_idx));
                r = self.table[h] as usize;
                self.table[h] = src_idx as i32;

                if src_idx - r < dist && read4(src, r) == read4(src, src_idx) {
                    break;
                }

                src_idx += attempts >> SKIP_STRENGTH;
                attempts += 1;

                if src_idx > mf_limit {
                    let (_, delta, _) =
                        emit_literals(&src[anchor..], &mut dst[dst_idx..], count - anchor, true);
                    return Ok((count, dst_idx + delta));
                }
            }

            // Extend the match backwards over pending literals.
            while r > 0 && src_idx > anchor && src[r - 1] == src[src_idx - 1] {
                r -= 1;
                src_idx -= 1;
            }

            // Emit the literal run, leaving a slot for the token.
            let run_len = src_idx - anchor;
            let mut token_off = dst_idx;
            dst_idx += 1;
            let (_, delta, mut token) =
                emit_literals(&src[anchor..], &mut dst[dst_idx..], run_len, false);
            dst_idx += delta;

            loop {
                // Match offset, little-endian.
                let offset = src_idx - r;
                dst[dst_idx] = offset as u8;
                dst[dst_idx + 1] = (offset >> 8) as u8;
                dst_idx += 2;

                // Extend the match forward.
                src_idx += MIN_MATCH;
                let mut match_len = 0usize;
                let mut i1 = src_idx;
                let mut i2 = r + MIN_MATCH;

                while i1 < src_limit && src[i2] == src[i1] {
                    i1 += 1;
                    i2 += 1;
                    match_len += 1;
                }

                src_idx += match_len;

                // Finish the token with the match length.
                if match_len >= ML_MASK {
                    dst[token_off] = (token | ML_MASK) as u8;
                    dst_idx += write_length(&mut dst[dst_idx..], match_len - ML_MASK);
                } else {
                    dst[token_off] = (token | match_len) as u8;
                }

                if src_idx > mf_limit {
                    let (_, delta, _) =
                        emit_literals(&src[src_idx..], &mut dst[dst_idx..], count - src_idx, true);
                    return Ok((count, dst_idx + delta));
                }

                // Try to chain a match at the current position without
                // emitting literals in between.
                let h1 = hash(read4(src, src_idx - 2));
                self.table[h1] = (src_idx - 2) as i32;
                let h2 = hash(read4(src, src_idx));
                r = self.table[h2] as usize;
                self.table[h2] = src_idx as i32;

                if src_idx - r >= dist || read4(src, r) != read4(src, src_idx) {
                    break;
                }

                token_off = dst_idx;
                dst_idx += 1;
                token = 0;
            }

            anchor = src_idx;
            src_idx += 1;
        }
    }

    /// Inverse transform. Returns (source bytes consumed, bytes produced).
    pub fn inverse(&mut self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let src_end = src.len();
        let dst_end = dst.len();
        let src_end2 = src_end.saturating_sub(COPY_LENGTH);
        let dst_end2 = dst_end.saturating_sub(COPY_LENGTH);
        let mut src_idx = 0usize;
        let mut dst_idx = 0usize;

        while src_idx < src_end {
            let token = src[src_idx] as usize;
            src_idx += 1;

            // Literal run.
            let mut length = token >> ML_BITS;

            if length == RUN_MASK {
                while src_idx < src_end && src[src_idx] == 0xFF {
                    src_idx += 1;
                    length += 0xFF;
                }

                if src_idx >= src_end {
                    return Err(KzError::Decode("truncated LZ4 literal length".to_string()));
                }

                length += src[src_idx] as usize;
                src_idx += 1;
            }

            if src_idx + length > src_end || dst_idx + length > dst_end {
                return Err(KzError::Decode("LZ4 literal run out of bounds".to_string()));
            }

            dst[dst_idx..dst_idx + length].copy_from_slice(&src[src_idx..src_idx + length]);
            src_idx += length;
            dst_idx += length;

            if dst_idx > dst_end2 || src_idx > src_end2 {
                break;
            }

            // Match copy.
            let delta = src[src_idx] as usize | ((src[src_idx + 1] as usize) << 8);
            src_idx += 2;

            if delta == 0 || delta > dst_idx {
                return Err(KzError::Decode(format!(
                    "invalid LZ4 match offset: {}",
                    delta
                )));
            }

            let match_offset = dst_idx - delta;
            let mut length = token & ML_MASK;

            if length == ML_MASK {
                while src_idx < src_end && src[src_idx] == 0xFF {
                    src_idx += 1;
                    length += 0xFF;
                }

                if src_idx >= src_end {
                    return Err(KzError::Decode("truncated LZ4 match length".to_string()));
                }

                length += src[src_idx] as usize;
                src_idx += 1;
            }

            length += MIN_MATCH;

            if dst_idx + length > dst_end {
                return Err(KzError::Decode("LZ4 match run out of bounds".to_string()));
            }

            // The source range may overlap the destination; copy byte by byte.
            for i in 0..length {
                dst[dst_idx + i] = dst[match_offset + i];
            }

            dst_idx += length;
        }

        Ok((src_end, dst_idx))
    }
}

impl Default for Lz4 {
    fn default() -> Self {
        Self::new()
    }
}

/// Append 0xFF continuation bytes plus the final remainder for a length that
/// overflowed its 4-bit token field. Returns the bytes written.
fn write_length(dst: &mut [u8], mut length: usize) -> usize {
    let mut index = 0;

    while length >= 0xFF {
        dst[index] = 0xFF;
        length -= 0xFF;
        index += 1;
    }

    dst[index] = length as u8;
    index + 1
}

/// Emit a literal run. When `last` is set this is the block's tail: the token
/// itself is written here (no match follows). Otherwise the caller has
/// reserved the token slot and receives the partial token value.
/// Returns (literals consumed, bytes written, token value).
fn emit_literals(src: &[u8], dst: &mut [u8], run_len: usize, last: bool) -> (usize, usize, usize) {
    let token;
    let mut dst_idx = 0usize;

    if run_len >= RUN_MASK {
        token = RUN_MASK << ML_BITS;

        if last {
            dst[dst_idx] = token as u8;
            dst_idx += 1;
        }

        dst_idx += write_length(&mut dst[dst_idx..], run_len - RUN_MASK);
    } else {
        token = run_len << ML_BITS;

        if last {
            dst[dst_idx] = token as u8;
            dst_idx += 1;
        }
    }

    dst[dst_idx..dst_idx + run_len].copy_from_slice(&src[..run_len]);

    (run_len, dst_idx + run_len, token)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(input: &[u8]) -> usize {
        let mut lz4 = Lz4::new();
        let mut encoded = vec![0u8; max_encoded_len(input.len())];
        let (consumed, produced) = lz4.forward(input, &mut encoded).unwrap();
        assert_eq!(consumed, input.len());

        let mut decoded = vec![0u8; input.len()];
        let (_, written) = lz4.inverse(&encoded[..produced], &mut decoded).unwrap();
        assert_eq!(written, input.len());
        assert_eq!(&decoded[..], input);
        produced
    }

    #[test]
    fn test_empty() {
        let mut lz4 = Lz4::new();
        let mut dst = vec![0u8; 16];
        let (consumed, produced) = lz4.forward(&[], &mut dst).unwrap();
        assert_eq!(consumed, 0);
        // A lone zero token (empty literal run).
        assert_eq!(produced, 1);
    }

    #[test]
    fn test_tiny_block_literals_only() {
        let input = b"hello!";
        let produced = round_trip(input);
        // token + 6 literals
        assert_eq!(produced, 7);
    }

    #[test]
    fn test_repetitive_compresses() {
        let mut input = Vec::new();
        for _ in 0..200 {
            input.extend(b"abcdefgh");
        }
        let produced = round_trip(&input);
        assert!(produced < input.len() / 4, "produced {} bytes", produced);
    }

    #[test]
    fn test_long_run() {
        let input = vec![0xAAu8; 10_000];
        let produced = round_trip(&input);
        assert!(produced < 100, "produced {} bytes", produced);
    }

    #[test]
    fn test_text_round_trip() {
        let mut input = Vec::new();
        for i in 0..100 {
            input.extend(format!("line {} of the test corpus\n", i).into_bytes());
        }
        round_trip(&input);
    }

    #[test]
    fn test_incompressible_round_trip() {
        // Pseudo-random bytes: no 4-byte repeats to speak of.
        let input: Vec<u8> = (0u64..4096)
            .map(|i| (i.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407) >> 33) as u8)
            .collect();
        let produced = round_trip(&input);
        assert!(produced >= input.len());
        assert!(produced <= max_encoded_len(input.len()));
    }

    #[test]
    fn test_large_block_over_64k() {
        // Exceeds the 64K fast path; exercises the 2-byte offset limit.
        let mut input = Vec::new();
        for i in 0..20_000u32 {
            input.extend((i % 1000).to_le_bytes());
        }
        round_trip(&input);
    }

    #[test]
    fn test_literal_run_over_15() {
        // Forces the 0xFF literal-length continuation path.
        let mut input: Vec<u8> = (0..=255u8).collect();
        input.extend(vec![b'q'; 64]);
        input.extend(0..=255u8);
        round_trip(&input);
    }

    #[test]
    fn test_inverse_rejects_bad_offset() {
        let mut lz4 = Lz4::new();
        // Token: 1 literal, match len 0; literal 'x'; offset 0xFFFF (too far).
        let bad = [0x10u8, b'x', 0xFF, 0xFF, 0, 0, 0, 0, 0, 0, 0, 0];
        let mut dst = vec![0u8; 64];
        assert!(matches!(
            lz4.inverse(&bad, &mut dst),
            Err(KzError::Decode(_))
        ));
    }

    #[test]
    fn test_inverse_rejects_truncated_length() {
        let mut lz4 = Lz4::new();
        let bad = [0xF0u8, 0xFF, 0xFF];
        let mut dst = vec![0u8; 64];
        assert!(matches!(
            lz4.inverse(&bad, &mut dst),
            Err(KzError::Decode(_))
        ));
    }

    #[test]
    fn test_forward_needs_worst_case_buffer() {
        let mut lz4 = Lz4::new();
        let input = vec![1u8; 100];
        let mut dst = vec![0u8; 50];
        assert!(matches!(
            lz4.forward(&input, &mut dst),
            Err(KzError::Argument(_))
        ));
    }
}
