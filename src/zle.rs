//! Zero-length encoding (Wheeler).
//!
//! A run-length scheme that touches only runs of the value 0. A run of
//! length r is written as the binary digits of r + 1 minus the implicit
//! most significant bit, one output **byte** per digit (0x00 or 0x01).
//! Non-zero bytes are shifted up by one, with 0xFF 0x00 / 0xFF 0x01 escaping
//! the two values that would overflow. Post-BWT+MTF data is dominated by
//! zeros, which is exactly what this targets.
//!
//! Both directions consume and produce as much as fits and report the exact
//! (consumed, produced) pair, so a caller can detect and revert an encoding
//! that expands.

use crate::KzResult;

/// Longest run of zeros encoded as a single length.
const MAX_RUN: usize = 1 << 31;

/// Zero-length encoder/decoder for a block of known size.
pub struct Zle {
    size: usize,
}

impl Zle {
    /// `size` is the number of source bytes to process; 0 means the whole
    /// source slice.
    pub fn new(size: usize) -> Self {
        Self { size }
    }

    fn src_end(&self, src: &[u8]) -> usize {
        if self.size == 0 {
            src.len()
        } else {
            self.size
        }
    }

    /// Forward transform. Returns (source bytes consumed, bytes produced).
    pub fn forward(&self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let src_end = self.src_end(src);
        let dst_end = dst.len();
        let mut run_length = 0usize;
        let mut src_idx = 0usize;
        let mut dst_idx = 0usize;

        while src_idx < src_end && dst_idx < dst_end {
            let val = src[src_idx];

            if val == 0 {
                run_length += 1;
                src_idx += 1;

                if src_idx < src_end && run_length < MAX_RUN {
                    continue;
                }
            }

            if run_length > 0 {
                // Emit the digits of run + 1 below its MSB, one byte each.
                let run = run_length + 1;
                let mut log2 = 0usize;
                let mut v = run;
                while v > 1 {
                    log2 += 1;
                    v >>= 1;
                }

                if dst_idx + log2 <= dst_end {
                    let mut bit = log2;
                    while bit > 0 {
                        bit -= 1;
                        dst[dst_idx] = ((run >> bit) & 1) as u8;
                        dst_idx += 1;
                    }

                    run_length = 0;
                    continue;
                }

                // Not enough room for the whole length: fill what fits and
                // report the source position the written digits account for,
                // so the caller sees partial consumption and reverts.
                let fit = dst_end - dst_idx;
                while dst_idx < dst_end {
                    dst[dst_idx] = 1;
                    dst_idx += 1;
                }

                let delta = ((1usize << (fit + 2)) - 1).min(run_length).min(src_idx);
                src_idx -= delta;
                break;
            }

            if val >= 0xFE {
                if dst_idx + 1 >= dst_end {
                    break;
                }

                dst[dst_idx] = 0xFF;
                dst[dst_idx + 1] = val - 0xFE;
                dst_idx += 2;
            } else {
                dst[dst_idx] = val + 1;
                dst_idx += 1;
            }

            src_idx += 1;
        }

        Ok((src_idx, dst_idx))
    }

    /// Inverse transform. Returns (source bytes consumed, bytes produced).
    pub fn inverse(&self, src: &[u8], dst: &mut [u8]) -> KzResult<(usize, usize)> {
        let src_end = self.src_end(src);
        let dst_end = dst.len();
        let mut run_length = 0usize;
        let mut src_idx = 0usize;
        let mut dst_idx = 0usize;

        while src_idx < src_end && dst_idx < dst_end {
            if run_length > 0 {
                run_length -= 1;
                dst[dst_idx] = 0;
                dst_idx += 1;
                continue;
            }

            let mut val = src[src_idx] as usize;

            if val <= 1 {
                // Rebuild the run length digit by digit under the implicit MSB.
                let mut run = 1usize;

                while val <= 1 {
                    run = (run << 1) | val;
                    src_idx += 1;

                    if src_idx >= src_end {
                        break;
                    }

                    val = src[src_idx] as usize;
                }

                run_length = run - 1;
                continue;
            }

            if val > 0xFE {
                src_idx += 1;

                if src_idx >= src_end {
                    break;
                }

                val += (src[src_idx] & 1) as usize;
            }

            dst[dst_idx] = (val - 1) as u8;
            dst_idx += 1;
            src_idx += 1;
        }

        // A pending run of zeros extends past the last length digit.
        let mut pending = run_length.min(dst_end - dst_idx);
        while pending > 0 {
            dst[dst_idx] = 0;
            dst_idx += 1;
            pending -= 1;
        }

        Ok((src_idx, dst_idx))
    }
}
