//! Range asymmetric numeral system (rANS) coder.
//!
//! Each chunk of a block (64 KiB by default) is coded independently: the
//! chunk's byte frequencies are normalized so they sum to 2^L (L = 13 by
//! default, lowered toward 8 for small blocks), transmitted in a compact
//! header, then the symbols are folded into a single integer state in
//! reverse order. The state spills 32-bit words whenever it would overflow,
//! and its final 64-bit value leads the chunk payload; reversing the spilled
//! words puts everything in the order the decoder consumes it.
//!
//! Decoding reads the header, rebuilds a frequency→symbol table of size 2^L,
//! seeds the state from the leading 64-bit word and walks forward, pulling
//! a 32-bit word whenever the state dips under the normalization floor.
//!
//! Chunk header layout:
//! - 1 bit: full (256-symbol) alphabet flag; else 9-bit count + the symbols
//! - 3 bits: L − 8, 5 bits: logMax − 8
//! - (count − 1) frequencies of logMax bits each; the first symbol's
//!   frequency is inferred from the known 2^L sum.

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::frequency::FrequencyTable;
use crate::{KzError, KzResult};

/// Normalization floor of the ANS state.
const ANS_TOP: u64 = 1 << 24;

/// Bytes per independently-modeled chunk.
pub const DEFAULT_CHUNK_SIZE: usize = 1 << 16;

/// Default log of the normalized frequency range.
pub const DEFAULT_LOG_RANGE: u32 = 13;

/// Scale `freqs` (raw counts over `size` bytes) so present symbols sum to
/// exactly `1 << lr`, every present symbol keeping at least 1. Fills
/// `alphabet` with the present symbols in ascending order and returns how
/// many there are.
fn normalize_frequencies(
    freqs: &mut [u32; 256],
    alphabet: &mut [u8; 256],
    size: usize,
    lr: u32,
) -> KzResult<usize> {
    let table_size = 1u32 << lr;

    let present: Vec<usize> = (0..256).filter(|&i| freqs[i] > 0).collect();
    let count = present.len();

    if count == 0 {
        return Ok(0);
    }

    for (i, &s) in present.iter().enumerate() {
        alphabet[i] = s as u8;
    }

    if count == 1 {
        freqs[present[0]] = table_size;
        return Ok(1);
    }

    if table_size < count as u32 {
        return Err(KzError::Argument(format!(
            "ANS log range {} too small for {} distinct symbols",
            lr, count
        )));
    }

    // Proportional scaling with a floor of 1 per present symbol.
    let total = size as u64;
    let mut ranked = present.clone();
    ranked.sort_by(|&a, &b| freqs[b].cmp(&freqs[a]));

    let mut distributed = 0u32;
    for &s in &present {
        let scaled = ((freqs[s] as u64 * table_size as u64) / total).max(1) as u32;
        freqs[s] = scaled;
        distributed += scaled;
    }

    // Push the rounding remainder onto the most frequent symbols.
    let mut diff = table_size as i64 - distributed as i64;
    let mut idx = 0usize;

    while diff > 0 {
        freqs[ranked[idx % ranked.len()]] += 1;
        diff -= 1;
        idx += 1;
    }
    while diff < 0 {
        let s = ranked[idx % ranked.len()];
        if freqs[s] > 1 {
            freqs[s] -= 1;
            diff += 1;
        }
        idx += 1;
    }

    Ok(count)
}

/// rANS encoder over a borrowed bitstream.
pub struct AnsRangeEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
    freqs: [u32; 256],
    cum_freqs: [u32; 257],
    alphabet: [u8; 256],
    words: Vec<u32>,
    chunk_size: usize,
    log_range: u32,
}

impl<'a, W: Write> AnsRangeEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        // Defaults are always valid.
        Self::with_options(bitstream, DEFAULT_CHUNK_SIZE, DEFAULT_LOG_RANGE).unwrap()
    }

    /// `chunk_size` 0 means one chunk per block; otherwise it must be in
    /// [1024, 2^30]. `log_range` must be in [8, 15].
    pub fn with_options(
        bitstream: &'a mut OutputBitStream<W>,
        chunk_size: usize,
        log_range: u32,
    ) -> KzResult<Self> {
        if chunk_size != 0 && !(1024..=1 << 30).contains(&chunk_size) {
            return Err(KzError::Argument(format!(
                "ANS chunk size must be 0 or in [1024..2^30], got {}",
                chunk_size
            )));
        }

        if !(8..=15).contains(&log_range) {
            return Err(KzError::Argument(format!(
                "ANS log range must be in [8..15], got {}",
                log_range
            )));
        }

        Ok(Self {
            bitstream,
            freqs: [0u32; 256],
            cum_freqs: [0u32; 257],
            alphabet: [0u8; 256],
            words: Vec::new(),
            chunk_size,
            log_range,
        })
    }

    fn encode_header(&mut self, alphabet_size: usize, lr: u32) -> KzResult<()> {
        if alphabet_size == 256 {
            self.bitstream.write_bit(1)?;
        } else {
            self.bitstream.write_bit(0)?;
            self.bitstream.write_bits(alphabet_size as u64, 9)?;
            for i in 0..alphabet_size {
                self.bitstream.write_bits(self.alphabet[i] as u64, 8)?;
            }
        }

        let mut max = 0u32;
        for i in 0..alphabet_size {
            max = max.max(self.freqs[self.alphabet[i] as usize]);
        }

        let mut log_max = 8u32;
        while (1u32 << log_max) <= max {
            log_max += 1;
        }

        self.bitstream.write_bits((lr - 8) as u64, 3)?;
        self.bitstream.write_bits((log_max - 8) as u64, 5)?;

        // The first frequency is inferred from the 2^L sum on the other side.
        for i in 1..alphabet_size {
            self.bitstream
                .write_bits(self.freqs[self.alphabet[i] as usize] as u64, log_max)?;
        }

        Ok(())
    }

    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        if block.is_empty() {
            return Ok(0);
        }

        let size_chunk = if self.chunk_size == 0 {
            block.len()
        } else {
            self.chunk_size
        };

        // Small blocks cannot fill a large frequency table.
        let mut lr = self.log_range;
        while lr > 8 && (1usize << lr) > block.len() {
            lr -= 1;
        }

        let top = (ANS_TOP >> lr) << 32;

        let mut histogram = FrequencyTable::new();

        for chunk in block.chunks(size_chunk) {
            histogram.tally(chunk);
            self.freqs = *histogram.counts();

            let alphabet_size =
                normalize_frequencies(&mut self.freqs, &mut self.alphabet, chunk.len(), lr)?;
            self.encode_header(alphabet_size, lr)?;

            self.cum_freqs[0] = 0;
            for i in 0..256 {
                self.cum_freqs[i + 1] = self.cum_freqs[i] + self.freqs[i];
            }

            // Classic rANS: walk the chunk backwards, spilling 32-bit words.
            let mut st = ANS_TOP;
            self.words.clear();

            for &byte in chunk.iter().rev() {
                let freq = self.freqs[byte as usize] as u64;
                let max = top * freq;

                while st >= max {
                    self.words.push(st as u32);
                    st >>= 32;
                }

                st = ((st / freq) << lr) + (st % freq) + self.cum_freqs[byte as usize] as u64;
            }

            // Final state first, then the spilled words in decode order.
            self.bitstream.write_bits(st, 64)?;
            for &w in self.words.iter().rev() {
                self.bitstream.write_bits(w as u64, 32)?;
            }
        }

        Ok(block.len())
    }

    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        self.encode(&[val]).map(|_| ())
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}

/// rANS decoder over a borrowed bitstream.
pub struct AnsRangeDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
    freqs: [u32; 256],
    cum_freqs: [u32; 257],
    alphabet: [u8; 256],
    /// Normalized-slot → symbol table, `1 << lr` entries per chunk.
    f2s: Vec<u8>,
    chunk_size: usize,
}

impl<'a, R: Read> AnsRangeDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        Self::with_options(bitstream, DEFAULT_CHUNK_SIZE).unwrap()
    }

    /// `chunk_size` must match the encoder's.
    pub fn with_options(
        bitstream: &'a mut InputBitStream<R>,
        chunk_size: usize,
    ) -> KzResult<Self> {
        if chunk_size != 0 && !(1024..=1 << 30).contains(&chunk_size) {
            return Err(KzError::Argument(format!(
                "ANS chunk size must be 0 or in [1024..2^30], got {}",
                chunk_size
            )));
        }

        Ok(Self {
            bitstream,
            freqs: [0u32; 256],
            cum_freqs: [0u32; 257],
            alphabet: [0u8; 256],
            f2s: Vec::new(),
            chunk_size,
        })
    }

    fn decode_header(&mut self) -> KzResult<(usize, u32)> {
        let full = self.bitstream.read_bit()?;
        let alphabet_size = if full == 1 {
            for (i, a) in self.alphabet.iter_mut().enumerate() {
                *a = i as u8;
            }
            256
        } else {
            let count = self.bitstream.read_bits(9)? as usize;
            if count == 0 || count > 256 {
                return Err(KzError::Decode(format!(
                    "invalid ANS alphabet size: {}",
                    count
                )));
            }
            for i in 0..count {
                self.alphabet[i] = self.bitstream.read_bits(8)? as u8;
            }
            count
        };

        self.freqs = [0u32; 256];

        let lr = 8 + self.bitstream.read_bits(3)? as u32;
        let log_max = 8 + self.bitstream.read_bits(5)? as u32;
        let table_size = 1u32 << lr;

        let mut sum = 0u64;
        for i in 1..alphabet_size {
            let f = self.bitstream.read_bits(log_max)? as u32;
            self.freqs[self.alphabet[i] as usize] = f;
            sum += f as u64;
        }

        if sum >= table_size as u64 {
            return Err(KzError::Decode(format!(
                "ANS frequencies sum to {}, expected under {}",
                sum, table_size
            )));
        }

        // First frequency is whatever is left of the 2^L budget.
        self.freqs[self.alphabet[0] as usize] = table_size - sum as u32;

        // Build the cumulative table and the slot → symbol map.
        if self.f2s.len() < table_size as usize {
            self.f2s = vec![0u8; table_size as usize];
        }

        self.cum_freqs[0] = 0;
        for i in 0..256 {
            self.cum_freqs[i + 1] = self.cum_freqs[i] + self.freqs[i];
            let start = self.cum_freqs[i] as usize;
            for slot in &mut self.f2s[start..start + self.freqs[i] as usize] {
                *slot = i as u8;
            }
        }

        Ok((alphabet_size, lr))
    }

    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        if block.is_empty() {
            return Ok(0);
        }

        let size_chunk = if self.chunk_size == 0 {
            block.len()
        } else {
            self.chunk_size
        };

        let len = block.len();
        for chunk in block.chunks_mut(size_chunk) {
            let (_, lr) = self.decode_header()?;
            let mask = (1u64 << lr) - 1;

            let mut st = self.bitstream.read_bits(64)?;

            for b in chunk.iter_mut() {
                let idx = (st & mask) as usize;
                let symbol = self.f2s[idx];
                *b = symbol;

                st = self.freqs[symbol as usize] as u64 * (st >> lr) + idx as u64
                    - self.cum_freqs[symbol as usize] as u64;

                while st < ANS_TOP {
                    st = (st << 32) | self.bitstream.read_bits(32)?;
                }
            }
        }

        Ok(len)
    }

    pub fn decode_byte(&mut self) -> KzResult<u8> {
        let mut buf = [0u8; 1];
        self.decode(&mut buf)?;
        Ok(buf[0])
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}
