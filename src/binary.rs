//! Carry-less binary arithmetic coder with a pluggable predictor.
//!
//! Codes one bit per decision over 56-bit interval registers. The split
//! point is `low + ((high − low) >> 12) · p` where p ∈ [0, 4095] is the
//! predictor's probability that the bit is 1. Whenever the top 32 of the 56
//! bits of `low` and `high` agree, those 32 bits are flushed and the
//! registers shift up; the decoder primes itself with 56 bits and mirrors
//! every renormalization, so both sides consume identical bit counts with
//! no carry handling.
//!
//! Two byte framings sit on top:
//! - [`BinaryEntropyEncoder`]/[`BinaryEntropyDecoder`] code bytes as plain
//!   8-bit sequences (the PAQ entropy mode).
//! - [`FpaqEntropyEncoder`]/[`FpaqEntropyDecoder`] extend each byte to a
//!   9-bit symbol: a leading 0 bit announces a data byte, a leading 1 bit
//!   marks end of stream (the FPAQ entropy mode).

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::predictor::Predictor;
use crate::{KzError, KzResult};

const MASK_0_56: u64 = 0x00FF_FFFF_FFFF_FFFF;
const MASK_24_56: u64 = 0x00FF_FFFF_FF00_0000;
const MASK_0_32: u64 = 0x0000_0000_FFFF_FFFF;
const MASK_0_24: u64 = 0x0000_0000_00FF_FFFF;

/// Arithmetic encoder over single-bit decisions.
pub struct BinaryEntropyEncoder<'a, W: Write> {
    predictor: Box<dyn Predictor>,
    low: u64,
    high: u64,
    written: bool,
    disposed: bool,
    bitstream: &'a mut OutputBitStream<W>,
}

impl<'a, W: Write> BinaryEntropyEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            predictor,
            low: 0,
            high: MASK_0_56,
            written: false,
            disposed: false,
            bitstream,
        }
    }

    pub fn encode_bit(&mut self, bit: u32) -> KzResult<()> {
        let prediction = self.predictor.get() as u64;
        let split = self.low + ((self.high.wrapping_sub(self.low)) >> 12) * prediction;

        if bit & 1 == 1 {
            self.high = split;
        } else {
            self.low = split + 1;
        }

        self.predictor.update(bit);
        self.written = true;

        // Flush the settled top 32 bits.
        while (self.low ^ self.high) & MASK_24_56 == 0 {
            self.bitstream.write_bits(self.high >> 24, 32)?;
            self.low = (self.low << 32) & MASK_0_56;
            self.high = ((self.high << 32) | MASK_0_32) & MASK_0_56;
        }

        Ok(())
    }

    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        for i in (0..8).rev() {
            self.encode_bit(((val >> i) & 1) as u32)?;
        }
        Ok(())
    }

    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        for &b in block {
            self.encode_byte(b)?;
        }
        Ok(block.len())
    }

    /// Write the 56 bits that pin down the final interval, then flush.
    pub fn dispose(&mut self) -> KzResult<()> {
        if self.written && !self.disposed {
            self.disposed = true;
            self.bitstream.write_bits(self.low | MASK_0_24, 56)?;
            self.bitstream.flush()?;
        }

        Ok(())
    }
}

/// Arithmetic decoder over single-bit decisions.
pub struct BinaryEntropyDecoder<'a, R: Read> {
    predictor: Box<dyn Predictor>,
    low: u64,
    high: u64,
    current: u64,
    initialized: bool,
    bitstream: &'a mut InputBitStream<R>,
}

impl<'a, R: Read> BinaryEntropyDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            predictor,
            low: 0,
            high: MASK_0_56,
            current: 0,
            initialized: false,
            bitstream,
        }
    }

    /// Prime the interval with the first 56 coded bits. Deferred because the
    /// bitstream may not be positioned at coder output until the block
    /// header has been read.
    fn initialize(&mut self) -> KzResult<()> {
        if !self.initialized {
            self.current = self.bitstream.read_bits(56)?;
            self.initialized = true;
        }
        Ok(())
    }

    pub fn decode_bit(&mut self) -> KzResult<u32> {
        if !self.initialized {
            self.initialize()?;
        }

        let prediction = self.predictor.get() as u64;
        let split = self.low + ((self.high.wrapping_sub(self.low)) >> 12) * prediction;

        let bit = if self.current <= split {
            self.high = split;
            1
        } else {
            self.low = split + 1;
            0
        };

        self.predictor.update(bit);

        // Mirror the encoder's renormalization bit for bit.
        while (self.low ^ self.high) & MASK_24_56 == 0 {
            let bits = self.bitstream.read_bits(32)?;
            self.low = (self.low << 32) & MASK_0_56;
            self.high = ((self.high << 32) | MASK_0_32) & MASK_0_56;
            self.current = ((self.current << 32) | bits) & MASK_0_56;
        }

        Ok(bit)
    }

    pub fn decode_byte(&mut self) -> KzResult<u8> {
        let mut res = 0u32;
        for _ in 0..8 {
            res = (res << 1) | self.decode_bit()?;
        }
        Ok(res as u8)
    }

    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        for b in block.iter_mut() {
            *b = self.decode_byte()?;
        }
        Ok(block.len())
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}

/// FPAQ framing over the binary coder: 9-bit symbols with a data/end marker.
pub struct FpaqEntropyEncoder<'a, W: Write> {
    inner: BinaryEntropyEncoder<'a, W>,
}

impl<'a, W: Write> FpaqEntropyEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            inner: BinaryEntropyEncoder::new(bitstream, predictor),
        }
    }

    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        self.inner.encode_bit(0)?;
        self.inner.encode_byte(val)
    }

    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        for &b in block {
            self.encode_byte(b)?;
        }
        Ok(block.len())
    }

    /// Mark end of stream, then settle the arithmetic state.
    pub fn dispose(&mut self) -> KzResult<()> {
        self.inner.encode_bit(1)?;
        self.inner.dispose()
    }
}

/// FPAQ framing decoder. Consumes the end-of-stream symbol after the last
/// byte so that the bit budget matches the encoder exactly.
pub struct FpaqEntropyDecoder<'a, R: Read> {
    inner: BinaryEntropyDecoder<'a, R>,
}

impl<'a, R: Read> FpaqEntropyDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>, predictor: Box<dyn Predictor>) -> Self {
        Self {
            inner: BinaryEntropyDecoder::new(bitstream, predictor),
        }
    }

    pub fn decode_byte(&mut self) -> KzResult<u8> {
        if self.inner.decode_bit()? != 0 {
            return Err(KzError::Decode(
                "FPAQ stream ended before the requested byte".to_string(),
            ));
        }
        self.inner.decode_byte()
    }

    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        for b in block.iter_mut() {
            *b = self.decode_byte()?;
        }

        // The end-of-stream marker must follow the final byte.
        if self.inner.decode_bit()? != 1 {
            return Err(KzError::Decode(
                "FPAQ stream continues past its declared length".to_string(),
            ));
        }

        Ok(block.len())
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}
