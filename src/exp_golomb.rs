//! Exp-Golomb coding over a bitstream.
//!
//! A value v is written as the unary count of bits in v + 1 below its most
//! significant bit (that many zeros), a one, then those remainder bits:
//!
//! ```text
//! 0 => 1
//! 1 => 010      2 => 011
//! 3 => 00100    4 => 00101   5 => 00110   6 => 00111
//! ```
//!
//! In signed mode the input byte is treated as an i8; the magnitude is coded
//! as above and a trailing sign bit (1 = negative) follows any nonzero value.
//! Distributions centered on zero, like Huffman code-length deltas, come out
//! noticeably smaller this way.

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::KzResult;

/// Exp-Golomb encoder over a borrowed bitstream.
pub struct ExpGolombEncoder<'a, W: Write> {
    signed: bool,
    bitstream: &'a mut OutputBitStream<W>,
}

impl<'a, W: Write> ExpGolombEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>, signed: bool) -> Self {
        Self { signed, bitstream }
    }

    pub fn signed(&self) -> bool {
        self.signed
    }

    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        if val == 0 {
            self.bitstream.write_bit(1)?;
            return Ok(());
        }

        let magnitude = if self.signed {
            (val as i8).unsigned_abs() as u32
        } else {
            val as u32
        };

        let emit = magnitude + 1;
        let n = if emit <= 3 {
            // Magnitude 1 or 2: a single leading zero.
            3
        } else {
            let log2 = 31 - emit.leading_zeros();
            log2 + (log2 + 1)
        };

        let (emit, n) = if self.signed {
            (((emit as u64) << 1) | ((val >> 7) & 1) as u64, n + 1)
        } else {
            (emit as u64, n)
        };

        self.bitstream.write_bits(emit, n)?;
        Ok(())
    }

    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        for &b in block {
            self.encode_byte(b)?;
        }
        Ok(block.len())
    }
}

/// Exp-Golomb decoder over a borrowed bitstream.
pub struct ExpGolombDecoder<'a, R: Read> {
    signed: bool,
    bitstream: &'a mut InputBitStream<R>,
}

impl<'a, R: Read> ExpGolombDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>, signed: bool) -> Self {
        Self { signed, bitstream }
    }

    pub fn signed(&self) -> bool {
        self.signed
    }

    /// In signed mode the returned byte is the two's-complement encoding of
    /// the decoded i8.
    pub fn decode_byte(&mut self) -> KzResult<u8> {
        let mut log2 = 0u32;

        while self.bitstream.read_bit()? == 0 {
            log2 += 1;

            if log2 > 8 {
                return Err(crate::KzError::Decode(
                    "invalid Exp-Golomb code".to_string(),
                ));
            }
        }

        let info = if log2 > 0 {
            self.bitstream.read_bits(log2)?
        } else {
            0
        };

        let res = ((1u64 << log2) - 1 + info) as u8;

        if res != 0 && self.signed && self.bitstream.read_bit()? == 1 {
            return Ok((-(res as i8 as i16)) as u8);
        }

        Ok(res)
    }

    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        for b in block.iter_mut() {
            *b = self.decode_byte()?;
        }
        Ok(block.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn round_trip(values: &[u8], signed: bool) {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        {
            let mut enc = ExpGolombEncoder::new(&mut obs, signed);
            enc.encode(values).unwrap();
        }
        obs.close().unwrap();

        let bytes = obs.into_inner();
        let mut ibs = InputBitStream::new(&bytes[..], 1024).unwrap();
        let mut dec = ExpGolombDecoder::new(&mut ibs, signed);
        for &expected in values {
            assert_eq!(dec.decode_byte().unwrap(), expected);
        }
    }

    #[test]
    fn test_zero_is_one_bit() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        {
            let mut enc = ExpGolombEncoder::new(&mut obs, false);
            enc.encode_byte(0).unwrap();
        }
        assert_eq!(obs.written(), 1);
    }

    #[test]
    fn test_known_codes_unsigned() {
        // 3 encodes as 00100.
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        {
            let mut enc = ExpGolombEncoder::new(&mut obs, false);
            enc.encode_byte(3).unwrap();
        }
        assert_eq!(obs.written(), 5);
        obs.close().unwrap();
        assert_eq!(obs.into_inner(), vec![0b0010_0000]);
    }

    #[test]
    fn test_round_trip_unsigned() {
        round_trip(
            &[0, 1, 2, 3, 4, 5, 6, 7, 15, 16, 31, 32, 100, 127, 254, 255],
            false,
        );
    }

    #[test]
    fn test_round_trip_signed() {
        // Two's-complement bytes for -1, -2, -30, 30, etc.
        let values: Vec<u8> = [0i8, 1, -1, 2, -2, 5, -5, 30, -30, 127, -128]
            .iter()
            .map(|&v| v as u8)
            .collect();
        round_trip(&values, true);
    }

    #[test]
    fn test_signed_negative_shorter_than_unsigned() {
        // -1 as a signed value: 4 bits. As a raw byte (255): far longer.
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        {
            let mut enc = ExpGolombEncoder::new(&mut obs, true);
            enc.encode_byte((-1i8) as u8).unwrap();
        }
        assert_eq!(obs.written(), 4);
    }

    #[test]
    fn test_length_delta_shape() {
        // The Huffman length-delta stream: small signed values around zero.
        let deltas: Vec<u8> = [3i8, 0, 0, 1, -1, 0, 2, -2, 0, 0, -3]
            .iter()
            .map(|&v| v as u8)
            .collect();
        round_trip(&deltas, true);
    }
}
