//! Pass-through entropy coder: bytes in, the same bytes out as bits.
//!
//! Moves 64-bit words through the bitstream where alignment allows, one
//! byte otherwise. Useful as a baseline and for payloads a model cannot
//! improve.

use std::io::{Read, Write};

use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::KzResult;

pub struct NullEntropyEncoder<'a, W: Write> {
    bitstream: &'a mut OutputBitStream<W>,
}

impl<'a, W: Write> NullEntropyEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>) -> Self {
        Self { bitstream }
    }

    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        self.bitstream.write_bits(val as u64, 8)?;
        Ok(())
    }

    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        let len8 = block.len() & !7;

        for chunk in block[..len8].chunks_exact(8) {
            let val = u64::from_be_bytes(chunk.try_into().unwrap());
            self.bitstream.write_bits(val, 64)?;
        }

        for &b in &block[len8..] {
            self.encode_byte(b)?;
        }

        Ok(block.len())
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}

pub struct NullEntropyDecoder<'a, R: Read> {
    bitstream: &'a mut InputBitStream<R>,
}

impl<'a, R: Read> NullEntropyDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>) -> Self {
        Self { bitstream }
    }

    pub fn decode_byte(&mut self) -> KzResult<u8> {
        Ok(self.bitstream.read_bits(8)? as u8)
    }

    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        let len8 = block.len() & !7;

        for chunk in block[..len8].chunks_exact_mut(8) {
            let val = self.bitstream.read_bits(64)?;
            chunk.copy_from_slice(&val.to_be_bytes());
        }

        for b in &mut block[len8..] {
            *b = self.decode_byte()?;
        }

        Ok(block.len())
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        Ok(())
    }
}
