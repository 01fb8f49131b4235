//! Entropy coder selection by tag byte.
//!
//! Coders are identified in the stream header by a character tag:
//! `'N'` none, `'H'` Huffman, `'R'` range, `'P'` binary arithmetic with the
//! PAQ predictor, `'F'` binary arithmetic with the FPAQ predictor, `'A'`
//! rANS. Dispatch is a tagged enum; the block engine rebuilds the coder for
//! every block so adaptive state never leaks across blocks.

use std::io::{Read, Write};

use crate::ans::{AnsRangeDecoder, AnsRangeEncoder};
use crate::binary::{
    BinaryEntropyDecoder, BinaryEntropyEncoder, FpaqEntropyDecoder, FpaqEntropyEncoder,
};
use crate::bitstream::{InputBitStream, OutputBitStream};
use crate::huffman::{HuffmanDecoder, HuffmanEncoder};
use crate::null_entropy::{NullEntropyDecoder, NullEntropyEncoder};
use crate::predictor::{FpaqPredictor, PaqPredictor};
use crate::rangecoder::{RangeDecoder, RangeEncoder};
use crate::{KzError, KzResult};

pub const NONE_TYPE: u8 = b'N';
pub const HUFFMAN_TYPE: u8 = b'H';
pub const RANGE_TYPE: u8 = b'R';
pub const PAQ_TYPE: u8 = b'P';
pub const FPAQ_TYPE: u8 = b'F';
pub const ANS_TYPE: u8 = b'A';

/// Human-readable name for an entropy tag, or an error for unknown tags.
pub fn entropy_codec_name(tag: u8) -> KzResult<&'static str> {
    match tag {
        NONE_TYPE => Ok("NONE"),
        HUFFMAN_TYPE => Ok("HUFFMAN"),
        RANGE_TYPE => Ok("RANGE"),
        PAQ_TYPE => Ok("PAQ"),
        FPAQ_TYPE => Ok("FPAQ"),
        ANS_TYPE => Ok("ANS"),
        _ => Err(KzError::Argument(format!(
            "unknown entropy codec tag: 0x{:02x}",
            tag
        ))),
    }
}

/// Entropy tag for a codec name (case-insensitive).
pub fn entropy_codec_tag(name: &str) -> KzResult<u8> {
    match name.to_ascii_uppercase().as_str() {
        "NONE" => Ok(NONE_TYPE),
        "HUFFMAN" => Ok(HUFFMAN_TYPE),
        "RANGE" => Ok(RANGE_TYPE),
        "PAQ" => Ok(PAQ_TYPE),
        "FPAQ" => Ok(FPAQ_TYPE),
        "ANS" => Ok(ANS_TYPE),
        _ => Err(KzError::Argument(format!(
            "unknown entropy codec name: {}",
            name
        ))),
    }
}

/// An entropy encoder bound to a bitstream for the duration of one block.
pub enum EntropyEncoder<'a, W: Write> {
    None(NullEntropyEncoder<'a, W>),
    Huffman(HuffmanEncoder<'a, W>),
    Range(RangeEncoder<'a, W>),
    Paq(BinaryEntropyEncoder<'a, W>),
    Fpaq(FpaqEntropyEncoder<'a, W>),
    Ans(AnsRangeEncoder<'a, W>),
}

impl<'a, W: Write> EntropyEncoder<'a, W> {
    pub fn new(bitstream: &'a mut OutputBitStream<W>, tag: u8) -> KzResult<Self> {
        match tag {
            NONE_TYPE => Ok(Self::None(NullEntropyEncoder::new(bitstream))),
            HUFFMAN_TYPE => Ok(Self::Huffman(HuffmanEncoder::new(bitstream))),
            RANGE_TYPE => Ok(Self::Range(RangeEncoder::new(bitstream))),
            PAQ_TYPE => Ok(Self::Paq(BinaryEntropyEncoder::new(
                bitstream,
                Box::new(PaqPredictor::new()),
            ))),
            FPAQ_TYPE => Ok(Self::Fpaq(FpaqEntropyEncoder::new(
                bitstream,
                Box::new(FpaqPredictor::new()),
            ))),
            ANS_TYPE => Ok(Self::Ans(AnsRangeEncoder::new(bitstream))),
            _ => Err(KzError::Argument(format!(
                "unknown entropy codec tag: 0x{:02x}",
                tag
            ))),
        }
    }

    /// Encode a whole block. Returns the number of bytes consumed.
    pub fn encode(&mut self, block: &[u8]) -> KzResult<usize> {
        match self {
            Self::None(e) => e.encode(block),
            Self::Huffman(e) => e.encode(block),
            Self::Range(e) => e.encode(block),
            Self::Paq(e) => e.encode(block),
            Self::Fpaq(e) => e.encode(block),
            Self::Ans(e) => e.encode(block),
        }
    }

    pub fn encode_byte(&mut self, val: u8) -> KzResult<()> {
        match self {
            Self::None(e) => e.encode_byte(val),
            Self::Huffman(e) => e.encode_byte(val),
            Self::Range(e) => e.encode_byte(val),
            Self::Paq(e) => e.encode_byte(val),
            Self::Fpaq(e) => e.encode_byte(val),
            Self::Ans(e) => e.encode_byte(val),
        }
    }

    /// Settle any coder tail state. Must be called once per block, after
    /// which the encoder is spent.
    pub fn dispose(&mut self) -> KzResult<()> {
        match self {
            Self::None(e) => e.dispose(),
            Self::Huffman(e) => e.dispose(),
            Self::Range(e) => e.dispose(),
            Self::Paq(e) => e.dispose(),
            Self::Fpaq(e) => e.dispose(),
            Self::Ans(e) => e.dispose(),
        }
    }
}

/// An entropy decoder bound to a bitstream for the duration of one block.
pub enum EntropyDecoder<'a, R: Read> {
    None(NullEntropyDecoder<'a, R>),
    Huffman(HuffmanDecoder<'a, R>),
    Range(RangeDecoder<'a, R>),
    Paq(BinaryEntropyDecoder<'a, R>),
    Fpaq(FpaqEntropyDecoder<'a, R>),
    Ans(AnsRangeDecoder<'a, R>),
}

impl<'a, R: Read> EntropyDecoder<'a, R> {
    pub fn new(bitstream: &'a mut InputBitStream<R>, tag: u8) -> KzResult<Self> {
        match tag {
            NONE_TYPE => Ok(Self::None(NullEntropyDecoder::new(bitstream))),
            HUFFMAN_TYPE => Ok(Self::Huffman(HuffmanDecoder::new(bitstream))),
            RANGE_TYPE => Ok(Self::Range(RangeDecoder::new(bitstream))),
            PAQ_TYPE => Ok(Self::Paq(BinaryEntropyDecoder::new(
                bitstream,
                Box::new(PaqPredictor::new()),
            ))),
            FPAQ_TYPE => Ok(Self::Fpaq(FpaqEntropyDecoder::new(
                bitstream,
                Box::new(FpaqPredictor::new()),
            ))),
            ANS_TYPE => Ok(Self::Ans(AnsRangeDecoder::new(bitstream))),
            _ => Err(KzError::Argument(format!(
                "unknown entropy codec tag: 0x{:02x}",
                tag
            ))),
        }
    }

    /// Decode exactly `block.len()` bytes. Returns that count.
    pub fn decode(&mut self, block: &mut [u8]) -> KzResult<usize> {
        match self {
            Self::None(d) => d.decode(block),
            Self::Huffman(d) => d.decode(block),
            Self::Range(d) => d.decode(block),
            Self::Paq(d) => d.decode(block),
            Self::Fpaq(d) => d.decode(block),
            Self::Ans(d) => d.decode(block),
        }
    }

    pub fn decode_byte(&mut self) -> KzResult<u8> {
        match self {
            Self::None(d) => d.decode_byte(),
            Self::Huffman(d) => d.decode_byte(),
            Self::Range(d) => d.decode_byte(),
            Self::Paq(d) => d.decode_byte(),
            Self::Fpaq(d) => d.decode_byte(),
            Self::Ans(d) => d.decode_byte(),
        }
    }

    pub fn dispose(&mut self) -> KzResult<()> {
        match self {
            Self::None(d) => d.dispose(),
            Self::Huffman(d) => d.dispose(),
            Self::Range(d) => d.dispose(),
            Self::Paq(d) => d.dispose(),
            Self::Fpaq(d) => d.dispose(),
            Self::Ans(d) => d.dispose(),
        }
    }
}
