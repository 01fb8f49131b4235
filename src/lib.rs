//! kz — a self-describing lossless block compressor.
//!
//! Data moves through a two-stage pipeline, one block at a time:
//!
//! 1. A reversible byte-to-byte **transform** (BWT pipeline, LZ4, Snappy,
//!    RLE, or none) reshapes the block to expose redundancy.
//! 2. An **entropy coder** (Huffman, range, binary arithmetic with FPAQ/PAQ
//!    predictors, rANS, or none) turns the transformed bytes into bits.
//!
//! Any transform can be combined with any coder; the pair is recorded once in
//! the stream header and every block is self-contained after that, so a
//! stream is decodable with nothing but its own bytes.
//!
//! The main entry points are [`stream::CompressedOutputStream`] and
//! [`stream::CompressedInputStream`], which implement `std::io::Write` and
//! `std::io::Read` over any byte sink/source.

pub mod ans;
pub mod binary;
pub mod bitstream;
pub mod btree;
pub mod bwt;
pub mod entropy;
pub mod exp_golomb;
pub mod frequency;
pub mod huffman;
pub mod lz4;
pub mod mtf;
pub mod null_entropy;
pub mod predictor;
pub mod rangecoder;
pub mod rle;
pub mod snappy;
pub mod stream;
pub mod transform;
pub mod zle;

#[cfg(test)]
mod validation;

/// Error type for kz operations.
///
/// Every variant carries a stable numeric code (see [`KzError::code`]) so the
/// CLI can surface machine-readable exit statuses.
#[derive(Debug)]
#[non_exhaustive]
pub enum KzError {
    /// Invalid parameter: block size out of range, unknown tag, bad bit count.
    Argument(String),
    /// Failure of the underlying byte source or sink.
    Io(std::io::Error),
    /// Operation on a closed bitstream or a stream poisoned by an earlier error.
    BitStreamClosed,
    /// Malformed stream: bad magic, unsupported version, out-of-range sizes.
    Format(String),
    /// Stored block checksum does not match the recomputed one.
    Checksum { expected: u32, found: u32 },
    /// Entropy coder ran out of input or reached an invalid state.
    Decode(String),
}

impl KzError {
    /// Stable numeric code for CLI exit statuses.
    pub fn code(&self) -> i32 {
        match self {
            Self::Argument(_) => 2,
            Self::Io(_) => 3,
            Self::BitStreamClosed => 4,
            Self::Format(_) => 5,
            Self::Checksum { .. } => 6,
            Self::Decode(_) => 7,
        }
    }
}

impl std::fmt::Display for KzError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Argument(msg) => write!(f, "invalid argument: {}", msg),
            Self::Io(e) => write!(f, "I/O error: {}", e),
            Self::BitStreamClosed => write!(f, "bit stream closed"),
            Self::Format(msg) => write!(f, "invalid stream format: {}", msg),
            Self::Checksum { expected, found } => write!(
                f,
                "invalid checksum: expected {:08x}, found {:08x}",
                expected, found
            ),
            Self::Decode(msg) => write!(f, "decode error: {}", msg),
        }
    }
}

impl std::error::Error for KzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for KzError {
    fn from(e: std::io::Error) -> Self {
        Self::Io(e)
    }
}

pub type KzResult<T> = Result<T, KzError>;
