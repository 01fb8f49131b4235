//! Byte-buffered, MSB-first bit I/O over an underlying byte stream.
//!
//! [`OutputBitStream`] packs bits most-significant-first into an internal
//! buffer and drains it to any `std::io::Write`. [`InputBitStream`] is the
//! mirror image over `std::io::Read`. Both keep exact running bit counters,
//! even across a failing call, so stream framing can be reasoned about
//! bit-for-bit.
//!
//! Within a byte, `bit_index` counts from 7 (untouched) down to 0; a value of
//! 7 means the current byte is complete and the next bit starts a fresh one.

use std::io::{self, Read, Write};

use crate::{KzError, KzResult};

/// Minimum internal buffer size in bytes.
const MIN_BUFFER_SIZE: usize = 1024;

/// Writes bits MSB-first into an underlying byte sink.
pub struct OutputBitStream<W: Write> {
    os: W,
    buffer: Vec<u8>,
    /// Index of the byte currently being filled.
    position: usize,
    /// Next bit to write within `buffer[position]`, counting MSB→LSB.
    bit_index: u32,
    /// Bits flushed to the sink so far.
    written: u64,
    closed: bool,
}

impl<W: Write> OutputBitStream<W> {
    /// Create a bit writer over `os` with an internal buffer of `buffer_size`
    /// bytes (at least 1024).
    pub fn new(os: W, buffer_size: usize) -> KzResult<Self> {
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(KzError::Argument(format!(
                "bit stream buffer size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, buffer_size
            )));
        }

        Ok(Self {
            os,
            buffer: vec![0u8; buffer_size],
            position: 0,
            bit_index: 7,
            written: 0,
            closed: false,
        })
    }

    /// Write a single bit (the low bit of `bit`).
    pub fn write_bit(&mut self, bit: u32) -> KzResult<()> {
        if self.closed {
            return Err(KzError::BitStreamClosed);
        }

        self.buffer[self.position] |= ((bit & 1) << self.bit_index) as u8;

        if self.bit_index == 0 {
            self.bit_index = 7;
            self.position += 1;

            if self.position >= self.buffer.len() {
                self.flush()?;
            }
        } else {
            self.bit_index -= 1;
        }

        Ok(())
    }

    /// Write the low `count` bits of `value`, MSB of those bits first.
    /// `count` must be in [1, 64]. Returns the number of bits written.
    pub fn write_bits(&mut self, value: u64, count: u32) -> KzResult<u32> {
        if self.closed {
            return Err(KzError::BitStreamClosed);
        }

        if count == 0 || count > 64 {
            return Err(KzError::Argument(format!(
                "invalid bit count: {} (must be in [1..64])",
                count
            )));
        }

        let mut remaining = count;

        // Pad the partially filled byte first.
        if self.bit_index != 7 {
            let free = self.bit_index + 1;
            let sz = remaining.min(free);
            remaining -= sz;
            let shift = free - sz;
            let bits = (value >> remaining) & ((1u64 << sz) - 1);
            self.buffer[self.position] |= (bits << shift) as u8;
            self.bit_index = (shift + 7) & 7;

            if self.bit_index == 7 {
                self.position += 1;

                if self.position >= self.buffer.len() {
                    self.flush()?;
                }
            }
        }

        // Byte-aligned fast path.
        while remaining >= 8 {
            remaining -= 8;
            self.buffer[self.position] = (value >> remaining) as u8;
            self.position += 1;

            if self.position >= self.buffer.len() {
                self.flush()?;
            }
        }

        // Leftover bits start a new partial byte.
        if remaining > 0 {
            self.bit_index -= remaining;
            self.buffer[self.position] |= (value << (8 - remaining)) as u8;
        }

        Ok(count)
    }

    /// Drain all complete bytes to the sink. A partially filled trailing byte
    /// stays in the buffer until more bits arrive or the stream is closed.
    pub fn flush(&mut self) -> KzResult<()> {
        if self.closed {
            return Err(KzError::BitStreamClosed);
        }

        if self.position > 0 {
            self.os.write_all(&self.buffer[..self.position])?;
            self.written += (self.position as u64) << 3;

            // Keep the partial byte, zero everything else.
            if self.bit_index != 7 {
                self.buffer[0] = self.buffer[self.position.min(self.buffer.len() - 1)];
            } else {
                self.buffer[0] = 0;
            }

            let end = self.position.min(self.buffer.len() - 1);
            for b in &mut self.buffer[1..=end] {
                *b = 0;
            }

            self.position = 0;
        }

        self.os.flush()?;
        Ok(())
    }

    /// Flush everything, padding a trailing partial byte with zero bits, and
    /// mark the stream closed. Idempotent.
    pub fn close(&mut self) -> KzResult<()> {
        if self.closed {
            return Ok(());
        }

        if self.bit_index != 7 {
            // Promote the incomplete last byte; its unset bits are zero.
            self.position += 1;
            self.bit_index = 7;
        }

        self.flush()?;
        self.closed = true;
        Ok(())
    }

    /// Total bits produced so far (flushed and buffered).
    pub fn written(&self) -> u64 {
        if self.closed {
            self.written
        } else {
            self.written + ((self.position as u64) << 3) + (7 - self.bit_index) as u64
        }
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Give back the underlying sink. Call [`close`](Self::close) first or
    /// buffered bits are lost.
    pub fn into_inner(self) -> W {
        self.os
    }
}

/// Reads bits MSB-first from an underlying byte source.
pub struct InputBitStream<R: Read> {
    is: R,
    buffer: Vec<u8>,
    /// Index of the byte currently being consumed (-1 before the first refill).
    position: isize,
    /// Index of the last valid byte in the buffer.
    max_position: isize,
    /// Next bit to read within `buffer[position]`, counting MSB→LSB.
    bit_index: u32,
    /// Bits consumed so far.
    read: u64,
    closed: bool,
}

impl<R: Read> InputBitStream<R> {
    /// Create a bit reader over `is` with an internal buffer of `buffer_size`
    /// bytes (at least 1024).
    pub fn new(is: R, buffer_size: usize) -> KzResult<Self> {
        if buffer_size < MIN_BUFFER_SIZE {
            return Err(KzError::Argument(format!(
                "bit stream buffer size must be at least {} bytes, got {}",
                MIN_BUFFER_SIZE, buffer_size
            )));
        }

        Ok(Self {
            is,
            buffer: vec![0u8; buffer_size],
            position: -1,
            max_position: -1,
            bit_index: 7,
            read: 0,
            closed: false,
        })
    }

    /// Read a single bit.
    pub fn read_bit(&mut self) -> KzResult<u32> {
        if self.bit_index == 7 {
            self.advance_byte()?;
        }

        let bit = ((self.buffer[self.position as usize] >> self.bit_index) & 1) as u32;
        self.bit_index = (self.bit_index + 7) & 7;
        self.read += 1;
        Ok(bit)
    }

    /// Read `count` bits (in [1, 64]), returned right-aligned with the first
    /// bit read in the most significant position.
    pub fn read_bits(&mut self, count: u32) -> KzResult<u64> {
        if count == 0 || count > 64 {
            return Err(KzError::Argument(format!(
                "invalid bit count: {} (must be in [1..64])",
                count
            )));
        }

        let mut remaining = count;
        let mut res = 0u64;

        // Drain the partially consumed byte first.
        if self.bit_index != 7 {
            let avail = self.bit_index + 1;
            let sz = remaining.min(avail);
            remaining -= sz;
            let bits =
                ((self.buffer[self.position as usize] >> (avail - sz)) as u64) & ((1u64 << sz) - 1);
            res |= bits << remaining;
            self.bit_index = (self.bit_index + 8 - sz) & 7;
            self.read += sz as u64;
        }

        if self.bit_index == 7 {
            // Byte-aligned fast path.
            while remaining >= 8 {
                self.advance_byte()?;
                let value = self.buffer[self.position as usize] as u64;
                remaining -= 8;
                self.read += 8;
                res |= value << remaining;
            }

            // Leftover bits from the next byte.
            if remaining > 0 {
                self.advance_byte()?;
                let value = self.buffer[self.position as usize] as u64;
                res |= (value >> (8 - remaining)) & ((1u64 << remaining) - 1);
                self.read += remaining as u64;
                self.bit_index -= remaining;
            }
        }

        Ok(res)
    }

    /// Move to the next buffered byte, refilling from the source when the
    /// buffer is exhausted.
    fn advance_byte(&mut self) -> KzResult<()> {
        self.position += 1;

        while self.position > self.max_position {
            self.refill()?;
            self.position += 1;
        }

        Ok(())
    }

    /// Refill the buffer from the source. End of input is an error here:
    /// callers asked for bits that do not exist.
    fn refill(&mut self) -> KzResult<()> {
        if self.closed {
            return Err(KzError::BitStreamClosed);
        }

        loop {
            match self.is.read(&mut self.buffer) {
                Ok(0) => {
                    return Err(KzError::Io(io::Error::new(
                        io::ErrorKind::UnexpectedEof,
                        "end of input bit stream",
                    )))
                }
                Ok(n) => {
                    self.position = -1;
                    self.max_position = n as isize - 1;
                    return Ok(());
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(KzError::Io(e)),
            }
        }
    }

    /// Whether at least one more bit can be read. Tries one refill when the
    /// local buffer is exhausted; a clean end of input yields `false`.
    pub fn has_more_to_read(&mut self) -> KzResult<bool> {
        if self.closed {
            return Err(KzError::BitStreamClosed);
        }

        if self.position < self.max_position || self.bit_index != 7 {
            return Ok(true);
        }

        match self.refill() {
            Ok(()) => Ok(true),
            Err(KzError::Io(e)) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Release the buffer and mark the stream closed. Idempotent.
    pub fn close(&mut self) -> KzResult<()> {
        self.closed = true;
        self.position = -1;
        self.max_position = -1;
        self.bit_index = 7;
        Ok(())
    }

    /// Total bits consumed so far.
    pub fn read(&self) -> u64 {
        self.read
    }

    pub fn closed(&self) -> bool {
        self.closed
    }

    /// Give back the underlying source.
    pub fn into_inner(self) -> R {
        self.is
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_small_buffer() {
        assert!(matches!(
            OutputBitStream::new(Vec::new(), 16),
            Err(KzError::Argument(_))
        ));
        assert!(matches!(
            InputBitStream::new(&[0u8; 0][..], 16),
            Err(KzError::Argument(_))
        ));
    }

    #[test]
    fn test_write_bits_msb_first() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        obs.write_bits(0b101, 3).unwrap();
        obs.write_bits(0b00001, 5).unwrap();
        obs.close().unwrap();
        assert_eq!(obs.into_inner(), vec![0b1010_0001]);
    }

    #[test]
    fn test_close_pads_with_zeros() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        obs.write_bit(1).unwrap();
        obs.write_bit(1).unwrap();
        obs.close().unwrap();
        assert_eq!(obs.into_inner(), vec![0b1100_0000]);
    }

    #[test]
    fn test_write_bits_rejects_bad_count() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        assert!(matches!(obs.write_bits(0, 0), Err(KzError::Argument(_))));
        assert!(matches!(obs.write_bits(0, 65), Err(KzError::Argument(_))));
    }

    #[test]
    fn test_closed_write_fails() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        obs.close().unwrap();
        assert!(matches!(obs.write_bit(1), Err(KzError::BitStreamClosed)));
        assert!(matches!(
            obs.write_bits(1, 8),
            Err(KzError::BitStreamClosed)
        ));
    }

    #[test]
    fn test_written_counter() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        assert_eq!(obs.written(), 0);
        obs.write_bits(0xFF, 5).unwrap();
        assert_eq!(obs.written(), 5);
        obs.write_bits(0xABCD, 16).unwrap();
        assert_eq!(obs.written(), 21);
    }

    #[test]
    fn test_read_bits_msb_first() {
        let data = [0b1010_0001u8, 0xFF];
        let mut ibs = InputBitStream::new(&data[..], 1024).unwrap();
        assert_eq!(ibs.read_bits(3).unwrap(), 0b101);
        assert_eq!(ibs.read_bits(5).unwrap(), 0b00001);
        assert_eq!(ibs.read_bits(8).unwrap(), 0xFF);
        assert_eq!(ibs.read(), 16);
    }

    #[test]
    fn test_read_past_end_is_error() {
        let data = [0xAAu8];
        let mut ibs = InputBitStream::new(&data[..], 1024).unwrap();
        assert_eq!(ibs.read_bits(8).unwrap(), 0xAA);
        assert!(matches!(ibs.read_bit(), Err(KzError::Io(_))));
    }

    #[test]
    fn test_has_more_to_read() {
        let data = [0x01u8];
        let mut ibs = InputBitStream::new(&data[..], 1024).unwrap();
        assert!(ibs.has_more_to_read().unwrap());
        ibs.read_bits(7).unwrap();
        assert!(ibs.has_more_to_read().unwrap());
        ibs.read_bit().unwrap();
        assert!(!ibs.has_more_to_read().unwrap());
    }

    #[test]
    fn test_round_trip_mixed_widths() {
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        obs.write_bits(0x4B414E5A, 32).unwrap();
        obs.write_bits(2, 7).unwrap();
        obs.write_bit(1).unwrap();
        obs.write_bits(0x48, 7).unwrap();
        obs.write_bits(1, 7).unwrap();
        obs.write_bits(1024 * 1024, 26).unwrap();
        obs.write_bits(u64::MAX, 64).unwrap();
        obs.close().unwrap();

        let bytes = obs.into_inner();
        let mut ibs = InputBitStream::new(&bytes[..], 1024).unwrap();
        assert_eq!(ibs.read_bits(32).unwrap(), 0x4B414E5A);
        assert_eq!(ibs.read_bits(7).unwrap(), 2);
        assert_eq!(ibs.read_bit().unwrap(), 1);
        assert_eq!(ibs.read_bits(7).unwrap(), 0x48);
        assert_eq!(ibs.read_bits(7).unwrap(), 1);
        assert_eq!(ibs.read_bits(26).unwrap(), 1024 * 1024);
        assert_eq!(ibs.read_bits(64).unwrap(), u64::MAX);
    }

    #[test]
    fn test_round_trip_across_buffer_boundary() {
        // Write more than one internal buffer's worth of data.
        let mut obs = OutputBitStream::new(Vec::new(), 1024).unwrap();
        for i in 0..4000u64 {
            obs.write_bits(i & 0x1FFF, 13).unwrap();
        }
        obs.close().unwrap();

        let bytes = obs.into_inner();
        let mut ibs = InputBitStream::new(&bytes[..], 1024).unwrap();
        for i in 0..4000u64 {
            assert_eq!(ibs.read_bits(13).unwrap(), i & 0x1FFF);
        }
    }

    #[test]
    fn test_counters_track_partial_reads() {
        let data = [0xF0u8, 0x0F];
        let mut ibs = InputBitStream::new(&data[..], 1024).unwrap();
        ibs.read_bits(4).unwrap();
        assert_eq!(ibs.read(), 4);
        ibs.read_bits(9).unwrap();
        assert_eq!(ibs.read(), 13);
    }
}
