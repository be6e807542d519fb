//! MSB-first bit writer and reader over byte buffers.
//!
//! The writer pads the final partial byte with zero bits on flush. Those
//! padding bits look exactly like data, so readers must be bounded by a
//! symbol count kept outside the stream.

use std::io::{self, Cursor};

use bitstream_io::{
    BigEndian, BitRead, BitReader as IoBitReader, BitWrite, BitWriter as IoBitWriter,
};

use crate::error::CompressError;

pub struct BitWriter {
    inner: IoBitWriter<Vec<u8>, BigEndian>,
    bits_written: u64,
}

impl BitWriter {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(bytes: usize) -> Self {
        Self {
            inner: IoBitWriter::endian(Vec::with_capacity(bytes), BigEndian),
            bits_written: 0,
        }
    }

    pub fn write_bit(&mut self, bit: bool) -> Result<(), CompressError> {
        self.inner.write_bit(bit)?;
        self.bits_written += 1;
        Ok(())
    }

    /// Write the low `count` bits of `value`, most significant first.
    pub fn write_bits(&mut self, value: u64, count: u32) -> Result<(), CompressError> {
        if count == 0 {
            return Ok(());
        }
        if count > 64 {
            return Err(CompressError::InvalidInput(format!("cannot write {count} bits at once")));
        }
        let masked = if count == 64 { value } else { value & ((1u64 << count) - 1) };
        self.inner.write(count, masked)?;
        self.bits_written += u64::from(count);
        Ok(())
    }

    /// Pad the pending partial byte with zero bits. No-op when byte aligned.
    pub fn flush(&mut self) -> Result<(), CompressError> {
        self.inner.byte_align()?;
        Ok(())
    }

    /// Number of data bits written, excluding flush padding.
    pub fn bits_written(&self) -> u64 {
        self.bits_written
    }

    pub fn into_bytes(mut self) -> Result<Vec<u8>, CompressError> {
        self.flush()?;
        Ok(self.inner.into_writer())
    }
}

impl Default for BitWriter {
    fn default() -> Self {
        Self::new()
    }
}

pub struct BitReader<'a> {
    inner: IoBitReader<Cursor<&'a [u8]>, BigEndian>,
    bits_read: u64,
}

impl<'a> BitReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Self {
        Self {
            inner: IoBitReader::endian(Cursor::new(bytes), BigEndian),
            bits_read: 0,
        }
    }

    pub fn read_bit(&mut self) -> Result<bool, CompressError> {
        match self.inner.read_bit() {
            Ok(bit) => {
                self.bits_read += 1;
                Ok(bit)
            }
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(CompressError::StreamExhausted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Read `count` bits (at most 64) into an integer, most significant first.
    pub fn read_bits(&mut self, count: u32) -> Result<u64, CompressError> {
        if count > 64 {
            return Err(CompressError::InvalidInput(format!("cannot read {count} bits at once")));
        }
        let mut value = 0u64;
        for _ in 0..count {
            value = (value << 1) | u64::from(self.read_bit()?);
        }
        Ok(value)
    }

    /// Current cursor as (byte position, bit position within that byte).
    pub fn position(&self) -> (u64, u32) {
        (self.bits_read / 8, (self.bits_read % 8) as u32)
    }
}
