//! Bit-granular reading and the frame checksum
//!
//! MPEG audio fields are packed MSB-first without byte alignment. Every read
//! is bounded by the slice the reader was built over, so a layer decoder can
//! never run past its own frame.

use crate::error::{Error, Result};

/// Big-endian bit reader over a borrowed frame body.
#[derive(Debug, Clone)]
pub struct BitReader<'a> {
    data: &'a [u8],
    bit_pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, bit_pos: 0 }
    }

    /// Read `n` bits (0..=32) as an unsigned value.
    pub fn get_bits(&mut self, n: u32) -> Result<u32> {
        if n == 0 {
            return Ok(0);
        }
        if n > 32 {
            return Err(Error::Decode(format!("bit read of {} exceeds 32", n)));
        }
        if self.bits_remaining() < n as usize {
            return Err(Error::Decode(format!(
                "read of {} bits past end of frame ({} left)",
                n,
                self.bits_remaining()
            )));
        }

        let mut value: u64 = 0;
        let mut needed = n;
        while needed > 0 {
            let byte = self.data[self.bit_pos / 8];
            let offset = (self.bit_pos % 8) as u32;
            let avail = 8 - offset;
            let take = avail.min(needed);
            let shifted = (byte as u32 >> (avail - take)) & ((1u32 << take) - 1);

            value = (value << take) | shifted as u64;
            needed -= take;
            self.bit_pos += take as usize;
        }

        Ok(value as u32)
    }

    pub fn get_bit(&mut self) -> Result<bool> {
        Ok(self.get_bits(1)? == 1)
    }

    pub fn skip_bits(&mut self, n: usize) -> Result<()> {
        if self.bits_remaining() < n {
            return Err(Error::Decode(format!("skip of {} bits past end of frame", n)));
        }
        self.bit_pos += n;
        Ok(())
    }

    /// Bits consumed so far
    pub fn position(&self) -> usize {
        self.bit_pos
    }

    pub fn bits_remaining(&self) -> usize {
        self.data.len() * 8 - self.bit_pos
    }
}

/// CRC-16 with generator 0x8005, seeded with 0xFFFF.
///
/// Fed bit strings MSB-first: the last 16 header bits, then the
/// layer-specific protected fields.
#[derive(Debug, Clone, Copy)]
pub struct Crc16 {
    crc: u16,
}

impl Crc16 {
    const POLYNOMIAL: u16 = 0x8005;

    pub fn new() -> Self {
        Self { crc: 0xFFFF }
    }

    /// Feed the low `length` bits of `bits`, most significant first.
    pub fn add_bits(&mut self, bits: u32, length: u32) {
        for i in (0..length).rev() {
            let bit = (bits >> i) & 1 == 1;
            let msb = self.crc & 0x8000 != 0;
            self.crc <<= 1;
            if msb != bit {
                self.crc ^= Self::POLYNOMIAL;
            }
        }
    }

    pub fn checksum(&self) -> u16 {
        self.crc
    }
}

impl Default for Crc16 {
    fn default() -> Self {
        Self::new()
    }
}

/// Reads fields and feeds them to a checksum at the same time.
///
/// Layer I/II protect allocation and scfsi fields; this keeps the two in step.
pub(crate) fn read_checked(reader: &mut BitReader<'_>, crc: &mut Option<Crc16>, n: u32) -> Result<u32> {
    let value = reader.get_bits(n)?;
    if let Some(crc) = crc.as_mut() {
        crc.add_bits(value, n);
    }
    Ok(value)
}
