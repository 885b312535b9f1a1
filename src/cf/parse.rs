use crate::ParseError;
use byteorder::{BigEndian, ByteOrder};

/// Bounds-checked big-endian cursor over a class file buffer
///
/// All multi-byte values in the class file format are big-endian. Reads past
/// the end of the buffer fail with the current offset and a description of the
/// structure being read, which is how parse errors stay actionable.
pub struct ClassParser<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ClassParser<'a> {
    pub fn new(bytes: &'a [u8]) -> ClassParser<'a> {
        ClassParser { bytes, offset: 0 }
    }

    /// Current offset into the buffer
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Bytes not yet consumed
    pub fn remaining(&self) -> usize {
        self.bytes.len() - self.offset
    }

    fn take(&mut self, count: usize, expected: &'static str) -> Result<&'a [u8], ParseError> {
        if self.remaining() < count {
            return Err(ParseError {
                offset: self.offset,
                expected,
            });
        }
        let slice = &self.bytes[self.offset..self.offset + count];
        self.offset += count;
        Ok(slice)
    }

    pub fn u8(&mut self, expected: &'static str) -> Result<u8, ParseError> {
        Ok(self.take(1, expected)?[0])
    }

    pub fn u16(&mut self, expected: &'static str) -> Result<u16, ParseError> {
        Ok(BigEndian::read_u16(self.take(2, expected)?))
    }

    pub fn u32(&mut self, expected: &'static str) -> Result<u32, ParseError> {
        Ok(BigEndian::read_u32(self.take(4, expected)?))
    }

    pub fn i32(&mut self, expected: &'static str) -> Result<i32, ParseError> {
        Ok(BigEndian::read_i32(self.take(4, expected)?))
    }

    pub fn u64(&mut self, expected: &'static str) -> Result<u64, ParseError> {
        Ok(BigEndian::read_u64(self.take(8, expected)?))
    }

    /// Read `count` raw bytes
    pub fn bytes(&mut self, count: usize, expected: &'static str) -> Result<&'a [u8], ParseError> {
        self.take(count, expected)
    }

    /// Fail at the current offset
    pub fn error(&self, expected: &'static str) -> ParseError {
        ParseError {
            offset: self.offset,
            expected,
        }
    }
}
