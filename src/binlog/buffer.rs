//! A binary cursor over a single event's payload. Binlog events only ever
//! use little-endian integers, so only those getters exist.

use crate::error::{Error, Result};

pub struct EventBuffer<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> EventBuffer<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn seek(&mut self, pos: usize) {
        self.pos = pos.min(self.buf.len());
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        self.take(n).map(|_| ())
    }

    pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
        if self.remaining() < n {
            return Err(Self::eof());
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn take_rest(&mut self) -> &'a [u8] {
        let slice = &self.buf[self.pos..];
        self.pos = self.buf.len();
        slice
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.take(1)?[0])
    }

    pub fn i8(&mut self) -> Result<i8> {
        Ok(self.u8()? as i8)
    }

    pub fn u16(&mut self) -> Result<u16> {
        let b = self.take(2)?;
        Ok(u16::from_le_bytes([b[0], b[1]]))
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.u16()? as i16)
    }

    pub fn u24(&mut self) -> Result<u32> {
        let b = self.take(3)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]))
    }

    pub fn u32(&mut self) -> Result<u32> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32> {
        Ok(self.u32()? as i32)
    }

    pub fn u48(&mut self) -> Result<u64> {
        let b = self.take(6)?;
        Ok(u64::from_le_bytes([b[0], b[1], b[2], b[3], b[4], b[5], 0, 0]))
    }

    pub fn u64(&mut self) -> Result<u64> {
        let b = self.take(8)?;
        Ok(u64::from_le_bytes(b.try_into().unwrap()))
    }

    pub fn i64(&mut self) -> Result<i64> {
        Ok(self.u64()? as i64)
    }

    pub fn f32(&mut self) -> Result<f32> {
        Ok(f32::from_le_bytes(self.take(4)?.try_into().unwrap()))
    }

    pub fn f64(&mut self) -> Result<f64> {
        Ok(f64::from_le_bytes(self.take(8)?.try_into().unwrap()))
    }

    /// The "packed integer" used for per-column metadata lengths: the high
    /// two bits of the first byte select a 1/3/4/9-byte encoding.
    pub fn packed_int(&mut self) -> Result<u64> {
        let first = self.u8()?;
        match first {
            0xfc => Ok(self.take(2)?.iter().rev().fold(0u64, |acc, &b| (acc << 8) | b as u64)),
            0xfd => Ok(self.u24()? as u64),
            0xfe => self.u64(),
            v => Ok(v as u64),
        }
    }

    pub fn fixed_string(&mut self, len: usize) -> Result<String> {
        Ok(String::from_utf8_lossy(self.take(len)?).into_owned())
    }

    pub fn null_terminated_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(Self::eof)?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    /// A length-prefixed string where the length is a single byte, as used
    /// for table/database names in `TABLE_MAP_EVENT`.
    pub fn length_prefixed_string(&mut self) -> Result<String> {
        let len = self.u8()? as usize;
        let s = self.fixed_string(len)?;
        self.u8()?; // trailing NUL
        Ok(s)
    }

    fn eof() -> Error {
        Error::Data("unexpected end of binlog event payload".into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reads_little_endian_integers() {
        let mut buf = EventBuffer::new(&[0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08]);
        assert_eq!(buf.u16().unwrap(), 0x0201);
        assert_eq!(buf.u24().unwrap(), 0x060504);
        assert_eq!(buf.remaining(), 3);
        assert!(buf.u32().is_err());
    }

    #[test]
    fn packed_int_small_value_is_single_byte() {
        let mut buf = EventBuffer::new(&[5]);
        assert_eq!(buf.packed_int().unwrap(), 5);
    }

    #[test]
    fn length_prefixed_string_consumes_trailing_nul() {
        let mut buf = EventBuffer::new(&[3, b't', b'b', b'l', 0, 0xaa]);
        assert_eq!(buf.length_prefixed_string().unwrap(), "tbl");
        assert_eq!(buf.u8().unwrap(), 0xaa);
    }
}
