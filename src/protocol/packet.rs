//! MySQL client/server packet framing and length-encoded primitives: one
//! small cursor type rather than one struct per packet kind.

use std::time::Duration;

use crate::channel::SocketChannel;
use crate::error::{Error, Result};

pub const DEFAULT_IO_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads one MySQL protocol packet (3-byte little-endian length + 1-byte
/// sequence id + payload) off a channel.
pub fn read_packet(channel: &mut dyn SocketChannel, timeout: Duration) -> Result<(u8, Vec<u8>)> {
    let mut header = [0u8; 4];
    channel.read_exact_with_timeout(&mut header, timeout)?;
    let len = u32::from_le_bytes([header[0], header[1], header[2], 0]) as usize;
    let seq = header[3];
    let mut payload = vec![0u8; len];
    if len > 0 {
        channel.read_exact_with_timeout(&mut payload, timeout)?;
    }
    Ok((seq, payload))
}

pub fn write_packet(channel: &mut dyn SocketChannel, seq: u8, payload: &[u8]) -> Result<()> {
    if payload.len() > 0xFFFFFF {
        return Err(Error::Protocol("packet payload exceeds 16MB, splitting not implemented".into()));
    }
    let len = payload.len() as u32;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_le_bytes()[..3]);
    buf.push(seq);
    buf.extend_from_slice(payload);
    channel.write_all(&buf)
}

/// Cursor over a single packet's payload, used to parse the handshake and
/// `COM_QUERY` result sets.
pub struct Cursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Cursor<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    pub fn peek_u8(&self) -> Option<u8> {
        self.buf.get(self.pos).copied()
    }

    pub fn u8(&mut self) -> Result<u8> {
        let v = *self.buf.get(self.pos).ok_or_else(Self::eof)?;
        self.pos += 1;
        Ok(v)
    }

    pub fn u16_le(&mut self) -> Result<u16> {
        let bytes = self.take(2)?;
        Ok(u16::from_le_bytes([bytes[0], bytes[1]]))
    }

    pub fn u32_le(&mut self) -> Result<u32> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
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

    /// NUL-terminated string, as used throughout the initial handshake.
    pub fn null_terminated_string(&mut self) -> Result<String> {
        let rest = &self.buf[self.pos..];
        let end = rest.iter().position(|&b| b == 0).ok_or_else(Self::eof)?;
        let s = String::from_utf8_lossy(&rest[..end]).into_owned();
        self.pos += end + 1;
        Ok(s)
    }

    /// Length-encoded integer (the MySQL "lenenc-int" format).
    pub fn length_encoded_int(&mut self) -> Result<u64> {
        let first = self.u8()?;
        match first {
            0xfb => Ok(0), // NULL sentinel; callers that care check 0xfb themselves
            0xfc => Ok(u16::from_le_bytes(self.take(2)?.try_into().unwrap()) as u64),
            0xfd => {
                let b = self.take(3)?;
                Ok(u32::from_le_bytes([b[0], b[1], b[2], 0]) as u64)
            }
            0xfe => Ok(u64::from_le_bytes(self.take(8)?.try_into().unwrap())),
            v => Ok(v as u64),
        }
    }

    pub fn is_null_marker(byte: u8) -> bool {
        byte == 0xfb
    }

    /// Length-encoded string.
    pub fn length_encoded_string(&mut self) -> Result<Vec<u8>> {
        let len = self.length_encoded_int()? as usize;
        Ok(self.take(len)?.to_vec())
    }

    fn eof() -> Error {
        Error::Protocol("unexpected end of packet".into())
    }
}

pub const OK_PACKET: u8 = 0x00;
pub const EOF_PACKET: u8 = 0xfe;
pub const ERR_PACKET: u8 = 0xff;

/// Parses a MySQL ERR packet body (after the 0xff marker byte) into an error.
pub fn parse_err_packet(payload: &[u8]) -> Error {
    let mut cursor = Cursor::new(payload);
    let code = cursor.u16_le().unwrap_or(0);
    // Skip the optional '#' + 5-byte SQL state marker before the message.
    if cursor.remaining() >= 6 {
        let marker = cursor.take(6).unwrap_or(&[]);
        if marker.first() != Some(&b'#') {
            cursor = Cursor::new(payload);
            cursor.u16_le().ok();
        }
    }
    let rest = cursor.take_rest();
    let message = String::from_utf8_lossy(rest).into_owned();
    Error::Connectivity(format!("MySQL error {code}: {message}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn length_encoded_int_roundtrips_small_values() {
        let mut cursor = Cursor::new(&[42]);
        assert_eq!(cursor.length_encoded_int().unwrap(), 42);
    }

    #[test]
    fn length_encoded_int_handles_2_byte_prefix() {
        let mut cursor = Cursor::new(&[0xfc, 0x00, 0x01]);
        assert_eq!(cursor.length_encoded_int().unwrap(), 256);
    }

    #[test]
    fn null_terminated_string_stops_at_nul() {
        let mut cursor = Cursor::new(b"abc\0def");
        assert_eq!(cursor.null_terminated_string().unwrap(), "abc");
        assert_eq!(cursor.take_rest(), b"def");
    }
}
