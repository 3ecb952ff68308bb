//! Offline binlog file reader, used by the write-touch analyzer and the
//! legacy-server replay path to walk a local `mysql-bin.NNNNNN` file
//! without a live replication session. Mirrors the on-wire decode path in
//! [`crate::binlog::decoder`] but reads events straight off a file cursor
//! instead of individual network packets.

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::binlog::decoder::Decoder;
use crate::binlog::event::{Event, EventHeader, EVENT_HEADER_LEN};
use crate::error::{Error, Result};

const BINLOG_MAGIC: [u8; 4] = [0xfe, b'b', b'i', b'n'];

#[derive(Debug)]
pub struct FileReader {
    reader: BufReader<File>,
    decoder: Decoder,
}

impl FileReader {
    pub fn open(path: &Path) -> Result<Self> {
        let mut reader = BufReader::new(File::open(path)?);
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != BINLOG_MAGIC {
            return Err(Error::Data(format!("{} is not a binlog file (bad magic)", path.display())));
        }
        Ok(Self { reader, decoder: Decoder::new() })
    }

    /// Returns the next decoded event with its header, or `Ok(None)` at end
    /// of file. The header's `next_position` is what position tracking (the
    /// legacy-server replay path) advances by.
    pub fn next_event(&mut self) -> Result<Option<(EventHeader, Event)>> {
        let mut header_bytes = [0u8; EVENT_HEADER_LEN];
        match self.reader.read_exact(&mut header_bytes) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let header = Decoder::parse_header(&header_bytes)?;
        let body_len = (header.event_length as usize).saturating_sub(EVENT_HEADER_LEN);
        let mut body = vec![0u8; body_len];
        self.reader.read_exact(&mut body)?;

        let mut full = Vec::with_capacity(EVENT_HEADER_LEN + body_len);
        full.extend_from_slice(&header_bytes);
        full.extend_from_slice(&body);

        let event = self.decoder.decode(&header, &full)?;
        Ok(Some((header, event)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn rejects_file_without_binlog_magic() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not a binlog").unwrap();
        let err = FileReader::open(file.path()).unwrap_err();
        assert!(err.to_string().contains("bad magic"));
    }
}
