use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use crate::error::Error;

/// A point in the binlog stream: `(file-name, byte offset)`.
///
/// Totally ordered by `(file-name lexicographic, offset numeric)`. Created
/// by the source MySQL server, advanced monotonically within a file by the
/// stream consumer, and reset to `(next_file, 4)` on rotate; 4 is the width
/// of a binlog file's magic number, i.e. the first possible event offset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Position {
    pub file: String,
    pub offset: u32,
}

impl Position {
    pub const FIRST_EVENT_OFFSET: u32 = 4;

    pub fn new(file: impl Into<String>, offset: u32) -> Self {
        Self { file: file.into(), offset }
    }

    pub fn rotate_to(&mut self, next_file: impl Into<String>, offset: u32) {
        self.file = next_file.into();
        self.offset = offset;
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.offset)
    }
}

impl FromStr for Position {
    type Err = Error;

    /// Parses the `"<file>:<offset>"` form persisted in `source.pos`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (file, offset) = s
            .rsplit_once(':')
            .ok_or_else(|| Error::Configuration(format!("malformed position '{s}', expected <file>:<offset>")))?;
        let offset: u32 = offset
            .parse()
            .map_err(|_| Error::Configuration(format!("malformed position offset in '{s}'")))?;
        Ok(Position::new(file, offset))
    }
}

impl PartialOrd for Position {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Position {
    fn cmp(&self, other: &Self) -> Ordering {
        self.file.cmp(&other.file).then(self.offset.cmp(&other.offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_displays_round_trip() {
        let p: Position = "mysql-bin.000042:4".parse().unwrap();
        assert_eq!(p, Position::new("mysql-bin.000042", 4));
        assert_eq!(p.to_string(), "mysql-bin.000042:4");
    }

    #[test]
    fn orders_by_file_then_offset() {
        let a = Position::new("mysql-bin.000001", 999);
        let b = Position::new("mysql-bin.000002", 4);
        assert!(a < b);

        let c = Position::new("mysql-bin.000001", 100);
        let d = Position::new("mysql-bin.000001", 200);
        assert!(c < d);
    }

    #[test]
    fn rejects_malformed_position() {
        assert!("no-colon-here".parse::<Position>().is_err());
        assert!("mysql-bin.000001:abc".parse::<Position>().is_err());
    }
}
