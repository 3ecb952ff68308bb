//! Output routing for rendered SQL and lifecycle markers. Statements,
//! rotation markers, and Xid markers all go through the same [`Sink`], so a
//! configured output file captures the full stream rather than having
//! markers leak to stdout.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

use crate::error::Result;

pub enum Sink {
    Stdout,
    File(Mutex<File>),
}

impl Sink {
    pub fn stdout() -> Self {
        Sink::Stdout
    }

    /// Truncates the target file, so each run starts a fresh transcript.
    pub fn to_file(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).write(true).truncate(true).open(path)?;
        Ok(Sink::File(Mutex::new(file)))
    }

    pub fn write_line(&self, line: &str) -> Result<()> {
        match self {
            Sink::Stdout => {
                println!("{line}");
                Ok(())
            }
            Sink::File(file) => {
                let mut file = file.lock().unwrap();
                writeln!(file, "{line}")?;
                Ok(())
            }
        }
    }
}
