use crate::Result;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

const ENTRY_MARKER: &str = "--- entry ";

/// Append-only human-readable report file with a running entry counter
pub struct LogSink {
    path: PathBuf,
}

impl LogSink {
    /// Create a sink writing to `dir/name`, creating the directory if needed
    pub fn new(dir: &Path, name: &str) -> Result<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            path: dir.join(name),
        })
    }

    pub fn trades(dir: &Path) -> Result<Self> {
        Self::new(dir, "trades_log.txt")
    }

    pub fn wallet(dir: &Path) -> Result<Self> {
        Self::new(dir, "wallet_log.txt")
    }

    /// Number of the next entry, derived from the markers already in the file
    fn next_entry(&self) -> usize {
        match fs::read_to_string(&self.path) {
            Ok(contents) => {
                contents
                    .lines()
                    .filter(|line| line.starts_with(ENTRY_MARKER))
                    .count()
                    + 1
            }
            Err(_) => 1,
        }
    }

    /// Append one numbered entry
    pub fn append(&self, body: &str) -> Result<()> {
        let entry = self.next_entry();

        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        writeln!(file, "\n{}{} ---", ENTRY_MARKER, entry)?;
        writeln!(file, "{}", body)?;

        Ok(())
    }
}
