use anyhow::{Context, Result};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::sync::Mutex;
use tracing::{debug, warn};

use crate::models::Event;

/// Append-only JSONL event log.
///
/// One self-describing JSON record per line. Appends take an internal
/// lock and issue a single write, so records from concurrent handlers
/// never interleave.
pub struct Journal {
    file: Mutex<File>,
}

impl Journal {
    /// Open or create the journal at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .with_context(|| format!("Failed to open journal: {}", path.as_ref().display()))?;

        Ok(Self {
            file: Mutex::new(file),
        })
    }

    /// Append one event as a single line
    pub fn append(&self, event: &Event) -> std::io::Result<()> {
        let mut line = serde_json::to_string(event)?;
        line.push('\n');

        let mut file = self.file.lock().unwrap();
        file.write_all(line.as_bytes())
    }

    /// Read every event in a journal file, oldest first.
    ///
    /// A missing file is zero events. Lines that do not parse are
    /// reported and skipped rather than failing the whole read.
    pub fn read_events<P: AsRef<Path>>(path: P) -> Result<Vec<Event>> {
        let path = path.as_ref();

        if !path.exists() {
            debug!("Journal {} does not exist, treating as empty", path.display());
            return Ok(Vec::new());
        }

        let file = File::open(path)
            .with_context(|| format!("Failed to open journal: {}", path.display()))?;
        let reader = BufReader::new(file);

        let mut events = Vec::new();
        for (idx, line) in reader.lines().enumerate() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }

            match serde_json::from_str::<Event>(&line) {
                Ok(event) => events.push(event),
                Err(e) => warn!("Skipping malformed journal line {}: {}", idx + 1, e),
            }
        }

        Ok(events)
    }
}
