use std::fmt;
use std::fs;
use std::io;
use std::path::Path;
use std::sync::Mutex;

use chrono::Local;
use log::Level;

use crate::constants::RUN_LOG_TIMESTAMP_FORMAT;

/// Per-run log sink shipped inside the archive.
///
/// Every message is forwarded to the `log` facade and also kept here as a
/// formatted line, whatever the process-wide level is. One `RunLog` belongs
/// to one collection run and is passed down to every phase, so overlapping
/// runs never see each other's lines. Appends take the lock for a whole line.
#[derive(Debug, Default)]
pub struct RunLog {
    lines: Mutex<Vec<String>>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn log(&self, level: Level, message: fmt::Arguments<'_>) {
        let message = message.to_string();
        log::log!(level, "{}", message);

        let line = format!(
            "{} [{}] {}",
            Local::now().format(RUN_LOG_TIMESTAMP_FORMAT),
            level,
            message
        );
        match self.lines.lock() {
            Ok(mut lines) => lines.push(line),
            Err(poisoned) => poisoned.into_inner().push(line),
        }
    }

    pub fn debug(&self, message: fmt::Arguments<'_>) {
        self.log(Level::Debug, message);
    }

    pub fn info(&self, message: fmt::Arguments<'_>) {
        self.log(Level::Info, message);
    }

    pub fn warn(&self, message: fmt::Arguments<'_>) {
        self.log(Level::Warn, message);
    }

    pub fn error(&self, message: fmt::Arguments<'_>) {
        self.log(Level::Error, message);
    }

    /// Snapshot of the lines recorded so far
    pub fn lines(&self) -> Vec<String> {
        match self.lines.lock() {
            Ok(lines) => lines.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn contents(&self) -> String {
        let mut contents = self.lines().join("\n");
        if !contents.is_empty() {
            contents.push('\n');
        }
        contents
    }

    /// Write everything recorded so far to `path`, replacing it.
    pub fn write_to(&self, path: &Path) -> io::Result<()> {
        fs::write(path, self.contents())
    }
}
