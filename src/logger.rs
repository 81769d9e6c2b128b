// src/logger.rs

//! Per-attempt build log
//!
//! Every build attempt gets its own log file. Lines logged through a
//! [`BuildLog`] are echoed to the console via `tracing` and appended to the
//! file; debug lines (exact command lines, environment values) only reach
//! the console when the subscriber is at debug level, but always land in the
//! file.

use crate::error::Result;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Log sink threaded through every step of a build
#[derive(Debug, Default)]
pub struct BuildLog {
    file: Option<File>,
    path: Option<PathBuf>,
}

impl BuildLog {
    /// A log that only echoes to the console
    pub fn console() -> Self {
        Self::default()
    }

    /// Create (or truncate) a log file at `path`
    pub fn create(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(Self {
            file: Some(file),
            path: Some(path.to_path_buf()),
        })
    }

    /// Path of the backing log file, if any
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Log a line to the console and the file
    pub fn line(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        info!("{}", message);
        self.write_file(message, true);
    }

    /// Log a line to the file; the console only sees it at debug level
    pub fn debug(&mut self, message: impl AsRef<str>) {
        let message = message.as_ref();
        debug!("{}", message);
        self.write_file(message, true);
    }

    /// Append raw text to the file without a newline
    ///
    /// Used for progress markers that would be noise on the console.
    pub fn progress(&mut self, text: &str) {
        self.write_file(text, false);
    }

    /// Log a section heading, preceded by a blank line
    pub fn section(&mut self, context: impl std::fmt::Display, title: &str) {
        self.line("");
        self.line(format!("[{context}] {title}"));
    }

    /// Log an error and every error in its source chain
    pub fn error_chain(&mut self, err: &(dyn std::error::Error + 'static)) {
        self.line(format!("Error: {err}"));
        let mut source = err.source();
        while let Some(cause) = source {
            self.line(format!("Caused by: {cause}"));
            source = cause.source();
        }
    }

    /// Flush and release the file, returning its path
    pub fn close(mut self) -> Option<PathBuf> {
        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush()
        {
            warn!("Failed to flush build log: {}", e);
        }
        self.path.take()
    }

    fn write_file(&mut self, text: &str, newline: bool) {
        let Some(file) = self.file.as_mut() else {
            return;
        };
        let result = if newline {
            writeln!(file, "{text}")
        } else {
            write!(file, "{text}").and_then(|()| file.flush())
        };
        if let Err(e) = result {
            warn!("Failed to write build log, disabling file output: {}", e);
            self.file = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_debug_lines_reach_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/widget.log");

        let mut log = BuildLog::create(&path).unwrap();
        log.line("visible");
        log.debug(">>> make");
        log.progress("...");
        log.line(" done.");
        assert_eq!(log.close(), Some(path.clone()));

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "visible\n>>> make\n... done.\n");
    }

    #[test]
    fn test_section_heading() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");

        let mut log = BuildLog::create(&path).unwrap();
        log.section("venv3.11-ios_13_0_arm64_iphoneos", "Apply patches");
        log.close();

        let content = fs::read_to_string(&path).unwrap();
        assert_eq!(content, "\n[venv3.11-ios_13_0_arm64_iphoneos] Apply patches\n");
    }

    #[test]
    fn test_error_chain() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("build.log");

        let inner = crate::Error::CommandFailed {
            command: "pip install".to_string(),
            code: Some(1),
            tail: Vec::new(),
        };
        let err = crate::Error::DependencyInstall {
            packages: "zlib".to_string(),
            source: Box::new(inner),
        };

        let mut log = BuildLog::create(&path).unwrap();
        log.error_chain(&err);
        log.close();

        let content = fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("Error: failed to install zlib"));
        assert!(content.contains("Caused by: command `pip install` failed with exit code 1"));
    }

    #[test]
    fn test_console_log_has_no_path() {
        let mut log = BuildLog::console();
        log.line("only on the console");
        assert!(log.path().is_none());
        assert!(log.close().is_none());
    }
}
