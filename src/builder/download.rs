// src/builder/download.rs

//! Source downloads
//!
//! Downloads stream to `<dest>.part` and are renamed into place only once
//! complete, so an interrupted download never looks like a cached archive.

use crate::error::{Error, Result};
use crate::logger::BuildLog;
use indicatif::{ProgressBar, ProgressStyle};
use reqwest::blocking::Client;
use sha2::{Digest, Sha256};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Connection timeout for source downloads
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Overall timeout for a single source download
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Buffer size for streaming downloads (8 KB)
const STREAM_BUFFER_SIZE: usize = 8192;

/// Emit a progress marker to the log every this many chunks
const PROGRESS_EVERY: usize = 100;

/// Fetches source archives
pub trait SourceFetcher: Send + Sync {
    /// Download `url` to `dest`
    ///
    /// `dest` must only appear once the download has completed.
    fn fetch(&self, log: &mut BuildLog, url: &str, dest: &Path) -> Result<()>;
}

/// [`SourceFetcher`] over HTTP(S)
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(DOWNLOAD_TIMEOUT)
            .user_agent(concat!("forge/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| Error::Download(format!("failed to create HTTP client: {e}")))?;
        Ok(Self { client })
    }
}

/// `<dest>.part`
pub fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}

impl SourceFetcher for HttpFetcher {
    fn fetch(&self, log: &mut BuildLog, url: &str, dest: &Path) -> Result<()> {
        debug!("GET {}", url);
        let mut response = self
            .client
            .get(url)
            .send()
            .map_err(|e| Error::Download(format!("failed to fetch {url}: {e}")))?;

        if !response.status().is_success() {
            return Err(Error::Download(format!("HTTP {} from {}", response.status(), url)));
        }

        let progress = match response.content_length() {
            Some(total) => {
                let bar = ProgressBar::new(total);
                if let Ok(style) = ProgressStyle::default_bar()
                    .template("{msg} [{bar:30}] {bytes}/{total_bytes} ({bytes_per_sec})")
                {
                    bar.set_style(style.progress_chars("=> "));
                }
                bar
            }
            None => ProgressBar::new_spinner(),
        };
        progress.set_message(archive_file_name(url).unwrap_or_else(|_| url.to_string()));

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let part = partial_path(dest);
        let mut file = File::create(&part)?;
        let mut buffer = [0u8; STREAM_BUFFER_SIZE];
        let mut chunks = 0usize;

        let result = loop {
            let read = match response.read(&mut buffer) {
                Ok(0) => break Ok(()),
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => break Err(Error::Download(format!("failed to read {url}: {e}"))),
            };
            if let Err(e) = file.write_all(&buffer[..read]) {
                break Err(e.into());
            }
            progress.inc(read as u64);
            if chunks % PROGRESS_EVERY == 0 {
                log.progress(".");
            }
            chunks += 1;
        };
        progress.finish_and_clear();

        if let Err(e) = result {
            let _ = fs::remove_file(&part);
            return Err(e);
        }
        file.flush()?;
        drop(file);
        fs::rename(&part, dest)?;
        Ok(())
    }
}

/// Last path segment of a URL, used as the cached archive name
pub fn archive_file_name(url: &str) -> Result<String> {
    let parsed = url::Url::parse(url).map_err(|e| Error::Download(format!("invalid url {url}: {e}")))?;
    parsed
        .path_segments()
        .and_then(|mut segments| segments.rfind(|s| !s.is_empty()))
        .map(str::to_string)
        .ok_or_else(|| Error::Download(format!("can't derive a file name from {url}")))
}

/// Check a file's SHA-256 against a hex digest
pub fn verify_sha256(path: &Path, expected: &str) -> Result<()> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher)?;
    let actual = hex::encode(hasher.finalize());

    if actual.eq_ignore_ascii_case(expected) {
        Ok(())
    } else {
        Err(Error::ChecksumMismatch {
            path: path.to_path_buf(),
            expected: expected.to_string(),
            actual,
        })
    }
}
