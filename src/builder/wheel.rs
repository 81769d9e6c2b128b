// src/builder/wheel.rs

//! Wheel packaging metadata
//!
//! Script builds stage their output under `<build>/wheel/` and describe it
//! with a `.dist-info` directory holding `WHEEL` and `METADATA`. Both files
//! are RFC 822 style header blocks. Everything written here is derived from
//! the resolved package and the target tag alone.

use crate::error::{Error, Result};
use crate::recipe::{ResolvedPackage, canonicalize_version, escape_name};
use std::fs;
use std::path::{Path, PathBuf};

pub const WHEEL_VERSION: &str = "1.0";
pub const METADATA_VERSION: &str = "1.2";

/// Python/ABI prefix of every tag this packager writes
const TAG_PREFIX: &str = "py3-none-";

/// `Generator` value recorded in `WHEEL`
pub fn generator() -> String {
    format!("forge {}", env!("CARGO_PKG_VERSION"))
}

/// Metadata describing one wheel
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WheelMetadata {
    pub name: String,
    pub version: String,
    pub build_number: Option<u32>,
    /// Platform tag, e.g. `ios_13_0_arm64_iphoneos`
    pub platform_tag: String,
    pub summary: String,
    pub download_url: String,
}

impl WheelMetadata {
    pub fn new(package: &ResolvedPackage, platform_tag: &str) -> Self {
        Self {
            name: package.name.clone(),
            version: package.version.clone(),
            build_number: package.build_number,
            platform_tag: platform_tag.to_string(),
            summary: package.summary.clone().unwrap_or_default(),
            download_url: package.home.clone().unwrap_or_default(),
        }
    }

    /// `py3-none-<platform tag>`
    pub fn tag(&self) -> String {
        format!("{TAG_PREFIX}{}", self.platform_tag)
    }

    pub fn dist_info_name(&self) -> String {
        format!(
            "{}-{}.dist-info",
            escape_name(&self.name),
            canonicalize_version(&self.version)
        )
    }

    /// `<name>-<version>[-<build>]-py3-none-<platform tag>.whl`
    pub fn wheel_filename(&self) -> String {
        let build = self
            .build_number
            .map(|n| format!("-{n}"))
            .unwrap_or_default();
        format!(
            "{}-{}{}-{}.whl",
            escape_name(&self.name),
            canonicalize_version(&self.version),
            build,
            self.tag()
        )
    }

    fn wheel_headers(&self) -> Vec<(&'static str, String)> {
        let mut headers = vec![
            ("Wheel-Version", WHEEL_VERSION.to_string()),
            ("Root-Is-Purelib", "false".to_string()),
            ("Generator", generator()),
        ];
        if let Some(build) = self.build_number {
            headers.push(("Build", build.to_string()));
        }
        headers.push(("Tag", self.tag()));
        headers
    }

    fn metadata_headers(&self) -> Vec<(&'static str, String)> {
        vec![
            ("Metadata-Version", METADATA_VERSION.to_string()),
            ("Name", self.name.clone()),
            ("Version", self.version.clone()),
            ("Summary", self.summary.clone()),
            ("Download-URL", self.download_url.clone()),
        ]
    }

    /// Write `WHEEL` and `METADATA` into `<wheel_root>/<name>-<version>.dist-info/`
    pub fn write(&self, wheel_root: &Path) -> Result<PathBuf> {
        let dist_info = wheel_root.join(self.dist_info_name());
        fs::create_dir_all(&dist_info)?;
        fs::write(dist_info.join("WHEEL"), format_headers(&self.wheel_headers()))?;
        fs::write(dist_info.join("METADATA"), format_headers(&self.metadata_headers()))?;
        Ok(dist_info)
    }

    /// Read metadata back from a `.dist-info` directory
    pub fn read(dist_info: &Path) -> Result<Self> {
        let wheel = parse_headers(&fs::read_to_string(dist_info.join("WHEEL"))?);
        let metadata = parse_headers(&fs::read_to_string(dist_info.join("METADATA"))?);

        let malformed = |what: &str| {
            Error::ArchiveFormat(format!("{}: {}", dist_info.display(), what))
        };
        let header = |headers: &[(String, String)], key: &str| {
            headers
                .iter()
                .find(|(k, _)| k.eq_ignore_ascii_case(key))
                .map(|(_, v)| v.clone())
        };

        let tag = header(&wheel, "Tag").ok_or_else(|| malformed("WHEEL has no Tag"))?;
        let platform_tag = tag
            .strip_prefix(TAG_PREFIX)
            .ok_or_else(|| malformed("unexpected wheel tag"))?
            .to_string();
        let build_number = header(&wheel, "Build")
            .map(|b| b.parse::<u32>().map_err(|_| malformed("non-numeric Build")))
            .transpose()?;

        Ok(Self {
            name: header(&metadata, "Name").ok_or_else(|| malformed("METADATA has no Name"))?,
            version: header(&metadata, "Version")
                .ok_or_else(|| malformed("METADATA has no Version"))?,
            build_number,
            platform_tag,
            summary: header(&metadata, "Summary").unwrap_or_default(),
            download_url: header(&metadata, "Download-URL").unwrap_or_default(),
        })
    }
}

/// Render an RFC 822 style header block
///
/// Embedded newlines are folded into single spaces.
pub fn format_headers(headers: &[(&str, String)]) -> String {
    let mut out = String::new();
    for (key, value) in headers {
        let value = value.split_whitespace().collect::<Vec<_>>().join(" ");
        if value.is_empty() {
            out.push_str(&format!("{key}: \n"));
        } else {
            out.push_str(&format!("{key}: {value}\n"));
        }
    }
    out.push('\n');
    out
}

/// Parse an RFC 822 style header block, stopping at the first blank line
pub fn parse_headers(text: &str) -> Vec<(String, String)> {
    let mut headers: Vec<(String, String)> = Vec::new();
    for line in text.lines() {
        if line.trim().is_empty() {
            break;
        }
        if line.starts_with([' ', '\t']) {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(':') {
            headers.push((key.trim().to_string(), value.trim().to_string()));
        }
    }
    headers
}
