// src/builder/dep_wheels.rs

//! Wheels for the support tree's own native dependencies
//!
//! The Apple support tree ships prebuilt static libraries (BZip2, XZ,
//! libFFI, OpenSSL) under `install/<os>/<sdk>.<arch>/<name>-<version>-<build>`.
//! Recipes depend on them like any other host requirement, so each one is
//! repackaged as a `py3-none-<tag>` wheel with the install tree under `opt/`.
//! Versions come from the `VERSIONS` file next to the target interpreter.

use super::WheelMetadata;
use crate::config::ForgeConfig;
use crate::cross::{Interpreter, OperatingSystem, Target};
use crate::error::{Error, Result};
use crate::logger::BuildLog;
use crate::process::{CommandSpec, ProcessRunner, path_arg, system_env};
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// Libraries bundled with every Apple support tree
pub const SUPPORT_DEPENDENCIES: [&str; 4] = ["BZip2", "XZ", "libFFI", "OpenSSL"];

/// Parsed `VERSIONS` file: `Key: value` lines
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SupportVersions {
    entries: BTreeMap<String, String>,
}

impl SupportVersions {
    pub fn parse(text: &str) -> Self {
        let entries = text
            .lines()
            .filter_map(|line| line.split_once(':'))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .filter(|(key, value)| !key.is_empty() && !value.is_empty())
            .collect();
        Self { entries }
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = fs::read_to_string(path).map_err(|e| {
            Error::Environment(format!("can't read {}: {}", path.display(), e))
        })?;
        Ok(Self::parse(&text))
    }

    /// Version and build number of a bundled library, from `1.0.8-1`
    pub fn dependency(&self, name: &str) -> Result<(String, u32)> {
        let value = self
            .entries
            .get(name)
            .ok_or_else(|| Error::Environment(format!("VERSIONS has no entry for {name}")))?;
        let malformed =
            || Error::Environment(format!("{name}: expected version-build, got {value:?}"));

        let (version, build) = value.rsplit_once('-').ok_or_else(malformed)?;
        let build = build.parse::<u32>().map_err(|_| malformed())?;
        if version.is_empty() {
            return Err(malformed());
        }
        Ok((version.to_string(), build))
    }

    /// Minimum deployment version the support tree was built for
    pub fn min_version(&self, os: OperatingSystem) -> Result<&str> {
        let key = format!("Min {} version", os.name());
        self.entries
            .get(&key)
            .map(String::as_str)
            .ok_or_else(|| Error::Environment(format!("VERSIONS has no {key:?} entry")))
    }
}

/// Result of packaging one library for one target
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DepWheel {
    Built(PathBuf),
    /// The wheel was already in `dist/`
    Existing(PathBuf),
}

impl DepWheel {
    pub fn path(&self) -> &Path {
        match self {
            Self::Built(path) | Self::Existing(path) => path,
        }
    }
}

/// Packages support-tree libraries as wheels in `dist/`
pub struct DepWheelBuilder<'a> {
    config: &'a ForgeConfig,
    interpreter: &'a Interpreter,
    runner: &'a dyn ProcessRunner,
}

impl<'a> DepWheelBuilder<'a> {
    pub fn new(
        config: &'a ForgeConfig,
        interpreter: &'a Interpreter,
        runner: &'a dyn ProcessRunner,
    ) -> Self {
        Self {
            config,
            interpreter,
            runner,
        }
    }

    pub fn versions_path(&self, os: OperatingSystem) -> Result<PathBuf> {
        Ok(self
            .config
            .require_support_path()?
            .join(self.interpreter.short_version())
            .join(os.name())
            .join("VERSIONS"))
    }

    /// `install/<os>/<sdk>.<arch>/<name>-<version>-<build>`, beside the support tree
    pub fn install_path(&self, target: &Target, name: &str, version: &str, build: u32) -> Result<PathBuf> {
        let support = self.config.require_support_path()?;
        let base = support.parent().ok_or_else(|| {
            Error::Environment(format!("{} has no parent directory", support.display()))
        })?;
        Ok(base
            .join("install")
            .join(target.os().name())
            .join(format!("{}.{}", target.sdk.as_str(), target.arch))
            .join(format!("{}-{}-{}", name.to_lowercase(), version, build)))
    }

    /// Package every bundled library for every default target of `os`
    pub fn build_all(&self, log: &mut BuildLog, os: OperatingSystem) -> Result<Vec<DepWheel>> {
        if !os.is_apple() {
            return Err(Error::InvalidTarget(format!(
                "{os} has no bundled support libraries"
            )));
        }

        let versions = SupportVersions::load(&self.versions_path(os)?)?;
        let min_version = versions.min_version(os)?;

        let mut wheels = Vec::new();
        for (sdk, arch) in os.default_sdks() {
            let target = Target::new(*sdk, min_version, *arch);
            log.section(&target, "Packaging support libraries");
            for name in SUPPORT_DEPENDENCIES {
                wheels.push(self.build(log, name, &versions, &target)?);
            }
        }
        Ok(wheels)
    }

    /// Package one library for one target, unless its wheel already exists
    pub fn build(
        &self,
        log: &mut BuildLog,
        name: &str,
        versions: &SupportVersions,
        target: &Target,
    ) -> Result<DepWheel> {
        let (version, build) = versions.dependency(name)?;
        let metadata = WheelMetadata {
            name: name.to_lowercase(),
            version: version.clone(),
            build_number: Some(build),
            platform_tag: target.tag(),
            summary: String::new(),
            download_url: String::new(),
        };

        let dist = self.config.dist_dir();
        let wheel = dist.join(metadata.wheel_filename());
        if wheel.is_file() {
            log.line(format!("{} exists; skipping", wheel.display()));
            return Ok(DepWheel::Existing(wheel));
        }

        let install = self.install_path(target, name, &version, build)?;
        if !install.is_dir() {
            return Err(Error::Environment(format!(
                "no {name} install at {}",
                install.display()
            )));
        }

        fs::create_dir_all(&dist)?;
        fs::create_dir_all(self.config.build_dir())?;
        let staging = tempfile::Builder::new()
            .prefix("dep-wheel-")
            .tempdir_in(self.config.build_dir())?;

        copy_tree(&install, &staging.path().join("opt"))?;
        metadata.write(staging.path())?;

        let pack = CommandSpec::new(path_arg(&self.interpreter.executable))
            .args(["-m", "wheel", "pack", "--dest-dir"])
            .arg(path_arg(&dist))
            .arg(path_arg(staging.path()))
            .envs(&system_env());
        self.runner.run(log, &pack)?;

        log.line(format!("Packaged {}", wheel.display()));
        Ok(DepWheel::Built(wheel))
    }
}

/// Recursively copy `from` to `to`, keeping symlinks as links
fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in WalkDir::new(from) {
        let entry = entry.map_err(io::Error::from)?;
        let relative = entry
            .path()
            .strip_prefix(from)
            .map_err(|e| Error::Io(io::Error::other(e)))?;
        let dest = to.join(relative);

        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&dest)?;
        } else if file_type.is_symlink() {
            copy_link(entry.path(), &dest)?;
        } else {
            fs::copy(entry.path(), &dest)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_link(link: &Path, dest: &Path) -> Result<()> {
    std::os::unix::fs::symlink(fs::read_link(link)?, dest)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_link(link: &Path, dest: &Path) -> Result<()> {
    fs::copy(link, dest)?;
    Ok(())
}
