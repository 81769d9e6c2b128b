// tests/common/mod.rs

//! Shared test utilities for integration tests.
//!
//! Builds run against a scripted process runner, a fetcher that copies local
//! fixture archives and a fixed package index, inside a temporary workspace
//! with a fake Python support tree.

#![allow(dead_code)]

use forge::builder::{Forge, SourceFetcher};
use forge::config::ForgeConfig;
use forge::cross::{CrossEnvironment, Interpreter, Sdk, Target};
use forge::index::{IndexProvider, ReleaseFile, Releases};
use forge::logger::BuildLog;
use forge::process::{CommandSpec, ProcessRunner};
use forge::{Error, Result};
use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;

pub const PYTHON_VERSION: &str = "3.11.4";
pub const BUILD_PLATFORM: &str = "macosx-14.0-arm64";

/// The controlling interpreter every test forge uses
pub fn interpreter() -> Interpreter {
    Interpreter {
        executable: PathBuf::from("/usr/bin/python3"),
        version: PYTHON_VERSION.to_string(),
        platform: BUILD_PLATFORM.to_string(),
    }
}

pub fn iphoneos() -> Target {
    Target::new(Sdk::IPhoneOs, "13.0", "arm64")
}

pub fn iphonesimulator() -> Target {
    Target::new(Sdk::IPhoneSimulator, "13.0", "x86_64")
}

/// Process runner that records commands and answers interpreter identity queries
///
/// `python` and `cross-python` report the platform of whichever target the
/// environment was created for, unless `misreport_target` is set.
#[derive(Default)]
pub struct FakeRunner {
    pub commands: Mutex<Vec<CommandSpec>>,
    platforms: HashMap<String, String>,
    fail_suffix: Mutex<Option<String>>,
    misreport_target: Mutex<bool>,
    /// Files staged for each `wheel pack`, relative path to contents
    pub packed: Mutex<Vec<BTreeMap<String, String>>>,
}

impl FakeRunner {
    pub fn new(targets: &[Target]) -> Self {
        Self {
            platforms: targets
                .iter()
                .map(|t| (t.tag(), t.platform_identifier()))
                .collect(),
            ..Default::default()
        }
    }

    /// Make every command whose program ends with `suffix` exit with code 2
    pub fn fail_program(&self, suffix: &str) {
        *self.fail_suffix.lock().unwrap() = Some(suffix.to_string());
    }

    /// Make the target-side interpreters report the build machine's platform
    pub fn misreport_target(&self) {
        *self.misreport_target.lock().unwrap() = true;
    }

    pub fn commands(&self) -> Vec<CommandSpec> {
        self.commands.lock().unwrap().clone()
    }

    /// Recorded commands whose argv contains `word`
    pub fn commands_with(&self, word: &str) -> Vec<CommandSpec> {
        self.commands()
            .into_iter()
            .filter(|c| c.program == word || c.args.iter().any(|a| a == word))
            .collect()
    }

    pub fn clear(&self) {
        self.commands.lock().unwrap().clear();
    }

    /// Record the staged tree and drop an empty wheel named the way `wheel pack` would
    fn pack_wheel(&self, command: &CommandSpec) -> Result<()> {
        let dest = command.args.iter().position(|a| a == "--dest-dir").map(|i| &command.args[i + 1]);
        let (Some(dest), Some(staging)) = (dest, command.args.last()) else {
            return Ok(());
        };
        let staging = Path::new(staging);

        let mut files = BTreeMap::new();
        let mut wheel_name = None;
        for entry in walkdir::WalkDir::new(staging) {
            let entry = entry.map_err(std::io::Error::from)?;
            if !entry.file_type().is_file() {
                continue;
            }
            let relative = entry.path().strip_prefix(staging).unwrap().display().to_string();
            let contents = fs::read_to_string(entry.path()).unwrap_or_default();
            if let Some(stem) = relative.strip_suffix(".dist-info/WHEEL") {
                let header = |key: &str| {
                    contents
                        .lines()
                        .find_map(|l| l.strip_prefix(key))
                        .map(|v| v.trim().to_string())
                        .unwrap_or_default()
                };
                wheel_name = Some(format!("{stem}-{}-{}.whl", header("Build:"), header("Tag:")));
            }
            files.insert(relative, contents);
        }
        if let Some(name) = wheel_name {
            fs::write(Path::new(dest).join(name), "")?;
        }
        self.packed.lock().unwrap().push(files);
        Ok(())
    }

    fn target_platform(&self, command: &CommandSpec) -> String {
        if *self.misreport_target.lock().unwrap() {
            return BUILD_PLATFORM.to_string();
        }
        let venv_name = command
            .env
            .get("VIRTUAL_ENV")
            .and_then(|v| Path::new(v).parent())
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tag = venv_name.split_once('-').map(|(_, tag)| tag).unwrap_or_default();
        self.platforms.get(tag).cloned().unwrap_or_default()
    }
}

impl ProcessRunner for FakeRunner {
    fn run(&self, log: &mut BuildLog, command: &CommandSpec) -> Result<()> {
        self.commands.lock().unwrap().push(command.clone());
        log.line(format!("$ {}", command.display()));

        if let Some(suffix) = self.fail_suffix.lock().unwrap().as_deref()
            && command.program.ends_with(suffix)
        {
            log.line("error: something went wrong");
            return Err(Error::CommandFailed {
                command: command.display(),
                code: Some(2),
                tail: vec!["error: something went wrong".to_string()],
            });
        }

        if command.args.iter().any(|a| a == "crossenv")
            && let Some(venv) = command.args.last()
        {
            fs::create_dir_all(venv)?;
        }

        if command.args.windows(3).any(|w| w == ["-m", "wheel", "pack"]) {
            self.pack_wheel(command)?;
        }

        // Host-side installs unpack native dependencies under the install root
        if command.program == "python"
            && command.args.iter().any(|a| a == "--only-binary")
            && let Some(venv) = command.env.get("VIRTUAL_ENV")
        {
            let install_root = Path::new(venv).join("lib/python3.11/site-packages/opt");
            fs::create_dir_all(install_root.join("include"))?;
            fs::create_dir_all(install_root.join("lib"))?;
        }
        Ok(())
    }

    fn output(&self, command: &CommandSpec) -> Result<String> {
        self.commands.lock().unwrap().push(command.clone());
        let script = command.args.join(" ");

        if script.contains("sys.path") {
            let venv = command.env.get("VIRTUAL_ENV").cloned().unwrap_or_default();
            return Ok(format!("{venv}/lib/python3.11/site-packages\n"));
        }
        if script.contains("json") {
            return Ok(r#"{"AR": "ar", "CC": "clang", "CXX": "clang++", "CFLAGS": "-O2", "LDFLAGS": ""}"#.to_string());
        }
        if command.program == "xcrun" {
            return Ok("/Applications/Xcode.app/SDKs/iPhoneOS.sdk\n".to_string());
        }

        let platform = if command.program == "build-python" {
            BUILD_PLATFORM.to_string()
        } else {
            self.target_platform(command)
        };
        Ok(format!("{PYTHON_VERSION}\n{platform}\n"))
    }
}

/// Fetcher that copies fixture archives, counting every fetch
pub struct LocalFetcher {
    fixture: PathBuf,
    fetches: AtomicUsize,
    pub urls: Mutex<Vec<String>>,
}

impl LocalFetcher {
    pub fn new(fixture: impl Into<PathBuf>) -> Self {
        Self {
            fixture: fixture.into(),
            fetches: AtomicUsize::new(0),
            urls: Mutex::new(Vec::new()),
        }
    }

    pub fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

impl SourceFetcher for LocalFetcher {
    fn fetch(&self, _log: &mut BuildLog, url: &str, dest: &Path) -> Result<()> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        self.urls.lock().unwrap().push(url.to_string());
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&self.fixture, dest)?;
        Ok(())
    }
}

/// Index with fixed release data
#[derive(Default)]
pub struct StaticIndex {
    projects: BTreeMap<String, Releases>,
}

impl StaticIndex {
    /// Add an sdist release for `name`
    pub fn with_sdist(mut self, name: &str, version: &str) -> Self {
        let filename = format!("{name}-{version}.tar.gz");
        self.projects.entry(name.to_string()).or_default().insert(
            version.to_string(),
            vec![ReleaseFile {
                packagetype: "sdist".to_string(),
                url: format!("https://files.example.com/{filename}"),
                filename,
                upload_time: "2024-01-01T00:00:00".to_string(),
                python_version: "source".to_string(),
                yanked: false,
            }],
        );
        self
    }
}

impl IndexProvider for StaticIndex {
    fn list_releases(&self, name: &str) -> Result<Releases> {
        self.projects
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Index(format!("{name} is not on the index")))
    }
}

/// Write a gzipped tarball containing `files`
pub fn write_tar_gz(path: &Path, files: &[(&str, &str)]) {
    let file = File::create(path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, content.as_bytes()).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap().flush().unwrap();
}

/// A temporary forge workspace with a fake support tree
pub struct Workspace {
    pub dir: TempDir,
}

impl Workspace {
    /// Create a workspace whose support tree covers `targets`
    pub fn new(targets: &[Target]) -> Self {
        let workspace = Self {
            dir: tempfile::tempdir().unwrap(),
        };
        for target in targets {
            let env = CrossEnvironment::new(
                target.clone(),
                workspace.root(),
                interpreter(),
                &workspace.config(),
                Arc::new(FakeRunner::default()),
            )
            .unwrap();
            for file in [env.host_python().unwrap(), env.host_sysconfig().unwrap()] {
                fs::create_dir_all(file.parent().unwrap()).unwrap();
                fs::write(file, "").unwrap();
            }
        }
        workspace
    }

    pub fn root(&self) -> &Path {
        self.dir.path()
    }

    pub fn config(&self) -> ForgeConfig {
        ForgeConfig::new(self.root()).with_support_path(self.root().join("support"))
    }

    /// Write `recipes/<name>/meta.yaml` and an empty `build.sh`
    pub fn add_recipe(&self, name: &str, meta: &str) -> PathBuf {
        let dir = self.root().join("recipes").join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("meta.yaml"), meta).unwrap();
        fs::write(dir.join("build.sh"), "#!/bin/sh\nmake install\n").unwrap();
        dir
    }

    /// Write a source fixture archive under `fixtures/`
    pub fn fixture(&self, name: &str, files: &[(&str, &str)]) -> PathBuf {
        let dir = self.root().join("fixtures");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        write_tar_gz(&path, files);
        path
    }

    pub fn forge(
        &self,
        runner: Arc<FakeRunner>,
        fetcher: Arc<LocalFetcher>,
        index: Arc<StaticIndex>,
    ) -> Forge {
        Forge::new(self.config(), interpreter(), runner, fetcher, index)
    }

    pub fn read(&self, relative: &str) -> String {
        fs::read_to_string(self.root().join(relative)).unwrap()
    }
}

/// A script-built native library recipe
pub fn widget_recipe() -> &'static str {
    r#"{% set version = "1.2.0" %}
package:
  name: widget
  version: {{ version }}
source:
  url: https://example.com/widget-{version}.tar.gz
build:
  number: 1
  script_env:
    - WIDGET_PREFIX={prefix}
requirements:
  host:
    - zlib 1.2.13
about:
  summary: A widget library
  home: https://example.com/widget
"#
}

/// A second, independent script-built recipe
pub fn gadget_recipe() -> &'static str {
    r#"package:
  name: gadget
  version: 0.4.0
source:
  url: https://example.com/gadget-{version}.tar.gz
"#
}
