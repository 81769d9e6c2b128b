// src/config.rs

//! Forge configuration
//!
//! All persistent state lives under a single workspace root:
//!
//! ```text
//! <root>/
//!   recipes/<name>/meta.yaml     recipe documents (default recipes dir)
//!   downloads/<file>             source archive cache, keyed by file name
//!   build/<abi>/<name>/<version>/<tag>/
//!   logs/<name>-<version>-...-<tag>.log
//!   errors/                      log of the most recent failed attempt
//!   dist/  deps/  published/     wheel output and find-links directories
//! ```
//!
//! Values come from the defaults, then an optional `forge.toml` in the root,
//! then environment variables.

use crate::error::{Error, Result};
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Name of the optional configuration file in the workspace root
pub const CONFIG_FILE: &str = "forge.toml";

/// Environment variable pointing at the prebuilt Python support tree
pub const SUPPORT_PATH_ENV: &str = "FORGE_SUPPORT_PATH";

/// Environment variable pointing at the Android NDK
pub const ANDROID_NDK_ENV: &str = "ANDROID_NDK_HOME";

/// Configuration for a forge workspace
#[derive(Debug, Clone)]
pub struct ForgeConfig {
    /// Workspace root; every other directory hangs off this
    pub root: PathBuf,
    /// Directory searched for recipes given by name
    pub recipes_dir: PathBuf,
    /// Root of the prebuilt per-platform Python support tree
    pub support_path: Option<PathBuf>,
    /// Android NDK root (Android targets only)
    pub android_ndk_home: Option<PathBuf>,
    /// The controlling Python interpreter
    pub python: String,
    /// Parallelism hint exported to build scripts
    pub jobs: usize,
    /// Packages whose wheels are internal tooling and go to `deps/`
    pub internal_packages: BTreeSet<String>,
}

/// On-disk shape of `forge.toml`
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    recipes_dir: Option<PathBuf>,
    support_path: Option<PathBuf>,
    android_ndk_home: Option<PathBuf>,
    python: Option<String>,
    jobs: Option<usize>,
    internal_packages: Option<Vec<String>>,
}

impl ForgeConfig {
    /// Create a configuration with defaults for the given workspace root
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let jobs = std::thread::available_parallelism()
            .map(|p| p.get())
            .unwrap_or(4);

        Self {
            recipes_dir: root.join("recipes"),
            root,
            support_path: None,
            android_ndk_home: None,
            python: "python3".to_string(),
            jobs,
            internal_packages: ["oldest-supported-numpy".to_string()].into_iter().collect(),
        }
    }

    /// Load configuration for a workspace root
    ///
    /// Reads `forge.toml` if present, then applies `FORGE_SUPPORT_PATH` and
    /// `ANDROID_NDK_HOME` from the process environment.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self> {
        let mut config = Self::new(root);

        let config_path = config.root.join(CONFIG_FILE);
        if config_path.is_file() {
            debug!("Loading configuration from {}", config_path.display());
            let content = std::fs::read_to_string(&config_path)?;
            let file: ConfigFile = toml::from_str(&content).map_err(|e| {
                Error::Config(format!("invalid {}: {}", config_path.display(), e))
            })?;
            config.apply_file(file);
        }

        if let Some(path) = std::env::var_os(SUPPORT_PATH_ENV) {
            config.support_path = Some(PathBuf::from(path));
        }
        if let Some(path) = std::env::var_os(ANDROID_NDK_ENV) {
            config.android_ndk_home = Some(PathBuf::from(path));
        }

        Ok(config)
    }

    fn apply_file(&mut self, file: ConfigFile) {
        if let Some(dir) = file.recipes_dir {
            self.recipes_dir = self.root.join(dir);
        }
        if let Some(path) = file.support_path {
            self.support_path = Some(self.root.join(path));
        }
        if let Some(path) = file.android_ndk_home {
            self.android_ndk_home = Some(path);
        }
        if let Some(python) = file.python {
            self.python = python;
        }
        if let Some(jobs) = file.jobs {
            self.jobs = jobs.max(1);
        }
        if let Some(packages) = file.internal_packages {
            self.internal_packages = packages.into_iter().collect();
        }
    }

    /// Set the support tree path
    pub fn with_support_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.support_path = Some(path.into());
        self
    }

    /// Set the recipes directory
    pub fn with_recipes_dir(mut self, path: impl Into<PathBuf>) -> Self {
        self.recipes_dir = path.into();
        self
    }

    /// Support tree path, or an error naming the variable to set
    pub fn require_support_path(&self) -> Result<&Path> {
        self.support_path.as_deref().ok_or_else(|| {
            Error::Environment(format!(
                "{SUPPORT_PATH_ENV} is not set; point it at the Python support tree"
            ))
        })
    }

    pub fn downloads_dir(&self) -> PathBuf {
        self.root.join("downloads")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.root.join("build")
    }

    pub fn logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn errors_dir(&self) -> PathBuf {
        self.root.join("errors")
    }

    /// Public wheel output
    pub fn dist_dir(&self) -> PathBuf {
        self.root.join("dist")
    }

    /// Internal wheel output (native libraries, build tooling)
    pub fn deps_dir(&self) -> PathBuf {
        self.root.join("deps")
    }

    /// Previously published wheels
    pub fn published_dir(&self) -> PathBuf {
        self.root.join("published")
    }

    /// Local wheel directories passed as `--find-links` to every install
    pub fn find_links(&self) -> Vec<PathBuf> {
        vec![self.dist_dir(), self.deps_dir(), self.published_dir()]
    }

    /// Whether a package's wheels are internal tooling rather than public output
    pub fn is_internal(&self, name: &str) -> bool {
        self.internal_packages.contains(name)
    }
}
