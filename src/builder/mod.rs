// src/builder/mod.rs

//! The build pipeline
//!
//! A [`Forge`] holds everything shared between builds: workspace
//! configuration, the controlling interpreter and the collaborators that
//! touch the outside world (process runner, source fetcher, index). Each
//! (package, target) pair gets a [`Builder`], which walks through:
//!
//! 1. **Fetch** - download the source archive unless it is cached
//! 2. **Unpack** - extract into the build directory unless it exists
//! 3. **Patch** - apply the recipe's patches in order
//! 4. **Environment** - create and verify a fresh cross environment
//! 5. **Dependencies** - install host then build requirements
//! 6. **Compile / Package** - strategy specific
//!
//! Steps 1-3 are skipped on re-entry when their output is already on disk,
//! so repeating a build without `clean` only redoes the environment and
//! compile work.
//!
//! # Example
//!
//! ```ignore
//! use forge::builder::Forge;
//!
//! let forge = Forge::new(config, interpreter, runner, fetcher, index);
//! let package = forge.resolver().resolve("widget", None, None)?;
//! let target = Target::expand("iphoneos:arm64")?.remove(0);
//! let succeeded = forge.builder(&package, target)?.build(false);
//! ```

pub mod archive;
pub mod batch;
pub mod dep_wheels;
pub mod download;
mod pypi;
mod script;
pub mod wheel;

pub use batch::{BatchReport, BuildBatch, BuildOutcome};
pub use dep_wheels::{DepWheel, DepWheelBuilder, SupportVersions};
pub use download::{HttpFetcher, SourceFetcher};
pub use wheel::WheelMetadata;

use crate::config::ForgeConfig;
use crate::cross::{CrossEnvironment, InstallSide, Interpreter, Target};
use crate::error::{Error, Result};
use crate::index::IndexProvider;
use crate::logger::BuildLog;
use crate::process::ProcessRunner;
use crate::recipe::{BuildKind, Phase, RecipeResolver, ResolvedPackage, SourceKind};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{error, warn};

/// ABI directory for builds that don't link against the interpreter
pub const ANY_ABI: &str = "any";

/// Shared context for every build in a run
pub struct Forge {
    config: ForgeConfig,
    interpreter: Interpreter,
    runner: Arc<dyn ProcessRunner>,
    fetcher: Arc<dyn SourceFetcher>,
    index: Arc<dyn IndexProvider>,
}

impl fmt::Debug for Forge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Forge")
            .field("config", &self.config)
            .field("interpreter", &self.interpreter)
            .finish_non_exhaustive()
    }
}

impl Forge {
    pub fn new(
        config: ForgeConfig,
        interpreter: Interpreter,
        runner: Arc<dyn ProcessRunner>,
        fetcher: Arc<dyn SourceFetcher>,
        index: Arc<dyn IndexProvider>,
    ) -> Self {
        Self {
            config,
            interpreter,
            runner,
            fetcher,
            index,
        }
    }

    pub fn config(&self) -> &ForgeConfig {
        &self.config
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    pub fn index(&self) -> &dyn IndexProvider {
        self.index.as_ref()
    }

    pub fn resolver(&self) -> RecipeResolver {
        RecipeResolver::new(&self.config.recipes_dir)
    }

    /// A builder for one package on one target
    pub fn builder<'a>(&'a self, package: &'a ResolvedPackage, target: Target) -> Result<Builder<'a>> {
        Builder::new(self, package, target)
    }
}

/// Where a build attempt is up to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildState {
    NotStarted,
    Preparing,
    Fetching,
    Unpacking,
    Patching,
    CreatingEnvironment,
    EnvironmentReady,
    InstallingDeps,
    Compiling,
    Packaging,
    Succeeded,
    Failed,
}

impl fmt::Display for BuildState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildState::NotStarted => "not started",
            BuildState::Preparing => "preparing",
            BuildState::Fetching => "fetching source",
            BuildState::Unpacking => "unpacking source",
            BuildState::Patching => "patching source",
            BuildState::CreatingEnvironment => "creating cross environment",
            BuildState::EnvironmentReady => "environment ready",
            BuildState::InstallingDeps => "installing dependencies",
            BuildState::Compiling => "compiling",
            BuildState::Packaging => "packaging",
            BuildState::Succeeded => "succeeded",
            BuildState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// How a package is compiled and packaged
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildStrategy {
    /// Run `build.sh`, then pack the staged tree into a wheel
    Script,
    /// Prepare like a script build; nothing is compiled or packaged
    CMake,
    /// Build the sdist with the standard build frontend
    PyPI,
}

impl From<BuildKind> for BuildStrategy {
    fn from(kind: BuildKind) -> Self {
        match kind {
            BuildKind::Script => BuildStrategy::Script,
            BuildKind::CMake => BuildStrategy::CMake,
            BuildKind::PyPI => BuildStrategy::PyPI,
        }
    }
}

fn abi(forge: &Forge, strategy: BuildStrategy) -> String {
    match strategy {
        BuildStrategy::PyPI => forge.interpreter.abi_tag(),
        BuildStrategy::Script | BuildStrategy::CMake => ANY_ABI.to_string(),
    }
}

fn build_path(forge: &Forge, strategy: BuildStrategy, package: &ResolvedPackage, target: &Target) -> PathBuf {
    forge
        .config
        .build_dir()
        .join(abi(forge, strategy))
        .join(&package.name)
        .join(&package.version)
        .join(target.tag())
}

/// Drives one build attempt of a package for a target
pub struct Builder<'a> {
    forge: &'a Forge,
    package: &'a ResolvedPackage,
    env: CrossEnvironment,
    strategy: BuildStrategy,
    state: BuildState,
    failed_in: Option<BuildState>,
    failure: Option<String>,
    artifact: Option<PathBuf>,
}

impl<'a> Builder<'a> {
    fn new(forge: &'a Forge, package: &'a ResolvedPackage, target: Target) -> Result<Self> {
        let strategy = BuildStrategy::from(package.build_kind);
        let build_path = build_path(forge, strategy, package, &target);
        let env = CrossEnvironment::new(
            target,
            build_path,
            forge.interpreter.clone(),
            &forge.config,
            forge.runner.clone(),
        )?;

        Ok(Self {
            forge,
            package,
            env,
            strategy,
            state: BuildState::NotStarted,
            failed_in: None,
            failure: None,
            artifact: None,
        })
    }

    pub fn package(&self) -> &ResolvedPackage {
        self.package
    }

    pub fn target(&self) -> &Target {
        self.env.target()
    }

    pub fn environment(&self) -> &CrossEnvironment {
        &self.env
    }

    pub fn strategy(&self) -> BuildStrategy {
        self.strategy
    }

    pub fn state(&self) -> BuildState {
        self.state
    }

    /// State the attempt was in when it failed
    pub fn failed_in(&self) -> Option<BuildState> {
        self.failed_in
    }

    /// Diagnostic of the last failure
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// Expected path of the produced wheel, once known
    pub fn artifact(&self) -> Option<&Path> {
        self.artifact.as_deref()
    }

    /// `cp3XX` for Python builds, `any` otherwise
    pub fn abi(&self) -> String {
        abi(self.forge, self.strategy)
    }

    /// `build/<abi>/<name>/<version>/<tag>/`
    pub fn build_path(&self) -> PathBuf {
        build_path(self.forge, self.strategy, self.package, self.target())
    }

    fn log_file_name(&self) -> String {
        match self.strategy {
            BuildStrategy::PyPI => format!(
                "{}-{}-{}-{}.log",
                self.package.name,
                self.package.version,
                self.abi(),
                self.target().tag()
            ),
            BuildStrategy::Script | BuildStrategy::CMake => format!(
                "{}-{}-{}.log",
                self.package.name,
                self.package.version,
                self.target().tag()
            ),
        }
    }

    pub fn log_file_path(&self) -> PathBuf {
        self.forge.config.logs_dir().join(self.log_file_name())
    }

    /// Where the log of a failed attempt is moved
    pub fn error_log_file_path(&self) -> PathBuf {
        self.forge.config.errors_dir().join(self.log_file_name())
    }

    /// Source URL for this target
    pub fn source_url(&self) -> Result<String> {
        match &self.package.source {
            SourceKind::Url { .. } => self
                .package
                .source_url(self.target().sdk.as_str(), &self.target().arch)
                .ok_or_else(|| Error::Download(format!("{} has no source URL", self.package))),
            SourceKind::Index => self
                .forge
                .index
                .source_url(&self.package.name, &self.package.version),
        }
    }

    /// Cached location of the source archive
    ///
    /// Index sources are cached as `<name>-<version>.tar.gz`; URL sources
    /// keep the file name from the URL.
    pub fn source_archive_path(&self) -> Result<PathBuf> {
        let file_name = match &self.package.source {
            SourceKind::Url { .. } => download::archive_file_name(&self.source_url()?)?,
            SourceKind::Index => format!("{}-{}.tar.gz", self.package.name, self.package.version),
        };
        Ok(self.forge.config.downloads_dir().join(file_name))
    }

    fn enter(&mut self, state: BuildState) {
        self.state = state;
    }

    /// Get everything in place for compilation
    ///
    /// With `clean`, the build directory is removed first. Otherwise a cached
    /// archive is not downloaded again and an existing build directory is
    /// not unpacked again. The cross environment is always recreated.
    pub fn prepare(&mut self, log: &mut BuildLog, clean: bool) -> Result<()> {
        self.enter(BuildState::Preparing);
        let build_path = self.build_path();

        if clean && build_path.exists() {
            log.line(format!("Removing old build directory {}...", build_path.display()));
            fs::remove_dir_all(&build_path)?;
        }

        let archive_path = self.source_archive_path()?;
        if archive_path.is_file() {
            log.line(format!("Using cached source archive {}", archive_path.display()));
        } else {
            let url = self.source_url()?;
            self.fetch(log, &url, &archive_path)?;
        }

        if build_path.exists() {
            log.line(format!("Using existing build directory {}", build_path.display()));
        } else {
            self.unpack(log, &archive_path, &build_path)?;
            self.patch(log, &build_path)?;
        }

        self.enter(BuildState::CreatingEnvironment);
        log.section(&self.env, "Creating cross environment...");
        self.env.create(log, true)?;
        self.enter(BuildState::EnvironmentReady);

        self.enter(BuildState::InstallingDeps);
        let find_links = self.forge.config.find_links();
        for phase in [Phase::Host, Phase::Build] {
            let requirements: Vec<String> = self
                .package
                .requirements
                .phase(phase)
                .iter()
                .map(|r| r.pip_specifier())
                .collect();
            if requirements.is_empty() {
                log.line(format!("No {phase} requirements."));
                continue;
            }
            log.section(&self.env, &format!("Installing {phase} requirements..."));
            let side = match phase {
                Phase::Host => InstallSide::Host,
                Phase::Build => InstallSide::Build,
            };
            self.env
                .install_packages(log, &requirements, side, false, &find_links)?;
        }

        match self.strategy {
            BuildStrategy::Script | BuildStrategy::CMake => {
                log.section(&self.env, "Installing wheel-building tools...");
                self.env.install_packages(
                    log,
                    &["wheel".to_string()],
                    InstallSide::Build,
                    false,
                    &[],
                )?;
            }
            BuildStrategy::PyPI => self.install_build_tools(log, &build_path)?,
        }
        Ok(())
    }

    fn fetch(&mut self, log: &mut BuildLog, url: &str, archive_path: &Path) -> Result<()> {
        self.enter(BuildState::Fetching);
        log.line(format!("Downloading {url}..."));
        self.forge.fetcher.fetch(log, url, archive_path)?;
        log.line("done.");

        if let Some(expected) = self.package.sha256()
            && let Err(e) = download::verify_sha256(archive_path, expected)
        {
            // Never leave a bad archive in the cache
            let _ = fs::remove_file(archive_path);
            return Err(e);
        }
        Ok(())
    }

    fn unpack(&mut self, log: &mut BuildLog, archive_path: &Path, build_path: &Path) -> Result<()> {
        self.enter(BuildState::Unpacking);
        log.line(format!("Unpacking {}...", archive_path.display()));
        if let Err(e) = archive::extract(archive_path, build_path, self.package.strip_components()) {
            let _ = fs::remove_dir_all(build_path);
            return Err(e);
        }
        Ok(())
    }

    fn patch(&mut self, log: &mut BuildLog, build_path: &Path) -> Result<()> {
        self.enter(BuildState::Patching);
        if self.package.patches.is_empty() {
            log.line("No patches to apply.");
            return Ok(());
        }
        for patch in &self.package.patches {
            log.line(format!("Applying patches/{patch}"));
            let result = archive::apply_patch(
                self.forge.runner.as_ref(),
                log,
                &self.package.patch_path(patch),
                build_path,
            );
            if let Err(e) = result {
                // A half-patched tree must not be mistaken for a prepared one
                let _ = fs::remove_dir_all(build_path);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Compile and package a prepared build
    pub fn compile(&mut self, log: &mut BuildLog) -> Result<()> {
        match self.strategy {
            BuildStrategy::Script => {
                self.enter(BuildState::Compiling);
                self.run_build_script(log)?;
                self.enter(BuildState::Packaging);
                self.pack_wheel(log)?;
            }
            BuildStrategy::CMake => {
                log.line("Nothing to compile for a CMake recipe.");
            }
            BuildStrategy::PyPI => {
                self.enter(BuildState::Compiling);
                self.build_wheel(log)?;
            }
        }
        Ok(())
    }

    /// Run a complete attempt: fresh log, prepare, compile
    ///
    /// Returns whether the attempt succeeded. On failure the log is moved to
    /// `errors/`; a stale error log from an earlier attempt is removed before
    /// anything else happens.
    pub fn build(&mut self, clean: bool) -> bool {
        let error_log = self.error_log_file_path();
        if error_log.exists()
            && let Err(e) = fs::remove_file(&error_log)
        {
            warn!("Failed to remove stale error log {}: {}", error_log.display(), e);
        }

        let mut log = match BuildLog::create(&self.log_file_path()) {
            Ok(log) => log,
            Err(e) => {
                error!("Can't create build log for {}: {}", self.package, e);
                self.failed_in = Some(self.state);
                self.failure = Some(e.to_string());
                self.enter(BuildState::Failed);
                return false;
            }
        };

        log.line("=".repeat(80));
        log.line(format!("Building {} for {}", self.package, self.target()));
        log.line("=".repeat(80));

        let result = self.prepare(&mut log, clean).and_then(|()| self.compile(&mut log));
        match result {
            Ok(()) => {
                self.enter(BuildState::Succeeded);
                log.line("");
                log.line(format!("Built {} for {}", self.package, self.target()));
                if let Some(artifact) = &self.artifact {
                    log.line(format!("Wheel: {}", artifact.display()));
                }
                log.close();
                true
            }
            Err(e) => {
                let failed_in = self.state;
                log.line("");
                log.line("*".repeat(80));
                log.line(format!("Failed build: {} for {}", self.package, self.target()));
                log.error_chain(&e);
                log.line(format!("State: {failed_in}"));
                log.line("*".repeat(80));

                self.failed_in = Some(failed_in);
                self.failure = Some(e.to_string());
                self.enter(BuildState::Failed);

                if let Some(log_path) = log.close() {
                    self.relocate_log(&log_path, &error_log);
                }
                false
            }
        }
    }

    fn relocate_log(&self, from: &Path, to: &Path) {
        let moved = to
            .parent()
            .map_or(Ok(()), fs::create_dir_all)
            .and_then(|()| fs::rename(from, to));
        if let Err(e) = moved {
            warn!("Failed to move {} to {}: {}", from.display(), to.display(), e);
        }
    }
}

impl fmt::Debug for Builder<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Builder")
            .field("package", &self.package.name)
            .field("version", &self.package.version)
            .field("target", self.target())
            .field("strategy", &self.strategy)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}
