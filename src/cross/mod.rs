// src/cross/mod.rs

//! Cross-compilation environments
//!
//! A [`CrossEnvironment`] is a crossenv virtual environment for one target.
//! It carries three interpreter roles:
//!
//! - `python` / `cross-python`: report the target platform, so packages
//!   installed through them believe they are native to the target
//! - `build-python`: matches the controlling interpreter exactly and runs
//!   build tooling on the build machine
//!
//! Commands run in the environment see an explicit, minimal environment:
//! nothing from the calling process leaks in except what is passed.

mod interpreter;
mod platform;
pub mod toolchain;

pub use interpreter::{Interpreter, InterpreterIdentity, IDENTITY_SCRIPT};
pub use platform::{OperatingSystem, Sdk, Target};

use crate::config::ForgeConfig;
use crate::error::{Error, Result};
use crate::logger::BuildLog;
use crate::process::{CommandSpec, ProcessRunner, path_arg};
use std::cell::OnceCell;
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use toolchain::{SYSCONFIG_SCRIPT, ToolchainInputs};
use tracing::debug;

/// Which side of the environment a package is installed into
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallSide {
    /// Target-side interpreter; binary wheels only
    Host,
    /// Build-side interpreter; source builds allowed
    Build,
}

/// A dual-interpreter cross environment for one target
pub struct CrossEnvironment {
    target: Target,
    location: PathBuf,
    interpreter: Interpreter,
    support_path: PathBuf,
    android_ndk_home: Option<PathBuf>,
    runner: Arc<dyn ProcessRunner>,
    sysconfig: OnceCell<BTreeMap<String, String>>,
    install_root: OnceCell<PathBuf>,
    sdk_root: OnceCell<PathBuf>,
}

impl fmt::Debug for CrossEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CrossEnvironment")
            .field("target", &self.target)
            .field("location", &self.location)
            .field("interpreter", &self.interpreter)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CrossEnvironment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.venv_name())
    }
}

/// Run `f` once and cache its value; errors are not cached
fn cached<'a, T>(cell: &'a OnceCell<T>, f: impl FnOnce() -> Result<T>) -> Result<&'a T> {
    if let Some(value) = cell.get() {
        return Ok(value);
    }
    let value = f()?;
    Ok(cell.get_or_init(|| value))
}

impl CrossEnvironment {
    /// Describe the environment for `target`, materialized under `location`
    ///
    /// Nothing is created on disk until [`create`](Self::create).
    pub fn new(
        target: Target,
        location: impl Into<PathBuf>,
        interpreter: Interpreter,
        config: &ForgeConfig,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let support_path = config.require_support_path()?.to_path_buf();
        Ok(Self {
            target,
            location: location.into(),
            interpreter,
            support_path,
            android_ndk_home: config.android_ndk_home.clone(),
            runner,
            sysconfig: OnceCell::new(),
            install_root: OnceCell::new(),
            sdk_root: OnceCell::new(),
        })
    }

    pub fn target(&self) -> &Target {
        &self.target
    }

    pub fn interpreter(&self) -> &Interpreter {
        &self.interpreter
    }

    /// `venv<py-major.minor>-<tag>`
    pub fn venv_name(&self) -> String {
        format!("venv{}-{}", self.interpreter.short_version(), self.target.tag())
    }

    pub fn venv_path(&self) -> PathBuf {
        self.location.join(self.venv_name())
    }

    pub fn exists(&self) -> bool {
        self.venv_path().is_dir()
    }

    /// Home of the prebuilt target interpreter in the support tree
    pub fn host_python_home(&self) -> Result<PathBuf> {
        let base = self
            .support_path
            .join(self.interpreter.short_version())
            .join(self.target.os().name());
        if self.target.os().is_apple() {
            Ok(base
                .join("Python.xcframework")
                .join(self.target.xcframework_slice()?))
        } else {
            Ok(base.join(&self.target.arch))
        }
    }

    pub fn host_python(&self) -> Result<PathBuf> {
        Ok(self
            .host_python_home()?
            .join("bin")
            .join(format!("python{}", self.interpreter.short_version())))
    }

    /// The target interpreter's `_sysconfigdata_` module
    pub fn host_sysconfig(&self) -> Result<PathBuf> {
        let os = self.target.os().name().to_lowercase();
        let suffix = if self.target.os().is_apple() {
            format!("{}-{}", self.target.arch, self.target.sdk)
        } else {
            self.target.platform_triplet()
        };
        Ok(self
            .host_python_home()?
            .join("lib")
            .join(format!("python{}", self.interpreter.short_version()))
            .join(format!("_sysconfigdata__{os}_{suffix}.py")))
    }

    /// Create the environment, verify it, and bring pip up to date on both sides
    ///
    /// An existing environment is an error unless `clean` is set, in which
    /// case it is removed first. Verification happens before anything is
    /// installed.
    pub fn create(&self, log: &mut BuildLog, clean: bool) -> Result<()> {
        let host_python = self.host_python()?;
        if !host_python.is_file() {
            return Err(Error::Environment(format!(
                "can't find host python {}",
                host_python.display()
            )));
        }
        let host_sysconfig = self.host_sysconfig()?;
        if !host_sysconfig.is_file() {
            return Err(Error::Environment(format!(
                "can't find host sysconfig {}",
                host_sysconfig.display()
            )));
        }

        let venv_path = self.venv_path();
        if self.exists() {
            if !clean {
                return Err(Error::EnvironmentAlreadyExists(self.venv_name()));
            }
            log.line(format!("Removing old {self} environment..."));
            fs::remove_dir_all(&venv_path)?;
        }
        fs::create_dir_all(&self.location)?;

        log.line(format!("Creating {self}..."));
        let create = CommandSpec::new(path_arg(&self.interpreter.executable))
            .args(["-m", "crossenv", "--sysconfigdata-file"])
            .arg(path_arg(&host_sysconfig))
            .arg(path_arg(&host_python))
            .arg(path_arg(&venv_path));
        let create = self.sanitize(create)?;
        self.runner
            .run(log, &create)
            .map_err(|e| {
                Error::Environment(format!("unable to create cross platform environment {self}: {e}"))
            })?;

        log.line("Verifying cross-platform environment...");
        self.verify()?;
        log.line(format!("Cross platform environment {self} created."));

        for python in ["cross-python", "build-python"] {
            log.line(format!("Updating {python} pip..."));
            self.run(
                log,
                &[
                    python,
                    "-m",
                    "pip",
                    "install",
                    "--disable-pip-version-check",
                    "--upgrade",
                    "pip",
                ],
                None,
                &BTreeMap::new(),
            )?;
        }
        Ok(())
    }

    /// Check every interpreter role reports the expected version and platform
    pub fn verify(&self) -> Result<()> {
        let target_platform = self.target.platform_identifier();
        let roles = [
            ("python", target_platform.as_str()),
            ("build-python", self.interpreter.platform.as_str()),
            ("cross-python", target_platform.as_str()),
        ];

        for (role, expected_platform) in roles {
            let output = self.run_capturing_output(&[role, "-c", IDENTITY_SCRIPT], &BTreeMap::new())?;
            let identity = InterpreterIdentity::parse(&output)?;
            debug!("{} reports {} on {}", role, identity.version, identity.platform);

            if identity.platform != expected_platform {
                return Err(Error::EnvironmentVerification(format!(
                    "{role} should report platform {expected_platform}; got {}",
                    identity.platform
                )));
            }
            if identity.version != self.interpreter.version {
                return Err(Error::EnvironmentVerification(format!(
                    "{role} should be Python {}; got {}",
                    self.interpreter.version, identity.version
                )));
            }
        }
        Ok(())
    }

    /// Directories searched for executables, in order
    pub fn search_path(&self) -> Result<Vec<PathBuf>> {
        let venv_path = self.venv_path();
        let mut path = vec![
            self.host_python_home()?.join("bin"),
            venv_path.join("bin"),
            venv_path.join("cross").join("bin"),
        ];
        if let Some(bin) = self.ndk_prebuilt().map(|p| p.join("bin")) {
            path.push(bin);
        }
        if let Some(home) = dirs::home_dir() {
            path.push(home.join(".cargo").join("bin"));
        }
        path.extend(
            ["/usr/bin", "/bin", "/usr/sbin", "/sbin", "/Library/Apple/usr/bin"]
                .into_iter()
                .map(PathBuf::from),
        );
        Ok(path)
    }

    /// Apply the environment's PATH and `VIRTUAL_ENV`, dropping `PYTHONHOME`
    fn sanitize(&self, mut command: CommandSpec) -> Result<CommandSpec> {
        let path = self
            .search_path()?
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(":");
        command.env.insert("PATH".to_string(), path);
        command.env.insert(
            "VIRTUAL_ENV".to_string(),
            self.venv_path().join("cross").display().to_string(),
        );
        command.env.remove("PYTHONHOME");
        Ok(command)
    }

    /// Run a command inside the environment, streaming output into `log`
    pub fn run<S: AsRef<str>>(
        &self,
        log: &mut BuildLog,
        args: &[S],
        cwd: Option<&Path>,
        env: &BTreeMap<String, String>,
    ) -> Result<()> {
        let argv: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let mut command = CommandSpec::from_argv(&argv).envs(env);
        if let Some(cwd) = cwd {
            command = command.current_dir(cwd);
        }
        self.runner.run(log, &self.sanitize(command)?)
    }

    /// Run a command inside the environment and capture its stdout
    pub fn run_capturing_output<S: AsRef<str>>(
        &self,
        args: &[S],
        env: &BTreeMap<String, String>,
    ) -> Result<String> {
        let argv: Vec<String> = args.iter().map(|a| a.as_ref().to_string()).collect();
        let command = CommandSpec::from_argv(&argv).envs(env);
        self.runner.output(&self.sanitize(command)?)
    }

    /// Install packages into one side of the environment
    pub fn install_packages(
        &self,
        log: &mut BuildLog,
        packages: &[String],
        side: InstallSide,
        update: bool,
        find_links: &[PathBuf],
    ) -> Result<()> {
        let mut args: Vec<String> = match side {
            InstallSide::Build => vec!["build-pip".into()],
            InstallSide::Host => vec!["python".into(), "-m".into(), "pip".into()],
        };
        args.push("install".into());
        args.push("--disable-pip-version-check".into());
        if side == InstallSide::Host {
            args.push("--only-binary".into());
            args.push(":all:".into());
        }
        if update {
            args.push("-U".into());
        }
        for path in find_links {
            args.push("--find-links".into());
            args.push(path_arg(path));
        }
        args.extend(packages.iter().cloned());

        self.run(log, &args, None, &BTreeMap::new())
            .map_err(|e| Error::DependencyInstall {
                packages: packages.join(" "),
                source: Box::new(e),
            })
    }

    /// The target interpreter's compiler configuration (cached)
    pub fn sysconfig(&self) -> Result<&BTreeMap<String, String>> {
        cached(&self.sysconfig, || {
            let output = self.run_capturing_output(&["python", "-c", SYSCONFIG_SCRIPT], &BTreeMap::new())?;
            let vars: BTreeMap<String, String> = serde_json::from_str(output.trim())?;
            Ok(vars)
        })
    }

    /// Where native dependencies are installed: `<site-packages>/opt` (cached)
    pub fn install_root(&self) -> Result<&Path> {
        cached(&self.install_root, || {
            let output = self.run_capturing_output(
                &["python", "-c", "import sys; print(sys.path[-1])"],
                &BTreeMap::new(),
            )?;
            let install_root = PathBuf::from(output.trim()).join("opt");
            if !install_root.starts_with(self.venv_path()) {
                return Err(Error::Environment(format!(
                    "install root {} doesn't appear to be in the cross environment",
                    install_root.display()
                )));
            }
            Ok(install_root)
        })
        .map(PathBuf::as_path)
    }

    /// Root of the platform SDK (cached)
    pub fn sdk_root(&self) -> Result<&Path> {
        cached(&self.sdk_root, || {
            if self.target.os().is_apple() {
                let output = self.run_capturing_output(
                    &["xcrun", "--show-sdk-path", "--sdk", self.target.sdk.as_str()],
                    &BTreeMap::new(),
                )?;
                Ok(PathBuf::from(output.trim()))
            } else {
                self.ndk_prebuilt()
                    .map(|p| p.join("sysroot"))
                    .ok_or_else(|| {
                        Error::Environment(format!(
                            "{} is not set; it is required for Android builds",
                            crate::config::ANDROID_NDK_ENV
                        ))
                    })
            }
        })
        .map(PathBuf::as_path)
    }

    /// NDK LLVM toolchain directory for the build machine (Android only)
    fn ndk_prebuilt(&self) -> Option<PathBuf> {
        if self.target.os().is_apple() {
            return None;
        }
        let host = match std::env::consts::OS {
            "macos" => "darwin-x86_64",
            _ => "linux-x86_64",
        };
        self.android_ndk_home
            .as_ref()
            .map(|ndk| ndk.join("toolchains/llvm/prebuilt").join(host))
    }

    /// Compiler configuration for this target with `extra` merged last
    pub fn toolchain_config(
        &self,
        extra: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let framework_path = if self.target.os().is_apple() {
            Some(self.host_python_home()?)
        } else {
            None
        };
        let inputs = ToolchainInputs {
            sysconfig: self.sysconfig()?,
            install_root: self.install_root()?,
            sdk_root: self.sdk_root()?,
            framework_path: framework_path.as_deref(),
        };
        Ok(toolchain::derive(inputs, extra))
    }
}
