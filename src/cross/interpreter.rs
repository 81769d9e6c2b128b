// src/cross/interpreter.rs

//! The controlling Python interpreter
//!
//! Everything version-dependent (environment names, support tree paths, ABI
//! directories) is derived from the interpreter that drives the build, and
//! every interpreter in a cross environment must match its version.

use crate::error::{Error, Result};
use crate::process::{CommandSpec, ProcessRunner, system_env};
use std::path::PathBuf;

/// Python snippet that prints `<version>\n<platform>`
pub const IDENTITY_SCRIPT: &str =
    "import sys, sysconfig; print(sys.version.split(' ')[0]); print(sysconfig.get_platform())";

/// Identity of an interpreter: full version and platform string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterpreterIdentity {
    pub version: String,
    pub platform: String,
}

impl InterpreterIdentity {
    /// Parse the output of [`IDENTITY_SCRIPT`]
    pub fn parse(output: &str) -> Result<Self> {
        let mut lines = output.lines().map(str::trim).filter(|l| !l.is_empty());
        match (lines.next(), lines.next()) {
            (Some(version), Some(platform)) => Ok(Self {
                version: version.to_string(),
                platform: platform.to_string(),
            }),
            _ => Err(Error::Environment(format!(
                "unexpected interpreter identity output: {:?}",
                output.trim()
            ))),
        }
    }
}

/// The interpreter running the whole forge
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Interpreter {
    pub executable: PathBuf,
    pub version: String,
    pub platform: String,
}

impl Interpreter {
    /// Locate `python` on PATH and ask it for its version and platform
    pub fn detect(runner: &dyn ProcessRunner, python: &str) -> Result<Self> {
        let executable = which::which(python).map_err(|e| {
            Error::Environment(format!("can't find Python interpreter {python}: {e}"))
        })?;

        let output = runner.output(
            &CommandSpec::new(executable.display().to_string())
                .args(["-c", IDENTITY_SCRIPT])
                .envs(&system_env()),
        )?;
        let identity = InterpreterIdentity::parse(&output)?;

        Ok(Self {
            executable,
            version: identity.version,
            platform: identity.platform,
        })
    }

    /// `major.minor`, e.g. `3.11`
    pub fn short_version(&self) -> String {
        let mut parts = self.version.split('.');
        match (parts.next(), parts.next()) {
            (Some(major), Some(minor)) => format!("{major}.{minor}"),
            _ => self.version.clone(),
        }
    }

    /// Minor version number, e.g. `11` for 3.11.4
    pub fn minor_version(&self) -> Option<u32> {
        self.version.split('.').nth(1)?.parse().ok()
    }

    /// CPython ABI directory name, e.g. `cp311`
    pub fn abi_tag(&self) -> String {
        format!("cp{}", self.short_version().replace('.', ""))
    }

    /// GNU-style triplet of the machine running the build
    pub fn build_triplet(&self) -> String {
        let arch = std::env::consts::ARCH;
        match std::env::consts::OS {
            "macos" => {
                let arch = if arch == "aarch64" { "arm64" } else { arch };
                format!("{arch}-apple-darwin")
            }
            "linux" => format!("{arch}-unknown-linux-gnu"),
            os => format!("{arch}-unknown-{os}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn python311() -> Interpreter {
        Interpreter {
            executable: PathBuf::from("/usr/bin/python3"),
            version: "3.11.4".to_string(),
            platform: "macosx-14.0-arm64".to_string(),
        }
    }

    #[test]
    fn test_identity_parse() {
        let identity = InterpreterIdentity::parse("3.11.4\nios-13.0-arm64-iphoneos\n").unwrap();
        assert_eq!(identity.version, "3.11.4");
        assert_eq!(identity.platform, "ios-13.0-arm64-iphoneos");

        assert!(InterpreterIdentity::parse("3.11.4\n").is_err());
    }

    #[test]
    fn test_version_tags() {
        let python = python311();
        assert_eq!(python.short_version(), "3.11");
        assert_eq!(python.abi_tag(), "cp311");
        assert_eq!(python.minor_version(), Some(11));

        let odd = Interpreter { version: "3".to_string(), ..python };
        assert_eq!(odd.minor_version(), None);
    }

    #[test]
    fn test_build_triplet_shape() {
        let triplet = python311().build_triplet();
        assert!(triplet.contains('-'));
        assert!(!triplet.starts_with('-'));
    }
}
