// src/builder/pypi.rs

//! Python package builds from an sdist
//!
//! Build tooling is pinned so historical package versions keep building the
//! same way as the tools move on.

use super::Builder;
use crate::cross::InstallSide;
use crate::error::{Error, Result};
use crate::logger::BuildLog;
use crate::process::path_arg;
use crate::recipe::{canonicalize_version, escape_name};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

pub const SETUPTOOLS_REQUIREMENT: &str = "setuptools==75.6.0";
pub const BUILD_REQUIREMENT: &str = "build==1.2.2.post1";
pub const WHEEL_REQUIREMENT: &str = "wheel==0.45.1";

#[derive(Debug, Deserialize)]
struct PyProject {
    #[serde(rename = "build-system", default)]
    build_system: BuildSystem,
}

#[derive(Debug, Default, Deserialize)]
struct BuildSystem {
    #[serde(default)]
    requires: Vec<String>,
}

/// `[build-system] requires` from a `pyproject.toml`
pub fn build_system_requires(pyproject: &Path) -> Result<Vec<String>> {
    let text = fs::read_to_string(pyproject)?;
    let parsed: PyProject = toml::from_str(&text).map_err(|e| {
        Error::SchemaValidation(format!("invalid {}: {}", pyproject.display(), e))
    })?;
    Ok(parsed.build_system.requires)
}

fn pinned_build_tools() -> Vec<String> {
    vec![BUILD_REQUIREMENT.to_string(), WHEEL_REQUIREMENT.to_string()]
}

impl Builder<'_> {
    /// Install what the sdist needs to build into both sides of the environment
    pub(super) fn install_build_tools(&mut self, log: &mut BuildLog, build_path: &Path) -> Result<()> {
        let find_links = self.forge.config.find_links();
        let pyproject = build_path.join("pyproject.toml");

        if pyproject.is_file() {
            log.section(&self.env, "Installing pyproject.toml build requirements...");
            let mut requires = pinned_build_tools();
            requires.extend(build_system_requires(&pyproject)?);
            for side in [InstallSide::Host, InstallSide::Build] {
                self.env
                    .install_packages(log, &requires, side, false, &find_links)?;
            }
        } else {
            log.section(&self.env, "Installing non-PEP 517 build requirements...");
            let setuptools = [SETUPTOOLS_REQUIREMENT.to_string()];
            for side in [InstallSide::Host, InstallSide::Build] {
                self.env.install_packages(log, &setuptools, side, true, &[])?;
                self.env
                    .install_packages(log, &pinned_build_tools(), side, false, &[])?;
            }
        }
        Ok(())
    }

    /// Output directory: `deps/` for internal tooling, `dist/` otherwise
    fn wheel_output_dir(&self) -> PathBuf {
        if self.forge.config.is_internal(&self.package.name) {
            self.forge.config.deps_dir()
        } else {
            self.forge.config.dist_dir()
        }
    }

    pub(super) fn build_wheel(&mut self, log: &mut BuildLog) -> Result<()> {
        let mut script_env: BTreeMap<String, String> = self.recipe_env()?;
        script_env.insert(
            "_PYTHON_HOST_PLATFORM".to_string(),
            self.env.target().platform_identifier(),
        );
        let env = self.compile_env(&script_env)?;

        let out_dir = self.wheel_output_dir();
        fs::create_dir_all(&out_dir)?;

        let mut args = vec![
            "python".to_string(),
            "-m".to_string(),
            "build".to_string(),
            "--no-isolation".to_string(),
            "--wheel".to_string(),
            "--outdir".to_string(),
            path_arg(&out_dir),
            "-v".to_string(),
        ];
        for setting in &self.package.config_settings {
            args.push("-C".to_string());
            args.push(setting.clone());
        }

        log.section(&self.env, "Building wheel...");
        let build_path = self.build_path();
        self.env.run(log, &args, Some(&build_path), &env)?;

        self.artifact = find_wheel(
            &out_dir,
            &self.package.name,
            &self.package.version,
            &self.env.target().tag(),
        );
        if let Some(artifact) = &self.artifact {
            log.line(format!("Built {}", artifact.display()));
        }
        Ok(())
    }
}

/// The wheel the frontend produced for this package and target, if any
///
/// Frontends keep the version as the project spells it (`10.4.0`), so names
/// and versions are compared in canonical form.
fn find_wheel(out_dir: &Path, name: &str, version: &str, tag: &str) -> Option<PathBuf> {
    let name = escape_name(name);
    let version = canonicalize_version(version);
    let suffix = format!("-{tag}.whl");
    fs::read_dir(out_dir)
        .ok()?
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|path| {
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                return false;
            };
            let mut fields = file_name.split('-');
            file_name.ends_with(&suffix)
                && fields.next().is_some_and(|n| escape_name(n) == name)
                && fields.next().is_some_and(|v| canonicalize_version(v) == version)
        })
        .max_by_key(|path| fs::metadata(path).and_then(|m| m.modified()).ok())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_system_requires() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pyproject.toml");

        fs::write(
            &path,
            "[build-system]\nrequires = [\"setuptools>=61\", \"cython\"]\nbuild-backend = \"setuptools.build_meta\"\n\n[project]\nname = \"widget\"\n",
        )
        .unwrap();
        assert_eq!(build_system_requires(&path).unwrap(), vec!["setuptools>=61", "cython"]);

        fs::write(&path, "[project]\nname = \"widget\"\n").unwrap();
        assert!(build_system_requires(&path).unwrap().is_empty());

        fs::write(&path, "[build-system\n").unwrap();
        assert!(matches!(build_system_requires(&path), Err(Error::SchemaValidation(_))));
    }

    #[test]
    fn test_find_wheel() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "widget_lib-1.2-cp311-cp311-ios_13_0_arm64_iphoneos.whl",
            "widget_lib-1.2-cp311-cp311-ios_13_0_x86_64_iphonesimulator.whl",
            "other-1.2-cp311-cp311-ios_13_0_arm64_iphoneos.whl",
        ] {
            fs::write(dir.path().join(name), "").unwrap();
        }

        let found = find_wheel(dir.path(), "Widget-Lib", "1.2", "ios_13_0_arm64_iphoneos").unwrap();
        assert!(found.ends_with("widget_lib-1.2-cp311-cp311-ios_13_0_arm64_iphoneos.whl"));
        assert!(find_wheel(dir.path(), "widget-lib", "1.3", "ios_13_0_arm64_iphoneos").is_none());
        assert!(find_wheel(dir.path(), "widget-lib", "1.2.0", "arm64_iphoneos").is_none());
    }

    #[test]
    fn test_find_wheel_keeps_trailing_zeros() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("pillow-10.4.0-cp311-cp311-ios_13_0_arm64_iphoneos.whl"),
            "",
        )
        .unwrap();

        let found = find_wheel(dir.path(), "Pillow", "10.4.0", "ios_13_0_arm64_iphoneos").unwrap();
        assert!(found.ends_with("pillow-10.4.0-cp311-cp311-ios_13_0_arm64_iphoneos.whl"));
        assert!(find_wheel(dir.path(), "pillow", "10.4", "ios_13_0_arm64_iphoneos").is_some());
        assert!(find_wheel(dir.path(), "pillow", "10.4.1", "ios_13_0_arm64_iphoneos").is_none());
    }
}
