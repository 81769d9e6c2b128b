// src/builder/script.rs

//! Script builds: run the recipe's `build.sh`, then pack the staged tree

use super::Builder;
use super::wheel::WheelMetadata;
use crate::error::{Error, Result};
use crate::logger::BuildLog;
use crate::process::path_arg;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::PathBuf;

/// Host variables a build script may rely on
const PASSTHROUGH_VARS: [&str; 5] = ["TMPDIR", "USER", "HOME", "LANG", "TERM"];

impl Builder<'_> {
    /// `<build>/wheel/`, the root of the staged wheel
    pub(super) fn wheel_root(&self) -> PathBuf {
        self.build_path().join("wheel")
    }

    /// Fill `{prefix}`, `{install_root}`, `{sdk_root}` and `{build_path}`
    ///
    /// Environment paths are only looked up when a value refers to them.
    pub(super) fn substitute_paths(&self, value: &str) -> Result<String> {
        let mut value = value.replace("{prefix}", &path_arg(&self.wheel_root().join("opt")));
        value = value.replace("{build_path}", &path_arg(&self.build_path()));
        if value.contains("{install_root}") {
            value = value.replace("{install_root}", &path_arg(self.env.install_root()?));
        }
        if value.contains("{sdk_root}") {
            value = value.replace("{sdk_root}", &path_arg(self.env.sdk_root()?));
        }
        Ok(value)
    }

    /// The recipe's `script_env` with placeholders filled in
    pub(super) fn recipe_env(&self) -> Result<BTreeMap<String, String>> {
        self.package
            .script_env
            .iter()
            .map(|(key, value)| -> Result<(String, String)> {
                Ok((key.clone(), self.substitute_paths(value)?))
            })
            .collect()
    }

    /// Toolchain configuration with `extra` merged in, plus the host
    /// variables compilers and frontends expect to find
    pub(super) fn compile_env(
        &self,
        extra: &BTreeMap<String, String>,
    ) -> Result<BTreeMap<String, String>> {
        let mut env = self.env.toolchain_config(extra)?;
        for key in PASSTHROUGH_VARS {
            if let Ok(value) = std::env::var(key) {
                env.insert(key.to_string(), value);
            }
        }
        Ok(env)
    }

    /// Variables handed to `build.sh`, before the toolchain is merged in
    fn script_env(&self) -> Result<BTreeMap<String, String>> {
        let target = self.env.target();
        let mut env = BTreeMap::new();
        env.insert("HOST_TRIPLET".to_string(), target.platform_triplet());
        env.insert(
            "BUILD_TRIPLET".to_string(),
            self.forge.interpreter.build_triplet(),
        );
        env.insert("CPU_COUNT".to_string(), self.forge.config.jobs.to_string());
        env.insert("PREFIX".to_string(), path_arg(&self.wheel_root().join("opt")));
        env.insert("VERSION".to_string(), self.package.version.clone());
        env.extend(self.recipe_env()?);
        Ok(env)
    }

    pub(super) fn run_build_script(&mut self, log: &mut BuildLog) -> Result<()> {
        let script = self.package.build_script();
        if !script.is_file() {
            return Err(Error::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} has no build script at {}", self.package.name, script.display()),
            )));
        }

        let env = self.compile_env(&self.script_env()?)?;

        log.section(&self.env, "Compiling...");
        let build_path = self.build_path();
        self.env
            .run(log, &[path_arg(&script)], Some(&build_path), &env)
    }

    pub(super) fn pack_wheel(&mut self, log: &mut BuildLog) -> Result<()> {
        let metadata = WheelMetadata::new(self.package, &self.env.target().tag());
        let wheel_root = self.wheel_root();
        let dist_info = metadata.write(&wheel_root)?;
        log.debug(format!("Wrote {}", dist_info.display()));

        let deps_dir = self.forge.config.deps_dir();
        fs::create_dir_all(&deps_dir)?;

        log.section(&self.env, "Packaging wheel...");
        let mut args = vec![
            "build-python".to_string(),
            "-m".to_string(),
            "wheel".to_string(),
            "pack".to_string(),
            path_arg(&wheel_root),
            "--dest-dir".to_string(),
            path_arg(&deps_dir),
        ];
        if let Some(build) = self.package.build_number {
            args.push("--build-number".to_string());
            args.push(build.to_string());
        }
        self.env.run(log, &args, None, &BTreeMap::new())?;

        let artifact = deps_dir.join(metadata.wheel_filename());
        log.line(format!("Packaged {}", artifact.display()));
        self.artifact = Some(artifact);
        Ok(())
    }
}
