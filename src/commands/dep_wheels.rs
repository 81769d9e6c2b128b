// src/commands/dep_wheels.rs

//! Dep-wheels command - package the support tree's bundled libraries

use anyhow::{Context, Result};
use forge::builder::{DepWheel, DepWheelBuilder};
use forge::config::ForgeConfig;
use forge::cross::{Interpreter, OperatingSystem};
use forge::logger::BuildLog;
use forge::process::SystemRunner;
use std::path::Path;
use tracing::info;

pub fn cmd_dep_wheels(root: &Path, os: &str) -> Result<bool> {
    let os = OperatingSystem::from_name(os)
        .with_context(|| format!("Unknown operating system {os:?}"))?;

    let config = ForgeConfig::load(root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    let runner = SystemRunner::new();
    let interpreter = Interpreter::detect(&runner, &config.python)
        .with_context(|| format!("Failed to inspect {}", config.python))?;
    info!("Using Python {} support libraries", interpreter.short_version());

    let mut log = BuildLog::console();
    let wheels = DepWheelBuilder::new(&config, &interpreter, &runner)
        .build_all(&mut log, os)
        .with_context(|| format!("Failed to package {os} support libraries"))?;

    let built = wheels.iter().filter(|w| matches!(w, DepWheel::Built(_))).count();
    println!("Packaged {} of {} support wheel(s)", built, wheels.len());
    for wheel in &wheels {
        println!("  - {}", wheel.path().display());
    }
    Ok(true)
}
