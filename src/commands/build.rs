// src/commands/build.rs

//! Build command - resolve every package, then build the whole matrix

use crate::cli::{BuildArgs, PackageSpec, Subset};
use anyhow::{Context, Result};
use chrono::Datelike;
use forge::builder::{BatchReport, BuildBatch, Forge, HttpFetcher};
use forge::config::ForgeConfig;
use forge::cross::{Interpreter, Target};
use forge::index::{CandidateFilter, PyPiIndex};
use forge::process::{ProcessRunner, SystemRunner};
use forge::recipe::ResolvedPackage;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// How far back `--all-versions` looks for releases
const ALL_VERSIONS_YEARS: i32 = 3;

/// Smoke packages of the non-py subsets
const SMOKE_NATIVE: [&str; 3] = ["oldest-supported-numpy", "libjpeg", "freetype"];
const OTHER_NATIVE: [&str; 1] = ["libpng"];
/// Smoke packages of the py subsets; the numpy pin is added per interpreter
const SMOKE_PYTHON: [&str; 6] = ["lru-dict", "pillow", "numpy", "pandas", "cffi", "cryptography"];
const OTHER_PYTHON: [&str; 8] = [
    "aiohttp",
    "argon2-cffi",
    "bcrypt",
    "bitarray",
    "blis",
    "brotli",
    "typed-ast",
    "yarl",
];

/// numpy release oldest-supported-numpy resolves to, by Python minor version
fn oldest_supported_numpy(minor: u32) -> Option<&'static str> {
    match minor {
        8 => Some("numpy:1.17.3"),
        9 => Some("numpy:1.19.3"),
        10 => Some("numpy:1.21.6"),
        11 => Some("numpy:1.23.2"),
        _ => None,
    }
}

/// Packages built when none are named on the command line
pub fn default_packages(subset: Subset, python_minor: Option<u32>) -> Result<Vec<PackageSpec>> {
    use Subset::*;

    let mut names: Vec<String> = Vec::new();
    if matches!(subset, All | NonPy | Smoke | SmokeNonPy) {
        names.extend(SMOKE_NATIVE.map(String::from));
    }
    if matches!(subset, All | NonPy | NonSmoke) {
        names.extend(OTHER_NATIVE.map(String::from));
    }
    if matches!(subset, All | Py | Smoke | SmokePy) {
        let pin = python_minor
            .and_then(oldest_supported_numpy)
            .with_context(|| {
                format!("No oldest-supported-numpy pin for Python 3.{}", python_minor.unwrap_or_default())
            })?;
        let mut smoke = SMOKE_PYTHON.map(String::from).to_vec();
        smoke.insert(3, pin.to_string());
        names.extend(smoke);
    }
    if matches!(subset, All | Py | NonSmoke) {
        names.extend(OTHER_PYTHON.map(String::from));
    }

    names
        .iter()
        .map(|name| PackageSpec::parse(name).map_err(anyhow::Error::msg))
        .collect()
}

/// Run a build
///
/// Returns whether every (package, target) pair succeeded. Anything that
/// stops the run before the first build (bad target, unresolvable recipe,
/// missing interpreter) is an error.
pub fn cmd_build(root: &Path, args: &BuildArgs) -> Result<bool> {
    let host = args.host.as_deref().context("No target given")?;
    let targets = Target::expand(host).context("Invalid target")?;

    let config = ForgeConfig::load(root)
        .with_context(|| format!("Failed to load configuration from {}", root.display()))?;
    let runner: Arc<dyn ProcessRunner> = Arc::new(SystemRunner::new());
    let interpreter = Interpreter::detect(runner.as_ref(), &config.python)
        .with_context(|| format!("Failed to inspect {}", config.python))?;
    info!("Using Python {} on {}", interpreter.version, interpreter.platform);

    let fetcher = Arc::new(HttpFetcher::new()?);
    let index = Arc::new(PyPiIndex::new()?);
    let forge = Forge::new(config, interpreter, runner, fetcher, index);

    let specs = if args.packages.is_empty() {
        default_packages(args.subset, forge.interpreter().minor_version())?
    } else {
        args.packages.clone()
    };
    let packages = resolve_packages(&forge, &specs, args.all_versions)?;

    println!(
        "Building {} package version(s) for {} target(s)",
        packages.len(),
        targets.len()
    );
    for target in &targets {
        println!("  - {}", target);
    }

    let report = BuildBatch::run(&forge, &packages, &targets, args.clean);
    print_summary(&report);
    Ok(report.all_succeeded())
}

/// Resolve every package spec up front, so a bad recipe fails the run
/// before anything is built
pub fn resolve_packages(
    forge: &Forge,
    specs: &[PackageSpec],
    all_versions: bool,
) -> Result<Vec<ResolvedPackage>> {
    let resolver = forge.resolver();
    let mut packages = Vec::new();

    for spec in specs {
        let package = resolver
            .resolve(&spec.locator, spec.version.as_deref(), spec.build)
            .with_context(|| format!("Failed to resolve {spec}"))?;

        if !all_versions {
            packages.push(package);
            continue;
        }

        let since = chrono::Local::now().year() - ALL_VERSIONS_YEARS;
        let filter = CandidateFilter::macos(forge.interpreter().abi_tag());
        let versions = forge
            .index()
            .candidate_versions(&package.name, since, &filter)
            .with_context(|| format!("Failed to list versions of {}", package.name))?;
        if versions.is_empty() {
            warn!("No candidate versions of {} since {}", package.name, since);
        }
        for version in versions {
            let package = resolver
                .resolve(&spec.locator, Some(&version), spec.build)
                .with_context(|| format!("Failed to resolve {} {}", spec.locator, version))?;
            packages.push(package);
        }
    }
    Ok(packages)
}

fn print_summary(report: &BatchReport) {
    println!();
    println!("{}", "=".repeat(80));
    println!(
        "Built {} of {} package build(s)",
        report.succeeded.len(),
        report.total()
    );
    for outcome in &report.succeeded {
        match &outcome.path {
            Some(path) => println!("[OK] {} -> {}", outcome, path.display()),
            None => println!("[OK] {}", outcome),
        }
    }
    for outcome in &report.failed {
        match &outcome.path {
            Some(path) => println!("[FAILED] {} (log: {})", outcome, path.display()),
            None => println!("[FAILED] {}", outcome),
        }
    }
}
