// src/cli/mod.rs
//! CLI definitions for forge
//!
//! ```text
//! forge [-v] [--clean] [--all-versions] [--subset <subset>] <host> [package]...
//! forge [-v] dep-wheels <os>
//! ```
//!
//! `host` is an OS name (`android`, `iOS`, `tvOS`, `watchOS`), `sdk:arch`
//! or `sdk:version:arch`. Each package is a recipe name or path, optionally
//! followed by `:version`, `::build` or `:version:build`. With no packages,
//! the `--subset` of the default package set is built.

use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fmt;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "forge")]
#[command(version)]
#[command(about = "Cross-compile Python packages into wheels for mobile platforms", long_about = None)]
#[command(subcommand_negates_reqs = true)]
pub struct Cli {
    /// Log debug output, including every command and its environment
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Workspace root holding recipes, downloads, builds and logs
    #[arg(long, global = true, default_value = ".")]
    pub root: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,

    #[command(flatten)]
    pub build: BuildArgs,
}

/// Arguments of the default build command
#[derive(Args, Debug)]
pub struct BuildArgs {
    /// Remove existing build directories before building
    #[arg(long)]
    pub clean: bool,

    /// Build every recent released version instead of the recipe's version
    #[arg(long)]
    pub all_versions: bool,

    /// Part of the default package set to build when no packages are named
    #[arg(short, long, value_enum, default_value_t = Subset::All)]
    pub subset: Subset,

    /// Target: an OS name, sdk:arch, or sdk:version:arch
    #[arg(required = true)]
    pub host: Option<String>,

    /// Packages: name, path/to/recipe, name:version, name::build or name:version:build
    #[arg(value_parser = PackageSpec::parse)]
    pub packages: Vec<PackageSpec>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Package the support tree's bundled libraries (BZip2, XZ, libFFI, OpenSSL) as wheels
    DepWheels {
        /// Apple OS: iOS, tvOS or watchOS
        os: String,
    },
}

/// Slices of the default package set
///
/// Smoke packages are a quick cross-section; "py" packages are Python
/// distributions, "non-py" ones are native libraries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Subset {
    NonPy,
    Py,
    Smoke,
    SmokeNonPy,
    SmokePy,
    NonSmoke,
    All,
}

/// A package named on the command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageSpec {
    /// Recipe name or path to a recipe directory
    pub locator: String,
    pub version: Option<String>,
    pub build: Option<u32>,
}

impl PackageSpec {
    pub fn parse(spec: &str) -> Result<Self, String> {
        let parts: Vec<&str> = spec.split(':').collect();
        let (locator, version, build) = match parts.as_slice() {
            [locator] => (*locator, None, None),
            [locator, version] => (*locator, Some(*version), None),
            [locator, version, build] => (*locator, Some(*version), Some(*build)),
            _ => return Err(format!("{spec}: expected name[:version[:build]]")),
        };

        if locator.is_empty() {
            return Err(format!("{spec}: missing package name"));
        }
        let version = version.filter(|v| !v.is_empty()).map(str::to_string);
        let build = match build.filter(|b| !b.is_empty()) {
            Some(b) => Some(
                b.parse::<u32>()
                    .map_err(|_| format!("{spec}: build number must be a non-negative integer"))?,
            ),
            None => None,
        };

        Ok(Self {
            locator: locator.to_string(),
            version,
            build,
        })
    }
}

impl fmt::Display for PackageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.locator)?;
        match (&self.version, self.build) {
            (Some(version), Some(build)) => write!(f, ":{version}:{build}"),
            (Some(version), None) => write!(f, ":{version}"),
            (None, Some(build)) => write!(f, "::{build}"),
            (None, None) => Ok(()),
        }
    }
}
