// src/recipe/mod.rs

//! Recipe resolution
//!
//! A recipe is a directory holding a templated `meta.yaml`, an optional
//! `build.sh` and an optional `patches/` directory. Resolving a recipe
//! renders the template (after applying any version override), validates the
//! document and produces an immutable [`ResolvedPackage`] that every target
//! build of that package shares.
//!
//! # Example Recipe
//!
//! ```yaml
//! {% set version = "1.2.0" %}
//! package:
//!   name: widget
//!   version: {{ version }}
//! source:
//!   url: https://example.com/widget-{version}.tar.gz
//! build:
//!   number: 1
//!   script_env:
//!     - WIDGET_PREFIX={prefix}
//! requirements:
//!   host:
//!     - zlib 1.2.13
//!   build:
//!     - cmake
//! patches:
//!   - ios-support.patch
//! ```

mod format;
pub mod parser;
pub mod template;

pub use format::{AboutSection, BuildSection, PackageSection, Recipe, RequirementsSection, SourceSection, UrlSource};
pub use parser::{RECIPE_FILE, load_recipe, parse_recipe, validate_recipe};

use crate::error::{Error, Result};
use regex::Regex;
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;
use tracing::debug;

/// Where a package's source comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SourceKind {
    /// Source distribution from the package index, by name and version
    Index,
    /// Archive downloaded from a URL template
    Url {
        url: String,
        strip: usize,
        sha256: Option<String>,
    },
}

/// Build pipeline variant, chosen once at resolution time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildKind {
    /// Native library built by the recipe's `build.sh`
    Script,
    /// Native library whose script drives CMake itself
    CMake,
    /// Python package built from its sdist with the standard build frontend
    PyPI,
}

/// Install phase a requirement belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Host,
    Build,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Phase::Host => write!(f, "host"),
            Phase::Build => write!(f, "build"),
        }
    }
}

/// A single requirement entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Requirement {
    /// `"name version"`: an exact pin
    Pinned { name: String, version: String },
    /// Anything else, passed to pip verbatim
    Specifier(String),
}

impl Requirement {
    pub fn parse(entry: &str) -> Self {
        let tokens: Vec<&str> = entry.split_whitespace().collect();
        match tokens.as_slice() {
            [name, version] if version.starts_with(|c: char| c.is_ascii_digit()) => {
                Requirement::Pinned {
                    name: name.to_string(),
                    version: version.to_string(),
                }
            }
            _ => Requirement::Specifier(entry.trim().to_string()),
        }
    }

    /// Distribution name, for matching
    pub fn name(&self) -> &str {
        match self {
            Requirement::Pinned { name, .. } => name,
            Requirement::Specifier(spec) => spec
                .split(|c: char| !(c.is_ascii_alphanumeric() || "-_.".contains(c)))
                .next()
                .unwrap_or(spec),
        }
    }

    /// The argument handed to pip
    pub fn pip_specifier(&self) -> String {
        match self {
            Requirement::Pinned { name, version } => format!("{name}=={version}"),
            Requirement::Specifier(spec) => spec.clone(),
        }
    }
}

/// Requirements per install phase, in declaration order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Requirements {
    pub host: Vec<Requirement>,
    pub build: Vec<Requirement>,
}

impl Requirements {
    pub fn phase(&self, phase: Phase) -> &[Requirement] {
        match phase {
            Phase::Host => &self.host,
            Phase::Build => &self.build,
        }
    }
}

/// A fully resolved build descriptor
///
/// Immutable once returned by [`RecipeResolver::resolve`]; shared by every
/// target the package is built for.
#[derive(Debug, Clone)]
pub struct ResolvedPackage {
    pub name: String,
    /// Version used for source resolution, exactly as declared or overridden
    pub version: String,
    pub build_number: Option<u32>,
    /// PEP 503 normalized name
    pub canonical_name: String,
    /// Normalized version used in artifact names
    pub canonical_version: String,
    pub source: SourceKind,
    pub requirements: Requirements,
    /// Patch file names relative to `<recipe_dir>/patches/`
    pub patches: Vec<String>,
    /// Extra build script variables, values may hold path placeholders
    pub script_env: BTreeMap<String, String>,
    /// `-C` settings for the build frontend
    pub config_settings: Vec<String>,
    pub summary: Option<String>,
    pub home: Option<String>,
    pub build_kind: BuildKind,
    pub recipe_dir: PathBuf,
}

impl ResolvedPackage {
    /// Build a descriptor from a validated recipe and the overrides
    fn from_recipe(
        recipe: Recipe,
        recipe_dir: PathBuf,
        version_override: Option<&str>,
        build_override: Option<u32>,
    ) -> Self {
        let (version, build_number) = match version_override {
            Some(version) => (version.to_string(), build_override),
            None => (
                recipe.package.version,
                build_override.or(recipe.build.number),
            ),
        };

        let mut requirements = Requirements {
            host: recipe.requirements.host.iter().map(|e| Requirement::parse(e)).collect(),
            build: recipe.requirements.build.iter().map(|e| Requirement::parse(e)).collect(),
        };

        let (source, build_kind) = match recipe.source {
            SourceSection::Named(_) => (SourceKind::Index, BuildKind::PyPI),
            SourceSection::Url(url) => {
                let before = requirements.build.len();
                // cmake comes from the host system, not pip
                requirements.build.retain(|r| r.name() != "cmake");
                let kind = if requirements.build.len() < before {
                    BuildKind::CMake
                } else {
                    BuildKind::Script
                };
                (
                    SourceKind::Url {
                        url: url.url,
                        strip: url.strip,
                        sha256: url.sha256.map(|s| s.to_ascii_lowercase()),
                    },
                    kind,
                )
            }
        };

        let script_env = recipe
            .build
            .script_env
            .iter()
            .filter_map(|line| line.split_once('='))
            .map(|(k, v)| (k.trim().to_string(), v.to_string()))
            .collect();

        Self {
            canonical_name: canonicalize_name(&recipe.package.name),
            canonical_version: canonicalize_version(&version),
            name: recipe.package.name,
            version,
            build_number,
            source,
            requirements,
            patches: recipe.patches,
            script_env,
            config_settings: recipe.build.config,
            summary: recipe.about.summary,
            home: recipe.about.home,
            build_kind,
            recipe_dir,
        }
    }

    /// Source URL for a target, with placeholders filled in
    ///
    /// `None` for index-sourced packages.
    pub fn source_url(&self, sdk: &str, arch: &str) -> Option<String> {
        match &self.source {
            SourceKind::Index => None,
            SourceKind::Url { url, .. } => Some(
                url.replace("{version}", &self.version)
                    .replace(
                        "{build}",
                        &self.build_number.map(|n| n.to_string()).unwrap_or_default(),
                    )
                    .replace("{sdk}", sdk)
                    .replace("{arch}", arch),
            ),
        }
    }

    /// Leading path components stripped when unpacking the source
    pub fn strip_components(&self) -> usize {
        match &self.source {
            SourceKind::Url { strip, .. } => *strip,
            SourceKind::Index => 1,
        }
    }

    pub fn sha256(&self) -> Option<&str> {
        match &self.source {
            SourceKind::Url { sha256, .. } => sha256.as_deref(),
            SourceKind::Index => None,
        }
    }

    pub fn build_script(&self) -> PathBuf {
        self.recipe_dir.join("build.sh")
    }

    pub fn patch_path(&self, patch: &str) -> PathBuf {
        self.recipe_dir.join("patches").join(patch)
    }
}

impl fmt::Display for ResolvedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.version)
    }
}

/// Turns recipe locators into resolved packages
#[derive(Debug, Clone)]
pub struct RecipeResolver {
    recipes_dir: PathBuf,
}

impl RecipeResolver {
    pub fn new(recipes_dir: impl Into<PathBuf>) -> Self {
        Self {
            recipes_dir: recipes_dir.into(),
        }
    }

    /// Find the recipe directory for a locator
    ///
    /// A locator containing `/` is a path; anything else is a name under the
    /// recipes directory.
    pub fn locate(&self, locator: &str) -> Result<PathBuf> {
        let dir = if locator.contains('/') {
            PathBuf::from(locator)
        } else {
            self.recipes_dir.join(locator)
        };

        if dir.join(RECIPE_FILE).is_file() {
            Ok(dir)
        } else {
            Err(Error::RecipeNotFound(locator.to_string()))
        }
    }

    /// Resolve a recipe with optional version and build number overrides
    ///
    /// A version override always wins; the document's build number is then
    /// discarded unless a build override is also given. A build override on
    /// its own replaces the build number and keeps the declared version.
    pub fn resolve(
        &self,
        locator: &str,
        version_override: Option<&str>,
        build_override: Option<u32>,
    ) -> Result<ResolvedPackage> {
        let recipe_dir = self.locate(locator)?;
        debug!("Resolving recipe in {}", recipe_dir.display());

        let recipe = load_recipe(&recipe_dir, version_override)?;
        Ok(ResolvedPackage::from_recipe(
            recipe,
            recipe_dir,
            version_override,
            build_override,
        ))
    }

    pub fn recipes_dir(&self) -> &Path {
        &self.recipes_dir
    }
}

static NAME_SEPARATORS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[-_.]+").expect("static regex"));

static VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"^v?(?:(?P<epoch>\d+)!)?(?P<release>\d+(?:\.\d+)*)",
        r"(?:[-_.]?(?P<pre_l>alpha|a|beta|b|preview|pre|c|rc)[-_.]?(?P<pre_n>\d*))?",
        r"(?:-(?P<post_n1>\d+)|[-_.]?(?P<post_l>post|rev|r)[-_.]?(?P<post_n2>\d*))?",
        r"(?:[-_.]?(?P<dev_l>dev)[-_.]?(?P<dev_n>\d*))?",
        r"(?:\+(?P<local>[a-z0-9]+(?:[-_.][a-z0-9]+)*))?$",
    ))
    .expect("static regex")
});

/// PEP 503 name normalization
pub fn canonicalize_name(name: &str) -> String {
    NAME_SEPARATORS.replace_all(name, "-").to_lowercase()
}

/// Name as it appears in wheel file and `.dist-info` names
pub fn escape_name(name: &str) -> String {
    canonicalize_name(name).replace('-', "_")
}

/// PEP 440 version normalization with trailing zero release components removed
///
/// Strings that are not PEP 440 versions come back lowercased and trimmed.
pub fn canonicalize_version(version: &str) -> String {
    let lowered = version.trim().to_lowercase();
    let Some(caps) = VERSION.captures(&lowered) else {
        return lowered;
    };

    let number = |name: &str| -> u64 {
        caps.name(name)
            .and_then(|m| m.as_str().parse().ok())
            .unwrap_or(0)
    };

    let mut out = String::new();
    let epoch = number("epoch");
    if epoch != 0 {
        out.push_str(&format!("{epoch}!"));
    }

    let mut release: Vec<u64> = caps["release"]
        .split('.')
        .map(|part| part.parse().unwrap_or(0))
        .collect();
    while release.len() > 1 && release.last() == Some(&0) {
        release.pop();
    }
    out.push_str(
        &release
            .iter()
            .map(u64::to_string)
            .collect::<Vec<_>>()
            .join("."),
    );

    if let Some(label) = caps.name("pre_l") {
        let label = match label.as_str() {
            "alpha" | "a" => "a",
            "beta" | "b" => "b",
            _ => "rc",
        };
        out.push_str(&format!("{label}{}", number("pre_n")));
    }

    if caps.name("post_n1").is_some() {
        out.push_str(&format!(".post{}", number("post_n1")));
    } else if caps.name("post_l").is_some() {
        out.push_str(&format!(".post{}", number("post_n2")));
    }

    if caps.name("dev_l").is_some() {
        out.push_str(&format!(".dev{}", number("dev_n")));
    }

    if let Some(local) = caps.name("local") {
        out.push('+');
        out.push_str(&NAME_SEPARATORS.replace_all(local.as_str(), "."));
    }

    out
}
