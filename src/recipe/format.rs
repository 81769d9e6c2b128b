// src/recipe/format.rs

//! Recipe document format definitions
//!
//! These types mirror the rendered `meta.yaml` document. Optional sections
//! default to empty so a resolved recipe always has fully populated
//! collections; unknown keys are rejected.

use serde::{Deserialize, Deserializer, Serialize};

/// A rendered recipe document
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Recipe {
    pub package: PackageSection,

    pub source: SourceSection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub requirements: RequirementsSection,

    /// Patch files, relative to `<recipe>/patches/`, applied in order
    #[serde(default)]
    pub patches: Vec<String>,

    #[serde(default)]
    pub about: AboutSection,
}

/// Package identity
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PackageSection {
    pub name: String,

    /// YAML turns `1.10` into a float; versions are always kept as text
    #[serde(deserialize_with = "string_or_number")]
    pub version: String,
}

/// Where the package source comes from
///
/// Either the literal string `pypi` or a URL mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SourceSection {
    Named(String),
    Url(UrlSource),
}

/// A source archive downloaded from a URL template
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UrlSource {
    /// URL with `{version}`, `{build}`, `{sdk}` and `{arch}` placeholders
    pub url: String,

    /// Leading path components dropped when unpacking
    #[serde(default = "default_strip")]
    pub strip: usize,

    /// Expected SHA-256 of the downloaded archive (hex)
    #[serde(default)]
    pub sha256: Option<String>,
}

fn default_strip() -> usize {
    1
}

/// Build settings
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildSection {
    #[serde(default)]
    pub number: Option<u32>,

    /// `KEY=VALUE` lines exported to the build script
    #[serde(default)]
    pub script_env: Vec<String>,

    /// Config settings passed to the build frontend with `-C`
    #[serde(default)]
    pub config: Vec<String>,
}

/// Requirements per install phase
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RequirementsSection {
    /// Installed into the target-side environment (binary only)
    #[serde(default)]
    pub host: Vec<String>,

    /// Installed into the build-side environment
    #[serde(default)]
    pub build: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct AboutSection {
    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub home: Option<String>,

    #[serde(default)]
    pub license: Option<String>,
}

fn string_or_number<'de, D>(deserializer: D) -> std::result::Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match serde_yaml::Value::deserialize(deserializer)? {
        serde_yaml::Value::String(s) => Ok(s),
        serde_yaml::Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected a string or number, found {other:?}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minimal_recipe_defaults() {
        let recipe: Recipe = serde_yaml::from_str(
            r#"
package:
  name: widget
  version: "1.2.0"
source:
  url: https://example.com/widget-{version}.tar.gz
"#,
        )
        .unwrap();

        assert_eq!(recipe.package.name, "widget");
        assert!(recipe.patches.is_empty());
        assert!(recipe.requirements.host.is_empty());
        assert!(recipe.requirements.build.is_empty());
        assert!(recipe.build.script_env.is_empty());
        assert!(recipe.build.number.is_none());
        match recipe.source {
            SourceSection::Url(source) => {
                assert_eq!(source.strip, 1);
                assert!(source.sha256.is_none());
            }
            other => panic!("unexpected source: {other:?}"),
        }
    }

    #[test]
    fn test_numeric_version() {
        let recipe: Recipe = serde_yaml::from_str(
            "package:\n  name: lru-dict\n  version: 1.10\nsource: pypi\n",
        )
        .unwrap();
        assert_eq!(recipe.package.version, "1.1");

        let recipe: Recipe = serde_yaml::from_str(
            "package:\n  name: lru-dict\n  version: \"1.10\"\nsource: pypi\n",
        )
        .unwrap();
        assert_eq!(recipe.package.version, "1.10");
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let result: std::result::Result<Recipe, _> = serde_yaml::from_str(
            "package:\n  name: x\n  version: '1'\n  flavour: spicy\nsource: pypi\n",
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_pypi_source() {
        let recipe: Recipe =
            serde_yaml::from_str("package:\n  name: x\n  version: '1'\nsource: pypi\n").unwrap();
        assert!(matches!(recipe.source, SourceSection::Named(ref s) if s == "pypi"));
    }
}
