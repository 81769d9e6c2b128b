// src/recipe/parser.rs

//! Recipe document parsing and validation

use crate::error::{Error, Result};
use crate::recipe::format::{Recipe, SourceSection};
use crate::recipe::template;
use std::path::Path;

/// Recipe document file name inside a recipe directory
pub const RECIPE_FILE: &str = "meta.yaml";

/// Parse a rendered recipe document
pub fn parse_recipe(content: &str) -> Result<Recipe> {
    serde_yaml::from_str(content)
        .map_err(|e| Error::SchemaValidation(format!("invalid recipe: {}", e)))
}

/// Read, render and parse the recipe in `recipe_dir`
///
/// With a version override, `{% set version = ... %}` assignments are
/// rewritten before rendering.
pub fn load_recipe(recipe_dir: &Path, version_override: Option<&str>) -> Result<Recipe> {
    let path = recipe_dir.join(RECIPE_FILE);
    let mut raw = std::fs::read_to_string(&path)?;
    if let Some(version) = version_override {
        raw = template::override_version(&raw, version);
    }

    let rendered = template::render(&raw)?;
    let recipe = parse_recipe(&rendered)?;
    validate_recipe(&recipe)?;
    Ok(recipe)
}

/// Semantic checks that the document schema cannot express
pub fn validate_recipe(recipe: &Recipe) -> Result<()> {
    if recipe.package.name.trim().is_empty() {
        return Err(Error::SchemaValidation(
            "package name cannot be empty".to_string(),
        ));
    }
    if recipe.package.version.trim().is_empty() {
        return Err(Error::SchemaValidation(
            "package version cannot be empty".to_string(),
        ));
    }

    match &recipe.source {
        SourceSection::Named(name) if name != "pypi" => {
            return Err(Error::SchemaValidation(format!(
                "unknown source `{name}`; expected `pypi` or a url mapping"
            )));
        }
        SourceSection::Url(source) => {
            if source.url.trim().is_empty() {
                return Err(Error::SchemaValidation("source url cannot be empty".to_string()));
            }
            if let Some(sha256) = &source.sha256
                && (sha256.len() != 64 || !sha256.chars().all(|c| c.is_ascii_hexdigit()))
            {
                return Err(Error::SchemaValidation(format!(
                    "source sha256 `{sha256}` is not a 64-character hex digest"
                )));
            }
        }
        SourceSection::Named(_) => {}
    }

    for line in &recipe.build.script_env {
        match line.split_once('=') {
            Some((key, _)) if !key.trim().is_empty() => {}
            _ => {
                return Err(Error::SchemaValidation(format!(
                    "script_env entry `{line}` is not KEY=VALUE"
                )));
            }
        }
    }

    for patch in &recipe.patches {
        let path = Path::new(patch);
        if patch.is_empty() || path.is_absolute() || patch.split('/').any(|c| c == "..") {
            return Err(Error::SchemaValidation(format!(
                "patch `{patch}` must be a relative path inside the recipe's patches directory"
            )));
        }
    }

    for (phase, entries) in [
        ("host", &recipe.requirements.host),
        ("build", &recipe.requirements.build),
    ] {
        if let Some(entry) = entries.iter().find(|e| e.trim().is_empty()) {
            return Err(Error::SchemaValidation(format!(
                "empty {phase} requirement `{entry}`"
            )));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const WIDGET: &str = r#"
package:
  name: widget
  version: "1.2.0"
source:
  url: https://example.com/widget-{version}.tar.gz
build:
  number: 2
  script_env:
    - CFLAGS=-DNDEBUG=1
requirements:
  build:
    - cmake
patches:
  - fix-ios.patch
"#;

    #[test]
    fn test_parse_valid_recipe() {
        let recipe = parse_recipe(WIDGET).unwrap();
        validate_recipe(&recipe).unwrap();
        assert_eq!(recipe.build.number, Some(2));
        assert_eq!(recipe.patches, vec!["fix-ios.patch"]);
    }

    #[test]
    fn test_missing_package_section() {
        let err = parse_recipe("source: pypi\n").unwrap_err();
        assert!(matches!(err, Error::SchemaValidation(_)));
    }

    #[test]
    fn test_unknown_named_source() {
        let recipe =
            parse_recipe("package:\n  name: x\n  version: '1'\nsource: conda\n").unwrap();
        assert!(matches!(
            validate_recipe(&recipe),
            Err(Error::SchemaValidation(_))
        ));
    }

    #[test]
    fn test_bad_script_env_line() {
        let recipe = parse_recipe(
            "package:\n  name: x\n  version: '1'\nsource: pypi\nbuild:\n  script_env:\n    - NOEQUALS\n",
        )
        .unwrap();
        let err = validate_recipe(&recipe).unwrap_err();
        assert!(err.to_string().contains("NOEQUALS"));
    }

    #[test]
    fn test_absolute_patch_rejected() {
        let recipe = parse_recipe(
            "package:\n  name: x\n  version: '1'\nsource: pypi\npatches:\n  - /etc/passwd\n",
        )
        .unwrap();
        assert!(validate_recipe(&recipe).is_err());

        let recipe = parse_recipe(
            "package:\n  name: x\n  version: '1'\nsource: pypi\npatches:\n  - ../escape.patch\n",
        )
        .unwrap();
        assert!(validate_recipe(&recipe).is_err());
    }

    #[test]
    fn test_bad_checksum() {
        let recipe = parse_recipe(
            "package:\n  name: x\n  version: '1'\nsource:\n  url: https://x/y.tar.gz\n  sha256: abc\n",
        )
        .unwrap();
        assert!(validate_recipe(&recipe).is_err());
    }

    #[test]
    fn test_load_recipe_with_override() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(RECIPE_FILE),
            "{% set version = \"1.2.0\" %}\npackage:\n  name: widget\n  version: \"{{ version }}\"\nsource: pypi\n",
        )
        .unwrap();

        let recipe = load_recipe(dir.path(), None).unwrap();
        assert_eq!(recipe.package.version, "1.2.0");

        let recipe = load_recipe(dir.path(), Some("1.3.0")).unwrap();
        assert_eq!(recipe.package.version, "1.3.0");
    }
}
