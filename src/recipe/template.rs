// src/recipe/template.rs

//! Minimal template rendering for recipe documents
//!
//! Recipes are YAML documents with a small set of template constructs:
//!
//! ```text
//! {% set version = "1.2.0" %}
//! package:
//!   name: widget
//!   version: {{ version }}
//! source:
//!   url: https://example.com/widget-{version}.tar.gz
//! ```
//!
//! Supported: `{% set name = <literal> %}` statements, `{{ expr }}`
//! substitutions where `expr` is a variable or literal optionally followed by
//! `| lower` / `| upper` filters, and `{# comments #}`. Single-brace
//! placeholders such as `{version}` are not template syntax; they are filled
//! in per target when the source URL is computed.

use crate::error::{Error, Result};
use regex::{NoExpand, Regex};
use std::collections::HashMap;
use std::sync::LazyLock;

static SET_VERSION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"\{%-?\s*set\s+version\s*=\s*(?:"[^"]*"|'[^']*')\s*-?%\}"#)
        .expect("static regex")
});

static SET_STATEMENT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^set\s+([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$").expect("static regex")
});

/// Rewrite every `{% set version = "..." %}` assignment to `version`
///
/// Applied to the raw text before rendering, so every field derived from
/// the template variable sees the override.
pub fn override_version(source: &str, version: &str) -> String {
    let replacement = format!("{{% set version = \"{version}\" %}}");
    SET_VERSION
        .replace_all(source, NoExpand(&replacement))
        .into_owned()
}

/// Render a recipe template
pub fn render(source: &str) -> Result<String> {
    let mut vars: HashMap<String, String> = HashMap::new();
    let mut out = String::with_capacity(source.len());
    let mut rest = source;

    while let Some(start) = next_tag(rest) {
        out.push_str(&rest[..start]);
        let tag = &rest[start..];
        let close = match &tag[..2] {
            "{{" => "}}",
            "{%" => "%}",
            _ => "#}",
        };

        let offset = source.len() - tag.len();
        let Some(end) = tag[2..].find(close) else {
            return Err(Error::TemplateRender(format!(
                "unterminated `{}` on line {}",
                &tag[..2],
                line_number(source, offset)
            )));
        };

        let body = tag[2..2 + end]
            .trim_start_matches('-')
            .trim_end_matches('-')
            .trim();
        let context = |msg: String| {
            Error::TemplateRender(format!("line {}: {}", line_number(source, offset), msg))
        };

        match close {
            "}}" => out.push_str(&evaluate(body, &vars).map_err(context)?),
            "%}" => execute(body, &mut vars).map_err(context)?,
            _ => {}
        }

        rest = &tag[2 + end + 2..];
    }

    out.push_str(rest);
    Ok(out)
}

/// Byte offset of the next `{{`, `{%` or `{#` in `text`
fn next_tag(text: &str) -> Option<usize> {
    text.match_indices('{')
        .map(|(i, _)| i)
        .find(|&i| matches!(text.as_bytes().get(i + 1), Some(b'{' | b'%' | b'#')))
}

fn line_number(source: &str, offset: usize) -> usize {
    source[..offset].matches('\n').count() + 1
}

fn execute(statement: &str, vars: &mut HashMap<String, String>) -> std::result::Result<(), String> {
    let Some(caps) = SET_STATEMENT.captures(statement) else {
        return Err(format!("unsupported statement `{statement}`"));
    };
    let value = evaluate(caps[2].trim(), vars)?;
    vars.insert(caps[1].to_string(), value);
    Ok(())
}

fn evaluate(expression: &str, vars: &HashMap<String, String>) -> std::result::Result<String, String> {
    let mut parts = expression.split('|').map(str::trim);
    let atom = parts.next().unwrap_or_default();
    let mut value = atom_value(atom, vars)?;

    for filter in parts {
        value = match filter {
            "lower" => value.to_lowercase(),
            "upper" => value.to_uppercase(),
            "trim" => value.trim().to_string(),
            other => return Err(format!("unknown filter `{other}`")),
        };
    }
    Ok(value)
}

fn atom_value(atom: &str, vars: &HashMap<String, String>) -> std::result::Result<String, String> {
    if atom.is_empty() {
        return Err("empty expression".to_string());
    }

    for quote in ['"', '\''] {
        if let Some(inner) = atom.strip_prefix(quote) {
            return inner
                .strip_suffix(quote)
                .map(str::to_string)
                .ok_or_else(|| format!("unterminated string literal {atom}"));
        }
    }

    if atom.chars().all(|c| c.is_ascii_digit() || c == '.') {
        return Ok(atom.to_string());
    }

    vars.get(atom)
        .cloned()
        .ok_or_else(|| format!("undefined variable `{atom}`"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_variables() {
        let source = r#"{% set name = "Widget" %}
{% set version = "1.2.0" %}
package:
  name: {{ name|lower }}
  version: {{ version }}
"#;
        let rendered = render(source).unwrap();
        assert!(rendered.contains("name: widget\n"));
        assert!(rendered.contains("version: 1.2.0\n"));
        assert!(!rendered.contains("{%"));
    }

    #[test]
    fn test_single_brace_placeholders_survive() {
        let source = "url: https://example.com/widget-{version}-{arch}.tar.gz\n";
        assert_eq!(render(source).unwrap(), source);
    }

    #[test]
    fn test_number_literal_and_comment() {
        let source = "{# build number #}{% set number = 3 %}number: {{ number }}";
        assert_eq!(render(source).unwrap(), "number: 3");
    }

    #[test]
    fn test_undefined_variable() {
        let err = render("version: {{ version }}").unwrap_err();
        assert!(matches!(err, Error::TemplateRender(_)));
        assert!(err.to_string().contains("undefined variable `version`"));
    }

    #[test]
    fn test_unknown_filter() {
        let err = render("{% set v = \"1\" %}{{ v | title }}").unwrap_err();
        assert!(err.to_string().contains("unknown filter `title`"));
    }

    #[test]
    fn test_unterminated_tag_reports_line() {
        let err = render("a: 1\nb: {{ version\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn test_unsupported_statement() {
        let err = render("{% for x in y %}").unwrap_err();
        assert!(err.to_string().contains("unsupported statement"));
    }

    #[test]
    fn test_override_version() {
        let source = "{% set version = \"1.2.0\" %}\n{% set name = \"widget\" %}\nv: {{ version }}\n";
        let rewritten = override_version(source, "1.3.0");
        assert!(rewritten.contains("{% set version = \"1.3.0\" %}"));
        assert!(rewritten.contains("{% set name = \"widget\" %}"));
        assert_eq!(render(&rewritten).unwrap().trim(), "v: 1.3.0");
    }

    #[test]
    fn test_override_without_assignment_is_noop() {
        let source = "package:\n  version: 1.2.0\n";
        assert_eq!(override_version(source, "9.9"), source);
    }
}
