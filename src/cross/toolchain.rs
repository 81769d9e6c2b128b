// src/cross/toolchain.rs

//! Compiler configuration derived from the target interpreter's build
//! description
//!
//! The target interpreter's sysconfig data records the compiler and flags
//! used to build it. Those flags carry residue from the machine that built
//! the support tree (stale dependency include paths, a baked-in SDK root), so
//! they are normalized before use.

use regex::{NoExpand, Regex};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

/// Sysconfig variables the toolchain is derived from
pub const SYSCONFIG_KEYS: [&str; 5] = ["AR", "CC", "CXX", "CFLAGS", "LDFLAGS"];

/// Python snippet printing the sysconfig variables as a JSON object
pub const SYSCONFIG_SCRIPT: &str = "import json, sysconfig; \
     print(json.dumps({k: sysconfig.get_config_var(k) or '' \
     for k in ('AR', 'CC', 'CXX', 'CFLAGS', 'LDFLAGS')}))";

static STALE_INCLUDE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"-I\S*/merge/\S*/(?:bzip2|xz)-[^/\s]*/include\S*").expect("static regex")
});

static SYSROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"--sysroot=\S+").expect("static regex"));

static ISYSROOT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"-isysroot\s+\S+").expect("static regex"));

/// Cached environment state the toolchain is derived from
#[derive(Debug, Clone, Copy)]
pub struct ToolchainInputs<'a> {
    pub sysconfig: &'a BTreeMap<String, String>,
    pub install_root: &'a Path,
    pub sdk_root: &'a Path,
    /// Directory holding `Python.framework` (Apple targets)
    pub framework_path: Option<&'a Path>,
}

/// Drop include paths pointing at another build's dependency trees
pub fn strip_stale_includes(flags: &str) -> String {
    STALE_INCLUDE.replace_all(flags, "").into_owned()
}

/// Point `--sysroot=` and `-isysroot` at the current SDK root
pub fn rewrite_sysroot(flags: &str, sdk_root: &Path) -> String {
    let sdk_root = sdk_root.display().to_string();
    let flags = SYSROOT.replace_all(flags, NoExpand(&format!("--sysroot={sdk_root}")));
    ISYSROOT
        .replace_all(&flags, NoExpand(&format!("-isysroot {sdk_root}")))
        .into_owned()
}

fn squash_whitespace(flags: &str) -> String {
    flags.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn append(flags: &mut String, extra: &str) {
    if extra.trim().is_empty() {
        return;
    }
    if !flags.is_empty() {
        flags.push(' ');
    }
    flags.push_str(extra.trim());
}

/// Derive `AR`, `CC`, `CXX`, `CFLAGS`, `CXXFLAGS`, `LDFLAGS` and
/// `INSTALL_ROOT`, then merge `extra`
///
/// Extra `CFLAGS` (which also reach `CXXFLAGS`) and `LDFLAGS` are appended;
/// every other extra key is inserted as-is. Include and library paths are
/// only added for directories that exist.
pub fn derive(inputs: ToolchainInputs<'_>, extra: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let var = |key: &str| inputs.sysconfig.get(key).cloned().unwrap_or_default();
    let install_root = inputs.install_root;
    let sdk_root = inputs.sdk_root;

    let mut cflags = squash_whitespace(&rewrite_sysroot(
        &strip_stale_includes(&var("CFLAGS")),
        sdk_root,
    ));
    if install_root.join("include").is_dir() {
        append(&mut cflags, &format!("-I{}/include", install_root.display()));
    }
    if sdk_root.join("usr/include").is_dir() {
        append(&mut cflags, &format!("-I{}/usr/include", sdk_root.display()));
    }
    if let Some(extra_cflags) = extra.get("CFLAGS") {
        append(&mut cflags, extra_cflags);
    }

    let mut ldflags = squash_whitespace(&rewrite_sysroot(&var("LDFLAGS"), sdk_root));
    if let Some(framework_path) = inputs.framework_path {
        append(&mut ldflags, &format!("-F \"{}\"", framework_path.display()));
    }
    if install_root.join("lib").is_dir() {
        append(&mut ldflags, &format!("-L{}/lib", install_root.display()));
    }
    if sdk_root.join("usr/lib").is_dir() {
        append(&mut ldflags, &format!("-L{}/usr/lib", sdk_root.display()));
    }
    if let Some(extra_ldflags) = extra.get("LDFLAGS") {
        append(&mut ldflags, extra_ldflags);
    }

    let mut env = BTreeMap::new();
    env.insert("AR".to_string(), var("AR"));
    env.insert("CC".to_string(), var("CC"));
    env.insert("CXX".to_string(), var("CXX"));
    env.insert("CFLAGS".to_string(), cflags.clone());
    env.insert("CXXFLAGS".to_string(), cflags);
    env.insert("LDFLAGS".to_string(), ldflags);
    env.insert(
        "INSTALL_ROOT".to_string(),
        install_root.display().to_string(),
    );

    for (key, value) in extra {
        if key != "CFLAGS" && key != "LDFLAGS" {
            env.insert(key.clone(), value.clone());
        }
    }
    env
}
