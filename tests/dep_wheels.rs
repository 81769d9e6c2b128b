// tests/dep_wheels.rs

//! Integration tests for packaging the support tree's bundled libraries.

mod common;

use common::{FakeRunner, Workspace, interpreter};
use forge::builder::{DepWheel, DepWheelBuilder};
use forge::cross::OperatingSystem;
use forge::logger::BuildLog;
use std::fs;

const VERSIONS: &str = "\
Python version: 3.11.4
Min iOS version: 13.0
BZip2: 1.0.8-1
XZ: 5.4.7-1
libFFI: 3.4.6-1
OpenSSL: 3.0.15-1
";

const SLICES: [&str; 3] = ["iphoneos.arm64", "iphonesimulator.arm64", "iphonesimulator.x86_64"];
const INSTALLS: [(&str, &str); 4] = [
    ("bzip2-1.0.8-1", "bz2"),
    ("xz-5.4.7-1", "lzma"),
    ("libffi-3.4.6-1", "ffi"),
    ("openssl-3.0.15-1", "ssl"),
];

fn support_tree(workspace: &Workspace) {
    let versions = workspace.root().join("support/3.11/iOS/VERSIONS");
    fs::create_dir_all(versions.parent().unwrap()).unwrap();
    fs::write(versions, VERSIONS).unwrap();

    for slice in SLICES {
        for (install, lib) in INSTALLS {
            let prefix = workspace.root().join("install/iOS").join(slice).join(install);
            fs::create_dir_all(prefix.join("lib")).unwrap();
            fs::create_dir_all(prefix.join("include")).unwrap();
            fs::write(prefix.join(format!("lib/lib{lib}.a")), slice).unwrap();
            fs::write(prefix.join(format!("include/{lib}.h")), "").unwrap();
        }
    }
}

#[test]
fn test_packages_every_library_for_every_slice() {
    let workspace = Workspace::new(&[]);
    support_tree(&workspace);
    let runner = FakeRunner::default();
    let config = workspace.config();
    let python = interpreter();

    let wheels = DepWheelBuilder::new(&config, &python, &runner)
        .build_all(&mut BuildLog::console(), OperatingSystem::Ios)
        .unwrap();
    assert_eq!(wheels.len(), 12);
    assert!(wheels.iter().all(|w| matches!(w, DepWheel::Built(_))));

    let dist = workspace.root().join("dist");
    assert_eq!(
        wheels[0].path(),
        dist.join("bzip2-1.0.8-1-py3-none-ios_13_0_arm64_iphoneos.whl")
    );
    assert_eq!(
        wheels[11].path(),
        dist.join("openssl-3.0.15-1-py3-none-ios_13_0_x86_64_iphonesimulator.whl")
    );
    for wheel in &wheels {
        assert!(wheel.path().is_file(), "{}", wheel.path().display());
    }

    let packs = runner.commands_with("pack");
    assert_eq!(packs.len(), 12);
    assert_eq!(packs[0].program, "/usr/bin/python3");
    let dist_arg = dist.display().to_string();
    assert_eq!(packs[0].args[..5], ["-m", "wheel", "pack", "--dest-dir", dist_arg.as_str()]);

    // The install tree lands under opt/ beside the generated metadata
    let packed = runner.packed.lock().unwrap();
    let bzip2 = &packed[0];
    assert_eq!(bzip2["opt/lib/libbz2.a"], "iphoneos.arm64");
    assert!(bzip2.contains_key("opt/include/bz2.h"));
    let wheel = &bzip2["bzip2-1.0.8.dist-info/WHEEL"];
    assert!(wheel.contains("Build: 1\n"));
    assert!(wheel.contains("Tag: py3-none-ios_13_0_arm64_iphoneos\n"));
    let metadata = &bzip2["bzip2-1.0.8.dist-info/METADATA"];
    assert!(metadata.contains("Name: bzip2\n"));
    assert!(metadata.contains("Version: 1.0.8\n"));
    assert_eq!(packed[11]["opt/lib/libssl.a"], "iphonesimulator.x86_64");

    // Staging directories don't outlive the run
    let leftovers = fs::read_dir(workspace.root().join("build")).unwrap().count();
    assert_eq!(leftovers, 0);
}

#[test]
fn test_existing_wheels_are_skipped() {
    let workspace = Workspace::new(&[]);
    support_tree(&workspace);
    let runner = FakeRunner::default();
    let config = workspace.config();
    let python = interpreter();
    let builder = DepWheelBuilder::new(&config, &python, &runner);

    builder.build_all(&mut BuildLog::console(), OperatingSystem::Ios).unwrap();
    runner.clear();

    let wheels = builder.build_all(&mut BuildLog::console(), OperatingSystem::Ios).unwrap();
    assert_eq!(wheels.len(), 12);
    assert!(wheels.iter().all(|w| matches!(w, DepWheel::Existing(_))));
    assert!(runner.commands().is_empty());
}

#[test]
fn test_missing_install_fails() {
    let workspace = Workspace::new(&[]);
    support_tree(&workspace);
    fs::remove_dir_all(workspace.root().join("install/iOS/iphonesimulator.arm64/xz-5.4.7-1")).unwrap();
    let runner = FakeRunner::default();
    let config = workspace.config();
    let python = interpreter();

    let err = DepWheelBuilder::new(&config, &python, &runner)
        .build_all(&mut BuildLog::console(), OperatingSystem::Ios)
        .unwrap_err();
    assert!(err.to_string().contains("no XZ install"), "{err}");
    // Everything before the gap was packaged
    assert_eq!(runner.commands_with("pack").len(), 5);
}

#[test]
fn test_android_has_no_support_libraries() {
    let workspace = Workspace::new(&[]);
    let runner = FakeRunner::default();
    let config = workspace.config();
    let python = interpreter();

    let err = DepWheelBuilder::new(&config, &python, &runner)
        .build_all(&mut BuildLog::console(), OperatingSystem::Android)
        .unwrap_err();
    assert!(matches!(err, forge::Error::InvalidTarget(_)));
}
