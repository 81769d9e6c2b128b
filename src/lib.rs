// src/lib.rs

//! Forge: cross-compile Python packages into wheels for mobile platforms
//!
//! Native libraries and Python packages are built from declarative recipes
//! for Android, iOS, tvOS and watchOS, one SDK/architecture target at a time.
//!
//! # Architecture
//!
//! - Recipes: templated `meta.yaml` documents resolved into immutable
//!   [`recipe::ResolvedPackage`] descriptors
//! - Cross environments: a crossenv pair of interpreters per target, with
//!   a toolchain derived from the target interpreter's sysconfig data
//! - Builders: an idempotent fetch/unpack/patch/install/compile pipeline
//!   with one log file per attempt
//! - External tools are always run through [`process::ProcessRunner`] with an
//!   explicit environment

pub mod builder;
pub mod config;
pub mod cross;
mod error;
pub mod index;
pub mod logger;
pub mod process;
pub mod recipe;

pub use builder::{BatchReport, BuildBatch, BuildState, BuildStrategy, Builder, Forge};
pub use config::ForgeConfig;
pub use cross::{CrossEnvironment, Interpreter, Target};
pub use error::{Error, Result};
pub use logger::BuildLog;
pub use recipe::{RecipeResolver, ResolvedPackage};
