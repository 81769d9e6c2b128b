// src/commands/mod.rs
//! Command handlers for the forge CLI

mod build;
mod dep_wheels;

pub use build::cmd_build;
pub use dep_wheels::cmd_dep_wheels;
