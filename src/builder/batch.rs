// src/builder/batch.rs

//! Sequential builds over a (package, target) matrix
//!
//! One failed build never stops the batch; every pair ends up in the report.

use super::Forge;
use crate::cross::Target;
use crate::recipe::ResolvedPackage;
use std::fmt;
use std::path::PathBuf;
use tracing::{error, info};

/// Result of one (package, target) build
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildOutcome {
    pub name: String,
    pub version: String,
    pub tag: String,
    /// Produced wheel (successes) or relocated log (failures), when known
    pub path: Option<PathBuf>,
}

impl fmt::Display for BuildOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} ({})", self.name, self.version, self.tag)
    }
}

/// Aggregate result of a batch
#[derive(Debug, Clone, Default)]
pub struct BatchReport {
    pub succeeded: Vec<BuildOutcome>,
    pub failed: Vec<BuildOutcome>,
}

impl BatchReport {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty()
    }

    pub fn total(&self) -> usize {
        self.succeeded.len() + self.failed.len()
    }

    /// Whether `name` failed on any target
    pub fn has_failed(&self, name: &str) -> bool {
        self.failed.iter().any(|o| o.name == name)
    }
}

/// Runs every package on every target, one at a time
pub struct BuildBatch;

impl BuildBatch {
    /// Build each package for each target
    ///
    /// `clean` applies only to the first target of each package, so later
    /// targets reuse the freshly fetched archive.
    pub fn run(
        forge: &Forge,
        packages: &[ResolvedPackage],
        targets: &[Target],
        clean: bool,
    ) -> BatchReport {
        let mut report = BatchReport::default();

        for package in packages {
            for (index, target) in targets.iter().enumerate() {
                let mut outcome = BuildOutcome {
                    name: package.name.clone(),
                    version: package.version.clone(),
                    tag: target.tag(),
                    path: None,
                };

                let mut builder = match forge.builder(package, target.clone()) {
                    Ok(builder) => builder,
                    Err(e) => {
                        error!("Can't build {} for {}: {}", package, target, e);
                        report.failed.push(outcome);
                        continue;
                    }
                };

                if builder.build(clean && index == 0) {
                    info!("Built {} for {}", package, target);
                    outcome.path = builder.artifact().map(PathBuf::from);
                    report.succeeded.push(outcome);
                } else {
                    let log = builder.error_log_file_path();
                    error!(
                        "Failed to build {} for {}; see {}",
                        package,
                        target,
                        log.display()
                    );
                    outcome.path = Some(log);
                    report.failed.push(outcome);
                }
            }
        }
        report
    }
}
