// src/error.rs

//! Error types for the forge
//!
//! Errors fall into three groups that the batch driver treats differently:
//! - Resolution-time (recipe lookup, template, schema): fatal to the whole run
//! - Environment-time (creating or verifying a cross environment)
//! - Build-time (download, unpack, patch, dependency install, commands)
//!
//! Environment and build errors are caught at the single-attempt boundary
//! and turned into a failed result so the rest of the batch keeps going.

use std::path::PathBuf;
use thiserror::Error;

/// Result type for forge operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while resolving recipes and building wheels
#[derive(Error, Debug)]
pub enum Error {
    /// Recipe directory or document is missing
    #[error("{0} does not appear to be a valid recipe")]
    RecipeNotFound(String),

    /// Rendered recipe does not match the recipe schema
    #[error("recipe validation failed: {0}")]
    SchemaValidation(String),

    /// Variable substitution in the raw recipe failed
    #[error("recipe template error: {0}")]
    TemplateRender(String),

    /// A cross environment already exists and a clean rebuild was not requested
    #[error("environment {0} already exists")]
    EnvironmentAlreadyExists(String),

    /// One of the environment's interpreters reported the wrong identity
    #[error("environment verification failed: {0}")]
    EnvironmentVerification(String),

    /// The cross environment could not be created or inspected
    #[error("environment error: {0}")]
    Environment(String),

    /// Source download failed
    #[error("download failed: {0}")]
    Download(String),

    /// Downloaded source does not match the recipe checksum
    #[error("checksum mismatch for {}: expected {expected}, got {actual}", .path.display())]
    ChecksumMismatch {
        path: PathBuf,
        expected: String,
        actual: String,
    },

    /// Source archive could not be identified or extracted
    #[error("archive error: {0}")]
    ArchiveFormat(String),

    /// A patch did not apply cleanly
    #[error("failed to apply patch {}: {source}", .patch.display())]
    PatchApplication {
        patch: PathBuf,
        #[source]
        source: Box<Error>,
    },

    /// Installing requirements into the cross environment failed
    #[error("failed to install {packages}: {source}")]
    DependencyInstall {
        packages: String,
        #[source]
        source: Box<Error>,
    },

    /// An external command exited unsuccessfully
    #[error("command `{command}` failed with {}", exit_description(.code))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        /// Last lines of combined output
        tail: Vec<String>,
    },

    /// A target triple string could not be parsed
    #[error("invalid target: {0}")]
    InvalidTarget(String),

    /// Package index lookup failed
    #[error("package index error: {0}")]
    Index(String),

    /// Configuration file or environment is invalid
    #[error("configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

fn exit_description(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("exit code {code}"),
        None => "no exit code (terminated by signal)".to_string(),
    }
}

impl Error {
    /// Whether this error means no valid build plan exists
    ///
    /// Resolution errors abort the whole run before any build starts.
    pub fn is_resolution_error(&self) -> bool {
        matches!(
            self,
            Error::RecipeNotFound(_) | Error::SchemaValidation(_) | Error::TemplateRender(_)
        )
    }

    /// Exit code of a failed command, if this error carries one
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            Error::CommandFailed { code, .. } => *code,
            Error::PatchApplication { source, .. } | Error::DependencyInstall { source, .. } => {
                source.exit_code()
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_errors() {
        assert!(Error::RecipeNotFound("x".into()).is_resolution_error());
        assert!(Error::SchemaValidation("x".into()).is_resolution_error());
        assert!(Error::TemplateRender("x".into()).is_resolution_error());
        assert!(!Error::Download("x".into()).is_resolution_error());
        assert!(!Error::EnvironmentVerification("x".into()).is_resolution_error());
    }

    #[test]
    fn test_command_failed_display() {
        let err = Error::CommandFailed {
            command: "make -j4".to_string(),
            code: Some(2),
            tail: vec!["error: boom".to_string()],
        };
        assert_eq!(err.to_string(), "command `make -j4` failed with exit code 2");
        assert_eq!(err.exit_code(), Some(2));
    }

    #[test]
    fn test_exit_code_through_wrappers() {
        let inner = Error::CommandFailed {
            command: "patch".to_string(),
            code: Some(1),
            tail: Vec::new(),
        };
        let err = Error::PatchApplication {
            patch: PathBuf::from("fix.patch"),
            source: Box::new(inner),
        };
        assert_eq!(err.exit_code(), Some(1));
        assert!(err.to_string().contains("fix.patch"));
    }
}
