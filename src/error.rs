//! Unified error type hierarchy for certflash
//!
//! Provides structured error handling with ProvisionError (the pipeline
//! taxonomy), ConfigError, ToolError and AppError.

use crate::models::StageKind;
use std::io;
use std::time::Duration;
use thiserror::Error;

/// Which half of a filesystem upload went wrong.
///
/// The remedies differ: a missing image is a build problem, a failed write is
/// a flashing-tool problem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FilesystemGap {
    ImageMissing,
    UploadFailed,
}

/// Coarse classification of a [`ProvisionError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
pub enum ErrorKind {
    FatalPrerequisite,
    FatalBuild,
    FatalFlash,
    RecoverableFilesystemUpload,
    NonFatalErase,
    Interrupted,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::FatalPrerequisite => "fatal_prerequisite",
            ErrorKind::FatalBuild => "fatal_build",
            ErrorKind::FatalFlash => "fatal_flash",
            ErrorKind::RecoverableFilesystemUpload => "recoverable_filesystem_upload",
            ErrorKind::NonFatalErase => "non_fatal_erase",
            ErrorKind::Interrupted => "interrupted",
        }
    }
}

/// Provisioning pipeline errors.
///
/// Every variant keeps the captured standard error of the external tool that
/// produced it (empty when no tool was involved) so it can be surfaced
/// verbatim to the operator.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProvisionError {
    #[error("Prerequisite check failed: {reason}")]
    FatalPrerequisite {
        reason: String,
        /// Names of the missing tools or credential files.
        missing: Vec<String>,
        stderr: String,
        remedy: Option<String>,
    },

    #[error("Build failed: {reason}")]
    FatalBuild { reason: String, stderr: String },

    #[error("Firmware upload failed: {reason}")]
    FatalFlash {
        reason: String,
        stderr: String,
        remedy: Option<String>,
    },

    #[error("Filesystem upload incomplete: {reason}")]
    RecoverableFilesystemUpload {
        gap: FilesystemGap,
        reason: String,
        stderr: String,
        remedy: String,
    },

    #[error("Flash erase failed: {reason}")]
    NonFatalErase { reason: String, stderr: String },

    #[error("Interrupted during {stage}")]
    Interrupted { stage: StageKind },
}

impl ProvisionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ProvisionError::FatalPrerequisite { .. } => ErrorKind::FatalPrerequisite,
            ProvisionError::FatalBuild { .. } => ErrorKind::FatalBuild,
            ProvisionError::FatalFlash { .. } => ErrorKind::FatalFlash,
            ProvisionError::RecoverableFilesystemUpload { .. } => {
                ErrorKind::RecoverableFilesystemUpload
            }
            ProvisionError::NonFatalErase { .. } => ErrorKind::NonFatalErase,
            ProvisionError::Interrupted { .. } => ErrorKind::Interrupted,
        }
    }

    /// Fatal kinds stop the pipeline; the others are logged and the run continues.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            ProvisionError::RecoverableFilesystemUpload { .. } | ProvisionError::NonFatalErase { .. }
        )
    }

    /// Captured standard error of the originating tool, if any.
    pub fn stderr(&self) -> &str {
        match self {
            ProvisionError::FatalPrerequisite { stderr, .. }
            | ProvisionError::FatalBuild { stderr, .. }
            | ProvisionError::FatalFlash { stderr, .. }
            | ProvisionError::RecoverableFilesystemUpload { stderr, .. }
            | ProvisionError::NonFatalErase { stderr, .. } => stderr,
            ProvisionError::Interrupted { .. } => "",
        }
    }

    /// Operator-facing remediation text, if one is known.
    pub fn remedy(&self) -> Option<&str> {
        match self {
            ProvisionError::FatalPrerequisite { remedy, .. }
            | ProvisionError::FatalFlash { remedy, .. } => remedy.as_deref(),
            ProvisionError::RecoverableFilesystemUpload { remedy, .. } => Some(remedy),
            _ => None,
        }
    }
}

/// Failures invoking an external tool, below the level of a pipeline stage.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ToolError {
    #[error("'{program}' not found on PATH")]
    NotFound { program: String },

    #[error("Failed to start '{program}': {reason}")]
    Spawn { program: String, reason: String },

    #[error("'{program}' did not finish within {}s", .after.as_secs())]
    TimedOut { program: String, after: Duration },

    #[error("'{program}' cancelled by user")]
    Cancelled { program: String },
}

/// Configuration file parsing and validation errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Invalid TOML in config: {0}")]
    InvalidToml(#[from] toml::de::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Configuration validation failed: {0}")]
    ValidationFailed(String),

    #[error("Conflicting settings detected: {0}")]
    ConflictDetected(String),

    #[error("IO error during config operations: {0}")]
    IoError(#[from] io::Error),
}

/// Errors outside the pipeline itself (input validation, run summary output).
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Invalid operator input (e.g. a serial port with shell characters)
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// File I/O error (read/write/delete)
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provision_error_display() {
        let err = ProvisionError::FatalBuild {
            reason: "platformio exited with code 1".to_string(),
            stderr: "undefined reference".to_string(),
        };
        assert_eq!(err.to_string(), "Build failed: platformio exited with code 1");
        assert_eq!(err.stderr(), "undefined reference");
    }

    #[test]
    fn test_fatality_follows_taxonomy() {
        let fs = ProvisionError::RecoverableFilesystemUpload {
            gap: FilesystemGap::ImageMissing,
            reason: "missing".to_string(),
            stderr: String::new(),
            remedy: "build it".to_string(),
        };
        let erase = ProvisionError::NonFatalErase {
            reason: "timeout".to_string(),
            stderr: String::new(),
        };
        let flash = ProvisionError::FatalFlash {
            reason: "no ack".to_string(),
            stderr: String::new(),
            remedy: None,
        };
        let interrupted = ProvisionError::Interrupted {
            stage: StageKind::Build,
        };

        assert!(!fs.is_fatal());
        assert!(!erase.is_fatal());
        assert!(flash.is_fatal());
        assert!(interrupted.is_fatal());
        assert_eq!(fs.kind(), ErrorKind::RecoverableFilesystemUpload);
        assert_eq!(fs.remedy(), Some("build it"));
    }

    #[test]
    fn test_tool_error_display() {
        let err = ToolError::TimedOut {
            program: "esptool.py".to_string(),
            after: Duration::from_secs(30),
        };
        assert_eq!(err.to_string(), "'esptool.py' did not finish within 30s");
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::FileNotFound("/etc/provision.toml".to_string());
        assert_eq!(
            err.to_string(),
            "Configuration file not found: /etc/provision.toml"
        );
    }
}
