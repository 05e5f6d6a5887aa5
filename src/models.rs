//! Core data types for certflash.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

use crate::error::AppError;

/// One credential file and the path it must occupy on the device filesystem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialEntry {
    /// File name inside the local certificates directory
    pub file: String,
    /// Absolute destination inside the device filesystem image
    pub destination: String,
}

impl CredentialEntry {
    pub fn new(file: impl Into<String>, destination: impl Into<String>) -> Self {
        CredentialEntry {
            file: file.into(),
            destination: destination.into(),
        }
    }
}

/// Ordered, read-only mapping of credential file name to on-device destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct CredentialSet {
    entries: Vec<CredentialEntry>,
}

impl CredentialSet {
    pub fn new(entries: Vec<CredentialEntry>) -> Self {
        CredentialSet { entries }
    }

    /// Client certificate, private key and root CA for the relay device.
    pub fn aws_iot_defaults() -> Self {
        CredentialSet::new(
            [
                "esp32-relay-01-certificate.pem.crt",
                "esp32-relay-01-private.pem.key",
                "AmazonRootCA1.pem",
            ]
            .iter()
            .map(|name| CredentialEntry::new(*name, format!("/{}", name)))
            .collect(),
        )
    }

    pub fn entries(&self) -> &[CredentialEntry] {
        &self.entries
    }

    pub fn iter(&self) -> impl Iterator<Item = &CredentialEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A credential that passed the prerequisite check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CredentialFile {
    pub entry: CredentialEntry,
    pub path: PathBuf,
    pub size: u64,
}

/// The physical device endpoint and the build environment that targets it.
///
/// Supplied once per run and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTarget {
    port: String,
    build_env: String,
}

impl DeviceTarget {
    pub fn new(port: &str, build_env: &str) -> Result<Self, AppError> {
        crate::system::validate_port(port)?;
        if build_env.trim().is_empty() {
            return Err(AppError::InvalidInput(
                "Build environment name cannot be empty".to_string(),
            ));
        }
        Ok(DeviceTarget {
            port: port.to_string(),
            build_env: build_env.to_string(),
        })
    }

    pub fn port(&self) -> &str {
        &self.port
    }

    pub fn build_env(&self) -> &str {
        &self.build_env
    }
}

/// Where the build toolchain leaves its outputs, relative to the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArtifactLayout {
    pub build_root: PathBuf,
    pub firmware_image: String,
    pub filesystem_image: String,
}

impl Default for ArtifactLayout {
    fn default() -> Self {
        ArtifactLayout {
            build_root: PathBuf::from(".pio/build"),
            firmware_image: "firmware.bin".to_string(),
            filesystem_image: "spiffs.bin".to_string(),
        }
    }
}

/// Firmware and filesystem image paths for one build environment.
///
/// Located by convention under the build output tree; the orchestrator only
/// ever receives paths through this value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BuildArtifacts {
    pub firmware: PathBuf,
    pub filesystem_image: PathBuf,
    /// Set when this run tried and failed to produce a fresh filesystem image
    pub filesystem_failure: Option<FilesystemBuildFailure>,
}

/// Why the filesystem image of this run could not be built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilesystemBuildFailure {
    pub reason: String,
    pub stderr: String,
}

impl BuildArtifacts {
    pub fn locate(project_dir: &Path, layout: &ArtifactLayout, build_env: &str) -> Self {
        let env_dir = project_dir.join(&layout.build_root).join(build_env);
        BuildArtifacts {
            firmware: env_dir.join(&layout.firmware_image),
            filesystem_image: env_dir.join(&layout.filesystem_image),
            filesystem_failure: None,
        }
    }
}

/// What to do when the optional erase stage fails.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "snake_case")]
pub enum ErasePolicy {
    /// Report the failure and keep going
    #[default]
    Continue,
    /// Treat the failure like any other fatal stage error
    Abort,
}

/// Discrete stages of a provisioning run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Prerequisites,
    Erase,
    Build,
    FirmwareUpload,
    FilesystemUpload,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            StageKind::Prerequisites => "prerequisites",
            StageKind::Erase => "erase",
            StageKind::Build => "build",
            StageKind::FirmwareUpload => "firmware upload",
            StageKind::FilesystemUpload => "filesystem upload",
        }
    }
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How a stage ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    Succeeded,
    Skipped,
    /// Failed, but the pipeline continued
    Warned,
    Failed,
}

/// Outcome of one stage, kept for the final summary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StageRecord {
    pub stage: StageKind,
    pub status: StageStatus,
    pub duration_ms: u64,
    pub detail: Option<String>,
}
