//! Configuration module for provisioning runs.
//!
//! # Module Structure
//!
//! - `loader`: discovers, loads and saves `provision.toml`
//! - `validator`: semantic checks on a loaded configuration
//! - `profiles`: partition-table profiles and their filesystem offsets
//!
//! # Configuration Flow
//!
//! 1. `loader` finds and parses the config (or falls back to defaults)
//! 2. Relative paths are resolved against the config file's directory
//! 3. CLI flags override individual fields
//! 4. `validator` checks the result before any tool is invoked

pub mod loader;
pub mod profiles;
pub mod validator;

pub use profiles::PartitionProfile;

use crate::models::{ArtifactLayout, CredentialSet, ErasePolicy};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// External tools and how they are driven.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolchainConfig {
    /// Build/upload front-end (`version`, `run`, `-t upload`, `-t buildfs`)
    pub build_tool: String,
    /// Low-level flashing tool (`write_flash`, `erase_flash`)
    pub flash_tool: String,
    /// Baud rate used for the filesystem image transfer
    pub flash_baud: u32,
    /// Stage credentials and build the filesystem image after the firmware
    pub build_filesystem: bool,
    /// Build target producing the filesystem image
    pub filesystem_target: String,
    /// Directory inside the project packed into the filesystem image
    pub data_dir: PathBuf,
}

impl Default for ToolchainConfig {
    fn default() -> Self {
        ToolchainConfig {
            build_tool: "platformio".to_string(),
            flash_tool: "esptool.py".to_string(),
            flash_baud: 921_600,
            build_filesystem: true,
            filesystem_target: "buildfs".to_string(),
            data_dir: PathBuf::from("data"),
        }
    }
}

/// Per-operation timeouts, in seconds.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub version: u64,
    pub build: u64,
    pub erase: u64,
    pub upload: u64,
    pub filesystem: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        TimeoutConfig {
            version: 30,
            build: 900,
            erase: 120,
            upload: 300,
            filesystem: 300,
        }
    }
}

impl TimeoutConfig {
    /// Same limit for every operation.
    pub fn uniform(secs: u64) -> Self {
        TimeoutConfig {
            version: secs,
            build: secs,
            erase: secs,
            upload: secs,
            filesystem: secs,
        }
    }

    pub fn version(&self) -> Duration {
        Duration::from_secs(self.version)
    }

    pub fn build(&self) -> Duration {
        Duration::from_secs(self.build)
    }

    pub fn erase(&self) -> Duration {
        Duration::from_secs(self.erase)
    }

    pub fn upload(&self) -> Duration {
        Duration::from_secs(self.upload)
    }

    pub fn filesystem(&self) -> Duration {
        Duration::from_secs(self.filesystem)
    }
}

/// Everything a provisioning run needs besides the serial port.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisionConfig {
    /// Firmware project root; build and upload run with this working directory
    pub project_dir: PathBuf,
    /// Directory holding the credential files
    pub certs_dir: PathBuf,
    /// Session logs and the JSON run summary
    pub log_dir: PathBuf,
    /// Build environment (profile) of the firmware project
    pub build_env: String,
    /// Partition profile the firmware is built with
    pub partition_profile: String,
    /// What an erase failure does to the run
    pub erase_failure: ErasePolicy,
    /// Operator hints printed after a completed run
    pub next_steps: Vec<String>,
    pub toolchain: ToolchainConfig,
    pub artifacts: ArtifactLayout,
    pub timeouts: TimeoutConfig,
    /// Extra partition profiles, in addition to the built-in table
    pub partition_profiles: Vec<PartitionProfile>,
    /// Credentials required on the device, in upload order
    pub credentials: CredentialSet,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        ProvisionConfig {
            project_dir: PathBuf::from("hardware"),
            certs_dir: PathBuf::from("certificates"),
            log_dir: PathBuf::from("logs"),
            build_env: "esp32dev".to_string(),
            partition_profile: "huge_app".to_string(),
            erase_failure: ErasePolicy::Continue,
            next_steps: vec![
                "ESP32 should connect to WiFi and AWS IoT Core".to_string(),
                "Check for 'Connected to AWS IoT Core' message".to_string(),
            ],
            toolchain: ToolchainConfig::default(),
            artifacts: ArtifactLayout::default(),
            timeouts: TimeoutConfig::default(),
            partition_profiles: Vec::new(),
            credentials: CredentialSet::aws_iot_defaults(),
        }
    }
}

impl ProvisionConfig {
    /// Make relative directories absolute against `base`.
    pub fn resolve_paths(&mut self, base: &Path) {
        for dir in [&mut self.project_dir, &mut self.certs_dir, &mut self.log_dir] {
            if dir.is_relative() {
                let resolved = base.join(&*dir);
                *dir = resolved;
            }
        }
    }

    /// Make relative directories absolute against the current directory.
    ///
    /// Tools run in the project directory, so every path handed to them must
    /// stand on its own.
    pub fn make_absolute(&mut self) -> std::io::Result<()> {
        if [&self.project_dir, &self.certs_dir, &self.log_dir]
            .iter()
            .any(|dir| dir.is_relative())
        {
            let cwd = std::env::current_dir()?;
            self.resolve_paths(&cwd);
        }
        Ok(())
    }

    /// Resolve the configured partition profile.
    pub fn partition(&self) -> Result<PartitionProfile, crate::error::ConfigError> {
        profiles::resolve_profile(&self.partition_profile, &self.partition_profiles)
    }
}
