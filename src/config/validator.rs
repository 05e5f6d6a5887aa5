//! Configuration validation.
//!
//! Catches statically detectable mistakes before any tool runs, so a bad
//! config can never leave a device half-provisioned.

use super::ProvisionConfig;
use crate::error::ConfigError;
use std::collections::HashSet;

/// Validate a fully loaded (and CLI-overridden) configuration.
pub fn validate_config(config: &ProvisionConfig) -> Result<(), ConfigError> {
    if config.build_env.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Build environment cannot be empty".to_string(),
        ));
    }

    validate_credentials(config)?;
    validate_toolchain(config)?;
    validate_timeouts(config)?;

    // Unknown or conflicting partition profiles
    config.partition()?;

    Ok(())
}

fn validate_credentials(config: &ProvisionConfig) -> Result<(), ConfigError> {
    if config.credentials.is_empty() {
        return Err(ConfigError::ValidationFailed(
            "At least one credential file must be configured".to_string(),
        ));
    }

    let mut seen_files = HashSet::new();
    let mut seen_destinations = HashSet::new();

    for entry in config.credentials.iter() {
        if entry.file.is_empty()
            || entry.file.contains('/')
            || entry.file.contains('\\')
            || entry.file == ".."
            || entry.file == "."
        {
            return Err(ConfigError::ValidationFailed(format!(
                "Credential file must be a plain file name: '{}'",
                entry.file
            )));
        }

        if !entry.destination.starts_with('/') || entry.destination.split('/').any(|c| c == "..") {
            return Err(ConfigError::ValidationFailed(format!(
                "Credential destination must be an absolute device path: '{}'",
                entry.destination
            )));
        }

        if !seen_files.insert(entry.file.as_str()) {
            return Err(ConfigError::ConflictDetected(format!(
                "Credential file listed twice: {}",
                entry.file
            )));
        }

        if !seen_destinations.insert(entry.destination.as_str()) {
            return Err(ConfigError::ConflictDetected(format!(
                "Two credentials share the destination {}",
                entry.destination
            )));
        }
    }

    Ok(())
}

fn validate_toolchain(config: &ProvisionConfig) -> Result<(), ConfigError> {
    let toolchain = &config.toolchain;

    if toolchain.build_tool.trim().is_empty() || toolchain.flash_tool.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Build and flash tool names cannot be empty".to_string(),
        ));
    }

    if toolchain.flash_baud == 0 {
        return Err(ConfigError::ValidationFailed(
            "Flash baud rate must be greater than zero".to_string(),
        ));
    }

    if toolchain.build_filesystem && toolchain.filesystem_target.trim().is_empty() {
        return Err(ConfigError::ValidationFailed(
            "Filesystem build target cannot be empty when build_filesystem is set".to_string(),
        ));
    }

    Ok(())
}

fn validate_timeouts(config: &ProvisionConfig) -> Result<(), ConfigError> {
    let t = &config.timeouts;
    if [t.version, t.build, t.erase, t.upload, t.filesystem].contains(&0) {
        return Err(ConfigError::ValidationFailed(
            "Stage timeouts must be at least one second".to_string(),
        ));
    }
    Ok(())
}
