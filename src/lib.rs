//! certflash: firmware and TLS credential provisioning
//!
//! Provisions a serial-attached device in one guided run: checks the toolchain
//! and credential files, optionally erases the flash, builds the firmware,
//! uploads it, then writes a filesystem image carrying the certificates at the
//! offset of the configured partition profile.
//!
//! The system is organized into functional modules:
//! - **error**: Pipeline error taxonomy plus config/tool/app errors
//! - **models**: Credentials, device target, artifacts, stage records
//! - **config**: TOML configuration, partition profiles, validation
//! - **system**: Validation of operator-supplied identifiers
//! - **console**: Operator-facing output
//! - **log_collector**: Persisted session log behind the `log` facade
//! - **orchestrator**: Tool execution, stage phases and sequencing
//! - **cli**: Command line

// Core foundational modules
pub mod error;
pub mod models;

pub mod cli;
pub mod config;
pub mod console;
pub mod log_collector;
pub mod orchestrator;
pub mod system;

// Re-export the log crate for macro usage
pub use log;

// ============================================================================
// PUBLIC RE-EXPORTS FOR CONVENIENCE
// ============================================================================

pub use config::{PartitionProfile, ProvisionConfig};
pub use console::Console;
pub use error::{AppError, ConfigError, ErrorKind, FilesystemGap, ProvisionError, ToolError};
pub use log_collector::{LogCollector, LogLine};
pub use models::{
    BuildArtifacts, CredentialEntry, CredentialSet, DeviceTarget, ErasePolicy, StageKind,
    StageStatus,
};
pub use orchestrator::{
    Completion, PipelinePhase, ProcessRunner, ProvisionOrchestrator, RunOptions, RunReport,
    ToolRunner,
};

/// Library version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version_exists() {
        assert!(!VERSION.is_empty());
    }
}
