//! Orchestrator phases: one module per provisioning stage.
//!
//! - **Prerequisites** (`prep`) - toolchain and credential checks
//! - **Erase** (`erase`) - optional full flash erase
//! - **Build** (`build`) - firmware build, credential staging, filesystem image
//! - **Firmware upload** (`flash`)
//! - **Filesystem upload** (`filesystem`) - image write at the partition offset
//!
//! Each phase is independently testable: it only sees a [`StageContext`] and
//! returns a typed [`ProvisionError`]. Progress and success lines go to the
//! console from here; errors are reported by the orchestrator.

pub mod build;
pub mod erase;
pub mod filesystem;
pub mod flash;
pub mod prep;

pub use build::build_artifacts;
pub use erase::erase_flash;
pub use filesystem::upload_filesystem;
pub use flash::upload_firmware;
pub use prep::{check_certificates, check_dependencies};

use super::commands::Toolchain;
use super::executor::ToolRunner;
use crate::config::ProvisionConfig;
use crate::console::Console;
use crate::error::{ProvisionError, ToolError};
use crate::models::{DeviceTarget, StageKind};

/// Everything a stage may read. Nothing in here is mutated by a stage.
pub struct StageContext<'a> {
    pub config: &'a ProvisionConfig,
    pub target: &'a DeviceTarget,
    pub toolchain: &'a Toolchain,
    pub runner: &'a dyn ToolRunner,
    pub console: &'a Console,
}

/// Cancellation always surfaces as `Interrupted`, whatever the stage.
pub(crate) fn map_tool_error<F>(err: ToolError, stage: StageKind, otherwise: F) -> ProvisionError
where
    F: FnOnce(String) -> ProvisionError,
{
    match err {
        ToolError::Cancelled { .. } => ProvisionError::Interrupted { stage },
        other => otherwise(other.to_string()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    //! Minimal scripted runner shared by the phase unit tests.

    use super::*;
    use crate::orchestrator::executor::{ToolInvocation, ToolOperation, ToolOutput};
    use futures::future::BoxFuture;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct FakeRunner {
        pub outcomes: Mutex<HashMap<ToolOperation, Result<ToolOutput, ToolError>>>,
        pub calls: Mutex<Vec<ToolInvocation>>,
        pub cancelled: bool,
    }

    impl FakeRunner {
        pub fn with(self, op: ToolOperation, outcome: Result<ToolOutput, ToolError>) -> Self {
            self.outcomes.lock().unwrap().insert(op, outcome);
            self
        }

        pub fn cancelled(mut self) -> Self {
            self.cancelled = true;
            self
        }

        pub fn ops(&self) -> Vec<ToolOperation> {
            self.calls.lock().unwrap().iter().map(|c| c.operation).collect()
        }
    }

    pub fn ok() -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput {
            code: Some(0),
            success: true,
            ..ToolOutput::default()
        })
    }

    pub fn failed(code: i32, stderr: &str) -> Result<ToolOutput, ToolError> {
        Ok(ToolOutput {
            code: Some(code),
            success: false,
            stdout: String::new(),
            stderr: stderr.to_string(),
        })
    }

    impl ToolRunner for FakeRunner {
        fn run(&self, invocation: ToolInvocation) -> BoxFuture<'_, Result<ToolOutput, ToolError>> {
            let outcome = self
                .outcomes
                .lock()
                .unwrap()
                .get(&invocation.operation)
                .cloned()
                .unwrap_or_else(ok);
            self.calls.lock().unwrap().push(invocation);
            Box::pin(async move { outcome })
        }

        fn is_cancelled(&self) -> bool {
            self.cancelled
        }
    }

    /// Default config rooted at `root`, with its toolchain and target.
    pub fn fixture(root: &std::path::Path) -> (ProvisionConfig, Toolchain, DeviceTarget) {
        let mut config = ProvisionConfig::default();
        config.resolve_paths(root);
        let toolchain = Toolchain::new(&config);
        let target = DeviceTarget::new("/dev/ttyUSB0", &config.build_env).unwrap();
        (config, toolchain, target)
    }
}
