//! Optional full flash erase.
//!
//! Failure is `NonFatalErase`; whether the run continues is decided by the
//! orchestrator from the configured erase policy.

use super::{map_tool_error, StageContext};
use crate::error::ProvisionError;
use crate::models::StageKind;

pub async fn erase_flash(ctx: &StageContext<'_>) -> Result<(), ProvisionError> {
    let output = ctx
        .runner
        .run(ctx.toolchain.erase(ctx.target))
        .await
        .map_err(|e| {
            map_tool_error(e, StageKind::Erase, |reason| ProvisionError::NonFatalErase {
                reason,
                stderr: String::new(),
            })
        })?;

    if !output.success {
        return Err(ProvisionError::NonFatalErase {
            reason: format!("{} {}", ctx.toolchain.flash_tool(), output.describe_exit()),
            stderr: output.stderr,
        });
    }

    ctx.console.line("✓ Flash erased");
    log::info!("[Erase] Flash erased on {}", ctx.target.port());
    Ok(())
}
