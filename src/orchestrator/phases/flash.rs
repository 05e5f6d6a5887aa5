//! Firmware upload.

use super::{map_tool_error, StageContext};
use crate::error::ProvisionError;
use crate::models::{BuildArtifacts, StageKind};

/// Write the firmware image to the device.
///
/// The image is checked before the upload tool runs, so a skipped build with
/// no prior artifacts fails with the exact missing path.
pub async fn upload_firmware(
    ctx: &StageContext<'_>,
    artifacts: &BuildArtifacts,
    skip_build: bool,
) -> Result<(), ProvisionError> {
    if !artifacts.firmware.is_file() {
        return Err(ProvisionError::FatalFlash {
            reason: format!(
                "firmware image not found: {}",
                artifacts.firmware.display()
            ),
            stderr: String::new(),
            remedy: skip_build
                .then(|| "Run without --no-build to build the firmware first".to_string()),
        });
    }

    let output = ctx
        .runner
        .run(ctx.toolchain.upload_firmware(ctx.target, skip_build))
        .await
        .map_err(|e| {
            map_tool_error(e, StageKind::FirmwareUpload, |reason| {
                ProvisionError::FatalFlash {
                    reason,
                    stderr: String::new(),
                    remedy: None,
                }
            })
        })?;

    if !output.success {
        return Err(ProvisionError::FatalFlash {
            reason: format!("{} {}", ctx.toolchain.build_tool(), output.describe_exit()),
            stderr: output.stderr,
            remedy: Some(format!(
                "Check that the device is connected on {} and no serial monitor holds the port",
                ctx.target.port()
            )),
        });
    }

    ctx.console.line("✓ Firmware uploaded");
    log::info!(
        "[Flash] {} written to {}",
        artifacts.firmware.display(),
        ctx.target.port()
    );
    Ok(())
}
