//! Filesystem upload: the credentials image at the partition offset.
//!
//! Both failure tiers are recoverable but reported differently: a missing
//! image points at the build, a failed write at the flashing tool.

use super::{map_tool_error, StageContext};
use crate::config::PartitionProfile;
use crate::error::{FilesystemGap, ProvisionError};
use crate::models::{BuildArtifacts, StageKind};

pub async fn upload_filesystem(
    ctx: &StageContext<'_>,
    artifacts: &BuildArtifacts,
    partition: &PartitionProfile,
) -> Result<(), ProvisionError> {
    let image = &artifacts.filesystem_image;

    // An interrupt between stages must not be reported as a missing image
    if ctx.runner.is_cancelled() {
        return Err(ProvisionError::Interrupted {
            stage: StageKind::FilesystemUpload,
        });
    }

    let build_failure = artifacts.filesystem_failure.as_ref();
    if build_failure.is_some() || !image.is_file() {
        let (reason, stderr) = match build_failure {
            Some(failure) => (
                format!("filesystem image was not rebuilt: {}", failure.reason),
                failure.stderr.clone(),
            ),
            None => (
                format!("filesystem image not found: {}", image.display()),
                String::new(),
            ),
        };
        log::warn!("[Filesystem] Image missing: {}", reason);
        return Err(ProvisionError::RecoverableFilesystemUpload {
            gap: FilesystemGap::ImageMissing,
            reason,
            stderr,
            remedy: format!(
                "1. Install the filesystem image plugin: platformio pkg install --platform espressif32 --tool tool-mkspiffs\n\
                 2. Or build the image manually in {}: {}",
                ctx.config.project_dir.display(),
                ctx.toolchain.manual_filesystem_build(ctx.target)
            ),
        });
    }

    ctx.console
        .line(format!("Filesystem image: {}", image.display()));
    ctx.console.line(format!(
        "Partition profile: {} (offset {})",
        partition.name,
        partition.offset_hex()
    ));

    let invocation = ctx.toolchain.write_filesystem(ctx.target, partition, image);
    let fallback = invocation.display();

    let failure = |reason: String, stderr: String| ProvisionError::RecoverableFilesystemUpload {
        gap: FilesystemGap::UploadFailed,
        reason,
        stderr,
        remedy: format!("Upload the image manually:\n  {}", fallback),
    };

    let output = ctx
        .runner
        .run(invocation.clone())
        .await
        .map_err(|e| map_tool_error(e, StageKind::FilesystemUpload, |reason| failure(reason, String::new())))?;

    if !output.success {
        return Err(failure(
            format!("{} {}", ctx.toolchain.flash_tool(), output.describe_exit()),
            output.stderr,
        ));
    }

    ctx.console.line("✓ Filesystem image uploaded");
    log::info!(
        "[Filesystem] {} written at {} on {}",
        image.display(),
        partition.offset_hex(),
        ctx.target.port()
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::testing::{failed, fixture, FakeRunner};
    use super::*;
    use crate::console::Console;
    use crate::orchestrator::executor::ToolOperation;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_missing_image_is_distinct_gap() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        let artifacts = BuildArtifacts::locate(&config.project_dir, &config.artifacts, "esp32dev");
        let runner = FakeRunner::default();
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let err = upload_filesystem(&ctx, &artifacts, &config.partition().unwrap())
            .await
            .unwrap_err();
        match &err {
            ProvisionError::RecoverableFilesystemUpload { gap, remedy, .. } => {
                assert_eq!(*gap, FilesystemGap::ImageMissing);
                assert!(remedy.contains("tool-mkspiffs"));
                assert!(remedy.contains("platformio run -e esp32dev -t buildfs"));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(runner.ops().is_empty());
    }

    #[tokio::test]
    async fn test_failed_write_gives_rendered_fallback() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        let artifacts = BuildArtifacts::locate(&config.project_dir, &config.artifacts, "esp32dev");
        fs::create_dir_all(artifacts.filesystem_image.parent().unwrap()).unwrap();
        fs::write(&artifacts.filesystem_image, b"spiffs").unwrap();

        let runner = FakeRunner::default().with(ToolOperation::WriteFlash, failed(2, "Timed out waiting for packet header"));
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let err = upload_filesystem(&ctx, &artifacts, &config.partition().unwrap())
            .await
            .unwrap_err();
        match &err {
            ProvisionError::RecoverableFilesystemUpload {
                gap, remedy, stderr, ..
            } => {
                assert_eq!(*gap, FilesystemGap::UploadFailed);
                assert_eq!(stderr, "Timed out waiting for packet header");
                assert!(remedy.contains(&format!(
                    "esptool.py --port /dev/ttyUSB0 --baud 921600 write_flash 0x291000 {}",
                    artifacts.filesystem_image.display()
                )));
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_build_failure_wins_over_leftover_image() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        let mut artifacts = BuildArtifacts::locate(&config.project_dir, &config.artifacts, "esp32dev");
        fs::create_dir_all(artifacts.filesystem_image.parent().unwrap()).unwrap();
        fs::write(&artifacts.filesystem_image, b"old certificates").unwrap();
        artifacts.filesystem_failure = Some(crate::models::FilesystemBuildFailure {
            reason: "platformio -t buildfs exited with code 1".to_string(),
            stderr: "mkspiffs: error".to_string(),
        });

        let runner = FakeRunner::default();
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let err = upload_filesystem(&ctx, &artifacts, &config.partition().unwrap())
            .await
            .unwrap_err();
        match &err {
            ProvisionError::RecoverableFilesystemUpload { gap, stderr, .. } => {
                assert_eq!(*gap, FilesystemGap::ImageMissing);
                assert_eq!(stderr, "mkspiffs: error");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert!(runner.ops().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_run_is_interrupted_not_missing_image() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        let artifacts = BuildArtifacts::locate(&config.project_dir, &config.artifacts, "esp32dev");
        let runner = FakeRunner::default().cancelled();
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let err = upload_filesystem(&ctx, &artifacts, &config.partition().unwrap())
            .await
            .unwrap_err();
        assert_eq!(
            err,
            ProvisionError::Interrupted {
                stage: StageKind::FilesystemUpload
            }
        );
    }
}
