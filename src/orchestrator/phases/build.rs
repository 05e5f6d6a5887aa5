//! Build: firmware image, then (optionally) the credentials filesystem image.

use super::{map_tool_error, StageContext};
use crate::error::{ProvisionError, ToolError};
use crate::models::{BuildArtifacts, CredentialFile, FilesystemBuildFailure, StageKind};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Build the firmware for the target's environment and locate the artifacts.
///
/// A failing secondary filesystem build does not stop the run. The image left
/// by an earlier build is removed first and the failure travels with the
/// artifacts, so the filesystem upload reports it instead of flashing stale
/// certificates.
pub async fn build_artifacts(
    ctx: &StageContext<'_>,
    credentials: &[CredentialFile],
) -> Result<BuildArtifacts, ProvisionError> {
    let output = ctx
        .runner
        .run(ctx.toolchain.build(ctx.target))
        .await
        .map_err(|e| {
            map_tool_error(e, StageKind::Build, |reason| ProvisionError::FatalBuild {
                reason,
                stderr: String::new(),
            })
        })?;

    if !output.success {
        return Err(ProvisionError::FatalBuild {
            reason: format!("{} {}", ctx.toolchain.build_tool(), output.describe_exit()),
            stderr: output.stderr,
        });
    }

    let mut artifacts = BuildArtifacts::locate(
        &ctx.config.project_dir,
        &ctx.config.artifacts,
        ctx.target.build_env(),
    );

    if !artifacts.firmware.is_file() {
        return Err(ProvisionError::FatalBuild {
            reason: format!(
                "build reported success but no firmware image at {}",
                artifacts.firmware.display()
            ),
            stderr: output.stderr,
        });
    }

    ctx.console.line("✓ Build successful");
    log::info!("[Build] Firmware image: {}", artifacts.firmware.display());

    if ctx.config.toolchain.build_filesystem {
        artifacts.filesystem_failure =
            build_filesystem_image(ctx, credentials, &artifacts.filesystem_image).await?;
    }

    Ok(artifacts)
}

async fn build_filesystem_image(
    ctx: &StageContext<'_>,
    credentials: &[CredentialFile],
    image: &Path,
) -> Result<Option<FilesystemBuildFailure>, ProvisionError> {
    if let Err(e) = remove_stale_image(image) {
        let failure = FilesystemBuildFailure {
            reason: format!("could not remove previous image {}: {}", image.display(), e),
            stderr: String::new(),
        };
        return Ok(Some(warn_filesystem_failure(ctx, failure)));
    }

    let data_dir = ctx.config.project_dir.join(&ctx.config.toolchain.data_dir);
    match stage_credentials(&data_dir, credentials) {
        Ok(staged) => log::info!(
            "[Build] Staged {} credential file(s) into {}",
            staged.len(),
            data_dir.display()
        ),
        Err(e) => {
            let failure = FilesystemBuildFailure {
                reason: format!("could not stage certificates into {}: {}", data_dir.display(), e),
                stderr: String::new(),
            };
            return Ok(Some(warn_filesystem_failure(ctx, failure)));
        }
    }

    let failure = match ctx.runner.run(ctx.toolchain.build_filesystem(ctx.target)).await {
        Ok(output) if output.success => {
            ctx.console.line("✓ Filesystem image built");
            return Ok(None);
        }
        Ok(output) => FilesystemBuildFailure {
            reason: format!(
                "{} -t {} {}",
                ctx.toolchain.build_tool(),
                ctx.config.toolchain.filesystem_target,
                output.describe_exit()
            ),
            stderr: output.stderr,
        },
        Err(ToolError::Cancelled { .. }) => {
            return Err(ProvisionError::Interrupted {
                stage: StageKind::Build,
            })
        }
        Err(e) => FilesystemBuildFailure {
            reason: e.to_string(),
            stderr: String::new(),
        },
    };

    Ok(Some(warn_filesystem_failure(ctx, failure)))
}

fn warn_filesystem_failure(
    ctx: &StageContext<'_>,
    failure: FilesystemBuildFailure,
) -> FilesystemBuildFailure {
    log::warn!(
        "[Build] Filesystem image not built: {}: {}",
        failure.reason,
        failure.stderr.trim()
    );
    ctx.console
        .line(format!("⚠ Filesystem image build failed: {}", failure.reason));
    failure
}

/// Remove the image of an earlier build; absence is fine.
fn remove_stale_image(image: &Path) -> io::Result<()> {
    match fs::remove_file(image) {
        Ok(()) => {
            log::debug!("[Build] Removed previous filesystem image {}", image.display());
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

/// Copy each credential to `<data_dir>/<destination>`, creating directories.
pub fn stage_credentials(data_dir: &Path, credentials: &[CredentialFile]) -> io::Result<Vec<PathBuf>> {
    let mut staged = Vec::with_capacity(credentials.len());

    for credential in credentials {
        let relative = credential.entry.destination.trim_start_matches('/');
        let dest = data_dir.join(relative);
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(&credential.path, &dest)?;
        staged.push(dest);
    }

    Ok(staged)
}

#[cfg(test)]
mod tests {
    use super::super::testing::{failed, fixture, FakeRunner};
    use super::*;
    use crate::console::Console;
    use crate::models::CredentialEntry;
    use crate::orchestrator::executor::ToolOperation;
    use tempfile::TempDir;

    fn write_firmware(config: &crate::config::ProvisionConfig) {
        let artifacts = BuildArtifacts::locate(&config.project_dir, &config.artifacts, &config.build_env);
        fs::create_dir_all(artifacts.firmware.parent().unwrap()).unwrap();
        fs::write(&artifacts.firmware, b"fw").unwrap();
    }

    #[test]
    fn test_stage_credentials_to_destinations() {
        let temp_dir = TempDir::new().unwrap();
        let source = temp_dir.path().join("A.crt");
        fs::write(&source, "cert").unwrap();
        let credential = CredentialFile {
            entry: CredentialEntry::new("A.crt", "/certs/device.crt"),
            path: source,
            size: 4,
        };

        let data_dir = temp_dir.path().join("data");
        let staged = stage_credentials(&data_dir, &[credential]).unwrap();

        assert_eq!(staged, vec![data_dir.join("certs/device.crt")]);
        assert_eq!(fs::read_to_string(&staged[0]).unwrap(), "cert");
    }

    #[tokio::test]
    async fn test_build_failure_carries_stderr() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        let runner = FakeRunner::default().with(ToolOperation::Build, failed(1, "undefined reference"));
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let err = build_artifacts(&ctx, &[]).await.unwrap_err();
        assert!(matches!(err, ProvisionError::FatalBuild { .. }));
        assert_eq!(err.stderr(), "undefined reference");
        assert_eq!(runner.ops(), vec![ToolOperation::Build]);
    }

    #[tokio::test]
    async fn test_missing_firmware_after_build_is_fatal() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        let runner = FakeRunner::default();
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let err = build_artifacts(&ctx, &[]).await.unwrap_err();
        assert!(err.to_string().contains("firmware.bin"));
    }

    #[tokio::test]
    async fn test_filesystem_build_failure_is_only_a_warning() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        write_firmware(&config);
        let runner =
            FakeRunner::default().with(ToolOperation::BuildFilesystem, failed(1, "mkspiffs missing"));
        let (console, buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let artifacts = build_artifacts(&ctx, &[]).await.unwrap();
        assert!(artifacts.firmware.is_file());
        assert_eq!(
            runner.ops(),
            vec![ToolOperation::Build, ToolOperation::BuildFilesystem]
        );
        let failure = artifacts.filesystem_failure.unwrap();
        assert_eq!(failure.stderr, "mkspiffs missing");
        assert!(failure.reason.contains("-t buildfs exited with code 1"));
        assert!(buffer.contents().contains("⚠ Filesystem image build failed"));
    }

    #[tokio::test]
    async fn test_previous_image_removed_before_filesystem_build() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        write_firmware(&config);
        let stale = BuildArtifacts::locate(&config.project_dir, &config.artifacts, &config.build_env)
            .filesystem_image;
        fs::write(&stale, b"old certificates").unwrap();

        let runner =
            FakeRunner::default().with(ToolOperation::BuildFilesystem, failed(1, "mkspiffs: error"));
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let artifacts = build_artifacts(&ctx, &[]).await.unwrap();
        assert!(!artifacts.filesystem_image.exists());
        assert!(artifacts.filesystem_failure.is_some());
    }

    #[tokio::test]
    async fn test_successful_filesystem_build_has_no_failure() {
        let temp_dir = TempDir::new().unwrap();
        let (config, toolchain, target) = fixture(temp_dir.path());
        write_firmware(&config);
        let runner = FakeRunner::default();
        let (console, _buffer) = Console::capture();
        let ctx = StageContext {
            config: &config,
            target: &target,
            toolchain: &toolchain,
            runner: &runner,
            console: &console,
        };

        let artifacts = build_artifacts(&ctx, &[]).await.unwrap();
        assert_eq!(artifacts.filesystem_failure, None);
    }
}
