//! Prerequisites: toolchain and credential checks.
//!
//! Runs before anything that could touch the device, so a statically
//! detectable omission can never leave it half-provisioned. Both checks report
//! every gap they find, not just the first.

use super::StageContext;
use crate::error::{ProvisionError, ToolError};
use crate::models::{CredentialFile, StageKind};
use crate::orchestrator::commands::install_hint;

/// Verify the build and flash tools answer a version query.
pub async fn check_dependencies(ctx: &StageContext<'_>) -> Result<(), ProvisionError> {
    let mut missing = Vec::new();
    let mut hints = Vec::new();
    let mut stderr = Vec::new();

    for program in [ctx.toolchain.build_tool(), ctx.toolchain.flash_tool()] {
        let invocation = ctx.toolchain.version_query(program);

        let problem = match ctx.runner.run(invocation).await {
            Ok(output) if output.success => {
                let version = output.stdout.lines().next().unwrap_or("").trim().to_string();
                if version.is_empty() {
                    ctx.console.line(format!("✓ {} found", program));
                } else {
                    ctx.console.line(format!("✓ {} found ({})", program, version));
                }
                log::info!("[Prerequisites] {} available: {}", program, version);
                None
            }
            Ok(output) => {
                if !output.stderr.trim().is_empty() {
                    stderr.push(format!("{}: {}", program, output.stderr.trim_end()));
                }
                Some(format!("{} --version {}", program, output.describe_exit()))
            }
            Err(ToolError::Cancelled { .. }) => {
                return Err(ProvisionError::Interrupted {
                    stage: StageKind::Prerequisites,
                })
            }
            Err(e) => Some(e.to_string()),
        };

        if let Some(problem) = problem {
            log::error!("[Prerequisites] {}", problem);
            ctx.console.line(format!("✗ {} not found", program));
            missing.push(program.to_string());
            if let Some(hint) = install_hint(program) {
                hints.push(format!("Install with: {}", hint));
            }
        }
    }

    if missing.is_empty() {
        return Ok(());
    }

    Err(ProvisionError::FatalPrerequisite {
        reason: format!("required tool(s) not available: {}", missing.join(", ")),
        missing,
        stderr: stderr.join("\n"),
        remedy: if hints.is_empty() {
            None
        } else {
            Some(hints.join("\n"))
        },
    })
}

/// Verify every credential exists and is non-empty.
pub fn check_certificates(ctx: &StageContext<'_>) -> Result<Vec<CredentialFile>, ProvisionError> {
    let certs_dir = &ctx.config.certs_dir;
    ctx.console.blank();
    ctx.console.line("Checking certificates...");

    let mut found = Vec::new();
    let mut missing = Vec::new();

    for entry in ctx.config.credentials.iter() {
        let path = certs_dir.join(&entry.file);

        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() && meta.len() > 0 => {
                ctx.console
                    .line(format!("  ✓ {} ({} bytes)", entry.file, meta.len()));
                found.push(CredentialFile {
                    entry: entry.clone(),
                    path,
                    size: meta.len(),
                });
            }
            Ok(meta) if meta.is_file() => {
                ctx.console.line(format!("  ✗ {} - EMPTY", entry.file));
                missing.push(entry.file.clone());
            }
            _ => {
                ctx.console.line(format!("  ✗ {} - NOT FOUND", entry.file));
                missing.push(entry.file.clone());
            }
        }
    }

    if missing.is_empty() {
        log::info!(
            "[Prerequisites] All {} credential files present in {}",
            found.len(),
            certs_dir.display()
        );
        return Ok(found);
    }

    ctx.console
        .line(format!("Expected location: {}", certs_dir.display()));
    log::error!("[Prerequisites] Missing credentials: {}", missing.join(", "));

    Err(ProvisionError::FatalPrerequisite {
        reason: format!(
            "{} of {} certificate file(s) missing or empty",
            missing.len(),
            ctx.config.credentials.len()
        ),
        missing,
        stderr: String::new(),
        remedy: Some(format!(
            "Place the certificate files in {}",
            certs_dir.display()
        )),
    })
}
