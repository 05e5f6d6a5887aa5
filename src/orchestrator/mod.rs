//! Provisioning orchestration: Prerequisites -> (Erase) -> Build -> Firmware upload -> Filesystem upload.
//!
//! The orchestrator owns sequencing and the reaction to each stage's outcome.
//! Stages never decide whether the run continues; they return a typed
//! [`ProvisionError`] and the orchestrator applies the taxonomy:
//!
//! - fatal kinds move the run to `Aborted`, nothing later is attempted
//! - `NonFatalErase` continues or aborts according to [`ErasePolicy`]
//! - `RecoverableFilesystemUpload` still reaches `Done`, flagged as a caveat
//! - `Interrupted` aborts with no cleanup

pub mod commands;
pub mod executor;
pub mod phases;
pub mod state;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Local};
use serde::Serialize;

pub use commands::Toolchain;
pub use executor::{ProcessRunner, ToolInvocation, ToolOperation, ToolOutput, ToolRunner};
pub use state::{OrchestrationState, PipelinePhase};

use crate::config::{PartitionProfile, ProvisionConfig};
use crate::console::Console;
use crate::error::{AppError, ConfigError, ErrorKind, ProvisionError};
use crate::models::{
    BuildArtifacts, DeviceTarget, ErasePolicy, StageKind, StageRecord, StageStatus,
};
use phases::StageContext;

/// Every stage fully succeeded.
pub const EXIT_SUCCESS: u8 = 0;
/// A fatal error stopped the run (also used for setup errors).
pub const EXIT_ABORTED: u8 = 1;
/// Completed, but the credentials filesystem is not on the device.
pub const EXIT_FILESYSTEM_GAP: u8 = 2;
/// Stopped by the operator.
pub const EXIT_INTERRUPTED: u8 = 130;

/// File name of the JSON run summary inside the log directory.
pub const SUMMARY_FILE_NAME: &str = "last_run.json";

/// Per-invocation switches from the command line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunOptions {
    /// Run the erase stage first
    pub erase: bool,
    /// Reuse artifacts from a previous build
    pub skip_build: bool,
}

/// How a run ended, from a scripting consumer's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    FullSuccess,
    CompletedWithCaveats,
    Aborted,
    Interrupted,
}

/// Sequences the provisioning stages for one device.
pub struct ProvisionOrchestrator {
    config: ProvisionConfig,
    target: DeviceTarget,
    options: RunOptions,
    partition: PartitionProfile,
    toolchain: Toolchain,
    runner: Arc<dyn ToolRunner>,
    console: Console,
}

impl ProvisionOrchestrator {
    /// Resolves the partition profile up front; an unknown profile never
    /// reaches the device. Relative directories are made absolute against the
    /// current directory.
    pub fn new(
        mut config: ProvisionConfig,
        target: DeviceTarget,
        options: RunOptions,
        runner: Arc<dyn ToolRunner>,
        console: Console,
    ) -> Result<Self, ConfigError> {
        let partition = config.partition()?;
        config.make_absolute()?;
        let toolchain = Toolchain::new(&config);

        Ok(ProvisionOrchestrator {
            config,
            target,
            options,
            partition,
            toolchain,
            runner,
            console,
        })
    }

    pub fn partition(&self) -> &PartitionProfile {
        &self.partition
    }

    /// Run the whole pipeline. Never panics on stage failure; the outcome is
    /// in the returned report.
    pub async fn run(&self) -> RunReport {
        let started_at = Local::now();
        let mut state = OrchestrationState::new();
        let ctx = StageContext {
            config: &self.config,
            target: &self.target,
            toolchain: &self.toolchain,
            runner: &*self.runner,
            console: &self.console,
        };

        self.console.banner("ESP32 Firmware & Certificates Upload");
        self.console.line(format!("Port: {}", self.target.port()));
        self.console.line(format!("Environment: {}", self.target.build_env()));
        log::info!(
            "[Orchestrator] Provisioning {} (env {}, partition {} @ {}), erase={}, skip_build={}",
            self.target.port(),
            self.target.build_env(),
            self.partition.name,
            self.partition.offset_hex(),
            self.options.erase,
            self.options.skip_build
        );

        // Prerequisites
        let start = Instant::now();
        let prereq = match phases::check_dependencies(&ctx).await {
            Ok(()) => phases::check_certificates(&ctx),
            Err(e) => Err(e),
        };
        let credentials = match prereq {
            Ok(credentials) => {
                state.record_stage(StageKind::Prerequisites, StageStatus::Succeeded, start.elapsed(), None);
                advance(&mut state, PipelinePhase::Checked);
                credentials
            }
            Err(e) => {
                state.record_stage(StageKind::Prerequisites, StageStatus::Failed, start.elapsed(), Some(e.to_string()));
                return self.finish_aborted(state, e, started_at);
            }
        };

        // Erase
        if self.options.erase {
            self.console.blank();
            self.console.line("Erasing flash...");
            let start = Instant::now();
            match phases::erase_flash(&ctx).await {
                Ok(()) => {
                    state.record_stage(StageKind::Erase, StageStatus::Succeeded, start.elapsed(), None);
                }
                Err(e) if self.erase_is_tolerated(&e) => {
                    state.record_stage(StageKind::Erase, StageStatus::Warned, start.elapsed(), Some(e.to_string()));
                    self.report_error("WARNING", &e);
                    self.console.line("Continuing without a clean flash.");
                    log::warn!("[Orchestrator] Erase failed, continuing per erase policy: {}", e);
                    state.record_caveat(e);
                }
                Err(e) => {
                    state.record_stage(StageKind::Erase, StageStatus::Failed, start.elapsed(), Some(e.to_string()));
                    return self.finish_aborted(state, e, started_at);
                }
            }
            advance(&mut state, PipelinePhase::Erased);
        } else {
            state.record_stage(StageKind::Erase, StageStatus::Skipped, Default::default(), None);
        }

        let total_steps = if self.options.skip_build { 2 } else { 3 };
        let mut step = 0;

        // Build
        let artifacts = if self.options.skip_build {
            let artifacts = BuildArtifacts::locate(
                &self.config.project_dir,
                &self.config.artifacts,
                self.target.build_env(),
            );
            self.console.blank();
            self.console.line(format!(
                "Skipping build, using existing artifacts in {}",
                artifacts
                    .firmware
                    .parent()
                    .map(Path::display)
                    .map(|d| d.to_string())
                    .unwrap_or_default()
            ));
            state.record_stage(
                StageKind::Build,
                StageStatus::Skipped,
                Default::default(),
                Some("--no-build".to_string()),
            );
            artifacts
        } else {
            step += 1;
            self.stage_header(step, total_steps, "Building project...");
            let start = Instant::now();
            match phases::build_artifacts(&ctx, &credentials).await {
                Ok(artifacts) => {
                    state.record_stage(StageKind::Build, StageStatus::Succeeded, start.elapsed(), None);
                    artifacts
                }
                Err(e) => {
                    state.record_stage(StageKind::Build, StageStatus::Failed, start.elapsed(), Some(e.to_string()));
                    return self.finish_aborted(state, e, started_at);
                }
            }
        };
        advance(&mut state, PipelinePhase::Built);

        // Firmware upload
        step += 1;
        self.stage_header(step, total_steps, "Uploading firmware...");
        let start = Instant::now();
        match phases::upload_firmware(&ctx, &artifacts, self.options.skip_build).await {
            Ok(()) => {
                state.record_stage(StageKind::FirmwareUpload, StageStatus::Succeeded, start.elapsed(), None);
                advance(&mut state, PipelinePhase::FirmwareFlashed);
            }
            Err(e) => {
                state.record_stage(StageKind::FirmwareUpload, StageStatus::Failed, start.elapsed(), Some(e.to_string()));
                return self.finish_aborted(state, e, started_at);
            }
        }

        // Filesystem upload
        step += 1;
        self.stage_header(step, total_steps, "Uploading filesystem image with certificates...");
        let start = Instant::now();
        match phases::upload_filesystem(&ctx, &artifacts, &self.partition).await {
            Ok(()) => {
                state.record_stage(StageKind::FilesystemUpload, StageStatus::Succeeded, start.elapsed(), None);
            }
            Err(e) if e.is_fatal() => {
                state.record_stage(StageKind::FilesystemUpload, StageStatus::Failed, start.elapsed(), Some(e.to_string()));
                return self.finish_aborted(state, e, started_at);
            }
            Err(e) => {
                state.record_stage(StageKind::FilesystemUpload, StageStatus::Warned, start.elapsed(), Some(e.to_string()));
                self.report_error("ERROR", &e);
                log::warn!("[Orchestrator] Filesystem upload incomplete: {}", e);
                state.record_caveat(e);
            }
        }
        advance(&mut state, PipelinePhase::Done);

        let report = self.build_report(state, started_at);
        self.print_completion(&report);
        report
    }

    fn erase_is_tolerated(&self, err: &ProvisionError) -> bool {
        err.kind() == ErrorKind::NonFatalErase && self.config.erase_failure == ErasePolicy::Continue
    }

    fn stage_header(&self, step: usize, total: usize, title: &str) {
        self.console.blank();
        self.console.line(format!("[{}/{}] {}", step, total, title));
    }

    /// Targeted diagnostic: message, captured stderr verbatim, remedy.
    fn report_error(&self, label: &str, err: &ProvisionError) {
        self.console.line(format!("{}: {}", label, err));
        if !err.stderr().trim().is_empty() {
            self.console.block(err.stderr(), 0);
        }
        if let Some(remedy) = err.remedy() {
            self.console.blank();
            self.console.block(remedy, 0);
        }
    }

    fn finish_aborted(
        &self,
        mut state: OrchestrationState,
        err: ProvisionError,
        started_at: DateTime<Local>,
    ) -> RunReport {
        self.console.blank();
        self.report_error("ERROR", &err);

        match &err {
            ProvisionError::Interrupted { stage } => {
                log::warn!("[Orchestrator] Interrupted during {}", stage);
                self.console.line(format!(
                    "Interrupted during {}. No cleanup was performed; the device flash may be partially written.",
                    stage
                ));
            }
            other => log::error!("[Orchestrator] Aborted: {}", other),
        }

        if let Err(e) = state.abort(err) {
            log::error!("[Orchestrator] {}", e);
        }

        let report = self.build_report(state, started_at);
        self.console.blank();
        self.console.line(format!(
            "✗ Provisioning aborted (exit code {})",
            report.exit_code()
        ));
        report
    }

    fn build_report(&self, state: OrchestrationState, started_at: DateTime<Local>) -> RunReport {
        RunReport {
            port: self.target.port().to_string(),
            build_env: self.target.build_env().to_string(),
            partition: self.partition.clone(),
            final_phase: state.phase,
            duration_ms: u64::try_from(state.elapsed().as_millis()).unwrap_or(u64::MAX),
            stages: state.stages,
            caveats: state.caveats,
            error: state.error,
            started_at,
        }
    }

    fn print_completion(&self, report: &RunReport) {
        self.console.blank();
        self.console.rule();
        if report.caveats.is_empty() {
            self.console.line("✓ Upload completed!");
        } else {
            self.console.line("⚠ Upload completed with warnings");
        }
        self.console.rule();

        if report.caveats.is_empty() {
            self.console.line("All stages completed successfully.");
        } else {
            self.console.line("Not every stage succeeded:");
            for caveat in &report.caveats {
                self.console.line(format!("  - {}", caveat));
            }
        }

        self.console.blank();
        self.console.line("Next steps:");
        let steps = std::iter::once(format!(
            "Open Serial Monitor: {}",
            self.toolchain.monitor_command(&self.target)
        ))
        .chain(self.config.next_steps.iter().cloned());
        for (i, text) in steps.enumerate() {
            self.console.line(format!("{}. {}", i + 1, text));
        }

        log::info!(
            "[Orchestrator] Run finished: {:?}, exit code {}",
            report.completion(),
            report.exit_code()
        );
    }
}

/// Invalid transitions mean a sequencing bug; log instead of panicking mid-flash.
fn advance(state: &mut OrchestrationState, next: PipelinePhase) {
    if let Err(e) = state.transition_to(next) {
        log::error!("[Orchestrator] {}", e);
    }
}

/// Everything known about a finished run.
#[derive(Debug, Clone)]
pub struct RunReport {
    pub port: String,
    pub build_env: String,
    pub partition: PartitionProfile,
    pub final_phase: PipelinePhase,
    pub stages: Vec<StageRecord>,
    /// Non-fatal errors the run continued past
    pub caveats: Vec<ProvisionError>,
    /// The error that aborted the run
    pub error: Option<ProvisionError>,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
}

impl RunReport {
    pub fn completion(&self) -> Completion {
        match (self.final_phase, &self.error) {
            (PipelinePhase::Done, _) if self.caveats.is_empty() => Completion::FullSuccess,
            (PipelinePhase::Done, _) => Completion::CompletedWithCaveats,
            (_, Some(ProvisionError::Interrupted { .. })) => Completion::Interrupted,
            _ => Completion::Aborted,
        }
    }

    /// True when every stage that ran fully succeeded.
    pub fn fully_succeeded(&self) -> bool {
        self.completion() == Completion::FullSuccess
    }

    /// Only a filesystem gap changes the exit code of a completed run; a
    /// tolerated erase failure is reported but still exits 0.
    pub fn exit_code(&self) -> u8 {
        match self.completion() {
            Completion::FullSuccess => EXIT_SUCCESS,
            Completion::CompletedWithCaveats => {
                if self
                    .caveats
                    .iter()
                    .any(|c| c.kind() == ErrorKind::RecoverableFilesystemUpload)
                {
                    EXIT_FILESYSTEM_GAP
                } else {
                    EXIT_SUCCESS
                }
            }
            Completion::Aborted => EXIT_ABORTED,
            Completion::Interrupted => EXIT_INTERRUPTED,
        }
    }

    pub fn status_of(&self, stage: StageKind) -> Option<StageStatus> {
        self.stages.iter().rev().find(|r| r.stage == stage).map(|r| r.status)
    }

    pub fn summary(&self) -> RunSummary {
        RunSummary {
            port: self.port.clone(),
            build_env: self.build_env.clone(),
            partition_profile: self.partition.name.clone(),
            filesystem_offset: self.partition.offset_hex(),
            final_phase: self.final_phase,
            completion: self.completion(),
            fully_succeeded: self.fully_succeeded(),
            exit_code: self.exit_code(),
            stages: self.stages.clone(),
            error: self.error.as_ref().map(ErrorSummary::from),
            caveats: self.caveats.iter().map(ErrorSummary::from).collect(),
            started_at: self.started_at,
            duration_ms: self.duration_ms,
        }
    }

    /// Write the JSON summary to `<log_dir>/last_run.json`.
    pub fn write_summary(&self, log_dir: &Path) -> Result<PathBuf, AppError> {
        std::fs::create_dir_all(log_dir)?;
        let path = log_dir.join(SUMMARY_FILE_NAME);
        let json = serde_json::to_string_pretty(&self.summary())?;
        std::fs::write(&path, json)?;
        Ok(path)
    }
}

/// Serialized form of a [`RunReport`].
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub port: String,
    pub build_env: String,
    pub partition_profile: String,
    pub filesystem_offset: String,
    pub final_phase: PipelinePhase,
    pub completion: Completion,
    pub fully_succeeded: bool,
    pub exit_code: u8,
    pub stages: Vec<StageRecord>,
    pub error: Option<ErrorSummary>,
    pub caveats: Vec<ErrorSummary>,
    pub started_at: DateTime<Local>,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorSummary {
    pub kind: &'static str,
    pub message: String,
    pub stderr: String,
    pub remedy: Option<String>,
}

impl From<&ProvisionError> for ErrorSummary {
    fn from(err: &ProvisionError) -> Self {
        ErrorSummary {
            kind: err.kind().as_str(),
            message: err.to_string(),
            stderr: err.stderr().to_string(),
            remedy: err.remedy().map(str::to_string),
        }
    }
}
