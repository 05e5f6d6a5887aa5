//! Pipeline state management and stage tracking.
//!
//! - `PipelinePhase`: discrete states of a provisioning run
//! - `OrchestrationState`: current phase plus the record of every stage so far
//!
//! Transitions are checked; an invalid transition is a programming error in
//! the orchestrator and is reported rather than silently applied.

use serde::Serialize;
use std::time::{Duration, Instant};

use crate::error::ProvisionError;
use crate::models::{StageKind, StageRecord, StageStatus};

/// Pipeline phase enumeration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum PipelinePhase {
    Init,
    /// Tools and credentials verified
    Checked,
    /// Flash erase attempted (successfully or not, depending on policy)
    Erased,
    /// Artifacts available, built now or by a previous run
    Built,
    FirmwareFlashed,
    /// Completed, possibly with a filesystem gap
    Done,
    Aborted,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Init => "init",
            PipelinePhase::Checked => "checked",
            PipelinePhase::Erased => "erased",
            PipelinePhase::Built => "built",
            PipelinePhase::FirmwareFlashed => "firmware_flashed",
            PipelinePhase::Done => "done",
            PipelinePhase::Aborted => "aborted",
        }
    }

    /// Get all valid phase transitions FROM this phase.
    pub fn valid_next_phases(&self) -> Vec<PipelinePhase> {
        match self {
            PipelinePhase::Init => vec![PipelinePhase::Checked, PipelinePhase::Aborted],
            PipelinePhase::Checked => vec![
                PipelinePhase::Erased,
                PipelinePhase::Built,
                PipelinePhase::Aborted,
            ],
            PipelinePhase::Erased => vec![PipelinePhase::Built, PipelinePhase::Aborted],
            PipelinePhase::Built => vec![PipelinePhase::FirmwareFlashed, PipelinePhase::Aborted],
            PipelinePhase::FirmwareFlashed => vec![PipelinePhase::Done, PipelinePhase::Aborted],
            PipelinePhase::Done | PipelinePhase::Aborted => vec![],
        }
    }

    pub fn can_transition_to(&self, next: PipelinePhase) -> bool {
        self.valid_next_phases().contains(&next)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, PipelinePhase::Done | PipelinePhase::Aborted)
    }
}

/// Execution state of one run.
#[derive(Debug, Clone)]
pub struct OrchestrationState {
    pub phase: PipelinePhase,
    pub stages: Vec<StageRecord>,
    /// Non-fatal errors the run continued past
    pub caveats: Vec<ProvisionError>,
    /// The error that aborted the run
    pub error: Option<ProvisionError>,
    start_time: Instant,
}

impl Default for OrchestrationState {
    fn default() -> Self {
        OrchestrationState::new()
    }
}

impl OrchestrationState {
    pub fn new() -> Self {
        OrchestrationState {
            phase: PipelinePhase::Init,
            stages: Vec::new(),
            caveats: Vec::new(),
            error: None,
            start_time: Instant::now(),
        }
    }

    /// Attempt to transition to the next phase.
    pub fn transition_to(&mut self, next_phase: PipelinePhase) -> Result<(), String> {
        if !self.phase.can_transition_to(next_phase) {
            return Err(format!(
                "Invalid phase transition: {} -> {}",
                self.phase.as_str(),
                next_phase.as_str()
            ));
        }
        log::debug!(
            "[Orchestrator] Phase {} -> {}",
            self.phase.as_str(),
            next_phase.as_str()
        );
        self.phase = next_phase;
        Ok(())
    }

    pub fn record_stage(
        &mut self,
        stage: StageKind,
        status: StageStatus,
        duration: Duration,
        detail: Option<String>,
    ) {
        self.stages.push(StageRecord {
            stage,
            status,
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            detail,
        });
    }

    /// Keep a non-fatal error for the summary.
    pub fn record_caveat(&mut self, error: ProvisionError) {
        self.caveats.push(error);
    }

    /// Record the fatal error and move to `Aborted`.
    ///
    /// `Aborted` is reachable from every non-terminal phase, so this only
    /// fails once the run is already over.
    pub fn abort(&mut self, error: ProvisionError) -> Result<(), String> {
        self.transition_to(PipelinePhase::Aborted)?;
        self.error = Some(error);
        Ok(())
    }

    pub fn status_of(&self, stage: StageKind) -> Option<StageStatus> {
        self.stages
            .iter()
            .rev()
            .find(|r| r.stage == stage)
            .map(|r| r.status)
    }

    pub fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }
}
