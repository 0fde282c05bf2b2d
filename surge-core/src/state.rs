use std::fmt;

use crate::error::{Error, Result};
use crate::schedule::StageSnapshot;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display, strum::AsRefStr)]
#[strum(serialize_all = "UPPERCASE")]
pub enum Verdict {
    Pass,
    Fail,
    Aborted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunPhase {
    Idle,
    SettingUp,
    Running,
    TearingDown,
    Finished(Verdict),
    Aborted,
}

impl fmt::Display for RunPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunPhase::Idle => f.write_str("Idle"),
            RunPhase::SettingUp => f.write_str("SettingUp"),
            RunPhase::Running => f.write_str("Running"),
            RunPhase::TearingDown => f.write_str("TearingDown"),
            RunPhase::Finished(verdict) => write!(f, "Finished({verdict})"),
            RunPhase::Aborted => f.write_str("Aborted"),
        }
    }
}

impl RunPhase {
    pub fn can_transition_to(self, next: RunPhase) -> bool {
        matches!(
            (self, next),
            (RunPhase::Idle, RunPhase::SettingUp)
                | (RunPhase::SettingUp, RunPhase::Running)
                | (RunPhase::SettingUp, RunPhase::Aborted)
                | (RunPhase::Running, RunPhase::TearingDown)
                | (RunPhase::Running, RunPhase::Aborted)
                | (
                    RunPhase::TearingDown,
                    RunPhase::Finished(Verdict::Pass | Verdict::Fail)
                )
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RunPhase::Finished(_) | RunPhase::Aborted)
    }
}

/// Lifecycle state of one run. Owned by the orchestrator; the scheduler updates the
/// live counters through `&mut` while the run is in `Running`.
#[derive(Debug, Clone)]
pub struct RunState {
    phase: RunPhase,
    pub(crate) stage: Option<StageSnapshot>,
    pub(crate) target_vus: u64,
    pub(crate) live_vus: u64,
    pub(crate) peak_vus: u64,
    pub(crate) spawned_vus: u64,
}

impl Default for RunState {
    fn default() -> Self {
        Self::new()
    }
}

impl RunState {
    pub fn new() -> Self {
        Self {
            phase: RunPhase::Idle,
            stage: None,
            target_vus: 0,
            live_vus: 0,
            peak_vus: 0,
            spawned_vus: 0,
        }
    }

    pub fn phase(&self) -> RunPhase {
        self.phase
    }

    pub fn stage(&self) -> Option<&StageSnapshot> {
        self.stage.as_ref()
    }

    pub fn target_vus(&self) -> u64 {
        self.target_vus
    }

    pub fn live_vus(&self) -> u64 {
        self.live_vus
    }

    pub fn peak_vus(&self) -> u64 {
        self.peak_vus
    }

    pub fn spawned_vus(&self) -> u64 {
        self.spawned_vus
    }

    pub(crate) fn transition(&mut self, next: RunPhase) -> Result<()> {
        if !self.phase.can_transition_to(next) {
            return Err(Error::InvalidTransition {
                from: self.phase,
                to: next,
            });
        }
        tracing::info!(from = %self.phase, to = %next, "run state transition");
        self.phase = next;
        Ok(())
    }

    pub(crate) fn set_live(&mut self, live: u64) {
        self.live_vus = live;
        self.peak_vus = self.peak_vus.max(live);
    }
}
