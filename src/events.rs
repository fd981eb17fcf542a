//! Observability events emitted by commands and steps.
//!
//! Commands invoke the observer synchronously; the CLI renders the stream
//! with spinners, tests collect it into a Vec for assertions.

use std::fmt;
use std::sync::Mutex;

/// Lifecycle phase of a single step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepPhase {
    InProgress,
    Done,
    Error,
}

impl fmt::Display for StepPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InProgress => write!(f, "in_progress"),
            Self::Done => write!(f, "done"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Deploy/destroy state machine states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeployState {
    #[default]
    Idle,
    Provisioning,
    Deployed,
    Running,
    Destroying,
    Destroyed,
    Failed,
}

impl fmt::Display for DeployState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Provisioning => write!(f, "provisioning"),
            Self::Deployed => write!(f, "deployed"),
            Self::Running => write!(f, "running"),
            Self::Destroying => write!(f, "destroying"),
            Self::Destroyed => write!(f, "destroyed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-workload rollout progress. `ready` is non-decreasing for a given
/// workload within one rollout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolloutProgress {
    pub workload: String,
    pub ready: u32,
    pub desired: u32,
}

/// Receiver for the event stream of one command run.
///
/// All methods default to no-ops so observers implement only what they
/// render. Implementations must be cheap: callbacks run inline between
/// remote operations.
pub trait Observer: Send + Sync {
    fn on_step(&self, _label: &str, _phase: StepPhase, _detail: Option<&str>) {}
    fn on_state_change(&self, _state: DeployState) {}
    fn on_rollout_progress(&self, _progress: &RolloutProgress) {}
    fn on_log(&self, _category: &str, _line: &str) {}
}

/// Observer that discards everything.
pub struct NullObserver;

impl Observer for NullObserver {}

/// Observer that records events for test assertions.
#[derive(Default)]
pub struct RecordingObserver {
    pub steps: Mutex<Vec<(String, StepPhase)>>,
    pub states: Mutex<Vec<DeployState>>,
    pub rollouts: Mutex<Vec<RolloutProgress>>,
    pub logs: Mutex<Vec<(String, String)>>,
}

impl Observer for RecordingObserver {
    fn on_step(&self, label: &str, phase: StepPhase, _detail: Option<&str>) {
        self.steps.lock().unwrap().push((label.to_string(), phase));
    }

    fn on_state_change(&self, state: DeployState) {
        self.states.lock().unwrap().push(state);
    }

    fn on_rollout_progress(&self, progress: &RolloutProgress) {
        self.rollouts.lock().unwrap().push(progress.clone());
    }

    fn on_log(&self, category: &str, line: &str) {
        self.logs
            .lock()
            .unwrap()
            .push((category.to_string(), line.to_string()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_phase_display() {
        assert_eq!(format!("{}", StepPhase::InProgress), "in_progress");
        assert_eq!(format!("{}", StepPhase::Done), "done");
        assert_eq!(format!("{}", StepPhase::Error), "error");
    }

    #[test]
    fn test_deploy_state_display() {
        assert_eq!(format!("{}", DeployState::Provisioning), "provisioning");
        assert_eq!(format!("{}", DeployState::Deployed), "deployed");
        assert_eq!(format!("{}", DeployState::Failed), "failed");
    }

    #[test]
    fn test_recording_observer_collects_in_order() {
        let obs = RecordingObserver::default();
        obs.on_step("create_infrastructure", StepPhase::InProgress, None);
        obs.on_step("create_infrastructure", StepPhase::Done, None);
        obs.on_state_change(DeployState::Provisioning);

        let steps = obs.steps.lock().unwrap();
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[0].1, StepPhase::InProgress);
        assert_eq!(steps[1].1, StepPhase::Done);
        assert_eq!(*obs.states.lock().unwrap(), vec![DeployState::Provisioning]);
    }
}
