use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::config::TrialSettings;
use crate::models::{TrialConfig, TrialResult};

/// Phases of one trial, in presentation order. `Response` is the only
/// phase that can end two ways (classified swipe or timeout).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub enum TrialPhase {
    Idle,
    Delay,
    Fixation,
    Stimulus,
    Response,
    Feedback,
    Rest,
    Complete,
}

impl Default for TrialPhase {
    fn default() -> Self {
        TrialPhase::Idle
    }
}

/// Phase durations in milliseconds. The pre-stimulus delay is drawn
/// uniformly from `delay_range_ms` per trial; the stimulus duration
/// comes from the trial's own parameters when present.
#[derive(Debug, Clone, Copy)]
pub struct TrialTimings {
    pub delay_range_ms: (u64, u64),
    pub fixation_ms: u64,
    pub default_stimulus_ms: u64,
    pub response_timeout_ms: u64,
    pub feedback_ms: u64,
    pub rest_ms: u64,
}

impl Default for TrialTimings {
    fn default() -> Self {
        Self {
            delay_range_ms: (700, 1000),
            fixation_ms: 300,
            default_stimulus_ms: 800,
            response_timeout_ms: 5_000,
            feedback_ms: 300,
            rest_ms: 300,
        }
    }
}

impl TrialTimings {
    pub fn from_settings(settings: &TrialSettings) -> Self {
        Self {
            delay_range_ms: settings.delay_range_ms,
            fixation_ms: settings.fixation_duration_ms,
            default_stimulus_ms: 800,
            response_timeout_ms: settings.timeout_seconds * 1_000,
            feedback_ms: settings.feedback_duration_ms,
            rest_ms: settings.rest_period_ms,
        }
    }
}

/// Mutable machine state, always behind the runner's mutex.
///
/// `generation` is bumped whenever a trial is loaded or reset; every
/// scheduled timer carries the generation and the phase it expects to
/// fire in, so a timer from an earlier trial can never touch a newer
/// one even if its abort raced.
#[derive(Debug, Default)]
pub(crate) struct MachineState {
    pub phase: TrialPhase,
    pub generation: u64,
    pub is_active: bool,
    pub trial: Option<TrialConfig>,
    pub result: Option<TrialResult>,
    pub response_started: Option<Instant>,
}

impl MachineState {
    /// Back to Idle under a fresh generation; pending timers from the
    /// old generation become no-ops the moment this runs.
    pub fn clear(&mut self) {
        self.generation += 1;
        self.phase = TrialPhase::Idle;
        self.is_active = false;
        self.trial = None;
        self.result = None;
        self.response_started = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timings_follow_trial_settings() {
        let settings = TrialSettings {
            timeout_seconds: 3,
            show_trial_counter: true,
            delay_range_ms: (500, 900),
            fixation_duration_ms: 250,
            rest_period_ms: 400,
            feedback_duration_ms: 350,
        };
        let timings = TrialTimings::from_settings(&settings);
        assert_eq!(timings.response_timeout_ms, 3_000);
        assert_eq!(timings.delay_range_ms, (500, 900));
        assert_eq!(timings.fixation_ms, 250);
        assert_eq!(timings.rest_ms, 400);
        assert_eq!(timings.feedback_ms, 350);
    }

    #[test]
    fn clear_bumps_generation_and_returns_to_idle() {
        let mut state = MachineState {
            phase: TrialPhase::Response,
            generation: 4,
            is_active: true,
            ..Default::default()
        };
        state.clear();
        assert_eq!(state.phase, TrialPhase::Idle);
        assert_eq!(state.generation, 5);
        assert!(!state.is_active);
        assert!(state.trial.is_none());
    }
}
