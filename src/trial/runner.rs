use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::Utc;
use log::warn;
use rand::{rngs::StdRng, Rng};
use serde_json::Value;
use tokio::{
    sync::{mpsc, Mutex},
    task::JoinHandle,
    time::{sleep, Duration, Instant},
};

use crate::capture::SwipeOutcome;
use crate::models::{TrialConfig, TrialResult};

use super::state::{MachineState, TrialPhase, TrialTimings};

/// What the presentation layer observes: phase transitions as they
/// happen, and exactly one result per trial.
#[derive(Debug, Clone)]
pub enum TrialEvent {
    PhaseChanged { phase: TrialPhase },
    Completed { result: TrialResult },
}

/// What a fired timer found to do, computed under the state lock and
/// acted on after it is released.
enum Step {
    Timer(TrialPhase, Duration),
    Complete(Option<TrialResult>),
}

/// Drives a single trial through its timed phases.
///
/// One runner governs one trial at a time; `load_trial` resets the
/// machine before accepting a new config, and `start` refuses re-entry
/// while a trial is active. At most one timer is outstanding; it holds
/// the generation and phase it was armed in and no-ops if either moved.
#[derive(Clone)]
pub struct TrialRunner {
    state: Arc<Mutex<MachineState>>,
    timings: TrialTimings,
    timer: Arc<Mutex<Option<JoinHandle<()>>>>,
    events: mpsc::UnboundedSender<TrialEvent>,
    rng: Arc<Mutex<StdRng>>,
}

impl TrialRunner {
    /// The rng is injected so trial timing is reproducible under test;
    /// production callers seed from entropy.
    pub fn new(
        timings: TrialTimings,
        rng: StdRng,
    ) -> (Self, mpsc::UnboundedReceiver<TrialEvent>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let runner = Self {
            state: Arc::new(Mutex::new(MachineState::default())),
            timings,
            timer: Arc::new(Mutex::new(None)),
            events: events_tx,
            rng: Arc::new(Mutex::new(rng)),
        };
        (runner, events_rx)
    }

    pub async fn phase(&self) -> TrialPhase {
        self.state.lock().await.phase
    }

    pub async fn is_active(&self) -> bool {
        self.state.lock().await.is_active
    }

    /// Reset, then stage a new trial. Must be called before every
    /// `start`; the reset inside makes stale timers harmless even when
    /// the previous trial was abandoned mid-phase.
    pub async fn load_trial(&self, trial: TrialConfig) {
        {
            let mut state = self.state.lock().await;
            state.clear();
            state.trial = Some(trial);
        }
        self.clear_timer().await;
        self.emit(TrialEvent::PhaseChanged {
            phase: TrialPhase::Idle,
        });
    }

    /// Abort whatever is in flight and return to Idle. Idempotent,
    /// callable from any phase.
    pub async fn reset(&self) {
        {
            let mut state = self.state.lock().await;
            state.clear();
        }
        self.clear_timer().await;
        self.emit(TrialEvent::PhaseChanged {
            phase: TrialPhase::Idle,
        });
    }

    /// Begin the loaded trial: Idle -> Delay with a jittered duration.
    pub async fn start(&self) -> Result<()> {
        let generation = {
            let mut state = self.state.lock().await;
            if state.is_active {
                bail!("trial already active");
            }
            if state.trial.is_none() {
                bail!("no trial loaded");
            }
            state.is_active = true;
            state.phase = TrialPhase::Delay;
            state.generation
        };

        self.emit(TrialEvent::PhaseChanged {
            phase: TrialPhase::Delay,
        });

        let (delay_min, delay_max) = self.timings.delay_range_ms;
        let delay = {
            let mut rng = self.rng.lock().await;
            rng.gen_range(delay_min..=delay_max)
        };
        self.schedule(generation, TrialPhase::Delay, Duration::from_millis(delay))
            .await;
        Ok(())
    }

    /// A classified swipe from the capture side. Ignored unless the
    /// machine is sitting in Response; the pending timeout is cancelled
    /// and the result is built here, once.
    pub async fn handle_swipe(&self, outcome: SwipeOutcome) {
        let staged = {
            let mut state = self.state.lock().await;
            if !state.is_active || state.phase != TrialPhase::Response {
                // Late gesture: Response already ended, swallow it.
                return;
            }
            let Some(trial) = state.trial.as_ref() else {
                warn!("swipe received with no trial loaded, ignoring");
                return;
            };

            let answer = trial.task_type.answer_for_side(outcome.side);
            let result = TrialResult {
                trial_id: trial.trial_id.clone(),
                user_response: answer.to_string(),
                is_correct: answer == trial.correct_answer,
                response_time_ms: outcome.response_time_ms,
                trajectory_data: outcome.trajectory,
                timestamp: Utc::now(),
                no_response: false,
            };
            state.result = Some(result);
            state.phase = TrialPhase::Feedback;
            state.generation
        };

        // The response timeout loses the race; kill it before arming
        // the feedback timer.
        self.clear_timer().await;
        self.emit(TrialEvent::PhaseChanged {
            phase: TrialPhase::Feedback,
        });
        self.schedule(
            staged,
            TrialPhase::Feedback,
            Duration::from_millis(self.timings.feedback_ms),
        )
        .await;
    }

    /// Timer body: fires after the armed duration and advances out of
    /// `from`, unless the machine has moved on (generation or phase
    /// mismatch) — in which case the timer is stale and does nothing.
    async fn advance(&self, generation: u64, from: TrialPhase) {
        let step = {
            let mut state = self.state.lock().await;
            if state.generation != generation || state.phase != from || !state.is_active {
                return;
            }

            match from {
                TrialPhase::Delay => {
                    state.phase = TrialPhase::Fixation;
                    Step::Timer(
                        TrialPhase::Fixation,
                        Duration::from_millis(self.timings.fixation_ms),
                    )
                }
                TrialPhase::Fixation => {
                    state.phase = TrialPhase::Stimulus;
                    let stimulus_ms = state
                        .trial
                        .as_ref()
                        .and_then(|t| t.trial_parameters.get("stimulus_duration"))
                        .and_then(Value::as_u64)
                        .unwrap_or(self.timings.default_stimulus_ms);
                    Step::Timer(TrialPhase::Stimulus, Duration::from_millis(stimulus_ms))
                }
                TrialPhase::Stimulus => {
                    state.phase = TrialPhase::Response;
                    state.response_started = Some(Instant::now());
                    Step::Timer(
                        TrialPhase::Response,
                        Duration::from_millis(self.timings.response_timeout_ms),
                    )
                }
                TrialPhase::Response => {
                    // Timeout won the race: synthesize the no-response
                    // result with whatever window time elapsed.
                    let elapsed_ms = state
                        .response_started
                        .map(|started| started.elapsed().as_millis() as u64)
                        .unwrap_or(self.timings.response_timeout_ms);
                    let Some(trial) = state.trial.as_ref() else {
                        return;
                    };
                    state.result = Some(TrialResult {
                        trial_id: trial.trial_id.clone(),
                        user_response: "timeout".to_string(),
                        is_correct: false,
                        response_time_ms: elapsed_ms,
                        trajectory_data: Vec::new(),
                        timestamp: Utc::now(),
                        no_response: true,
                    });
                    state.phase = TrialPhase::Feedback;
                    Step::Timer(
                        TrialPhase::Feedback,
                        Duration::from_millis(self.timings.feedback_ms),
                    )
                }
                TrialPhase::Feedback => {
                    state.phase = TrialPhase::Rest;
                    Step::Timer(TrialPhase::Rest, Duration::from_millis(self.timings.rest_ms))
                }
                TrialPhase::Rest => {
                    state.phase = TrialPhase::Complete;
                    state.is_active = false;
                    Step::Complete(state.result.take())
                }
                TrialPhase::Idle | TrialPhase::Complete => return,
            }
        };

        match step {
            Step::Timer(now_in, duration) => {
                self.emit(TrialEvent::PhaseChanged { phase: now_in });
                self.schedule(generation, now_in, duration).await;
            }
            Step::Complete(result) => {
                self.emit(TrialEvent::PhaseChanged {
                    phase: TrialPhase::Complete,
                });
                match result {
                    Some(result) => self.emit(TrialEvent::Completed { result }),
                    None => warn!("trial completed without a result"),
                }
            }
        }
    }

    /// Arm the single outstanding timer. The slot's previous occupant
    /// has already fired (it is the task doing this scheduling), so it
    /// is replaced, not aborted; explicit aborts happen in
    /// `clear_timer`.
    async fn schedule(&self, generation: u64, from: TrialPhase, duration: Duration) {
        let runner = self.clone();
        let handle = tokio::spawn(async move {
            sleep(duration).await;
            runner.advance_boxed(generation, from).await;
        });

        let mut slot = self.timer.lock().await;
        *slot = Some(handle);
    }

    /// Type-erased timer body; boxing breaks the otherwise-cyclic
    /// future type of advance -> schedule -> advance.
    fn advance_boxed(
        &self,
        generation: u64,
        from: TrialPhase,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = ()> + Send + 'static>> {
        let runner = self.clone();
        Box::pin(async move { runner.advance(generation, from).await })
    }

    async fn clear_timer(&self) {
        if let Some(handle) = self.timer.lock().await.take() {
            handle.abort();
        }
    }

    fn emit(&self, event: TrialEvent) {
        // The receiver half lives with the presentation layer; if it is
        // gone there is nobody left to tell.
        let _ = self.events.send(event);
    }
}
