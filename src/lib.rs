//! Engine for gesture-based, timed perceptual-decision experiments.
//!
//! The crate sequences counterbalanced trial blocks, drives each trial
//! through its timed phases, classifies swipe responses against zone
//! geometry, persists trial and session records locally, and delivers
//! them to a remote collector with at-least-once semantics.
//!
//! The embedding application owns presentation (stimulus rendering,
//! screens) and wires the pieces together: generate a block with
//! [`SessionRunner::begin`], feed each [`TrialConfig`] to a
//! [`TrialRunner`], pump pointer samples into the capture channel
//! during the response window, and hand completed results back to the
//! session runner. Sync runs in the background via [`SyncCoordinator`].
//!
//! Logging uses the `log` facade; call [`init_logging`] from a binary
//! (or install your own logger) to see it.

pub mod capture;
pub mod config;
pub mod db;
pub mod models;
pub mod sequencer;
pub mod session;
pub mod sync;
pub mod trial;
mod utils;

pub use capture::{
    sample_channel, CaptureController, CaptureGeometry, PointerEvent, SwipeOutcome, SwipeTracker,
};
pub use config::{ConfigStore, StudyConfig, TaskConfig, TrialSettings};
pub use db::Database;
pub use models::{
    FeedbackColor, Session, SyncState, TaskType, Trial, TrialConfig, TrialResult, TrajectoryPoint,
    ZoneSide,
};
pub use session::{session_stats, SessionRunner, SessionStats};
pub use sync::{HttpTransport, SyncCoordinator, SyncTransport};
pub use trial::{TrialEvent, TrialPhase, TrialRunner, TrialTimings};

/// Initialize `env_logger` for embedding binaries (reads `RUST_LOG`).
/// Safe to call more than once; later calls are no-ops.
pub fn init_logging() {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();
}
