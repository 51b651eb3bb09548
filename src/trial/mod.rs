pub mod runner;
pub mod state;

pub use runner::{TrialEvent, TrialRunner};
pub use state::{TrialPhase, TrialTimings};
