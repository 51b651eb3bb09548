mod session;
mod trial;

pub use session::Session;
pub use trial::{
    FeedbackColor, SyncState, TaskType, Trial, TrialConfig, TrialResult, TrajectoryPoint,
    ZoneSide,
};
