pub mod api;
pub mod coordinator;

pub use api::{
    ApiEnvelope, HealthResponse, HttpTransport, SessionSyncPayload, SyncTransport,
    TrialSyncPayload,
};
pub use coordinator::{retry_delay, SyncCoordinator, RETRY_DELAYS_MS};
