pub mod controller;
pub mod geometry;
pub mod tracker;
pub mod worker;

pub use controller::CaptureController;
pub use geometry::CaptureGeometry;
pub use tracker::{SwipeOutcome, SwipeTracker};
pub use worker::{sample_channel, PointerEvent};
