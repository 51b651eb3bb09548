use crate::models::{TrajectoryPoint, ZoneSide};

use super::geometry::CaptureGeometry;

/// A classified swipe: which zone it ended in, the full recorded path,
/// and the gesture duration measured from the producer's timestamps.
#[derive(Debug, Clone)]
pub struct SwipeOutcome {
    pub side: ZoneSide,
    pub trajectory: Vec<TrajectoryPoint>,
    pub response_time_ms: u64,
}

/// Tracks one swipe attempt against the zone geometry.
///
/// The tracker owns its trajectory buffer; nothing else writes to it.
/// A gesture that starts outside the start-zone tolerance is ignored
/// entirely, and a gesture that ends outside both choice zones resets
/// the attempt without producing an outcome.
#[derive(Debug)]
pub struct SwipeTracker {
    geometry: CaptureGeometry,
    active: bool,
    started_at_ms: i64,
    position: (f64, f64),
    trajectory: Vec<TrajectoryPoint>,
}

impl SwipeTracker {
    pub fn new(geometry: CaptureGeometry) -> Self {
        Self {
            geometry,
            active: false,
            started_at_ms: 0,
            position: geometry.start_center(),
            trajectory: Vec::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Begin an attempt. Returns false (and records nothing) when the
    /// contact point is outside the start-zone tolerance.
    pub fn begin(&mut self, x: f64, y: f64, timestamp_ms: i64) -> bool {
        if !self.geometry.within_start_tolerance(x, y) {
            return false;
        }

        self.active = true;
        self.started_at_ms = timestamp_ms;
        self.position = (x, y);
        // Trajectory persists across a finished attempt until the next
        // gesture begins; this is where it is cleared.
        self.trajectory.clear();
        true
    }

    /// Record one movement sample. The vertical coordinate is clamped so
    /// the puck never drops below its start line.
    pub fn update(&mut self, x: f64, y: f64, timestamp_ms: i64) {
        if !self.active {
            return;
        }

        let clamped_y = self.geometry.clamp_y(y);
        self.position = (x, clamped_y);
        self.trajectory.push(TrajectoryPoint {
            x,
            y: clamped_y,
            timestamp: timestamp_ms,
        });
    }

    /// End the attempt, classifying the last tracked position. A miss
    /// returns `None` and leaves the tracker idle, ready for a retry.
    pub fn finish(&mut self, timestamp_ms: i64) -> Option<SwipeOutcome> {
        if !self.active {
            return None;
        }
        self.active = false;

        let (x, y) = self.position;
        let side = match self.geometry.classify(x, y) {
            Some(side) => side,
            None => return None,
        };

        Some(SwipeOutcome {
            side,
            trajectory: std::mem::take(&mut self.trajectory),
            response_time_ms: (timestamp_ms - self.started_at_ms).max(0) as u64,
        })
    }

    pub fn reset(&mut self) {
        self.active = false;
        self.position = self.geometry.start_center();
        self.trajectory.clear();
    }
}
