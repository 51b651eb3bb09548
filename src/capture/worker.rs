use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::geometry::CaptureGeometry;
use super::tracker::{SwipeOutcome, SwipeTracker};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = false;

use crate::{log_info, log_warn};

/// Bound on buffered pointer samples. The input thread produces faster
/// than the scheduler drains during bursts; anything beyond this is
/// back-pressure on the producer, never a reallocation here.
pub const SAMPLE_CHANNEL_CAPACITY: usize = 256;

/// Raw pointer samples pushed by the input-handling thread. Timestamps
/// are epoch milliseconds stamped at the producer.
#[derive(Debug, Clone, Copy)]
pub enum PointerEvent {
    Down { x: f64, y: f64, timestamp_ms: i64 },
    Move { x: f64, y: f64, timestamp_ms: i64 },
    Up { timestamp_ms: i64 },
}

/// Bounded handoff channel between the input thread and the capture
/// loop. The producer half is the only part of the engine an input
/// thread may touch.
pub fn sample_channel() -> (mpsc::Sender<PointerEvent>, mpsc::Receiver<PointerEvent>) {
    mpsc::channel(SAMPLE_CHANNEL_CAPACITY)
}

/// Drain pointer samples for one response window, classifying completed
/// swipes. Runs until cancelled or until the producer hangs up. Misses
/// reset the attempt without emitting anything; the response timeout is
/// owned elsewhere and keeps running.
pub async fn capture_loop(
    geometry: CaptureGeometry,
    mut samples: mpsc::Receiver<PointerEvent>,
    outcomes: mpsc::UnboundedSender<SwipeOutcome>,
    cancel_token: CancellationToken,
) {
    let mut tracker = SwipeTracker::new(geometry);

    loop {
        tokio::select! {
            event = samples.recv() => {
                let Some(event) = event else {
                    log_info!("sample producer closed, capture loop exiting");
                    break;
                };

                match event {
                    PointerEvent::Down { x, y, timestamp_ms } => {
                        if !tracker.begin(x, y, timestamp_ms) {
                            log_info!("gesture at ({x:.0}, {y:.0}) outside start tolerance, ignored");
                        }
                    }
                    PointerEvent::Move { x, y, timestamp_ms } => {
                        tracker.update(x, y, timestamp_ms);
                    }
                    PointerEvent::Up { timestamp_ms } => {
                        match tracker.finish(timestamp_ms) {
                            Some(outcome) => {
                                log_info!(
                                    "swipe classified {:?} after {} samples ({} ms)",
                                    outcome.side,
                                    outcome.trajectory.len(),
                                    outcome.response_time_ms
                                );
                                if outcomes.send(outcome).is_err() {
                                    log_warn!("outcome receiver dropped, capture loop exiting");
                                    break;
                                }
                            }
                            None => {
                                log_info!("swipe ended outside both zones, attempt reset");
                            }
                        }
                    }
                }
            }
            _ = cancel_token.cancelled() => {
                log_info!("capture loop shutting down");
                break;
            }
        }
    }
}
