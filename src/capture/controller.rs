use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::geometry::CaptureGeometry;
use super::tracker::SwipeOutcome;
use super::worker::{capture_loop, PointerEvent};

/// Owns the capture loop task for one response window: spawn on entry,
/// cancel and join on exit.
pub struct CaptureController {
    handle: Option<JoinHandle<()>>,
    cancel_token: Option<CancellationToken>,
}

impl CaptureController {
    pub fn new() -> Self {
        Self {
            handle: None,
            cancel_token: None,
        }
    }

    pub fn start_capture(
        &mut self,
        geometry: CaptureGeometry,
        samples: mpsc::Receiver<PointerEvent>,
        outcomes: mpsc::UnboundedSender<SwipeOutcome>,
    ) -> Result<()> {
        if self.handle.is_some() {
            bail!("capture already active");
        }

        let cancel_token = CancellationToken::new();
        let token_clone = cancel_token.clone();

        let handle = tokio::spawn(capture_loop(geometry, samples, outcomes, token_clone));

        self.handle = Some(handle);
        self.cancel_token = Some(cancel_token);
        Ok(())
    }

    pub async fn stop_capture(&mut self) -> Result<()> {
        if let Some(token) = self.cancel_token.take() {
            token.cancel();
        }

        if let Some(handle) = self.handle.take() {
            handle
                .await
                .context("capture loop task failed to join")
                .map(|_| ())
        } else {
            Ok(())
        }
    }
}

impl Default for CaptureController {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::worker::sample_channel;
    use crate::models::ZoneSide;

    #[tokio::test]
    async fn controller_runs_one_window_and_refuses_double_start() {
        let geometry = CaptureGeometry::new(400.0, 800.0, 700.0);
        let (sample_tx, sample_rx) = sample_channel();
        let (outcome_tx, mut outcome_rx) = mpsc::unbounded_channel();

        let mut controller = CaptureController::new();
        controller
            .start_capture(geometry, sample_rx, outcome_tx.clone())
            .unwrap();

        let (_tx2, rx2) = sample_channel();
        assert!(controller.start_capture(geometry, rx2, outcome_tx).is_err());

        sample_tx
            .send(PointerEvent::Down { x: 200.0, y: 700.0, timestamp_ms: 1_000 })
            .await
            .unwrap();
        sample_tx
            .send(PointerEvent::Move { x: 100.0, y: 150.0, timestamp_ms: 1_040 })
            .await
            .unwrap();
        sample_tx
            .send(PointerEvent::Up { timestamp_ms: 1_060 })
            .await
            .unwrap();

        let outcome = outcome_rx.recv().await.expect("classified outcome");
        assert_eq!(outcome.side, ZoneSide::Left);

        controller.stop_capture().await.unwrap();
        // Idempotent once stopped.
        controller.stop_capture().await.unwrap();
    }
}
