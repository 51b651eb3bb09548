//! End-to-end session + sync coverage against a scriptable in-memory
//! transport: the full record/persist/queue path, batching by session,
//! single-flight, retry accounting, and crash recovery of the queue.

use std::sync::{
    atomic::{AtomicU32, AtomicUsize, Ordering},
    Arc,
};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::Utc;
use rand::{rngs::StdRng, SeedableRng};
use tokio::sync::{oneshot, Mutex};

use swipelab::sync::{HealthResponse, SessionSyncPayload, SyncTransport, TrialSyncPayload};
use swipelab::{
    Database, SessionRunner, StudyConfig, SyncCoordinator, TaskType, TrialResult,
};

#[derive(Default)]
struct FakeTransport {
    /// Remaining post_trials calls that should fail.
    fail_trial_posts: AtomicU32,
    /// Remaining post_session calls that should fail.
    fail_session_posts: AtomicU32,
    trial_calls: AtomicUsize,
    session_calls: AtomicUsize,
    batches: Mutex<Vec<(String, usize)>>,
    sessions_seen: Mutex<Vec<String>>,
    /// When set, post_trials blocks until the sender fires.
    gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeTransport {
    fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

#[async_trait]
impl SyncTransport for FakeTransport {
    async fn post_session(&self, payload: &SessionSyncPayload) -> Result<()> {
        self.session_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_session_posts.load(Ordering::SeqCst) > 0 {
            self.fail_session_posts.fetch_sub(1, Ordering::SeqCst);
            bail!("session endpoint unavailable");
        }
        self.sessions_seen
            .lock()
            .await
            .push(payload.session.session_id.clone());
        Ok(())
    }

    async fn post_trials(&self, payload: &TrialSyncPayload) -> Result<()> {
        let gate = self.gate.lock().await.take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }

        self.trial_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_trial_posts.load(Ordering::SeqCst) > 0 {
            self.fail_trial_posts.fetch_sub(1, Ordering::SeqCst);
            bail!("trial endpoint unavailable");
        }
        self.batches
            .lock()
            .await
            .push((payload.session_id.clone(), payload.trials.len()));
        Ok(())
    }

    async fn health(&self) -> Result<HealthResponse> {
        Ok(HealthResponse {
            status: "healthy".into(),
            database: "connected".into(),
        })
    }
}

fn test_db(dir: &tempfile::TempDir) -> Database {
    Database::new(dir.path().join("swipelab.sqlite3")).unwrap()
}

/// Run a full calibration session, answering every trial correctly.
async fn run_calibration_session(
    db: &Database,
    sync: &SyncCoordinator,
) -> swipelab::Session {
    let study = StudyConfig::default_study();
    let mut rng = StdRng::seed_from_u64(11);
    let mut runner = SessionRunner::begin(
        db.clone(),
        sync.clone(),
        &study,
        "device-test",
        TaskType::Calibration,
        &mut rng,
    )
    .await
    .unwrap();

    while let Some(config) = runner.current_trial().cloned() {
        let result = TrialResult {
            trial_id: config.trial_id.clone(),
            user_response: config.correct_answer.clone(),
            is_correct: true,
            response_time_ms: 420,
            trajectory_data: Vec::new(),
            timestamp: Utc::now(),
            no_response: false,
        };
        runner.record_result(result).await.unwrap();
    }

    assert!(runner.is_complete());
    runner.session().clone()
}

#[tokio::test]
async fn completed_session_is_persisted_queued_and_synced() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    let session = run_calibration_session(&db, &sync).await;

    let stored = db.get_session(&session.session_id).await.unwrap().unwrap();
    assert!(stored.completed);
    assert!(stored.completed_at.is_some());
    assert_eq!(stored.trial_ids.len(), 10);
    assert_eq!(
        db.list_trials_for_session(&session.session_id)
            .await
            .unwrap()
            .len(),
        10
    );
    assert_eq!(sync.pending_count().await, 10);

    sync.attempt_sync().await;

    assert_eq!(sync.pending_count().await, 0);
    assert_eq!(sync.retry_count(), 0);
    assert!(db.list_unsynced_trials().await.unwrap().is_empty());

    // One metadata push, one batch of ten.
    assert_eq!(
        *transport.sessions_seen.lock().await,
        vec![session.session_id.clone()]
    );
    assert_eq!(
        *transport.batches.lock().await,
        vec![(session.session_id.clone(), 10)]
    );

    assert!(sync.collector_healthy().await);
}

#[tokio::test]
async fn failed_delivery_keeps_the_queue_and_counts_retries() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    transport.fail_trial_posts.store(2, Ordering::SeqCst);
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    run_calibration_session(&db, &sync).await;

    sync.attempt_sync().await;
    assert_eq!(sync.pending_count().await, 10);
    assert_eq!(sync.retry_count(), 1);
    assert_eq!(db.list_unsynced_trials().await.unwrap().len(), 10);

    sync.attempt_sync().await;
    assert_eq!(sync.retry_count(), 2);

    // Third attempt goes through and resets the counter.
    sync.attempt_sync().await;
    assert_eq!(sync.pending_count().await, 0);
    assert_eq!(sync.retry_count(), 0);
    assert!(db.list_unsynced_trials().await.unwrap().is_empty());

    sync.shutdown().await;
}

#[tokio::test]
async fn session_metadata_failure_does_not_block_the_trial_batch() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    transport.fail_session_posts.store(1, Ordering::SeqCst);
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    run_calibration_session(&db, &sync).await;
    sync.attempt_sync().await;

    // Trials landed despite the metadata failure.
    assert_eq!(sync.pending_count().await, 0);
    assert_eq!(sync.retry_count(), 0);
    assert_eq!(transport.batches.lock().await.len(), 1);
    assert!(transport.sessions_seen.lock().await.is_empty());
}

#[tokio::test]
async fn overlapping_sync_attempts_are_single_flight() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    run_calibration_session(&db, &sync).await;

    // First attempt parks inside post_trials until released.
    let (release, gate) = oneshot::channel();
    *transport.gate.lock().await = Some(gate);

    let first = {
        let sync = sync.clone();
        tokio::spawn(async move { sync.attempt_sync().await })
    };

    // Wait until the first attempt is inside the transport.
    while transport.gate.lock().await.is_some() {
        tokio::task::yield_now().await;
    }

    // Second attempt must bail out immediately.
    sync.attempt_sync().await;
    assert_eq!(transport.trial_calls.load(Ordering::SeqCst), 0);

    release.send(()).unwrap();
    first.await.unwrap();

    assert_eq!(transport.trial_calls.load(Ordering::SeqCst), 1);
    assert_eq!(sync.pending_count().await, 0);
}

#[tokio::test]
async fn pending_queue_survives_a_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    transport.fail_trial_posts.store(1, Ordering::SeqCst);

    {
        let sync = SyncCoordinator::new(db.clone(), transport.clone());
        run_calibration_session(&db, &sync).await;
        sync.attempt_sync().await;
        assert_eq!(sync.retry_count(), 1);
        sync.shutdown().await;
    }

    // New process: the mirror restores both the queue and the counter.
    let sync = SyncCoordinator::new(db.clone(), transport.clone());
    sync.load().await.unwrap();
    assert_eq!(sync.pending_count().await, 10);
    assert_eq!(sync.retry_count(), 1);

    sync.attempt_sync().await;
    assert_eq!(sync.pending_count().await, 0);
    assert_eq!(sync.retry_count(), 0);
}

#[tokio::test]
async fn already_synced_trials_fall_out_of_the_queue() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    let session = run_calibration_session(&db, &sync).await;

    // Simulate a crash after the collector stored half the batch: those
    // trials are already marked synced locally.
    let first_half: Vec<String> = session.trial_ids.iter().take(5).cloned().collect();
    db.mark_trials_synced(&first_half).await.unwrap();

    sync.attempt_sync().await;

    assert_eq!(
        *transport.batches.lock().await,
        vec![(session.session_id.clone(), 5)]
    );
    assert_eq!(sync.pending_count().await, 0);
}

#[tokio::test]
async fn orphan_trials_stay_queued_without_counting_as_failures() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    // A trial whose session never made it to the store.
    let config = swipelab::TrialConfig {
        trial_id: "orphan-1".into(),
        trial_number: 1,
        task_type: TaskType::Calibration,
        correct_answer: "left".into(),
        trial_parameters: serde_json::json!({ "direction": "left" }),
    };
    let result = TrialResult {
        trial_id: "orphan-1".into(),
        user_response: "left".into(),
        is_correct: true,
        response_time_ms: 300,
        trajectory_data: Vec::new(),
        timestamp: Utc::now(),
        no_response: false,
    };
    let trial = swipelab::Trial::from_result(result, &config, "ghost-session");
    db.put_trial(&trial).await.unwrap();
    sync.enqueue(&trial.trial_id).await;

    sync.attempt_sync().await;

    assert_eq!(sync.pending_count().await, 1);
    assert_eq!(sync.retry_count(), 0);
    assert_eq!(transport.trial_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn force_sync_resets_the_retry_counter_first() {
    let dir = tempfile::tempdir().unwrap();
    let db = test_db(&dir);
    let transport = FakeTransport::new();
    transport.fail_trial_posts.store(1, Ordering::SeqCst);
    let sync = SyncCoordinator::new(db.clone(), transport.clone());

    run_calibration_session(&db, &sync).await;
    sync.attempt_sync().await;
    assert_eq!(sync.retry_count(), 1);

    sync.force_sync().await;
    assert_eq!(sync.retry_count(), 0);
    assert_eq!(sync.pending_count().await, 0);
}
