use std::{
    collections::HashSet,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, AtomicU32, Ordering},
        Arc,
    },
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use tokio::{
    sync::Mutex,
    task::JoinHandle,
    time::{sleep, Duration},
};

use crate::db::Database;
use crate::models::{SyncState, Trial};

use super::api::{SessionSyncPayload, SyncTransport, TrialSyncPayload};

// Set to true to enable verbose logging in this module
const ENABLE_LOGS: bool = true;

use crate::{log_error, log_info, log_warn};

/// Escalating retry schedule: 5s, 30s, 2min, 10min, 1h, 24h. Attempts
/// past the end stay at 24h; retries never cease.
pub const RETRY_DELAYS_MS: [u64; 6] = [5_000, 30_000, 120_000, 600_000, 3_600_000, 86_400_000];

pub fn retry_delay(retry_count: u32) -> Duration {
    let index = (retry_count as usize).min(RETRY_DELAYS_MS.len() - 1);
    Duration::from_millis(RETRY_DELAYS_MS[index])
}

struct SyncInner {
    db: Database,
    transport: Arc<dyn SyncTransport>,
    /// Ordered pending trial ids; mirrored into the store on every
    /// change so a crash can rebuild it.
    queue: Mutex<Vec<String>>,
    in_flight: AtomicBool,
    retry_count: AtomicU32,
    last_attempt: Mutex<Option<DateTime<Utc>>>,
    /// Sessions whose metadata the collector has acknowledged this
    /// process lifetime; metadata is re-pushed after a restart, which
    /// the collector tolerates.
    acked_sessions: Mutex<HashSet<String>>,
    retry_task: Mutex<Option<JoinHandle<()>>>,
}

/// Delivers completed trials to the collector, at least once.
///
/// Only this coordinator touches the pending queue and its persisted
/// mirror. `attempt_sync` is single-flight; overlapping calls return
/// immediately.
#[derive(Clone)]
pub struct SyncCoordinator {
    inner: Arc<SyncInner>,
}

impl SyncCoordinator {
    pub fn new(db: Database, transport: Arc<dyn SyncTransport>) -> Self {
        Self {
            inner: Arc::new(SyncInner {
                db,
                transport,
                queue: Mutex::new(Vec::new()),
                in_flight: AtomicBool::new(false),
                retry_count: AtomicU32::new(0),
                last_attempt: Mutex::new(None),
                acked_sessions: Mutex::new(HashSet::new()),
                retry_task: Mutex::new(None),
            }),
        }
    }

    /// Restore the pending queue from the persisted mirror. Call once
    /// at startup, before any trial completes.
    pub async fn load(&self) -> Result<()> {
        if let Some(state) = self.inner.db.get_sync_state().await? {
            let count = state.trial_ids.len();
            *self.inner.queue.lock().await = state.trial_ids;
            self.inner
                .retry_count
                .store(state.retry_count, Ordering::Release);
            *self.inner.last_attempt.lock().await = Some(state.last_sync_attempt);
            log_info!("restored {count} pending trials from sync state");
        }
        Ok(())
    }

    /// Queue a trial for delivery. Deduplicated; the mirror is updated
    /// immediately. Failures here are logged, never surfaced — the
    /// caller just finished a trial and must not see sync trouble.
    pub async fn enqueue(&self, trial_id: &str) {
        {
            let mut queue = self.inner.queue.lock().await;
            if queue.iter().any(|id| id == trial_id) {
                return;
            }
            queue.push(trial_id.to_string());
        }
        log_info!("queued trial {trial_id} for sync");
        self.persist_state().await;
    }

    pub async fn pending_count(&self) -> usize {
        self.inner.queue.lock().await.len()
    }

    pub fn retry_count(&self) -> u32 {
        self.inner.retry_count.load(Ordering::Acquire)
    }

    /// Push everything pending to the collector. No-op when a sync is
    /// already in flight. Failures are converted into a scheduled
    /// retry; nothing is surfaced to the caller.
    pub async fn attempt_sync(&self) {
        if self
            .inner
            .in_flight
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            log_info!("sync already in progress, skipping");
            return;
        }

        *self.inner.last_attempt.lock().await = Some(Utc::now());
        let outcome = self.drain_queue().await;
        self.inner.in_flight.store(false, Ordering::Release);

        let failed = match outcome {
            Ok(failed) => failed,
            Err(err) => {
                log_error!("sync attempt aborted: {err:?}");
                true
            }
        };

        if failed {
            let retries = self.inner.retry_count.fetch_add(1, Ordering::AcqRel) + 1;
            self.persist_state().await;
            self.schedule_retry(retries).await;
        } else {
            self.inner.retry_count.store(0, Ordering::Release);
            self.persist_state().await;
        }
    }

    /// Whether the collector is reachable and reports a connected
    /// database. Transport errors read as unhealthy, never as errors.
    pub async fn collector_healthy(&self) -> bool {
        match self.inner.transport.health().await {
            Ok(health) => health.is_healthy(),
            Err(err) => {
                log_info!("health check failed: {err:#}");
                false
            }
        }
    }

    /// Clear any scheduled retry and push immediately with a fresh
    /// retry counter.
    pub async fn force_sync(&self) {
        if let Some(handle) = self.inner.retry_task.lock().await.take() {
            handle.abort();
        }
        self.inner.retry_count.store(0, Ordering::Release);
        self.attempt_sync().await;
    }

    /// Cancel the retry task and persist the queue mirror.
    pub async fn shutdown(&self) {
        if let Some(handle) = self.inner.retry_task.lock().await.take() {
            handle.abort();
        }
        self.persist_state().await;
    }

    /// One pass over the queue, grouped by session. Returns whether any
    /// group failed and stayed queued.
    async fn drain_queue(&self) -> Result<bool> {
        let ids: Vec<String> = self.inner.queue.lock().await.clone();
        if ids.is_empty() {
            log_info!("no trials pending sync");
            return Ok(false);
        }

        // Trials that vanished or were already delivered drop out of
        // the queue here.
        let mut pending: Vec<Trial> = Vec::new();
        let mut stale: Vec<String> = Vec::new();
        for id in &ids {
            match self.inner.db.get_trial(id).await? {
                Some(trial) if !trial.synced => pending.push(trial),
                _ => stale.push(id.clone()),
            }
        }
        if !stale.is_empty() {
            self.remove_from_queue(&stale).await;
        }
        if pending.is_empty() {
            return Ok(false);
        }

        // Group by session, preserving queue order.
        let mut groups: Vec<(String, Vec<Trial>)> = Vec::new();
        for trial in pending {
            match groups.iter_mut().find(|(sid, _)| *sid == trial.session_id) {
                Some((_, list)) => list.push(trial),
                None => groups.push((trial.session_id.clone(), vec![trial])),
            }
        }

        let mut any_failed = false;
        for (session_id, trials) in groups {
            let session = match self.inner.db.get_session(&session_id).await? {
                Some(session) => session,
                None => {
                    log_error!("session {session_id} not found for trial sync");
                    continue;
                }
            };
            let device_id = session.device_id.clone();

            let already_acked = self.inner.acked_sessions.lock().await.contains(&session_id);
            if !already_acked {
                let payload = SessionSyncPayload {
                    study_id: session.study_id.clone(),
                    device_id: device_id.clone(),
                    session,
                };
                match self.inner.transport.post_session(&payload).await {
                    Ok(()) => {
                        self.inner
                            .acked_sessions
                            .lock()
                            .await
                            .insert(session_id.clone());
                    }
                    Err(err) => {
                        // Trials can still land; the metadata push will
                        // happen again next attempt.
                        log_warn!("session metadata sync failed, continuing with trials: {err:#}");
                    }
                }
            }

            let trial_ids: Vec<String> = trials.iter().map(|t| t.trial_id.clone()).collect();
            let batch_size = trials.len();
            let payload = TrialSyncPayload {
                trials,
                session_id: session_id.clone(),
                device_id,
            };
            match self.inner.transport.post_trials(&payload).await {
                Ok(()) => {
                    self.inner.db.mark_trials_synced(&trial_ids).await?;
                    self.remove_from_queue(&trial_ids).await;
                    log_info!("synced {batch_size} trials for session {session_id}");
                }
                Err(err) => {
                    log_warn!("trial sync failed for session {session_id}: {err:#}");
                    any_failed = true;
                }
            }
        }

        Ok(any_failed)
    }

    async fn remove_from_queue(&self, trial_ids: &[String]) {
        let mut queue = self.inner.queue.lock().await;
        queue.retain(|id| !trial_ids.contains(id));
    }

    async fn persist_state(&self) {
        let state = SyncState {
            trial_ids: self.inner.queue.lock().await.clone(),
            last_sync_attempt: self
                .inner
                .last_attempt
                .lock()
                .await
                .unwrap_or(DateTime::UNIX_EPOCH),
            retry_count: self.inner.retry_count.load(Ordering::Acquire),
        };
        if let Err(err) = self.inner.db.put_sync_state(&state).await {
            log_error!("failed to persist sync state: {err:?}");
        }
    }

    async fn schedule_retry(&self, retry_count: u32) {
        let delay = retry_delay(retry_count);
        log_info!("scheduling sync retry in {delay:?} (attempt {retry_count})");

        let coordinator = self.clone();
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            coordinator.attempt_sync_boxed().await;
        });

        let mut slot = self.inner.retry_task.lock().await;
        if let Some(old) = slot.take() {
            old.abort();
        }
        *slot = Some(handle);
    }

    /// Type-erased re-entry point for the retry task; boxing breaks the
    /// otherwise-cyclic future type of attempt_sync -> schedule_retry
    /// -> attempt_sync.
    fn attempt_sync_boxed(&self) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        let coordinator = self.clone();
        Box::pin(async move { coordinator.attempt_sync().await })
    }
}
