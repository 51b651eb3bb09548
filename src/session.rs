use anyhow::{anyhow, bail, Context, Result};
use chrono::Utc;
use log::info;
use rand::Rng;

use crate::config::StudyConfig;
use crate::db::Database;
use crate::models::{Session, TaskType, Trial, TrialConfig, TrialResult};
use crate::sequencer::generate_trials_for_task;
use crate::sync::SyncCoordinator;

/// Owns one session from creation to completion: hands the presentation
/// layer one trial config at a time, persists each completed trial, and
/// feeds the sync queue.
pub struct SessionRunner {
    db: Database,
    sync: SyncCoordinator,
    session: Session,
    trials: Vec<TrialConfig>,
    next_index: usize,
}

impl SessionRunner {
    /// Validate the task's configuration, generate its trial block, and
    /// persist a fresh session. A config that fails validation makes
    /// the task unavailable; no session is created.
    pub async fn begin<R: Rng>(
        db: Database,
        sync: SyncCoordinator,
        study: &StudyConfig,
        device_id: &str,
        task_type: TaskType,
        rng: &mut R,
    ) -> Result<Self> {
        let task_config = study
            .task_config(task_type)
            .ok_or_else(|| anyhow!("no configuration for task {}", task_type.as_str()))?;
        let trials = generate_trials_for_task(task_type, task_config, rng)?;

        let session = Session::new(&study.study_id, device_id, task_type);
        db.put_session(&session)
            .await
            .context("failed to persist new session")?;

        info!(
            "Started {} session {} with {} trials",
            task_type.as_str(),
            session.session_id,
            trials.len()
        );

        Ok(Self {
            db,
            sync,
            session,
            trials,
            next_index: 0,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn trial_configs(&self) -> &[TrialConfig] {
        &self.trials
    }

    /// The trial awaiting a result, or `None` once the block is done.
    pub fn current_trial(&self) -> Option<&TrialConfig> {
        self.trials.get(self.next_index)
    }

    /// (completed, total)
    pub fn progress(&self) -> (usize, usize) {
        (self.next_index, self.trials.len())
    }

    pub fn is_complete(&self) -> bool {
        self.next_index >= self.trials.len()
    }

    /// Persist one trial's outcome and advance. Storage failures
    /// surface to the caller; sync enqueueing never does. Exhausting
    /// the block marks the session completed.
    pub async fn record_result(&mut self, result: TrialResult) -> Result<Trial> {
        let config = self
            .trials
            .get(self.next_index)
            .ok_or_else(|| anyhow!("no trial awaiting a result"))?;
        if config.trial_id != result.trial_id {
            bail!(
                "result for trial {} does not match current trial {}",
                result.trial_id,
                config.trial_id
            );
        }

        let trial = Trial::from_result(result, config, &self.session.session_id);
        self.db
            .put_trial(&trial)
            .await
            .context("failed to persist trial")?;
        self.sync.enqueue(&trial.trial_id).await;

        self.session.trial_ids.push(trial.trial_id.clone());
        self.next_index += 1;
        if self.next_index == self.trials.len() {
            self.session.completed = true;
            self.session.completed_at = Some(Utc::now());
            info!(
                "Session {} completed with {} trials",
                self.session.session_id,
                self.session.trial_ids.len()
            );
        }
        self.db
            .put_session(&self.session)
            .await
            .context("failed to update session")?;

        Ok(trial)
    }

    /// Record when the participant walked away. The session keeps its
    /// trials but is never marked completed.
    pub async fn abandon(&mut self) -> Result<()> {
        if self.session.completed {
            return Ok(());
        }
        self.session.completed_at = Some(Utc::now());
        self.db
            .put_session(&self.session)
            .await
            .context("failed to persist abandoned session")?;
        info!(
            "Session {} abandoned after {} trials",
            self.session.session_id, self.next_index
        );
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SessionStats {
    pub total_sessions: usize,
    pub completed_sessions: usize,
    pub total_trials: usize,
    pub average_trials_per_session: f64,
}

pub async fn session_stats(db: &Database) -> Result<SessionStats> {
    let sessions = db.list_sessions().await?;
    let total_sessions = sessions.len();
    let completed_sessions = sessions.iter().filter(|s| s.completed).count();
    let total_trials: usize = sessions.iter().map(|s| s.trial_ids.len()).sum();
    let average_trials_per_session = if total_sessions > 0 {
        total_trials as f64 / total_sessions as f64
    } else {
        0.0
    };

    Ok(SessionStats {
        total_sessions,
        completed_sessions,
        total_trials,
        average_trials_per_session,
    })
}
