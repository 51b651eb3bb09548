use std::{
    convert::TryFrom,
    path::{Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread::{self, JoinHandle},
};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::{error, info};
use rusqlite::{params, Connection, Row};
use tokio::sync::oneshot;

mod migrations;

use crate::models::{FeedbackColor, Session, SyncState, TaskType, Trial};
use migrations::run_migrations;

type DbTask = Box<dyn FnOnce(&mut Connection) + Send + 'static>;

enum DbCommand {
    Execute(DbTask),
    Shutdown,
}

struct DatabaseInner {
    sender: mpsc::Sender<DbCommand>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        let mut guard = match self.worker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        if let Some(handle) = guard.take() {
            if let Err(err) = self.sender.send(DbCommand::Shutdown) {
                error!("Failed to send shutdown to DB thread: {err}");
            }
            if let Err(join_err) = handle.join() {
                error!("Failed to join DB thread: {join_err:?}");
            }
        }
    }
}

fn to_i64(value: u64) -> Result<i64> {
    i64::try_from(value).map_err(|_| anyhow!("value {value} exceeds SQLite INTEGER range"))
}

fn to_u64(value: i64, field: &str) -> Result<u64> {
    u64::try_from(value).map_err(|_| anyhow!("{field} contains negative value {value}"))
}

fn parse_datetime(value: &str, field: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .with_context(|| format!("failed to parse {field} '{value}'"))
}

fn row_to_session(row: &Row) -> Result<Session> {
    let task_type: String = row.get("task_type")?;
    let started_at: String = row.get("started_at")?;
    let completed_at: Option<String> = row.get("completed_at")?;
    let trial_ids: String = row.get("trial_ids")?;

    Ok(Session {
        session_id: row.get("session_id")?,
        study_id: row.get("study_id")?,
        device_id: row.get("device_id")?,
        task_type: TaskType::parse(&task_type)?,
        period_type: row.get("period_type")?,
        session_date: row.get("session_date")?,
        started_at: parse_datetime(&started_at, "started_at")?,
        completed_at: completed_at
            .map(|raw| parse_datetime(&raw, "completed_at"))
            .transpose()?,
        completed: row.get::<_, i64>("completed")? != 0,
        is_practice: row.get::<_, i64>("is_practice")? != 0,
        is_post_study: row.get::<_, i64>("is_post_study")? != 0,
        trial_ids: serde_json::from_str(&trial_ids).context("failed to parse trial_ids")?,
    })
}

fn row_to_trial(row: &Row) -> Result<Trial> {
    let task_type: String = row.get("task_type")?;
    let parameters: String = row.get("trial_parameters")?;
    let trajectory: String = row.get("trajectory_data")?;
    let feedback: String = row.get("feedback_shown")?;
    let timestamp: String = row.get("timestamp")?;

    Ok(Trial {
        trial_id: row.get("trial_id")?,
        session_id: row.get("session_id")?,
        task_type: TaskType::parse(&task_type)?,
        trial_number: row.get::<_, i64>("trial_number")? as u32,
        trial_parameters: serde_json::from_str(&parameters)
            .context("failed to parse trial_parameters")?,
        user_response: row.get("user_response")?,
        correct_answer: row.get("correct_answer")?,
        is_correct: row.get::<_, i64>("is_correct")? != 0,
        response_time_ms: to_u64(row.get::<_, i64>("response_time_ms")?, "response_time_ms")?,
        trajectory_data: serde_json::from_str(&trajectory)
            .context("failed to parse trajectory_data")?,
        feedback_shown: FeedbackColor::parse(&feedback)?,
        no_response: row.get::<_, i64>("no_response")? != 0,
        timestamp: parse_datetime(&timestamp, "timestamp")?,
        synced: row.get::<_, i64>("synced")? != 0,
    })
}

#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
    db_path: Arc<PathBuf>,
}

impl Database {
    pub fn new(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create database directory {}", parent.display())
            })?;
        }

        let (command_tx, command_rx) = mpsc::channel::<DbCommand>();
        let (ready_tx, ready_rx) = mpsc::channel();
        let path_for_thread = db_path.clone();

        let worker = thread::Builder::new()
            .name("swipelab-db".into())
            .spawn(move || {
                let mut conn = match Connection::open(&path_for_thread) {
                    Ok(connection) => connection,
                    Err(err) => {
                        let _ = ready_tx.send(Err(anyhow::Error::new(err)
                            .context("failed to open SQLite database")));
                        return;
                    }
                };

                if let Err(err) = conn.pragma_update(None, "journal_mode", "WAL") {
                    error!("Failed to enable WAL mode: {err}");
                }
                if let Err(err) = conn.pragma_update(None, "foreign_keys", "ON") {
                    error!("Failed to enable foreign keys: {err}");
                }

                let init_result =
                    run_migrations(&mut conn).context("failed to run database migrations");
                if ready_tx.send(init_result).is_err() {
                    error!("DB initialization receiver dropped before ready signal");
                    return;
                }

                while let Ok(command) = command_rx.recv() {
                    match command {
                        DbCommand::Execute(task) => {
                            task(&mut conn);
                        }
                        DbCommand::Shutdown => break,
                    }
                }

                info!("Database thread shutting down");
            })
            .with_context(|| "failed to spawn database worker thread")?;

        ready_rx
            .recv()
            .context("database worker exited before signaling readiness")??;

        info!("Database initialized at {}", db_path.as_path().display());

        Ok(Self {
            inner: Arc::new(DatabaseInner {
                sender: command_tx,
                worker: Mutex::new(Some(worker)),
            }),
            db_path: Arc::new(db_path),
        })
    }

    pub fn path(&self) -> &Path {
        self.db_path.as_path()
    }

    pub async fn execute<F, T>(&self, task: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let sender = self.inner.sender.clone();
        let (reply_tx, reply_rx) = oneshot::channel();

        let command = DbCommand::Execute(Box::new(move |conn| {
            let result = task(conn);
            if reply_tx.send(result).is_err() {
                error!("DB caller dropped before receiving result");
            }
        }));

        sender
            .send(command)
            .map_err(|err| anyhow!("failed to send command to DB thread: {err}"))?;

        reply_rx
            .await
            .map_err(|_| anyhow!("database thread terminated unexpectedly"))?
    }

    // ---- sessions ----

    /// Upsert; the last write for a session id wins.
    pub async fn put_session(&self, session: &Session) -> Result<()> {
        let record = session.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sessions
                 (session_id, study_id, device_id, task_type, period_type, session_date,
                  started_at, completed_at, completed, is_practice, is_post_study, trial_ids)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
                params![
                    record.session_id,
                    record.study_id,
                    record.device_id,
                    record.task_type.as_str(),
                    record.period_type,
                    record.session_date,
                    record.started_at.to_rfc3339(),
                    record.completed_at.as_ref().map(|dt| dt.to_rfc3339()),
                    record.completed as i64,
                    record.is_practice as i64,
                    record.is_post_study as i64,
                    serde_json::to_string(&record.trial_ids)?,
                ],
            )
            .with_context(|| "failed to write session")?;
            Ok(())
        })
        .await
    }

    /// A missing id is `None`; a corrupt row is logged and also `None`.
    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM sessions WHERE session_id = ?1")?;
            let mut rows = stmt.query(params![session_id])?;
            match rows.next()? {
                Some(row) => match row_to_session(row) {
                    Ok(session) => Ok(Some(session)),
                    Err(err) => {
                        error!("Discarding corrupt session row {session_id}: {err:?}");
                        Ok(None)
                    }
                },
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>> {
        self.execute(|conn| {
            let mut stmt = conn.prepare("SELECT * FROM sessions ORDER BY started_at DESC")?;
            let mut rows = stmt.query([])?;
            let mut sessions = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_session(row) {
                    Ok(session) => sessions.push(session),
                    Err(err) => error!("Skipping corrupt session row: {err:?}"),
                }
            }
            Ok(sessions)
        })
        .await
    }

    // ---- trials ----

    /// Upsert; the last write for a trial id wins.
    pub async fn put_trial(&self, trial: &Trial) -> Result<()> {
        let record = trial.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO trials
                 (trial_id, session_id, task_type, trial_number, trial_parameters,
                  user_response, correct_answer, is_correct, response_time_ms,
                  trajectory_data, feedback_shown, no_response, timestamp, synced)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
                params![
                    record.trial_id,
                    record.session_id,
                    record.task_type.as_str(),
                    record.trial_number as i64,
                    serde_json::to_string(&record.trial_parameters)?,
                    record.user_response,
                    record.correct_answer,
                    record.is_correct as i64,
                    to_i64(record.response_time_ms)?,
                    serde_json::to_string(&record.trajectory_data)?,
                    record.feedback_shown.as_str(),
                    record.no_response as i64,
                    record.timestamp.to_rfc3339(),
                    record.synced as i64,
                ],
            )
            .with_context(|| "failed to write trial")?;
            Ok(())
        })
        .await
    }

    pub async fn get_trial(&self, trial_id: &str) -> Result<Option<Trial>> {
        let trial_id = trial_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare("SELECT * FROM trials WHERE trial_id = ?1")?;
            let mut rows = stmt.query(params![trial_id])?;
            match rows.next()? {
                Some(row) => match row_to_trial(row) {
                    Ok(trial) => Ok(Some(trial)),
                    Err(err) => {
                        error!("Discarding corrupt trial row {trial_id}: {err:?}");
                        Ok(None)
                    }
                },
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn list_trials_for_session(&self, session_id: &str) -> Result<Vec<Trial>> {
        let session_id = session_id.to_string();
        self.execute(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT * FROM trials WHERE session_id = ?1 ORDER BY trial_number ASC",
            )?;
            let mut rows = stmt.query(params![session_id])?;
            let mut trials = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_trial(row) {
                    Ok(trial) => trials.push(trial),
                    Err(err) => error!("Skipping corrupt trial row: {err:?}"),
                }
            }
            Ok(trials)
        })
        .await
    }

    pub async fn list_unsynced_trials(&self) -> Result<Vec<Trial>> {
        self.execute(|conn| {
            let mut stmt =
                conn.prepare("SELECT * FROM trials WHERE synced = 0 ORDER BY timestamp ASC")?;
            let mut rows = stmt.query([])?;
            let mut trials = Vec::new();
            while let Some(row) = rows.next()? {
                match row_to_trial(row) {
                    Ok(trial) => trials.push(trial),
                    Err(err) => error!("Skipping corrupt trial row: {err:?}"),
                }
            }
            Ok(trials)
        })
        .await
    }

    pub async fn mark_trials_synced(&self, trial_ids: &[String]) -> Result<()> {
        let trial_ids = trial_ids.to_vec();
        self.execute(move |conn| {
            let tx = conn.transaction()?;
            {
                let mut stmt = tx.prepare("UPDATE trials SET synced = 1 WHERE trial_id = ?1")?;
                for trial_id in &trial_ids {
                    stmt.execute(params![trial_id])?;
                }
            }
            tx.commit().with_context(|| "failed to mark trials synced")?;
            Ok(())
        })
        .await
    }

    // ---- sync state ----

    pub async fn get_sync_state(&self) -> Result<Option<SyncState>> {
        self.execute(|conn| {
            let mut stmt = conn
                .prepare("SELECT trial_ids, last_sync_attempt, retry_count FROM sync_state WHERE id = 1")?;
            let mut rows = stmt.query([])?;
            match rows.next()? {
                Some(row) => {
                    let trial_ids: String = row.get(0)?;
                    let last_attempt: String = row.get(1)?;
                    let parsed = (|| -> Result<SyncState> {
                        Ok(SyncState {
                            trial_ids: serde_json::from_str(&trial_ids)
                                .context("failed to parse sync_state trial_ids")?,
                            last_sync_attempt: parse_datetime(&last_attempt, "last_sync_attempt")?,
                            retry_count: row.get::<_, i64>(2)? as u32,
                        })
                    })();
                    match parsed {
                        Ok(state) => Ok(Some(state)),
                        Err(err) => {
                            error!("Discarding corrupt sync_state row: {err:?}");
                            Ok(None)
                        }
                    }
                }
                None => Ok(None),
            }
        })
        .await
    }

    pub async fn put_sync_state(&self, state: &SyncState) -> Result<()> {
        let record = state.clone();
        self.execute(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO sync_state (id, trial_ids, last_sync_attempt, retry_count)
                 VALUES (1, ?1, ?2, ?3)",
                params![
                    serde_json::to_string(&record.trial_ids)?,
                    record.last_sync_attempt.to_rfc3339(),
                    record.retry_count as i64,
                ],
            )
            .with_context(|| "failed to write sync state")?;
            Ok(())
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{TrajectoryPoint, TrialConfig, TrialResult};

    fn test_db() -> (tempfile::TempDir, Database) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("swipelab.sqlite3")).unwrap();
        (dir, db)
    }

    fn sample_trial(trial_id: &str, session_id: &str) -> Trial {
        let config = TrialConfig {
            trial_id: trial_id.into(),
            trial_number: 1,
            task_type: TaskType::Calibration,
            correct_answer: "left".into(),
            trial_parameters: serde_json::json!({ "direction": "left" }),
        };
        let result = TrialResult {
            trial_id: trial_id.into(),
            user_response: "left".into(),
            is_correct: true,
            response_time_ms: 350,
            trajectory_data: vec![TrajectoryPoint {
                x: 180.0,
                y: 420.0,
                timestamp: 1_700_000_000_000,
            }],
            timestamp: Utc::now(),
            no_response: false,
        };
        Trial::from_result(result, &config, session_id)
    }

    #[tokio::test]
    async fn session_round_trip_and_absence() {
        let (_dir, db) = test_db();

        assert!(db.get_session("nope").await.unwrap().is_none());

        let mut session = Session::new("study-1", "device-1", TaskType::Calibration);
        db.put_session(&session).await.unwrap();

        session.trial_ids.push("t-1".into());
        session.completed = true;
        session.completed_at = Some(Utc::now());
        db.put_session(&session).await.unwrap();

        let loaded = db.get_session(&session.session_id).await.unwrap().unwrap();
        assert!(loaded.completed);
        assert_eq!(loaded.trial_ids, vec!["t-1".to_string()]);
        assert_eq!(db.list_sessions().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn unsynced_listing_and_mark_synced() {
        let (_dir, db) = test_db();

        let a = sample_trial("t-a", "s-1");
        let b = sample_trial("t-b", "s-1");
        db.put_trial(&a).await.unwrap();
        db.put_trial(&b).await.unwrap();

        assert_eq!(db.list_unsynced_trials().await.unwrap().len(), 2);

        db.mark_trials_synced(&["t-a".to_string()]).await.unwrap();
        let unsynced = db.list_unsynced_trials().await.unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].trial_id, "t-b");
        assert!(db.get_trial("t-a").await.unwrap().unwrap().synced);

        assert_eq!(db.list_trials_for_session("s-1").await.unwrap().len(), 2);
        assert!(db.get_trial("missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn sync_state_round_trip() {
        let (_dir, db) = test_db();

        assert!(db.get_sync_state().await.unwrap().is_none());

        let state = SyncState {
            trial_ids: vec!["t-1".into(), "t-2".into()],
            last_sync_attempt: Utc::now(),
            retry_count: 3,
        };
        db.put_sync_state(&state).await.unwrap();

        let loaded = db.get_sync_state().await.unwrap().unwrap();
        assert_eq!(loaded.trial_ids, state.trial_ids);
        assert_eq!(loaded.retry_count, 3);
    }
}
