use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskType;

/// One run of a task's trial block for a participant.
///
/// Created when the run starts, mutated only to append trial ids as
/// trials complete, and marked completed once the generated sequence
/// is exhausted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub study_id: String,
    pub device_id: String,
    pub task_type: TaskType,
    pub period_type: String,
    /// Calendar day of the run, `YYYY-MM-DD` in UTC.
    pub session_date: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed: bool,
    pub is_practice: bool,
    pub is_post_study: bool,
    pub trial_ids: Vec<String>,
}

impl Session {
    pub fn new(study_id: &str, device_id: &str, task_type: TaskType) -> Self {
        let now = Utc::now();
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            study_id: study_id.to_string(),
            device_id: device_id.to_string(),
            task_type,
            period_type: "anytime".to_string(),
            session_date: now.format("%Y-%m-%d").to_string(),
            started_at: now,
            completed_at: None,
            completed: false,
            is_practice: false,
            is_post_study: false,
            trial_ids: Vec::new(),
        }
    }
}
