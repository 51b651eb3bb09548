use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Task families the engine can sequence and run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    Calibration,
    DotKinematogram,
    HaloTravel,
}

impl TaskType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskType::Calibration => "calibration",
            TaskType::DotKinematogram => "dot_kinematogram",
            TaskType::HaloTravel => "halo_travel",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "calibration" => Ok(TaskType::Calibration),
            "dot_kinematogram" => Ok(TaskType::DotKinematogram),
            "halo_travel" => Ok(TaskType::HaloTravel),
            other => Err(anyhow!("unknown task type '{other}'")),
        }
    }

    /// Answer label a given choice zone maps to for this task.
    /// Calibration and dot motion use spatial labels; halo travel
    /// presents its two stimuli as A (left zone) and B (right zone).
    pub fn answer_for_side(&self, side: ZoneSide) -> &'static str {
        match (self, side) {
            (TaskType::HaloTravel, ZoneSide::Left) => "A",
            (TaskType::HaloTravel, ZoneSide::Right) => "B",
            (_, ZoneSide::Left) => "left",
            (_, ZoneSide::Right) => "right",
        }
    }
}

/// Which choice zone a swipe ended in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZoneSide {
    Left,
    Right,
}

/// One pointer sample captured during a response attempt.
/// Timestamps are epoch milliseconds stamped by the input producer;
/// within one trajectory they are non-decreasing.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct TrajectoryPoint {
    pub x: f64,
    pub y: f64,
    pub timestamp: i64,
}

/// A single generated trial, immutable once the set is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialConfig {
    pub trial_id: String,
    pub trial_number: u32,
    pub task_type: TaskType,
    pub correct_answer: String,
    pub trial_parameters: Value,
}

/// Outcome of one trial, produced exactly once: either from a
/// classified swipe or from the response timeout.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialResult {
    pub trial_id: String,
    pub user_response: String,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub trajectory_data: Vec<TrajectoryPoint>,
    pub timestamp: DateTime<Utc>,
    pub no_response: bool,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum FeedbackColor {
    Green,
    Red,
}

impl FeedbackColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            FeedbackColor::Green => "green",
            FeedbackColor::Red => "red",
        }
    }

    pub fn parse(value: &str) -> Result<Self> {
        match value {
            "green" => Ok(FeedbackColor::Green),
            "red" => Ok(FeedbackColor::Red),
            other => Err(anyhow!("unknown feedback color '{other}'")),
        }
    }
}

/// Persisted trial record: the result plus its session context.
/// `synced` starts false and flips only after confirmed delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trial {
    pub trial_id: String,
    pub session_id: String,
    pub task_type: TaskType,
    pub trial_number: u32,
    pub trial_parameters: Value,
    pub user_response: String,
    pub correct_answer: String,
    pub is_correct: bool,
    pub response_time_ms: u64,
    pub trajectory_data: Vec<TrajectoryPoint>,
    pub feedback_shown: FeedbackColor,
    pub no_response: bool,
    pub timestamp: DateTime<Utc>,
    pub synced: bool,
}

impl Trial {
    /// Assemble the persisted record from a result and the config it
    /// answered. Feedback color is derived here, once.
    pub fn from_result(result: TrialResult, config: &TrialConfig, session_id: &str) -> Self {
        Self {
            trial_id: result.trial_id,
            session_id: session_id.to_string(),
            task_type: config.task_type,
            trial_number: config.trial_number,
            trial_parameters: config.trial_parameters.clone(),
            user_response: result.user_response,
            correct_answer: config.correct_answer.clone(),
            is_correct: result.is_correct,
            response_time_ms: result.response_time_ms,
            trajectory_data: result.trajectory_data,
            feedback_shown: if result.is_correct {
                FeedbackColor::Green
            } else {
                FeedbackColor::Red
            },
            no_response: result.no_response,
            timestamp: result.timestamp,
            synced: false,
        }
    }
}

/// Persisted mirror of the pending-upload queue, for crash recovery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncState {
    pub trial_ids: Vec<String>,
    pub last_sync_attempt: DateTime<Utc>,
    pub retry_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_type_round_trips_through_strings() {
        for task in [
            TaskType::Calibration,
            TaskType::DotKinematogram,
            TaskType::HaloTravel,
        ] {
            assert_eq!(TaskType::parse(task.as_str()).unwrap(), task);
        }
        assert!(TaskType::parse("reaction_time").is_err());
    }

    #[test]
    fn halo_travel_maps_zones_to_ab() {
        assert_eq!(TaskType::HaloTravel.answer_for_side(ZoneSide::Left), "A");
        assert_eq!(TaskType::HaloTravel.answer_for_side(ZoneSide::Right), "B");
        assert_eq!(TaskType::Calibration.answer_for_side(ZoneSide::Left), "left");
        assert_eq!(
            TaskType::DotKinematogram.answer_for_side(ZoneSide::Right),
            "right"
        );
    }

    #[test]
    fn trial_from_result_derives_feedback_and_starts_unsynced() {
        let config = TrialConfig {
            trial_id: "t-1".into(),
            trial_number: 3,
            task_type: TaskType::Calibration,
            correct_answer: "left".into(),
            trial_parameters: serde_json::json!({ "direction": "left" }),
        };
        let result = TrialResult {
            trial_id: "t-1".into(),
            user_response: "left".into(),
            is_correct: true,
            response_time_ms: 412,
            trajectory_data: vec![],
            timestamp: chrono::Utc::now(),
            no_response: false,
        };

        let trial = Trial::from_result(result, &config, "s-1");
        assert_eq!(trial.feedback_shown, FeedbackColor::Green);
        assert_eq!(trial.trial_number, 3);
        assert_eq!(trial.session_id, "s-1");
        assert!(!trial.synced);
    }
}
