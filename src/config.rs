use std::{collections::HashMap, fs, path::PathBuf, sync::RwLock};

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::models::TaskType;

/// Timing knobs shared by every trial, in milliseconds unless noted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrialSettings {
    pub timeout_seconds: u64,
    pub show_trial_counter: bool,
    pub delay_range_ms: (u64, u64),
    pub fixation_duration_ms: u64,
    pub rest_period_ms: u64,
    pub feedback_duration_ms: u64,
}

impl Default for TrialSettings {
    fn default() -> Self {
        Self {
            timeout_seconds: 5,
            show_trial_counter: true,
            delay_range_ms: (700, 1000),
            fixation_duration_ms: 300,
            rest_period_ms: 300,
            feedback_duration_ms: 300,
        }
    }
}

/// Per-task configuration supplied by the study definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskConfig {
    pub enabled: bool,
    pub trials_per_block: u32,
    pub parameters: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StudyConfig {
    pub study_id: String,
    pub study_name: String,
    pub active_tasks: Vec<TaskType>,
    pub task_configs: HashMap<TaskType, TaskConfig>,
    pub trial_settings: TrialSettings,
    pub created_at: DateTime<Utc>,
}

impl StudyConfig {
    /// The stock perceptual-decision study: calibration plus the two
    /// discrimination tasks with their standard difficulty ladders.
    pub fn default_study() -> Self {
        let mut task_configs = HashMap::new();
        task_configs.insert(
            TaskType::Calibration,
            TaskConfig {
                enabled: true,
                trials_per_block: 10,
                parameters: json!({}),
            },
        );
        task_configs.insert(
            TaskType::DotKinematogram,
            TaskConfig {
                enabled: true,
                trials_per_block: 20,
                parameters: json!({
                    "coherence_levels": [10, 20, 40, 60],
                    "aperture_shape": "square",
                    "aperture_size": 120,
                    "dot_count": 3,
                    "stimulus_duration": 800,
                }),
            },
        );
        task_configs.insert(
            TaskType::HaloTravel,
            TaskConfig {
                enabled: true,
                trials_per_block: 20,
                parameters: json!({
                    "halo_size": 60,
                    "travel_speed": 200,
                    "distance_difference": 50,
                    "halo_color": "#B0BEC5",
                }),
            },
        );

        Self {
            study_id: uuid::Uuid::new_v4().to_string(),
            study_name: "Perceptual Decision Making".to_string(),
            active_tasks: vec![
                TaskType::Calibration,
                TaskType::DotKinematogram,
                TaskType::HaloTravel,
            ],
            task_configs,
            trial_settings: TrialSettings::default(),
            created_at: Utc::now(),
        }
    }

    pub fn task_config(&self, task: TaskType) -> Option<&TaskConfig> {
        self.task_configs.get(&task)
    }
}

impl Default for StudyConfig {
    fn default() -> Self {
        Self::default_study()
    }
}

/// Reject a task configuration that cannot produce a usable trial set.
/// Callers must treat a rejected task as unavailable; generation is
/// never attempted on a config that fails here.
pub fn validate_task_config(task: TaskType, config: &TaskConfig) -> Result<()> {
    if !config.enabled {
        bail!("task {} is disabled", task.as_str());
    }
    if config.trials_per_block < 1 {
        bail!(
            "task {} has invalid trial count {}",
            task.as_str(),
            config.trials_per_block
        );
    }

    match task {
        TaskType::Calibration => {}
        TaskType::DotKinematogram => {
            let levels = config
                .parameters
                .get("coherence_levels")
                .and_then(Value::as_array);
            match levels {
                Some(levels) if !levels.is_empty() => {}
                _ => bail!("dot kinematogram requires a non-empty coherence_levels list"),
            }
        }
        TaskType::HaloTravel => {
            let difference = config
                .parameters
                .get("distance_difference")
                .and_then(Value::as_f64);
            match difference {
                Some(d) if d > 0.0 => {}
                _ => bail!("halo travel requires a positive distance_difference"),
            }
        }
    }

    Ok(())
}

/// File-backed study configuration, JSON on disk behind an RwLock.
/// An unreadable or unparsable file degrades to the default study.
pub struct ConfigStore {
    path: PathBuf,
    data: RwLock<StudyConfig>,
}

impl ConfigStore {
    pub fn new(path: PathBuf) -> Result<Self> {
        let data = if path.exists() {
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("failed to read study config from {}", path.display()))?;
            match serde_json::from_str(&contents) {
                Ok(config) => config,
                Err(err) => {
                    log::warn!(
                        "study config at {} is unparsable ({err}); falling back to defaults",
                        path.display()
                    );
                    StudyConfig::default_study()
                }
            }
        } else {
            StudyConfig::default_study()
        };

        Ok(Self {
            path,
            data: RwLock::new(data),
        })
    }

    pub fn study(&self) -> StudyConfig {
        self.data.read().unwrap().clone()
    }

    pub fn update_study(&self, config: StudyConfig) -> Result<()> {
        {
            let mut guard = self.data.write().unwrap();
            *guard = config;
            self.persist(&guard)?;
        }
        Ok(())
    }

    fn persist(&self, data: &StudyConfig) -> Result<()> {
        let serialized = serde_json::to_string_pretty(data)?;
        fs::write(&self.path, serialized)
            .with_context(|| format!("failed to write study config to {}", self.path.display()))
    }
}

impl ConfigStore {
    #[allow(dead_code)]
    pub fn reload(&self) -> Result<()> {
        let contents = fs::read_to_string(&self.path)?;
        let data: StudyConfig = serde_json::from_str(&contents)?;
        let mut guard = self.data.write().unwrap();
        *guard = data;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_study_enables_all_three_tasks() {
        let study = StudyConfig::default_study();
        assert_eq!(study.active_tasks.len(), 3);
        for task in &study.active_tasks {
            let config = study.task_config(*task).expect("task config present");
            assert!(config.enabled);
            validate_task_config(*task, config).expect("default config validates");
        }
    }

    #[test]
    fn disabled_task_is_rejected() {
        let config = TaskConfig {
            enabled: false,
            trials_per_block: 10,
            parameters: json!({}),
        };
        assert!(validate_task_config(TaskType::Calibration, &config).is_err());
    }

    #[test]
    fn degenerate_parameters_are_rejected() {
        let no_levels = TaskConfig {
            enabled: true,
            trials_per_block: 20,
            parameters: json!({ "coherence_levels": [] }),
        };
        assert!(validate_task_config(TaskType::DotKinematogram, &no_levels).is_err());

        let bad_difference = TaskConfig {
            enabled: true,
            trials_per_block: 20,
            parameters: json!({ "distance_difference": 0 }),
        };
        assert!(validate_task_config(TaskType::HaloTravel, &bad_difference).is_err());

        let zero_trials = TaskConfig {
            enabled: true,
            trials_per_block: 0,
            parameters: json!({}),
        };
        assert!(validate_task_config(TaskType::Calibration, &zero_trials).is_err());
    }

    #[test]
    fn store_round_trips_and_survives_garbage() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("study.json");

        let store = ConfigStore::new(path.clone()).unwrap();
        let mut study = store.study();
        study.study_name = "Pilot".into();
        store.update_study(study).unwrap();

        let reopened = ConfigStore::new(path.clone()).unwrap();
        assert_eq!(reopened.study().study_name, "Pilot");

        fs::write(&path, "not json").unwrap();
        let fallback = ConfigStore::new(path).unwrap();
        assert_eq!(
            fallback.study().study_name,
            StudyConfig::default_study().study_name
        );
    }
}
