use rand::Rng;
use serde_json::{json, Value};

use crate::config::TaskConfig;
use crate::models::{TaskType, TrialConfig};

use super::{new_trial_id, partition_evenly, renumber, shuffle};

/// Random-dot-motion block, balanced left/right within every coherence
/// level. The block is partitioned across the coherence ladder with the
/// remainder going to the easiest-listed levels first; within one level
/// the odd trial (if any) is a left target.
pub fn generate_dot_kinematogram_trials<R: Rng>(
    config: &TaskConfig,
    rng: &mut R,
) -> Vec<TrialConfig> {
    let parameters = &config.parameters;
    let coherence_levels: Vec<Value> = parameters
        .get("coherence_levels")
        .and_then(Value::as_array)
        .filter(|levels| !levels.is_empty())
        .cloned()
        .unwrap_or_else(|| vec![json!(10), json!(20), json!(40), json!(60)]);
    let aperture_shape = parameters
        .get("aperture_shape")
        .and_then(Value::as_str)
        .unwrap_or("square");
    let aperture_size = parameters
        .get("aperture_size")
        .and_then(Value::as_u64)
        .unwrap_or(70);
    let dot_count = parameters
        .get("dot_count")
        .and_then(Value::as_u64)
        .unwrap_or(3);
    let stimulus_duration = parameters
        .get("stimulus_duration")
        .and_then(Value::as_u64)
        .unwrap_or(800);

    let per_level = partition_evenly(config.trials_per_block, coherence_levels.len());

    let mut trials = Vec::with_capacity(config.trials_per_block as usize);
    for (coherence, count) in coherence_levels.iter().zip(per_level) {
        let left_count = count.div_ceil(2);

        for index in 0..count {
            let direction = if index < left_count { "left" } else { "right" };
            trials.push(TrialConfig {
                trial_id: new_trial_id(),
                trial_number: 0,
                task_type: TaskType::DotKinematogram,
                correct_answer: direction.to_string(),
                trial_parameters: json!({
                    "coherence": coherence,
                    "direction": direction,
                    "aperture_shape": aperture_shape,
                    "aperture_size": aperture_size,
                    "dot_count": dot_count,
                    "stimulus_duration": stimulus_duration,
                }),
            });
        }
    }

    shuffle(&mut trials, rng);
    renumber(&mut trials);
    trials
}
