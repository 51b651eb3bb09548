use rand::Rng;
use serde_json::{json, Value};

use crate::config::TaskConfig;
use crate::models::{TaskType, TrialConfig};

use super::{new_trial_id, partition_evenly, renumber, shuffle};

struct HaloParams {
    halo_size: u64,
    travel_speed: u64,
    halo_color: String,
}

fn halo_params(parameters: &Value) -> HaloParams {
    HaloParams {
        halo_size: parameters
            .get("halo_size")
            .and_then(Value::as_u64)
            .unwrap_or(60),
        travel_speed: parameters
            .get("travel_speed")
            .and_then(Value::as_u64)
            .unwrap_or(200),
        halo_color: parameters
            .get("halo_color")
            .and_then(Value::as_str)
            .unwrap_or("#B0BEC5")
            .to_string(),
    }
}

fn halo_trial(answer: &str, distance_difference: &Value, params: &HaloParams) -> TrialConfig {
    TrialConfig {
        trial_id: new_trial_id(),
        trial_number: 0,
        task_type: TaskType::HaloTravel,
        correct_answer: answer.to_string(),
        trial_parameters: json!({
            "correct_answer": answer,
            "halo_size": params.halo_size,
            "travel_speed": params.travel_speed,
            "distance_difference": distance_difference,
            "halo_color": params.halo_color,
        }),
    }
}

/// Two-alternative halo-travel block at a single distance difference.
/// A and B split the block evenly; an odd block gives the extra trial
/// to A.
pub fn generate_halo_travel_trials<R: Rng>(config: &TaskConfig, rng: &mut R) -> Vec<TrialConfig> {
    let params = halo_params(&config.parameters);
    let distance_difference = config
        .parameters
        .get("distance_difference")
        .cloned()
        .unwrap_or(json!(50));

    let mut trials = Vec::with_capacity(config.trials_per_block as usize);
    let a_count = config.trials_per_block.div_ceil(2);

    for index in 0..config.trials_per_block {
        let answer = if index < a_count { "A" } else { "B" };
        trials.push(halo_trial(answer, &distance_difference, &params));
    }

    shuffle(&mut trials, rng);
    renumber(&mut trials);
    trials
}

/// Difficulty-laddered variant: the block is partitioned across the
/// configured distance differences (remainder to the easier levels),
/// and each level splits A/B evenly with the odd trial going to A.
pub fn generate_halo_travel_trials_with_difficulty<R: Rng>(
    config: &TaskConfig,
    rng: &mut R,
) -> Vec<TrialConfig> {
    let params = halo_params(&config.parameters);
    let levels: Vec<Value> = config
        .parameters
        .get("difficulty_levels")
        .and_then(Value::as_array)
        .filter(|levels| !levels.is_empty())
        .cloned()
        .unwrap_or_else(|| vec![json!(30), json!(50), json!(70)]);

    let per_level = partition_evenly(config.trials_per_block, levels.len());

    let mut trials = Vec::with_capacity(config.trials_per_block as usize);
    for (distance_difference, count) in levels.iter().zip(per_level) {
        let a_count = count.div_ceil(2);
        for index in 0..count {
            let answer = if index < a_count { "A" } else { "B" };
            trials.push(halo_trial(answer, distance_difference, &params));
        }
    }

    shuffle(&mut trials, rng);
    renumber(&mut trials);
    trials
}
