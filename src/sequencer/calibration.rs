use rand::Rng;
use serde_json::json;

use crate::models::{TaskType, TrialConfig};

use super::{new_trial_id, renumber, shuffle};

const CALIBRATION_BLOCK_SIZE: usize = 10;

/// Fixed 10-trial calibration block: five left targets, five right,
/// shuffled, then renumbered so trial_number matches presentation order.
pub fn generate_calibration_trials<R: Rng>(rng: &mut R) -> Vec<TrialConfig> {
    let mut trials = Vec::with_capacity(CALIBRATION_BLOCK_SIZE);

    for direction in ["left", "right"] {
        for _ in 0..CALIBRATION_BLOCK_SIZE / 2 {
            trials.push(TrialConfig {
                trial_id: new_trial_id(),
                trial_number: 0,
                task_type: TaskType::Calibration,
                correct_answer: direction.to_string(),
                trial_parameters: json!({ "direction": direction }),
            });
        }
    }

    shuffle(&mut trials, rng);
    renumber(&mut trials);
    trials
}
