//! Trial-set generation: counterbalanced blocks with a uniformly random
//! final order. Generation is pure and deterministic given the caller's
//! random source; no I/O happens here.

mod calibration;
mod dot_motion;
mod halo;

pub use calibration::generate_calibration_trials;
pub use dot_motion::generate_dot_kinematogram_trials;
pub use halo::{generate_halo_travel_trials, generate_halo_travel_trials_with_difficulty};

use anyhow::Result;
use rand::Rng;

use crate::config::{validate_task_config, TaskConfig};
use crate::models::{TaskType, TrialConfig};

/// Generate the trial block for a task. The config is validated first;
/// a disabled or degenerate config is an error and the caller must
/// treat the task as unavailable.
pub fn generate_trials_for_task<R: Rng>(
    task: TaskType,
    config: &TaskConfig,
    rng: &mut R,
) -> Result<Vec<TrialConfig>> {
    validate_task_config(task, config)?;

    let trials = match task {
        TaskType::Calibration => generate_calibration_trials(rng),
        TaskType::DotKinematogram => generate_dot_kinematogram_trials(config, rng),
        TaskType::HaloTravel => {
            // A difficulty ladder in the parameters selects the staircased
            // variant; otherwise every trial shares one distance difference.
            if config.parameters.get("difficulty_levels").is_some() {
                generate_halo_travel_trials_with_difficulty(config, rng)
            } else {
                generate_halo_travel_trials(config, rng)
            }
        }
    };

    Ok(trials)
}

/// Uniform Fisher–Yates permutation.
pub(crate) fn shuffle<T, R: Rng>(items: &mut [T], rng: &mut R) {
    for i in (1..items.len()).rev() {
        let j = rng.gen_range(0..=i);
        items.swap(i, j);
    }
}

/// Reassign trial numbers 1..N in post-shuffle order, so trial_number
/// always reflects presentation position.
pub(crate) fn renumber(trials: &mut [TrialConfig]) {
    for (index, trial) in trials.iter_mut().enumerate() {
        trial.trial_number = index as u32 + 1;
    }
}

pub(crate) fn new_trial_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Split `total` across `buckets`, remainder going to the first buckets.
pub(crate) fn partition_evenly(total: u32, buckets: usize) -> Vec<u32> {
    let base = total / buckets as u32;
    let remainder = (total % buckets as u32) as usize;
    (0..buckets)
        .map(|index| base + u32::from(index < remainder))
        .collect()
}
