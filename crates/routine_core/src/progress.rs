use std::collections::BTreeSet;

use serde::Serialize;

use crate::tasks::TaskUniverse;

/// Completion summary for one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyProgress {
    pub completed: usize,
    pub total: usize,
    pub ratio: f64,
    /// Stored keys that still correspond to a task on that date.
    pub valid_keys: BTreeSet<String>,
}

impl DailyProgress {
    pub fn empty() -> Self {
        Self {
            completed: 0,
            total: 0,
            ratio: 0.0,
            valid_keys: BTreeSet::new(),
        }
    }

    pub fn is_completed(&self, key: &str) -> bool {
        self.valid_keys.contains(key)
    }

    /// Ratio as a whole percentage, for headers and progress bars.
    pub fn percent(&self) -> u32 {
        (self.ratio * 100.0).round() as u32
    }
}

/// Intersects the stored keys with the day's tasks. Orphaned keys are dropped silently.
pub fn aggregate<S: AsRef<str>>(universe: &TaskUniverse, stored_keys: &[S]) -> DailyProgress {
    let valid_keys: BTreeSet<String> = stored_keys
        .iter()
        .map(AsRef::as_ref)
        .filter(|key| universe.contains(key))
        .map(str::to_string)
        .collect();
    let completed = valid_keys.len();
    let total = universe.total();
    DailyProgress {
        completed,
        total,
        ratio: ratio(completed, total),
        valid_keys,
    }
}

pub fn ratio(completed: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        completed as f64 / total as f64
    }
}

/// Local mirror of the store's union/remove toggle. Returns whether the key is now present.
pub fn apply_toggle(keys: &mut Vec<String>, key: &str) -> bool {
    if keys.iter().any(|existing| existing == key) {
        keys.retain(|existing| existing != key);
        false
    } else {
        keys.push(key.to_string());
        true
    }
}
