use std::collections::HashSet;

use chrono::NaiveDate;

use crate::clock::Day;
use crate::completion::{encode, CompletionKey, TaskScope};
use crate::model::{Habit, Routine};
use crate::ordering;

/// Eligible habits of one routine on a date, in the routine's display order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoutineTasks {
    pub routine_id: String,
    pub habit_ids: Vec<String>,
}

/// Every habit occurrence that could be completed on one date.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUniverse {
    pub date: NaiveDate,
    /// Routines with at least one eligible habit, sorted by `order`.
    pub routines: Vec<RoutineTasks>,
    /// Eligible habits referenced by no eligible routine.
    pub standalone: Vec<String>,
    keys: HashSet<String>,
}

impl TaskUniverse {
    pub fn resolve(day: Day, habits: &[Habit], routines: &[Routine]) -> Self {
        let eligible_habits: Vec<&Habit> = habits
            .iter()
            .filter(|habit| day.includes(habit.created_at))
            .collect();
        let eligible_ids: HashSet<&str> =
            eligible_habits.iter().map(|habit| habit.id.as_str()).collect();
        let eligible_routines: Vec<&Routine> = routines
            .iter()
            .filter(|routine| day.includes(routine.created_at))
            .collect();

        let mut keys = HashSet::new();
        let mut routine_tasks = Vec::new();
        for routine in ordering::sort_by_order(eligible_routines.iter().copied()) {
            let mut habit_ids: Vec<String> = Vec::new();
            for habit_id in &routine.habit_ids {
                if !eligible_ids.contains(habit_id.as_str()) {
                    continue;
                }
                if keys.insert(encode(&TaskScope::routine(routine.id.as_str()), habit_id)) {
                    habit_ids.push(habit_id.clone());
                }
            }
            if !habit_ids.is_empty() {
                routine_tasks.push(RoutineTasks {
                    routine_id: routine.id.clone(),
                    habit_ids,
                });
            }
        }

        // Any reference from an eligible routine excludes the habit, even when
        // that routine's other habits are not eligible yet.
        let referenced: HashSet<&str> = eligible_routines
            .iter()
            .flat_map(|routine| routine.habit_ids.iter().map(String::as_str))
            .collect();
        let mut standalone = Vec::new();
        for habit in eligible_habits {
            if referenced.contains(habit.id.as_str()) {
                continue;
            }
            if keys.insert(encode(&TaskScope::Standalone, &habit.id)) {
                standalone.push(habit.id.clone());
            }
        }

        Self {
            date: day.date,
            routines: routine_tasks,
            standalone,
            keys,
        }
    }

    pub fn keys(&self) -> &HashSet<String> {
        &self.keys
    }

    pub fn contains(&self, key: &str) -> bool {
        self.keys.contains(key)
    }

    pub fn total(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Structured form of every task, routines first.
    pub fn tasks(&self) -> impl Iterator<Item = CompletionKey> + '_ {
        let routine_keys = self.routines.iter().flat_map(|routine| {
            routine
                .habit_ids
                .iter()
                .map(move |habit_id| CompletionKey::in_routine(routine.routine_id.as_str(), habit_id.as_str()))
        });
        let standalone_keys = self
            .standalone
            .iter()
            .map(|habit_id| CompletionKey::standalone(habit_id.as_str()));
        routine_keys.chain(standalone_keys)
    }
}

#[cfg(test)]
pub(crate) mod fixtures {
    use chrono::{DateTime, FixedOffset, NaiveDate, TimeZone, Utc};

    use crate::clock::Day;
    use crate::model::{Habit, Routine, RoutineGroup};

    pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    pub fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    pub fn utc_day(y: i32, m: u32, d: u32) -> Day {
        Day::in_zone(date(y, m, d), &FixedOffset::east_opt(0).unwrap())
    }

    pub fn habit(id: &str, created: Option<DateTime<Utc>>) -> Habit {
        Habit {
            id: id.to_string(),
            name: format!("Habit {id}"),
            created_at: created,
            user_id: "u1".to_string(),
        }
    }

    pub fn routine(id: &str, habits: &[&str], order: i64, created: Option<DateTime<Utc>>) -> Routine {
        Routine {
            id: id.to_string(),
            name: format!("Routine {id}"),
            habit_ids: habits.iter().map(|h| h.to_string()).collect(),
            user_id: "u1".to_string(),
            created_at: created,
            updated_at: None,
            order,
            group_id: None,
            notification_time: None,
        }
    }

    pub fn group(id: &str, order: i64) -> RoutineGroup {
        RoutineGroup {
            id: id.to_string(),
            name: format!("Group {id}"),
            user_id: "u1".to_string(),
            created_at: None,
            order,
        }
    }
}
