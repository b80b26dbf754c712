use std::collections::HashMap;
use std::fmt;

use serde::Serialize;

use crate::model::{Habit, Snapshot};
use crate::ordering;

pub const UNKNOWN_HABIT: &str = "Unknown habit";

/// A habit reference inside a routine listing. Deleted habits stay visible as placeholders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum HabitLabel {
    Known { id: String, name: String },
    Unknown { id: String },
}

impl HabitLabel {
    pub fn id(&self) -> &str {
        match self {
            HabitLabel::Known { id, .. } | HabitLabel::Unknown { id } => id,
        }
    }

    pub fn is_known(&self) -> bool {
        matches!(self, HabitLabel::Known { .. })
    }
}

impl fmt::Display for HabitLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HabitLabel::Known { name, .. } => f.write_str(name),
            HabitLabel::Unknown { .. } => f.write_str(UNKNOWN_HABIT),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineEntry {
    pub routine_id: String,
    pub name: String,
    pub order: i64,
    pub notification_time: Option<String>,
    pub habits: Vec<HabitLabel>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BoardSection {
    pub group_id: Option<String>,
    pub name: String,
    pub order: Option<i64>,
    pub routines: Vec<RoutineEntry>,
}

/// Every group in order (empty ones included) followed by the ungrouped routines.
/// Routines pointing at a deleted group are listed as ungrouped.
pub fn routine_board(snapshot: &Snapshot) -> Vec<BoardSection> {
    let habits = snapshot.habits_by_id();
    let mut sections: Vec<BoardSection> = ordering::sort_by_order(snapshot.groups.iter())
        .into_iter()
        .map(|group| BoardSection {
            group_id: Some(group.id.clone()),
            name: group.name.clone(),
            order: Some(group.order),
            routines: entries(snapshot, Some(group.id.as_str()), &habits),
        })
        .collect();

    let ungrouped = entries(snapshot, None, &habits);
    if !ungrouped.is_empty() {
        sections.push(BoardSection {
            group_id: None,
            name: crate::calendar::UNGROUPED.to_string(),
            order: None,
            routines: ungrouped,
        });
    }
    sections
}

/// Habits for the habit manager, oldest first.
pub fn habit_list(snapshot: &Snapshot) -> Vec<&Habit> {
    let mut habits: Vec<&Habit> = snapshot.habits.iter().collect();
    habits.sort_by(|a, b| {
        a.created_at
            .cmp(&b.created_at)
            .then_with(|| a.name.to_lowercase().cmp(&b.name.to_lowercase()))
    });
    habits
}

fn entries(snapshot: &Snapshot, group_id: Option<&str>, habits: &HashMap<&str, &Habit>) -> Vec<RoutineEntry> {
    ordering::section_siblings(&snapshot.routines, &snapshot.groups, group_id)
        .into_iter()
        .map(|routine| entry(routine, habits))
        .collect()
}

fn entry(routine: &crate::model::Routine, habits: &HashMap<&str, &Habit>) -> RoutineEntry {
    RoutineEntry {
        routine_id: routine.id.clone(),
        name: routine.name.clone(),
        order: routine.order,
        notification_time: routine.notification_time.clone(),
        habits: routine
            .habit_ids
            .iter()
            .map(|id| match habits.get(id.as_str()) {
                Some(habit) => HabitLabel::Known {
                    id: id.clone(),
                    name: habit.name.clone(),
                },
                None => HabitLabel::Unknown { id: id.clone() },
            })
            .collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tasks::fixtures::*;

    #[test]
    fn lists_groups_in_order_with_placeholders() {
        let mut r1 = routine("R1", &["A", "gone"], 1, None);
        r1.group_id = Some("G1".into());
        let mut r2 = routine("R2", &["A"], 0, None);
        r2.group_id = Some("G1".into());
        let r3 = routine("R3", &[], 0, None);
        let mut r4 = routine("R4", &[], 0, None);
        r4.group_id = Some("missing".into());
        let snapshot = Snapshot {
            habits: vec![habit("A", None)],
            routines: vec![r1, r2, r3, r4],
            groups: vec![group("G1", 1), group("G0", 0)],
            ..Snapshot::default()
        };

        let board = routine_board(&snapshot);
        assert_eq!(board.len(), 3);
        assert_eq!(board[0].group_id.as_deref(), Some("G0"));
        assert!(board[0].routines.is_empty());

        let g1 = &board[1];
        assert_eq!(g1.routines[0].routine_id, "R2");
        let labels: Vec<String> = g1.routines[1].habits.iter().map(ToString::to_string).collect();
        assert_eq!(labels, vec!["Habit A", UNKNOWN_HABIT]);
        assert!(!g1.routines[1].habits[1].is_known());
        assert_eq!(g1.routines[1].habits[1].id(), "gone");

        let ungrouped: Vec<&str> = board[2].routines.iter().map(|r| r.routine_id.as_str()).collect();
        assert_eq!(ungrouped, vec!["R3", "R4"]);
    }

    #[test]
    fn habit_list_is_oldest_first() {
        let snapshot = Snapshot {
            habits: vec![
                habit("new", Some(at(2025, 2, 1, 0))),
                habit("old", Some(at(2025, 1, 1, 0))),
                habit("legacy", None),
            ],
            ..Snapshot::default()
        };
        let ids: Vec<&str> = habit_list(&snapshot).iter().map(|h| h.id.as_str()).collect();
        assert_eq!(ids, vec!["legacy", "old", "new"]);
    }
}
