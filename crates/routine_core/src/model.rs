use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::store::CollectionPath;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Habit {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Legacy records may lack a creation time; those count as always present.
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub user_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Routine {
    #[serde(default)]
    pub id: String,
    pub name: String,
    /// Display order. Ids may point at habits that no longer exist.
    #[serde(default)]
    pub habit_ids: Vec<String>,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: i64,
    #[serde(default)]
    pub group_id: Option<String>,
    #[serde(default)]
    pub notification_time: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RoutineGroup {
    #[serde(default)]
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub user_id: String,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub date: NaiveDate,
    #[serde(default)]
    pub completed_habits: Vec<String>,
    #[serde(default)]
    pub last_updated: Option<DateTime<Utc>>,
}

/// The per-user collections kept live by the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Collection {
    Habits,
    Routines,
    RoutineGroups,
    Progress,
}

impl Collection {
    pub const ALL: [Collection; 4] = [
        Collection::Habits,
        Collection::Routines,
        Collection::RoutineGroups,
        Collection::Progress,
    ];

    pub fn segment(self) -> &'static str {
        match self {
            Collection::Habits => "habits",
            Collection::Routines => "routines",
            Collection::RoutineGroups => "routine_groups",
            Collection::Progress => "progress",
        }
    }

    pub fn path(self, app_id: &str, user_id: &str) -> CollectionPath {
        CollectionPath::new(format!(
            "artifacts/{}/users/{}/{}",
            app_id,
            user_id,
            self.segment()
        ))
    }
}

/// Latest state pushed by the store. Every derived view is computed from this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub habits: Vec<Habit>,
    pub routines: Vec<Routine>,
    pub groups: Vec<RoutineGroup>,
    pub progress: BTreeMap<NaiveDate, Progress>,
}

impl Snapshot {
    pub fn completed_on(&self, date: NaiveDate) -> &[String] {
        self.progress
            .get(&date)
            .map(|progress| progress.completed_habits.as_slice())
            .unwrap_or(&[])
    }

    pub fn habit(&self, id: &str) -> Option<&Habit> {
        self.habits.iter().find(|habit| habit.id == id)
    }

    pub fn routine(&self, id: &str) -> Option<&Routine> {
        self.routines.iter().find(|routine| routine.id == id)
    }

    pub fn group(&self, id: &str) -> Option<&RoutineGroup> {
        self.groups.iter().find(|group| group.id == id)
    }

    pub fn habits_by_id(&self) -> HashMap<&str, &Habit> {
        self.habits
            .iter()
            .map(|habit| (habit.id.as_str(), habit))
            .collect()
    }
}
