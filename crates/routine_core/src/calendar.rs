use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::clock::{Clock, Day};
use crate::completion::{encode, TaskScope};
use crate::error::{Result, RoutineError};
use crate::model::{Habit, Routine, RoutineGroup, Snapshot};
use crate::ordering;
use crate::progress::{self, DailyProgress};
use crate::tasks::TaskUniverse;

pub const UNGROUPED: &str = "Ungrouped";

/// A calendar month that chrono can represent, first day included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct YearMonth {
    first: NaiveDate,
}

impl YearMonth {
    pub fn new(year: i32, month: u32) -> Result<Self> {
        NaiveDate::from_ymd_opt(year, month, 1)
            .map(|first| Self { first })
            .ok_or(RoutineError::InvalidMonth { year, month })
    }

    pub fn of(date: NaiveDate) -> Self {
        Self {
            first: date.with_day(1).unwrap_or(date),
        }
    }

    pub fn year(&self) -> i32 {
        self.first.year()
    }

    pub fn month(&self) -> u32 {
        self.first.month()
    }

    pub fn first_day(&self) -> NaiveDate {
        self.first
    }

    /// Fails past the last month chrono can represent.
    pub fn next(&self) -> Result<Self> {
        match self.month() {
            12 => Self::new(self.year().saturating_add(1), 1),
            month => Self::new(self.year(), month + 1),
        }
    }

    /// Fails before the first month chrono can represent.
    pub fn prev(&self) -> Result<Self> {
        match self.month() {
            1 => Self::new(self.year().saturating_sub(1), 12),
            month => Self::new(self.year(), month - 1),
        }
    }

    /// Length of the month, leap years included.
    pub fn days(&self) -> u32 {
        28 + (29..=31).take_while(|day| self.first.with_day(*day).is_some()).count() as u32
    }

    /// Blank cells before day 1 in a Sunday-first grid.
    pub fn leading_blanks(&self) -> u32 {
        self.first.weekday().num_days_from_sunday()
    }

    pub fn dates(&self) -> impl Iterator<Item = NaiveDate> {
        self.first.iter_days().take(self.days() as usize)
    }
}

impl fmt::Display for YearMonth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:04}-{:02}", self.year(), self.month())
    }
}

impl FromStr for YearMonth {
    type Err = RoutineError;

    fn from_str(raw: &str) -> Result<Self> {
        let invalid = || RoutineError::InvalidMonth { year: 0, month: 0 };
        let (year, month) = raw.trim().split_once('-').ok_or_else(invalid)?;
        let year: i32 = year.parse().map_err(|_| invalid())?;
        let month: u32 = month.parse().map_err(|_| invalid())?;
        Self::new(year, month)
    }
}

impl TryFrom<String> for YearMonth {
    type Error = RoutineError;

    fn try_from(raw: String) -> Result<Self> {
        raw.parse()
    }
}

impl From<YearMonth> for String {
    fn from(month: YearMonth) -> Self {
        month.to_string()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayCell {
    pub day: u32,
    pub date: NaiveDate,
    pub completed: usize,
    pub total: usize,
    pub ratio: f64,
    pub is_today: bool,
}

impl DayCell {
    pub fn shade(&self) -> CompletionShade {
        CompletionShade::from_ratio(self.ratio)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CalendarCell {
    Blank,
    Day(DayCell),
}

/// Heat bucket used to colour a calendar cell.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum CompletionShade {
    None,
    Low,
    Medium,
    High,
}

impl CompletionShade {
    pub fn from_ratio(ratio: f64) -> Self {
        if ratio <= 0.0 {
            CompletionShade::None
        } else if ratio < 0.3 {
            CompletionShade::Low
        } else if ratio < 0.8 {
            CompletionShade::Medium
        } else {
            CompletionShade::High
        }
    }
}

pub fn build_month(month: YearMonth, clock: &dyn Clock, snapshot: &Snapshot) -> Vec<CalendarCell> {
    let today = clock.today();
    let mut cells: Vec<CalendarCell> = (0..month.leading_blanks())
        .map(|_| CalendarCell::Blank)
        .collect();

    for date in month.dates() {
        let universe = TaskUniverse::resolve(clock.day(date), &snapshot.habits, &snapshot.routines);
        let summary = progress::aggregate(&universe, snapshot.completed_on(date));
        cells.push(CalendarCell::Day(DayCell {
            day: date.day(),
            date,
            completed: summary.completed,
            total: summary.total,
            ratio: summary.ratio,
            is_today: date == today,
        }));
    }
    cells
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct HabitCheck {
    pub habit_id: String,
    pub name: String,
    pub completed: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RoutineDetail {
    pub routine_id: String,
    pub name: String,
    pub notification_time: Option<String>,
    pub habits: Vec<HabitCheck>,
}

impl RoutineDetail {
    pub fn completed(&self) -> usize {
        self.habits.iter().filter(|habit| habit.completed).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GroupDetail {
    /// `None` for the ungrouped section.
    pub group_id: Option<String>,
    pub name: String,
    pub routines: Vec<RoutineDetail>,
}

/// Itemised completion state for one date.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DayDetail {
    pub date: NaiveDate,
    pub progress: DailyProgress,
    pub groups: Vec<GroupDetail>,
    pub standalone: Vec<HabitCheck>,
}

impl DayDetail {
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty() && self.standalone.is_empty()
    }

    pub fn routines(&self) -> impl Iterator<Item = &RoutineDetail> {
        self.groups.iter().flat_map(|group| group.routines.iter())
    }
}

/// Builds the detail view. Without group data every routine lands in one
/// ungrouped section; with it, sections follow group order and routines whose
/// group is missing fall back to the ungrouped section, which comes last.
pub fn build_day_detail<S: AsRef<str>>(
    day: Day,
    habits: &[Habit],
    routines: &[Routine],
    groups: Option<&[RoutineGroup]>,
    stored_keys: &[S],
) -> DayDetail {
    let universe = TaskUniverse::resolve(day, habits, routines);
    let summary = progress::aggregate(&universe, stored_keys);
    let habits_by_id: HashMap<&str, &Habit> =
        habits.iter().map(|habit| (habit.id.as_str(), habit)).collect();
    let routines_by_id: HashMap<&str, &Routine> = routines
        .iter()
        .map(|routine| (routine.id.as_str(), routine))
        .collect();

    let check = |scope: &TaskScope, habit_id: &str| -> Option<HabitCheck> {
        let habit = habits_by_id.get(habit_id)?;
        Some(HabitCheck {
            habit_id: habit_id.to_string(),
            name: habit.name.clone(),
            completed: summary.is_completed(&encode(scope, habit_id)),
        })
    };

    let mut grouped: Vec<(Option<&RoutineGroup>, Vec<RoutineDetail>)> = match groups {
        Some(groups) => ordering::sort_by_order(groups.iter())
            .into_iter()
            .map(|group| (Some(group), Vec::new()))
            .collect(),
        None => Vec::new(),
    };
    let mut ungrouped: Vec<RoutineDetail> = Vec::new();

    for tasks in &universe.routines {
        let Some(routine) = routines_by_id.get(tasks.routine_id.as_str()) else {
            continue;
        };
        let scope = TaskScope::routine(routine.id.as_str());
        let checks: Vec<HabitCheck> = tasks
            .habit_ids
            .iter()
            .filter_map(|habit_id| check(&scope, habit_id))
            .collect();
        if checks.is_empty() {
            continue;
        }
        let detail = RoutineDetail {
            routine_id: routine.id.clone(),
            name: routine.name.clone(),
            notification_time: routine.notification_time.clone(),
            habits: checks,
        };
        let slot = match routine.group_id.as_deref() {
            Some(group_id) => grouped
                .iter_mut()
                .find(|(group, _)| group.map(|g| g.id.as_str()) == Some(group_id)),
            None => None,
        };
        match slot {
            Some((_, members)) => members.push(detail),
            None => ungrouped.push(detail),
        }
    }

    let mut sections: Vec<GroupDetail> = grouped
        .into_iter()
        .filter(|(_, members)| !members.is_empty())
        .filter_map(|(group, members)| {
            group.map(|group| GroupDetail {
                group_id: Some(group.id.clone()),
                name: group.name.clone(),
                routines: members,
            })
        })
        .collect();
    if !ungrouped.is_empty() {
        sections.push(GroupDetail {
            group_id: None,
            name: UNGROUPED.to_string(),
            routines: ungrouped,
        });
    }

    let standalone = universe
        .standalone
        .iter()
        .filter_map(|habit_id| check(&TaskScope::Standalone, habit_id))
        .collect();

    DayDetail {
        date: day.date,
        progress: summary,
        groups: sections,
        standalone,
    }
}

pub fn day_detail(date: NaiveDate, clock: &dyn Clock, snapshot: &Snapshot) -> DayDetail {
    build_day_detail(
        clock.day(date),
        &snapshot.habits,
        &snapshot.routines,
        Some(&snapshot.groups),
        snapshot.completed_on(date),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::model::Progress;
    use crate::tasks::fixtures::*;

    fn days(cells: &[CalendarCell]) -> Vec<&DayCell> {
        cells
            .iter()
            .filter_map(|cell| match cell {
                CalendarCell::Day(day) => Some(day),
                CalendarCell::Blank => None,
            })
            .collect()
    }

    #[test]
    fn month_arithmetic_handles_leap_years() {
        assert_eq!(YearMonth::new(2024, 2).unwrap().days(), 29);
        assert_eq!(YearMonth::new(2023, 2).unwrap().days(), 28);
        assert_eq!(YearMonth::new(2025, 12).unwrap().days(), 31);
        assert_eq!(YearMonth::new(2025, 4).unwrap().days(), 30);
        assert!(YearMonth::new(2025, 13).is_err());
        assert_eq!(YearMonth::new(2025, 12).unwrap().next().unwrap(), YearMonth::new(2026, 1).unwrap());
        assert_eq!(YearMonth::new(2025, 1).unwrap().prev().unwrap(), YearMonth::new(2024, 12).unwrap());
        assert_eq!(YearMonth::of(NaiveDate::from_ymd_opt(2025, 3, 17).unwrap()).to_string(), "2025-03");
        assert_eq!("2025-03".parse::<YearMonth>().unwrap().to_string(), "2025-03");
        assert!("March".parse::<YearMonth>().is_err());
    }

    #[test]
    fn stepping_past_the_representable_range_is_an_error() {
        let last = YearMonth::of(NaiveDate::MAX);
        assert_eq!(last.days(), 31);
        assert_eq!(last.dates().last(), Some(NaiveDate::MAX));
        assert!(matches!(last.next(), Err(RoutineError::InvalidMonth { month: 1, .. })));
        assert_eq!(last.prev().unwrap().next().unwrap(), last);

        let first = YearMonth::of(NaiveDate::MIN);
        assert!(matches!(first.prev(), Err(RoutineError::InvalidMonth { month: 12, .. })));
        assert!(YearMonth::new(last.year() + 1, 1).is_err());
    }

    #[test]
    fn serializes_as_year_dash_month() {
        let month = YearMonth::new(2025, 3).unwrap();
        assert_eq!(serde_json::to_value(month).unwrap(), serde_json::json!("2025-03"));
        let parsed: YearMonth = serde_json::from_value(serde_json::json!("2024-02")).unwrap();
        assert_eq!(parsed.days(), 29);
        assert!(serde_json::from_value::<YearMonth>(serde_json::json!("2025-13")).is_err());
        assert!(serde_json::from_value::<YearMonth>(serde_json::json!({"year": 2025, "month": 13})).is_err());
    }

    #[test]
    fn builds_month_with_leading_blanks_and_stats() {
        // June 2025 starts on a Sunday, March 2025 on a Saturday.
        assert_eq!(YearMonth::new(2025, 6).unwrap().leading_blanks(), 0);
        let march = YearMonth::new(2025, 3).unwrap();
        assert_eq!(march.leading_blanks(), 6);

        let created = Some(at(2025, 3, 10, 9));
        let mut snapshot = Snapshot {
            habits: vec![habit("A", created), habit("B", created), habit("C", created)],
            routines: vec![routine("R1", &["A", "B"], 0, created)],
            ..Snapshot::default()
        };
        snapshot.progress.insert(
            date(2025, 3, 10),
            Progress {
                date: date(2025, 3, 10),
                completed_habits: vec!["R1_A".into(), "standalone_C".into(), "old_X".into()],
                last_updated: None,
            },
        );
        let clock = FixedClock::utc(at(2025, 3, 12, 10));

        let cells = build_month(march, &clock, &snapshot);
        assert_eq!(cells.len(), 6 + 31);
        assert!(matches!(cells[0], CalendarCell::Blank));

        let days = days(&cells);
        assert_eq!(days.len(), 31);
        assert_eq!(days[0].day, 1);
        assert_eq!(days[8].total, 0, "nothing existed before the 10th");
        assert_eq!(days[9].total, 3);
        assert_eq!(days[9].completed, 2);
        assert_eq!(days[9].shade(), CompletionShade::Medium);
        assert_eq!(days[10].completed, 0);
        assert_eq!(days[10].shade(), CompletionShade::None);
        assert!(days[11].is_today);
        assert_eq!(days.iter().filter(|day| day.is_today).count(), 1);
    }

    #[test]
    fn shade_buckets_match_thresholds() {
        assert_eq!(CompletionShade::from_ratio(0.0), CompletionShade::None);
        assert_eq!(CompletionShade::from_ratio(0.29), CompletionShade::Low);
        assert_eq!(CompletionShade::from_ratio(0.3), CompletionShade::Medium);
        assert_eq!(CompletionShade::from_ratio(0.8), CompletionShade::High);
    }

    #[test]
    fn day_detail_groups_routines_and_omits_empty_ones() {
        let mut r1 = routine("R1", &["A", "B"], 1, None);
        r1.group_id = Some("G1".into());
        let mut r2 = routine("R2", &["C"], 0, None);
        r2.group_id = Some("G1".into());
        let r3 = routine("R3", &["ghost"], 0, None);
        let mut r4 = routine("R4", &["A"], 2, None);
        r4.group_id = Some("deleted-group".into());
        let routines = vec![r1, r2, r3, r4];
        let habits = vec![habit("A", None), habit("B", None), habit("C", None), habit("D", None)];
        let groups = vec![group("G2", 0), group("G1", 1)];

        let detail = build_day_detail(
            utc_day(2025, 5, 5),
            &habits,
            &routines,
            Some(&groups),
            &["R1_B", "standalone_D", "R3_ghost"],
        );

        assert_eq!(detail.groups.len(), 2, "empty G2 is omitted");
        let g1 = &detail.groups[0];
        assert_eq!(g1.group_id.as_deref(), Some("G1"));
        let names: Vec<&str> = g1.routines.iter().map(|r| r.routine_id.as_str()).collect();
        assert_eq!(names, vec!["R2", "R1"]);
        assert_eq!(g1.routines[1].completed(), 1);
        assert!(g1.routines[1].habits[1].completed);

        let ungrouped = &detail.groups[1];
        assert!(ungrouped.group_id.is_none());
        assert_eq!(ungrouped.name, UNGROUPED);
        assert_eq!(ungrouped.routines.len(), 1, "R3 has no live habit");
        assert_eq!(ungrouped.routines[0].routine_id, "R4");

        assert_eq!(detail.standalone.len(), 1);
        assert!(detail.standalone[0].completed);
        assert_eq!(detail.progress.completed, 2);
        assert_eq!(detail.progress.total, 5);
    }

    #[test]
    fn day_detail_without_groups_uses_single_section() {
        let mut r1 = routine("R1", &["A"], 0, None);
        r1.group_id = Some("G1".into());
        let detail = build_day_detail::<&str>(
            utc_day(2025, 5, 5),
            &[habit("A", None)],
            &[r1],
            None,
            &[],
        );
        assert_eq!(detail.groups.len(), 1);
        assert!(detail.groups[0].group_id.is_none());
        assert!(!detail.is_empty());
        assert_eq!(detail.routines().count(), 1);
    }
}
