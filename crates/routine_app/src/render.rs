use std::fmt::Write;

use routine_core::board::BoardSection;
use routine_core::calendar::{CalendarCell, CompletionShade, DayDetail, HabitCheck, YearMonth};
use routine_core::completion::TaskScope;
use routine_core::model::Habit;
use routine_core::notifications::{Notice, NoticeLevel};

const WEEKDAYS: [&str; 7] = ["Su", "Mo", "Tu", "We", "Th", "Fr", "Sa"];

pub fn shade_mark(shade: CompletionShade) -> char {
    match shade {
        CompletionShade::None => ' ',
        CompletionShade::Low => '.',
        CompletionShade::Medium => '+',
        CompletionShade::High => '#',
    }
}

pub fn notice(notice: &Notice) -> String {
    match notice.level() {
        NoticeLevel::Info => format!("ok: {notice}"),
        NoticeLevel::Error => format!("error: {notice}"),
    }
}

/// Checklist for one date. Each habit line ends with the arguments `toggle` expects.
pub fn day(title: &str, detail: &DayDetail) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{title} {}: {}/{} done ({}%)",
        detail.date,
        detail.progress.completed,
        detail.progress.total,
        detail.progress.percent()
    );
    if detail.is_empty() {
        out.push_str("  nothing scheduled\n");
        return out;
    }
    for group in &detail.groups {
        let _ = writeln!(out, "== {} ==", group.name);
        for routine in &group.routines {
            let _ = write!(
                out,
                "  {} {}/{}",
                routine.name,
                routine.completed(),
                routine.habits.len()
            );
            if let Some(time) = &routine.notification_time {
                let _ = write!(out, " @ {time}");
            }
            out.push('\n');
            for habit in &routine.habits {
                check_line(&mut out, "    ", habit, &TaskScope::routine(routine.routine_id.as_str()));
            }
        }
    }
    if !detail.standalone.is_empty() {
        out.push_str("== Standalone ==\n");
        for habit in &detail.standalone {
            check_line(&mut out, "  ", habit, &TaskScope::Standalone);
        }
    }
    out
}

fn check_line(out: &mut String, indent: &str, habit: &HabitCheck, scope: &TaskScope) {
    let mark = if habit.completed { 'x' } else { ' ' };
    let _ = write!(out, "{indent}[{mark}] {} ({}", habit.name, habit.habit_id);
    if let Some(routine_id) = scope.routine_id() {
        let _ = write!(out, " {routine_id}");
    }
    out.push_str(")\n");
}

pub fn habits(habits: &[Habit]) -> String {
    if habits.is_empty() {
        return "no habits yet\n".to_string();
    }
    habits
        .iter()
        .map(|habit| format!("{}  {}\n", habit.id, habit.name))
        .collect()
}

pub fn board(sections: &[BoardSection]) -> String {
    if sections.is_empty() {
        return "no routines yet\n".to_string();
    }
    let mut out = String::new();
    for section in sections {
        match &section.group_id {
            Some(id) => {
                let _ = writeln!(out, "== {} [{id}] ==", section.name);
            }
            None => {
                let _ = writeln!(out, "== {} ==", section.name);
            }
        }
        if section.routines.is_empty() {
            out.push_str("  (empty)\n");
        }
        for routine in &section.routines {
            let habits: Vec<String> = routine.habits.iter().map(ToString::to_string).collect();
            let _ = writeln!(
                out,
                "  {}  {} ({})",
                routine.routine_id,
                routine.name,
                habits.join(", ")
            );
        }
    }
    out
}

/// Month grid, Sunday first. Today is marked with `*`, completion with a shade mark.
pub fn calendar(month: YearMonth, cells: &[CalendarCell]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", month.first_day().format("%B %Y"));
    let header: Vec<String> = WEEKDAYS.iter().map(|day| format!("{day:<4}")).collect();
    let _ = writeln!(out, "{}", header.concat().trim_end());
    for week in cells.chunks(7) {
        let line: String = week
            .iter()
            .map(|cell| match cell {
                CalendarCell::Blank => "    ".to_string(),
                CalendarCell::Day(day) => format!(
                    "{:>2}{}{}",
                    day.day,
                    shade_mark(day.shade()),
                    if day.is_today { '*' } else { ' ' }
                ),
            })
            .collect();
        let _ = writeln!(out, "{}", line.trim_end());
    }
    out.push_str("legend: . <30%  + <80%  # 80%+  * today\n");
    out
}
