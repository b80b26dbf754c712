use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Transient, user-visible message raised by a service operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Notice {
    HabitAddFailed,
    DuplicateHabit,
    HabitDeleted,
    HabitDeleteFailed,
    ProgressUpdateFailed,
    RoutineSaved,
    RoutineUpdated,
    RoutineSaveFailed,
    RoutineValidation,
    RoutineDeleted,
    RoutineDeleteFailed,
    RoutineReordered,
    RoutineReorderFailed,
    GroupSaved,
    GroupSaveFailed,
    GroupDeleted,
    GroupDeleteFailed,
    GroupReordered,
    GroupReorderFailed,
}

impl Notice {
    pub fn level(&self) -> NoticeLevel {
        match self {
            Notice::HabitDeleted
            | Notice::RoutineSaved
            | Notice::RoutineUpdated
            | Notice::RoutineDeleted
            | Notice::RoutineReordered
            | Notice::GroupSaved
            | Notice::GroupDeleted
            | Notice::GroupReordered => NoticeLevel::Info,
            _ => NoticeLevel::Error,
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Notice::HabitAddFailed => "Could not add the habit. Please try again.",
            Notice::DuplicateHabit => "A habit with this name already exists.",
            Notice::HabitDeleted => "Habit deleted.",
            Notice::HabitDeleteFailed => "Could not delete the habit.",
            Notice::ProgressUpdateFailed => "Could not update today's progress.",
            Notice::RoutineSaved => "Routine saved.",
            Notice::RoutineUpdated => "Routine updated.",
            Notice::RoutineSaveFailed => "Could not save the routine.",
            Notice::RoutineValidation => "Enter a routine name and select at least one habit.",
            Notice::RoutineDeleted => "Routine deleted.",
            Notice::RoutineDeleteFailed => "Could not delete the routine.",
            Notice::RoutineReordered => "Routine order changed.",
            Notice::RoutineReorderFailed => "Could not change the routine order.",
            Notice::GroupSaved => "Group saved.",
            Notice::GroupSaveFailed => "Could not save the group.",
            Notice::GroupDeleted => "Group deleted. Its routines are now ungrouped.",
            Notice::GroupDeleteFailed => "Could not delete the group.",
            Notice::GroupReordered => "Group order changed.",
            Notice::GroupReorderFailed => "Could not change the group order.",
        }
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.message())
    }
}

/// Front ends implement this to surface notices to the user.
pub trait NotificationSink: Send + Sync {
    fn notify(&self, notice: Notice);
}

impl<T: NotificationSink + ?Sized> NotificationSink for Arc<T> {
    fn notify(&self, notice: Notice) {
        (**self).notify(notice);
    }
}

/// Keeps every notice; handy for tests and for front ends that drain on render.
#[derive(Debug, Default)]
pub struct NoticeLog {
    notices: Mutex<Vec<Notice>>,
}

impl NoticeLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn drain(&self) -> Vec<Notice> {
        std::mem::take(&mut *self.notices.lock())
    }

    pub fn last(&self) -> Option<Notice> {
        self.notices.lock().last().cloned()
    }
}

impl NotificationSink for NoticeLog {
    fn notify(&self, notice: Notice) {
        self.notices.lock().push(notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failures_are_error_level() {
        assert_eq!(Notice::HabitDeleted.level(), NoticeLevel::Info);
        assert_eq!(Notice::HabitAddFailed.level(), NoticeLevel::Error);
        assert_eq!(Notice::RoutineValidation.level(), NoticeLevel::Error);
    }

    #[test]
    fn log_drains_in_order() {
        let log = NoticeLog::new();
        log.notify(Notice::HabitDeleted);
        log.notify(Notice::DuplicateHabit);
        assert_eq!(log.last(), Some(Notice::DuplicateHabit));
        assert_eq!(log.drain(), vec![Notice::HabitDeleted, Notice::DuplicateHabit]);
        assert!(log.drain().is_empty());
    }
}
