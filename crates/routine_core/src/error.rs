use thiserror::Error;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum RoutineError {
    #[error("habit name must not be empty")]
    EmptyHabitName,
    #[error("a habit named `{0}` already exists")]
    DuplicateHabit(String),
    #[error("a routine needs a name and at least one habit")]
    InvalidRoutine,
    #[error("notification time `{0}` is not a valid HH:MM time")]
    InvalidNotificationTime(String),
    #[error("group name must not be empty")]
    EmptyGroupName,
    #[error("identifier `{0}` cannot be used in completion keys")]
    InvalidId(String),
    #[error("unknown routine `{0}`")]
    UnknownRoutine(String),
    #[error("unknown routine group `{0}`")]
    UnknownGroup(String),
    #[error("invalid month {year}-{month}")]
    InvalidMonth { year: i32, month: u32 },
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type Result<T, E = RoutineError> = std::result::Result<T, E>;
