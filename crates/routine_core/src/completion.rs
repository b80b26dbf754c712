use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Result, RoutineError};

/// Separator between scope and habit id in a stored completion key.
pub const SEPARATOR: char = '_';

/// Scope marker for habits that are not part of any routine.
pub const STANDALONE: &str = "standalone";

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TaskScope {
    Standalone,
    Routine(String),
}

impl TaskScope {
    pub fn routine(id: impl Into<String>) -> Self {
        TaskScope::Routine(id.into())
    }

    pub fn as_str(&self) -> &str {
        match self {
            TaskScope::Standalone => STANDALONE,
            TaskScope::Routine(id) => id,
        }
    }

    pub fn routine_id(&self) -> Option<&str> {
        match self {
            TaskScope::Standalone => None,
            TaskScope::Routine(id) => Some(id),
        }
    }
}

/// One habit occurrence within a scope on a given day.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CompletionKey {
    pub scope: TaskScope,
    pub habit_id: String,
}

impl CompletionKey {
    pub fn new(scope: TaskScope, habit_id: impl Into<String>) -> Self {
        Self {
            scope,
            habit_id: habit_id.into(),
        }
    }

    pub fn standalone(habit_id: impl Into<String>) -> Self {
        Self::new(TaskScope::Standalone, habit_id)
    }

    pub fn in_routine(routine_id: impl Into<String>, habit_id: impl Into<String>) -> Self {
        Self::new(TaskScope::routine(routine_id), habit_id)
    }

    /// Storage form, `"{scope}_{habit_id}"`.
    pub fn encode(&self) -> String {
        encode(&self.scope, &self.habit_id)
    }

    /// Fails when either component would make the encoded form ambiguous.
    pub fn validate(&self) -> Result<()> {
        if let TaskScope::Routine(id) = &self.scope {
            validate_id(id)?;
            if id == STANDALONE {
                return Err(RoutineError::InvalidId(id.clone()));
            }
        }
        validate_id(&self.habit_id)
    }
}

impl fmt::Display for CompletionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.scope.as_str(), SEPARATOR, self.habit_id)
    }
}

impl FromStr for CompletionKey {
    type Err = RoutineError;

    fn from_str(raw: &str) -> Result<Self> {
        decode(raw)
    }
}

pub fn encode(scope: &TaskScope, habit_id: &str) -> String {
    let scope = scope.as_str();
    let mut key = String::with_capacity(scope.len() + 1 + habit_id.len());
    key.push_str(scope);
    key.push(SEPARATOR);
    key.push_str(habit_id);
    key
}

/// Splits on the first separator. Only unambiguous for ids accepted by [`validate_id`].
pub fn decode(raw: &str) -> Result<CompletionKey> {
    let (scope, habit_id) = raw
        .split_once(SEPARATOR)
        .ok_or_else(|| RoutineError::InvalidId(raw.to_string()))?;
    if scope.is_empty() || habit_id.is_empty() {
        return Err(RoutineError::InvalidId(raw.to_string()));
    }
    let scope = if scope == STANDALONE {
        TaskScope::Standalone
    } else {
        TaskScope::routine(scope)
    };
    Ok(CompletionKey::new(scope, habit_id))
}

pub fn validate_id(id: &str) -> Result<()> {
    if id.is_empty() || id.contains(SEPARATOR) || id.contains('/') {
        return Err(RoutineError::InvalidId(id.to_string()));
    }
    Ok(())
}
