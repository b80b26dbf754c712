pub mod board;
pub mod calendar;
pub mod clock;
pub mod completion;
pub mod error;
pub mod file_store;
pub mod memory_store;
pub mod model;
pub mod notifications;
pub mod ordering;
pub mod progress;
pub mod service;
pub mod store;
pub mod tasks;

pub use crate::error::{Result, RoutineError};
pub use crate::service::{RoutineDraft, RoutineService, RoutineServiceBuilder};
