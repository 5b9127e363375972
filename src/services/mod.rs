//! Background services

pub mod batch;
pub mod scheduler;

pub use batch::{BatchOrchestrator, BatchSettings};
pub use scheduler::{DailyScheduler, SchedulerHandle};
