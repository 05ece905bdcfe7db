//! Deletion of expired records, on demand and on a timer.

pub mod cleaner;
pub mod scheduler;

pub use cleaner::Cleaner;
pub use scheduler::CleanupScheduler;
