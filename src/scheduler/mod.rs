pub mod controller;
pub mod state;

pub use controller::{Scheduler, SchedulerError, TickHandler};
pub use state::{SchedulerState, SchedulerStats, Tick, TickKind};
