pub mod controller;
pub mod state;

pub use controller::{RecoveryOutcome, TickOutcome, Tracker, TrackerConfig, TrackerError};
pub use state::{LastError, TrackerState, TrackerStatus};
