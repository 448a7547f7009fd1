mod sample;
mod session;

pub use sample::{Sample, SampleTimestamp, StoreStats};
pub use session::{SessionState, StopReason, TrackingSession};
