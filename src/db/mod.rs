mod connection;
mod cursor;
pub mod error;
mod helpers;
pub mod maintenance;
mod migrations;
pub mod models;
mod repositories;
mod store;

pub use connection::Database;
pub use cursor::SampleCursor;
pub use error::StoreError;
pub use models::{
    Sample, SampleTimestamp, SessionState, StopReason, StoreStats, TrackingSession,
};
pub use store::TrackingStore;
