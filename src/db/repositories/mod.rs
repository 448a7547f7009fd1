pub mod samples;
pub mod sessions;
