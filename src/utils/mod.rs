//! Utility functions and helpers

pub mod time;

pub use time::{hours_ago, now_millis, now_rfc3339};
