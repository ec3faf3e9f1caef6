//! Shared helpers: geometry, time, message loss and quotas

pub mod math;
pub mod rate_limit;
pub mod time;
