//! Battle server: dispatch, tick loop and reporting

pub mod dispatch;
pub mod report;
pub mod scheduler;

pub use dispatch::{DispatchReport, Dispatcher, Rejection};
pub use scheduler::{RunOutcome, Server, ServerError, TickOutcome};
