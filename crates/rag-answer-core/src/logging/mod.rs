//! Activity logging with an async queue, plus subscriber setup

mod logger;
pub mod telemetry;
pub mod types;

pub use logger::{ActivityLogger, ActivitySink, TracingSink};
pub use telemetry::init_tracing;
pub use types::{ActivityLog, ActivityLogBuilder, ActivityStatus, ActivityType};

#[cfg(test)]
pub(crate) use logger::tests::CollectingSink;
