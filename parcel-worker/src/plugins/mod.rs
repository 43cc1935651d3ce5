pub mod beat;
pub mod task_killer;
pub mod tracing_logger;

pub use beat::{Beat, ScheduleEntry};
pub use task_killer::TaskKiller;
pub use tracing_logger::TracingLogger;
