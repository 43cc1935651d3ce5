pub mod child;
pub mod error;
pub mod gate;
pub mod plugin;
pub mod plugins;
pub mod supervisor;

pub use child::{ChildConfig, run_child};
pub use error::SupervisorError;
pub use gate::{ChildGate, RaiseWindow};
pub use plugin::{ChildEvent, Plugin, WorkerContext};
pub use supervisor::Supervisor;
