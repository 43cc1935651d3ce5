//! The plugin surface: a trait each master-side collaborator implements,
//! handed every child event in registration order plus a periodic idle tick.

use std::sync::Arc;

use async_trait::async_trait;
use parcel_core::{Application, RemoteError, Request, TaskId};

use crate::gate::ChildGate;

/// Lifecycle events a child reports to the master over its (in-process) pipe.
/// Carries the originating child's index so a plugin wanting to act on a
/// specific child (`TaskKiller` interrupting a timed-out task) can reach it
/// through `WorkerContext::interrupt_child`.
#[derive(Debug, Clone)]
pub enum ChildEvent {
    WorkerStart,
    WorkerError { message: String },
    BrokerError { message: String },
    TaskUnknown { task_name: String },
    TaskExpires { task_id: TaskId, task_name: String },
    TaskStart { task_id: TaskId, task_name: String, request: Request, start_time: f64, time_limit: Option<u64> },
    TaskDone { task_id: TaskId, task_name: String, running_time: f64 },
    TaskInterrupt { task_id: TaskId, task_name: String, running_time: f64 },
    TaskException { task_id: TaskId, task_name: String, error: RemoteError, running_time: f64 },
}

/// What a plugin's handlers are given access to: the shared application (for
/// `Beat` to call `send_task`) and the live child gates (for `TaskKiller` to
/// deliver an interrupt).
pub struct WorkerContext<'a> {
    pub app: &'a Application,
    pub children: &'a [Arc<ChildGate>],
}

impl WorkerContext<'_> {
    pub fn interrupt_child(&self, child_id: usize) {
        if let Some(gate) = self.children.get(child_id) {
            gate.request_task_interrupt();
        }
    }
}

#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &'static str;

    /// Called for every event emitted by any child, in registration order
    /// relative to other plugins.
    async fn handle_event(&self, _ctx: &WorkerContext<'_>, _child_id: usize, _event: &ChildEvent) {}

    /// Seconds until this plugin next wants `on_idle` called. The supervisor
    /// uses the minimum of all plugins' non-`None` returns as its wait timeout.
    fn master_idle(&self, _now_epoch_seconds: f64) -> Option<f64> {
        None
    }

    async fn on_idle(&self, _ctx: &WorkerContext<'_>, _now_epoch_seconds: f64) {}
}
