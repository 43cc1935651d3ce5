//! Per-task deadline enforcement: tracks `time_limit` deadlines in a min-heap
//! and interrupts the owning child once one elapses. Children are tokio tasks
//! rather than OS processes here, so the supervisor hands plugins direct
//! child handles, and the interrupt is delivered through one of those rather
//! than a signal to a PID.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use parcel_core::TaskId;
use tracing::debug;

use crate::plugin::{ChildEvent, Plugin, WorkerContext};

struct Deadline {
    at: f64,
    task_id: TaskId,
}

impl PartialEq for Deadline {
    fn eq(&self, other: &Self) -> bool {
        self.at == other.at
    }
}
impl Eq for Deadline {}
impl PartialOrd for Deadline {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        self.at.partial_cmp(&other.at)
    }
}
impl Ord for Deadline {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.partial_cmp(other).unwrap_or(std::cmp::Ordering::Equal)
    }
}

#[derive(Default)]
struct State {
    heap: BinaryHeap<Reverse<Deadline>>,
    running: HashMap<TaskId, usize>,
}

pub struct TaskKiller {
    state: Mutex<State>,
}

impl TaskKiller {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
        }
    }
}

impl Default for TaskKiller {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for TaskKiller {
    fn name(&self) -> &'static str {
        "task_killer"
    }

    async fn handle_event(&self, _ctx: &WorkerContext<'_>, child_id: usize, event: &ChildEvent) {
        match event {
            ChildEvent::TaskStart { task_id, start_time, time_limit: Some(time_limit), .. } => {
                let mut state = self.state.lock().unwrap();
                let at = *start_time + *time_limit as f64;
                state.running.insert(task_id.clone(), child_id);
                state.heap.push(Reverse(Deadline { at, task_id: task_id.clone() }));
            }
            ChildEvent::TaskDone { task_id, .. }
            | ChildEvent::TaskInterrupt { task_id, .. }
            | ChildEvent::TaskException { task_id, .. } => {
                self.state.lock().unwrap().running.remove(task_id);
            }
            _ => {}
        }
    }

    fn master_idle(&self, now_epoch_seconds: f64) -> Option<f64> {
        let state = self.state.lock().unwrap();
        let next = state.heap.peek()?.0.at;
        Some((next - now_epoch_seconds).max(0.0))
    }

    async fn on_idle(&self, ctx: &WorkerContext<'_>, now_epoch_seconds: f64) {
        loop {
            let expired = {
                let mut state = self.state.lock().unwrap();
                match state.heap.peek() {
                    Some(Reverse(deadline)) if deadline.at <= now_epoch_seconds => {
                        state.heap.pop().unwrap().0
                    }
                    _ => break,
                }
            };

            let child_id = {
                let state = self.state.lock().unwrap();
                state.running.get(&expired.task_id).copied()
            };
            if let Some(child_id) = child_id {
                debug!(task_id = %expired.task_id, child_id, "task_killer: deadline elapsed, interrupting");
                ctx.interrupt_child(child_id);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gate::{ChildGate, RaiseWindow};
    use async_trait::async_trait;
    use parcel_core::{Application, Broker, BrokerError, DefaultRouter, QueueName, ResultRecord, TaskRecord};
    use std::sync::Arc;
    use std::time::Duration;

    struct NullBroker;

    #[async_trait]
    impl Broker for NullBroker {
        async fn put_task_req(&self, _queue: &QueueName, _record: &TaskRecord) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn get_task_req(&self, _queues: &[QueueName], _timeout: f64) -> Result<Option<TaskRecord>, BrokerError> {
            Ok(None)
        }
        async fn put_result(&self, _task_id: &TaskId, _result: &ResultRecord) -> Result<(), BrokerError> {
            Ok(())
        }
        async fn get_result(&self, _task_id: &TaskId, _timeout: f64) -> Result<Option<ResultRecord>, BrokerError> {
            Ok(None)
        }
    }

    fn test_app() -> Application {
        Application::new(Arc::new(NullBroker), Arc::new(DefaultRouter::default()))
    }

    #[tokio::test]
    async fn interrupts_the_owning_child_once_its_deadline_elapses() {
        let killer = TaskKiller::new();
        let app = test_app();
        let gate = Arc::new(ChildGate::new());
        gate.set_window(RaiseWindow::Task);
        let gates = vec![gate.clone()];
        let ctx = WorkerContext { app: &app, children: &gates };

        killer
            .handle_event(
                &ctx,
                0,
                &ChildEvent::TaskStart {
                    task_id: "t1".to_string(),
                    task_name: "t.hang".to_string(),
                    request: Default::default(),
                    start_time: 100.0,
                    time_limit: Some(5),
                },
            )
            .await;

        // Deadline is 105.0; nothing should happen before that.
        killer.on_idle(&ctx, 104.0).await;
        assert!(!gate.is_terminated());

        killer.on_idle(&ctx, 105.0).await;
        tokio::time::timeout(Duration::from_secs(1), gate.task_interrupt_requested())
            .await
            .expect("task_killer should have requested an interrupt past the deadline");
    }

    #[tokio::test]
    async fn a_completed_task_is_not_interrupted_after_it_finishes() {
        let killer = TaskKiller::new();
        let app = test_app();
        let gate = Arc::new(ChildGate::new());
        gate.set_window(RaiseWindow::Task);
        let gates = vec![gate.clone()];
        let ctx = WorkerContext { app: &app, children: &gates };

        killer
            .handle_event(
                &ctx,
                0,
                &ChildEvent::TaskStart {
                    task_id: "t1".to_string(),
                    task_name: "t.quick".to_string(),
                    request: Default::default(),
                    start_time: 100.0,
                    time_limit: Some(5),
                },
            )
            .await;
        killer
            .handle_event(
                &ctx,
                0,
                &ChildEvent::TaskDone {
                    task_id: "t1".to_string(),
                    task_name: "t.quick".to_string(),
                    running_time: 1.0,
                },
            )
            .await;

        killer.on_idle(&ctx, 200.0).await;
        assert!(tokio::time::timeout(Duration::from_millis(50), gate.task_interrupt_requested())
            .await
            .is_err());
    }
}
