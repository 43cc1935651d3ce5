//! Structured event logging: one `tracing` call per child event, the way the
//! rest of this workspace reports diagnostics.

use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::plugin::{ChildEvent, Plugin, WorkerContext};

pub struct TracingLogger;

#[async_trait]
impl Plugin for TracingLogger {
    fn name(&self) -> &'static str {
        "tracing_logger"
    }

    async fn handle_event(&self, _ctx: &WorkerContext<'_>, child_id: usize, event: &ChildEvent) {
        match event {
            ChildEvent::WorkerStart => info!(child_id, "worker started"),
            ChildEvent::WorkerError { message } => error!(child_id, message, "worker error"),
            ChildEvent::BrokerError { message } => warn!(child_id, message, "broker error, retrying"),
            ChildEvent::TaskUnknown { task_name } => warn!(child_id, task_name, "unknown task requested"),
            ChildEvent::TaskExpires { task_id, task_name } => {
                info!(child_id, task_id, task_name, "task expired before execution")
            }
            ChildEvent::TaskStart { task_id, task_name, start_time, .. } => {
                info!(child_id, task_id, task_name, start_time, "task started")
            }
            ChildEvent::TaskDone { task_id, task_name, running_time } => {
                info!(child_id, task_id, task_name, running_time, "task done")
            }
            ChildEvent::TaskInterrupt { task_id, task_name, running_time } => {
                warn!(child_id, task_id, task_name, running_time, "task interrupted")
            }
            ChildEvent::TaskException { task_id, task_name, error, running_time } => {
                error!(child_id, task_id, task_name, running_time, kind = %error.kind, message = %error.message, "task raised")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::{Application, Broker, BrokerError, DefaultRouter, QueueName, ResultRecord, TaskId, TaskRecord};
    use async_trait::async_trait;
    use std::sync::Arc;

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

    #[tokio::test]
    async fn every_event_variant_logs_without_panicking() {
        let app = Application::new(Arc::new(NullBroker), Arc::new(DefaultRouter::default()));
        let gates: Vec<Arc<crate::gate::ChildGate>> = vec![];
        let ctx = WorkerContext { app: &app, children: &gates };
        let logger = TracingLogger;

        let events = vec![
            ChildEvent::WorkerStart,
            ChildEvent::WorkerError { message: "boom".to_string() },
            ChildEvent::BrokerError { message: "timeout".to_string() },
            ChildEvent::TaskUnknown { task_name: "t.missing".to_string() },
            ChildEvent::TaskExpires { task_id: "t1".to_string(), task_name: "t.stale".to_string() },
            ChildEvent::TaskStart {
                task_id: "t1".to_string(),
                task_name: "t.add".to_string(),
                request: Default::default(),
                start_time: 0.0,
                time_limit: None,
            },
            ChildEvent::TaskDone { task_id: "t1".to_string(), task_name: "t.add".to_string(), running_time: 0.1 },
            ChildEvent::TaskInterrupt { task_id: "t1".to_string(), task_name: "t.add".to_string(), running_time: 0.1 },
            ChildEvent::TaskException {
                task_id: "t1".to_string(),
                task_name: "t.add".to_string(),
                error: parcel_core::RemoteError::new("ValueError", "nope"),
                running_time: 0.1,
            },
        ];

        for event in &events {
            logger.handle_event(&ctx, 0, event).await;
        }
    }
}
