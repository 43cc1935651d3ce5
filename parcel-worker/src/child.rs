//! The child execution loop. One of these runs per concurrency slot, as a
//! tokio task rather than a forked OS process (see the process model note in
//! the crate's top-level docs).

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use parcel_core::error::TASK_INTERRUPT_KIND;
use parcel_core::{Application, QueueName, RemoteError, TaskActivation};
use tokio::sync::mpsc;

use crate::gate::{ChildGate, RaiseWindow};
use crate::plugin::ChildEvent;

pub struct ChildConfig {
    pub queues: Vec<QueueName>,
    /// `0.0` blocks indefinitely on each fetch and keeps the worker window open
    /// for the whole wait, so a warm-shutdown request can land mid-fetch; a
    /// fetch already in flight when that happens loses whatever task it was
    /// about to receive. Any positive value clears the window for the
    /// duration of the call instead, trading that hazard for a fixed poll
    /// delay at shutdown.
    pub fetch_timeout: f64,
    pub error_timeout: f64,
}

pub(crate) fn now_epoch() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs_f64()
}

/// Runs until a warm-shutdown request lands on the fetch suspension point.
/// Cold shutdown is not handled here: the supervisor aborts the owning tokio
/// task directly, matching QUIT's "abort immediately" semantics.
pub async fn run_child(
    id: usize,
    app: Application,
    config: ChildConfig,
    gate: Arc<ChildGate>,
    events: mpsc::UnboundedSender<(usize, ChildEvent)>,
) {
    let emit = |event: ChildEvent| {
        if !gate.is_terminated() {
            let _ = events.send((id, event));
        }
    };

    emit(ChildEvent::WorkerStart);

    loop {
        let record = if config.fetch_timeout > 0.0 {
            gate.set_window(RaiseWindow::None);
            match app.get_task(&config.queues, config.fetch_timeout).await {
                Ok(record) => record,
                Err(e) => {
                    emit(ChildEvent::BrokerError { message: e.to_string() });
                    tokio::time::sleep(Duration::from_secs_f64(config.error_timeout)).await;
                    continue;
                }
            }
        } else {
            gate.set_window(RaiseWindow::Worker);
            tokio::select! {
                biased;
                _ = gate.warm_shutdown_requested() => {
                    gate.set_window(RaiseWindow::None);
                    return;
                }
                result = app.get_task(&config.queues, config.fetch_timeout) => {
                    match result {
                        Ok(record) => record,
                        Err(e) => {
                            emit(ChildEvent::BrokerError { message: e.to_string() });
                            tokio::time::sleep(Duration::from_secs_f64(config.error_timeout)).await;
                            continue;
                        }
                    }
                }
            }
        };

        let record = match record {
            Some(r) => r,
            None => continue,
        };

        let task_id = record
            .request
            .get("id")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string();

        let spec = match app.lookup_task(&record.task_name) {
            Some(spec) => spec,
            None => {
                emit(ChildEvent::TaskUnknown { task_name: record.task_name.clone() });
                continue;
            }
        };

        let activation = TaskActivation::new(
            spec.clone(),
            task_id.clone(),
            record.request.get("queue").and_then(|v| v.as_str()).unwrap_or_default().to_string(),
            record.request.clone(),
        );

        let start_time = now_epoch();

        if let Some(expires) = activation.expires() {
            if expires < start_time {
                emit(ChildEvent::TaskExpires {
                    task_id,
                    task_name: record.task_name.clone(),
                });
                continue;
            }
        }

        emit(ChildEvent::TaskStart {
            task_id: task_id.clone(),
            task_name: record.task_name.clone(),
            request: record.request.clone(),
            start_time,
            time_limit: activation.time_limit(),
        });

        gate.set_window(RaiseWindow::Task);
        let run_fut = (spec.run)(record.args, record.kwargs);
        // Spawned rather than polled in place so a panicking task surfaces as a
        // `JoinError` here instead of unwinding this child's whole run loop,
        // mirroring the per-cycle try/except around task execution.
        let mut task_handle = tokio::spawn(run_fut);
        let outcome = tokio::select! {
            biased;
            _ = gate.task_interrupt_requested() => {
                task_handle.abort();
                None
            }
            result = &mut task_handle => Some(result),
        };
        gate.set_window(RaiseWindow::None);

        let running_time = now_epoch() - start_time;

        let (result, event) = match outcome {
            None => {
                let error = RemoteError::new(TASK_INTERRUPT_KIND, "task was interrupted");
                let event = ChildEvent::TaskInterrupt {
                    task_id: task_id.clone(),
                    task_name: record.task_name.clone(),
                    running_time,
                };
                (Err(error), event)
            }
            Some(Ok(Ok(value))) => {
                let event = ChildEvent::TaskDone {
                    task_id: task_id.clone(),
                    task_name: record.task_name.clone(),
                    running_time,
                };
                (Ok(value), event)
            }
            Some(Ok(Err(error))) => {
                if spec.throws.contains(&error.kind) {
                    let event = ChildEvent::TaskDone {
                        task_id: task_id.clone(),
                        task_name: record.task_name.clone(),
                        running_time,
                    };
                    (Err(error), event)
                } else {
                    let event = ChildEvent::TaskException {
                        task_id: task_id.clone(),
                        task_name: record.task_name.clone(),
                        error: error.clone(),
                        running_time,
                    };
                    (Err(error), event)
                }
            }
            Some(Err(join_error)) => {
                let message = if join_error.is_panic() {
                    format!("task {} panicked: {join_error}", record.task_name)
                } else {
                    format!("task {} was cancelled: {join_error}", record.task_name)
                };
                let error = RemoteError::new("WorkerError", message.clone());
                let event = ChildEvent::WorkerError { message };
                (Err(error), event)
            }
        };

        publish_result(&app, &task_id, result, config.error_timeout).await;
        emit(event);
    }
}

/// Publishes the result, retrying on `BrokerError` with the same back-off the
/// fetch loop uses.
async fn publish_result(
    app: &Application,
    task_id: &str,
    result: Result<serde_json::Value, RemoteError>,
    error_timeout: f64,
) {
    let (value, error) = match result {
        Ok(value) => (Some(value), None),
        Err(error) => (None, Some(error)),
    };
    loop {
        match app.put_result(task_id, value.clone(), error.clone()).await {
            Ok(()) => return,
            Err(_) => tokio::time::sleep(Duration::from_secs_f64(error_timeout)).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parcel_core::router::DefaultRouter;
    use parcel_core::task::TaskFuture;
    use parcel_core::{Broker, BrokerError, ResultRecord, TaskId, TaskOptions, TaskRecord};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::time::Duration as StdDuration;

    struct MemoryBroker {
        queues: Mutex<HashMap<String, Vec<TaskRecord>>>,
        results: Mutex<HashMap<String, ResultRecord>>,
    }

    impl MemoryBroker {
        fn new() -> Self {
            Self {
                queues: Mutex::new(HashMap::new()),
                results: Mutex::new(HashMap::new()),
            }
        }
    }

    #[async_trait]
    impl Broker for MemoryBroker {
        async fn put_task_req(&self, queue: &QueueName, record: &TaskRecord) -> Result<(), BrokerError> {
            self.queues.lock().unwrap().entry(queue.clone()).or_default().push(record.clone());
            Ok(())
        }

        async fn get_task_req(&self, queues: &[QueueName], _timeout: f64) -> Result<Option<TaskRecord>, BrokerError> {
            let mut map = self.queues.lock().unwrap();
            for q in queues {
                if let Some(list) = map.get_mut(q) {
                    if !list.is_empty() {
                        return Ok(Some(list.remove(0)));
                    }
                }
            }
            Ok(None)
        }

        async fn put_result(&self, task_id: &TaskId, result: &ResultRecord) -> Result<(), BrokerError> {
            self.results.lock().unwrap().insert(task_id.clone(), result.clone());
            Ok(())
        }

        async fn get_result(&self, task_id: &TaskId, _timeout: f64) -> Result<Option<ResultRecord>, BrokerError> {
            Ok(self.results.lock().unwrap().remove(task_id))
        }
    }

    fn test_app() -> Application {
        Application::new(Arc::new(MemoryBroker::new()), Arc::new(DefaultRouter::default()))
    }

    fn spawn_child(app: Application, gate: Arc<ChildGate>) -> (mpsc::UnboundedReceiver<(usize, ChildEvent)>, tokio::task::JoinHandle<()>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let config = ChildConfig {
            queues: vec!["default".to_string()],
            fetch_timeout: 0.01,
            error_timeout: 0.01,
        };
        let handle = tokio::spawn(run_child(0, app, config, gate, tx));
        (rx, handle)
    }

    #[tokio::test]
    async fn executes_a_registered_task_and_publishes_its_result() {
        let app = test_app();
        app.task(
            Arc::new(|args: parcel_core::Args, _kwargs| {
                let x = args.first().and_then(Value::as_i64).unwrap_or(0);
                let y = args.get(1).and_then(Value::as_i64).unwrap_or(0);
                Box::pin(async move { Ok::<Value, RemoteError>(Value::from(x + y)) }) as TaskFuture
            }),
            TaskOptions { name: Some("t.add".to_string()), ..Default::default() },
        );

        let id = app.send_task("t.add", vec![json!(2), json!(3)], Default::default(), None, Default::default())
            .await
            .unwrap();

        let gate = Arc::new(ChildGate::new());
        let (mut rx, handle) = spawn_child(app.clone(), gate.clone());

        let value = tokio::time::timeout(StdDuration::from_secs(2), app.get_result(&id, 0.0, true))
            .await
            .expect("task should complete")
            .unwrap();
        assert_eq!(value, json!(5));

        let mut saw_task_done = false;
        while let Ok(Some((_, event))) = tokio::time::timeout(StdDuration::from_millis(200), rx.recv()).await {
            if matches!(event, ChildEvent::TaskDone { .. }) {
                saw_task_done = true;
                break;
            }
        }
        assert!(saw_task_done);

        gate.set_terminated();
        handle.abort();
    }

    #[tokio::test]
    async fn unknown_task_name_emits_task_unknown_and_is_dropped() {
        let app = test_app();
        app.send_task("t.missing", vec![], Default::default(), None, Default::default())
            .await
            .unwrap();

        let gate = Arc::new(ChildGate::new());
        let (mut rx, handle) = spawn_child(app.clone(), gate.clone());

        let mut saw_unknown = false;
        while let Ok(Some((_, event))) = tokio::time::timeout(StdDuration::from_millis(500), rx.recv()).await {
            if matches!(event, ChildEvent::TaskUnknown { .. }) {
                saw_unknown = true;
                break;
            }
        }
        assert!(saw_unknown);

        gate.set_terminated();
        handle.abort();
    }

    #[tokio::test]
    async fn interrupting_a_running_task_publishes_a_task_interrupt_error() {
        let app = test_app();
        app.task(
            Arc::new(|_args, _kwargs| {
                Box::pin(async move {
                    tokio::time::sleep(StdDuration::from_secs(10)).await;
                    Ok::<Value, RemoteError>(Value::Null)
                }) as TaskFuture
            }),
            TaskOptions { name: Some("t.hang".to_string()), ..Default::default() },
        );
        let id = app.send_task("t.hang", vec![], Default::default(), None, Default::default())
            .await
            .unwrap();

        let gate = Arc::new(ChildGate::new());
        let (_rx, handle) = spawn_child(app.clone(), gate.clone());

        // Give the child time to reach the running-task window, then interrupt it.
        tokio::time::sleep(StdDuration::from_millis(100)).await;
        gate.request_task_interrupt();

        let value = tokio::time::timeout(StdDuration::from_secs(2), app.get_result(&id, 0.0, false))
            .await
            .expect("interrupted task should still publish a result")
            .unwrap();
        assert_eq!(value["kind"], TASK_INTERRUPT_KIND);

        gate.set_terminated();
        handle.abort();
    }
}
