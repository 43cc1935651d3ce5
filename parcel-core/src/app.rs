//! The application façade: the single object client code and worker code both
//! hold. It owns the broker and router, and is the task registry.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use serde_json::Value;

use crate::broker::Broker;
use crate::error::{BrokerError, ClientError};
use crate::router::Router;
use crate::task::{TaskFn, TaskOptions, TaskSpec};
use crate::types::{self, Args, Kwargs, QueueName, Request, ResultRecord, TaskId, TaskRecord};

struct Inner {
    broker: Arc<dyn Broker>,
    router: Arc<dyn Router>,
    tasks: RwLock<HashMap<String, Arc<TaskSpec>>>,
}

/// Cheap to clone: every clone shares the same broker, router and task table.
/// The application owns its collaborators; tasks and handles hold a
/// non-owning clone of it.
#[derive(Clone)]
pub struct Application {
    inner: Arc<Inner>,
}

impl Application {
    pub fn new(broker: Arc<dyn Broker>, router: Arc<dyn Router>) -> Self {
        Self {
            inner: Arc::new(Inner {
                broker,
                router,
                tasks: RwLock::new(HashMap::new()),
            }),
        }
    }

    /// Registers `run` as a task. Registration order does not matter; a second
    /// registration under the same name overwrites the first.
    pub fn task(&self, run: TaskFn, opts: TaskOptions) -> Arc<TaskSpec> {
        let name = opts
            .name
            .clone()
            .unwrap_or_else(|| panic!("task registration requires an explicit name"));
        let spec = Arc::new(TaskSpec::new(run, name.clone(), opts));
        self.inner
            .tasks
            .write()
            .expect("task table lock is never held across an await point")
            .insert(name, spec.clone());
        spec
    }

    pub fn lookup_task(&self, name: &str) -> Option<Arc<TaskSpec>> {
        self.inner
            .tasks
            .read()
            .expect("task table lock is never held across an await point")
            .get(name)
            .cloned()
    }

    pub async fn send_task(
        &self,
        task_name: &str,
        args: Args,
        kwargs: Kwargs,
        queue: Option<QueueName>,
        mut request: Request,
    ) -> Result<TaskId, BrokerError> {
        let task_id = types::new_task_id();
        let queue = queue.unwrap_or_else(|| self.inner.router.get_queue(task_name));
        request.insert("id".to_string(), Value::String(task_id.clone()));
        request.insert("queue".to_string(), Value::String(queue.clone()));
        let record = TaskRecord {
            task_name: task_name.to_string(),
            request,
            args,
            kwargs,
        };
        self.inner.broker.put_task_req(&queue, &record).await?;
        Ok(task_id)
    }

    pub async fn get_result(
        &self,
        task_id: &str,
        timeout: f64,
        raise_exception: bool,
    ) -> Result<Value, ClientError> {
        let record = self
            .inner
            .broker
            .get_result(&task_id.to_string(), timeout)
            .await?
            .ok_or_else(|| ClientError::TimedOut(task_id.to_string()))?;
        match record.error {
            Some(exc) => {
                if raise_exception {
                    Err(ClientError::Remote(exc))
                } else {
                    Ok(serde_json::to_value(exc).expect("RemoteError always serializes"))
                }
            }
            None => Ok(record.value.unwrap_or(Value::Null)),
        }
    }

    pub async fn put_result(
        &self,
        task_id: &str,
        value: Option<Value>,
        exc: Option<types::RemoteError>,
    ) -> Result<(), BrokerError> {
        let record = ResultRecord {
            value,
            error: exc,
        };
        self.inner.broker.put_result(&task_id.to_string(), &record).await
    }

    pub async fn get_task(
        &self,
        queues: &[QueueName],
        timeout: f64,
    ) -> Result<Option<TaskRecord>, BrokerError> {
        self.inner.broker.get_task_req(queues, timeout).await
    }

    pub fn broker(&self) -> &Arc<dyn Broker> {
        &self.inner.broker
    }

    pub fn router(&self) -> &Arc<dyn Router> {
        &self.inner.router
    }
}
