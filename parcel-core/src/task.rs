//! Task registration and per-invocation activation: a plain descriptor struct
//! rather than a base class to subclass, just a function pointer plus the
//! header defaults it was registered with and no runtime inheritance.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use serde_json::Value;

use crate::app::Application;
use crate::types::{Args, Kwargs, RemoteError, TaskId};

pub type TaskResult = Result<Value, RemoteError>;
pub type TaskFuture = Pin<Box<dyn Future<Output = TaskResult> + Send>>;
pub type TaskFn = Arc<dyn Fn(Args, Kwargs) -> TaskFuture + Send + Sync>;

/// Everything the worker loop needs to know about a registered task,
/// independent of any particular invocation. Populated at registration,
/// immutable thereafter.
#[derive(Clone)]
pub struct TaskSpec {
    pub name: String,
    pub run: TaskFn,
    /// Error kinds (`RemoteError::kind`) that are expected in normal operation
    /// and should not be regarded as a real error by the worker. There is no
    /// exception hierarchy to match against here, so this is a plain set of
    /// string tags instead.
    pub throws: HashSet<String>,
    pub expires: Option<i64>,
    pub time_limit: Option<u64>,
    pub max_retries: u32,
    pub default_retry_delay: u64,
    /// Reserved for future retry-on-error support; parsed and carried, not
    /// acted on by the core.
    pub autoretry_for: Vec<String>,
}

/// Options accepted by `Application::task`.
#[derive(Default, Clone)]
pub struct TaskOptions {
    pub name: Option<String>,
    pub throws: HashSet<String>,
    pub expires: Option<i64>,
    pub time_limit: Option<u64>,
    pub max_retries: Option<u32>,
    pub default_retry_delay: Option<u64>,
    pub autoretry_for: Vec<String>,
}

impl TaskSpec {
    pub(crate) fn new(run: TaskFn, name: String, opts: TaskOptions) -> Self {
        Self {
            name,
            run,
            throws: opts.throws,
            expires: opts.expires,
            time_limit: opts.time_limit,
            max_retries: opts.max_retries.unwrap_or(3),
            default_retry_delay: opts.default_retry_delay.unwrap_or(180),
            autoretry_for: opts.autoretry_for,
        }
    }
}

/// A per-request activation record: the wire request materialized as first-class
/// fields alongside the spec it was built from.
#[derive(Clone)]
pub struct TaskActivation {
    pub spec: Arc<TaskSpec>,
    pub id: TaskId,
    pub queue: String,
    pub request: crate::types::Request,
}

impl TaskActivation {
    pub fn new(spec: Arc<TaskSpec>, id: TaskId, queue: String, request: crate::types::Request) -> Self {
        Self {
            spec,
            id,
            queue,
            request,
        }
    }

    /// The request's `expires` header, if present, overriding the spec default.
    pub fn expires(&self) -> Option<f64> {
        self.request
            .get("expires")
            .and_then(Value::as_f64)
            .or(self.spec.expires.map(|v| v as f64))
    }

    pub fn time_limit(&self) -> Option<u64> {
        self.request
            .get("time_limit")
            .and_then(Value::as_u64)
            .or(self.spec.time_limit)
    }
}

/// A handle to a send_task'd invocation; `wait` is the blocking-on-result half of
/// `Task.delay()`.
pub struct ResultHandle {
    app: Application,
    task_id: TaskId,
}

impl ResultHandle {
    pub fn new(app: Application, task_id: TaskId) -> Self {
        Self { app, task_id }
    }

    pub fn task_id(&self) -> &str {
        &self.task_id
    }

    pub async fn wait(
        &self,
        timeout: f64,
        raise_exception: bool,
    ) -> Result<Value, crate::error::ClientError> {
        self.app.get_result(&self.task_id, timeout, raise_exception).await
    }
}
