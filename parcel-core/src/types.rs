//! Wire-level types shared by every collaborator: the application façade, the
//! broker, and the worker loop all pass these shapes across the queue boundary.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Positional task arguments, JSON-encodable in order.
pub type Args = Vec<Value>;

/// Keyword task arguments.
pub type Kwargs = Map<String, Value>;

/// A 32-character lowercase hex task identifier (a v4 UUID with hyphens removed).
pub type TaskId = String;

/// The name of a broker queue, e.g. `"default"`.
pub type QueueName = String;

/// Generates a fresh task id. Unique per call; not tied to any particular task.
pub fn new_task_id() -> TaskId {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The request map accompanying an invocation: at minimum `id` and `queue`, plus
/// whatever headers the caller or a plugin attached (`time_limit`, `expires`,
/// `max_retries`, `default_retry_delay`, and any task-specific keys). Kept as a
/// JSON map rather than a fixed struct so unknown keys pass through untouched.
pub type Request = Map<String, Value>;

/// The unit pushed onto a queue list: `(task_name, request, args, kwargs)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub task_name: String,
    pub request: Request,
    pub args: Args,
    pub kwargs: Kwargs,
}

/// An error object that has round-tripped through the broker's encoder: a class
/// name ("kind") and a message. Used both for user task failures and for the
/// handful of kinds the worker itself produces (`TaskInterrupt`, `BrokerError`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RemoteError {
    pub kind: String,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            message: message.into(),
        }
    }
}

impl std::fmt::Display for RemoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

impl std::error::Error for RemoteError {}

/// The result slot's contents: exactly one of `value`/`error` is populated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub value: Option<Value>,
    pub error: Option<RemoteError>,
}

impl ResultRecord {
    pub fn ok(value: Value) -> Self {
        Self {
            value: Some(value),
            error: None,
        }
    }

    pub fn err(error: RemoteError) -> Self {
        Self {
            value: None,
            error: Some(error),
        }
    }
}
