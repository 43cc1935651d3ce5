//! Error taxonomy. Each kind maps to exactly one enum variant; there is
//! deliberately no blanket "other" case so call sites match on what can
//! actually happen at that boundary.

use crate::types::RemoteError;
use thiserror::Error;

/// Any backend connectivity or protocol failure. Raised at every broker operation
/// boundary, retried with back-off inside the worker loop and the `Beat` plugin,
/// and surfaced unretried to direct `send_task`/`put_result` callers.
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error("broker connection error: {0}")]
    Connection(#[from] redis::RedisError),

    #[error("result payload encoding error: {0}")]
    Encoding(String),

    #[error("invalid broker configuration: {0}")]
    Config(#[from] ConfigError),
}

/// Configuration-time failures: invalid broker parameters, a malformed cron
/// expression, or (were dynamic loading in scope, which it is not here) a bad
/// class reference.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("`broker_url` must not be empty")]
    InvalidBrokerUrl,

    #[error("`result_expires` must be greater than zero")]
    InvalidResultExpires,

    #[error("invalid worker configuration: {0}")]
    InvalidWorkerConfig(String),

    #[error("invalid crontab field: {0}")]
    InvalidCron(String),

    #[error("invalid parcel.toml: {0}")]
    InvalidToml(String),
}

/// Errors surfaced to a client awaiting a result.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("timed out waiting for result of task {0}")]
    TimedOut(String),

    #[error(transparent)]
    Broker(#[from] BrokerError),

    /// The task published an error and the caller asked for it to be raised
    /// rather than handed back as a value (`get_result(..., raise_exception=true)`).
    #[error("task failed: {0}")]
    Remote(RemoteError),
}

/// `RemoteError` kind tag used for the worker-generated interrupt, so it can be
/// round-tripped through the broker exactly like a user error and recognised by
/// `ResultHandle::wait`.
pub const TASK_INTERRUPT_KIND: &str = "TaskInterrupt";
