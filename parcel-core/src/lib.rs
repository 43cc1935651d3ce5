//! Core types shared by clients and workers: the wire protocol, the Redis
//! broker, task routing, the application façade, the cron schedule evaluator,
//! and configuration loading.

pub mod app;
pub mod broker;
pub mod config;
pub mod cron;
pub mod encoding;
pub mod error;
pub mod router;
pub mod task;
pub mod types;

pub use app::Application;
pub use broker::{Broker, RedisBroker};
pub use config::AppConfig;
pub use cron::Crontab;
pub use error::{BrokerError, ClientError, ConfigError};
pub use router::{DefaultRouter, Router};
pub use task::{ResultHandle, TaskActivation, TaskOptions, TaskSpec};
pub use types::{Args, Kwargs, QueueName, RemoteError, Request, ResultRecord, TaskId, TaskRecord};
