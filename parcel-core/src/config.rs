//! Configuration loaded from `parcel.toml`: broker connection, routing table,
//! worker pool shape and periodic schedules. Mirrors the validate()-after-parse
//! idiom used throughout this codebase: `serde` handles shape and defaults,
//! `validate()` handles the semantic constraints `serde` cannot express.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::cron::Crontab;
use crate::error::ConfigError;

fn default_result_expires() -> i64 {
    3600
}

fn default_gzip_min_length() -> usize {
    0
}

fn default_queue() -> String {
    "default".to_string()
}

fn default_concurrency() -> usize {
    num_workers_heuristic()
}

fn num_workers_heuristic() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(1)
}

fn default_task_timeout() -> Option<u64> {
    None
}

fn default_max_tasks_per_child() -> Option<u64> {
    None
}

/// Broker connection settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BrokerConfig {
    pub broker_url: String,
    #[serde(default = "default_result_expires")]
    pub result_expires: i64,
    #[serde(default = "default_gzip_min_length")]
    pub gzip_min_length: usize,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_url: String::new(),
            result_expires: default_result_expires(),
            gzip_min_length: default_gzip_min_length(),
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker_url.is_empty() {
            return Err(ConfigError::InvalidBrokerUrl);
        }
        if self.result_expires <= 0 {
            return Err(ConfigError::InvalidResultExpires);
        }
        Ok(())
    }
}

/// Static task-name to queue-name overrides, applied on top of `default_queue`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct RouterConfig {
    #[serde(default = "default_queue")]
    pub default_queue: String,
    #[serde(default)]
    pub task_routes: HashMap<String, String>,
}

/// Worker pool shape: which queues to consume, how many concurrent children,
/// and the per-task guardrails applied when a task doesn't set its own.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    #[serde(default = "default_queues")]
    pub queues: Vec<String>,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_task_timeout")]
    pub task_timeout_seconds: Option<u64>,
    #[serde(default = "default_max_tasks_per_child")]
    pub max_tasks_per_child: Option<u64>,
    /// How long the blocking pop waits before polling again for shutdown.
    /// Trades off shutdown latency against busy-waiting.
    #[serde(default = "default_poll_interval")]
    pub poll_interval_seconds: f64,
}

fn default_queues() -> Vec<String> {
    vec!["default".to_string()]
}

fn default_poll_interval() -> f64 {
    1.0
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            queues: default_queues(),
            concurrency: default_concurrency(),
            task_timeout_seconds: None,
            max_tasks_per_child: None,
            poll_interval_seconds: default_poll_interval(),
        }
    }
}

impl WorkerConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queues.is_empty() {
            return Err(ConfigError::InvalidWorkerConfig("worker must consume at least one queue".to_string()));
        }
        if self.concurrency == 0 {
            return Err(ConfigError::InvalidWorkerConfig("concurrency must be at least 1".to_string()));
        }
        if self.poll_interval_seconds <= 0.0 {
            return Err(ConfigError::InvalidWorkerConfig("poll_interval_seconds must be greater than 0".to_string()));
        }
        Ok(())
    }
}

/// One entry in the periodic schedule table: a task to send and
/// the crontab expression governing when.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScheduleEntry {
    pub task: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
    #[serde(default)]
    pub queue: Option<String>,
    pub minute: String,
    pub hour: String,
    #[serde(default = "default_star")]
    pub day_of_month: String,
    #[serde(default = "default_star")]
    pub month_of_year: String,
    #[serde(default = "default_star")]
    pub day_of_week: String,
}

fn default_star() -> String {
    "*".to_string()
}

impl ScheduleEntry {
    pub fn crontab(&self) -> Result<Crontab, ConfigError> {
        Crontab::parse(
            &self.minute,
            &self.hour,
            &self.day_of_month,
            &self.month_of_year,
            &self.day_of_week,
        )
    }
}

/// Top-level `parcel.toml` document.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct AppConfig {
    pub broker: Option<BrokerConfig>,
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,
}

impl AppConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(broker) = &self.broker {
            broker.validate()?;
        }
        self.worker.validate()?;
        for entry in &self.schedule {
            entry.crontab()?;
        }
        Ok(())
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(content)
            .map_err(|e| ConfigError::InvalidToml(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_minimal_config() {
        let toml = r#"
            [broker]
            broker_url = "redis://localhost:6379/0"
        "#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.broker.unwrap().broker_url, "redis://localhost:6379/0");
        assert_eq!(config.worker.queues, vec!["default".to_string()]);
    }

    #[test]
    fn rejects_empty_broker_url() {
        let toml = r#"
            [broker]
            broker_url = ""
        "#;
        let err = AppConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBrokerUrl));
    }

    #[test]
    fn rejects_invalid_schedule_crontab() {
        let toml = r#"
            [[schedule]]
            task = "t.heartbeat"
            minute = "99"
            hour = "*"
        "#;
        let err = AppConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidCron(_)));
    }

    #[test]
    fn rejects_worker_config_with_no_queues() {
        let toml = r#"
            [worker]
            queues = []
        "#;
        let err = AppConfig::from_toml_str(toml).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidWorkerConfig(_)));
    }

    #[test]
    fn rejects_malformed_toml() {
        let err = AppConfig::from_toml_str("this is not valid toml ===").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidToml(_)));
    }

    #[test]
    fn accepts_routing_table() {
        let toml = r#"
            [router]
            default_queue = "default"
            [router.task_routes]
            "t.report" = "reports"
        "#;
        let config = AppConfig::from_toml_str(toml).unwrap();
        assert_eq!(config.router.task_routes.get("t.report").unwrap(), "reports");
    }
}
