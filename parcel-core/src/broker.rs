//! The broker protocol. Four operations, one error kind. Queue keys are
//! `queue.<name>`; result keys are `result.<task_id>`, so client and worker
//! processes talking through the same store interoperate on the naming
//! alone.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::error::{BrokerError, ConfigError};
use crate::types::{QueueName, ResultRecord, TaskId, TaskRecord};

fn queue_key(queue: &str) -> String {
    format!("queue.{queue}")
}

fn result_key(task_id: &str) -> String {
    format!("result.{task_id}")
}

#[async_trait]
pub trait Broker: Send + Sync {
    async fn put_task_req(&self, queue: &QueueName, record: &TaskRecord) -> Result<(), BrokerError>;

    /// Blocking pop from the first non-empty queue among `queues`, scanned in
    /// order. `timeout == 0` blocks indefinitely; a positive timeout returns
    /// `Ok(None)` on expiry rather than erroring.
    async fn get_task_req(
        &self,
        queues: &[QueueName],
        timeout: f64,
    ) -> Result<Option<TaskRecord>, BrokerError>;

    async fn put_result(&self, task_id: &TaskId, result: &ResultRecord) -> Result<(), BrokerError>;

    async fn get_result(
        &self,
        task_id: &TaskId,
        timeout: f64,
    ) -> Result<Option<ResultRecord>, BrokerError>;

    /// A small debug summary of the applied configuration, used by the demo
    /// binary's startup banner.
    fn applied_conf(&self) -> Vec<(&'static str, String)> {
        Vec::new()
    }
}

/// Redis-backed broker. `BRPOP` provides the blocking pop for both task
/// requests and results; result publication pipelines `RPUSH` with `EXPIRE` so
/// the slot always carries a TTL.
pub struct RedisBroker {
    manager: ConnectionManager,
    broker_url: String,
    result_expires: i64,
    gzip_min_length: usize,
}

impl RedisBroker {
    pub async fn connect(
        broker_url: impl Into<String>,
        result_expires: i64,
        gzip_min_length: usize,
    ) -> Result<Self, BrokerError> {
        if result_expires <= 0 {
            return Err(ConfigError::InvalidResultExpires.into());
        }
        let broker_url = broker_url.into();
        let client = redis::Client::open(broker_url.as_str())?;
        let manager = client.get_connection_manager().await?;
        Ok(Self {
            manager,
            broker_url,
            result_expires,
            gzip_min_length,
        })
    }
}

#[async_trait]
impl Broker for RedisBroker {
    async fn put_task_req(&self, queue: &QueueName, record: &TaskRecord) -> Result<(), BrokerError> {
        let payload = crate::encoding::encode(record, self.gzip_min_length)?;
        let mut conn = self.manager.clone();
        conn.rpush::<_, _, ()>(queue_key(queue), payload).await?;
        Ok(())
    }

    async fn get_task_req(
        &self,
        queues: &[QueueName],
        timeout: f64,
    ) -> Result<Option<TaskRecord>, BrokerError> {
        let keys: Vec<String> = queues.iter().map(|q| queue_key(q)).collect();
        let mut conn = self.manager.clone();
        let reply: Option<(String, Vec<u8>)> = conn.brpop(keys, timeout).await?;
        match reply {
            Some((_, payload)) => Ok(Some(crate::encoding::decode(&payload)?)),
            None => Ok(None),
        }
    }

    async fn put_result(&self, task_id: &TaskId, result: &ResultRecord) -> Result<(), BrokerError> {
        let payload = crate::encoding::encode(result, self.gzip_min_length)?;
        let key = result_key(task_id);
        let mut conn = self.manager.clone();
        redis::pipe()
            .rpush(&key, payload)
            .ignore()
            .expire(&key, self.result_expires)
            .ignore()
            .query_async::<()>(&mut conn)
            .await?;
        Ok(())
    }

    async fn get_result(
        &self,
        task_id: &TaskId,
        timeout: f64,
    ) -> Result<Option<ResultRecord>, BrokerError> {
        let mut conn = self.manager.clone();
        let reply: Option<(String, Vec<u8>)> =
            conn.brpop(result_key(task_id), timeout).await?;
        match reply {
            Some((_, payload)) => Ok(Some(crate::encoding::decode(&payload)?)),
            None => Ok(None),
        }
    }

    fn applied_conf(&self) -> Vec<(&'static str, String)> {
        let mut conf = vec![
            ("broker_url", self.broker_url.clone()),
            ("result_expires", self.result_expires.to_string()),
        ];
        if self.gzip_min_length > 0 {
            conf.push(("gzip_min_length", self.gzip_min_length.to_string()));
        }
        conf
    }
}
