//! Worker settings read from the environment.

use std::time::Duration;

use crate::nats::NatsConfig;
use crate::params::WorkflowType;
use crate::store::database::env_or;
use crate::store::DatabaseConfig;

#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub nats: NatsConfig,
    /// Durable consumer name; defaults to `runprops-<queue>`
    pub consumer_name: String,
    /// Deliveries before a transiently failing message is dead-lettered
    pub max_deliver: i64,
    /// Redelivery delay after a failed dead-letter publish
    pub dead_letter_retry: Duration,
    pub batch_size: usize,
    pub poll_interval: Duration,
    pub database_url: Option<String>,
    pub database: DatabaseConfig,
}

impl WorkerSettings {
    /// Read settings for one workflow's worker. Unset or unparseable values
    /// fall back to their defaults.
    pub fn from_env(workflow: WorkflowType) -> Self {
        Self {
            nats: NatsConfig::default(),
            consumer_name: std::env::var("NATS_CONSUMER")
                .unwrap_or_else(|_| format!("runprops-{}", workflow.queue_name())),
            max_deliver: env_or("MAX_DELIVER", 3),
            dead_letter_retry: Duration::from_millis(env_or("DLQ_RETRY_DELAY_MS", 5000)),
            batch_size: env_or("BATCH_SIZE", 10),
            poll_interval: Duration::from_millis(env_or("POLL_INTERVAL_MS", 100)),
            database_url: std::env::var("DATABASE_URL").ok(),
            database: DatabaseConfig::from_env(),
        }
    }
}
