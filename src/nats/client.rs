/// NATS JetStream client for run-property queues
///
/// Provides connection management, per-workflow pull consumers and
/// dead-letter publishing

use async_nats::jetstream::{self, consumer::PullConsumer};
use std::time::Duration;

use crate::nats::message_envelope::DeadLetter;
use crate::params::WorkflowType;

/// Subject prefix shared by every run-property queue.
pub const SUBJECT_PREFIX: &str = "runprops";

#[derive(Debug, Clone)]
pub struct NatsConfig {
    pub url: String,
    pub stream_name: String,
    pub max_age: Duration,
    pub max_bytes: i64,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            url: std::env::var("NATS_URL")
                .unwrap_or_else(|_| "nats://localhost:4222".to_string()),
            stream_name: std::env::var("NATS_STREAM")
                .unwrap_or_else(|_| "RUN_PROPS".to_string()),
            max_age: Duration::from_secs(7 * 24 * 60 * 60), // 7 days
            max_bytes: 1024 * 1024 * 1024, // 1GB
        }
    }
}

/// Subject a workflow's run properties are published on.
pub fn subject_for(workflow: WorkflowType) -> String {
    format!("{}.{}", SUBJECT_PREFIX, workflow.queue_name())
}

/// Subject dead letters of a workflow are parked on.
pub fn dead_letter_subject(workflow: WorkflowType) -> String {
    format!("{}.dlq.{}", SUBJECT_PREFIX, workflow.queue_name())
}

#[derive(Clone)]
pub struct NatsClient {
    client: async_nats::Client,
    jetstream: jetstream::Context,
    stream_name: String,
}

impl NatsClient {
    /// Connect to NATS and initialize the run-property stream
    pub async fn connect(config: NatsConfig) -> Result<Self, async_nats::Error> {
        let client = async_nats::connect(&config.url).await?;
        tracing::info!("Connected to NATS at {}", config.url);

        let jetstream = jetstream::new(client.clone());

        let _stream = jetstream
            .get_or_create_stream(jetstream::stream::Config {
                name: config.stream_name.clone(),
                subjects: vec![format!("{}.>", SUBJECT_PREFIX)],
                max_age: config.max_age,
                max_bytes: config.max_bytes,
                storage: jetstream::stream::StorageType::File,
                num_replicas: 1,
                ..Default::default()
            })
            .await?;

        tracing::info!("JetStream stream '{}' ready", config.stream_name);

        Ok(Self {
            client,
            jetstream,
            stream_name: config.stream_name,
        })
    }

    /// Durable pull consumer bound to one workflow's subject, with explicit
    /// acknowledgement so failed messages are redelivered
    ///
    /// Deliveries are unlimited on the server; the worker applies its own
    /// limit and dead-letters past it.
    pub async fn consumer(
        &self,
        workflow: WorkflowType,
        consumer_name: &str,
    ) -> Result<PullConsumer, async_nats::Error> {
        let stream = self.jetstream.get_stream(&self.stream_name).await?;

        let consumer = stream
            .get_or_create_consumer(
                consumer_name,
                jetstream::consumer::pull::Config {
                    durable_name: Some(consumer_name.to_string()),
                    ack_policy: jetstream::consumer::AckPolicy::Explicit,
                    max_deliver: -1,
                    filter_subject: subject_for(workflow),
                    ..Default::default()
                },
            )
            .await?;

        tracing::info!(
            "Consumer '{}' bound to subject '{}'",
            consumer_name,
            subject_for(workflow)
        );

        Ok(consumer)
    }

    /// Park a payload that exhausted its deliveries
    pub async fn publish_dead_letter(&self, letter: &DeadLetter) -> Result<(), async_nats::Error> {
        let subject = dead_letter_subject(letter.workflow);
        let payload = serde_json::to_vec(letter)?;

        let ack = self.jetstream.publish(subject.clone(), payload.into()).await?;
        ack.await?;

        tracing::info!("Dead letter {} published to {}", letter.message_id, subject);

        Ok(())
    }

    /// Get JetStream context for relaying and advanced operations
    pub fn jetstream(&self) -> &jetstream::Context {
        &self.jetstream
    }

    /// Check if the NATS connection is active
    pub fn is_connected(&self) -> bool {
        self.client.connection_state() == async_nats::connection::State::Connected
    }
}
