/// Dead-letter envelope for NATS JetStream
///
/// Wraps a payload that exhausted its deliveries with the reason it failed

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};

use crate::params::WorkflowType;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Unique id for tracking the dead letter
    pub message_id: Uuid,

    /// Workflow whose queue the payload came from
    pub workflow: WorkflowType,

    /// Original payload, lossily decoded as UTF-8
    pub body: String,

    /// Diagnostic of the last failure
    pub error: String,

    /// Number of deliveries attempted
    pub delivered: i64,

    pub failed_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn new(workflow: WorkflowType, payload: &[u8], error: impl Into<String>, delivered: i64) -> Self {
        Self {
            message_id: Uuid::new_v4(),
            workflow,
            body: String::from_utf8_lossy(payload).into_owned(),
            error: error.into(),
            delivered,
            failed_at: Utc::now(),
        }
    }
}
