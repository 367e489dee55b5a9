/// Best-effort republishing of normalized run properties
///
/// Relaying never influences the outcome of the message that triggered it:
/// failures are logged and reported as `false`.

use std::fmt;
use std::future::Future;

use async_nats::jetstream;

use crate::params::CanonicalParameterSet;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayError(pub String);

impl fmt::Display for RelayError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Relay error: {}", self.0)
    }
}

impl std::error::Error for RelayError {}

/// Anything a payload can be published to.
pub trait RelaySink: Send + Sync {
    fn send(&self, target: String, payload: Vec<u8>) -> impl Future<Output = Result<(), RelayError>> + Send;
}

impl RelaySink for jetstream::Context {
    fn send(&self, target: String, payload: Vec<u8>) -> impl Future<Output = Result<(), RelayError>> + Send {
        async move {
            let ack = self
                .publish(target, payload.into())
                .await
                .map_err(|e| RelayError(e.to_string()))?;
            ack.await.map_err(|e| RelayError(e.to_string()))?;
            Ok(())
        }
    }
}

pub struct RelayPublisher<S> {
    sink: S,
}

impl<S: RelaySink> RelayPublisher<S> {
    pub fn new(sink: S) -> Self {
        Self { sink }
    }

    /// Publish `payload` to `target`; true when the sink acknowledged it.
    pub async fn relay(&self, target: &str, payload: &[u8]) -> bool {
        match self.sink.send(target.to_string(), payload.to_vec()).await {
            Ok(()) => {
                tracing::debug!(target, bytes = payload.len(), "Relayed message");
                true
            }
            Err(e) => {
                tracing::warn!(target, "Failed to relay message: {}", e);
                false
            }
        }
    }

    /// Relay a parameter set as a JSON object.
    pub async fn relay_params(&self, target: &str, params: &CanonicalParameterSet) -> bool {
        match serde_json::to_vec(params) {
            Ok(payload) => self.relay(target, &payload).await,
            Err(e) => {
                tracing::warn!(target, "Failed to encode relay payload: {}", e);
                false
            }
        }
    }
}
