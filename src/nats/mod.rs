/// NATS JetStream integration module
///
/// Consumer setup for run-property subjects, acknowledgement decisions,
/// dead-letter envelopes and the best-effort relay publisher.

pub mod message_envelope;
pub mod client;
pub mod relay;
pub mod disposition;

pub use message_envelope::DeadLetter;
pub use client::{NatsClient, NatsConfig};
pub use relay::{RelayError, RelayPublisher, RelaySink};
pub use disposition::Disposition;
