/// Acknowledgement decisions for processed deliveries
///
/// Success acks. Failures that can never succeed are terminated. Anything
/// else is redelivered until the delivery limit, then parked on the
/// dead-letter subject; the original is acked only once the dead letter is
/// stored.

use std::time::Duration;

use async_nats::jetstream::AckKind;

use crate::pipeline::PipelineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Ack,
    /// Drop without redelivery
    Term,
    /// Redeliver, optionally after a delay
    Retry(Option<Duration>),
    /// Publish a dead letter, then settle with [`Disposition::after_dead_letter`]
    DeadLetter,
}

impl Disposition {
    /// Fate of a delivery the pipeline rejected on its `delivered`-th attempt.
    pub fn for_failure(error: &PipelineError, delivered: i64, max_deliver: i64) -> Self {
        if error.is_permanent() {
            Disposition::Term
        } else if delivered < max_deliver {
            Disposition::Retry(None)
        } else {
            Disposition::DeadLetter
        }
    }

    /// Settle a delivery after its dead-letter publish was attempted.
    pub fn after_dead_letter(published: bool, retry_delay: Duration) -> Self {
        if published {
            Disposition::Ack
        } else {
            Disposition::Retry(Some(retry_delay))
        }
    }

    /// JetStream acknowledgement, `None` while a dead letter is still pending.
    pub fn ack_kind(self) -> Option<AckKind> {
        match self {
            Disposition::Ack => Some(AckKind::Ack),
            Disposition::Term => Some(AckKind::Term),
            Disposition::Retry(delay) => Some(AckKind::Nak(delay)),
            Disposition::DeadLetter => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::ParseError;
    use crate::store::{LookupError, LookupTable, PersistenceError};

    fn unknown_site() -> PipelineError {
        PipelineError::Lookup(LookupError::NotFound {
            table: LookupTable::Site,
            code: "UNKNOWN".to_string(),
            context: "GRAPH run properties".to_string(),
        })
    }

    #[test]
    fn test_permanent_failures_are_terminated() {
        let parse = PipelineError::Parse(ParseError::new("not json"));
        let identity = PipelineError::Persistence(PersistenceError::MissingIdentity("uid"));

        assert_eq!(Disposition::for_failure(&parse, 1, 3), Disposition::Term);
        assert_eq!(Disposition::for_failure(&identity, 3, 3), Disposition::Term);
    }

    #[test]
    fn test_transient_failures_retry_until_limit() {
        assert_eq!(Disposition::for_failure(&unknown_site(), 1, 3), Disposition::Retry(None));
        assert_eq!(Disposition::for_failure(&unknown_site(), 2, 3), Disposition::Retry(None));
        assert_eq!(Disposition::for_failure(&unknown_site(), 3, 3), Disposition::DeadLetter);
        assert_eq!(Disposition::for_failure(&unknown_site(), 7, 3), Disposition::DeadLetter);
    }

    #[test]
    fn test_unstored_dead_letter_keeps_the_message() {
        let delay = Duration::from_secs(5);

        assert_eq!(Disposition::after_dead_letter(true, delay), Disposition::Ack);
        assert_eq!(
            Disposition::after_dead_letter(false, delay),
            Disposition::Retry(Some(delay))
        );
        assert!(matches!(
            Disposition::after_dead_letter(false, delay).ack_kind(),
            Some(AckKind::Nak(Some(d))) if d == delay
        ));
    }

    #[test]
    fn test_pending_dead_letter_has_no_ack() {
        assert!(Disposition::DeadLetter.ack_kind().is_none());
        assert!(matches!(Disposition::Term.ack_kind(), Some(AckKind::Term)));
    }
}
