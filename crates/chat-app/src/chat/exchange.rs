use std::fmt;

use chatline_storage::MessageId;

/// Identifier for one exchange.
///
/// A new id is minted for every send/edit/resend/regenerate so late chunks from
/// an earlier exchange can be told apart and dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExchangeId(pub u64);

impl ExchangeId {
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ExchangeId {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(formatter, "exchange-{}", self.0)
    }
}

/// Lifecycle of the controller's exchange slot.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ExchangeState {
    #[default]
    Idle,
    Sending(ExchangeId),
    Streaming(ExchangeId),
    Completed(ExchangeId),
    Aborted(ExchangeId),
    Errored {
        exchange_id: ExchangeId,
        message: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeTransition {
    Start(ExchangeId),
    BeginStreaming(ExchangeId),
    Complete(ExchangeId),
    Fail {
        exchange_id: ExchangeId,
        message: String,
    },
    Abort(ExchangeId),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeTransitionRejection {
    AlreadyInFlight {
        active: ExchangeId,
        attempted: ExchangeId,
    },
    NoActiveExchange,
    ExchangeMismatch {
        active: ExchangeId,
        attempted: ExchangeId,
    },
    NotSending(ExchangeId),
}

pub type ExchangeTransitionResult = Result<ExchangeState, ExchangeTransitionRejection>;

impl ExchangeState {
    /// Exchange currently holding the single-flight slot.
    pub fn active_exchange(&self) -> Option<ExchangeId> {
        match self {
            Self::Sending(exchange_id) | Self::Streaming(exchange_id) => Some(*exchange_id),
            Self::Idle | Self::Completed(_) | Self::Aborted(_) | Self::Errored { .. } => None,
        }
    }

    pub fn is_in_flight(&self) -> bool {
        self.active_exchange().is_some()
    }

    pub fn is_active(&self, exchange_id: ExchangeId) -> bool {
        self.active_exchange() == Some(exchange_id)
    }

    /// Applies one transition without mutating `self`.
    ///
    /// Only a settled slot may start a new exchange, and every later transition
    /// must name the active exchange.
    pub fn apply(&self, transition: ExchangeTransition) -> ExchangeTransitionResult {
        match transition {
            ExchangeTransition::Start(exchange_id) => self.apply_start(exchange_id),
            ExchangeTransition::BeginStreaming(exchange_id) => {
                self.apply_begin_streaming(exchange_id)
            }
            ExchangeTransition::Complete(exchange_id) => {
                self.settle(exchange_id, Self::Completed(exchange_id))
            }
            ExchangeTransition::Fail {
                exchange_id,
                message,
            } => self.settle(
                exchange_id,
                Self::Errored {
                    exchange_id,
                    message,
                },
            ),
            ExchangeTransition::Abort(exchange_id) => {
                self.settle(exchange_id, Self::Aborted(exchange_id))
            }
        }
    }

    fn apply_start(&self, exchange_id: ExchangeId) -> ExchangeTransitionResult {
        match self.active_exchange() {
            Some(active) => Err(ExchangeTransitionRejection::AlreadyInFlight {
                active,
                attempted: exchange_id,
            }),
            None => Ok(Self::Sending(exchange_id)),
        }
    }

    fn apply_begin_streaming(&self, exchange_id: ExchangeId) -> ExchangeTransitionResult {
        match self {
            Self::Sending(active) if *active == exchange_id => Ok(Self::Streaming(exchange_id)),
            Self::Sending(active) => Err(ExchangeTransitionRejection::ExchangeMismatch {
                active: *active,
                attempted: exchange_id,
            }),
            Self::Streaming(_) => Err(ExchangeTransitionRejection::NotSending(exchange_id)),
            Self::Idle | Self::Completed(_) | Self::Aborted(_) | Self::Errored { .. } => {
                Err(ExchangeTransitionRejection::NoActiveExchange)
            }
        }
    }

    fn settle(&self, exchange_id: ExchangeId, next: Self) -> ExchangeTransitionResult {
        match self.active_exchange() {
            Some(active) if active == exchange_id => Ok(next),
            Some(active) => Err(ExchangeTransitionRejection::ExchangeMismatch {
                active,
                attempted: exchange_id,
            }),
            None => Err(ExchangeTransitionRejection::NoActiveExchange),
        }
    }
}

/// Why a user intent did not start an exchange.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    ExchangeInFlight,
    NoCurrentSession,
    MessageNotFound(MessageId),
    NotUserMessage(MessageId),
    NotAssistantMessage(MessageId),
    NoPrecedingUserMessage(MessageId),
}

/// Terminal result of one user intent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExchangeOutcome {
    Completed,
    Aborted,
    Errored(String),
    Rejected(RejectReason),
}

impl ExchangeOutcome {
    pub fn is_rejected(&self) -> bool {
        matches!(self, Self::Rejected(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FIRST: ExchangeId = ExchangeId::new(1);
    const SECOND: ExchangeId = ExchangeId::new(2);

    #[test]
    fn happy_path_walks_every_state() {
        let state = ExchangeState::Idle;
        let state = state.apply(ExchangeTransition::Start(FIRST)).expect("start");
        assert_eq!(state, ExchangeState::Sending(FIRST));

        let state = state
            .apply(ExchangeTransition::BeginStreaming(FIRST))
            .expect("begin streaming");
        assert_eq!(state, ExchangeState::Streaming(FIRST));

        let state = state
            .apply(ExchangeTransition::Complete(FIRST))
            .expect("complete");
        assert_eq!(state, ExchangeState::Completed(FIRST));
        assert!(!state.is_in_flight());
    }

    #[test]
    fn second_start_is_rejected_while_in_flight() {
        let sending = ExchangeState::Sending(FIRST);
        assert_eq!(
            sending.apply(ExchangeTransition::Start(SECOND)),
            Err(ExchangeTransitionRejection::AlreadyInFlight {
                active: FIRST,
                attempted: SECOND,
            })
        );

        let streaming = ExchangeState::Streaming(FIRST);
        assert!(streaming.apply(ExchangeTransition::Start(SECOND)).is_err());
    }

    #[test]
    fn settled_states_accept_a_new_start() {
        for settled in [
            ExchangeState::Idle,
            ExchangeState::Completed(FIRST),
            ExchangeState::Aborted(FIRST),
            ExchangeState::Errored {
                exchange_id: FIRST,
                message: "boom".to_string(),
            },
        ] {
            assert_eq!(
                settled.apply(ExchangeTransition::Start(SECOND)),
                Ok(ExchangeState::Sending(SECOND))
            );
        }
    }

    #[test]
    fn stale_exchange_cannot_settle_the_active_one() {
        let streaming = ExchangeState::Streaming(SECOND);
        assert_eq!(
            streaming.apply(ExchangeTransition::Abort(FIRST)),
            Err(ExchangeTransitionRejection::ExchangeMismatch {
                active: SECOND,
                attempted: FIRST,
            })
        );
        assert_eq!(
            ExchangeState::Completed(FIRST).apply(ExchangeTransition::Complete(FIRST)),
            Err(ExchangeTransitionRejection::NoActiveExchange)
        );
    }

    #[test]
    fn sending_can_fail_or_abort_without_streaming() {
        let sending = ExchangeState::Sending(FIRST);
        assert_eq!(
            sending.apply(ExchangeTransition::Fail {
                exchange_id: FIRST,
                message: "HTTP error! status: 500".to_string(),
            }),
            Ok(ExchangeState::Errored {
                exchange_id: FIRST,
                message: "HTTP error! status: 500".to_string(),
            })
        );
        assert_eq!(
            sending.apply(ExchangeTransition::Abort(FIRST)),
            Ok(ExchangeState::Aborted(FIRST))
        );
    }

    #[test]
    fn begin_streaming_only_from_sending() {
        assert_eq!(
            ExchangeState::Streaming(FIRST).apply(ExchangeTransition::BeginStreaming(FIRST)),
            Err(ExchangeTransitionRejection::NotSending(FIRST))
        );
        assert_eq!(
            ExchangeState::Idle.apply(ExchangeTransition::BeginStreaming(FIRST)),
            Err(ExchangeTransitionRejection::NoActiveExchange)
        );
    }
}
