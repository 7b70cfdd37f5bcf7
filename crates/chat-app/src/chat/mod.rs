mod controller;
mod error;
mod exchange;

pub use controller::{ChatController, STREAM_ENDED_EARLY};
pub use error::{ChatError, ChatResult};
pub(crate) use error::{SettingsSnafu, TransportSnafu};
pub use exchange::{
    ExchangeId, ExchangeOutcome, ExchangeState, ExchangeTransition, ExchangeTransitionRejection,
    RejectReason,
};

#[cfg(test)]
pub(crate) mod testing;
