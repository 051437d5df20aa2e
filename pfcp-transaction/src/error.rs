//! Errors reported by the transaction layer.
//!
//! Encoding and transmit failures are returned synchronously to whoever asked
//! for the send.  Timer-driven failures have no caller: retransmit errors are
//! logged, and an exhausted request is handed to the [`crate::Escalation`]
//! callback together with [`Error::RetriesExhausted`].

use std::io;

use thiserror::Error;

use crate::id::TransactionId;
use crate::message::MessageError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The codec could not serialise the message.
    #[error("encoding failure: {0}")]
    Encoding(#[from] MessageError),

    /// The datagram could not be handed to the network.
    #[error("transmit failure: {0}")]
    Transmit(#[from] io::Error),

    /// A response arrived with no live outbound transaction to complete.
    #[error("unmatched response {0}")]
    UnmatchedResponse(TransactionId),

    /// An outbound request was retransmitted the maximum number of times
    /// without an answer.
    #[error("retries exhausted for {0}")]
    RetriesExhausted(TransactionId),

    /// A response was supplied for an inbound transaction that does not exist
    /// (never seen, or already expired).
    #[error("no inbound transaction {0}")]
    NoSuchTransaction(TransactionId),

    /// The dispatch loop has stopped.
    #[error("dispatch loop closed")]
    Closed,
}

impl Error {
    pub fn is_transmit(&self) -> bool {
        matches!(self, Self::Transmit(_))
    }

    pub fn is_encoding(&self) -> bool {
        matches!(self, Self::Encoding(_))
    }
}
