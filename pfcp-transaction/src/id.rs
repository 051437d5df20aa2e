//! Transaction identity.
//!
//! A transaction is identified by the peer it talks to and the sequence
//! number of its request.  Outbound sequence numbers come from this
//! endpoint's [`SequenceNumbers`]; inbound ones are taken verbatim from the
//! peer's request.

use std::fmt;
use std::net::SocketAddr;

use crate::message::MAX_SEQUENCE;

/// Key of both transaction tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransactionId {
    peer: SocketAddr,
    sequence: u32,
}

impl TransactionId {
    pub fn new(peer: SocketAddr, sequence: u32) -> Self {
        Self { peer, sequence }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{:#x}", self.peer, self.sequence)
    }
}

/// Which table a timer event refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kind {
    /// Outbound: this endpoint sent the request.
    Tx,
    /// Inbound: this endpoint received the request.
    Rx,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tx => f.write_str("Tx"),
            Self::Rx => f.write_str("Rx"),
        }
    }
}

/// Monotonic 24-bit sequence number source for outbound requests.
///
/// Starts at 1 and wraps from [`MAX_SEQUENCE`] back to 1; 0 is never issued.
#[derive(Debug, Clone)]
pub struct SequenceNumbers {
    next: u32,
}

impl Default for SequenceNumbers {
    fn default() -> Self {
        Self::new()
    }
}

impl SequenceNumbers {
    pub fn new() -> Self {
        Self { next: 1 }
    }

    /// Start at `first` (clamped into the valid range).
    pub fn starting_at(first: u32) -> Self {
        let next = if first == 0 || first > MAX_SEQUENCE { 1 } else { first };
        Self { next }
    }

    pub fn next(&mut self) -> u32 {
        let seq = self.next;
        self.next = if seq >= MAX_SEQUENCE { 1 } else { seq + 1 };
        seq
    }
}
