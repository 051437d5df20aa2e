//! Transaction state machine states.
//!
//! ```text
//!  Tx:  Pending ──timeout, retries < max──▶ Pending   (retransmit)
//!       Pending ──response──────────────▶ Completed   (removed)
//!       Pending ──timeout, retries = max─▶ Failed      (removed, escalated)
//!
//!  Rx:  AwaitingResponse ──response supplied──▶ Cached
//!       AwaitingResponse | Cached ──lifetime timer──▶ Expired (removed)
//! ```
//!
//! Both Rx states accept duplicate requests; only `Cached` answers them.

use std::fmt;

/// Outbound transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxState {
    /// Request sent, no response yet.
    #[default]
    Pending,
    /// Matching response received.
    Completed,
    /// Retries exhausted.
    Failed,
}

impl TxState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Inbound transaction state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RxState {
    /// Request handed to the upper layer; no response yet.
    #[default]
    AwaitingResponse,
    /// Response sent and kept for replay.
    Cached,
    /// Lifetime elapsed.
    Expired,
}

impl RxState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Expired)
    }
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

impl fmt::Display for RxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn initial_states() {
        assert_eq!(TxState::default(), TxState::Pending);
        assert_eq!(RxState::default(), RxState::AwaitingResponse);
    }

    #[test]
    fn terminal_states() {
        assert!(!TxState::Pending.is_terminal());
        assert!(TxState::Completed.is_terminal());
        assert!(TxState::Failed.is_terminal());
        assert!(!RxState::AwaitingResponse.is_terminal());
        assert!(!RxState::Cached.is_terminal());
        assert!(RxState::Expired.is_terminal());
    }

    #[test]
    fn display_uses_state_name() {
        assert_eq!(TxState::Failed.to_string(), "Failed");
        assert_eq!(RxState::Cached.to_string(), "Cached");
    }
}
