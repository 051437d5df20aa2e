//! Transaction timing parameters.
//!
//! The same two values drive both transaction kinds: an outbound request is
//! retransmitted every `retrans_timeout` up to `max_retrans` times, and an
//! inbound transaction lives for the whole of that window
//! ([`Config::rx_lifetime`]) so it outlasts every retransmission the peer may
//! still send.

use std::time::Duration;

/// Default interval between retransmissions of an unanswered request.
pub const DEFAULT_RETRANS_TIMEOUT: Duration = Duration::from_secs(1);

/// Default number of retransmissions before a request is escalated.
pub const DEFAULT_MAX_RETRANS: u8 = 3;

/// Retransmission parameters shared by every transaction of an endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Fixed interval between retransmissions (no back-off).
    pub retrans_timeout: Duration,
    /// Retransmissions sent after the initial transmission.
    pub max_retrans: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            retrans_timeout: DEFAULT_RETRANS_TIMEOUT,
            max_retrans: DEFAULT_MAX_RETRANS,
        }
    }
}

impl Config {
    pub fn new(retrans_timeout: Duration, max_retrans: u8) -> Self {
        Self {
            retrans_timeout,
            max_retrans,
        }
    }

    /// How long an inbound transaction keeps suppressing duplicates.
    ///
    /// `retrans_timeout × (max_retrans + 1)`.  This assumes the peer
    /// retransmits with the same parameters as this endpoint; a peer with a
    /// longer retry window can outlive the suppression.
    pub fn rx_lifetime(&self) -> Duration {
        self.retrans_timeout * (u32::from(self.max_retrans) + 1)
    }
}
