//! Outbound transactions.
//!
//! A [`TxTransaction`] exists from the moment its request was successfully
//! transmitted until either the matching response arrives or the retry
//! ceiling is reached.  The serialised request is kept so every
//! retransmission sends exactly the same bytes.

use std::net::SocketAddr;
use std::time::Duration;

use crate::config::Config;
use crate::dispatcher::EventSender;
use crate::error::Result;
use crate::id::{Kind, TransactionId};
use crate::message::Message;
use crate::socket::Transmit;
use crate::state::TxState;
use crate::timer::TimerHandle;

/// What a retransmission timeout did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxTimeout {
    /// The request was sent again (carries the retransmission number, from 1).
    Retransmitted(u8),
    /// The retry ceiling was reached; the transaction must be removed and
    /// escalated.
    Exhausted,
}

pub struct TxTransaction {
    id: TransactionId,
    peer: SocketAddr,
    retrans_timeout: Duration,
    max_retrans: u8,
    retrans_count: u8,
    request: Message,
    buf: Vec<u8>,
    timer: TimerHandle,
    state: TxState,
}

impl TxTransaction {
    /// Stamp `sequence` into `request`, serialise it, transmit it to `peer`
    /// and arm the retransmission timer.
    ///
    /// On an encoding or transmit error nothing is left armed and no
    /// transaction exists.
    pub fn send(
        mut request: Message,
        peer: SocketAddr,
        sequence: u32,
        config: &Config,
        transport: &dyn Transmit,
        events: EventSender,
    ) -> Result<Self> {
        let id = TransactionId::new(peer, sequence);
        request.sequence = sequence;
        let buf = request.marshal()?;

        transport.send_to(&buf, peer)?;

        let mut timer = TimerHandle::new(Kind::Tx, id, events);
        timer.arm(config.retrans_timeout);
        log::info!("[TxTr {}] send req [{}]", id, request.type_name());

        Ok(Self {
            id,
            peer,
            retrans_timeout: config.retrans_timeout,
            max_retrans: config.max_retrans,
            retrans_count: 0,
            request,
            buf,
            timer,
            state: TxState::Pending,
        })
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    pub fn state(&self) -> TxState {
        self.state
    }

    pub fn retrans_count(&self) -> u8 {
        self.retrans_count
    }

    pub fn request(&self) -> &Message {
        &self.request
    }

    /// The matching response arrived.  Stops the timer and hands back the
    /// original request.  The caller has already removed the transaction
    /// from its table.
    pub fn on_response(mut self, response: &Message) -> Message {
        self.timer.cancel();
        self.state = TxState::Completed;
        log::info!(
            "[TxTr {}] recv rsp [{}], delete txtr ({})",
            self.id,
            response.type_name(),
            self.state
        );
        self.into_request()
    }

    /// The retransmission timer fired.
    ///
    /// A failed retransmission is only logged; the next timer tick tries
    /// again.
    pub fn on_timeout(&mut self, transport: &dyn Transmit) -> TxTimeout {
        if self.retrans_count >= self.max_retrans {
            self.state = TxState::Failed;
            log::info!(
                "[TxTr {}] max retransmission reached - delete txtr ({})",
                self.id,
                self.state
            );
            return TxTimeout::Exhausted;
        }

        self.retrans_count += 1;
        log::info!(
            "[TxTr {}] timeout, retransmit req [{}] (#{})",
            self.id,
            self.request.type_name(),
            self.retrans_count
        );
        if let Err(e) = transport.send_to(&self.buf, self.peer) {
            log::error!(
                "[TxTr {}] retransmit (#{}) error: {}",
                self.id,
                self.retrans_count,
                e
            );
        }
        self.timer.arm(self.retrans_timeout);
        TxTimeout::Retransmitted(self.retrans_count)
    }

    /// Dropping the remaining fields cancels the timer.
    pub fn into_request(self) -> Message {
        self.request
    }
}
