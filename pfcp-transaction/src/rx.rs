//! Inbound transactions.
//!
//! An [`RxTransaction`] is created the first time a request is seen and lives
//! for [`Config::rx_lifetime`], however many duplicates arrive in between.
//! Once the upper layer supplies a response it is cached, so a duplicate of
//! the request gets the same bytes back instead of being processed again.

use std::net::SocketAddr;

use crate::config::Config;
use crate::dispatcher::EventSender;
use crate::error::Result;
use crate::id::{Kind, TransactionId};
use crate::message::Message;
use crate::socket::Transmit;
use crate::state::RxState;
use crate::timer::TimerHandle;

pub struct RxTransaction {
    id: TransactionId,
    peer: SocketAddr,
    sequence: u32,
    response: Option<Message>,
    buf: Vec<u8>,
    timer: TimerHandle,
    state: RxState,
}

impl RxTransaction {
    /// Open a transaction for a first-seen request and arm its lifetime timer.
    pub fn new(peer: SocketAddr, sequence: u32, config: &Config, events: EventSender) -> Self {
        let id = TransactionId::new(peer, sequence);
        let mut timer = TimerHandle::new(Kind::Rx, id, events);
        timer.arm(config.rx_lifetime());
        Self {
            id,
            peer,
            sequence,
            response: None,
            buf: Vec::new(),
            timer,
            state: RxState::AwaitingResponse,
        }
    }

    pub fn id(&self) -> TransactionId {
        self.id
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn response(&self) -> Option<&Message> {
        self.response.as_ref()
    }

    /// Serialise `response` (echoing the request's sequence number), send it,
    /// and cache it for replay.
    ///
    /// Nothing is cached unless the transmission succeeded.
    pub fn send(&mut self, mut response: Message, transport: &dyn Transmit) -> Result<()> {
        response.sequence = self.sequence;
        let buf = response.marshal()?;
        transport.send_to(&buf, self.peer)?;

        log::info!("[RxTr {}] send rsp [{}]", self.id, response.type_name());
        self.response = Some(response);
        self.buf = buf;
        self.state = RxState::Cached;
        Ok(())
    }

    /// A request with this transaction's identifier arrived again.
    ///
    /// Replays the cached response, if any.  Returns `Ok(true)` when
    /// something was retransmitted, `Ok(false)` when the duplicate was
    /// dropped.  Either way the request must not be processed again.
    pub fn on_duplicate(&self, request: &Message, transport: &dyn Transmit) -> Result<bool> {
        let Some(response) = &self.response else {
            log::warn!(
                "[RxTr {}] recv req [{}]: no rsp to retransmit",
                self.id,
                request.type_name()
            );
            return Ok(false);
        };

        log::info!(
            "[RxTr {}] recv req [{}], retransmit rsp [{}]",
            self.id,
            request.type_name(),
            response.type_name()
        );
        transport.send_to(&self.buf, self.peer)?;
        Ok(true)
    }

    /// The lifetime timer fired.  The caller has already removed the
    /// transaction from its table.
    pub fn on_timeout(mut self) {
        self.state = RxState::Expired;
        log::info!("[RxTr {}] timeout, delete rxtr ({})", self.id, self.state);
    }
}
