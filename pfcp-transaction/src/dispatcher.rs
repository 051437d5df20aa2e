//! The serialized dispatch loop.
//!
//! # Architecture
//!
//! ```text
//!   receive task ──Datagram──┐
//!   timer tasks ───Timeout───┼──▶ unbounded mpsc ──▶ Dispatcher::run ──▶ Registry
//!   Endpoint ──SendRequest───┘        (many producers, one consumer)
//!            ──SupplyResponse
//! ```
//!
//! Every read and write of the transaction tables happens inside
//! [`Dispatcher::run`], one event at a time.  Events belonging to one
//! transaction are therefore applied in the order they were queued; events
//! of unrelated transactions carry no ordering guarantee.
//!
//! The upper layer talks to the loop through the cloneable [`Endpoint`]
//! handle and learns about new requests and completed exchanges from the
//! [`Indication`] channel.  The registry and its timers only hold weak
//! senders, so the loop also stops once the last [`Endpoint`] is dropped.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use crate::config::Config;
use crate::error::{Error, Result};
use crate::id::{Kind, TransactionId};
use crate::message::Message;
use crate::registry::{Escalation, Registry, TimeoutOutcome};
use crate::socket::Transmit;

/// Sender held by the registry and its timers.  It does not keep the queue
/// open; only [`Endpoint`]s do.
pub type EventSender = mpsc::WeakUnboundedSender<Event>;

/// One unit of work for the dispatch loop.
#[derive(Debug)]
pub enum Event {
    /// A datagram arrived from `peer`.
    Datagram { buf: Vec<u8>, peer: SocketAddr },
    /// A transaction timer fired.
    Timeout { kind: Kind, id: TransactionId },
    SendRequest {
        request: Message,
        peer: SocketAddr,
        reply: oneshot::Sender<Result<TransactionId>>,
    },
    SupplyResponse {
        id: TransactionId,
        response: Message,
        reply: oneshot::Sender<Result<()>>,
    },
    Counts {
        reply: oneshot::Sender<(usize, usize)>,
    },
    Shutdown,
}

/// Notifications for the upper layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Indication {
    /// A first-seen request.  Answer it with [`Endpoint::supply_response`].
    Request {
        id: TransactionId,
        message: Message,
        peer: SocketAddr,
    },
    /// An outbound request was answered.
    Response {
        request: Message,
        response: Message,
        peer: SocketAddr,
    },
}

/// Cloneable handle to a running dispatch loop.
#[derive(Debug, Clone)]
pub struct Endpoint {
    events: mpsc::UnboundedSender<Event>,
}

impl Endpoint {
    /// Spawn a dispatch loop and return its handle and indication stream.
    pub fn spawn(
        config: Config,
        transport: Arc<dyn Transmit>,
        escalation: impl Escalation,
    ) -> (Self, mpsc::UnboundedReceiver<Indication>) {
        let (dispatcher, endpoint, indications) = Dispatcher::new(config, transport, escalation);
        tokio::spawn(dispatcher.run());
        (endpoint, indications)
    }

    /// Begin an outbound transaction.  Encoding and initial transmit failures
    /// are returned here; later failures go to the escalation callback.
    pub async fn send_request(&self, request: Message, peer: SocketAddr) -> Result<TransactionId> {
        let (reply, rx) = oneshot::channel();
        self.post(Event::SendRequest {
            request,
            peer,
            reply,
        })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Answer the inbound request identified by `id`.
    pub async fn supply_response(&self, id: TransactionId, response: Message) -> Result<()> {
        let (reply, rx) = oneshot::channel();
        self.post(Event::SupplyResponse {
            id,
            response,
            reply,
        })?;
        rx.await.map_err(|_| Error::Closed)?
    }

    /// Queue a received datagram.  Never waits.
    pub fn deliver(&self, buf: Vec<u8>, peer: SocketAddr) -> Result<()> {
        self.post(Event::Datagram { buf, peer })
    }

    /// Number of live `(outbound, inbound)` transactions.
    pub async fn transaction_counts(&self) -> Result<(usize, usize)> {
        let (reply, rx) = oneshot::channel();
        self.post(Event::Counts { reply })?;
        rx.await.map_err(|_| Error::Closed)
    }

    /// Stop the loop after the events already queued.  Pending timers are
    /// cancelled with the registry.  Dropping every clone of the handle has
    /// the same effect.
    pub fn shutdown(&self) {
        let _ = self.post(Event::Shutdown);
    }

    pub fn is_closed(&self) -> bool {
        self.events.is_closed()
    }

    fn post(&self, event: Event) -> Result<()> {
        self.events.send(event).map_err(|_| Error::Closed)
    }
}

/// Sole owner of the [`Registry`].
pub struct Dispatcher {
    registry: Registry,
    events: mpsc::UnboundedReceiver<Event>,
    indications: mpsc::UnboundedSender<Indication>,
}

impl Dispatcher {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transmit>,
        escalation: impl Escalation,
    ) -> (Self, Endpoint, mpsc::UnboundedReceiver<Indication>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (ind_tx, ind_rx) = mpsc::unbounded_channel();
        let registry = Registry::new(config, transport, event_tx.downgrade(), Box::new(escalation));
        let dispatcher = Self {
            registry,
            events: event_rx,
            indications: ind_tx,
        };
        (dispatcher, Endpoint { events: event_tx }, ind_rx)
    }

    /// Drain events until [`Endpoint::shutdown`] or until every [`Endpoint`]
    /// is gone.
    pub async fn run(mut self) {
        while let Some(event) = self.events.recv().await {
            if let Event::Shutdown = event {
                break;
            }
            self.handle(event);
        }
        let (tx, rx) = self.registry.counts();
        log::info!("dispatch loop stopped ({} txtr, {} rxtr dropped)", tx, rx);
    }

    /// Apply a single event.
    pub fn handle(&mut self, event: Event) {
        match event {
            Event::Datagram { buf, peer } => self.handle_datagram(&buf, peer),
            Event::Timeout { kind, id } => {
                self.handle_timeout(kind, id);
            }
            Event::SendRequest {
                request,
                peer,
                reply,
            } => {
                let result = self.registry.send_request(request, peer);
                let _ = reply.send(result);
            }
            Event::SupplyResponse {
                id,
                response,
                reply,
            } => {
                let result = self.registry.supply_response(id, response);
                if let Err(e) = &result {
                    log::error!("[RxTr {}] send rsp: {}", id, e);
                }
                let _ = reply.send(result);
            }
            Event::Counts { reply } => {
                let _ = reply.send(self.registry.counts());
            }
            Event::Shutdown => {}
        }
    }

    pub fn handle_timeout(&mut self, kind: Kind, id: TransactionId) -> TimeoutOutcome {
        self.registry.on_timeout(kind, id)
    }

    fn handle_datagram(&mut self, buf: &[u8], peer: SocketAddr) {
        let message = match Message::unmarshal(buf) {
            Ok(m) => m,
            Err(e) => {
                log::warn!("[dispatch] drop {} octets from {}: {}", buf.len(), peer, e);
                return;
            }
        };

        if message.is_request() {
            let (id, must_process) = self.registry.on_request_arrived(&message, peer);
            if must_process {
                self.indicate(Indication::Request { id, message, peer });
            }
            return;
        }

        match self.registry.on_response_arrived(&message, peer) {
            Ok(request) => self.indicate(Indication::Response {
                request,
                response: message,
                peer,
            }),
            Err(e) => log::warn!("[dispatch] {} [{}], dropped", e, message.type_name()),
        }
    }

    fn indicate(&self, indication: Indication) {
        if self.indications.send(indication).is_err() {
            log::debug!("[dispatch] no upper layer listening, indication dropped");
        }
    }
}
