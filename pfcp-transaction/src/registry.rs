//! The two transaction tables and every operation that touches them.
//!
//! A [`Registry`] is owned by exactly one dispatch loop
//! ([`crate::dispatcher`]); nothing else holds a reference to it, so the
//! tables need no locking.  All methods are synchronous and never block:
//! sends go through the non-blocking [`Transmit`] primitive and timers are
//! armed by spawning.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use crate::config::Config;
use crate::dispatcher::EventSender;
use crate::error::{Error, Result};
use crate::id::{Kind, SequenceNumbers, TransactionId};
use crate::message::Message;
use crate::rx::RxTransaction;
use crate::socket::Transmit;
use crate::tx::{TxTimeout, TxTransaction};

/// Upper-layer hook for outbound requests that were never answered.
///
/// Called once per failed transaction, after it has been removed.  An `Err`
/// is logged and has no further effect on the transaction layer.
pub trait Escalation: Send + 'static {
    fn escalate(&mut self, request: Message, peer: SocketAddr, cause: Error)
        -> anyhow::Result<()>;
}

impl<F> Escalation for F
where
    F: FnMut(Message, SocketAddr, Error) -> anyhow::Result<()> + Send + 'static,
{
    fn escalate(
        &mut self,
        request: Message,
        peer: SocketAddr,
        cause: Error,
    ) -> anyhow::Result<()> {
        self(request, peer, cause)
    }
}

/// What a timer event did once it reached the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutOutcome {
    /// An outbound request was sent again.
    Retransmitted,
    /// An outbound transaction ran out of retries and was escalated.
    Escalated,
    /// An inbound transaction reached the end of its lifetime.
    Expired,
    /// The transaction was already gone.
    Stale,
}

pub struct Registry {
    config: Config,
    transport: Arc<dyn Transmit>,
    events: EventSender,
    escalation: Box<dyn Escalation>,
    sequences: SequenceNumbers,
    tx: HashMap<TransactionId, TxTransaction>,
    rx: HashMap<TransactionId, RxTransaction>,
}

impl Registry {
    pub fn new(
        config: Config,
        transport: Arc<dyn Transmit>,
        events: EventSender,
        escalation: Box<dyn Escalation>,
    ) -> Self {
        Self {
            config,
            transport,
            events,
            escalation,
            sequences: SequenceNumbers::new(),
            tx: HashMap::new(),
            rx: HashMap::new(),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Number of live `(outbound, inbound)` transactions.
    pub fn counts(&self) -> (usize, usize) {
        (self.tx.len(), self.rx.len())
    }

    pub fn tx(&self, id: &TransactionId) -> Option<&TxTransaction> {
        self.tx.get(id)
    }

    pub fn rx(&self, id: &TransactionId) -> Option<&RxTransaction> {
        self.rx.get(id)
    }

    /// Start an outbound transaction for `request` to `peer`.
    ///
    /// The transaction is registered only if the initial transmission
    /// succeeded.
    pub fn send_request(&mut self, request: Message, peer: SocketAddr) -> Result<TransactionId> {
        let sequence = self.sequences.next();
        let tx = TxTransaction::send(
            request,
            peer,
            sequence,
            &self.config,
            &*self.transport,
            self.events.clone(),
        )
        .map_err(|e| {
            log::error!("[TxTr {}] send: {}", TransactionId::new(peer, sequence), e);
            e
        })?;
        let id = tx.id();
        self.tx.insert(id, tx);
        Ok(id)
    }

    /// Complete the outbound transaction matching `response`.
    ///
    /// Returns the original request, or [`Error::UnmatchedResponse`] when no
    /// live transaction matches (late or stray response).
    pub fn on_response_arrived(
        &mut self,
        response: &Message,
        peer: SocketAddr,
    ) -> Result<Message> {
        let id = TransactionId::new(peer, response.sequence);
        match self.tx.remove(&id) {
            Some(tx) => Ok(tx.on_response(response)),
            None => Err(Error::UnmatchedResponse(id)),
        }
    }

    /// Register or recognise an inbound request.
    ///
    /// Returns the transaction identifier and whether the upper layer must
    /// process the request (`false` for duplicates).
    pub fn on_request_arrived(
        &mut self,
        request: &Message,
        peer: SocketAddr,
    ) -> (TransactionId, bool) {
        let id = TransactionId::new(peer, request.sequence);
        if let Some(rx) = self.rx.get(&id) {
            if let Err(e) = rx.on_duplicate(request, &*self.transport) {
                log::error!("[RxTr {}] retransmit rsp: {}", id, e);
            }
            return (id, false);
        }

        log::info!("[RxTr {}] recv req [{}]", id, request.type_name());
        let rx = RxTransaction::new(peer, request.sequence, &self.config, self.events.clone());
        self.rx.insert(id, rx);
        (id, true)
    }

    /// Send and cache the upper layer's response for inbound transaction `id`.
    pub fn supply_response(&mut self, id: TransactionId, response: Message) -> Result<()> {
        let rx = self.rx.get_mut(&id).ok_or(Error::NoSuchTransaction(id))?;
        rx.send(response, &*self.transport)
    }

    /// Apply one timer firing.
    pub fn on_timeout(&mut self, kind: Kind, id: TransactionId) -> TimeoutOutcome {
        match kind {
            Kind::Tx => self.on_tx_timeout(id),
            Kind::Rx => match self.rx.remove(&id) {
                Some(rx) => {
                    rx.on_timeout();
                    TimeoutOutcome::Expired
                }
                None => stale(kind, id),
            },
        }
    }

    fn on_tx_timeout(&mut self, id: TransactionId) -> TimeoutOutcome {
        let Some(tx) = self.tx.get_mut(&id) else {
            return stale(Kind::Tx, id);
        };
        match tx.on_timeout(&*self.transport) {
            TxTimeout::Retransmitted(_) => TimeoutOutcome::Retransmitted,
            TxTimeout::Exhausted => {
                let Some(tx) = self.tx.remove(&id) else {
                    return stale(Kind::Tx, id);
                };
                let peer = tx.peer();
                let request = tx.into_request();
                if let Err(e) = self
                    .escalation
                    .escalate(request, peer, Error::RetriesExhausted(id))
                {
                    log::error!("[TxTr {}] escalation: {}", id, e);
                }
                TimeoutOutcome::Escalated
            }
        }
    }
}

fn stale(kind: Kind, id: TransactionId) -> TimeoutOutcome {
    log::debug!("[{}Tr {}] timeout for removed transaction, ignored", kind, id);
    TimeoutOutcome::Stale
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::Mutex;
    use std::time::Duration;

    use tokio::sync::mpsc;

    use crate::message::{MessageType, MAX_SEQUENCE};
    use crate::state::{RxState, TxState};

    #[derive(Default)]
    struct Recorder {
        sent: Mutex<Vec<(Vec<u8>, SocketAddr)>>,
        fail: Mutex<bool>,
    }

    impl Recorder {
        fn sent(&self) -> Vec<(Vec<u8>, SocketAddr)> {
            self.sent.lock().unwrap().clone()
        }

        fn set_failing(&self, fail: bool) {
            *self.fail.lock().unwrap() = fail;
        }
    }

    impl Transmit for Recorder {
        fn send_to(&self, buf: &[u8], peer: SocketAddr) -> io::Result<usize> {
            if *self.fail.lock().unwrap() {
                return Err(io::Error::new(io::ErrorKind::Other, "link down"));
            }
            self.sent.lock().unwrap().push((buf.to_vec(), peer));
            Ok(buf.len())
        }
    }

    type Escalated = Arc<Mutex<Vec<(Message, SocketAddr)>>>;

    fn peer() -> SocketAddr {
        "10.0.0.2:8805".parse().unwrap()
    }

    fn setup() -> (Registry, Arc<Recorder>, Escalated) {
        let (events, _rx) = mpsc::unbounded_channel();
        let recorder = Arc::new(Recorder::default());
        let escalated: Escalated = Arc::default();
        let sink = escalated.clone();
        let registry = Registry::new(
            Config::new(Duration::from_secs(1), 2),
            recorder.clone(),
            events.downgrade(),
            Box::new(
                move |req: Message, peer: SocketAddr, _cause: Error| -> anyhow::Result<()> {
                    sink.lock().unwrap().push((req, peer));
                    Ok(())
                },
            ),
        );
        (registry, recorder, escalated)
    }

    #[tokio::test]
    async fn send_request_registers_and_transmits() {
        let (mut reg, recorder, _) = setup();
        let id = reg.send_request(Message::heartbeat_request(1), peer()).unwrap();

        assert_eq!(id.sequence(), 1);
        assert_eq!(reg.counts(), (1, 0));
        let sent = recorder.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(Message::unmarshal(&sent[0].0).unwrap().sequence, 1);
    }

    #[tokio::test]
    async fn encoding_failure_registers_nothing() {
        let (mut reg, recorder, _) = setup();
        let oversized = Message::new(MessageType::NodeReportRequest, vec![0; u16::MAX as usize]);

        let err = reg.send_request(oversized, peer()).unwrap_err();
        assert!(err.is_encoding());
        assert_eq!(reg.counts(), (0, 0));
        assert!(recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn initial_transmit_failure_registers_nothing() {
        let (mut reg, recorder, _) = setup();
        recorder.set_failing(true);

        let err = reg.send_request(Message::heartbeat_request(1), peer()).unwrap_err();
        assert!(err.is_transmit());
        assert_eq!(reg.counts(), (0, 0));
    }

    #[tokio::test]
    async fn response_completes_transaction_once() {
        let (mut reg, _, _) = setup();
        let id = reg.send_request(Message::heartbeat_request(1), peer()).unwrap();
        let rsp = Message::heartbeat_response(id.sequence(), 9);

        let req = reg.on_response_arrived(&rsp, peer()).unwrap();
        assert_eq!(req.msg_type, MessageType::HeartbeatRequest);
        assert_eq!(reg.counts(), (0, 0));

        let again = reg.on_response_arrived(&rsp, peer());
        assert!(matches!(again, Err(Error::UnmatchedResponse(unmatched)) if unmatched == id));
    }

    #[tokio::test]
    async fn response_from_other_peer_is_unmatched() {
        let (mut reg, _, _) = setup();
        let id = reg.send_request(Message::heartbeat_request(1), peer()).unwrap();
        let rsp = Message::heartbeat_response(id.sequence(), 9);

        let other: SocketAddr = "10.0.0.3:8805".parse().unwrap();
        assert!(reg.on_response_arrived(&rsp, other).is_err());
        assert_eq!(reg.counts(), (1, 0));
    }

    #[tokio::test]
    async fn timeouts_retransmit_then_escalate_once() {
        let (mut reg, recorder, escalated) = setup();
        let id = reg.send_request(Message::heartbeat_request(1), peer()).unwrap();

        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Retransmitted);
        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Retransmitted);
        assert_eq!(reg.tx(&id).map(|tx| tx.state()), Some(TxState::Pending));
        assert_eq!(reg.tx(&id).map(|tx| tx.retrans_count()), Some(2));
        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Escalated);
        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Stale);

        let sent = recorder.sent();
        assert_eq!(sent.len(), 3, "initial + 2 retransmissions");
        assert!(sent.iter().all(|(bytes, _)| *bytes == sent[0].0));

        let escalated = escalated.lock().unwrap();
        assert_eq!(escalated.len(), 1);
        assert_eq!(escalated[0].1, peer());
        assert_eq!(escalated[0].0.sequence, id.sequence());
    }

    #[tokio::test]
    async fn retransmit_failure_keeps_transaction_alive() {
        let (mut reg, recorder, escalated) = setup();
        let id = reg.send_request(Message::heartbeat_request(1), peer()).unwrap();

        recorder.set_failing(true);
        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Retransmitted);
        assert_eq!(reg.tx(&id).map(|tx| tx.retrans_count()), Some(1));
        assert!(escalated.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn failing_escalation_is_not_retried() {
        let (events, _rx) = mpsc::unbounded_channel();
        let mut reg = Registry::new(
            Config::new(Duration::from_secs(1), 0),
            Arc::new(Recorder::default()),
            events.downgrade(),
            Box::new(|_: Message, _: SocketAddr, _: Error| -> anyhow::Result<()> {
                anyhow::bail!("upper layer gone")
            }),
        );
        let id = reg.send_request(Message::heartbeat_request(1), peer()).unwrap();

        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Escalated);
        assert_eq!(reg.on_timeout(Kind::Tx, id), TimeoutOutcome::Stale);
        assert_eq!(reg.counts(), (0, 0));
    }

    #[tokio::test]
    async fn first_request_is_processed_duplicates_are_not() {
        let (mut reg, recorder, _) = setup();
        let mut req = Message::heartbeat_request(1);
        req.sequence = 0x20;

        assert!(reg.on_request_arrived(&req, peer()).1);
        assert!(!reg.on_request_arrived(&req, peer()).1);
        assert!(recorder.sent().is_empty(), "no cached response, nothing replayed");
        assert_eq!(reg.counts(), (0, 1));
    }

    #[tokio::test]
    async fn duplicate_after_response_replays_cached_bytes() {
        let (mut reg, recorder, _) = setup();
        let mut req = Message::heartbeat_request(1);
        req.sequence = 0x20;

        let (id, _) = reg.on_request_arrived(&req, peer());
        reg.supply_response(id, Message::heartbeat_response(0, 7)).unwrap();
        assert_eq!(reg.rx(&id).map(|rx| rx.state()), Some(RxState::Cached));

        let (_, must_process) = reg.on_request_arrived(&req, peer());
        assert!(!must_process);

        let sent = recorder.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0], sent[1]);
        assert_eq!(Message::unmarshal(&sent[0].0).unwrap().sequence, 0x20);
    }

    #[tokio::test]
    async fn failed_response_is_not_cached() {
        let (mut reg, recorder, _) = setup();
        let mut req = Message::heartbeat_request(1);
        req.sequence = 0x21;
        let (id, _) = reg.on_request_arrived(&req, peer());

        recorder.set_failing(true);
        assert!(reg.supply_response(id, Message::heartbeat_response(0, 7)).is_err());
        assert_eq!(reg.rx(&id).map(|rx| rx.state()), Some(RxState::AwaitingResponse));

        recorder.set_failing(false);
        assert!(!reg.on_request_arrived(&req, peer()).1);
        assert!(recorder.sent().is_empty());
    }

    #[tokio::test]
    async fn oversized_response_is_encoding_failure() {
        let (mut reg, _, _) = setup();
        let mut req = Message::heartbeat_request(1);
        req.sequence = MAX_SEQUENCE;
        let (id, _) = reg.on_request_arrived(&req, peer());

        let oversized = Message::new(MessageType::HeartbeatResponse, vec![0; u16::MAX as usize]);
        assert!(reg.supply_response(id, oversized).unwrap_err().is_encoding());
        assert!(reg.rx(&id).and_then(|rx| rx.response()).is_none());
    }

    #[tokio::test]
    async fn supply_response_for_unknown_transaction() {
        let (mut reg, _, _) = setup();
        let id = TransactionId::new(peer(), 0x99);
        let err = reg.supply_response(id, Message::heartbeat_response(0, 1)).unwrap_err();
        assert!(matches!(err, Error::NoSuchTransaction(missing) if missing == id));
    }

    #[tokio::test]
    async fn rx_expiry_removes_once_and_frees_identifier() {
        let (mut reg, _, _) = setup();
        let mut req = Message::heartbeat_request(1);
        req.sequence = 0x20;
        let (id, _) = reg.on_request_arrived(&req, peer());

        assert_eq!(reg.on_timeout(Kind::Rx, id), TimeoutOutcome::Expired);
        assert_eq!(reg.on_timeout(Kind::Rx, id), TimeoutOutcome::Stale);
        assert!(reg.on_request_arrived(&req, peer()).1, "treated as a new request");
    }
}
