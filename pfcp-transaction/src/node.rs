//! A minimal PFCP node: heartbeats on top of the transaction layer.
//!
//! The node answers every Heartbeat Request it receives, probes its configured
//! peers on a fixed interval, and tracks each peer's Recovery Time Stamp so a
//! peer restart shows up in the log.  A peer whose heartbeat ran out of
//! retransmissions is reported through the escalation hook and marked
//! unreachable.

use std::collections::HashMap;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use anyhow::Context;
use tokio::sync::mpsc;

use crate::config::Config;
use crate::dispatcher::{Endpoint, Indication};
use crate::error::Error;
use crate::id::TransactionId;
use crate::message::{ntp_seconds, Message, MessageType};
use crate::socket::{receive_loop, Socket};

pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone)]
pub struct NodeConfig {
    pub bind: SocketAddr,
    /// Peers to send heartbeats to.
    pub peers: Vec<SocketAddr>,
    pub heartbeat_interval: Duration,
    pub transaction: Config,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct PeerState {
    reachable: bool,
    recovery: Option<u32>,
}

pub struct Node {
    config: NodeConfig,
    socket: Arc<Socket>,
    endpoint: Endpoint,
    indications: mpsc::UnboundedReceiver<Indication>,
    unreachable: mpsc::UnboundedReceiver<SocketAddr>,
    recovery: u32,
    peers: HashMap<SocketAddr, PeerState>,
}

impl Node {
    /// Bind the UDP socket and start the dispatch loop.  Nothing is received
    /// until [`Node::run`].
    pub async fn bind(config: NodeConfig) -> anyhow::Result<Self> {
        let socket = Socket::bind(config.bind)
            .await
            .with_context(|| format!("bind {}", config.bind))?;
        let socket = Arc::new(socket);

        let (unreachable_tx, unreachable) = mpsc::unbounded_channel();
        let escalation = move |request: Message,
                               peer: SocketAddr,
                               cause: Error|
              -> anyhow::Result<()> {
            log::warn!("[node] {} to {} failed: {}", request.type_name(), peer, cause);
            unreachable_tx
                .send(peer)
                .map_err(|_| anyhow::anyhow!("node stopped"))
        };
        let (endpoint, indications) =
            Endpoint::spawn(config.transaction, socket.clone(), escalation);

        let peers = config
            .peers
            .iter()
            .map(|p| (*p, PeerState::default()))
            .collect();

        Ok(Self {
            config,
            socket,
            endpoint,
            indications,
            unreachable,
            recovery: ntp_seconds(SystemTime::now()),
            peers,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.socket.local_addr
    }

    /// This node's Recovery Time Stamp.
    pub fn recovery(&self) -> u32 {
        self.recovery
    }

    /// A handle to this node's transaction layer.
    pub fn endpoint(&self) -> Endpoint {
        self.endpoint.clone()
    }

    /// Serve until `shutdown` completes.
    pub async fn run(mut self, shutdown: impl Future<Output = ()>) -> anyhow::Result<()> {
        log::info!(
            "[node] listening on {} (recovery {}), {} peer(s)",
            self.socket.local_addr,
            self.recovery,
            self.peers.len()
        );
        let receiver = tokio::spawn(receive_loop(self.socket.clone(), self.endpoint.clone()));

        let mut ticker = tokio::time::interval(self.config.heartbeat_interval);
        tokio::pin!(shutdown);

        loop {
            tokio::select! {
                _ = &mut shutdown => break,
                _ = ticker.tick() => self.send_heartbeats().await,
                Some(indication) = self.indications.recv() => self.on_indication(indication).await,
                Some(peer) = self.unreachable.recv() => self.on_unreachable(peer),
            }
        }

        log::info!("[node] shutting down");
        self.endpoint.shutdown();
        receiver.abort();
        Ok(())
    }

    async fn send_heartbeats(&mut self) {
        for peer in self.config.peers.clone() {
            let request = Message::heartbeat_request(self.recovery);
            if let Err(e) = self.endpoint.send_request(request, peer).await {
                log::warn!("[node] heartbeat to {}: {}", peer, e);
            }
        }
    }

    async fn on_indication(&mut self, indication: Indication) {
        match indication {
            Indication::Request { id, message, peer } => {
                self.on_request(id, message, peer).await
            }
            Indication::Response {
                response, peer, ..
            } => self.on_response(response, peer),
        }
    }

    async fn on_request(&mut self, id: TransactionId, request: Message, peer: SocketAddr) {
        match request.msg_type {
            MessageType::HeartbeatRequest => {
                self.note_recovery(peer, request.recovery_time_stamp());
                let response = Message::heartbeat_response(request.sequence, self.recovery);
                if let Err(e) = self.endpoint.supply_response(id, response).await {
                    log::warn!("[node] heartbeat response to {}: {}", peer, e);
                }
            }
            other => {
                log::warn!("[node] {} from {} not supported, ignored", other, peer);
            }
        }
    }

    fn on_response(&mut self, response: Message, peer: SocketAddr) {
        if response.msg_type != MessageType::HeartbeatResponse {
            log::debug!("[node] {} from {}", response.type_name(), peer);
            return;
        }
        self.note_recovery(peer, response.recovery_time_stamp());
        let state = self.peers.entry(peer).or_default();
        if !state.reachable {
            log::info!("[node] peer {} reachable", peer);
            state.reachable = true;
        }
    }

    fn note_recovery(&mut self, peer: SocketAddr, recovery: Option<u32>) {
        let Some(recovery) = recovery else {
            log::warn!("[node] {} sent no Recovery Time Stamp", peer);
            return;
        };
        let state = self.peers.entry(peer).or_default();
        match state.recovery {
            Some(previous) if previous != recovery => {
                log::warn!(
                    "[node] peer {} restarted (recovery {} -> {})",
                    peer,
                    previous,
                    recovery
                );
            }
            _ => {}
        }
        state.recovery = Some(recovery);
    }

    fn on_unreachable(&mut self, peer: SocketAddr) {
        let state = self.peers.entry(peer).or_default();
        if state.reachable {
            log::warn!("[node] peer {} unreachable", peer);
        }
        state.reachable = false;
    }
}
