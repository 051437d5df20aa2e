//! `pfcp-transaction` — reliable request/response transactions for a PFCP
//! endpoint running over UDP.
//!
//! # Architecture
//!
//! ```text
//!   UDP socket ──datagram──┐          ┌── timer task ──┐ (one per armed timer)
//!                          ▼          ▼                │
//!                    ┌─────────────────────┐           │
//!   Endpoint ──────▶ │   dispatch queue    │ ◀─────────┘
//!   (send_request,   └──────────┬──────────┘
//!    supply_response)           │ single consumer
//!                    ┌──────────▼──────────┐
//!                    │     Dispatcher      │──▶ Indication channel (upper layer)
//!                    │  owns the Registry  │
//!                    │   tx: id → TxTr     │──▶ Transmit::send_to
//!                    │   rx: id → RxTr     │
//!                    └─────────────────────┘
//! ```
//!
//! Timers never mutate a transaction.  They post a timeout event into the same
//! queue that carries inbound datagrams, and the dispatcher (the only owner of
//! the two transaction tables) applies it.  A timeout that names a transaction
//! which is already gone is dropped.
//!
//! Modules:
//! - [`config`]      — retransmission interval, retry ceiling, derived Rx lifetime
//! - [`error`]       — error kinds reported by the transaction layer
//! - [`message`]     — PFCP header codec and message types
//! - [`id`]          — transaction identifiers and the outbound sequence source
//! - [`state`]       — Tx / Rx state machine states
//! - [`timer`]       — per-transaction timers feeding the dispatch queue
//! - [`tx`]          — outbound (request sent, awaiting response) transactions
//! - [`rx`]          — inbound (request received) transactions
//! - [`registry`]    — the two transaction tables and the operations on them
//! - [`dispatcher`]  — the serialized dispatch loop and its [`Endpoint`] handle
//! - [`socket`]      — datagram transmit primitive and UDP socket
//! - [`node`]        — heartbeat-speaking node built on the layer

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod id;
pub mod message;
pub mod node;
pub mod registry;
pub mod rx;
pub mod socket;
pub mod state;
pub mod timer;
pub mod tx;

pub use config::Config;
pub use dispatcher::{Endpoint, Indication};
pub use error::{Error, Result};
pub use id::{Kind, TransactionId};
pub use message::{Message, MessageError, MessageType};
pub use registry::{Escalation, Registry, TimeoutOutcome};
pub use socket::{Socket, Transmit};
