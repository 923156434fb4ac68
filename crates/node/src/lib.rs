//! One chat node: socket termination, send-path ingestion, and consumer
//! delivery.
//!
//! A node owns three things: the socket table for devices attached to it,
//! the consumer draining its per-node delivery queue, and the distributor
//! that turns accepted sends into persistence enqueues, per-node envelopes
//! and push fallbacks. Everything shared hangs off [`NodeContext`]; there
//! are no hidden globals.

use std::sync::Arc;

use parley_presence::Presence;

pub mod consumer;
pub mod distributor;
mod error;
pub mod membership;
pub mod push;
pub mod server;
pub mod socket;
pub mod table;

pub use {
    consumer::NodeConsumer,
    distributor::Distributor,
    error::{Error, Result},
    membership::{MembershipDirectory, StoreMembership},
    push::{HttpPushSink, LogPushSink, PushEvent, PushSink},
    table::SocketTable,
};

/// Shared per-process state of one chat node.
pub struct NodeContext {
    pub node_id: String,
    pub table: SocketTable,
    pub presence: Arc<dyn Presence>,
    pub distributor: Distributor,
}

impl NodeContext {
    #[must_use]
    pub fn new(
        node_id: impl Into<String>,
        presence: Arc<dyn Presence>,
        distributor: Distributor,
    ) -> Self {
        Self {
            node_id: node_id.into(),
            table: SocketTable::new(),
            presence,
            distributor,
        }
    }
}
