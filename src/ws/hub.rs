//! Connection hub - addressable outbound queues for every open socket

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::game::{Envelope, Recipient};
use crate::ws::protocol::{ConnId, ServerMsg};

/// Per-connection outbound queue depth
pub const OUTBOUND_BUFFER: usize = 256;

/// Every open connection, joined or not. Broadcasts reach all of them.
#[derive(Clone, Default)]
pub struct ConnectionHub {
    connections: Arc<DashMap<ConnId, mpsc::Sender<ServerMsg>>>,
}

impl ConnectionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection; the returned receiver feeds its writer task
    pub fn register(&self, conn_id: ConnId) -> mpsc::Receiver<ServerMsg> {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.connections.insert(conn_id, tx);
        rx
    }

    pub fn unregister(&self, conn_id: ConnId) {
        self.connections.remove(&conn_id);
    }

    pub fn len(&self) -> usize {
        self.connections.len()
    }

    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Queue a message for one connection. Returns false if it was dropped.
    pub fn send_to(&self, conn_id: ConnId, msg: ServerMsg) -> bool {
        match self.connections.get(&conn_id) {
            Some(tx) => push(conn_id, &tx, msg),
            None => {
                debug!(conn_id = %conn_id, "Dropping message for unknown connection");
                false
            }
        }
    }

    pub fn broadcast(&self, msg: ServerMsg) {
        for entry in self.connections.iter() {
            push(*entry.key(), entry.value(), msg.clone());
        }
    }

    pub fn broadcast_except(&self, sender: ConnId, msg: ServerMsg) {
        for entry in self.connections.iter().filter(|e| *e.key() != sender) {
            push(*entry.key(), entry.value(), msg.clone());
        }
    }

    pub fn deliver(&self, envelope: Envelope) {
        match envelope.to {
            Recipient::One(conn_id) => {
                self.send_to(conn_id, envelope.msg);
            }
            Recipient::All => self.broadcast(envelope.msg),
            Recipient::AllExcept(sender) => self.broadcast_except(sender, envelope.msg),
        }
    }
}

/// Never blocks the caller: a slow client loses messages instead
fn push(conn_id: ConnId, tx: &mpsc::Sender<ServerMsg>, msg: ServerMsg) -> bool {
    match tx.try_send(msg) {
        Ok(()) => true,
        Err(TrySendError::Full(_)) => {
            warn!(conn_id = %conn_id, "Outbound queue full, dropping message");
            false
        }
        Err(TrySendError::Closed(_)) => {
            debug!(conn_id = %conn_id, "Outbound queue closed");
            false
        }
    }
}
