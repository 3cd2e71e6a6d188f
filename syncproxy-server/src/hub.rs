//! Client registry and frame fan-out.
//!
//! Every connected client owns a bounded queue drained by its writer task.
//! Dispatching a frame routes it once, then enqueues the result to every
//! client except the sender.

use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use syncproxy_core::{ModelChanges, Routed, RoutingMode, is_empty_frame};
use tokio::sync::mpsc;

/// A connected client as seen by the hub.
#[derive(Debug)]
pub struct Client {
    pub id: u64,
    pub name: String,
    shared_models: RwLock<BTreeSet<String>>,
    tx: mpsc::Sender<Bytes>,
}

impl Client {
    #[cfg(test)]
    pub fn shared_models(&self) -> BTreeSet<String> {
        self.shared_models.read().clone()
    }
}

enum Fanout {
    /// Same bytes for every recipient.
    Same(Bytes),
    PerModel(ModelChanges),
}

pub struct Hub {
    mode: RoutingMode,
    clients: DashMap<u64, Arc<Client>>,
    next_id: AtomicU64,
}

impl Hub {
    pub fn new(mode: RoutingMode) -> Self {
        Self {
            mode,
            clients: DashMap::new(),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Add a client whose writer drains `tx`'s receiver.
    pub fn register(&self, peer: SocketAddr, tx: mpsc::Sender<Bytes>) -> Arc<Client> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let client = Arc::new(Client {
            id,
            name: format!("client-{}@{}", id, peer),
            shared_models: RwLock::new(BTreeSet::new()),
            tx,
        });
        self.clients.insert(id, client.clone());
        tracing::info!(
            client = %client.name,
            clients = self.clients.len(),
            "Client connected"
        );
        client
    }

    /// Remove a client. Returns false if it was already gone.
    pub fn unregister(&self, id: u64) -> bool {
        let Some((_, client)) = self.clients.remove(&id) else {
            return false;
        };
        tracing::info!(
            client = %client.name,
            clients = self.clients.len(),
            "Client disconnected"
        );
        true
    }

    fn others(&self, id: u64) -> Vec<Arc<Client>> {
        self.clients
            .iter()
            .filter(|entry| *entry.key() != id)
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Route `frame` from `from` and enqueue it to every other client.
    ///
    /// Waits while a recipient's queue is full. A recipient whose queue has
    /// been closed is dropped from the registry.
    pub async fn dispatch(&self, from: &Client, frame: Bytes) {
        let decision = self.mode.route(&frame);

        if let Some(models) = decision.shared_models {
            tracing::info!(client = %from.name, models = ?models, "Client shared models");
            *from.shared_models.write() = models;
        }

        let fanout = match decision.routed {
            Routed::Nothing => {
                tracing::debug!(client = %from.name, "Nothing to relay");
                return;
            }
            Routed::Unchanged => Fanout::Same(frame),
            Routed::All(bytes) => Fanout::Same(Bytes::from(bytes)),
            Routed::PerModel(changes) => Fanout::PerModel(changes),
        };

        for recipient in self.others(from.id) {
            let payload = match &fanout {
                Fanout::Same(payload) => payload.clone(),
                Fanout::PerModel(changes) => {
                    let out = changes.for_models(&recipient.shared_models.read());
                    if is_empty_frame(&out) {
                        continue;
                    }
                    Bytes::from(out)
                }
            };

            tracing::debug!(
                from = %from.name,
                to = %recipient.name,
                bytes = payload.len(),
                "Relaying frame"
            );
            if recipient.tx.send(payload).await.is_err() {
                tracing::warn!(
                    from = %from.name,
                    to = %recipient.name,
                    "Relaying failed, dropping recipient"
                );
                self.unregister(recipient.id);
            }
        }
    }
}
