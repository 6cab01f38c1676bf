//! Peer membership table.
//!
//! Maps every other known node to its remote-call handle. Insertion is
//! idempotent by node id, which is what bounds the join gossip: a
//! member that already knows a newcomer does not forward it again. The
//! table never contains the owning node itself.

use std::collections::HashMap;
use std::sync::Arc;

use metrics::gauge;
use replicell_common::NodeId;
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::transport::ReplicaClient;

pub struct PeerTable {
    self_id: NodeId,
    peers: RwLock<HashMap<NodeId, Arc<dyn ReplicaClient>>>,
}

impl PeerTable {
    pub fn new(self_id: NodeId) -> Self {
        Self {
            self_id,
            peers: RwLock::new(HashMap::new()),
        }
    }

    /// Insert a peer handle. Returns false without touching the table
    /// when the peer is already known or is the owning node itself.
    pub async fn insert(&self, client: Arc<dyn ReplicaClient>) -> bool {
        let id = client.node_id().clone();
        if id == self.self_id {
            debug!(peer = %id, "refusing to insert self into peer table");
            return false;
        }
        let mut peers = self.peers.write().await;
        if peers.contains_key(&id) {
            debug!(peer = %id, "peer already known");
            return false;
        }
        peers.insert(id.clone(), client);
        gauge!("replicell_known_peers", peers.len() as f64);
        info!(peer = %id, peer_count = peers.len(), "peer added");
        true
    }

    /// Remove a departed peer. A removal for an unknown id is a no-op.
    pub async fn remove(&self, id: &NodeId) -> bool {
        let mut peers = self.peers.write().await;
        let removed = peers.remove(id).is_some();
        if removed {
            gauge!("replicell_known_peers", peers.len() as f64);
            info!(peer = %id, peer_count = peers.len(), "peer removed");
        }
        removed
    }

    pub async fn contains(&self, id: &NodeId) -> bool {
        self.peers.read().await.contains_key(id)
    }

    /// Handles of all known peers, in unspecified order.
    pub async fn snapshot(&self) -> Vec<Arc<dyn ReplicaClient>> {
        self.peers.read().await.values().cloned().collect()
    }

    /// Known peer ids, sorted.
    pub async fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.peers.read().await.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub async fn len(&self) -> usize {
        self.peers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.peers.read().await.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use replicell_common::{CellValue, TransportError};

    struct StubClient {
        id: NodeId,
    }

    #[async_trait]
    impl ReplicaClient for StubClient {
        fn node_id(&self) -> &NodeId {
            &self.id
        }

        async fn join(&self, _client_id: &NodeId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn leave(&self, _node_id: &NodeId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn request_read_token(&self, _requester_id: &NodeId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn release_read_token(&self, _releaser_id: &NodeId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn request_write_token(&self, _requester_id: &NodeId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn release_write_token(&self, _releaser_id: &NodeId) -> Result<(), TransportError> {
            Ok(())
        }

        async fn update_value(&self, _value: &CellValue) -> Result<(), TransportError> {
            Ok(())
        }

        async fn current_value(&self) -> Result<CellValue, TransportError> {
            Ok(CellValue::Null)
        }

        async fn ping(&self) -> Result<(), TransportError> {
            Ok(())
        }
    }

    fn stub(id: &str) -> Arc<dyn ReplicaClient> {
        Arc::new(StubClient {
            id: NodeId::from(id),
        })
    }

    #[tokio::test]
    async fn insert_is_idempotent_by_id() {
        let table = PeerTable::new(NodeId::from("A"));
        assert!(table.insert(stub("B")).await);
        assert!(!table.insert(stub("B")).await);
        assert_eq!(table.len().await, 1);
    }

    #[tokio::test]
    async fn never_contains_self() {
        let table = PeerTable::new(NodeId::from("A"));
        assert!(!table.insert(stub("A")).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn remove_unknown_peer_is_noop() {
        let table = PeerTable::new(NodeId::from("A"));
        table.insert(stub("B")).await;
        assert!(!table.remove(&NodeId::from("C")).await);
        assert!(table.remove(&NodeId::from("B")).await);
        assert!(table.is_empty().await);
    }

    #[tokio::test]
    async fn ids_are_sorted() {
        let table = PeerTable::new(NodeId::from("A"));
        table.insert(stub("C")).await;
        table.insert(stub("B")).await;
        assert_eq!(table.ids().await, vec![NodeId::from("B"), NodeId::from("C")]);
    }
}
