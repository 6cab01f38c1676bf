//! In-process transport.
//!
//! Wires several `ReplicaNode`s together inside one process: the
//! "remote" calls are direct method invocations and the directory is a
//! shared map. Used by the protocol tests to exercise multi-node
//! scenarios without a messaging substrate.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use replicell_common::{CellValue, NodeId, TransportError};
use tokio::sync::RwLock;

use crate::replica::ReplicaNode;
use crate::transport::{NameDirectory, PeerConnector, ReplicaClient};

/// Shared registry of all nodes in the process. Implements both the
/// connector and the directory capability.
#[derive(Default)]
pub struct MemoryNetwork {
    nodes: RwLock<HashMap<NodeId, Arc<ReplicaNode>>>,
}

impl MemoryNetwork {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }
}

/// Call handle backed by a direct reference to the target node.
pub struct MemoryClient {
    node: Arc<ReplicaNode>,
}

impl MemoryClient {
    pub fn new(node: Arc<ReplicaNode>) -> Arc<Self> {
        Arc::new(Self { node })
    }
}

#[async_trait]
impl ReplicaClient for MemoryClient {
    fn node_id(&self) -> &NodeId {
        self.node.id()
    }

    async fn join(&self, client_id: &NodeId) -> Result<(), TransportError> {
        self.node
            .handle_join(client_id)
            .await
            .map_err(|e| TransportError::Remote {
                node: self.node.id().clone(),
                message: e.to_string(),
            })
    }

    async fn leave(&self, node_id: &NodeId) -> Result<(), TransportError> {
        self.node.handle_leave(node_id).await;
        Ok(())
    }

    async fn request_read_token(&self, requester_id: &NodeId) -> Result<(), TransportError> {
        self.node
            .tokens()
            .request_read_token(requester_id)
            .await
            .map_err(|e| TransportError::Remote {
                node: self.node.id().clone(),
                message: e.to_string(),
            })
    }

    async fn release_read_token(&self, releaser_id: &NodeId) -> Result<(), TransportError> {
        self.node.tokens().release_read_token(releaser_id).await;
        Ok(())
    }

    async fn request_write_token(&self, requester_id: &NodeId) -> Result<(), TransportError> {
        self.node
            .tokens()
            .request_write_token(requester_id)
            .await
            .map_err(|e| TransportError::Remote {
                node: self.node.id().clone(),
                message: e.to_string(),
            })
    }

    async fn release_write_token(&self, releaser_id: &NodeId) -> Result<(), TransportError> {
        self.node.tokens().release_write_token(releaser_id).await;
        Ok(())
    }

    async fn update_value(&self, value: &CellValue) -> Result<(), TransportError> {
        self.node.apply_update(value.clone());
        Ok(())
    }

    async fn current_value(&self) -> Result<CellValue, TransportError> {
        Ok(self.node.current_value())
    }

    async fn ping(&self) -> Result<(), TransportError> {
        Ok(())
    }
}

#[async_trait]
impl PeerConnector for MemoryNetwork {
    async fn connect(&self, id: &NodeId) -> Result<Arc<dyn ReplicaClient>, TransportError> {
        let nodes = self.nodes.read().await;
        let node = nodes.get(id).ok_or_else(|| TransportError::UnknownNode {
            node: id.clone(),
        })?;
        Ok(MemoryClient::new(Arc::clone(node)) as Arc<dyn ReplicaClient>)
    }
}

#[async_trait]
impl NameDirectory for MemoryNetwork {
    async fn bind(&self, node: Arc<ReplicaNode>) -> Result<(), TransportError> {
        self.nodes.write().await.insert(node.id().clone(), node);
        Ok(())
    }

    async fn lookup(&self, id: &NodeId) -> Result<Option<Arc<dyn ReplicaClient>>, TransportError> {
        let nodes = self.nodes.read().await;
        Ok(nodes
            .get(id)
            .map(|node| MemoryClient::new(Arc::clone(node)) as Arc<dyn ReplicaClient>))
    }

    async fn list(&self) -> Result<Vec<NodeId>, TransportError> {
        let mut ids: Vec<NodeId> = self.nodes.read().await.keys().cloned().collect();
        ids.sort();
        Ok(ids)
    }
}
