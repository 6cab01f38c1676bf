//! Transport seam between the coordination core and the remote-call
//! substrate.
//!
//! The core never assumes a particular transport. It works against
//! three capabilities: a typed call handle on a named peer
//! ([`ReplicaClient`]), a way to build such a handle from a bare node
//! id ([`PeerConnector`], used when a join message announces a node by
//! name), and a bootstrap name directory ([`NameDirectory`]). The NATS
//! implementation lives in [`nats`]; an in-process implementation used
//! by the protocol tests lives in [`memory`].

pub mod memory;
pub mod nats;

use std::sync::Arc;

use async_trait::async_trait;
use replicell_common::{CellValue, NodeId, TransportError};

use crate::replica::ReplicaNode;

/// Typed remote calls on one named peer. Mirrors the operations every
/// node serves; any call may fail with a [`TransportError`].
#[async_trait]
pub trait ReplicaClient: Send + Sync {
    /// Id of the node this handle points at.
    fn node_id(&self) -> &NodeId;

    async fn join(&self, client_id: &NodeId) -> Result<(), TransportError>;

    async fn leave(&self, node_id: &NodeId) -> Result<(), TransportError>;

    /// Blocks on the remote coordinator until the token is granted.
    async fn request_read_token(&self, requester_id: &NodeId) -> Result<(), TransportError>;

    async fn release_read_token(&self, releaser_id: &NodeId) -> Result<(), TransportError>;

    /// Blocks on the remote coordinator until the token is granted.
    async fn request_write_token(&self, requester_id: &NodeId) -> Result<(), TransportError>;

    async fn release_write_token(&self, releaser_id: &NodeId) -> Result<(), TransportError>;

    async fn update_value(&self, value: &CellValue) -> Result<(), TransportError>;

    async fn current_value(&self) -> Result<CellValue, TransportError>;

    /// Liveness probe used by directory lookup.
    async fn ping(&self) -> Result<(), TransportError>;
}

/// Builds a call handle for a node known only by id.
#[async_trait]
pub trait PeerConnector: Send + Sync {
    async fn connect(&self, id: &NodeId) -> Result<Arc<dyn ReplicaClient>, TransportError>;
}

/// Bootstrap name directory: the only discovery channel. After join,
/// all traffic goes directly to peer handles.
#[async_trait]
pub trait NameDirectory: Send + Sync {
    /// Publish a node under its id and start serving its remote
    /// operations.
    async fn bind(&self, node: Arc<ReplicaNode>) -> Result<(), TransportError>;

    /// Resolve an id to a live handle, if the node answers.
    async fn lookup(&self, id: &NodeId) -> Result<Option<Arc<dyn ReplicaClient>>, TransportError>;

    /// Ids of all currently registered nodes, including the caller.
    async fn list(&self) -> Result<Vec<NodeId>, TransportError>;
}
