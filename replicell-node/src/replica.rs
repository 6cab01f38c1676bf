//! The replicated value cell and its update-propagation loop.
//!
//! A `ReplicaNode` ties together the three core pieces: the opaque
//! value cell, the local token coordinator, and the peer table. Local
//! reads and writes go through the coordinator; a committed write is
//! pushed to every known peer afterwards. Remote entry points
//! (`handle_join`, `apply_update`, the token operations reached through
//! [`crate::token::TokenCoordinator`]) are invoked by the transport
//! server on behalf of other nodes.

use std::sync::Arc;

use arc_swap::ArcSwap;
use metrics::counter;
use replicell_common::{CellValue, NodeId};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::NodeError;
use crate::membership::PeerTable;
use crate::token::{TokenCoordinator, TokenSnapshot};
use crate::transport::{NameDirectory, PeerConnector};

pub struct ReplicaNode {
    id: NodeId,
    /// The shared cell. An empty cell holds JSON `null`.
    cell: ArcSwap<CellValue>,
    tokens: TokenCoordinator,
    peers: PeerTable,
    connector: Arc<dyn PeerConnector>,
}

impl ReplicaNode {
    /// Create the first node of a deployment. The creator holds the
    /// write token from the start.
    pub fn bootstrap(
        id: NodeId,
        initial_value: Option<CellValue>,
        connector: Arc<dyn PeerConnector>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        info!(node_id = %id, "bootstrapping replicated object");
        Arc::new(Self {
            cell: ArcSwap::from_pointee(initial_value.unwrap_or(CellValue::Null)),
            tokens: TokenCoordinator::new(Some(id.clone()), shutdown),
            peers: PeerTable::new(id.clone()),
            connector,
            id,
        })
    }

    /// Create a node that will join an existing network. Its cell is
    /// empty and it holds no tokens until granted.
    pub fn joining(
        id: NodeId,
        connector: Arc<dyn PeerConnector>,
        shutdown: CancellationToken,
    ) -> Arc<Self> {
        info!(node_id = %id, "creating joining node");
        Arc::new(Self {
            cell: ArcSwap::from_pointee(CellValue::Null),
            tokens: TokenCoordinator::new(None, shutdown),
            peers: PeerTable::new(id.clone()),
            connector,
            id,
        })
    }

    pub fn id(&self) -> &NodeId {
        &self.id
    }

    pub fn tokens(&self) -> &TokenCoordinator {
        &self.tokens
    }

    pub fn peers(&self) -> &PeerTable {
        &self.peers
    }

    /// Read the cell under a read token.
    pub async fn read(&self) -> Result<CellValue, NodeError> {
        self.tokens.request_read_token(&self.id).await?;
        let snapshot = self.cell.load_full();
        self.tokens.release_read_token(&self.id).await;
        counter!("replicell_reads", 1);
        Ok((*snapshot).clone())
    }

    /// Overwrite the cell under the write token and push the new value
    /// to every known peer. The local commit happens before any remote
    /// update and is never rolled back; an unreachable peer is logged
    /// and skipped.
    pub async fn write(&self, value: CellValue) -> Result<(), NodeError> {
        self.tokens.request_write_token(&self.id).await?;
        self.cell.store(Arc::new(value.clone()));
        counter!("replicell_writes", 1);
        debug!(node_id = %self.id, "write committed locally");

        for peer in self.peers.snapshot().await {
            if let Err(e) = peer.update_value(&value).await {
                counter!("replicell_propagation_failures", 1);
                warn!(
                    peer = %peer.node_id(),
                    error = %e,
                    "value propagation failed, skipping peer"
                );
            }
        }

        self.tokens.release_write_token(&self.id).await;
        Ok(())
    }

    /// Remote entry point: replace the cell with a value pushed by a
    /// writer. Touches no tokens. Idempotent.
    pub fn apply_update(&self, value: CellValue) {
        self.cell.store(Arc::new(value));
        counter!("replicell_updates_applied", 1);
    }

    /// The cell contents without token acquisition. Best-effort
    /// observation for drivers and the management API.
    pub fn current_value(&self) -> CellValue {
        (*self.cell.load_full()).clone()
    }

    /// Observable token state, for the management API.
    pub async fn token_snapshot(&self) -> TokenSnapshot {
        self.tokens.snapshot().await
    }

    /// Remote entry point: a newcomer announced itself, either directly
    /// or through gossip. Inserting an already-known id is a no-op and
    /// stops the gossip; otherwise the handler pushes the current value
    /// to the newcomer, tells it about every other peer, and tells
    /// every other peer about it. Unreachable peers are skipped.
    pub async fn handle_join(&self, client_id: &NodeId) -> Result<(), NodeError> {
        if client_id == &self.id {
            return Ok(());
        }
        if self.peers.contains(client_id).await {
            debug!(peer = %client_id, "join for known peer, gossip stops here");
            return Ok(());
        }

        let client = self.connector.connect(client_id).await?;
        if !self.peers.insert(Arc::clone(&client)).await {
            return Ok(());
        }

        if let Err(e) = client.update_value(&self.current_value()).await {
            warn!(peer = %client_id, error = %e, "failed to push current value to newcomer");
        }

        for peer in self.peers.snapshot().await {
            if peer.node_id() == client_id {
                continue;
            }
            // The newcomer learns this peer; the peer learns the
            // newcomer. Duplicate announcements die at the idempotent
            // insert on the receiving side.
            if let Err(e) = client.join(peer.node_id()).await {
                warn!(peer = %peer.node_id(), error = %e, "failed to introduce peer to newcomer");
            }
            if let Err(e) = peer.join(client_id).await {
                warn!(peer = %peer.node_id(), error = %e, "failed to announce newcomer to peer");
            }
        }
        Ok(())
    }

    /// Remote entry point: a peer is leaving the network. Unknown ids
    /// are ignored.
    pub async fn handle_leave(&self, node_id: &NodeId) {
        if self.peers.remove(node_id).await {
            info!(peer = %node_id, "peer left the network");
        }
    }

    /// Enter an existing network through any peer registered in the
    /// directory. The node must already be bound in the directory so
    /// the seed can call back and push the current value.
    pub async fn join_via_directory(&self, directory: &dyn NameDirectory) -> Result<(), NodeError> {
        let ids = directory
            .list()
            .await
            .map_err(|e| NodeError::JoinFailed(format!("directory listing failed: {e}")))?;

        let seed = ids
            .into_iter()
            .find(|id| id != &self.id)
            .ok_or_else(|| NodeError::JoinFailed("no seed peer registered".to_string()))?;

        info!(node_id = %self.id, seed = %seed, "joining network via seed peer");
        let client = self
            .connector
            .connect(&seed)
            .await
            .map_err(|e| NodeError::JoinFailed(e.to_string()))?;
        client
            .join(&self.id)
            .await
            .map_err(|e| NodeError::JoinFailed(e.to_string()))?;
        Ok(())
    }

    /// Notify every peer that this node is departing. Unreachable peers
    /// are skipped; departure is best-effort.
    pub async fn leave_network(&self) {
        for peer in self.peers.snapshot().await {
            if let Err(e) = peer.leave(&self.id).await {
                warn!(peer = %peer.node_id(), error = %e, "failed to notify peer of departure");
            }
        }
        info!(node_id = %self.id, "departure notifications sent");
    }
}
