//! Shared types for the replicell coordination protocol.
//!
//! Everything that crosses the wire lives here: node identifiers, the
//! opaque value cell contents, the RPC envelope with its request and
//! response payloads, and the NATS subject naming scheme. The wire
//! encoding is JSON and is stable; changing any field name or tag here
//! is a protocol change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// The opaque contents of the replicated value cell.
///
/// The protocol never inspects the value; an empty cell is represented
/// as JSON `null`, matching a node created without an initial value.
pub type CellValue = serde_json::Value;

/// Default subject prefix for all replicell NATS traffic.
pub const DEFAULT_SUBJECT_PREFIX: &str = "replicell";

/// Unique name of a node within a deployment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for NodeId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for NodeId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Failure of the remote-call substrate.
#[derive(Debug, Error)]
pub enum TransportError {
    /// Could not reach the messaging substrate at all.
    #[error("transport connection failed: {0}")]
    Connect(String),

    /// The remote node did not answer within the request timeout.
    #[error("request to node {node} timed out")]
    Timeout { node: NodeId },

    /// Wire encoding or decoding failed.
    #[error("wire encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    /// The transport has no route to the named node.
    #[error("node {node} is unknown to the transport")]
    UnknownNode { node: NodeId },

    /// The remote node answered with an error status.
    #[error("remote error from node {node}: {message}")]
    Remote { node: NodeId, message: String },
}

/// Envelope wrapping every RPC request on the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RpcEnvelope {
    /// Correlation id, unique per request.
    pub request_id: Uuid,
    /// Node that issued the call.
    pub sender: NodeId,
    /// Send timestamp (ISO 8601).
    pub sent_at: DateTime<Utc>,
    /// The operation being invoked.
    pub request: RpcRequest,
}

impl RpcEnvelope {
    pub fn new(sender: NodeId, request: RpcRequest) -> Self {
        Self {
            request_id: Uuid::new_v4(),
            sender,
            sent_at: Utc::now(),
            request,
        }
    }
}

/// The remote operations every node serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum RpcRequest {
    /// A newcomer announces itself (or a member gossips a newcomer).
    Join { client_id: NodeId },
    /// A departing node asks to be removed from the peer table.
    Leave { node_id: NodeId },
    /// Blocking read-token acquisition on the receiving node.
    RequestReadToken { requester_id: NodeId },
    ReleaseReadToken { releaser_id: NodeId },
    /// Blocking write-token acquisition on the receiving node.
    RequestWriteToken { requester_id: NodeId },
    ReleaseWriteToken { releaser_id: NodeId },
    /// One-way value propagation from a committed write.
    UpdateValue { value: CellValue },
    /// Unsynchronized observation of the cell.
    CurrentValue,
    /// Liveness probe used by directory lookup.
    Ping,
}

/// Reply to an RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RpcResponse {
    Ok {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        value: Option<CellValue>,
    },
    Error { message: String },
}

impl RpcResponse {
    pub fn ok() -> Self {
        Self::Ok { value: None }
    }

    pub fn with_value(value: CellValue) -> Self {
        Self::Ok { value: Some(value) }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}

/// Answer to a discovery broadcast on the directory subject.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscoverReply {
    pub node_id: NodeId,
}

/// Subject a node serves its RPC requests on.
pub fn rpc_subject(prefix: &str, node: &NodeId) -> String {
    format!("{prefix}.rpc.{node}")
}

/// Broadcast subject used for directory discovery.
pub fn discover_subject(prefix: &str) -> String {
    format!("{prefix}.discover")
}
