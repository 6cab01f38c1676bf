//! NATS-backed transport.
//!
//! Every node serves its remote operations on a request/reply subject
//! derived from its id (`{prefix}.rpc.{node_id}`) and answers directory
//! discovery on a shared broadcast subject (`{prefix}.discover`). The
//! directory `list` operation is a scatter-gather: one request on the
//! discovery subject, replies collected for a short window. Payloads
//! are the JSON wire types from `replicell-common`.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use replicell_common::{
    discover_subject, rpc_subject, CellValue, DiscoverReply, NodeId, RpcEnvelope, RpcRequest,
    RpcResponse, TransportError,
};
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::NatsConfig;
use crate::replica::ReplicaNode;
use crate::transport::{NameDirectory, PeerConnector, ReplicaClient};

pub struct NatsTransport {
    client: async_nats::Client,
    /// Identity recorded as the sender in outgoing envelopes.
    self_id: NodeId,
    subject_prefix: String,
    request_timeout: Duration,
    discovery_window: Duration,
    shutdown: CancellationToken,
}

impl NatsTransport {
    /// Connect to the NATS server named in the configuration.
    pub async fn connect(
        config: &NatsConfig,
        self_id: NodeId,
        shutdown: CancellationToken,
    ) -> Result<Arc<Self>, TransportError> {
        info!(nats_url = %config.url, "connecting to NATS server");

        let options = async_nats::ConnectOptions::new()
            .retry_on_initial_connect()
            .reconnect_delay_callback(|attempts| {
                if attempts < 10 {
                    Duration::from_millis(200 * attempts as u64)
                } else {
                    Duration::from_secs(10)
                }
            });

        let client = options
            .connect(&config.url)
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        Ok(Arc::new(Self {
            client,
            self_id,
            subject_prefix: config.subject_prefix.clone(),
            request_timeout: Duration::from_millis(config.request_timeout_ms),
            discovery_window: Duration::from_millis(config.discovery_window_ms),
            shutdown,
        }))
    }

    fn make_client(&self, target: &NodeId) -> Arc<NatsReplicaClient> {
        Arc::new(NatsReplicaClient {
            client: self.client.clone(),
            subject: rpc_subject(&self.subject_prefix, target),
            target: target.clone(),
            sender: self.self_id.clone(),
            request_timeout: self.request_timeout,
        })
    }

    /// Serve incoming RPC requests for a bound node. Each request is
    /// handled on its own task so a blocking token request does not
    /// stall the subscription.
    async fn serve_rpc(&self, node: Arc<ReplicaNode>) -> Result<(), TransportError> {
        let subject = rpc_subject(&self.subject_prefix, node.id());
        let mut subscription = self
            .client
            .subscribe(subject.clone())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let client = self.client.clone();
        let shutdown = self.shutdown.clone();
        info!(subject = %subject, node_id = %node.id(), "serving remote operations");

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = subscription.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                };

                let node = Arc::clone(&node);
                let client = client.clone();
                tokio::spawn(async move {
                    let response = match serde_json::from_slice::<RpcEnvelope>(&message.payload) {
                        Ok(envelope) => {
                            debug!(
                                request_id = %envelope.request_id,
                                sender = %envelope.sender,
                                "handling remote operation"
                            );
                            dispatch(&node, envelope.request).await
                        }
                        Err(e) => {
                            warn!(error = %e, "undecodable RPC payload");
                            RpcResponse::error(format!("undecodable request: {e}"))
                        }
                    };

                    if let Some(reply) = message.reply {
                        match serde_json::to_vec(&response) {
                            Ok(payload) => {
                                if let Err(e) = client.publish(reply, payload.into()).await {
                                    warn!(error = %e, "failed to publish RPC reply");
                                }
                            }
                            Err(e) => error!(error = %e, "failed to encode RPC reply"),
                        }
                    }
                });
            }
            debug!("RPC subscription closed");
        });

        Ok(())
    }

    /// Answer discovery broadcasts with this node's id.
    async fn serve_discovery(&self, node: Arc<ReplicaNode>) -> Result<(), TransportError> {
        let mut subscription = self
            .client
            .subscribe(discover_subject(&self.subject_prefix))
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let client = self.client.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    message = subscription.next() => match message {
                        Some(message) => message,
                        None => break,
                    },
                    _ = shutdown.cancelled() => break,
                };

                let Some(reply) = message.reply else { continue };
                let answer = DiscoverReply {
                    node_id: node.id().clone(),
                };
                match serde_json::to_vec(&answer) {
                    Ok(payload) => {
                        if let Err(e) = client.publish(reply, payload.into()).await {
                            warn!(error = %e, "failed to answer discovery request");
                        }
                    }
                    Err(e) => error!(error = %e, "failed to encode discovery reply"),
                }
            }
        });

        Ok(())
    }
}

/// Route a decoded request to the node's entry points.
async fn dispatch(node: &ReplicaNode, request: RpcRequest) -> RpcResponse {
    match request {
        RpcRequest::Join { client_id } => match node.handle_join(&client_id).await {
            Ok(()) => RpcResponse::ok(),
            Err(e) => RpcResponse::error(e.to_string()),
        },
        RpcRequest::Leave { node_id } => {
            node.handle_leave(&node_id).await;
            RpcResponse::ok()
        }
        RpcRequest::RequestReadToken { requester_id } => {
            match node.tokens().request_read_token(&requester_id).await {
                Ok(()) => RpcResponse::ok(),
                Err(e) => RpcResponse::error(e.to_string()),
            }
        }
        RpcRequest::ReleaseReadToken { releaser_id } => {
            node.tokens().release_read_token(&releaser_id).await;
            RpcResponse::ok()
        }
        RpcRequest::RequestWriteToken { requester_id } => {
            match node.tokens().request_write_token(&requester_id).await {
                Ok(()) => RpcResponse::ok(),
                Err(e) => RpcResponse::error(e.to_string()),
            }
        }
        RpcRequest::ReleaseWriteToken { releaser_id } => {
            node.tokens().release_write_token(&releaser_id).await;
            RpcResponse::ok()
        }
        RpcRequest::UpdateValue { value } => {
            node.apply_update(value);
            RpcResponse::ok()
        }
        RpcRequest::CurrentValue => RpcResponse::with_value(node.current_value()),
        RpcRequest::Ping => RpcResponse::ok(),
    }
}

/// Call handle for one remote node, addressed by subject.
pub struct NatsReplicaClient {
    client: async_nats::Client,
    subject: String,
    target: NodeId,
    sender: NodeId,
    request_timeout: Duration,
}

impl NatsReplicaClient {
    async fn call(&self, request: RpcRequest) -> Result<Option<CellValue>, TransportError> {
        let envelope = RpcEnvelope::new(self.sender.clone(), request);
        let payload = serde_json::to_vec(&envelope)?;

        let response = tokio::time::timeout(
            self.request_timeout,
            self.client.request(self.subject.clone(), payload.into()),
        )
        .await
        .map_err(|_| TransportError::Timeout {
            node: self.target.clone(),
        })?
        .map_err(|e| TransportError::Connect(e.to_string()))?;

        match serde_json::from_slice::<RpcResponse>(&response.payload)? {
            RpcResponse::Ok { value } => Ok(value),
            RpcResponse::Error { message } => Err(TransportError::Remote {
                node: self.target.clone(),
                message,
            }),
        }
    }
}

#[async_trait]
impl ReplicaClient for NatsReplicaClient {
    fn node_id(&self) -> &NodeId {
        &self.target
    }

    async fn join(&self, client_id: &NodeId) -> Result<(), TransportError> {
        self.call(RpcRequest::Join {
            client_id: client_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn leave(&self, node_id: &NodeId) -> Result<(), TransportError> {
        self.call(RpcRequest::Leave {
            node_id: node_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn request_read_token(&self, requester_id: &NodeId) -> Result<(), TransportError> {
        self.call(RpcRequest::RequestReadToken {
            requester_id: requester_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn release_read_token(&self, releaser_id: &NodeId) -> Result<(), TransportError> {
        self.call(RpcRequest::ReleaseReadToken {
            releaser_id: releaser_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn request_write_token(&self, requester_id: &NodeId) -> Result<(), TransportError> {
        self.call(RpcRequest::RequestWriteToken {
            requester_id: requester_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn release_write_token(&self, releaser_id: &NodeId) -> Result<(), TransportError> {
        self.call(RpcRequest::ReleaseWriteToken {
            releaser_id: releaser_id.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn update_value(&self, value: &CellValue) -> Result<(), TransportError> {
        self.call(RpcRequest::UpdateValue {
            value: value.clone(),
        })
        .await
        .map(|_| ())
    }

    async fn current_value(&self) -> Result<CellValue, TransportError> {
        let value = self.call(RpcRequest::CurrentValue).await?;
        Ok(value.unwrap_or(CellValue::Null))
    }

    async fn ping(&self) -> Result<(), TransportError> {
        self.call(RpcRequest::Ping).await.map(|_| ())
    }
}

#[async_trait]
impl PeerConnector for NatsTransport {
    /// Building a handle is pure subject construction; no traffic flows
    /// until the first call.
    async fn connect(&self, id: &NodeId) -> Result<Arc<dyn ReplicaClient>, TransportError> {
        Ok(self.make_client(id) as Arc<dyn ReplicaClient>)
    }
}

#[async_trait]
impl NameDirectory for NatsTransport {
    async fn bind(&self, node: Arc<ReplicaNode>) -> Result<(), TransportError> {
        self.serve_rpc(Arc::clone(&node)).await?;
        self.serve_discovery(node).await?;
        Ok(())
    }

    async fn lookup(&self, id: &NodeId) -> Result<Option<Arc<dyn ReplicaClient>>, TransportError> {
        let client = self.make_client(id);
        match client.ping().await {
            Ok(()) => Ok(Some(client as Arc<dyn ReplicaClient>)),
            Err(TransportError::Timeout { .. }) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn list(&self) -> Result<Vec<NodeId>, TransportError> {
        let inbox = self.client.new_inbox();
        let mut replies = self
            .client
            .subscribe(inbox.clone())
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        self.client
            .publish_with_reply(
                discover_subject(&self.subject_prefix),
                inbox,
                Vec::new().into(),
            )
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;
        self.client
            .flush()
            .await
            .map_err(|e| TransportError::Connect(e.to_string()))?;

        let mut ids = Vec::new();
        let deadline = tokio::time::Instant::now() + self.discovery_window;
        loop {
            let message = match tokio::time::timeout_at(deadline, replies.next()).await {
                Ok(Some(message)) => message,
                Ok(None) | Err(_) => break,
            };
            match serde_json::from_slice::<DiscoverReply>(&message.payload) {
                Ok(reply) => {
                    if !ids.contains(&reply.node_id) {
                        ids.push(reply.node_id);
                    }
                }
                Err(e) => warn!(error = %e, "undecodable discovery reply"),
            }
        }
        ids.sort();
        debug!(count = ids.len(), "directory listing complete");
        Ok(ids)
    }
}
