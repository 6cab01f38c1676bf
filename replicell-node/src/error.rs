use replicell_common::TransportError;
use thiserror::Error;

/// Errors surfaced by the coordination core to local callers.
#[derive(Debug, Error)]
pub enum NodeError {
    /// Failure of the remote-call substrate, passed through unchanged.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// No reachable seed peer in the directory, or the seed's join
    /// handler reported an error.
    #[error("failed to join the network: {0}")]
    JoinFailed(String),

    /// A blocked token request was aborted by shutdown.
    #[error("token request cancelled")]
    Cancelled,
}
