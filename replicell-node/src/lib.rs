//! Replicell node: a replicated value cell coordinated by read/write
//! tokens.
//!
//! Each node holds a copy of one shared value. A local token
//! coordinator serializes access (single writer, multiple readers); a
//! committed write is pushed to every known peer. Membership is a
//! full mesh maintained by join gossip over a single seed peer.
//!
//! The coordination core is transport-agnostic; see
//! [`transport`] for the trait seam and the NATS and in-memory
//! implementations.

pub mod config;
pub mod driver;
pub mod error;
pub mod management;
pub mod membership;
pub mod replica;
pub mod token;
pub mod transport;

pub use error::NodeError;
pub use replica::ReplicaNode;
pub use token::{TokenCoordinator, TokenSnapshot};
