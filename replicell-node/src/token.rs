//! Local token coordinator.
//!
//! Serializes access to the value cell on one node: at most one writer
//! with no foreign readers, or any number of readers with no writer.
//! The coordinator governs only the tokens held on its own node; it
//! knows nothing about tokens on other replicas.
//!
//! Waiters park on a watch channel that is signalled on every release,
//! so a blocked request re-checks its precondition exactly when the
//! token state may have changed. The policy is reader-preference: a
//! reader arriving while a writer waits may still enter as long as no
//! write token is held.

use std::collections::HashSet;

use metrics::counter;
use replicell_common::NodeId;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::NodeError;

/// Observable token state, exposed for the management API and tests.
#[derive(Debug, Clone, Default)]
pub struct TokenSnapshot {
    /// Current read-token holders, sorted by id.
    pub readers: Vec<NodeId>,
    /// Current write-token holder, if any.
    pub writer: Option<NodeId>,
}

#[derive(Debug, Default)]
struct TokenState {
    readers: HashSet<NodeId>,
    writer: Option<NodeId>,
}

impl TokenState {
    /// A read token is compatible when no write token is out, or the
    /// requester itself holds it.
    fn admits_reader(&self, requester: &NodeId) -> bool {
        match &self.writer {
            None => true,
            Some(holder) => holder == requester,
        }
    }

    /// A write token is compatible when no foreign reader and no
    /// foreign writer holds a token. Re-entrant for the current holder.
    fn admits_writer(&self, requester: &NodeId) -> bool {
        let readers_ok = self.readers.is_empty()
            || (self.readers.len() == 1 && self.readers.contains(requester));
        let writer_ok = match &self.writer {
            None => true,
            Some(holder) => holder == requester,
        };
        readers_ok && writer_ok
    }
}

/// Per-node token state machine.
///
/// All transitions happen under one mutex which is never held across a
/// network call or a wait.
#[derive(Debug)]
pub struct TokenCoordinator {
    state: Mutex<TokenState>,
    release_tx: watch::Sender<()>,
    release_rx: watch::Receiver<()>,
    shutdown: CancellationToken,
}

impl TokenCoordinator {
    /// Create a coordinator. The node that creates the replicated
    /// object seeds the write-holder slot with its own id; nodes that
    /// join an existing network start with both token sets empty.
    pub fn new(initial_writer: Option<NodeId>, shutdown: CancellationToken) -> Self {
        let (release_tx, release_rx) = watch::channel(());
        Self {
            state: Mutex::new(TokenState {
                readers: HashSet::new(),
                writer: initial_writer,
            }),
            release_tx,
            release_rx,
            shutdown,
        }
    }

    /// Block until the requester may hold a read token, then record it.
    pub async fn request_read_token(&self, requester: &NodeId) -> Result<(), NodeError> {
        self.wait_for_grant(requester, |state, id| {
            if state.admits_reader(id) {
                state.readers.insert(id.clone());
                true
            } else {
                false
            }
        })
        .await?;
        counter!("replicell_read_tokens_granted", 1);
        Ok(())
    }

    /// Drop the releaser from the read-holder set and wake waiters.
    /// A release by a node that holds no read token is a no-op.
    pub async fn release_read_token(&self, releaser: &NodeId) {
        let removed = {
            let mut state = self.state.lock().await;
            state.readers.remove(releaser)
        };
        if removed {
            self.release_tx.send_replace(());
        } else {
            debug!(releaser = %releaser, "read token release by non-holder ignored");
        }
    }

    /// Block until the requester may hold the write token, then set it.
    /// Immediate for the current holder.
    pub async fn request_write_token(&self, requester: &NodeId) -> Result<(), NodeError> {
        self.wait_for_grant(requester, |state, id| {
            if state.admits_writer(id) {
                state.writer = Some(id.clone());
                true
            } else {
                false
            }
        })
        .await?;
        counter!("replicell_write_tokens_granted", 1);
        Ok(())
    }

    /// Clear the write-holder slot if the releaser holds it and wake
    /// waiters; otherwise leave the slot untouched.
    pub async fn release_write_token(&self, releaser: &NodeId) {
        let released = {
            let mut state = self.state.lock().await;
            if state.writer.as_ref() == Some(releaser) {
                state.writer = None;
                true
            } else {
                false
            }
        };
        if released {
            self.release_tx.send_replace(());
        } else {
            debug!(releaser = %releaser, "write token release by non-holder ignored");
        }
    }

    /// Current token state. Best-effort: the state may change as soon
    /// as the lock is dropped.
    pub async fn snapshot(&self) -> TokenSnapshot {
        let state = self.state.lock().await;
        let mut readers: Vec<NodeId> = state.readers.iter().cloned().collect();
        readers.sort();
        TokenSnapshot {
            readers,
            writer: state.writer.clone(),
        }
    }

    /// Park until `admit` succeeds under the mutex. The receiver is
    /// cloned before the first check, so a release happening between
    /// the check and the wait is observed on the next `changed()`.
    /// On shutdown the wait aborts without mutating any token state.
    async fn wait_for_grant<F>(&self, requester: &NodeId, mut admit: F) -> Result<(), NodeError>
    where
        F: FnMut(&mut TokenState, &NodeId) -> bool,
    {
        let mut release = self.release_rx.clone();
        loop {
            {
                let mut state = self.state.lock().await;
                if admit(&mut state, requester) {
                    return Ok(());
                }
            }
            debug!(requester = %requester, "token request waiting for a release");
            tokio::select! {
                changed = release.changed() => {
                    if changed.is_err() {
                        return Err(NodeError::Cancelled);
                    }
                }
                _ = self.shutdown.cancelled() => {
                    debug!(requester = %requester, "token wait cancelled by shutdown");
                    return Err(NodeError::Cancelled);
                }
            }
        }
    }
}
