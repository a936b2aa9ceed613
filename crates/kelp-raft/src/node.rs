//! Serial executor for one node.
//!
//! All context and log mutation happens on a single task that owns the
//! state outright; inbound RPCs are handed to it through a mailbox and
//! answered over oneshot channels. Handlers therefore run without locks,
//! and callers on other tasks interact only through [`RaftHandle`].

use crate::active;
use crate::apply::StateMachine;
use crate::context::RaftContext;
use crate::error::{RaftError, Result};
use crate::log::LogStore;
use crate::types::{
    AppendRequest, AppendResponse, PollRequest, PollResponse, VoteRequest, VoteResponse,
};
use tokio::sync::{broadcast, mpsc, oneshot};

/// Mailbox envelope (tagged union of the inbound RPC types).
#[derive(Debug)]
pub enum NodeMessage {
    Append {
        request: AppendRequest,
        response_tx: oneshot::Sender<AppendResponse>,
    },
    Poll {
        request: PollRequest,
        response_tx: oneshot::Sender<PollResponse>,
    },
    Vote {
        request: VoteRequest,
        response_tx: oneshot::Sender<VoteResponse>,
    },
}

pub type NodeSender = mpsc::Sender<NodeMessage>;
pub type NodeReceiver = mpsc::Receiver<NodeMessage>;

/// Handle for submitting RPCs to a node's executor.
///
/// Cloneable; typically held by the transport layer. Requests are answered
/// in submission order.
#[derive(Clone)]
pub struct RaftHandle {
    tx: NodeSender,
}

impl RaftHandle {
    pub fn new(tx: NodeSender) -> Self {
        Self { tx }
    }

    pub async fn append(&self, request: AppendRequest) -> Result<AppendResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(NodeMessage::Append {
            request,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| closed())
    }

    pub async fn poll(&self, request: PollRequest) -> Result<PollResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(NodeMessage::Poll {
            request,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| closed())
    }

    pub async fn vote(&self, request: VoteRequest) -> Result<VoteResponse> {
        let (response_tx, response_rx) = oneshot::channel();
        self.send(NodeMessage::Vote {
            request,
            response_tx,
        })
        .await?;
        response_rx.await.map_err(|_| closed())
    }

    async fn send(&self, message: NodeMessage) -> Result<()> {
        self.tx.send(message).await.map_err(|_| closed())
    }
}

fn closed() -> RaftError {
    RaftError::Mailbox {
        reason: "node executor stopped".to_string(),
    }
}

/// A node's consensus state and its collaborators, owned by the executor
/// task.
pub struct RaftNode {
    context: RaftContext,
    log: Box<dyn LogStore>,
    state_machine: Box<dyn StateMachine>,
}

impl RaftNode {
    pub fn new(
        context: RaftContext,
        log: Box<dyn LogStore>,
        state_machine: Box<dyn StateMachine>,
    ) -> Self {
        Self {
            context,
            log,
            state_machine,
        }
    }

    /// Run the executor loop until shutdown, mailbox closure, or a fatal
    /// invariant violation.
    pub async fn run(mut self, mut rx: NodeReceiver, mut shutdown: broadcast::Receiver<()>) {
        loop {
            tokio::select! {
                message = rx.recv() => match message {
                    Some(message) => {
                        if let Err(e) = self.dispatch(message) {
                            // Responses encode every protocol outcome; an
                            // error here is a broken log invariant and the
                            // node cannot keep serving from it.
                            tracing::error!(member = %self.context.local_id(), error = %e, "fatal handler error, stopping node");
                            break;
                        }
                    }
                    None => {
                        tracing::debug!(member = %self.context.local_id(), "mailbox closed, stopping node");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::debug!(member = %self.context.local_id(), "node shutting down");
                    break;
                }
            }
        }
    }

    fn dispatch(&mut self, message: NodeMessage) -> Result<()> {
        match message {
            NodeMessage::Append {
                request,
                response_tx,
            } => {
                let response = active::handle_append(
                    &mut self.context,
                    self.log.as_mut(),
                    self.state_machine.as_mut(),
                    request,
                )?;
                // A dropped receiver means the caller gave up waiting;
                // the state change above still stands.
                let _ = response_tx.send(response);
            }
            NodeMessage::Poll {
                request,
                response_tx,
            } => {
                let response = active::handle_poll(&self.context, self.log.as_ref(), request)?;
                let _ = response_tx.send(response);
            }
            NodeMessage::Vote {
                request,
                response_tx,
            } => {
                let response =
                    active::handle_vote(&mut self.context, self.log.as_ref(), request)?;
                let _ = response_tx.send(response);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::NullStateMachine;
    use crate::log::MemoryLog;
    use crate::types::{LogIndex, Term};
    use kelp_cluster::{LocalCluster, MemberId, MemberInfo, MemberKind, MemberStatus};
    use std::sync::Arc;

    fn spawn_node() -> (RaftHandle, broadcast::Sender<()>) {
        let view = Arc::new(LocalCluster::new(
            MemberId(1),
            vec![MemberInfo::new(
                MemberId(1),
                MemberKind::Active,
                MemberStatus::Available,
            )],
        ));
        let node = RaftNode::new(
            RaftContext::new(MemberId(1), view),
            Box::new(MemoryLog::new()),
            Box::new(NullStateMachine),
        );
        let (tx, rx) = mpsc::channel(16);
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        tokio::spawn(node.run(rx, shutdown_rx));
        (RaftHandle::new(tx), shutdown_tx)
    }

    #[tokio::test]
    async fn heartbeat_round_trip() {
        let (handle, _shutdown) = spawn_node();

        let response = handle
            .append(AppendRequest {
                term: Term(1),
                leader_id: MemberId(7),
                prev_log_index: LogIndex::ZERO,
                prev_log_term: Term::ZERO,
                entries: vec![],
                commit_index: LogIndex::ZERO,
                recycle_index: LogIndex::ZERO,
            })
            .await
            .unwrap();

        assert!(response.succeeded);
        assert_eq!(response.term, Term(1));
    }

    #[tokio::test]
    async fn shutdown_closes_the_mailbox() {
        let (handle, shutdown) = spawn_node();
        shutdown.send(()).unwrap();
        // The executor races the signal; eventually calls fail with Mailbox.
        let mut saw_closed = false;
        for _ in 0..50 {
            let result = handle
                .poll(PollRequest {
                    term: Term(1),
                    candidate_id: MemberId(1),
                    last_log_index: LogIndex::ZERO,
                    last_log_term: Term::ZERO,
                })
                .await;
            if matches!(result, Err(RaftError::Mailbox { .. })) {
                saw_closed = true;
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(saw_closed);
    }
}
