//! Replica assembly.
//!
//! Wires a node's context, log, and state machine onto the serial executor
//! and attaches the membership rebalancer. All collaborators are injected
//! explicitly through the builder; nothing is discovered at runtime.

use crate::apply::StateMachine;
use crate::config::RaftConfig;
use crate::context::RaftContext;
use crate::error::{RaftError, Result};
use crate::log::{LogStore, MemoryLog};
use crate::node::{RaftHandle, RaftNode};
use crate::types::{
    AppendRequest, AppendResponse, PollRequest, PollResponse, VoteRequest, VoteResponse,
};
use kelp_cluster::{rebalance_loop, ClusterView, Rebalancer};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};

const MAILBOX_CAPACITY: usize = 256;

/// A running replica: the node executor plus its rebalancer.
pub struct Replica {
    handle: RaftHandle,
    shutdown_tx: broadcast::Sender<()>,
}

impl Replica {
    /// Start building a replica around the given cluster view.
    pub fn builder(cluster: Arc<dyn ClusterView>) -> ReplicaBuilder {
        ReplicaBuilder::new(cluster)
    }

    /// Handle for submitting inbound RPCs; clone it into the transport.
    pub fn handle(&self) -> RaftHandle {
        self.handle.clone()
    }

    pub async fn append(&self, request: AppendRequest) -> Result<AppendResponse> {
        self.handle.append(request).await
    }

    pub async fn poll(&self, request: PollRequest) -> Result<PollResponse> {
        self.handle.poll(request).await
    }

    pub async fn vote(&self, request: VoteRequest) -> Result<VoteResponse> {
        self.handle.vote(request).await
    }

    /// Stop the executor and the rebalance loop.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }
}

/// Builder for [`Replica`].
///
/// The cluster view is required up front; the log store and state machine
/// are injected with [`with_log`](Self::with_log) and
/// [`with_state_machine`](Self::with_state_machine). The quorum hint
/// defaults to the size of the view's current member list.
pub struct ReplicaBuilder {
    cluster: Arc<dyn ClusterView>,
    log: Option<Box<dyn LogStore>>,
    state_machine: Option<Box<dyn StateMachine>>,
    config: RaftConfig,
    quorum_hint: Option<usize>,
}

impl ReplicaBuilder {
    pub fn new(cluster: Arc<dyn ClusterView>) -> Self {
        Self {
            cluster,
            log: None,
            state_machine: None,
            config: RaftConfig::default(),
            quorum_hint: None,
        }
    }

    /// Use the given log store. Defaults to an in-memory log.
    pub fn with_log(mut self, log: Box<dyn LogStore>) -> Self {
        self.log = Some(log);
        self
    }

    /// Use the given state-machine application target.
    pub fn with_state_machine(mut self, state_machine: Box<dyn StateMachine>) -> Self {
        self.state_machine = Some(state_machine);
        self
    }

    /// Target number of voting members.
    pub fn with_quorum_hint(mut self, quorum_hint: usize) -> Self {
        self.quorum_hint = Some(quorum_hint);
        self
    }

    /// Passive backups to keep per voting member.
    pub fn with_backup_count(mut self, backup_count: usize) -> Self {
        self.config.backup_count = backup_count;
        self
    }

    /// Election timeout range.
    pub fn with_election_timeout(mut self, min: Duration, max: Duration) -> Self {
        self.config.election_timeout_min = min;
        self.config.election_timeout_max = max;
        self
    }

    /// Leader heartbeat interval.
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Client session timeout.
    pub fn with_session_timeout(mut self, timeout: Duration) -> Self {
        self.config.session_timeout = timeout;
        self
    }

    /// Validate the configuration, spawn the executor and the rebalance
    /// loop, and return the running replica.
    pub fn build(self) -> Result<Replica> {
        let mut config = self.config;
        config.quorum_hint = self
            .quorum_hint
            .unwrap_or_else(|| self.cluster.members().len());
        config.validate()?;

        let state_machine = self.state_machine.ok_or_else(|| RaftError::Config {
            reason: "state machine not configured".to_string(),
        })?;
        let log = self.log.unwrap_or_else(|| Box::new(MemoryLog::new()));

        let local_id = self.cluster.local_id();
        if !self.cluster.contains(local_id) {
            return Err(RaftError::Config {
                reason: format!("local member {} is not in the cluster view", local_id),
            });
        }

        let context = RaftContext::new(local_id, self.cluster.clone());
        let node = RaftNode::new(context, log, state_machine);

        let (tx, rx) = mpsc::channel(MAILBOX_CAPACITY);
        let (shutdown_tx, _) = broadcast::channel(4);

        tokio::spawn(node.run(rx, shutdown_tx.subscribe()));

        let rebalancer = Arc::new(Rebalancer::new(
            self.cluster,
            config.quorum_hint,
            config.backup_count,
        ));
        tokio::spawn(rebalance_loop(rebalancer, shutdown_tx.subscribe()));

        Ok(Replica {
            handle: RaftHandle::new(tx),
            shutdown_tx,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::apply::NullStateMachine;
    use crate::types::{LogIndex, Term};
    use kelp_cluster::{LocalCluster, MemberId, MemberInfo, MemberKind, MemberStatus};

    fn three_member_view() -> Arc<LocalCluster> {
        Arc::new(LocalCluster::new(
            MemberId(1),
            (1..=3).map(|id| {
                MemberInfo::new(MemberId(id), MemberKind::Active, MemberStatus::Available)
            }),
        ))
    }

    #[tokio::test]
    async fn builds_with_defaults() {
        let replica = Replica::builder(three_member_view())
            .with_state_machine(Box::new(NullStateMachine))
            .build()
            .unwrap();

        let response = replica
            .append(AppendRequest {
                term: Term(1),
                leader_id: MemberId(2),
                prev_log_index: LogIndex::ZERO,
                prev_log_term: Term::ZERO,
                entries: vec![],
                commit_index: LogIndex::ZERO,
                recycle_index: LogIndex::ZERO,
            })
            .await
            .unwrap();
        assert!(response.succeeded);

        replica.shutdown();
    }

    #[tokio::test]
    async fn missing_state_machine_is_a_config_error() {
        let result = Replica::builder(three_member_view()).build();
        assert!(matches!(result, Err(RaftError::Config { .. })));
    }

    #[tokio::test]
    async fn invalid_timeouts_rejected() {
        let result = Replica::builder(three_member_view())
            .with_state_machine(Box::new(NullStateMachine))
            .with_heartbeat_interval(Duration::from_millis(700))
            .build();
        assert!(matches!(result, Err(RaftError::Config { .. })));
    }
}
