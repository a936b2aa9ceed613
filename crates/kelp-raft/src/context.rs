//! Per-node consensus state.
//!
//! One `RaftContext` exists per node and is owned by the node's serial
//! executor; handlers borrow it mutably, so no locking is involved. It
//! outlives any single role: a transition preserves the term, leader, vote,
//! and both progress indices.

use crate::types::{LogIndex, Role, Term};
use bytes::BytesMut;
use kelp_cluster::{ClusterView, MemberId};
use std::sync::Arc;

/// Shared mutable state of one node.
pub struct RaftContext {
    local_id: MemberId,
    cluster: Arc<dyn ClusterView>,
    current_term: Term,
    leader_id: MemberId,
    last_voted_for: MemberId,
    commit_index: LogIndex,
    last_applied: LogIndex,
    role: Role,

    /// Scratch buffer handed to the state machine for command results.
    /// Owned per context so concurrent nodes in one process never share it.
    pub(crate) result_scratch: BytesMut,
}

impl RaftContext {
    /// Create a fresh context for `local_id`, starting as a follower at
    /// term 0.
    pub fn new(local_id: MemberId, cluster: Arc<dyn ClusterView>) -> Self {
        Self {
            local_id,
            cluster,
            current_term: Term::ZERO,
            leader_id: MemberId::NONE,
            last_voted_for: MemberId::NONE,
            commit_index: LogIndex::ZERO,
            last_applied: LogIndex::ZERO,
            role: Role::Follower,
            result_scratch: BytesMut::new(),
        }
    }

    pub fn local_id(&self) -> MemberId {
        self.local_id
    }

    pub fn cluster(&self) -> &Arc<dyn ClusterView> {
        &self.cluster
    }

    pub fn current_term(&self) -> Term {
        self.current_term
    }

    pub fn leader_id(&self) -> MemberId {
        self.leader_id
    }

    pub fn last_voted_for(&self) -> MemberId {
        self.last_voted_for
    }

    pub fn commit_index(&self) -> LogIndex {
        self.commit_index
    }

    pub fn last_applied(&self) -> LogIndex {
        self.last_applied
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// Advance the current term.
    ///
    /// Monotonic: a lower or equal term is ignored. Advancing the term
    /// clears `last_voted_for`, since the vote belongs to the old election
    /// epoch.
    pub fn set_term(&mut self, term: Term) {
        if term > self.current_term {
            tracing::debug!(member = %self.local_id, term = %term, "term advanced");
            self.current_term = term;
            self.last_voted_for = MemberId::NONE;
        }
    }

    pub fn set_leader(&mut self, leader: MemberId) {
        if self.leader_id != leader {
            tracing::debug!(member = %self.local_id, leader = %leader, "leader changed");
            self.leader_id = leader;
        }
    }

    /// Record a vote for the given candidate in the current term.
    pub fn vote_for(&mut self, candidate: MemberId) {
        self.last_voted_for = candidate;
    }

    pub fn set_commit_index(&mut self, index: LogIndex) {
        debug_assert!(index >= self.commit_index);
        self.commit_index = index;
    }

    /// Record that the entry at `index` has been delivered (or skipped as a
    /// non-command kind).
    pub fn set_last_applied(&mut self, index: LogIndex) {
        debug_assert!(
            self.last_applied == LogIndex::ZERO || index == self.last_applied.next(),
            "apply order violated: {} after {}",
            index,
            self.last_applied
        );
        self.last_applied = index;
    }

    /// Transition to a new role. Idempotent when already in it.
    pub fn transition(&mut self, role: Role) {
        if self.role == role {
            return;
        }
        tracing::info!(member = %self.local_id, from = %self.role, to = %role, "role transition");
        self.role = role;
    }
}
