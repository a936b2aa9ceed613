//! Cluster membership for kelp.
//!
//! Tracks the set of members a replica knows about, their replication tier
//! and availability, and exposes the view port consumed by the consensus
//! core and the membership rebalancer.
//!
//! # Member tiers
//!
//! - [`MemberKind::Active`]: full voting member
//! - [`MemberKind::Promotable`]: voter-to-be, catching up with the log
//! - [`MemberKind::Passive`]: replicating non-voter (backup)
//! - [`MemberKind::Reserve`]: standby, not currently replicating
//!
//! # Modules
//!
//! - [`local`]: in-process [`ClusterView`] implementation
//! - [`rebalance`]: leader-driven promotion/demotion loop

pub mod local;
pub mod rebalance;

pub use local::LocalCluster;
pub use rebalance::{rebalance_loop, RebalanceAction, Rebalancer};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;

/// Member identifier (unique across the cluster).
///
/// Identifiers are non-zero; `0` is reserved as the "none" value used for
/// unknown leaders and cleared votes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MemberId(pub u64);

impl MemberId {
    pub const NONE: MemberId = MemberId(0);

    pub fn is_none(self) -> bool {
        self.0 == 0
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "M{}", self.0)
    }
}

/// Replication tier of a member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberKind {
    /// Full voting member.
    Active,

    /// Promoted towards voting; replicates and counts towards the voter
    /// population but is still catching up.
    Promotable,

    /// Replicating non-voter (backup).
    Passive,

    /// Standby member, not replicating.
    Reserve,
}

impl MemberKind {
    /// Whether this tier counts towards the voter population.
    pub fn is_voting(self) -> bool {
        matches!(self, MemberKind::Active | MemberKind::Promotable)
    }
}

impl fmt::Display for MemberKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemberKind::Active => write!(f, "active"),
            MemberKind::Promotable => write!(f, "promotable"),
            MemberKind::Passive => write!(f, "passive"),
            MemberKind::Reserve => write!(f, "reserve"),
        }
    }
}

/// Availability of a member as observed by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MemberStatus {
    Available,
    Unavailable,
}

/// Snapshot of a single member.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemberInfo {
    pub id: MemberId,
    pub kind: MemberKind,
    pub status: MemberStatus,
}

impl MemberInfo {
    pub fn new(id: MemberId, kind: MemberKind, status: MemberStatus) -> Self {
        Self { id, kind, status }
    }

    pub fn is_available(&self) -> bool {
        self.status == MemberStatus::Available
    }
}

/// Cluster change events.
///
/// Every mutation of the member table emits one of these; the rebalancer
/// re-evaluates the cluster on each.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterEvent {
    /// A member joined the cluster.
    Joined(MemberId),

    /// A member left the cluster.
    Left(MemberId),

    /// A member moved between replication tiers.
    KindChanged { id: MemberId, kind: MemberKind },

    /// A member's availability changed.
    StatusChanged { id: MemberId, status: MemberStatus },

    /// A new leader was elected.
    LeaderElected(MemberId),
}

/// Errors from cluster-view operations.
#[derive(Debug, thiserror::Error)]
pub enum ClusterError {
    /// The referenced member is not in the view.
    #[error("unknown member {id}")]
    UnknownMember { id: MemberId },

    /// A promote/demote that does not move towards the requested tier.
    #[error("invalid transition for {id}: {from} -> {to}")]
    InvalidTransition {
        id: MemberId,
        from: MemberKind,
        to: MemberKind,
    },

    /// Transport or bookkeeping failure inside a view implementation.
    #[error("cluster error: {reason}")]
    Internal { reason: String },
}

/// Cluster view port.
///
/// Supplied to the consensus core and the rebalancer by the embedding
/// process. Reads are synchronous snapshots; promote/demote are asynchronous
/// because a remote implementation coordinates them over the wire.
#[async_trait]
pub trait ClusterView: Send + Sync {
    /// This node's member id.
    fn local_id(&self) -> MemberId;

    /// The current leader, or [`MemberId::NONE`] when unknown.
    fn leader_id(&self) -> MemberId;

    /// Snapshot of all known members.
    fn members(&self) -> Vec<MemberInfo>;

    /// Snapshot of a single member, if known.
    fn member(&self, id: MemberId) -> Option<MemberInfo>;

    /// Whether the given id is a current member.
    fn contains(&self, id: MemberId) -> bool {
        self.member(id).is_some()
    }

    /// Subscribe to cluster change events.
    fn events(&self) -> broadcast::Receiver<ClusterEvent>;

    /// Move a member up to the given tier.
    async fn promote(&self, id: MemberId, to: MemberKind) -> Result<(), ClusterError>;

    /// Move a member down to the given tier.
    async fn demote(&self, id: MemberId, to: MemberKind) -> Result<(), ClusterError>;
}
