//! kelp-raft: Raft consensus core.
//!
//! The per-node state machine of a replicated state-machine framework:
//!
//! - Active-role handling of the inbound consensus RPCs (append, poll,
//!   vote), including term reconciliation, log-prefix matching, conflict
//!   truncation, and batched append
//! - Commit-index advancement and in-order application to the state machine
//! - Role transitions out of the active role (stepping down to follower)
//! - Replica assembly on a single serial executor per node
//!
//! Persistence ([`LogStore`]), the application target ([`StateMachine`]),
//! and the cluster view (`kelp_cluster::ClusterView`) are ports supplied by
//! the embedding process. Leader and candidate sub-states, wire transport,
//! and snapshot transfer live outside this crate.
//!
//! Based on the Raft paper (Ongaro & Ousterhout, 2014); membership tiers
//! and rebalancing are in `kelp-cluster`.

pub mod active;
pub mod apply;
pub mod config;
pub mod context;
pub mod error;
pub mod log;
pub mod node;
pub mod replica;
pub mod types;

pub use apply::{NullStateMachine, StateMachine};
pub use config::RaftConfig;
pub use context::RaftContext;
pub use error::{RaftError, Result};
pub use log::{LogStore, MemoryLog};
pub use node::{NodeMessage, RaftHandle, RaftNode};
pub use replica::{Replica, ReplicaBuilder};
pub use types::*;

// Membership identity is shared with the cluster crate.
pub use kelp_cluster::MemberId;
