//! Core consensus types: terms, log indices, entries, RPC messages.

use bytes::Bytes;
use kelp_cluster::MemberId;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Raft term number (monotonically non-decreasing).
///
/// Terms are logical election epochs; each term has at most one leader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Term(pub u64);

impl Term {
    pub const ZERO: Term = Term(0);

    pub fn next(self) -> Term {
        Term(self.0 + 1)
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "T{}", self.0)
    }
}

/// Log index (1-indexed, 0 is the sentinel for "no index").
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LogIndex(pub u64);

impl LogIndex {
    pub const ZERO: LogIndex = LogIndex(0);

    pub fn next(self) -> LogIndex {
        LogIndex(self.0 + 1)
    }

    pub fn prev(self) -> Option<LogIndex> {
        if self.0 > 0 {
            Some(LogIndex(self.0 - 1))
        } else {
            None
        }
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for LogIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "I{}", self.0)
    }
}

/// Kind of a replicated log entry.
///
/// Only `Command` and `Tombstone` entries reach the state machine; the
/// remaining kinds advance the applied index without a side effect.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryKind {
    /// State-machine command.
    Command,

    /// State-machine deletion marker.
    Tombstone,

    /// Leader no-op (commit barrier after election).
    Noop,

    /// Cluster configuration entry.
    Config,
}

impl EntryKind {
    /// Whether entries of this kind are delivered to the state machine.
    pub fn is_applied(self) -> bool {
        matches!(self, EntryKind::Command | EntryKind::Tombstone)
    }
}

/// A replicated log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub index: LogIndex,
    pub term: Term,
    pub kind: EntryKind,
    pub key: Bytes,
    pub payload: Bytes,
}

impl LogEntry {
    pub fn new(index: LogIndex, term: Term, kind: EntryKind, key: Bytes, payload: Bytes) -> Self {
        Self {
            index,
            term,
            kind,
            key,
            payload,
        }
    }

    /// A no-op entry carrying no key or payload.
    pub fn noop(index: LogIndex, term: Term) -> Self {
        Self::new(index, term, EntryKind::Noop, Bytes::new(), Bytes::new())
    }
}

/// Response status.
///
/// Every response produced by this core is `Ok`; protocol-level outcomes
/// (stale term, log inconsistency, vote denied) are carried in the
/// response's own fields, and transport failures never reach a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ResponseStatus {
    Ok,
    Error,
}

/// AppendEntries RPC request.
///
/// Sent by the leader to replicate entries and/or as a heartbeat (empty
/// `entries`). `recycle_index` tells the follower which log prefix the
/// leader has compacted away.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendRequest {
    /// Leader's term.
    pub term: Term,

    /// Leader's id (so the follower can track the current leader).
    pub leader_id: MemberId,

    /// Index of the entry immediately preceding the batch; 0 for none.
    pub prev_log_index: LogIndex,

    /// Term of the entry at `prev_log_index`; 0 for none.
    pub prev_log_term: Term,

    /// Entries to store (empty for heartbeat).
    pub entries: Vec<LogEntry>,

    /// Leader's commit index.
    pub commit_index: LogIndex,

    /// Highest index whose storage may be released; 0 for none.
    pub recycle_index: LogIndex,
}

/// AppendEntries RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendResponse {
    pub status: ResponseStatus,

    /// Responder's current term, for the leader to update itself.
    pub term: Term,

    /// True if the consistency check passed and the batch was stored.
    pub succeeded: bool,

    /// Responder's last log index, for match tracking and backoff.
    pub log_index: LogIndex,
}

/// Pre-vote probe request.
///
/// A candidate-to-be polls the cluster before incrementing its term; the
/// probe is answered from the log alone and mutates nothing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollRequest {
    pub term: Term,
    pub candidate_id: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// Pre-vote probe response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollResponse {
    pub status: ResponseStatus,
    pub term: Term,
    pub accepted: bool,
}

/// RequestVote RPC request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: MemberId,
    pub last_log_index: LogIndex,
    pub last_log_term: Term,
}

/// RequestVote RPC response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub status: ResponseStatus,
    pub term: Term,
    pub voted: bool,
}

/// Role of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Follower => write!(f, "Follower"),
            Role::Candidate => write!(f, "Candidate"),
            Role::Leader => write!(f, "Leader"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn term_ordering() {
        assert!(Term(2) > Term(1));
        assert_eq!(Term(5).next(), Term(6));
        assert_eq!(Term(3).to_string(), "T3");
    }

    #[test]
    fn log_index_ordering() {
        assert!(LogIndex(10) > LogIndex(5));
        assert_eq!(LogIndex(5).next(), LogIndex(6));
        assert_eq!(LogIndex(5).prev(), Some(LogIndex(4)));
        assert_eq!(LogIndex(0).prev(), None);
    }

    #[test]
    fn applied_kinds() {
        assert!(EntryKind::Command.is_applied());
        assert!(EntryKind::Tombstone.is_applied());
        assert!(!EntryKind::Noop.is_applied());
        assert!(!EntryKind::Config.is_applied());
    }
}
