//! Consensus error types.
//!
//! Protocol outcomes (stale term, log inconsistency, vote denied) are not
//! errors: they are encoded in response fields. `RaftError` covers the
//! embedding seams (storage, state machine, configuration, mailbox) and the
//! one fatal case, a violated log invariant.

use thiserror::Error;

use crate::types::LogIndex;

/// Consensus errors.
#[derive(Error, Debug)]
pub enum RaftError {
    /// Invalid configuration.
    #[error("configuration error: {reason}")]
    Config { reason: String },

    /// I/O error surfaced by an embedding component.
    #[error("I/O error: {source}")]
    Io {
        #[from]
        source: std::io::Error,
    },

    /// Log store failure.
    #[error("storage error: {reason}")]
    Storage { reason: String },

    /// State-machine commit failure. The applier logs this and keeps going;
    /// it is surfaced only so implementations can construct it.
    #[error("apply failed at {index}: {reason}")]
    Apply { index: LogIndex, reason: String },

    /// A log invariant was violated (slot/index mismatch, truncation below
    /// the commit index). Fatal: the node loop halts.
    #[error("log invariant violated: {reason}")]
    InvariantViolation { reason: String },

    /// The node mailbox is closed (replica shut down).
    #[error("node unavailable: {reason}")]
    Mailbox { reason: String },
}

/// Consensus result type.
pub type Result<T> = std::result::Result<T, RaftError>;
