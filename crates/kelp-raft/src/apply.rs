//! Commit application.
//!
//! Advances the commit index towards the leader's and delivers newly
//! committed entries to the state machine, strictly in index order.

use crate::context::RaftContext;
use crate::error::Result;
use crate::log::LogStore;
use crate::types::LogIndex;
use bytes::{Bytes, BytesMut};

/// State-machine application target.
///
/// `commit` receives the entry's key and payload and writes any command
/// result into `result`. Implementations own their durability: a returned
/// error is logged and swallowed here, and the applied index still advances,
/// so an implementation that cannot tolerate a lost apply must escalate
/// (e.g. abort the process) itself.
pub trait StateMachine: Send {
    fn commit(&mut self, key: &Bytes, payload: &Bytes, result: &mut BytesMut) -> Result<()>;
}

/// State machine that ignores every commit. Useful for pure-replication
/// nodes and tests.
#[derive(Debug, Default)]
pub struct NullStateMachine;

impl StateMachine for NullStateMachine {
    fn commit(&mut self, _key: &Bytes, _payload: &Bytes, _result: &mut BytesMut) -> Result<()> {
        Ok(())
    }
}

/// Advance the commit index towards `leader_commit` and apply newly
/// committed entries.
///
/// Runs when the leader's commit index is ahead of ours, or when a previous
/// pass left applies behind the commit index (an earlier state-machine
/// failure); re-running retries the remaining entries.
///
/// The new commit index is `min(max(leader_commit, commit_index),
/// last_index)`: never decreasing, never past the local log.
pub fn apply_commits(
    ctx: &mut RaftContext,
    log: &dyn LogStore,
    state_machine: &mut dyn StateMachine,
    leader_commit: LogIndex,
) -> Result<()> {
    if leader_commit == LogIndex::ZERO || log.is_empty() {
        return Ok(());
    }

    let behind = ctx.commit_index() == LogIndex::ZERO
        || leader_commit > ctx.commit_index()
        || ctx.commit_index() > ctx.last_applied();
    if !behind {
        return Ok(());
    }

    let last_index = log.last_index();
    let new_commit = LogIndex(
        leader_commit
            .as_u64()
            .max(ctx.commit_index().as_u64())
            .min(last_index.as_u64()),
    );
    ctx.set_commit_index(new_commit);

    if ctx.commit_index() > ctx.last_applied() {
        let from = ctx.last_applied().max(log.first_index());
        let to = ctx.commit_index().min(last_index);
        tracing::debug!(
            member = %ctx.local_id(),
            commit = %ctx.commit_index(),
            applied = %ctx.last_applied(),
            "applying commits"
        );
        for index in from.as_u64()..=to.as_u64() {
            apply_entry(ctx, log, state_machine, LogIndex(index))?;
        }
    }

    Ok(())
}

/// Apply a single entry if it is the next one in sequence.
///
/// Out-of-sequence indices are skipped; the range walked by `apply_commits`
/// starts at `max(last_applied, first_index)`, so its first index may be the
/// one already applied.
fn apply_entry(
    ctx: &mut RaftContext,
    log: &dyn LogStore,
    state_machine: &mut dyn StateMachine,
    index: LogIndex,
) -> Result<()> {
    let sequential = (ctx.last_applied() == LogIndex::ZERO && index == log.first_index())
        || (ctx.last_applied() != LogIndex::ZERO && ctx.last_applied().next() == index);
    if !sequential {
        return Ok(());
    }

    let Some(entry) = log.entry(index)? else {
        return Ok(());
    };

    if entry.kind.is_applied() {
        ctx.result_scratch.clear();
        if let Err(e) = state_machine.commit(&entry.key, &entry.payload, &mut ctx.result_scratch) {
            // Alignment between log and state machine is preserved by
            // advancing anyway; the state machine owns its durability.
            tracing::warn!(member = %ctx.local_id(), index = %index, error = %e, "failed to apply command");
        }
    }
    ctx.set_last_applied(index);
    Ok(())
}
