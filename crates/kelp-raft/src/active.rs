//! Active-role RPC handlers.
//!
//! A node in an active (non-leader) role answers the three inbound
//! consensus RPCs:
//!
//! - append: reconcile terms, match the log prefix, store the batch,
//!   advance commits, recycle the compacted prefix
//! - poll: pre-vote probe, answered from the log without mutating anything
//! - vote: grant at most one vote per term, to an up-to-date known candidate
//!
//! Handlers are synchronous functions over the node-owned context and log;
//! the serial executor in [`crate::node`] is what makes them safe to call
//! without locks. Protocol rejections are encoded in the response; an `Err`
//! means a violated log invariant and is fatal to the node.

use crate::apply::{apply_commits, StateMachine};
use crate::context::RaftContext;
use crate::error::{RaftError, Result};
use crate::log::LogStore;
use crate::types::{
    AppendRequest, AppendResponse, LogEntry, LogIndex, PollRequest, PollResponse, ResponseStatus,
    Role, Term, VoteRequest, VoteResponse,
};

/// Handle an AppendEntries request.
///
/// A term ahead of ours (or a first sighting of the current term's leader)
/// adopts the sender as leader and steps this node down to follower once
/// the request has been answered.
pub fn handle_append(
    ctx: &mut RaftContext,
    log: &mut dyn LogStore,
    state_machine: &mut dyn StateMachine,
    request: AppendRequest,
) -> Result<AppendResponse> {
    let mut transition = false;
    if request.term > ctx.current_term()
        || (request.term == ctx.current_term() && ctx.leader_id().is_none())
    {
        ctx.set_term(request.term);
        ctx.set_leader(request.leader_id);
        transition = true;
    }

    let response = if request.term < ctx.current_term() {
        // Stale leader; it will observe our term and step down.
        tracing::warn!(
            member = %ctx.local_id(),
            term = %request.term,
            current = %ctx.current_term(),
            "rejected append: request term is less than the current term"
        );
        rejection(ctx, log)
    } else if request.prev_log_index != LogIndex::ZERO && request.prev_log_term != Term::ZERO {
        check_previous_entry(ctx, log, state_machine, request)?
    } else {
        append_entries(ctx, log, state_machine, request)?
    };

    if transition {
        ctx.transition(Role::Follower);
    }
    Ok(response)
}

/// Consistency check against the entry preceding the batch.
fn check_previous_entry(
    ctx: &mut RaftContext,
    log: &mut dyn LogStore,
    state_machine: &mut dyn StateMachine,
    request: AppendRequest,
) -> Result<AppendResponse> {
    if log.is_empty() || request.prev_log_index > log.last_index() {
        tracing::warn!(
            member = %ctx.local_id(),
            prev = %request.prev_log_index,
            last = %log.last_index(),
            "rejected append: previous index is beyond the local log"
        );
        return Ok(rejection(ctx, log));
    }

    match log.entry(request.prev_log_index)? {
        Some(entry) if entry.term == request.prev_log_term => {
            append_entries(ctx, log, state_machine, request)
        }
        Some(entry) => {
            tracing::warn!(
                member = %ctx.local_id(),
                prev = %request.prev_log_index,
                local_term = %entry.term,
                request_term = %request.prev_log_term,
                "rejected append: previous entry term does not match"
            );
            Ok(rejection(ctx, log))
        }
        None => {
            // Slot exists but is unreadable (skipped or recycled): nothing
            // to match against.
            tracing::warn!(
                member = %ctx.local_id(),
                prev = %request.prev_log_index,
                "rejected append: previous entry is not readable"
            );
            Ok(rejection(ctx, log))
        }
    }
}

/// Store the batch, then advance commits and recycle.
///
/// Append is idempotent: an entry already present with the same term is
/// left in place, so replayed batches converge on the same log. A present
/// entry with a different term marks the start of a divergent suffix, which
/// is truncated and replaced.
fn append_entries(
    ctx: &mut RaftContext,
    log: &mut dyn LogStore,
    state_machine: &mut dyn StateMachine,
    request: AppendRequest,
) -> Result<AppendResponse> {
    for entry in &request.entries {
        if log.contains(entry.index) {
            match log.entry(entry.index)? {
                Some(existing) if existing.term == entry.term => {
                    // Duplicate of what we already hold.
                }
                _ => {
                    tracing::warn!(
                        member = %ctx.local_id(),
                        index = %entry.index,
                        "appended entry term does not match local log, removing divergent suffix"
                    );
                    replace_suffix(ctx, log, entry)?;
                }
            }
        } else {
            let last = log.last_index();
            if entry.index > last.next() {
                log.skip(entry.index.as_u64() - last.as_u64() - 1)?;
            }
            write_at(ctx, log, entry)?;
        }
    }

    apply_commits(ctx, log, state_machine, request.commit_index)?;

    if request.recycle_index > LogIndex::ZERO {
        log.recycle(request.recycle_index)?;
    }

    Ok(AppendResponse {
        status: ResponseStatus::Ok,
        term: ctx.current_term(),
        succeeded: true,
        log_index: log.last_index(),
    })
}

/// Truncate the divergent suffix starting at `entry.index` and write the
/// replacement.
///
/// Refuses to drop committed entries: a conformant leader never sends a
/// conflicting entry at or below the commit index, so hitting one means the
/// log and context have come apart.
fn replace_suffix(ctx: &RaftContext, log: &mut dyn LogStore, entry: &LogEntry) -> Result<()> {
    let retained = entry.index.prev().unwrap_or(LogIndex::ZERO);
    if retained < ctx.commit_index() {
        return Err(RaftError::InvariantViolation {
            reason: format!(
                "truncation to {} would drop committed entries (commit index {})",
                retained,
                ctx.commit_index()
            ),
        });
    }
    log.truncate(retained)?;
    write_at(ctx, log, entry)
}

/// Append `entry` and verify it landed on its own index.
fn write_at(ctx: &RaftContext, log: &mut dyn LogStore, entry: &LogEntry) -> Result<()> {
    let assigned = log.append(entry.clone())?;
    if assigned != entry.index {
        return Err(RaftError::InvariantViolation {
            reason: format!("entry {} landed at slot {}", entry.index, assigned),
        });
    }
    tracing::debug!(member = %ctx.local_id(), index = %assigned, "appended entry to log");
    Ok(())
}

/// Stale-term / failed-consistency response.
fn rejection(ctx: &RaftContext, log: &dyn LogStore) -> AppendResponse {
    AppendResponse {
        status: ResponseStatus::Ok,
        term: ctx.current_term(),
        succeeded: false,
        log_index: log.last_index(),
    }
}

/// Handle a pre-vote probe.
///
/// Answered purely from the log: accepts iff the candidate's log is at
/// least as up-to-date as ours. Neither the term nor the recorded vote is
/// touched, which is what makes polling safe to do before an election.
pub fn handle_poll(
    ctx: &RaftContext,
    log: &dyn LogStore,
    request: PollRequest,
) -> Result<PollResponse> {
    let accepted = log_up_to_date(ctx, log, request.last_log_index, request.last_log_term)?;
    Ok(PollResponse {
        status: ResponseStatus::Ok,
        term: ctx.current_term(),
        accepted,
    })
}

/// Handle a RequestVote request.
pub fn handle_vote(
    ctx: &mut RaftContext,
    log: &dyn LogStore,
    request: VoteRequest,
) -> Result<VoteResponse> {
    // A higher term moves us into the new election epoch (and clears any
    // vote recorded for the old one) before the grant decision is made.
    if request.term > ctx.current_term() {
        ctx.set_term(request.term);
    }

    let voted = if request.term < ctx.current_term() {
        tracing::debug!(
            member = %ctx.local_id(),
            candidate = %request.candidate_id,
            term = %request.term,
            "rejected vote: candidate's term is less than the current term"
        );
        false
    } else if request.candidate_id == ctx.local_id() {
        // Votes for self are routed through the local node.
        ctx.vote_for(request.candidate_id);
        true
    } else if !ctx.cluster().contains(request.candidate_id) {
        tracing::debug!(
            member = %ctx.local_id(),
            candidate = %request.candidate_id,
            "rejected vote: candidate is not a known member"
        );
        false
    } else if ctx.last_voted_for().is_none() || ctx.last_voted_for() == request.candidate_id {
        if log_up_to_date(ctx, log, request.last_log_index, request.last_log_term)? {
            ctx.vote_for(request.candidate_id);
            true
        } else {
            false
        }
    } else {
        tracing::debug!(
            member = %ctx.local_id(),
            candidate = %request.candidate_id,
            voted_for = %ctx.last_voted_for(),
            "rejected vote: already voted in this term"
        );
        false
    };

    Ok(VoteResponse {
        status: ResponseStatus::Ok,
        term: ctx.current_term(),
        voted,
    })
}

/// Whether a candidate's log is at least as up-to-date as the local log.
///
/// Canonical Raft ordering on `(last term, last index)`: a higher last term
/// wins outright; on equal terms the longer log wins. An empty local log,
/// or one whose tail has been recycled, accepts any candidate.
fn log_up_to_date(
    ctx: &RaftContext,
    log: &dyn LogStore,
    index: LogIndex,
    term: Term,
) -> Result<bool> {
    if log.is_empty() {
        return Ok(true);
    }

    let last_index = log.last_index();
    let Some(last) = log.entry(last_index)? else {
        return Ok(true);
    };

    if term > last.term || (term == last.term && index >= last_index) {
        Ok(true)
    } else {
        tracing::debug!(
            member = %ctx.local_id(),
            candidate_last = %index,
            candidate_term = %term,
            local_last = %last_index,
            local_term = %last.term,
            "candidate's log is not up-to-date"
        );
        Ok(false)
    }
}
