//! Leader-driven membership rebalancing.
//!
//! The rebalancer keeps two population targets, derived from the replica
//! configuration:
//!
//! - voters (`Active` + `Promotable`): the quorum hint `Q`
//! - backups (`Passive`): `Q * backup_count`
//!
//! It runs only on the leader and re-evaluates the member table on every
//! cluster event. Each pass plans at most one promotion or demotion, applies
//! it through the view port, and re-reads the table, so concurrent joins and
//! failures observed between actions are folded into the next decision.
//!
//! Termination: every action shrinks the lexicographic potential
//! `(|voters - Q|, |passives - Q*B|, unavailable members in the voter set)`,
//! so a pass reaches a fixed point in finitely many steps.

use crate::{ClusterError, ClusterView, MemberId, MemberInfo, MemberKind, MemberStatus};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A single planned promotion or demotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceAction {
    Promote { id: MemberId, to: MemberKind },
    Demote { id: MemberId, to: MemberKind },
}

/// Leader-scoped control loop that moves members between tiers to hold the
/// configured voter and backup populations.
pub struct Rebalancer {
    view: Arc<dyn ClusterView>,
    quorum_hint: usize,
    backup_count: usize,
}

impl Rebalancer {
    /// `quorum_hint` is the target voter population, `backup_count` the
    /// number of passive backups to keep per voter.
    pub fn new(view: Arc<dyn ClusterView>, quorum_hint: usize, backup_count: usize) -> Self {
        Self {
            view,
            quorum_hint,
            backup_count,
        }
    }

    /// Plan the next action for the given member table, if any.
    pub fn plan(&self, members: &[MemberInfo]) -> Option<RebalanceAction> {
        plan_action(
            members,
            self.view.local_id(),
            self.quorum_hint,
            self.backup_count,
        )
    }

    /// Run rebalancing to a fixed point.
    ///
    /// No-op unless this node is the leader; leadership is re-checked before
    /// every action so a completion arriving after a role change cannot
    /// mutate the member table. Returns the number of actions applied.
    pub async fn rebalance(&self) -> Result<usize, ClusterError> {
        let mut steps = 0;
        loop {
            if self.view.leader_id() != self.view.local_id() {
                return Ok(steps);
            }

            let members = self.view.members();
            let Some(action) = self.plan(&members) else {
                return Ok(steps);
            };

            match action {
                RebalanceAction::Promote { id, to } => {
                    tracing::info!(member = %id, to = %to, "promoting member");
                    self.view.promote(id, to).await?;
                }
                RebalanceAction::Demote { id, to } => {
                    tracing::info!(member = %id, to = %to, "demoting member");
                    self.view.demote(id, to).await?;
                }
            }
            steps += 1;
        }
    }
}

/// Event loop driving the rebalancer.
///
/// Re-runs a rebalance pass on every cluster event (join, leave, tier
/// change, status change, leader election) until shutdown.
pub async fn rebalance_loop(rebalancer: Arc<Rebalancer>, mut shutdown: broadcast::Receiver<()>) {
    let mut events = rebalancer.view.events();

    // Initial pass: the cluster may already be out of shape at startup.
    if let Err(e) = rebalancer.rebalance().await {
        tracing::warn!(error = %e, "rebalance failed");
    }

    loop {
        tokio::select! {
            event = events.recv() => match event {
                Ok(_) => {
                    if let Err(e) = rebalancer.rebalance().await {
                        tracing::warn!(error = %e, "rebalance failed");
                    }
                }
                // Missed events only mean we re-read a fresher member table.
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                tracing::debug!("rebalance loop shutting down");
                break;
            }
        }
    }
}

/// Pure planning function over a member table snapshot.
///
/// Applies the first matching rule; selection is deterministic (lowest id,
/// preferring unavailable members for demotion) and never demotes the local
/// member, which is the leader whenever this runs.
fn plan_action(
    members: &[MemberInfo],
    local: MemberId,
    quorum_hint: usize,
    backup_count: usize,
) -> Option<RebalanceAction> {
    let voters: Vec<MemberInfo> = members.iter().filter(|m| m.kind.is_voting()).copied().collect();
    let passive: Vec<MemberInfo> = members
        .iter()
        .filter(|m| m.kind == MemberKind::Passive)
        .copied()
        .collect();
    let reserve: Vec<MemberInfo> = members
        .iter()
        .filter(|m| m.kind == MemberKind::Reserve)
        .copied()
        .collect();

    let available_voters = voters.iter().filter(|m| m.is_available()).count();
    let available_passive = passive.iter().filter(|m| m.is_available()).count();
    let available_reserve = reserve.iter().filter(|m| m.is_available()).count();
    let backup_target = quorum_hint * backup_count;

    // Voter population below quorum: pull a passive (preferred) or reserve
    // member into the voter set.
    if available_voters < quorum_hint {
        if let Some(id) = lowest_available(&passive) {
            return Some(RebalanceAction::Promote {
                id,
                to: MemberKind::Promotable,
            });
        }
        if let Some(id) = lowest_available(&reserve) {
            return Some(RebalanceAction::Promote {
                id,
                to: MemberKind::Promotable,
            });
        }
    }

    // Voter population above quorum: shed one, into the passive tier while
    // backups are short, otherwise all the way to reserve.
    if voters.len() > quorum_hint {
        let to = if available_passive < backup_target {
            MemberKind::Passive
        } else {
            MemberKind::Reserve
        };
        if let Some(id) = demotion_candidate(&voters, local) {
            return Some(RebalanceAction::Demote { id, to });
        }
    }

    // Backup population short: fill from the reserve tier.
    if available_passive < backup_target && available_reserve > 0 {
        if let Some(id) = lowest_available(&reserve) {
            return Some(RebalanceAction::Promote {
                id,
                to: MemberKind::Passive,
            });
        }
    }

    // Backup population over target: shed a passive member to reserve.
    if passive.len() > backup_target {
        if let Some(id) = demotion_candidate(&passive, local) {
            return Some(RebalanceAction::Demote {
                id,
                to: MemberKind::Reserve,
            });
        }
    }

    None
}

/// Lowest-id available member of a tier.
fn lowest_available(members: &[MemberInfo]) -> Option<MemberId> {
    members
        .iter()
        .filter(|m| m.is_available())
        .map(|m| m.id)
        .min()
}

/// Lowest-id unavailable member, else lowest-id member; never the local one.
fn demotion_candidate(members: &[MemberInfo], local: MemberId) -> Option<MemberId> {
    let eligible = || members.iter().filter(|m| m.id != local);
    eligible()
        .filter(|m| m.status == MemberStatus::Unavailable)
        .map(|m| m.id)
        .min()
        .or_else(|| eligible().map(|m| m.id).min())
}
