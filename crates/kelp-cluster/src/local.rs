//! In-process cluster view.
//!
//! Backs single-process deployments and tests. Mutations go through the same
//! [`ClusterView`] port a wire-backed implementation would offer, and every
//! change is published on the event channel.

use crate::{
    ClusterError, ClusterEvent, ClusterView, MemberId, MemberInfo, MemberKind, MemberStatus,
};
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 128;

/// In-process [`ClusterView`] implementation.
///
/// The member table is shared between the embedding process (which feeds
/// joins, leaves, and status changes from its failure detector) and the
/// rebalancer (which promotes and demotes). A `BTreeMap` keeps member
/// iteration in id order, which the rebalancer's deterministic selection
/// relies on.
pub struct LocalCluster {
    local_id: MemberId,
    members: RwLock<BTreeMap<MemberId, MemberInfo>>,
    leader: RwLock<MemberId>,
    event_tx: broadcast::Sender<ClusterEvent>,
}

impl LocalCluster {
    /// Create a view seeded with the given members.
    ///
    /// `local_id` must be one of the seeded members.
    pub fn new(local_id: MemberId, seed: impl IntoIterator<Item = MemberInfo>) -> Self {
        let members: BTreeMap<MemberId, MemberInfo> =
            seed.into_iter().map(|m| (m.id, m)).collect();
        debug_assert!(members.contains_key(&local_id));

        let (event_tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            local_id,
            members: RwLock::new(members),
            leader: RwLock::new(MemberId::NONE),
            event_tx,
        }
    }

    /// Add a member to the view.
    pub fn join(&self, member: MemberInfo) {
        self.members.write().insert(member.id, member);
        self.emit(ClusterEvent::Joined(member.id));
    }

    /// Remove a member from the view.
    pub fn leave(&self, id: MemberId) {
        if self.members.write().remove(&id).is_some() {
            self.emit(ClusterEvent::Left(id));
        }
    }

    /// Record an availability change observed by the failure detector.
    pub fn set_status(&self, id: MemberId, status: MemberStatus) {
        let changed = {
            let mut members = self.members.write();
            match members.get_mut(&id) {
                Some(m) if m.status != status => {
                    m.status = status;
                    true
                }
                _ => false,
            }
        };
        if changed {
            self.emit(ClusterEvent::StatusChanged { id, status });
        }
    }

    /// Record a leader election.
    pub fn set_leader(&self, id: MemberId) {
        *self.leader.write() = id;
        self.emit(ClusterEvent::LeaderElected(id));
    }

    fn set_kind(&self, id: MemberId, to: MemberKind) -> Result<(), ClusterError> {
        {
            let mut members = self.members.write();
            let member = members
                .get_mut(&id)
                .ok_or(ClusterError::UnknownMember { id })?;
            if member.kind == to {
                return Ok(());
            }
            member.kind = to;
        }
        tracing::debug!(member = %id, kind = %to, "member tier changed");
        self.emit(ClusterEvent::KindChanged { id, kind: to });
        Ok(())
    }

    fn emit(&self, event: ClusterEvent) {
        // Nobody listening is fine; the rebalancer may not be running.
        let _ = self.event_tx.send(event);
    }
}

#[async_trait]
impl ClusterView for LocalCluster {
    fn local_id(&self) -> MemberId {
        self.local_id
    }

    fn leader_id(&self) -> MemberId {
        *self.leader.read()
    }

    fn members(&self) -> Vec<MemberInfo> {
        self.members.read().values().copied().collect()
    }

    fn member(&self, id: MemberId) -> Option<MemberInfo> {
        self.members.read().get(&id).copied()
    }

    fn events(&self) -> broadcast::Receiver<ClusterEvent> {
        self.event_tx.subscribe()
    }

    async fn promote(&self, id: MemberId, to: MemberKind) -> Result<(), ClusterError> {
        self.set_kind(id, to)
    }

    async fn demote(&self, id: MemberId, to: MemberKind) -> Result<(), ClusterError> {
        self.set_kind(id, to)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn member(id: u64, kind: MemberKind) -> MemberInfo {
        MemberInfo::new(MemberId(id), kind, MemberStatus::Available)
    }

    #[tokio::test]
    async fn promote_updates_kind_and_emits() {
        let view = LocalCluster::new(
            MemberId(1),
            vec![member(1, MemberKind::Active), member(2, MemberKind::Reserve)],
        );
        let mut events = view.events();

        view.promote(MemberId(2), MemberKind::Passive).await.unwrap();

        assert_eq!(view.member(MemberId(2)).unwrap().kind, MemberKind::Passive);
        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::KindChanged {
                id: MemberId(2),
                kind: MemberKind::Passive
            }
        );
    }

    #[tokio::test]
    async fn promote_unknown_member_fails() {
        let view = LocalCluster::new(MemberId(1), vec![member(1, MemberKind::Active)]);
        let err = view.promote(MemberId(9), MemberKind::Active).await;
        assert!(matches!(err, Err(ClusterError::UnknownMember { .. })));
    }

    #[tokio::test]
    async fn status_change_emits_once() {
        let view = LocalCluster::new(MemberId(1), vec![member(1, MemberKind::Active)]);
        let mut events = view.events();

        view.set_status(MemberId(1), MemberStatus::Unavailable);
        view.set_status(MemberId(1), MemberStatus::Unavailable);

        assert_eq!(
            events.recv().await.unwrap(),
            ClusterEvent::StatusChanged {
                id: MemberId(1),
                status: MemberStatus::Unavailable
            }
        );
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn leader_election_visible_in_view() {
        let view = LocalCluster::new(MemberId(1), vec![member(1, MemberKind::Active)]);
        assert!(view.leader_id().is_none());
        view.set_leader(MemberId(1));
        assert_eq!(view.leader_id(), MemberId(1));
    }
}
