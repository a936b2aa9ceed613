//! Rebalancer integration tests.
//!
//! Drives the rebalancer against an in-process cluster view and checks the
//! promotion/demotion sequences, leader gating, and fixed-point behavior.

use kelp_cluster::{
    rebalance_loop, ClusterView, LocalCluster, MemberId, MemberInfo, MemberKind, MemberStatus,
    Rebalancer,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn member(id: u64, kind: MemberKind, status: MemberStatus) -> MemberInfo {
    MemberInfo::new(MemberId(id), kind, status)
}

/// Q=3, B=1; three actives (one unavailable) and one available reserve.
fn degraded_view() -> Arc<LocalCluster> {
    let view = Arc::new(LocalCluster::new(
        MemberId(1),
        vec![
            member(1, MemberKind::Active, MemberStatus::Available),
            member(2, MemberKind::Active, MemberStatus::Available),
            member(3, MemberKind::Active, MemberStatus::Unavailable),
            member(4, MemberKind::Reserve, MemberStatus::Available),
        ],
    ));
    view.set_leader(MemberId(1));
    view
}

#[tokio::test]
async fn degraded_quorum_recovers_through_reserve() {
    let view = degraded_view();
    let rebalancer = Rebalancer::new(view.clone(), 3, 1);

    let steps = rebalancer.rebalance().await.unwrap();

    // The reserve is pulled into the voter set, and the unavailable voter
    // is pushed out into the (short) backup tier.
    assert_eq!(steps, 2);
    assert_eq!(view.member(MemberId(4)).unwrap().kind, MemberKind::Promotable);
    assert_eq!(view.member(MemberId(3)).unwrap().kind, MemberKind::Passive);
    assert_eq!(view.member(MemberId(1)).unwrap().kind, MemberKind::Active);
    assert_eq!(view.member(MemberId(2)).unwrap().kind, MemberKind::Active);
}

#[tokio::test]
async fn catch_up_promotion_reaches_a_fixed_point() {
    let view = degraded_view();
    let rebalancer = Rebalancer::new(view.clone(), 3, 1);
    rebalancer.rebalance().await.unwrap();

    // Catch-up finished: the leader's replication machinery turns the
    // promotable member into a full voter.
    view.promote(MemberId(4), MemberKind::Active).await.unwrap();

    let steps = rebalancer.rebalance().await.unwrap();
    assert_eq!(steps, 0);
}

#[tokio::test]
async fn non_leader_does_not_rebalance() {
    let view = degraded_view();
    view.set_leader(MemberId(2));
    let rebalancer = Rebalancer::new(view.clone(), 3, 1);

    let steps = rebalancer.rebalance().await.unwrap();

    assert_eq!(steps, 0);
    assert_eq!(view.member(MemberId(4)).unwrap().kind, MemberKind::Reserve);
}

#[tokio::test]
async fn surplus_voters_feed_the_backup_tier() {
    let view = Arc::new(LocalCluster::new(
        MemberId(1),
        vec![
            member(1, MemberKind::Active, MemberStatus::Available),
            member(2, MemberKind::Active, MemberStatus::Available),
            member(3, MemberKind::Active, MemberStatus::Available),
            member(4, MemberKind::Active, MemberStatus::Available),
            member(5, MemberKind::Active, MemberStatus::Available),
        ],
    ));
    view.set_leader(MemberId(1));
    let rebalancer = Rebalancer::new(view.clone(), 3, 0);

    let steps = rebalancer.rebalance().await.unwrap();

    // Two surplus voters shed to reserve (B=0 means no backup target),
    // lowest ids first, never the leader.
    assert_eq!(steps, 2);
    assert_eq!(view.member(MemberId(1)).unwrap().kind, MemberKind::Active);
    assert_eq!(view.member(MemberId(2)).unwrap().kind, MemberKind::Reserve);
    assert_eq!(view.member(MemberId(3)).unwrap().kind, MemberKind::Reserve);
    assert_eq!(view.member(MemberId(4)).unwrap().kind, MemberKind::Active);
    assert_eq!(view.member(MemberId(5)).unwrap().kind, MemberKind::Active);
}

#[tokio::test]
async fn rebalance_loop_reacts_to_member_failure() {
    let view = Arc::new(LocalCluster::new(
        MemberId(1),
        vec![
            member(1, MemberKind::Active, MemberStatus::Available),
            member(2, MemberKind::Active, MemberStatus::Available),
            member(3, MemberKind::Active, MemberStatus::Available),
            member(4, MemberKind::Passive, MemberStatus::Available),
        ],
    ));
    view.set_leader(MemberId(1));

    let rebalancer = Arc::new(Rebalancer::new(view.clone(), 3, 1));
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let loop_task = tokio::spawn(rebalance_loop(rebalancer, shutdown_rx));

    // A voter fails; the loop should pull the passive member in.
    view.set_status(MemberId(2), MemberStatus::Unavailable);

    let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
    loop {
        if view.member(MemberId(4)).unwrap().kind == MemberKind::Promotable {
            break;
        }
        assert!(tokio::time::Instant::now() < deadline, "rebalance did not react");
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    shutdown_tx.send(()).unwrap();
    loop_task.await.unwrap();
}
