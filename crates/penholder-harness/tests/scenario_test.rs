//! End-to-end session scenarios on both relay topologies.
//!
//! Each scenario runs on a host-relayed star and on a full mesh, across
//! several seeds with links interleaving randomly.

use penholder_core::{CoordinatorAction, CoordinatorError, Relay};
use penholder_harness::{FaultConfig, SimWorld};
use penholder_proto::Username;

const SEEDS: std::ops::Range<u64> = 0..16;

fn name(raw: &str) -> Username {
    Username::new(raw).expect("valid username")
}

fn users(names: &[&str]) -> Vec<Username> {
    names.iter().map(|n| name(n)).collect()
}

/// Host `alice` on peer 0 and join the rest in order.
fn session<R: Relay>(mut world: SimWorld<R>, names: &[&str]) -> SimWorld<R> {
    world.op(0, |c| c.host_session("alice")).expect("host");
    world.settle();
    for (i, username) in names.iter().enumerate() {
        world.op(i + 1, |c| c.join_session(username)).expect("join");
        world.settle();
    }
    world
}

fn replica_users<R: Relay>(world: &SimWorld<R>, i: usize) -> Vec<Username> {
    world.snapshot(i).expect("in session").users.iter().cloned().collect()
}

fn host_join_give<R: Relay>(world: SimWorld<R>) {
    let mut world = session(world, &["bob"]);

    for i in 0..2 {
        assert_eq!(replica_users(&world, i), users(&["alice", "bob"]));
        assert_eq!(world.editor_of(i), Some(&name("alice")));
    }

    world.op(0, |c| c.give_access("bob")).expect("give");
    world.settle();

    for i in 0..2 {
        assert_eq!(world.editor_of(i), Some(&name("bob")));
    }
    assert!(world.converged());
}

fn force_take<R: Relay>(world: SimWorld<R>) {
    let mut world = session(world, &["bob"]);
    world.take_events(0);

    world.op(1, |c| c.force_take_access()).expect("force");
    world.settle();

    for i in 0..2 {
        assert_eq!(world.editor_of(i), Some(&name("bob")));
    }
    assert!(world.take_events(0).iter().any(|a| matches!(
        a,
        CoordinatorAction::EditorChanged { forced: true, to, .. } if *to == name("bob")
    )));
}

fn editor_leaves<R: Relay>(world: SimWorld<R>) {
    let mut world = session(world, &["bob", "carol"]);

    world.op(0, |c| c.give_access("bob")).expect("give");
    world.settle();
    world.op(1, |c| c.leave_session()).expect("leave");
    world.settle();

    assert!(world.snapshot(1).is_none());
    for i in [0, 2] {
        assert_eq!(world.editor_of(i), Some(&name("alice")));
        assert_eq!(replica_users(&world, i), users(&["alice", "carol"]));
    }
    world.check_invariants().expect("invariants");
}

fn duplicate_name<R: Relay>(world: SimWorld<R>) {
    let mut world = session(world, &["bob"]);
    let before = world.snapshot(0).cloned();

    world.op(2, |c| c.join_session("bob")).expect("join sent");
    world.settle();

    assert!(world.snapshot(2).is_none());
    assert!(!world.peer(2).is_joining());
    assert!(world.take_events(2).iter().any(|a| matches!(
        a,
        CoordinatorAction::JoinFailed(CoordinatorError::NameTaken { username }) if *username == name("bob")
    )));
    assert_eq!(world.snapshot(0).cloned(), before);
    assert_eq!(replica_users(&world, 1), users(&["alice", "bob"]));
}

#[test]
fn scenario_a_host_join_give() {
    for seed in SEEDS {
        host_join_give(SimWorld::star(2, FaultConfig::REORDER, seed));
        host_join_give(SimWorld::mesh(2, FaultConfig::REORDER, seed));
    }
}

#[test]
fn scenario_b_force_take() {
    for seed in SEEDS {
        force_take(SimWorld::star(2, FaultConfig::REORDER, seed));
        force_take(SimWorld::mesh(2, FaultConfig::REORDER, seed));
    }
}

#[test]
fn scenario_c_editor_leaves() {
    for seed in SEEDS {
        editor_leaves(SimWorld::star(3, FaultConfig::REORDER, seed));
        editor_leaves(SimWorld::mesh(3, FaultConfig::REORDER, seed));
    }
}

#[test]
fn scenario_d_duplicate_name() {
    for seed in SEEDS {
        duplicate_name(SimWorld::star(3, FaultConfig::REORDER, seed));
        duplicate_name(SimWorld::mesh(3, FaultConfig::REORDER, seed));
    }
}
