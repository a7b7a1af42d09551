//! Model-based property tests.
//!
//! Random operation sequences run against the reference model and against
//! real coordinators on a simulated star or mesh network. The network is
//! settled after every operation, so both sides must agree on every result
//! and on what every peer shows.
//!
//! The mesh is also driven without settling: membership changes stay in
//! flight around each token operation, and the replicas must still agree
//! once everything is delivered.
//!
//! ```text
//! proptest generates: Vec<Operation>
//!                          │
//!           ┌──────────────┼──────────────┐
//!           ▼              ▼              ▼
//!      ModelWorld    RealWorld       Compare
//!      (reference)   (SimWorld)      results + views
//! ```

use std::time::Duration;

use penholder_core::{CoordinatorConfig, MeshRelay, PromptOutcome, Relay};
use penholder_harness::{
    FaultConfig, ModelWorld, Operation, OperationResult, PeerView, SimWorld,
    model::{HOST_NAME, NAMES, NameChoice, OperationError},
};
use proptest::prelude::*;

/// Real coordinators behind the model's interface.
struct RealWorld<R: Relay> {
    world: SimWorld<R>,
}

impl<R: Relay> RealWorld<R> {

    fn apply(&mut self, op: &Operation) -> OperationResult {
        let result: OperationResult = match *op {
            Operation::Host { peer } => {
                self.world.op(usize::from(peer), |c| c.host_session(HOST_NAME)).into()
            },
            Operation::Join { peer, name } => {
                self.world.op(usize::from(peer), |c| c.join_session(name.name())).into()
            },
            Operation::Give { peer, target } => {
                self.world.op(usize::from(peer), |c| c.give_access(target.name())).into()
            },
            Operation::Request { peer } => {
                self.world.op(usize::from(peer), |c| c.request_access()).into()
            },
            Operation::Accept { peer } => self.answer(usize::from(peer), PromptOutcome::Accept),
            Operation::Decline { peer } => self.answer(usize::from(peer), PromptOutcome::Decline),
            Operation::Force { peer } => {
                self.world.op(usize::from(peer), |c| c.force_take_access()).into()
            },
            Operation::Leave { peer } => {
                self.world.op(usize::from(peer), |c| c.leave_session()).into()
            },
            Operation::End { peer } => self.world.op(usize::from(peer), |c| c.end_session()).into(),
            Operation::ExpireJoins => {
                self.world.advance(CoordinatorConfig::default().join_timeout + Duration::from_millis(1));
                OperationResult::Ok
            },
        };

        self.world.settle();
        result
    }

    /// Answer the first prompt, like the console's bare `accept`/`decline`.
    fn answer(&mut self, peer: usize, outcome: PromptOutcome) -> OperationResult {
        let Some(requester) = self.world.peer(peer).pending_requests().first().cloned() else {
            return OperationResult::Error(OperationError::NoPendingRequest);
        };
        self.world.op(peer, |c| c.answer_access_request(&requester, outcome)).into()
    }

    fn observable_state(&self) -> Vec<PeerView> {
        (0..self.world.len())
            .map(|i| {
                let peer = self.world.peer(i);
                if peer.is_joining() {
                    return PeerView::Joining;
                }
                match (peer.snapshot(), peer.local_user()) {
                    (Some(snapshot), Some(me)) => PeerView::Active {
                        me: me.to_string(),
                        editor: snapshot.editor.to_string(),
                        users: snapshot.users.iter().map(ToString::to_string).collect(),
                        pending: peer.pending_requests().iter().map(ToString::to_string).collect(),
                    },
                    _ => PeerView::Idle,
                }
            })
            .collect()
    }
}

/// Membership churn around one token operation on the mesh.
#[derive(Debug, Clone)]
struct Burst {
    joins: Vec<usize>,
    leave: Option<usize>,
    /// Frames delivered before the token operation.
    steps: usize,
    actor: usize,
    /// Give to this peer's name, or force-take when unset.
    give_to: Option<usize>,
}

const MESH_PEERS: usize = 4;

fn guest_name(peer: usize) -> &'static str {
    NAMES[peer % NAMES.len()]
}

fn burst_strategy() -> impl Strategy<Value = Burst> {
    (
        prop::collection::vec(1..MESH_PEERS, 0..3),
        prop::option::of(1..MESH_PEERS),
        0..24usize,
        0..MESH_PEERS,
        prop::option::of(0..MESH_PEERS),
    )
        .prop_map(|(joins, leave, steps, actor, give_to)| Burst { joins, leave, steps, actor, give_to })
}

/// Strategy for generating operations. Peer indices are clamped later.
fn operation_strategy(max_peers: u8) -> impl Strategy<Value = Operation> {
    let peer = 0..max_peers;
    let name = (0..4u8).prop_map(NameChoice);

    prop_oneof![
        1 => peer.clone().prop_map(|peer| Operation::Host { peer }),
        4 => (peer.clone(), name.clone()).prop_map(|(peer, name)| Operation::Join { peer, name }),
        3 => (peer.clone(), name).prop_map(|(peer, target)| Operation::Give { peer, target }),
        3 => peer.clone().prop_map(|peer| Operation::Request { peer }),
        2 => peer.clone().prop_map(|peer| Operation::Accept { peer }),
        1 => peer.clone().prop_map(|peer| Operation::Decline { peer }),
        2 => peer.clone().prop_map(|peer| Operation::Force { peer }),
        2 => peer.clone().prop_map(|peer| Operation::Leave { peer }),
        1 => peer.prop_map(|peer| Operation::End { peer }),
        1 => Just(Operation::ExpireJoins),
    ]
}

/// Model-level invariants: editor and host are members, names are unique.
fn check_model(model: &ModelWorld) -> Result<(), TestCaseError> {
    let Some(users) = model.users() else {
        for view in model.observable_state() {
            prop_assert!(!matches!(view, PeerView::Active { .. }), "active peer without a session");
        }
        return Ok(());
    };

    let editor = model.editor().unwrap_or_default();
    prop_assert!(users.contains(&editor), "editor {} not in {:?}", editor, users);
    prop_assert!(users.contains(&HOST_NAME), "host missing from {:?}", users);

    let mut names: Vec<String> = model
        .observable_state()
        .into_iter()
        .filter_map(|view| match view {
            PeerView::Active { me, .. } => Some(me),
            PeerView::Idle | PeerView::Joining => None,
        })
        .collect();
    let active = names.len();
    names.sort();
    names.dedup();
    prop_assert_eq!(names.len(), active, "two active peers share a name");
    prop_assert_eq!(active, users.len(), "active peers and members disagree");
    Ok(())
}

proptest! {
    /// Results and every peer's view match the model after each operation.
    #[test]
    fn prop_model_matches_real(
        seed in any::<u64>(),
        num_peers in 2..5usize,
        ops in prop::collection::vec(operation_strategy(4), 0..60)
    ) {
        let mut model = ModelWorld::new(num_peers);
        let mut real = RealWorld { world: SimWorld::star(num_peers, FaultConfig::REORDER, seed) };

        let host = Operation::Host { peer: 0 };
        prop_assert_eq!(model.apply(&host), real.apply(&host));

        for (i, op) in ops.iter().enumerate() {
            let op = op.clamped(num_peers);

            let model_result = model.apply(&op);
            let real_result = real.apply(&op);

            prop_assert_eq!(
                &model_result,
                &real_result,
                "result divergence at operation {}: {:?}",
                i, op
            );
            prop_assert_eq!(
                model.observable_state(),
                real.observable_state(),
                "state divergence after operation {}: {:?}",
                i, op
            );
            prop_assert!(real.world.check_invariants().is_ok(), "{:?}", real.world.check_invariants());
        }
    }

    /// The mesh agrees with the model too when every operation settles.
    #[test]
    fn prop_model_matches_real_on_mesh(
        seed in any::<u64>(),
        num_peers in 2..5usize,
        ops in prop::collection::vec(operation_strategy(4), 0..60)
    ) {
        let mut model = ModelWorld::new(num_peers);
        let mut real: RealWorld<MeshRelay> =
            RealWorld { world: SimWorld::mesh(num_peers, FaultConfig::REORDER, seed) };

        let host = Operation::Host { peer: 0 };
        prop_assert_eq!(model.apply(&host), real.apply(&host));

        for (i, op) in ops.iter().enumerate() {
            let op = op.clamped(num_peers);
            prop_assert_eq!(&model.apply(&op), &real.apply(&op), "operation {}: {:?}", i, op);
            prop_assert_eq!(model.observable_state(), real.observable_state(), "after {}: {:?}", i, op);
        }
    }

    /// Joins and leaves still in flight never split the mesh on the editor,
    /// as long as only one token operation is outstanding at a time.
    #[test]
    fn prop_mesh_converges_with_membership_in_flight(
        seed in any::<u64>(),
        bursts in prop::collection::vec(burst_strategy(), 1..12)
    ) {
        let mut world = SimWorld::mesh(MESH_PEERS, FaultConfig::REORDER, seed);
        world.op(0, |c| c.host_session(HOST_NAME)).map_err(|e| TestCaseError::fail(e.to_string()))?;

        for burst in &bursts {
            // Refusals (already joined, not in a session, not the editor)
            // are part of the script.
            for &peer in &burst.joins {
                let _ = world.op(peer, |c| c.join_session(guest_name(peer)));
            }
            if let Some(peer) = burst.leave {
                let _ = world.op(peer, |c| c.leave_session());
            }
            for _ in 0..burst.steps {
                world.step();
            }
            let _ = match burst.give_to {
                Some(target) => world.op(burst.actor, |c| c.give_access(guest_name(target))),
                None => world.op(burst.actor, |c| c.force_take_access()),
            };
            world.settle();

            prop_assert!(world.converged(), "replicas split after {:?}", burst);
            prop_assert!(world.check_invariants().is_ok(), "{:?}", world.check_invariants());
        }
    }

    /// Model invariants hold after any operation sequence.
    #[test]
    fn prop_model_invariants(
        num_peers in 2..5usize,
        ops in prop::collection::vec(operation_strategy(4), 0..100)
    ) {
        let mut model = ModelWorld::new(num_peers);

        for op in ops {
            let _ = model.apply(&op.clamped(num_peers));
            check_model(&model)?;
        }
    }

    /// Only the editor can give, and only to another member.
    #[test]
    fn prop_give_requires_token(giver in 1..4u8, target in 0..4u8) {
        let mut model = ModelWorld::new(4);
        model.apply(&Operation::Host { peer: 0 });
        for peer in 1..4u8 {
            model.apply(&Operation::Join { peer, name: NameChoice(peer) });
        }

        let result = model.apply(&Operation::Give { peer: giver, target: NameChoice(target) });
        prop_assert_eq!(result, OperationResult::Error(OperationError::NotEditor));
        prop_assert_eq!(model.editor(), Some(HOST_NAME));
    }
}

mod smoke_tests {
    use super::*;

    #[test]
    fn model_basic_operations() {
        let mut model = ModelWorld::new(3);

        assert!(model.apply(&Operation::Host { peer: 0 }).is_ok());
        assert!(model.apply(&Operation::Join { peer: 1, name: NameChoice(1) }).is_ok());

        // Token moves on request and accept.
        assert!(model.apply(&Operation::Request { peer: 1 }).is_ok());
        assert!(model.apply(&Operation::Accept { peer: 0 }).is_ok());
        assert_eq!(model.editor(), Some("bob"));

        // Nothing left to answer.
        assert_eq!(
            model.apply(&Operation::Accept { peer: 1 }),
            OperationResult::Error(OperationError::NoPendingRequest)
        );

        // Guests cannot end the session.
        assert_eq!(
            model.apply(&Operation::End { peer: 1 }),
            OperationResult::Error(OperationError::NotHost)
        );
        assert!(model.apply(&Operation::End { peer: 0 }).is_ok());
        assert!(model.observable_state().iter().all(|v| *v == PeerView::Idle));
    }

    #[test]
    fn real_matches_model_on_handover() {
        let ops = [
            Operation::Host { peer: 0 },
            Operation::Join { peer: 1, name: NameChoice(1) },
            Operation::Join { peer: 2, name: NameChoice(2) },
            Operation::Request { peer: 2 },
            Operation::Request { peer: 1 },
            Operation::Decline { peer: 0 },
            Operation::Accept { peer: 0 },
            Operation::Leave { peer: 2 },
            Operation::Join { peer: 2, name: NameChoice(3) },
            Operation::ExpireJoins,
        ];

        let mut model = ModelWorld::new(3);
        let mut real = RealWorld { world: SimWorld::star(3, FaultConfig::REORDER, 11) };
        for op in &ops {
            assert_eq!(model.apply(op), real.apply(op), "{op:?}");
            assert_eq!(model.observable_state(), real.observable_state(), "{op:?}");
        }
        // bob sorts first and is declined, carol gets the token and takes it
        // with her when she leaves. Her rejoin is ignored until it expires.
        assert_eq!(model.editor(), Some(HOST_NAME));
        assert_eq!(real.observable_state()[2], PeerView::Idle);
    }
}
