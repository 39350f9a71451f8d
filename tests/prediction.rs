//! Client prediction over a latent link
//!
//! A server copy and an owning client copy exchange JSON-encoded messages
//! through `SimulatedLink`s:
//! - Matching simulations converge with no corrections
//! - Server-side displacement corrects the client, which replays its unacked moves
//! - Ragdoll requests arrive after the moves that preceded them

use bevy::math::Vec3;
use gameplay_core::character::Character;
use gameplay_core::combat::HitScanWorld;
use gameplay_core::config::GameplayConfig;
use gameplay_core::locomotion::LocomotionRpc;
use gameplay_core::net::{ActorId, NetMessage, NetRole, ReplicationTarget, ServerRpc, SimulatedLink};

const DT: f32 = 1.0 / 60.0;
const LATENCY: f32 = 0.05;
const PLAYER: ActorId = ActorId(9);

// ============================================================
// Helpers
// ============================================================

struct Session {
    world: HitScanWorld,
    server: Character,
    client: Character,
    to_server: SimulatedLink,
    to_client: SimulatedLink,
    /// Everything the server received, in arrival order.
    server_log: Vec<NetMessage>,
}

impl Session {
    fn new() -> Self {
        let config = GameplayConfig::default();
        let mut world = HitScanWorld::with_ground(0.0);
        let server = Character::new(PLAYER, NetRole::Authority, false, &config);
        let mut client = Character::new(PLAYER, NetRole::AutonomousProxy, true, &config);
        client
            .handle_message(server.replicate(ReplicationTarget::Owner), &mut world)
            .unwrap();
        Self {
            world,
            server,
            client,
            to_server: SimulatedLink::new(LATENCY),
            to_client: SimulatedLink::new(LATENCY),
            server_log: Vec::new(),
        }
    }

    fn step(&mut self, input: Vec3) {
        if input != Vec3::ZERO {
            self.client.add_movement_input(input);
        }
        self.client.tick(DT, &mut self.world);
        self.to_server.send_all(&self.client.drain_outgoing()).unwrap();

        for message in self.to_server.advance(DT) {
            self.server_log.push(message.clone());
            self.server.handle_message(message, &mut self.world).unwrap();
        }
        self.server.tick(DT, &mut self.world);
        self.to_client.send_all(&self.server.drain_outgoing()).unwrap();

        for message in self.to_client.advance(DT) {
            self.client.handle_message(message, &mut self.world).unwrap();
        }
    }

    fn run(&mut self, ticks: usize, input: Vec3) {
        for _ in 0..ticks {
            self.step(input);
        }
    }

    fn drift(&self) -> f32 {
        (self.client.movement.location - self.server.movement.location).length()
    }
}

// ============================================================
// Convergence
// ============================================================

#[test]
fn matching_simulations_need_no_correction() {
    let mut session = Session::new();
    session.run(60, Vec3::X);
    session.run(60, Vec3::Y);
    // let every move land and the character come to rest
    session.run(120, Vec3::ZERO);

    assert_eq!(session.server.server_moves().corrections_sent(), 0);
    assert_eq!(session.client.prediction().corrections(), 0);
    assert!(session.server.movement.location.x > 100.0);
    assert!(session.server.movement.location.y > 100.0);
    assert!(session.drift() < 0.1, "drift {}", session.drift());
}

#[test]
fn jump_is_replayed_by_the_server() {
    let mut session = Session::new();
    session.run(10, Vec3::X);
    assert!(session.client.jump());
    session.run(5, Vec3::X);
    assert!(session.client.movement.location.z > 0.0);

    session.run(150, Vec3::ZERO);
    assert_eq!(session.server.server_moves().corrections_sent(), 0);
    assert!(session.drift() < 0.1, "drift {}", session.drift());
}

#[test]
fn server_displacement_corrects_client() {
    let mut session = Session::new();
    session.run(30, Vec3::X);
    session.server.movement.location += Vec3::Y * 200.0;
    session.run(30, Vec3::X);
    session.run(120, Vec3::ZERO);

    assert!(session.server.server_moves().corrections_sent() >= 1);
    assert!(session.client.prediction().corrections() >= 1);
    assert!((session.client.movement.location.y - 200.0).abs() < 1.0);
    assert!(session.drift() < 0.1, "drift {}", session.drift());
}

// ============================================================
// Ordering
// ============================================================

#[test]
fn ragdoll_request_follows_preceding_moves() {
    let mut session = Session::new();
    session.run(3, Vec3::X);
    session.client.add_movement_input(Vec3::X);
    session.client.tick(DT, &mut session.world);
    assert!(session.client.prediction().has_pending_move());

    assert!(session.client.start_ragdolling());
    assert!(!session.client.prediction().has_pending_move());
    session.run(10, Vec3::ZERO);

    let ragdoll_at = session
        .server_log
        .iter()
        .position(|m| {
            matches!(
                m,
                NetMessage::Server {
                    rpc: ServerRpc::Locomotion(LocomotionRpc::StartRagdolling),
                    ..
                }
            )
        })
        .expect("ragdoll request reached the server");
    // the move flushed by the ragdoll request carries the whole pre-ragdoll input
    match &session.server_log[ragdoll_at - 1] {
        NetMessage::Server {
            rpc: ServerRpc::Move(mv),
            ..
        } => assert!((mv.timestamp - 4.0 * DT).abs() < 1e-4),
        other => panic!("expected a move before the ragdoll request, got {other:?}"),
    }
}
