//! A playable character: movement, locomotion, equipment and procedural
//! motion wired together for one network role.
//!
//! The subsystems never talk to each other directly. [`Character::tick`]
//! moves state between them (equipment run veto into locomotion, gait into
//! the weapon's owner context, weapon aim and recoil into locomotion and the
//! procedural rig) and wraps their outboxes into [`NetMessage`]s.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::combat::{CombatWorld, HitScanWorld};
use crate::config::GameplayConfig;
use crate::constants::EYE_HEIGHT;
use crate::equipment::{
    AddEquipmentError, Equipment, EquipmentDefinition, EquipmentError, EquipmentId,
    EquipmentManager, EquipmentManagerEvent, EquipmentNotification, EquipmentSnapshot,
};
use crate::locomotion::{
    Locomotion, LocomotionEvent, LocomotionNotification, LocomotionSnapshot, OverlayMode,
    ViewMode,
};
use crate::logging::TimingSpan;
use crate::math::Rotator;
use crate::movement::prediction::{ClientPrediction, ServerMoveHandler};
use crate::movement::{CharacterMovement, Gait, MovementState, Stance};
use crate::net::{
    ActorId, ClientRpc, MulticastRpc, NetError, NetMessage, NetRole, ReplicationTarget, ServerRpc,
};
use crate::procedural::{BoneFrame, CurveMap, ProceduralInput, ProceduralRig};
use crate::weapon::{FireWeapon, OwnerContext, WeaponEvent, WeaponNotification};

pub struct CharacterPlugin;

impl Plugin for CharacterPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<HitScanWorld>()
            .add_event::<EquipmentNotification>()
            .add_event::<WeaponNotification>()
            .add_event::<LocomotionNotification>()
            .configure_sets(
                FixedUpdate,
                (CharacterSystems::Tick, CharacterSystems::Publish).chain(),
            )
            .add_systems(
                FixedUpdate,
                (
                    tick_characters.in_set(CharacterSystems::Tick),
                    publish_character_events.in_set(CharacterSystems::Publish),
                ),
            );
    }
}

/// Hosts feed input before `Tick` and move network traffic after it.
#[derive(SystemSet, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CharacterSystems {
    Tick,
    Publish,
}

/// Replicated character state. Movement is skipped for the owner, which
/// predicts its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CharacterSnapshot {
    pub movement: Option<MovementState>,
    pub locomotion: LocomotionSnapshot,
    pub equipment: EquipmentSnapshot,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CharacterEvent {
    Equipment(EquipmentManagerEvent),
    Weapon {
        equipment: EquipmentId,
        event: WeaponEvent,
    },
    Locomotion(LocomotionEvent),
}

#[derive(Component, Debug)]
pub struct Character {
    actor: ActorId,
    role: NetRole,
    locally_controlled: bool,

    pub movement: CharacterMovement,
    pub locomotion: Locomotion,
    pub equipment: EquipmentManager,
    pub rig: ProceduralRig,
    /// Animation curves sampled by the host for the procedural stages.
    pub curves: CurveMap,

    prediction: ClientPrediction,
    server_moves: ServerMoveHandler,
    control_rotation: Rotator,
    last_input: Vec3,

    outgoing: Vec<NetMessage>,
    events: Vec<CharacterEvent>,
}

impl Character {
    /// Simulated proxies are never locally controlled.
    pub fn new(
        actor: ActorId,
        role: NetRole,
        locally_controlled: bool,
        config: &GameplayConfig,
    ) -> Self {
        let locally_controlled = locally_controlled && !role.is_simulated();
        let mut movement = CharacterMovement::new(config.movement.clone());
        let mut locomotion = Locomotion::new(config.locomotion.clone(), role);
        locomotion.initialize(&mut movement, 0.0);
        let equipment = EquipmentManager::new(config.equipment.clone(), role)
            .with_owner(actor, locally_controlled);

        Self {
            actor,
            role,
            locally_controlled,
            movement,
            locomotion,
            equipment,
            rig: ProceduralRig::standard(),
            curves: CurveMap::default(),
            prediction: ClientPrediction::new(),
            server_moves: ServerMoveHandler::new(),
            control_rotation: Rotator::ZERO,
            last_input: Vec3::ZERO,
            outgoing: Vec::new(),
            events: Vec::new(),
        }
    }

    // ----- queries -----

    pub fn actor(&self) -> ActorId {
        self.actor
    }

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn is_locally_controlled(&self) -> bool {
        self.locally_controlled
    }

    pub fn control_rotation(&self) -> Rotator {
        self.control_rotation
    }

    pub fn prediction(&self) -> &ClientPrediction {
        &self.prediction
    }

    pub fn server_moves(&self) -> &ServerMoveHandler {
        &self.server_moves
    }

    pub fn eye_location(&self) -> Vec3 {
        self.movement.location + Vec3::Z * EYE_HEIGHT
    }

    /// Center of the hit sphere registered in the combat world.
    pub fn hit_center(&self) -> Vec3 {
        self.movement.location + Vec3::Z * (EYE_HEIGHT * 0.5)
    }

    pub fn current_weapon(&self) -> Option<&FireWeapon> {
        self.equipment.current().and_then(Equipment::weapon)
    }

    pub fn current_weapon_mut(&mut self) -> Option<&mut FireWeapon> {
        self.equipment.current_mut().and_then(|e| e.weapon_mut())
    }

    pub fn evaluate_pose(&self, frame: &BoneFrame) -> Transform {
        self.rig.evaluate(frame)
    }

    pub fn drain_events(&mut self) -> Vec<CharacterEvent> {
        std::mem::take(&mut self.events)
    }

    /// Everything this copy wants sent, in the order it must arrive.
    pub fn drain_outgoing(&mut self) -> Vec<NetMessage> {
        self.collect_outgoing();
        std::mem::take(&mut self.outgoing)
    }

    // =====================================================
    // Gameplay input
    // =====================================================

    pub fn add_movement_input(&mut self, input: Vec3) {
        self.movement.add_input_vector(input);
    }

    pub fn set_control_rotation(&mut self, rotation: Rotator) {
        self.control_rotation = rotation.normalized();
    }

    pub fn jump(&mut self) -> bool {
        self.locomotion.jump(&mut self.movement)
    }

    pub fn set_desired_stance(&mut self, stance: Stance) {
        self.locomotion.set_desired_stance(stance, &mut self.movement);
    }

    pub fn set_desired_gait(&mut self, gait: Gait) {
        self.locomotion.set_desired_gait(gait);
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        self.locomotion.set_view_mode(view_mode);
    }

    pub fn set_overlay_mode(&mut self, overlay_mode: OverlayMode) {
        self.locomotion.set_overlay_mode(overlay_mode);
    }

    /// Pending moves are queued ahead of the ragdoll request.
    pub fn start_ragdolling(&mut self) -> bool {
        self.flush_moves();
        self.locomotion.start_ragdolling(&mut self.movement)
    }

    pub fn stop_ragdolling(&mut self) -> bool {
        self.flush_moves();
        self.locomotion.stop_ragdolling(&mut self.movement)
    }

    fn flush_moves(&mut self) {
        if self.role.is_autonomous() {
            self.prediction.flush_server_moves();
            self.collect_outgoing();
        }
    }

    pub fn primary_action(&mut self, pressed: bool, world: &mut dyn CombatWorld) {
        if let Some(equipment) = self.equipment.current_mut() {
            equipment.primary_action(pressed, world);
        }
    }

    pub fn secondary_action(&mut self, pressed: bool) {
        if let Some(equipment) = self.equipment.current_mut() {
            equipment.secondary_action(pressed);
        }
    }

    pub fn start_reload(&mut self) {
        if let Some(weapon) = self.current_weapon_mut() {
            weapon.start_reload();
        }
    }

    pub fn cancel_reload(&mut self) {
        if let Some(weapon) = self.current_weapon_mut() {
            weapon.cancel_reload();
        }
    }

    /// Reload animation reached its commit notify.
    pub fn notify_reload_committed(&mut self, force_full: bool) {
        if let Some(weapon) = self.current_weapon_mut() {
            weapon.notify_commit_reload(force_full);
        }
    }

    /// Loop reload animation inserted a round.
    pub fn notify_round_inserted(&mut self) {
        if let Some(weapon) = self.current_weapon_mut() {
            weapon.notify_insert_one_round();
        }
    }

    pub fn cycle_fire_mode(&mut self) {
        if let Some(weapon) = self.current_weapon_mut() {
            weapon.cycle_fire_mode();
        }
    }

    pub fn equip_slot(&mut self, index: usize) -> Result<(), EquipmentError> {
        self.equipment.equip_slot(index)
    }

    pub fn cycle_equipment(&mut self, delta: i32) -> Option<usize> {
        self.equipment.cycle(delta)
    }

    /// Authority only. Builds the item for this character's role and slots it.
    pub fn give_equipment(
        &mut self,
        definition: EquipmentDefinition,
        preferred: Option<usize>,
    ) -> Result<usize, AddEquipmentError> {
        let equipment = Equipment::new(definition, self.role);
        let slot = self.equipment.add_equipment(equipment, preferred)?;
        self.equipment.set_owner_context(&self.owner_context());
        Ok(slot)
    }

    // =====================================================
    // Tick
    // =====================================================

    pub fn tick(&mut self, dt: f32, world: &mut dyn CombatWorld) {
        if dt <= 0.0 {
            return;
        }
        self.simulate_movement(dt);

        self.locomotion.set_equipment_can_run(self.equipment.can_run());
        self.locomotion.tick(dt, &mut self.movement);

        self.equipment.set_owner_context(&self.owner_context());
        self.equipment.tick(dt, world);

        self.route_events();
        self.update_rig(dt);
        self.collect_outgoing();
    }

    fn simulate_movement(&mut self, dt: f32) {
        self.locomotion.set_view_rotation(self.control_rotation);
        let input = self.movement.consume_input();
        if !self.locally_controlled {
            // remote owners move the authority through server moves
            return;
        }

        self.last_input = input;
        self.locomotion.set_actor_yaw(self.control_rotation.yaw);
        self.movement.view_yaw = self.control_rotation.yaw;
        let acceleration = self.movement.acceleration_for_input(input);
        if self.role.is_autonomous() {
            self.prediction
                .replicate_move_to_server(&mut self.movement, dt, acceleration);
        } else {
            self.movement.perform_move(dt, acceleration);
        }
    }

    fn owner_context(&self) -> OwnerContext {
        OwnerContext {
            role: self.role,
            locally_controlled: self.locally_controlled,
            owner: Some(self.actor),
            velocity: self.movement.velocity,
            should_use_run_fire_delay: self.locomotion.should_use_run_fire_delay(),
            muzzle_location: self.eye_location(),
            aim_rotation: self.control_rotation,
            first_person: self.locomotion.view_mode() == ViewMode::FirstPerson,
        }
    }

    fn route_events(&mut self) {
        for event in self.equipment.drain_events() {
            self.events.push(CharacterEvent::Equipment(event));
        }

        for (equipment, event) in self.equipment.drain_weapon_events() {
            match event {
                WeaponEvent::OwnerAimRequested(aiming) => self.locomotion.set_aiming(aiming),
                WeaponEvent::RecoilPlay => self.rig.notify_shot(),
                _ => {}
            }
            self.events.push(CharacterEvent::Weapon { equipment, event });
        }

        for event in self.locomotion.drain_events() {
            if let LocomotionEvent::ViewModeChanged(view_mode) = event {
                self.equipment
                    .update_view_mode(view_mode == ViewMode::FirstPerson);
            }
            self.events.push(CharacterEvent::Locomotion(event));
        }
    }

    fn update_rig(&mut self, dt: f32) {
        let ads_alpha = self.current_weapon().map_or(0.0, FireWeapon::ads_alpha);
        let input = ProceduralInput {
            first_person: self.locomotion.view_mode() == ViewMode::FirstPerson,
            pivot_offset: Vec3::ZERO,
            ads_alpha,
            aiming: self.locomotion.is_aiming(),
            control_rotation: self.control_rotation,
            actor_yaw: self.locomotion.actor_yaw(),
            movement_input: self.last_input,
        };
        self.rig.update(dt, &self.curves, &input);
    }

    /// Moves first, then equipment, weapon and locomotion calls.
    fn collect_outgoing(&mut self) {
        let actor = self.actor;
        match self.role {
            NetRole::AutonomousProxy => {
                let moves = self
                    .prediction
                    .drain_server_moves()
                    .into_iter()
                    .map(ServerRpc::Move);
                let equipment = self
                    .equipment
                    .drain_server_rpcs()
                    .into_iter()
                    .map(ServerRpc::Equipment);
                let weapons = self
                    .equipment
                    .drain_weapon_rpcs()
                    .into_iter()
                    .map(|(equipment, rpc)| ServerRpc::Weapon { equipment, rpc });
                let locomotion = self
                    .locomotion
                    .drain_rpcs()
                    .into_iter()
                    .map(ServerRpc::Locomotion);
                self.outgoing.extend(
                    moves
                        .chain(equipment)
                        .chain(weapons)
                        .chain(locomotion)
                        .map(|rpc| NetMessage::Server { actor, rpc }),
                );
            }
            NetRole::Authority => {
                let equipment = self
                    .equipment
                    .drain_multicasts()
                    .into_iter()
                    .map(MulticastRpc::Equipment);
                let locomotion = self
                    .locomotion
                    .drain_multicasts()
                    .into_iter()
                    .map(MulticastRpc::Locomotion);
                self.outgoing.extend(
                    equipment
                        .chain(locomotion)
                        .map(|rpc| NetMessage::Multicast { actor, rpc }),
                );
            }
            NetRole::SimulatedProxy => {}
        }
    }

    // =====================================================
    // Network
    // =====================================================

    pub fn replicated_state(&self, target: ReplicationTarget) -> CharacterSnapshot {
        CharacterSnapshot {
            movement: (!target.skips_owner_fields()).then(|| self.movement.state()),
            locomotion: self.locomotion.replicated_state(target),
            equipment: self.equipment.replicated_state(target),
        }
    }

    pub fn replicate(&self, target: ReplicationTarget) -> NetMessage {
        NetMessage::Replicate {
            actor: self.actor,
            state: self.replicated_state(target),
        }
    }

    pub fn apply_replication(&mut self, snapshot: &CharacterSnapshot, world: &dyn CombatWorld) {
        if self.role.has_authority() {
            return;
        }
        if let Some(state) = snapshot.movement {
            if self.role.is_simulated() {
                self.movement.restore(state);
            }
        }
        self.locomotion
            .apply_replication(&snapshot.locomotion, &mut self.movement);
        self.equipment.apply_replication(&snapshot.equipment, world);
        self.equipment.set_owner_context(&self.owner_context());
    }

    /// Dispatch one incoming message to the subsystem it targets.
    pub fn handle_message(
        &mut self,
        message: NetMessage,
        world: &mut dyn CombatWorld,
    ) -> Result<(), NetError> {
        if message.actor() != self.actor {
            return Err(NetError::RejectedRpc(format!(
                "message for actor {} delivered to actor {}",
                message.actor().0,
                self.actor.0
            )));
        }
        match message {
            NetMessage::Server { rpc, .. } => self.handle_server_rpc(rpc, world),
            NetMessage::Multicast { rpc, .. } => {
                self.handle_multicast(rpc);
                Ok(())
            }
            NetMessage::Client { rpc, .. } => {
                self.handle_client_rpc(rpc);
                Ok(())
            }
            NetMessage::Replicate { state, .. } => {
                self.apply_replication(&state, &*world);
                Ok(())
            }
        }
    }

    fn handle_server_rpc(
        &mut self,
        rpc: ServerRpc,
        world: &mut dyn CombatWorld,
    ) -> Result<(), NetError> {
        if !self.role.has_authority() {
            warn!(actor = self.actor.0, "server rpc delivered to a client copy");
            return Err(NetError::RejectedRpc("server rpc without authority".into()));
        }
        match rpc {
            ServerRpc::Equipment(rpc) => self
                .equipment
                .handle_server_rpc(rpc)
                .map_err(|err| NetError::RejectedRpc(err.to_string())),
            ServerRpc::Weapon { equipment, rpc } => {
                let weapon = self
                    .equipment
                    .find_slot(equipment)
                    .and_then(|slot| self.equipment.slot_mut(slot))
                    .and_then(|e| e.weapon_mut());
                match weapon {
                    Some(weapon) => weapon.handle_server_rpc(rpc, world),
                    None => {
                        warn!(%equipment, "weapon rpc for an item this character does not hold");
                        Err(NetError::RejectedRpc(format!("{equipment} is not a held weapon")))
                    }
                }
            }
            ServerRpc::Locomotion(rpc) => self.locomotion.handle_server_rpc(rpc, &mut self.movement),
            ServerRpc::Move(server_move) => {
                if let Some(response) = self
                    .server_moves
                    .handle_server_move(&mut self.movement, &server_move)?
                {
                    self.outgoing.push(NetMessage::Client {
                        actor: self.actor,
                        rpc: ClientRpc::Move(response),
                    });
                }
                Ok(())
            }
        }
    }

    fn handle_multicast(&mut self, rpc: MulticastRpc) {
        match rpc {
            MulticastRpc::Equipment(multicast) => self.equipment.handle_multicast(multicast),
            MulticastRpc::Locomotion(multicast) => {
                self.locomotion.handle_multicast(&multicast, &mut self.movement)
            }
        }
    }

    fn handle_client_rpc(&mut self, rpc: ClientRpc) {
        match rpc {
            ClientRpc::Move(response) => {
                if self.role.is_autonomous() {
                    self.prediction.handle_response(&mut self.movement, &response);
                } else {
                    debug!(actor = self.actor.0, "move response ignored by non-owning copy");
                }
            }
        }
    }
}

// =====================================================
// Systems
// =====================================================

fn tick_characters(
    time: Res<Time>,
    mut world: ResMut<HitScanWorld>,
    mut characters: Query<&mut Character>,
) {
    let _timing = TimingSpan::new("tick_characters");
    let dt = time.delta_secs();
    for mut character in &mut characters {
        character.tick(dt, &mut *world);
        let (actor, center) = (character.actor(), character.hit_center());
        world.set_target_center(actor, center);
    }
}

fn publish_character_events(
    mut characters: Query<(Entity, &mut Character)>,
    mut equipment_events: EventWriter<EquipmentNotification>,
    mut weapon_events: EventWriter<WeaponNotification>,
    mut locomotion_events: EventWriter<LocomotionNotification>,
) {
    for (entity, mut character) in &mut characters {
        for event in character.drain_events() {
            match event {
                CharacterEvent::Equipment(event) => {
                    equipment_events.send(EquipmentNotification { entity, event });
                }
                CharacterEvent::Weapon { event, .. } => {
                    weapon_events.send(WeaponNotification { entity, event });
                }
                CharacterEvent::Locomotion(event) => {
                    locomotion_events.send(LocomotionNotification { entity, event });
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::equipment::EquipmentKind;
    use crate::locomotion::LocomotionRpc;
    use crate::weapon::FireWeaponSettings;

    const DT: f32 = 1.0 / 60.0;

    fn rifle(id: u64) -> EquipmentDefinition {
        EquipmentDefinition {
            id: EquipmentId(id),
            name: "rifle".into(),
            anim: None,
            kind: EquipmentKind::FireWeapon(FireWeaponSettings::default()),
        }
    }

    fn pump(from: &mut Character, to: &mut Character, world: &mut HitScanWorld) {
        for message in from.drain_outgoing() {
            to.handle_message(message, world).unwrap();
        }
    }

    fn armed_authority(world: &mut HitScanWorld) -> Character {
        let mut character = Character::new(ActorId(1), NetRole::Authority, true, &GameplayConfig::default());
        character.give_equipment(rifle(10), None).unwrap();
        character.equip_slot(0).unwrap();
        for _ in 0..5 {
            character.tick(DT, world);
        }
        character
    }

    #[test]
    fn test_authority_equips_and_fires() {
        let mut world = HitScanWorld::with_ground(0.0);
        let mut character = armed_authority(&mut world);
        assert_eq!(character.equipment.current_index(), Some(0));
        assert!(character.equipment.current().is_some_and(Equipment::is_equipped));

        character.primary_action(true, &mut world);
        character.primary_action(false, &mut world);
        character.tick(DT, &mut world);
        assert_eq!(character.current_weapon().map(FireWeapon::ammo_in_magazine), Some(29));
    }

    #[test]
    fn test_recoil_reaches_rig() {
        let mut world = HitScanWorld::with_ground(0.0);
        let mut character = armed_authority(&mut world);
        let rest = character.evaluate_pose(&BoneFrame::default());
        assert!(rest.translation.length() < 1e-3);

        character.primary_action(true, &mut world);
        character.tick(DT, &mut world);
        let kicked = character.evaluate_pose(&BoneFrame::default());
        assert!(kicked.translation.length() > 1e-3);
        let events = character.drain_events();
        assert!(events.iter().any(|e| matches!(
            e,
            CharacterEvent::Weapon { event: WeaponEvent::RecoilPlay, .. }
        )));
    }

    #[test]
    fn test_aiming_mirrors_into_locomotion() {
        let mut world = HitScanWorld::with_ground(0.0);
        let mut character = armed_authority(&mut world);
        character.secondary_action(true);
        character.tick(DT, &mut world);
        assert!(character.locomotion.is_aiming());
        // aiming vetoes running
        assert!(!character.equipment.can_run());
    }

    #[test]
    fn test_moves_are_sent_before_ragdoll_request() {
        let mut world = HitScanWorld::default();
        let mut client = Character::new(ActorId(1), NetRole::AutonomousProxy, true, &GameplayConfig::default());
        client.add_movement_input(Vec3::X);
        client.tick(DT, &mut world);
        assert!(client.prediction().has_pending_move());

        assert!(client.start_ragdolling());
        let messages = client.drain_outgoing();
        assert!(matches!(
            messages.first(),
            Some(NetMessage::Server { rpc: ServerRpc::Move(_), .. })
        ));
        assert!(matches!(
            messages.last(),
            Some(NetMessage::Server {
                rpc: ServerRpc::Locomotion(LocomotionRpc::StartRagdolling),
                ..
            })
        ));
    }

    #[test]
    fn test_client_server_round_trip() {
        let mut world = HitScanWorld::with_ground(0.0);
        let config = GameplayConfig::default();
        let mut server = Character::new(ActorId(3), NetRole::Authority, false, &config);
        let mut client = Character::new(ActorId(3), NetRole::AutonomousProxy, true, &config);

        server.give_equipment(rifle(30), None).unwrap();
        client
            .handle_message(server.replicate(ReplicationTarget::Owner), &mut world)
            .unwrap();
        client.equip_slot(0).unwrap();

        for _ in 0..60 {
            client.add_movement_input(Vec3::X);
            client.tick(DT, &mut world);
            pump(&mut client, &mut server, &mut world);
            server.tick(DT, &mut world);
            pump(&mut server, &mut client, &mut world);
        }
        client
            .handle_message(server.replicate(ReplicationTarget::Owner), &mut world)
            .unwrap();

        assert_eq!(server.equipment.current_index(), Some(0));
        assert_eq!(client.equipment.current_index(), Some(0));
        assert_eq!(server.server_moves().corrections_sent(), 0);
        assert!(server.movement.location.x > 150.0);
    }

    #[test]
    fn test_simulated_proxy_follows_replication() {
        let mut world = HitScanWorld::with_ground(0.0);
        let config = GameplayConfig::default();
        let mut server = Character::new(ActorId(4), NetRole::Authority, true, &config);
        let mut proxy = Character::new(ActorId(4), NetRole::SimulatedProxy, true, &config);
        assert!(!proxy.is_locally_controlled());

        server.set_desired_stance(Stance::Crouching);
        for _ in 0..20 {
            server.add_movement_input(Vec3::Y);
            server.tick(DT, &mut world);
        }
        proxy
            .handle_message(server.replicate(ReplicationTarget::NonOwner), &mut world)
            .unwrap();
        assert_eq!(proxy.movement.location, server.movement.location);
        assert_eq!(proxy.movement.stance(), Stance::Crouching);
    }

    #[test]
    fn test_rejects_foreign_and_misrouted_messages() {
        let mut world = HitScanWorld::default();
        let config = GameplayConfig::default();
        let mut client = Character::new(ActorId(5), NetRole::AutonomousProxy, true, &config);
        let foreign = NetMessage::Multicast {
            actor: ActorId(6),
            rpc: MulticastRpc::Locomotion(crate::locomotion::LocomotionMulticast::JumpedNetworked),
        };
        assert!(client.handle_message(foreign, &mut world).is_err());

        let server_call = NetMessage::Server {
            actor: ActorId(5),
            rpc: ServerRpc::Locomotion(LocomotionRpc::SetAiming(true)),
        };
        assert!(matches!(
            client.handle_message(server_call, &mut world),
            Err(NetError::RejectedRpc(_))
        ));

        let mut server = Character::new(ActorId(5), NetRole::Authority, false, &config);
        let unknown_weapon = NetMessage::Server {
            actor: ActorId(5),
            rpc: ServerRpc::Weapon {
                equipment: EquipmentId(99),
                rpc: crate::weapon::WeaponRpc::RequestStartReload,
            },
        };
        assert!(server.handle_message(unknown_weapon, &mut world).is_err());
    }

    #[test]
    fn test_view_mode_reaches_equipment() {
        let mut world = HitScanWorld::with_ground(0.0);
        let mut character = armed_authority(&mut world);
        character.set_view_mode(ViewMode::FirstPerson);
        character.tick(DT, &mut world);
        let attachment = character.equipment.current().map(Equipment::attachment);
        assert_eq!(attachment, Some(crate::equipment::Attachment::FirstPersonHolder));
    }

    #[test]
    fn test_plugin_publishes_notifications() {
        use bevy::ecs::system::RunSystemOnce;

        let mut app = App::new();
        app.add_plugins(CharacterPlugin);
        let mut character = Character::new(ActorId(8), NetRole::Authority, true, &GameplayConfig::default());
        character.tick(DT, &mut HitScanWorld::default());
        let entity = app.world_mut().spawn(character).id();

        app.world_mut().run_system_once(publish_character_events).unwrap();
        let events = app.world().resource::<Events<LocomotionNotification>>();
        assert!(events.iter_current_update_events().any(|n| n.entity == entity));
    }
}
