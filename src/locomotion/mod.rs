//! Locomotion state machine.
//!
//! Two kinds of state live here. Desired state (stance, gait, view mode,
//! overlay, aiming) is written by gameplay code through setters that apply
//! locally and, on the owning client, ask the server to follow. Runtime
//! state (locomotion mode, gait tag, velocity yaw, input direction) is
//! derived from [`CharacterMovement`] every tick and never replicated
//! except for the input direction.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::constants::{
    ACCEL_TOWARD_VELOCITY_DOT, BRAKING_DOT, GAIT_SPEED_MARGIN, KINDA_SMALL_NUMBER,
    RAGDOLL_GROUND_TOLERANCE, SMALL_NUMBER, SPRINT_VIEW_RELATIVE_ANGLE, VELOCITY_YAW_ENTER_FLOOR,
    VELOCITY_YAW_ENTER_FRACTION, VELOCITY_YAW_EXIT_FLOOR, VELOCITY_YAW_EXIT_FRACTION,
};
use crate::math::{unwind_degrees, yaw_degrees, Rotator};
use crate::movement::{CharacterMovement, Gait, MovementMode, Stance};
use crate::net::quantize::QuantizedNormal;
use crate::net::{NetError, NetRole, Outbox, ReplicationTarget};

pub struct LocomotionPlugin;

impl Plugin for LocomotionPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<LocomotionNotification>();
    }
}

#[derive(Event, Debug, Clone)]
pub struct LocomotionNotification {
    pub entity: Entity,
    pub event: LocomotionEvent,
}

// =====================================================
// Tags
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum LocomotionMode {
    #[default]
    None,
    Grounded,
    InAir,
}

impl LocomotionMode {
    pub fn from_movement_mode(mode: MovementMode) -> Self {
        match mode {
            MovementMode::Walking => LocomotionMode::Grounded,
            MovementMode::Falling => LocomotionMode::InAir,
            MovementMode::None => LocomotionMode::None,
        }
    }
}

/// Camera-only view mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ViewMode {
    FirstPerson,
    #[default]
    ThirdPerson,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OverlayMode {
    #[default]
    Default,
    Rifle,
    Pistol,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LocomotionAction {
    Ragdolling,
}

// =====================================================
// Settings
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocomotionSettings {
    pub velocity_yaw_enter_floor: f32,
    pub velocity_yaw_enter_fraction: f32,
    pub velocity_yaw_exit_floor: f32,
    pub velocity_yaw_exit_fraction: f32,
    pub braking_dot: f32,
    pub accel_toward_velocity_dot: f32,
    /// Degrees between input and facing beyond which sprinting is refused.
    pub sprint_view_relative_angle: f32,
    pub gait_speed_margin: f32,
}

impl Default for LocomotionSettings {
    fn default() -> Self {
        Self {
            velocity_yaw_enter_floor: VELOCITY_YAW_ENTER_FLOOR,
            velocity_yaw_enter_fraction: VELOCITY_YAW_ENTER_FRACTION,
            velocity_yaw_exit_floor: VELOCITY_YAW_EXIT_FLOOR,
            velocity_yaw_exit_fraction: VELOCITY_YAW_EXIT_FRACTION,
            braking_dot: BRAKING_DOT,
            accel_toward_velocity_dot: ACCEL_TOWARD_VELOCITY_DOT,
            sprint_view_relative_angle: SPRINT_VIEW_RELATIVE_ANGLE,
            gait_speed_margin: GAIT_SPEED_MARGIN,
        }
    }
}

// =====================================================
// Network messages and events
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocomotionRpc {
    SetDesiredStance(Stance),
    SetDesiredGait(Gait),
    SetViewMode(ViewMode),
    SetOverlayMode(OverlayMode),
    SetAiming(bool),
    StartRagdolling,
    StopRagdolling,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum LocomotionMulticast {
    StartRagdolling,
    StopRagdolling,
    JumpedNetworked,
}

#[derive(Debug, Clone, PartialEq)]
pub enum LocomotionEvent {
    ModeChanged { from: LocomotionMode, to: LocomotionMode },
    StanceChanged(Stance),
    GaitChanged(Gait),
    ViewModeChanged(ViewMode),
    OverlayModeChanged { previous: OverlayMode },
    AimingChanged { previous: bool },
    Jumped,
    RagdollStarted,
    RagdollStopped,
}

/// Replicated desired state. Every field skips the owner, who wrote it.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LocomotionSnapshot {
    pub desired_stance: Option<Stance>,
    pub desired_gait: Option<Gait>,
    pub view_mode: Option<ViewMode>,
    pub overlay_mode: Option<OverlayMode>,
    pub aiming: Option<bool>,
    pub input_direction: Option<QuantizedNormal>,
    pub view_rotation: Option<Rotator>,
}

// =====================================================
// Runtime state
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocomotionState {
    pub velocity: Vec3,
    /// Planar speed.
    pub speed: f32,
    pub has_velocity: bool,
    /// Last stable planar velocity direction; held while stopping.
    pub velocity_yaw: f32,
    pub has_acceleration: bool,
    pub is_braking: bool,
    pub has_input: bool,
    pub input_yaw: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ViewState {
    pub rotation: Rotator,
    /// View yaw relative to the actor.
    pub relative_yaw: f32,
    /// Absolute view yaw rate in degrees per second.
    pub yaw_speed: f32,
    last_view_yaw: Option<f32>,
}

// =====================================================
// Locomotion
// =====================================================

#[derive(Component, Debug, Clone)]
pub struct Locomotion {
    pub settings: LocomotionSettings,
    role: NetRole,

    desired_stance: Stance,
    desired_gait: Gait,
    view_mode: ViewMode,
    overlay_mode: OverlayMode,
    aiming: bool,
    input_direction: Vec3,

    mode: LocomotionMode,
    stance: Stance,
    gait: Gait,
    action: Option<LocomotionAction>,
    actor_yaw: f32,
    equipment_can_run: bool,

    state: LocomotionState,
    view: ViewState,

    rpcs: Outbox<LocomotionRpc>,
    multicasts: Outbox<LocomotionMulticast>,
    events: Vec<LocomotionEvent>,
}

impl Locomotion {
    pub fn new(settings: LocomotionSettings, role: NetRole) -> Self {
        Self {
            settings,
            role,
            desired_stance: Stance::Standing,
            desired_gait: Gait::Running,
            view_mode: ViewMode::default(),
            overlay_mode: OverlayMode::default(),
            aiming: false,
            input_direction: Vec3::ZERO,
            mode: LocomotionMode::Grounded,
            stance: Stance::Standing,
            gait: Gait::Walking,
            action: None,
            actor_yaw: 0.0,
            equipment_can_run: true,
            state: LocomotionState::default(),
            view: ViewState::default(),
            rpcs: Outbox::default(),
            multicasts: Outbox::default(),
            events: Vec::new(),
        }
    }

    /// Push the initial stance into movement and seed yaws from the actor.
    pub fn initialize(&mut self, movement: &mut CharacterMovement, actor_yaw: f32) {
        self.actor_yaw = actor_yaw;
        self.state.input_yaw = actor_yaw;
        self.state.velocity_yaw = actor_yaw;
        self.mode = LocomotionMode::from_movement_mode(movement.mode());
        self.apply_desired_stance(movement);
        self.events.push(LocomotionEvent::OverlayModeChanged {
            previous: self.overlay_mode,
        });
    }

    // ----- queries -----

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn desired_stance(&self) -> Stance {
        self.desired_stance
    }

    pub fn desired_gait(&self) -> Gait {
        self.desired_gait
    }

    pub fn view_mode(&self) -> ViewMode {
        self.view_mode
    }

    pub fn overlay_mode(&self) -> OverlayMode {
        self.overlay_mode
    }

    pub fn is_aiming(&self) -> bool {
        self.aiming
    }

    pub fn input_direction(&self) -> Vec3 {
        self.input_direction
    }

    pub fn mode(&self) -> LocomotionMode {
        self.mode
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn gait(&self) -> Gait {
        self.gait
    }

    pub fn action(&self) -> Option<LocomotionAction> {
        self.action
    }

    pub fn is_ragdolling(&self) -> bool {
        self.action == Some(LocomotionAction::Ragdolling)
    }

    pub fn actor_yaw(&self) -> f32 {
        self.actor_yaw
    }

    pub fn state(&self) -> &LocomotionState {
        &self.state
    }

    pub fn view(&self) -> &ViewState {
        &self.view
    }

    /// Running or sprinting on the ground delays the first shot.
    pub fn should_use_run_fire_delay(&self) -> bool {
        self.mode == LocomotionMode::Grounded && matches!(self.gait, Gait::Running | Gait::Sprinting)
    }

    pub fn drain_rpcs(&mut self) -> Vec<LocomotionRpc> {
        self.rpcs.drain()
    }

    pub fn drain_multicasts(&mut self) -> Vec<LocomotionMulticast> {
        self.multicasts.drain()
    }

    pub fn drain_events(&mut self) -> Vec<LocomotionEvent> {
        std::mem::take(&mut self.events)
    }

    // ----- inputs from the owning character -----

    pub fn set_actor_yaw(&mut self, yaw: f32) {
        self.actor_yaw = unwind_degrees(yaw);
    }

    pub fn set_view_rotation(&mut self, rotation: Rotator) {
        self.view.rotation = rotation.normalized();
    }

    /// Equipment veto on running (aiming, firing, run-fire delay).
    pub fn set_equipment_can_run(&mut self, can_run: bool) {
        self.equipment_can_run = can_run;
    }

    // =====================================================
    // Desired state setters
    // =====================================================

    fn can_write_desired_state(&self, field: &'static str) -> bool {
        if self.role.is_simulated() {
            warn!(field, "simulated proxy cannot write desired locomotion state");
            return false;
        }
        true
    }

    pub fn set_desired_stance(&mut self, stance: Stance, movement: &mut CharacterMovement) {
        if self.desired_stance == stance || !self.can_write_desired_state("stance") {
            return;
        }
        self.desired_stance = stance;
        self.apply_desired_stance(movement);
        if self.role.is_autonomous() {
            self.rpcs.push(LocomotionRpc::SetDesiredStance(stance));
        }
    }

    pub fn set_desired_gait(&mut self, gait: Gait) {
        if self.desired_gait == gait || !self.can_write_desired_state("gait") {
            return;
        }
        self.desired_gait = gait;
        if self.role.is_autonomous() {
            self.rpcs.push(LocomotionRpc::SetDesiredGait(gait));
        }
    }

    pub fn set_view_mode(&mut self, view_mode: ViewMode) {
        if self.view_mode == view_mode || !self.can_write_desired_state("view_mode") {
            return;
        }
        self.view_mode = view_mode;
        self.events.push(LocomotionEvent::ViewModeChanged(view_mode));
        if self.role.is_autonomous() {
            self.rpcs.push(LocomotionRpc::SetViewMode(view_mode));
        }
    }

    pub fn set_overlay_mode(&mut self, overlay_mode: OverlayMode) {
        if self.overlay_mode == overlay_mode || !self.can_write_desired_state("overlay_mode") {
            return;
        }
        let previous = self.overlay_mode;
        self.overlay_mode = overlay_mode;
        self.events.push(LocomotionEvent::OverlayModeChanged { previous });
        if self.role.is_autonomous() {
            self.rpcs.push(LocomotionRpc::SetOverlayMode(overlay_mode));
        }
    }

    /// The authority only records the flag; remote copies get the
    /// notification through replication.
    pub fn set_aiming(&mut self, aiming: bool) {
        if self.aiming == aiming || !self.can_write_desired_state("aiming") {
            return;
        }
        let previous = self.aiming;
        self.aiming = aiming;
        if self.role.is_autonomous() {
            self.events.push(LocomotionEvent::AimingChanged { previous });
            self.rpcs.push(LocomotionRpc::SetAiming(aiming));
        }
    }

    /// The only place stance takes physical effect. Idempotent.
    pub fn apply_desired_stance(&mut self, movement: &mut CharacterMovement) {
        let changed = self.stance != self.desired_stance;
        self.stance = self.desired_stance;
        match self.stance {
            Stance::Crouching => movement.crouch(),
            Stance::Standing => movement.uncrouch(),
        }
        movement.set_stance(self.stance);
        if changed {
            debug!(stance = ?self.stance, "stance applied");
            self.events.push(LocomotionEvent::StanceChanged(self.stance));
        }
    }

    // =====================================================
    // Gait permission
    // =====================================================

    pub fn can_run(&self) -> bool {
        self.equipment_can_run
    }

    pub fn can_sprint(&self) -> bool {
        if !self.state.has_input || self.stance != Stance::Standing {
            return false;
        }
        unwind_degrees(self.state.input_yaw - self.actor_yaw).abs()
            < self.settings.sprint_view_relative_angle
    }

    pub fn calculate_max_allowed_gait(&self) -> Gait {
        match self.desired_gait {
            Gait::Walking => Gait::Walking,
            Gait::Running if self.can_run() => Gait::Running,
            Gait::Running => Gait::Walking,
            Gait::Sprinting if self.can_sprint() => Gait::Sprinting,
            Gait::Sprinting if self.can_run() => Gait::Running,
            Gait::Sprinting => Gait::Walking,
        }
    }

    // =====================================================
    // Jump
    // =====================================================

    /// Only standing, grounded characters may jump. The jump itself runs
    /// on the next movement step.
    pub fn jump(&mut self, movement: &mut CharacterMovement) -> bool {
        if self.role.is_simulated()
            || self.stance != Stance::Standing
            || self.mode != LocomotionMode::Grounded
        {
            return false;
        }
        movement.request_jump();
        true
    }

    fn on_jumped(&mut self) {
        match self.role {
            NetRole::AutonomousProxy => self.events.push(LocomotionEvent::Jumped),
            NetRole::Authority => {
                self.events.push(LocomotionEvent::Jumped);
                self.multicasts.push(LocomotionMulticast::JumpedNetworked);
            }
            NetRole::SimulatedProxy => {}
        }
    }

    // =====================================================
    // Ragdoll
    // =====================================================

    pub fn is_ragdolling_allowed_to_start(&self) -> bool {
        !self.is_ragdolling()
    }

    pub fn is_ragdolling_allowed_to_stop(&self) -> bool {
        self.is_ragdolling()
    }

    /// Request a ragdoll. The owning client must flush its pending move
    /// before the request goes out. Returns whether anything was issued.
    pub fn start_ragdolling(&mut self, movement: &mut CharacterMovement) -> bool {
        if self.role.is_simulated() || !self.is_ragdolling_allowed_to_start() {
            return false;
        }
        if self.role.has_authority() {
            self.start_ragdolling_implementation(movement);
            self.multicasts.push(LocomotionMulticast::StartRagdolling);
        } else {
            self.rpcs.push(LocomotionRpc::StartRagdolling);
        }
        true
    }

    pub fn stop_ragdolling(&mut self, movement: &mut CharacterMovement) -> bool {
        if self.role.is_simulated() || !self.is_ragdolling_allowed_to_stop() {
            return false;
        }
        if self.role.has_authority() {
            self.stop_ragdolling_implementation(movement);
            self.multicasts.push(LocomotionMulticast::StopRagdolling);
        } else {
            self.rpcs.push(LocomotionRpc::StopRagdolling);
        }
        true
    }

    fn start_ragdolling_implementation(&mut self, movement: &mut CharacterMovement) {
        if !self.is_ragdolling_allowed_to_start() {
            return;
        }
        movement.set_movement_mode(MovementMode::None);
        movement.set_movement_mode_locked(true);
        self.action = Some(LocomotionAction::Ragdolling);
        self.refresh_mode(movement);
        debug!("ragdoll started");
        self.events.push(LocomotionEvent::RagdollStarted);
    }

    fn stop_ragdolling_implementation(&mut self, movement: &mut CharacterMovement) {
        if !self.is_ragdolling_allowed_to_stop() {
            return;
        }
        let grounded = movement.location.z - movement.ground_z <= RAGDOLL_GROUND_TOLERANCE;
        if grounded {
            movement.location.z = movement.ground_z;
        }
        movement.set_movement_mode_locked(false);
        movement.set_movement_mode(if grounded {
            MovementMode::Walking
        } else {
            MovementMode::Falling
        });
        self.action = None;
        self.refresh_mode(movement);
        debug!(grounded, "ragdoll stopped");
        self.events.push(LocomotionEvent::RagdollStopped);
    }

    // =====================================================
    // Network
    // =====================================================

    pub fn handle_server_rpc(
        &mut self,
        rpc: LocomotionRpc,
        movement: &mut CharacterMovement,
    ) -> Result<(), NetError> {
        if !self.role.has_authority() {
            return Err(NetError::RejectedRpc(
                "locomotion rpc received without authority".into(),
            ));
        }
        match rpc {
            LocomotionRpc::SetDesiredStance(stance) => {
                self.desired_stance = stance;
                self.apply_desired_stance(movement);
            }
            LocomotionRpc::SetDesiredGait(gait) => self.desired_gait = gait,
            LocomotionRpc::SetViewMode(view_mode) => {
                self.view_mode = view_mode;
                self.events.push(LocomotionEvent::ViewModeChanged(view_mode));
            }
            LocomotionRpc::SetOverlayMode(overlay_mode) => {
                let previous = self.overlay_mode;
                self.overlay_mode = overlay_mode;
                self.events.push(LocomotionEvent::OverlayModeChanged { previous });
            }
            LocomotionRpc::SetAiming(aiming) => {
                let previous = self.aiming;
                self.aiming = aiming;
                self.events.push(LocomotionEvent::AimingChanged { previous });
            }
            LocomotionRpc::StartRagdolling => {
                if self.is_ragdolling_allowed_to_start() {
                    self.start_ragdolling_implementation(movement);
                    self.multicasts.push(LocomotionMulticast::StartRagdolling);
                }
            }
            LocomotionRpc::StopRagdolling => {
                if self.is_ragdolling_allowed_to_stop() {
                    self.stop_ragdolling_implementation(movement);
                    self.multicasts.push(LocomotionMulticast::StopRagdolling);
                }
            }
        }
        Ok(())
    }

    /// Remote playback. The authority already applied these inline.
    pub fn handle_multicast(&mut self, multicast: &LocomotionMulticast, movement: &mut CharacterMovement) {
        if self.role.has_authority() {
            return;
        }
        match multicast {
            LocomotionMulticast::StartRagdolling => self.start_ragdolling_implementation(movement),
            LocomotionMulticast::StopRagdolling => self.stop_ragdolling_implementation(movement),
            LocomotionMulticast::JumpedNetworked => {
                // the owner already reported its own jump
                if !self.role.is_autonomous() {
                    self.events.push(LocomotionEvent::Jumped);
                }
            }
        }
    }

    pub fn replicated_state(&self, target: ReplicationTarget) -> LocomotionSnapshot {
        if target.skips_owner_fields() {
            return LocomotionSnapshot::default();
        }
        LocomotionSnapshot {
            desired_stance: Some(self.desired_stance),
            desired_gait: Some(self.desired_gait),
            view_mode: Some(self.view_mode),
            overlay_mode: Some(self.overlay_mode),
            aiming: Some(self.aiming),
            input_direction: Some(QuantizedNormal::from(self.input_direction)),
            view_rotation: Some(self.view.rotation),
        }
    }

    pub fn apply_replication(&mut self, snapshot: &LocomotionSnapshot, movement: &mut CharacterMovement) {
        if let Some(stance) = snapshot.desired_stance {
            self.desired_stance = stance;
            self.apply_desired_stance(movement);
        }
        if let Some(gait) = snapshot.desired_gait {
            self.desired_gait = gait;
        }
        if let Some(view_mode) = snapshot.view_mode {
            if view_mode != self.view_mode {
                self.view_mode = view_mode;
                self.events.push(LocomotionEvent::ViewModeChanged(view_mode));
            }
        }
        if let Some(overlay_mode) = snapshot.overlay_mode {
            if overlay_mode != self.overlay_mode {
                let previous = self.overlay_mode;
                self.overlay_mode = overlay_mode;
                self.events.push(LocomotionEvent::OverlayModeChanged { previous });
            }
        }
        if let Some(aiming) = snapshot.aiming {
            if aiming != self.aiming {
                let previous = self.aiming;
                self.aiming = aiming;
                self.events.push(LocomotionEvent::AimingChanged { previous });
            }
        }
        if let Some(direction) = snapshot.input_direction {
            self.input_direction = direction.to_vec3();
        }
        if let Some(rotation) = snapshot.view_rotation {
            self.view.rotation = rotation;
        }
    }

    // =====================================================
    // Tick
    // =====================================================

    pub fn tick(&mut self, dt: f32, movement: &mut CharacterMovement) {
        self.refresh_mode(movement);
        if movement.take_jumped() {
            self.on_jumped();
        }
        self.refresh_view(dt);
        self.refresh_input(movement);
        self.refresh_locomotion(movement);
        self.refresh_gait(movement);
    }

    fn refresh_mode(&mut self, movement: &CharacterMovement) {
        let mode = LocomotionMode::from_movement_mode(movement.mode());
        if mode != self.mode {
            let from = std::mem::replace(&mut self.mode, mode);
            debug!(?from, to = ?mode, "locomotion mode changed");
            self.events.push(LocomotionEvent::ModeChanged { from, to: mode });
        }
    }

    fn refresh_view(&mut self, dt: f32) {
        let yaw = self.view.rotation.yaw;
        self.view.yaw_speed = match self.view.last_view_yaw {
            Some(last) if dt > SMALL_NUMBER => unwind_degrees(yaw - last).abs() / dt,
            _ => 0.0,
        };
        self.view.last_view_yaw = Some(yaw);
        self.view.relative_yaw = unwind_degrees(yaw - self.actor_yaw);
    }

    fn refresh_input(&mut self, movement: &CharacterMovement) {
        if !self.role.is_simulated() {
            let max_acceleration = movement.max_acceleration();
            let direction = if max_acceleration > KINDA_SMALL_NUMBER {
                movement.acceleration / max_acceleration
            } else {
                Vec3::ZERO
            };
            self.input_direction = direction.normalize_or_zero();
        }

        self.state.has_input = self.input_direction.length_squared() > KINDA_SMALL_NUMBER;
        if self.state.has_input {
            self.state.input_yaw = yaw_degrees(self.input_direction);
        }
    }

    fn refresh_locomotion(&mut self, movement: &CharacterMovement) {
        let velocity = movement.velocity;
        let planar_velocity = Vec3::new(velocity.x, velocity.y, 0.0);
        let speed = planar_velocity.length();
        let planar_acceleration = Vec3::new(movement.acceleration.x, movement.acceleration.y, 0.0);

        let has_acceleration = planar_acceleration.length_squared() > KINDA_SMALL_NUMBER;
        let has_velocity = speed > KINDA_SMALL_NUMBER;
        let alignment = if has_acceleration && has_velocity {
            Some(
                planar_acceleration
                    .normalize()
                    .dot(planar_velocity.normalize()),
            )
        } else {
            None
        };
        let braking = alignment.is_some_and(|dot| dot < self.settings.braking_dot);
        let toward_velocity = alignment.is_some_and(|dot| dot > self.settings.accel_toward_velocity_dot);

        let reference_speed = if movement.mode() == MovementMode::Walking {
            movement.gait_settings().max_walk_speed()
        } else {
            movement.max_speed()
        };
        let enter = (reference_speed * self.settings.velocity_yaw_enter_fraction)
            .max(self.settings.velocity_yaw_enter_floor);
        let exit = (enter * self.settings.velocity_yaw_exit_fraction)
            .max(self.settings.velocity_yaw_exit_floor);

        let allow_yaw_update = (toward_velocity && speed >= exit)
            || (!braking && speed >= exit)
            || speed >= enter;
        if allow_yaw_update && has_velocity {
            self.state.velocity_yaw = yaw_degrees(planar_velocity);
        }

        self.state.velocity = velocity;
        self.state.speed = speed;
        self.state.has_velocity = has_velocity;
        self.state.has_acceleration = has_acceleration;
        self.state.is_braking = braking;
    }

    fn refresh_gait(&mut self, movement: &mut CharacterMovement) {
        let max_allowed = self.calculate_max_allowed_gait();
        if movement.max_allowed_gait() != max_allowed {
            movement.set_max_allowed_gait(max_allowed);
        }

        let gait_settings = movement.gait_settings();
        let margin = self.settings.gait_speed_margin;
        let speed = self.state.speed;
        let gait = if speed < gait_settings.max_run_speed() - margin {
            Gait::Walking
        } else if speed <= gait_settings.sprint_speed - margin {
            Gait::Running
        } else {
            Gait::Sprinting
        };
        if gait != self.gait {
            self.gait = gait;
            self.events.push(LocomotionEvent::GaitChanged(gait));
        }
    }
}
