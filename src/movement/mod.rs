//! Character movement with stance- and gait-aware speed caps.
//!
//! [`CharacterMovement`] is a small kinematic integrator (walking with
//! friction and braking, falling with gravity and air control) plus the
//! gait layer that turns `{stance, max allowed gait}` into concrete speed,
//! acceleration and friction values. Client prediction lives in
//! [`prediction`].

use std::collections::BTreeMap;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

pub mod gait;
pub mod prediction;

pub use gait::{GaitCurve, GaitCurveKey, GaitSettings};

use crate::constants::{GRAVITY_Z, KINDA_SMALL_NUMBER, SMALL_NUMBER};
use crate::math::{clamp01, lerp, map_range_clamped, unwind_degrees, yaw_degrees};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stance {
    Standing,
    Crouching,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Gait {
    Walking,
    Running,
    Sprinting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementMode {
    /// No simulation (ragdoll, attached).
    None,
    Walking,
    Falling,
}

// =====================================================
// Settings
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MovementSettings {
    pub min_analog_walk_speed: f32,
    pub max_walk_speed: f32,
    pub max_walk_speed_crouched: f32,
    pub max_acceleration: f32,
    pub braking_deceleration_walking: f32,
    pub ground_friction: f32,
    pub air_control: f32,
    pub jump_z_velocity: f32,
    /// Velocity-to-view angle range (degrees) over which forward speed blends to backward speed.
    pub velocity_angle_range: (f32, f32),
    pub stances: BTreeMap<Stance, GaitSettings>,
    /// Used for stances missing from `stances`.
    pub fallback_gait: GaitSettings,
}

impl Default for MovementSettings {
    fn default() -> Self {
        let mut stances = BTreeMap::new();
        stances.insert(Stance::Standing, GaitSettings::default());
        stances.insert(Stance::Crouching, GaitSettings::crouched());
        Self {
            min_analog_walk_speed: 25.0,
            max_walk_speed: 375.0,
            max_walk_speed_crouched: 150.0,
            max_acceleration: 2000.0,
            braking_deceleration_walking: 1500.0,
            ground_friction: 4.0,
            air_control: 0.15,
            jump_z_velocity: 420.0,
            velocity_angle_range: (100.0, 125.0),
            stances,
            fallback_gait: GaitSettings::default(),
        }
    }
}

impl MovementSettings {
    pub fn gait_for(&self, stance: Stance) -> &GaitSettings {
        self.stances.get(&stance).unwrap_or(&self.fallback_gait)
    }
}

// =====================================================
// CharacterMovement
// =====================================================

/// Kinematic state a prediction snapshot restores.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementState {
    pub location: Vec3,
    pub velocity: Vec3,
    pub mode: MovementMode,
}

#[derive(Debug, Clone)]
pub struct CharacterMovement {
    pub settings: MovementSettings,
    pub location: Vec3,
    pub velocity: Vec3,
    /// Acceleration applied by the last simulated step.
    pub acceleration: Vec3,
    /// Yaw the direction-dependent speeds are measured against.
    pub view_yaw: f32,
    pub ground_z: f32,

    mode: MovementMode,
    mode_locked: bool,
    input_blocked: bool,
    pending_input: Vec3,
    requested_velocity: Option<Vec3>,
    crouched: bool,
    crouch_transitions: u32,
    jump_pending: bool,
    jumped: bool,

    stance: Stance,
    max_allowed_gait: Gait,
    gait_settings: GaitSettings,
    gait_amount: f32,

    max_walk_speed: f32,
    max_walk_speed_crouched: f32,
    max_acceleration_walking: f32,
    braking_deceleration_walking: f32,
    ground_friction: f32,
}

impl CharacterMovement {
    pub fn new(settings: MovementSettings) -> Self {
        let gait_settings = settings.gait_for(Stance::Standing).clone();
        Self {
            location: Vec3::ZERO,
            velocity: Vec3::ZERO,
            acceleration: Vec3::ZERO,
            view_yaw: 0.0,
            ground_z: 0.0,
            mode: MovementMode::Walking,
            mode_locked: false,
            input_blocked: false,
            pending_input: Vec3::ZERO,
            requested_velocity: None,
            crouched: false,
            crouch_transitions: 0,
            jump_pending: false,
            jumped: false,
            stance: Stance::Standing,
            max_allowed_gait: Gait::Running,
            gait_settings,
            gait_amount: 0.0,
            max_walk_speed: settings.max_walk_speed,
            max_walk_speed_crouched: settings.max_walk_speed_crouched,
            max_acceleration_walking: settings.max_acceleration,
            braking_deceleration_walking: settings.braking_deceleration_walking,
            ground_friction: settings.ground_friction,
            settings,
        }
    }

    // ----- queries -----

    pub fn mode(&self) -> MovementMode {
        self.mode
    }

    pub fn stance(&self) -> Stance {
        self.stance
    }

    pub fn max_allowed_gait(&self) -> Gait {
        self.max_allowed_gait
    }

    pub fn gait_settings(&self) -> &GaitSettings {
        &self.gait_settings
    }

    pub fn gait_amount(&self) -> f32 {
        self.gait_amount
    }

    pub fn max_walk_speed(&self) -> f32 {
        self.max_walk_speed
    }

    pub fn max_walk_speed_crouched(&self) -> f32 {
        self.max_walk_speed_crouched
    }

    pub fn ground_friction(&self) -> f32 {
        self.ground_friction
    }

    pub fn braking_deceleration(&self) -> f32 {
        self.braking_deceleration_walking
    }

    pub fn is_crouched(&self) -> bool {
        self.crouched
    }

    /// Number of physical crouch/uncrouch transitions so far.
    pub fn crouch_transitions(&self) -> u32 {
        self.crouch_transitions
    }

    pub fn is_input_blocked(&self) -> bool {
        self.input_blocked
    }

    pub fn is_mode_locked(&self) -> bool {
        self.mode_locked
    }

    pub fn is_grounded(&self) -> bool {
        self.mode == MovementMode::Walking
    }

    pub fn state(&self) -> MovementState {
        MovementState {
            location: self.location,
            velocity: self.velocity,
            mode: self.mode,
        }
    }

    /// Overwrite kinematic state; the mode change bypasses the lock.
    pub fn restore(&mut self, state: MovementState) {
        self.location = state.location;
        self.velocity = state.velocity;
        if self.mode != state.mode {
            let locked = std::mem::replace(&mut self.mode_locked, false);
            self.set_movement_mode(state.mode);
            self.mode_locked = locked;
        }
    }

    pub fn max_acceleration(&self) -> f32 {
        if self.is_grounded() {
            self.max_acceleration_walking
        } else {
            self.settings.max_acceleration
        }
    }

    pub fn max_speed(&self) -> f32 {
        match self.mode {
            MovementMode::Walking if self.crouched => self.max_walk_speed_crouched,
            MovementMode::Walking | MovementMode::Falling => self.max_walk_speed,
            MovementMode::None => 0.0,
        }
    }

    // ----- gait layer -----

    pub fn set_stance(&mut self, stance: Stance) {
        if self.stance != stance {
            self.stance = stance;
            self.refresh_gait_settings();
        }
    }

    pub fn set_max_allowed_gait(&mut self, gait: Gait) {
        self.max_allowed_gait = gait;
    }

    pub fn refresh_gait_settings(&mut self) {
        self.gait_settings = self.settings.gait_for(self.stance).clone();
    }

    /// Derive speed caps and the acceleration/friction curve values from velocity and max gait.
    pub fn refresh_grounded_movement_settings(&mut self) {
        let gait = &self.gait_settings;
        let planar = Vec3::new(self.velocity.x, self.velocity.y, 0.0);

        let (walk_speed, run_speed) =
            if gait.allow_direction_dependent_speed && planar.length_squared() > SMALL_NUMBER {
                let angle = unwind_degrees(yaw_degrees(planar) - self.view_yaw).abs();
                let (min, max) = self.settings.velocity_angle_range;
                let pct = if (max - min).abs() > SMALL_NUMBER {
                    (angle - min) / (max - min)
                } else {
                    0.0
                };
                let forward_ratio = 1.0 - clamp01(pct);
                (
                    lerp(gait.walk_backward_speed, gait.walk_forward_speed, forward_ratio),
                    lerp(gait.run_backward_speed, gait.run_forward_speed, forward_ratio),
                )
            } else {
                (gait.walk_forward_speed, gait.run_forward_speed)
            };
        let sprint_speed = gait.sprint_speed;

        let speed = planar.length();
        self.gait_amount = if speed > run_speed {
            map_range_clamped(run_speed, sprint_speed, 2.0, 3.0, speed)
        } else if speed > walk_speed {
            map_range_clamped(walk_speed, run_speed, 1.0, 2.0, speed)
        } else {
            map_range_clamped(0.0, walk_speed, 0.0, 1.0, speed)
        };

        self.max_walk_speed = match self.max_allowed_gait {
            Gait::Walking => walk_speed,
            Gait::Running => run_speed,
            Gait::Sprinting => sprint_speed,
        };
        self.max_walk_speed_crouched = self.max_walk_speed;

        if let Some(sample) = gait.curve.as_ref().and_then(|c| c.evaluate(self.gait_amount)) {
            self.max_acceleration_walking = sample.acceleration;
            self.braking_deceleration_walking = sample.deceleration;
            self.ground_friction = sample.ground_friction;
        }
    }

    // ----- mode / input -----

    /// Returns false when the mode is locked.
    pub fn set_movement_mode(&mut self, mode: MovementMode) -> bool {
        if self.mode_locked {
            trace!(?mode, "movement mode locked");
            return false;
        }
        if self.mode == mode {
            return true;
        }
        debug!(from = ?self.mode, to = ?mode, "movement mode");
        self.mode = mode;
        if mode == MovementMode::Walking {
            self.velocity.z = 0.0;
            self.refresh_gait_settings();
            self.refresh_grounded_movement_settings();
        }
        true
    }

    pub fn set_movement_mode_locked(&mut self, locked: bool) {
        self.mode_locked = locked;
    }

    pub fn set_input_blocked(&mut self, blocked: bool) {
        self.input_blocked = blocked;
        if blocked {
            self.pending_input = Vec3::ZERO;
            self.requested_velocity = None;
        }
    }

    pub fn add_input_vector(&mut self, input: Vec3) {
        self.pending_input += input;
    }

    /// Take the accumulated input. Zero while input is blocked.
    pub fn consume_input(&mut self) -> Vec3 {
        let input = std::mem::take(&mut self.pending_input);
        if self.input_blocked {
            Vec3::ZERO
        } else {
            input
        }
    }

    /// Path-following velocity request. Rejected while input is blocked.
    pub fn apply_requested_move(&mut self, velocity: Vec3) -> bool {
        if self.input_blocked {
            return false;
        }
        self.requested_velocity = Some(velocity);
        true
    }

    /// Acceleration for a raw input vector (length clamped to 1).
    pub fn acceleration_for_input(&self, input: Vec3) -> Vec3 {
        let planar = Vec3::new(input.x, input.y, 0.0).clamp_length_max(1.0);
        planar * self.max_acceleration()
    }

    // ----- crouch / jump -----

    /// Physical crouch. No-op if already crouched.
    pub fn crouch(&mut self) {
        if !self.crouched {
            self.crouched = true;
            self.crouch_transitions += 1;
        }
    }

    pub fn uncrouch(&mut self) {
        if self.crouched {
            self.crouched = false;
            self.crouch_transitions += 1;
        }
    }

    /// Jump at the start of the next simulated step.
    pub fn request_jump(&mut self) {
        self.jump_pending = true;
    }

    pub fn is_jump_pending(&self) -> bool {
        self.jump_pending
    }

    pub fn set_jump_pending(&mut self, pending: bool) {
        self.jump_pending = pending;
    }

    /// True once after a step that started a jump.
    pub fn take_jumped(&mut self) -> bool {
        std::mem::take(&mut self.jumped)
    }

    pub fn jump(&mut self) -> bool {
        if !self.is_grounded() {
            return false;
        }
        if !self.set_movement_mode(MovementMode::Falling) {
            return false;
        }
        self.velocity.z = self.settings.jump_z_velocity;
        true
    }

    // ----- integration -----

    /// Simulate one step with the given acceleration.
    pub fn perform_move(&mut self, dt: f32, acceleration: Vec3) {
        if dt <= 0.0 {
            return;
        }
        let acceleration = match self.requested_velocity.take() {
            Some(requested) => {
                let delta = Vec3::new(requested.x - self.velocity.x, requested.y - self.velocity.y, 0.0);
                (delta / dt).clamp_length_max(self.max_acceleration())
            }
            None => acceleration,
        };
        self.acceleration = acceleration;
        if std::mem::take(&mut self.jump_pending) && self.jump() {
            self.jumped = true;
        }

        match self.mode {
            MovementMode::Walking => self.phys_walking(dt, acceleration),
            MovementMode::Falling => self.phys_falling(dt, acceleration),
            MovementMode::None => {}
        }
    }

    fn phys_walking(&mut self, dt: f32, acceleration: Vec3) {
        self.refresh_grounded_movement_settings();

        let max_accel = self.max_acceleration().max(KINDA_SMALL_NUMBER);
        let analog = (acceleration.length() / max_accel).min(1.0);
        let mut max_speed = self.max_speed();
        if analog > 0.0 && analog < 1.0 {
            max_speed = (max_speed * analog).max(self.settings.min_analog_walk_speed);
        }

        let friction = self.ground_friction;
        self.velocity.z = 0.0;
        if acceleration.length_squared() > SMALL_NUMBER {
            let dir = acceleration.normalize();
            let speed = self.velocity.length();
            self.velocity -= (self.velocity - dir * speed) * (dt * friction).min(1.0);
            self.velocity += acceleration * dt;
            self.velocity = self.velocity.clamp_length_max(max_speed);
        } else {
            self.apply_braking(dt, friction, self.braking_deceleration_walking);
        }

        self.location += self.velocity * dt;
        self.location.z = self.ground_z;
        self.refresh_grounded_movement_settings();
    }

    fn apply_braking(&mut self, dt: f32, friction: f32, deceleration: f32) {
        if self.velocity.length_squared() <= SMALL_NUMBER {
            self.velocity = Vec3::ZERO;
            return;
        }
        let old = self.velocity;
        let reverse = -(friction * old + deceleration * old.normalize());
        self.velocity += reverse * dt;
        if self.velocity.dot(old) <= 0.0 || self.velocity.length_squared() < 1.0e-2 {
            self.velocity = Vec3::ZERO;
        }
    }

    fn phys_falling(&mut self, dt: f32, acceleration: Vec3) {
        let air = Vec3::new(acceleration.x, acceleration.y, 0.0) * self.settings.air_control;
        self.velocity += air * dt;
        let planar = Vec3::new(self.velocity.x, self.velocity.y, 0.0).clamp_length_max(self.max_walk_speed);
        self.velocity = Vec3::new(planar.x, planar.y, self.velocity.z + GRAVITY_Z * dt);
        self.location += self.velocity * dt;

        if self.location.z <= self.ground_z && self.velocity.z <= 0.0 {
            self.location.z = self.ground_z;
            self.velocity.z = 0.0;
            self.set_movement_mode(MovementMode::Walking);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DT: f32 = 1.0 / 60.0;

    fn walk(movement: &mut CharacterMovement, input: Vec3, seconds: f32) {
        let steps = (seconds / DT).round() as usize;
        for _ in 0..steps {
            let accel = movement.acceleration_for_input(input);
            movement.perform_move(DT, accel);
        }
    }

    #[test]
    fn test_defaults() {
        let movement = CharacterMovement::new(MovementSettings::default());
        assert_eq!(movement.max_allowed_gait(), Gait::Running);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert_eq!(movement.max_acceleration(), 2000.0);
    }

    #[test]
    fn test_speed_cap_follows_max_gait() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        walk(&mut movement, Vec3::X, 2.0);
        assert!((movement.velocity.length() - 375.0).abs() < 1.0);

        movement.set_max_allowed_gait(Gait::Sprinting);
        walk(&mut movement, Vec3::X, 2.0);
        assert!((movement.velocity.length() - 650.0).abs() < 1.0);
        assert!(movement.gait_amount() > 2.9);

        movement.set_max_allowed_gait(Gait::Walking);
        walk(&mut movement, Vec3::X, 2.0);
        assert!((movement.velocity.length() - 175.0).abs() < 1.0);
    }

    #[test]
    fn test_braking_stops() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        walk(&mut movement, Vec3::X, 1.0);
        walk(&mut movement, Vec3::ZERO, 1.0);
        assert_eq!(movement.velocity, Vec3::ZERO);
    }

    #[test]
    fn test_crouched_stance_uses_its_gait() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        movement.set_stance(Stance::Crouching);
        movement.crouch();
        walk(&mut movement, Vec3::X, 2.0);
        assert!((movement.velocity.length() - 200.0).abs() < 1.0);
        assert_eq!(movement.max_walk_speed_crouched(), movement.max_walk_speed());
    }

    #[test]
    fn test_crouch_is_idempotent() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        movement.crouch();
        movement.crouch();
        movement.uncrouch();
        movement.uncrouch();
        assert_eq!(movement.crouch_transitions(), 2);
    }

    #[test]
    fn test_direction_dependent_speed() {
        let mut settings = MovementSettings::default();
        if let Some(gait) = settings.stances.get_mut(&Stance::Standing) {
            gait.allow_direction_dependent_speed = true;
            gait.run_backward_speed = 250.0;
        }
        let mut movement = CharacterMovement::new(settings);
        movement.view_yaw = 0.0;
        walk(&mut movement, Vec3::NEG_X, 2.0);
        assert!((movement.velocity.length() - 250.0).abs() < 1.0);
    }

    #[test]
    fn test_locked_mode_ignores_changes() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        movement.set_movement_mode_locked(true);
        assert!(!movement.set_movement_mode(MovementMode::None));
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert!(!movement.jump());
    }

    #[test]
    fn test_blocked_input() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        movement.add_input_vector(Vec3::X);
        movement.set_input_blocked(true);
        movement.add_input_vector(Vec3::X);
        assert_eq!(movement.consume_input(), Vec3::ZERO);
        assert!(!movement.apply_requested_move(Vec3::X * 100.0));
        movement.set_input_blocked(false);
        movement.add_input_vector(Vec3::Y);
        assert_eq!(movement.consume_input(), Vec3::Y);
    }

    #[test]
    fn test_jump_lands() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        assert!(movement.jump());
        assert_eq!(movement.mode(), MovementMode::Falling);
        walk(&mut movement, Vec3::ZERO, 0.3);
        assert!(movement.location.z > 0.0);
        walk(&mut movement, Vec3::ZERO, 1.0);
        assert_eq!(movement.mode(), MovementMode::Walking);
        assert_eq!(movement.location.z, 0.0);
    }

    #[test]
    fn test_requested_jump_runs_on_next_step() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        movement.request_jump();
        assert!(movement.is_jump_pending());
        assert!(!movement.take_jumped());
        movement.perform_move(DT, Vec3::ZERO);
        assert!(!movement.is_jump_pending());
        assert!(movement.take_jumped());
        assert!(!movement.take_jumped());
        assert_eq!(movement.mode(), MovementMode::Falling);
    }

    #[test]
    fn test_analog_input_floor() {
        let mut movement = CharacterMovement::new(MovementSettings::default());
        walk(&mut movement, Vec3::X * 0.01, 3.0);
        assert!((movement.velocity.length() - 25.0).abs() < 1.0);
    }
}
