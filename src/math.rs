//! Spring/damper interpolation primitives.
//!
//! - Exact half-life damper (`damper_exact_alpha`, `damper_exact`)
//! - Spring-damper with persistent per-channel velocity (`SpringState`)
//! - Angle variants that take the shortest path across the ±180° seam
//! - Small scalar helpers shared by locomotion, weapons and sway

use bevy::math::{Quat, Vec2, Vec3};
use serde::{Deserialize, Serialize};
use std::f32::consts::TAU;
use std::ops::{Add, Mul, Sub};

use crate::constants::{KINDA_SMALL_NUMBER, LN2, SMALL_NUMBER};

/// Values a damper or spring can interpolate.
pub trait Interpolate:
    Copy + Default + Add<Output = Self> + Sub<Output = Self> + Mul<f32, Output = Self>
{
}

impl Interpolate for f32 {}
impl Interpolate for Vec2 {}
impl Interpolate for Vec3 {}

pub fn clamp01(value: f32) -> f32 {
    value.clamp(0.0, 1.0)
}

pub fn lerp<T: Interpolate>(from: T, to: T, alpha: f32) -> T {
    from + (to - from) * alpha
}

pub fn lerp_clamped(from: f32, to: f32, ratio: f32) -> f32 {
    from + (to - from) * clamp01(ratio)
}

/// Wrap an angle in degrees into (-180, 180].
pub fn unwind_degrees(angle: f32) -> f32 {
    let mut a = angle % 360.0;
    if a > 180.0 {
        a -= 360.0;
    } else if a <= -180.0 {
        a += 360.0;
    }
    a
}

/// Map `value` from `[in_a, in_b]` to `[out_a, out_b]`, clamping to the output range.
pub fn map_range_clamped(in_a: f32, in_b: f32, out_a: f32, out_b: f32, value: f32) -> f32 {
    let span = in_b - in_a;
    if span.abs() <= SMALL_NUMBER {
        return if value >= in_b { out_b } else { out_a };
    }
    lerp(out_a, out_b, clamp01((value - in_a) / span))
}

/// Frame-rate dependent exponential approach, as used by timelines and sway targets.
pub fn finterp_to(current: f32, target: f32, dt: f32, speed: f32) -> f32 {
    if speed <= 0.0 {
        return target;
    }
    let dist = target - current;
    if dist * dist < SMALL_NUMBER {
        return target;
    }
    current + dist * clamp01(dt * speed)
}

// =====================================================
// Dampers
// =====================================================

/// Blend factor of an exact damper: `1 - exp(-ln2 / halfLife * dt)`.
pub fn damper_exact_alpha(dt: f32, half_life: f32) -> f32 {
    if dt <= 0.0 {
        return 0.0;
    }
    1.0 - (-(LN2 / (half_life + SMALL_NUMBER)) * dt).exp()
}

pub fn damper_exact<T: Interpolate>(current: T, target: T, dt: f32, half_life: f32) -> T {
    lerp(current, target, damper_exact_alpha(dt, half_life))
}

pub fn damper_exact_angle(current: f32, target: f32, dt: f32, half_life: f32) -> f32 {
    let delta = unwind_degrees(target - current);
    unwind_degrees(current + delta * damper_exact_alpha(dt, half_life))
}

// =====================================================
// Spring damper
// =====================================================

/// Persistent state of one spring channel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SpringState<T> {
    pub velocity: T,
    pub previous_target: T,
    pub valid: bool,
}

impl<T: Interpolate> SpringState<T> {
    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

/// Advance a spring toward `target`.
///
/// `frequency` is the undamped frequency in Hz, `damping_ratio` 1.0 is critical.
/// `target_velocity_amount` scales how much of the target's own motion the
/// spring tries to match. Integration is implicit, so large steps stay stable.
pub fn spring_damper<T: Interpolate>(
    state: &mut SpringState<T>,
    current: T,
    target: T,
    dt: f32,
    frequency: f32,
    damping_ratio: f32,
    target_velocity_amount: f32,
) -> T {
    if dt <= SMALL_NUMBER {
        return current;
    }

    if !state.valid {
        state.velocity = T::default();
        state.previous_target = target;
        state.valid = true;
        return target;
    }

    let target_velocity = (target - state.previous_target) * (clamp01(target_velocity_amount) / dt);
    let (next, velocity) = integrate_spring(
        current,
        state.velocity,
        target - current,
        target_velocity,
        dt,
        frequency,
        damping_ratio,
    );
    state.velocity = velocity;
    state.previous_target = target;
    next
}

/// Angle spring in degrees. The error toward the target wraps across ±180°.
pub fn spring_damper_angle(
    state: &mut SpringState<f32>,
    current: f32,
    target: f32,
    dt: f32,
    frequency: f32,
    damping_ratio: f32,
    target_velocity_amount: f32,
) -> f32 {
    if dt <= SMALL_NUMBER {
        return current;
    }

    if !state.valid {
        state.velocity = 0.0;
        state.previous_target = target;
        state.valid = true;
        return unwind_degrees(target);
    }

    let target_velocity =
        unwind_degrees(target - state.previous_target) * (clamp01(target_velocity_amount) / dt);
    let (next, velocity) = integrate_spring(
        current,
        state.velocity,
        unwind_degrees(target - current),
        target_velocity,
        dt,
        frequency,
        damping_ratio,
    );
    state.velocity = velocity;
    state.previous_target = target;
    unwind_degrees(next)
}

fn integrate_spring<T: Interpolate>(
    x: T,
    v: T,
    error: T,
    target_velocity: T,
    dt: f32,
    frequency: f32,
    damping_ratio: f32,
) -> (T, T) {
    let omega = TAU * frequency.max(0.0);
    let stiffness = omega * omega;
    let damping = 2.0 * damping_ratio.max(0.0) * omega;

    let denom = 1.0 + dt * damping + dt * dt * stiffness;
    let velocity = (v + (error * stiffness + target_velocity * damping) * dt) * (1.0 / denom);
    (x + velocity * dt, velocity)
}

// =====================================================
// Direction helpers
// =====================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MovementDirection {
    Forward,
    Backward,
    Left,
    Right,
}

/// Classify a view-relative angle into a movement quadrant.
pub fn calculate_movement_direction(
    angle: f32,
    forward_half_angle: f32,
    angle_threshold: f32,
) -> MovementDirection {
    if angle >= -forward_half_angle - angle_threshold && angle <= forward_half_angle + angle_threshold {
        return MovementDirection::Forward;
    }
    if angle >= forward_half_angle - angle_threshold
        && angle <= 180.0 - forward_half_angle + angle_threshold
    {
        return MovementDirection::Right;
    }
    if angle <= -(forward_half_angle - angle_threshold)
        && angle >= -(180.0 - forward_half_angle + angle_threshold)
    {
        return MovementDirection::Left;
    }
    MovementDirection::Backward
}

/// Pole vector for a two-bone chain A-B-C.
///
/// Returns the projection of B onto AC and the unit direction from it to B,
/// or `None` when the chain is degenerate (A == B, or A, B, C collinear).
pub fn try_calculate_pole_vector(a: Vec3, b: Vec3, c: Vec3) -> Option<(Vec3, Vec3)> {
    let ab = b - a;
    if ab.length_squared() <= KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER {
        return None;
    }

    let Some(ac) = (c - a).try_normalize() else {
        return Some((a, ab.normalize()));
    };

    let projection = a + ac * ab.dot(ac);
    (b - projection).try_normalize().map(|pole| (projection, pole))
}

/// Yaw in degrees of a planar (XY) vector.
pub fn yaw_degrees(v: Vec3) -> f32 {
    v.y.atan2(v.x).to_degrees()
}

// =====================================================
// Rotator
// =====================================================

/// Euler rotation in degrees. Yaw turns +X toward +Y, pitch lifts +X toward +Z.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Rotator {
    pub pitch: f32,
    pub yaw: f32,
    pub roll: f32,
}

impl Rotator {
    pub const ZERO: Rotator = Rotator {
        pitch: 0.0,
        yaw: 0.0,
        roll: 0.0,
    };

    pub fn new(pitch: f32, yaw: f32, roll: f32) -> Self {
        Self { pitch, yaw, roll }
    }

    pub fn from_yaw(yaw: f32) -> Self {
        Self::new(0.0, yaw, 0.0)
    }

    /// Yaw and pitch of a direction; roll is zero.
    pub fn from_direction(dir: Vec3) -> Self {
        let planar = Vec2::new(dir.x, dir.y).length();
        Self::new(dir.z.atan2(planar).to_degrees(), dir.y.atan2(dir.x).to_degrees(), 0.0)
    }

    pub fn normalized(self) -> Self {
        Self::new(
            unwind_degrees(self.pitch),
            unwind_degrees(self.yaw),
            unwind_degrees(self.roll),
        )
    }

    /// Unit forward vector. Roll does not affect it.
    pub fn vector(self) -> Vec3 {
        let (sp, cp) = self.pitch.to_radians().sin_cos();
        let (sy, cy) = self.yaw.to_radians().sin_cos();
        Vec3::new(cp * cy, cp * sy, sp)
    }

    pub fn to_quat(self) -> Quat {
        Quat::from_rotation_z(self.yaw.to_radians())
            * Quat::from_rotation_y(-self.pitch.to_radians())
            * Quat::from_rotation_x(self.roll.to_radians())
    }

    pub fn is_nearly_zero(self) -> bool {
        self.pitch.abs() <= KINDA_SMALL_NUMBER
            && self.yaw.abs() <= KINDA_SMALL_NUMBER
            && self.roll.abs() <= KINDA_SMALL_NUMBER
    }
}

impl Add for Rotator {
    type Output = Rotator;

    fn add(self, rhs: Rotator) -> Rotator {
        Rotator::new(self.pitch + rhs.pitch, self.yaw + rhs.yaw, self.roll + rhs.roll)
    }
}

impl Sub for Rotator {
    type Output = Rotator;

    fn sub(self, rhs: Rotator) -> Rotator {
        Rotator::new(self.pitch - rhs.pitch, self.yaw - rhs.yaw, self.roll - rhs.roll)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_damper_alpha_half_life() {
        // After exactly one half-life, half the distance is covered
        let alpha = damper_exact_alpha(0.2, 0.2);
        assert!((alpha - 0.5).abs() < 1e-4);
    }

    #[test]
    fn test_damper_zero_dt_is_noop() {
        assert!((damper_exact(3.0, 10.0, 0.0, 0.1) - 3.0).abs() < f32::EPSILON);
        assert!((damper_exact(3.0, 10.0, -1.0, 0.1) - 3.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_damper_angle_takes_short_path() {
        let out = damper_exact_angle(170.0, -170.0, 0.1, 0.1);
        // Moves forward across the seam instead of sweeping back through zero
        assert!(out > 170.0 || out < -170.0);
    }

    #[test]
    fn test_spring_first_call_snaps() {
        let mut state = SpringState::<f32>::default();
        let out = spring_damper(&mut state, 0.0, 5.0, 0.016, 2.0, 1.0, 1.0);
        assert!((out - 5.0).abs() < f32::EPSILON);
        assert!(state.valid);
        assert!(state.velocity.abs() < f32::EPSILON);
    }

    #[test]
    fn test_spring_non_positive_dt_returns_current() {
        let mut state = SpringState::<Vec3>::default();
        let out = spring_damper(&mut state, Vec3::ONE, Vec3::ZERO, 0.0, 2.0, 1.0, 1.0);
        assert_eq!(out, Vec3::ONE);
        assert!(!state.valid);
    }

    #[test]
    fn test_spring_converges() {
        let mut state = SpringState::<f32>::default();
        let mut x = spring_damper(&mut state, 0.0, 0.0, 0.016, 3.0, 1.0, 1.0);
        for _ in 0..400 {
            x = spring_damper(&mut state, x, 1.0, 0.016, 3.0, 1.0, 0.0);
        }
        assert!((x - 1.0).abs() < 1e-3);
    }

    #[test]
    fn test_spring_stable_with_huge_step() {
        let mut state = SpringState::<f32>::default();
        let x = spring_damper(&mut state, 0.0, 0.0, 0.016, 10.0, 0.2, 1.0);
        let y = spring_damper(&mut state, x, 100.0, 5.0, 10.0, 0.2, 1.0);
        assert!(y.is_finite());
        assert!(y <= 100.0 + 1.0);
    }

    #[test]
    fn test_spring_angle_wraps() {
        let mut state = SpringState::<f32>::default();
        let x = spring_damper_angle(&mut state, 175.0, 175.0, 0.016, 4.0, 1.0, 1.0);
        let y = spring_damper_angle(&mut state, x, -175.0, 0.016, 4.0, 1.0, 0.0);
        assert!(y > 175.0 || y < -175.0);
    }

    #[test]
    fn test_unwind_degrees() {
        assert!((unwind_degrees(190.0) + 170.0).abs() < 1e-4);
        assert!((unwind_degrees(-190.0) - 170.0).abs() < 1e-4);
        assert!((unwind_degrees(540.0) - 180.0).abs() < 1e-4);
    }

    #[test]
    fn test_map_range_clamped() {
        assert!((map_range_clamped(0.0, 1.0, 300.0, 100.0, 0.5) - 200.0).abs() < 1e-4);
        assert!((map_range_clamped(0.0, 1.0, 300.0, 100.0, 2.0) - 100.0).abs() < 1e-4);
    }

    #[test]
    fn test_finterp_to() {
        assert!((finterp_to(0.0, 1.0, 0.1, 0.0) - 1.0).abs() < f32::EPSILON);
        assert!((finterp_to(0.0, 1.0, 0.01, 10.0) - 0.1).abs() < 1e-5);
        assert!((finterp_to(0.0, 1.0, 1.0, 10.0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_movement_direction() {
        assert_eq!(calculate_movement_direction(0.0, 70.0, 5.0), MovementDirection::Forward);
        assert_eq!(calculate_movement_direction(90.0, 70.0, 5.0), MovementDirection::Right);
        assert_eq!(calculate_movement_direction(-90.0, 70.0, 5.0), MovementDirection::Left);
        assert_eq!(calculate_movement_direction(179.0, 70.0, 5.0), MovementDirection::Backward);
    }

    #[test]
    fn test_pole_vector() {
        let (projection, pole) =
            try_calculate_pole_vector(Vec3::ZERO, Vec3::new(1.0, 1.0, 0.0), Vec3::new(2.0, 0.0, 0.0))
                .unwrap();
        assert!((projection - Vec3::new(1.0, 0.0, 0.0)).length() < 1e-5);
        assert!((pole - Vec3::Y).length() < 1e-5);

        assert!(try_calculate_pole_vector(Vec3::ZERO, Vec3::X, Vec3::X * 2.0).is_none());
        assert!(try_calculate_pole_vector(Vec3::ZERO, Vec3::ZERO, Vec3::X).is_none());
    }

    #[test]
    fn test_rotator_vector_matches_quat() {
        let rot = Rotator::new(20.0, 35.0, 10.0);
        let from_quat = rot.to_quat() * Vec3::X;
        assert!((from_quat - rot.vector()).length() < 1e-5);
    }

    #[test]
    fn test_rotator_from_direction() {
        let rot = Rotator::from_direction(Vec3::new(1.0, 1.0, 0.0));
        assert!((rot.yaw - 45.0).abs() < 1e-4);
        assert!(rot.pitch.abs() < 1e-4);
        let up = Rotator::from_direction(Vec3::new(1.0, 0.0, 1.0));
        assert!((up.pitch - 45.0).abs() < 1e-4);
    }
}
