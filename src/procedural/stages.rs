//! Concrete procedural stages.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};

use super::compositor::is_identity;
use super::{
    AnimContext, Composition, OutputSpace, ProcStage, ProceduralInput, ProceduralOutput,
    ProceduralStage,
};
use crate::constants::KINDA_SMALL_NUMBER;
use crate::math::{clamp01, damper_exact, finterp_to, spring_damper, Rotator, SpringState};

// =====================================================
// Offset
// =====================================================

/// First/third-person view offsets.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OffsetStage {
    pub alpha: f32,
    pub rotation_fp: Rotator,
    pub location_fp: Vec3,
    pub location_tp: Vec3,
}

impl Default for OffsetStage {
    fn default() -> Self {
        Self {
            alpha: 1.0,
            rotation_fp: Rotator::ZERO,
            location_fp: Vec3::ZERO,
            location_tp: Vec3::ZERO,
        }
    }
}

impl ProceduralStage for OffsetStage {
    fn default_stage(&self) -> ProcStage {
        ProcStage::Offset
    }

    fn compute_outputs(
        &mut self,
        _dt: f32,
        _anim: &dyn AnimContext,
        input: &ProceduralInput,
        outputs: &mut Vec<ProceduralOutput>,
    ) {
        let (fp_weight, tp_weight) = if input.first_person {
            (self.alpha, 0.0)
        } else {
            (0.0, self.alpha)
        };

        if fp_weight > KINDA_SMALL_NUMBER && !self.rotation_fp.is_nearly_zero() {
            let rotation = Quat::IDENTITY.slerp(self.rotation_fp.to_quat(), clamp01(fp_weight));
            outputs.push(ProceduralOutput {
                stage: Some(ProcStage::Offset),
                ..ProceduralOutput::additive(Transform::from_rotation(rotation), OutputSpace::Bone)
            });
        }

        let translation = self.location_fp * fp_weight + self.location_tp * tp_weight;
        if translation.length_squared() > KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER {
            outputs.push(ProceduralOutput {
                stage: Some(ProcStage::Offset),
                ..ProceduralOutput::additive(
                    Transform::from_translation(translation),
                    OutputSpace::Component,
                )
            });
        }
    }
}

// =====================================================
// Additive (animation curves)
// =====================================================

/// IK deltas read from animation curves, masked while sprinting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdditiveStage {
    pub curve_alpha: f32,
    pub curve_x: String,
    pub curve_y: String,
    pub curve_z: String,
    pub curve_roll: String,
    pub curve_pitch: String,
    pub curve_yaw: String,
    pub curve_mask_sprint: String,
}

impl Default for AdditiveStage {
    fn default() -> Self {
        Self {
            curve_alpha: 1.0,
            curve_x: "IK_X".into(),
            curve_y: "IK_Y".into(),
            curve_z: "IK_Z".into(),
            curve_roll: "IK_Roll".into(),
            curve_pitch: "IK_Pitch".into(),
            curve_yaw: "IK_Yaw".into(),
            curve_mask_sprint: "MaskSprint".into(),
        }
    }
}

impl ProceduralStage for AdditiveStage {
    fn default_stage(&self) -> ProcStage {
        ProcStage::Additive
    }

    fn compute_output(
        &mut self,
        _dt: f32,
        anim: &dyn AnimContext,
        _input: &ProceduralInput,
    ) -> Option<ProceduralOutput> {
        if self.curve_alpha <= KINDA_SMALL_NUMBER {
            return None;
        }
        let mask = 1.0 - clamp01(anim.curve_value(&self.curve_mask_sprint));
        let alpha = clamp01(self.curve_alpha * mask);

        let curve_rotation = Rotator::new(
            anim.curve_value(&self.curve_pitch),
            anim.curve_value(&self.curve_yaw),
            anim.curve_value(&self.curve_roll),
        );
        let translation = Vec3::new(
            anim.curve_value(&self.curve_x),
            anim.curve_value(&self.curve_y),
            anim.curve_value(&self.curve_z),
        );
        let transform = Transform {
            translation: translation * self.curve_alpha * mask,
            rotation: Quat::IDENTITY.slerp(curve_rotation.to_quat(), alpha),
            scale: Vec3::ONE,
        };
        if is_identity(&transform) {
            return None;
        }
        Some(ProceduralOutput::additive(transform, OutputSpace::Component))
    }
}

// =====================================================
// ADS
// =====================================================

/// Aim-down-sights: pull the bone to an absolute reset rotation and add
/// the sight offset, both weighted by the weapon's ADS alpha.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdsStage {
    pub ads_offset: Vec3,
    pub ads_rotation: Rotator,
    pub absolute_reset_rotation: Rotator,
}

impl Default for AdsStage {
    fn default() -> Self {
        Self {
            ads_offset: Vec3::ZERO,
            ads_rotation: Rotator::ZERO,
            absolute_reset_rotation: Rotator::new(0.0, -90.0, 0.0),
        }
    }
}

impl ProceduralStage for AdsStage {
    fn default_stage(&self) -> ProcStage {
        ProcStage::Ads
    }

    fn compute_outputs(
        &mut self,
        _dt: f32,
        _anim: &dyn AnimContext,
        input: &ProceduralInput,
        outputs: &mut Vec<ProceduralOutput>,
    ) {
        let alpha = input.ads_alpha;
        if alpha <= KINDA_SMALL_NUMBER {
            return;
        }
        outputs.push(ProceduralOutput {
            transform: Transform::from_rotation(self.absolute_reset_rotation.to_quat()),
            weight: alpha,
            stage: Some(ProcStage::Ads),
            space: OutputSpace::ParentBone,
            composition: Composition::LerpToTarget,
            ..Default::default()
        });

        let aim_point = Transform {
            translation: self.ads_offset + input.pivot_offset,
            rotation: self.ads_rotation.to_quat(),
            scale: Vec3::ONE,
        };
        if !is_identity(&aim_point) {
            outputs.push(ProceduralOutput {
                weight: alpha,
                stage: Some(ProcStage::Ads),
                ..ProceduralOutput::additive(aim_point, OutputSpace::Component)
            });
        }
    }
}

// =====================================================
// Sway
// =====================================================

/// Per-axis spring tuning. Rotation axes are (roll, pitch, yaw).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SpringAxisSettings {
    pub frequency: Vec3,
    pub damping_ratio: Vec3,
    /// Speed of the target's approach to the raw input.
    pub smooth_speed: Vec3,
    /// Multiplier on dt inside the spring.
    pub time_scale: Vec3,
    pub scale: Vec3,
    pub threshold: Vec3,
}

impl Default for SpringAxisSettings {
    fn default() -> Self {
        Self {
            frequency: Vec3::splat(4.0),
            damping_ratio: Vec3::ONE,
            smooth_speed: Vec3::splat(10.0),
            time_scale: Vec3::ONE,
            scale: Vec3::ONE,
            threshold: Vec3::splat(10.0),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SwayChannelSettings {
    pub translation: SpringAxisSettings,
    pub rotation: SpringAxisSettings,
}

#[derive(Debug, Clone, Copy, Default)]
struct SwayChannel {
    target_translation: Vec3,
    /// (roll, pitch, yaw)
    target_rotation: Vec3,
    translation: Vec3,
    rotation: Vec3,
    translation_springs: [SpringState<f32>; 3],
    rotation_springs: [SpringState<f32>; 3],
}

impl SwayChannel {
    fn refresh_output(&mut self, dt: f32, settings: &SwayChannelSettings, weight: f32) -> (Vec3, Vec3) {
        self.translation = spring_axes(
            &mut self.translation_springs,
            self.translation,
            self.target_translation,
            dt,
            &settings.translation,
        );
        self.rotation = spring_axes(
            &mut self.rotation_springs,
            self.rotation,
            self.target_rotation,
            dt,
            &settings.rotation,
        );
        (self.translation * weight, self.rotation * weight)
    }

    fn reset(&mut self) {
        *self = Self::default();
    }
}

fn spring_axes(
    springs: &mut [SpringState<f32>; 3],
    current: Vec3,
    target: Vec3,
    dt: f32,
    settings: &SpringAxisSettings,
) -> Vec3 {
    let mut out = current.to_array();
    let (target, frequency, damping, time_scale) = (
        target.to_array(),
        settings.frequency.to_array(),
        settings.damping_ratio.to_array(),
        settings.time_scale.to_array(),
    );
    for axis in 0..3 {
        out[axis] = spring_damper(
            &mut springs[axis],
            out[axis],
            target[axis],
            dt * time_scale[axis],
            frequency[axis],
            damping[axis],
            1.0,
        );
    }
    Vec3::from_array(out)
}

fn clamp_axes(value: Vec3, threshold: Vec3) -> Vec3 {
    value.clamp(-threshold.abs(), threshold.abs())
}

fn approach(current: Vec3, target: Vec3, dt: f32, speed: Vec3) -> Vec3 {
    Vec3::new(
        finterp_to(current.x, target.x, dt, speed.x),
        finterp_to(current.y, target.y, dt, speed.y),
        finterp_to(current.z, target.z, dt, speed.z),
    )
}

/// Aim sway from view rotation changes and move sway from movement input,
/// both through springs.
#[derive(Debug, Clone)]
pub struct SwayStage {
    pub aim: SwayChannelSettings,
    pub movement: SwayChannelSettings,
    pub sway_scale: f32,
    pub ads_scale: f32,
    pub scale_with_ads: bool,
    pub pivot_offset: Vec3,
    /// Derive inputs from the control rotation and movement input.
    pub auto_read_input: bool,
    pub mouse_to_input_yaw: f32,
    pub mouse_to_input_pitch: f32,
    pub move_vector_scale: f32,

    /// x = yaw delta, y = pitch delta
    mouse_delta: Vec2,
    /// x = strafe right, y = forward
    move_input: Vec2,
    last_control_rotation: Option<Rotator>,
    aim_channel: SwayChannel,
    move_channel: SwayChannel,
}

impl Default for SwayStage {
    fn default() -> Self {
        Self {
            aim: SwayChannelSettings::default(),
            movement: SwayChannelSettings::default(),
            sway_scale: 1.0,
            ads_scale: 0.3,
            scale_with_ads: true,
            pivot_offset: Vec3::ZERO,
            auto_read_input: true,
            mouse_to_input_yaw: 1.0,
            mouse_to_input_pitch: 1.0,
            move_vector_scale: 1.0,
            mouse_delta: Vec2::ZERO,
            move_input: Vec2::ZERO,
            last_control_rotation: None,
            aim_channel: SwayChannel::default(),
            move_channel: SwayChannel::default(),
        }
    }
}

impl SwayStage {
    /// Feed inputs directly when `auto_read_input` is off.
    pub fn set_inputs(&mut self, mouse_delta: Vec2, move_input: Vec2) {
        self.mouse_delta = mouse_delta;
        self.move_input = move_input;
    }

    pub fn reset(&mut self) {
        self.aim_channel.reset();
        self.move_channel.reset();
        self.last_control_rotation = None;
    }

    fn acquire_inputs(&mut self, input: &ProceduralInput) {
        if !self.auto_read_input {
            return;
        }
        let control = input.control_rotation;
        if let Some(last) = self.last_control_rotation {
            let delta = (control - last).normalized();
            self.mouse_delta = Vec2::new(
                delta.yaw * self.mouse_to_input_yaw,
                delta.pitch * self.mouse_to_input_pitch,
            );
        }
        self.last_control_rotation = Some(control);

        let facing = Rotator::from_yaw(input.actor_yaw).to_quat();
        let forward = facing * Vec3::X;
        let right = facing * Vec3::Y;
        self.move_input = Vec2::new(
            (input.movement_input.dot(right) * self.move_vector_scale).clamp(-1.0, 1.0),
            (input.movement_input.dot(forward) * self.move_vector_scale).clamp(-1.0, 1.0),
        );
    }

    fn refresh_targets(&mut self, dt: f32) {
        let mouse = self.mouse_delta;
        let rotation = &self.aim.rotation;
        let raw = clamp_axes(
            Vec3::new(rotation.scale.x * mouse.x, rotation.scale.y * mouse.y, rotation.scale.z * mouse.x),
            rotation.threshold,
        );
        self.aim_channel.target_rotation =
            approach(self.aim_channel.target_rotation, raw, dt, rotation.smooth_speed);
        let translation = &self.aim.translation;
        let raw = clamp_axes(
            Vec3::new(0.0, translation.scale.y * mouse.x, translation.scale.z * mouse.y),
            translation.threshold,
        );
        self.aim_channel.target_translation =
            approach(self.aim_channel.target_translation, raw, dt, translation.smooth_speed);

        let movement = self.move_input;
        let rotation = &self.movement.rotation;
        let raw = clamp_axes(
            Vec3::new(
                rotation.scale.x * movement.x,
                rotation.scale.y * movement.y,
                rotation.scale.z * movement.x,
            ),
            rotation.threshold,
        );
        self.move_channel.target_rotation =
            approach(self.move_channel.target_rotation, raw, dt, rotation.smooth_speed);
        let translation = &self.movement.translation;
        let raw = clamp_axes(
            Vec3::new(
                translation.scale.x * movement.y,
                translation.scale.y * movement.x,
                translation.scale.z * movement.y,
            ),
            translation.threshold,
        );
        self.move_channel.target_translation =
            approach(self.move_channel.target_translation, raw, dt, translation.smooth_speed);
    }
}

fn rotator_from_axes(axes: Vec3) -> Rotator {
    // axes are (roll, pitch, yaw)
    Rotator::new(axes.y, axes.z, axes.x)
}

impl ProceduralStage for SwayStage {
    fn default_stage(&self) -> ProcStage {
        ProcStage::Sway
    }

    fn compute_output(
        &mut self,
        dt: f32,
        _anim: &dyn AnimContext,
        input: &ProceduralInput,
    ) -> Option<ProceduralOutput> {
        self.acquire_inputs(input);
        self.refresh_targets(dt);

        let weight = self.sway_scale
            * if self.scale_with_ads && input.aiming {
                self.ads_scale
            } else {
                1.0
            };
        let (aim_translation, aim_rotation) = self.aim_channel.refresh_output(dt, &self.aim, weight);
        let (move_translation, move_rotation) =
            self.move_channel.refresh_output(dt, &self.movement, weight);

        let rotation =
            rotator_from_axes(aim_rotation).to_quat() * rotator_from_axes(move_rotation).to_quat();
        let pivot = self.pivot_offset;
        let transform = Transform {
            translation: aim_translation + move_translation + (rotation * pivot - pivot),
            rotation,
            scale: Vec3::ONE,
        };
        if is_identity(&transform) {
            return None;
        }
        Some(ProceduralOutput {
            stage: Some(ProcStage::Sway),
            ..ProceduralOutput::additive(transform, OutputSpace::Component)
        })
    }
}

// =====================================================
// Recoil
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecoilStage {
    /// Offset added per shot.
    pub kick_translation: Vec3,
    pub kick_rotation: Rotator,
    /// Accumulated kick is capped at this many shots' worth.
    pub max_accumulated_shots: f32,
    pub decay_half_life: f32,

    #[serde(skip)]
    translation: Vec3,
    #[serde(skip)]
    rotation: Vec3,
}

impl Default for RecoilStage {
    fn default() -> Self {
        Self {
            kick_translation: Vec3::new(-1.5, 0.0, 0.25),
            kick_rotation: Rotator::new(2.0, 0.0, 0.0),
            max_accumulated_shots: 4.0,
            decay_half_life: 0.06,
            translation: Vec3::ZERO,
            rotation: Vec3::ZERO,
        }
    }
}

impl RecoilStage {
    pub fn kick(&mut self) {
        let max_translation = self.kick_translation.abs() * self.max_accumulated_shots;
        let kick_rotation = Vec3::new(
            self.kick_rotation.pitch,
            self.kick_rotation.yaw,
            self.kick_rotation.roll,
        );
        let max_rotation = kick_rotation.abs() * self.max_accumulated_shots;
        self.translation = (self.translation + self.kick_translation).clamp(-max_translation, max_translation);
        self.rotation = (self.rotation + kick_rotation).clamp(-max_rotation, max_rotation);
    }

    pub fn current_offset(&self) -> Transform {
        Transform {
            translation: self.translation,
            rotation: Rotator::new(self.rotation.x, self.rotation.y, self.rotation.z).to_quat(),
            scale: Vec3::ONE,
        }
    }
}

impl ProceduralStage for RecoilStage {
    fn default_stage(&self) -> ProcStage {
        ProcStage::Recoil
    }

    fn on_shot(&mut self) {
        self.kick();
    }

    fn compute_output(
        &mut self,
        dt: f32,
        _anim: &dyn AnimContext,
        input: &ProceduralInput,
    ) -> Option<ProceduralOutput> {
        let offset = self.current_offset();
        self.translation = damper_exact(self.translation, Vec3::ZERO, dt, self.decay_half_life);
        self.rotation = damper_exact(self.rotation, Vec3::ZERO, dt, self.decay_half_life);
        if is_identity(&offset) {
            return None;
        }
        // hip fire kicks in component space, aimed fire along the bone
        Some(ProceduralOutput {
            transform: offset,
            space: OutputSpace::Component,
            transform_b: offset,
            space_b: OutputSpace::Bone,
            dual_blend: clamp01(input.ads_alpha),
            composition: Composition::DualBlend,
            stage: Some(ProcStage::Recoil),
            ..Default::default()
        })
    }
}
