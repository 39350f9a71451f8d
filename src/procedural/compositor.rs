//! Fixed-order application of procedural outputs onto one bone.

use bevy::prelude::*;

use super::{Composition, OutputSpace, ProcStage, ProceduralOutput, COMPOSITION_ORDER};
use crate::constants::KINDA_SMALL_NUMBER;
use crate::math::clamp01;

/// The modified bone and its parent in component space, as sampled before
/// any procedural op runs.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoneFrame {
    pub bone_cs: Transform,
    pub parent_cs: Transform,
}

impl Default for BoneFrame {
    fn default() -> Self {
        Self {
            bone_cs: Transform::IDENTITY,
            parent_cs: Transform::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct StageOp {
    transform: Transform,
    weight: f32,
    space: OutputSpace,
    composition: Composition,
    transform_b: Transform,
    space_b: OutputSpace,
    dual_blend: f32,
}

#[derive(Debug, Clone, Default)]
pub struct Compositor {
    ops: [Vec<StageOp>; ProcStage::COUNT],
}

impl Compositor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn reset(&mut self) {
        for ops in &mut self.ops {
            ops.clear();
        }
    }

    pub fn op_count(&self) -> usize {
        self.ops.iter().map(Vec::len).sum()
    }

    /// Queue an output. Returns false when it would have no effect.
    pub fn push(&mut self, output: &ProceduralOutput) -> bool {
        if output.weight <= KINDA_SMALL_NUMBER {
            return false;
        }
        if output.composition == Composition::Additive && is_identity(&output.transform) {
            return false;
        }
        let stage = output.stage.unwrap_or(ProcStage::Additive);
        self.ops[stage.index()].push(StageOp {
            transform: output.transform,
            weight: clamp01(output.weight),
            space: output.space,
            composition: output.composition,
            transform_b: output.transform_b,
            space_b: output.space_b,
            dual_blend: clamp01(output.dual_blend),
        });
        true
    }

    pub fn evaluate(&self, frame: &BoneFrame) -> Transform {
        let mut pose = frame.bone_cs;
        for stage in COMPOSITION_ORDER {
            for op in &self.ops[stage.index()] {
                apply_op(&mut pose, op, frame);
            }
        }
        pose
    }
}

pub fn is_identity(transform: &Transform) -> bool {
    transform.translation.length_squared() <= KINDA_SMALL_NUMBER * KINDA_SMALL_NUMBER
        && transform.rotation.abs_diff_eq(Quat::IDENTITY, KINDA_SMALL_NUMBER)
}

fn space_base(space: OutputSpace, frame: &BoneFrame) -> Option<Transform> {
    match space {
        OutputSpace::Component => None,
        OutputSpace::Bone => Some(frame.bone_cs),
        OutputSpace::ParentBone => Some(frame.parent_cs),
    }
}

/// `transform` expressed relative to `base`. Scale is ignored.
fn relative_to(transform: &Transform, base: &Transform) -> Transform {
    let inverse = base.rotation.inverse();
    Transform {
        translation: inverse * (transform.translation - base.translation),
        rotation: inverse * transform.rotation,
        scale: Vec3::ONE,
    }
}

fn to_component_space(space: OutputSpace, transform: &Transform, frame: &BoneFrame) -> Transform {
    match space_base(space, frame) {
        None => *transform,
        Some(base) => base.mul_transform(*transform),
    }
}

fn apply_additive(pose: &mut Transform, space: OutputSpace, delta: &Transform, weight: f32, frame: &BoneFrame) {
    let rotation = Quat::IDENTITY.slerp(delta.rotation, weight);
    match space_base(space, frame) {
        None => {
            pose.translation += delta.translation * weight;
            pose.rotation = rotation * pose.rotation;
        }
        Some(base) => {
            let mut local = relative_to(pose, &base);
            local.translation += delta.translation * weight;
            local.rotation = rotation * local.rotation;
            *pose = base.mul_transform(local);
        }
    }
}

fn blend_toward(pose: &mut Transform, target: &Transform, alpha: f32) {
    pose.translation = pose.translation.lerp(target.translation, alpha);
    pose.rotation = pose.rotation.slerp(target.rotation, alpha);
}

fn apply_op(pose: &mut Transform, op: &StageOp, frame: &BoneFrame) {
    match op.composition {
        Composition::Additive => apply_additive(pose, op.space, &op.transform, op.weight, frame),
        Composition::LerpToTarget => {
            let target = to_component_space(op.space, &op.transform, frame);
            blend_toward(pose, &target, op.weight);
        }
        Composition::DualBlend => {
            let mut a = *pose;
            apply_additive(&mut a, op.space, &op.transform, 1.0, frame);
            let mut b = *pose;
            apply_additive(&mut b, op.space_b, &op.transform_b, 1.0, frame);
            blend_toward(&mut a, &b, op.dual_blend);
            blend_toward(pose, &a, op.weight);
        }
    }
}
