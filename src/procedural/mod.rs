//! Procedural motion pipeline.
//!
//! Each stage returns weighted deltas for one bone and never touches the
//! pose itself. A [`ProceduralRig`] runs its stages once per frame and feeds
//! the outputs to the [`Compositor`], which applies them in a fixed stage
//! order.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt::Debug;

pub mod compositor;
pub mod stages;

pub use compositor::{BoneFrame, Compositor};
pub use stages::{AdditiveStage, AdsStage, OffsetStage, RecoilStage, SwayStage};

use crate::math::Rotator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProcStage {
    PreOffset,
    Offset,
    Additive,
    Ads,
    Sway,
    Recoil,
    Post,
}

impl ProcStage {
    pub const COUNT: usize = 7;

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Order in which the compositor applies stages.
pub const COMPOSITION_ORDER: [ProcStage; ProcStage::COUNT] = [
    ProcStage::PreOffset,
    ProcStage::Offset,
    ProcStage::Ads,
    ProcStage::Additive,
    ProcStage::Sway,
    ProcStage::Recoil,
    ProcStage::Post,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum OutputSpace {
    #[default]
    Component,
    Bone,
    ParentBone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum Composition {
    /// Apply as a delta scaled by weight.
    #[default]
    Additive,
    /// Move the pose toward an absolute target by weight.
    LerpToTarget,
    /// Blend between two applications of the same delta, then by weight.
    DualBlend,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProceduralOutput {
    pub transform: Transform,
    pub weight: f32,
    /// `None` inherits the producing component's stage.
    pub stage: Option<ProcStage>,
    pub space: OutputSpace,
    pub composition: Composition,
    pub transform_b: Transform,
    pub space_b: OutputSpace,
    /// 0 uses `transform` in `space`, 1 uses `transform_b` in `space_b`.
    pub dual_blend: f32,
}

impl Default for ProceduralOutput {
    fn default() -> Self {
        Self {
            transform: Transform::IDENTITY,
            weight: 1.0,
            stage: None,
            space: OutputSpace::Component,
            composition: Composition::Additive,
            transform_b: Transform::IDENTITY,
            space_b: OutputSpace::Bone,
            dual_blend: 0.0,
        }
    }
}

impl ProceduralOutput {
    pub fn additive(transform: Transform, space: OutputSpace) -> Self {
        Self {
            transform,
            space,
            ..Default::default()
        }
    }
}

/// Per-frame input shared by every stage.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ProceduralInput {
    pub first_person: bool,
    pub pivot_offset: Vec3,
    pub ads_alpha: f32,
    pub aiming: bool,
    pub control_rotation: Rotator,
    pub actor_yaw: f32,
    /// Last world-space movement input, not normalized.
    pub movement_input: Vec3,
}

/// Animation curves a stage may read.
pub trait AnimContext {
    fn curve_value(&self, name: &str) -> f32;
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct CurveMap(pub HashMap<String, f32>);

impl CurveMap {
    pub fn set(&mut self, name: &str, value: f32) {
        self.0.insert(name.to_string(), value);
    }
}

impl AnimContext for CurveMap {
    fn curve_value(&self, name: &str) -> f32 {
        self.0.get(name).copied().unwrap_or(0.0)
    }
}

// =====================================================
// Stage contract
// =====================================================

pub trait ProceduralStage: Debug + Send + Sync {
    fn default_stage(&self) -> ProcStage;

    /// Single-output extension point.
    fn compute_output(
        &mut self,
        _dt: f32,
        _anim: &dyn AnimContext,
        _input: &ProceduralInput,
    ) -> Option<ProceduralOutput> {
        None
    }

    fn compute_outputs(
        &mut self,
        dt: f32,
        anim: &dyn AnimContext,
        input: &ProceduralInput,
        outputs: &mut Vec<ProceduralOutput>,
    ) {
        if let Some(output) = self.compute_output(dt, anim, input) {
            outputs.push(output);
        }
    }

    /// A shot was fired by the owner's weapon.
    fn on_shot(&mut self) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StageSettings {
    pub stage: ProcStage,
    pub enabled: bool,
    pub apply_in_first_person: bool,
    pub apply_in_third_person: bool,
}

/// One stage plus its gating flags and last outputs.
#[derive(Debug)]
pub struct ProceduralComponent {
    pub settings: StageSettings,
    stage: Box<dyn ProceduralStage>,
    cached: Vec<ProceduralOutput>,
}

impl ProceduralComponent {
    pub fn new(stage: impl ProceduralStage + 'static) -> Self {
        Self {
            settings: StageSettings {
                stage: stage.default_stage(),
                enabled: true,
                apply_in_first_person: true,
                apply_in_third_person: true,
            },
            stage: Box::new(stage),
            cached: Vec::new(),
        }
    }

    pub fn stage_mut(&mut self) -> &mut dyn ProceduralStage {
        self.stage.as_mut()
    }

    pub fn cached_outputs(&self) -> &[ProceduralOutput] {
        &self.cached
    }

    pub fn update_output(&mut self, dt: f32, anim: &dyn AnimContext, input: &ProceduralInput) {
        self.cached.clear();
        if !self.settings.enabled {
            return;
        }
        if (input.first_person && !self.settings.apply_in_first_person)
            || (!input.first_person && !self.settings.apply_in_third_person)
        {
            return;
        }
        self.stage.compute_outputs(dt, anim, input, &mut self.cached);
        for output in &mut self.cached {
            output.stage.get_or_insert(self.settings.stage);
        }
    }
}

// =====================================================
// Rig
// =====================================================

#[derive(Debug, Default)]
pub struct ProceduralRig {
    pub components: Vec<ProceduralComponent>,
    compositor: Compositor,
}

impl ProceduralRig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Offset, ADS, sway and recoil with default tuning.
    pub fn standard() -> Self {
        let mut rig = Self::new();
        rig.add(OffsetStage::default());
        rig.add(AdditiveStage::default());
        rig.add(AdsStage::default());
        rig.add(SwayStage::default());
        rig.add(RecoilStage::default());
        rig
    }

    pub fn add(&mut self, stage: impl ProceduralStage + 'static) -> &mut ProceduralComponent {
        self.components.push(ProceduralComponent::new(stage));
        let last = self.components.len() - 1;
        &mut self.components[last]
    }

    pub fn notify_shot(&mut self) {
        for component in &mut self.components {
            component.stage_mut().on_shot();
        }
    }

    /// Run every stage and rebuild the compositor's op lists.
    pub fn update(&mut self, dt: f32, anim: &dyn AnimContext, input: &ProceduralInput) {
        self.compositor.reset();
        for component in &mut self.components {
            component.update_output(dt, anim, input);
            for output in component.cached_outputs() {
                self.compositor.push(output);
            }
        }
    }

    pub fn compositor(&self) -> &Compositor {
        &self.compositor
    }

    pub fn evaluate(&self, frame: &BoneFrame) -> Transform {
        self.compositor.evaluate(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug)]
    struct Fixed(Vec3);

    impl ProceduralStage for Fixed {
        fn default_stage(&self) -> ProcStage {
            ProcStage::Post
        }

        fn compute_output(
            &mut self,
            _dt: f32,
            _anim: &dyn AnimContext,
            _input: &ProceduralInput,
        ) -> Option<ProceduralOutput> {
            Some(ProceduralOutput::additive(
                Transform::from_translation(self.0),
                OutputSpace::Component,
            ))
        }
    }

    #[test]
    fn test_single_output_inherits_stage() {
        let mut component = ProceduralComponent::new(Fixed(Vec3::X));
        component.update_output(0.016, &CurveMap::default(), &ProceduralInput::default());
        assert_eq!(component.cached_outputs().len(), 1);
        assert_eq!(component.cached_outputs()[0].stage, Some(ProcStage::Post));
    }

    #[test]
    fn test_view_gating() {
        let mut component = ProceduralComponent::new(Fixed(Vec3::X));
        component.settings.apply_in_third_person = false;
        let input = ProceduralInput::default();
        component.update_output(0.016, &CurveMap::default(), &input);
        assert!(component.cached_outputs().is_empty());

        let fp = ProceduralInput {
            first_person: true,
            ..input
        };
        component.update_output(0.016, &CurveMap::default(), &fp);
        assert_eq!(component.cached_outputs().len(), 1);

        component.settings.enabled = false;
        component.update_output(0.016, &CurveMap::default(), &fp);
        assert!(component.cached_outputs().is_empty());
    }

    #[test]
    fn test_rig_applies_outputs() {
        let mut rig = ProceduralRig::new();
        rig.add(Fixed(Vec3::new(0.0, 2.0, 0.0)));
        rig.update(0.016, &CurveMap::default(), &ProceduralInput::default());
        let pose = rig.evaluate(&BoneFrame::default());
        assert!((pose.translation - Vec3::new(0.0, 2.0, 0.0)).length() < 1e-5);
    }

    #[test]
    fn test_standard_rig_is_quiet_at_rest() {
        let mut rig = ProceduralRig::standard();
        rig.update(0.016, &CurveMap::default(), &ProceduralInput::default());
        let pose = rig.evaluate(&BoneFrame::default());
        assert!(pose.translation.length() < 1e-4);
    }

    #[test]
    fn test_curve_map_defaults_to_zero() {
        let mut curves = CurveMap::default();
        curves.set("IK_X", 2.0);
        assert_eq!(curves.curve_value("IK_X"), 2.0);
        assert_eq!(curves.curve_value("missing"), 0.0);
    }
}
