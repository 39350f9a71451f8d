//! Per-stance gait speeds and the gait-amount curve.

use serde::{Deserialize, Serialize};

use crate::math::lerp;

/// One key of the acceleration/deceleration/friction curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GaitCurveKey {
    /// 0 = stopped, 1 = walk, 2 = run, 3 = sprint
    pub gait_amount: f32,
    pub acceleration: f32,
    pub deceleration: f32,
    pub ground_friction: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaitCurveSample {
    pub acceleration: f32,
    pub deceleration: f32,
    pub ground_friction: f32,
}

/// Piecewise-linear curve over gait amount. Keys must be sorted by `gait_amount`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct GaitCurve {
    pub keys: Vec<GaitCurveKey>,
}

impl GaitCurve {
    pub fn evaluate(&self, gait_amount: f32) -> Option<GaitCurveSample> {
        let first = self.keys.first()?;
        let sample = |k: &GaitCurveKey| GaitCurveSample {
            acceleration: k.acceleration,
            deceleration: k.deceleration,
            ground_friction: k.ground_friction,
        };
        if gait_amount <= first.gait_amount {
            return Some(sample(first));
        }

        for pair in self.keys.windows(2) {
            let (a, b) = (&pair[0], &pair[1]);
            if gait_amount <= b.gait_amount {
                let span = b.gait_amount - a.gait_amount;
                let t = if span > 0.0 {
                    (gait_amount - a.gait_amount) / span
                } else {
                    1.0
                };
                return Some(GaitCurveSample {
                    acceleration: lerp(a.acceleration, b.acceleration, t),
                    deceleration: lerp(a.deceleration, b.deceleration, t),
                    ground_friction: lerp(a.ground_friction, b.ground_friction, t),
                });
            }
        }

        self.keys.last().map(sample)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GaitSettings {
    /// Blend forward/backward speeds by the angle between velocity and view.
    pub allow_direction_dependent_speed: bool,
    pub walk_forward_speed: f32,
    pub walk_backward_speed: f32,
    pub run_forward_speed: f32,
    pub run_backward_speed: f32,
    pub sprint_speed: f32,
    pub curve: Option<GaitCurve>,
}

impl Default for GaitSettings {
    fn default() -> Self {
        Self {
            allow_direction_dependent_speed: false,
            walk_forward_speed: 175.0,
            walk_backward_speed: 175.0,
            run_forward_speed: 375.0,
            run_backward_speed: 375.0,
            sprint_speed: 650.0,
            curve: None,
        }
    }
}

impl GaitSettings {
    pub fn crouched() -> Self {
        Self {
            walk_forward_speed: 150.0,
            walk_backward_speed: 150.0,
            run_forward_speed: 200.0,
            run_backward_speed: 200.0,
            sprint_speed: 300.0,
            ..Default::default()
        }
    }

    pub fn max_walk_speed(&self) -> f32 {
        if self.allow_direction_dependent_speed {
            self.walk_forward_speed.max(self.walk_backward_speed)
        } else {
            self.walk_forward_speed
        }
    }

    pub fn max_run_speed(&self) -> f32 {
        if self.allow_direction_dependent_speed {
            self.run_forward_speed.max(self.run_backward_speed)
        } else {
            self.run_forward_speed
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn curve() -> GaitCurve {
        GaitCurve {
            keys: vec![
                GaitCurveKey {
                    gait_amount: 0.0,
                    acceleration: 800.0,
                    deceleration: 800.0,
                    ground_friction: 8.0,
                },
                GaitCurveKey {
                    gait_amount: 2.0,
                    acceleration: 1600.0,
                    deceleration: 1200.0,
                    ground_friction: 4.0,
                },
            ],
        }
    }

    #[test]
    fn test_curve_interpolates_and_clamps() {
        let c = curve();
        let mid = c.evaluate(1.0).unwrap();
        assert!((mid.acceleration - 1200.0).abs() < 1e-3);
        assert!((mid.ground_friction - 6.0).abs() < 1e-4);
        assert_eq!(c.evaluate(-1.0).unwrap().acceleration, 800.0);
        assert_eq!(c.evaluate(3.0).unwrap().deceleration, 1200.0);
        assert!(GaitCurve::default().evaluate(1.0).is_none());
    }

    #[test]
    fn test_max_speeds_direction_dependent() {
        let mut settings = GaitSettings {
            walk_backward_speed: 200.0,
            run_backward_speed: 300.0,
            ..Default::default()
        };
        assert_eq!(settings.max_walk_speed(), 175.0);
        settings.allow_direction_dependent_speed = true;
        assert_eq!(settings.max_walk_speed(), 200.0);
        assert_eq!(settings.max_run_speed(), 375.0);
    }
}
