//! Shot geometry: spread, projectile directions and the replicated bullet record.

use bevy::math::Vec3;
use rand::Rng;
use serde::{Deserialize, Serialize};

use super::FireWeaponSettings;
use crate::constants::{
    IMPRECISION_SCALE, MAX_PROJECTILES_PER_SHOT, MULTI_PROJECTILE_SPREAD, SHOT_END_TOLERANCE,
};
use crate::math::{map_range_clamped, Rotator};
use crate::net::{NetError, QuantizedNormal, Quantized100};

/// Last fired shot. Also the payload of the shot request RPC.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct BulletData {
    pub start: Quantized100,
    pub directions: Vec<QuantizedNormal>,
    pub end_locations: Vec<Quantized100>,
    /// Bumped by the authority on every applied shot so identical shots still replicate.
    pub sequence: u32,
}

impl BulletData {
    pub fn new(start: Vec3, directions: &[Vec3], ends: &[Vec3]) -> Self {
        Self {
            start: start.into(),
            directions: directions
                .iter()
                .map(|d| QuantizedNormal::from(d.normalize_or_zero()))
                .collect(),
            end_locations: ends.iter().map(|&e| Quantized100::from(e)).collect(),
            sequence: 0,
        }
    }

    pub fn start_location(&self) -> Vec3 {
        self.start.to_vec3()
    }

    pub fn direction_vectors(&self) -> Vec<Vec3> {
        self.directions.iter().map(|d| d.to_vec3()).collect()
    }

    pub fn end_vectors(&self) -> Vec<Vec3> {
        self.end_locations.iter().map(|e| e.to_vec3()).collect()
    }

    pub fn projectile_count(&self) -> usize {
        self.end_locations.len()
    }

    /// Shape and range check for a shot arriving from a client. Quantized
    /// components are integers, so decoded vectors are always finite.
    pub fn validate(&self, trace_distance: f32) -> Result<(), NetError> {
        if self.directions.len() != self.end_locations.len() {
            return Err(NetError::RejectedRpc(format!(
                "shot has {} directions but {} end locations",
                self.directions.len(),
                self.end_locations.len()
            )));
        }
        if self.directions.is_empty() || self.directions.len() > MAX_PROJECTILES_PER_SHOT {
            return Err(NetError::RejectedRpc(format!(
                "shot projectile count {} outside 1..={}",
                self.directions.len(),
                MAX_PROJECTILES_PER_SHOT
            )));
        }
        if self
            .directions
            .iter()
            .any(|d| d.to_vec3().length_squared() < 0.5)
        {
            return Err(NetError::RejectedRpc("shot direction is not a unit vector".into()));
        }
        let start = self.start_location();
        let max_distance = trace_distance + SHOT_END_TOLERANCE;
        if let Some(end) = self
            .end_vectors()
            .into_iter()
            .find(|end| end.distance(start) > max_distance)
        {
            return Err(NetError::RejectedRpc(format!(
                "shot end {end} is {} from the start, beyond {trace_distance}",
                end.distance(start)
            )));
        }
        Ok(())
    }
}

/// Spread in degrees for a single-projectile shot.
///
/// Imprecision counts down from its max while firing; a full counter maps to
/// the minimum amount and an empty one to the maximum.
pub fn imprecision_spread(
    settings: &FireWeaponSettings,
    imprecision: i32,
    aiming_ratio: f32,
    owner_velocity: Vec3,
) -> f32 {
    let ratio = if settings.max_imprecision > 0 {
        imprecision as f32 / settings.max_imprecision as f32
    } else {
        0.0
    };
    let amount = map_range_clamped(
        0.0,
        1.0,
        settings.max_imprecision_amount,
        settings.min_imprecision_amount,
        ratio,
    );
    (amount + owner_velocity.length())
        * IMPRECISION_SCALE
        * (settings.imprecision_base_amount - aiming_ratio * settings.imprecision_amount_multiplier)
}

pub fn shot_spread(settings: &FireWeaponSettings, imprecision: i32, aiming: bool, velocity: Vec3) -> f32 {
    if settings.projectiles_per_shot == 1 {
        imprecision_spread(settings, imprecision, if aiming { 1.0 } else { 0.0 }, velocity)
    } else {
        MULTI_PROJECTILE_SPREAD
    }
}

/// Directions and trace ends for one shot. Each projectile is jittered
/// independently around `aim`.
pub fn compute_projectiles<R: Rng>(
    rng: &mut R,
    origin: Vec3,
    aim: Rotator,
    spread: f32,
    projectiles: u32,
    trace_distance: f32,
) -> (Vec<Vec3>, Vec<Vec3>) {
    let count = projectiles.max(1) as usize;
    let mut directions = Vec::with_capacity(count);
    let mut ends = Vec::with_capacity(count);

    for _ in 0..count {
        let mut rotation = aim;
        if spread > 0.0 {
            rotation = rotation
                + Rotator::new(
                    rng.gen_range(-spread..=spread),
                    rng.gen_range(-spread..=spread),
                    rng.gen_range(-spread..=spread),
                );
        }
        let dir = rotation.normalized().vector();
        directions.push(dir);
        ends.push(origin + dir * trace_distance);
    }

    (directions, ends)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256PlusPlus;

    #[test]
    fn test_spread_full_counter_is_tightest() {
        let settings = FireWeaponSettings::default();
        let full = imprecision_spread(&settings, settings.max_imprecision, 0.0, Vec3::ZERO);
        let empty = imprecision_spread(&settings, 0, 0.0, Vec3::ZERO);
        // 100 * 0.001 * 6 and 300 * 0.001 * 6
        assert!((full - 0.6).abs() < 1e-5);
        assert!((empty - 1.8).abs() < 1e-5);
    }

    #[test]
    fn test_spread_aiming_and_velocity() {
        let settings = FireWeaponSettings::default();
        let aimed = imprecision_spread(&settings, settings.max_imprecision, 1.0, Vec3::ZERO);
        assert!((aimed - 0.1).abs() < 1e-5);
        let moving = imprecision_spread(&settings, settings.max_imprecision, 0.0, Vec3::new(300.0, 0.0, 0.0));
        assert!((moving - 2.4).abs() < 1e-4);
    }

    #[test]
    fn test_multi_projectile_uses_fixed_spread() {
        let settings = FireWeaponSettings {
            projectiles_per_shot: 8,
            ..Default::default()
        };
        assert_eq!(shot_spread(&settings, 0, false, Vec3::ZERO), MULTI_PROJECTILE_SPREAD);
    }

    #[test]
    fn test_projectiles_stay_within_spread() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(3);
        let aim = Rotator::from_yaw(30.0);
        let (dirs, ends) = compute_projectiles(&mut rng, Vec3::ZERO, aim, 2.0, 8, 1000.0);
        assert_eq!(dirs.len(), 8);
        assert_eq!(ends.len(), 8);
        let forward = aim.vector();
        for (dir, end) in dirs.iter().zip(&ends) {
            // pitch and yaw each at most 2 degrees off
            assert!(dir.angle_between(forward).to_degrees() < 2.9);
            assert!((*end - *dir * 1000.0).length() < 1e-3);
        }
    }

    #[test]
    fn test_zero_spread_is_exact() {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(1);
        let (dirs, _) = compute_projectiles(&mut rng, Vec3::ZERO, Rotator::ZERO, 0.0, 1, 100.0);
        assert!((dirs[0] - Vec3::X).length() < 1e-6);
    }

    #[test]
    fn test_validate_rejects_mismatch() {
        let mut data = BulletData::new(Vec3::ZERO, &[Vec3::X], &[Vec3::X * 100.0]);
        assert!(data.validate(1000.0).is_ok());
        data.end_locations.push(Quantized100::default());
        assert!(data.validate(1000.0).is_err());
        let empty = BulletData::default();
        assert!(empty.validate(1000.0).is_err());
    }

    #[test]
    fn test_validate_rejects_ends_beyond_trace_distance() {
        let start = Vec3::new(0.0, 0.0, 150.0);
        let exact = BulletData::new(start, &[Vec3::X], &[start + Vec3::X * 1000.0]);
        assert!(exact.validate(1000.0).is_ok());

        let far = BulletData::new(start, &[Vec3::X], &[start + Vec3::X * 5000.0]);
        let err = far.validate(1000.0).unwrap_err();
        assert!(matches!(err, NetError::RejectedRpc(_)));

        // non-finite input saturates or zeroes on quantization and fails the range check
        let wild = BulletData::new(start, &[Vec3::X], &[Vec3::new(f32::INFINITY, 0.0, 0.0)]);
        assert!(wild.validate(1000.0).is_err());
    }
}
