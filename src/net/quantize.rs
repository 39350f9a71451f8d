//! Reduced-precision vectors for shot requests.
//!
//! `Quantized100` keeps two decimal places per component, `QuantizedNormal`
//! keeps a unit vector in 16 bits per component.

use bevy::math::Vec3;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Quantized100 {
    x: i32,
    y: i32,
    z: i32,
}

impl Quantized100 {
    const SCALE: f32 = 100.0;

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(
            self.x as f32 / Self::SCALE,
            self.y as f32 / Self::SCALE,
            self.z as f32 / Self::SCALE,
        )
    }

    fn quantize(value: f32) -> i32 {
        // `as` saturates; NaN becomes 0
        (value * Self::SCALE).round() as i32
    }
}

impl From<Vec3> for Quantized100 {
    fn from(v: Vec3) -> Self {
        Self {
            x: Self::quantize(v.x),
            y: Self::quantize(v.y),
            z: Self::quantize(v.z),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct QuantizedNormal {
    x: i16,
    y: i16,
    z: i16,
}

impl QuantizedNormal {
    const SCALE: f32 = i16::MAX as f32;

    pub fn to_vec3(self) -> Vec3 {
        Vec3::new(
            self.x as f32 / Self::SCALE,
            self.y as f32 / Self::SCALE,
            self.z as f32 / Self::SCALE,
        )
    }

    fn quantize(value: f32) -> i16 {
        if !value.is_finite() {
            return 0;
        }
        (value.clamp(-1.0, 1.0) * Self::SCALE).round() as i16
    }
}

impl From<Vec3> for QuantizedNormal {
    fn from(v: Vec3) -> Self {
        Self {
            x: Self::quantize(v.x),
            y: Self::quantize(v.y),
            z: Self::quantize(v.z),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quantized100_precision() {
        let v = Vec3::new(1234.5678, -0.004, 20000.0);
        let q = Quantized100::from(v).to_vec3();
        assert!((q.x - 1234.57).abs() < 1e-3);
        assert!(q.y.abs() < 1e-6);
        assert!((q.z - 20000.0).abs() < 1e-3);
    }

    #[test]
    fn test_quantized_normal_clamps() {
        let q = QuantizedNormal::from(Vec3::new(2.0, -3.0, f32::NAN)).to_vec3();
        assert_eq!(q, Vec3::new(1.0, -1.0, 0.0));
    }

    #[test]
    fn test_quantized_normal_keeps_direction() {
        let dir = Vec3::new(0.3, -0.5, 0.2).normalize();
        let q = QuantizedNormal::from(dir).to_vec3();
        assert!((q - dir).length() < 1e-4);
    }
}
