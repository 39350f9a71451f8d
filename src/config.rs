//! Gameplay configuration loaded from RON.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{error, info};

use crate::constants::{MAX_FIRE_RATE_RPM, MIN_FIRE_RATE_RPM};
use crate::equipment::EquipmentManagerSettings;
use crate::locomotion::LocomotionSettings;
use crate::logging::TracingConfig;
use crate::movement::MovementSettings;
use crate::weapon::FireWeaponSettings;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("RON parse error: {0}")]
    Ron(#[from] ron::error::SpannedError),
    #[error("RON serialize error: {0}")]
    RonSerialize(#[from] ron::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

#[derive(Resource, Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GameplayConfig {
    /// Simulation ticks per second.
    pub tick_rate: u32,
    /// Seed for shot spread.
    pub seed: u64,
    pub tracing: TracingConfig,
    pub equipment: EquipmentManagerSettings,
    pub weapon: FireWeaponSettings,
    pub movement: MovementSettings,
    pub locomotion: LocomotionSettings,
}

impl Default for GameplayConfig {
    fn default() -> Self {
        Self {
            tick_rate: 60,
            seed: 42,
            tracing: TracingConfig::default(),
            equipment: EquipmentManagerSettings::default(),
            weapon: FireWeaponSettings::default(),
            movement: MovementSettings::default(),
            locomotion: LocomotionSettings::default(),
        }
    }
}

impl GameplayConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config = Self::from_ron_str(&text)?;
        info!(path = %path.display(), "gameplay config loaded");
        Ok(config)
    }

    pub fn save<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_ron_string()?)?;
        Ok(())
    }

    /// Parse and validate.
    pub fn from_ron_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = ron::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_ron_string(&self) -> Result<String, ConfigError> {
        Ok(ron::ser::to_string_pretty(
            self,
            ron::ser::PrettyConfig::default(),
        )?)
    }

    pub fn to_json(&self) -> Result<String, ConfigError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn fixed_timestep(&self) -> f32 {
        1.0 / self.tick_rate.max(1) as f32
    }

    /// Reject values the simulation cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |reason: String| {
            error!(%reason, "invalid gameplay config");
            Err(ConfigError::Invalid(reason))
        };

        if self.tick_rate == 0 {
            return invalid("tick_rate must be positive".into());
        }
        if self.equipment.max_slots == 0 {
            return invalid("equipment.max_slots must be at least 1".into());
        }

        let weapon = &self.weapon;
        if !(MIN_FIRE_RATE_RPM..=MAX_FIRE_RATE_RPM).contains(&weapon.fire_rate_rpm) {
            return invalid(format!(
                "weapon.fire_rate_rpm {} outside {}..={}",
                weapon.fire_rate_rpm, MIN_FIRE_RATE_RPM, MAX_FIRE_RATE_RPM
            ));
        }
        if weapon.magazine_capacity < 0 || weapon.initial_total_ammo < 0 {
            return invalid("weapon ammo capacities must not be negative".into());
        }
        if weapon.burst_count < 1 {
            return invalid("weapon.burst_count must be at least 1".into());
        }
        if weapon.projectiles_per_shot == 0 {
            return invalid("weapon.projectiles_per_shot must be at least 1".into());
        }

        let movement = &self.movement;
        let gaits = movement
            .stances
            .iter()
            .map(|(stance, gait)| (format!("{stance:?}"), gait))
            .chain(std::iter::once(("fallback".to_string(), &movement.fallback_gait)));
        for (name, gait) in gaits {
            if gait.sprint_speed < gait.max_run_speed() {
                return invalid(format!(
                    "movement gait {name}: sprint speed {} below run speed {}",
                    gait.sprint_speed,
                    gait.max_run_speed()
                ));
            }
        }
        if movement.max_acceleration <= 0.0 {
            return invalid("movement.max_acceleration must be positive".into());
        }
        let (low, high) = movement.velocity_angle_range;
        if low > high {
            return invalid(format!("movement.velocity_angle_range ({low}, {high}) is reversed"));
        }
        Ok(())
    }
}

/// Inserts [`GameplayConfig`] unless one is already present.
pub struct GameplayConfigPlugin {
    pub config: Option<GameplayConfig>,
}

impl Plugin for GameplayConfigPlugin {
    fn build(&self, app: &mut App) {
        if app.world().contains_resource::<GameplayConfig>() {
            return;
        }
        app.insert_resource(self.config.clone().unwrap_or_default());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_is_valid() {
        assert!(GameplayConfig::default().validate().is_ok());
    }

    #[test]
    fn test_ron_round_trip() {
        let config = GameplayConfig::default();
        let text = config.to_ron_string().unwrap();
        assert_eq!(GameplayConfig::from_ron_str(&text).unwrap(), config);
    }

    #[test]
    fn test_json_round_trip() {
        let mut config = GameplayConfig::default();
        config.weapon.magazine_capacity = 12;
        let json = config.to_json().unwrap();
        assert_eq!(GameplayConfig::from_json(&json).unwrap(), config);
    }

    #[test]
    fn test_partial_ron_uses_defaults() {
        let config = GameplayConfig::from_ron_str("(tick_rate: 30, weapon: (burst_count: 4))").unwrap();
        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.weapon.burst_count, 4);
        assert_eq!(config.weapon.magazine_capacity, 30);
        assert_eq!(config.equipment.max_slots, 6);
    }

    #[test]
    fn test_rejects_bad_values() {
        let mut config = GameplayConfig::default();
        config.equipment.max_slots = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = GameplayConfig::default();
        config.weapon.fire_rate_rpm = 5000.0;
        assert!(config.validate().is_err());

        let mut config = GameplayConfig::default();
        config.weapon.magazine_capacity = -1;
        assert!(config.validate().is_err());

        let mut config = GameplayConfig::default();
        if let Some(gait) = config.movement.stances.values_mut().next() {
            gait.sprint_speed = 10.0;
        }
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_error_is_reported() {
        assert!(matches!(
            GameplayConfig::from_ron_str("(tick_rate: \"fast\")"),
            Err(ConfigError::Ron(_))
        ));
    }

    #[test]
    fn test_plugin_keeps_existing_resource() {
        let mut app = App::new();
        let custom = GameplayConfig {
            tick_rate: 20,
            ..Default::default()
        };
        app.insert_resource(custom.clone());
        app.add_plugins(GameplayConfigPlugin { config: None });
        assert_eq!(app.world().resource::<GameplayConfig>(), &custom);
    }
}
