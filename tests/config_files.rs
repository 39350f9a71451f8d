//! Config files on disk
//!
//! - The shipped `config/gameplay.ron` parses and validates
//! - Save then load through a temp dir preserves every field
//! - Missing, malformed and out-of-range files fail with the right error

use std::io::Write;

use gameplay_core::config::{ConfigError, GameplayConfig};
use gameplay_core::locomotion::LocomotionSettings;
use gameplay_core::logging::LogLevel;
use gameplay_core::weapon::FireMode;
use tempfile::NamedTempFile;

const SHIPPED: &str = include_str!("../config/gameplay.ron");

fn write_temp(contents: &str) -> NamedTempFile {
    let mut file = NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

#[test]
fn shipped_config_is_valid() {
    let config = GameplayConfig::from_ron_str(SHIPPED).unwrap();
    assert_eq!(config.tick_rate, 60);
    assert_eq!(config.weapon.fire_mode, FireMode::Semi);
    assert_eq!(config.weapon.magazine_capacity, 30);
    assert_eq!(config.tracing.default_level, LogLevel::Info);
    // fields the file leaves out fall back to defaults
    assert_eq!(config.locomotion, LocomotionSettings::default());
    assert_eq!(config.movement.stances, GameplayConfig::default().movement.stances);
}

#[test]
fn save_then_load_preserves_fields() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("gameplay.ron");

    let mut config = GameplayConfig {
        tick_rate: 30,
        seed: 7,
        ..Default::default()
    };
    config.weapon.fire_mode = FireMode::Auto;
    config.weapon.magazine_capacity = 45;
    config.equipment.max_slots = 3;
    config.movement.max_walk_speed = 300.0;
    config.tracing.default_level = LogLevel::Debug;
    config.save(&path).unwrap();

    let loaded = GameplayConfig::load(&path).unwrap();
    assert_eq!(loaded, config);
    assert!((loaded.fixed_timestep() - 1.0 / 30.0).abs() < 1e-6);
}

#[test]
fn missing_file_is_an_io_error() {
    let dir = tempfile::tempdir().unwrap();
    let result = GameplayConfig::load(dir.path().join("nope.ron"));
    assert!(matches!(result, Err(ConfigError::Io(_))));
}

#[test]
fn malformed_file_is_a_parse_error() {
    let file = write_temp("(tick_rate: 60, weapon: (fire_mode: Laser))");
    assert!(matches!(GameplayConfig::load(file.path()), Err(ConfigError::Ron(_))));
}

#[test]
fn out_of_range_file_fails_validation() {
    let file = write_temp("(tick_rate: 0)");
    assert!(matches!(GameplayConfig::load(file.path()), Err(ConfigError::Invalid(_))));

    let file = write_temp("(weapon: (burst_count: 0))");
    assert!(matches!(GameplayConfig::load(file.path()), Err(ConfigError::Invalid(_))));

    let file = write_temp("(movement: (velocity_angle_range: (125.0, 100.0)))");
    let err = GameplayConfig::load(file.path()).unwrap_err();
    assert!(err.to_string().contains("velocity_angle_range"), "{err}");
}

#[test]
fn json_export_reloads() {
    let config = GameplayConfig::from_ron_str(SHIPPED).unwrap();
    let json = config.to_json().unwrap();
    assert_eq!(GameplayConfig::from_json(&json).unwrap(), config);
}
