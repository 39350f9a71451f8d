//! Centralized gameplay constants.
//!
//! Tuning defaults live on their settings structs (`FireWeaponSettings`,
//! `GaitSettings`, ...). This file holds the numeric thresholds that several
//! state machines must agree on.

// =====================================================
// Numeric tolerances
// =====================================================

/// Durations at or below this are treated as "finish immediately"
pub const KINDA_SMALL_NUMBER: f32 = 1.0e-4;

/// Guard for divisions by delta time and half-lives
pub const SMALL_NUMBER: f32 = 1.0e-8;

/// ln(2), used by the exact half-life damper
pub const LN2: f32 = std::f32::consts::LN_2;

// =====================================================
// Equipment
// =====================================================

/// Default inventory capacity of an equipment manager
pub const DEFAULT_MAX_SLOTS: usize = 6;

// =====================================================
// Weapons
// =====================================================

/// Fire interval used when the configured rate is not positive
pub const FALLBACK_FIRE_INTERVAL: f32 = 0.1;

/// Allowed fire-rate range in rounds per minute
pub const MIN_FIRE_RATE_RPM: f32 = 60.0;
pub const MAX_FIRE_RATE_RPM: f32 = 2000.0;

/// Spread (degrees) used for multi-projectile shots
pub const MULTI_PROJECTILE_SPREAD: f32 = 2.0;

/// Scale from imprecision amount units to spread degrees
pub const IMPRECISION_SCALE: f32 = 0.001;

/// Upper bound on projectiles accepted from a client shot request
pub const MAX_PROJECTILES_PER_SHOT: usize = 32;

/// Slack on client shot end distance for quantization
pub const SHOT_END_TOLERANCE: f32 = 1.0;

// =====================================================
// Locomotion
// =====================================================

/// Velocity-yaw hysteresis: enter floor and fraction of walk speed
pub const VELOCITY_YAW_ENTER_FLOOR: f32 = 40.0;
pub const VELOCITY_YAW_ENTER_FRACTION: f32 = 0.35;

/// Velocity-yaw hysteresis: exit floor and fraction of the enter threshold
pub const VELOCITY_YAW_EXIT_FLOOR: f32 = 25.0;
pub const VELOCITY_YAW_EXIT_FRACTION: f32 = 0.5;

/// Dot product between acceleration and velocity below which we are braking
pub const BRAKING_DOT: f32 = -0.2;

/// Dot product above which acceleration counts as steering toward velocity
pub const ACCEL_TOWARD_VELOCITY_DOT: f32 = 0.2;

/// Sprinting is refused when input deviates more than this from facing
pub const SPRINT_VIEW_RELATIVE_ANGLE: f32 = 50.0;

/// Speed margin below the next gait's cap before the gait tag switches
pub const GAIT_SPEED_MARGIN: f32 = 10.0;

/// A ragdoll this close above the ground stands back up grounded
pub const RAGDOLL_GROUND_TOLERANCE: f32 = 2.4;

// =====================================================
// Movement prediction
// =====================================================

/// Server tolerates this much client/server location error before correcting
pub const MAX_LOCATION_ERROR: f32 = 3.0;

/// Saved moves may be combined while their total duration stays under this
pub const MAX_COMBINED_MOVE_DELTA: f32 = 0.125;

/// Client keeps at most this many unacknowledged moves
pub const MAX_SAVED_MOVES: usize = 96;

/// Gravity along -Z (units/s^2)
pub const GRAVITY_Z: f32 = -980.0;

// =====================================================
// Character
// =====================================================

/// Muzzle traces start this far above the character's feet
pub const EYE_HEIGHT: f32 = 64.0;

/// Hit sphere radius registered for each character
pub const CHARACTER_HIT_RADIUS: f32 = 40.0;
