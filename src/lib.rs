//! Gameplay Core Library
//!
//! Deterministic gameplay logic for a networked first/third-person shooter:
//! - Equipment slots with an authoritative holster-then-draw flow
//! - Fire weapons (fire modes, bursts, reloads, spread, hit-scan shots)
//! - Character movement with saved-move client prediction
//! - Locomotion state (stance, gait, view, aiming, ragdoll)
//! - Procedural first-person motion (offset, ADS, sway, recoil)
//! - Role-aware RPC and replication envelopes
//!
//! Every system is a plain state machine that also plugs into Bevy.

pub mod character;
pub mod combat;
pub mod config;
pub mod constants;
pub mod equipment;
pub mod locomotion;
pub mod logging;
pub mod math;
pub mod movement;
pub mod net;
pub mod procedural;
pub mod timers;
pub mod weapon;
