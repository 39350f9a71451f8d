//! Saved-move client prediction and server reconciliation.
//!
//! The owning client simulates each step immediately, records it as a
//! [`SavedMove`] and sends a [`ServerMove`]. The server replays the move
//! with the same stance and max gait, then acknowledges it or sends back
//! its own state. On a correction the client rewinds to the server state
//! and replays every move the server has not seen yet.

use std::collections::VecDeque;

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{CharacterMovement, Gait, MovementMode, MovementState, Stance};
use crate::constants::{MAX_COMBINED_MOVE_DELTA, MAX_LOCATION_ERROR, MAX_SAVED_MOVES};
use crate::net::{NetError, Outbox};

/// One predicted step, kept until the server acknowledges it.
#[derive(Debug, Clone, PartialEq)]
pub struct SavedMove {
    pub timestamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub stance: Stance,
    pub max_allowed_gait: Gait,
    pub jump: bool,
    pub start: MovementState,
    pub end: MovementState,
}

impl Default for SavedMove {
    fn default() -> Self {
        let rest = MovementState {
            location: Vec3::ZERO,
            velocity: Vec3::ZERO,
            mode: MovementMode::Walking,
        };
        Self {
            timestamp: 0.0,
            delta_time: 0.0,
            acceleration: Vec3::ZERO,
            stance: Stance::Standing,
            max_allowed_gait: Gait::Walking,
            jump: false,
            start: rest,
            end: rest,
        }
    }
}

impl SavedMove {
    pub fn clear(&mut self) {
        *self = Self::default();
    }

    /// Capture inputs and starting state before simulating.
    pub fn set_move_for(
        &mut self,
        movement: &CharacterMovement,
        timestamp: f32,
        delta_time: f32,
        acceleration: Vec3,
    ) {
        self.timestamp = timestamp;
        self.delta_time = delta_time;
        self.acceleration = acceleration;
        self.stance = movement.stance();
        self.max_allowed_gait = movement.max_allowed_gait();
        self.jump = movement.is_jump_pending();
        self.start = movement.state();
        self.end = self.start;
    }

    pub fn post_update(&mut self, movement: &CharacterMovement) {
        self.end = movement.state();
    }

    /// Whether `next` can be folded into this move.
    pub fn can_combine_with(&self, next: &SavedMove, max_delta: f32) -> bool {
        !self.jump
            && !next.jump
            && self.stance == next.stance
            && self.max_allowed_gait == next.max_allowed_gait
            && self.acceleration == next.acceleration
            && self.start.mode == next.start.mode
            && self.delta_time + next.delta_time <= max_delta
    }

    /// Restore the move's stance and gait caps before replaying it.
    pub fn prep_move_for(&self, movement: &mut CharacterMovement) {
        movement.set_stance(self.stance);
        movement.set_max_allowed_gait(self.max_allowed_gait);
        movement.set_jump_pending(self.jump);
        movement.refresh_gait_settings();
        movement.refresh_grounded_movement_settings();
    }

    pub fn to_server_move(&self) -> ServerMove {
        ServerMove {
            timestamp: self.timestamp,
            delta_time: self.delta_time,
            acceleration: self.acceleration,
            stance: self.stance,
            max_allowed_gait: self.max_allowed_gait,
            jump: self.jump,
            client_location: self.end.location,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerMove {
    pub timestamp: f32,
    pub delta_time: f32,
    pub acceleration: Vec3,
    pub stance: Stance,
    pub max_allowed_gait: Gait,
    #[serde(default)]
    pub jump: bool,
    pub client_location: Vec3,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MoveResponse {
    Ack {
        timestamp: f32,
    },
    Adjust {
        timestamp: f32,
        location: Vec3,
        velocity: Vec3,
        mode: MovementMode,
    },
}

// =====================================================
// Client
// =====================================================

#[derive(Debug, Clone, Default)]
pub struct ClientPrediction {
    clock: f32,
    /// Sent and waiting for a response, oldest first.
    saved_moves: VecDeque<SavedMove>,
    /// Simulated but not sent yet; later steps may fold into it.
    pending: Option<SavedMove>,
    outbox: Outbox<ServerMove>,
    corrections: u32,
}

impl ClientPrediction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn saved_move_count(&self) -> usize {
        self.saved_moves.len()
    }

    pub fn has_pending_move(&self) -> bool {
        self.pending.is_some()
    }

    pub fn corrections(&self) -> u32 {
        self.corrections
    }

    pub fn drain_server_moves(&mut self) -> Vec<ServerMove> {
        self.outbox.drain()
    }

    /// Simulate one step locally and queue it for the server.
    pub fn replicate_move_to_server(
        &mut self,
        movement: &mut CharacterMovement,
        dt: f32,
        acceleration: Vec3,
    ) {
        if dt <= 0.0 {
            return;
        }
        self.clock += dt;

        let mut new_move = SavedMove::default();
        new_move.set_move_for(movement, self.clock, dt, acceleration);

        if let Some(mut pending) = self.pending.take() {
            if pending.can_combine_with(&new_move, MAX_COMBINED_MOVE_DELTA) {
                // Re-simulate from the pending start so the result matches the server's single step
                movement.restore(pending.start);
                pending.prep_move_for(movement);
                pending.delta_time += dt;
                pending.timestamp = self.clock;
                movement.perform_move(pending.delta_time, pending.acceleration);
                pending.post_update(movement);
                self.pending = Some(pending);
                return;
            }
            self.send(pending);
        }

        movement.perform_move(dt, acceleration);
        new_move.post_update(movement);
        self.pending = Some(new_move);
    }

    /// Send the pending move now (before ragdoll and other discontinuities).
    pub fn flush_server_moves(&mut self) {
        if let Some(pending) = self.pending.take() {
            self.send(pending);
        }
    }

    fn send(&mut self, saved: SavedMove) {
        self.outbox.push(saved.to_server_move());
        self.saved_moves.push_back(saved);
        while self.saved_moves.len() > MAX_SAVED_MOVES {
            self.saved_moves.pop_front();
        }
    }

    pub fn handle_response(&mut self, movement: &mut CharacterMovement, response: &MoveResponse) {
        match *response {
            MoveResponse::Ack { timestamp } => self.acknowledge(timestamp),
            MoveResponse::Adjust {
                timestamp,
                location,
                velocity,
                mode,
            } => {
                self.acknowledge(timestamp);
                self.corrections += 1;
                debug!(
                    timestamp,
                    error = (movement.location - location).length(),
                    replay = self.saved_moves.len(),
                    "client position adjusted"
                );
                movement.restore(MovementState {
                    location,
                    velocity,
                    mode,
                });
                self.replay(movement);
            }
        }
    }

    fn acknowledge(&mut self, timestamp: f32) {
        while self
            .saved_moves
            .front()
            .is_some_and(|m| m.timestamp <= timestamp)
        {
            self.saved_moves.pop_front();
        }
    }

    fn replay(&mut self, movement: &mut CharacterMovement) {
        let (stance, gait) = (movement.stance(), movement.max_allowed_gait());
        for saved in self.saved_moves.iter_mut().chain(self.pending.iter_mut()) {
            saved.prep_move_for(movement);
            saved.start = movement.state();
            movement.perform_move(saved.delta_time, saved.acceleration);
            saved.post_update(movement);
        }
        // replayed jumps were already reported when first simulated
        movement.take_jumped();
        movement.set_stance(stance);
        movement.set_max_allowed_gait(gait);
        movement.refresh_grounded_movement_settings();
    }
}

// =====================================================
// Server
// =====================================================

/// Server-side validation and replay of one client's moves.
#[derive(Debug, Clone, Default)]
pub struct ServerMoveHandler {
    last_timestamp: Option<f32>,
    corrections_sent: u32,
}

impl ServerMoveHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn corrections_sent(&self) -> u32 {
        self.corrections_sent
    }

    /// Replay a client move. `Ok(None)` for stale moves that are silently dropped.
    pub fn handle_server_move(
        &mut self,
        movement: &mut CharacterMovement,
        server_move: &ServerMove,
    ) -> Result<Option<MoveResponse>, NetError> {
        if !server_move.timestamp.is_finite()
            || !server_move.delta_time.is_finite()
            || server_move.delta_time <= 0.0
            || !server_move.acceleration.is_finite()
            || !server_move.client_location.is_finite()
        {
            return Err(NetError::RejectedRpc("malformed server move".into()));
        }
        if self
            .last_timestamp
            .is_some_and(|last| server_move.timestamp <= last)
        {
            return Ok(None);
        }
        self.last_timestamp = Some(server_move.timestamp);

        let delta_time = server_move.delta_time.min(MAX_COMBINED_MOVE_DELTA);
        movement.set_stance(server_move.stance);
        movement.set_max_allowed_gait(server_move.max_allowed_gait);
        movement.set_jump_pending(server_move.jump);
        movement.refresh_grounded_movement_settings();
        let acceleration = server_move
            .acceleration
            .clamp_length_max(movement.max_acceleration());
        movement.perform_move(delta_time, acceleration);

        let error = (movement.location - server_move.client_location).length();
        if error > MAX_LOCATION_ERROR {
            self.corrections_sent += 1;
            warn!(timestamp = server_move.timestamp, error, "correcting client position");
            Ok(Some(MoveResponse::Adjust {
                timestamp: server_move.timestamp,
                location: movement.location,
                velocity: movement.velocity,
                mode: movement.mode(),
            }))
        } else {
            Ok(Some(MoveResponse::Ack {
                timestamp: server_move.timestamp,
            }))
        }
    }
}
