//! Network roles, RPC surface and replication envelopes.
//!
//! Nothing here opens a socket. State machines push RPCs into an [`Outbox`],
//! the owning `Character` wraps them into [`NetMessage`]s, and whatever
//! transport the host uses (the in-process [`link::SimulatedLink`] for the
//! demo and tests) carries them as JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub mod link;
pub mod quantize;

pub use link::SimulatedLink;
pub use quantize::{QuantizedNormal, Quantized100};

use crate::character::CharacterSnapshot;
use crate::equipment::{EquipmentId, EquipmentMulticast, EquipmentRpc};
use crate::locomotion::{LocomotionMulticast, LocomotionRpc};
use crate::movement::prediction::{MoveResponse, ServerMove};
use crate::weapon::WeaponRpc;

#[derive(Error, Debug)]
pub enum NetError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("failed to decode message: {0}")]
    Decode(#[source] serde_json::Error),
    #[error("rejected rpc: {0}")]
    RejectedRpc(String),
}

/// Which copy of an actor this simulation is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NetRole {
    /// Server copy; owns the canonical state.
    Authority,
    /// Client copy controlled by the local player.
    AutonomousProxy,
    /// Client copy of someone else's actor.
    SimulatedProxy,
}

impl NetRole {
    pub fn has_authority(self) -> bool {
        self == NetRole::Authority
    }

    pub fn is_autonomous(self) -> bool {
        self == NetRole::AutonomousProxy
    }

    pub fn is_simulated(self) -> bool {
        self == NetRole::SimulatedProxy
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActorId(pub u64);

/// Receiver class for replicated state; owner-only fields are skipped for the owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReplicationTarget {
    Owner,
    NonOwner,
}

impl ReplicationTarget {
    pub fn skips_owner_fields(self) -> bool {
        self == ReplicationTarget::Owner
    }
}

/// Queue of outgoing messages owned by one state machine.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbox<M> {
    messages: Vec<M>,
}

impl<M> Default for Outbox<M> {
    fn default() -> Self {
        Self {
            messages: Vec::new(),
        }
    }
}

impl<M> Outbox<M> {
    pub fn push(&mut self, message: M) {
        self.messages.push(message);
    }

    pub fn drain(&mut self) -> Vec<M> {
        std::mem::take(&mut self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &M> {
        self.messages.iter()
    }
}

// =====================================================
// RPC surface
// =====================================================

/// Reliable client -> server calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ServerRpc {
    Equipment(EquipmentRpc),
    Weapon {
        equipment: EquipmentId,
        rpc: WeaponRpc,
    },
    Locomotion(LocomotionRpc),
    Move(ServerMove),
}

/// Reliable server -> every client calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MulticastRpc {
    Equipment(EquipmentMulticast),
    Locomotion(LocomotionMulticast),
}

/// Server -> owning client calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ClientRpc {
    Move(MoveResponse),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum NetMessage {
    Server { actor: ActorId, rpc: ServerRpc },
    Multicast { actor: ActorId, rpc: MulticastRpc },
    Client { actor: ActorId, rpc: ClientRpc },
    Replicate { actor: ActorId, state: CharacterSnapshot },
}

impl NetMessage {
    pub fn actor(&self) -> ActorId {
        match self {
            NetMessage::Server { actor, .. }
            | NetMessage::Multicast { actor, .. }
            | NetMessage::Client { actor, .. }
            | NetMessage::Replicate { actor, .. } => *actor,
        }
    }

    pub fn to_json(&self) -> Result<String, NetError> {
        serde_json::to_string(self).map_err(NetError::Encode)
    }

    pub fn from_json(json: &str) -> Result<Self, NetError> {
        serde_json::from_str(json).map_err(NetError::Decode)
    }
}
