//! Equippable items and the slot manager that switches between them.
//!
//! [`Equipment`] is a single item with its own equip state and animation
//! timings; [`manager::EquipmentManager`] owns the slots and runs the
//! authoritative holster-then-draw flow.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

pub mod manager;

pub use manager::{
    EquipmentManager, EquipmentManagerEvent, EquipmentManagerSettings, EquipmentMulticast,
    EquipmentRpc, EquipmentSnapshot, FlowPhase, SlotSnapshot,
};

use crate::combat::CombatWorld;
use crate::net::{ActorId, NetRole};
use crate::weapon::{FireWeapon, FireWeaponSettings};

pub struct EquipmentPlugin;

impl Plugin for EquipmentPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<EquipmentNotification>();
    }
}

#[derive(Event, Debug, Clone)]
pub struct EquipmentNotification {
    pub entity: Entity,
    pub event: EquipmentManagerEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EquipmentId(pub u64);

impl std::fmt::Display for EquipmentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "equipment#{}", self.0)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EquipmentError {
    #[error("{0} requires authority")]
    NoAuthority(&'static str),
    #[error("slot {index} out of range (capacity {capacity})")]
    InvalidSlot { index: usize, capacity: usize },
    #[error("slot {0} is empty")]
    EmptySlot(usize),
    #[error("no free equipment slot")]
    NoFreeSlot,
    #[error("{0} is not in any slot")]
    UnknownEquipment(EquipmentId),
}

/// Failed add. The equipment is handed back to the caller.
#[derive(Error, Debug)]
#[error("{error}")]
pub struct AddEquipmentError {
    pub error: EquipmentError,
    pub equipment: Box<Equipment>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EquipState {
    Idle,
    Equipping,
    Equipped,
    Unequipping,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RemoveReason {
    GenericRemove,
    OwnerDeath,
}

/// Where the item hangs on its owner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attachment {
    Detached,
    FirstPersonHolder,
    ThirdPersonHolder,
}

// =====================================================
// Animation timings
// =====================================================

/// Montage lengths in seconds for one transition; 0 means no montage.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipAnimationSet {
    pub character_first_person: f32,
    pub character_third_person: f32,
    pub equipment_first_person: f32,
    pub equipment_third_person: f32,
}

impl EquipAnimationSet {
    pub fn first_person(&self) -> f32 {
        self.character_first_person.max(self.equipment_first_person)
    }

    pub fn third_person(&self) -> f32 {
        self.character_third_person.max(self.equipment_third_person)
    }

    /// Duration of the transition as played. Third person wins when both play.
    pub fn duration(&self, first_person: bool, third_person: bool) -> f32 {
        let mut duration = 0.0;
        if first_person {
            duration = self.first_person();
        }
        if third_person {
            duration = self.third_person();
        }
        duration.max(0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentAnimData {
    pub equip: EquipAnimationSet,
    pub unequip: EquipAnimationSet,
}

impl EquipmentAnimData {
    pub fn uniform(equip: f32, unequip: f32) -> Self {
        let set = |d: f32| EquipAnimationSet {
            character_first_person: d,
            character_third_person: d,
            equipment_first_person: d,
            equipment_third_person: d,
        };
        Self {
            equip: set(equip),
            unequip: set(unequip),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EquipmentKind {
    Generic,
    FireWeapon(FireWeaponSettings),
}

/// Replicated description of a slot's content. Clients build their mirror from it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentDefinition {
    pub id: EquipmentId,
    pub name: String,
    pub anim: Option<EquipmentAnimData>,
    pub kind: EquipmentKind,
}

// =====================================================
// Equipment
// =====================================================

#[derive(Debug, Clone)]
pub struct Equipment {
    definition: EquipmentDefinition,
    state: EquipState,
    equipped: bool,
    owner: Option<ActorId>,
    attachment: Attachment,
    weapon: Option<FireWeapon>,
}

impl Equipment {
    pub fn new(definition: EquipmentDefinition, role: NetRole) -> Self {
        let weapon = match &definition.kind {
            EquipmentKind::Generic => None,
            EquipmentKind::FireWeapon(settings) => {
                let mut weapon = FireWeapon::new(settings.clone(), definition.id.0);
                weapon.owner.role = role;
                Some(weapon)
            }
        };
        Self {
            definition,
            state: EquipState::Idle,
            equipped: false,
            owner: None,
            attachment: Attachment::Detached,
            weapon,
        }
    }

    pub fn id(&self) -> EquipmentId {
        self.definition.id
    }

    pub fn name(&self) -> &str {
        &self.definition.name
    }

    pub fn definition(&self) -> &EquipmentDefinition {
        &self.definition
    }

    pub fn state(&self) -> EquipState {
        self.state
    }

    /// Stays true through unequipping until the holster completes.
    pub fn is_equipped(&self) -> bool {
        self.equipped
    }

    pub fn is_visible(&self) -> bool {
        self.state != EquipState::Idle
    }

    pub fn owner(&self) -> Option<ActorId> {
        self.owner
    }

    pub fn attachment(&self) -> Attachment {
        self.attachment
    }

    pub fn weapon(&self) -> Option<&FireWeapon> {
        self.weapon.as_ref()
    }

    pub fn weapon_mut(&mut self) -> Option<&mut FireWeapon> {
        self.weapon.as_mut()
    }

    fn set_equipped(&mut self, equipped: bool) {
        self.equipped = equipped;
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.set_equipped(equipped);
        }
    }

    /// Attach to `owner`'s holder for the current view, or detach with `None`.
    pub fn set_owning_character(&mut self, owner: Option<ActorId>, first_person: bool) {
        self.owner = owner;
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.owner.owner = owner;
        }
        self.attachment = match owner {
            Some(_) => holder_for(first_person),
            None => Attachment::Detached,
        };
        debug!(equipment = %self.id(), attachment = ?self.attachment, "owner set");
    }

    pub fn update_view_mode(&mut self, first_person: bool) {
        if self.owner.is_some() {
            self.attachment = holder_for(first_person);
        }
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.owner.first_person = first_person;
        }
    }

    fn duration(&self, unequip: bool, first_person: bool, third_person: bool) -> f32 {
        if self.owner.is_none() {
            return 0.0;
        }
        match self.definition.anim {
            Some(anim) if unequip => anim.unequip.duration(first_person, third_person),
            Some(anim) => anim.equip.duration(first_person, third_person),
            None => 0.0,
        }
    }

    /// Starts the draw. Returns its duration in seconds.
    pub fn begin_equip(&mut self, first_person: bool, third_person: bool) -> f32 {
        self.state = EquipState::Equipping;
        self.set_equipped(false);
        self.duration(false, first_person, third_person)
    }

    pub fn end_equip(&mut self) {
        self.state = EquipState::Equipped;
        self.set_equipped(true);
    }

    /// Starts the holster. Returns its duration in seconds.
    pub fn begin_unequip(&mut self, first_person: bool, third_person: bool) -> f32 {
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.on_begin_unequip();
        }
        self.state = EquipState::Unequipping;
        self.duration(true, first_person, third_person)
    }

    pub fn end_unequip(&mut self) {
        self.state = EquipState::Idle;
        self.set_equipped(false);
    }

    /// Holster interrupted; the item is back in hand.
    pub fn cancel_unequip(&mut self) {
        if self.state == EquipState::Unequipping {
            self.state = EquipState::Equipped;
            self.set_equipped(true);
        }
    }

    /// Show as held without playing the draw (late join).
    pub fn force_equipped_visible(&mut self) {
        self.state = EquipState::Equipped;
        self.set_equipped(true);
    }

    pub fn on_before_removed(&mut self, reason: RemoveReason) {
        debug!(equipment = %self.id(), ?reason, "removing");
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.on_begin_unequip();
        }
    }

    pub fn primary_action(&mut self, pressed: bool, world: &mut dyn CombatWorld) {
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.primary_action(pressed, world);
        }
    }

    pub fn secondary_action(&mut self, pressed: bool) {
        if let Some(weapon) = self.weapon.as_mut() {
            weapon.secondary_action(pressed);
        }
    }

    /// Whether the owner may run with this item out.
    pub fn can_run(&self) -> bool {
        self.weapon.as_ref().map_or(true, |w| w.can_run())
    }

    pub fn tick(&mut self, dt: f32, world: &mut dyn CombatWorld) {
        let visible = self.is_visible();
        if let Some(weapon) = self.weapon.as_mut() {
            if visible {
                weapon.refresh_aiming_timeline(dt);
            }
            weapon.tick_timers(dt, world);
        }
    }
}

fn holder_for(first_person: bool) -> Attachment {
    if first_person {
        Attachment::FirstPersonHolder
    } else {
        Attachment::ThirdPersonHolder
    }
}
