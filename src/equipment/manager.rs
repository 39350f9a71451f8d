//! Slot inventory and the equip/unequip flow.
//!
//! The authority owns the slots, the active index and the flow phase. A
//! switch is a chain: holster the current item, then draw the target, each
//! leg timed by its animation. Remote copies replay the same legs from
//! multicasts so every client sees the cosmetics in server order.
//!
//! Only one flow timer per manager is ever live; every transition that
//! supersedes a scheduled finish clears it first.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::{
    AddEquipmentError, Equipment, EquipmentDefinition, EquipmentError, EquipmentId, RemoveReason,
};
use crate::combat::CombatWorld;
use crate::constants::{DEFAULT_MAX_SLOTS, KINDA_SMALL_NUMBER};
use crate::net::{ActorId, NetRole, Outbox, ReplicationTarget};
use crate::timers::Timer;
use crate::weapon::{OwnerContext, WeaponEvent, WeaponRpc, WeaponSnapshot};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EquipmentManagerSettings {
    pub max_slots: usize,
    /// Drop removed items instead of handing them back.
    pub destroy_on_remove: bool,
}

impl Default for EquipmentManagerSettings {
    fn default() -> Self {
        Self {
            max_slots: DEFAULT_MAX_SLOTS,
            destroy_on_remove: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowPhase {
    Idle,
    Unequipping,
    Equipping,
}

/// Client -> server requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EquipmentRpc {
    EquipSlot(usize),
    Cycle(i32),
}

/// Server -> all remote copies, for cosmetic playback.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EquipmentMulticast {
    BeginUnequip { from: usize },
    BeginEquip { to: usize },
    CancelUnequip { index: Option<usize> },
}

#[derive(Debug, Clone, PartialEq)]
pub enum EquipmentManagerEvent {
    Added { slot: usize, id: EquipmentId },
    Removed { slot: usize, id: EquipmentId },
    Changed { new: Option<usize>, old: Option<usize> },
    /// An equip or unequip animation started on this copy.
    AnimationStarted {
        slot: usize,
        unequip: bool,
        duration: f32,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSnapshot {
    pub definition: EquipmentDefinition,
    pub weapon: Option<WeaponSnapshot>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquipmentSnapshot {
    pub slots: Vec<Option<SlotSnapshot>>,
    pub current_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ServerFlow {
    UnequipFinished,
    EquipFinished,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LocalFlow {
    UnequipDone { from: usize, chain: Option<usize> },
    EquipDone { index: usize },
}

#[derive(Debug, Clone)]
pub struct EquipmentManager {
    pub settings: EquipmentManagerSettings,
    role: NetRole,
    locally_controlled: bool,
    owner: Option<ActorId>,
    first_person: bool,

    slots: Vec<Option<Equipment>>,
    current_index: Option<usize>,
    pending_index: Option<usize>,
    phase: FlowPhase,

    flow_timer: Timer<ServerFlow>,
    local_timer: Timer<LocalFlow>,
    server_rpcs: Outbox<EquipmentRpc>,
    multicasts: Outbox<EquipmentMulticast>,
    events: Vec<EquipmentManagerEvent>,
}

impl EquipmentManager {
    pub fn new(settings: EquipmentManagerSettings, role: NetRole) -> Self {
        Self {
            settings,
            role,
            locally_controlled: false,
            owner: None,
            first_person: false,
            slots: Vec::new(),
            current_index: None,
            pending_index: None,
            phase: FlowPhase::Idle,
            flow_timer: Timer::new(),
            local_timer: Timer::new(),
            server_rpcs: Outbox::default(),
            multicasts: Outbox::default(),
            events: Vec::new(),
        }
    }

    pub fn with_owner(mut self, owner: ActorId, locally_controlled: bool) -> Self {
        self.owner = Some(owner);
        self.locally_controlled = locally_controlled;
        self
    }

    // ----- queries -----

    pub fn role(&self) -> NetRole {
        self.role
    }

    pub fn phase(&self) -> FlowPhase {
        self.phase
    }

    pub fn current_index(&self) -> Option<usize> {
        self.current_index
    }

    pub fn pending_index(&self) -> Option<usize> {
        self.pending_index
    }

    /// Slot count so far; grows toward `max_slots` on first add.
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn slot(&self, index: usize) -> Option<&Equipment> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    pub fn slot_mut(&mut self, index: usize) -> Option<&mut Equipment> {
        self.slots.get_mut(index).and_then(Option::as_mut)
    }

    pub fn current(&self) -> Option<&Equipment> {
        self.current_index.and_then(|i| self.slot(i))
    }

    pub fn current_mut(&mut self) -> Option<&mut Equipment> {
        let index = self.current_index?;
        self.slot_mut(index)
    }

    pub fn occupied_slots(&self) -> impl Iterator<Item = (usize, &Equipment)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|e| (i, e)))
    }

    pub fn find_slot(&self, id: EquipmentId) -> Option<usize> {
        self.occupied_slots()
            .find(|(_, e)| e.id() == id)
            .map(|(i, _)| i)
    }

    /// False if the active item vetoes running.
    pub fn can_run(&self) -> bool {
        self.current().map_or(true, Equipment::can_run)
    }

    pub fn is_flow_timer_active(&self) -> bool {
        self.flow_timer.is_active()
    }

    pub fn drain_events(&mut self) -> Vec<EquipmentManagerEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn drain_server_rpcs(&mut self) -> Vec<EquipmentRpc> {
        self.server_rpcs.drain()
    }

    pub fn drain_multicasts(&mut self) -> Vec<EquipmentMulticast> {
        self.multicasts.drain()
    }

    pub fn drain_weapon_rpcs(&mut self) -> Vec<(EquipmentId, WeaponRpc)> {
        let mut out = Vec::new();
        for equipment in self.slots.iter_mut().flatten() {
            let id = equipment.id();
            if let Some(weapon) = equipment.weapon_mut() {
                out.extend(weapon.drain_rpcs().into_iter().map(|rpc| (id, rpc)));
            }
        }
        out
    }

    pub fn drain_weapon_events(&mut self) -> Vec<(EquipmentId, WeaponEvent)> {
        let mut out = Vec::new();
        for equipment in self.slots.iter_mut().flatten() {
            let id = equipment.id();
            if let Some(weapon) = equipment.weapon_mut() {
                out.extend(weapon.drain_events().into_iter().map(|event| (id, event)));
            }
        }
        out
    }

    fn has_authority(&self) -> bool {
        self.role.has_authority()
    }

    fn validate_slot(&self, index: usize) -> Result<(), EquipmentError> {
        let capacity = self.settings.max_slots.max(self.slots.len());
        if index >= capacity {
            return Err(EquipmentError::InvalidSlot { index, capacity });
        }
        if self.slot(index).is_none() {
            return Err(EquipmentError::EmptySlot(index));
        }
        Ok(())
    }

    fn set_current_index(&mut self, index: Option<usize>) {
        if self.current_index != index {
            let old = self.current_index;
            self.current_index = index;
            self.events
                .push(EquipmentManagerEvent::Changed { new: index, old });
        }
    }

    // ----- owner / view -----

    /// Push the owning character's state into every held weapon.
    pub fn set_owner_context(&mut self, context: &OwnerContext) {
        for equipment in self.slots.iter_mut().flatten() {
            if let Some(weapon) = equipment.weapon_mut() {
                weapon.owner = context.clone();
            }
        }
    }

    pub fn update_view_mode(&mut self, first_person: bool) {
        self.first_person = first_person;
        for equipment in self.slots.iter_mut().flatten() {
            equipment.update_view_mode(first_person);
        }
    }

    // =====================================================
    // Inventory (authority)
    // =====================================================

    fn ensure_capacity(&mut self) {
        let max = self.settings.max_slots.max(1);
        if self.slots.len() < max {
            self.slots.resize_with(max, || None);
        }
    }

    /// Put `equipment` into `preferred` if free, else the first free slot.
    pub fn add_equipment(
        &mut self,
        mut equipment: Equipment,
        preferred: Option<usize>,
    ) -> Result<usize, AddEquipmentError> {
        if !self.has_authority() {
            warn!(equipment = %equipment.id(), "add_equipment without authority");
            return Err(AddEquipmentError {
                error: EquipmentError::NoAuthority("add_equipment"),
                equipment: Box::new(equipment),
            });
        }
        self.ensure_capacity();

        let preferred = preferred.filter(|&i| i < self.slots.len() && self.slots[i].is_none());
        let Some(slot) = preferred.or_else(|| self.slots.iter().position(Option::is_none)) else {
            return Err(AddEquipmentError {
                error: EquipmentError::NoFreeSlot,
                equipment: Box::new(equipment),
            });
        };

        equipment.set_owning_character(self.owner, self.first_person);
        let id = equipment.id();
        self.slots[slot] = Some(equipment);
        debug!(slot, %id, "equipment added");
        self.events.push(EquipmentManagerEvent::Added { slot, id });
        Ok(slot)
    }

    /// Remove the item in `index`. Returns it unless the manager destroys removed items.
    pub fn remove_equipment_at(
        &mut self,
        index: usize,
        reason: RemoveReason,
    ) -> Result<Option<Equipment>, EquipmentError> {
        if !self.has_authority() {
            return Err(EquipmentError::NoAuthority("remove_equipment_at"));
        }
        self.validate_slot(index)?;

        if self.current_index == Some(index) {
            // Removing the active item aborts whatever flow it was in
            self.flow_timer.clear();
            self.pending_index = None;
            self.phase = FlowPhase::Idle;
            if let Some(equipment) = self.slot_mut(index) {
                equipment.end_unequip();
            }
            self.set_current_index(None);
        }
        if self.pending_index == Some(index) {
            self.pending_index = None;
        }

        let Some(mut equipment) = self.slots[index].take() else {
            return Err(EquipmentError::EmptySlot(index));
        };
        equipment.on_before_removed(reason);
        equipment.set_owning_character(None, self.first_person);
        let id = equipment.id();
        debug!(slot = index, %id, ?reason, "equipment removed");
        self.events
            .push(EquipmentManagerEvent::Removed { slot: index, id });

        if self.settings.destroy_on_remove {
            Ok(None)
        } else {
            Ok(Some(equipment))
        }
    }

    pub fn remove_equipment(
        &mut self,
        id: EquipmentId,
        reason: RemoveReason,
    ) -> Result<Option<Equipment>, EquipmentError> {
        let index = self
            .find_slot(id)
            .ok_or(EquipmentError::UnknownEquipment(id))?;
        self.remove_equipment_at(index, reason)
    }

    /// Empty every slot. Returns the items not destroyed.
    pub fn remove_equipments(
        &mut self,
        reason: RemoveReason,
    ) -> Result<Vec<Equipment>, EquipmentError> {
        if !self.has_authority() {
            return Err(EquipmentError::NoAuthority("remove_equipments"));
        }
        let occupied: Vec<usize> = self.occupied_slots().map(|(i, _)| i).collect();
        let mut kept = Vec::new();
        for index in occupied {
            if let Some(equipment) = self.remove_equipment_at(index, reason)? {
                kept.push(equipment);
            }
        }
        Ok(kept)
    }

    // =====================================================
    // Switching
    // =====================================================

    /// Next occupied slot `delta` steps away, wrapping. `None` if that lands back on the active slot.
    pub fn find_next_index(&self, delta: i32) -> Option<usize> {
        let max = self.slots.len() as i64;
        if delta == 0 || max == 0 {
            return None;
        }
        let dir: i64 = if delta > 0 { 1 } else { -1 };
        let mut index = match self.current_index {
            Some(i) => i as i64,
            None if dir > 0 => -1,
            None => max,
        };

        for _ in 0..delta.unsigned_abs() {
            let mut found = None;
            for _ in 0..max {
                index = (index + dir + max) % max;
                if self.slots[index as usize].is_some() {
                    found = Some(index);
                    break;
                }
            }
            index = found?;
        }

        let next = index as usize;
        (Some(next) != self.current_index).then_some(next)
    }

    /// Switch `delta` occupied slots away. Returns the target the authority picked.
    pub fn cycle(&mut self, delta: i32) -> Option<usize> {
        if delta == 0 {
            return None;
        }
        if !self.has_authority() {
            self.server_rpcs.push(EquipmentRpc::Cycle(delta));
            return None;
        }
        let next = self.find_next_index(delta)?;
        self.begin_server_swap(Some(next));
        Some(next)
    }

    pub fn equip_slot(&mut self, index: usize) -> Result<(), EquipmentError> {
        self.validate_slot(index)?;
        if self.has_authority() {
            self.begin_server_swap(Some(index));
        } else {
            self.server_rpcs.push(EquipmentRpc::EquipSlot(index));
        }
        Ok(())
    }

    pub fn unequip_current(&mut self) -> Result<(), EquipmentError> {
        if !self.has_authority() {
            return Err(EquipmentError::NoAuthority("unequip_current"));
        }
        if self.current_index.is_none() {
            return Ok(());
        }
        self.pending_index = None;
        self.begin_server_swap(None);
        Ok(())
    }

    fn begin_server_swap(&mut self, to: Option<usize>) {
        if to == self.current_index
            && matches!(self.phase, FlowPhase::Idle | FlowPhase::Equipping)
        {
            self.pending_index = None;
            return;
        }

        if self.phase == FlowPhase::Unequipping {
            self.flow_timer.clear();
            let index = self.current_index;
            if let Some(equipment) = self.current_mut() {
                equipment.cancel_unequip();
            }
            self.multicasts
                .push(EquipmentMulticast::CancelUnequip { index });
            self.phase = FlowPhase::Idle;
            self.pending_index = None;
            debug!(slot = ?index, dropped = ?to, "unequip cancelled");
            return;
        }

        if let Some(from) = self.current_index {
            self.phase = FlowPhase::Unequipping;
            self.pending_index = to;
            self.multicasts
                .push(EquipmentMulticast::BeginUnequip { from });
            let duration = self.start_unequip_on_role(from);
            debug!(from, to = ?to, duration, "unequip started");
            if duration > KINDA_SMALL_NUMBER {
                self.flow_timer.set(ServerFlow::UnequipFinished, duration);
            } else {
                self.server_unequip_finished();
            }
        } else {
            self.begin_server_equip(to);
        }
    }

    fn begin_server_equip(&mut self, to: Option<usize>) {
        let Some(to) = to.filter(|&i| self.slot(i).is_some()) else {
            self.set_current_index(None);
            self.phase = FlowPhase::Idle;
            return;
        };

        self.phase = FlowPhase::Equipping;
        self.pending_index = None;
        self.multicasts.push(EquipmentMulticast::BeginEquip { to });
        self.set_current_index(Some(to));
        let duration = self.start_equip_on_role(to);
        debug!(to, duration, "equip started");
        if duration > KINDA_SMALL_NUMBER {
            self.flow_timer.set(ServerFlow::EquipFinished, duration);
        } else {
            self.server_equip_finished();
        }
    }

    fn server_unequip_finished(&mut self) {
        if let Some(equipment) = self.current_mut() {
            equipment.end_unequip();
        }
        let next = self.pending_index.take();
        if next.is_none() {
            self.set_current_index(None);
            self.phase = FlowPhase::Idle;
            debug!("unequip finished");
            return;
        }
        self.begin_server_equip(next);
    }

    fn server_equip_finished(&mut self) {
        if let Some(equipment) = self.current_mut() {
            equipment.end_equip();
        }
        self.phase = FlowPhase::Idle;
        debug!(slot = ?self.current_index, "equip finished");
    }

    fn start_unequip_on_role(&mut self, index: usize) -> f32 {
        let first_person = self.locally_controlled;
        let duration = self
            .slot_mut(index)
            .map_or(0.0, |e| e.begin_unequip(first_person, true));
        self.events.push(EquipmentManagerEvent::AnimationStarted {
            slot: index,
            unequip: true,
            duration,
        });
        duration
    }

    fn start_equip_on_role(&mut self, index: usize) -> f32 {
        let first_person = self.locally_controlled;
        let duration = self
            .slot_mut(index)
            .map_or(0.0, |e| e.begin_equip(first_person, true));
        self.events.push(EquipmentManagerEvent::AnimationStarted {
            slot: index,
            unequip: false,
            duration,
        });
        duration
    }

    // =====================================================
    // Cosmetic playback on remote copies
    // =====================================================

    /// Play the holster locally; with `chain`, draw that slot once it completes.
    pub fn local_begin_unequip(&mut self, from: usize, chain: Option<usize>) {
        self.local_timer.clear();
        self.phase = FlowPhase::Unequipping;
        let duration = self.start_unequip_on_role(from);
        if duration <= KINDA_SMALL_NUMBER {
            self.local_unequip_done(from, chain);
        } else {
            self.local_timer
                .set(LocalFlow::UnequipDone { from, chain }, duration);
        }
    }

    pub fn local_begin_equip(&mut self, to: usize) {
        self.local_timer.clear();
        self.phase = FlowPhase::Equipping;
        let duration = self.start_equip_on_role(to);
        if duration <= KINDA_SMALL_NUMBER {
            self.local_equip_done(to);
        } else {
            self.local_timer
                .set(LocalFlow::EquipDone { index: to }, duration);
        }
    }

    fn local_cancel_unequip(&mut self, index: Option<usize>) {
        self.local_timer.clear();
        if let Some(equipment) = index.and_then(|i| self.slot_mut(i)) {
            equipment.cancel_unequip();
        }
        self.phase = FlowPhase::Idle;
    }

    fn local_unequip_done(&mut self, from: usize, chain: Option<usize>) {
        if let Some(equipment) = self.slot_mut(from) {
            equipment.end_unequip();
        }
        self.phase = FlowPhase::Idle;
        if let Some(to) = chain {
            self.local_begin_equip(to);
        }
    }

    fn local_equip_done(&mut self, index: usize) {
        if let Some(equipment) = self.slot_mut(index) {
            equipment.end_equip();
        }
        self.phase = FlowPhase::Idle;
    }

    /// Apply a multicast from the server. The authority already ran the effect.
    pub fn handle_multicast(&mut self, multicast: EquipmentMulticast) {
        if self.has_authority() {
            return;
        }
        match multicast {
            EquipmentMulticast::BeginUnequip { from } => self.local_begin_unequip(from, None),
            EquipmentMulticast::BeginEquip { to } => {
                self.set_current_index(Some(to));
                self.local_begin_equip(to);
            }
            EquipmentMulticast::CancelUnequip { index } => self.local_cancel_unequip(index),
        }
    }

    /// Server side of a client request. Bad indices are rejected, never trusted.
    pub fn handle_server_rpc(&mut self, rpc: EquipmentRpc) -> Result<(), EquipmentError> {
        if !self.has_authority() {
            return Err(EquipmentError::NoAuthority("server rpc"));
        }
        match rpc {
            EquipmentRpc::EquipSlot(index) => {
                if let Err(err) = self.validate_slot(index) {
                    warn!(%err, "rejected equip request");
                    return Err(err);
                }
                self.begin_server_swap(Some(index));
            }
            EquipmentRpc::Cycle(delta) => {
                if let Some(next) = self.find_next_index(delta) {
                    self.begin_server_swap(Some(next));
                }
            }
        }
        Ok(())
    }

    // =====================================================
    // Tick
    // =====================================================

    pub fn tick(&mut self, dt: f32, world: &mut dyn CombatWorld) {
        self.flow_timer.advance(dt);
        while let Some(flow) = self.flow_timer.poll() {
            match flow {
                ServerFlow::UnequipFinished => self.server_unequip_finished(),
                ServerFlow::EquipFinished => self.server_equip_finished(),
            }
        }

        self.local_timer.advance(dt);
        while let Some(flow) = self.local_timer.poll() {
            match flow {
                LocalFlow::UnequipDone { from, chain } => self.local_unequip_done(from, chain),
                LocalFlow::EquipDone { index } => self.local_equip_done(index),
            }
        }

        for equipment in self.slots.iter_mut().flatten() {
            equipment.tick(dt, world);
        }
    }

    // =====================================================
    // Replication
    // =====================================================

    pub fn replicated_state(&self, target: ReplicationTarget) -> EquipmentSnapshot {
        EquipmentSnapshot {
            slots: self
                .slots
                .iter()
                .map(|slot| {
                    slot.as_ref().map(|e| SlotSnapshot {
                        definition: e.definition().clone(),
                        weapon: e.weapon().map(|w| w.replicated_state(target)),
                    })
                })
                .collect(),
            current_index: self.current_index,
        }
    }

    /// Mirror the server's slots and active index, spawning or dropping client copies as needed.
    pub fn apply_replication(&mut self, snapshot: &EquipmentSnapshot, world: &dyn CombatWorld) {
        if self.slots.len() < snapshot.slots.len() {
            self.slots.resize_with(snapshot.slots.len(), || None);
        }

        let role = self.role;
        let mut slots_changed = false;
        for (index, incoming) in snapshot.slots.iter().enumerate() {
            let existing = self.slots[index].as_ref().map(Equipment::id);
            let wanted = incoming.as_ref().map(|s| s.definition.id);
            if existing != wanted {
                self.slots[index] = incoming
                    .as_ref()
                    .map(|s| Equipment::new(s.definition.clone(), role));
                slots_changed = true;
            }
        }
        if slots_changed {
            self.on_rep_slots();
        }

        for (index, incoming) in snapshot.slots.iter().enumerate() {
            let Some(weapon_state) = incoming.as_ref().and_then(|s| s.weapon.as_ref()) else {
                continue;
            };
            if let Some(weapon) = self.slots[index].as_mut().and_then(Equipment::weapon_mut) {
                weapon.apply_replication(weapon_state, world);
            }
        }

        if snapshot.current_index != self.current_index {
            self.on_rep_current_index(snapshot.current_index);
        }
    }

    fn on_rep_slots(&mut self) {
        let (owner, first_person) = (self.owner, self.first_person);
        for equipment in self.slots.iter_mut().flatten() {
            equipment.set_owning_character(owner, first_person);
        }
    }

    fn on_rep_current_index(&mut self, index: Option<usize>) {
        self.set_current_index(index);
        // Joined without seeing the draw
        if self.phase == FlowPhase::Idle {
            if let Some(equipment) = self.current_mut() {
                if equipment.state() == super::EquipState::Idle {
                    equipment.force_equipped_visible();
                }
            }
        }
    }
}
