//! Fire weapon: trigger, burst/auto sequencing, ammo, reload and aiming.
//!
//! Every copy of a weapon (server, owning client, remote clients) runs the
//! same struct with a different [`NetRole`] in its [`OwnerContext`]. The
//! owning client predicts firing and aiming locally and mirrors them to the
//! server through [`WeaponRpc`]s; ammo, reload and fire mode are written by
//! the authority only and reach clients through [`WeaponSnapshot`].
//!
//! Anything scheduled (burst continuation, auto repeat, the run-fire delay)
//! re-checks eligibility when it runs, so a reload started mid-burst stops
//! the burst instead of firing a stale shot.

use bevy::prelude::*;
use rand::SeedableRng;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

pub mod shot;

pub use shot::BulletData;

use crate::combat::CombatWorld;
use crate::constants::{
    FALLBACK_FIRE_INTERVAL, KINDA_SMALL_NUMBER, MAX_FIRE_RATE_RPM, MIN_FIRE_RATE_RPM,
};
use crate::math::{clamp01, finterp_to, Rotator};
use crate::net::{ActorId, NetError, NetRole, Outbox, ReplicationTarget};
use crate::timers::Timer;

pub struct WeaponPlugin;

impl Plugin for WeaponPlugin {
    fn build(&self, app: &mut App) {
        app.add_event::<WeaponNotification>();
    }
}

/// Weapon event re-published on the Bevy side with the owning entity.
#[derive(Event, Debug, Clone)]
pub struct WeaponNotification {
    pub entity: Entity,
    pub event: WeaponEvent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FireMode {
    Semi,
    Burst,
    Auto,
}

// =====================================================
// Settings
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FireWeaponSettings {
    pub fire_mode: FireMode,
    pub burst_support: bool,
    pub auto_support: bool,
    pub fire_rate_rpm: f32,
    pub burst_count: i32,
    /// Input-to-first-shot delay while the owner runs.
    pub run_fire_delay: f32,
    pub projectiles_per_shot: u32,
    pub trace_distance: f32,

    pub magazine_capacity: i32,
    pub initial_total_ammo: i32,
    pub loop_reload: bool,
    pub reload_loop_section: String,
    pub block_fire_while_reloading: bool,

    pub base_damage: f32,

    pub imprecision_base_amount: f32,
    pub imprecision_amount_multiplier: f32,
    pub max_imprecision: i32,
    pub min_imprecision_amount: f32,
    pub max_imprecision_amount: f32,

    pub aim_zoom: f32,
    pub aim_in_speed: f32,
    pub aim_out_speed: f32,
}

impl Default for FireWeaponSettings {
    fn default() -> Self {
        Self {
            fire_mode: FireMode::Semi,
            burst_support: true,
            auto_support: true,
            fire_rate_rpm: 600.0,
            burst_count: 3,
            run_fire_delay: 0.2,
            projectiles_per_shot: 1,
            trace_distance: 20000.0,
            magazine_capacity: 30,
            initial_total_ammo: 90,
            loop_reload: false,
            reload_loop_section: "LoopReload".to_string(),
            block_fire_while_reloading: true,
            base_damage: 20.0,
            imprecision_base_amount: 6.0,
            imprecision_amount_multiplier: 5.0,
            max_imprecision: 15,
            min_imprecision_amount: 100.0,
            max_imprecision_amount: 300.0,
            aim_zoom: 1.3,
            aim_in_speed: 16.0,
            aim_out_speed: 10.0,
        }
    }
}

impl FireWeaponSettings {
    /// Seconds between shots.
    pub fn fire_interval(&self) -> f32 {
        if self.fire_rate_rpm <= 0.0 {
            FALLBACK_FIRE_INTERVAL
        } else {
            60.0 / self.fire_rate_rpm.clamp(MIN_FIRE_RATE_RPM, MAX_FIRE_RATE_RPM)
        }
    }

    /// Semi first, then burst and auto when supported.
    pub fn legal_fire_modes(&self) -> Vec<FireMode> {
        let mut modes = vec![FireMode::Semi];
        if self.burst_support {
            modes.push(FireMode::Burst);
        }
        if self.auto_support {
            modes.push(FireMode::Auto);
        }
        modes
    }

    pub fn supports(&self, mode: FireMode) -> bool {
        self.legal_fire_modes().contains(&mode)
    }
}

// =====================================================
// Owner context, RPCs, events, replication
// =====================================================

/// What the weapon reads from its owning character. Refreshed every tick.
#[derive(Debug, Clone, PartialEq)]
pub struct OwnerContext {
    pub role: NetRole,
    pub locally_controlled: bool,
    pub owner: Option<ActorId>,
    pub velocity: Vec3,
    pub should_use_run_fire_delay: bool,
    pub muzzle_location: Vec3,
    pub aim_rotation: Rotator,
    pub first_person: bool,
}

impl Default for OwnerContext {
    fn default() -> Self {
        Self {
            role: NetRole::Authority,
            locally_controlled: false,
            owner: None,
            velocity: Vec3::ZERO,
            should_use_run_fire_delay: false,
            muzzle_location: Vec3::ZERO,
            aim_rotation: Rotator::ZERO,
            first_person: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum WeaponRpc {
    SetIsFiring(bool),
    SetIsAiming(bool),
    ApplyShot(BulletData),
    RequestStartReload,
    InsertOneRound,
    CommitReload { force_full: bool },
    CancelReload,
    SetFireMode(FireMode),
}

#[derive(Debug, Clone, PartialEq)]
pub enum WeaponEvent {
    AmmunitionChanged { in_magazine: i32, total: i32 },
    MagazineChanged { capacity: i32 },
    AmmoPickedUp { total: i32 },
    FireModeChanged(FireMode),
    OutOfAmmo,
    ShotFired { start: Vec3, projectiles: usize },
    RecoilPlay,
    RecoilStop,
    ImpactFx { point: Vec3, normal: Vec3, actor: Option<ActorId> },
    AimChanged(bool),
    /// The owner should mirror the aiming flag into its locomotion state.
    OwnerAimRequested(bool),
    ReloadStarted { first_person: bool },
    ReloadEnded,
    /// Loop reload jumped to its loop section for another round.
    ReloadLoopSection(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WeaponSnapshot {
    pub ammo_in_mag: i32,
    pub total_ammo: i32,
    pub is_reloading: bool,
    pub rep_fire_mode: FireMode,
    /// Skipped for the owner.
    pub is_firing: Option<bool>,
    pub is_aiming: Option<bool>,
    pub bullet_data: Option<BulletData>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FireAction {
    FireShot,
    EndFire,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct RunFireDelayElapsed;

// =====================================================
// FireWeapon
// =====================================================

#[derive(Debug, Clone)]
pub struct FireWeapon {
    pub settings: FireWeaponSettings,
    pub owner: OwnerContext,
    equipped: bool,

    fire_mode: FireMode,
    rep_fire_mode: FireMode,
    is_firing: bool,
    is_reloading: bool,
    is_aiming: bool,
    burst_left: i32,
    burst_sequencing: bool,
    run_fire_delay_active: bool,
    wants_to_fire: bool,

    ammo_in_mag: i32,
    total_ammo: i32,

    bullet_data: BulletData,
    imprecision: i32,
    bullets_fired: u32,

    ads_playback: f32,
    fov_playback: f32,
    ads_alpha: f32,
    fov_alpha: f32,

    fire_timer: Timer<FireAction>,
    run_fire_delay_timer: Timer<RunFireDelayElapsed>,
    rng: Xoshiro256PlusPlus,
    outbox: Outbox<WeaponRpc>,
    events: Vec<WeaponEvent>,
}

impl FireWeapon {
    pub fn new(settings: FireWeaponSettings, seed: u64) -> Self {
        let magazine = settings.magazine_capacity.max(0);
        let total = settings.initial_total_ammo.max(0);
        Self {
            fire_mode: settings.fire_mode,
            rep_fire_mode: settings.fire_mode,
            imprecision: settings.max_imprecision,
            settings,
            owner: OwnerContext::default(),
            equipped: false,
            is_firing: false,
            is_reloading: false,
            is_aiming: false,
            burst_left: 0,
            burst_sequencing: false,
            run_fire_delay_active: false,
            wants_to_fire: false,
            ammo_in_mag: magazine,
            total_ammo: total,
            bullet_data: BulletData::default(),
            bullets_fired: 0,
            ads_playback: 0.0,
            fov_playback: 0.0,
            ads_alpha: 0.0,
            fov_alpha: 0.0,
            fire_timer: Timer::new(),
            run_fire_delay_timer: Timer::new(),
            rng: Xoshiro256PlusPlus::seed_from_u64(seed),
            outbox: Outbox::default(),
            events: Vec::new(),
        }
    }

    // ----- accessors -----

    pub fn fire_mode(&self) -> FireMode {
        self.fire_mode
    }

    pub fn is_firing(&self) -> bool {
        self.is_firing
    }

    pub fn is_reloading(&self) -> bool {
        self.is_reloading
    }

    pub fn is_aiming(&self) -> bool {
        self.is_aiming
    }

    pub fn is_equipped(&self) -> bool {
        self.equipped
    }

    pub fn ammo_in_magazine(&self) -> i32 {
        self.ammo_in_mag
    }

    pub fn total_ammo(&self) -> i32 {
        self.total_ammo
    }

    pub fn burst_left(&self) -> i32 {
        self.burst_left
    }

    pub fn is_burst_sequencing(&self) -> bool {
        self.burst_sequencing
    }

    pub fn is_run_fire_delay_active(&self) -> bool {
        self.run_fire_delay_active
    }

    pub fn imprecision(&self) -> i32 {
        self.imprecision
    }

    pub fn bullets_fired(&self) -> u32 {
        self.bullets_fired
    }

    pub fn bullet_data(&self) -> &BulletData {
        &self.bullet_data
    }

    pub fn ads_alpha(&self) -> f32 {
        self.ads_alpha
    }

    pub fn fov_alpha(&self) -> f32 {
        self.fov_alpha
    }

    pub fn has_pending_fire_timer(&self) -> bool {
        self.fire_timer.is_active()
    }

    pub fn drain_events(&mut self) -> Vec<WeaponEvent> {
        std::mem::take(&mut self.events)
    }

    pub fn drain_rpcs(&mut self) -> Vec<WeaponRpc> {
        self.outbox.drain()
    }

    fn has_authority(&self) -> bool {
        self.owner.role.has_authority()
    }

    /// Kept in sync by the owning equipment.
    pub(crate) fn set_equipped(&mut self, equipped: bool) {
        self.equipped = equipped;
    }

    // ----- ticking -----

    /// Advance fire and run-fire-delay timers and run whatever expired.
    pub fn tick_timers(&mut self, dt: f32, world: &mut dyn CombatWorld) {
        self.run_fire_delay_timer.advance(dt);
        self.fire_timer.advance(dt);

        while self.run_fire_delay_timer.poll().is_some() {
            self.on_run_fire_delay_elapsed(world);
        }
        while let Some(action) = self.fire_timer.poll() {
            match action {
                FireAction::FireShot => self.fire_shot(world),
                FireAction::EndFire => self.end_fire(),
            }
        }
    }

    /// ADS and FOV blend toward the aiming target; in-speed while aiming in, out-speed otherwise.
    pub fn refresh_aiming_timeline(&mut self, dt: f32) {
        let target = if self.is_aiming { 1.0 } else { 0.0 };
        let speed = if self.is_aiming {
            self.settings.aim_in_speed
        } else {
            self.settings.aim_out_speed
        };

        self.ads_playback = finterp_to(self.ads_playback, target, dt, speed);
        self.fov_playback = finterp_to(self.fov_playback, target, dt, speed);
        self.ads_alpha = clamp01(self.ads_playback);
        self.fov_alpha = clamp01(self.fov_playback);
    }

    // ----- input -----

    pub fn primary_action(&mut self, pressed: bool, world: &mut dyn CombatWorld) {
        self.wants_to_fire = pressed;
        if pressed {
            self.begin_fire(world);
        } else {
            self.end_fire();
        }
    }

    pub fn secondary_action(&mut self, pressed: bool) {
        self.set_is_aiming(pressed);
    }

    pub fn can_run(&self) -> bool {
        !(self.is_aiming || self.is_firing || self.run_fire_delay_active)
    }

    pub fn can_fire(&self) -> bool {
        self.equipped && !self.reload_blocks_fire()
    }

    fn reload_blocks_fire(&self) -> bool {
        self.settings.block_fire_while_reloading && self.is_reloading
    }

    // ----- firing -----

    pub fn begin_fire(&mut self, world: &mut dyn CombatWorld) {
        if self.reload_blocks_fire() {
            return;
        }
        if self.ammo_in_mag <= 0 {
            self.events.push(WeaponEvent::OutOfAmmo);
            return;
        }
        if self.run_fire_delay_active {
            return;
        }
        if self.owner.should_use_run_fire_delay && self.settings.run_fire_delay > KINDA_SMALL_NUMBER {
            self.run_fire_delay_active = true;
            self.run_fire_delay_timer
                .set(RunFireDelayElapsed, self.settings.run_fire_delay);
            trace!(delay = self.settings.run_fire_delay, "run fire delay started");
            return;
        }
        self.begin_fire_internal(world);
    }

    /// Ignored while a burst is in flight; the burst always completes.
    pub fn end_fire(&mut self) {
        if self.fire_mode == FireMode::Burst && self.burst_sequencing {
            return;
        }
        self.fire_timer.clear();

        if self.is_firing {
            self.is_firing = false;
            self.on_rep_is_firing();
            if !self.has_authority() {
                self.outbox.push(WeaponRpc::SetIsFiring(false));
            }
        }
    }

    fn begin_fire_internal(&mut self, world: &mut dyn CombatWorld) {
        if !self.can_fire() {
            return;
        }
        if !self.is_firing {
            self.is_firing = true;
            self.on_rep_is_firing();
            if !self.has_authority() {
                self.outbox.push(WeaponRpc::SetIsFiring(true));
            }
        }

        match self.fire_mode {
            FireMode::Burst => {
                if !self.burst_sequencing {
                    self.burst_sequencing = true;
                    self.burst_left = self.settings.burst_count.max(1);
                    self.fire_shot(world);
                }
            }
            FireMode::Auto => {
                if !self.fire_timer.is_active() {
                    self.fire_shot(world);
                    // A dry first shot may already have stopped firing
                    if self.is_firing {
                        self.fire_timer
                            .set_repeating(FireAction::FireShot, self.settings.fire_interval());
                    }
                }
            }
            FireMode::Semi => self.fire_shot(world),
        }
    }

    fn reset_burst(&mut self) {
        self.burst_sequencing = false;
        self.burst_left = 0;
    }

    fn fire_shot(&mut self, world: &mut dyn CombatWorld) {
        if !self.can_fire() {
            // Stale scheduled shot: stop firing, a new press is needed
            match self.fire_mode {
                FireMode::Burst => {
                    self.reset_burst();
                    self.end_fire();
                }
                FireMode::Auto => self.end_fire(),
                FireMode::Semi => {}
            }
            return;
        }

        if self.ammo_in_mag <= 0 {
            self.events.push(WeaponEvent::OutOfAmmo);
            match self.fire_mode {
                FireMode::Auto => self.end_fire(),
                FireMode::Burst => self.reset_burst(),
                FireMode::Semi => {}
            }
            return;
        }

        let data = self.compute_shot();
        if self.has_authority() {
            self.apply_shot(data, world);
        } else {
            self.bullet_data = data.clone();
            self.outbox.push(WeaponRpc::ApplyShot(data));
        }

        self.handle_shot_fx_and_recoil(&*world);

        if self.fire_mode == FireMode::Burst {
            self.burst_left = (self.burst_left - 1).max(0);
            if self.burst_left > 0 {
                self.fire_timer
                    .set(FireAction::FireShot, self.settings.fire_interval());
            } else {
                self.burst_sequencing = false;
                self.end_fire();
            }
        }
    }

    fn compute_shot(&mut self) -> BulletData {
        let spread = shot::shot_spread(
            &self.settings,
            self.imprecision,
            self.is_aiming,
            self.owner.velocity,
        );
        let origin = self.owner.muzzle_location;
        let (directions, ends) = shot::compute_projectiles(
            &mut self.rng,
            origin,
            self.owner.aim_rotation,
            spread,
            self.settings.projectiles_per_shot,
            self.settings.trace_distance,
        );
        BulletData::new(origin, &directions, &ends)
    }

    /// Authority: spend a round, record the shot and deal damage. False if the shot was dropped.
    fn apply_shot(&mut self, mut data: BulletData, world: &mut dyn CombatWorld) -> bool {
        if self.reload_blocks_fire() {
            return false;
        }
        if !self.consume_one_from_magazine() {
            return false;
        }

        data.sequence = self.bullet_data.sequence.wrapping_add(1).max(1);
        self.bullet_data = data;

        let start = self.bullet_data.start_location();
        let directions = self.bullet_data.direction_vectors();
        let ends = self.bullet_data.end_vectors();
        for (dir, end) in directions.iter().zip(&ends) {
            let Some(hit) = world.line_trace(start, *end, self.owner.owner) else {
                continue;
            };
            if hit.actor.is_some() && hit.can_be_damaged {
                world.apply_point_damage(&hit, self.settings.base_damage, *dir, self.owner.owner);
            }
        }
        true
    }

    fn handle_shot_fx_and_recoil(&mut self, world: &dyn CombatWorld) {
        let start = self.bullet_data.start_location();
        self.events.push(WeaponEvent::ShotFired {
            start,
            projectiles: self.bullet_data.projectile_count(),
        });
        self.events.push(WeaponEvent::RecoilPlay);

        for end in self.bullet_data.end_vectors() {
            if let Some(hit) = world.line_trace(start, end, self.owner.owner) {
                self.events.push(WeaponEvent::ImpactFx {
                    point: hit.point,
                    normal: hit.normal,
                    actor: hit.actor,
                });
            }
        }

        self.imprecision = (self.imprecision - 1).max(0);
        self.bullets_fired += 1;
    }

    fn on_run_fire_delay_elapsed(&mut self, world: &mut dyn CombatWorld) {
        self.run_fire_delay_active = false;

        if self.reload_blocks_fire() {
            return;
        }
        if self.ammo_in_mag <= 0 {
            self.events.push(WeaponEvent::OutOfAmmo);
            return;
        }
        if self.wants_to_fire || self.fire_mode == FireMode::Burst {
            self.begin_fire_internal(world);
            return;
        }

        // Trigger already released: one shot, then stop after an interval
        if !self.is_firing {
            self.is_firing = true;
            if self.has_authority() {
                self.on_rep_is_firing();
            } else {
                self.outbox.push(WeaponRpc::SetIsFiring(true));
            }
        }
        self.fire_shot(world);
        self.fire_timer
            .set(FireAction::EndFire, self.settings.fire_interval());
    }

    // ----- equip hooks -----

    /// Holstering stops the trigger, the reload and any pending delayed shot.
    pub fn on_begin_unequip(&mut self) {
        self.end_fire();
        self.cancel_reload();
        if self.run_fire_delay_active {
            self.run_fire_delay_timer.clear();
            self.run_fire_delay_active = false;
            self.wants_to_fire = false;
        }
    }

    // ----- ammo -----

    pub fn consume_one_from_magazine(&mut self) -> bool {
        if !self.has_authority() || self.ammo_in_mag <= 0 {
            return false;
        }
        self.set_ammo_in_mag(self.ammo_in_mag - 1);
        true
    }

    /// Authority: move up to `desired` rounds from reserve. Returns rounds moved.
    pub fn load_from_reserve(&mut self, desired: i32) -> i32 {
        if !self.has_authority() || desired <= 0 {
            return 0;
        }
        let space = (self.settings.magazine_capacity - self.ammo_in_mag).max(0);
        if space <= 0 || self.total_ammo <= 0 {
            return 0;
        }

        let to_move = desired.min(space).min(self.total_ammo);
        self.set_ammo_in_mag(self.ammo_in_mag + to_move);

        let old_total = self.total_ammo;
        self.total_ammo -= to_move;
        self.on_rep_total_ammo(old_total);
        to_move
    }

    pub fn set_ammo_in_mag(&mut self, amount: i32) {
        if !self.has_authority() {
            return;
        }
        let clamped = amount.clamp(0, self.settings.magazine_capacity.max(0));
        if clamped != self.ammo_in_mag {
            self.ammo_in_mag = clamped;
            self.on_rep_ammo_in_mag();
        }
    }

    pub fn set_total_ammo(&mut self, total: i32) {
        if !self.has_authority() {
            return;
        }
        let old_total = self.total_ammo;
        self.total_ammo = total.max(0);
        self.on_rep_total_ammo(old_total);
    }

    pub fn add_total_ammo(&mut self, delta: i32) {
        if !self.has_authority() || delta == 0 {
            return;
        }
        let old_total = self.total_ammo;
        self.total_ammo = self.total_ammo.saturating_add(delta).max(0);
        self.on_rep_total_ammo(old_total);
    }

    /// Authority: change capacity, trimming the magazine if it no longer fits.
    pub fn set_magazine_capacity(&mut self, capacity: i32) {
        if !self.has_authority() {
            return;
        }
        let capacity = capacity.max(0);
        if capacity == self.settings.magazine_capacity {
            return;
        }
        self.settings.magazine_capacity = capacity;
        self.events.push(WeaponEvent::MagazineChanged { capacity });
        if self.ammo_in_mag > capacity {
            self.set_ammo_in_mag(capacity);
        }
    }

    // ----- reload -----

    pub fn can_reload(&self) -> bool {
        self.equipped
            && !self.is_reloading
            && self.ammo_in_mag < self.settings.magazine_capacity
            && self.total_ammo > 0
    }

    pub fn start_reload(&mut self) {
        if !self.can_reload() {
            return;
        }
        if self.has_authority() {
            if !self.is_reloading {
                self.is_reloading = true;
                self.on_rep_is_reloading();
            }
        } else {
            self.outbox.push(WeaponRpc::RequestStartReload);
        }
    }

    /// Animation notify: one round in (loop reload only).
    pub fn notify_insert_one_round(&mut self) {
        if !self.settings.loop_reload || !self.equipped {
            return;
        }
        if self.owner.locally_controlled {
            self.call_server(WeaponRpc::InsertOneRound);
            self.events.push(WeaponEvent::ReloadLoopSection(
                self.settings.reload_loop_section.clone(),
            ));
        }
    }

    /// Animation notify: the reload is done, top up the magazine.
    pub fn notify_commit_reload(&mut self, force_full: bool) {
        if !self.equipped {
            return;
        }
        if self.owner.locally_controlled {
            self.call_server(WeaponRpc::CommitReload { force_full });
        }
    }

    pub fn cancel_reload(&mut self) {
        if self.has_authority() {
            if self.is_reloading {
                self.is_reloading = false;
                self.on_rep_is_reloading();
            }
        } else {
            self.outbox.push(WeaponRpc::CancelReload);
        }
    }

    // ----- fire mode / aim -----

    pub fn cycle_fire_mode(&mut self) {
        let modes = self.settings.legal_fire_modes();
        let index = modes
            .iter()
            .position(|&m| m == self.fire_mode)
            .unwrap_or(0);
        let next = modes[(index + 1) % modes.len()];
        if next == self.fire_mode {
            return;
        }

        if self.has_authority() {
            self.rep_fire_mode = next;
            self.fire_mode = next;
            self.on_rep_fire_mode();
        } else {
            self.outbox.push(WeaponRpc::SetFireMode(next));
        }
    }

    pub fn set_is_aiming(&mut self, aiming: bool) {
        if self.is_aiming == aiming {
            return;
        }
        self.is_aiming = aiming;
        self.on_rep_is_aiming();
        self.events.push(WeaponEvent::OwnerAimRequested(aiming));

        if !self.has_authority() {
            self.outbox.push(WeaponRpc::SetIsAiming(aiming));
        }
    }

    // =====================================================
    // Server RPC handlers
    // =====================================================

    /// Run an RPC sent by the owning client. Requests that fail validation are
    /// rejected without touching state.
    pub fn handle_server_rpc(
        &mut self,
        rpc: WeaponRpc,
        world: &mut dyn CombatWorld,
    ) -> Result<(), NetError> {
        if !self.has_authority() {
            return Err(NetError::RejectedRpc(
                "weapon rpc received without authority".into(),
            ));
        }
        match rpc {
            WeaponRpc::ApplyShot(data) => self.server_apply_shot(data, world),
            other => self.handle_state_rpc(other),
        }
    }

    /// Server call from this instance; runs inline on the authority.
    fn call_server(&mut self, rpc: WeaponRpc) {
        if self.has_authority() {
            if let Err(err) = self.handle_state_rpc(rpc) {
                warn!(%err, "local server call rejected");
            }
        } else {
            self.outbox.push(rpc);
        }
    }

    fn handle_state_rpc(&mut self, rpc: WeaponRpc) -> Result<(), NetError> {
        match rpc {
            WeaponRpc::SetIsFiring(firing) => {
                self.is_firing = firing;
                self.on_rep_is_firing();
            }
            WeaponRpc::SetIsAiming(aiming) => {
                self.is_aiming = aiming;
                self.on_rep_is_aiming();
            }
            WeaponRpc::RequestStartReload => {
                if self.can_reload() && !self.is_reloading {
                    self.is_reloading = true;
                    self.on_rep_is_reloading();
                }
            }
            WeaponRpc::InsertOneRound => self.server_insert_one_round(),
            WeaponRpc::CommitReload { force_full } => self.server_commit_reload(force_full),
            WeaponRpc::CancelReload => {
                if self.is_reloading {
                    self.is_reloading = false;
                    self.on_rep_is_reloading();
                }
            }
            WeaponRpc::SetFireMode(mode) => {
                if !self.settings.supports(mode) {
                    return Err(NetError::RejectedRpc(format!(
                        "fire mode {mode:?} not supported"
                    )));
                }
                self.rep_fire_mode = mode;
                self.fire_mode = mode;
                self.on_rep_fire_mode();
            }
            WeaponRpc::ApplyShot(_) => {
                return Err(NetError::RejectedRpc("shot needs a combat world".into()));
            }
        }
        Ok(())
    }

    fn server_apply_shot(
        &mut self,
        data: BulletData,
        world: &mut dyn CombatWorld,
    ) -> Result<(), NetError> {
        data.validate(self.settings.trace_distance)?;
        if !self.equipped {
            return Err(NetError::RejectedRpc("shot from unequipped weapon".into()));
        }
        if self.apply_shot(data, world) {
            self.on_rep_bullet_data(&*world);
        } else {
            debug!(ammo = self.ammo_in_mag, "client shot dropped");
        }
        Ok(())
    }

    fn server_insert_one_round(&mut self) {
        if !self.settings.loop_reload || !self.is_reloading {
            return;
        }
        let moved = self.load_from_reserve(1);
        let done = moved <= 0
            || self.ammo_in_mag >= self.settings.magazine_capacity
            || self.total_ammo <= 0;
        if done {
            self.is_reloading = false;
            self.on_rep_is_reloading();
        }
    }

    /// Loop reloads fill round by round, so their commit only ends the
    /// reload unless `force_full` asks for a top-up.
    fn server_commit_reload(&mut self, force_full: bool) {
        if !self.is_reloading {
            return;
        }
        if !self.settings.loop_reload || force_full {
            let need = (self.settings.magazine_capacity - self.ammo_in_mag).max(0);
            if need > 0 {
                self.load_from_reserve(need);
            }
        }
        self.is_reloading = false;
        self.on_rep_is_reloading();
    }

    // =====================================================
    // Replication
    // =====================================================

    pub fn replicated_state(&self, target: ReplicationTarget) -> WeaponSnapshot {
        let include = !target.skips_owner_fields();
        WeaponSnapshot {
            ammo_in_mag: self.ammo_in_mag,
            total_ammo: self.total_ammo,
            is_reloading: self.is_reloading,
            rep_fire_mode: self.rep_fire_mode,
            is_firing: include.then_some(self.is_firing),
            is_aiming: include.then_some(self.is_aiming),
            bullet_data: include.then(|| self.bullet_data.clone()),
        }
    }

    /// Apply a snapshot and run the change callbacks for every field that differs.
    pub fn apply_replication(&mut self, snapshot: &WeaponSnapshot, world: &dyn CombatWorld) {
        if snapshot.ammo_in_mag != self.ammo_in_mag {
            self.ammo_in_mag = snapshot.ammo_in_mag;
            self.on_rep_ammo_in_mag();
        }
        if snapshot.total_ammo != self.total_ammo {
            let old_total = self.total_ammo;
            self.total_ammo = snapshot.total_ammo;
            self.on_rep_total_ammo(old_total);
        }
        if let Some(firing) = snapshot.is_firing {
            if firing != self.is_firing {
                self.is_firing = firing;
                self.on_rep_is_firing();
            }
        }
        if snapshot.is_reloading != self.is_reloading {
            self.is_reloading = snapshot.is_reloading;
            self.on_rep_is_reloading();
        }
        if let Some(aiming) = snapshot.is_aiming {
            if aiming != self.is_aiming {
                self.is_aiming = aiming;
                self.on_rep_is_aiming();
            }
        }
        if let Some(data) = &snapshot.bullet_data {
            if data.sequence != 0 && data.sequence != self.bullet_data.sequence {
                self.bullet_data = data.clone();
                self.on_rep_bullet_data(world);
            }
        }
        if snapshot.rep_fire_mode != self.rep_fire_mode {
            self.rep_fire_mode = snapshot.rep_fire_mode;
            self.on_rep_fire_mode();
        }
    }

    fn on_rep_ammo_in_mag(&mut self) {
        self.events.push(WeaponEvent::AmmunitionChanged {
            in_magazine: self.ammo_in_mag,
            total: self.total_ammo,
        });
    }

    fn on_rep_total_ammo(&mut self, old_total: i32) {
        self.events.push(WeaponEvent::AmmunitionChanged {
            in_magazine: self.ammo_in_mag,
            total: self.total_ammo,
        });
        if self.total_ammo > old_total {
            self.events.push(WeaponEvent::AmmoPickedUp {
                total: self.total_ammo,
            });
        }
    }

    fn on_rep_is_firing(&mut self) {
        if !self.is_firing {
            self.events.push(WeaponEvent::RecoilStop);
            self.imprecision = self.settings.max_imprecision;
            self.bullets_fired = 0;
        }
    }

    fn on_rep_is_reloading(&mut self) {
        if self.is_reloading {
            debug!(ammo = self.ammo_in_mag, total = self.total_ammo, "reload started");
            self.events.push(WeaponEvent::ReloadStarted {
                first_person: self.owner.locally_controlled,
            });
        } else {
            self.events.push(WeaponEvent::ReloadEnded);
        }
    }

    fn on_rep_is_aiming(&mut self) {
        self.events.push(WeaponEvent::AimChanged(self.is_aiming));
    }

    fn on_rep_bullet_data(&mut self, world: &dyn CombatWorld) {
        if !self.owner.locally_controlled {
            self.handle_shot_fx_and_recoil(world);
        }
    }

    fn on_rep_fire_mode(&mut self) {
        self.fire_mode = self.rep_fire_mode;
        self.events.push(WeaponEvent::FireModeChanged(self.fire_mode));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::combat::{HitScanWorld, HitTarget};

    const DT: f32 = 1.0 / 120.0;

    fn armed(settings: FireWeaponSettings) -> FireWeapon {
        let mut weapon = FireWeapon::new(settings, 7);
        weapon.set_equipped(true);
        weapon.owner.owner = Some(ActorId(1));
        weapon.owner.muzzle_location = Vec3::new(0.0, 0.0, 150.0);
        weapon
    }

    fn client_armed(settings: FireWeaponSettings) -> FireWeapon {
        let mut weapon = armed(settings);
        weapon.owner.role = NetRole::AutonomousProxy;
        weapon.owner.locally_controlled = true;
        weapon
    }

    fn run(weapon: &mut FireWeapon, world: &mut HitScanWorld, seconds: f32) {
        let steps = (seconds / DT).round() as usize;
        for _ in 0..steps {
            weapon.tick_timers(DT, world);
        }
    }

    fn count(events: &[WeaponEvent], pred: impl Fn(&WeaponEvent) -> bool) -> usize {
        events.iter().filter(|e| pred(e)).count()
    }

    #[test]
    fn test_fire_interval() {
        let mut settings = FireWeaponSettings::default();
        assert!((settings.fire_interval() - 0.1).abs() < 1e-6);
        settings.fire_rate_rpm = 0.0;
        assert!((settings.fire_interval() - FALLBACK_FIRE_INTERVAL).abs() < 1e-6);
        settings.fire_rate_rpm = 10.0;
        assert!((settings.fire_interval() - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_semi_fires_once_per_press() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings::default());
        weapon.primary_action(true, &mut world);
        run(&mut weapon, &mut world, 0.5);
        assert_eq!(weapon.ammo_in_magazine(), 29);
        assert!(weapon.is_firing());
        weapon.primary_action(false, &mut world);
        assert!(!weapon.is_firing());
        assert_eq!(weapon.imprecision(), weapon.settings.max_imprecision);
    }

    #[test]
    fn test_auto_repeats_at_interval() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.primary_action(true, &mut world);
        assert_eq!(weapon.ammo_in_magazine(), 29);
        run(&mut weapon, &mut world, 0.5);
        // first shot plus five repeats
        assert_eq!(weapon.ammo_in_magazine(), 24);
        weapon.primary_action(false, &mut world);
        assert!(!weapon.has_pending_fire_timer());
        run(&mut weapon, &mut world, 0.5);
        assert_eq!(weapon.ammo_in_magazine(), 24);
    }

    #[test]
    fn test_auto_stops_when_dry() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.set_ammo_in_mag(2);
        weapon.primary_action(true, &mut world);
        run(&mut weapon, &mut world, 1.0);
        assert_eq!(weapon.ammo_in_magazine(), 0);
        assert!(!weapon.is_firing());
        assert!(!weapon.has_pending_fire_timer());
        let events = weapon.drain_events();
        assert_eq!(count(&events, |e| *e == WeaponEvent::OutOfAmmo), 1);
    }

    #[test]
    fn test_burst_completes_after_release() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Burst,
            ..Default::default()
        });
        weapon.primary_action(true, &mut world);
        weapon.primary_action(false, &mut world);
        assert!(weapon.is_burst_sequencing());
        assert!(weapon.is_firing());
        run(&mut weapon, &mut world, 0.5);
        assert_eq!(weapon.ammo_in_magazine(), 27);
        assert!(!weapon.is_burst_sequencing());
        assert!(!weapon.is_firing());
    }

    #[test]
    fn test_reload_mid_burst_stops_burst() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Burst,
            ..Default::default()
        });
        weapon.primary_action(true, &mut world);
        assert_eq!(weapon.ammo_in_magazine(), 29);
        weapon.start_reload();
        assert!(weapon.is_reloading());
        run(&mut weapon, &mut world, 0.5);
        assert_eq!(weapon.ammo_in_magazine(), 29);
        assert!(!weapon.is_burst_sequencing());
        assert_eq!(weapon.burst_left(), 0);
    }

    #[test]
    fn test_reload_stops_held_auto_fire() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.owner.locally_controlled = true;
        weapon.primary_action(true, &mut world);
        run(&mut weapon, &mut world, 0.25);
        let before_reload = weapon.ammo_in_magazine();
        assert!(before_reload < 30);

        weapon.start_reload();
        run(&mut weapon, &mut world, 0.5);
        assert_eq!(weapon.ammo_in_magazine(), before_reload);
        assert!(!weapon.is_firing());
        assert!(!weapon.has_pending_fire_timer());

        weapon.notify_commit_reload(false);
        assert_eq!(weapon.ammo_in_magazine(), 30);
        // trigger still held, but firing only resumes on a new press
        run(&mut weapon, &mut world, 0.5);
        assert_eq!(weapon.ammo_in_magazine(), 30);
        assert!(!weapon.is_firing());
    }

    #[test]
    fn test_out_of_ammo_notifies_without_state_change() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings::default());
        weapon.set_ammo_in_mag(0);
        weapon.drain_events();
        weapon.begin_fire(&mut world);
        weapon.begin_fire(&mut world);
        let events = weapon.drain_events();
        assert_eq!(events, vec![WeaponEvent::OutOfAmmo, WeaponEvent::OutOfAmmo]);
        assert!(!weapon.is_firing());
    }

    #[test]
    fn test_run_fire_delay_tap_fires_single_shot() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.owner.should_use_run_fire_delay = true;
        weapon.primary_action(true, &mut world);
        assert!(weapon.is_run_fire_delay_active());
        assert!(!weapon.can_run());
        weapon.primary_action(false, &mut world);
        assert_eq!(weapon.ammo_in_magazine(), 30);

        run(&mut weapon, &mut world, 0.25);
        assert!(!weapon.is_run_fire_delay_active());
        assert_eq!(weapon.ammo_in_magazine(), 29);
        run(&mut weapon, &mut world, 0.2);
        assert!(!weapon.is_firing());
        assert_eq!(weapon.ammo_in_magazine(), 29);
    }

    #[test]
    fn test_run_fire_delay_held_starts_auto() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.owner.should_use_run_fire_delay = true;
        weapon.primary_action(true, &mut world);
        run(&mut weapon, &mut world, 0.5);
        assert!(weapon.is_firing());
        assert!(weapon.ammo_in_magazine() < 29);
    }

    #[test]
    fn test_commit_reload_caps_by_reserve() {
        let mut weapon = armed(FireWeaponSettings::default());
        weapon.owner.locally_controlled = true;
        weapon.set_ammo_in_mag(5);
        weapon.set_total_ammo(10);
        weapon.start_reload();
        weapon.notify_commit_reload(false);
        assert_eq!(weapon.ammo_in_magazine(), 15);
        assert_eq!(weapon.total_ammo(), 0);
        assert!(!weapon.is_reloading());
    }

    #[test]
    fn test_loop_reload_inserts_until_full() {
        let mut weapon = armed(FireWeaponSettings {
            loop_reload: true,
            ..Default::default()
        });
        weapon.owner.locally_controlled = true;
        weapon.set_ammo_in_mag(27);
        weapon.start_reload();
        weapon.notify_insert_one_round();
        weapon.notify_insert_one_round();
        assert!(weapon.is_reloading());
        weapon.notify_insert_one_round();
        assert_eq!(weapon.ammo_in_magazine(), 30);
        assert_eq!(weapon.total_ammo(), 87);
        assert!(!weapon.is_reloading());
    }

    #[test]
    fn test_loop_reload_commit_tops_up_only_when_forced() {
        let mut weapon = armed(FireWeaponSettings {
            loop_reload: true,
            ..Default::default()
        });
        weapon.owner.locally_controlled = true;
        weapon.set_ammo_in_mag(20);
        weapon.start_reload();
        weapon.notify_insert_one_round();
        weapon.notify_commit_reload(false);
        assert_eq!(weapon.ammo_in_magazine(), 21);
        assert_eq!(weapon.total_ammo(), 89);
        assert!(!weapon.is_reloading());

        weapon.start_reload();
        weapon.notify_commit_reload(true);
        assert_eq!(weapon.ammo_in_magazine(), 30);
        assert_eq!(weapon.total_ammo(), 80);
        assert!(!weapon.is_reloading());
    }

    #[test]
    fn test_can_reload_rules() {
        let mut weapon = armed(FireWeaponSettings::default());
        assert!(!weapon.can_reload());
        weapon.set_ammo_in_mag(10);
        assert!(weapon.can_reload());
        weapon.set_total_ammo(0);
        assert!(!weapon.can_reload());
        weapon.set_total_ammo(5);
        weapon.set_equipped(false);
        assert!(!weapon.can_reload());
    }

    #[test]
    fn test_ammo_pickup_event() {
        let mut weapon = armed(FireWeaponSettings::default());
        weapon.add_total_ammo(10);
        weapon.add_total_ammo(-500);
        assert_eq!(weapon.total_ammo(), 0);
        let events = weapon.drain_events();
        assert!(events.contains(&WeaponEvent::AmmoPickedUp { total: 100 }));
    }

    #[test]
    fn test_cycle_fire_mode_skips_unsupported() {
        let mut weapon = armed(FireWeaponSettings {
            burst_support: false,
            ..Default::default()
        });
        weapon.cycle_fire_mode();
        assert_eq!(weapon.fire_mode(), FireMode::Auto);
        weapon.cycle_fire_mode();
        assert_eq!(weapon.fire_mode(), FireMode::Semi);
    }

    #[test]
    fn test_client_cycle_fire_mode_only_requests() {
        let mut weapon = client_armed(FireWeaponSettings::default());
        weapon.cycle_fire_mode();
        assert_eq!(weapon.fire_mode(), FireMode::Semi);
        assert_eq!(weapon.drain_rpcs(), vec![WeaponRpc::SetFireMode(FireMode::Burst)]);
    }

    #[test]
    fn test_server_rejects_unsupported_fire_mode() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            auto_support: false,
            ..Default::default()
        });
        let result = weapon.handle_server_rpc(WeaponRpc::SetFireMode(FireMode::Auto), &mut world);
        assert!(result.is_err());
        assert_eq!(weapon.fire_mode(), FireMode::Semi);
    }

    #[test]
    fn test_client_shot_sends_rpc_without_spending() {
        let mut world = HitScanWorld::default();
        let mut weapon = client_armed(FireWeaponSettings::default());
        weapon.primary_action(true, &mut world);
        assert_eq!(weapon.ammo_in_magazine(), 30);
        let rpcs = weapon.drain_rpcs();
        assert_eq!(rpcs[0], WeaponRpc::SetIsFiring(true));
        assert!(matches!(rpcs[1], WeaponRpc::ApplyShot(_)));
        let events = weapon.drain_events();
        assert!(events.contains(&WeaponEvent::RecoilPlay));
    }

    #[test]
    fn test_server_shot_damages_target() {
        let mut world = HitScanWorld::default();
        world.upsert_target(HitTarget::new(ActorId(9), Vec3::new(2000.0, 0.0, 150.0), 60.0, 100.0));
        let mut weapon = armed(FireWeaponSettings::default());
        let data = BulletData::new(
            Vec3::new(0.0, 0.0, 150.0),
            &[Vec3::X],
            &[Vec3::new(20000.0, 0.0, 150.0)],
        );
        weapon
            .handle_server_rpc(WeaponRpc::ApplyShot(data), &mut world)
            .unwrap();
        assert_eq!(weapon.ammo_in_magazine(), 29);
        assert_eq!(world.target(ActorId(9)).unwrap().health.current, 80.0);
        assert_eq!(weapon.bullet_data().sequence, 1);
    }

    #[test]
    fn test_server_rejects_malformed_shot() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings::default());
        let mut data = BulletData::new(Vec3::ZERO, &[Vec3::X], &[Vec3::X]);
        data.directions.clear();
        assert!(weapon
            .handle_server_rpc(WeaponRpc::ApplyShot(data), &mut world)
            .is_err());
        assert_eq!(weapon.ammo_in_magazine(), 30);
    }

    #[test]
    fn test_server_rejects_shot_past_trace_distance() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            trace_distance: 1000.0,
            ..Default::default()
        });
        let data = BulletData::new(Vec3::ZERO, &[Vec3::X], &[Vec3::X * 3000.0]);
        assert!(matches!(
            weapon.handle_server_rpc(WeaponRpc::ApplyShot(data), &mut world),
            Err(NetError::RejectedRpc(_))
        ));
        assert_eq!(weapon.ammo_in_magazine(), 30);
    }

    #[test]
    fn test_server_drops_shot_while_reloading() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings::default());
        weapon.set_ammo_in_mag(10);
        weapon.start_reload();
        let data = BulletData::new(Vec3::ZERO, &[Vec3::X], &[Vec3::X * 100.0]);
        weapon
            .handle_server_rpc(WeaponRpc::ApplyShot(data), &mut world)
            .unwrap();
        assert_eq!(weapon.ammo_in_magazine(), 10);
    }

    #[test]
    fn test_imprecision_counts_down_and_resets() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.primary_action(true, &mut world);
        run(&mut weapon, &mut world, 0.25);
        assert_eq!(weapon.imprecision(), 15 - weapon.bullets_fired() as i32);
        weapon.primary_action(false, &mut world);
        assert_eq!(weapon.imprecision(), 15);
        assert_eq!(weapon.bullets_fired(), 0);
    }

    #[test]
    fn test_unequip_stops_everything() {
        let mut world = HitScanWorld::default();
        let mut weapon = armed(FireWeaponSettings {
            fire_mode: FireMode::Auto,
            ..Default::default()
        });
        weapon.primary_action(true, &mut world);
        weapon.on_begin_unequip();
        assert!(!weapon.is_firing());
        assert!(!weapon.has_pending_fire_timer());
    }

    #[test]
    fn test_aiming_timeline_and_can_run() {
        let mut weapon = armed(FireWeaponSettings::default());
        weapon.secondary_action(true);
        assert!(!weapon.can_run());
        for _ in 0..120 {
            weapon.refresh_aiming_timeline(DT);
        }
        assert!(weapon.ads_alpha() > 0.99);
        assert!((weapon.ads_alpha() - weapon.fov_alpha()).abs() < 1e-6);
        let events = weapon.drain_events();
        assert!(events.contains(&WeaponEvent::AimChanged(true)));
        assert!(events.contains(&WeaponEvent::OwnerAimRequested(true)));
    }

    #[test]
    fn test_owner_snapshot_skips_prediction_fields() {
        let weapon = armed(FireWeaponSettings::default());
        let owner = weapon.replicated_state(ReplicationTarget::Owner);
        assert!(owner.is_firing.is_none());
        assert!(owner.bullet_data.is_none());
        let other = weapon.replicated_state(ReplicationTarget::NonOwner);
        assert_eq!(other.is_aiming, Some(false));
    }

    #[test]
    fn test_remote_copy_replays_fx_from_bullet_data() {
        let mut world = HitScanWorld::default();
        let mut server = armed(FireWeaponSettings::default());
        server.primary_action(true, &mut world);

        let mut remote = armed(FireWeaponSettings::default());
        remote.owner.role = NetRole::SimulatedProxy;
        remote.drain_events();
        remote.apply_replication(&server.replicated_state(ReplicationTarget::NonOwner), &world);
        assert_eq!(remote.ammo_in_magazine(), 29);
        assert!(remote.is_firing());
        let events = remote.drain_events();
        assert_eq!(count(&events, |e| *e == WeaponEvent::RecoilPlay), 1);

        // same snapshot again changes nothing
        remote.apply_replication(&server.replicated_state(ReplicationTarget::NonOwner), &world);
        assert!(remote.drain_events().is_empty());
    }
}
