//! Hit-scan traces and point damage.
//!
//! Weapons never touch the scene directly; they go through [`CombatWorld`].
//! [`HitScanWorld`] is the headless implementation: sphere hit targets plus
//! an optional ground plane.

use bevy::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::net::ActorId;

pub struct CombatPlugin;

impl Plugin for CombatPlugin {
    fn build(&self, app: &mut App) {
        app.init_resource::<HitScanWorld>()
            .add_event::<DamageEvent>()
            .add_systems(
                PostUpdate,
                (tick_invulnerability, publish_damage_events).chain(),
            );
    }
}

// =====================================================
// Health
// =====================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    pub current: f32,
    pub max: f32,
    pub invulnerable_timer: f32,
}

impl Health {
    pub fn new(max: f32) -> Self {
        Self {
            current: max,
            max,
            invulnerable_timer: 0.0,
        }
    }

    pub fn is_alive(&self) -> bool {
        self.current > 0.0
    }

    /// Returns the damage actually taken.
    pub fn take_damage(&mut self, amount: f32) -> f32 {
        if self.invulnerable_timer > 0.0 || amount <= 0.0 {
            return 0.0;
        }
        let actual = amount.min(self.current);
        self.current -= actual;
        actual
    }

    pub fn tick(&mut self, dt: f32) {
        self.invulnerable_timer = (self.invulnerable_timer - dt).max(0.0);
    }
}

// =====================================================
// Traces
// =====================================================

/// Sphere volume a trace can block on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitTarget {
    pub actor: ActorId,
    pub center: Vec3,
    pub radius: f32,
    pub can_be_damaged: bool,
    pub health: Health,
}

impl HitTarget {
    pub fn new(actor: ActorId, center: Vec3, radius: f32, max_health: f32) -> Self {
        Self {
            actor,
            center,
            radius,
            can_be_damaged: true,
            health: Health::new(max_health),
        }
    }

    /// Entry distance along `dir` (unit) from `origin`, if the ray hits.
    fn ray_entry(&self, origin: Vec3, dir: Vec3) -> Option<f32> {
        let to_center = origin - self.center;
        let b = to_center.dot(dir);
        let c = to_center.length_squared() - self.radius * self.radius;
        if c > 0.0 && b > 0.0 {
            return None;
        }
        let discriminant = b * b - c;
        if discriminant < 0.0 {
            return None;
        }
        Some((-b - discriminant.sqrt()).max(0.0))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHit {
    pub point: Vec3,
    pub normal: Vec3,
    pub distance: f32,
    /// `None` for world geometry.
    pub actor: Option<ActorId>,
    pub can_be_damaged: bool,
}

/// What a weapon needs from the scene.
pub trait CombatWorld {
    /// Closest blocking hit between `start` and `end`, ignoring `ignore`.
    fn line_trace(&self, start: Vec3, end: Vec3, ignore: Option<ActorId>) -> Option<TraceHit>;

    /// Returns the damage actually applied.
    fn apply_point_damage(
        &mut self,
        hit: &TraceHit,
        damage: f32,
        direction: Vec3,
        instigator: Option<ActorId>,
    ) -> f32;
}

#[derive(Debug, Clone, PartialEq)]
pub struct DamageRecord {
    pub target: ActorId,
    pub instigator: Option<ActorId>,
    pub amount: f32,
    pub point: Vec3,
    pub direction: Vec3,
}

#[derive(Event, Debug, Clone)]
pub struct DamageEvent {
    pub target: ActorId,
    pub instigator: Option<ActorId>,
    pub amount: f32,
    pub position: Vec3,
    pub killed: bool,
}

#[derive(Resource, Debug, Clone, Default)]
pub struct HitScanWorld {
    pub targets: Vec<HitTarget>,
    pub ground_z: Option<f32>,
    pending: Vec<DamageRecord>,
}

impl HitScanWorld {
    pub fn with_ground(ground_z: f32) -> Self {
        Self {
            ground_z: Some(ground_z),
            ..Default::default()
        }
    }

    /// Insert or replace the target for `target.actor`.
    pub fn upsert_target(&mut self, target: HitTarget) {
        match self.targets.iter_mut().find(|t| t.actor == target.actor) {
            Some(existing) => *existing = target,
            None => self.targets.push(target),
        }
    }

    pub fn set_target_center(&mut self, actor: ActorId, center: Vec3) {
        if let Some(target) = self.targets.iter_mut().find(|t| t.actor == actor) {
            target.center = center;
        }
    }

    pub fn target(&self, actor: ActorId) -> Option<&HitTarget> {
        self.targets.iter().find(|t| t.actor == actor)
    }

    pub fn drain_damage(&mut self) -> Vec<DamageRecord> {
        std::mem::take(&mut self.pending)
    }

    fn ground_hit(&self, start: Vec3, dir: Vec3, length: f32) -> Option<TraceHit> {
        let ground_z = self.ground_z?;
        if dir.z >= 0.0 || start.z < ground_z {
            return None;
        }
        let distance = (ground_z - start.z) / dir.z;
        if distance > length {
            return None;
        }
        Some(TraceHit {
            point: start + dir * distance,
            normal: Vec3::Z,
            distance,
            actor: None,
            can_be_damaged: false,
        })
    }
}

impl CombatWorld for HitScanWorld {
    fn line_trace(&self, start: Vec3, end: Vec3, ignore: Option<ActorId>) -> Option<TraceHit> {
        let segment = end - start;
        let length = segment.length();
        if length <= f32::EPSILON {
            return None;
        }
        let dir = segment / length;

        let actor_hit = self
            .targets
            .iter()
            .filter(|t| Some(t.actor) != ignore)
            .filter_map(|t| {
                let distance = t.ray_entry(start, dir)?;
                (distance <= length).then(|| {
                    let point = start + dir * distance;
                    TraceHit {
                        point,
                        normal: (point - t.center).normalize_or_zero(),
                        distance,
                        actor: Some(t.actor),
                        can_be_damaged: t.can_be_damaged,
                    }
                })
            })
            .min_by(|a, b| a.distance.total_cmp(&b.distance));

        let ground_hit = self.ground_hit(start, dir, length);
        match (actor_hit, ground_hit) {
            (Some(a), Some(g)) => Some(if a.distance <= g.distance { a } else { g }),
            (a, g) => a.or(g),
        }
    }

    fn apply_point_damage(
        &mut self,
        hit: &TraceHit,
        damage: f32,
        direction: Vec3,
        instigator: Option<ActorId>,
    ) -> f32 {
        let Some(actor) = hit.actor else {
            return 0.0;
        };
        let Some(target) = self.targets.iter_mut().find(|t| t.actor == actor) else {
            return 0.0;
        };
        if !target.can_be_damaged || !target.health.is_alive() {
            return 0.0;
        }

        let actual = target.health.take_damage(damage);
        if actual > 0.0 {
            debug!(target = actor.0, amount = actual, "point damage");
            self.pending.push(DamageRecord {
                target: actor,
                instigator,
                amount: actual,
                point: hit.point,
                direction,
            });
        }
        actual
    }
}

fn tick_invulnerability(time: Res<Time>, mut world: ResMut<HitScanWorld>) {
    let dt = time.delta_secs();
    for target in &mut world.targets {
        target.health.tick(dt);
    }
}

fn publish_damage_events(mut world: ResMut<HitScanWorld>, mut events: EventWriter<DamageEvent>) {
    let records = world.drain_damage();
    for record in records {
        let killed = world
            .target(record.target)
            .map(|t| !t.health.is_alive())
            .unwrap_or(false);
        events.send(DamageEvent {
            target: record.target,
            instigator: record.instigator,
            amount: record.amount,
            position: record.point,
            killed,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn world_with_dummy() -> HitScanWorld {
        let mut world = HitScanWorld::with_ground(0.0);
        world.upsert_target(HitTarget::new(ActorId(9), Vec3::new(1000.0, 0.0, 100.0), 50.0, 100.0));
        world
    }

    #[test]
    fn test_health_clamps_at_zero() {
        let mut health = Health::new(30.0);
        assert_eq!(health.take_damage(20.0), 20.0);
        assert_eq!(health.take_damage(20.0), 10.0);
        assert!(!health.is_alive());
        assert_eq!(health.take_damage(5.0), 0.0);
    }

    #[test]
    fn test_trace_hits_sphere_front() {
        let world = world_with_dummy();
        let hit = world
            .line_trace(Vec3::new(0.0, 0.0, 100.0), Vec3::new(5000.0, 0.0, 100.0), None)
            .unwrap();
        assert_eq!(hit.actor, Some(ActorId(9)));
        assert!((hit.distance - 950.0).abs() < 1e-2);
        assert!((hit.normal - Vec3::NEG_X).length() < 1e-4);
    }

    #[test]
    fn test_trace_ignores_actor() {
        let world = world_with_dummy();
        let hit = world.line_trace(
            Vec3::new(0.0, 0.0, 100.0),
            Vec3::new(5000.0, 0.0, 100.0),
            Some(ActorId(9)),
        );
        assert!(hit.is_none());
    }

    #[test]
    fn test_trace_short_of_target() {
        let world = world_with_dummy();
        let hit = world.line_trace(Vec3::new(0.0, 0.0, 100.0), Vec3::new(500.0, 0.0, 100.0), None);
        assert!(hit.is_none());
    }

    #[test]
    fn test_ground_blocks_before_target() {
        let world = world_with_dummy();
        let hit = world
            .line_trace(Vec3::new(0.0, 0.0, 100.0), Vec3::new(1000.0, 0.0, -900.0), None)
            .unwrap();
        assert_eq!(hit.actor, None);
        assert!(hit.point.z.abs() < 1e-3);
    }

    #[test]
    fn test_point_damage_records() {
        let mut world = world_with_dummy();
        let hit = world
            .line_trace(Vec3::new(0.0, 0.0, 100.0), Vec3::new(5000.0, 0.0, 100.0), None)
            .unwrap();
        let applied = world.apply_point_damage(&hit, 20.0, Vec3::X, Some(ActorId(1)));
        assert_eq!(applied, 20.0);
        assert_eq!(world.target(ActorId(9)).unwrap().health.current, 80.0);
        let records = world.drain_damage();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].instigator, Some(ActorId(1)));
    }

    #[test]
    fn test_no_damage_to_protected_target() {
        let mut world = world_with_dummy();
        world.targets[0].can_be_damaged = false;
        let hit = world
            .line_trace(Vec3::new(0.0, 0.0, 100.0), Vec3::new(5000.0, 0.0, 100.0), None)
            .unwrap();
        assert_eq!(world.apply_point_damage(&hit, 20.0, Vec3::X, None), 0.0);
    }
}
