//! Headless demo: one server copy and one owning client copy of the same
//! character, connected through simulated links. The client walks forward,
//! draws a rifle and taps shots at a dummy target.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use bevy::prelude::*;
use bevy::time::TimeUpdateStrategy;
use tracing::{info, warn};

use gameplay_core::character::{Character, CharacterPlugin, CharacterSystems};
use gameplay_core::combat::{CombatPlugin, DamageEvent, HitScanWorld, HitTarget};
use gameplay_core::config::{GameplayConfig, GameplayConfigPlugin};
use gameplay_core::constants::CHARACTER_HIT_RADIUS;
use gameplay_core::equipment::{
    EquipmentAnimData, EquipmentDefinition, EquipmentId, EquipmentKind, EquipmentPlugin,
};
use gameplay_core::locomotion::LocomotionPlugin;
use gameplay_core::logging::{LogLevel, LoggingPlugin};
use gameplay_core::net::link::NetLinks;
use gameplay_core::net::{ActorId, NetRole, ReplicationTarget};
use gameplay_core::weapon::WeaponPlugin;

const PLAYER: ActorId = ActorId(1);
const DUMMY: ActorId = ActorId(100);
const LINK_LATENCY: f32 = 0.05;
/// Owner snapshots go out every this many ticks.
const REPLICATION_INTERVAL: u64 = 6;

struct Args {
    config: Option<PathBuf>,
    /// Raises every module filter to this level.
    log_level: Option<LogLevel>,
    ticks: u64,
}

fn parse_args() -> Result<Args> {
    let mut args = Args {
        config: None,
        log_level: None,
        ticks: 240,
    };
    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "--verbose" | "-v" => args.log_level = Some(LogLevel::Debug),
            "--log-level" => {
                let name = iter.next().context("--log-level needs a level")?;
                let level = LogLevel::from_name(&name).with_context(|| {
                    let known: Vec<&str> = LogLevel::all_levels().iter().map(|l| l.as_str()).collect();
                    format!("unknown log level {name:?}, expected one of {}", known.join(", "))
                })?;
                args.log_level = Some(level);
            }
            "--config" => {
                let path = iter.next().context("--config needs a path")?;
                args.config = Some(PathBuf::from(path));
            }
            "--ticks" => {
                let value = iter.next().context("--ticks needs a number")?;
                args.ticks = value
                    .parse()
                    .with_context(|| format!("invalid tick count {value:?}"))?;
            }
            other => bail!("unknown argument {other:?}"),
        }
    }
    Ok(args)
}

#[derive(Component)]
struct ServerCopy;

#[derive(Component)]
struct ClientCopy;

#[derive(Resource, Default)]
struct DemoClock {
    tick: u64,
}

fn main() -> Result<()> {
    let args = parse_args()?;
    let mut config = match &args.config {
        Some(path) => GameplayConfig::load(path)
            .with_context(|| format!("loading gameplay config from {}", path.display()))?,
        None => GameplayConfig::default(),
    };
    if let Some(level) = args.log_level {
        config.tracing = config.tracing.with_all_modules_at(level);
    }
    let step = config.fixed_timestep();

    let mut app = App::new();
    app.add_plugins(MinimalPlugins)
        .insert_resource(TimeUpdateStrategy::ManualDuration(Duration::from_secs_f32(step)))
        .insert_resource(Time::<Fixed>::from_seconds(step as f64))
        .insert_resource(NetLinks::new(LINK_LATENCY))
        .init_resource::<DemoClock>()
        // Config first: logging reads it at build time
        .add_plugins(GameplayConfigPlugin {
            config: Some(config),
        })
        .add_plugins(LoggingPlugin)
        // Gameplay systems
        .add_plugins(CombatPlugin)
        .add_plugins(EquipmentPlugin)
        .add_plugins(WeaponPlugin)
        .add_plugins(LocomotionPlugin)
        .add_plugins(CharacterPlugin)
        .add_systems(Startup, setup)
        .add_systems(FixedUpdate, drive_client.before(CharacterSystems::Tick))
        .add_systems(FixedUpdate, pump_network.after(CharacterSystems::Tick))
        .add_systems(FixedUpdate, log_damage.after(CharacterSystems::Publish));

    for _ in 0..args.ticks {
        app.update();
    }

    report(app.world_mut());
    Ok(())
}

fn rifle() -> EquipmentDefinition {
    EquipmentDefinition {
        id: EquipmentId(1),
        name: "rifle".into(),
        anim: Some(EquipmentAnimData::uniform(0.4, 0.3)),
        kind: EquipmentKind::FireWeapon(Default::default()),
    }
}

fn setup(mut commands: Commands, config: Res<GameplayConfig>, mut world: ResMut<HitScanWorld>) {
    world.ground_z = Some(0.0);
    world.upsert_target(HitTarget::new(DUMMY, Vec3::new(2000.0, 0.0, 64.0), 50.0, 100.0));
    world.upsert_target(HitTarget::new(PLAYER, Vec3::ZERO, CHARACTER_HIT_RADIUS, 100.0));

    let mut server = Character::new(PLAYER, NetRole::Authority, false, &config);
    if let Err(err) = server.give_equipment(rifle(), Some(0)) {
        warn!(%err, "could not give the starting rifle");
    }
    let mut client = Character::new(PLAYER, NetRole::AutonomousProxy, true, &config);
    if let Err(err) = client.handle_message(server.replicate(ReplicationTarget::Owner), &mut *world) {
        warn!(%err, "initial replication failed");
    }

    commands.spawn((server, ServerCopy));
    commands.spawn((client, ClientCopy));
    info!("gameplay demo initialized");
}

fn drive_client(
    mut clock: ResMut<DemoClock>,
    mut world: ResMut<HitScanWorld>,
    mut clients: Query<&mut Character, With<ClientCopy>>,
) {
    clock.tick += 1;
    let tick = clock.tick;
    for mut client in &mut clients {
        if tick < 90 {
            client.add_movement_input(Vec3::X);
        }
        if tick == 10 {
            if let Err(err) = client.equip_slot(0) {
                warn!(%err, "equip request failed");
            }
        }
        if tick > 100 && tick % 15 == 0 {
            client.primary_action(true, &mut *world);
        } else if tick > 100 && tick % 15 == 1 {
            client.primary_action(false, &mut *world);
        }
        if tick == 200 {
            client.start_reload();
        }
        if tick == 230 {
            client.notify_reload_committed(false);
        }
    }
}

/// Route outgoing traffic through the links and deliver what arrives.
fn pump_network(
    time: Res<Time>,
    clock: Res<DemoClock>,
    mut links: ResMut<NetLinks>,
    mut world: ResMut<HitScanWorld>,
    mut servers: Query<&mut Character, (With<ServerCopy>, Without<ClientCopy>)>,
    mut clients: Query<&mut Character, (With<ClientCopy>, Without<ServerCopy>)>,
) {
    for mut server in &mut servers {
        let mut outgoing = server.drain_outgoing();
        if clock.tick % REPLICATION_INTERVAL == 0 {
            outgoing.push(server.replicate(ReplicationTarget::Owner));
        }
        if let Err(err) = links.to_client.send_all(&outgoing) {
            warn!(%err, "server send failed");
        }
    }
    for mut client in &mut clients {
        let outgoing = client.drain_outgoing();
        if let Err(err) = links.to_server.send_all(&outgoing) {
            warn!(%err, "client send failed");
        }
    }

    let dt = time.delta_secs();
    let messages = links.to_server.advance(dt);
    for mut server in &mut servers {
        for message in messages.iter().cloned() {
            if let Err(err) = server.handle_message(message, &mut *world) {
                warn!(%err, "server rejected message");
            }
        }
    }
    let messages = links.to_client.advance(dt);
    for mut client in &mut clients {
        for message in messages.iter().cloned() {
            if let Err(err) = client.handle_message(message, &mut *world) {
                warn!(%err, "client rejected message");
            }
        }
    }
}

fn log_damage(mut events: EventReader<DamageEvent>) {
    for event in events.read() {
        info!(
            target = event.target.0,
            amount = event.amount,
            killed = event.killed,
            "damage applied"
        );
    }
}

fn report(world: &mut World) {
    let mut characters = world.query::<&Character>();
    for character in characters.iter(world) {
        let weapon = character.current_weapon();
        info!(
            role = ?character.role(),
            location = ?character.movement.location,
            slot = ?character.equipment.current_index(),
            ammo = weapon.map(|w| w.ammo_in_magazine()),
            reserve = weapon.map(|w| w.total_ammo()),
            corrections = character.prediction().corrections(),
            "final state"
        );
    }
    let links = world.resource::<NetLinks>();
    info!(
        to_server = links.to_server.bytes_sent(),
        to_client = links.to_client.bytes_sent(),
        "bytes sent"
    );
    if let Some(dummy) = world.resource::<HitScanWorld>().target(DUMMY) {
        info!(health = dummy.health.current, "dummy target");
    }
}
