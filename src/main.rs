//! Hollow Sim
//!
//! Runs the demo level with a scripted player, then replays the recorded
//! input log and checks that the final state hash is reproduced.
//!
//! Usage: `hollow-sim [config.json] [ticks]`

use std::collections::BTreeMap;

use anyhow::{bail, Context, Result};
use tracing::info;
use tracing_subscriber::EnvFilter;

use hollow_sim::{
    TICK_RATE, VERSION,
    game::{
        config::SimConfig,
        events::{EventKind, GameEventData},
        input::InputFrame,
        level::LevelData,
        progression::ProgressionTracker,
        replay::{replay, InputRecorder, ReplayLog},
        tick::tick,
        world::World,
    },
};

const DEMO_SEED: u64 = 12345;
const DEFAULT_TICKS: u32 = 60 * TICK_RATE;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let mut args = std::env::args().skip(1);
    let config = match args.next() {
        Some(path) => SimConfig::load(&path).with_context(|| format!("loading config {}", path))?,
        None => SimConfig::default(),
    };
    let ticks = match args.next() {
        Some(raw) => raw.parse::<u32>().with_context(|| format!("invalid tick count {:?}", raw))?,
        None => DEFAULT_TICKS,
    };

    info!("Hollow Sim v{}", VERSION);
    info!("Tick Rate: {} Hz, running {} ticks ({} seconds)", TICK_RATE, ticks, ticks / TICK_RATE);

    let level = LevelData::demo();
    let log = run_demo(&level, config.clone(), ticks)?;

    info!("=== Verifying Determinism ===");
    let bytes = log.to_bytes()?;
    info!("Replay log: {} input changes, {} bytes", log.deltas.len(), bytes.len());
    let decoded = ReplayLog::from_bytes(&bytes)?;
    let outcome = replay(&level, config, &decoded)?;
    info!("Replay State Hash: {}", hex::encode(outcome.final_hash));

    if !outcome.matches(&decoded) {
        bail!("determinism failure: replay hash differs from the recorded run");
    }
    info!("DETERMINISM VERIFIED: Hashes match!");
    Ok(())
}

/// Scripted controller: run right, turn back every fourth stretch, jump,
/// swing and dash on fixed beats.
fn scripted_input(t: u32) -> InputFrame {
    let mut frame = InputFrame::moving(if (t / 150) % 4 == 3 { -127 } else { 127 });
    if t % 40 == 0 {
        frame = frame.with(InputFrame::FLAG_JUMP);
    }
    if t % 18 == 5 {
        frame = frame.with(InputFrame::FLAG_ATTACK);
    }
    if t % 120 == 60 {
        frame = frame.with(InputFrame::FLAG_DASH);
    }
    frame
}

fn run_demo(level: &LevelData, config: SimConfig, ticks: u32) -> Result<ReplayLog> {
    info!("=== Starting Demo Run: {} ===", level.name);

    let mut world = World::load(level, config, DEMO_SEED)?;
    let player = world.player().context("demo level spawned no player")?;
    let tracker = ProgressionTracker::attach(world.bus_mut(), player);

    world.bus_mut().subscribe(EventKind::Died, |event, _| {
        if let GameEventData::Died { entity, killer, .. } = event.data {
            match killer {
                Some(killer) => info!("Tick {}: {} killed by {}", event.tick, entity, killer),
                None => info!("Tick {}: {} died", event.tick, entity),
            }
        }
        Ok(())
    });
    world.bus_mut().subscribe(EventKind::LeveledUp, |event, _| {
        if let GameEventData::LeveledUp { entity, level } = event.data {
            info!("Tick {}: {} reached level {}", event.tick, entity, level);
        }
        Ok(())
    });

    let mut recorder = InputRecorder::new();
    let mut inputs = BTreeMap::new();
    let mut total_events = 0;

    for _ in 0..ticks {
        let t = world.current_tick() + 1;
        let frame = scripted_input(t);
        recorder.record(t, frame);

        inputs.clear();
        if let Some(player) = world.player() {
            inputs.insert(player, frame);
        }
        let result = tick(&mut world, &inputs);
        total_events += result.events.len();

        if t % (10 * TICK_RATE) == 0 {
            info!(
                "Tick {}: {} entities, {} particles, {} events so far",
                t,
                world.entities().len(),
                world.particle_stats().active,
                total_events
            );
        }
    }

    info!("=== Run Results ===");
    let progress = tracker.progress();
    info!(
        "Player level {} ({} xp total), {} kills, {} damage dealt, {} taken",
        progress.level, progress.total_xp, progress.kills, progress.damage_dealt, progress.damage_taken
    );
    let particles = world.particle_stats();
    let projectiles = world.projectile_stats();
    info!(
        "Pools: particles {}/{} ({} refused), projectiles {}/{} ({} refused)",
        particles.active, particles.capacity, particles.exhausted,
        projectiles.active, projectiles.capacity, projectiles.exhausted
    );
    info!("Total events: {}", total_events);

    let log = recorder.finish(&world);
    info!("Final State Hash: {}", hex::encode(log.final_hash));
    tracker.detach(world.bus_mut());
    world.unload();
    Ok(log)
}
