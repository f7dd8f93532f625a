//! A small convoy on flat ground: an AI-driven truck towing a crate, a car
//! following the same waypoints, and a savegame written at the end.
//!
//! Run with: RUST_LOG=beam_sim=debug cargo run --example convoy_demo

use beam_sim::ai::{AiDriver, Waypoint};
use beam_sim::{
    CouplingKind, CouplingParams, GameContext, InMemoryContent, Message, NodeRef, Placement,
    SimConfig, SimEvent, Snapshot,
};
use glam::Vec3;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

const FRAME: f32 = 1.0 / 30.0;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("beam_sim=info")),
        )
        .init();

    println!("=== Beam Sim - Convoy Demo ===\n");

    let mut ctx = GameContext::new(SimConfig::default(), Arc::new(InMemoryContent::with_presets()))
        .expect("worker pool");
    ctx.post(Message::LoadWorld { terrain: "flat".into() });
    ctx.frame(FRAME);

    let manager = ctx.manager_mut();
    let truck = manager.spawn_by_name("truck", None, Placement::default()).expect("truck");
    let trailer = manager
        .spawn_by_name("crate", None, Placement::at(Vec3::new(0.0, 0.0, -5.0)))
        .expect("crate");
    let car = manager
        .spawn_by_name("car", None, Placement::at(Vec3::new(6.0, 0.0, -12.0)))
        .expect("car");
    let (hitch, eye) = (NodeRef::new(truck, 0), NodeRef::new(trailer, 0));
    manager.attach(CouplingKind::Rope, hitch, eye, CouplingParams::default());

    let route: Vec<Waypoint> =
        [Vec3::new(0.0, 0.0, 60.0), Vec3::new(40.0, 0.0, 120.0), Vec3::new(80.0, 0.0, 120.0)]
            .into_iter()
            .map(Waypoint::at)
            .collect();
    for id in [truck, car] {
        if let Some(actor) = manager.actor_mut(id) {
            actor.ai = Some(AiDriver::with_waypoints(route.clone()));
        }
    }
    manager.set_player_actor(Some(truck));

    println!("Running 20 seconds of simulation...\n");
    for frame in 0..600 {
        let snapshot = ctx.frame(FRAME);
        for event in ctx.events() {
            let t = snapshot.time;
            match event {
                SimEvent::ShiftEnd { actor, gear } => {
                    println!("  [{t:>5.2}s] actor {} in gear {gear}", actor.0)
                }
                SimEvent::CouplingBroken { coupling } => {
                    println!("  [{t:>5.2}s] coupling {} broke", coupling.0)
                }
                SimEvent::ActorContact { a, b } => {
                    println!("  [{t:>5.2}s] actors {} and {} touched", a.0, b.0)
                }
                _ => {}
            }
        }
        if (frame + 1) % 150 == 0 {
            print_snapshot(&snapshot);
        }
    }

    let stats = ctx.stats();
    println!(
        "\n{} frames, {:.1} s simulated, {} actors",
        stats.frame, stats.sim_time, stats.actors
    );

    let path = std::env::temp_dir().join("convoy_demo.json");
    ctx.post(Message::SaveState { path: path.clone() });
    ctx.frame(FRAME);
    println!("Savegame written to {}", path.display());
}

fn print_snapshot(snapshot: &Snapshot) {
    println!("--- t = {:.1} s ---", snapshot.time);
    for actor in &snapshot.actors {
        let center = actor.center();
        let gear = actor
            .gauges
            .map(|g| format!(" gear {} at {:.0} rpm", g.gear, g.rpm))
            .unwrap_or_default();
        println!(
            "  {:>2} {:<6} pos=({:6.1}, {:5.1}, {:6.1}) {:?}{gear}",
            actor.id.0, actor.name, center.x, center.y, center.z, actor.state
        );
    }
}
