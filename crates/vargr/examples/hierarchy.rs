//! Hierarchy — a sun, a planet and a moon, each spinning inside its parent.
//!
//! Run with `RUST_LOG=debug` to see archetypes being created.

use std::time::Duration;

use vargr::prelude::*;

/// Radians per second.
struct Spin(f32);

struct Name(&'static str);

fn main() {
    env_logger::init();

    let mut app = App::new();
    app.add_plugin(HierarchyPlugin)
        .add_system(Phase::Startup, setup)
        .add_system(Phase::FixedUpdate, spin)
        .add_system(Phase::Update, report);

    for _ in 0..240 {
        app.tick(Duration::from_millis(16));
    }
}

fn setup(world: &mut World) {
    let sun = world.spawn((Name("sun"), Transform2d::IDENTITY, Spin(0.5)));
    let planet = world.spawn_child(
        sun,
        (Name("planet"), Transform2d::from_xy(200.0, 0.0), Spin(2.0)),
    );
    world.spawn_child(
        planet,
        (
            Name("moon"),
            Transform2d::from_xy(40.0, 0.0).with_scale(0.5),
        ),
    );
}

fn spin(world: &mut World) {
    let dt = world.resource::<FixedTime>().step_secs();
    world
        .query::<(&mut Transform2d, &Spin)>()
        .each(|_, (transform, spin)| transform.rotate(spin.0 * dt));
}

fn report(world: &mut World) {
    let frame = world.resource::<Time>().frame_count();
    if frame % 60 != 0 {
        return;
    }
    println!("frame {frame}");
    world
        .query::<(&Name, &GlobalTransform)>()
        .each(|_, (name, global)| {
            let p = global.translation();
            println!("  {:>6}: ({:8.2}, {:8.2})", name.0, p.x, p.y);
        });
}
