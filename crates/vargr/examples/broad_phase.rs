//! Broad phase — a few hundred drifting boxes and circles, reporting
//! overlapping pairs and what a fixed view rectangle can see.
//!
//! Pass a JSON config path as the first argument to override the defaults.

use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use vargr::prelude::*;

struct Velocity(Vec2);

const ARENA: f32 = 1000.0;

fn main() {
    vargr::diag::init_logger();

    let config = match std::env::args().nth(1) {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) => match EngineConfig::from_json(&text) {
                Ok(config) => config,
                Err(err) => {
                    log::error!("{path}: {err}");
                    return;
                }
            },
            Err(err) => {
                log::error!("{path}: {err}");
                return;
            }
        },
        None => EngineConfig::default(),
    };

    let mut app = App::new();
    app.with_config(config)
        .insert_resource(ViewRect(Rect::from_xywh(-200.0, -150.0, 400.0, 300.0)))
        .add_plugin(HierarchyPlugin)
        .add_plugin(BroadPhasePlugin)
        .add_system(Phase::Startup, setup)
        .add_system(Phase::FixedUpdate, drift);

    for frame in 1..=300 {
        app.tick(Duration::from_millis(16));
        let snapshot = app.diagnostics_snapshot();
        if frame % 60 == 0 {
            let world = app.world();
            println!(
                "frame {:3}: {:4} pairs, {:3} visible, {:?}",
                frame,
                world.resource::<CollisionPairs>().0.len(),
                world.resource::<VisibleSet>().0.len(),
                snapshot.quadtree,
            );
        }
    }
}

fn setup(world: &mut World) {
    let mut rng = StdRng::seed_from_u64(7);
    for i in 0..400 {
        let position = Vec2::new(
            rng.gen_range(-ARENA..ARENA),
            rng.gen_range(-ARENA..ARENA),
        );
        let collider = if i % 3 == 0 {
            Collider::circle(rng.gen_range(4.0..16.0))
        } else {
            Collider::rect(rng.gen_range(8.0..32.0), rng.gen_range(8.0..32.0))
        };
        let velocity = Vec2::new(rng.gen_range(-60.0..60.0), rng.gen_range(-60.0..60.0));
        world.spawn((Transform2d::from_position(position), collider, Velocity(velocity)));
    }
}

fn drift(world: &mut World) {
    let dt = world.resource::<FixedTime>().step_secs();
    world
        .query::<(&mut Transform2d, &mut Velocity)>()
        .each(|_, (transform, velocity)| {
            let p = transform.position() + velocity.0 * dt;
            if p.x.abs() > ARENA {
                velocity.0.x = -velocity.0.x;
            }
            if p.y.abs() > ARENA {
                velocity.0.y = -velocity.0.y;
            }
            transform.set_position(p);
        });
}
