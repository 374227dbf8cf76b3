use bonk_solver::*;
use glam::Vec3;

const RUBBER_BALL: &str = r#"
mass = 0.5
radius = 0.25
restitution = 0.7
friction = 0.3
use_gravity = true
bounce_additional_iterations = 2
"#;

fn main() -> Result<(), PhysicsError> {
    env_logger::init();

    let cfg = SolverConfig::from_toml_str("max_iterations = 4\nminimum_simulation_speed = 0.05\n")?;
    let preset = RigidBody::from_toml_str(RUBBER_BALL)?;

    let mut scene = Scene::new();
    scene.add_static(StaticCollider::plane(Vec3::Z, 0.0));
    let mut solver = Solver::new(cfg);

    for i in 0..3 {
        let body = preset.clone().with_velocity(Vec3::new(1.0 + i as f32, 0.0, 0.0));
        let handle = scene.spawn(body, Vec3::new(i as f32 * 2.0, 0.0, 2.0 + i as f32));
        solver.request_enable(handle);
    }

    let dt = 1.0 / 60.0;
    let mut frame = 0u32;
    while solver.has_bodies() && frame < 60 * 30 {
        solver.tick(&mut scene, dt);
        frame += 1;
        for ev in scene.drain_events() {
            match ev {
                SceneEvent::Bounced { handle, before, after, .. } => {
                    println!(
                        "frame {frame:4}: {:?} bounced vz {:.2} -> {:.2}",
                        handle, before.z, after.z
                    );
                }
                SceneEvent::Stopped { handle } => {
                    let p = scene.position(handle).unwrap_or_default();
                    println!("frame {frame:4}: {:?} settled at ({:.2},{:.2},{:.2})", handle, p.x, p.y, p.z);
                }
                SceneEvent::Destroyed { handle } => println!("frame {frame:4}: {:?} destroyed", handle),
            }
        }
    }

    let stats = solver.debug_stats();
    println!(
        "done after {frame} frames; last tick: active={} simulated={} sub_steps={} impacts={}",
        stats.active, stats.simulated, stats.sub_steps, stats.impacts
    );
    Ok(())
}
