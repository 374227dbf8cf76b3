use bonk_solver::*;
use glam::Vec3;

fn ball(velocity: Vec3) -> RigidBody {
    RigidBody::new(0.17)
        .with_radius(0.028)
        .with_restitution(0.95, RestitutionCombine::Average)
        .with_friction(0.05)
        .with_damping(0.4, 0.2)
        .with_plane_constraint(Vec3::Z)
        .with_velocity(velocity)
}

fn main() {
    env_logger::init();

    let mut scene = Scene::new();
    // Cushions of a 2.5 x 1.25 table
    scene.add_static(StaticCollider::plane(Vec3::X, -1.25));
    scene.add_static(StaticCollider::plane(Vec3::NEG_X, -1.25));
    scene.add_static(StaticCollider::plane(Vec3::Y, -0.625));
    scene.add_static(StaticCollider::plane(Vec3::NEG_Y, -0.625));
    // Corner pocket
    scene.add_static(
        StaticCollider::sphere(Vec3::new(1.25, 0.625, 0.0), 0.06).kill_volume(),
    );

    let mut solver = Solver::new(SolverConfig {
        max_iterations: 6,
        enable_timing: true,
        ..Default::default()
    });

    let cue = scene.spawn(ball(Vec3::new(3.0, 0.4, 0.0)), Vec3::new(-0.8, 0.0, 0.0));
    solver.request_enable(cue);
    // Racked object balls start at rest and wake when struck
    for (i, (x, y)) in [(0.5, 0.0), (0.56, 0.03), (0.56, -0.03), (0.62, 0.0)].into_iter().enumerate() {
        let handle = scene.spawn(ball(Vec3::ZERO), Vec3::new(x, y, 0.0));
        println!("object ball {i}: {:?}", handle);
    }

    let dt = 1.0 / 120.0;
    for frame in 0..1200 {
        solver.tick(&mut scene, dt);
        let stats = solver.debug_stats();
        if stats.pair_collisions > 0 || stats.stopped > 0 || stats.aborted > 0 {
            println!(
                "frame {frame:4}: simulated={} pairs={} memo={} stopped={} aborted={}",
                stats.simulated, stats.pair_collisions, stats.memo_hits, stats.stopped, stats.aborted
            );
        }
        if !solver.has_bodies() {
            break;
        }
    }

    if let Some(t) = solver.timing() {
        println!(
            "timing: tick={:.3}ms (register={:.3}ms simulate={:.3}ms)",
            t.tick_ms, t.register_ms, t.simulate_ms
        );
    }
    for handle in scene.handles() {
        if let Some(entry) = scene.entry(handle) {
            println!("{:?} rests at ({:.3},{:.3})", handle, entry.position.x, entry.position.y);
        }
    }
}
