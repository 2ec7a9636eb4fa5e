use std::sync::Arc;

use strata::backend::recording::RecordingContext;
use strata::{
    Aabb, Camera, CameraTarget, Drawable, DrawableId, EcsScene, Engine, EngineOptions, Mat4,
    Material, MeshId, RenderType, UVec2, Vec3,
};

fn build_scene() -> EcsScene {
    let mut scene = EcsScene::new();

    let materials = [
        Arc::new(
            Material::new(RenderType::Pbr)
                .with_name("stone")
                .with_definition("SHADER", "pbr"),
        ),
        Arc::new(
            Material::new(RenderType::Pbr)
                .with_name("metal")
                .with_definition("SHADER", "pbr")
                .with_definition("HAS_NORMAL_MAP", "true"),
        ),
        Arc::new(
            Material::new(RenderType::Unlit)
                .with_name("sky marker")
                .with_definition("SHADER", "unlit"),
        ),
        Arc::new(
            Material::new(RenderType::Pbr)
                .with_name("glass")
                .with_definition("SHADER", "pbr")
                .transparent(),
        ),
    ];

    for i in 0..24u64 {
        let material = materials[(i % materials.len() as u64) as usize].clone();
        let x = (i % 6) as f32 * 2.0 - 5.0;
        let z = -((i / 6) as f32 * 2.0 + 3.0);
        scene.spawn(
            Drawable::new(DrawableId(i), MeshId((i % 3) as u32), material)
                .with_transform(Mat4::from_translation(Vec3::new(x, 0.0, z))),
            Aabb::from_center(Vec3::ZERO, Vec3::splat(0.5)),
        );
    }
    scene
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let options = EngineOptions::load_from_path("strata.json").with_ssao(true);
    let mut engine = Engine::new(options);
    let camera = engine.add_deferred_camera(
        Camera::new()
            .at(0.0, 2.0, 4.0)
            .looking_at(0.0, 0.0, -6.0)
            .with_target(CameraTarget::screen(1280, 720)),
    );

    let scene = build_scene();
    let mut gfx = RecordingContext::new();

    for frame in 0..3 {
        if frame == 2 {
            engine.resize(camera, UVec2::new(1920, 1080));
        }
        gfx.clear_commands();
        if let Err(e) = engine.render_frame(&mut gfx, &scene) {
            log::error!("Frame {frame} failed: {e}");
            std::process::exit(1);
        }
        log::info!(
            "Frame {frame}: {} commands, {} mesh draws, {} full-screen quads",
            gfx.commands().len(),
            gfx.mesh_draw_count(),
            gfx.draw_count() - gfx.mesh_draw_count(),
        );
    }

    if gfx.violations().is_empty() {
        log::info!("No protocol violations");
    } else {
        for violation in gfx.violations() {
            log::warn!("{violation:?}");
        }
    }
}
