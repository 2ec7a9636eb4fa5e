use std::sync::Arc;

use strata::backend::recording::{Command, RecordingContext};
use strata::stage::{FrameEvent, programs};
use strata::{
    Aabb, Camera, CameraHandle, CameraTarget, Drawable, DrawableId, EcsScene, Engine,
    EngineOptions, Mat4, Material, MeshId, RasterState, RenderType, StageError, TargetId, UVec2,
    Vec3, Vec4,
};

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn material(shader: &str, render_type: RenderType) -> Arc<Material> {
    Arc::new(Material::new(render_type).with_definition("SHADER", shader))
}

fn spawn(scene: &mut EcsScene, id: u64, material: &Arc<Material>) {
    scene.spawn(
        Drawable::new(DrawableId(id), MeshId(id as u32), material.clone())
            .with_transform(Mat4::from_translation(Vec3::new(id as f32 - 1.0, 0.0, 0.0))),
        Aabb::from_center(Vec3::ZERO, Vec3::splat(0.5)),
    );
}

/// Two opaque PBR drawables sharing a material, one unlit, one transparent.
fn mixed_scene() -> EcsScene {
    let mut scene = EcsScene::new();
    let stone = material("pbr", RenderType::Pbr);
    let marker = material("unlit", RenderType::Unlit);
    let glass = Arc::new(
        Material::new(RenderType::Pbr)
            .with_definition("SHADER", "pbr")
            .transparent(),
    );
    spawn(&mut scene, 0, &stone);
    spawn(&mut scene, 1, &stone);
    spawn(&mut scene, 2, &marker);
    spawn(&mut scene, 3, &glass);
    scene
}

fn opaque_scene() -> EcsScene {
    let mut scene = EcsScene::new();
    let stone = material("pbr", RenderType::Pbr);
    spawn(&mut scene, 0, &stone);
    spawn(&mut scene, 1, &stone);
    scene
}

fn engine(options: EngineOptions) -> (Engine, CameraHandle) {
    let mut engine = Engine::new(options);
    let camera = engine.add_deferred_camera(
        Camera::new()
            .at(0.0, 0.0, 5.0)
            .with_target(CameraTarget::screen(800, 600)),
    );
    (engine, camera)
}

fn bound_labels(gfx: &RecordingContext) -> Vec<String> {
    gfx.commands()
        .iter()
        .filter_map(|command| match command {
            Command::BindTarget(target) if target.is_screen() => Some("screen".to_string()),
            Command::BindTarget(target) => gfx.target_label(*target).map(str::to_string),
            _ => None,
        })
        .collect()
}

#[test]
fn full_frame_follows_the_binding_protocol() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &mixed_scene()).unwrap();

    assert!(gfx.violations().is_empty(), "{:?}", gfx.violations());
    assert_eq!(gfx.bound_target(), None);
    assert_eq!(gfx.quads_with(programs::PBR_LIGHTS), 1);
    assert_eq!(gfx.quads_with(programs::BACKGROUND), 1);
    assert_eq!(gfx.quads_with(programs::TONEMAP), 1);
    // unlit composite + camera composite
    assert_eq!(gfx.quads_with(programs::SCREEN_QUAD), 2);
    // shadow (3) + gbuffer (3) + unlit (1) + accumulation (1) + revealage (1)
    assert_eq!(gfx.mesh_draw_count(), 9);
}

#[test]
fn targets_are_bound_in_pipeline_order() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &opaque_scene()).unwrap();

    assert_eq!(
        bound_labels(&gfx),
        vec![
            "shadow map",
            "gbuffer",
            "ping-pong b",
            "ping-pong a",
            "screen"
        ]
    );
}

#[test]
fn missing_program_fails_the_frame() {
    init_logging();
    let (mut engine, camera) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new().without_program(programs::PBR_LIGHTS);

    let scene = opaque_scene();

    let result = engine.render_frame(&mut gfx, &scene);

    match result {
        Err(StageError::MissingProgram { program, .. }) => {
            assert_eq!(program, programs::PBR_LIGHTS)
        }
        other => panic!("expected a missing program error, got {other:?}"),
    }
    assert!(!engine.root(camera).unwrap().is_started());

    // retries fail the same way and allocate nothing new
    let targets = gfx.target_count();
    for _ in 0..2 {
        let result = engine.render_frame(&mut gfx, &scene);
        assert!(matches!(result, Err(StageError::MissingProgram { .. })));
        assert_eq!(gfx.target_count(), targets);
    }
    assert!(!engine.root(camera).unwrap().is_started());
    assert!(engine.root(camera).unwrap().find("lighting").unwrap().is_enabled());
}

#[test]
fn resize_reallocates_every_screen_sized_target() {
    init_logging();
    let (mut engine, camera) = engine(EngineOptions::default().with_ssao(true));
    let mut gfx = RecordingContext::new();
    let scene = opaque_scene();

    engine.render_frame(&mut gfx, &scene).unwrap();
    let gbuffer = gfx.target_by_label("gbuffer").unwrap();
    assert_eq!(gfx.target_size(gbuffer), Some(UVec2::new(800, 600)));

    engine.resize(camera, UVec2::new(1024, 768));
    gfx.clear_commands();
    engine.render_frame(&mut gfx, &scene).unwrap();

    let resized = UVec2::new(1024, 768);
    for label in [
        "gbuffer",
        "oit accumulation",
        "oit revealage",
        "occlusion",
        "ping-pong a",
        "ping-pong b",
    ] {
        let target = gfx.target_by_label(label).unwrap();
        assert_eq!(gfx.target_size(target), Some(resized), "{label}");
        assert_eq!(gfx.viewport(target).unwrap().size(), resized, "{label}");
    }
    let shadow = gfx.target_by_label("shadow map").unwrap();
    assert_eq!(gfx.target_size(shadow), Some(UVec2::splat(2048)));

    // Every sampler was taken again, so nothing was skipped as stale.
    assert_eq!(gfx.quads_with(programs::SSAO), 1);
    assert_eq!(gfx.quads_with(programs::PBR_LIGHTS), 1);
    assert_eq!(gfx.quads_with(programs::TONEMAP), 1);
    assert_eq!(gfx.quads_with(programs::SCREEN_QUAD), 1);
    assert!(gfx.violations().is_empty());
}

#[test]
fn zero_sized_camera_skips_the_frame() {
    init_logging();
    let (mut engine, camera) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();
    let scene = opaque_scene();
    engine.render_frame(&mut gfx, &scene).unwrap();

    engine.resize(camera, UVec2::ZERO);
    gfx.clear_commands();
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.draw_count(), 0);

    engine.resize(camera, UVec2::new(640, 480));
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::SCREEN_QUAD), 1);
}

#[test]
fn disabled_stage_is_skipped_then_started_lazily() {
    init_logging();
    let (mut engine, camera) = engine(EngineOptions::default());
    engine
        .root_mut(camera)
        .unwrap()
        .find_mut("tonemap")
        .unwrap()
        .disable();
    let mut gfx = RecordingContext::new();
    let scene = opaque_scene();

    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::TONEMAP), 0);
    assert_eq!(gfx.quads_with(programs::PBR_LIGHTS), 1);
    let root = engine.root(camera).unwrap();
    assert!(!root.find("tonemap").unwrap().is_started());

    engine
        .root_mut(camera)
        .unwrap()
        .find_mut("tonemap")
        .unwrap()
        .enable();
    gfx.clear_commands();
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::TONEMAP), 1);
    assert!(gfx.violations().is_empty());
}

#[test]
fn immersive_mode_clears_instead_of_drawing_the_background() {
    init_logging();
    let (mut engine, camera) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();
    let scene = opaque_scene();

    engine.send(camera, FrameEvent::Immersive(true));
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::BACKGROUND), 0);
    assert_eq!(gfx.quads_with(programs::TONEMAP), 1);

    // The flag persists until the next immersive event.
    gfx.clear_commands();
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::BACKGROUND), 0);

    engine.send(camera, FrameEvent::Immersive(false));
    gfx.clear_commands();
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::BACKGROUND), 1);
}

#[test]
fn ssao_feeds_the_lighting_pass() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default().with_ssao(true));
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &opaque_scene()).unwrap();

    let occlusion = gfx.target_by_label("occlusion").unwrap();
    assert_eq!(gfx.bind_count(occlusion), 1);
    assert_eq!(gfx.quads_with(programs::SSAO), 1);

    let lighting_samplers = gfx
        .commands()
        .iter()
        .find_map(|command| match command {
            Command::BindSamplers { shader, names }
                if gfx.program_name(*shader) == Some(programs::PBR_LIGHTS) =>
            {
                Some(names.clone())
            }
            _ => None,
        })
        .unwrap();
    assert!(lighting_samplers.iter().any(|name| name == "occlusion"));
    assert!(lighting_samplers.iter().any(|name| name == "shadowMap"));
}

#[test]
fn ssao_is_absent_by_default() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &opaque_scene()).unwrap();

    assert_eq!(gfx.target_by_label("occlusion"), None);
    assert_eq!(gfx.quads_with(programs::SSAO), 0);
}

#[test]
fn transparent_geometry_goes_through_both_oit_passes() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &mixed_scene()).unwrap();

    let accum = gfx.target_by_label("oit accumulation").unwrap();
    let reveal = gfx.target_by_label("oit revealage").unwrap();
    let draws_into = |target: TargetId| {
        gfx.commands()
            .iter()
            .filter(|c| matches!(c, Command::DrawMesh { target: t, .. } if *t == target))
            .count()
    };
    assert_eq!(draws_into(accum), 1);
    assert_eq!(draws_into(reveal), 1);

    let commands = gfx.commands();
    assert!(commands.contains(&Command::Clear {
        target: accum,
        color: Vec4::ZERO
    }));
    assert!(commands.contains(&Command::Clear {
        target: reveal,
        color: Vec4::ONE
    }));
    assert!(commands.contains(&Command::SetRasterState(RasterState::OIT_ACCUMULATE)));
    assert!(commands.contains(&Command::SetRasterState(RasterState::OIT_REVEALAGE)));
    assert_eq!(gfx.quads_with(programs::OIT_COMPOSITE), 1);
    assert!(gfx.violations().is_empty());
}

#[test]
fn forward_geometry_is_depth_tested_against_the_gbuffer() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &mixed_scene()).unwrap();

    let forward = gfx.target_by_label("forward").unwrap();
    let gbuffer = gfx.target_by_label("gbuffer").unwrap();
    assert!(gfx.target_depth(forward).is_some());
    assert_eq!(gfx.target_depth(forward), gfx.target_depth(gbuffer));

    let commands = gfx.commands();
    let drawn_into_forward = commands
        .iter()
        .filter(|c| matches!(c, Command::DrawMesh { target, .. } if *target == forward))
        .count();
    assert_eq!(drawn_into_forward, 1);
    assert!(commands.contains(&Command::SetRasterState(RasterState::FORWARD)));
    assert!(RasterState::FORWARD.depth_test);
    assert!(gfx.violations().is_empty());
}

#[test]
fn opaque_scene_skips_transparency() {
    init_logging();
    let (mut engine, _) = engine(EngineOptions::default());
    let mut gfx = RecordingContext::new();

    engine.render_frame(&mut gfx, &opaque_scene()).unwrap();

    let accum = gfx.target_by_label("oit accumulation").unwrap();
    assert_eq!(gfx.bind_count(accum), 0);
    assert_eq!(gfx.quads_with(programs::OIT_COMPOSITE), 0);
}

#[test]
fn cameras_render_independently() {
    init_logging();
    let (mut engine, first) = engine(EngineOptions::default());
    let second = engine.add_deferred_camera(
        Camera::new().with_target(CameraTarget {
            id: TargetId::SCREEN,
            size: UVec2::new(320, 240),
        }),
    );
    let mut gfx = RecordingContext::new();
    let scene = opaque_scene();

    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::SCREEN_QUAD), 2);

    engine.set_active(first, false);
    gfx.clear_commands();
    engine.render_frame(&mut gfx, &scene).unwrap();
    assert_eq!(gfx.quads_with(programs::SCREEN_QUAD), 1);
    assert!(engine.is_active(second));
}
