use async_shadow::{
    CpuShadowBackend, LightState, ShadowBackend, ShadowSettings, ShadowSystem, SubmissionMode,
    backend::cpu::CpuTexture,
    data_structures::{instance::ObjectTransform, mesh::MeshData},
    scene::{ObjectTable, ScatterParams, TextureSlot, scatter},
};

use crate::common::test_utils::{binding, checkerboard, init, single_triangle_scene};

mod common;

fn scattered_system(multi_threaded: bool) -> (ShadowSystem<CpuShadowBackend>, async_shadow::SceneResources<CpuShadowBackend>) {
    let objects = scatter(&ScatterParams {
        count: 300,
        range: 80.0,
        mesh_count: 2,
        texture_count: 1,
        seed: 7,
    });
    let scene = CpuShadowBackend::scene_resources(
        &[MeshData::cube(), MeshData::quad(0.5)],
        &[checkerboard()],
        objects,
        96,
    );
    let settings = ShadowSettings::default()
        .with_multi_threaded(multi_threaded)
        .with_shadow_radius(150.0);
    let system = ShadowSystem::init(CpuShadowBackend::new().with_threads(5), settings, &scene).unwrap();
    (system, scene)
}

#[test]
fn should_match_single_threaded_depth() {
    init();
    let light = LightState::new([40.0, 120.0, -60.0], [-0.3, -0.9, 0.3], 150.0);

    let (mut single, single_scene) = scattered_system(false);
    single.frame(&light);
    let (mut multi, multi_scene) = scattered_system(true);
    let report = multi.frame(&light);
    assert!(report.multi_threaded);

    assert!(single_scene.shadow_target.covered_texels() > 0);
    assert_eq!(single_scene.shadow_target.snapshot(), multi_scene.shadow_target.snapshot());
}

#[test]
fn should_match_across_submission_modes() {
    init();
    let light = LightState::default();
    let (mut system, scene) = scattered_system(true);

    let mut depth = Vec::new();
    for mode in [SubmissionMode::Direct, SubmissionMode::Indirect, SubmissionMode::Bundle] {
        let (indirect, bundle) = mode.flags();
        system.configure(indirect, bundle);
        system.update_light(light.position_array(), light.forward_array(), 150.0);
        system.pull_shadow_transform();
        system.render_shadows(true);
        assert_eq!(system.backend().last_stats().mode, mode);
        depth.push(scene.shadow_target.snapshot());
    }
    assert_eq!(depth[0], depth[1]);
    assert_eq!(depth[0], depth[2]);
}

#[test]
fn should_cut_out_transparent_texels() {
    init();
    let quad = MeshData::quad(10.0);
    let mut backend = CpuShadowBackend::new();
    backend.create_resources();
    let b = binding(&quad);
    backend.send_mesh_data(&b.vertex_buffer, &b.index_buffer, b.vertex_count, b.index_count);
    backend.send_texture_data(&CpuTexture::from_image(checkerboard()));
    let scene = single_triangle_scene(64);
    backend.send_shadow_texture_data(&scene.shadow_target);
    backend.set_light_transform([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 10.0);

    backend.render_shadows(false);
    let opaque = scene.shadow_target.covered_texels();
    assert_eq!(opaque, 64 * 64);

    backend.set_obj_texture_index(0, 0);
    backend.render_shadows(false);
    let cut = scene.shadow_target.covered_texels();
    assert!(cut > 0 && cut < opaque);
    // half the checkerboard is transparent
    assert_eq!(cut, opaque / 2);
}

#[test]
fn should_keep_nearest_object() {
    init();
    let quad = MeshData::quad(5.0);
    let mut table = ObjectTable::new();
    table.push(0, ObjectTransform::new(), TextureSlot::Opaque);
    let mut raised = ObjectTransform::new();
    raised.position.y = 4.0;
    table.push(0, raised, TextureSlot::Opaque);
    let scene = CpuShadowBackend::scene_resources(&[quad], &[], table, 32);

    let mut system = ShadowSystem::init(CpuShadowBackend::new(), ShadowSettings::default(), &scene).unwrap();
    system.frame(&LightState::new([0.0, 10.0, 0.0], [0.0, -1.0, 0.0], 10.0));
    // raised quad is 6 units from the light, box spans [-10, 10] around z = 10
    let center = scene.shadow_target.depth_at(16, 16).unwrap();
    assert!((center - 0.3).abs() < 1e-4);
}
