#[cfg(feature = "integration-tests")]
mod common;

#[cfg(feature = "integration-tests")]
fn gpu_system(
    mode: async_shadow::SubmissionMode,
    multi_threaded: bool,
) -> (
    async_shadow::ShadowSystem<async_shadow::GpuShadowBackend>,
    async_shadow::SceneResources<async_shadow::GpuShadowBackend>,
) {
    use async_shadow::{
        GpuShadowBackend, ShadowSettings, ShadowSystem, data_structures::mesh::MeshData,
        scene::{ScatterParams, scatter},
    };

    let backend = GpuShadowBackend::headless().expect("Failed to create GPU context for integration test.");
    let objects = scatter(&ScatterParams {
        count: 200,
        range: 80.0,
        mesh_count: 2,
        texture_count: 1,
        seed: 3,
    });
    let scene = backend.scene_resources(
        &[MeshData::cube(), MeshData::quad(0.5)],
        &[crate::common::test_utils::checkerboard()],
        objects,
        128,
    );
    let settings = ShadowSettings::default()
        .with_submission(mode)
        .with_multi_threaded(multi_threaded)
        .with_shadow_map_size(128);
    let system = ShadowSystem::init(backend, settings, &scene).expect("shadow system init failed");
    (system, scene)
}

#[test]
#[cfg(feature = "integration-tests")]
fn should_draw_depth_on_gpu() {
    use async_shadow::{LightState, SubmissionMode};

    crate::common::test_utils::init();
    let (mut system, scene) = gpu_system(SubmissionMode::Direct, false);
    let report = system.frame(&LightState::new([40.0, 120.0, -60.0], [-0.3, -0.9, 0.3], 150.0));
    assert!(!report.transform_skipped);
    assert!(report.render_time_ms > 0.0);

    let depth = system
        .backend()
        .context()
        .read_depth(&scene.shadow_target)
        .unwrap();
    assert_eq!(depth.len(), 128 * 128);
    assert!(depth.iter().any(|d| *d < 1.0));
    assert!(depth.iter().all(|d| (0.0..=1.0).contains(d)));
}

#[test]
#[cfg(feature = "integration-tests")]
fn should_match_across_submission_modes_on_gpu() {
    use async_shadow::{LightState, SubmissionMode};

    crate::common::test_utils::init();
    let light = LightState::default();
    let mut results = Vec::new();
    for (mode, multi_threaded) in [
        (SubmissionMode::Direct, false),
        (SubmissionMode::Direct, true),
        (SubmissionMode::Indirect, false),
        (SubmissionMode::Bundle, false),
    ] {
        let (mut system, scene) = gpu_system(mode, multi_threaded);
        system.frame(&light);
        assert_eq!(system.backend().last_stats().mode, mode);
        results.push(system.backend().context().read_depth(&scene.shadow_target).unwrap());
    }
    for other in &results[1..] {
        assert_eq!(&results[0], other);
    }
}

#[test]
#[cfg(feature = "integration-tests")]
fn should_release_gpu_handles_once() {
    use async_shadow::SubmissionMode;

    crate::common::test_utils::init();
    let (system, scene) = gpu_system(SubmissionMode::Bundle, true);
    assert_eq!(system.backend().mesh_count(), 200);
    system.shutdown();
    // the caller still owns its handles
    assert_eq!(scene.shadow_target.width(), 128);
}

#[test]
#[cfg(feature = "integration-tests")]
fn should_reject_padded_vertex_stride_on_gpu() {
    use async_shadow::{
        GpuShadowBackend, ShadowBackend, data_structures::mesh::MeshData,
        wgpu::{self, util::DeviceExt},
    };

    crate::common::test_utils::init();
    let mut backend = GpuShadowBackend::headless().expect("Failed to create GPU context for integration test.");
    assert!(backend.create_resources());
    let device = backend.context().device.clone();

    // three vertices at a 48 byte stride
    let padded = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("padded vertices"),
        contents: &[0u8; 3 * 48],
        usage: wgpu::BufferUsages::VERTEX,
    });
    let indices = device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
        label: Some("indices"),
        contents: bytemuck::cast_slice(&[0u32, 1, 2]),
        usage: wgpu::BufferUsages::INDEX,
    });
    assert!(!backend.send_mesh_data(&padded, &indices, 3, 3));
    assert_eq!(backend.mesh_count(), 0);

    let (vb, ib) = MeshData::triangle(1.0).upload(&device);
    assert!(backend.send_mesh_data(&vb, &ib, 3, 3));
    assert_eq!(backend.mesh_count(), 1);
}

#[test]
#[cfg(feature = "integration-tests")]
fn should_hand_out_bare_scene_textures() {
    use async_shadow::{
        GpuShadowBackend, data_structures::texture::SHADOW_MAP_FORMAT, scene::ObjectTable, wgpu,
    };

    crate::common::test_utils::init();
    let backend = GpuShadowBackend::headless().expect("Failed to create GPU context for integration test.");
    let scene = backend.scene_resources(&[], &[crate::common::test_utils::checkerboard()], ObjectTable::new(), 32);
    assert_eq!(scene.shadow_target.format(), SHADOW_MAP_FORMAT);
    assert!(scene.shadow_target.usage().contains(wgpu::TextureUsages::RENDER_ATTACHMENT));
    assert_eq!(scene.textures.len(), 1);
    assert_eq!(scene.textures[0].format(), wgpu::TextureFormat::Rgba8Unorm);
    assert!(scene.textures[0].usage().contains(wgpu::TextureUsages::COPY_SRC));
}
