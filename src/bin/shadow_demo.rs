//! Renders an orbiting light over a scattered scene with the CPU backend and
//! logs the render time of every submission strategy.
//!
//! Usage: `shadow_demo [objects] [frames] [map size]`

use std::time::Duration;

use async_shadow::{
    CpuShadowBackend, LightState, ShadowSettings, ShadowSystem, SubmissionMode,
    data_structures::mesh::MeshData,
    scene::{ScatterParams, scatter},
};

fn arg(n: usize, default: usize) -> anyhow::Result<usize> {
    match std::env::args().nth(n) {
        Some(v) => Ok(v.parse()?),
        None => Ok(default),
    }
}

fn main() -> anyhow::Result<()> {
    async_shadow::init_logger();
    let objects = arg(1, 1000)?;
    let frames = arg(2, 60)?;
    let map_size = arg(3, 512)? as u32;

    let mut cutout = image::RgbaImage::from_pixel(8, 8, image::Rgba([255, 255, 255, 255]));
    for (x, y, pixel) in cutout.enumerate_pixels_mut() {
        if (x + y) % 2 == 1 {
            pixel.0[3] = 0;
        }
    }
    let table = scatter(&ScatterParams {
        count: objects,
        mesh_count: 2,
        texture_count: 1,
        ..Default::default()
    });
    let resources = CpuShadowBackend::scene_resources(
        &[MeshData::cube(), MeshData::quad(0.5)],
        &[cutout],
        table,
        map_size,
    );

    let settings = ShadowSettings::default()
        .with_shadow_map_size(map_size)
        .with_shadow_radius(600.0);
    let mut system = ShadowSystem::init(CpuShadowBackend::new(), settings, &resources)?;
    let mut light = LightState::default();

    for mode in [SubmissionMode::Direct, SubmissionMode::Indirect, SubmissionMode::Bundle] {
        for multi_threaded in [false, true] {
            let (indirect, bundle) = mode.flags();
            let settings = system.settings_mut();
            settings.use_indirect_draw = indirect;
            settings.use_command_bundles = bundle;
            settings.multi_threaded = multi_threaded;

            let mut total = 0.0;
            for _ in 0..frames {
                system.animate_light(&mut light, Duration::from_millis(16));
                total += system.frame(&light).render_time_ms;
            }
            log::info!(
                "{:?} multi_threaded={}: {:.3} ms/frame over {} frames",
                mode,
                multi_threaded,
                total / frames.max(1) as f64,
                frames
            );
        }
    }

    system.shutdown();
    Ok(())
}
