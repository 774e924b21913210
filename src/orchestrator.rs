//! Per-frame driver of the shadow pass.
//!
//! [`ShadowSystem`] owns a backend for one session. It only exists if every
//! fatal startup step succeeded, so a disabled system simply never gets built
//! and no per-frame call can reach a half initialized backend.
//!
//! A frame is four steps in fixed order: choose the submission strategy, push
//! the light pose, pull the shadow transform, render.

use std::time::Duration;

use crate::{
    backend::{ShadowBackend, TargetExtent},
    errors::{Result, ShadowError},
    light::{LightState, ShadowTransform},
    registrar::{self, MeshBinding, MeshRegistration, TextureRegistration},
    scene::ObjectTable,
    settings::{ShadowSettings, SubmissionMode},
};

/// Everything the caller registers at startup. All handles stay owned by the
/// caller; the backend keeps clones until release.
pub struct SceneResources<B: ShadowBackend> {
    pub meshes: Vec<MeshBinding<B::Buffer>>,
    pub textures: Vec<B::Texture>,
    pub shadow_target: B::DepthTarget,
    pub objects: ObjectTable,
}

/// Light pose as pushed to the backend.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct LightPose {
    pub position: [f32; 3],
    pub forward: [f32; 3],
    pub radius: f32,
}

/// Scratch storage reused every frame.
#[derive(Debug, Default)]
pub struct FrameState {
    pose: LightPose,
    /// Pose that produced the published transform.
    published_pose: Option<LightPose>,
    /// The backend holds a non-finite transform and no finite pose exists to
    /// restore, so rendering would not match the published transform.
    stale: bool,
    pulled: [f32; 16],
    shadow: ShadowTransform,
    frames: u64,
    skipped: u64,
}

impl FrameState {
    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Frames whose shadow transform was not finite and was not published.
    pub fn skipped(&self) -> u64 {
        self.skipped
    }

    pub fn light_position(&self) -> [f32; 3] {
        self.pose.position
    }

    pub fn light_forward(&self) -> [f32; 3] {
        self.pose.forward
    }

    pub fn published_pose(&self) -> Option<LightPose> {
        self.published_pose
    }
}

#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FrameReport {
    pub frame: u64,
    pub mode: SubmissionMode,
    pub multi_threaded: bool,
    pub transform_skipped: bool,
    pub render_time_ms: f64,
}

/// Read-only view for overlays.
#[derive(Copy, Clone, Debug)]
pub struct ShadowView<'a> {
    shadow: &'a ShadowTransform,
    shadow_bias: f32,
    shadow_map_size: u32,
    last_render_time_ms: f64,
}

impl<'a> ShadowView<'a> {
    pub fn current_shadow_transform(&self) -> &'a ShadowTransform {
        self.shadow
    }

    pub fn shadow_bias(&self) -> f32 {
        self.shadow_bias
    }

    pub fn shadow_map_size(&self) -> u32 {
        self.shadow_map_size
    }

    pub fn last_render_time_ms(&self) -> f64 {
        self.last_render_time_ms
    }
}

pub struct ShadowSystem<B: ShadowBackend> {
    backend: B,
    settings: ShadowSettings,
    mode: SubmissionMode,
    state: FrameState,
    meshes: MeshRegistration,
    textures: TextureRegistration,
    transmitted: usize,
    target_extent: (u32, u32),
    released: bool,
}

impl<B: ShadowBackend> ShadowSystem<B> {
    /// Probe the device, create backend state and register the scene.
    ///
    /// Meshes and textures that fail are skipped. A failing probe, resource
    /// creation or shadow target makes the whole system unavailable.
    /// The registered target decides the shadow map size; a differing
    /// `shadow_map_size` setting is overwritten.
    pub fn init(mut backend: B, mut settings: ShadowSettings, scene: &SceneResources<B>) -> Result<Self> {
        if !backend.check_device() {
            log::error!("shadow backend device check failed, shadows disabled");
            return Err(ShadowError::DeviceCheck);
        }
        if !backend.create_resources() {
            log::error!("shadow backend failed to create resources, shadows disabled");
            return Err(ShadowError::ResourceCreation);
        }

        let meshes = registrar::register_meshes(&mut backend, &scene.objects, &scene.meshes);
        let textures = registrar::register_textures(&mut backend, &scene.textures);
        if let Err(e) = registrar::register_shadow_target(&mut backend, &scene.shadow_target, "shadow map") {
            backend.release_resources();
            return Err(e);
        }
        let target_extent = scene.shadow_target.extent();
        if target_extent != (settings.shadow_map_size, settings.shadow_map_size) {
            log::warn!(
                "shadow map size {} does not match the registered {}x{} target, using the target",
                settings.shadow_map_size,
                target_extent.0,
                target_extent.1
            );
            settings.shadow_map_size = target_extent.0;
        }
        let transmitted = registrar::transmit_objects(&mut backend, &scene.objects, &meshes, &textures);

        let mode = settings.submission_mode();
        let (use_indirect, use_bundle) = mode.flags();
        backend.set_render_method(use_indirect, use_bundle);

        log::info!(
            "shadow system ready: {} of {} objects, {} textures, {:?}",
            transmitted,
            scene.objects.len(),
            textures.registered(),
            mode
        );
        Ok(Self {
            backend,
            settings,
            mode,
            state: FrameState::default(),
            meshes,
            textures,
            transmitted,
            target_extent,
            released: false,
        })
    }

    /// Choose the submission strategy. Indirect wins over bundles.
    pub fn configure(&mut self, use_indirect: bool, use_bundle: bool) -> SubmissionMode {
        let mode = SubmissionMode::from_flags(use_indirect, use_bundle);
        if mode != self.mode {
            log::debug!("shadow submission {:?} -> {:?}", self.mode, mode);
        }
        self.mode = mode;
        self.backend.set_render_method(use_indirect, use_bundle);
        mode
    }

    pub fn update_light(&mut self, position: [f32; 3], forward: [f32; 3], radius: f32) {
        self.state.pose = LightPose {
            position,
            forward,
            radius,
        };
        self.backend.set_light_transform(position, forward, radius);
    }

    /// Pull the backend's shadow transform into the published buffer.
    ///
    /// A non-finite transform is not published; the previous one stays and the
    /// backend is given back the pose that produced it, so the next render
    /// draws with the published transform.
    pub fn pull_shadow_transform(&mut self) -> bool {
        self.backend.get_light_transform(&mut self.state.pulled);
        if self.state.pulled.iter().all(|v| v.is_finite()) {
            self.state
                .shadow
                .as_mut_array()
                .copy_from_slice(&self.state.pulled);
            self.state.published_pose = Some(self.state.pose);
            self.state.stale = false;
            return true;
        }

        let pose = self.state.pose;
        log::warn!(
            "non-finite shadow transform for light at {:?} facing {:?} radius {}, keeping previous",
            pose.position,
            pose.forward,
            pose.radius
        );
        self.state.skipped += 1;
        match self.state.published_pose {
            Some(last) => {
                self.backend
                    .set_light_transform(last.position, last.forward, last.radius);
                self.state.stale = false;
            }
            None => self.state.stale = true,
        }
        false
    }

    /// Render with the backend's current transform. Skipped while no finite
    /// transform has ever been published and the backend holds a bad one.
    pub fn render_shadows(&mut self, multi_threaded: bool) {
        if self.state.stale {
            log::warn!("no finite shadow transform published yet, skipping shadow render");
            return;
        }
        self.backend.render_shadows(multi_threaded);
    }

    /// Duration of the last render as measured by the backend.
    pub fn last_render_time_ms(&self) -> f64 {
        self.backend.get_shadow_render_time()
    }

    /// Run one frame with the current settings.
    pub fn frame(&mut self, light: &LightState) -> FrameReport {
        let mode = self.configure(self.settings.use_indirect_draw, self.settings.use_command_bundles);
        self.update_light(light.position_array(), light.forward_array(), light.shadow_radius);
        let published = self.pull_shadow_transform();
        let multi_threaded = self.settings.multi_threaded;
        self.render_shadows(multi_threaded);
        self.state.frames += 1;

        FrameReport {
            frame: self.state.frames,
            mode,
            multi_threaded,
            transform_skipped: !published,
            render_time_ms: self.last_render_time_ms(),
        }
    }

    /// Advance the light orbit by `dt` at the configured speed and apply the
    /// configured radius.
    pub fn animate_light(&self, light: &mut LightState, dt: Duration) {
        light.orbit_y(self.settings.light_orbit_speed * dt.as_secs_f32());
        light.shadow_radius = self.settings.shadow_radius;
    }

    pub fn current_shadow_transform(&self) -> &ShadowTransform {
        &self.state.shadow
    }

    pub fn view(&self) -> ShadowView<'_> {
        ShadowView {
            shadow: &self.state.shadow,
            shadow_bias: self.settings.effective_shadow_bias(),
            shadow_map_size: self.target_extent.0,
            last_render_time_ms: self.last_render_time_ms(),
        }
    }

    pub fn settings(&self) -> &ShadowSettings {
        &self.settings
    }

    /// Drawing flags, radius, bias and orbit speed may change between frames.
    /// The map size is fixed by the registered target; changing it here has no
    /// effect.
    pub fn settings_mut(&mut self) -> &mut ShadowSettings {
        &mut self.settings
    }

    /// Width and height of the registered shadow target.
    pub fn target_extent(&self) -> (u32, u32) {
        self.target_extent
    }

    pub fn mode(&self) -> SubmissionMode {
        self.mode
    }

    pub fn frame_state(&self) -> &FrameState {
        &self.state
    }

    pub fn mesh_registration(&self) -> &MeshRegistration {
        &self.meshes
    }

    pub fn texture_registration(&self) -> &TextureRegistration {
        &self.textures
    }

    /// Objects whose transform reached the backend.
    pub fn object_count(&self) -> usize {
        self.transmitted
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    /// Release backend resources. Dropping the system does the same.
    pub fn shutdown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        log::info!("releasing shadow resources after {} frames", self.state.frames);
        self.backend.release_resources();
    }
}

impl<B: ShadowBackend> Drop for ShadowSystem<B> {
    fn drop(&mut self) {
        self.release();
    }
}
