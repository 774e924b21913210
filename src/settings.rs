//! Shadow rendering settings.
//!
//! [`ShadowSettings`] carries everything the host configures: the map size
//! (fixed once the system is initialized), the light fit radius, the sampling
//! bias handed to shading, and the drawing strategy flags which may change every
//! frame.

/// Range of shadow bias the shading side accepts.
pub const SHADOW_BIAS_RANGE: (f32, f32) = (0.0001, 0.1);

/// How draw calls are handed to the backend.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default)]
pub enum SubmissionMode {
    /// One recorded draw per object every frame.
    #[default]
    Direct,
    /// Draw arguments are read from a prebuilt argument buffer.
    Indirect,
    /// A command bundle recorded once at registration is replayed.
    Bundle,
}

impl SubmissionMode {
    /// Indirect drawing takes precedence over bundles.
    pub fn from_flags(use_indirect: bool, use_bundle: bool) -> Self {
        match (use_indirect, use_bundle) {
            (true, _) => SubmissionMode::Indirect,
            (false, true) => SubmissionMode::Bundle,
            (false, false) => SubmissionMode::Direct,
        }
    }

    pub fn flags(self) -> (bool, bool) {
        match self {
            SubmissionMode::Direct => (false, false),
            SubmissionMode::Indirect => (true, false),
            SubmissionMode::Bundle => (false, true),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct ShadowSettings {
    pub multi_threaded: bool,
    pub use_indirect_draw: bool,
    pub use_command_bundles: bool,
    /// Width and height of the square shadow map in texels.
    pub shadow_map_size: u32,
    /// Half-extent of the orthographic light frustum.
    pub shadow_radius: f32,
    pub shadow_bias: f32,
    /// Degrees per second the light orbits around world Y.
    pub light_orbit_speed: f32,
}

impl Default for ShadowSettings {
    fn default() -> Self {
        Self {
            multi_threaded: true,
            use_indirect_draw: false,
            use_command_bundles: false,
            shadow_map_size: 2048,
            shadow_radius: 100.0,
            shadow_bias: 0.005,
            light_orbit_speed: 20.0,
        }
    }
}

impl ShadowSettings {
    pub fn with_multi_threaded(mut self, multi_threaded: bool) -> Self {
        self.multi_threaded = multi_threaded;
        self
    }

    pub fn with_submission(mut self, mode: SubmissionMode) -> Self {
        let (indirect, bundle) = mode.flags();
        self.use_indirect_draw = indirect;
        self.use_command_bundles = bundle;
        self
    }

    pub fn with_shadow_map_size(mut self, size: u32) -> Self {
        self.shadow_map_size = size;
        self
    }

    pub fn with_shadow_radius(mut self, radius: f32) -> Self {
        self.shadow_radius = radius;
        self
    }

    /// The bias is clamped to [`SHADOW_BIAS_RANGE`].
    pub fn with_shadow_bias(mut self, bias: f32) -> Self {
        self.shadow_bias = bias.clamp(SHADOW_BIAS_RANGE.0, SHADOW_BIAS_RANGE.1);
        self
    }

    /// Bias as handed to shading. The field is public, so the clamp is
    /// applied again on read.
    pub fn effective_shadow_bias(&self) -> f32 {
        self.shadow_bias.clamp(SHADOW_BIAS_RANGE.0, SHADOW_BIAS_RANGE.1)
    }

    pub fn submission_mode(&self) -> SubmissionMode {
        SubmissionMode::from_flags(self.use_indirect_draw, self.use_command_bundles)
    }
}
