//! Temporal validity protocol shared by the world-probe clipmap and the
//! screen-probe pipeline: frame-level history validity, per-sample
//! disocclusion weighting, and the jitter sequence every pass must agree on.
#![forbid(unsafe_code)]

use glimmer_geom::Vec3;
use log::debug;

/// Jitter sequence period. Anchor placement and any stage reconstructing the
/// same sub-cell offset index this identically.
pub const JITTER_PERIOD: u64 = 16;

/// Sub-cell offset for `frame_index`, in `[-0.5, 0.5)` per axis. R2
/// low-discrepancy sequence; deterministic so temporal accumulation stays
/// consistent across passes within a frame.
#[inline]
pub fn jitter(frame_index: u64) -> (f32, f32) {
    // Plastic-number generalization of the golden ratio.
    const A1: f64 = 0.754_877_666_246_692_8;
    const A2: f64 = 0.569_840_290_998_053_2;
    let n = (frame_index % JITTER_PERIOD) as f64;
    let x = (0.5 + A1 * n).fract() as f32 - 0.5;
    let y = (0.5 + A2 * n).fract() as f32 - 0.5;
    (x, y)
}

#[derive(Clone, Debug)]
pub struct ValidityConfig {
    /// Camera displacement in one frame beyond which history is a teleport
    /// and is cleared wholesale.
    pub teleport_distance: f32,
    /// Screen-space motion magnitude reject threshold.
    pub velocity_reject: f32,
    /// Reprojected depth difference reject threshold.
    pub depth_reject: f32,
    /// Minimum normal similarity (dot) for full history weight.
    pub normal_reject: f32,
}

impl Default for ValidityConfig {
    fn default() -> Self {
        Self {
            teleport_distance: 50.0,
            velocity_reject: 0.08,
            depth_reject: 0.1,
            normal_reject: 0.7,
        }
    }
}

impl ValidityConfig {
    pub fn clamped(mut self) -> Self {
        if !self.teleport_distance.is_finite() {
            self.teleport_distance = 50.0;
        }
        self.teleport_distance = self.teleport_distance.clamp(1.0, 100_000.0);
        if !self.velocity_reject.is_finite() {
            self.velocity_reject = 0.08;
        }
        self.velocity_reject = self.velocity_reject.clamp(1e-4, 10.0);
        if !self.depth_reject.is_finite() {
            self.depth_reject = 0.1;
        }
        self.depth_reject = self.depth_reject.clamp(1e-4, 10.0);
        if !self.normal_reject.is_finite() {
            self.normal_reject = 0.7;
        }
        self.normal_reject = self.normal_reject.clamp(-1.0, 0.999);
        self
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InvalidationCause {
    /// History buffers were just (re)allocated or resized.
    Resize,
    /// World (re)join; nothing on screen relates to the previous history.
    Rejoin,
    /// Camera displacement exceeded the teleport threshold.
    Teleport,
}

/// Frame-level decision: when `history_valid` is false the full history
/// buffer is cleared rather than locally attenuated.
#[derive(Clone, Copy, Debug)]
pub struct FrameValidity {
    pub history_valid: bool,
    pub cause: Option<InvalidationCause>,
}

/// Inputs for one history sample's disocclusion test.
#[derive(Clone, Copy, Debug)]
pub struct DisocclusionSample {
    /// Reprojected screen-space motion magnitude.
    pub velocity: f32,
    /// Absolute depth difference between current and reprojected history.
    pub depth_delta: f32,
    /// Dot of current and history surface normals.
    pub normal_dot: f32,
}

pub struct TemporalValidity {
    cfg: ValidityConfig,
    prev_camera: Option<Vec3>,
}

impl TemporalValidity {
    pub fn new(cfg: ValidityConfig) -> Self {
        Self {
            cfg: cfg.clamped(),
            prev_camera: None,
        }
    }

    #[inline]
    pub fn config(&self) -> &ValidityConfig {
        &self.cfg
    }

    /// Decide whether any history may carry into this frame. The first frame
    /// after allocation counts as a resize.
    pub fn begin_frame(
        &mut self,
        camera_pos: Vec3,
        buffers_resized: bool,
        rejoined: bool,
    ) -> FrameValidity {
        let prev = self.prev_camera.replace(camera_pos);
        let cause = if buffers_resized || prev.is_none() {
            Some(InvalidationCause::Resize)
        } else if rejoined {
            Some(InvalidationCause::Rejoin)
        } else {
            match prev {
                Some(p) if p.distance(camera_pos) > self.cfg.teleport_distance => {
                    debug!(
                        "teleport: camera moved {:.1} (> {:.1}), clearing history",
                        p.distance(camera_pos),
                        self.cfg.teleport_distance
                    );
                    Some(InvalidationCause::Teleport)
                }
                _ => None,
            }
        };
        FrameValidity {
            history_valid: cause.is_none(),
            cause,
        }
    }

    /// Forget the previous camera; the next frame re-invalidates as a
    /// rejoin-equivalent resize.
    pub fn reset(&mut self) {
        self.prev_camera = None;
    }

    /// Per-sample temporal blend weight in `[0, 1]`. Samples failing the
    /// velocity/depth/normal tests fade toward zero rather than dropping out,
    /// to avoid visible popping.
    pub fn sample_weight(&self, s: DisocclusionSample) -> f32 {
        let v = if s.velocity <= self.cfg.velocity_reject {
            1.0
        } else {
            (self.cfg.velocity_reject / s.velocity).clamp(0.0, 1.0)
        };
        let d = if s.depth_delta <= self.cfg.depth_reject {
            1.0
        } else {
            (self.cfg.depth_reject / s.depth_delta).clamp(0.0, 1.0)
        };
        let n = if self.cfg.normal_reject >= 1.0 {
            if s.normal_dot >= 1.0 { 1.0 } else { 0.0 }
        } else {
            ((s.normal_dot - self.cfg.normal_reject) / (1.0 - self.cfg.normal_reject))
                .clamp(0.0, 1.0)
        };
        v * d * n
    }
}
