//! Screen-probe atlas pipeline orchestration.
//!
//! The GPU kernels themselves are opaque collaborators; this crate enforces
//! the per-frame stage contract: a fixed order, one output buffer per stage,
//! and a silent no-op (prior output persists) whenever a stage's GPU
//! resources are not yet ready. Degrading is not an error.
#![forbid(unsafe_code)]

use glimmer_temporal::{FrameValidity, jitter};
use log::{debug, trace};

/// Pipeline stages in execution order.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ScreenStage {
    /// Derive each probe's world position/normal using the shared jitter
    /// sequence.
    Anchor,
    /// Budgeted partial-coverage directional sampling into the octahedral
    /// tile; untraced texels keep their history values.
    Trace,
    /// Per-texel blend keyed primarily on hit-distance delta.
    Temporal,
    /// Edge-stopping denoise confined to each probe's own tile.
    Filter,
    /// Optional compression of the atlas into SH coefficient sets.
    ShProject,
    /// Depth/normal-weighted interpolation of neighboring probes per pixel.
    Gather,
    /// Bilateral upsample with confidence-gated hole filling.
    Upsample,
}

pub const STAGE_ORDER: [ScreenStage; 7] = [
    ScreenStage::Anchor,
    ScreenStage::Trace,
    ScreenStage::Temporal,
    ScreenStage::Filter,
    ScreenStage::ShProject,
    ScreenStage::Gather,
    ScreenStage::Upsample,
];

#[derive(Clone, Copy, Debug)]
pub struct StageRun {
    pub stage: ScreenStage,
    pub executed: bool,
}

#[derive(Clone, Debug)]
pub struct ScreenPipelineConfig {
    /// Texels in one probe's octahedral tile (e.g. 8×8 = 64).
    pub probe_tile_texels: usize,
    /// Trace budget per probe per frame; the cursor wraps across frames so
    /// full coverage accumulates temporally.
    pub texels_per_probe_per_frame: usize,
    pub sh_enabled: bool,
}

impl Default for ScreenPipelineConfig {
    fn default() -> Self {
        Self {
            probe_tile_texels: 64,
            texels_per_probe_per_frame: 16,
            sh_enabled: true,
        }
    }
}

impl ScreenPipelineConfig {
    pub fn clamped(mut self) -> Self {
        self.probe_tile_texels = self.probe_tile_texels.clamp(4, 4096);
        self.texels_per_probe_per_frame = self
            .texels_per_probe_per_frame
            .clamp(1, self.probe_tile_texels);
        self
    }
}

/// Per-frame orchestrator. Buffers and kernels are owned by the render layer;
/// this tracks readiness, stage outputs, the partial-coverage cursor, and
/// history accumulation depth.
pub struct ScreenPipeline {
    cfg: ScreenPipelineConfig,
    ready: [bool; STAGE_ORDER.len()],
    output_frame: [Option<u64>; STAGE_ORDER.len()],
    trace_cursor: usize,
    accumulated_frames: u64,
    last_jitter: (f32, f32),
}

impl ScreenPipeline {
    pub fn new(cfg: ScreenPipelineConfig) -> Self {
        Self {
            cfg: cfg.clamped(),
            ready: [false; STAGE_ORDER.len()],
            output_frame: [None; STAGE_ORDER.len()],
            trace_cursor: 0,
            accumulated_frames: 0,
            last_jitter: (0.0, 0.0),
        }
    }

    #[inline]
    fn stage_index(stage: ScreenStage) -> usize {
        STAGE_ORDER
            .iter()
            .position(|s| *s == stage)
            .unwrap_or_default()
    }

    /// Mark a stage's GPU resources (pipelines, atlas textures) ready or not.
    pub fn set_stage_ready(&mut self, stage: ScreenStage, ready: bool) {
        self.ready[Self::stage_index(stage)] = ready;
    }

    pub fn set_all_ready(&mut self, ready: bool) {
        self.ready = [ready; STAGE_ORDER.len()];
    }

    /// Frame stamp of a stage's current output buffer, if it has ever run.
    pub fn output_frame(&self, stage: ScreenStage) -> Option<u64> {
        self.output_frame[Self::stage_index(stage)]
    }

    /// Sub-texel jitter used by the Anchor stage this frame; identical to
    /// what any reconstruction pass computes for the same frame index.
    #[inline]
    pub fn anchor_jitter(&self) -> (f32, f32) {
        self.last_jitter
    }

    /// First texel of this frame's partial-coverage trace window.
    #[inline]
    pub fn trace_cursor(&self) -> usize {
        self.trace_cursor
    }

    /// Frames of history accumulated since the last full clear.
    #[inline]
    pub fn accumulated_frames(&self) -> u64 {
        self.accumulated_frames
    }

    fn clear_history(&mut self) {
        self.accumulated_frames = 0;
        self.trace_cursor = 0;
        self.output_frame = [None; STAGE_ORDER.len()];
    }

    /// Run one frame of the stage contract. Stages execute in fixed order;
    /// a stage runs iff it is enabled, its resources are ready, and its input
    /// buffer exists (the previous enabled stage has produced output at some
    /// frame, not necessarily this one).
    pub fn run_frame(&mut self, frame: u64, validity: FrameValidity) -> Vec<StageRun> {
        if !validity.history_valid {
            debug!("screen history cleared ({:?})", validity.cause);
            self.clear_history();
        }
        self.last_jitter = jitter(frame);

        let mut runs = Vec::with_capacity(STAGE_ORDER.len());
        let mut upstream_output: Option<u64> = None;
        for (i, stage) in STAGE_ORDER.iter().copied().enumerate() {
            if stage == ScreenStage::ShProject && !self.cfg.sh_enabled {
                runs.push(StageRun {
                    stage,
                    executed: false,
                });
                // Disabled stage is transparent; Gather consumes Filter.
                continue;
            }
            let has_input = stage == ScreenStage::Anchor || upstream_output.is_some();
            let executed = self.ready[i] && has_input;
            if executed {
                self.output_frame[i] = Some(frame);
                if stage == ScreenStage::Trace {
                    self.trace_cursor = (self.trace_cursor
                        + self.cfg.texels_per_probe_per_frame)
                        % self.cfg.probe_tile_texels;
                }
            } else {
                trace!("screen stage {stage:?} no-op (ready={})", self.ready[i]);
            }
            // Prior output still satisfies downstream preconditions.
            if self.output_frame[i].is_some() {
                upstream_output = self.output_frame[i];
            } else {
                upstream_output = None;
            }
            runs.push(StageRun { stage, executed });
        }

        if runs
            .iter()
            .find(|r| r.stage == ScreenStage::Temporal)
            .is_some_and(|r| r.executed)
        {
            self.accumulated_frames += 1;
        }
        runs
    }
}
