//! World-probe clipmap: topology, slot lifecycle, and budgeted scheduling.
#![forbid(unsafe_code)]

mod scheduler;
mod slot;
mod topology;

#[cfg(test)]
mod tests;

pub use scheduler::{
    AnchorShiftEvent, CompleteOutcome, LevelParams, ProbeScheduler, RuntimeParams, SchedulerStats,
    SlotView, UpdateRequest,
};
pub use slot::{ProbeResultData, ProbeSlot, SlotState};
pub use topology::{CellIndex, cell_center, spacing, storage_coord, storage_index, world_to_cell};

/// Scheduling configuration. All fields are clamped to safe bounds via
/// [`ClipmapConfig::clamped`]; out-of-range values are adjusted, never
/// rejected.
#[derive(Clone, Debug)]
pub struct ClipmapConfig {
    /// Cell spacing of level 0 in world units; level L uses `base_spacing * 2^L`.
    pub base_spacing: f32,
    /// Cells per axis, shared by every level.
    pub resolution: usize,
    pub level_count: usize,
    /// Per-frame refresh cap per level; padded with its last entry when
    /// shorter than `level_count`.
    pub per_level_budgets: Vec<usize>,
    /// Per-frame refresh cap across all levels.
    pub global_max_updates: usize,
    pub upload_byte_budget: usize,
    /// Estimated atlas bytes written per refreshed probe.
    pub bytes_per_probe_tile: usize,
    pub max_ray_distance: f32,
}

impl Default for ClipmapConfig {
    fn default() -> Self {
        Self {
            base_spacing: 2.0,
            resolution: 32,
            level_count: 4,
            per_level_budgets: vec![64, 48, 32, 16],
            global_max_updates: 128,
            upload_byte_budget: 64 * 1024,
            bytes_per_probe_tile: 128,
            max_ray_distance: 512.0,
        }
    }
}

impl ClipmapConfig {
    pub fn clamped(mut self) -> Self {
        if !self.base_spacing.is_finite() {
            self.base_spacing = 2.0;
        }
        self.base_spacing = self.base_spacing.clamp(0.25, 1024.0);
        self.resolution = self.resolution.clamp(4, 128);
        self.level_count = self.level_count.clamp(1, 10);
        let pad = self.per_level_budgets.last().copied().unwrap_or(16);
        self.per_level_budgets.resize(self.level_count, pad);
        let cells = self.resolution * self.resolution * self.resolution * self.level_count;
        self.global_max_updates = self.global_max_updates.min(cells);
        self.bytes_per_probe_tile = self.bytes_per_probe_tile.clamp(16, 64 * 1024);
        if !self.max_ray_distance.is_finite() {
            self.max_ray_distance = 512.0;
        }
        self.max_ray_distance = self.max_ray_distance.clamp(8.0, 16384.0);
        self
    }
}
