//! Per-level origins, dirty tracking, and budgeted update selection.

use glimmer_geom::{Aabb, Vec3};
use log::{debug, trace};

use crate::ClipmapConfig;
use crate::slot::{ProbeResultData, ProbeSlot, SlotState};
use crate::topology::{CellIndex, cell_center, spacing, storage_index, world_to_cell};

/// One budgeted refresh, addressed by level and world cell. The world
/// position is reconstructed from the cell via topology.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UpdateRequest {
    pub level: u32,
    pub cell: CellIndex,
}

impl UpdateRequest {
    /// Probe center in world space.
    #[inline]
    pub fn world_center(&self, base_spacing: f32) -> Vec3 {
        cell_center(self.cell, spacing(base_spacing, self.level))
    }
}

/// Emitted when a level's origin crosses a spacing-aligned boundary.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AnchorShiftEvent {
    pub level: u32,
    pub old_origin: Vec3,
    pub new_origin: Vec3,
}

/// Outcome of applying a trace completion to a slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompleteOutcome {
    /// Result recorded; slot is `Valid` (or `Stale` if re-invalidated while
    /// the trace was in flight).
    Applied,
    /// Failure or abort; slot re-marked `Dirty` for the next budget cycle.
    Requeued,
    /// The slot no longer represents this request's cell (recentred or
    /// reset); result dropped.
    Discarded,
}

/// Read-only per-slot view for diagnostic consumers. Not on the per-frame
/// hot path.
#[derive(Clone, Copy, Debug)]
pub struct SlotView {
    pub state: SlotState,
    pub cell: CellIndex,
    pub last_update_frame: u64,
    pub dirty_since_frame: u64,
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SchedulerStats {
    pub uninitialized: usize,
    pub dirty: usize,
    pub in_flight: usize,
    pub valid: usize,
    pub stale: usize,
    pub disabled: usize,
}

/// Per-frame uniform snapshot for the rendering layer.
#[derive(Clone, Debug)]
pub struct RuntimeParams {
    pub camera_pos: Vec3,
    pub levels: Vec<LevelParams>,
}

#[derive(Clone, Copy, Debug)]
pub struct LevelParams {
    pub level: u32,
    pub spacing: f32,
    pub origin: Vec3,
    pub ring_offset: [u32; 3],
}

/// One clipmap level: a fixed toroidal arena of probe slots plus its current
/// window origin in cell units.
struct ClipmapLevel {
    level: u32,
    spacing: f32,
    origin_cell: CellIndex,
    initialized: bool,
    n: i32,
    slots: Vec<ProbeSlot>,
}

impl ClipmapLevel {
    fn new(level: u32, base_spacing: f32, n: usize) -> Self {
        Self {
            level,
            spacing: spacing(base_spacing, level),
            origin_cell: CellIndex::default(),
            initialized: false,
            n: n as i32,
            slots: vec![ProbeSlot::uninitialized(); n * n * n],
        }
    }

    /// World-space min corner of the level's volume.
    #[inline]
    fn origin(&self) -> Vec3 {
        Vec3::new(
            self.origin_cell.x as f32 * self.spacing,
            self.origin_cell.y as f32 * self.spacing,
            self.origin_cell.z as f32 * self.spacing,
        )
    }

    #[inline]
    fn ring_offset(&self) -> [u32; 3] {
        [
            self.origin_cell.x.rem_euclid(self.n) as u32,
            self.origin_cell.y.rem_euclid(self.n) as u32,
            self.origin_cell.z.rem_euclid(self.n) as u32,
        ]
    }

    /// The unique cell inside the current window stored at `(sx, sy, sz)`.
    #[inline]
    fn represented_cell(&self, sx: i32, sy: i32, sz: i32) -> CellIndex {
        let o = self.origin_cell;
        CellIndex::new(
            o.x + (sx - o.x).rem_euclid(self.n),
            o.y + (sy - o.y).rem_euclid(self.n),
            o.z + (sz - o.z).rem_euclid(self.n),
        )
    }

    /// Rebind every storage slot to the cell it now represents. Slots whose
    /// cell is unchanged keep their state (toroidal reuse); newly exposed
    /// slots become `Dirty`. Returns the number exposed.
    fn rebind(&mut self, frame: u64) -> usize {
        let n = self.n;
        let mut exposed = 0usize;
        for sz in 0..n {
            for sy in 0..n {
                for sx in 0..n {
                    let cell = self.represented_cell(sx, sy, sz);
                    let idx = (sx + n * (sy + n * sz)) as usize;
                    let slot = &mut self.slots[idx];
                    if slot.state != SlotState::Uninitialized && slot.cell == cell {
                        continue;
                    }
                    slot.cell = cell;
                    slot.state = SlotState::Dirty;
                    slot.result = None;
                    slot.redirty = false;
                    slot.dirty_since_frame = frame;
                    exposed += 1;
                }
            }
        }
        exposed
    }

    #[inline]
    fn contains_cell(&self, cell: CellIndex) -> bool {
        let o = self.origin_cell;
        cell.x >= o.x
            && cell.x < o.x + self.n
            && cell.y >= o.y
            && cell.y < o.y + self.n
            && cell.z >= o.z
            && cell.z < o.z + self.n
    }
}

/// Owns slot lifecycle for every clipmap level. All mutation happens on the
/// main thread; trace workers never see this type.
pub struct ProbeScheduler {
    cfg: ClipmapConfig,
    levels: Vec<ClipmapLevel>,
    events: Vec<AnchorShiftEvent>,
    camera_pos: Vec3,
}

impl ProbeScheduler {
    pub fn new(cfg: ClipmapConfig) -> Self {
        let cfg = cfg.clamped();
        let levels = (0..cfg.level_count as u32)
            .map(|l| ClipmapLevel::new(l, cfg.base_spacing, cfg.resolution))
            .collect();
        Self {
            cfg,
            levels,
            events: Vec::new(),
            camera_pos: Vec3::ZERO,
        }
    }

    #[inline]
    pub fn config(&self) -> &ClipmapConfig {
        &self.cfg
    }

    /// Recenter each level so the camera sits in the window's center cell.
    /// Origins snap to the cell grid, so a level shifts only when the camera
    /// crosses a spacing-aligned boundary, never by per-frame drift. Each
    /// shift emits an [`AnchorShiftEvent`] and dirties only the newly exposed
    /// slab.
    pub fn update_origins(&mut self, camera_pos: Vec3, frame: u64) {
        self.camera_pos = camera_pos;
        let half = (self.cfg.resolution / 2) as i32;
        for level in &mut self.levels {
            let cam_cell = world_to_cell(camera_pos, level.spacing);
            let desired = cam_cell.offset(-half, -half, -half);
            if !level.initialized {
                level.origin_cell = desired;
                level.initialized = true;
                let exposed = level.rebind(frame);
                debug!(
                    "clipmap L{}: initial bind at {:?}, {} slots dirty",
                    level.level, desired, exposed
                );
                continue;
            }
            if desired == level.origin_cell {
                continue;
            }
            let old_origin = level.origin();
            level.origin_cell = desired;
            let new_origin = level.origin();
            let exposed = level.rebind(frame);
            trace!(
                "clipmap L{}: anchor shift {:?} -> {:?}, {} slots exposed",
                level.level, old_origin, new_origin, exposed
            );
            self.events.push(AnchorShiftEvent {
                level: level.level,
                old_origin,
                new_origin,
            });
        }
    }

    /// External invalidation hook (chunk load, block edit). Every slot whose
    /// cell overlaps the AABB becomes refresh-eligible again: `Valid` slots
    /// turn `Stale` (old data stays usable until the refresh lands),
    /// `Disabled` and `Uninitialized` slots turn `Dirty` so geometry changes
    /// can re-enable a probe, and in-flight slots are flagged so their
    /// completion is immediately superseded. A region containing no probes is
    /// a no-op.
    pub fn mark_dirty_world_aabb(&mut self, aabb: Aabb, frame: u64) {
        for level in &mut self.levels {
            if !level.initialized {
                continue;
            }
            let lo = world_to_cell(aabb.min, level.spacing);
            let hi = world_to_cell(aabb.max, level.spacing);
            let o = level.origin_cell;
            let n = level.n;
            let x0 = lo.x.max(o.x);
            let x1 = hi.x.min(o.x + n - 1);
            let y0 = lo.y.max(o.y);
            let y1 = hi.y.min(o.y + n - 1);
            let z0 = lo.z.max(o.z);
            let z1 = hi.z.min(o.z + n - 1);
            for cz in z0..=z1 {
                for cy in y0..=y1 {
                    for cx in x0..=x1 {
                        let cell = CellIndex::new(cx, cy, cz);
                        let idx = storage_index(cell, n);
                        let slot = &mut level.slots[idx];
                        match slot.state {
                            SlotState::Valid => {
                                slot.state = SlotState::Stale;
                                slot.dirty_since_frame = frame;
                            }
                            SlotState::InFlight => slot.redirty = true,
                            SlotState::Dirty | SlotState::Stale => {}
                            SlotState::Uninitialized | SlotState::Disabled => {
                                slot.state = SlotState::Dirty;
                                slot.result = None;
                                slot.dirty_since_frame = frame;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Select this frame's refresh set from `Dirty`/`Stale` slots, respecting
    /// in order the per-level caps, the global cap, and the estimated upload
    /// byte budget. Finer levels win, then oldest dirty stamp (starvation
    /// avoidance). Selected slots transition to `InFlight`.
    pub fn build_update_list(&mut self, _frame: u64) -> Vec<UpdateRequest> {
        let tile = self.cfg.bytes_per_probe_tile;
        let mut est_bytes = 0usize;
        let mut out = Vec::new();
        'levels: for (li, level) in self.levels.iter_mut().enumerate() {
            let budget = self.cfg.per_level_budgets[li];
            if budget == 0 || !level.initialized {
                continue;
            }
            let mut cand: Vec<(u64, usize)> = level
                .slots
                .iter()
                .enumerate()
                .filter(|(_, s)| s.state.wants_refresh())
                .map(|(i, s)| (s.dirty_since_frame, i))
                .collect();
            cand.sort_unstable();
            for (_, idx) in cand.into_iter().take(budget) {
                if out.len() >= self.cfg.global_max_updates {
                    break 'levels;
                }
                if est_bytes + tile > self.cfg.upload_byte_budget {
                    break 'levels;
                }
                let slot = &mut level.slots[idx];
                slot.state = SlotState::InFlight;
                est_bytes += tile;
                out.push(UpdateRequest {
                    level: level.level,
                    cell: slot.cell,
                });
            }
        }
        out
    }

    /// Apply a trace completion. `None` means failure or abort; the slot goes
    /// back to `Dirty` and the per-frame budget cycle is the retry mechanism.
    pub fn complete(
        &mut self,
        req: UpdateRequest,
        frame: u64,
        data: Option<ProbeResultData>,
    ) -> CompleteOutcome {
        let Some(level) = self.levels.get_mut(req.level as usize) else {
            return CompleteOutcome::Discarded;
        };
        let idx = storage_index(req.cell, level.n);
        let slot = &mut level.slots[idx];
        if slot.state != SlotState::InFlight || slot.cell != req.cell {
            return CompleteOutcome::Discarded;
        }
        let redirty = std::mem::take(&mut slot.redirty);
        match data {
            Some(d) => {
                slot.result = Some(d);
                slot.last_update_frame = frame;
                if redirty {
                    slot.state = SlotState::Stale;
                    slot.dirty_since_frame = frame;
                } else {
                    slot.state = SlotState::Valid;
                }
                CompleteOutcome::Applied
            }
            None => {
                slot.state = SlotState::Dirty;
                slot.dirty_since_frame = frame;
                CompleteOutcome::Requeued
            }
        }
    }

    /// The probe center resolved inside solid collidable geometry; stop
    /// spending trace budget on it until an explicit re-invalidation.
    pub fn disable(&mut self, req: UpdateRequest) {
        let Some(level) = self.levels.get_mut(req.level as usize) else {
            return;
        };
        let idx = storage_index(req.cell, level.n);
        let slot = &mut level.slots[idx];
        if slot.cell == req.cell {
            slot.state = SlotState::Disabled;
            slot.result = None;
            slot.redirty = false;
        }
    }

    /// World-leave: every slot returns to `Uninitialized` and pending anchor
    /// events are dropped. The next `update_origins` rebinds without emitting
    /// shift events.
    pub fn reset_all(&mut self) {
        for level in &mut self.levels {
            level.initialized = false;
            for slot in &mut level.slots {
                *slot = ProbeSlot::uninitialized();
            }
        }
        self.events.clear();
    }

    /// Drain the anchor-shift events emitted since the last call.
    pub fn drain_anchor_events(&mut self) -> Vec<AnchorShiftEvent> {
        std::mem::take(&mut self.events)
    }

    /// Read-only snapshot for the rendering layer's per-frame uniforms.
    pub fn params_snapshot(&self) -> RuntimeParams {
        RuntimeParams {
            camera_pos: self.camera_pos,
            levels: self
                .levels
                .iter()
                .map(|l| LevelParams {
                    level: l.level,
                    spacing: l.spacing,
                    origin: l.origin(),
                    ring_offset: l.ring_offset(),
                })
                .collect(),
        }
    }

    /// Opt-in lifecycle introspection by storage coordinate.
    pub fn slot_view(&self, level: u32, sx: usize, sy: usize, sz: usize) -> Option<SlotView> {
        let level = self.levels.get(level as usize)?;
        let n = level.n as usize;
        if sx >= n || sy >= n || sz >= n {
            return None;
        }
        let slot = &level.slots[sx + n * (sy + n * sz)];
        Some(SlotView {
            state: slot.state,
            cell: slot.cell,
            last_update_frame: slot.last_update_frame,
            dirty_since_frame: slot.dirty_since_frame,
        })
    }

    /// Cached payload for a cell if its slot is `Valid` or `Stale`.
    pub fn cached_result(&self, level: u32, cell: CellIndex) -> Option<&ProbeResultData> {
        let level = self.levels.get(level as usize)?;
        if !level.contains_cell(cell) {
            return None;
        }
        let slot = &level.slots[storage_index(cell, level.n)];
        if slot.cell == cell { slot.result.as_ref() } else { None }
    }

    /// State counts across all levels, for diagnostics and heatmaps.
    pub fn stats(&self) -> SchedulerStats {
        let mut s = SchedulerStats::default();
        for level in &self.levels {
            for slot in &level.slots {
                match slot.state {
                    SlotState::Uninitialized => s.uninitialized += 1,
                    SlotState::Dirty => s.dirty += 1,
                    SlotState::InFlight => s.in_flight += 1,
                    SlotState::Valid => s.valid += 1,
                    SlotState::Stale => s.stale += 1,
                    SlotState::Disabled => s.disabled += 1,
                }
            }
        }
        s
    }
}
