//! GPU-resident probe atlas staging and the per-frame byte-budgeted uploader.
//!
//! The atlas is owned by the main thread; trace results land here only after
//! the scheduler accepts them. Upload is rate-limited by bytes per frame, and
//! results that miss the budget stay queued for the next frame. They are
//! complete data pending a write, never re-traced.
#![forbid(unsafe_code)]

use std::collections::VecDeque;

use glimmer_clipmap::{ProbeResultData, UpdateRequest, storage_index};
use log::{debug, warn};

/// Stride of one probe tile in the atlas: 9 SH coefficients × RGB × f32,
/// plus hit distance and sky visibility, rounded up to a texel row.
pub const BYTES_PER_PROBE_TILE: usize = 128;

#[derive(Clone, Copy, Debug)]
pub struct ProbeTexel {
    pub sh: [[f32; 3]; 9],
    pub hit_distance: f32,
    pub sky_visibility: f32,
    pub last_write_frame: u64,
}

/// Toroidally addressed atlas storage, one layer per clipmap level. A level's
/// texel for a world cell never moves; recentring only changes which cell a
/// texel represents.
pub struct ProbeAtlas {
    n: i32,
    levels: Vec<Vec<Option<ProbeTexel>>>,
    ready: bool,
}

impl ProbeAtlas {
    pub fn new(resolution: usize, level_count: usize) -> Self {
        let cells = resolution * resolution * resolution;
        Self {
            n: resolution as i32,
            levels: vec![vec![None; cells]; level_count],
            ready: true,
        }
    }

    /// Models GPU resource readiness. While false the uploader no-ops and the
    /// world-probe contribution is skipped for the frame.
    #[inline]
    pub fn set_ready(&mut self, ready: bool) {
        self.ready = ready;
    }

    #[inline]
    pub fn is_ready(&self) -> bool {
        self.ready
    }

    pub fn texel(&self, req: UpdateRequest) -> Option<&ProbeTexel> {
        let level = self.levels.get(req.level as usize)?;
        level[storage_index(req.cell, self.n)].as_ref()
    }

    pub fn clear(&mut self) {
        for level in &mut self.levels {
            level.fill(None);
        }
    }

    fn write(&mut self, req: UpdateRequest, data: &ProbeResultData, frame: u64) -> bool {
        let n = self.n;
        let Some(level) = self.levels.get_mut(req.level as usize) else {
            warn!("upload for unknown level {}", req.level);
            return false;
        };
        level[storage_index(req.cell, n)] = Some(ProbeTexel {
            sh: data.sh,
            hit_distance: data.hit_distance,
            sky_visibility: data.sky_visibility,
            last_write_frame: frame,
        });
        true
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct UploadStats {
    pub uploaded: usize,
    pub bytes_written: usize,
    pub deferred: usize,
}

struct PendingUpload {
    request: UpdateRequest,
    data: ProbeResultData,
}

/// Drains accepted trace results into the atlas within a per-frame byte
/// budget.
#[derive(Default)]
pub struct Uploader {
    pending: VecDeque<PendingUpload>,
}

impl Uploader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue(&mut self, request: UpdateRequest, data: ProbeResultData) {
        self.pending.push_back(PendingUpload { request, data });
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Write pending results until the byte budget would be exceeded.
    /// Returns how many were uploaded; the remainder carries over.
    pub fn flush(&mut self, atlas: &mut ProbeAtlas, byte_budget: usize, frame: u64) -> UploadStats {
        let mut stats = UploadStats::default();
        if !atlas.is_ready() {
            stats.deferred = self.pending.len();
            debug!("atlas not ready; deferring {} uploads", stats.deferred);
            return stats;
        }
        while stats.bytes_written + BYTES_PER_PROBE_TILE <= byte_budget {
            let Some(item) = self.pending.pop_front() else {
                break;
            };
            if atlas.write(item.request, &item.data, frame) {
                stats.uploaded += 1;
                stats.bytes_written += BYTES_PER_PROBE_TILE;
            }
        }
        stats.deferred = self.pending.len();
        stats
    }

    pub fn clear(&mut self) {
        self.pending.clear();
    }
}
