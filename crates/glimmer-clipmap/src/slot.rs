//! Per-slot lifecycle state and cached trace payload.

use crate::topology::CellIndex;

/// Lifecycle of a cached probe sample. Transitions happen only on the main
/// thread, driven by the scheduler:
/// `Uninitialized → Dirty → InFlight → {Valid | Dirty}`;
/// `Valid → Stale` on invalidation; any state → `Disabled` when the probe
/// center sits inside solid geometry; `Disabled → Dirty` only via explicit
/// re-invalidation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SlotState {
    Uninitialized,
    Dirty,
    InFlight,
    Valid,
    Stale,
    Disabled,
}

impl SlotState {
    /// Eligible for selection by the budgeted update list.
    #[inline]
    pub fn wants_refresh(self) -> bool {
        matches!(self, SlotState::Dirty | SlotState::Stale)
    }
}

/// Cached trace payload for one probe: mean hit distance, second-order SH
/// irradiance (RGB per coefficient), and sky visibility in `[0,1]`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ProbeResultData {
    pub hit_distance: f32,
    pub sh: [[f32; 3]; 9],
    pub sky_visibility: f32,
}

impl Default for ProbeResultData {
    fn default() -> Self {
        Self {
            hit_distance: 0.0,
            sh: [[0.0; 3]; 9],
            sky_visibility: 0.0,
        }
    }
}

/// One toroidally addressed storage slot. Slots are allocated once per level
/// and recentred, never reallocated.
#[derive(Clone, Debug)]
pub struct ProbeSlot {
    pub state: SlotState,
    /// World cell this storage slot currently represents.
    pub cell: CellIndex,
    pub last_update_frame: u64,
    /// Frame the slot last became refresh-eligible; oldest first wins
    /// selection ties so no slot starves.
    pub dirty_since_frame: u64,
    /// Re-invalidated while a trace was in flight; the completion is applied
    /// then immediately superseded.
    pub redirty: bool,
    pub result: Option<ProbeResultData>,
}

impl ProbeSlot {
    pub fn uninitialized() -> Self {
        Self {
            state: SlotState::Uninitialized,
            cell: CellIndex::default(),
            last_update_frame: 0,
            dirty_since_frame: 0,
            redirty: false,
            result: None,
        }
    }
}
