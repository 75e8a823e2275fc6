use glimmer_geom::{Aabb, Vec3};
use proptest::prelude::*;

use crate::slot::{ProbeResultData, SlotState};
use crate::topology::{CellIndex, cell_center, spacing, storage_coord, world_to_cell};
use crate::{ClipmapConfig, CompleteOutcome, ProbeScheduler};

fn small_cfg() -> ClipmapConfig {
    ClipmapConfig {
        base_spacing: 2.0,
        resolution: 8,
        level_count: 1,
        per_level_budgets: vec![512],
        global_max_updates: 512,
        upload_byte_budget: 512 * 128,
        bytes_per_probe_tile: 128,
        max_ray_distance: 256.0,
    }
}

fn refresh_everything(sched: &mut ProbeScheduler, frame: u64) {
    loop {
        let list = sched.build_update_list(frame);
        if list.is_empty() {
            break;
        }
        for req in list {
            sched.complete(req, frame, Some(ProbeResultData::default()));
        }
    }
}

proptest! {
    #[test]
    fn topology_round_trip(
        x in -100_000i32..100_000,
        y in -100_000i32..100_000,
        z in -100_000i32..100_000,
        level in 0u32..8,
    ) {
        let s = spacing(0.5, level);
        let cell = CellIndex::new(x, y, z);
        let back = world_to_cell(cell_center(cell, s), s);
        prop_assert_eq!(back, cell);
    }

    #[test]
    fn storage_coord_wraps_and_stays_non_negative(
        x in -10_000i32..10_000,
        y in -10_000i32..10_000,
        z in -10_000i32..10_000,
        n in 4i32..64,
    ) {
        let cell = CellIndex::new(x, y, z);
        let (sx, sy, sz) = storage_coord(cell, n);
        prop_assert!(sx < n as usize && sy < n as usize && sz < n as usize);
        let shifted = CellIndex::new(x + n, y - n, z + 2 * n);
        prop_assert_eq!(storage_coord(shifted, n), (sx, sy, sz));
    }
}

#[test]
fn config_clamps_instead_of_rejecting() {
    let cfg = ClipmapConfig {
        base_spacing: f32::NAN,
        resolution: 100_000,
        level_count: 0,
        per_level_budgets: vec![],
        global_max_updates: usize::MAX,
        upload_byte_budget: usize::MAX,
        bytes_per_probe_tile: 1,
        max_ray_distance: -5.0,
    }
    .clamped();
    assert!(cfg.base_spacing.is_finite());
    assert!(cfg.resolution <= 128);
    assert_eq!(cfg.level_count, 1);
    assert_eq!(cfg.per_level_budgets.len(), cfg.level_count);
    assert!(cfg.bytes_per_probe_tile >= 16);
    assert!(cfg.max_ray_distance >= 8.0);
}

#[test]
fn initial_bind_dirties_every_slot_without_events() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    let stats = sched.stats();
    assert_eq!(stats.dirty, 512);
    assert_eq!(stats.uninitialized, 0);
    assert!(sched.drain_anchor_events().is_empty());
}

#[test]
fn update_list_respects_per_level_global_and_byte_caps() {
    let mut cfg = small_cfg();
    cfg.level_count = 2;
    cfg.per_level_budgets = vec![10, 10];
    cfg.global_max_updates = 14;
    let mut sched = ProbeScheduler::new(cfg);
    sched.update_origins(Vec3::ZERO, 0);
    let list = sched.build_update_list(0);
    assert_eq!(list.len(), 14);
    // Finer level first.
    assert!(list[..10].iter().all(|r| r.level == 0));
    assert!(list[10..].iter().all(|r| r.level == 1));

    let mut cfg = small_cfg();
    cfg.upload_byte_budget = 3 * cfg.bytes_per_probe_tile;
    let mut sched = ProbeScheduler::new(cfg);
    sched.update_origins(Vec3::ZERO, 0);
    assert_eq!(sched.build_update_list(0).len(), 3);
}

#[test]
fn at_most_one_in_flight_trace_per_slot() {
    let mut cfg = small_cfg();
    cfg.per_level_budgets = vec![16];
    cfg.global_max_updates = 16;
    let mut sched = ProbeScheduler::new(cfg);
    sched.update_origins(Vec3::ZERO, 0);
    let first = sched.build_update_list(0);
    let second = sched.build_update_list(0);
    assert_eq!(first.len(), 16);
    assert_eq!(second.len(), 16);
    for req in &second {
        assert!(!first.contains(req));
    }
    assert_eq!(sched.stats().in_flight, 32);
}

#[test]
fn one_cell_camera_step_emits_one_event_and_dirties_one_slab() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    refresh_everything(&mut sched, 0);
    assert_eq!(sched.stats().valid, 512);

    // Exactly one level-0 spacing along +X.
    sched.update_origins(Vec3::new(2.0, 0.0, 0.0), 1);
    let events = sched.drain_anchor_events();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].level, 0);
    assert_eq!(events[0].new_origin.x - events[0].old_origin.x, 2.0);

    let stats = sched.stats();
    assert_eq!(stats.dirty, 64);
    assert_eq!(stats.valid, 512 - 64);

    // The dirty set is precisely the newly exposed max-X slab.
    let params = sched.params_snapshot();
    let origin_cell_x = (params.levels[0].origin.x / 2.0).round() as i32;
    for sx in 0..8 {
        for sy in 0..8 {
            for sz in 0..8 {
                let view = sched.slot_view(0, sx, sy, sz).unwrap();
                if view.state == SlotState::Dirty {
                    assert_eq!(view.cell.x, origin_cell_x + 7);
                } else {
                    assert_eq!(view.state, SlotState::Valid);
                }
            }
        }
    }
}

#[test]
fn repeated_update_origins_without_motion_is_stable() {
    let mut sched = ProbeScheduler::new(small_cfg());
    let cam = Vec3::new(3.1, 0.7, -4.2);
    sched.update_origins(cam, 0);
    refresh_everything(&mut sched, 0);
    for frame in 1..10 {
        sched.update_origins(cam, frame);
    }
    assert!(sched.drain_anchor_events().is_empty());
    assert_eq!(sched.stats().valid, 512);
}

#[test]
fn mark_dirty_on_probe_free_region_is_a_no_op() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    refresh_everything(&mut sched, 0);
    let far = Aabb::new(Vec3::splat(10_000.0), Vec3::splat(10_001.0));
    sched.mark_dirty_world_aabb(far, 1);
    assert_eq!(sched.stats().valid, 512);
}

#[test]
fn mark_dirty_invalidates_overlapping_valid_slots() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    refresh_everything(&mut sched, 0);
    // One cell around the origin.
    let region = Aabb::new(Vec3::splat(-0.5), Vec3::splat(0.5));
    sched.mark_dirty_world_aabb(region, 1);
    let stats = sched.stats();
    assert!(stats.stale > 0);
    assert_eq!(stats.stale + stats.valid, 512);
}

#[test]
fn failure_requeues_and_stale_epoch_result_is_discarded() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    let req = sched.build_update_list(0)[0];
    assert_eq!(sched.complete(req, 1, None), CompleteOutcome::Requeued);
    let view = {
        let (sx, sy, sz) = storage_coord(req.cell, 8);
        sched.slot_view(0, sx, sy, sz).unwrap()
    };
    assert_eq!(view.state, SlotState::Dirty);
    assert_eq!(view.dirty_since_frame, 1);

    // Completing a request that is no longer in flight is dropped.
    assert_eq!(
        sched.complete(req, 2, Some(ProbeResultData::default())),
        CompleteOutcome::Discarded
    );
}

#[test]
fn disable_removes_slot_from_selection_until_reinvalidated() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    let list = sched.build_update_list(0);
    let req = list[0];
    sched.disable(req);
    for other in list.into_iter().skip(1) {
        sched.complete(other, 0, Some(ProbeResultData::default()));
    }
    refresh_everything(&mut sched, 0);
    let stats = sched.stats();
    assert_eq!(stats.disabled, 1);
    assert_eq!(stats.valid, 511);

    // Explicit re-invalidation re-enables the probe.
    let center = req.world_center(2.0);
    sched.mark_dirty_world_aabb(Aabb::new(center, center), 1);
    assert_eq!(sched.stats().disabled, 0);
    assert_eq!(sched.stats().dirty, 1);
}

#[test]
fn redirty_during_flight_lands_result_as_stale() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    let req = sched.build_update_list(0)[0];
    let center = req.world_center(2.0);
    sched.mark_dirty_world_aabb(Aabb::new(center, center), 1);
    assert_eq!(
        sched.complete(req, 2, Some(ProbeResultData::default())),
        CompleteOutcome::Applied
    );
    let (sx, sy, sz) = storage_coord(req.cell, 8);
    let view = sched.slot_view(0, sx, sy, sz).unwrap();
    assert_eq!(view.state, SlotState::Stale);
}

#[test]
fn reset_all_returns_every_slot_to_uninitialized() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    let pending = sched.build_update_list(0);
    sched.reset_all();
    let stats = sched.stats();
    assert_eq!(stats.uninitialized, 512);
    // Late completions for the old epoch are discarded, not applied.
    for req in pending {
        assert_eq!(
            sched.complete(req, 1, Some(ProbeResultData::default())),
            CompleteOutcome::Discarded
        );
    }
    assert_eq!(sched.stats().valid, 0);
}

#[test]
fn cached_result_serves_valid_and_stale_cells_only() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::ZERO, 0);
    let req = sched.build_update_list(0)[0];
    assert!(sched.cached_result(0, req.cell).is_none());
    sched.complete(req, 0, Some(ProbeResultData::default()));
    assert!(sched.cached_result(0, req.cell).is_some());

    // Stale keeps serving the old payload until the refresh lands.
    let center = req.world_center(2.0);
    sched.mark_dirty_world_aabb(Aabb::new(center, center), 1);
    assert!(sched.cached_result(0, req.cell).is_some());

    // Outside the window there is no probe to serve.
    assert!(sched.cached_result(0, CellIndex::new(10_000, 0, 0)).is_none());
}

#[test]
fn params_snapshot_reports_origins_and_ring_offsets() {
    let mut sched = ProbeScheduler::new(small_cfg());
    sched.update_origins(Vec3::new(17.0, 3.0, -9.0), 0);
    let params = sched.params_snapshot();
    assert_eq!(params.levels.len(), 1);
    let lp = params.levels[0];
    assert_eq!(lp.spacing, 2.0);
    assert!(lp.ring_offset.iter().all(|r| *r < 8));
    // Camera sits inside the level volume.
    assert!(params.camera_pos.x >= lp.origin.x);
    assert!(params.camera_pos.x < lp.origin.x + 8.0 * lp.spacing);
}
