//! Bounded asynchronous probe-trace pipeline.
//!
//! The main thread enqueues [`TraceWorkItem`]s and drains [`TraceResult`]s
//! once per frame; worker threads only read world geometry through
//! [`SceneQuery`]. Submission order does not imply completion order and no
//! per-request latency is guaranteed, only the submission and drain rates.
#![forbid(unsafe_code)]

mod sampling;

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::thread;

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use glimmer_clipmap::{ProbeResultData, UpdateRequest};
use glimmer_geom::Vec3;
use glimmer_scene::SceneQuery;
use log::debug;
use rayon::{ThreadPool, ThreadPoolBuilder};

pub use sampling::{ProbeSample, fibonacci_dir, sample_probe};

/// Unit of work crossing the thread boundary. Plain value data only; no GPU
/// handles or scheduler state.
#[derive(Clone, Copy, Debug)]
pub struct TraceWorkItem {
    pub frame_index: u64,
    pub epoch: u64,
    pub request: UpdateRequest,
    pub origin: Vec3,
    pub max_distance: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TraceStatus {
    Ok,
    /// Nearly every direction hit geometry at point-blank range; the probe
    /// center is likely inside solid matter.
    Occluded,
    Aborted,
}

#[derive(Clone, Copy, Debug)]
pub struct TraceResult {
    pub request: UpdateRequest,
    pub frame_index: u64,
    pub epoch: u64,
    pub status: TraceStatus,
    pub data: Option<ProbeResultData>,
}

#[derive(Clone, Debug)]
pub struct TraceConfig {
    /// Work-queue capacity; `try_enqueue` refuses beyond this (backpressure).
    pub max_queued_work_items: usize,
    /// 0 resolves to the machine's available parallelism.
    pub worker_threads: usize,
    pub directions_per_probe: usize,
    /// Hits closer than this count toward the occlusion classification.
    pub occlusion_distance: f32,
    /// Fraction of near hits above which a result is `Occluded`.
    pub occlusion_fraction: f32,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            max_queued_work_items: 2048,
            worker_threads: 0,
            directions_per_probe: 64,
            occlusion_distance: 1.0,
            occlusion_fraction: 0.95,
        }
    }
}

impl TraceConfig {
    pub fn clamped(mut self) -> Self {
        self.max_queued_work_items = self.max_queued_work_items.clamp(1, 1 << 20);
        self.worker_threads = self.worker_threads.min(64);
        self.directions_per_probe = self.directions_per_probe.clamp(4, 4096);
        if !self.occlusion_distance.is_finite() {
            self.occlusion_distance = 1.0;
        }
        self.occlusion_distance = self.occlusion_distance.clamp(0.01, 64.0);
        if !self.occlusion_fraction.is_finite() {
            self.occlusion_fraction = 0.95;
        }
        self.occlusion_fraction = self.occlusion_fraction.clamp(0.5, 1.0);
        self
    }
}

/// Producer/consumer trace service. Dropping the service closes the work
/// channel and the worker pool winds down.
pub struct TraceService {
    job_tx: Sender<TraceWorkItem>,
    job_rx: Receiver<TraceWorkItem>,
    res_rx: Receiver<TraceResult>,
    _pool: Option<Arc<ThreadPool>>,
    queued: Arc<AtomicUsize>,
    inflight: Arc<AtomicUsize>,
    epoch: Arc<AtomicU64>,
    pub workers: usize,
}

impl TraceService {
    pub fn new(scene: Arc<dyn SceneQuery>, cfg: TraceConfig) -> Self {
        let cfg = cfg.clamped();
        let workers = if cfg.worker_threads > 0 {
            cfg.worker_threads
        } else {
            thread::available_parallelism()
                .map(|n| n.get().saturating_sub(1).max(1))
                .unwrap_or(2)
        };
        Self::with_workers(scene, cfg, workers)
    }

    /// Explicit worker count; `0` builds a pump-less service whose queue is
    /// drained only by `abort_all` (used by scheduling tests).
    pub fn with_workers(scene: Arc<dyn SceneQuery>, cfg: TraceConfig, workers: usize) -> Self {
        let cfg = cfg.clamped();
        let (job_tx, job_rx) = bounded::<TraceWorkItem>(cfg.max_queued_work_items);
        let (res_tx, res_rx) = bounded::<TraceResult>(cfg.max_queued_work_items * 2);
        let queued = Arc::new(AtomicUsize::new(0));
        let inflight = Arc::new(AtomicUsize::new(0));
        let epoch = Arc::new(AtomicU64::new(0));

        let pool = if workers > 0 {
            let pool = Arc::new(
                ThreadPoolBuilder::new()
                    .num_threads(workers)
                    .thread_name(|i| format!("glimmer-trace-{i}"))
                    .build()
                    .expect("trace pool"),
            );
            for _ in 0..workers {
                let rx = job_rx.clone();
                let tx = res_tx.clone();
                let scene = scene.clone();
                let cfg = cfg.clone();
                let queued = queued.clone();
                let inflight = inflight.clone();
                let epoch = epoch.clone();
                pool.spawn(move || {
                    while let Ok(item) = rx.recv() {
                        queued.fetch_sub(1, Ordering::Relaxed);
                        inflight.fetch_add(1, Ordering::Relaxed);
                        let res = process_item(item, scene.as_ref(), &cfg, &epoch);
                        inflight.fetch_sub(1, Ordering::Relaxed);
                        let _ = tx.send(res);
                    }
                });
            }
            Some(pool)
        } else {
            None
        };

        Self {
            job_tx,
            job_rx,
            res_rx,
            _pool: pool,
            queued,
            inflight,
            epoch,
            workers,
        }
    }

    /// Non-blocking submit. Returns `false` when the work queue is at
    /// capacity; the caller re-marks the slot dirty and retries on a later
    /// frame.
    pub fn try_enqueue(&self, mut item: TraceWorkItem) -> bool {
        item.epoch = self.epoch.load(Ordering::Acquire);
        match self.job_tx.try_send(item) {
            Ok(()) => {
                self.queued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => false,
        }
    }

    /// Drain completed results; called once per frame on the main thread.
    /// Results from an aborted epoch are re-tagged `Aborted` so the scheduler
    /// treats them as failures.
    pub fn drain_results(&self) -> Vec<TraceResult> {
        let current = self.epoch.load(Ordering::Acquire);
        self.res_rx
            .try_iter()
            .map(|mut r| {
                if r.epoch != current {
                    r.status = TraceStatus::Aborted;
                    r.data = None;
                }
                r
            })
            .collect()
    }

    /// World-leave/shutdown: bump the epoch so in-flight work lands as
    /// `Aborted`, then drain everything still queued. Returns the number of
    /// queued items dropped.
    pub fn abort_all(&self) -> usize {
        self.epoch.fetch_add(1, Ordering::AcqRel);
        let mut dropped = 0usize;
        while let Ok(_item) = self.job_rx.try_recv() {
            self.queued.fetch_sub(1, Ordering::Relaxed);
            dropped += 1;
        }
        // Discard any results already produced for the old epoch.
        let stale = self.res_rx.try_iter().count();
        debug!("trace abort: dropped {dropped} queued, {stale} stale results");
        dropped
    }

    #[inline]
    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// `(queued, in_flight)` depth counters for diagnostics.
    pub fn queue_debug_counts(&self) -> (usize, usize) {
        (
            self.queued.load(Ordering::Relaxed),
            self.inflight.load(Ordering::Relaxed),
        )
    }
}

fn process_item(
    item: TraceWorkItem,
    scene: &dyn SceneQuery,
    cfg: &TraceConfig,
    epoch: &AtomicU64,
) -> TraceResult {
    if item.epoch != epoch.load(Ordering::Acquire) {
        return TraceResult {
            request: item.request,
            frame_index: item.frame_index,
            epoch: item.epoch,
            status: TraceStatus::Aborted,
            data: None,
        };
    }
    let sample = sample_probe(
        scene,
        item.origin,
        item.max_distance,
        cfg.directions_per_probe,
        cfg.occlusion_distance,
    );
    if sample.near_occluded_fraction >= cfg.occlusion_fraction {
        TraceResult {
            request: item.request,
            frame_index: item.frame_index,
            epoch: item.epoch,
            status: TraceStatus::Occluded,
            data: None,
        }
    } else {
        TraceResult {
            request: item.request,
            frame_index: item.frame_index,
            epoch: item.epoch,
            status: TraceStatus::Ok,
            data: Some(sample.data),
        }
    }
}
