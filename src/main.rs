//! Headless driver: walks a camera through a procedural voxel scene and runs
//! the probe pipeline for a fixed number of frames.

mod app;
mod config;

use std::error::Error;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use glimmer_geom::Vec3;
use glimmer_scene::HeightfieldScene;
use log::info;

use crate::app::App;
use crate::config::{Config, load_config};

#[derive(Parser, Debug)]
#[command(name = "glimmer", about = "world-probe clipmap driver")]
struct Args {
    /// Path to a TOML config; defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Frames to simulate.
    #[arg(long, default_value_t = 600)]
    frames: u64,

    /// Camera speed in world units per frame.
    #[arg(long, default_value_t = 0.5)]
    camera_speed: f32,

    /// Frame at which to jump the camera far enough to trip the teleport
    /// threshold (exercises the history-clear path).
    #[arg(long)]
    teleport_at: Option<u64>,

    /// Frame at which to leave and rejoin the world (exercises abort/reset).
    #[arg(long)]
    rejoin_at: Option<u64>,
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let cfg = match &args.config {
        Some(path) => load_config(path)?,
        None => Config::default(),
    };

    let scene = Arc::new(HeightfieldScene::new(cfg.scene.clone()));
    let start_y = scene.height_at(0.0, 0.0) + 12.0;
    let mut app = App::new(&cfg, scene);

    let mut camera = Vec3::new(0.0, start_y, 0.0);
    info!("starting {} frames from {:?}", args.frames, camera);

    let mut totals = (0usize, 0usize, 0usize);
    for frame in 0..args.frames {
        if args.rejoin_at == Some(frame) {
            app.leave_world();
        }
        if args.teleport_at == Some(frame) {
            camera.x += cfg.temporal.teleport_distance * 2.0;
        }
        camera.x += args.camera_speed;
        camera.z += args.camera_speed * 0.35;

        let report = app.step(camera);
        totals.0 += report.enqueued;
        totals.1 += report.applied;
        totals.2 += report.uploaded;
    }

    let stats = app.scheduler_stats();
    info!(
        "done: {} traced, {} applied, {} uploaded; slots valid={} dirty={} disabled={}",
        totals.0, totals.1, totals.2, stats.valid, stats.dirty, stats.disabled
    );
    for (level, shifts) in app.anchor_shift_counts() {
        info!("level {level}: {shifts} anchor shifts");
    }
    Ok(())
}
