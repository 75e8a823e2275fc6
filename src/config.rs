//! Driver configuration: one TOML file covering every subsystem.

use std::error::Error;
use std::fs;
use std::path::Path;

use serde::Deserialize;

use glimmer_clipmap::ClipmapConfig;
use glimmer_scene::SceneConfig;
use glimmer_screen::ScreenPipelineConfig;
use glimmer_temporal::ValidityConfig;
use glimmer_trace::TraceConfig;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub clipmap: ClipmapSection,
    #[serde(default)]
    pub trace: TraceSection,
    #[serde(default)]
    pub temporal: TemporalSection,
    #[serde(default)]
    pub screen: ScreenSection,
    #[serde(default)]
    pub scene: SceneConfig,
}

pub fn load_config(path: &Path) -> Result<Config, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: Config = toml::from_str(&s)?;
    Ok(cfg)
}

#[derive(Clone, Debug, Deserialize)]
pub struct ClipmapSection {
    #[serde(default = "d_base_spacing")]
    pub base_spacing: f32,
    #[serde(default = "d_resolution")]
    pub resolution: usize,
    #[serde(default = "d_level_count")]
    pub level_count: usize,
    #[serde(default = "d_per_level_budgets")]
    pub per_level_budgets: Vec<usize>,
    #[serde(default = "d_global_max_updates")]
    pub global_max_updates: usize,
    #[serde(default = "d_upload_byte_budget")]
    pub upload_byte_budget: usize,
    #[serde(default = "d_max_ray_distance")]
    pub max_ray_distance: f32,
}

fn d_base_spacing() -> f32 {
    2.0
}
fn d_resolution() -> usize {
    32
}
fn d_level_count() -> usize {
    4
}
fn d_per_level_budgets() -> Vec<usize> {
    vec![64, 48, 32, 16]
}
fn d_global_max_updates() -> usize {
    128
}
fn d_upload_byte_budget() -> usize {
    64 * 1024
}
fn d_max_ray_distance() -> f32 {
    512.0
}

impl Default for ClipmapSection {
    fn default() -> Self {
        Self {
            base_spacing: d_base_spacing(),
            resolution: d_resolution(),
            level_count: d_level_count(),
            per_level_budgets: d_per_level_budgets(),
            global_max_updates: d_global_max_updates(),
            upload_byte_budget: d_upload_byte_budget(),
            max_ray_distance: d_max_ray_distance(),
        }
    }
}

impl ClipmapSection {
    pub fn to_clipmap_config(&self) -> ClipmapConfig {
        ClipmapConfig {
            base_spacing: self.base_spacing,
            resolution: self.resolution,
            level_count: self.level_count,
            per_level_budgets: self.per_level_budgets.clone(),
            global_max_updates: self.global_max_updates,
            upload_byte_budget: self.upload_byte_budget,
            bytes_per_probe_tile: glimmer_atlas::BYTES_PER_PROBE_TILE,
            max_ray_distance: self.max_ray_distance,
        }
        .clamped()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TraceSection {
    #[serde(default = "d_max_queued")]
    pub max_queued_work_items: usize,
    #[serde(default)]
    pub worker_threads: usize,
    #[serde(default = "d_directions")]
    pub directions_per_probe: usize,
    #[serde(default = "d_occlusion_distance")]
    pub occlusion_distance: f32,
    #[serde(default = "d_occlusion_fraction")]
    pub occlusion_fraction: f32,
}

fn d_max_queued() -> usize {
    2048
}
fn d_directions() -> usize {
    64
}
fn d_occlusion_distance() -> f32 {
    1.0
}
fn d_occlusion_fraction() -> f32 {
    0.95
}

impl Default for TraceSection {
    fn default() -> Self {
        Self {
            max_queued_work_items: d_max_queued(),
            worker_threads: 0,
            directions_per_probe: d_directions(),
            occlusion_distance: d_occlusion_distance(),
            occlusion_fraction: d_occlusion_fraction(),
        }
    }
}

impl TraceSection {
    pub fn to_trace_config(&self) -> TraceConfig {
        TraceConfig {
            max_queued_work_items: self.max_queued_work_items,
            worker_threads: self.worker_threads,
            directions_per_probe: self.directions_per_probe,
            occlusion_distance: self.occlusion_distance,
            occlusion_fraction: self.occlusion_fraction,
        }
        .clamped()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct TemporalSection {
    #[serde(default = "d_teleport_distance")]
    pub teleport_distance: f32,
    #[serde(default = "d_velocity_reject")]
    pub velocity_reject: f32,
    #[serde(default = "d_depth_reject")]
    pub depth_reject: f32,
    #[serde(default = "d_normal_reject")]
    pub normal_reject: f32,
}

fn d_teleport_distance() -> f32 {
    50.0
}
fn d_velocity_reject() -> f32 {
    0.08
}
fn d_depth_reject() -> f32 {
    0.1
}
fn d_normal_reject() -> f32 {
    0.7
}

impl Default for TemporalSection {
    fn default() -> Self {
        Self {
            teleport_distance: d_teleport_distance(),
            velocity_reject: d_velocity_reject(),
            depth_reject: d_depth_reject(),
            normal_reject: d_normal_reject(),
        }
    }
}

impl TemporalSection {
    pub fn to_validity_config(&self) -> ValidityConfig {
        ValidityConfig {
            teleport_distance: self.teleport_distance,
            velocity_reject: self.velocity_reject,
            depth_reject: self.depth_reject,
            normal_reject: self.normal_reject,
        }
        .clamped()
    }
}

#[derive(Clone, Debug, Deserialize)]
pub struct ScreenSection {
    #[serde(default = "d_tile_texels")]
    pub probe_tile_texels: usize,
    #[serde(default = "d_texels_per_frame")]
    pub texels_per_probe_per_frame: usize,
    #[serde(default = "d_sh_enabled")]
    pub sh_enabled: bool,
}

fn d_tile_texels() -> usize {
    64
}
fn d_texels_per_frame() -> usize {
    16
}
fn d_sh_enabled() -> bool {
    true
}

impl Default for ScreenSection {
    fn default() -> Self {
        Self {
            probe_tile_texels: d_tile_texels(),
            texels_per_probe_per_frame: d_texels_per_frame(),
            sh_enabled: d_sh_enabled(),
        }
    }
}

impl ScreenSection {
    pub fn to_screen_config(&self) -> ScreenPipelineConfig {
        ScreenPipelineConfig {
            probe_tile_texels: self.probe_tile_texels,
            texels_per_probe_per_frame: self.texels_per_probe_per_frame,
            sh_enabled: self.sh_enabled,
        }
        .clamped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        let cfg: Config = toml::from_str("").unwrap();
        assert_eq!(cfg.clipmap.resolution, 32);
        assert_eq!(cfg.trace.max_queued_work_items, 2048);
        assert_eq!(cfg.temporal.teleport_distance, 50.0);
        assert!(cfg.screen.sh_enabled);
    }

    #[test]
    fn partial_section_overrides_only_named_fields() {
        let cfg: Config = toml::from_str(
            r#"
            [clipmap]
            level_count = 2
            per_level_budgets = [8, 4]

            [temporal]
            teleport_distance = 25.0
            "#,
        )
        .unwrap();
        assert_eq!(cfg.clipmap.level_count, 2);
        assert_eq!(cfg.clipmap.resolution, 32);
        assert_eq!(cfg.temporal.teleport_distance, 25.0);
        assert_eq!(cfg.temporal.velocity_reject, 0.08);
    }

    #[test]
    fn out_of_range_values_are_clamped_not_rejected() {
        let cfg: Config = toml::from_str(
            r#"
            [clipmap]
            resolution = 100000
            level_count = 99
            "#,
        )
        .unwrap();
        let cm = cfg.clipmap.to_clipmap_config();
        assert!(cm.resolution <= 128);
        assert!(cm.level_count <= 10);
        assert_eq!(cm.per_level_budgets.len(), cm.level_count);
    }
}
