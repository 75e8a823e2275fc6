//! Voxel-scene query abstraction consumed by the probe trace pipeline.
#![forbid(unsafe_code)]

use std::error::Error;
use std::fs;
use std::path::Path;

use fastnoise_lite::{FastNoiseLite, NoiseType};
use glimmer_geom::Vec3;
use serde::Deserialize;

/// Chunk edge length in world units; the coarse solidity query is answered
/// per loaded chunk column and never forces a load.
pub const CHUNK_SIZE: f32 = 32.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct RayHit {
    pub distance: f32,
    /// Approximate incident radiance from the hit surface (RGB).
    pub radiance: [f32; 3],
}

/// Outcome of a single directional scene query.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum RaySample {
    Hit(RayHit),
    Sky { radiance: [f32; 3] },
}

/// Read-only world-geometry queries. Implementations must be safe to call
/// concurrently from trace workers while the main thread keeps scheduling;
/// staleness during concurrent world edits is tolerated and corrected by a
/// later budgeted refresh.
pub trait SceneQuery: Send + Sync {
    /// Nearest-hit distance and incident-radiance estimate along `dir`, or a
    /// sky-miss classification.
    fn trace_ray(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> RaySample;

    /// Coarse solidity at a world-space point. Returns `None` when the chunk
    /// containing the point is not loaded (never force-loads).
    fn solid_at(&self, p: Vec3) -> Option<bool>;
}

#[derive(Clone, Debug, Deserialize)]
pub struct SceneConfig {
    #[serde(default = "default_seed")]
    pub seed: i32,
    #[serde(default = "default_height_frequency")]
    pub height_frequency: f32,
    #[serde(default = "default_height_amplitude")]
    pub height_amplitude: f32,
    #[serde(default = "default_ground_height")]
    pub ground_height: f32,
    #[serde(default = "default_loaded_radius")]
    pub loaded_radius: f32,
    #[serde(default = "default_ground_albedo")]
    pub ground_albedo: [f32; 3],
    #[serde(default = "default_sky_zenith")]
    pub sky_zenith: [f32; 3],
    #[serde(default = "default_sky_horizon")]
    pub sky_horizon: [f32; 3],
}

fn default_seed() -> i32 {
    1337
}
fn default_height_frequency() -> f32 {
    0.008
}
fn default_height_amplitude() -> f32 {
    24.0
}
fn default_ground_height() -> f32 {
    16.0
}
fn default_loaded_radius() -> f32 {
    512.0
}
fn default_ground_albedo() -> [f32; 3] {
    [0.45, 0.40, 0.32]
}
fn default_sky_zenith() -> [f32; 3] {
    [0.35, 0.52, 0.92]
}
fn default_sky_horizon() -> [f32; 3] {
    [0.72, 0.78, 0.88]
}

impl Default for SceneConfig {
    fn default() -> Self {
        Self {
            seed: default_seed(),
            height_frequency: default_height_frequency(),
            height_amplitude: default_height_amplitude(),
            ground_height: default_ground_height(),
            loaded_radius: default_loaded_radius(),
            ground_albedo: default_ground_albedo(),
            sky_zenith: default_sky_zenith(),
            sky_horizon: default_sky_horizon(),
        }
    }
}

pub fn load_scene_config(path: &Path) -> Result<SceneConfig, Box<dyn Error>> {
    let s = fs::read_to_string(path)?;
    let cfg: SceneConfig = toml::from_str(&s)?;
    Ok(cfg)
}

/// Procedural heightfield terrain used by the headless driver and tests.
/// Immutable after construction; world edits are modeled by the caller as
/// explicit invalidation regions.
pub struct HeightfieldScene {
    cfg: SceneConfig,
    noise: FastNoiseLite,
}

impl HeightfieldScene {
    pub fn new(cfg: SceneConfig) -> Self {
        let mut noise = FastNoiseLite::with_seed(cfg.seed);
        noise.set_noise_type(Some(NoiseType::OpenSimplex2));
        noise.set_frequency(Some(cfg.height_frequency));
        Self { cfg, noise }
    }

    #[inline]
    pub fn height_at(&self, x: f32, z: f32) -> f32 {
        let n = self.noise.get_noise_2d(x, z);
        self.cfg.ground_height + n * self.cfg.height_amplitude
    }

    fn sky_radiance(&self, dir: Vec3) -> [f32; 3] {
        let t = dir.y.clamp(0.0, 1.0);
        let z = self.cfg.sky_zenith;
        let h = self.cfg.sky_horizon;
        [
            h[0] + (z[0] - h[0]) * t,
            h[1] + (z[1] - h[1]) * t,
            h[2] + (z[2] - h[2]) * t,
        ]
    }

    fn surface_radiance(&self, p: Vec3) -> [f32; 3] {
        // Albedo lit by the sky term reaching the surface from above.
        let sky = self.sky_radiance(Vec3::UP);
        let shade = ((p.y - self.cfg.ground_height) / self.cfg.height_amplitude.max(1.0))
            .clamp(-1.0, 1.0)
            * 0.25
            + 0.75;
        let a = self.cfg.ground_albedo;
        [
            a[0] * sky[0] * shade,
            a[1] * sky[1] * shade,
            a[2] * sky[2] * shade,
        ]
    }
}

impl SceneQuery for HeightfieldScene {
    fn trace_ray(&self, origin: Vec3, dir: Vec3, max_distance: f32) -> RaySample {
        // Fixed-step march against the heightfield; step scales with distance
        // so far-field rays stay cheap.
        let mut t = 0.0f32;
        let mut prev_above = origin.y > self.height_at(origin.x, origin.z);
        while t < max_distance {
            let step = (t * 0.04).max(0.5);
            t += step;
            let p = origin + dir * t;
            let above = p.y > self.height_at(p.x, p.z);
            if above != prev_above {
                // Crossed the surface inside the last step.
                let hit_t = t - step * 0.5;
                let hp = origin + dir * hit_t;
                return RaySample::Hit(RayHit {
                    distance: hit_t,
                    radiance: self.surface_radiance(hp),
                });
            }
            prev_above = above;
            if dir.y > 0.0 && p.y > self.cfg.ground_height + self.cfg.height_amplitude + 1.0 {
                break;
            }
        }
        RaySample::Sky {
            radiance: self.sky_radiance(dir),
        }
    }

    fn solid_at(&self, p: Vec3) -> Option<bool> {
        let horiz = (p.x * p.x + p.z * p.z).sqrt();
        if horiz > self.cfg.loaded_radius {
            return None;
        }
        Some(p.y < self.height_at(p.x, p.z))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scene() -> HeightfieldScene {
        HeightfieldScene::new(SceneConfig::default())
    }

    #[test]
    fn upward_ray_from_above_terrain_misses_to_sky() {
        let s = scene();
        let origin = Vec3::new(0.0, 200.0, 0.0);
        match s.trace_ray(origin, Vec3::UP, 500.0) {
            RaySample::Sky { radiance } => assert!(radiance.iter().all(|c| *c > 0.0)),
            RaySample::Hit(h) => panic!("unexpected hit at {}", h.distance),
        }
    }

    #[test]
    fn downward_ray_hits_terrain() {
        let s = scene();
        let origin = Vec3::new(10.0, 200.0, -5.0);
        match s.trace_ray(origin, Vec3::new(0.0, -1.0, 0.0), 500.0) {
            RaySample::Hit(h) => {
                assert!(h.distance > 0.0 && h.distance < 500.0);
                assert!(h.radiance.iter().all(|c| *c >= 0.0));
            }
            RaySample::Sky { .. } => panic!("expected terrain hit"),
        }
    }

    #[test]
    fn solidity_is_none_outside_loaded_radius() {
        let s = scene();
        assert!(s.solid_at(Vec3::new(10_000.0, 0.0, 0.0)).is_none());
        assert_eq!(s.solid_at(Vec3::new(0.0, -100.0, 0.0)), Some(true));
        assert_eq!(s.solid_at(Vec3::new(0.0, 300.0, 0.0)), Some(false));
    }

    #[test]
    fn config_defaults_from_empty_toml() {
        let cfg: SceneConfig = toml::from_str("").unwrap();
        assert_eq!(cfg.seed, 1337);
        assert!(cfg.loaded_radius > 0.0);
    }
}
