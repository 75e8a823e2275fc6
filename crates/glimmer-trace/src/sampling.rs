//! Directional probe sampling and SH9 projection, run on trace workers.

use std::f32::consts::PI;

use glimmer_clipmap::ProbeResultData;
use glimmer_geom::Vec3;
use glimmer_scene::{RaySample, SceneQuery};

/// Spherical Fibonacci direction for sample `i` of `count`.
#[inline]
pub fn fibonacci_dir(i: usize, count: usize) -> Vec3 {
    let golden = (1.0 + 5.0f32.sqrt()) * 0.5;
    let phi = 2.0 * PI * (i as f32 / golden).fract();
    let y = 1.0 - 2.0 * (i as f32 + 0.5) / count as f32;
    let r = (1.0 - y * y).max(0.0).sqrt();
    Vec3::new(phi.cos() * r, y, phi.sin() * r)
}

/// Second-order SH basis evaluated at a unit direction.
#[inline]
fn sh9_basis(d: Vec3) -> [f32; 9] {
    [
        0.282095,
        0.488603 * d.y,
        0.488603 * d.z,
        0.488603 * d.x,
        1.092548 * d.x * d.y,
        1.092548 * d.y * d.z,
        0.315392 * (3.0 * d.z * d.z - 1.0),
        1.092548 * d.x * d.z,
        0.546274 * (d.x * d.x - d.y * d.y),
    ]
}

pub struct ProbeSample {
    pub data: ProbeResultData,
    /// Fraction of directions that hit geometry closer than the occlusion
    /// distance; near 1.0 means the probe sits inside solid matter.
    pub near_occluded_fraction: f32,
}

/// Trace `dir_count` directions from `origin` and project the incident
/// radiance into SH9. Workers only read the scene; no shared state.
pub fn sample_probe(
    scene: &dyn SceneQuery,
    origin: Vec3,
    max_distance: f32,
    dir_count: usize,
    occlusion_distance: f32,
) -> ProbeSample {
    let dir_count = dir_count.max(1);
    let weight = 4.0 * PI / dir_count as f32;
    let mut sh = [[0.0f32; 3]; 9];
    let mut dist_sum = 0.0f32;
    let mut sky_hits = 0usize;
    let mut near_occluded = 0usize;
    for i in 0..dir_count {
        let dir = fibonacci_dir(i, dir_count);
        let (radiance, dist) = match scene.trace_ray(origin, dir, max_distance) {
            RaySample::Hit(hit) => {
                if hit.distance < occlusion_distance {
                    near_occluded += 1;
                }
                (hit.radiance, hit.distance)
            }
            RaySample::Sky { radiance } => {
                sky_hits += 1;
                (radiance, max_distance)
            }
        };
        let basis = sh9_basis(dir);
        for (k, b) in basis.iter().enumerate() {
            sh[k][0] += radiance[0] * b * weight;
            sh[k][1] += radiance[1] * b * weight;
            sh[k][2] += radiance[2] * b * weight;
        }
        dist_sum += dist;
    }
    ProbeSample {
        data: ProbeResultData {
            hit_distance: dist_sum / dir_count as f32,
            sh,
            sky_visibility: sky_hits as f32 / dir_count as f32,
        },
        near_occluded_fraction: near_occluded as f32 / dir_count as f32,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct UniformSky;

    impl SceneQuery for UniformSky {
        fn trace_ray(&self, _origin: Vec3, _dir: Vec3, _max: f32) -> RaySample {
            RaySample::Sky {
                radiance: [1.0, 1.0, 1.0],
            }
        }
        fn solid_at(&self, _p: Vec3) -> Option<bool> {
            Some(false)
        }
    }

    struct SolidBall;

    impl SceneQuery for SolidBall {
        fn trace_ray(&self, _origin: Vec3, _dir: Vec3, _max: f32) -> RaySample {
            RaySample::Hit(glimmer_scene::RayHit {
                distance: 0.1,
                radiance: [0.0, 0.0, 0.0],
            })
        }
        fn solid_at(&self, _p: Vec3) -> Option<bool> {
            Some(true)
        }
    }

    #[test]
    fn fibonacci_dirs_are_unit_length() {
        for i in 0..64 {
            let d = fibonacci_dir(i, 64);
            assert!((d.length() - 1.0).abs() < 1e-4);
        }
    }

    #[test]
    fn uniform_sky_projects_into_dc_band() {
        let s = sample_probe(&UniformSky, Vec3::ZERO, 100.0, 128, 1.0);
        assert_eq!(s.data.sky_visibility, 1.0);
        assert_eq!(s.near_occluded_fraction, 0.0);
        // DC term of a unit-radiance sphere: Y00 * 4π.
        let expected = 0.282095 * 4.0 * PI;
        assert!((s.data.sh[0][0] - expected).abs() < 0.05);
        // Directional bands nearly cancel.
        for k in 1..9 {
            assert!(s.data.sh[k][0].abs() < 0.1);
        }
    }

    #[test]
    fn enclosed_probe_reports_full_occlusion() {
        let s = sample_probe(&SolidBall, Vec3::ZERO, 100.0, 32, 1.0);
        assert_eq!(s.near_occluded_fraction, 1.0);
        assert_eq!(s.data.sky_visibility, 0.0);
    }
}
