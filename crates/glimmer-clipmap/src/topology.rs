//! Pure clipmap math: world position ↔ cell index and toroidal storage.

use glimmer_geom::Vec3;

/// World-space cell index at some level's spacing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct CellIndex {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl CellIndex {
    #[inline]
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self {
            x: self.x + dx,
            y: self.y + dy,
            z: self.z + dz,
        }
    }
}

impl From<(i32, i32, i32)> for CellIndex {
    fn from(value: (i32, i32, i32)) -> Self {
        Self::new(value.0, value.1, value.2)
    }
}

/// Cell spacing of `level`, exponential in the level index.
#[inline]
pub fn spacing(base_spacing: f32, level: u32) -> f32 {
    base_spacing * (1u64 << level.min(32)) as f32
}

/// Cell containing `p` (floor division along each axis).
#[inline]
pub fn world_to_cell(p: Vec3, spacing: f32) -> CellIndex {
    CellIndex::new(
        (p.x / spacing).floor() as i32,
        (p.y / spacing).floor() as i32,
        (p.z / spacing).floor() as i32,
    )
}

/// World-space center of `cell`.
#[inline]
pub fn cell_center(cell: CellIndex, spacing: f32) -> Vec3 {
    Vec3::new(
        (cell.x as f32 + 0.5) * spacing,
        (cell.y as f32 + 0.5) * spacing,
        (cell.z as f32 + 0.5) * spacing,
    )
}

/// Toroidal storage coordinate of `cell` in an `n`-per-axis arena. Always
/// non-negative.
#[inline]
pub fn storage_coord(cell: CellIndex, n: i32) -> (usize, usize, usize) {
    (
        cell.x.rem_euclid(n) as usize,
        cell.y.rem_euclid(n) as usize,
        cell.z.rem_euclid(n) as usize,
    )
}

/// Flat arena index of `cell`'s storage coordinate.
#[inline]
pub fn storage_index(cell: CellIndex, n: i32) -> usize {
    let (x, y, z) = storage_coord(cell, n);
    let n = n as usize;
    x + n * (y + n * z)
}
