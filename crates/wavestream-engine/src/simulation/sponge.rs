//! Absorbing boundary ("sponge") mask.
//!
//! Each cell gets a coefficient in `[0, 1]` from its distance to the nearest
//! domain edge. Inside the layer of thickness `w` the profile is quartic:
//!
//! ```text
//! mask = ((w - d) / w)^4   for d < w
//! mask = 0                 for d >= w
//! ```

/// Distance in cells from `(x, y)` to the nearest edge of an `nx * ny` grid.
#[inline]
pub fn edge_distance(x: usize, y: usize, nx: usize, ny: usize) -> usize {
    let right = nx.saturating_sub(1).saturating_sub(x);
    let bottom = ny.saturating_sub(1).saturating_sub(y);
    x.min(y).min(right).min(bottom)
}

/// Sponge coefficient for a cell at edge distance `d` with layer thickness `w`.
#[inline]
pub fn sponge_value(d: usize, w: i64) -> f32 {
    if w <= 0 || d as i64 >= w {
        return 0.0;
    }
    let w = w as f32;
    ((w - d as f32) / w).powi(4)
}

/// Build the row-major sponge mask.
pub fn build_sponge(nx: usize, ny: usize, thickness: i64) -> Vec<f32> {
    let mut mask = vec![0.0; nx * ny];
    if thickness <= 0 {
        return mask;
    }

    for y in 0..ny {
        for x in 0..nx {
            mask[y * nx + x] = sponge_value(edge_distance(x, y, nx, ny), thickness);
        }
    }
    mask
}
