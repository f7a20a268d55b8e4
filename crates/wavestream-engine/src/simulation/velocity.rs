//! Velocity models: per-cell wave speed built once from the configuration.

/// Named velocity model variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum VelocityModel {
    /// Constant `c0` everywhere.
    #[default]
    Homogeneous,
    /// `c0` above the vertical midline, `1.5 * c0` at and below it.
    TwoLayer,
    /// `0.7 * c0` inside a centered disk of radius `0.2 * nx`.
    Circle,
}

impl VelocityModel {
    /// Resolve a model name. Unknown names fall back to homogeneous.
    pub fn from_name(name: &str) -> Self {
        match name {
            "homogeneous" => VelocityModel::Homogeneous,
            "two_layer" => VelocityModel::TwoLayer,
            "circle" => VelocityModel::Circle,
            other => {
                tracing::debug!(model = other, "unknown velocity model, using homogeneous");
                VelocityModel::Homogeneous
            }
        }
    }

    /// Canonical name.
    pub fn name(self) -> &'static str {
        match self {
            VelocityModel::Homogeneous => "homogeneous",
            VelocityModel::TwoLayer => "two_layer",
            VelocityModel::Circle => "circle",
        }
    }

    /// Build the row-major speed field for an `nx * ny` grid.
    pub fn build(self, nx: usize, ny: usize, c0: f32) -> Vec<f32> {
        let mut speed = vec![c0; nx * ny];

        match self {
            VelocityModel::Homogeneous => {}
            VelocityModel::TwoLayer => {
                let mid = ny / 2;
                for row in speed.chunks_mut(nx.max(1)).skip(mid) {
                    row.fill(1.5 * c0);
                }
            }
            VelocityModel::Circle => {
                let cx = nx as f32 / 2.0;
                let cy = ny as f32 / 2.0;
                let radius = 0.2 * nx as f32;
                let r2 = radius * radius;
                for y in 0..ny {
                    for x in 0..nx {
                        let ddx = x as f32 - cx;
                        let ddy = y as f32 - cy;
                        if ddx * ddx + ddy * ddy < r2 {
                            speed[y * nx + x] = 0.7 * c0;
                        }
                    }
                }
            }
        }

        speed
    }
}
