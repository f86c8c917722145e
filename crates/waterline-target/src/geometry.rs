//! Target geometry provider: one parameterized description per fiducial
//! family instead of parallel per-shape detector classes.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// Fiducial family mounted at the gauging site.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TargetKind {
    Octagon,
    BowTie,
    StopSign,
}

/// Shape parameters of one fiducial target.
///
/// `columns`/`rows` describe the marker grid and are only meaningful for
/// [`TargetKind::BowTie`]; the octagon family always has eight corners.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetGeometry {
    pub kind: TargetKind,
    #[serde(default = "one")]
    pub columns: u32,
    #[serde(default = "one")]
    pub rows: u32,
}

fn one() -> u32 {
    1
}

/// Half of the interior angle step of a regular octagon.
const OCTAGON_HALF_STEP_DEG: f64 = 22.5;

impl TargetGeometry {
    pub fn octagon() -> Self {
        Self {
            kind: TargetKind::Octagon,
            columns: 1,
            rows: 1,
        }
    }

    pub fn stop_sign() -> Self {
        Self {
            kind: TargetKind::StopSign,
            columns: 1,
            rows: 1,
        }
    }

    pub fn bow_tie(columns: u32, rows: u32) -> Self {
        Self {
            kind: TargetKind::BowTie,
            columns: columns.max(1),
            rows: rows.max(1),
        }
    }

    /// Number of reference points the target provides.
    pub fn corner_count(&self) -> usize {
        match self.kind {
            TargetKind::Octagon | TargetKind::StopSign => 8,
            TargetKind::BowTie => (self.columns * self.rows) as usize,
        }
    }

    /// Minimum number of correspondences a stored calibration must carry.
    pub fn min_point_count(&self) -> usize {
        match self.kind {
            TargetKind::Octagon | TargetKind::StopSign => 5,
            TargetKind::BowTie => (self.columns * self.rows) as usize,
        }
    }

    /// Side length of the correlation template patch (odd).
    pub fn template_dim(&self) -> usize {
        match self.kind {
            TargetKind::Octagon => 25,
            TargetKind::StopSign => 39,
            TargetKind::BowTie => 17,
        }
    }

    /// Circumradius of the octagon family for a given facet length.
    pub fn circumradius(facet_length: f64) -> f64 {
        facet_length / (2.0 * (std::f64::consts::PI / 8.0).sin())
    }

    /// Canonical world coordinates of the target's reference points, centered
    /// on the target, world y up. Ordering matches the pixel-space corner
    /// ordering produced by the searcher: clockwise on screen, starting at
    /// the top-left corner (octagon family), or row-major from the top-left
    /// node (bow-tie grid).
    pub fn world_points(&self, facet_length: f64) -> Vec<Point2<f64>> {
        match self.kind {
            TargetKind::Octagon | TargetKind::StopSign => {
                let r = Self::circumradius(facet_length);
                (0..8)
                    .map(|k| {
                        let theta =
                            (90.0 + OCTAGON_HALF_STEP_DEG - 45.0 * k as f64).to_radians();
                        Point2::new(r * theta.cos(), r * theta.sin())
                    })
                    .collect()
            }
            TargetKind::BowTie => {
                let cx = (self.columns - 1) as f64 / 2.0;
                let cy = (self.rows - 1) as f64 / 2.0;
                let mut pts = Vec::with_capacity(self.corner_count());
                for row in 0..self.rows {
                    for col in 0..self.columns {
                        pts.push(Point2::new(
                            (col as f64 - cx) * facet_length,
                            (cy - row as f64) * facet_length,
                        ));
                    }
                }
                pts
            }
        }
    }

    /// Unit directions from the target center toward each octagon corner in
    /// pixel coordinates (y down), in corner order. Empty for bow-tie.
    pub fn corner_directions(&self) -> Vec<(f64, f64)> {
        match self.kind {
            TargetKind::Octagon | TargetKind::StopSign => (0..8)
                .map(|k| {
                    let theta =
                        (-90.0 - OCTAGON_HALF_STEP_DEG + 45.0 * k as f64).to_radians();
                    (theta.cos(), theta.sin())
                })
                .collect(),
            TargetKind::BowTie => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use waterline_core::point_distance;

    #[test]
    fn octagon_world_points_have_facet_spacing() {
        let g = TargetGeometry::octagon();
        let pts = g.world_points(0.7);
        assert_eq!(pts.len(), 8);
        for k in 0..8 {
            let d = point_distance(pts[k], pts[(k + 1) % 8]);
            assert_relative_eq!(d, 0.7, epsilon = 1e-9);
        }
    }

    #[test]
    fn octagon_starts_top_left_and_runs_clockwise() {
        let pts = TargetGeometry::octagon().world_points(1.0);
        // World y up: the first corner sits in the upper-left quadrant,
        // the second upper-right.
        assert!(pts[0].x < 0.0 && pts[0].y > 0.0);
        assert!(pts[1].x > 0.0 && pts[1].y > 0.0);
        assert_relative_eq!(pts[0].y, pts[1].y, epsilon = 1e-9);
    }

    #[test]
    fn corner_directions_mirror_world_points() {
        let g = TargetGeometry::octagon();
        let pts = g.world_points(1.0);
        let dirs = g.corner_directions();
        let r = TargetGeometry::circumradius(1.0);
        for (p, (dx, dy)) in pts.iter().zip(&dirs) {
            assert_relative_eq!(p.x / r, *dx, epsilon = 1e-9);
            assert_relative_eq!(p.y / r, -*dy, epsilon = 1e-9);
        }
    }

    #[test]
    fn bow_tie_grid_is_row_major_from_top_left() {
        let g = TargetGeometry::bow_tie(3, 2);
        let pts = g.world_points(0.5);
        assert_eq!(pts.len(), 6);
        assert_relative_eq!(pts[0].x, -0.5);
        assert_relative_eq!(pts[0].y, 0.25);
        assert_relative_eq!(pts[5].x, 0.5);
        assert_relative_eq!(pts[5].y, -0.25);
        assert_eq!(g.min_point_count(), 6);
    }
}
