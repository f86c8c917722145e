//! Per-frame line-find results.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

/// The fitted water-edge line in pixel coordinates.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CalcLinePoints {
    /// Line evaluated at the left end of the search-line fan.
    pub left: Point2<f64>,
    /// Ensemble center of the accepted fits.
    pub center: Point2<f64>,
    /// Line evaluated at the right end of the search-line fan.
    pub right: Point2<f64>,
    /// Line angle, degrees (0 = horizontal, positive sloping down-right).
    pub angle_deg: f64,
}

/// Result of one line-find pass. Constructed fresh per frame; diagnostic
/// series are populated even when the find fails so a "bad find" frame can
/// still be rendered.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct LineFindResult {
    /// Raw candidate edge points, one per evaluated swath.
    pub found_points: Vec<Point2<f64>>,
    /// Candidates surviving triage and any retry trim.
    pub used_points: Vec<Point2<f64>>,
    /// The fitted line; `None` when the find failed.
    pub calc_line: Option<CalcLinePoints>,
    /// Overall outcome flag.
    pub find_success: bool,
    /// Accepted RANSAC trial count.
    pub trials_accepted: usize,
    /// Row-sum profile samples per swath, `(row index, mean intensity)`.
    pub row_sum_profile: Vec<Point2<f64>>,
    /// First differences of the profile.
    pub first_derivative: Vec<Point2<f64>>,
    /// Second differences of the profile.
    pub second_derivative: Vec<Point2<f64>>,
}
