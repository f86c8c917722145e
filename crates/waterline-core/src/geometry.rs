//! Planar geometry primitives: segments, line equations, intersections,
//! total-least-squares fitting, and small point-set statistics.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use crate::error::GeometryError;

/// Axis-aligned integer rectangle. `Rect::WHOLE_IMAGE` (all -1) is the
/// conventional "no restriction" value used by search regions.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl Rect {
    pub const WHOLE_IMAGE: Rect = Rect {
        x: -1,
        y: -1,
        width: -1,
        height: -1,
    };

    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// True for the sentinel meaning "search the whole image".
    pub fn is_whole_image(&self) -> bool {
        self.width <= 0 || self.height <= 0
    }

    /// Clamp to an image of the given size. The whole-image sentinel maps to
    /// the full frame.
    pub fn clamped(&self, image_width: usize, image_height: usize) -> Rect {
        if self.is_whole_image() {
            return Rect::new(0, 0, image_width as i32, image_height as i32);
        }
        let x0 = self.x.clamp(0, image_width as i32);
        let y0 = self.y.clamp(0, image_height as i32);
        let x1 = (self.x + self.width).clamp(x0, image_width as i32);
        let y1 = (self.y + self.height).clamp(y0, image_height as i32);
        Rect::new(x0, y0, x1 - x0, y1 - y0)
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.x as f64
            && y >= self.y as f64
            && x < (self.x + self.width) as f64
            && y < (self.y + self.height) as f64
    }
}

/// A sampling segment with a designated top and bottom end.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Segment {
    pub top: Point2<f64>,
    pub bottom: Point2<f64>,
}

impl Segment {
    pub fn new(top: Point2<f64>, bottom: Point2<f64>) -> Self {
        Self { top, bottom }
    }

    pub fn length(&self) -> f64 {
        point_distance(self.top, self.bottom)
    }

    /// Point at parameter `t` in [0, 1] from top to bottom.
    pub fn at(&self, t: f64) -> Point2<f64> {
        Point2::new(
            self.top.x + t * (self.bottom.x - self.top.x),
            self.top.y + t * (self.bottom.y - self.top.y),
        )
    }
}

/// Explicit slope/intercept form `y = slope * x + intercept`.
///
/// Only used where the edge is known to be closer to horizontal than
/// vertical (search-region edges); general lines use [`Line`].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LineEq {
    pub slope: f64,
    pub intercept: f64,
}

impl LineEq {
    /// Slope/intercept through two points. Fails on (near-)vertical input.
    pub fn through(a: Point2<f64>, b: Point2<f64>) -> Result<Self, GeometryError> {
        let dx = b.x - a.x;
        if dx.abs() < 1e-9 {
            return Err(GeometryError::Degenerate("vertical line has no slope"));
        }
        let slope = (b.y - a.y) / dx;
        Ok(Self {
            slope,
            intercept: a.y - slope * a.x,
        })
    }

    #[inline]
    pub fn y_at(&self, x: f64) -> f64 {
        self.slope * x + self.intercept
    }
}

/// Implicit line `a*x + b*y + c = 0` with `a^2 + b^2 = 1`.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Line {
    pub a: f64,
    pub b: f64,
    pub c: f64,
}

impl Line {
    /// Line through a point with the given (not necessarily unit) direction.
    pub fn from_point_dir(p: Point2<f64>, dx: f64, dy: f64) -> Result<Self, GeometryError> {
        let norm = (dx * dx + dy * dy).sqrt();
        if norm < 1e-12 {
            return Err(GeometryError::Degenerate("zero-length direction"));
        }
        // Normal is the direction rotated by 90 degrees.
        let a = -dy / norm;
        let b = dx / norm;
        Ok(Self {
            a,
            b,
            c: -(a * p.x + b * p.y),
        })
    }

    pub fn through(p: Point2<f64>, q: Point2<f64>) -> Result<Self, GeometryError> {
        Self::from_point_dir(p, q.x - p.x, q.y - p.y)
    }

    /// Signed perpendicular distance from the line.
    #[inline]
    pub fn distance(&self, p: Point2<f64>) -> f64 {
        self.a * p.x + self.b * p.y + self.c
    }

    /// Intersection point, `None` when the lines are (near-)parallel.
    pub fn intersect(&self, other: &Line) -> Option<Point2<f64>> {
        let det = self.a * other.b - other.a * self.b;
        if det.abs() < 1e-10 {
            return None;
        }
        let x = (self.b * other.c - other.b * self.c) / det;
        let y = (other.a * self.c - self.a * other.c) / det;
        Some(Point2::new(x, y))
    }
}

/// Result of a total-least-squares line fit.
#[derive(Clone, Copy, Debug)]
pub struct FittedLine {
    pub line: Line,
    /// Centroid of the fitted points.
    pub centroid: Point2<f64>,
    /// Direction angle in degrees, normalized into (-90, 90].
    pub angle_deg: f64,
    /// RMS orthogonal residual.
    pub rms_residual: f64,
}

/// Fit a line minimizing orthogonal (L2) distance, via the principal
/// eigenvector of the 2x2 scatter matrix.
pub fn fit_line_tls(points: &[Point2<f64>]) -> Result<FittedLine, GeometryError> {
    if points.len() < 2 {
        return Err(GeometryError::NotEnoughPoints {
            got: points.len(),
            need: 2,
        });
    }

    let centroid = point_mean(points);
    let mut sxx = 0.0;
    let mut sxy = 0.0;
    let mut syy = 0.0;
    for p in points {
        let dx = p.x - centroid.x;
        let dy = p.y - centroid.y;
        sxx += dx * dx;
        sxy += dx * dy;
        syy += dy * dy;
    }

    if sxx + syy < 1e-12 {
        return Err(GeometryError::Degenerate("coincident points"));
    }

    // Principal direction of [[sxx, sxy], [sxy, syy]] in closed form.
    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let (dx, dy) = (theta.cos(), theta.sin());

    let line = Line::from_point_dir(centroid, dx, dy)?;

    let mut ss = 0.0;
    for p in points {
        let d = line.distance(*p);
        ss += d * d;
    }
    let rms_residual = (ss / points.len() as f64).sqrt();

    let mut angle_deg = dy.atan2(dx).to_degrees();
    if angle_deg > 90.0 {
        angle_deg -= 180.0;
    } else if angle_deg <= -90.0 {
        angle_deg += 180.0;
    }

    Ok(FittedLine {
        line,
        centroid,
        angle_deg,
        rms_residual,
    })
}

/// Integer pixel positions along a segment (Bresenham).
pub fn rasterize_segment(p0: Point2<f64>, p1: Point2<f64>) -> Vec<(i32, i32)> {
    let mut x0 = p0.x.round() as i32;
    let mut y0 = p0.y.round() as i32;
    let x1 = p1.x.round() as i32;
    let y1 = p1.y.round() as i32;

    let dx = (x1 - x0).abs();
    let dy = -(y1 - y0).abs();
    let sx = if x0 < x1 { 1 } else { -1 };
    let sy = if y0 < y1 { 1 } else { -1 };
    let mut err = dx + dy;

    let mut out = Vec::with_capacity((dx - dy).max(1) as usize);
    loop {
        out.push((x0, y0));
        if x0 == x1 && y0 == y1 {
            break;
        }
        let e2 = 2 * err;
        if e2 >= dy {
            err += dy;
            x0 += sx;
        }
        if e2 <= dx {
            err += dx;
            y0 += sy;
        }
    }
    out
}

/// Centroid of a point set. Empty input yields the origin.
pub fn point_mean(points: &[Point2<f64>]) -> Point2<f64> {
    if points.is_empty() {
        return Point2::origin();
    }
    let n = points.len() as f64;
    let (sx, sy) = points
        .iter()
        .fold((0.0, 0.0), |(sx, sy), p| (sx + p.x, sy + p.y));
    Point2::new(sx / n, sy / n)
}

#[inline]
pub fn point_distance(a: Point2<f64>, b: Point2<f64>) -> f64 {
    ((a.x - b.x).powi(2) + (a.y - b.y).powi(2)).sqrt()
}

/// Median of a value slice. Empty input yields 0.
pub fn median_f64(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut v = values.to_vec();
    v.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = v.len() / 2;
    if v.len() % 2 == 0 {
        0.5 * (v[mid - 1] + v[mid])
    } else {
        v[mid]
    }
}

/// Absolute difference between two angles in degrees, normalized into [0, 180).
pub fn angle_diff_abs(a_deg: f64, b_deg: f64) -> f64 {
    let mut diff = (b_deg - a_deg).rem_euclid(360.0);
    if diff >= 180.0 {
        diff -= 360.0;
    }
    diff.abs()
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn tls_fit_recovers_sloped_line() {
        let pts: Vec<Point2<f64>> = (0..20)
            .map(|i| Point2::new(i as f64, 2.0 + 0.1 * i as f64))
            .collect();
        let fit = fit_line_tls(&pts).expect("fit");
        assert_relative_eq!(fit.angle_deg, 0.1_f64.atan().to_degrees(), epsilon = 1e-6);
        assert!(fit.rms_residual < 1e-9);
    }

    #[test]
    fn tls_fit_handles_vertical_points() {
        let pts: Vec<Point2<f64>> = (0..10).map(|i| Point2::new(5.0, i as f64)).collect();
        let fit = fit_line_tls(&pts).expect("fit");
        assert_relative_eq!(fit.angle_deg.abs(), 90.0, epsilon = 1e-6);
    }

    #[test]
    fn intersect_perpendicular_lines() {
        let h = Line::from_point_dir(Point2::new(0.0, 3.0), 1.0, 0.0).unwrap();
        let v = Line::from_point_dir(Point2::new(2.0, 0.0), 0.0, 1.0).unwrap();
        let p = h.intersect(&v).expect("intersection");
        assert_relative_eq!(p.x, 2.0, epsilon = 1e-9);
        assert_relative_eq!(p.y, 3.0, epsilon = 1e-9);
    }

    #[test]
    fn parallel_lines_do_not_intersect() {
        let a = Line::from_point_dir(Point2::new(0.0, 0.0), 1.0, 1.0).unwrap();
        let b = Line::from_point_dir(Point2::new(0.0, 5.0), 2.0, 2.0).unwrap();
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn line_eq_rejects_vertical() {
        assert!(LineEq::through(Point2::new(1.0, 0.0), Point2::new(1.0, 9.0)).is_err());
        let eq = LineEq::through(Point2::new(0.0, 1.0), Point2::new(2.0, 5.0)).unwrap();
        assert_relative_eq!(eq.y_at(1.0), 3.0, epsilon = 1e-12);
    }

    #[test]
    fn rasterize_covers_endpoints() {
        let pts = rasterize_segment(Point2::new(0.0, 0.0), Point2::new(4.0, 9.0));
        assert_eq!(pts.first(), Some(&(0, 0)));
        assert_eq!(pts.last(), Some(&(4, 9)));
        assert_eq!(pts.len(), 10);
    }

    #[test]
    fn median_of_even_and_odd_sets() {
        assert_relative_eq!(median_f64(&[3.0, 1.0, 2.0]), 2.0);
        assert_relative_eq!(median_f64(&[4.0, 1.0, 2.0, 3.0]), 2.5);
    }

    #[test]
    fn whole_image_rect_clamps_to_frame() {
        let r = Rect::WHOLE_IMAGE.clamped(640, 480);
        assert_eq!(r, Rect::new(0, 0, 640, 480));
        let r = Rect::new(600, 400, 100, 100).clamped(640, 480);
        assert_eq!(r, Rect::new(600, 400, 40, 80));
    }

    #[test]
    fn angle_diff_wraps() {
        assert_relative_eq!(angle_diff_abs(170.0, -170.0), 20.0, epsilon = 1e-9);
        assert_relative_eq!(angle_diff_abs(10.0, 30.0), 20.0, epsilon = 1e-9);
    }
}
