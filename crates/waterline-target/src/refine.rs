//! Geometric corner refinement.
//!
//! Template correlation lands within a pixel or two of each corner; the
//! refinement step recovers sub-pixel positions by fitting a line to the
//! edge pixels along each of the two octagon sides meeting at the corner
//! and intersecting the fits. Each side is shortened to 90% of its nominal
//! length, centered, so rounding of the physical corner does not bias the
//! fit.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_core::{edge_mask, fit_line_tls, median_blur, EdgeMask, GrayImageView, Line};

use crate::error::TargetSearchError;

/// Refinement settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RefineParams {
    /// Median pre-blur radius applied before edge extraction.
    pub median_radius: usize,
    /// Hysteresis thresholds for the edge extractor.
    pub edge_low: f32,
    pub edge_high: f32,
    /// Kept fraction of each side's nominal length.
    pub side_keep_frac: f64,
    /// Maximum orthogonal distance for an edge pixel to count toward a side.
    pub max_edge_dist: f64,
    /// Minimum edge pixels per side.
    pub min_edge_points: usize,
    /// Maximum displacement between the coarse and refined corner.
    pub max_shift: f64,
}

impl Default for RefineParams {
    fn default() -> Self {
        Self {
            median_radius: 1,
            edge_low: 25.0,
            edge_high: 70.0,
            side_keep_frac: 0.90,
            max_edge_dist: 2.5,
            min_edge_points: 5,
            max_shift: 6.0,
        }
    }
}

/// Edge map shared by all corners of one search pass.
pub struct EdgeContext {
    mask: EdgeMask,
}

impl EdgeContext {
    /// Median-blur the image and extract thin edges once for all corners.
    pub fn new(img: &GrayImageView<'_>, params: &RefineParams) -> Self {
        let blurred = median_blur(img, params.median_radius);
        let mask = edge_mask(&blurred.as_view(), params.edge_low, params.edge_high);
        Self { mask }
    }

    /// Edge pixels within `max_dist` of the segment `a..b`, restricted to the
    /// segment's parameter range.
    fn pixels_near_segment(
        &self,
        a: Point2<f64>,
        b: Point2<f64>,
        max_dist: f64,
    ) -> Result<Vec<Point2<f64>>, TargetSearchError> {
        let line = Line::through(a, b)?;
        let dx = b.x - a.x;
        let dy = b.y - a.y;
        let len2 = dx * dx + dy * dy;

        let pad = max_dist + 1.0;
        let x0 = ((a.x.min(b.x) - pad).floor().max(0.0)) as usize;
        let y0 = ((a.y.min(b.y) - pad).floor().max(0.0)) as usize;
        let x1 = ((a.x.max(b.x) + pad).ceil() as usize).min(self.mask.width.saturating_sub(1));
        let y1 = ((a.y.max(b.y) + pad).ceil() as usize).min(self.mask.height.saturating_sub(1));

        let mut out = Vec::new();
        for y in y0..=y1 {
            for x in x0..=x1 {
                if !self.mask.at(x, y) {
                    continue;
                }
                let p = Point2::new(x as f64, y as f64);
                if line.distance(p).abs() > max_dist {
                    continue;
                }
                let t = ((p.x - a.x) * dx + (p.y - a.y) * dy) / len2;
                if (0.0..=1.0).contains(&t) {
                    out.push(p);
                }
            }
        }
        Ok(out)
    }
}

/// Shorten a segment symmetrically to `keep` of its length.
fn shorten(a: Point2<f64>, b: Point2<f64>, keep: f64) -> (Point2<f64>, Point2<f64>) {
    let trim = (1.0 - keep) / 2.0;
    let dx = b.x - a.x;
    let dy = b.y - a.y;
    (
        Point2::new(a.x + trim * dx, a.y + trim * dy),
        Point2::new(b.x - trim * dx, b.y - trim * dy),
    )
}

/// Refine one corner from its two adjacent sides.
///
/// `prev` and `next` are the coarse positions of the neighboring corners;
/// `corner` is the coarse position being refined.
pub fn refine_corner(
    ctx: &EdgeContext,
    index: usize,
    prev: Point2<f64>,
    corner: Point2<f64>,
    next: Point2<f64>,
    params: &RefineParams,
) -> Result<Point2<f64>, TargetSearchError> {
    let fit_side = |from: Point2<f64>, to: Point2<f64>| -> Result<Line, TargetSearchError> {
        let (a, b) = shorten(from, to, params.side_keep_frac);
        let pts = ctx.pixels_near_segment(a, b, params.max_edge_dist)?;
        if pts.len() < params.min_edge_points {
            return Err(TargetSearchError::TooFewEdgePoints {
                index,
                got: pts.len(),
                need: params.min_edge_points,
            });
        }
        Ok(fit_line_tls(&pts)?.line)
    };

    let incoming = fit_side(prev, corner)?;
    let outgoing = fit_side(corner, next)?;

    let refined = incoming
        .intersect(&outgoing)
        .ok_or(TargetSearchError::ParallelSides { index })?;

    let shift = ((refined.x - corner.x).powi(2) + (refined.y - corner.y).powi(2)).sqrt();
    if shift > params.max_shift {
        return Err(TargetSearchError::ParallelSides { index });
    }
    Ok(refined)
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterline_core::GrayImage;

    /// Render a dark axis-aligned L-corner: body fills x >= 30 AND y >= 30.
    fn l_corner_image() -> GrayImage {
        let mut img = GrayImage {
            width: 80,
            height: 80,
            data: vec![230u8; 80 * 80],
        };
        for y in 30..80 {
            for x in 30..80 {
                img.set(x, y, 20);
            }
        }
        img
    }

    #[test]
    fn refines_an_axis_aligned_corner() {
        let img = l_corner_image();
        let params = RefineParams::default();
        let ctx = EdgeContext::new(&img.as_view(), &params);

        // Coarse guesses a couple of pixels off; sides run along the two
        // body boundaries (x = 30 and y = 30 edges).
        let corner = Point2::new(31.5, 28.8);
        let prev = Point2::new(31.0, 70.0); // up along the vertical side
        let next = Point2::new(70.0, 29.0); // right along the horizontal side

        let refined = refine_corner(&ctx, 0, prev, corner, next, &params).expect("refined");
        assert!(
            (refined.x - 30.0).abs() < 2.0 && (refined.y - 30.0).abs() < 2.0,
            "refined to ({:.2},{:.2})",
            refined.x,
            refined.y
        );
    }

    #[test]
    fn fails_without_edges() {
        let img = GrayImage {
            width: 60,
            height: 60,
            data: vec![128u8; 60 * 60],
        };
        let params = RefineParams::default();
        let ctx = EdgeContext::new(&img.as_view(), &params);
        let err = refine_corner(
            &ctx,
            3,
            Point2::new(10.0, 30.0),
            Point2::new(30.0, 30.0),
            Point2::new(30.0, 50.0),
            &params,
        );
        assert!(matches!(
            err,
            Err(TargetSearchError::TooFewEdgePoints { index: 3, .. })
        ));
    }
}
