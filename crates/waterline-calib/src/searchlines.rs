//! Search-line generation.
//!
//! Given the four corners of the water-line search quadrilateral, produce an
//! ordered fan of sampling segments between the top and bottom edges. Each
//! edge is stepped at its own rate so both reach their right corner on the
//! same step, which corrects for perspective skew when the edges differ in
//! width.

use nalgebra::Point2;

use waterline_core::{LineEq, Segment};

use crate::error::CalibrationError;

/// The four corners ordered as top-left, top-right, bottom-left,
/// bottom-right.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SearchCorners {
    pub top_left: Point2<f64>,
    pub top_right: Point2<f64>,
    pub bottom_left: Point2<f64>,
    pub bottom_right: Point2<f64>,
}

impl SearchCorners {
    /// Order four arbitrary corners by y then x.
    pub fn from_unordered(mut pts: [Point2<f64>; 4]) -> Self {
        pts.sort_by(|a, b| {
            a.y.partial_cmp(&b.y)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.x.partial_cmp(&b.x).unwrap_or(std::cmp::Ordering::Equal))
        });
        let (mut tl, mut tr) = (pts[0], pts[1]);
        if tl.x > tr.x {
            std::mem::swap(&mut tl, &mut tr);
        }
        let (mut bl, mut br) = (pts[2], pts[3]);
        if bl.x > br.x {
            std::mem::swap(&mut bl, &mut br);
        }
        Self {
            top_left: tl,
            top_right: tr,
            bottom_left: bl,
            bottom_right: br,
        }
    }

    pub fn as_array(&self) -> [Point2<f64>; 4] {
        [
            self.top_left,
            self.top_right,
            self.bottom_left,
            self.bottom_right,
        ]
    }
}

/// Generate `max(top_width, bottom_width) + 2` evenly spaced sampling
/// segments; the first and last coincide with the supplied left/right
/// corner pairs.
///
/// Fails when the region is degenerate or any generated segment is shorter
/// than `min_length` (a calibration-time error, not a run-time one).
pub fn generate_search_lines(
    corners: &SearchCorners,
    min_length: f64,
) -> Result<Vec<Segment>, CalibrationError> {
    let top_w = corners.top_right.x - corners.top_left.x;
    let bot_w = corners.bottom_right.x - corners.bottom_left.x;
    if top_w < 1.0 || bot_w < 1.0 {
        return Err(CalibrationError::SearchRegion("edge width below 1 px"));
    }

    let top = LineEq::through(corners.top_left, corners.top_right)
        .map_err(|_| CalibrationError::SearchRegion("top edge is vertical"))?;
    let bottom = LineEq::through(corners.bottom_left, corners.bottom_right)
        .map_err(|_| CalibrationError::SearchRegion("bottom edge is vertical"))?;

    let count = top_w.max(bot_w).round() as usize + 2;
    let steps = (count - 1) as f64;

    let mut lines = Vec::with_capacity(count);
    for i in 0..count {
        let t = i as f64 / steps;
        // Each edge advances along its own width.
        let tx = corners.top_left.x + t * top_w;
        let bx = corners.bottom_left.x + t * bot_w;
        let segment = Segment::new(
            Point2::new(tx, top.y_at(tx)),
            Point2::new(bx, bottom.y_at(bx)),
        );
        let length = segment.length();
        if length < min_length {
            return Err(CalibrationError::SearchLineTooShort {
                index: i,
                length,
                min: min_length,
            });
        }
        lines.push(segment);
    }

    Ok(lines)
}
