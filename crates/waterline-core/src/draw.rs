//! Minimal overlay drawing into gray buffers.
//!
//! Diagnostic rendering only; image encoding stays outside the core.

use nalgebra::Point2;

use crate::geometry::rasterize_segment;
use crate::image::GrayImage;

#[inline]
fn put(img: &mut GrayImage, x: i32, y: i32, value: u8) {
    if x >= 0 && y >= 0 && (x as usize) < img.width && (y as usize) < img.height {
        img.set(x as usize, y as usize, value);
    }
}

/// Draw a line segment, clipped to the image.
pub fn draw_segment(img: &mut GrayImage, a: Point2<f64>, b: Point2<f64>, value: u8) {
    for (x, y) in rasterize_segment(a, b) {
        put(img, x, y, value);
    }
}

/// Draw a `+` cross centered on a point.
pub fn draw_cross(img: &mut GrayImage, center: Point2<f64>, arm: i32, value: u8) {
    let cx = center.x.round() as i32;
    let cy = center.y.round() as i32;
    for d in -arm..=arm {
        put(img, cx + d, cy, value);
        put(img, cx, cy + d, value);
    }
}

/// Draw a closed polygon outline.
pub fn draw_polygon(img: &mut GrayImage, pts: &[Point2<f64>], value: u8) {
    for i in 0..pts.len() {
        draw_segment(img, pts[i], pts[(i + 1) % pts.len()], value);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segment_marks_its_pixels() {
        let mut img = GrayImage::new(16, 16);
        draw_segment(
            &mut img,
            Point2::new(2.0, 3.0),
            Point2::new(10.0, 3.0),
            200,
        );
        assert_eq!(img.get(2, 3), 200);
        assert_eq!(img.get(10, 3), 200);
        assert_eq!(img.get(11, 3), 0);
    }

    #[test]
    fn drawing_clips_outside_the_frame() {
        let mut img = GrayImage::new(8, 8);
        draw_cross(&mut img, Point2::new(0.0, 0.0), 3, 255);
        draw_segment(
            &mut img,
            Point2::new(-5.0, 4.0),
            Point2::new(12.0, 4.0),
            255,
        );
        assert_eq!(img.get(0, 0), 255);
        assert_eq!(img.get(7, 4), 255);
    }

    #[test]
    fn polygon_outline_touches_every_vertex() {
        let mut img = GrayImage::new(32, 32);
        let pts = [
            Point2::new(4.0, 4.0),
            Point2::new(24.0, 6.0),
            Point2::new(14.0, 26.0),
        ];
        draw_polygon(&mut img, &pts, 128);
        for p in &pts {
            assert_eq!(img.get(p.x as usize, p.y as usize), 128);
        }
    }
}
