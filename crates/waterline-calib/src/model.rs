//! The calibration model: pixel/world correspondences, the forward/inverse
//! homography pair, and the derived water-line search geometry.
//!
//! Every mutating operation computes a complete candidate state first and
//! swaps it in only after all validity checks pass, so a failed calibration
//! never leaves the model half-updated.

use log::{info, warn};
use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use waterline_core::{
    erode, estimate_homography, median_blur, point_mean, rotate_about, DebugSink, GrayImageView,
    Homography, NullSink, Segment,
};
use waterline_target::{
    corner_spacing_stats, render_polygon_mask, top_facet_angle, TargetKind, TargetSearcher,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::control::CalibrationControl;
use crate::error::CalibrationError;
use crate::searchlines::{generate_search_lines, SearchCorners};

/// Drawable calibration geometry for an external overlay renderer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CalibrationOverlay {
    /// The fiducial outline (pixel corners in order).
    pub target_polygon: Vec<Point2<f64>>,
    /// Water-line search quadrilateral: top-left, top-right, bottom-left,
    /// bottom-right.
    pub search_quad: [Point2<f64>; 4],
    /// A thinned subset of the search-line fan.
    pub search_lines: Vec<Segment>,
    /// Reference corners used by move detection.
    pub move_ref: Option<(Point2<f64>, Point2<f64>)>,
}

/// Everything `calibrate` replaces atomically.
#[derive(Clone, Debug)]
struct CalibratedState {
    image_size: (usize, usize),
    pixel_points: Vec<Point2<f64>>,
    world_points: Vec<Point2<f64>>,
    forward: Homography,
    inverse: Homography,
    waterline_corners: SearchCorners,
    search_lines: Vec<Segment>,
    center: Point2<f64>,
    angle_deg: f64,
    control: CalibrationControl,
}

/// One camera site's pixel/world coordinate mapping.
///
/// Created empty, populated by [`calibrate`](Self::calibrate) (or by the
/// persistence layer), reset by [`clear`](Self::clear). Owned by a single
/// caller; concurrent writers must serialize externally.
#[derive(Clone, Debug, Default)]
pub struct CalibrationModel {
    state: Option<CalibratedState>,
    /// Corner set of the previous successful calibration, for move
    /// detection.
    old_pixel_points: Vec<Point2<f64>>,
}

impl CalibrationModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// True when a forward/inverse homography pair is present.
    pub fn is_calibrated(&self) -> bool {
        self.state.is_some()
    }

    /// Reset to the empty state.
    pub fn clear(&mut self) {
        self.state = None;
        self.old_pixel_points.clear();
    }

    fn state(&self) -> Result<&CalibratedState, CalibrationError> {
        self.state.as_ref().ok_or(CalibrationError::NotCalibrated)
    }

    pub fn image_size(&self) -> Option<(usize, usize)> {
        self.state.as_ref().map(|s| s.image_size)
    }

    pub fn pixel_points(&self) -> &[Point2<f64>] {
        self.state.as_ref().map_or(&[], |s| &s.pixel_points)
    }

    pub fn world_points(&self) -> &[Point2<f64>] {
        self.state.as_ref().map_or(&[], |s| &s.world_points)
    }

    pub fn search_lines(&self) -> &[Segment] {
        self.state.as_ref().map_or(&[], |s| &s.search_lines)
    }

    pub fn waterline_corners(&self) -> Option<SearchCorners> {
        self.state.as_ref().map(|s| s.waterline_corners)
    }

    pub fn target_center(&self) -> Option<Point2<f64>> {
        self.state.as_ref().map(|s| s.center)
    }

    pub fn target_angle_deg(&self) -> Option<f64> {
        self.state.as_ref().map(|s| s.angle_deg)
    }

    pub fn control(&self) -> Option<&CalibrationControl> {
        self.state.as_ref().map(|s| &s.control)
    }

    /// Previous calibration's corner set, if any.
    pub fn old_pixel_points(&self) -> &[Point2<f64>] {
        &self.old_pixel_points
    }

    /// Verify a frame matches the calibrated size.
    pub fn check_frame(&self, img: &GrayImageView<'_>) -> Result<(), CalibrationError> {
        let s = self.state()?;
        if (img.width, img.height) != s.image_size {
            return Err(CalibrationError::ImageSizeMismatch {
                got_width: img.width,
                got_height: img.height,
                want_width: s.image_size.0,
                want_height: s.image_size.1,
            });
        }
        Ok(())
    }

    /// Full calibration from a frame: search the fiducial, derive world
    /// coordinates, fit both homographies, and rebuild the search geometry.
    ///
    /// When the first search fails, one fallback attempt runs on a median
    /// blurred and eroded copy of the frame. On any error the previous
    /// state is left untouched.
    pub fn calibrate(
        &mut self,
        img: &GrayImageView<'_>,
        control: &CalibrationControl,
    ) -> Result<(), CalibrationError> {
        self.calibrate_with_sink(img, control, &mut NullSink)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img, control, sink), fields(width = img.width, height = img.height))
    )]
    pub fn calibrate_with_sink(
        &mut self,
        img: &GrayImageView<'_>,
        control: &CalibrationControl,
        sink: &mut dyn DebugSink,
    ) -> Result<(), CalibrationError> {
        let searcher = TargetSearcher::new(control.target, control.search)?;
        let region = control.target_search_region;

        let found = match searcher.search_with_sink(img, region, sink) {
            Ok(found) => found,
            Err(first_err) => {
                // Preprocessing fallback: heavy biofouling or noise can
                // defeat the raw correlation; a median blur plus erosion
                // often restores the outline.
                warn!("target search failed ({first_err}); retrying preprocessed");
                let blurred = median_blur(img, 2);
                let cleaned = erode(&blurred.as_view(), 1);
                sink.image("calibrate-preprocessed", &cleaned.as_view());
                searcher
                    .search_with_sink(&cleaned.as_view(), region, sink)
                    .map_err(|_| first_err)?
            }
        };

        let world = self.world_points_for(control);
        let state = Self::build_state(
            (img.width, img.height),
            found.corners,
            world,
            Some((found.center, found.angle_deg)),
            control,
        )?;
        self.swap_in(state);
        info!(
            "calibrated: {} correspondences, {} search lines",
            self.pixel_points().len(),
            self.search_lines().len()
        );
        Ok(())
    }

    /// Calibrate from labelled correspondences (persistence reload, manual
    /// surveys, tests). Applies the same validity gate and derives the same
    /// geometry as an image calibration.
    pub fn calibrate_from_points(
        &mut self,
        image_size: (usize, usize),
        pixel_points: Vec<Point2<f64>>,
        world_points: Vec<Point2<f64>>,
        control: &CalibrationControl,
    ) -> Result<(), CalibrationError> {
        let state = Self::build_state(image_size, pixel_points, world_points, None, control)?;
        self.swap_in(state);
        Ok(())
    }

    fn world_points_for(&self, control: &CalibrationControl) -> Vec<Point2<f64>> {
        control
            .target
            .world_points(control.facet_length)
            .into_iter()
            .map(|p| Point2::new(p.x, p.y + control.zero_offset))
            .collect()
    }

    fn build_state(
        image_size: (usize, usize),
        pixel_points: Vec<Point2<f64>>,
        world_points: Vec<Point2<f64>>,
        found_pose: Option<(Point2<f64>, f64)>,
        control: &CalibrationControl,
    ) -> Result<CalibratedState, CalibrationError> {
        let need = control.target.min_point_count().max(5);
        if pixel_points.len() < need {
            return Err(CalibrationError::TooFewPoints {
                got: pixel_points.len(),
                need,
            });
        }
        if pixel_points.len() != world_points.len() {
            return Err(CalibrationError::PointCountMismatch {
                pixels: pixel_points.len(),
                world: world_points.len(),
            });
        }

        Self::validity_gate(&pixel_points, control)?;

        // Forward and inverse are fitted independently; both must exist for
        // the calibration to be valid.
        let forward = estimate_homography(&pixel_points, &world_points)?;
        let inverse = estimate_homography(&world_points, &pixel_points)?;

        let (center, angle_deg) = found_pose.unwrap_or_else(|| {
            (point_mean(&pixel_points), top_facet_angle(&pixel_points))
        });

        let corners = match control.waterline_corners {
            Some(pts) => SearchCorners::from_unordered(pts),
            None => Self::derive_waterline_corners(image_size, &pixel_points, center),
        };
        let search_lines = generate_search_lines(&corners, control.min_search_line_length)?;

        Ok(CalibratedState {
            image_size,
            pixel_points,
            world_points,
            forward,
            inverse,
            waterline_corners: corners,
            search_lines,
            center,
            angle_deg,
            control: *control,
        })
    }

    fn validity_gate(
        pixel_points: &[Point2<f64>],
        control: &CalibrationControl,
    ) -> Result<(), CalibrationError> {
        let limit_frac = control.search.spacing_spread_limit;
        match control.target.kind {
            TargetKind::Octagon | TargetKind::StopSign => {
                if let Some(stats) = corner_spacing_stats(pixel_points, true) {
                    if !stats.spread_ok(limit_frac) {
                        return Err(CalibrationError::Validity {
                            spread: stats.spread(),
                            limit: limit_frac * stats.mean,
                        });
                    }
                }
            }
            TargetKind::BowTie => {
                let columns = control.target.columns.max(1) as usize;
                for row in pixel_points.chunks(columns) {
                    if let Some(stats) = corner_spacing_stats(row, false) {
                        if !stats.spread_ok(limit_frac) {
                            return Err(CalibrationError::Validity {
                                spread: stats.spread(),
                                limit: limit_frac * stats.mean,
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }

    /// Water-line search quadrilateral derived from the fiducial: spans
    /// below the target, proportional to its apparent size, clamped to the
    /// frame.
    fn derive_waterline_corners(
        image_size: (usize, usize),
        pixel_points: &[Point2<f64>],
        center: Point2<f64>,
    ) -> SearchCorners {
        let (w, h) = (image_size.0 as f64, image_size.1 as f64);
        let max_y = pixel_points.iter().fold(0.0f64, |m, p| m.max(p.y));
        let min_x = pixel_points.iter().fold(f64::INFINITY, |m, p| m.min(p.x));
        let max_x = pixel_points.iter().fold(0.0f64, |m, p| m.max(p.x));
        let target_w = max_x - min_x;

        let half_span = (1.5 * target_w).max(40.0);
        let left = (center.x - half_span).max(2.0);
        let right = (center.x + half_span).min(w - 3.0);
        let top = (max_y + 0.25 * target_w).min(h - 3.0);
        let bottom = h - 3.0;

        SearchCorners {
            top_left: Point2::new(left, top),
            top_right: Point2::new(right, top),
            bottom_left: Point2::new(left, bottom),
            bottom_right: Point2::new(right, bottom),
        }
    }

    fn swap_in(&mut self, state: CalibratedState) {
        if let Some(prev) = self.state.take() {
            self.old_pixel_points = prev.pixel_points;
        }
        self.state = Some(state);
    }

    /// Map a pixel position to world coordinates.
    pub fn pixel_to_world(&self, p: Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        Ok(self.state()?.forward.project(p)?)
    }

    /// Map a world position to pixel coordinates.
    pub fn world_to_pixel(&self, p: Point2<f64>) -> Result<Point2<f64>, CalibrationError> {
        Ok(self.state()?.inverse.project(p)?)
    }

    /// Homography pair, when calibrated (forward maps pixel to world).
    pub fn homographies(&self) -> Option<(Homography, Homography)> {
        self.state.as_ref().map(|s| (s.forward, s.inverse))
    }

    /// The two designated reference corners for cheap move detection: the
    /// bottom facet's left and right corners.
    pub fn move_ref_points(&self) -> Option<(Point2<f64>, Point2<f64>)> {
        let s = self.state.as_ref()?;
        match s.control.target.kind {
            TargetKind::Octagon | TargetKind::StopSign if s.pixel_points.len() == 8 => {
                Some((s.pixel_points[5], s.pixel_points[4]))
            }
            _ => None,
        }
    }

    /// Translation of the target since the previous calibration, when a
    /// previous corner set is available.
    pub fn target_offset(&self) -> Option<Vector2<f64>> {
        let s = self.state.as_ref()?;
        if self.old_pixel_points.len() != s.pixel_points.len() || self.old_pixel_points.is_empty() {
            return None;
        }
        let now = point_mean(&s.pixel_points);
        let before = point_mean(&self.old_pixel_points);
        Some(Vector2::new(now.x - before.x, now.y - before.y))
    }

    /// Cheap movement detection between full calibrations: re-run the
    /// target search restricted to a small region around the last known
    /// target position and report the center displacement.
    pub fn detect_movement(
        &self,
        img: &GrayImageView<'_>,
    ) -> Result<Vector2<f64>, CalibrationError> {
        let s = self.state()?;
        self.check_frame(img)?;

        let (min_x, min_y, max_x, max_y) = s.pixel_points.iter().fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(ax, ay, bx, by), p| (ax.min(p.x), ay.min(p.y), bx.max(p.x), by.max(p.y)),
        );
        let margin = 0.25 * (max_x - min_x).max(max_y - min_y);
        let region = waterline_core::Rect::new(
            (min_x - margin) as i32,
            (min_y - margin) as i32,
            (max_x - min_x + 2.0 * margin) as i32,
            (max_y - min_y + 2.0 * margin) as i32,
        );

        let searcher = TargetSearcher::new(s.control.target, s.control.search)?;
        let found = searcher.search(img, region)?;
        Ok(Vector2::new(
            found.center.x - s.center.x,
            found.center.y - s.center.y,
        ))
    }

    /// Translate the whole calibration by a measured offset (target or
    /// camera shifted without rotation): pixel points, search geometry, and
    /// homographies all move together.
    pub fn apply_offset(&mut self, offset: Vector2<f64>) -> Result<(), CalibrationError> {
        let s = self.state()?;

        let shifted: Vec<Point2<f64>> = s
            .pixel_points
            .iter()
            .map(|p| Point2::new(p.x + offset.x, p.y + offset.y))
            .collect();
        let corners = s.waterline_corners.as_array().map(|p| {
            Point2::new(p.x + offset.x, p.y + offset.y)
        });

        let mut control = s.control;
        control.waterline_corners = Some(corners);

        let world = s.world_points.clone();
        let pose = (
            Point2::new(s.center.x + offset.x, s.center.y + offset.y),
            s.angle_deg,
        );
        let state = Self::build_state(s.image_size, shifted, world, Some(pose), &control)?;
        self.swap_in(state);
        info!(
            "calibration shifted by ({:.1},{:.1}) px",
            offset.x, offset.y
        );
        Ok(())
    }

    /// Correct for a small relative camera/target rotation without a full
    /// re-search: rotate the fiducial's mask by the delta between the
    /// fiducial's orientation and the measured water-line angle, re-extract
    /// corners from the rotated mask, and refit the homographies.
    pub fn adjust_for_rotation(
        &mut self,
        line_angle_deg: f64,
    ) -> Result<(), CalibrationError> {
        let s = self.state()?;
        if !matches!(
            s.control.target.kind,
            TargetKind::Octagon | TargetKind::StopSign
        ) {
            return Err(CalibrationError::Unsupported(
                "rotation adjustment requires an octagon-family target",
            ));
        }

        let delta = line_angle_deg - s.angle_deg;
        let center = s.center;
        let (w, h) = s.image_size;

        // Synthetic mask of the current fiducial, rotated by the delta.
        let mask = render_polygon_mask(w, h, &s.pixel_points);
        let rotated = rotate_about(
            &mask.as_view(),
            delta as f32,
            center.x as f32,
            center.y as f32,
        );

        // The coarse corners ride along with the same rotation.
        let rad = delta.to_radians();
        let (sin, cos) = rad.sin_cos();
        let coarse: Vec<Point2<f64>> = s
            .pixel_points
            .iter()
            .map(|p| {
                let dx = p.x - center.x;
                let dy = p.y - center.y;
                Point2::new(
                    center.x + cos * dx - sin * dy,
                    center.y + sin * dx + cos * dy,
                )
            })
            .collect();

        let searcher = TargetSearcher::new(s.control.target, s.control.search)?;
        let refined = searcher.refine_corners(&rotated.as_view(), &coarse)?;

        let mut control = s.control;
        // Keep the established search geometry: the quadrilateral does not
        // move for a small rotation correction.
        control.waterline_corners = Some(s.waterline_corners.as_array());

        let world = s.world_points.clone();
        let pose = (point_mean(&refined), top_facet_angle(&refined));
        let state =
            Self::build_state((w, h), refined, world, Some(pose), &control)?;
        self.swap_in(state);
        info!("rotation adjustment applied: delta {delta:.2} deg");
        Ok(())
    }

    /// Drawable geometry for diagnostics overlays.
    pub fn overlay(&self) -> Option<CalibrationOverlay> {
        let s = self.state.as_ref()?;
        let every = (s.search_lines.len() / 16).max(1);
        Some(CalibrationOverlay {
            target_polygon: s.pixel_points.clone(),
            search_quad: s.waterline_corners.as_array(),
            search_lines: s
                .search_lines
                .iter()
                .step_by(every)
                .copied()
                .collect(),
            move_ref: self.move_ref_points(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use waterline_target::TargetGeometry;

    fn regular_octagon_pixels(center: Point2<f64>, radius: f64) -> Vec<Point2<f64>> {
        (0..8)
            .map(|k| {
                let theta = (-112.5 + 45.0 * k as f64).to_radians();
                Point2::new(
                    center.x + radius * theta.cos(),
                    center.y + radius * theta.sin(),
                )
            })
            .collect()
    }

    fn octagon_control() -> CalibrationControl {
        let mut control = CalibrationControl::for_target(TargetGeometry::octagon(), 0.7);
        control.zero_offset = 2.0;
        control
    }

    fn calibrated_model() -> (CalibrationModel, CalibrationControl) {
        let control = octagon_control();
        let pixels = regular_octagon_pixels(Point2::new(400.0, 300.0), 100.0);
        let world = control
            .target
            .world_points(control.facet_length)
            .into_iter()
            .map(|p| Point2::new(p.x, p.y + control.zero_offset))
            .collect();
        let mut model = CalibrationModel::new();
        model
            .calibrate_from_points((800, 600), pixels, world, &control)
            .expect("calibrate");
        (model, control)
    }

    #[test]
    fn synthetic_octagon_calibrates() {
        let (model, _) = calibrated_model();
        assert!(model.is_calibrated());
        assert!(!model.search_lines().is_empty());
        let (w, h) = model.image_size().unwrap();
        for line in model.search_lines() {
            assert!(line.top.x >= 0.0 && line.top.x < w as f64);
            assert!(line.bottom.y >= 0.0 && line.bottom.y < h as f64);
        }
    }

    #[test]
    fn center_maps_to_world_datum() {
        let (model, control) = calibrated_model();
        let world = model
            .pixel_to_world(Point2::new(400.0, 300.0))
            .expect("convert");
        assert_relative_eq!(world.x, 0.0, epsilon = 1e-6);
        assert_relative_eq!(world.y, control.zero_offset, epsilon = 1e-6);
    }

    #[test]
    fn round_trip_stays_within_half_pixel() {
        let (model, _) = calibrated_model();
        for p in [
            Point2::new(320.0, 250.0),
            Point2::new(410.0, 390.0),
            Point2::new(470.0, 230.0),
        ] {
            let back = model
                .world_to_pixel(model.pixel_to_world(p).unwrap())
                .unwrap();
            assert!((back.x - p.x).abs() < 0.5 && (back.y - p.y).abs() < 0.5);
        }
    }

    #[test]
    fn calibration_is_idempotent() {
        let (mut model, control) = calibrated_model();
        let first = model.homographies().unwrap();
        let first_lines = model.search_lines().to_vec();

        let pixels = regular_octagon_pixels(Point2::new(400.0, 300.0), 100.0);
        let world = model.world_points().to_vec();
        model
            .calibrate_from_points((800, 600), pixels, world, &control)
            .expect("recalibrate");
        let second = model.homographies().unwrap();

        assert_eq!(first.0.to_array(), second.0.to_array());
        assert_eq!(first.1.to_array(), second.1.to_array());
        assert_eq!(first_lines, model.search_lines());
    }

    #[test]
    fn perturbed_corner_fails_validity_and_preserves_state() {
        let (mut model, control) = calibrated_model();
        let before = model.homographies().unwrap();

        let mut pixels = regular_octagon_pixels(Point2::new(400.0, 300.0), 100.0);
        // Mean spacing is ~76.5 px; shift one corner by more than 35% of it.
        pixels[2].x += 40.0;
        pixels[2].y += 20.0;
        let world = model.world_points().to_vec();
        let err = model.calibrate_from_points((800, 600), pixels, world, &control);
        assert!(matches!(err, Err(CalibrationError::Validity { .. })));

        // The failed attempt must not have touched the model.
        let after = model.homographies().unwrap();
        assert_eq!(before.0.to_array(), after.0.to_array());
        assert!(model.is_calibrated());
    }

    #[test]
    fn conversion_without_calibration_errors() {
        let model = CalibrationModel::new();
        assert!(matches!(
            model.pixel_to_world(Point2::new(1.0, 1.0)),
            Err(CalibrationError::NotCalibrated)
        ));
    }

    #[test]
    fn clear_resets_the_model() {
        let (mut model, _) = calibrated_model();
        model.clear();
        assert!(!model.is_calibrated());
        assert!(model.search_lines().is_empty());
    }

    #[test]
    fn move_ref_points_are_the_bottom_facet() {
        let (model, _) = calibrated_model();
        let (left, right) = model.move_ref_points().expect("refs");
        // Bottom facet corners sit below the center, left then right.
        assert!(left.y > 300.0 && right.y > 300.0);
        assert!(left.x < right.x);
    }

    #[test]
    fn applying_an_offset_translates_the_mapping() {
        let (mut model, _) = calibrated_model();
        let world_before = model.pixel_to_world(Point2::new(400.0, 300.0)).unwrap();
        let corners_before = model.waterline_corners().unwrap();

        model
            .apply_offset(Vector2::new(10.0, -4.0))
            .expect("shift");

        // The same physical point now sits 10 px right and 4 px up.
        let world_after = model.pixel_to_world(Point2::new(410.0, 296.0)).unwrap();
        assert_relative_eq!(world_before.x, world_after.x, epsilon = 1e-6);
        assert_relative_eq!(world_before.y, world_after.y, epsilon = 1e-6);

        // Search geometry moved with the points.
        let corners = model.waterline_corners().unwrap();
        assert_relative_eq!(
            corners.top_left.x,
            corners_before.top_left.x + 10.0,
            epsilon = 1e-9
        );
        assert_relative_eq!(
            corners.top_left.y,
            corners_before.top_left.y - 4.0,
            epsilon = 1e-9
        );
    }

    #[test]
    fn recalibration_tracks_target_offset() {
        let (mut model, control) = calibrated_model();
        let pixels = regular_octagon_pixels(Point2::new(412.0, 305.0), 100.0);
        let world = model.world_points().to_vec();
        model
            .calibrate_from_points((800, 600), pixels, world, &control)
            .expect("recalibrate");
        let offset = model.target_offset().expect("offset");
        assert_relative_eq!(offset.x, 12.0, epsilon = 1e-6);
        assert_relative_eq!(offset.y, 5.0, epsilon = 1e-6);
    }
}
