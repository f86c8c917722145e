//! End-to-end helpers over `image::GrayImage` frames.
//!
//! The core crates work on plain row-major buffers; this module adapts
//! `image`-crate frames at the boundary and combines calibration, line
//! finding, and pixel-to-world conversion into one call per frame.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_calib::{CalibrationControl, CalibrationError, CalibrationModel};
use waterline_core::{draw_cross, draw_polygon, draw_segment, GrayImage, GrayImageView};
use waterline_find::{LineFindParams, LineFindResult, LineFinder};

/// Borrow an `image` frame as a core view.
pub fn view_frame(frame: &image::GrayImage) -> GrayImageView<'_> {
    GrayImageView {
        width: frame.width() as usize,
        height: frame.height() as usize,
        data: frame.as_raw(),
    }
}

/// Calibrate a fresh model against the fiducial target in `frame`.
pub fn calibrate_frame(
    frame: &image::GrayImage,
    control: &CalibrationControl,
) -> Result<CalibrationModel, CalibrationError> {
    let mut model = CalibrationModel::new();
    model.calibrate(&view_frame(frame), control)?;
    Ok(model)
}

/// One frame's water-line measurement.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Measurement {
    /// Pixel-space find result, including diagnostics.
    pub result: LineFindResult,
    /// World coordinates of the fitted line's left/center/right points,
    /// present when the find succeeded.
    pub world_left: Option<Point2<f64>>,
    pub world_center: Option<Point2<f64>>,
    pub world_right: Option<Point2<f64>>,
    /// ISO-8601 capture timestamp, when the caller resolved one.
    pub timestamp: Option<String>,
}

/// Measure the water line on a frame using a calibrated model.
pub fn measure_frame(
    frame: &image::GrayImage,
    model: &CalibrationModel,
) -> Result<Measurement, CalibrationError> {
    measure_frame_with(frame, model, &mut LineFinder::new(LineFindParams::default()), None)
}

/// Measure with an explicit finder (custom parameters or a fixed RNG seed)
/// and an optional pre-resolved timestamp.
pub fn measure_frame_with(
    frame: &image::GrayImage,
    model: &CalibrationModel,
    finder: &mut LineFinder,
    timestamp: Option<String>,
) -> Result<Measurement, CalibrationError> {
    let view = view_frame(frame);
    model.check_frame(&view)?;

    let result = finder
        .find(&view, model.search_lines())
        .map_err(|e| CalibrationError::SearchRegion(match e {
            waterline_find::LineFindError::NoSearchLines => "no search lines",
            _ => "search lines do not intersect the frame",
        }))?;

    let mut measurement = Measurement {
        result,
        world_left: None,
        world_center: None,
        world_right: None,
        timestamp,
    };

    if let Some(line) = measurement.result.calc_line {
        measurement.world_left = Some(model.pixel_to_world(line.left)?);
        measurement.world_center = Some(model.pixel_to_world(line.center)?);
        measurement.world_right = Some(model.pixel_to_world(line.right)?);
    }

    Ok(measurement)
}

const OVERLAY_LIGHT: u8 = 255;
const OVERLAY_DARK: u8 = 0;

/// Render a diagnostic overlay frame: calibration geometry, swath
/// candidates, and the fitted line (when present) drawn over a copy of the
/// input. Works for failed finds too, which is the main reason it exists.
pub fn render_overlay(
    frame: &image::GrayImage,
    model: &CalibrationModel,
    result: Option<&LineFindResult>,
) -> image::GrayImage {
    let mut canvas = GrayImage {
        width: frame.width() as usize,
        height: frame.height() as usize,
        data: frame.as_raw().clone(),
    };

    if let Some(overlay) = model.overlay() {
        draw_polygon(&mut canvas, &overlay.target_polygon, OVERLAY_LIGHT);
        let q = overlay.search_quad;
        draw_polygon(&mut canvas, &[q[0], q[1], q[3], q[2]], OVERLAY_LIGHT);
        for line in &overlay.search_lines {
            draw_segment(&mut canvas, line.top, line.bottom, OVERLAY_DARK);
        }
        if let Some((left, right)) = overlay.move_ref {
            draw_cross(&mut canvas, left, 4, OVERLAY_LIGHT);
            draw_cross(&mut canvas, right, 4, OVERLAY_LIGHT);
        }
    }

    if let Some(result) = result {
        for p in &result.found_points {
            draw_cross(&mut canvas, *p, 3, OVERLAY_DARK);
        }
        if let Some(line) = result.calc_line {
            draw_segment(&mut canvas, line.left, line.right, OVERLAY_LIGHT);
            draw_cross(&mut canvas, line.center, 5, OVERLAY_LIGHT);
        }
    }

    image::GrayImage::from_raw(frame.width(), frame.height(), canvas.data)
        .unwrap_or_else(|| frame.clone())
}
