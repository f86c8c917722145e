//! Calibration control parameters.
//!
//! Everything a re-calibration needs to run from a persisted model:
//! target shape, physical facet length, datum offset, and search settings.
//! The document round-trips through the `control_json` field of the
//! calibration file.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_core::Rect;
use waterline_target::{TargetGeometry, TargetSearchParams};

/// Parameters steering `CalibrationModel::calibrate`.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CalibrationControl {
    /// Target shape mounted at the site.
    pub target: TargetGeometry,
    /// Physical length of one octagon facet (or bow-tie grid pitch), world
    /// units.
    pub facet_length: f64,
    /// Vertical offset added to world y so stage zero matches the site
    /// datum.
    pub zero_offset: f64,
    /// Restrict the fiducial search; the all `-1` sentinel means the whole
    /// frame.
    #[serde(default = "whole_image")]
    pub target_search_region: Rect,
    /// Explicit water-line search corners (top-left, top-right, bottom-left,
    /// bottom-right). When absent the quadrilateral is derived from the
    /// fiducial's position.
    #[serde(default)]
    pub waterline_corners: Option<[Point2<f64>; 4]>,
    /// Minimum admissible search-line length, pixels.
    #[serde(default = "default_min_line_length")]
    pub min_search_line_length: f64,
    /// Target search settings.
    pub search: TargetSearchParams,
}

fn whole_image() -> Rect {
    Rect::WHOLE_IMAGE
}

fn default_min_line_length() -> f64 {
    40.0
}

impl CalibrationControl {
    /// Defaults for a target geometry and facet length.
    pub fn for_target(target: TargetGeometry, facet_length: f64) -> Self {
        Self {
            target,
            facet_length,
            zero_offset: 0.0,
            target_search_region: Rect::WHOLE_IMAGE,
            waterline_corners: None,
            min_search_line_length: default_min_line_length(),
            search: TargetSearchParams::for_geometry(&target),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterline_target::TargetKind;

    #[test]
    fn control_round_trips_through_json() {
        let mut control = CalibrationControl::for_target(TargetGeometry::octagon(), 0.7);
        control.zero_offset = 2.0;
        control.target_search_region = Rect::new(100, 50, 300, 200);
        control.waterline_corners = Some([
            Point2::new(10.0, 200.0),
            Point2::new(600.0, 210.0),
            Point2::new(12.0, 400.0),
            Point2::new(598.0, 420.0),
        ]);

        let json = serde_json::to_string(&control).expect("serialize");
        let back: CalibrationControl = serde_json::from_str(&json).expect("parse");
        assert_eq!(back.target.kind, TargetKind::Octagon);
        assert_eq!(back.facet_length, 0.7);
        assert_eq!(back.zero_offset, 2.0);
        assert_eq!(back.target_search_region, Rect::new(100, 50, 300, 200));
        assert_eq!(back.waterline_corners.unwrap()[1].x, 600.0);
    }
}
