//! Calibration model for water-line gauging.
//!
//! Owns the pixel/world correspondences found on a fiducial target, the
//! forward/inverse homography pair fitted from them, and the derived
//! water-line search geometry (quadrilateral plus sampling-line fan).
//!
//! ## Quickstart
//!
//! ```
//! use nalgebra::Point2;
//! use waterline_calib::{CalibrationControl, CalibrationModel};
//! use waterline_target::TargetGeometry;
//!
//! let control = CalibrationControl::for_target(TargetGeometry::octagon(), 0.7);
//!
//! // Survey-grade correspondences (normally produced by the target search).
//! let pixels: Vec<Point2<f64>> = (0..8)
//!     .map(|k| {
//!         let theta = (-112.5 + 45.0 * k as f64).to_radians();
//!         Point2::new(400.0 + 100.0 * theta.cos(), 300.0 + 100.0 * theta.sin())
//!     })
//!     .collect();
//! let world = control.target.world_points(control.facet_length);
//!
//! let mut model = CalibrationModel::new();
//! model
//!     .calibrate_from_points((800, 600), pixels, world, &control)
//!     .expect("calibration");
//! let stage = model.pixel_to_world(Point2::new(400.0, 380.0)).unwrap();
//! println!("stage: {:.3}", stage.y);
//! ```

mod control;
mod error;
mod io;
mod model;
mod searchlines;

pub use control::CalibrationControl;
pub use error::CalibrationError;
pub use io::{
    from_file, read_model, to_file, write_model, CalibrationFile, PixelToWorldDto, PointPairDto,
    RegionDto, SearchLineDto, WaterlineRegionDto,
};
pub use model::{CalibrationModel, CalibrationOverlay};
pub use searchlines::{generate_search_lines, SearchCorners};
