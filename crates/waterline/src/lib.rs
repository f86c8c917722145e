//! High-level facade crate for the `waterline-*` workspace.
//!
//! This crate provides:
//! - stable re-exports of the underlying crates
//! - (feature-gated) end-to-end helpers that calibrate against a fiducial
//!   target and measure the water-edge line on `image::GrayImage` frames
//!
//! ## Quickstart
//!
//! ```no_run
//! use image::ImageReader;
//! use waterline::detect;
//! use waterline::calib::CalibrationControl;
//! use waterline::target::TargetGeometry;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let frame = ImageReader::open("site.png")?.decode()?.to_luma8();
//! let control = CalibrationControl::for_target(TargetGeometry::octagon(), 0.7);
//!
//! let model = detect::calibrate_frame(&frame, &control)?;
//! let measurement = detect::measure_frame(&frame, &model)?;
//! println!("stage: {:?}", measurement.world_center);
//! # Ok(())
//! # }
//! ```
//!
//! ## API map
//! - [`core`]: image buffers, geometry, homographies, logging.
//! - [`target`]: rotation-template fiducial search.
//! - [`calib`]: the calibration model, search lines, persistence.
//! - [`find`]: robust water-edge line finding.
//! - [`detect`] (feature `image`): end-to-end helpers on `image::GrayImage`.

pub use waterline_calib as calib;
pub use waterline_core as core;
pub use waterline_find as find;
pub use waterline_target as target;

pub use waterline_calib::{CalibrationControl, CalibrationError, CalibrationModel};
pub use waterline_find::{LineFindParams, LineFindResult, LineFinder};
pub use waterline_target::{TargetGeometry, TargetKind};

#[cfg(feature = "image")]
pub mod detect;
