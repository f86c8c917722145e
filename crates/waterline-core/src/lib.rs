//! Core types and utilities for water-line gauging.
//!
//! This crate is intentionally small and purely geometric/numeric. It does
//! *not* depend on any concrete image codec or target detector; images are
//! plain row-major `u8` buffers.

mod draw;
mod edges;
mod error;
mod filter;
mod geometry;
mod homography;
mod image;
mod logger;
mod sink;

pub use draw::{draw_cross, draw_polygon, draw_segment};
pub use edges::{edge_mask, sobel_gradients, EdgeMask, GradientField};
pub use error::GeometryError;
pub use filter::{
    dilate, erode, gaussian_blur, median_blur, morph_close, rotate_about, sample_bicubic,
    threshold_binary, upscale2x,
};
pub use geometry::{
    angle_diff_abs, fit_line_tls, median_f64, point_distance, point_mean, rasterize_segment,
    FittedLine, Line, LineEq, Rect, Segment,
};
pub use homography::{estimate_homography, homography_from_quad, Homography};
pub use image::{sample_bilinear, sample_bilinear_checked, GrayImage, GrayImageView};
pub use sink::{DebugSink, NullSink};

#[cfg(feature = "tracing")]
pub use logger::init_tracing;

pub use logger::init_logger;
