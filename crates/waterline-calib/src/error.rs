use waterline_core::GeometryError;
use waterline_target::TargetSearchError;

/// Errors returned by calibration, conversion, and search-line generation.
#[derive(thiserror::Error, Debug)]
pub enum CalibrationError {
    #[error("model is not calibrated")]
    NotCalibrated,
    #[error("frame size {got_width}x{got_height} does not match calibration {want_width}x{want_height}")]
    ImageSizeMismatch {
        got_width: usize,
        got_height: usize,
        want_width: usize,
        want_height: usize,
    },
    #[error("too few correspondences: got {got}, need {need}")]
    TooFewPoints { got: usize, need: usize },
    #[error("pixel/world point counts differ: {pixels} vs {world}")]
    PointCountMismatch { pixels: usize, world: usize },
    #[error("implausible corner spacing: spread {spread:.1} px exceeds {limit:.1} px")]
    Validity { spread: f64, limit: f64 },
    #[error("search line {index} is too short: {length:.1} px < {min:.1} px")]
    SearchLineTooShort {
        index: usize,
        length: f64,
        min: f64,
    },
    #[error("degenerate water-line search region: {0}")]
    SearchRegion(&'static str),
    #[error("operation not supported for this target: {0}")]
    Unsupported(&'static str),
    #[error("calibration file is invalid: {0}")]
    Persistence(String),
    #[error(transparent)]
    Target(#[from] TargetSearchError),
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
