//! Water-edge line finding.
//!
//! Consumes a frame and the calibration model's search-line fan and
//! produces a robust estimate of the water-edge line:
//!
//! 1. Preprocess: gaussian blur, median blur, morphological close.
//! 2. Swath evaluation: row sums along the lines of each swath, median
//!    filtered, strongest first-difference, parabolic sub-pixel refinement.
//! 3. Triage: drop swath candidates far from the candidate median.
//! 4. RANSAC with a hard angle gate and a trimmed-mean ensemble of the
//!    accepted trials, with one bounded outlier-trim retry.
//!
//! Failures still carry the diagnostic profile series so callers can render
//! a "bad find" frame.

mod error;
mod finder;
mod profile;
mod ransac;
mod result;

pub use error::LineFindError;
pub use finder::{LineFindParams, LineFinder};
pub use profile::{evaluate_swath, preprocess, PreprocessParams, SwathCandidate, SwathProfile};
pub use ransac::{ransac_line, EnsembleFit, RansacParams};
pub use result::{CalcLinePoints, LineFindResult};
