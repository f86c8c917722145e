//! Injected observability sink.
//!
//! Pipeline stages report intermediate artifacts through a caller-supplied
//! sink instead of writing debug images to a global folder. The default
//! sink discards everything.

use nalgebra::Point2;

use crate::image::GrayImageView;

/// Receiver for intermediate diagnostic artifacts. All methods default to
/// no-ops so implementors override only what they need.
pub trait DebugSink {
    /// Scalar observations, e.g. correlation scores or trial counts.
    fn note(&mut self, _stage: &'static str, _values: &[(&'static str, f64)]) {}

    /// Point sequences, e.g. candidate corners or profile samples.
    fn points(&mut self, _stage: &'static str, _points: &[Point2<f64>]) {}

    /// Intermediate image buffers, e.g. preprocessed frames.
    fn image(&mut self, _stage: &'static str, _image: &GrayImageView<'_>) {}
}

/// The default sink: ignores everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl DebugSink for NullSink {}
