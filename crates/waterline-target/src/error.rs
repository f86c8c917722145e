use waterline_core::GeometryError;

/// Errors returned by template construction and target search.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum TargetSearchError {
    #[error("template dimension {0} too small (minimum 15, must be odd)")]
    TemplateDimension(usize),
    #[error("rotation count {0} must be at least 1")]
    RotationCount(usize),
    #[error("search region {width}x{height} too small for template dim {dim}")]
    RegionTooSmall {
        width: usize,
        height: usize,
        dim: usize,
    },
    #[error("target outline not found (best ring score {best_score:.3})")]
    TargetNotFound { best_score: f64 },
    #[error("corner {index} not found (best score {score:.3})")]
    CornerNotFound { index: usize, score: f64 },
    #[error("too few edge points near corner {index}: got {got}, need {need}")]
    TooFewEdgePoints {
        index: usize,
        got: usize,
        need: usize,
    },
    #[error("side lines at corner {index} are parallel")]
    ParallelSides { index: usize },
    #[error("implausible corner spacing: spread {spread:.1} px exceeds {limit:.1} px")]
    ImplausibleSpacing { spread: f64, limit: f64 },
    #[error("expected {expected} grid peaks, found {found}")]
    GridIncomplete { expected: usize, found: usize },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
