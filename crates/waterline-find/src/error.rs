use waterline_core::GeometryError;

/// Precondition failures of the line finder. Algorithmic failure (no line
/// found) is not an error: the result reports `find_success = false` with
/// diagnostics populated.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum LineFindError {
    #[error("no search lines supplied")]
    NoSearchLines,
    #[error("search lines do not intersect the frame {width}x{height}")]
    LinesOutsideFrame { width: usize, height: usize },
    #[error(transparent)]
    Geometry(#[from] GeometryError),
}
