/// Errors raised by the geometric and numeric primitives.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum GeometryError {
    #[error("not enough points: got {got}, need at least {need}")]
    NotEnoughPoints { got: usize, need: usize },
    #[error("degenerate geometry: {0}")]
    Degenerate(&'static str),
    #[error("numeric failure in {0}")]
    Numeric(&'static str),
}
