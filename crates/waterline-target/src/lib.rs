//! Fiducial target search for water-line gauging.
//!
//! Locates the reference corners of a known fiducial (octagon, stop-sign,
//! or bow-tie grid) under unknown rotation and translation:
//!
//! 1. Coarse whole-target localization: octagon-ring templates at
//!    increasing radii, correlated over the search region.
//! 2. Per-corner rotation-template correlation: `2k+1` rotated variants per
//!    corner position, gated to the plausible annulus band.
//! 3. Geometric refinement: line fits to the edges along the two sides
//!    meeting at each corner, intersected for a sub-pixel estimate.
//! 4. A spacing validity gate, with one bounded retry at 2x resolution.

mod correlate;
mod error;
mod geometry;
mod refine;
mod search;
mod template;

pub use correlate::{
    locate_ring, match_template, match_template_peaks, octagon_ring_template, CoarseFix,
    CoarseParams, MatchPeak,
};
pub use error::TargetSearchError;
pub use geometry::{TargetGeometry, TargetKind};
pub use refine::{refine_corner, EdgeContext, RefineParams};
pub use search::{
    corner_spacing_stats, top_facet_angle, SpacingStats, TargetSearchParams, TargetSearchResult,
    TargetSearcher,
};
pub use template::{
    render_polygon_mask, CornerTemplate, TemplateLibrary, TemplateParams, TemplateSet,
};
