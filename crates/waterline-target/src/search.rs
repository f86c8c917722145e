//! Target search pipeline: coarse whole-target localization, per-corner
//! rotation-template correlation, geometric refinement, and the spacing
//! validity gate, with one bounded retry at doubled resolution.

use log::{debug, info};
use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_core::{
    point_distance, point_mean, upscale2x, DebugSink, GrayImageView, NullSink, Rect,
};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::correlate::{locate_ring, match_template, match_template_peaks, CoarseParams};
use crate::error::TargetSearchError;
use crate::geometry::{TargetGeometry, TargetKind};
use crate::refine::{refine_corner, EdgeContext, RefineParams};
use crate::template::{TemplateLibrary, TemplateParams};

/// Search settings for one target geometry.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TargetSearchParams {
    pub template: TemplateParams,
    pub coarse: CoarseParams,
    pub refine: RefineParams,
    /// Minimum per-corner correlation score.
    pub min_corner_score: f64,
    /// Half-size of the per-corner search box relative to the ring radius.
    pub corner_search_frac: f64,
    /// Spacing validity gate: (max - min) of consecutive inter-corner
    /// distances must stay within this fraction of their mean.
    pub spacing_spread_limit: f64,
    /// Retry once at doubled resolution when refinement or validity fails.
    pub upscale_retry: bool,
    /// Bow-tie grid: minimum node score and scan stride.
    pub grid_min_score: f64,
    pub grid_stride: usize,
}

impl TargetSearchParams {
    pub fn for_geometry(geometry: &TargetGeometry) -> Self {
        Self {
            template: TemplateParams::for_geometry(geometry),
            coarse: CoarseParams::default(),
            refine: RefineParams::default(),
            min_corner_score: 0.40,
            corner_search_frac: 0.35,
            spacing_spread_limit: 0.35,
            upscale_retry: true,
            grid_min_score: 0.55,
            grid_stride: 2,
        }
    }
}

/// Min/max/mean of consecutive point spacings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SpacingStats {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

impl SpacingStats {
    pub fn spread(&self) -> f64 {
        self.max - self.min
    }

    /// True when the spread stays within `limit_frac` of the mean spacing.
    pub fn spread_ok(&self, limit_frac: f64) -> bool {
        self.spread() <= limit_frac * self.mean
    }
}

/// Consecutive spacing statistics; `closed` wraps the last point back to
/// the first (ring ordering).
pub fn corner_spacing_stats(points: &[Point2<f64>], closed: bool) -> Option<SpacingStats> {
    let n = points.len();
    if n < 2 {
        return None;
    }
    let count = if closed { n } else { n - 1 };
    let mut min = f64::INFINITY;
    let mut max = 0.0f64;
    let mut sum = 0.0;
    for i in 0..count {
        let d = point_distance(points[i], points[(i + 1) % n]);
        min = min.min(d);
        max = max.max(d);
        sum += d;
    }
    Some(SpacingStats {
        min,
        max,
        mean: sum / count as f64,
    })
}

/// Result of a successful target search. Corner ordering is the geometry's
/// canonical ordering (clockwise from top-left for the octagon family,
/// row-major for bow-tie grids).
#[derive(Clone, Debug)]
pub struct TargetSearchResult {
    /// Refined corner positions.
    pub corners: Vec<Point2<f64>>,
    /// Correlation positions before geometric refinement.
    pub raw_corners: Vec<Point2<f64>>,
    /// Per-corner correlation scores.
    pub scores: Vec<f64>,
    /// Best-matching template angle per corner, degrees (octagon family;
    /// empty for bow-tie grids).
    pub corner_angles_deg: Vec<f64>,
    /// Centroid of the refined corners.
    pub center: Point2<f64>,
    /// Fiducial orientation, degrees: the top facet's (or top row's) angle.
    pub angle_deg: f64,
    /// Ring radius from the coarse stage; 0 for bow-tie grids.
    pub ring_radius: f64,
    /// True when the result came from the doubled-resolution retry.
    pub upscaled: bool,
}

/// Locates a fiducial target's reference points in a grayscale frame.
pub struct TargetSearcher {
    geometry: TargetGeometry,
    params: TargetSearchParams,
    library: TemplateLibrary,
}

impl TargetSearcher {
    pub fn new(
        geometry: TargetGeometry,
        params: TargetSearchParams,
    ) -> Result<Self, TargetSearchError> {
        let library = TemplateLibrary::build(&geometry, params.template)?;
        Ok(Self {
            geometry,
            params,
            library,
        })
    }

    #[inline]
    pub fn geometry(&self) -> &TargetGeometry {
        &self.geometry
    }

    #[inline]
    pub fn params(&self) -> &TargetSearchParams {
        &self.params
    }

    /// Search the frame (optionally restricted to `region`).
    pub fn search(
        &self,
        img: &GrayImageView<'_>,
        region: Rect,
    ) -> Result<TargetSearchResult, TargetSearchError> {
        self.search_with_sink(img, region, &mut NullSink)
    }

    /// Search with an observability sink receiving intermediate artifacts.
    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img, sink), fields(width = img.width, height = img.height))
    )]
    pub fn search_with_sink(
        &self,
        img: &GrayImageView<'_>,
        region: Rect,
        sink: &mut dyn DebugSink,
    ) -> Result<TargetSearchResult, TargetSearchError> {
        match self.search_once(img, region, sink) {
            Ok(res) => Ok(res),
            Err(err) if self.params.upscale_retry && retry_can_help(&err) => {
                info!("target search failed ({err}); retrying at 2x resolution");
                let big = upscale2x(img);
                let big_region = scale_rect(region, 2.0);
                self.search_upscaled(&big.as_view(), big_region, sink)
                    .map(|mut res| {
                        for p in res.corners.iter_mut().chain(res.raw_corners.iter_mut()) {
                            *p = Point2::new(p.x / 2.0, p.y / 2.0);
                        }
                        res.center = Point2::new(res.center.x / 2.0, res.center.y / 2.0);
                        res.ring_radius /= 2.0;
                        res.upscaled = true;
                        res
                    })
            }
            Err(err) => Err(err),
        }
    }

    fn search_upscaled(
        &self,
        img: &GrayImageView<'_>,
        region: Rect,
        sink: &mut dyn DebugSink,
    ) -> Result<TargetSearchResult, TargetSearchError> {
        let mut params = self.params;
        params.coarse.min_radius *= 2.0;
        params.coarse.max_radius *= 2.0;
        params.coarse.radius_step *= 2.0;
        params.coarse.ring_thickness *= 2.0;
        params.refine.max_shift *= 2.0;
        params.upscale_retry = false;
        let searcher = TargetSearcher {
            geometry: self.geometry,
            params,
            library: self.library.clone(),
        };
        searcher.search_once(img, region, sink)
    }

    fn search_once(
        &self,
        img: &GrayImageView<'_>,
        region: Rect,
        sink: &mut dyn DebugSink,
    ) -> Result<TargetSearchResult, TargetSearchError> {
        let dim = self.params.template.dim;
        let clamped = region.clamped(img.width, img.height);
        if (clamped.width as usize) < dim || (clamped.height as usize) < dim {
            return Err(TargetSearchError::RegionTooSmall {
                width: clamped.width.max(0) as usize,
                height: clamped.height.max(0) as usize,
                dim,
            });
        }

        match self.geometry.kind {
            TargetKind::Octagon | TargetKind::StopSign => self.search_octagon(img, clamped, sink),
            TargetKind::BowTie => self.search_grid(img, clamped, sink),
        }
    }

    fn search_octagon(
        &self,
        img: &GrayImageView<'_>,
        region: Rect,
        sink: &mut dyn DebugSink,
    ) -> Result<TargetSearchResult, TargetSearchError> {
        let fix = locate_ring(img, region, &self.params.coarse)?;
        debug!(
            "coarse ring fix: center ({:.1},{:.1}) radius {:.1} score {:.3}",
            fix.center.x, fix.center.y, fix.radius, fix.score
        );
        sink.note(
            "coarse-ring",
            &[
                ("cx", fix.center.x),
                ("cy", fix.center.y),
                ("radius", fix.radius),
                ("score", fix.score),
            ],
        );

        let dirs = self.geometry.corner_directions();
        let half_box = (self.params.corner_search_frac * fix.radius).max(4.0);
        let band = self.params.coarse.band_tolerance * fix.radius;

        let mut raw = Vec::with_capacity(8);
        let mut scores = Vec::with_capacity(8);
        let mut angles = Vec::with_capacity(8);
        for (k, set) in self.library.sets.iter().enumerate() {
            let expect = Point2::new(
                fix.center.x + fix.radius * dirs[k].0,
                fix.center.y + fix.radius * dirs[k].1,
            );
            let search = Rect::new(
                (expect.x - half_box) as i32,
                (expect.y - half_box) as i32,
                (2.0 * half_box) as i32 + 1,
                (2.0 * half_box) as i32 + 1,
            );

            let mut best: Option<(Point2<f64>, f64, f64)> = None;
            for variant in &set.variants {
                let Some(peak) = match_template(
                    img,
                    &variant.template.as_view(),
                    Some(&variant.mask.as_view()),
                    search,
                    1,
                ) else {
                    continue;
                };
                // Annulus gate: the corner must sit in the plausible band
                // around the ring fix.
                let corner = Point2::new(peak.x + variant.offset.x, peak.y + variant.offset.y);
                let ring_dist = (point_distance(corner, fix.center) - fix.radius).abs();
                if ring_dist > band {
                    continue;
                }
                if best.map_or(true, |(_, s, _)| peak.score > s) {
                    best = Some((corner, peak.score, variant.delta_deg));
                }
            }

            let (corner, score, angle) = best.ok_or(TargetSearchError::CornerNotFound {
                index: k,
                score: -1.0,
            })?;
            if score < self.params.min_corner_score {
                return Err(TargetSearchError::CornerNotFound { index: k, score });
            }
            raw.push(corner);
            scores.push(score);
            angles.push(angle);
        }
        sink.points("corner-correlation", &raw);

        let corners = self.refine_corners_with(img, &raw, sink)?;

        let center = point_mean(&corners);
        let angle_deg = top_facet_angle(&corners);
        info!(
            "target found: center ({:.1},{:.1}) angle {:.2} deg",
            center.x, center.y, angle_deg
        );

        Ok(TargetSearchResult {
            corners,
            raw_corners: raw,
            scores,
            corner_angles_deg: angles,
            center,
            angle_deg,
            ring_radius: fix.radius,
            upscaled: false,
        })
    }

    /// Steps 3-4 of the pipeline alone: refine a known coarse corner ring
    /// and apply the spacing validity gate. Also used when re-extracting
    /// corners after a rotation adjustment.
    pub fn refine_corners(
        &self,
        img: &GrayImageView<'_>,
        coarse: &[Point2<f64>],
    ) -> Result<Vec<Point2<f64>>, TargetSearchError> {
        self.refine_corners_with(img, coarse, &mut NullSink)
    }

    fn refine_corners_with(
        &self,
        img: &GrayImageView<'_>,
        coarse: &[Point2<f64>],
        sink: &mut dyn DebugSink,
    ) -> Result<Vec<Point2<f64>>, TargetSearchError> {
        let n = coarse.len();
        if n < 5 {
            return Err(TargetSearchError::Geometry(
                waterline_core::GeometryError::NotEnoughPoints { got: n, need: 5 },
            ));
        }

        let ctx = EdgeContext::new(img, &self.params.refine);
        let mut refined = Vec::with_capacity(n);
        for k in 0..n {
            let prev = coarse[(k + n - 1) % n];
            let next = coarse[(k + 1) % n];
            refined.push(refine_corner(
                &ctx,
                k,
                prev,
                coarse[k],
                next,
                &self.params.refine,
            )?);
        }
        sink.points("refined-corners", &refined);

        let stats = corner_spacing_stats(&refined, true)
            .ok_or(TargetSearchError::Geometry(
                waterline_core::GeometryError::NotEnoughPoints { got: n, need: 2 },
            ))?;
        if !stats.spread_ok(self.params.spacing_spread_limit) {
            return Err(TargetSearchError::ImplausibleSpacing {
                spread: stats.spread(),
                limit: self.params.spacing_spread_limit * stats.mean,
            });
        }
        Ok(refined)
    }

    fn search_grid(
        &self,
        img: &GrayImageView<'_>,
        region: Rect,
        sink: &mut dyn DebugSink,
    ) -> Result<TargetSearchResult, TargetSearchError> {
        let expected = self.geometry.corner_count();
        let set = &self.library.sets[0];
        let nms_radius = self.params.template.dim as f64 / 2.0;

        // Collect peaks across every rotation variant, then suppress
        // duplicates between variants.
        let mut hits = Vec::new();
        for variant in &set.variants {
            hits.extend(match_template_peaks(
                img,
                &variant.template.as_view(),
                Some(&variant.mask.as_view()),
                region,
                self.params.grid_stride,
                self.params.grid_min_score,
                nms_radius,
            ));
        }
        hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        let mut nodes: Vec<(Point2<f64>, f64)> = Vec::new();
        let r2 = nms_radius * nms_radius;
        for h in hits {
            let p = Point2::new(h.x, h.y);
            if nodes
                .iter()
                .all(|(q, _)| (q.x - p.x).powi(2) + (q.y - p.y).powi(2) > r2)
            {
                nodes.push((p, h.score));
            }
        }

        if nodes.len() < expected {
            return Err(TargetSearchError::GridIncomplete {
                expected,
                found: nodes.len(),
            });
        }
        nodes.truncate(expected);

        // Row-major ordering: sort by y, chunk into rows, sort rows by x.
        let columns = self.geometry.columns as usize;
        nodes.sort_by(|a, b| a.0.y.partial_cmp(&b.0.y).unwrap_or(std::cmp::Ordering::Equal));
        let mut corners = Vec::with_capacity(expected);
        let mut scores = Vec::with_capacity(expected);
        for row in nodes.chunks_mut(columns) {
            row.sort_by(|a, b| a.0.x.partial_cmp(&b.0.x).unwrap_or(std::cmp::Ordering::Equal));
            for (p, s) in row.iter() {
                corners.push(*p);
                scores.push(*s);
            }
        }

        // Per-row spacing validity.
        for row in corners.chunks(columns) {
            if let Some(stats) = corner_spacing_stats(row, false) {
                if !stats.spread_ok(self.params.spacing_spread_limit) {
                    return Err(TargetSearchError::ImplausibleSpacing {
                        spread: stats.spread(),
                        limit: self.params.spacing_spread_limit * stats.mean,
                    });
                }
            }
        }
        sink.points("grid-nodes", &corners);

        let center = point_mean(&corners);
        let angle_deg = if columns >= 2 {
            let first = corners[0];
            let last = corners[columns - 1];
            (last.y - first.y).atan2(last.x - first.x).to_degrees()
        } else {
            0.0
        };

        Ok(TargetSearchResult {
            corners: corners.clone(),
            raw_corners: corners,
            scores,
            corner_angles_deg: Vec::new(),
            center,
            angle_deg,
            ring_radius: 0.0,
            upscaled: false,
        })
    }
}

/// Orientation of the fiducial: angle of the first-to-second corner edge
/// (the octagon's top facet), degrees in pixel coordinates.
pub fn top_facet_angle(corners: &[Point2<f64>]) -> f64 {
    if corners.len() < 2 {
        return 0.0;
    }
    (corners[1].y - corners[0].y)
        .atan2(corners[1].x - corners[0].x)
        .to_degrees()
}

fn retry_can_help(err: &TargetSearchError) -> bool {
    matches!(
        err,
        TargetSearchError::CornerNotFound { .. }
            | TargetSearchError::TooFewEdgePoints { .. }
            | TargetSearchError::ParallelSides { .. }
            | TargetSearchError::ImplausibleSpacing { .. }
            | TargetSearchError::GridIncomplete { .. }
    )
}

fn scale_rect(r: Rect, s: f64) -> Rect {
    if r.is_whole_image() {
        return r;
    }
    Rect::new(
        (r.x as f64 * s) as i32,
        (r.y as f64 * s) as i32,
        (r.width as f64 * s) as i32,
        (r.height as f64 * s) as i32,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn regular_octagon(center: Point2<f64>, radius: f64) -> Vec<Point2<f64>> {
        (0..8)
            .map(|k| {
                let theta = (-112.5 + 45.0 * k as f64).to_radians();
                Point2::new(
                    center.x + radius * theta.cos(),
                    center.y + radius * theta.sin(),
                )
            })
            .collect()
    }

    #[test]
    fn spacing_stats_on_regular_ring() {
        let pts = regular_octagon(Point2::new(400.0, 300.0), 100.0);
        let stats = corner_spacing_stats(&pts, true).expect("stats");
        assert_relative_eq!(stats.min, stats.max, epsilon = 1e-9);
        assert!(stats.spread_ok(0.35));
    }

    #[test]
    fn perturbed_ring_fails_the_gate() {
        let mut pts = regular_octagon(Point2::new(400.0, 300.0), 100.0);
        // Push one corner well past 35% of the mean spacing (~76.5 px).
        pts[3].x += 40.0;
        let stats = corner_spacing_stats(&pts, true).expect("stats");
        assert!(!stats.spread_ok(0.35));
    }

    #[test]
    fn top_facet_of_unrotated_octagon_is_horizontal() {
        let pts = regular_octagon(Point2::new(0.0, 0.0), 50.0);
        assert_relative_eq!(top_facet_angle(&pts), 0.0, epsilon = 1e-9);
    }

    #[test]
    fn flat_region_reports_target_not_found() {
        let img = waterline_core::GrayImage {
            width: 200,
            height: 160,
            data: vec![150u8; 200 * 160],
        };
        let geometry = TargetGeometry::octagon();
        let mut params = TargetSearchParams::for_geometry(&geometry);
        params.coarse.min_radius = 20.0;
        params.coarse.max_radius = 40.0;
        params.upscale_retry = false;
        let searcher = TargetSearcher::new(geometry, params).expect("searcher");
        let err = searcher.search(&img.as_view(), Rect::WHOLE_IMAGE);
        assert!(matches!(err, Err(TargetSearchError::TargetNotFound { .. })));
    }

    #[test]
    fn tiny_region_is_rejected_before_any_search() {
        let img = waterline_core::GrayImage::new(300, 200);
        let geometry = TargetGeometry::octagon();
        let params = TargetSearchParams::for_geometry(&geometry);
        let searcher = TargetSearcher::new(geometry, params).expect("searcher");
        let err = searcher.search(&img.as_view(), Rect::new(10, 10, 12, 12));
        assert!(matches!(err, Err(TargetSearchError::RegionTooSmall { .. })));
    }
}
