//! Line-finder orchestration: preprocess, swath evaluation, point triage,
//! RANSAC ensemble, and the single outlier-trim retry.

use log::{debug, info};
use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};

use waterline_core::{median_f64, DebugSink, GrayImageView, NullSink, Segment};

#[cfg(feature = "tracing")]
use tracing::instrument;

use crate::error::LineFindError;
use crate::profile::{evaluate_swath, preprocess, PreprocessParams};
use crate::ransac::{ransac_line, RansacParams};
use crate::result::{CalcLinePoints, LineFindResult};

/// Line-finder settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct LineFindParams {
    pub preprocess: PreprocessParams,
    /// Number of contiguous swaths the search-line fan is split into.
    pub swath_count: usize,
    /// Minimum first-difference magnitude (mean gray levels per row) for a
    /// swath to yield a candidate.
    pub min_edge_strength: f64,
    /// Triage: maximum vertical deviation from the candidate median.
    pub triage_max_dev: f64,
    /// Minimum candidates kept through triage and the retry trim.
    pub min_points: usize,
    pub ransac: RansacParams,
}

impl Default for LineFindParams {
    fn default() -> Self {
        Self {
            preprocess: PreprocessParams::default(),
            swath_count: 10,
            min_edge_strength: 2.0,
            triage_max_dev: 20.0,
            min_points: 5,
            ransac: RansacParams::default(),
        }
    }
}

/// Locates the water-edge line along a calibrated search-line fan.
///
/// The RNG drives RANSAC subset sampling only; it is seeded from the OS
/// once per finder. Results are deterministic for a fixed seed
/// ([`LineFinder::with_seed`]).
pub struct LineFinder {
    params: LineFindParams,
    rng: StdRng,
}

impl LineFinder {
    pub fn new(params: LineFindParams) -> Self {
        Self {
            params,
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic finder for tests and reproducibility studies.
    pub fn with_seed(params: LineFindParams, seed: u64) -> Self {
        Self {
            params,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    #[inline]
    pub fn params(&self) -> &LineFindParams {
        &self.params
    }

    /// Find the water edge in a frame along the supplied search lines.
    ///
    /// `Err` only on precondition failures; an unsuccessful search returns
    /// `Ok` with `find_success = false` and diagnostics populated.
    pub fn find(
        &mut self,
        img: &GrayImageView<'_>,
        search_lines: &[Segment],
    ) -> Result<LineFindResult, LineFindError> {
        self.find_with_sink(img, search_lines, &mut NullSink)
    }

    #[cfg_attr(
        feature = "tracing",
        instrument(level = "info", skip(self, img, search_lines, sink), fields(lines = search_lines.len()))
    )]
    pub fn find_with_sink(
        &mut self,
        img: &GrayImageView<'_>,
        search_lines: &[Segment],
        sink: &mut dyn DebugSink,
    ) -> Result<LineFindResult, LineFindError> {
        if search_lines.is_empty() {
            return Err(LineFindError::NoSearchLines);
        }
        let inside = |p: &Point2<f64>| {
            p.x >= 0.0 && p.y >= 0.0 && p.x < img.width as f64 && p.y < img.height as f64
        };
        if !search_lines
            .iter()
            .any(|s| inside(&s.top) || inside(&s.bottom))
        {
            return Err(LineFindError::LinesOutsideFrame {
                width: img.width,
                height: img.height,
            });
        }

        let cleaned = preprocess(img, &self.params.preprocess);
        let view = cleaned.as_view();
        sink.image("find-preprocessed", &view);

        let mut result = LineFindResult::default();

        // Swath evaluation: one candidate point per swath.
        let swaths = self.params.swath_count.max(1);
        let chunk = search_lines.len().div_ceil(swaths);
        for lines in search_lines.chunks(chunk) {
            let (cand, diag) = evaluate_swath(&view, lines, self.params.min_edge_strength);
            result.row_sum_profile.extend(diag.row_sums);
            result.first_derivative.extend(diag.first_derivative);
            result.second_derivative.extend(diag.second_derivative);
            if let Some(c) = cand {
                result.found_points.push(c.point);
            }
        }
        sink.points("swath-candidates", &result.found_points);

        if result.found_points.len() < self.params.min_points {
            debug!(
                "line find: only {} swath candidates (need {})",
                result.found_points.len(),
                self.params.min_points
            );
            return Ok(result);
        }

        // Triage: drop swaths that locked onto an unrelated artifact.
        let ys: Vec<f64> = result.found_points.iter().map(|p| p.y).collect();
        let med = median_f64(&ys);
        let triaged: Vec<Point2<f64>> = result
            .found_points
            .iter()
            .copied()
            .filter(|p| (p.y - med).abs() <= self.params.triage_max_dev)
            .collect();
        if triaged.len() < self.params.min_points {
            return Ok(result);
        }

        let fit = match ransac_line(&triaged, &self.params.ransac, &mut self.rng) {
            Some(fit) => {
                result.used_points = triaged;
                Some(fit)
            }
            None => {
                // Bounded retry: drop the candidates farthest from the
                // median and try once more with the smaller set.
                let trimmed = trim_farthest_from_median(&triaged, self.params.min_points);
                sink.points("retry-candidates", &trimmed);
                match ransac_line(&trimmed, &self.params.ransac, &mut self.rng) {
                    Some(fit) => {
                        result.used_points = trimmed;
                        Some(fit)
                    }
                    None => None,
                }
            }
        };

        let Some(fit) = fit else {
            info!("line find failed: angle gate starved the RANSAC ensemble");
            return Ok(result);
        };

        // Evaluate the fitted line across the full fan extent. The fan is
        // non-empty (checked on entry).
        let slope = fit.angle_deg.to_radians().tan();
        let first = &search_lines[0];
        let last = &search_lines[search_lines.len() - 1];
        let x_left = first.top.x.min(first.bottom.x);
        let x_right = last.top.x.max(last.bottom.x);
        let y_at = |x: f64| fit.center.y + slope * (x - fit.center.x);

        result.calc_line = Some(CalcLinePoints {
            left: Point2::new(x_left, y_at(x_left)),
            center: fit.center,
            right: Point2::new(x_right, y_at(x_right)),
            angle_deg: fit.angle_deg,
        });
        result.find_success = true;
        result.trials_accepted = fit.accepted;
        info!(
            "line found at y {:.2}, angle {:.2} deg ({} trials)",
            fit.center.y, fit.angle_deg, fit.accepted
        );
        Ok(result)
    }
}

/// Keep at least `min_keep` points, dropping those farthest from the median
/// y first.
fn trim_farthest_from_median(points: &[Point2<f64>], min_keep: usize) -> Vec<Point2<f64>> {
    let ys: Vec<f64> = points.iter().map(|p| p.y).collect();
    let med = median_f64(&ys);
    let mut ranked: Vec<Point2<f64>> = points.to_vec();
    ranked.sort_by(|a, b| {
        (a.y - med)
            .abs()
            .partial_cmp(&(b.y - med).abs())
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let keep = min_keep.max(ranked.len().saturating_sub(ranked.len() / 3));
    ranked.truncate(keep.min(ranked.len()));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterline_core::GrayImage;

    /// Water scene: bright above, dark below a gently sloped boundary.
    fn sloped_scene(w: usize, h: usize, y0: f64, slope: f64) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let edge = y0 + slope * x as f64;
                img.set(x, y, if (y as f64) < edge { 210 } else { 45 });
            }
        }
        img
    }

    fn fan(x0: usize, count: usize, y_top: f64, y_bot: f64) -> Vec<Segment> {
        (0..count)
            .map(|i| {
                let x = (x0 + i) as f64;
                Segment::new(Point2::new(x, y_top), Point2::new(x, y_bot))
            })
            .collect()
    }

    #[test]
    fn finds_a_gently_sloped_water_line() {
        let img = sloped_scene(320, 240, 120.0, 0.05);
        let lines = fan(40, 200, 40.0, 220.0);
        let mut finder = LineFinder::with_seed(LineFindParams::default(), 11);
        let res = finder.find(&img.as_view(), &lines).expect("find");
        assert!(res.find_success);
        let line = res.calc_line.expect("line");

        // Expected angle: atan(0.05) ~ 2.86 deg, well inside the gate.
        assert!((line.angle_deg - 2.86).abs() < 1.0, "angle {}", line.angle_deg);
        // Expected edge at the fan center (x ~ 139.5): y ~ 127.
        assert!(
            (line.center.y - (120.0 + 0.05 * 139.5)).abs() < 3.0,
            "center {:?}",
            line.center
        );
        assert!(line.left.x < line.right.x);
        assert!(res.trials_accepted >= 9);
        assert!(!res.row_sum_profile.is_empty());
    }

    #[test]
    fn steep_boundary_fails_but_keeps_diagnostics() {
        // ~14 degrees: every fit lands outside the angle gate.
        let img = sloped_scene(320, 240, 80.0, 0.25);
        let lines = fan(40, 200, 20.0, 220.0);
        let mut finder = LineFinder::with_seed(LineFindParams::default(), 3);
        let res = finder.find(&img.as_view(), &lines).expect("find");
        assert!(!res.find_success);
        assert!(res.calc_line.is_none());
        assert!(!res.found_points.is_empty());
        assert!(!res.row_sum_profile.is_empty());
    }

    #[test]
    fn featureless_frame_fails_gracefully() {
        let img = GrayImage {
            width: 320,
            height: 240,
            data: vec![128u8; 320 * 240],
        };
        let lines = fan(40, 200, 40.0, 220.0);
        let mut finder = LineFinder::with_seed(LineFindParams::default(), 5);
        let res = finder.find(&img.as_view(), &lines).expect("find");
        assert!(!res.find_success);
        assert!(res.found_points.is_empty());
        assert!(!res.row_sum_profile.is_empty(), "diagnostics still populated");
    }

    #[test]
    fn empty_fan_is_a_precondition_error() {
        let img = GrayImage::new(64, 64);
        let mut finder = LineFinder::with_seed(LineFindParams::default(), 1);
        assert!(matches!(
            finder.find(&img.as_view(), &[]),
            Err(LineFindError::NoSearchLines)
        ));
    }

    #[test]
    fn trim_keeps_the_closest_to_median() {
        let pts: Vec<Point2<f64>> = vec![
            Point2::new(0.0, 100.0),
            Point2::new(1.0, 101.0),
            Point2::new(2.0, 99.0),
            Point2::new(3.0, 100.5),
            Point2::new(4.0, 100.2),
            Point2::new(5.0, 160.0),
        ];
        let out = trim_farthest_from_median(&pts, 5);
        assert_eq!(out.len(), 5);
        assert!(out.iter().all(|p| p.y < 150.0));
    }
}
