//! Robust line fitting: random minimal subsets, total-least-squares fits,
//! a hard angle gate, and trimmed-mean ensembling of the accepted trials.

use nalgebra::Point2;
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};

use waterline_core::fit_line_tls;

/// RANSAC settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct RansacParams {
    /// Accepted line-angle band, degrees. A water surface cannot be far
    /// from horizontal in a calibrated scene, so fits outside the band are
    /// rejected no matter how small their residual.
    pub min_angle_deg: f64,
    pub max_angle_deg: f64,
    /// Points per trial fit.
    pub sample_size: usize,
    /// Hard trial cap.
    pub max_trials: usize,
    /// Early exit once this many trials were accepted.
    pub target_accepted: usize,
    /// Minimum accepted trials for the ensemble to count.
    pub min_accepted: usize,
}

impl Default for RansacParams {
    fn default() -> Self {
        Self {
            min_angle_deg: -9.0,
            max_angle_deg: 9.0,
            sample_size: 5,
            max_trials: 100,
            target_accepted: 50,
            min_accepted: 9,
        }
    }
}

/// One accepted trial fit.
#[derive(Clone, Copy, Debug)]
struct TrialFit {
    center: Point2<f64>,
    angle_deg: f64,
}

/// Trimmed-mean ensemble of the accepted trials.
#[derive(Clone, Copy, Debug)]
pub struct EnsembleFit {
    pub center: Point2<f64>,
    pub angle_deg: f64,
    /// Number of accepted trials feeding the ensemble.
    pub accepted: usize,
}

/// Fit a line to the candidates by repeated random minimal-subset
/// total-least-squares fits.
///
/// Returns `None` when fewer than `min_accepted` trials pass the angle
/// gate. Instead of keeping a single best-scoring fit, accepted fits are
/// sorted by vertical center, the top and bottom quartiles dropped, and
/// the remainder averaged.
pub fn ransac_line(
    points: &[Point2<f64>],
    params: &RansacParams,
    rng: &mut StdRng,
) -> Option<EnsembleFit> {
    if points.len() < 2 {
        return None;
    }
    let sample_size = params.sample_size.min(points.len());

    let mut accepted: Vec<TrialFit> = Vec::with_capacity(params.target_accepted);
    let mut indices: Vec<usize> = (0..points.len()).collect();

    for _ in 0..params.max_trials {
        // Partial Fisher-Yates: the first `sample_size` entries become a
        // uniform random subset.
        for i in 0..sample_size {
            let j = rng.random_range(i..indices.len());
            indices.swap(i, j);
        }
        let subset: Vec<Point2<f64>> =
            indices[..sample_size].iter().map(|&i| points[i]).collect();

        let Ok(fit) = fit_line_tls(&subset) else {
            continue;
        };
        if fit.angle_deg < params.min_angle_deg || fit.angle_deg > params.max_angle_deg {
            continue;
        }
        accepted.push(TrialFit {
            center: fit.centroid,
            angle_deg: fit.angle_deg,
        });
        if accepted.len() >= params.target_accepted {
            break;
        }
    }

    if accepted.len() < params.min_accepted {
        return None;
    }

    accepted.sort_by(|a, b| {
        a.center
            .y
            .partial_cmp(&b.center.y)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    let quartile = accepted.len() / 4;
    let kept = &accepted[quartile..accepted.len() - quartile];

    let n = kept.len() as f64;
    let (sx, sy, sa) = kept.iter().fold((0.0, 0.0, 0.0), |(sx, sy, sa), t| {
        (sx + t.center.x, sy + t.center.y, sa + t.angle_deg)
    });

    Some(EnsembleFit {
        center: Point2::new(sx / n, sy / n),
        angle_deg: sa / n,
        accepted: accepted.len(),
    })
}
