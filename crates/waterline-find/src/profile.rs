//! Swath row-sum profiling.
//!
//! Search lines are grouped into contiguous swaths; intensities sampled
//! along every line of a swath are summed per row so a single noisy line
//! cannot fake an edge. The strongest first-difference of the median
//! filtered profile marks the candidate row, refined to sub-pixel with a
//! parabolic fit.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_core::{
    gaussian_blur, median_blur, morph_close, sample_bilinear, GrayImage, GrayImageView, Segment,
};

/// Preprocessing settings for the line finder.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct PreprocessParams {
    pub gaussian_sigma: f32,
    pub median_radius: usize,
    pub close_radius: usize,
}

impl Default for PreprocessParams {
    fn default() -> Self {
        Self {
            gaussian_sigma: 1.5,
            median_radius: 2,
            close_radius: 1,
        }
    }
}

/// Suppress noise and biofouling speckle while keeping the water edge:
/// gaussian blur, median blur, then a morphological close.
pub fn preprocess(img: &GrayImageView<'_>, params: &PreprocessParams) -> GrayImage {
    let blurred = gaussian_blur(img, params.gaussian_sigma);
    let filtered = median_blur(&blurred.as_view(), params.median_radius);
    morph_close(&filtered.as_view(), params.close_radius)
}

/// Candidate edge point extracted from one swath.
#[derive(Clone, Copy, Debug)]
pub struct SwathCandidate {
    pub point: Point2<f64>,
    /// First-difference magnitude at the detected row.
    pub strength: f64,
}

/// Diagnostic series of one swath evaluation.
#[derive(Clone, Debug, Default)]
pub struct SwathProfile {
    pub row_sums: Vec<Point2<f64>>,
    pub first_derivative: Vec<Point2<f64>>,
    pub second_derivative: Vec<Point2<f64>>,
}

/// Median filter over a 1-D profile (window `2r+1`, clamped borders).
fn median_filter_profile(values: &[f64], radius: usize) -> Vec<f64> {
    let n = values.len();
    let mut out = Vec::with_capacity(n);
    let mut window: Vec<f64> = Vec::with_capacity(2 * radius + 1);
    for i in 0..n {
        window.clear();
        let lo = i.saturating_sub(radius);
        let hi = (i + radius).min(n - 1);
        window.extend_from_slice(&values[lo..=hi]);
        window.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
        out.push(window[window.len() / 2]);
    }
    out
}

/// Evaluate one swath of search lines.
///
/// Returns the candidate point (swath center x, refined edge y) plus the
/// diagnostic profile series. `None` candidate when the profile carries no
/// discontinuity of at least `min_edge_strength` mean gray levels per row.
pub fn evaluate_swath(
    img: &GrayImageView<'_>,
    lines: &[Segment],
    min_edge_strength: f64,
) -> (Option<SwathCandidate>, SwathProfile) {
    let mut diag = SwathProfile::default();
    if lines.is_empty() {
        return (None, diag);
    }

    let mean_len =
        lines.iter().map(Segment::length).sum::<f64>() / lines.len() as f64;
    let rows = mean_len.round().max(8.0) as usize;

    // Mean intensity per fractional row across all lines in the swath.
    let mut profile = Vec::with_capacity(rows);
    for i in 0..rows {
        let t = i as f64 / (rows - 1) as f64;
        let mut sum = 0.0;
        for line in lines {
            let p = line.at(t);
            sum += sample_bilinear(img, p.x as f32, p.y as f32) as f64;
        }
        profile.push(sum / lines.len() as f64);
    }

    let smoothed = median_filter_profile(&profile, 2);
    let diffs: Vec<f64> = smoothed.windows(2).map(|w| w[1] - w[0]).collect();
    let second: Vec<f64> = diffs.windows(2).map(|w| w[1] - w[0]).collect();

    for (i, v) in smoothed.iter().enumerate() {
        diag.row_sums.push(Point2::new(i as f64, *v));
    }
    for (i, v) in diffs.iter().enumerate() {
        diag.first_derivative.push(Point2::new(i as f64 + 0.5, *v));
    }
    for (i, v) in second.iter().enumerate() {
        diag.second_derivative.push(Point2::new(i as f64 + 1.0, *v));
    }

    // Strongest discontinuity.
    let Some((best_i, best_d)) = diffs
        .iter()
        .enumerate()
        .max_by(|a, b| {
            a.1.abs()
                .partial_cmp(&b.1.abs())
                .unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, d)| (i, *d))
    else {
        return (None, diag);
    };
    if best_d.abs() < min_edge_strength {
        return (None, diag);
    }

    // Parabolic sub-row refinement on the difference magnitudes.
    let m = |i: i64| -> f64 {
        if i < 0 || i as usize >= diffs.len() {
            0.0
        } else {
            diffs[i as usize].abs()
        }
    };
    let prev = m(best_i as i64 - 1);
    let peak = m(best_i as i64);
    let next = m(best_i as i64 + 1);
    let denom = prev - 2.0 * peak + next;
    let delta = if denom.abs() > 1e-9 {
        (0.5 * (prev - next) / denom).clamp(-0.5, 0.5)
    } else {
        0.0
    };

    // The first difference between rows i and i+1 sits at i + 0.5.
    let row = best_i as f64 + 0.5 + delta;
    let t = (row / (rows - 1) as f64).clamp(0.0, 1.0);

    let mut x = 0.0;
    let mut y = 0.0;
    for line in lines {
        let p = line.at(t);
        x += p.x;
        y += p.y;
    }
    let n = lines.len() as f64;

    (
        Some(SwathCandidate {
            point: Point2::new(x / n, y / n),
            strength: best_d.abs(),
        }),
        diag,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use waterline_core::GrayImage;

    /// Bright water above, dark bank below, boundary at `edge_y`.
    fn step_scene(w: usize, h: usize, edge_y: usize) -> GrayImage {
        let mut img = GrayImage::new(w, h);
        for y in 0..h {
            let v = if y < edge_y { 200 } else { 40 };
            for x in 0..w {
                img.set(x, y, v);
            }
        }
        img
    }

    fn vertical_lines(x0: usize, count: usize, y_top: f64, y_bot: f64) -> Vec<Segment> {
        (0..count)
            .map(|i| {
                let x = (x0 + i) as f64;
                Segment::new(Point2::new(x, y_top), Point2::new(x, y_bot))
            })
            .collect()
    }

    #[test]
    fn swath_finds_the_step_row() {
        let img = step_scene(64, 200, 120);
        let lines = vertical_lines(10, 8, 40.0, 180.0);
        let (cand, diag) = evaluate_swath(&img.as_view(), &lines, 2.0);
        let cand = cand.expect("candidate");
        // Rows run from y=40 to y=180; the step at y=120 is row 80.
        assert!(
            (cand.point.y - 120.0).abs() < 2.0,
            "edge at y {:.2}",
            cand.point.y
        );
        assert!((cand.point.x - 13.5).abs() < 1e-6);
        assert!(cand.strength > 20.0);
        assert!(!diag.row_sums.is_empty());
        assert!(diag.first_derivative.len() == diag.row_sums.len() - 1);
    }

    #[test]
    fn flat_swath_yields_no_candidate_but_diagnostics() {
        let img = GrayImage {
            width: 64,
            height: 200,
            data: vec![128u8; 64 * 200],
        };
        let lines = vertical_lines(5, 6, 20.0, 180.0);
        let (cand, diag) = evaluate_swath(&img.as_view(), &lines, 2.0);
        assert!(cand.is_none());
        assert!(!diag.row_sums.is_empty());
    }

    #[test]
    fn median_filter_rejects_profile_spikes() {
        let mut v = vec![10.0; 21];
        v[7] = 250.0;
        let out = median_filter_profile(&v, 2);
        assert!(out.iter().all(|&x| (x - 10.0).abs() < 1e-9));
    }
}
