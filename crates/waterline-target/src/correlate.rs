//! Masked normalized cross-correlation and the coarse whole-target ring
//! localizer.

use nalgebra::Point2;
use serde::{Deserialize, Serialize};

use waterline_core::{GrayImage, GrayImageView, Rect};

use crate::error::TargetSearchError;
use crate::template::fill_polygon;

/// One correlation peak: template-center position and NCC score in [-1, 1].
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct MatchPeak {
    pub x: f64,
    pub y: f64,
    pub score: f64,
}

/// Normalized cross-correlation of `tpl` against `img` at one center
/// position. `mask` (255 = valid) restricts the evaluated pixels.
/// Returns `None` when the masked patch has no contrast.
fn ncc_at(
    img: &GrayImageView<'_>,
    tpl: &GrayImageView<'_>,
    mask: Option<&GrayImageView<'_>>,
    cx: i32,
    cy: i32,
) -> Option<f64> {
    let half = (tpl.width / 2) as i32;
    let x0 = cx - half;
    let y0 = cy - half;

    let mut n = 0f64;
    let mut sum_i = 0f64;
    let mut sum_t = 0f64;
    for ty in 0..tpl.height {
        for tx in 0..tpl.width {
            if let Some(m) = mask {
                if m.data[ty * m.width + tx] < 128 {
                    continue;
                }
            }
            let iv = img.data[(y0 + ty as i32) as usize * img.width + (x0 + tx as i32) as usize];
            n += 1.0;
            sum_i += iv as f64;
            sum_t += tpl.data[ty * tpl.width + tx] as f64;
        }
    }
    if n < 4.0 {
        return None;
    }
    let mean_i = sum_i / n;
    let mean_t = sum_t / n;

    let mut cross = 0f64;
    let mut var_i = 0f64;
    let mut var_t = 0f64;
    for ty in 0..tpl.height {
        for tx in 0..tpl.width {
            if let Some(m) = mask {
                if m.data[ty * m.width + tx] < 128 {
                    continue;
                }
            }
            let iv = img.data[(y0 + ty as i32) as usize * img.width + (x0 + tx as i32) as usize]
                as f64
                - mean_i;
            let tv = tpl.data[ty * tpl.width + tx] as f64 - mean_t;
            cross += iv * tv;
            var_i += iv * iv;
            var_t += tv * tv;
        }
    }
    if var_i < 1e-9 || var_t < 1e-9 {
        return None;
    }
    Some(cross / (var_i * var_t).sqrt())
}

/// Range of template-center positions keeping the whole patch inside both
/// the image and the (clamped) search rect.
fn center_range(
    img: &GrayImageView<'_>,
    tpl_dim: usize,
    search: Rect,
) -> Option<(i32, i32, i32, i32)> {
    let half = (tpl_dim / 2) as i32;
    let r = search.clamped(img.width, img.height);
    let x0 = r.x.max(half);
    let y0 = r.y.max(half);
    let x1 = (r.x + r.width - 1).min(img.width as i32 - 1 - half);
    let y1 = (r.y + r.height - 1).min(img.height as i32 - 1 - half);
    (x0 <= x1 && y0 <= y1).then_some((x0, y0, x1, y1))
}

/// Best correlation peak of one template over a search rect.
///
/// Scans at `stride`, then re-scans a `stride`-sized neighborhood of the
/// best coarse hit at single-pixel steps.
pub fn match_template(
    img: &GrayImageView<'_>,
    tpl: &GrayImageView<'_>,
    mask: Option<&GrayImageView<'_>>,
    search: Rect,
    stride: usize,
) -> Option<MatchPeak> {
    let (x0, y0, x1, y1) = center_range(img, tpl.width, search)?;
    let stride = stride.max(1) as i32;

    let mut best: Option<MatchPeak> = None;
    let mut cy = y0;
    while cy <= y1 {
        let mut cx = x0;
        while cx <= x1 {
            if let Some(score) = ncc_at(img, tpl, mask, cx, cy) {
                if best.map_or(true, |b| score > b.score) {
                    best = Some(MatchPeak {
                        x: cx as f64,
                        y: cy as f64,
                        score,
                    });
                }
            }
            cx += stride;
        }
        cy += stride;
    }

    let coarse = best?;
    if stride == 1 {
        return Some(coarse);
    }

    let mut best = coarse;
    for cy in (coarse.y as i32 - stride + 1).max(y0)..=(coarse.y as i32 + stride - 1).min(y1) {
        for cx in (coarse.x as i32 - stride + 1).max(x0)..=(coarse.x as i32 + stride - 1).min(x1) {
            if let Some(score) = ncc_at(img, tpl, mask, cx, cy) {
                if score > best.score {
                    best = MatchPeak {
                        x: cx as f64,
                        y: cy as f64,
                        score,
                    };
                }
            }
        }
    }
    Some(best)
}

/// All correlation peaks of one template with score at least `min_score`,
/// non-maximum suppressed with the given radius. Used by the bow-tie grid
/// search where every marker node is a separate peak.
pub fn match_template_peaks(
    img: &GrayImageView<'_>,
    tpl: &GrayImageView<'_>,
    mask: Option<&GrayImageView<'_>>,
    search: Rect,
    stride: usize,
    min_score: f64,
    nms_radius: f64,
) -> Vec<MatchPeak> {
    let Some((x0, y0, x1, y1)) = center_range(img, tpl.width, search) else {
        return Vec::new();
    };
    let stride = stride.max(1) as i32;

    let mut hits: Vec<MatchPeak> = Vec::new();
    let mut cy = y0;
    while cy <= y1 {
        let mut cx = x0;
        while cx <= x1 {
            if let Some(score) = ncc_at(img, tpl, mask, cx, cy) {
                if score >= min_score {
                    hits.push(MatchPeak {
                        x: cx as f64,
                        y: cy as f64,
                        score,
                    });
                }
            }
            cx += stride;
        }
        cy += stride;
    }

    hits.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
    let mut kept: Vec<MatchPeak> = Vec::new();
    let r2 = nms_radius * nms_radius;
    for h in hits {
        if kept
            .iter()
            .all(|k| (k.x - h.x).powi(2) + (k.y - h.y).powi(2) > r2)
        {
            kept.push(h);
        }
    }
    kept
}

/// Coarse whole-target localization settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct CoarseParams {
    /// Smallest octagon circumradius tried, pixels.
    pub min_radius: f64,
    /// Largest octagon circumradius tried, pixels.
    pub max_radius: f64,
    /// Radius increment between ring templates.
    pub radius_step: f64,
    /// Stroke width of the ring template.
    pub ring_thickness: f64,
    /// Minimum acceptable ring NCC score.
    pub min_score: f64,
    /// Scan stride for the whole-region pass.
    pub stride: usize,
    /// Relative width of the annulus band gating per-corner search.
    pub band_tolerance: f64,
}

impl Default for CoarseParams {
    fn default() -> Self {
        Self {
            min_radius: 30.0,
            max_radius: 110.0,
            radius_step: 10.0,
            ring_thickness: 6.0,
            min_score: 0.30,
            stride: 4,
            band_tolerance: 0.20,
        }
    }
}

/// Whole-target fix from the coarse stage.
#[derive(Clone, Copy, Debug)]
pub struct CoarseFix {
    pub center: Point2<f64>,
    pub radius: f64,
    pub score: f64,
}

/// Draw an octagon-outline ring of the given circumradius as a correlation
/// template: stroke dark on a light ground.
pub fn octagon_ring_template(radius: f64, thickness: f64) -> GrayImage {
    let margin = 3.0;
    let mut dim = (2.0 * (radius + thickness + margin)).ceil() as usize;
    if dim % 2 == 0 {
        dim += 1;
    }
    let mut img = GrayImage {
        width: dim,
        height: dim,
        data: vec![255u8; dim * dim],
    };
    let c = dim as f64 / 2.0;

    let octagon = |r: f64| -> Vec<Point2<f64>> {
        (0..8)
            .map(|k| {
                let theta = (-112.5 + 45.0 * k as f64).to_radians();
                Point2::new(c + r * theta.cos(), c + r * theta.sin())
            })
            .collect()
    };

    fill_polygon(&mut img, &octagon(radius + thickness / 2.0), 0);
    fill_polygon(&mut img, &octagon((radius - thickness / 2.0).max(1.0)), 255);
    img
}

/// Correlate ring templates at increasing radii and return the best fix.
///
/// The ring is width-sensitive: an off-scale radius scores poorly, so the
/// winning radius also estimates the target's apparent size.
pub fn locate_ring(
    img: &GrayImageView<'_>,
    region: Rect,
    params: &CoarseParams,
) -> Result<CoarseFix, TargetSearchError> {
    let mut best: Option<CoarseFix> = None;
    let mut best_score_seen: f64 = -1.0;

    let mut radius = params.min_radius;
    while radius <= params.max_radius + 1e-9 {
        let tpl = octagon_ring_template(radius, params.ring_thickness);
        if let Some(peak) = match_template(img, &tpl.as_view(), None, region, params.stride) {
            best_score_seen = best_score_seen.max(peak.score);
            if peak.score >= params.min_score
                && best.map_or(true, |b| peak.score > b.score)
            {
                best = Some(CoarseFix {
                    center: Point2::new(peak.x, peak.y),
                    radius,
                    score: peak.score,
                });
            }
        }
        radius += params.radius_step;
    }

    best.ok_or(TargetSearchError::TargetNotFound {
        best_score: best_score_seen,
    })
}
