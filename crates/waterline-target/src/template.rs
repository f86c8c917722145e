//! Rotation-template library.
//!
//! For every corner position of the target, build `2k+1` correlation
//! template/mask pairs covering rotations of `-k..=k` degrees. Templates are
//! drawn as filled polygons at the base orientation, rotated with bicubic
//! resampling, and thresholded back to binary; the per-variant offset maps
//! the correlation peak (patch center) back onto the true corner location.

use nalgebra::{Point2, Vector2};
use serde::{Deserialize, Serialize};

use waterline_core::{rotate_about, threshold_binary, GrayImage};

use crate::error::TargetSearchError;
use crate::geometry::{TargetGeometry, TargetKind};

/// Template synthesis settings.
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct TemplateParams {
    /// Patch side length in pixels (odd). Defaults to the geometry's value.
    pub dim: usize,
    /// Rotation half-range `k`: variants cover `-k..=k` steps.
    pub rotation_count: usize,
    /// Angular step between variants, degrees.
    pub rotation_step_deg: f64,
}

impl TemplateParams {
    pub fn for_geometry(geometry: &TargetGeometry) -> Self {
        Self {
            dim: geometry.template_dim(),
            rotation_count: 5,
            rotation_step_deg: 1.0,
        }
    }
}

/// One rotated template variant.
#[derive(Clone, Debug)]
pub struct CornerTemplate {
    /// Binary patch: target body 0, background 255.
    pub template: GrayImage,
    /// Valid-pixel mask: 255 where the rotated patch carries real data.
    pub mask: GrayImage,
    /// Correlation peak (patch center) to corner displacement.
    pub offset: Vector2<f64>,
    /// Rotation of this variant relative to the set's base angle, degrees.
    pub delta_deg: f64,
}

/// All rotation variants for one corner position.
#[derive(Clone, Debug)]
pub struct TemplateSet {
    pub corner_index: usize,
    /// Base orientation of this corner's wedge, degrees.
    pub base_angle_deg: f64,
    pub variants: Vec<CornerTemplate>,
}

/// The full library: one set per corner position.
#[derive(Clone, Debug)]
pub struct TemplateLibrary {
    pub params: TemplateParams,
    pub sets: Vec<TemplateSet>,
}

impl TemplateLibrary {
    /// Build the library for a target geometry.
    pub fn build(
        geometry: &TargetGeometry,
        params: TemplateParams,
    ) -> Result<Self, TargetSearchError> {
        if params.dim < 15 || params.dim % 2 == 0 {
            return Err(TargetSearchError::TemplateDimension(params.dim));
        }
        if params.rotation_count < 1 {
            return Err(TargetSearchError::RotationCount(params.rotation_count));
        }

        let sets = match geometry.kind {
            TargetKind::Octagon | TargetKind::StopSign => {
                let (base, corner_shift) = draw_octagon_wedge(params.dim);
                (0..8)
                    .map(|k| {
                        let base_angle = 45.0 * k as f64;
                        build_set(&base, corner_shift, k, base_angle, &params)
                    })
                    .collect()
            }
            TargetKind::BowTie => {
                let base = draw_bow_tie(params.dim);
                vec![build_set(&base, Vector2::zeros(), 0, 0.0, &params)]
            }
        };

        Ok(Self { params, sets })
    }

    /// Total number of template variants across all sets.
    pub fn variant_count(&self) -> usize {
        self.sets.iter().map(|s| s.variants.len()).sum()
    }
}

fn build_set(
    base: &GrayImage,
    corner_shift: Vector2<f64>,
    corner_index: usize,
    base_angle_deg: f64,
    params: &TemplateParams,
) -> TemplateSet {
    let k = params.rotation_count as i64;
    let dim = params.dim;
    let c = (dim / 2) as f32;

    // Coverage patch: all-valid before rotation; rotation drags zero padding
    // in from the patch corners, which the threshold then masks out.
    let coverage = GrayImage {
        width: dim,
        height: dim,
        data: vec![255u8; dim * dim],
    };

    let mut variants = Vec::with_capacity((2 * k + 1) as usize);
    for step in -k..=k {
        let delta = step as f64 * params.rotation_step_deg;
        let angle = (base_angle_deg + delta) as f32;

        let rotated = rotate_about(&base.as_view(), angle, c, c);
        let template = threshold_binary(&rotated.as_view(), 128);

        let cov = rotate_about(&coverage.as_view(), angle, c, c);
        let mask = threshold_binary(&cov.as_view(), 250);

        // The drawn corner rides along with the patch rotation.
        let rad = (base_angle_deg + delta).to_radians();
        let (sin, cos) = rad.sin_cos();
        let offset = Vector2::new(
            cos * corner_shift.x - sin * corner_shift.y,
            sin * corner_shift.x + cos * corner_shift.y,
        );

        variants.push(CornerTemplate {
            template,
            mask,
            offset,
            delta_deg: delta,
        });
    }

    TemplateSet {
        corner_index,
        base_angle_deg,
        variants,
    }
}

/// Fill a polygon with `value` by even-odd scanline (handles the non-convex
/// chevron shapes as well as plain convex outlines).
pub(crate) fn fill_polygon(img: &mut GrayImage, pts: &[Point2<f64>], value: u8) {
    let h = img.height as i32;
    let w = img.width as i32;
    for y in 0..h {
        let yc = y as f64 + 0.5;
        let mut xs: Vec<f64> = Vec::with_capacity(8);
        for i in 0..pts.len() {
            let a = pts[i];
            let b = pts[(i + 1) % pts.len()];
            if (a.y <= yc && b.y > yc) || (b.y <= yc && a.y > yc) {
                xs.push(a.x + (yc - a.y) / (b.y - a.y) * (b.x - a.x));
            }
        }
        xs.sort_by(|p, q| p.partial_cmp(q).unwrap_or(std::cmp::Ordering::Equal));
        for span in xs.chunks_exact(2) {
            let x0 = (span[0].ceil() as i32).clamp(0, w);
            let x1 = (span[1].floor() as i32 + 1).clamp(0, w);
            for x in x0..x1 {
                img.set(x as usize, y as usize, value);
            }
        }
    }
}

/// Render a filled polygon as a standalone mask image: body dark on a
/// light ground. Used when corners must be re-extracted from a
/// synthetically rotated copy of the fiducial.
pub fn render_polygon_mask(width: usize, height: usize, corners: &[Point2<f64>]) -> GrayImage {
    let mut img = GrayImage {
        width,
        height,
        data: vec![255u8; width * height],
    };
    fill_polygon(&mut img, corners, 0);
    img
}

/// Draw the canonical octagon corner chevron (corner 0: top-left of the
/// flat top facet, pixel y down) and return the patch plus the corner's
/// displacement from the patch center.
///
/// The target outline is a stroked octagon, so the corner shape is the bent
/// stroke: two arms of width `dim/5` running along the top facet (+x) and
/// the upper-left facet (135 deg). The corner sits shifted outward along
/// its bisector so both arms get room in the patch; the returned shift
/// recenters matches onto the corner.
fn draw_octagon_wedge(dim: usize) -> (GrayImage, Vector2<f64>) {
    let mut img = GrayImage {
        width: dim,
        height: dim,
        data: vec![255u8; dim * dim],
    };
    let c = dim as f64 / 2.0;

    // Outward bisector of corner 0 points up-left at pixel angle -112.5 deg.
    let bis = (-112.5_f64).to_radians();
    let shift = dim as f64 / 6.0;
    let corner = Point2::new(c + shift * bis.cos(), c + shift * bis.sin());

    // Arm directions and their interior normals (toward the octagon body).
    let len = dim as f64 * 1.6;
    let stroke = dim as f64 / 5.0;
    let d1 = (1.0, 0.0);
    let n1 = (0.0, 1.0);
    let d2 = (135.0_f64.to_radians().cos(), 135.0_f64.to_radians().sin());
    let n2 = (45.0_f64.to_radians().cos(), 45.0_f64.to_radians().sin());

    let a_out = Point2::new(corner.x + len * d1.0, corner.y + len * d1.1);
    let a_in = Point2::new(a_out.x + stroke * n1.0, a_out.y + stroke * n1.1);
    let b_out = Point2::new(corner.x + len * d2.0, corner.y + len * d2.1);
    let b_in = Point2::new(b_out.x + stroke * n2.0, b_out.y + stroke * n2.1);

    // Miter join: the inner corner sits along the inward bisector at
    // stroke / sin(135 deg / 2).
    let bis_in = (67.5_f64.to_radians().cos(), 67.5_f64.to_radians().sin());
    let miter = stroke / (67.5_f64.to_radians()).sin();
    let c_in = Point2::new(corner.x + miter * bis_in.0, corner.y + miter * bis_in.1);

    fill_polygon(&mut img, &[a_out, corner, b_out, b_in, c_in, a_in], 0);

    (
        img,
        Vector2::new(corner.x - c, corner.y - c),
    )
}

/// Draw a centered bow-tie: two filled triangles meeting at the patch center.
fn draw_bow_tie(dim: usize) -> GrayImage {
    let mut img = GrayImage {
        width: dim,
        height: dim,
        data: vec![255u8; dim * dim],
    };
    let c = dim as f64 / 2.0;
    let s = dim as f64 * 0.45;
    let center = Point2::new(c, c);

    fill_polygon(
        &mut img,
        &[center, Point2::new(c - s, c - s), Point2::new(c - s, c + s)],
        0,
    );
    fill_polygon(
        &mut img,
        &[center, Point2::new(c + s, c - s), Point2::new(c + s, c + s)],
        0,
    );
    img
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn octagon_library_has_eight_sets_of_2k_plus_1() {
        let g = TargetGeometry::octagon();
        let lib = TemplateLibrary::build(&g, TemplateParams::for_geometry(&g)).expect("build");
        assert_eq!(lib.sets.len(), 8);
        for set in &lib.sets {
            assert_eq!(set.variants.len(), 11);
        }
        assert_eq!(lib.variant_count(), 88);
    }

    #[test]
    fn small_or_even_dimension_is_a_configuration_error() {
        let g = TargetGeometry::octagon();
        let mut p = TemplateParams::for_geometry(&g);
        p.dim = 13;
        assert!(matches!(
            TemplateLibrary::build(&g, p),
            Err(TargetSearchError::TemplateDimension(13))
        ));
        p.dim = 24;
        assert!(TemplateLibrary::build(&g, p).is_err());
        p.dim = 25;
        p.rotation_count = 0;
        assert!(matches!(
            TemplateLibrary::build(&g, p),
            Err(TargetSearchError::RotationCount(0))
        ));
    }

    #[test]
    fn templates_contain_both_body_and_background() {
        let g = TargetGeometry::octagon();
        let lib = TemplateLibrary::build(&g, TemplateParams::for_geometry(&g)).expect("build");
        for set in &lib.sets {
            for v in &set.variants {
                let dark = v.template.data.iter().filter(|&&p| p == 0).count();
                let light = v.template.data.iter().filter(|&&p| p == 255).count();
                assert!(dark > 20, "corner {} lacks body pixels", set.corner_index);
                assert!(light > 20, "corner {} lacks background", set.corner_index);
            }
        }
    }

    #[test]
    fn unrotated_mask_is_fully_valid() {
        let g = TargetGeometry::octagon();
        let lib = TemplateLibrary::build(&g, TemplateParams::for_geometry(&g)).expect("build");
        // Set 0's middle variant is the unrotated base.
        let mid = &lib.sets[0].variants[5];
        assert_eq!(mid.delta_deg, 0.0);
        assert!(mid.mask.data.iter().all(|&m| m == 255));
    }

    #[test]
    fn rotated_mask_loses_patch_corners() {
        let g = TargetGeometry::octagon();
        let lib = TemplateLibrary::build(&g, TemplateParams::for_geometry(&g)).expect("build");
        // Any 45-degree-offset set rotates the coverage patch, so its
        // corners fall outside the original data.
        let v = &lib.sets[1].variants[5];
        assert_eq!(v.mask.get(0, 0), 0);
        let valid = v.mask.data.iter().filter(|&&m| m == 255).count();
        assert!(valid > v.mask.data.len() / 2);
    }

    #[test]
    fn offsets_rotate_with_the_set() {
        let g = TargetGeometry::octagon();
        let lib = TemplateLibrary::build(&g, TemplateParams::for_geometry(&g)).expect("build");
        let o0 = lib.sets[0].variants[5].offset;
        let o2 = lib.sets[2].variants[5].offset;
        // Corner 2's wedge is corner 0's rotated by 90 degrees.
        assert!((o2.x + o0.y).abs() < 1e-9);
        assert!((o2.y - o0.x).abs() < 1e-9);
        let len0 = o0.norm();
        for set in &lib.sets {
            for v in &set.variants {
                assert!((v.offset.norm() - len0).abs() < 1e-9);
            }
        }
    }

    #[test]
    fn bow_tie_library_has_one_set() {
        let g = TargetGeometry::bow_tie(4, 2);
        let lib = TemplateLibrary::build(&g, TemplateParams::for_geometry(&g)).expect("build");
        assert_eq!(lib.sets.len(), 1);
        assert_eq!(lib.sets[0].variants.len(), 11);
        let mid = &lib.sets[0].variants[5];
        let dark = mid.template.data.iter().filter(|&&p| p == 0).count();
        assert!(dark > 30);
    }
}
