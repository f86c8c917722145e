//! Projective pixel/world mapping.
//!
//! Homographies are estimated with a Hartley-normalized direct linear
//! transform. Exactly four correspondences use the LU-solved 8x8 system;
//! five or more go through the SVD null-space route.

use nalgebra::{DMatrix, Matrix3, Point2, SMatrix, SVector, Vector3};

use crate::error::GeometryError;

/// A 3x3 projective transform between two planes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography {
    pub h: Matrix3<f64>,
}

impl Homography {
    pub fn new(h: Matrix3<f64>) -> Self {
        Self { h }
    }

    pub fn from_array(rows: [[f64; 3]; 3]) -> Self {
        Self::new(Matrix3::from_row_slice(&[
            rows[0][0], rows[0][1], rows[0][2], rows[1][0], rows[1][1], rows[1][2], rows[2][0],
            rows[2][1], rows[2][2],
        ]))
    }

    pub fn to_array(&self) -> [[f64; 3]; 3] {
        [
            [self.h[(0, 0)], self.h[(0, 1)], self.h[(0, 2)]],
            [self.h[(1, 0)], self.h[(1, 1)], self.h[(1, 2)]],
            [self.h[(2, 0)], self.h[(2, 1)], self.h[(2, 2)]],
        ]
    }

    /// Apply the transform. Fails when the point maps to the line at
    /// infinity (homogeneous scale collapses).
    pub fn project(&self, p: Point2<f64>) -> Result<Point2<f64>, GeometryError> {
        let v = self.h * Vector3::new(p.x, p.y, 1.0);
        if v[2].abs() < 1e-12 {
            return Err(GeometryError::Numeric("projective scale collapsed"));
        }
        Ok(Point2::new(v[0] / v[2], v[1] / v[2]))
    }

    pub fn inverse(&self) -> Result<Self, GeometryError> {
        self.h
            .try_inverse()
            .map(Self::new)
            .ok_or(GeometryError::Numeric("homography is singular"))
    }
}

fn similarity_transform(cx: f64, cy: f64, mean_dist: f64) -> Matrix3<f64> {
    let s = if mean_dist > 1e-12 {
        (2.0_f64).sqrt() / mean_dist
    } else {
        1.0
    };
    Matrix3::new(s, 0.0, -s * cx, 0.0, s, -s * cy, 0.0, 0.0, 1.0)
}

/// Hartley normalization: translate the centroid to the origin and scale so
/// the mean distance from it is sqrt(2).
fn normalize_points(pts: &[Point2<f64>]) -> (Vec<Point2<f64>>, Matrix3<f64>) {
    let n = pts.len() as f64;
    let mut cx = 0.0;
    let mut cy = 0.0;
    for p in pts {
        cx += p.x;
        cy += p.y;
    }
    cx /= n;
    cy /= n;

    let mut mean_dist = 0.0;
    for p in pts {
        mean_dist += ((p.x - cx).powi(2) + (p.y - cy).powi(2)).sqrt();
    }
    mean_dist /= n;

    let t = similarity_transform(cx, cy, mean_dist);
    let out = pts
        .iter()
        .map(|p| {
            let v = t * Vector3::new(p.x, p.y, 1.0);
            Point2::new(v[0], v[1])
        })
        .collect();
    (out, t)
}

fn denormalize(
    hn: Matrix3<f64>,
    t_src: Matrix3<f64>,
    t_dst: Matrix3<f64>,
) -> Result<Matrix3<f64>, GeometryError> {
    let t_dst_inv = t_dst
        .try_inverse()
        .ok_or(GeometryError::Numeric("normalization is singular"))?;
    let h = t_dst_inv * hn * t_src;
    let s = h[(2, 2)];
    if s.abs() < 1e-12 {
        return Err(GeometryError::Numeric("homography scale vanished"));
    }
    Ok(h / s)
}

/// Estimate H such that `dst ~ H * src` from at least four correspondences.
///
/// `src` and `dst` must be parallel ordered point sets.
pub fn estimate_homography(
    src: &[Point2<f64>],
    dst: &[Point2<f64>],
) -> Result<Homography, GeometryError> {
    if src.len() != dst.len() {
        return Err(GeometryError::Degenerate("correspondence length mismatch"));
    }
    if src.len() < 4 {
        return Err(GeometryError::NotEnoughPoints {
            got: src.len(),
            need: 4,
        });
    }
    if src.len() == 4 {
        let s: [Point2<f64>; 4] = [src[0], src[1], src[2], src[3]];
        let d: [Point2<f64>; 4] = [dst[0], dst[1], dst[2], dst[3]];
        return homography_from_quad(&s, &d);
    }

    let (sn, ts) = normalize_points(src);
    let (dn, td) = normalize_points(dst);

    // Stack the 2N x 9 DLT system A h = 0.
    let n = src.len();
    let mut a = DMatrix::<f64>::zeros(2 * n, 9);
    for k in 0..n {
        let x = sn[k].x;
        let y = sn[k].y;
        let u = dn[k].x;
        let v = dn[k].y;

        a[(2 * k, 0)] = -x;
        a[(2 * k, 1)] = -y;
        a[(2 * k, 2)] = -1.0;
        a[(2 * k, 6)] = u * x;
        a[(2 * k, 7)] = u * y;
        a[(2 * k, 8)] = u;

        a[(2 * k + 1, 3)] = -x;
        a[(2 * k + 1, 4)] = -y;
        a[(2 * k + 1, 5)] = -1.0;
        a[(2 * k + 1, 6)] = v * x;
        a[(2 * k + 1, 7)] = v * y;
        a[(2 * k + 1, 8)] = v;
    }

    // h is the right singular vector of the smallest singular value.
    let svd = a.svd(true, true);
    let vt = svd.v_t.ok_or(GeometryError::Numeric("SVD of DLT system"))?;
    let h = vt.row(vt.nrows() - 1);
    let hn = Matrix3::from_row_slice(&[h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], h[8]]);

    denormalize(hn, ts, td).map(Homography::new)
}

/// Exact homography from four correspondences (`h33` pinned to 1).
pub fn homography_from_quad(
    src: &[Point2<f64>; 4],
    dst: &[Point2<f64>; 4],
) -> Result<Homography, GeometryError> {
    let (sn, ts) = normalize_points(src);
    let (dn, td) = normalize_points(dst);

    let mut a = SMatrix::<f64, 8, 8>::zeros();
    let mut b = SVector::<f64, 8>::zeros();
    for k in 0..4 {
        let x = sn[k].x;
        let y = sn[k].y;
        let u = dn[k].x;
        let v = dn[k].y;

        let r0 = 2 * k;
        a[(r0, 0)] = x;
        a[(r0, 1)] = y;
        a[(r0, 2)] = 1.0;
        a[(r0, 6)] = -u * x;
        a[(r0, 7)] = -u * y;
        b[r0] = u;

        let r1 = 2 * k + 1;
        a[(r1, 3)] = x;
        a[(r1, 4)] = y;
        a[(r1, 5)] = 1.0;
        a[(r1, 6)] = -v * x;
        a[(r1, 7)] = -v * y;
        b[r1] = v;
    }

    let x = a
        .lu()
        .solve(&b)
        .ok_or(GeometryError::Numeric("4-point system is singular"))?;

    let hn = Matrix3::new(
        x[0], x[1], x[2], //
        x[3], x[4], x[5], //
        x[6], x[7], 1.0,
    );

    denormalize(hn, ts, td).map(Homography::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_close(a: Point2<f64>, b: Point2<f64>, tol: f64) {
        assert!(
            (a.x - b.x).abs() < tol && (a.y - b.y).abs() < tol,
            "expected ({:.6},{:.6}) ~ ({:.6},{:.6})",
            a.x,
            a.y,
            b.x,
            b.y
        );
    }

    #[test]
    fn inverse_round_trips_points() {
        let h = Homography::new(Matrix3::new(
            1.2, 0.1, 5.0, //
            -0.05, 0.9, 3.0, //
            0.001, 0.0005, 1.0,
        ));
        let inv = h.inverse().expect("invertible");
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(50.0, -20.0),
            Point2::new(320.0, 200.0),
        ] {
            let q = h.project(p).unwrap();
            assert_close(inv.project(q).unwrap(), p, 1e-9);
        }
    }

    #[test]
    fn quad_estimate_recovers_ground_truth() {
        let truth = Homography::new(Matrix3::new(
            0.8, 0.05, 120.0, //
            -0.02, 1.1, 80.0, //
            0.0009, -0.0004, 1.0,
        ));
        let src = [
            Point2::new(0.0, 0.0),
            Point2::new(180.0, 0.0),
            Point2::new(180.0, 130.0),
            Point2::new(0.0, 130.0),
        ];
        let dst = src.map(|p| truth.project(p).unwrap());
        let est = homography_from_quad(&src, &dst).expect("estimate");
        for p in [
            Point2::new(0.0, 0.0),
            Point2::new(60.0, 40.0),
            Point2::new(150.0, 120.0),
        ] {
            assert_close(est.project(p).unwrap(), truth.project(p).unwrap(), 1e-6);
        }
    }

    #[test]
    fn dlt_handles_eight_point_octagon() {
        let truth = Homography::new(Matrix3::new(
            1.0, 0.2, 12.0, //
            -0.1, 0.9, 6.0, //
            0.0006, 0.0004, 1.0,
        ));
        let src: Vec<Point2<f64>> = (0..8)
            .map(|i| {
                let ang = std::f64::consts::FRAC_PI_4 * i as f64;
                Point2::new(100.0 * ang.cos(), 100.0 * ang.sin())
            })
            .collect();
        let dst: Vec<Point2<f64>> = src.iter().map(|&p| truth.project(p).unwrap()).collect();

        let est = estimate_homography(&src, &dst).expect("estimate");
        for &p in &src {
            assert_close(est.project(p).unwrap(), truth.project(p).unwrap(), 1e-6);
        }
    }

    #[test]
    fn mismatched_lengths_are_rejected() {
        let a = vec![Point2::new(0.0, 0.0); 5];
        let b = vec![Point2::new(0.0, 0.0); 4];
        assert!(matches!(
            estimate_homography(&a, &b),
            Err(GeometryError::Degenerate(_))
        ));
    }

    #[test]
    fn too_few_points_are_rejected() {
        let a = vec![Point2::new(0.0, 0.0); 3];
        assert!(matches!(
            estimate_homography(&a, &a),
            Err(GeometryError::NotEnoughPoints { .. })
        ));
    }
}
