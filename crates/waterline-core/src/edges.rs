//! Sobel gradients and a thin edge extractor (non-maximum suppression plus
//! double-threshold hysteresis) used by corner refinement.

use crate::image::GrayImageView;

const SOBEL_X: [[f32; 3]; 3] = [[-1.0, 0.0, 1.0], [-2.0, 0.0, 2.0], [-1.0, 0.0, 1.0]];
const SOBEL_Y: [[f32; 3]; 3] = [[-1.0, -2.0, -1.0], [0.0, 0.0, 0.0], [1.0, 2.0, 1.0]];

/// Per-pixel gradient buffers.
#[derive(Clone, Debug)]
pub struct GradientField {
    pub width: usize,
    pub height: usize,
    pub gx: Vec<f32>,
    pub gy: Vec<f32>,
    pub mag: Vec<f32>,
}

/// Compute Sobel gradients with border clamping.
pub fn sobel_gradients(src: &GrayImageView<'_>) -> GradientField {
    let w = src.width;
    let h = src.height;
    let mut gx = vec![0f32; w * h];
    let mut gy = vec![0f32; w * h];
    let mut mag = vec![0f32; w * h];

    if w == 0 || h == 0 {
        return GradientField {
            width: w,
            height: h,
            gx,
            gy,
            mag,
        };
    }

    for y in 0..h {
        let y_idx = [y.saturating_sub(1), y, (y + 1).min(h - 1)];
        let rows = [
            &src.data[y_idx[0] * w..y_idx[0] * w + w],
            &src.data[y_idx[1] * w..y_idx[1] * w + w],
            &src.data[y_idx[2] * w..y_idx[2] * w + w],
        ];
        for x in 0..w {
            let x_idx = [x.saturating_sub(1), x, (x + 1).min(w - 1)];
            let mut sum_x = 0.0;
            let mut sum_y = 0.0;
            for (ky, row) in rows.iter().enumerate() {
                for kx in 0..3 {
                    let v = row[x_idx[kx]] as f32;
                    sum_x += v * SOBEL_X[ky][kx];
                    sum_y += v * SOBEL_Y[ky][kx];
                }
            }
            let idx = y * w + x;
            gx[idx] = sum_x;
            gy[idx] = sum_y;
            mag[idx] = (sum_x * sum_x + sum_y * sum_y).sqrt();
        }
    }

    GradientField {
        width: w,
        height: h,
        gx,
        gy,
        mag,
    }
}

/// Thinned binary edge map.
#[derive(Clone, Debug)]
pub struct EdgeMask {
    pub width: usize,
    pub height: usize,
    pub data: Vec<bool>,
}

impl EdgeMask {
    #[inline]
    pub fn at(&self, x: usize, y: usize) -> bool {
        self.data[y * self.width + x]
    }
}

/// Extract thin edges: gradient magnitude, non-maximum suppression along the
/// quantized gradient direction, then double-threshold hysteresis.
pub fn edge_mask(src: &GrayImageView<'_>, low: f32, high: f32) -> EdgeMask {
    let grad = sobel_gradients(src);
    let w = grad.width;
    let h = grad.height;

    // 0 = none, 1 = weak, 2 = strong
    let mut class = vec![0u8; w * h];
    for y in 1..h.saturating_sub(1) {
        for x in 1..w.saturating_sub(1) {
            let idx = y * w + x;
            let m = grad.mag[idx];
            if m < low {
                continue;
            }
            // Quantize the gradient direction into one of 4 neighbor axes.
            let angle = grad.gy[idx].atan2(grad.gx[idx]).to_degrees();
            let a = ((angle + 180.0) / 45.0).round() as i32 % 4;
            let (dx, dy) = match a {
                0 => (1i32, 0i32),  // horizontal gradient -> vertical edge
                1 => (1, 1),
                2 => (0, 1),
                _ => (-1, 1),
            };
            let m1 = grad.mag[(y as i32 + dy) as usize * w + (x as i32 + dx) as usize];
            let m2 = grad.mag[(y as i32 - dy) as usize * w + (x as i32 - dx) as usize];
            // Strict on one side so plateau ties keep a single pixel.
            if m > m1 && m >= m2 {
                class[idx] = if m >= high { 2 } else { 1 };
            }
        }
    }

    // Hysteresis: weak pixels survive only when connected to a strong one.
    let mut keep = vec![false; w * h];
    let mut stack: Vec<usize> = class
        .iter()
        .enumerate()
        .filter_map(|(i, &c)| (c == 2).then_some(i))
        .collect();
    for &i in &stack {
        keep[i] = true;
    }
    while let Some(idx) = stack.pop() {
        let x = (idx % w) as i32;
        let y = (idx / w) as i32;
        for dy in -1..=1i32 {
            for dx in -1..=1i32 {
                if dx == 0 && dy == 0 {
                    continue;
                }
                let nx = x + dx;
                let ny = y + dy;
                if nx < 0 || ny < 0 || nx >= w as i32 || ny >= h as i32 {
                    continue;
                }
                let n = ny as usize * w + nx as usize;
                if class[n] == 1 && !keep[n] {
                    keep[n] = true;
                    stack.push(n);
                }
            }
        }
    }

    EdgeMask {
        width: w,
        height: h,
        data: keep,
    }
}
