//! Smoothing, morphology, and resampling on grayscale buffers.
//!
//! All operators take an immutable view and return a newly owned image, so
//! pipeline stages never alias a shared buffer.

use crate::image::{get_gray, GrayImage, GrayImageView};

fn gaussian_kernel(sigma: f32) -> Vec<f32> {
    let sigma = sigma.max(0.1);
    let radius = (3.0 * sigma).ceil() as i32;
    let mut k = Vec::with_capacity((2 * radius + 1) as usize);
    let denom = 2.0 * sigma * sigma;
    let mut sum = 0.0;
    for i in -radius..=radius {
        let v = (-(i * i) as f32 / denom).exp();
        k.push(v);
        sum += v;
    }
    for v in &mut k {
        *v /= sum;
    }
    k
}

/// Separable gaussian blur with border clamping.
pub fn gaussian_blur(src: &GrayImageView<'_>, sigma: f32) -> GrayImage {
    let w = src.width;
    let h = src.height;
    let kernel = gaussian_kernel(sigma);
    let radius = (kernel.len() / 2) as i32;

    let mut tmp = vec![0f32; w * h];
    for y in 0..h {
        let row = &src.data[y * w..(y + 1) * w];
        for x in 0..w {
            let mut acc = 0.0;
            for (ki, kv) in kernel.iter().enumerate() {
                let sx = (x as i32 + ki as i32 - radius).clamp(0, w as i32 - 1) as usize;
                acc += row[sx] as f32 * kv;
            }
            tmp[y * w + x] = acc;
        }
    }

    let mut out = vec![0u8; w * h];
    for y in 0..h {
        for x in 0..w {
            let mut acc = 0.0;
            for (ki, kv) in kernel.iter().enumerate() {
                let sy = (y as i32 + ki as i32 - radius).clamp(0, h as i32 - 1) as usize;
                acc += tmp[sy * w + x] * kv;
            }
            out[y * w + x] = acc.round().clamp(0.0, 255.0) as u8;
        }
    }

    GrayImage {
        width: w,
        height: h,
        data: out,
    }
}

/// Median filter over a `(2r+1)^2` window with border clamping.
pub fn median_blur(src: &GrayImageView<'_>, radius: usize) -> GrayImage {
    let w = src.width;
    let h = src.height;
    if radius == 0 || w == 0 || h == 0 {
        return GrayImage {
            width: w,
            height: h,
            data: src.data.to_vec(),
        };
    }

    let r = radius as i32;
    let mut out = vec![0u8; w * h];
    let mut hist = [0u32; 256];
    let count = ((2 * r + 1) * (2 * r + 1)) as u32;
    let target = count / 2;

    for y in 0..h as i32 {
        hist.fill(0);
        // Seed the histogram for x = 0, then slide it along the row.
        for dy in -r..=r {
            let sy = (y + dy).clamp(0, h as i32 - 1) as usize;
            for dx in -r..=r {
                let sx = dx.clamp(0, w as i32 - 1) as usize;
                hist[src.data[sy * w + sx] as usize] += 1;
            }
        }
        for x in 0..w as i32 {
            if x > 0 {
                for dy in -r..=r {
                    let sy = (y + dy).clamp(0, h as i32 - 1) as usize;
                    let rm = (x - 1 - r).clamp(0, w as i32 - 1) as usize;
                    let ad = (x + r).clamp(0, w as i32 - 1) as usize;
                    hist[src.data[sy * w + rm] as usize] -= 1;
                    hist[src.data[sy * w + ad] as usize] += 1;
                }
            }
            let mut acc = 0u32;
            let mut med = 0u8;
            for (value, n) in hist.iter().enumerate() {
                acc += n;
                if acc > target {
                    med = value as u8;
                    break;
                }
            }
            out[y as usize * w + x as usize] = med;
        }
    }

    GrayImage {
        width: w,
        height: h,
        data: out,
    }
}

fn morph(src: &GrayImageView<'_>, radius: usize, maximize: bool) -> GrayImage {
    let w = src.width;
    let h = src.height;
    let r = radius as i32;
    let mut out = vec![0u8; w * h];
    for y in 0..h as i32 {
        for x in 0..w as i32 {
            let mut best = if maximize { 0u8 } else { 255u8 };
            for dy in -r..=r {
                let sy = (y + dy).clamp(0, h as i32 - 1) as usize;
                for dx in -r..=r {
                    let sx = (x + dx).clamp(0, w as i32 - 1) as usize;
                    let v = src.data[sy * w + sx];
                    best = if maximize { best.max(v) } else { best.min(v) };
                }
            }
            out[y as usize * w + x as usize] = best;
        }
    }
    GrayImage {
        width: w,
        height: h,
        data: out,
    }
}

/// Grayscale dilation (local maximum) over a square window.
pub fn dilate(src: &GrayImageView<'_>, radius: usize) -> GrayImage {
    morph(src, radius, true)
}

/// Grayscale erosion (local minimum) over a square window.
pub fn erode(src: &GrayImageView<'_>, radius: usize) -> GrayImage {
    morph(src, radius, false)
}

/// Morphological close: dilate, then erode.
pub fn morph_close(src: &GrayImageView<'_>, radius: usize) -> GrayImage {
    let dilated = dilate(src, radius);
    erode(&dilated.as_view(), radius)
}

/// Binary threshold: `>= thresh` maps to 255, everything else to 0.
pub fn threshold_binary(src: &GrayImageView<'_>, thresh: u8) -> GrayImage {
    GrayImage {
        width: src.width,
        height: src.height,
        data: src
            .data
            .iter()
            .map(|&v| if v >= thresh { 255 } else { 0 })
            .collect(),
    }
}

#[inline]
fn cubic_weight(t: f32) -> f32 {
    // Catmull-Rom (a = -0.5).
    let t = t.abs();
    if t < 1.0 {
        1.5 * t * t * t - 2.5 * t * t + 1.0
    } else if t < 2.0 {
        -0.5 * t * t * t + 2.5 * t * t - 4.0 * t + 2.0
    } else {
        0.0
    }
}

/// Bicubic (Catmull-Rom) sample with zero padding outside the image.
pub fn sample_bicubic(src: &GrayImageView<'_>, x: f32, y: f32) -> f32 {
    let x0 = x.floor() as i32;
    let y0 = y.floor() as i32;
    let fx = x - x0 as f32;
    let fy = y - y0 as f32;

    let mut acc = 0.0;
    for j in -1..=2 {
        let wy = cubic_weight(j as f32 - fy);
        if wy == 0.0 {
            continue;
        }
        for i in -1..=2 {
            let wx = cubic_weight(i as f32 - fx);
            if wx == 0.0 {
                continue;
            }
            acc += wx * wy * get_gray(src, x0 + i, y0 + j) as f32;
        }
    }
    acc.clamp(0.0, 255.0)
}

/// Rotate by `angle_deg` about `(cx, cy)` (positive angle turns +x toward
/// +y), bicubic-resampled into an equally sized output.
pub fn rotate_about(src: &GrayImageView<'_>, angle_deg: f32, cx: f32, cy: f32) -> GrayImage {
    let w = src.width;
    let h = src.height;
    let rad = angle_deg.to_radians();
    let (sin, cos) = rad.sin_cos();

    let mut out = vec![0u8; w * h];
    // Inverse map each output pixel back into the source.
    for y in 0..h {
        let dy = y as f32 - cy;
        for x in 0..w {
            let dx = x as f32 - cx;
            let sx = cx + cos * dx + sin * dy;
            let sy = cy - sin * dx + cos * dy;
            out[y * w + x] = sample_bicubic(src, sx, sy).round() as u8;
        }
    }

    GrayImage {
        width: w,
        height: h,
        data: out,
    }
}

/// Bicubic 2x upscale, used by the search retry at doubled resolution.
pub fn upscale2x(src: &GrayImageView<'_>) -> GrayImage {
    let w = src.width * 2;
    let h = src.height * 2;
    let mut out = vec![0u8; w * h];
    for y in 0..h {
        let sy = (y as f32 + 0.5) * 0.5 - 0.5;
        for x in 0..w {
            let sx = (x as f32 + 0.5) * 0.5 - 0.5;
            out[y * w + x] = sample_bicubic(src, sx, sy).round() as u8;
        }
    }
    GrayImage {
        width: w,
        height: h,
        data: out,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn constant(w: usize, h: usize, v: u8) -> GrayImage {
        GrayImage {
            width: w,
            height: h,
            data: vec![v; w * h],
        }
    }

    #[test]
    fn gaussian_preserves_constant_image() {
        let img = constant(16, 12, 77);
        let out = gaussian_blur(&img.as_view(), 1.5);
        assert!(out.data.iter().all(|&v| (v as i32 - 77).abs() <= 1));
    }

    #[test]
    fn median_removes_salt_noise() {
        let mut img = constant(9, 9, 10);
        img.set(4, 4, 255);
        let out = median_blur(&img.as_view(), 1);
        assert_eq!(out.get(4, 4), 10);
    }

    #[test]
    fn median_matches_naive_window_sort() {
        let mut img = GrayImage::new(7, 5);
        for (i, v) in img.data.iter_mut().enumerate() {
            *v = ((i * 37 + 11) % 251) as u8;
        }
        let out = median_blur(&img.as_view(), 1);

        let naive = |x: i32, y: i32| -> u8 {
            let mut vals = Vec::new();
            for dy in -1..=1i32 {
                for dx in -1..=1i32 {
                    let sx = (x + dx).clamp(0, 6) as usize;
                    let sy = (y + dy).clamp(0, 4) as usize;
                    vals.push(img.get(sx, sy));
                }
            }
            vals.sort_unstable();
            vals[4]
        };
        for y in 0..5 {
            for x in 0..7 {
                assert_eq!(out.get(x as usize, y as usize), naive(x, y), "at ({x},{y})");
            }
        }
    }

    #[test]
    fn close_fills_small_dark_gap() {
        let mut img = constant(11, 11, 200);
        img.set(5, 5, 0);
        let out = morph_close(&img.as_view(), 1);
        assert_eq!(out.get(5, 5), 200);
    }

    #[test]
    fn rotation_by_90_moves_a_spot() {
        let mut img = GrayImage::new(21, 21);
        img.set(16, 10, 255);
        let out = rotate_about(&img.as_view(), 90.0, 10.0, 10.0);
        // (16,10) is 6 px right of center; a positive 90 degree rotation
        // carries it 6 px below center.
        assert!(out.get(10, 16) > 128, "got {}", out.get(10, 16));
    }

    #[test]
    fn upscale_doubles_dimensions() {
        let img = constant(8, 6, 42);
        let out = upscale2x(&img.as_view());
        assert_eq!((out.width, out.height), (16, 12));
        assert!(out.data.iter().all(|&v| (v as i32 - 42).abs() <= 2));
    }
}
