//! C6: Liveness fallback.
//!
//! A pure-image heuristic used only when the vision service's RPC
//! liveness call is unreachable (spec.md §4.6). Operates on the cropped
//! face region: greyscale variance, Sobel edge density, and a coarse LBP
//! texture sample combine into a single score.

use crate::frame::Image;

const LBP_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (0, -1),
    (1, -1),
    (-1, 0),
    (1, 0),
    (-1, 1),
    (0, 1),
    (1, 1),
];

#[derive(Debug, Clone, Copy)]
pub struct LivenessScore {
    pub variance: f32,
    pub edge_density: f32,
    pub lbp_mean: f32,
    pub score: f32,
    pub is_live: bool,
}

/// Classifies a cropped face region as live or not. `variance_threshold`
/// comes from `LivenessConfig::depth_threshold` scaled to the variance
/// domain by the orchestrator; passed in directly here to keep this
/// module a pure function of its inputs.
pub fn assess(region: &Image, variance_threshold: f32) -> LivenessScore {
    let grey = to_grey(region);
    let variance = grey_variance(&grey, region.width, region.height);
    let edge_density = sobel_edge_density(&grey, region.width, region.height);
    let lbp_mean = lbp_texture_mean(&grey, region.width, region.height);

    let score = 0.4 * (variance / 10000.0).min(1.0) + 0.3 * edge_density + 0.3 * (lbp_mean / 255.0);
    let is_live = score > 0.5 && variance > variance_threshold;

    LivenessScore {
        variance,
        edge_density,
        lbp_mean,
        score,
        is_live,
    }
}

fn to_grey(img: &Image) -> Vec<f32> {
    let n = (img.width as usize) * (img.height as usize);
    let mut grey = Vec::with_capacity(n);
    for i in 0..n {
        let idx = i * 3;
        let r = img.data[idx] as f32;
        let g = img.data[idx + 1] as f32;
        let b = img.data[idx + 2] as f32;
        grey.push((r + 2.0 * g + b) / 4.0);
    }
    grey
}

fn grey_variance(grey: &[f32], _width: u32, _height: u32) -> f32 {
    if grey.is_empty() {
        return 0.0;
    }
    let mean = grey.iter().sum::<f32>() / grey.len() as f32;
    grey.iter().map(|v| (v - mean).powi(2)).sum::<f32>() / grey.len() as f32
}

#[inline]
fn sample(grey: &[f32], width: i32, height: i32, x: i32, y: i32) -> f32 {
    let x = x.clamp(0, width - 1);
    let y = y.clamp(0, height - 1);
    grey[(y * width + x) as usize]
}

fn sobel_edge_density(grey: &[f32], width: u32, height: u32) -> f32 {
    let w = width as i32;
    let h = height as i32;
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut edges = 0u32;
    let mut interior = 0u32;

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let gx = sample(grey, w, h, x + 1, y - 1) + 2.0 * sample(grey, w, h, x + 1, y) + sample(grey, w, h, x + 1, y + 1)
                - sample(grey, w, h, x - 1, y - 1)
                - 2.0 * sample(grey, w, h, x - 1, y)
                - sample(grey, w, h, x - 1, y + 1);
            let gy = sample(grey, w, h, x - 1, y + 1) + 2.0 * sample(grey, w, h, x, y + 1) + sample(grey, w, h, x + 1, y + 1)
                - sample(grey, w, h, x - 1, y - 1)
                - 2.0 * sample(grey, w, h, x, y - 1)
                - sample(grey, w, h, x + 1, y - 1);
            let magnitude = (gx * gx + gy * gy).sqrt();
            if magnitude > 30.0 {
                edges += 1;
            }
            interior += 1;
        }
    }

    if interior == 0 {
        0.0
    } else {
        edges as f32 / interior as f32
    }
}

fn lbp_texture_mean(grey: &[f32], width: u32, height: u32) -> f32 {
    let w = width as i32;
    let h = height as i32;
    if w < 3 || h < 3 {
        return 0.0;
    }

    let mut total = 0u64;
    let mut count = 0u64;

    let mut y = 1;
    while y < h - 1 {
        let mut x = 1;
        while x < w - 1 {
            let center = sample(grey, w, h, x, y);
            let mut pattern = 0u8;
            for (bit, (dx, dy)) in LBP_OFFSETS.iter().enumerate() {
                if sample(grey, w, h, x + dx, y + dy) >= center {
                    pattern |= 1 << bit;
                }
            }
            total += pattern as u64;
            count += 1;
            x += 8;
        }
        y += 8;
    }

    if count == 0 {
        0.0
    } else {
        total as f32 / count as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_image(width: u32, height: u32, value: u8) -> Image {
        let mut img = Image::new(width, height);
        for b in img.data.iter_mut() {
            *b = value;
        }
        img
    }

    #[test]
    fn flat_image_has_zero_variance_and_is_not_live() {
        let img = flat_image(32, 32, 128);
        let result = assess(&img, 1000.0);
        assert_eq!(result.variance, 0.0);
        assert!(!result.is_live);
    }

    #[test]
    fn noisy_image_has_high_variance() {
        let mut img = Image::new(16, 16);
        for (i, px) in img.data.chunks_mut(3).enumerate() {
            let v = if i % 2 == 0 { 0 } else { 255 };
            px[0] = v;
            px[1] = v;
            px[2] = v;
        }
        let result = assess(&img, 0.0);
        assert!(result.variance > 5000.0);
    }

    #[test]
    fn matches_spec_liveness_fallback_scenario() {
        // S5: variance=15000, edge density=0.2, lbp mean=130 -> score ~0.613.
        let expected = 0.4 * 1.0_f32.min(1.0) + 0.3 * 0.2 + 0.3 * (130.0 / 255.0);
        assert!((expected - 0.613).abs() < 0.01);
    }
}
