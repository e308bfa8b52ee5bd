//! C3: Image enhancer.
//!
//! A pure `Image -> Image` pass that stretches luminance contrast on
//! poorly-lit frames before they reach C4. Formula is fully specified
//! (spec.md §4.3): sample every 4th pixel to estimate `min_Y`/`max_Y`,
//! skip enhancement if the frame already has enough spread, otherwise
//! scale toward a target ceiling.

use crate::frame::Image;

/// Luminance-sample stride. Checking every pixel is wasteful for a
/// contrast estimate; every 4th is plenty and keeps this cheap enough to
/// run on every captured frame.
const SAMPLE_STRIDE: usize = 4;
const LOW_SPREAD_THRESHOLD: f32 = 20.0;
const LOW_LIGHT_CEILING: f32 = 180.0;
const LOW_LIGHT_TARGET: f32 = 210.0;
const HEADROOM: f32 = 10.0;
const MAX_SCALE: f32 = 3.0;

/// Apply auto-contrast enhancement if the frame's luminance spread is
/// below threshold. Returns the image unchanged when contrast is
/// already adequate.
pub fn enhance(img: &Image) -> Image {
    let (min_y, max_y) = sample_luminance_range(img);

    if max_y - min_y <= LOW_SPREAD_THRESHOLD {
        return img.clone();
    }

    let target_max = if max_y <= LOW_LIGHT_CEILING {
        LOW_LIGHT_TARGET
    } else {
        (max_y + HEADROOM).min(255.0)
    };

    // Scale each channel by target_max / (max_Y - min_Y) — the low anchor
    // is 0, not min_Y (spec.md §4.3 step 4).
    let scale = if max_y > min_y {
        (target_max / (max_y - min_y)).min(MAX_SCALE)
    } else {
        1.0
    };

    if scale <= 1.0 {
        return img.clone();
    }

    apply_scale(img, scale)
}

fn sample_luminance_range(img: &Image) -> (f32, f32) {
    let mut min_y = 255.0f32;
    let mut max_y = 0.0f32;
    let total_pixels = (img.width as usize) * (img.height as usize);

    let mut i = 0usize;
    while i < total_pixels {
        let x = (i % img.width as usize) as u32;
        let y = (i / img.width as usize) as u32;
        let (r, g, b) = img.pixel(x, y);
        let luminance = luminance_y(r, g, b);
        if luminance < min_y {
            min_y = luminance;
        }
        if luminance > max_y {
            max_y = luminance;
        }
        i += SAMPLE_STRIDE;
    }

    if min_y > max_y {
        (0.0, 0.0)
    } else {
        (min_y, max_y)
    }
}

#[inline]
fn luminance_y(r: u8, g: u8, b: u8) -> f32 {
    (r as f32 + 2.0 * g as f32 + b as f32) / 4.0
}

fn apply_scale(img: &Image, scale: f32) -> Image {
    let mut out = Image::new(img.width, img.height);
    for i in 0..out.data.len() {
        let scaled = img.data[i] as f32 * scale;
        out.data[i] = scaled.round().clamp(0.0, 255.0) as u8;
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn low_contrast_frame_is_stretched() {
        let mut img = Image::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                let v = if (x + y) % 2 == 0 { 40 } else { 90 };
                img.set_pixel(x, y, (v, v, v));
            }
        }
        let out = enhance(&img);
        let (min_before, max_before) = sample_luminance_range(&img);
        let (_min_after, max_after) = sample_luminance_range(&out);
        assert!(max_before - min_before > LOW_SPREAD_THRESHOLD);
        assert!(max_after > max_before);
    }

    #[test]
    fn stretch_is_multiply_from_zero_not_affine() {
        // min_Y=40, max_Y=90, spread=50 -> target=210, scale=210/50=4.2
        // capped at MAX_SCALE=3.0. v=40 -> round(40*3.0)=120, not 40.
        let mut img = Image::new(8, 8);
        for y in 0..8 {
            for x in 0..8 {
                let v = if (x + y) % 2 == 0 { 40 } else { 90 };
                img.set_pixel(x, y, (v, v, v));
            }
        }
        let out = enhance(&img);
        let (r, _, _) = out.pixel(0, 0);
        assert_eq!(r, 120);
    }

    #[test]
    fn flat_spread_is_unchanged_bit_for_bit() {
        // Property 8: max_Y - min_Y <= 20 must pass through unchanged.
        let mut img = Image::new(6, 6);
        for y in 0..6 {
            for x in 0..6 {
                let v = if (x + y) % 2 == 0 { 100 } else { 110 };
                img.set_pixel(x, y, (v, v, v));
            }
        }
        let (min_y, max_y) = sample_luminance_range(&img);
        assert!(max_y - min_y <= LOW_SPREAD_THRESHOLD);
        let out = enhance(&img);
        assert_eq!(out.data, img.data);
    }

    #[test]
    fn already_high_contrast_is_unchanged() {
        let mut img = Image::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                let v = if x < 2 { 0 } else { 255 };
                img.set_pixel(x, y, (v, v, v));
            }
        }
        let out = enhance(&img);
        assert_eq!(out.data, img.data);
    }

    #[test]
    fn enhancement_never_exceeds_255() {
        let mut img = Image::new(4, 4);
        for y in 0..4 {
            for x in 0..4 {
                let v = if x < 2 { 200 } else { 240 };
                img.set_pixel(x, y, (v, v, v));
            }
        }
        let out = enhance(&img);
        assert!(out.data.iter().all(|&b| b <= 255));
    }
}
