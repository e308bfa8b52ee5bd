//! C1: Frame & pixel decoder.
//!
//! Converts a raw V4L2 `Frame` into a canonical 8-bit RGB `Image`. The
//! teacher never needed this module (it let `opencv::videoio` handle
//! pixel-format negotiation internally); the decode rules here follow
//! spec.md §4.1 directly, with the MJPEG path grounded on the `image`
//! crate usage common across the reference pack.

use crate::error::DecodeError;
use serde::{Deserialize, Serialize};
use std::time::SystemTime;

/// A raw, undecoded capture from the camera. Immutable; owns its bytes so
/// it stays valid after the producer recycles the kernel buffer it came
/// from (spec.md §4.2).
#[derive(Debug, Clone)]
pub struct Frame {
    pub data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub format: PixelFormat,
    pub timestamp: SystemTime,
    pub sequence: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PixelFormat {
    Mjpeg,
    Yuyv,
    Rgb24,
    Grey,
    Y16,
    /// A negotiated FourCC this decoder doesn't recognize. Carried
    /// through from the camera rather than rejected at negotiation time,
    /// so the failure surfaces from `decode()` as `UnsupportedFormat`
    /// (spec.md §4.1) instead of a camera-layer device error.
    Other(String),
}

impl PixelFormat {
    pub fn from_fourcc(tag: &str) -> Option<Self> {
        match tag.to_ascii_uppercase().as_str() {
            "MJPG" | "MJPEG" => Some(Self::Mjpeg),
            "YUYV" => Some(Self::Yuyv),
            "RGB3" | "RGB24" => Some(Self::Rgb24),
            "GREY" | "Y8" => Some(Self::Grey),
            "Y16" | "Y16 " => Some(Self::Y16),
            _ => None,
        }
    }

    /// Like `from_fourcc`, but never fails: an unrecognized tag becomes
    /// `Other`, deferring the failure to decode time.
    pub fn from_fourcc_lenient(tag: &str) -> Self {
        Self::from_fourcc(tag).unwrap_or_else(|| Self::Other(tag.trim().to_string()))
    }

    pub fn as_fourcc(&self) -> &str {
        match self {
            Self::Mjpeg => "MJPG",
            Self::Yuyv => "YUYV",
            Self::Rgb24 => "RGB3",
            Self::Grey => "GREY",
            Self::Y16 => "Y16 ",
            Self::Other(tag) => tag,
        }
    }
}

/// Canonical 8-bit RGB bitmap. All downstream components (C3-C10) operate
/// on `Image`, never on the raw `Frame`.
#[derive(Debug, Clone)]
pub struct Image {
    pub data: Vec<u8>, // interleaved R,G,B
    pub width: u32,
    pub height: u32,
}

impl Image {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            data: vec![0u8; (width as usize) * (height as usize) * 3],
            width,
            height,
        }
    }

    #[inline]
    pub fn pixel(&self, x: u32, y: u32) -> (u8, u8, u8) {
        let idx = ((y * self.width + x) * 3) as usize;
        (self.data[idx], self.data[idx + 1], self.data[idx + 2])
    }

    #[inline]
    pub fn set_pixel(&mut self, x: u32, y: u32, rgb: (u8, u8, u8)) {
        let idx = ((y * self.width + x) * 3) as usize;
        self.data[idx] = rgb.0;
        self.data[idx + 1] = rgb.1;
        self.data[idx + 2] = rgb.2;
    }

    /// Crop to an axis-aligned rectangle, clamped to image bounds.
    pub fn crop(&self, x1: f32, y1: f32, x2: f32, y2: f32) -> Image {
        let x1 = x1.max(0.0) as u32;
        let y1 = y1.max(0.0) as u32;
        let x2 = (x2.min(self.width as f32) as u32).max(x1 + 1).min(self.width);
        let y2 = (y2.min(self.height as f32) as u32).max(y1 + 1).min(self.height);
        let w = x2 - x1;
        let h = y2 - y1;
        let mut out = Image::new(w, h);
        for y in 0..h {
            for x in 0..w {
                out.set_pixel(x, y, self.pixel(x1 + x, y1 + y));
            }
        }
        out
    }

    /// Encode as JPEG at the given quality (C4 transport format).
    pub fn encode_jpeg(&self, quality: u8) -> Result<Vec<u8>, DecodeError> {
        let mut buf = Vec::new();
        let mut encoder =
            image::codecs::jpeg::JpegEncoder::new_with_quality(&mut buf, quality);
        encoder
            .encode(&self.data, self.width, self.height, image::ColorType::Rgb8)
            .map_err(DecodeError::Jpeg)?;
        Ok(buf)
    }
}

/// A 2D point in image coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
}

/// Axis-aligned face rectangle plus optional 5-point landmarks (order:
/// left-eye, right-eye, nose, left-mouth, right-mouth) when the detector
/// provides them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    pub landmarks: Vec<Landmark>,
}

impl Detection {
    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    /// Euclidean distance between the left-eye and right-eye landmarks,
    /// or `None` if the detector didn't supply at least two landmarks.
    pub fn eye_distance(&self) -> Option<f32> {
        let left = self.landmarks.first()?;
        let right = self.landmarks.get(1)?;
        Some(((right.x - left.x).powi(2) + (right.y - left.y).powi(2)).sqrt())
    }

    /// Midpoint between the left-eye and right-eye landmarks.
    pub fn eye_midpoint(&self) -> Option<Landmark> {
        let left = self.landmarks.first()?;
        let right = self.landmarks.get(1)?;
        Some(Landmark {
            x: (left.x + right.x) / 2.0,
            y: (left.y + right.y) / 2.0,
        })
    }

    /// The nose landmark, when present (index 2 of the 5-point set).
    pub fn nose(&self) -> Option<Landmark> {
        self.landmarks.get(2).copied()
    }
}

/// Fixed-length 32-bit float embedding vector. Not guaranteed
/// L2-normalized on input.
pub type Embedding = Vec<f32>;

/// Decode a raw `Frame` into a canonical `Image` (spec.md §4.1).
pub fn decode(frame: &Frame) -> Result<Image, DecodeError> {
    match &frame.format {
        PixelFormat::Mjpeg => decode_mjpeg(frame),
        PixelFormat::Yuyv => decode_yuyv(frame),
        PixelFormat::Rgb24 => decode_rgb24(frame),
        PixelFormat::Grey => decode_grey(frame),
        PixelFormat::Y16 => decode_y16(frame),
        PixelFormat::Other(tag) => Err(DecodeError::UnsupportedFormat(tag.clone())),
    }
}

fn decode_mjpeg(frame: &Frame) -> Result<Image, DecodeError> {
    let decoded = image::load_from_memory_with_format(&frame.data, image::ImageFormat::Jpeg)?;
    let rgb = decoded.to_rgb8();
    Ok(Image {
        width: rgb.width(),
        height: rgb.height(),
        data: rgb.into_raw(),
    })
}

fn decode_rgb24(frame: &Frame) -> Result<Image, DecodeError> {
    let expected = (frame.width as usize) * (frame.height as usize) * 3;
    if frame.data.len() < expected {
        return Err(DecodeError::Malformed(format!(
            "RGB24 buffer too small: got {} expected {}",
            frame.data.len(),
            expected
        )));
    }
    Ok(Image {
        width: frame.width,
        height: frame.height,
        data: frame.data[..expected].to_vec(),
    })
}

fn decode_grey(frame: &Frame) -> Result<Image, DecodeError> {
    let n = (frame.width as usize) * (frame.height as usize);
    if frame.data.len() < n {
        return Err(DecodeError::Malformed(format!(
            "GREY buffer too small: got {} expected {}",
            frame.data.len(),
            n
        )));
    }
    let mut data = Vec::with_capacity(n * 3);
    for &y in &frame.data[..n] {
        data.push(y);
        data.push(y);
        data.push(y);
    }
    Ok(Image {
        width: frame.width,
        height: frame.height,
        data,
    })
}

fn decode_y16(frame: &Frame) -> Result<Image, DecodeError> {
    let n = (frame.width as usize) * (frame.height as usize);
    if frame.data.len() < n * 2 {
        return Err(DecodeError::Malformed(format!(
            "Y16 buffer too small: got {} expected {}",
            frame.data.len(),
            n * 2
        )));
    }
    let mut data = Vec::with_capacity(n * 3);
    for i in 0..n {
        // high byte carries the 8-bit grey value (little-endian Y16).
        let y = frame.data[i * 2 + 1];
        data.push(y);
        data.push(y);
        data.push(y);
    }
    Ok(Image {
        width: frame.width,
        height: frame.height,
        data,
    })
}

/// BT.601 YUYV -> RGB upconversion: two luminance samples share one
/// chroma pair, per spec.md §4.1.
fn decode_yuyv(frame: &Frame) -> Result<Image, DecodeError> {
    let pixels = (frame.width as usize) * (frame.height as usize);
    let expected = pixels * 2;
    if frame.data.len() < expected {
        return Err(DecodeError::Malformed(format!(
            "YUYV buffer too small: got {} expected {}",
            frame.data.len(),
            expected
        )));
    }

    let mut out = Image::new(frame.width, frame.height);
    let row_bytes = frame.width as usize * 2;

    for row in 0..frame.height as usize {
        let row_start = row * row_bytes;
        let mut x = 0usize;
        while x < frame.width as usize {
            let base = row_start + x * 2;
            let y0 = frame.data[base] as f32;
            let u = frame.data[base + 1] as f32 - 128.0;
            let y1 = frame.data[base + 2] as f32;
            let v = frame.data[base + 3] as f32 - 128.0;

            let (r0, g0, b0) = yuv_to_rgb(y0, u, v);
            out.set_pixel(x as u32, row as u32, (r0, g0, b0));

            if x + 1 < frame.width as usize {
                let (r1, g1, b1) = yuv_to_rgb(y1, u, v);
                out.set_pixel((x + 1) as u32, row as u32, (r1, g1, b1));
            }
            x += 2;
        }
    }

    Ok(out)
}

#[inline]
fn yuv_to_rgb(y: f32, u: f32, v: f32) -> (u8, u8, u8) {
    let r = y + 1.402 * v;
    let g = y - 0.344136 * u - 0.714136 * v;
    let b = y + 1.772 * u;
    (clamp_u8(r), clamp_u8(g), clamp_u8(b))
}

#[inline]
fn clamp_u8(v: f32) -> u8 {
    v.round().clamp(0.0, 255.0) as u8
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_frame(data: Vec<u8>, format: PixelFormat, w: u32, h: u32) -> Frame {
        Frame {
            data,
            width: w,
            height: h,
            format,
            timestamp: SystemTime::now(),
            sequence: 0,
        }
    }

    #[test]
    fn unsupported_format_is_none() {
        assert!(PixelFormat::from_fourcc("HEVC").is_none());
    }

    #[test]
    fn from_fourcc_lenient_wraps_unknown_tags() {
        assert_eq!(PixelFormat::from_fourcc_lenient("HEVC"), PixelFormat::Other("HEVC".to_string()));
        assert_eq!(PixelFormat::from_fourcc_lenient("GREY"), PixelFormat::Grey);
    }

    #[test]
    fn decode_on_unrecognized_format_is_unsupported_format() {
        let frame = make_frame(vec![0u8; 4], PixelFormat::Other("HEVC".to_string()), 2, 2);
        let err = decode(&frame).unwrap_err();
        assert!(matches!(err, DecodeError::UnsupportedFormat(tag) if tag == "HEVC"));
    }

    #[test]
    fn rgb24_roundtrips() {
        let mut data = vec![0u8; 2 * 2 * 3];
        data[0..3].copy_from_slice(&[10, 20, 30]);
        let frame = make_frame(data, PixelFormat::Rgb24, 2, 2);
        let img = decode(&frame).unwrap();
        assert_eq!(img.pixel(0, 0), (10, 20, 30));
    }

    #[test]
    fn grey_expands_to_rgb() {
        let data = vec![128u8; 4];
        let frame = make_frame(data, PixelFormat::Grey, 2, 2);
        let img = decode(&frame).unwrap();
        assert_eq!(img.pixel(1, 1), (128, 128, 128));
    }

    #[test]
    fn y16_takes_high_byte() {
        // little-endian Y16: low byte, high byte
        let data = vec![0x00, 0xAA, 0x00, 0xAA, 0x00, 0xAA, 0x00, 0xAA];
        let frame = make_frame(data, PixelFormat::Y16, 2, 2);
        let img = decode(&frame).unwrap();
        assert_eq!(img.pixel(0, 0), (0xAA, 0xAA, 0xAA));
    }

    #[test]
    fn yuyv_grey_input_stays_grey() {
        // Y=128, U=128, V=128 (neutral chroma) for both pixels in the pair.
        let data = vec![128, 128, 128, 128];
        let frame = make_frame(data, PixelFormat::Yuyv, 2, 1);
        let img = decode(&frame).unwrap();
        let (r, g, b) = img.pixel(0, 0);
        assert_eq!((r, g, b), (128, 128, 128));
    }

    #[test]
    fn malformed_rgb24_errors() {
        let frame = make_frame(vec![0u8; 2], PixelFormat::Rgb24, 4, 4);
        assert!(decode(&frame).is_err());
    }

    #[test]
    fn crop_clamps_to_bounds() {
        let img = Image::new(10, 10);
        let cropped = img.crop(-5.0, -5.0, 200.0, 200.0);
        assert_eq!(cropped.width, 10);
        assert_eq!(cropped.height, 10);
    }

    fn five_point_detection() -> Detection {
        Detection {
            x1: 10.0,
            y1: 10.0,
            x2: 50.0,
            y2: 60.0,
            confidence: 0.9,
            landmarks: vec![
                Landmark { x: 20.0, y: 20.0 }, // left eye
                Landmark { x: 40.0, y: 20.0 }, // right eye
                Landmark { x: 30.0, y: 35.0 }, // nose
                Landmark { x: 22.0, y: 50.0 }, // left mouth
                Landmark { x: 38.0, y: 50.0 }, // right mouth
            ],
        }
    }

    #[test]
    fn eye_distance_and_midpoint() {
        let d = five_point_detection();
        assert_eq!(d.eye_distance(), Some(20.0));
        let mid = d.eye_midpoint().unwrap();
        assert_eq!((mid.x, mid.y), (30.0, 20.0));
    }

    #[test]
    fn missing_landmarks_yield_none() {
        let d = Detection {
            x1: 0.0,
            y1: 0.0,
            x2: 1.0,
            y2: 1.0,
            confidence: 0.5,
            landmarks: vec![],
        };
        assert!(d.eye_distance().is_none());
        assert!(d.nose().is_none());
    }
}
