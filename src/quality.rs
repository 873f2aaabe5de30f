//! Pixel-level quality measurements.
//!
//! [`QualityAssessor`] turns a page image (or a text-layer page) into
//! [`Measurements`] and classifies them with the shared
//! [`QualityPolicy`]. It never touches document state; the pipeline
//! decides what to do with the resulting signal.

use std::io::Cursor;

use image::{DynamicImage, GrayImage, ImageOutputFormat};

use docgate_core::error::PipelineError;
use docgate_core::models::QualitySignal;
use docgate_core::quality::{Measurements, QualityPolicy};

/// Luminance below which a pixel counts as ink.
pub const INK_THRESHOLD: u8 = 128;
/// Block edge used for text density.
const DENSITY_BLOCK: u32 = 8;
/// Ink pixels a block needs before it counts as covered.
const MIN_INK_PER_BLOCK: usize = 2;
/// Characters of a densely written page, used to estimate density for
/// text-layer pages.
pub const TEXT_PAGE_CAPACITY_CHARS: usize = 3000;

pub struct QualityAssessor {
    policy: QualityPolicy,
}

impl QualityAssessor {
    pub fn new(policy: QualityPolicy) -> Self {
        Self { policy }
    }

    pub fn policy(&self) -> &QualityPolicy {
        &self.policy
    }

    /// Decode and measure an encoded page image.
    pub fn assess_image(
        &self,
        page: u32,
        image_bytes: &[u8],
        size_bytes: u64,
        version: u32,
    ) -> Result<QualitySignal, PipelineError> {
        let gray = decode_gray(image_bytes)?;
        Ok(self.assess_gray(page, &gray, size_bytes, version))
    }

    pub fn assess_gray(
        &self,
        page: u32,
        gray: &GrayImage,
        size_bytes: u64,
        version: u32,
    ) -> QualitySignal {
        let m = Measurements {
            page,
            width: Some(gray.width()),
            height: Some(gray.height()),
            blur_variance: Some(laplacian_variance(gray)),
            contrast: Some(percentile_contrast(gray)),
            text_density_pct: Some(ink_density_pct(gray)),
            size_bytes,
        };
        let signal = self.policy.signal(&m, version);
        tracing::debug!(
            page,
            version,
            blur = ?signal.blur_variance,
            contrast = ?signal.contrast,
            density = ?signal.text_density_pct,
            flagged = signal.flags.any(),
            "assessed page image"
        );
        signal
    }

    /// Measure a page that already has a text layer. Only density and
    /// size apply.
    pub fn assess_text(&self, page: u32, text: &str, size_bytes: u64, version: u32) -> QualitySignal {
        let chars = text.chars().filter(|c| !c.is_whitespace()).count();
        let pct = (chars as f32 / TEXT_PAGE_CAPACITY_CHARS as f32 * 100.0).min(100.0);
        let m = Measurements {
            page,
            text_density_pct: Some(pct),
            size_bytes,
            ..Default::default()
        };
        self.policy.signal(&m, version)
    }
}

/// Decode any supported image format into 8-bit luminance.
pub fn decode_gray(bytes: &[u8]) -> Result<GrayImage, PipelineError> {
    image::load_from_memory(bytes)
        .map(|img| img.to_luma8())
        .map_err(|e| PipelineError::extraction_failed("image", format!("decode failed: {}", e)))
}

pub fn encode_png(gray: &GrayImage) -> Result<Vec<u8>, PipelineError> {
    let mut cursor = Cursor::new(Vec::new());
    DynamicImage::ImageLuma8(gray.clone())
        .write_to(&mut cursor, ImageOutputFormat::Png)
        .map_err(|e| PipelineError::extraction_failed("image", format!("PNG encoding failed: {}", e)))?;
    Ok(cursor.into_inner())
}

/// Variance of the 3×3 Laplacian `[0,1,0; 1,-4,1; 0,1,0]`.
pub fn laplacian_variance(img: &GrayImage) -> f32 {
    let (w, h) = img.dimensions();
    if w < 3 || h < 3 {
        return 0.0;
    }

    let px = |x: u32, y: u32| img.get_pixel(x, y).0[0] as f64;
    let mut sum = 0.0f64;
    let mut sum_sq = 0.0f64;
    let mut count = 0u64;
    for y in 1..h - 1 {
        for x in 1..w - 1 {
            let lap = px(x, y - 1) + px(x, y + 1) + px(x - 1, y) + px(x + 1, y) - 4.0 * px(x, y);
            sum += lap;
            sum_sq += lap * lap;
            count += 1;
        }
    }

    let mean = sum / count as f64;
    ((sum_sq / count as f64) - mean * mean).max(0.0) as f32
}

/// Luminance value at fraction `p` of the cumulative histogram.
pub fn luminance_percentile(hist: &[u64; 256], total: u64, p: f64) -> u8 {
    if total == 0 {
        return 0;
    }
    let target = ((total as f64) * p).ceil().max(1.0) as u64;
    let mut acc = 0u64;
    for (value, &n) in hist.iter().enumerate() {
        acc += n;
        if acc >= target {
            return value as u8;
        }
    }
    255
}

pub fn histogram(img: &GrayImage) -> [u64; 256] {
    let mut hist = [0u64; 256];
    for p in img.pixels() {
        hist[p.0[0] as usize] += 1;
    }
    hist
}

/// Dynamic range between the 1st and 99th luminance percentile.
pub fn percentile_contrast(img: &GrayImage) -> f32 {
    let hist = histogram(img);
    let total = img.width() as u64 * img.height() as u64;
    let lo = luminance_percentile(&hist, total, 0.01);
    let hi = luminance_percentile(&hist, total, 0.99);
    hi.saturating_sub(lo) as f32
}

/// Percentage of 8×8 blocks that contain ink.
pub fn ink_density_pct(img: &GrayImage) -> f32 {
    let (w, h) = img.dimensions();
    let bw = (w + DENSITY_BLOCK - 1) / DENSITY_BLOCK;
    let bh = (h + DENSITY_BLOCK - 1) / DENSITY_BLOCK;
    if bw == 0 || bh == 0 {
        return 0.0;
    }

    let mut inked = 0usize;
    for by in 0..bh {
        for bx in 0..bw {
            let mut ink = 0usize;
            for y in by * DENSITY_BLOCK..((by + 1) * DENSITY_BLOCK).min(h) {
                for x in bx * DENSITY_BLOCK..((bx + 1) * DENSITY_BLOCK).min(w) {
                    if img.get_pixel(x, y).0[0] < INK_THRESHOLD {
                        ink += 1;
                    }
                }
            }
            if ink >= MIN_INK_PER_BLOCK {
                inked += 1;
            }
        }
    }
    inked as f32 / (bw * bh) as f32 * 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use docgate_core::models::DensityBand;
    use image::Luma;

    fn checkerboard(size: u32, cell: u32) -> GrayImage {
        GrayImage::from_fn(size, size, |x, y| {
            if ((x / cell) + (y / cell)) % 2 == 0 {
                Luma([0])
            } else {
                Luma([255])
            }
        })
    }

    #[test]
    fn test_sharp_vs_flat_laplacian() {
        assert!(laplacian_variance(&checkerboard(64, 2)) > 1000.0);
        assert_eq!(laplacian_variance(&GrayImage::from_pixel(64, 64, Luma([200]))), 0.0);
        assert_eq!(laplacian_variance(&GrayImage::new(2, 2)), 0.0);
    }

    #[test]
    fn test_percentile_contrast() {
        assert_eq!(percentile_contrast(&checkerboard(64, 8)), 255.0);
        let grey = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 20) as u8]));
        assert!(percentile_contrast(&grey) < 100.0);
    }

    #[test]
    fn test_ink_density() {
        assert_eq!(ink_density_pct(&GrayImage::from_pixel(64, 64, Luma([255]))), 0.0);
        assert_eq!(ink_density_pct(&checkerboard(64, 2)), 100.0);
        // One inked 8x8 block out of 64.
        let mut img = GrayImage::from_pixel(64, 64, Luma([255]));
        for y in 0..8 {
            for x in 0..8 {
                img.put_pixel(x, y, Luma([0]));
            }
        }
        assert!((ink_density_pct(&img) - 100.0 / 64.0).abs() < 1e-4);
    }

    #[test]
    fn test_small_blurry_image_is_flagged() {
        let assessor = QualityAssessor::new(QualityPolicy::default());
        let blurry = GrayImage::from_fn(200, 200, |x, _| Luma([(x / 2) as u8 + 20]));
        let s = assessor.assess_gray(1, &blurry, 1024, 1);
        assert!(s.flags.low_resolution);
        assert!(s.flags.blurry);
        assert!(s.flags.low_contrast);
        assert_eq!(s.version, 1);
    }

    #[test]
    fn test_assess_image_roundtrip_through_png() {
        let assessor = QualityAssessor::new(QualityPolicy::default());
        let png = encode_png(&checkerboard(400, 4)).unwrap();
        let s = assessor.assess_image(2, &png, png.len() as u64, 1).unwrap();
        assert_eq!(s.width, Some(400));
        assert!(!s.flags.any());
        assert_eq!(s.page, 2);
    }

    #[test]
    fn test_undecodable_image_fails_extraction() {
        let assessor = QualityAssessor::new(QualityPolicy::default());
        let err = assessor.assess_image(1, b"not an image", 12, 1).unwrap_err();
        assert!(matches!(err, PipelineError::ExtractionFailed { .. }));
    }

    #[test]
    fn test_text_page_density() {
        let assessor = QualityAssessor::new(QualityPolicy::default());
        let dense = "word ".repeat(1000);
        let s = assessor.assess_text(1, &dense, 10, 1);
        assert_eq!(s.density_band, Some(DensityBand::Good));
        assert_eq!(s.width, None);
        let sparse = assessor.assess_text(1, "page 3", 10, 1);
        assert_eq!(sparse.density_band, Some(DensityBand::Poor));
    }
}
