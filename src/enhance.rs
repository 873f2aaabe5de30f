//! Image enhancement for the single OCR retry.
//!
//! Steps, each optional via `[enhance]`:
//!
//! 1. **deskew**: projection-profile search over ±5° and rotate back.
//! 2. **denoise**: 3×3 median filter, applied only when the smooth-region
//!    noise estimate is high, so clean scans are left alone.
//! 3. **contrast**: stretch the 1st–99th luminance percentile to 0–255.
//! 4. **upscale**: 2× when the shorter side is below `upscale_below_px`.

use image::imageops::FilterType;
use image::{GrayImage, Luma};

use docgate_core::error::PipelineError;

use crate::config::EnhanceConfig;
use crate::quality::{decode_gray, encode_png, histogram, luminance_percentile, INK_THRESHOLD};

/// Noise estimate above which the median filter runs.
const NOISE_THRESHOLD: f32 = 12.0;
/// Skew below this many degrees is left uncorrected.
const MIN_SKEW_DEG: f32 = 0.5;

/// An enhanced page image plus the steps that changed it.
#[derive(Debug, Clone)]
pub struct Enhanced {
    pub png: Vec<u8>,
    pub steps: Vec<&'static str>,
}

pub struct Enhancer {
    config: EnhanceConfig,
}

impl Enhancer {
    pub fn new(config: EnhanceConfig) -> Self {
        Self { config }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    /// Enhance an encoded page image. CPU-bound; call from a blocking task.
    pub fn enhance(&self, image_bytes: &[u8]) -> Result<Enhanced, PipelineError> {
        let mut gray = decode_gray(image_bytes)?;
        let mut steps = Vec::new();

        if self.config.deskew {
            if let Some(angle) = detect_skew_deg(&gray) {
                gray = rotate_deg(&gray, -angle);
                steps.push("deskew");
            }
        }
        if self.config.denoise && noise_level(&gray) >= NOISE_THRESHOLD {
            gray = median3(&gray);
            steps.push("denoise");
        }
        if let Some(stretched) = stretch_contrast(&gray) {
            gray = stretched;
            steps.push("contrast");
        }
        let short_side = gray.width().min(gray.height());
        if short_side > 0 && short_side < self.config.upscale_below_px {
            gray = image::imageops::resize(
                &gray,
                gray.width() * 2,
                gray.height() * 2,
                FilterType::CatmullRom,
            );
            steps.push("upscale");
        }

        tracing::debug!(?steps, "enhanced page image");
        Ok(Enhanced {
            png: encode_png(&gray)?,
            steps,
        })
    }
}

/// Estimated skew in degrees, or `None` when negligible or unmeasurable.
pub fn detect_skew_deg(img: &GrayImage) -> Option<f32> {
    let (w, h) = img.dimensions();
    if w < 50 || h < 50 {
        return None;
    }
    let ink = img.pixels().filter(|p| p.0[0] < INK_THRESHOLD).count();
    if (ink as f32) < (w as f32 * h as f32) * 0.02 {
        return None;
    }

    let mut best = (0.0f32, f64::NEG_INFINITY);
    for step in -20..=20 {
        let angle = step as f32 * 0.25;
        let score = row_profile_sharpness(img, angle);
        if score > best.1 {
            best = (angle, score);
        }
    }
    (best.0.abs() >= MIN_SKEW_DEG).then_some(best.0)
}

/// Sum of squared differences between adjacent bins of the ink profile
/// projected along lines of slope `angle_deg`. Aligned text lines give
/// the sharpest profile.
fn row_profile_sharpness(img: &GrayImage, angle_deg: f32) -> f64 {
    let (w, h) = img.dimensions();
    let tan = (angle_deg as f64).to_radians().tan();
    let pad = (w as f64 * tan.abs()).ceil() as i64 + 1;
    let mut rows = vec![0u32; h as usize + 2 * pad as usize];
    for y in 0..h {
        for x in (0..w).step_by(4) {
            if img.get_pixel(x, y).0[0] < INK_THRESHOLD {
                let r = (y as f64 - x as f64 * tan).round() as i64 + pad;
                if r >= 0 && (r as usize) < rows.len() {
                    rows[r as usize] += 1;
                }
            }
        }
    }
    rows.windows(2)
        .map(|pair| {
            let d = pair[1] as f64 - pair[0] as f64;
            d * d
        })
        .sum()
}

/// Rotate about the center with nearest-neighbour sampling; uncovered
/// pixels become white.
pub fn rotate_deg(img: &GrayImage, angle_deg: f32) -> GrayImage {
    let (w, h) = img.dimensions();
    let (sin, cos) = (angle_deg.to_radians() as f64).sin_cos();
    let (cx, cy) = (w as f64 / 2.0, h as f64 / 2.0);

    GrayImage::from_fn(w, h, |x, y| {
        let dx = x as f64 - cx;
        let dy = y as f64 - cy;
        let sx = (cos * dx + sin * dy + cx).round();
        let sy = (-sin * dx + cos * dy + cy).round();
        if sx >= 0.0 && sy >= 0.0 && (sx as u32) < w && (sy as u32) < h {
            *img.get_pixel(sx as u32, sy as u32)
        } else {
            Luma([255])
        }
    })
}

/// Standard deviation in the smoothest quarter of 5×5 blocks.
pub fn noise_level(img: &GrayImage) -> f32 {
    const B: u32 = 5;
    let (w, h) = img.dimensions();
    let mut variances = Vec::new();
    for by in (0..h.saturating_sub(B - 1)).step_by(B as usize) {
        for bx in (0..w.saturating_sub(B - 1)).step_by(B as usize) {
            let mut sum = 0.0f64;
            let mut sum_sq = 0.0f64;
            for y in by..by + B {
                for x in bx..bx + B {
                    let v = img.get_pixel(x, y).0[0] as f64;
                    sum += v;
                    sum_sq += v * v;
                }
            }
            let n = (B * B) as f64;
            let mean = sum / n;
            variances.push(((sum_sq / n) - mean * mean).max(0.0) as f32);
        }
    }
    if variances.is_empty() {
        return 0.0;
    }
    variances.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let smooth = &variances[..(variances.len() / 4).max(1)];
    smooth[smooth.len() / 2].sqrt()
}

pub fn median3(img: &GrayImage) -> GrayImage {
    let (w, h) = img.dimensions();
    GrayImage::from_fn(w, h, |x, y| {
        let mut window = [0u8; 9];
        let mut n = 0;
        for ny in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for nx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                window[n] = img.get_pixel(nx, ny).0[0];
                n += 1;
            }
        }
        let slice = &mut window[..n];
        slice.sort_unstable();
        Luma([slice[n / 2]])
    })
}

/// Linear stretch of the 1st–99th percentile range; `None` when the image
/// already spans the full range or is flat.
pub fn stretch_contrast(img: &GrayImage) -> Option<GrayImage> {
    let total = img.width() as u64 * img.height() as u64;
    let hist = histogram(img);
    let lo = luminance_percentile(&hist, total, 0.01) as f32;
    let hi = luminance_percentile(&hist, total, 0.99) as f32;
    if hi <= lo || (lo <= 0.0 && hi >= 255.0) {
        return None;
    }
    let scale = 255.0 / (hi - lo);
    let mut out = img.clone();
    for p in out.pixels_mut() {
        p.0[0] = ((p.0[0] as f32 - lo) * scale).round().clamp(0.0, 255.0) as u8;
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::quality::{laplacian_variance, percentile_contrast};

    fn config() -> EnhanceConfig {
        EnhanceConfig::default()
    }

    /// Horizontal dark text-like bars on a light page.
    fn lined_page(w: u32, h: u32) -> GrayImage {
        GrayImage::from_fn(w, h, |x, y| {
            if (y / 6) % 3 == 0 && x > 10 && x < w - 10 {
                Luma([30])
            } else {
                Luma([230])
            }
        })
    }

    #[test]
    fn test_contrast_stretch_widens_range() {
        let dull = GrayImage::from_fn(64, 64, |x, _| Luma([100 + (x % 40) as u8]));
        assert!(percentile_contrast(&dull) < 100.0);
        let out = stretch_contrast(&dull).unwrap();
        assert!(percentile_contrast(&out) > 200.0);
        assert!(stretch_contrast(&GrayImage::from_pixel(8, 8, Luma([50]))).is_none());
    }

    #[test]
    fn test_skew_detected_and_corrected() {
        let page = lined_page(300, 300);
        assert!(detect_skew_deg(&page).is_none());
        let skewed = rotate_deg(&page, 3.0);
        let angle = detect_skew_deg(&skewed).unwrap();
        assert!(angle.abs() >= 2.0 && angle.abs() <= 4.0);
    }

    #[test]
    fn test_median_removes_salt_noise() {
        let mut img = GrayImage::from_pixel(16, 16, Luma([255]));
        img.put_pixel(8, 8, Luma([0]));
        let out = median3(&img);
        assert_eq!(out.get_pixel(8, 8).0[0], 255);
    }

    #[test]
    fn test_clean_page_is_not_denoised() {
        assert!(noise_level(&lined_page(100, 100)) < NOISE_THRESHOLD);
    }

    #[test]
    fn test_enhance_upscales_small_pages() {
        let png = encode_png(&lined_page(200, 150)).unwrap();
        let out = Enhancer::new(config()).enhance(&png).unwrap();
        assert!(out.steps.contains(&"upscale"));
        let img = decode_gray(&out.png).unwrap();
        assert_eq!(img.dimensions(), (400, 300));
        assert!(laplacian_variance(&img) > 0.0);
    }

    #[test]
    fn test_enhance_rejects_garbage() {
        assert!(Enhancer::new(config()).enhance(b"garbage").is_err());
    }
}
