//! Quality thresholds and signal classification.
//!
//! The measurements themselves (Laplacian variance, contrast, ink
//! coverage) are computed from pixels in the app crate. This module only
//! turns numbers into a [`QualitySignal`] with flags and bands, so every
//! engine classifies with the same thresholds.
//!
//! | Signal | Default rule |
//! |--------|--------------|
//! | resolution | either side < 300 px → low resolution |
//! | blur | Laplacian variance < 100 → blurry |
//! | contrast | 1st–99th percentile luminance range < 100 → low contrast |
//! | text density | < 5 % poor, 5–10 % warning, ≥ 10 % good |
//! | file size | < 50 MB good, 50–100 MB warning, > 100 MB rejected |

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;
use crate::models::{now_millis, DensityBand, QualityFlags, QualitySignal, SizeBucket};

const MB: u64 = 1024 * 1024;

/// Tunable quality thresholds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityPolicy {
    pub min_width: u32,
    pub min_height: u32,
    pub blur_threshold: f32,
    pub contrast_threshold: f32,
    pub density_poor_pct: f32,
    pub density_good_pct: f32,
    pub size_warn_bytes: u64,
    pub size_max_bytes: u64,
}

impl Default for QualityPolicy {
    fn default() -> Self {
        Self {
            min_width: 300,
            min_height: 300,
            blur_threshold: 100.0,
            contrast_threshold: 100.0,
            density_poor_pct: 5.0,
            density_good_pct: 10.0,
            size_warn_bytes: 50 * MB,
            size_max_bytes: 100 * MB,
        }
    }
}

/// Raw measurements for one page. Fields that do not apply to the page
/// kind (e.g. blur for a text-layer page) are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Measurements {
    pub page: u32,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub blur_variance: Option<f32>,
    pub contrast: Option<f32>,
    pub text_density_pct: Option<f32>,
    pub size_bytes: u64,
}

impl QualityPolicy {
    pub fn size_bucket(&self, size_bytes: u64) -> SizeBucket {
        if size_bytes > self.size_max_bytes {
            SizeBucket::Oversize
        } else if size_bytes >= self.size_warn_bytes {
            SizeBucket::Warning
        } else {
            SizeBucket::Good
        }
    }

    /// Reject oversize payloads before any extraction attempt.
    pub fn check_size(&self, size_bytes: u64) -> Result<SizeBucket, PipelineError> {
        match self.size_bucket(size_bytes) {
            SizeBucket::Oversize => Err(PipelineError::OversizeRejected {
                size_bytes,
                limit_bytes: self.size_max_bytes,
            }),
            bucket => Ok(bucket),
        }
    }

    pub fn density_band(&self, pct: f32) -> DensityBand {
        if pct < self.density_poor_pct {
            DensityBand::Poor
        } else if pct < self.density_good_pct {
            DensityBand::Warning
        } else {
            DensityBand::Good
        }
    }

    /// Classify measurements into a versioned signal.
    pub fn signal(&self, m: &Measurements, version: u32) -> QualitySignal {
        let low_resolution = match (m.width, m.height) {
            (Some(w), Some(h)) => w < self.min_width || h < self.min_height,
            _ => false,
        };
        let flags = QualityFlags {
            low_resolution,
            blurry: m.blur_variance.is_some_and(|b| b < self.blur_threshold),
            low_contrast: m.contrast.is_some_and(|c| c < self.contrast_threshold),
        };

        QualitySignal {
            version,
            page: m.page,
            width: m.width,
            height: m.height,
            blur_variance: m.blur_variance,
            contrast: m.contrast,
            text_density_pct: m.text_density_pct,
            size_bucket: self.size_bucket(m.size_bytes),
            density_band: m.text_density_pct.map(|p| self.density_band(p)),
            flags,
            measured_at: now_millis(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_buckets() {
        let p = QualityPolicy::default();
        assert_eq!(p.size_bucket(10 * MB), SizeBucket::Good);
        assert_eq!(p.size_bucket(75 * MB), SizeBucket::Warning);
        assert_eq!(p.size_bucket(100 * MB), SizeBucket::Warning);
        assert_eq!(p.size_bucket(150 * MB), SizeBucket::Oversize);
    }

    #[test]
    fn test_oversize_is_rejected() {
        let p = QualityPolicy::default();
        let err = p.check_size(150 * MB).unwrap_err();
        assert!(matches!(err, PipelineError::OversizeRejected { .. }));
        assert!(p.check_size(2 * MB).is_ok());
    }

    #[test]
    fn test_density_bands() {
        let p = QualityPolicy::default();
        assert_eq!(p.density_band(2.0), DensityBand::Poor);
        assert_eq!(p.density_band(5.0), DensityBand::Warning);
        assert_eq!(p.density_band(9.99), DensityBand::Warning);
        assert_eq!(p.density_band(10.0), DensityBand::Good);
    }

    #[test]
    fn test_signal_flags() {
        let p = QualityPolicy::default();
        let m = Measurements {
            page: 1,
            width: Some(200),
            height: Some(800),
            blur_variance: Some(40.0),
            contrast: Some(180.0),
            text_density_pct: Some(12.0),
            size_bytes: 2 * MB,
        };
        let s = p.signal(&m, 1);
        assert!(s.flags.low_resolution);
        assert!(s.flags.blurry);
        assert!(!s.flags.low_contrast);
        assert_eq!(s.density_band, Some(DensityBand::Good));
        assert_eq!(s.version, 1);
    }

    #[test]
    fn test_text_page_has_no_image_flags() {
        let p = QualityPolicy::default();
        let m = Measurements {
            page: 3,
            text_density_pct: Some(3.0),
            size_bytes: 1024,
            ..Default::default()
        };
        let s = p.signal(&m, 1);
        assert!(!s.flags.any());
        assert_eq!(s.density_band, Some(DensityBand::Poor));
    }
}
