//! Image loading and normalization: decode, downscale, luma conversion,
//! auto-contrast, and small-skew correction.
//!
//! Everything downstream works on a single-channel 8-bit page no wider
//! than 1400 px, origin top-left, immutable after this stage.

use image::imageops::FilterType;
use image::{GrayImage, Luma};
use imageproc::geometric_transformations::{rotate_about_center, Interpolation};

use crate::error::OmrError;
use crate::omr::constants::*;

/// The normalized page every later stage reads from.
#[derive(Debug, Clone)]
pub struct SheetImage {
    gray: GrayImage,
}

impl SheetImage {
    /// Decode, rescale to ≤1400 px width, convert to luma, stretch
    /// contrast and correct skew above 0.15°.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, OmrError> {
        let decoded = image::load_from_memory(bytes)
            .map_err(|e| OmrError::ImageDecode(e.to_string()))?;

        let (w, h) = (decoded.width(), decoded.height());
        if w < MIN_IMAGE_DIM || h < MIN_IMAGE_DIM {
            return Err(OmrError::ImageTooSmall { width: w, height: h });
        }

        // Downscale only; a narrow photo is left at its native size.
        let decoded = if w > TARGET_WIDTH {
            let new_h = ((h as u64 * TARGET_WIDTH as u64) / w as u64).max(1) as u32;
            decoded.resize_exact(TARGET_WIDTH, new_h, FilterType::Triangle)
        } else {
            decoded
        };

        let mut gray = decoded.to_luma8();
        auto_contrast(&mut gray);

        let mut sheet = Self { gray };
        let skew_deg = estimate_skew_degrees(&sheet);
        if skew_deg.abs() > SKEW_CORRECT_MIN_DEG {
            log::debug!("correcting page skew of {skew_deg:.2}°");
            let theta = -skew_deg.to_radians();
            sheet.gray =
                rotate_about_center(&sheet.gray, theta, Interpolation::Bilinear, Luma([255u8]));
        }

        Ok(sheet)
    }

    /// Wrap an already-prepared luma page. Test seam; skips decode,
    /// rescale and deskew.
    pub fn from_gray(gray: GrayImage) -> Self {
        Self { gray }
    }

    pub fn width(&self) -> u32 {
        self.gray.width()
    }

    pub fn height(&self) -> u32 {
        self.gray.height()
    }

    /// Luma at (x, y); out-of-bounds reads are white.
    #[inline]
    pub fn luma(&self, x: i32, y: i32) -> u8 {
        if x < 0 || y < 0 || x >= self.gray.width() as i32 || y >= self.gray.height() as i32 {
            255
        } else {
            self.gray.get_pixel(x as u32, y as u32)[0]
        }
    }

    /// Ink test at the global threshold.
    #[inline]
    pub fn is_dark(&self, x: i32, y: i32) -> bool {
        self.luma(x, y) < DARK_LUMA
    }

    /// Ink test at an explicit threshold.
    #[inline]
    pub fn is_darker_than(&self, x: i32, y: i32, threshold: u8) -> bool {
        self.luma(x, y) < threshold
    }

    /// Count of dark pixels in row `y`.
    pub fn row_dark_count(&self, y: u32) -> u32 {
        (0..self.gray.width())
            .filter(|&x| self.is_dark(x as i32, y as i32))
            .count() as u32
    }

    /// Dark-pixel density inside a clipped rectangle.
    pub fn region_density(&self, x0: i32, y0: i32, x1: i32, y1: i32) -> f32 {
        let mut dark = 0u32;
        let mut total = 0u32;
        for y in y0.min(y1)..=y0.max(y1) {
            for x in x0.min(x1)..=x0.max(x1) {
                total += 1;
                if self.is_dark(x, y) {
                    dark += 1;
                }
            }
        }
        if total == 0 {
            0.0
        } else {
            dark as f32 / total as f32
        }
    }

    /// Length of the longest contiguous dark vertical run through
    /// (x, y), growing both directions, tolerating `gap` light pixels.
    pub fn vertical_run_through(&self, x: i32, y: i32, gap: u32) -> u32 {
        if !self.is_dark(x, y) {
            return 0;
        }
        let mut up = 0u32;
        let mut misses = 0u32;
        let mut yy = y - 1;
        while yy >= 0 {
            if self.is_dark(x, yy) {
                up += 1 + misses;
                misses = 0;
            } else {
                misses += 1;
                if misses > gap {
                    break;
                }
            }
            yy -= 1;
        }
        let mut down = 0u32;
        misses = 0;
        yy = y + 1;
        while yy < self.height() as i32 {
            if self.is_dark(x, yy) {
                down += 1 + misses;
                misses = 0;
            } else {
                misses += 1;
                if misses > gap {
                    break;
                }
            }
            yy += 1;
        }
        up + down + 1
    }
}

/// Linear stretch of the luma range to [0, 255].
fn auto_contrast(gray: &mut GrayImage) {
    let mut min = 255u8;
    let mut max = 0u8;
    for p in gray.pixels() {
        min = min.min(p[0]);
        max = max.max(p[0]);
    }
    if max <= min {
        return;
    }
    let range = (max - min) as f32;
    for p in gray.pixels_mut() {
        p[0] = (((p[0] - min) as f32 / range) * 255.0).round() as u8;
    }
}

/// Estimate page skew in degrees from staff-line candidate rows.
///
/// Samples ~20 equally spaced rows; a row with ≥30 % dark pixels is a
/// staff-line candidate. For each candidate the dark-run centers at the
/// leftmost and rightmost dark columns give one slope sample; the
/// estimate is the median of all samples.
fn estimate_skew_degrees(img: &SheetImage) -> f32 {
    let (w, h) = (img.width() as i32, img.height() as i32);
    let mut samples: Vec<f32> = Vec::new();

    for i in 1..=SKEW_SAMPLE_ROWS as i32 {
        let y = (h * i) / (SKEW_SAMPLE_ROWS as i32 + 1);
        let dark = img.row_dark_count(y as u32);
        if (dark as f32) < STAFF_ROW_DARK_FRAC * w as f32 {
            continue;
        }

        let left = (0..w).find(|&x| img.is_dark(x, y));
        let right = (0..w).rev().find(|&x| img.is_dark(x, y));
        let (Some(x0), Some(x1)) = (left, right) else { continue };
        if x1 - x0 < w / 4 {
            continue;
        }

        let y_left = dark_run_center(&img, x0, y);
        let y_right = dark_run_center(&img, x1, y);
        let angle = (y_right - y_left).atan2((x1 - x0) as f32).to_degrees();
        if angle.abs() < 10.0 {
            samples.push(angle);
        }
    }

    if samples.is_empty() {
        return 0.0;
    }
    samples.sort_by(|a, b| a.partial_cmp(b).unwrap());
    samples[samples.len() / 2]
}

/// Center row of the contiguous dark run through (x, y), probing a few
/// rows either side.
fn dark_run_center(img: &SheetImage, x: i32, y: i32) -> f32 {
    let mut top = y;
    while top > y - 6 && img.is_dark(x, top - 1) {
        top -= 1;
    }
    let mut bottom = y;
    while bottom < y + 6 && img.is_dark(x, bottom + 1) {
        bottom += 1;
    }
    (top + bottom) as f32 / 2.0
}
