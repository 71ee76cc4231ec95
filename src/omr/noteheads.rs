//! Notehead candidate detection, the OCR confidence gate, and inline
//! accidental reading.
//!
//! Candidates are geometric first (ellipse fill, aspect, symmetry,
//! half-space snap) and only then vetted by the neural gate, so a
//! missing OCR model degrades to pass-through instead of failing.

use crate::classifiers::{Classifiers, OcrCategory, OcrReading};
use crate::model::{Accidental, Staff};
use crate::omr::constants::*;
use crate::omr::image::SheetImage;

/// A notehead candidate flowing into the pitch / rhythm mapper.
#[derive(Debug, Clone)]
pub(crate) struct HeadCandidate {
    /// Refined head center in image pixels.
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    /// Half-space offset from the bottom staff line.
    pub staff_position: i32,
    /// OCR gate reading, when a model was available.
    pub ocr: Option<OcrReading>,
    pub low_conf: bool,
    pub accidental: Option<Accidental>,
}

/// Rows occupied by line ink (±1 or ±2 rows by spacing), excluded from
/// fill statistics so line strokes do not fake or hollow out a head.
/// Covers the five staff lines plus the ledger grid extending five
/// spacings above and below, where ledger strokes cut through heads
/// exactly the way staff lines do.
#[derive(Debug, Clone)]
pub(crate) struct StaffLineMask {
    rows: Vec<(i32, i32)>,
}

impl StaffLineMask {
    pub fn new(staff: &Staff) -> Self {
        let s = staff.spacing();
        let tolerance = if s >= 12.0 { 2 } else { 1 };
        let mut centers: Vec<i32> = staff.lines.iter().map(|&y| y as i32).collect();
        for k in 1..=LEDGER_SCAN_SPACINGS as i32 {
            centers.push((staff.top() as f32 - k as f32 * s) as i32);
            centers.push((staff.bottom() as f32 + k as f32 * s) as i32);
        }
        let rows = centers.iter().map(|&y| (y - tolerance, y + tolerance)).collect();
        Self { rows }
    }

    #[inline]
    pub fn is_line_row(&self, y: i32) -> bool {
        self.rows.iter().any(|&(lo, hi)| y >= lo && y <= hi)
    }
}

/// Vertical scan reach above/below one staff, in spacings.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ScanReach {
    pub above: f32,
    pub below: f32,
}

impl Default for ScanReach {
    fn default() -> Self {
        Self { above: HEAD_SCAN_SPACINGS, below: HEAD_SCAN_SPACINGS }
    }
}

/// Detect notehead candidates on one staff.
///
/// Scans every dark pixel in the staff band left to right; a candidate
/// must pass ellipse fill, bounding-box aspect, stem rejection,
/// left/right symmetry, and the half-space snap, then survives
/// Chebyshev dedup against already-accepted heads.
pub(crate) fn detect_noteheads(
    img: &SheetImage,
    staff: &Staff,
    staff_index: usize,
    mask: &StaffLineMask,
    reach: ScanReach,
    start_x: u32,
) -> Vec<HeadCandidate> {
    let s = staff.spacing();
    let h = staff.half_space();
    let y0 = (staff.top() as f32 - reach.above * s) as i32;
    let y1 = (staff.bottom() as f32 + reach.below * s) as i32;
    let dedup = HEAD_DEDUP_SPACINGS * s;

    let mut heads: Vec<HeadCandidate> = Vec::new();

    for x in start_x as i32..img.width() as i32 {
        for y in y0..=y1 {
            if !img.is_darker_than(x, y, NOTEHEAD_DARK) {
                continue;
            }
            let Some((cx, cy)) = head_at(img, staff, mask, x, y) else {
                continue;
            };

            // Half-space snap on the refined center
            let pos_f = (staff.bottom() as f32 - cy) / h;
            let pos = pos_f.round() as i32;
            if (pos_f - pos as f32).abs() >= HEAD_MAX_SNAP_ERROR {
                continue;
            }
            if !(HEAD_MIN_POSITION..=HEAD_MAX_POSITION).contains(&pos) {
                continue;
            }

            let dup = heads.iter().any(|head| {
                let dx = (head.x as f32 - cx).abs();
                let dy = (head.y as f32 - cy).abs();
                dx.max(dy) < dedup
            });
            if dup {
                continue;
            }

            heads.push(HeadCandidate {
                x: cx.round() as u32,
                y: staff.position_to_y(pos).round() as u32,
                staff_index,
                staff_position: pos,
                ocr: None,
                low_conf: false,
                accidental: None,
            });
        }
    }

    heads.sort_by_key(|head| (head.x, head.y));
    heads
}

/// Run the geometric head tests at one candidate center. Returns the
/// dark centroid of the ellipse when all tests pass.
fn head_at(
    img: &SheetImage,
    staff: &Staff,
    mask: &StaffLineMask,
    x: i32,
    y: i32,
) -> Option<(f32, f32)> {
    let s = staff.spacing();
    let half_w = HEAD_ELLIPSE_HALF_W_SPACINGS * s;
    let half_h = HEAD_ELLIPSE_HALF_H_SPACINGS * s;

    let mut total = 0u32;
    let mut dark = 0u32;
    let mut dark_left = 0u32;
    let mut dark_right = 0u32;
    let mut sum_x = 0.0f32;
    let mut sum_y = 0.0f32;
    let mut bx0 = i32::MAX;
    let mut bx1 = i32::MIN;
    let mut by0 = i32::MAX;
    let mut by1 = i32::MIN;

    let rw = half_w as i32;
    let rh = half_h as i32;
    for dy in -rh..=rh {
        if mask.is_line_row(y + dy) {
            continue;
        }
        for dx in -rw..=rw {
            let ex = dx as f32 / half_w;
            let ey = dy as f32 / half_h;
            if ex * ex + ey * ey > 1.0 {
                continue;
            }
            total += 1;
            if img.is_darker_than(x + dx, y + dy, NOTEHEAD_DARK) {
                dark += 1;
                if dx < 0 {
                    dark_left += 1;
                } else if dx > 0 {
                    dark_right += 1;
                }
                sum_x += (x + dx) as f32;
                sum_y += (y + dy) as f32;
                bx0 = bx0.min(x + dx);
                bx1 = bx1.max(x + dx);
                by0 = by0.min(y + dy);
                by1 = by1.max(y + dy);
            }
        }
    }

    if (total as usize) < HEAD_MIN_SAMPLES {
        return None;
    }
    if (dark as f32 / total as f32) < HEAD_MIN_FILL {
        return None;
    }

    // Shape bounds
    let bb_w = (bx1 - bx0 + 1) as f32;
    let bb_h = (by1 - by0 + 1) as f32;
    let aspect = bb_w / bb_h.max(1.0);
    if !(HEAD_MIN_ASPECT..=HEAD_MAX_ASPECT).contains(&aspect) {
        return None;
    }

    // Stem rejection: a long vertical run through the centroid means
    // this is a stem or bar line, not a head.
    let cx = sum_x / dark.max(1) as f32;
    let cy = sum_y / dark.max(1) as f32;
    let run = img.vertical_run_through(cx.round() as i32, cy.round() as i32, 1);
    if run as f32 > HEAD_MAX_CENTROID_RUN_SPACINGS * s {
        return None;
    }

    // Left/right symmetry
    let lo = dark_left.min(dark_right) as f32;
    let hi = dark_left.max(dark_right).max(1) as f32;
    if lo / hi < HEAD_MIN_SYMMETRY {
        return None;
    }

    Some((cx, cy))
}

/// Run every candidate through the OCR confidence gate. With no model,
/// all candidates pass untouched.
pub(crate) fn apply_ocr_gate(
    img: &SheetImage,
    staff: &Staff,
    classifiers: &Classifiers,
    heads: Vec<HeadCandidate>,
) -> Vec<HeadCandidate> {
    if classifiers.ocr.is_none() {
        return heads;
    }
    let s = staff.spacing();
    let half = OCR_PATCH_SPACINGS * s / 2.0;

    heads
        .into_iter()
        .filter_map(|mut head| {
            let x = head.x as i32;
            let y = head.y as i32;
            let patch = ocr_patch(img, x - half as i32, y - half as i32, x + half as i32, y + half as i32);
            let Some(reading) = classifiers.run_ocr(&patch) else {
                return Some(head);
            };

            // Rest glyph mistaken for a head
            if reading.label.category == OcrCategory::Rest
                && reading.p > OCR_REST_REJECT_P
                && reading.entropy < OCR_REST_REJECT_MAX_ENTROPY
            {
                return None;
            }
            // Noise: low confidence or near-uniform distribution
            if reading.p <= OCR_NOISE_MAX_P || reading.entropy >= OCR_NOISE_MIN_ENTROPY {
                return None;
            }

            head.low_conf = reading.p <= OCR_LOW_CONF_P;
            head.ocr = Some(reading);
            Some(head)
        })
        .collect()
}

/// 24×24 inverted, standardized (zero mean / unit variance) patch for
/// the symbol OCR.
pub(crate) fn ocr_patch(img: &SheetImage, x0: i32, y0: i32, x1: i32, y1: i32) -> Vec<f32> {
    let mut patch = crate::omr::layout::resample_region(img, x0, y0, x1, y1, 24, 24);
    // Invert: ink becomes the strong signal
    for v in patch.iter_mut() {
        *v = 1.0 - *v;
    }
    let n = patch.len() as f32;
    let mean = patch.iter().sum::<f32>() / n;
    let var = patch.iter().map(|v| (v - mean) * (v - mean)).sum::<f32>() / n;
    let std = var.sqrt().max(1e-6);
    for v in patch.iter_mut() {
        *v = (*v - mean) / std;
    }
    patch
}

// ═══════════════════════════════════════════════════════════════════════
// Inline accidentals
// ═══════════════════════════════════════════════════════════════════════

/// Classify the accidental glyph (if any) in the strip left of a head.
/// Staff-line rows are transparent to the statistics so line ink never
/// fakes a glyph.
pub(crate) fn detect_accidental(
    img: &SheetImage,
    staff: &Staff,
    mask: &StaffLineMask,
    head_x: u32,
    head_y: u32,
) -> Option<Accidental> {
    let s = staff.spacing();
    let head_radius = HEAD_ELLIPSE_HALF_W_SPACINGS * s;
    let x0 = (head_x as f32 - ACC_SCAN_LEFT_SPACINGS * s) as i32;
    let x1 = (head_x as f32 - head_radius - 1.0) as i32;
    let y0 = (head_y as f32 - ACC_SCAN_HALF_HEIGHT_SPACINGS * s) as i32;
    let y1 = (head_y as f32 + ACC_SCAN_HALF_HEIGHT_SPACINGS * s) as i32;
    if x1 <= x0 {
        return None;
    }

    let stats = AccidentalStats::measure(img, mask, s, x0, y0, x1, y1)?;

    // Sharp: two verticals, crossbars, dense, vertically balanced
    if stats.vruns >= 2
        && stats.max_hrun >= ACC_HRUN_MIN_SPACINGS * s
        && stats.density > SHARP_MIN_DENSITY
        && stats.tb_skew <= SHARP_MAX_TOP_BOTTOM_SKEW
    {
        return Some(Accidental::Sharp);
    }
    // Flat: tall, bottom-heavy, bulge in the lower right
    if stats.density > FLAT_MIN_DENSITY
        && stats.aspect > FLAT_MIN_ASPECT
        && stats.bottom_two_thirds > stats.top_third
        && stats.q_br > stats.q_bl
    {
        return Some(Accidental::Flat);
    }
    // Natural: one or two verticals, short crossbars, balanced
    if stats.density > NATURAL_MIN_DENSITY
        && stats.aspect > NATURAL_MIN_ASPECT
        && (1..=2).contains(&stats.vruns)
        && stats.max_hrun >= 0.3 * s
        && stats.max_hrun < 1.2 * s
        && stats.tb_skew <= SHARP_MAX_TOP_BOTTOM_SKEW
    {
        return Some(Accidental::Natural);
    }
    None
}

struct AccidentalStats {
    vruns: usize,
    max_hrun: f32,
    density: f32,
    /// Dark bounding-box height / width.
    aspect: f32,
    /// |top − bottom| / (top + bottom) dark counts.
    tb_skew: f32,
    top_third: f32,
    bottom_two_thirds: f32,
    q_bl: f32,
    q_br: f32,
}

impl AccidentalStats {
    fn measure(
        img: &SheetImage,
        mask: &StaffLineMask,
        s: f32,
        x0: i32,
        y0: i32,
        x1: i32,
        y1: i32,
    ) -> Option<Self> {
        // Masked rows are neither dark nor counted; they also do not
        // break vertical runs.
        let ink = |x: i32, y: i32| !mask.is_line_row(y) && img.is_dark(x, y);

        // Dark bounding box inside the strip
        let mut bx0 = i32::MAX;
        let mut bx1 = i32::MIN;
        let mut by0 = i32::MAX;
        let mut by1 = i32::MIN;
        for y in y0..=y1 {
            for x in x0..=x1 {
                if ink(x, y) {
                    bx0 = bx0.min(x);
                    bx1 = bx1.max(x);
                    by0 = by0.min(y);
                    by1 = by1.max(y);
                }
            }
        }
        if bx0 > bx1 || by0 >= by1 {
            return None;
        }

        let bb_w = (bx1 - bx0 + 1) as f32;
        let bb_h = (by1 - by0 + 1) as f32;

        let masked_density = |rx0: i32, ry0: i32, rx1: i32, ry1: i32| -> f32 {
            let mut dark = 0u32;
            let mut total = 0u32;
            for y in ry0..=ry1 {
                if mask.is_line_row(y) {
                    continue;
                }
                for x in rx0..=rx1 {
                    total += 1;
                    if img.is_dark(x, y) {
                        dark += 1;
                    }
                }
            }
            if total == 0 {
                0.0
            } else {
                dark as f32 / total as f32
            }
        };

        let density = masked_density(bx0, by0, bx1, by1);

        // Vertical stroke count: columns whose longest dark run exceeds
        // 0.8 s, deduplicated within 0.25 s.
        let min_vrun = (ACC_VRUN_MIN_SPACINGS * s) as u32;
        let dedup = ACC_VRUN_DEDUP_SPACINGS * s;
        let mut vrun_cols: Vec<i32> = Vec::new();
        for x in bx0..=bx1 {
            let mut best = 0u32;
            let mut run = 0u32;
            for y in by0..=by1 {
                if mask.is_line_row(y) {
                    continue;
                }
                if img.is_dark(x, y) {
                    run += 1;
                    best = best.max(run);
                } else {
                    run = 0;
                }
            }
            if best >= min_vrun {
                if vrun_cols.last().map_or(true, |&c| (x - c) as f32 > dedup) {
                    vrun_cols.push(x);
                }
            }
        }

        // Longest horizontal run anywhere in the box
        let mut max_hrun = 0u32;
        for y in by0..=by1 {
            if mask.is_line_row(y) {
                continue;
            }
            let mut run = 0u32;
            for x in bx0..=bx1 {
                if img.is_dark(x, y) {
                    run += 1;
                    max_hrun = max_hrun.max(run);
                } else {
                    run = 0;
                }
            }
        }

        let my = (by0 + by1) / 2;
        let mx = (bx0 + bx1) / 2;
        let row_dark = |y: i32| -> u32 {
            if mask.is_line_row(y) {
                0
            } else {
                (bx0..=bx1).filter(|&x| img.is_dark(x, y)).count() as u32
            }
        };
        let top_dark: u32 = (by0..=my).map(row_dark).sum();
        let bottom_dark: u32 = (my + 1..=by1).map(row_dark).sum();
        let tb_total = (top_dark + bottom_dark).max(1) as f32;
        let tb_skew = (top_dark as f32 - bottom_dark as f32).abs() / tb_total;

        let third_y = by0 + ((bb_h / 3.0) as i32);
        let top_third = masked_density(bx0, by0, bx1, third_y);
        let bottom_two_thirds = masked_density(bx0, third_y + 1, bx1, by1);
        let q_bl = masked_density(bx0, my, mx, by1);
        let q_br = masked_density(mx, my, bx1, by1);

        Some(Self {
            vruns: vrun_cols.len(),
            max_hrun: max_hrun as f32,
            density,
            aspect: bb_h / bb_w.max(1.0),
            tb_skew,
            top_third,
            bottom_two_thirds,
            q_bl,
            q_br,
        })
    }
}
