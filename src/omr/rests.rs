//! Rest detection in the horizontal gaps between noteheads.
//!
//! Windows slide across each gap; a window with plausible ink density
//! that is not a bar line goes through shape analysis (bounding box,
//! left-contour zigzag, 5-band vertical profile). There is deliberately
//! no catch-all: a window matching no rule is discarded.

use crate::model::{Duration, Staff};
use crate::omr::constants::*;
use crate::omr::image::SheetImage;
use crate::omr::noteheads::StaffLineMask;

/// A detected rest before voice assignment.
#[derive(Debug, Clone)]
pub(crate) struct RestCandidate {
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    pub rest_type: Duration,
    pub dotted: bool,
}

/// Detect rests on one staff given the accepted notehead x positions.
pub(crate) fn detect_rests(
    img: &SheetImage,
    staff: &Staff,
    staff_index: usize,
    mask: &StaffLineMask,
    head_xs: &[u32],
) -> Vec<RestCandidate> {
    let s = staff.spacing();
    let min_gap = REST_MIN_GAP_SPACINGS * s;
    let head_radius = HEAD_ELLIPSE_HALF_W_SPACINGS * s;

    let mut rests = Vec::new();
    for pair in head_xs.windows(2) {
        let gap_x0 = pair[0] as f32 + head_radius;
        let gap_x1 = pair[1] as f32 - head_radius;
        if gap_x1 - gap_x0 <= min_gap {
            continue;
        }
        scan_gap(img, staff, staff_index, mask, gap_x0, gap_x1, s, &mut rests);
    }
    rests
}

fn scan_gap(
    img: &SheetImage,
    staff: &Staff,
    staff_index: usize,
    mask: &StaffLineMask,
    gap_x0: f32,
    gap_x1: f32,
    s: f32,
    out: &mut Vec<RestCandidate>,
) {
    let window = REST_WINDOW_SPACINGS * s;
    let step = (REST_STEP_SPACINGS * s).max(1.0);
    let y0 = (staff.top() as f32 - 0.5 * s) as i32;
    let y1 = (staff.bottom() as f32 + 0.5 * s) as i32;
    let staff_height = staff.height() as f32;

    let mut x = gap_x0;
    while x + window <= gap_x1 {
        // Skip windows overlapping an already-accepted rest
        if out
            .last()
            .map_or(false, |r| r.staff_index == staff_index && (x - r.x as f32).abs() < window)
        {
            x += step;
            continue;
        }

        let wx0 = x as i32;
        let wx1 = (x + window) as i32;
        let density = masked_density(img, mask, wx0, y0, wx1, y1);
        if !(REST_MIN_DENSITY..=REST_MAX_DENSITY).contains(&density) {
            x += step;
            continue;
        }

        // A bar line fragment would show a tall raw vertical run
        let mut is_barline = false;
        for cx in wx0..=wx1 {
            let mut run = 0u32;
            let mut best = 0u32;
            for y in staff.top() as i32..=staff.bottom() as i32 {
                if img.is_dark(cx, y) {
                    run += 1;
                    best = best.max(run);
                } else {
                    run = 0;
                }
            }
            if best as f32 > REST_BARLINE_SPAN_FRAC * staff_height {
                is_barline = true;
                break;
            }
        }
        if is_barline {
            x += step;
            continue;
        }

        if let Some(rest) = classify_rest(img, staff, staff_index, mask, wx0, y0, wx1, y1, density) {
            out.push(rest);
        }
        x += step;
    }
}

/// Shape analysis and the rest-type decision table.
#[allow(clippy::too_many_arguments)]
fn classify_rest(
    img: &SheetImage,
    staff: &Staff,
    staff_index: usize,
    mask: &StaffLineMask,
    wx0: i32,
    wy0: i32,
    wx1: i32,
    wy1: i32,
    density: f32,
) -> Option<RestCandidate> {
    let s = staff.spacing();
    let (bx0, by0, bx1, by1) = masked_bbox(img, mask, wx0, wy0, wx1, wy1)?;
    let w = (bx1 - bx0 + 1) as f32;
    let h = (by1 - by0 + 1) as f32;
    let cx = ((bx0 + bx1) / 2) as u32;
    let cy = ((by0 + by1) / 2) as u32;
    let edge_tol = 0.35 * s;

    let make = |rest_type: Duration| {
        let dotted = dotted_rest(img, staff, bx1);
        Some(RestCandidate { x: cx, y: cy, staff_index, rest_type, dotted })
    };

    // Short wide bar in the upper middle space: whole hangs below the
    // second line, half sits on the middle line. Both edges can fall
    // within tolerance in the narrow space, so the closer one decides.
    if h < 0.9 * s && w > 0.5 * s && w / h > 1.2 {
        let d_whole = (by0 as f32 - staff.lines[1] as f32).abs();
        let d_half = (staff.lines[2] as f32 - by1 as f32).abs();
        let tol = edge_tol + 2.0;
        if d_whole <= tol && d_whole < d_half {
            return make(Duration::Whole);
        }
        if d_half <= tol {
            return make(Duration::Half);
        }
        return None;
    }

    // Tall zigzag: quarter
    if h >= 1.8 * s && h <= 4.5 * s && contour_changes(img, mask, bx0, by0, bx1, by1) >= 3 {
        return make(Duration::Quarter);
    }

    let bands = band_profile(img, mask, bx0, by0, bx1, by1);

    // Single-flag glyph: top-heavy
    if h >= 0.7 * s
        && h <= 2.2 * s
        && density > 0.10
        && w < 1.5 * s
        && bands[0] + bands[1] > 1.2 * (bands[3] + bands[4])
    {
        return make(Duration::Eighth);
    }

    // Double-flag glyph: two density peaks
    if h >= 0.8 * s && h <= 2.8 * s && density > 0.15 && band_peaks(&bands) >= 2 {
        return make(Duration::Sixteenth);
    }

    None
}

/// A small dense circle within 2 s right of the glyph, in the space
/// between the middle line and the line below it.
fn dotted_rest(img: &SheetImage, staff: &Staff, glyph_right: i32) -> bool {
    let s = staff.spacing();
    let r = (DOT_RADIUS_SPACINGS * s).max(1.0) as i32;
    let y = ((staff.lines[2] + staff.lines[3]) / 2) as i32;
    let reach = (2.0 * s) as i32;
    for dx in 2..=reach {
        let x = glyph_right + dx;
        if img.region_density(x - r, y - r, x + r, y + r) > DOT_MIN_FILL {
            return true;
        }
    }
    false
}

/// Direction changes of the leftmost-ink contour down the glyph.
fn contour_changes(
    img: &SheetImage,
    mask: &StaffLineMask,
    bx0: i32,
    by0: i32,
    bx1: i32,
    by1: i32,
) -> usize {
    let mut edges: Vec<i32> = Vec::new();
    for y in by0..=by1 {
        if mask.is_line_row(y) {
            continue;
        }
        if let Some(x) = (bx0..=bx1).find(|&x| img.is_dark(x, y)) {
            edges.push(x);
        }
    }

    let mut changes = 0;
    let mut last_dir = 0i32;
    for pair in edges.windows(2) {
        let delta = pair[1] - pair[0];
        if delta == 0 {
            continue;
        }
        let dir = delta.signum();
        if last_dir != 0 && dir != last_dir {
            changes += 1;
        }
        last_dir = dir;
    }
    changes
}

/// Five vertical density bands, top to bottom.
fn band_profile(
    img: &SheetImage,
    mask: &StaffLineMask,
    bx0: i32,
    by0: i32,
    bx1: i32,
    by1: i32,
) -> [f32; 5] {
    let h = (by1 - by0 + 1) as f32;
    let mut bands = [0.0f32; 5];
    for (i, band) in bands.iter_mut().enumerate() {
        let band_y0 = by0 + (i as f32 / 5.0 * h) as i32;
        let band_y1 = by0 + (((i + 1) as f32 / 5.0 * h) as i32 - 1).max(0);
        *band = masked_density(img, mask, bx0, band_y0, bx1, band_y1.max(band_y0));
    }
    bands
}

/// Count of local maxima in the band profile.
fn band_peaks(bands: &[f32; 5]) -> usize {
    let mut peaks = 0;
    for i in 0..5 {
        let left = if i == 0 { 0.0 } else { bands[i - 1] };
        let right = if i == 4 { 0.0 } else { bands[i + 1] };
        if bands[i] > 0.05 && bands[i] >= left && bands[i] > right {
            peaks += 1;
        }
    }
    peaks
}

fn masked_density(
    img: &SheetImage,
    mask: &StaffLineMask,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
) -> f32 {
    let mut dark = 0u32;
    let mut total = 0u32;
    for y in y0..=y1 {
        if mask.is_line_row(y) {
            continue;
        }
        for x in x0..=x1 {
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
}

fn masked_bbox(
    img: &SheetImage,
    mask: &StaffLineMask,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
) -> Option<(i32, i32, i32, i32)> {
    let mut bx0 = i32::MAX;
    let mut by0 = i32::MAX;
    let mut bx1 = i32::MIN;
    let mut by1 = i32::MIN;
    for y in y0..=y1 {
        if mask.is_line_row(y) {
            continue;
        }
        for x in x0..=x1 {
            if img.is_dark(x, y) {
                bx0 = bx0.min(x);
                by0 = by0.min(y);
                bx1 = bx1.max(x);
                by1 = by1.max(y);
            }
        }
    }
    if bx0 > bx1 {
        None
    } else {
        Some((bx0, by0, bx1, by1))
    }
}
