//! Per-staff layout analysis: clef classification, key- and
//! time-signature reading, bar line detection with cross-staff
//! consensus, and ledger line counting.

use crate::classifiers::Classifiers;
use crate::model::{Barline, BarlineKind, Clef, KeyKind, KeySignature, Staff, System, TimeSignature};
use crate::omr::constants::*;
use crate::omr::image::SheetImage;
use crate::omr::staves::column_dark_frac;

// ═══════════════════════════════════════════════════════════════════════
// Clef classification
// ═══════════════════════════════════════════════════════════════════════

/// Classify the clef glyph at the head of a staff.
///
/// `role` is (index within system, system size) for the positional
/// fallback when no glyph rule matches.
pub(crate) fn detect_clef(img: &SheetImage, staff: &Staff, role: (usize, usize)) -> Clef {
    let s = staff.spacing();
    let region_end = (CLEF_REGION_FRAC * img.width() as f32) as i32;
    let y0 = (staff.top() as f32 - 2.5 * s) as i32;
    let y1 = (staff.bottom() as f32 + 2.5 * s) as i32;

    // Per-row dark counts across the clef strip. Rows holding a staff
    // line are saturated by the line itself, so blob extent is measured
    // with a count floor well above the line thickness contribution.
    let min_count = 3;
    let mut row_counts: Vec<(i32, u32)> = Vec::new();
    for y in y0..=y1 {
        let count = (0..region_end).filter(|&x| img.is_dark(x, y)).count() as u32;
        row_counts.push((y, count));
    }

    let glyph_rows: Vec<i32> = row_counts
        .iter()
        .filter(|&&(_, c)| c >= min_count)
        .map(|&(y, _)| y)
        .collect();
    let Some(&blob_top) = glyph_rows.first() else {
        return fallback_clef(role);
    };
    let blob_bottom = *glyph_rows.last().unwrap();
    let extent = (blob_bottom - blob_top) as f32;

    let above = staff.top() as f32 - blob_top as f32;
    let below = blob_bottom as f32 - staff.bottom() as f32;

    // Treble: tall blob overshooting the staff both ways.
    if above >= s && below >= 0.5 * s && extent > 3.8 * s {
        return Clef::Treble;
    }

    // Bass: compact, top-heavy, with the two dots flanking the middle
    // line.
    let mid = staff.lines[2] as i32;
    let upper: u32 = row_counts.iter().filter(|&&(y, _)| y < mid).map(|&(_, c)| c).sum();
    let lower: u32 = row_counts.iter().filter(|&&(y, _)| y >= mid).map(|&(_, c)| c).sum();
    if upper as f32 > lower as f32 * 1.1
        && extent <= 5.5 * s
        && bass_dots_present(img, staff, region_end)
    {
        return Clef::Bass;
    }

    // C clefs: vertically symmetric, mid-sized, centered on one line.
    let symmetric = {
        let hi = upper.max(1) as f32;
        let lo = lower.max(1) as f32;
        (hi / lo) < 1.6 && (lo / hi) < 1.6
    };
    if symmetric && extent >= 2.0 * s && extent <= 4.5 * s {
        if let Some(line_idx) = c_clef_center_line(img, staff, region_end) {
            return match line_idx {
                0 => Clef::Soprano,
                3 => Clef::Tenor,
                _ => Clef::Alto,
            };
        }
    }

    fallback_clef(role)
}

fn fallback_clef((idx, size): (usize, usize)) -> Clef {
    if size >= 2 && idx >= size / 2 {
        Clef::Bass
    } else {
        Clef::Treble
    }
}

/// The bass clef's two dots sit in the spaces flanking the middle line,
/// to the right of the curl.
fn bass_dots_present(img: &SheetImage, staff: &Staff, region_end: i32) -> bool {
    let s = staff.spacing();
    let upper_space_y = (staff.lines[1] + staff.lines[2]) / 2;
    let lower_space_y = (staff.lines[2] + staff.lines[3]) / 2;
    let r = (0.25 * s).max(1.0) as i32;

    let mut found_upper = false;
    let mut found_lower = false;
    for x in region_end / 2..region_end {
        for (y, flag) in [
            (upper_space_y, &mut found_upper),
            (lower_space_y, &mut found_lower),
        ] {
            if !*flag
                && img.region_density(x - r, y as i32 - r, x + r, y as i32 + r) > 0.45
            {
                *flag = true;
            }
        }
    }
    found_upper && found_lower
}

/// Dark-weighted center-of-mass row of a C clef, snapped to the nearest
/// staff line; the ±0.6 s band around that line must be at least 30 %
/// dark. Returns the line index (0 = top line).
fn c_clef_center_line(img: &SheetImage, staff: &Staff, region_end: i32) -> Option<usize> {
    let s = staff.spacing();
    let mut weighted = 0.0f64;
    let mut total = 0.0f64;
    for y in staff.top()..=staff.bottom() {
        let count = (0..region_end).filter(|&x| img.is_dark(x, y as i32)).count();
        weighted += y as f64 * count as f64;
        total += count as f64;
    }
    if total <= 0.0 {
        return None;
    }
    let com = (weighted / total) as f32;

    let (line_idx, &line_y) = staff
        .lines
        .iter()
        .enumerate()
        .min_by(|(_, &a), (_, &b)| {
            (a as f32 - com)
                .abs()
                .partial_cmp(&(b as f32 - com).abs())
                .unwrap()
        })
        .unwrap();

    let band = (0.6 * s) as i32;
    let density = img.region_density(0, line_y as i32 - band, region_end - 1, line_y as i32 + band);
    if density > 0.30 {
        Some(line_idx)
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Key signature (neural)
// ═══════════════════════════════════════════════════════════════════════

/// Read the key signature region after the clef of the reference staff
/// through the two key-signature classifiers. Missing models fall back
/// to no key signature.
pub(crate) fn read_key_signature(
    img: &SheetImage,
    staff: &Staff,
    classifiers: &Classifiers,
) -> KeySignature {
    let s = staff.spacing();
    let x0 = (CLEF_REGION_FRAC * img.width() as f32) as i32;
    let x1 = (TIME_SIG_SCAN_END_FRAC * img.width() as f32) as i32;
    let y0 = (staff.top() as f32 - s) as i32;
    let y1 = (staff.bottom() as f32 + s) as i32;

    let type_patch = resample_region(img, x0, y0, x1, y1, 15, 30);
    let Some(kind_idx) = classifiers.run_key_type(&type_patch) else {
        log::debug!("key-type model unavailable, assuming no key signature");
        return KeySignature::none();
    };

    let kind = match kind_idx {
        1 => KeyKind::Sharps,
        2 => KeyKind::Flats,
        _ => return KeySignature::none(),
    };

    let digit_patch = resample_region(img, x0, y0, x1, y1, 27, 30);
    let count = match classifiers.run_key_digit(&digit_patch) {
        Some(c) => (c as u8).min(7),
        None => {
            log::debug!("key-digit model unavailable, assuming no key signature");
            return KeySignature::none();
        }
    };
    if count == 0 {
        return KeySignature::none();
    }

    KeySignature { kind, count }
}

/// Average-pool a region to `out_w × out_h` normalized luma (0 = black,
/// 1 = white), row-major.
pub(crate) fn resample_region(
    img: &SheetImage,
    x0: i32,
    y0: i32,
    x1: i32,
    y1: i32,
    out_w: usize,
    out_h: usize,
) -> Vec<f32> {
    let w = (x1 - x0).max(1) as f32;
    let h = (y1 - y0).max(1) as f32;
    let mut out = Vec::with_capacity(out_w * out_h);
    for oy in 0..out_h {
        for ox in 0..out_w {
            let sx0 = x0 + (ox as f32 / out_w as f32 * w) as i32;
            let sx1 = x0 + ((ox + 1) as f32 / out_w as f32 * w) as i32;
            let sy0 = y0 + (oy as f32 / out_h as f32 * h) as i32;
            let sy1 = y0 + ((oy + 1) as f32 / out_h as f32 * h) as i32;
            let mut sum = 0.0f32;
            let mut n = 0u32;
            for y in sy0..=sy1.max(sy0) {
                for x in sx0..=sx1.max(sx0) {
                    sum += img.luma(x, y) as f32 / 255.0;
                    n += 1;
                }
            }
            out.push(sum / n.max(1) as f32);
        }
    }
    out
}

// ═══════════════════════════════════════════════════════════════════════
// Time signature
// ═══════════════════════════════════════════════════════════════════════

/// Scan the staff head for a stacked pair of digits and read them as a
/// time signature. Unreadable or illegal values snap to 4/4.
pub(crate) fn detect_time_signature(img: &SheetImage, staff: &Staff) -> TimeSignature {
    let w = img.width() as f32;
    let s = staff.spacing();
    let window = (TIME_SIG_WINDOW_SPACINGS * s) as i32;
    let scan_start = (TIME_SIG_SCAN_START_FRAC * w) as i32;
    let scan_end = (TIME_SIG_SCAN_END_FRAC * w) as i32;

    let top = staff.top() as i32;
    let bottom = staff.bottom() as i32;
    let mid = staff.lines[2] as i32;

    let mut x = scan_start;
    while x + window <= scan_end {
        let top_density = img.region_density(x, top, x + window, mid);
        let bottom_density = img.region_density(x, mid, x + window, bottom);
        let in_range = |d: f32| (TIME_SIG_MIN_DENSITY..=TIME_SIG_MAX_DENSITY).contains(&d);

        if in_range(top_density) && in_range(bottom_density) {
            let beats = classify_digit(img, x, top, x + window, mid);
            let beat_type = classify_digit(img, x, mid, x + window, bottom);
            let end_x = (x + window) as u32;

            if let (Some(beats), Some(beat_type)) = (beats, beat_type) {
                if (1..=16).contains(&beats)
                    && beat_type.is_power_of_two()
                    && beat_type <= 16
                {
                    let compound = beats > 3 && beats % 3 == 0 && beat_type == 8;
                    return TimeSignature { beats, beat_type, compound, end_x };
                }
                log::warn!("time signature {beats}/{beat_type} out of range, snapping to 4/4");
                return TimeSignature { beats: 4, beat_type: 4, compound: false, end_x };
            }
            // Dense stacked region that is not two digits — keep looking.
        }
        x += (s * 0.25).max(1.0) as i32;
    }

    TimeSignature::default()
}

/// Classify one digit glyph (1..=16) from quadrant-density features.
///
/// Wide windows are split at the valley between two glyphs and read as
/// two digits (only 1x combinations are legal numerators).
fn classify_digit(img: &SheetImage, x0: i32, y0: i32, x1: i32, y1: i32) -> Option<u8> {
    let bbox = dark_bbox(img, x0, y0, x1, y1)?;
    let (bx0, by0, bx1, by1) = bbox;
    let bw = (bx1 - bx0 + 1) as f32;
    let bh = (by1 - by0 + 1) as f32;
    if bw < 2.0 || bh < 3.0 {
        return None;
    }

    // Two-glyph numerators (10..16): wide box with a light valley.
    if bw / bh > 1.1 {
        if let Some(split) = glyph_valley(img, bx0, by0, bx1, by1) {
            let left = classify_single_digit(img, bx0, by0, split, by1)?;
            let right = classify_single_digit(img, split + 1, by0, bx1, by1)?;
            if left == 1 && right <= 6 {
                return Some(10 + right);
            }
            return None;
        }
    }

    classify_single_digit(img, bx0, by0, bx1, by1)
}

fn classify_single_digit(img: &SheetImage, x0: i32, y0: i32, x1: i32, y1: i32) -> Option<u8> {
    let (bx0, by0, bx1, by1) = dark_bbox(img, x0, y0, x1, y1)?;
    let bw = (bx1 - bx0 + 1) as f32;
    let bh = (by1 - by0 + 1) as f32;
    if bh < 3.0 {
        return None;
    }
    let mx = (bx0 + bx1) / 2;
    let my = (by0 + by1) / 2;

    // Quadrant densities
    let q_tl = img.region_density(bx0, by0, mx, my);
    let q_tr = img.region_density(mx, by0, bx1, my);
    let q_bl = img.region_density(bx0, my, mx, by1);
    let q_br = img.region_density(mx, my, bx1, by1);

    // Horizontal fill of the center row band
    let center_fill = img.region_density(bx0, my - 1, bx1, my + 1);

    // Top / bottom strip densities (outer 20 %)
    let strip = ((bh * 0.2) as i32).max(1);
    let top_strip = img.region_density(bx0, by0, bx1, by0 + strip);
    let bottom_strip = img.region_density(bx0, by1 - strip, bx1, by1);

    let left = q_tl + q_bl;
    let right = q_tr + q_br;
    let top = q_tl + q_tr;
    let bottom = q_bl + q_br;

    // Narrow box: 1
    if bh / bw >= 2.2 {
        return Some(1);
    }
    // 8: dense everywhere, closed top and bottom
    if q_tl > 0.35 && q_tr > 0.35 && q_bl > 0.35 && q_br > 0.35
        && top_strip > 0.5
        && bottom_strip > 0.5
    {
        return Some(8);
    }
    // 4: open top-left, strong center bar, right-side stroke
    if center_fill > 0.6 && q_bl < q_br && q_tl < q_tr + 0.15 && bottom_strip < 0.55 {
        return Some(4);
    }
    // 2: flat base, open bottom-left interior
    if bottom_strip > 0.6 && q_bl < q_tr && top > bottom * 0.6 {
        return Some(2);
    }
    // 6: bottom-heavy closed loop
    if bottom > top * 1.3 && bottom_strip > 0.45 {
        return Some(6);
    }
    // 9: top-heavy closed loop
    if top > bottom * 1.3 && top_strip > 0.45 {
        return Some(9);
    }
    // 3: right-heavy open curves
    if right > left * 1.25 {
        return Some(3);
    }
    None
}

/// Bounding box of dark pixels in a region.
fn dark_bbox(img: &SheetImage, x0: i32, y0: i32, x1: i32, y1: i32) -> Option<(i32, i32, i32, i32)> {
    let mut bx0 = i32::MAX;
    let mut by0 = i32::MAX;
    let mut bx1 = i32::MIN;
    let mut by1 = i32::MIN;
    for y in y0..=y1 {
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

/// Lightest column between two glyphs in a wide box.
fn glyph_valley(img: &SheetImage, x0: i32, y0: i32, x1: i32, y1: i32) -> Option<i32> {
    let third = (x1 - x0) / 3;
    let mut best_x = None;
    let mut best_count = u32::MAX;
    for x in x0 + third..=x1 - third {
        let count = (y0..=y1).filter(|&y| img.is_dark(x, y)).count() as u32;
        if count < best_count {
            best_count = count;
            best_x = Some(x);
        }
    }
    // A real valley is nearly empty.
    if best_count <= 1 {
        best_x
    } else {
        None
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Bar lines
// ═══════════════════════════════════════════════════════════════════════

/// Detect bar line candidates on one staff, starting past the clef /
/// signature head region.
pub(crate) fn detect_barlines(
    img: &SheetImage,
    staff: &Staff,
    staff_index: usize,
    time_sig_end_x: u32,
) -> Vec<Barline> {
    let s = staff.spacing();
    let top = staff.top();
    let bottom = staff.bottom();
    let start_x = ((BARLINE_MIN_X_FRAC * img.width() as f32) as u32).max(time_sig_end_x);
    let min_separation = (BARLINE_MIN_SEPARATION_SPACINGS * s) as u32;

    let mut barlines: Vec<Barline> = Vec::new();
    let mut x = start_x as i32;
    let end = img.width() as i32;

    while x < end {
        if column_dark_frac(img, x, top, bottom) < BARLINE_COL_DARK_FRAC {
            x += 1;
            continue;
        }
        // A stroke wider than ~6 px is not a bar line.
        let left_dense = column_dark_frac(img, x - 3, top, bottom) >= BARLINE_COL_DARK_FRAC;
        let right_dense = column_dark_frac(img, x + 3, top, bottom) >= BARLINE_COL_DARK_FRAC;
        if left_dense && right_dense {
            x += 1;
            continue;
        }
        // A notehead next to the column means this is a stem.
        if head_blob_near_column(img, staff, x) {
            x += 1;
            continue;
        }
        if let Some(prev) = barlines.last() {
            if (x as u32).saturating_sub(prev.x) < min_separation {
                x += 1;
                continue;
            }
        }

        let thickness = column_thickness(img, staff, x);
        let kind = classify_barline(img, staff, x, thickness);
        barlines.push(Barline { x: x as u32, staff_index, kind });

        // Skip the glyph (and a possible companion column) before
        // resuming the scan.
        x += thickness.max(1) as i32 + 7;
    }

    barlines
}

/// Width of the dense column group starting at x.
fn column_thickness(img: &SheetImage, staff: &Staff, x: i32) -> u32 {
    let mut t = 0u32;
    while column_dark_frac(img, x + t as i32, staff.top(), staff.bottom()) >= BARLINE_COL_DARK_FRAC
    {
        t += 1;
        if t > 12 {
            break;
        }
    }
    t.max(1)
}

fn classify_barline(img: &SheetImage, staff: &Staff, x: i32, thickness: u32) -> BarlineKind {
    let s = staff.spacing();
    let right_edge = x + thickness as i32;

    // Companion column 2..6 px to the right → double or final.
    let mut companion: Option<(i32, u32)> = None;
    for dx in 2..=6i32 {
        let cx = right_edge + dx;
        if column_dark_frac(img, cx, staff.top(), staff.bottom()) >= BARLINE_COL_DARK_FRAC {
            companion = Some((cx, column_thickness(img, staff, cx)));
            break;
        }
    }
    if let Some((_, companion_thickness)) = companion {
        return if companion_thickness >= 3 {
            BarlineKind::Final
        } else {
            BarlineKind::Double
        };
    }

    let dots_left = repeat_dots_present(img, staff, x - (0.5 * s) as i32 - 2);
    let dots_right = repeat_dots_present(img, staff, right_edge + 2);
    match (dots_left, dots_right) {
        (true, true) => BarlineKind::RepeatBoth,
        (true, false) => BarlineKind::RepeatEnd,
        (false, true) => BarlineKind::RepeatStart,
        (false, false) => BarlineKind::Single,
    }
}

/// Repeat dots: dense small circles in the two spaces flanking the
/// middle line, within half a spacing of the bar line edge.
fn repeat_dots_present(img: &SheetImage, staff: &Staff, x: i32) -> bool {
    let s = staff.spacing();
    let r = (0.18 * s).max(1.0) as i32;
    let upper_y = ((staff.lines[1] + staff.lines[2]) / 2) as i32;
    let lower_y = ((staff.lines[2] + staff.lines[3]) / 2) as i32;
    let reach = (0.5 * s) as i32;

    let mut upper = false;
    let mut lower = false;
    for dx in 0..=reach {
        if img.region_density(x + dx - r, upper_y - r, x + dx + r, upper_y + r) > 0.5 {
            upper = true;
        }
        if img.region_density(x + dx - r, lower_y - r, x + dx + r, lower_y + r) > 0.5 {
            lower = true;
        }
    }
    upper && lower
}

/// A notehead-like blob above, below, or beside the column within ±1
/// spacing marks the column as a note stem. Heads hang off the side of
/// their stem, so every half-space level from one spacing below to one
/// spacing above the staff is probed at side offsets too.
fn head_blob_near_column(img: &SheetImage, staff: &Staff, x: i32) -> bool {
    let s = staff.spacing();
    let r = (0.4 * s).max(1.0) as i32;
    let probe = |cx: i32, cy: i32| img.region_density(cx - r, cy - r, cx + r, cy + r) > 0.55;

    let half = (0.5 * s) as i32;
    let full = s as i32;
    for pos in -2..=10 {
        let y = staff.position_to_y(pos) as i32;
        if probe(x - full, y) || probe(x - half, y) || probe(x + half, y) || probe(x + full, y) {
            return true;
        }
        // Directly on the column only outside the staff, where the bar
        // line itself contributes no ink.
        if !(0..=8).contains(&pos) && probe(x, y) {
            return true;
        }
    }
    false
}

/// Cross-staff consensus: in a multi-staff system a bar line must appear
/// on every staff of the system within ±1 spacing of the same x. Also
/// enforces the minimum measure width per staff.
pub(crate) fn filter_barlines_by_system(
    per_staff: &[Vec<Barline>],
    staves: &[Staff],
    systems: &[System],
) -> Vec<Barline> {
    let mut accepted: Vec<Barline> = Vec::new();

    for system in systems {
        for &staff_idx in &system.staff_indices {
            let s = staves[staff_idx].spacing();
            let tolerance = s as i64;
            let min_width = (MIN_MEASURE_WIDTH_SPACINGS * s) as u32;

            let mut last_x: Option<u32> = None;
            for bl in &per_staff[staff_idx] {
                let agreed = system.staff_indices.iter().all(|&other| {
                    other == staff_idx
                        || per_staff[other]
                            .iter()
                            .any(|o| (o.x as i64 - bl.x as i64).abs() <= tolerance)
                });
                if !agreed {
                    continue;
                }
                if let Some(prev) = last_x {
                    if bl.x.saturating_sub(prev) < min_width {
                        continue;
                    }
                }
                last_x = Some(bl.x);
                accepted.push(*bl);
            }
        }
    }

    accepted.sort_by_key(|b| (b.staff_index, b.x));
    accepted
}

// ═══════════════════════════════════════════════════════════════════════
// Ledger lines
// ═══════════════════════════════════════════════════════════════════════

/// Short horizontal dark runs above and below the staff, sitting on
/// whole-spacing intervals from the outer lines. Returned as (x, y)
/// centers; the count feeds the metadata envelope.
pub(crate) fn detect_ledger_lines(img: &SheetImage, staff: &Staff) -> Vec<(u32, u32)> {
    let s = staff.spacing();
    let min_len = (LEDGER_MIN_LEN_SPACINGS * s) as u32;
    let max_len = (LEDGER_MAX_LEN_SPACINGS * s) as u32;
    let mut found = Vec::new();

    let levels = LEDGER_SCAN_SPACINGS as i32;
    for k in 1..=levels {
        let above = staff.top() as i32 - (k as f32 * s) as i32;
        let below = staff.bottom() as i32 + (k as f32 * s) as i32;
        for y in [above, below] {
            if y < 0 || y >= img.height() as i32 {
                continue;
            }
            collect_ledger_runs(img, y, min_len, max_len, &mut found);
        }
    }
    found
}

fn collect_ledger_runs(
    img: &SheetImage,
    y: i32,
    min_len: u32,
    max_len: u32,
    out: &mut Vec<(u32, u32)>,
) {
    let w = img.width() as i32;
    let mut run_start: Option<i32> = None;

    for x in 0..=w {
        // ±1 row tolerance for slightly bowed ledgers
        let dark = x < w && (img.is_dark(x, y) || img.is_dark(x, y - 1) || img.is_dark(x, y + 1));
        match (dark, run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(start)) => {
                let len = (x - start) as u32;
                let cx = (start + x) / 2;
                let thickness = img.vertical_run_through(cx, y, 0);
                if (min_len..=max_len).contains(&len) && thickness <= LEDGER_MAX_THICKNESS {
                    out.push((cx as u32, y as u32));
                }
                run_start = None;
            }
            _ => {}
        }
    }
}
