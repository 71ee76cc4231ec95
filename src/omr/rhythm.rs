//! Duration classification: stem probing, beam and flag counting, the
//! three-strategy fill vote, the OCR override, and augmentation dots.

use crate::classifiers::{OcrCategory, OcrReading};
use crate::model::{Duration, Staff};
use crate::omr::constants::*;
use crate::omr::image::SheetImage;
use crate::omr::noteheads::{HeadCandidate, StaffLineMask};

/// Stem probe result for one head.
#[derive(Debug, Clone, Copy)]
pub(crate) struct StemInfo {
    pub has_stem: bool,
    /// -1 stem up, +1 stem down, 0 stemless.
    pub dir: i8,
    pub tip_x: i32,
    pub tip_y: i32,
}

/// Duration classification result.
#[derive(Debug, Clone, Copy)]
pub(crate) struct DurationInfo {
    pub duration: Duration,
    pub dotted: bool,
    pub stem_dir: i8,
}

/// Classify the duration of one notehead.
pub(crate) fn classify_duration(
    img: &SheetImage,
    staff: &Staff,
    mask: &StaffLineMask,
    head: &HeadCandidate,
) -> DurationInfo {
    let stem = analyze_stem(img, staff, head);

    let mut beam_flag_count = 0u32;
    if stem.has_stem {
        beam_flag_count = count_beams_and_hooks(img, staff, mask, &stem);
        if beam_flag_count == 0 {
            beam_flag_count = count_flags(img, staff, mask, &stem);
        }
    }

    let votes = fill_votes(img, staff, mask, head);
    let mut filled = votes >= 2 || beam_flag_count > 0;

    // OCR override: a split vote defers to the classifier, and a
    // confident short-note class supplies missing beam counts.
    if let Some(reading) = head.ocr {
        if let Some(hint) = note_subtype(&reading) {
            if (1..=2).contains(&votes) && beam_flag_count == 0 {
                filled = !matches!(hint, Duration::Whole | Duration::Half);
            }
            if beam_flag_count == 0 {
                beam_flag_count = match hint {
                    Duration::Eighth => 1,
                    Duration::Sixteenth => 2,
                    Duration::ThirtySecond => 3,
                    _ => 0,
                };
                if beam_flag_count > 0 {
                    filled = true;
                }
            }
        }
    }

    let duration = match (stem.has_stem, filled, beam_flag_count) {
        (false, false, _) => Duration::Whole,
        (false, true, _) => Duration::Quarter,
        (true, false, 0) => Duration::Half,
        (true, true, 0) => Duration::Quarter,
        (true, _, 1) => Duration::Eighth,
        (true, _, 2) => Duration::Sixteenth,
        (true, _, _) => Duration::ThirtySecond,
    };

    let dotted = detect_dot(img, staff, head);
    let stem_dir = if stem.has_stem { stem.dir } else { 0 };

    DurationInfo { duration, dotted, stem_dir }
}

fn note_subtype(reading: &OcrReading) -> Option<Duration> {
    if reading.label.category == OcrCategory::Note {
        reading.label.subtype
    } else {
        None
    }
}

/// Probe for a stem at side offsets from the head center, scanning up
/// and down with a small gap tolerance. The longer run wins.
pub(crate) fn analyze_stem(img: &SheetImage, staff: &Staff, head: &HeadCandidate) -> StemInfo {
    let s = staff.spacing();
    let min_len = STEM_MIN_LEN_SPACINGS * s;
    let cx = head.x as i32;
    let cy = head.y as i32;

    let mut best_up = 0u32;
    let mut best_down = 0u32;
    let mut up_tip = (cx, cy);
    let mut down_tip = (cx, cy);

    let lo = (STEM_PROBE_MIN_SPACINGS * s) as i32;
    let hi = (STEM_PROBE_MAX_SPACINGS * s) as i32;
    for offset in lo..=hi {
        for dx in [offset, -offset] {
            let x = cx + dx;
            let (up, up_end) = directed_run(img, x, cy, -1);
            if up > best_up {
                best_up = up;
                up_tip = (x, up_end);
            }
            let (down, down_end) = directed_run(img, x, cy, 1);
            if down > best_down {
                best_down = down;
                down_tip = (x, down_end);
            }
        }
    }

    let has_stem = best_up.max(best_down) as f32 > min_len;
    if !has_stem {
        return StemInfo { has_stem: false, dir: 0, tip_x: cx, tip_y: cy };
    }
    if best_up >= best_down {
        StemInfo { has_stem: true, dir: -1, tip_x: up_tip.0, tip_y: up_tip.1 }
    } else {
        StemInfo { has_stem: true, dir: 1, tip_x: down_tip.0, tip_y: down_tip.1 }
    }
}

/// Length and endpoint of the dark run from (x, y) in direction `dy`
/// (±1), tolerating up to 4 light pixels.
fn directed_run(img: &SheetImage, x: i32, y: i32, dy: i32) -> (u32, i32) {
    let mut len = 0u32;
    let mut end = y;
    let mut misses = 0u32;
    let mut yy = y + dy;
    loop {
        if yy < 0 || yy >= img.height() as i32 {
            break;
        }
        if img.is_dark(x, yy) {
            len += if len == 0 { 1 } else { 1 + misses };
            misses = 0;
            end = yy;
        } else {
            misses += 1;
            if misses > STEM_GAP_TOLERANCE {
                break;
            }
        }
        yy += dy;
    }
    (len, end)
}

/// Count beam bars (and trailing hooks) crossing the stem tip.
///
/// Rows are walked from the tip inward along the stem; a row belongs to
/// a bar when a horizontal run beside the stem exceeds the beam length
/// threshold. Consecutive bar rows group into one beam; a group whose
/// longest run stays under 1.5 spacings counts as a hook. Staff-line
/// rows are transparent.
fn count_beams_and_hooks(
    img: &SheetImage,
    staff: &Staff,
    mask: &StaffLineMask,
    stem: &StemInfo,
) -> u32 {
    let s = staff.spacing();
    let min_beam = BEAM_MIN_RUN_SPACINGS * s;
    let min_hook = BEAM_HOOK_MIN_SPACINGS * s;
    let max_hook = BEAM_HOOK_MAX_SPACINGS * s;
    // Inward from the tip: down for an up-stem, up for a down-stem.
    let inward = if stem.dir < 0 { 1 } else { -1 };
    let depth = (3.0 * BEAM_LEVEL_STEP_SPACINGS * s + BEAM_BAND_HALF_SPACINGS * s) as i32;

    let mut groups = 0u32;
    let mut in_group = false;
    let mut group_max_run = 0.0f32;

    for step in 0..=depth {
        let y = stem.tip_y + inward * step;
        if mask.is_line_row(y) {
            continue;
        }
        let run = side_run(img, stem.tip_x, y).max(side_run_left(img, stem.tip_x, y));
        if run as f32 > min_beam || (in_group && run as f32 > min_hook) {
            if !in_group {
                in_group = true;
                group_max_run = 0.0;
            }
            group_max_run = group_max_run.max(run as f32);
        } else if in_group {
            in_group = false;
            if group_max_run > min_beam || (min_hook..max_hook).contains(&group_max_run) {
                groups += 1;
            }
        }
        if groups >= 3 {
            break;
        }
    }
    if in_group && (group_max_run > min_beam || (min_hook..max_hook).contains(&group_max_run)) {
        groups += 1;
    }

    groups.min(3)
}

/// Horizontal dark run to the right of the stem at row y (gap tolerant).
fn side_run(img: &SheetImage, stem_x: i32, y: i32) -> u32 {
    let mut len = 0u32;
    let mut misses = 0u32;
    let mut x = stem_x + 1;
    while x < img.width() as i32 {
        if img.is_dark(x, y) {
            len += if len == 0 { 1 } else { 1 + misses };
            misses = 0;
        } else {
            misses += 1;
            if misses > STEM_GAP_TOLERANCE {
                break;
            }
        }
        x += 1;
    }
    len
}

fn side_run_left(img: &SheetImage, stem_x: i32, y: i32) -> u32 {
    let mut len = 0u32;
    let mut misses = 0u32;
    let mut x = stem_x - 1;
    while x >= 0 {
        if img.is_dark(x, y) {
            len += if len == 0 { 1 } else { 1 + misses };
            misses = 0;
        } else {
            misses += 1;
            if misses > STEM_GAP_TOLERANCE {
                break;
            }
        }
        x -= 1;
    }
    len
}

/// Count flag glyphs beside an unbeamed stem: three zones stepping
/// inward from the tip on the flag side, each ≥25 % dark counting one.
/// Staff-line rows are excluded so lines crossing a zone don't fake a
/// flag.
fn count_flags(img: &SheetImage, staff: &Staff, mask: &StaffLineMask, stem: &StemInfo) -> u32 {
    let s = staff.spacing();
    let zone_w = (FLAG_ZONE_W_SPACINGS * s) as i32;
    let zone_h = (FLAG_ZONE_H_SPACINGS * s) as i32;
    let inward = if stem.dir < 0 { 1 } else { -1 };

    let mut flags = 0u32;
    for i in 0..3 {
        let za = stem.tip_y + inward * i * zone_h;
        let zb = za + inward * zone_h;
        // Flags curl away on the right of the stem.
        let density = masked_region_density(
            img,
            mask,
            stem.tip_x + 1,
            za.min(zb),
            stem.tip_x + zone_w,
            za.max(zb),
        );
        if density >= FLAG_MIN_FILL {
            flags += 1;
        }
    }
    flags
}

/// Three-strategy fill vote on the head interior. Returns the number of
/// strategies voting "filled" (0..=3); staff-line rows are excluded.
pub(crate) fn fill_votes(
    img: &SheetImage,
    staff: &Staff,
    mask: &StaffLineMask,
    head: &HeadCandidate,
) -> u8 {
    let s = staff.spacing();
    let r = 0.5 * s;
    let cx = head.x as i32;
    let cy = head.y as i32;
    let mut votes = 0u8;

    // R: inner rectangle of half-radius 0.5 r
    let rr = (0.5 * r).max(1.0) as i32;
    if masked_region_density(img, mask, cx - rr, cy - rr, cx + rr, cy + rr) > FILL_RECT_MIN_DENSITY
    {
        votes += 1;
    }

    // C: horizontal + vertical line through the center, radius 0.7 r
    let cr = (0.7 * r).max(1.0) as i32;
    {
        let mut dark = 0u32;
        let mut total = 0u32;
        for d in -cr..=cr {
            if !mask.is_line_row(cy) {
                total += 1;
                if img.is_darker_than(cx + d, cy, NOTEHEAD_DARK) {
                    dark += 1;
                }
            }
            if d != 0 && !mask.is_line_row(cy + d) {
                total += 1;
                if img.is_darker_than(cx, cy + d, NOTEHEAD_DARK) {
                    dark += 1;
                }
            }
        }
        if total > 0 && dark as f32 / total as f32 > FILL_CROSS_MIN_DENSITY {
            votes += 1;
        }
    }

    // P: 3×3 patch at the centroid
    if masked_region_density(img, mask, cx - 1, cy - 1, cx + 1, cy + 1) > FILL_PATCH_MIN_DENSITY {
        votes += 1;
    }

    votes
}

fn masked_region_density(
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
            if img.is_darker_than(x, y, NOTEHEAD_DARK) {
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

/// Augmentation dot: a dense small circle right of the head, snapped to
/// the nearest space row (dots never sit on a line).
pub(crate) fn detect_dot(img: &SheetImage, staff: &Staff, head: &HeadCandidate) -> bool {
    let s = staff.spacing();
    let h = staff.half_space();
    // Even staff positions sit on a line; their dot lives in the space
    // above.
    let dot_y = if head.staff_position % 2 == 0 {
        head.y as f32 - h
    } else {
        head.y as f32
    };

    let r = (DOT_RADIUS_SPACINGS * s).max(1.0) as i32;
    let x0 = (head.x as f32 + DOT_SCAN_MIN_SPACINGS * s) as i32;
    let x1 = (head.x as f32 + DOT_SCAN_MAX_SPACINGS * s) as i32;
    let y = dot_y as i32;

    for x in x0..=x1 {
        if img.region_density(x - r, y - r, x + r, y + r) > DOT_MIN_FILL {
            return true;
        }
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifiers::{label_for_class, OcrReading};
    use image::{GrayImage, Luma};

    fn staff() -> Staff {
        Staff { lines: [100, 110, 120, 130, 140] }
    }

    fn page() -> GrayImage {
        let mut img = GrayImage::from_pixel(800, 300, Luma([255u8]));
        for line in 0..5u32 {
            let y = 100 + line * 10;
            for x in 20..780 {
                img.put_pixel(x, y, Luma([0u8]));
                img.put_pixel(x, y + 1, Luma([0u8]));
            }
        }
        img
    }

    fn filled_head(img: &mut GrayImage, cx: i32, cy: i32) {
        for dy in -4i32..=4 {
            for dx in -4i32..=4 {
                if dx * dx + dy * dy <= 16 {
                    img.put_pixel((cx + dx) as u32, (cy + dy) as u32, Luma([0u8]));
                }
            }
        }
    }

    fn hollow_head(img: &mut GrayImage, cx: i32, cy: i32) {
        for dy in -5i32..=5 {
            for dx in -5i32..=5 {
                let d2 = dx * dx + dy * dy;
                if d2 <= 30 && d2 >= 7 {
                    img.put_pixel((cx + dx) as u32, (cy + dy) as u32, Luma([0u8]));
                }
            }
        }
    }

    fn stem(img: &mut GrayImage, x: i32, y0: i32, y1: i32) {
        for y in y0..=y1 {
            img.put_pixel(x as u32, y as u32, Luma([0u8]));
            img.put_pixel(x as u32 + 1, y as u32, Luma([0u8]));
        }
    }

    fn head_at(x: u32, y: u32, position: i32) -> HeadCandidate {
        HeadCandidate {
            x,
            y,
            staff_index: 0,
            staff_position: position,
            ocr: None,
            low_conf: false,
            accidental: None,
        }
    }

    fn classify(img: GrayImage, head: &HeadCandidate) -> DurationInfo {
        let st = staff();
        let mask = StaffLineMask::new(&st);
        classify_duration(&SheetImage::from_gray(img), &st, &mask, head)
    }

    #[test]
    fn stemless_hollow_head_is_whole() {
        let mut img = page();
        hollow_head(&mut img, 300, 125);
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Whole);
        assert_eq!(info.stem_dir, 0);
    }

    #[test]
    fn stemmed_hollow_head_is_half() {
        let mut img = page();
        hollow_head(&mut img, 300, 125);
        stem(&mut img, 304, 95, 123);
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Half);
        assert_eq!(info.stem_dir, -1);
    }

    #[test]
    fn stemmed_filled_head_is_quarter() {
        let mut img = page();
        filled_head(&mut img, 300, 125);
        stem(&mut img, 304, 95, 125);
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Quarter);
        assert_eq!(info.stem_dir, -1);
    }

    #[test]
    fn down_stem_filled_head_is_quarter_stem_down() {
        let mut img = page();
        filled_head(&mut img, 300, 115);
        stem(&mut img, 295, 115, 145);
        let info = classify(img, &head_at(300, 115, 5));
        assert_eq!(info.duration, Duration::Quarter);
        assert_eq!(info.stem_dir, 1);
    }

    #[test]
    fn one_beam_makes_an_eighth() {
        let mut img = page();
        filled_head(&mut img, 300, 125);
        stem(&mut img, 304, 93, 125);
        // Beam bar at the tip, extending right, above the staff
        for y in 93..97u32 {
            for x in 304..370 {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Eighth);
    }

    #[test]
    fn two_beams_make_a_sixteenth() {
        let mut img = page();
        filled_head(&mut img, 300, 125);
        stem(&mut img, 304, 82, 125);
        for (y0, y1) in [(82u32, 87u32), (92, 97)] {
            for y in y0..y1 {
                for x in 304..370 {
                    img.put_pixel(x, y, Luma([0u8]));
                }
            }
        }
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Sixteenth);
    }

    #[test]
    fn flag_zone_makes_an_eighth() {
        let mut img = page();
        filled_head(&mut img, 300, 125);
        stem(&mut img, 304, 93, 125);
        // Flag blob right of the stem tip, too short to be a beam is
        // excluded by geometry: fill one zone densely
        for y in 93..105u32 {
            for x in 306..311 {
                img.put_pixel(x, y, Luma([0u8]));
            }
        }
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Eighth);
    }

    #[test]
    fn ocr_subtype_supplies_missing_beams() {
        let mut img = page();
        filled_head(&mut img, 300, 125);
        stem(&mut img, 304, 95, 125);
        let mut head = head_at(300, 125, 3);
        // Class 12 is a sixteenth-note variant in the label table
        head.ocr = Some(OcrReading {
            class: 12,
            p: 0.9,
            entropy: 0.1,
            label: label_for_class(12),
        });
        let info = classify(img, &head);
        assert_eq!(info.duration, Duration::Sixteenth);
    }

    #[test]
    fn dot_in_space_detected() {
        let mut img = page();
        filled_head(&mut img, 300, 125);
        stem(&mut img, 304, 95, 125);
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                img.put_pixel((312 + dx) as u32, (125 + dy) as u32, Luma([0u8]));
            }
        }
        let info = classify(img, &head_at(300, 125, 3));
        assert_eq!(info.duration, Duration::Quarter);
        assert!(info.dotted);
    }

    #[test]
    fn line_note_dot_sits_in_space_above() {
        let mut img = page();
        filled_head(&mut img, 300, 120);
        stem(&mut img, 304, 90, 120);
        for dy in -2i32..=2 {
            for dx in -2i32..=2 {
                img.put_pixel((312 + dx) as u32, (115 + dy) as u32, Luma([0u8]));
            }
        }
        let info = classify(img, &head_at(300, 120, 4));
        assert!(info.dotted);
    }
}
