//! Staff detection: horizontal line runs, 5-line staff grouping, and
//! pairing staves into systems (grand staff, SATB blocks).

use crate::model::{Staff, System};
use crate::omr::constants::*;
use crate::omr::image::SheetImage;

/// Detect staff-line y coordinates.
///
/// A row is "dark" when at least 30 % of its pixels are below the ink
/// threshold; contiguous dark rows no thicker than 6 px form one line,
/// reported at the run midpoint.
pub(crate) fn detect_staff_lines(img: &SheetImage) -> Vec<u32> {
    let w = img.width();
    let min_dark = (STAFF_ROW_DARK_FRAC * w as f32) as u32;

    let mut lines = Vec::new();
    let mut run_start: Option<u32> = None;

    for y in 0..img.height() {
        let dark = img.row_dark_count(y) >= min_dark;
        match (dark, run_start) {
            (true, None) => run_start = Some(y),
            (false, Some(start)) => {
                let thickness = y - start;
                if thickness <= MAX_LINE_THICKNESS {
                    lines.push(start + thickness / 2);
                }
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(start) = run_start {
        let thickness = img.height() - start;
        if thickness <= MAX_LINE_THICKNESS {
            lines.push(start + thickness / 2);
        }
    }

    lines
}

/// Group detected lines into 5-line staves.
///
/// Consecutive lines within 2.2 × the median gap belong to the same
/// staff; a staff is emitted once it has 5 lines. Incomplete trailing
/// groups (braces, text underlines) are dropped.
pub(crate) fn group_staves(lines: &[u32]) -> Vec<Staff> {
    if lines.len() < 5 {
        return Vec::new();
    }

    let mut gaps: Vec<u32> = lines.windows(2).map(|w| w[1] - w[0]).collect();
    gaps.sort_unstable();
    let median_gap = gaps[gaps.len() / 2].max(1);
    let join_limit = STAFF_GROUP_GAP_FACTOR * median_gap as f32;

    let mut staves = Vec::new();
    let mut group: Vec<u32> = vec![lines[0]];

    for &line in &lines[1..] {
        let prev = *group.last().unwrap();
        if (line - prev) as f32 <= join_limit {
            group.push(line);
        } else {
            group.clear();
            group.push(line);
        }
        if group.len() == 5 {
            staves.push(Staff {
                lines: [group[0], group[1], group[2], group[3], group[4]],
            });
            group.clear();
        }
    }

    staves
}

/// Pair staves into systems.
///
/// Walking top to bottom, the next staff joins the current system when
/// the inter-staff gap is small relative to the staff height, or when a
/// brace / systemic barline bridges the gap in the leftmost strip of the
/// page (which survives lyrics text sitting between the staves).
/// Systems are capped at 4 staves.
pub(crate) fn pair_systems(img: &SheetImage, staves: &[Staff]) -> Vec<System> {
    let mut systems = Vec::new();
    let mut i = 0;

    while i < staves.len() {
        let mut indices = vec![i];
        while i + 1 < staves.len()
            && indices.len() < MAX_SYSTEM_STAVES
            && staves_joined(img, &staves[i], &staves[i + 1])
        {
            i += 1;
            indices.push(i);
        }
        systems.push(System {
            top: staves[indices[0]].top(),
            bottom: staves[*indices.last().unwrap()].bottom(),
            staff_indices: indices,
        });
        i += 1;
    }

    systems
}

fn staves_joined(img: &SheetImage, upper: &Staff, lower: &Staff) -> bool {
    if lower.top() <= upper.bottom() {
        return false;
    }
    let gap = lower.top() - upper.bottom();

    if (gap as f32) < SYSTEM_GAP_HEIGHT_FACTOR * upper.height().max(1) as f32 {
        return true;
    }

    has_bridging_column(img, upper, lower, gap) || has_matching_barline_columns(img, upper, lower)
}

/// Look for a brace or systemic barline: a near-continuous dark vertical
/// run in the leftmost strip spanning most of the inter-staff gap.
fn has_bridging_column(img: &SheetImage, upper: &Staff, lower: &Staff, gap: u32) -> bool {
    let strip_end = (BRACE_REGION_FRAC * img.width() as f32) as i32;
    let bridge_gap = (BRACE_RUN_GAP_FRAC * gap as f32).max(1.0) as u32;
    let min_span = (BRACE_SPAN_FRAC * gap as f32) as u32;
    let y0 = upper.bottom() as i32;
    let y1 = lower.top() as i32;

    for x in 0..strip_end {
        let mut best_run = 0u32;
        let mut run = 0u32;
        let mut misses = 0u32;
        for y in y0..=y1 {
            if img.is_dark(x, y) {
                if misses > bridge_gap {
                    run = 1;
                } else {
                    run += 1 + misses;
                }
                misses = 0;
                best_run = best_run.max(run);
            } else {
                misses += 1;
            }
        }
        if best_run >= min_span {
            return true;
        }
    }
    false
}

/// Both staves show a barline-like dense column at the same x in the
/// leftmost strip — a systemic barline drawn per staff.
fn has_matching_barline_columns(img: &SheetImage, upper: &Staff, lower: &Staff) -> bool {
    let strip_end = (BRACE_REGION_FRAC * img.width() as f32) as i32;
    for x in 0..strip_end {
        if column_dark_frac(img, x, upper.top(), upper.bottom()) >= BARLINE_COL_DARK_FRAC
            && column_dark_frac(img, x, lower.top(), lower.bottom()) >= BARLINE_COL_DARK_FRAC
        {
            return true;
        }
    }
    false
}

/// Fraction of rows in [y0, y1] that are dark in column x.
pub(crate) fn column_dark_frac(img: &SheetImage, x: i32, y0: u32, y1: u32) -> f32 {
    let total = (y1 - y0 + 1) as f32;
    let dark = (y0..=y1).filter(|&y| img.is_dark(x, y as i32)).count() as f32;
    dark / total
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    fn page_with_staves(w: u32, h: u32, staff_tops: &[u32], spacing: u32) -> SheetImage {
        let mut img = GrayImage::from_pixel(w, h, Luma([255u8]));
        for &top in staff_tops {
            for line in 0..5 {
                let y = top + line * spacing;
                for yy in y..y + 2 {
                    for x in (w / 20)..(w - w / 20) {
                        img.put_pixel(x, yy, Luma([0u8]));
                    }
                }
            }
        }
        SheetImage::from_gray(img)
    }

    #[test]
    fn detects_five_lines_per_staff() {
        let img = page_with_staves(800, 400, &[100], 10);
        let lines = detect_staff_lines(&img);
        assert_eq!(lines.len(), 5);
        assert_eq!(lines, vec![101, 111, 121, 131, 141]);
    }

    #[test]
    fn thick_runs_are_not_lines() {
        let mut raw = GrayImage::from_pixel(200, 100, Luma([255u8]));
        // 10-px-thick dark band: a title block, not a staff line
        for y in 20..30 {
            for x in 0..200 {
                raw.put_pixel(x, y, Luma([0u8]));
            }
        }
        let lines = detect_staff_lines(&SheetImage::from_gray(raw));
        assert!(lines.is_empty());
    }

    #[test]
    fn groups_ten_lines_into_two_staves() {
        let img = page_with_staves(800, 600, &[100, 300], 10);
        let lines = detect_staff_lines(&img);
        let staves = group_staves(&lines);
        assert_eq!(staves.len(), 2);
        assert_eq!(staves[0].top(), 101);
        assert_eq!(staves[1].top(), 301);
        assert_eq!(staves[0].spacing(), 10.0);
    }

    #[test]
    fn incomplete_group_is_dropped() {
        let staves = group_staves(&[100, 110, 120, 130]);
        assert!(staves.is_empty());
    }

    #[test]
    fn close_staves_pair_into_one_system() {
        // Gap 160 < 6 × height 40
        let img = page_with_staves(800, 600, &[100, 300], 10);
        let staves = group_staves(&detect_staff_lines(&img));
        let systems = pair_systems(&img, &staves);
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].staff_indices, vec![0, 1]);
    }

    #[test]
    fn distant_staves_stay_separate() {
        // Gap 260 > 6 × height 40, no brace
        let img = page_with_staves(800, 800, &[100, 400], 10);
        let staves = group_staves(&detect_staff_lines(&img));
        let systems = pair_systems(&img, &staves);
        assert_eq!(systems.len(), 2);
        assert_eq!(systems[0].staff_indices, vec![0]);
        assert_eq!(systems[1].staff_indices, vec![1]);
    }

    #[test]
    fn brace_column_joins_distant_staves() {
        let mut raw = GrayImage::from_pixel(800, 800, Luma([255u8]));
        for &top in &[100u32, 400] {
            for line in 0..5 {
                let y = top + line * 10;
                for yy in y..y + 2 {
                    for x in 40..760 {
                        raw.put_pixel(x, yy, Luma([0u8]));
                    }
                }
            }
        }
        // Systemic barline at x=42 bridging the whole gap
        for y in 100..442 {
            raw.put_pixel(42, y, Luma([0u8]));
        }
        let img = SheetImage::from_gray(raw);
        let staves = group_staves(&detect_staff_lines(&img));
        assert_eq!(staves.len(), 2);
        let systems = pair_systems(&img, &staves);
        assert_eq!(systems.len(), 1);
        assert_eq!(systems[0].staff_indices, vec![0, 1]);
    }
}
