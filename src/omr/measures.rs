//! Measure bucketing, per-measure rhythm quantization, and repeat
//! expansion into play order.

use crate::model::{
    Barline, BarlineKind, Duration, Measure, ScoreEvent, TimeSignature,
};
use crate::omr::constants::*;

/// Bucket events into measures per staff, using the detected bar line
/// x positions as boundaries. Events past the last bar line form a
/// trailing open measure.
pub(crate) fn group_measures(
    events: &[ScoreEvent],
    barlines: &[Barline],
    staff_count: usize,
) -> Vec<Measure> {
    let mut measures = Vec::new();

    for staff_index in 0..staff_count {
        let mut boundaries: Vec<u32> = barlines
            .iter()
            .filter(|b| b.staff_index == staff_index)
            .map(|b| b.x)
            .collect();
        boundaries.sort_unstable();

        let mut left = 0u32;
        for (i, &right) in boundaries.iter().enumerate() {
            let bucket: Vec<usize> = events
                .iter()
                .enumerate()
                .filter(|(_, e)| {
                    e.staff_index() == staff_index && e.x() >= left && e.x() < right
                })
                .map(|(idx, _)| idx)
                .collect();
            measures.push(Measure {
                measure_index: i,
                staff_index,
                events: bucket,
                left,
                right: Some(right),
            });
            left = right;
        }

        // Trailing open measure
        let bucket: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.staff_index() == staff_index && e.x() >= left)
            .map(|(idx, _)| idx)
            .collect();
        if !bucket.is_empty() || boundaries.is_empty() {
            measures.push(Measure {
                measure_index: boundaries.len(),
                staff_index,
                events: bucket,
                left,
                right: None,
            });
        }
    }

    measures
}

/// Measure index for an event x on a staff (bar lines sorted by x).
pub(crate) fn measure_index_for_x(boundaries: &[u32], x: u32) -> usize {
    boundaries.iter().take_while(|&&b| x >= b).count()
}

// ═══════════════════════════════════════════════════════════════════════
// Rhythm quantization
// ═══════════════════════════════════════════════════════════════════════

/// Group event indices into beat columns: events within 10 px of each
/// other sound together. Returns columns in x order.
pub(crate) fn beat_columns(events: &[ScoreEvent], indices: &[usize]) -> Vec<Vec<usize>> {
    let mut sorted: Vec<usize> = indices.to_vec();
    sorted.sort_by_key(|&i| (events[i].x(), i));

    let mut columns: Vec<Vec<usize>> = Vec::new();
    for idx in sorted {
        match columns.last_mut() {
            Some(col)
                if events[idx].x().saturating_sub(events[col[0]].x())
                    <= BEAT_COLUMN_TOLERANCE_PX =>
            {
                col.push(idx);
            }
            _ => columns.push(vec![idx]),
        }
    }
    columns
}

/// Beats a measure actually advances: the shortest voice in each beat
/// column moves time forward.
fn measure_beats(events: &[ScoreEvent], columns: &[Vec<usize>]) -> f32 {
    columns
        .iter()
        .map(|col| {
            col.iter()
                .map(|&i| events[i].beats())
                .fold(f32::MAX, f32::min)
        })
        .sum()
}

/// Quantize every measure of one staff against the time signature.
///
/// A measure further than 0.1 beats from the expected total (first and
/// last measures exempt — pickups and final bars are legitimately
/// short) has each event scaled by expected/actual and snapped back to
/// a named duration; any residual lands on the last non-tied event of
/// the last column.
pub(crate) fn quantize_measures(
    events: &mut [ScoreEvent],
    measures: &[Measure],
    time_signature: &TimeSignature,
) {
    let expected = time_signature.beats_per_measure();

    for staff_index in 0..=measures.iter().map(|m| m.staff_index).max().unwrap_or(0) {
        let staff_measures: Vec<&Measure> = measures
            .iter()
            .filter(|m| m.staff_index == staff_index && !m.events.is_empty())
            .collect();

        for (pos, measure) in staff_measures.iter().enumerate() {
            let exempt = pos == 0 || pos + 1 == staff_measures.len();
            if exempt {
                continue;
            }
            quantize_one_measure(events, &measure.events, expected);
        }
    }
}

fn quantize_one_measure(events: &mut [ScoreEvent], indices: &[usize], expected: f32) {
    let columns = beat_columns(events, indices);
    if columns.is_empty() {
        return;
    }
    let actual = measure_beats(events, &columns);
    if actual <= 0.0 || (actual - expected).abs() <= QUANTIZE_TRIGGER_BEATS {
        return;
    }

    let scale = expected / actual;
    for &i in indices {
        scale_event(&mut events[i], scale);
    }

    // Residual correction on the last non-tied event of the last column
    let columns = beat_columns(events, indices);
    let actual = measure_beats(events, &columns);
    let residual = expected - actual;
    debug_assert!(
        residual.abs() <= 0.5,
        "quantization residual {residual} exceeds half a beat"
    );
    if residual.abs() > QUANTIZE_TRIGGER_BEATS / 2.0 {
        if let Some(&target) = columns
            .last()
            .and_then(|col| {
                col.iter().rev().find(|&&i| match &events[i] {
                    ScoreEvent::Note(n) => n.tied_beats.is_none(),
                    ScoreEvent::Rest(_) => true,
                })
            })
        {
            let beats = events[target].beats() + residual;
            set_event_duration(&mut events[target], Duration::closest_named(beats));
        }
    }
}

fn scale_event(event: &mut ScoreEvent, scale: f32) {
    match event {
        ScoreEvent::Note(n) => {
            if let Some(tb) = n.tied_beats.as_mut() {
                *tb *= scale;
            } else {
                let scaled = n.duration.beats(n.dotted) * scale;
                let (d, dot) = Duration::closest_named(scaled);
                n.duration = d;
                n.dotted = dot;
            }
        }
        ScoreEvent::Rest(r) => {
            let scaled = r.rest_type.beats(r.dotted) * scale;
            let (d, dot) = Duration::closest_named(scaled);
            r.rest_type = d;
            r.dotted = dot;
        }
    }
}

fn set_event_duration(event: &mut ScoreEvent, (duration, dotted): (Duration, bool)) {
    match event {
        ScoreEvent::Note(n) => {
            n.duration = duration;
            n.dotted = dotted;
        }
        ScoreEvent::Rest(r) => {
            r.rest_type = duration;
            r.dotted = dotted;
        }
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Repeat expansion
// ═══════════════════════════════════════════════════════════════════════

/// A repeated span in image x coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RepeatRegion {
    pub left: u32,
    pub right: u32,
}

/// Derive repeat regions from the bar line list. An unmatched closing
/// repeat implies a start at x = 0; a both-sided repeat closes one
/// region and opens the next.
pub(crate) fn repeat_regions(barlines: &[Barline]) -> Vec<RepeatRegion> {
    let mut marks: Vec<(u32, BarlineKind)> = barlines
        .iter()
        .filter(|b| b.kind.opens_repeat() || b.kind.closes_repeat())
        .map(|b| (b.x, b.kind))
        .collect();
    marks.sort_by_key(|&(x, _)| x);
    // Bar lines repeat per staff at the same x; keep one mark per x.
    marks.dedup_by_key(|&mut (x, _)| x);

    let mut regions = Vec::new();
    let mut open_left = 0u32;
    for (x, kind) in marks {
        if kind.closes_repeat() {
            regions.push(RepeatRegion { left: open_left, right: x });
        }
        if kind.opens_repeat() {
            open_left = x;
        }
    }
    regions
}

/// Expand repeats by duplicating each region's events into the span
/// right of it, shifting everything after the region to make room.
///
/// Regions are processed right to left so earlier shifts never move a
/// region that is still pending. A region whose duplicate span already
/// holds repeated events is skipped, which makes expansion idempotent
/// on an already-expanded list.
pub(crate) fn expand_repeats(events: &mut Vec<ScoreEvent>, regions: &[RepeatRegion]) {
    let mut ordered: Vec<RepeatRegion> = regions.to_vec();
    ordered.sort_by_key(|r| r.right);

    for region in ordered.iter().rev() {
        let width = region.right - region.left + 1;

        let already_expanded = events.iter().any(|e| {
            e.is_repeated() && e.x() > region.right && e.x() <= region.right + width
        });
        if already_expanded {
            continue;
        }

        // Shift everything past the region to open a copy slot
        for event in events.iter_mut() {
            if event.x() > region.right {
                event.set_x(event.x() + width);
            }
        }

        // Duplicate the region's events into the slot
        let mut copies: Vec<ScoreEvent> = events
            .iter()
            .filter(|e| e.x() > region.left && e.x() <= region.right)
            .cloned()
            .collect();
        for copy in copies.iter_mut() {
            copy.set_x(copy.x() + width);
            copy.set_repeated(true);
        }
        events.extend(copies);
    }

    events.sort_by_key(|e| (e.staff_index(), e.x()));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Clef, Note, Voice};

    fn quarter_note(x: u32, staff_index: usize, midi: u8) -> ScoreEvent {
        ScoreEvent::Note(Note {
            x,
            y: 120,
            staff_index,
            staff_position: 4,
            pitch_name: 'B',
            midi_note: midi,
            duration: Duration::Quarter,
            dotted: false,
            tied_beats: None,
            stem_dir: -1,
            voice: Voice::Soprano,
            clef: Clef::Treble,
            accidental: None,
            repeated: false,
        })
    }

    fn barline(x: u32, staff_index: usize, kind: BarlineKind) -> Barline {
        Barline { x, staff_index, kind }
    }

    #[test]
    fn events_bucket_between_barlines() {
        let events = vec![
            quarter_note(100, 0, 60),
            quarter_note(250, 0, 62),
            quarter_note(500, 0, 64),
        ];
        let barlines = vec![
            barline(200, 0, BarlineKind::Single),
            barline(400, 0, BarlineKind::Single),
        ];
        let measures = group_measures(&events, &barlines, 1);
        assert_eq!(measures.len(), 3);
        assert_eq!(measures[0].events, vec![0]);
        assert_eq!(measures[1].events, vec![1]);
        assert_eq!(measures[2].events, vec![2]);
        assert_eq!(measures[2].right, None);
    }

    #[test]
    fn beat_columns_group_chords() {
        let events = vec![
            quarter_note(100, 0, 60),
            quarter_note(104, 0, 64), // same column
            quarter_note(160, 0, 67),
        ];
        let columns = beat_columns(&events, &[0, 1, 2]);
        assert_eq!(columns.len(), 2);
        assert_eq!(columns[0], vec![0, 1]);
    }

    #[test]
    fn quantization_rescales_inner_measure() {
        // Middle measure holds five quarters in 4/4: scaled by 4/5 and
        // snapped, totals return to ~4 beats.
        let mut events: Vec<ScoreEvent> = Vec::new();
        events.push(quarter_note(50, 0, 60));
        for i in 0..5 {
            events.push(quarter_note(220 + i * 30, 0, 62));
        }
        events.push(quarter_note(450, 0, 64));
        let barlines = vec![
            barline(200, 0, BarlineKind::Single),
            barline(400, 0, BarlineKind::Single),
        ];
        let measures = group_measures(&events, &barlines, 1);
        quantize_measures(&mut events, &measures, &TimeSignature::default());

        let inner: Vec<usize> = (1..=5).collect();
        let columns = beat_columns(&events, &inner);
        let total: f32 = columns
            .iter()
            .map(|c| c.iter().map(|&i| events[i].beats()).fold(f32::MAX, f32::min))
            .sum();
        assert!((total - 4.0).abs() <= 0.26, "quantized total {total} not near 4");
    }

    #[test]
    fn pickup_and_final_measures_exempt() {
        let mut events = vec![
            quarter_note(50, 0, 60), // lone pickup quarter
            quarter_note(250, 0, 62),
            quarter_note(280, 0, 64),
            quarter_note(310, 0, 65),
            quarter_note(340, 0, 67),
            quarter_note(450, 0, 69), // short final measure
        ];
        let barlines = vec![
            barline(200, 0, BarlineKind::Single),
            barline(400, 0, BarlineKind::Single),
        ];
        let measures = group_measures(&events, &barlines, 1);
        let before = events.clone();
        quantize_measures(&mut events, &measures, &TimeSignature::default());
        assert_eq!(events, before, "exempt measures must not change");
    }

    #[test]
    fn repeat_regions_from_barlines() {
        let barlines = vec![
            barline(200, 0, BarlineKind::RepeatStart),
            barline(600, 0, BarlineKind::RepeatEnd),
            barline(200, 1, BarlineKind::RepeatStart),
            barline(600, 1, BarlineKind::RepeatEnd),
        ];
        let regions = repeat_regions(&barlines);
        assert_eq!(regions, vec![RepeatRegion { left: 200, right: 600 }]);
    }

    #[test]
    fn unmatched_repeat_end_starts_at_zero() {
        let barlines = vec![barline(500, 0, BarlineKind::RepeatEnd)];
        let regions = repeat_regions(&barlines);
        assert_eq!(regions, vec![RepeatRegion { left: 0, right: 500 }]);
    }

    #[test]
    fn repeat_expansion_duplicates_and_shifts() {
        let mut events = vec![
            quarter_note(250, 0, 60),
            quarter_note(350, 0, 62),
            quarter_note(450, 0, 64),
            quarter_note(550, 0, 65),
            quarter_note(700, 0, 67), // after the region
        ];
        let regions = vec![RepeatRegion { left: 200, right: 600 }];
        expand_repeats(&mut events, &regions);

        assert_eq!(events.len(), 9);
        let repeated: Vec<&ScoreEvent> = events.iter().filter(|e| e.is_repeated()).collect();
        assert_eq!(repeated.len(), 4);
        // Copies land right after the region, shifted by its width
        assert_eq!(repeated[0].x(), 250 + 401);
        // The trailing note moved past the copies
        assert_eq!(events.last().unwrap().x(), 700 + 401);
        // Ordering is restored
        for pair in events.windows(2) {
            assert!(pair[0].x() <= pair[1].x());
        }
    }

    #[test]
    fn repeat_expansion_is_idempotent() {
        let mut events = vec![
            quarter_note(250, 0, 60),
            quarter_note(350, 0, 62),
            quarter_note(700, 0, 67),
        ];
        let regions = vec![RepeatRegion { left: 200, right: 600 }];
        expand_repeats(&mut events, &regions);
        let once: Vec<(u32, usize)> = events.iter().map(|e| (e.x(), e.staff_index())).collect();

        expand_repeats(&mut events, &regions);
        let twice: Vec<(u32, usize)> = events.iter().map(|e| (e.x(), e.staff_index())).collect();
        assert_eq!(once, twice);
    }
}
