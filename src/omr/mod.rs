//! The recognition pipeline: a sequential driver running image
//! normalization, staff detection, layout analysis, symbol detection,
//! the neural gate, and pitch/rhythm mapping, with a cooperative
//! cancellation check between stages.

pub(crate) mod constants;
pub(crate) mod image;
pub(crate) mod layout;
pub(crate) mod measures;
pub(crate) mod noteheads;
pub(crate) mod pitch;
pub(crate) mod rests;
pub(crate) mod rhythm;
pub(crate) mod staves;

use crate::classifiers::Classifiers;
use crate::error::OmrError;
use crate::model::{
    Note, Score, ScoreEvent, ScoreMetadata, Staff, System, TimeSignature,
};
use crate::CancelFlag;
use constants::*;
use image::SheetImage;
use noteheads::{HeadCandidate, ScanReach, StaffLineMask};

/// Run the full recognition pipeline over decoded image bytes.
pub(crate) fn run_pipeline(
    image_bytes: &[u8],
    classifiers: &Classifiers,
    cancel: &CancelFlag,
) -> Result<Score, OmrError> {
    cancel.check()?;
    let img = SheetImage::from_bytes(image_bytes)?;
    recognize(&img, classifiers, cancel)
}

/// Pipeline stages B..G over a normalized page.
pub(crate) fn recognize(
    img: &SheetImage,
    classifiers: &Classifiers,
    cancel: &CancelFlag,
) -> Result<Score, OmrError> {
    // ── B: staves and systems ───────────────────────────────────────
    cancel.check()?;
    let lines = staves::detect_staff_lines(img);
    let staff_list = staves::group_staves(&lines);
    if staff_list.is_empty() {
        return Err(OmrError::NoStavesDetected);
    }
    let systems = staves::pair_systems(img, &staff_list);
    log::debug!(
        "detected {} staves in {} systems",
        staff_list.len(),
        systems.len()
    );

    // ── C: clefs, signatures, bar lines, ledgers ────────────────────
    cancel.check()?;
    let clefs: Vec<_> = staff_list
        .iter()
        .enumerate()
        .map(|(i, staff)| layout::detect_clef(img, staff, system_role(&systems, i)))
        .collect();

    let key_signature = layout::read_key_signature(img, &staff_list[0], classifiers);
    let time_signature = layout::detect_time_signature(img, &staff_list[0]);

    let per_staff_bars: Vec<_> = staff_list
        .iter()
        .enumerate()
        .map(|(i, staff)| layout::detect_barlines(img, staff, i, time_signature.end_x))
        .collect();
    let bar_lines = layout::filter_barlines_by_system(&per_staff_bars, &staff_list, &systems);

    let ledger_line_count: usize = staff_list
        .iter()
        .map(|staff| layout::detect_ledger_lines(img, staff).len())
        .sum();

    // ── D/E: symbols through the neural gate ────────────────────────
    cancel.check()?;
    let symbol_start_x = symbol_scan_start(img, &time_signature);
    let mut staff_heads: Vec<Vec<HeadCandidate>> = Vec::with_capacity(staff_list.len());
    let mut staff_rests = Vec::with_capacity(staff_list.len());

    for (i, staff) in staff_list.iter().enumerate() {
        let mask = StaffLineMask::new(staff);
        let reach = scan_reach(staff, i, &staff_list, &systems);
        let heads = noteheads::detect_noteheads(img, staff, i, &mask, reach, symbol_start_x);
        let mut heads = noteheads::apply_ocr_gate(img, staff, classifiers, heads);
        for head in heads.iter_mut() {
            head.accidental = noteheads::detect_accidental(img, staff, &mask, head.x, head.y);
        }

        let head_xs: Vec<u32> = heads.iter().map(|h| h.x).collect();
        let rests = rests::detect_rests(img, staff, i, &mask, &head_xs);
        staff_heads.push(heads);
        staff_rests.push(rests);
    }

    // ── F: pitch and rhythm ─────────────────────────────────────────
    cancel.check()?;
    let mut events: Vec<ScoreEvent> = Vec::new();
    let mut pitch_ctx = pitch::PitchContext::new(&key_signature);

    for (i, staff) in staff_list.iter().enumerate() {
        let mask = StaffLineMask::new(staff);
        let clef = clefs[i];
        let boundaries: Vec<u32> = {
            let mut b: Vec<u32> = bar_lines
                .iter()
                .filter(|bl| bl.staff_index == i)
                .map(|bl| bl.x)
                .collect();
            b.sort_unstable();
            b
        };

        // Durations and pitches, walking left to right so accidental
        // state evolves in reading order.
        let mut notes: Vec<Note> = Vec::new();
        for head in &staff_heads[i] {
            let info = rhythm::classify_duration(img, staff, &mask, head);
            let measure = measures::measure_index_for_x(&boundaries, head.x);
            let (pitch_name, midi_note) =
                pitch_ctx.resolve(clef, i, measure, head.staff_position, head.accidental);

            notes.push(Note {
                x: head.x,
                y: head.y,
                staff_index: i,
                staff_position: head.staff_position,
                pitch_name,
                midi_note,
                duration: info.duration,
                dotted: info.dotted,
                tied_beats: None,
                stem_dir: info.stem_dir,
                voice: pitch::assign_voice(clef, info.stem_dir, false),
                clef,
                accidental: head.accidental,
                repeated: false,
            });
        }

        // Stemless notes settle their voice against column peers
        for idx in 0..notes.len() {
            if notes[idx].stem_dir == 0 {
                let lower_peer = notes.iter().enumerate().any(|(j, other)| {
                    j != idx
                        && (other.x as i64 - notes[idx].x as i64).abs()
                            <= BEAT_COLUMN_TOLERANCE_PX as i64
                        && other.midi_note < notes[idx].midi_note
                });
                notes[idx].voice = pitch::assign_voice(clef, 0, lower_peer);
            }
        }

        let notes = pitch::collapse_ties(img, staff, notes);
        events.extend(notes.into_iter().map(ScoreEvent::Note));

        events.extend(staff_rests[i].iter().map(|r| {
            ScoreEvent::Rest(crate::model::Rest {
                x: r.x,
                y: r.y,
                staff_index: i,
                rest_type: r.rest_type,
                dotted: r.dotted,
                voice: pitch::rest_voice(clef),
                repeated: false,
            })
        }));
    }

    events.sort_by_key(|e| (e.staff_index(), e.x()));

    // ── G: measures, quantization, repeats, assembly ────────────────
    cancel.check()?;
    let measure_list = measures::group_measures(&events, &bar_lines, staff_list.len());
    measures::quantize_measures(&mut events, &measure_list, &time_signature);

    let regions = measures::repeat_regions(&bar_lines);
    if !regions.is_empty() {
        measures::expand_repeats(&mut events, &regions);
    }
    let measure_list = measures::group_measures(&events, &bar_lines, staff_list.len());

    debug_assert!(events
        .windows(2)
        .all(|w| (w[0].staff_index(), w[0].x()) <= (w[1].staff_index(), w[1].x())));
    debug_assert!(events.iter().all(|e| match e {
        ScoreEvent::Note(n) => (21..=108).contains(&n.midi_note),
        ScoreEvent::Rest(_) => true,
    }));

    let (total_notes, total_rests) = events.iter().fold((0, 0), |(n, r), e| {
        if e.is_rest() {
            (n, r + 1)
        } else {
            (n + 1, r)
        }
    });

    Ok(Score {
        metadata: ScoreMetadata {
            image_width: img.width(),
            image_height: img.height(),
            staves: staff_list,
            clefs,
            key_signature,
            time_signature,
            bar_lines,
            ledger_line_count,
            systems,
            total_notes,
            total_rests,
        },
        events,
        measures: measure_list,
    })
}

/// (index within its system, system size) for a staff.
fn system_role(systems: &[System], staff_index: usize) -> (usize, usize) {
    for system in systems {
        if let Some(pos) = system.staff_indices.iter().position(|&i| i == staff_index) {
            return (pos, system.staff_indices.len());
        }
    }
    (0, 1)
}

/// Symbol detection starts past the clef / signature head region.
fn symbol_scan_start(img: &SheetImage, time_signature: &TimeSignature) -> u32 {
    let clef_end = (CLEF_REGION_FRAC * img.width() as f32) as u32;
    clef_end.max(time_signature.end_x)
}

/// Head-scan reach, shrunk on the side facing a wide paired gap where
/// lyrics text lives.
fn scan_reach(staff: &Staff, staff_index: usize, all: &[Staff], systems: &[System]) -> ScanReach {
    let s = staff.spacing();
    let lyrics_gap = LYRICS_GAP_SPACINGS * s;
    let mut reach = ScanReach::default();

    for system in systems {
        let Some(pos) = system.staff_indices.iter().position(|&i| i == staff_index) else {
            continue;
        };
        if pos > 0 {
            let above = &all[system.staff_indices[pos - 1]];
            if (staff.top() as f32 - above.bottom() as f32) > lyrics_gap {
                reach.above = HEAD_SCAN_LYRICS_SPACINGS;
            }
        }
        if pos + 1 < system.staff_indices.len() {
            let below = &all[system.staff_indices[pos + 1]];
            if (below.top() as f32 - staff.bottom() as f32) > lyrics_gap {
                reach.below = HEAD_SCAN_LYRICS_SPACINGS;
            }
        }
    }
    reach
}
