//! Pitch mapping: staff position → note name and MIDI number through
//! the active clef, key signature, and measure-scoped accidental state.
//! Also tie-arc detection/collapse and SATB voice assignment.

use std::collections::HashMap;

use crate::model::{Accidental, Clef, Duration, KeyKind, KeySignature, Note, Staff, Voice};
use crate::omr::constants::*;
use crate::omr::image::SheetImage;

/// Sharps apply to letters in this order (F♯ first).
pub(crate) const SHARP_ORDER: [char; 7] = ['F', 'C', 'G', 'D', 'A', 'E', 'B'];
/// Flats apply in the mirrored order (B♭ first).
pub(crate) const FLAT_ORDER: [char; 7] = ['B', 'E', 'A', 'D', 'G', 'C', 'F'];

/// Diatonic index of the note on staff position 0 (the bottom line) for
/// each clef: octave × 7 + step, C = 0.
fn clef_reference(clef: Clef) -> i32 {
    match clef {
        Clef::Treble => 4 * 7 + 2,  // E4
        Clef::Bass => 2 * 7 + 4,    // G2
        Clef::Alto => 3 * 7 + 3,    // F3
        Clef::Soprano => 4 * 7,     // C4
        Clef::Tenor => 3 * 7 + 1,   // D3
    }
}

/// Letter name and natural (unaltered) MIDI number at a staff position.
/// Positions outside the tabulated range extrapolate by octaves through
/// the same diatonic arithmetic.
pub(crate) fn natural_pitch(clef: Clef, staff_position: i32) -> (char, i32) {
    let diatonic = clef_reference(clef) + staff_position;
    let octave = diatonic.div_euclid(7);
    let step = diatonic.rem_euclid(7) as usize;
    let letter = ['C', 'D', 'E', 'F', 'G', 'A', 'B'][step];
    let semitone = [0, 2, 4, 5, 7, 9, 11][step];
    (letter, (octave + 1) * 12 + semitone)
}

/// Letters altered by the key signature, with their direction (+1/−1).
pub(crate) fn key_signature_alterations(key: &KeySignature) -> HashMap<char, i32> {
    let mut map = HashMap::new();
    match key.kind {
        KeyKind::None => {}
        KeyKind::Sharps => {
            for &letter in SHARP_ORDER.iter().take(key.count as usize) {
                map.insert(letter, 1);
            }
        }
        KeyKind::Flats => {
            for &letter in FLAT_ORDER.iter().take(key.count as usize) {
                map.insert(letter, -1);
            }
        }
    }
    map
}

/// Measure-scoped accidental state: an inline glyph on a note rules its
/// staff position until the next bar line.
pub(crate) struct PitchContext {
    alterations: HashMap<char, i32>,
    /// (staff, measure, staff position) → accidental in force.
    state: HashMap<(usize, usize, i32), Accidental>,
}

impl PitchContext {
    pub fn new(key: &KeySignature) -> Self {
        Self { alterations: key_signature_alterations(key), state: HashMap::new() }
    }

    /// Resolve one note's letter and MIDI number. An inline accidental
    /// updates the measure state before the lookup; the active state
    /// overrides the key signature for that position in that measure.
    pub fn resolve(
        &mut self,
        clef: Clef,
        staff_index: usize,
        measure_index: usize,
        staff_position: i32,
        inline: Option<Accidental>,
    ) -> (char, u8) {
        let (letter, natural) = natural_pitch(clef, staff_position);

        if let Some(acc) = inline {
            self.state.insert((staff_index, measure_index, staff_position), acc);
        }

        let midi = match self.state.get(&(staff_index, measure_index, staff_position)) {
            Some(Accidental::Sharp) => natural + 1,
            Some(Accidental::Flat) => natural - 1,
            // Natural cancels the key-signature alteration only
            Some(Accidental::Natural) => natural,
            None => natural + self.alterations.get(&letter).copied().unwrap_or(0),
        };

        (letter, midi.clamp(21, 108) as u8)
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Ties
// ═══════════════════════════════════════════════════════════════════════

/// Detect tie arcs between consecutive equal-pitch notes on one staff
/// and collapse each chain into its first note.
///
/// The chain head keeps its image position, gains `tied_beats` = the
/// sum of all member beat values, and is relabeled with the closest
/// named duration; the other members are removed.
pub(crate) fn collapse_ties(img: &SheetImage, staff: &Staff, notes: Vec<Note>) -> Vec<Note> {
    let s = staff.spacing();
    let max_dx = TIE_MAX_DISTANCE_SPACINGS * s;

    let mut out: Vec<Note> = Vec::new();
    let mut i = 0;
    while i < notes.len() {
        let mut head = notes[i].clone();
        let mut total = head.duration.beats(head.dotted);
        let mut members = 1usize;

        let mut j = i;
        while j + 1 < notes.len() {
            let a = &notes[j];
            let b = &notes[j + 1];
            if a.midi_note != b.midi_note {
                break;
            }
            if (b.x as f32 - a.x as f32) > max_dx {
                break;
            }
            if !tie_arc_between(img, staff, a, b) {
                break;
            }
            total += b.duration.beats(b.dotted);
            members += 1;
            j += 1;
        }

        if members > 1 {
            let (duration, dotted) = Duration::closest_named(total);
            head.duration = duration;
            head.dotted = dotted;
            head.tied_beats = Some(total);
        }
        out.push(head);
        i = j + 1;
    }
    out
}

/// Look for a thin arc in a horizontal band between two heads, probing
/// both offsets above and below their mean y (arc height depends on
/// stem direction).
fn tie_arc_between(img: &SheetImage, staff: &Staff, a: &Note, b: &Note) -> bool {
    let s = staff.spacing();
    let head_r = HEAD_ELLIPSE_HALF_W_SPACINGS * s;
    let x0 = (a.x as f32 + head_r) as i32;
    let x1 = (b.x as f32 - head_r) as i32;
    if x1 <= x0 {
        return false;
    }
    let y_mid = (a.y as f32 + b.y as f32) / 2.0;
    let half_t = (TIE_BAND_THICKNESS_SPACINGS * s / 2.0).max(1.0) as i32;

    for offset in TIE_BAND_OFFSETS_SPACINGS {
        for sign in [-1.0f32, 1.0] {
            let yc = (y_mid + sign * offset * s) as i32;
            let density = img.region_density(x0, yc - half_t, x1, yc + half_t);
            if (TIE_MIN_DENSITY..=TIE_MAX_DENSITY).contains(&density) {
                return true;
            }
        }
    }
    false
}

// ═══════════════════════════════════════════════════════════════════════
// Voices
// ═══════════════════════════════════════════════════════════════════════

/// Assign the SATB voice from staff family and stem direction.
///
/// `lower_peer_at_x` reports whether a lower-pitched note shares this
/// note's beat column, which settles stemless notes.
pub(crate) fn assign_voice(clef: Clef, stem_dir: i8, lower_peer_at_x: bool) -> Voice {
    if clef.is_treble_family() {
        match stem_dir {
            -1 => Voice::Soprano,
            1 => Voice::Alto,
            _ => Voice::Soprano,
        }
    } else {
        match stem_dir {
            -1 => Voice::Tenor,
            1 => Voice::Bass,
            _ => {
                if lower_peer_at_x {
                    Voice::Tenor
                } else {
                    Voice::Bass
                }
            }
        }
    }
}

/// Default voice for a rest on a staff.
pub(crate) fn rest_voice(clef: Clef) -> Voice {
    if clef.is_treble_family() {
        Voice::Soprano
    } else {
        Voice::Bass
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{GrayImage, Luma};

    #[test]
    fn treble_table_spot_checks() {
        assert_eq!(natural_pitch(Clef::Treble, 0), ('E', 64));
        assert_eq!(natural_pitch(Clef::Treble, 5), ('C', 72));
        assert_eq!(natural_pitch(Clef::Treble, 8), ('F', 77));
        assert_eq!(natural_pitch(Clef::Treble, -2), ('C', 60));
        assert_eq!(natural_pitch(Clef::Treble, 13), ('D', 86));
    }

    #[test]
    fn bass_table_spot_checks() {
        assert_eq!(natural_pitch(Clef::Bass, 0), ('G', 43));
        assert_eq!(natural_pitch(Clef::Bass, 4), ('D', 50));
        assert_eq!(natural_pitch(Clef::Bass, 10), ('C', 60));
    }

    #[test]
    fn c_clef_tables() {
        assert_eq!(natural_pitch(Clef::Alto, 4), ('C', 60));
        assert_eq!(natural_pitch(Clef::Soprano, 0), ('C', 60));
        assert_eq!(natural_pitch(Clef::Tenor, 6), ('C', 60));
    }

    #[test]
    fn octave_extrapolation_beyond_table() {
        // Two octaves above the treble top-line F5
        assert_eq!(natural_pitch(Clef::Treble, 8 + 14), ('F', 101));
        assert_eq!(natural_pitch(Clef::Treble, -9), ('C', 48));
    }

    #[test]
    fn key_signature_sharps_apply() {
        let key = KeySignature { kind: KeyKind::Sharps, count: 2 };
        let mut ctx = PitchContext::new(&key);
        // F on the treble top line becomes F#
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 8, None), ('F', 78));
        // C in the third space becomes C#
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 5, None), ('C', 73));
        // G is untouched with two sharps
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 2, None), ('G', 67));
    }

    #[test]
    fn inline_accidental_carries_through_measure_and_resets() {
        // G major: one sharp (F#)
        let key = KeySignature { kind: KeyKind::Sharps, count: 1 };
        let mut ctx = PitchContext::new(&key);

        // Key signature alone: F#
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 8, None).1, 78);
        // Natural glyph cancels it
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 8, Some(Accidental::Natural)).1, 77);
        // Still natural later in the same measure
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 8, None).1, 77);
        // Next measure: back to F#
        assert_eq!(ctx.resolve(Clef::Treble, 0, 1, 8, None).1, 78);
    }

    #[test]
    fn accidental_state_is_per_position_and_staff() {
        let mut ctx = PitchContext::new(&KeySignature::none());
        ctx.resolve(Clef::Treble, 0, 0, 5, Some(Accidental::Sharp));
        // Same position, same measure: sharp carries
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 5, None).1, 73);
        // Different position unaffected
        assert_eq!(ctx.resolve(Clef::Treble, 0, 0, 3, None).1, 69);
        // Other staff unaffected
        assert_eq!(ctx.resolve(Clef::Treble, 1, 0, 5, None).1, 72);
    }

    #[test]
    fn midi_clamped_to_piano_range() {
        let mut ctx = PitchContext::new(&KeySignature::none());
        let (_, midi) = ctx.resolve(Clef::Treble, 0, 0, 40, None);
        assert_eq!(midi, 108);
        let (_, midi) = ctx.resolve(Clef::Bass, 0, 0, -30, None);
        assert_eq!(midi, 21);
    }

    #[test]
    fn voice_assignment_by_stem_direction() {
        assert_eq!(assign_voice(Clef::Treble, -1, false), Voice::Soprano);
        assert_eq!(assign_voice(Clef::Treble, 1, false), Voice::Alto);
        assert_eq!(assign_voice(Clef::Treble, 0, true), Voice::Soprano);
        assert_eq!(assign_voice(Clef::Bass, -1, false), Voice::Tenor);
        assert_eq!(assign_voice(Clef::Bass, 1, false), Voice::Bass);
        assert_eq!(assign_voice(Clef::Bass, 0, true), Voice::Tenor);
        assert_eq!(assign_voice(Clef::Bass, 0, false), Voice::Bass);
    }

    // ── Ties ────────────────────────────────────────────────────────

    fn staff() -> Staff {
        Staff { lines: [100, 110, 120, 130, 140] }
    }

    fn note_at(x: u32, midi: u8, duration: Duration) -> Note {
        Note {
            x,
            y: 125,
            staff_index: 0,
            staff_position: 3,
            pitch_name: 'B',
            midi_note: midi,
            duration,
            dotted: false,
            tied_beats: None,
            stem_dir: -1,
            voice: Voice::Soprano,
            clef: Clef::Treble,
            accidental: None,
            repeated: false,
        }
    }

    fn page_with_arcs(arcs: &[(u32, u32)]) -> SheetImage {
        let mut img = GrayImage::from_pixel(800, 300, Luma([255u8]));
        for &(x0, x1) in arcs {
            // Thin arc above the heads, at the 0.8-spacing band
            for x in x0..=x1 {
                img.put_pixel(x, 117, Luma([0u8]));
            }
        }
        SheetImage::from_gray(img)
    }

    #[test]
    fn tie_chain_collapses_to_dotted_half() {
        let img = page_with_arcs(&[(306, 354), (366, 414)]);
        let notes = vec![
            note_at(300, 71, Duration::Quarter),
            note_at(360, 71, Duration::Quarter),
            note_at(420, 71, Duration::Quarter),
        ];
        let collapsed = collapse_ties(&img, &staff(), notes);
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].tied_beats, Some(3.0));
        assert_eq!(collapsed[0].duration, Duration::Half);
        assert!(collapsed[0].dotted);
        assert_eq!(collapsed[0].duration.label(collapsed[0].dotted), "dotted_half");
    }

    #[test]
    fn different_pitches_do_not_tie() {
        let img = page_with_arcs(&[(306, 354)]);
        let notes = vec![note_at(300, 71, Duration::Quarter), note_at(360, 72, Duration::Quarter)];
        let collapsed = collapse_ties(&img, &staff(), notes);
        assert_eq!(collapsed.len(), 2);
        assert!(collapsed[0].tied_beats.is_none());
    }

    #[test]
    fn no_arc_means_no_tie() {
        let img = page_with_arcs(&[]);
        let notes = vec![note_at(300, 71, Duration::Quarter), note_at(360, 71, Duration::Quarter)];
        let collapsed = collapse_ties(&img, &staff(), notes);
        assert_eq!(collapsed.len(), 2);
    }

    #[test]
    fn distant_equal_pitches_do_not_tie() {
        let img = page_with_arcs(&[(306, 454)]);
        // 160 px apart > 8 spacings
        let notes = vec![note_at(300, 71, Duration::Quarter), note_at(460, 71, Duration::Quarter)];
        let collapsed = collapse_ties(&img, &staff(), notes);
        assert_eq!(collapsed.len(), 2);
    }
}
