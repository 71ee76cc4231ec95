//! Data model for a score reconstructed from a sheet-music photograph.
//!
//! These structures capture the symbolic information the recognition
//! pipeline extracts from pixels: staves and systems, clefs, signatures,
//! bar lines, and the ordered sequence of timed events. Everything keeps
//! its image coordinates so the playback cursor can be drawn over the
//! original photo.

use serde::{Deserialize, Serialize};

/// Clef of a staff, fixing the pitch of one reference line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Clef {
    Treble,
    Bass,
    Alto,
    Soprano,
    Tenor,
}

impl Clef {
    /// Treble, alto and soprano staves carry the upper (S/A) voices;
    /// bass and tenor staves carry the lower (T/B) voices.
    pub fn is_treble_family(self) -> bool {
        matches!(self, Clef::Treble | Clef::Alto | Clef::Soprano)
    }
}

/// Sharps-or-flats direction of a key signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyKind {
    None,
    Sharps,
    Flats,
}

/// Global key signature.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySignature {
    pub kind: KeyKind,
    /// Number of accidentals, 0..=7.
    pub count: u8,
}

impl KeySignature {
    pub fn none() -> Self {
        Self { kind: KeyKind::None, count: 0 }
    }
}

/// Time signature read from the staff head.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimeSignature {
    /// Numerator, 1..=16.
    pub beats: u8,
    /// Denominator, one of 1, 2, 4, 8, 16.
    pub beat_type: u8,
    /// Numerator divisible by 3 (above 3) over an 8 denominator.
    pub compound: bool,
    /// Right edge of the time-signature region in image pixels; symbol
    /// detection starts past this column.
    pub end_x: u32,
}

impl TimeSignature {
    /// Expected quarter-note beats per measure: beats × 4 / beat_type.
    pub fn beats_per_measure(&self) -> f32 {
        self.beats as f32 * 4.0 / self.beat_type as f32
    }
}

impl Default for TimeSignature {
    fn default() -> Self {
        Self { beats: 4, beat_type: 4, compound: false, end_x: 0 }
    }
}

/// Visual classification of a bar line.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BarlineKind {
    Single,
    Double,
    Final,
    RepeatStart,
    RepeatEnd,
    RepeatBoth,
}

impl BarlineKind {
    pub fn opens_repeat(self) -> bool {
        matches!(self, BarlineKind::RepeatStart | BarlineKind::RepeatBoth)
    }

    pub fn closes_repeat(self) -> bool {
        matches!(self, BarlineKind::RepeatEnd | BarlineKind::RepeatBoth)
    }
}

/// A bar line on one staff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Barline {
    /// Column in image pixels.
    pub x: u32,
    pub staff_index: usize,
    pub kind: BarlineKind,
}

/// An inline accidental glyph attached to a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Accidental {
    Sharp,
    Flat,
    Natural,
}

/// Named note duration. The dot lives on the event itself
/// (`dotted: true` multiplies the base weight by 1.5).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Duration {
    Whole,
    Half,
    Quarter,
    Eighth,
    Sixteenth,
    ThirtySecond,
}

impl Duration {
    /// Base beat weight in quarter-note beats.
    pub fn base_beats(self) -> f32 {
        match self {
            Duration::Whole => 4.0,
            Duration::Half => 2.0,
            Duration::Quarter => 1.0,
            Duration::Eighth => 0.5,
            Duration::Sixteenth => 0.25,
            Duration::ThirtySecond => 0.125,
        }
    }

    /// Beat weight with an optional augmentation dot.
    pub fn beats(self, dotted: bool) -> f32 {
        if dotted {
            self.base_beats() * 1.5
        } else {
            self.base_beats()
        }
    }

    /// Every allowed (duration, dotted) pair, longest first. Used by the
    /// quantizer when snapping a scaled duration back to a named one.
    pub fn all_named() -> &'static [(Duration, bool)] {
        &[
            (Duration::Whole, true),
            (Duration::Whole, false),
            (Duration::Half, true),
            (Duration::Half, false),
            (Duration::Quarter, true),
            (Duration::Quarter, false),
            (Duration::Eighth, true),
            (Duration::Eighth, false),
            (Duration::Sixteenth, true),
            (Duration::Sixteenth, false),
            (Duration::ThirtySecond, true),
            (Duration::ThirtySecond, false),
        ]
    }

    /// The named (duration, dotted) pair closest to `beats`.
    pub fn closest_named(beats: f32) -> (Duration, bool) {
        let mut best = (Duration::Quarter, false);
        let mut best_err = f32::MAX;
        for &(d, dot) in Self::all_named() {
            let err = (d.beats(dot) - beats).abs();
            if err < best_err {
                best_err = err;
                best = (d, dot);
            }
        }
        best
    }

    /// Label with the `dotted_` prefix, e.g. `"dotted_half"`.
    pub fn label(self, dotted: bool) -> String {
        let base = match self {
            Duration::Whole => "whole",
            Duration::Half => "half",
            Duration::Quarter => "quarter",
            Duration::Eighth => "eighth",
            Duration::Sixteenth => "sixteenth",
            Duration::ThirtySecond => "32nd",
        };
        if dotted {
            format!("dotted_{base}")
        } else {
            base.to_string()
        }
    }
}

/// SATB voice layer, assigned from staff family and stem direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Voice {
    Soprano,
    Alto,
    Tenor,
    Bass,
}

/// A recognized note with both image and musical coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    /// Notehead center in image pixels.
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    /// Half-space offset from the bottom staff line (0 = bottom line,
    /// positive upward).
    pub staff_position: i32,
    /// Letter name A..G after key signature and accidentals.
    pub pitch_name: char,
    /// MIDI note number, clamped to 21..=108.
    pub midi_note: u8,
    pub duration: Duration,
    pub dotted: bool,
    /// Total beats of a collapsed tie chain; overrides `duration` for
    /// playback when present.
    pub tied_beats: Option<f32>,
    /// -1 stem up, +1 stem down, 0 stemless.
    pub stem_dir: i8,
    pub voice: Voice,
    pub clef: Clef,
    /// Inline accidental glyph found left of the head, if any.
    pub accidental: Option<Accidental>,
    /// True for events materialized by repeat expansion.
    pub repeated: bool,
}

impl Note {
    /// Playback length in quarter-note beats.
    pub fn beats(&self) -> f32 {
        self.tied_beats.unwrap_or_else(|| self.duration.beats(self.dotted))
    }
}

/// A recognized rest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rest {
    pub x: u32,
    pub y: u32,
    pub staff_index: usize,
    /// whole | half | quarter | eighth | sixteenth.
    pub rest_type: Duration,
    pub dotted: bool,
    pub voice: Voice,
    pub repeated: bool,
}

impl Rest {
    pub fn beats(&self) -> f32 {
        self.rest_type.beats(self.dotted)
    }
}

/// One timed event in the score.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScoreEvent {
    Note(Note),
    Rest(Rest),
}

impl ScoreEvent {
    pub fn x(&self) -> u32 {
        match self {
            ScoreEvent::Note(n) => n.x,
            ScoreEvent::Rest(r) => r.x,
        }
    }

    pub fn y(&self) -> u32 {
        match self {
            ScoreEvent::Note(n) => n.y,
            ScoreEvent::Rest(r) => r.y,
        }
    }

    pub fn staff_index(&self) -> usize {
        match self {
            ScoreEvent::Note(n) => n.staff_index,
            ScoreEvent::Rest(r) => r.staff_index,
        }
    }

    pub fn beats(&self) -> f32 {
        match self {
            ScoreEvent::Note(n) => n.beats(),
            ScoreEvent::Rest(r) => r.beats(),
        }
    }

    pub fn voice(&self) -> Voice {
        match self {
            ScoreEvent::Note(n) => n.voice,
            ScoreEvent::Rest(r) => r.voice,
        }
    }

    pub fn is_rest(&self) -> bool {
        matches!(self, ScoreEvent::Rest(_))
    }

    pub fn is_repeated(&self) -> bool {
        match self {
            ScoreEvent::Note(n) => n.repeated,
            ScoreEvent::Rest(r) => r.repeated,
        }
    }

    pub(crate) fn set_x(&mut self, x: u32) {
        match self {
            ScoreEvent::Note(n) => n.x = x,
            ScoreEvent::Rest(r) => r.x = x,
        }
    }

    pub(crate) fn set_repeated(&mut self, repeated: bool) {
        match self {
            ScoreEvent::Note(n) => n.repeated = repeated,
            ScoreEvent::Rest(r) => r.repeated = repeated,
        }
    }
}

/// Five staff-line y coordinates, top to bottom.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Staff {
    pub lines: [u32; 5],
}

impl Staff {
    pub fn top(&self) -> u32 {
        self.lines[0]
    }

    pub fn bottom(&self) -> u32 {
        self.lines[4]
    }

    /// Line-to-line spacing s = (y4 − y0) / 4.
    pub fn spacing(&self) -> f32 {
        (self.lines[4] - self.lines[0]) as f32 / 4.0
    }

    /// Half-space h = s / 2, the unit of staff positions.
    pub fn half_space(&self) -> f32 {
        self.spacing() / 2.0
    }

    pub fn height(&self) -> u32 {
        self.lines[4] - self.lines[0]
    }

    /// y coordinate of a staff position (0 = bottom line, +1 one
    /// half-space up).
    pub fn position_to_y(&self, position: i32) -> f32 {
        self.bottom() as f32 - position as f32 * self.half_space()
    }
}

/// A horizontal row of staves played together (grand staff, SATB block).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct System {
    pub top: u32,
    pub bottom: u32,
    pub staff_indices: Vec<usize>,
}

/// One measure on one staff, bucketing event indices between bar lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Measure {
    pub measure_index: usize,
    pub staff_index: usize,
    /// Indices into `Score::events`.
    pub events: Vec<usize>,
    /// Left boundary in image pixels.
    pub left: u32,
    /// Right boundary; `None` for the trailing open measure.
    pub right: Option<u32>,
}

/// Everything the pipeline learned about the page besides the events.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoreMetadata {
    pub image_width: u32,
    pub image_height: u32,
    pub staves: Vec<Staff>,
    /// One clef per staff, same order as `staves`.
    pub clefs: Vec<Clef>,
    pub key_signature: KeySignature,
    pub time_signature: TimeSignature,
    pub bar_lines: Vec<Barline>,
    pub ledger_line_count: usize,
    pub systems: Vec<System>,
    pub total_notes: usize,
    pub total_rests: usize,
}

/// A complete recognized score: ordered events plus the metadata envelope.
///
/// Events are strictly non-decreasing in `(staff_index, x)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Score {
    pub events: Vec<ScoreEvent>,
    pub measures: Vec<Measure>,
    pub metadata: ScoreMetadata,
}

impl Score {
    /// Iterate over the notes only.
    pub fn notes(&self) -> impl Iterator<Item = &Note> {
        self.events.iter().filter_map(|e| match e {
            ScoreEvent::Note(n) => Some(n),
            ScoreEvent::Rest(_) => None,
        })
    }

    /// Iterate over the rests only.
    pub fn rests(&self) -> impl Iterator<Item = &Rest> {
        self.events.iter().filter_map(|e| match e {
            ScoreEvent::Rest(r) => Some(r),
            ScoreEvent::Note(_) => None,
        })
    }

    /// (notes, rests, measures) counts for UI summaries.
    pub fn stats(&self) -> (usize, usize, usize) {
        (self.notes().count(), self.rests().count(), self.measures.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn duration_beat_weights() {
        assert_eq!(Duration::Whole.base_beats(), 4.0);
        assert_eq!(Duration::Half.base_beats(), 2.0);
        assert_eq!(Duration::Quarter.base_beats(), 1.0);
        assert_eq!(Duration::Eighth.base_beats(), 0.5);
        assert_eq!(Duration::Sixteenth.base_beats(), 0.25);
        assert_eq!(Duration::ThirtySecond.base_beats(), 0.125);
        assert_eq!(Duration::Quarter.beats(true), 1.5);
    }

    #[test]
    fn closest_named_snaps_to_dotted() {
        assert_eq!(Duration::closest_named(3.0), (Duration::Half, true));
        assert_eq!(Duration::closest_named(1.0), (Duration::Quarter, false));
        assert_eq!(Duration::closest_named(0.76), (Duration::Eighth, true));
        assert_eq!(Duration::closest_named(6.0), (Duration::Whole, true));
    }

    #[test]
    fn duration_labels() {
        assert_eq!(Duration::Half.label(true), "dotted_half");
        assert_eq!(Duration::ThirtySecond.label(false), "32nd");
    }

    #[test]
    fn staff_geometry() {
        let staff = Staff { lines: [100, 110, 120, 130, 140] };
        assert_eq!(staff.spacing(), 10.0);
        assert_eq!(staff.half_space(), 5.0);
        assert_eq!(staff.position_to_y(0), 140.0);
        assert_eq!(staff.position_to_y(8), 100.0);
        assert_eq!(staff.position_to_y(-2), 150.0);
    }

    #[test]
    fn time_signature_beats() {
        let ts = TimeSignature { beats: 6, beat_type: 8, compound: true, end_x: 0 };
        assert_eq!(ts.beats_per_measure(), 3.0);
        assert_eq!(TimeSignature::default().beats_per_measure(), 4.0);
    }
}
