//! Shared thresholds for the recognition pipeline.
//!
//! Lengths suffixed `_SPACINGS` are in units of the staff line spacing
//! `s`; `_HALF_SPACES` in units of `s / 2`; bare pixel values are on the
//! rescaled (≤1400 px wide) image. Tuned on the reference corpus — see
//! DESIGN.md before widening anything.

// ── Image loading ───────────────────────────────────────────────────
pub(crate) const TARGET_WIDTH: u32 = 1400;
pub(crate) const MIN_IMAGE_DIM: u32 = 50;
/// Global luma threshold: below this a pixel counts as ink.
pub(crate) const DARK_LUMA: u8 = 120;
/// Rows sampled for skew estimation.
pub(crate) const SKEW_SAMPLE_ROWS: u32 = 20;
/// Skew below this many degrees is left alone.
pub(crate) const SKEW_CORRECT_MIN_DEG: f32 = 0.15;

// ── Staff detection ─────────────────────────────────────────────────
/// Fraction of a row that must be dark for a staff-line row.
pub(crate) const STAFF_ROW_DARK_FRAC: f32 = 0.30;
/// Dark-row runs thicker than this are not staff lines.
pub(crate) const MAX_LINE_THICKNESS: u32 = 6;
/// Lines within this multiple of the median gap join the current staff.
pub(crate) const STAFF_GROUP_GAP_FACTOR: f32 = 2.2;

// ── System pairing ──────────────────────────────────────────────────
/// Staves pair when their gap is under this multiple of the staff height.
pub(crate) const SYSTEM_GAP_HEIGHT_FACTOR: f32 = 6.0;
/// Brace / systemic barline search region: leftmost fraction of width.
pub(crate) const BRACE_REGION_FRAC: f32 = 0.08;
/// Vertical gaps up to this fraction of the inter-staff gap are bridged.
pub(crate) const BRACE_RUN_GAP_FRAC: f32 = 0.15;
/// A bridging run must span this fraction of the inter-staff gap.
pub(crate) const BRACE_SPAN_FRAC: f32 = 0.60;
pub(crate) const MAX_SYSTEM_STAVES: usize = 4;

// ── Clef / signatures ───────────────────────────────────────────────
/// Clef glyph search region: leftmost fraction of width.
pub(crate) const CLEF_REGION_FRAC: f32 = 0.14;
pub(crate) const TIME_SIG_SCAN_START_FRAC: f32 = 0.06;
pub(crate) const TIME_SIG_SCAN_END_FRAC: f32 = 0.22;
pub(crate) const TIME_SIG_WINDOW_SPACINGS: f32 = 1.5;
pub(crate) const TIME_SIG_MIN_DENSITY: f32 = 0.15;
pub(crate) const TIME_SIG_MAX_DENSITY: f32 = 0.55;

// ── Bar lines ───────────────────────────────────────────────────────
/// Bar lines are only sought past this fraction of the width (clef +
/// signatures live to the left).
pub(crate) const BARLINE_MIN_X_FRAC: f32 = 0.16;
/// Fraction of staff rows that must be dark in a barline column.
pub(crate) const BARLINE_COL_DARK_FRAC: f32 = 0.80;
/// Minimum separation between bar lines on one staff, in spacings.
pub(crate) const BARLINE_MIN_SEPARATION_SPACINGS: f32 = 1.5;
/// Minimum measure width, in spacings.
pub(crate) const MIN_MEASURE_WIDTH_SPACINGS: f32 = 6.0;

// ── Ledger lines ────────────────────────────────────────────────────
pub(crate) const LEDGER_SCAN_SPACINGS: f32 = 5.0;
pub(crate) const LEDGER_MIN_LEN_SPACINGS: f32 = 0.8;
pub(crate) const LEDGER_MAX_LEN_SPACINGS: f32 = 4.0;
pub(crate) const LEDGER_MAX_THICKNESS: u32 = 5;

// ── Noteheads ───────────────────────────────────────────────────────
/// Stricter threshold for notehead candidate centers.
pub(crate) const NOTEHEAD_DARK: u8 = 110;
pub(crate) const HEAD_ELLIPSE_HALF_W_SPACINGS: f32 = 0.55;
pub(crate) const HEAD_ELLIPSE_HALF_H_SPACINGS: f32 = 0.40;
pub(crate) const HEAD_MIN_SAMPLES: usize = 8;
pub(crate) const HEAD_MIN_FILL: f32 = 0.48;
pub(crate) const HEAD_MIN_ASPECT: f32 = 0.55;
pub(crate) const HEAD_MAX_ASPECT: f32 = 2.5;
/// Vertical run through the centroid above this (in spacings) means the
/// "head" is a stem or barline.
pub(crate) const HEAD_MAX_CENTROID_RUN_SPACINGS: f32 = 3.0;
pub(crate) const HEAD_MIN_SYMMETRY: f32 = 0.30;
pub(crate) const HEAD_MAX_SNAP_ERROR: f32 = 0.38;
pub(crate) const HEAD_MIN_POSITION: i32 = -5;
pub(crate) const HEAD_MAX_POSITION: i32 = 13;
/// Chebyshev dedup radius, in spacings.
pub(crate) const HEAD_DEDUP_SPACINGS: f32 = 1.0;
/// Scan region above/below the staff, in spacings.
pub(crate) const HEAD_SCAN_SPACINGS: f32 = 3.0;
/// Shrunk scan on the lyrics side of a wide-gap pair.
pub(crate) const HEAD_SCAN_LYRICS_SPACINGS: f32 = 2.0;
/// A paired inter-staff gap above this many spacings implies lyrics.
pub(crate) const LYRICS_GAP_SPACINGS: f32 = 3.0;

// ── OCR confidence gate ─────────────────────────────────────────────
pub(crate) const OCR_PATCH_SPACINGS: f32 = 2.0;
pub(crate) const OCR_REST_REJECT_P: f32 = 0.30;
pub(crate) const OCR_REST_REJECT_MAX_ENTROPY: f32 = 0.80;
pub(crate) const OCR_NOISE_MAX_P: f32 = 0.15;
pub(crate) const OCR_NOISE_MIN_ENTROPY: f32 = 0.92;
pub(crate) const OCR_LOW_CONF_P: f32 = 0.10;

// ── Inline accidentals ──────────────────────────────────────────────
pub(crate) const ACC_SCAN_LEFT_SPACINGS: f32 = 2.5;
pub(crate) const ACC_SCAN_HALF_HEIGHT_SPACINGS: f32 = 1.2;
pub(crate) const ACC_VRUN_MIN_SPACINGS: f32 = 0.8;
pub(crate) const ACC_VRUN_DEDUP_SPACINGS: f32 = 0.25;
pub(crate) const ACC_HRUN_MIN_SPACINGS: f32 = 0.5;
pub(crate) const SHARP_MIN_DENSITY: f32 = 0.22;
pub(crate) const SHARP_MAX_TOP_BOTTOM_SKEW: f32 = 0.35;
pub(crate) const FLAT_MIN_DENSITY: f32 = 0.15;
pub(crate) const FLAT_MIN_ASPECT: f32 = 1.5;
pub(crate) const NATURAL_MIN_DENSITY: f32 = 0.16;
pub(crate) const NATURAL_MIN_ASPECT: f32 = 1.3;

// ── Rests ───────────────────────────────────────────────────────────
pub(crate) const REST_MIN_GAP_SPACINGS: f32 = 2.5;
pub(crate) const REST_WINDOW_SPACINGS: f32 = 1.2;
pub(crate) const REST_STEP_SPACINGS: f32 = 0.5;
pub(crate) const REST_MIN_DENSITY: f32 = 0.12;
pub(crate) const REST_MAX_DENSITY: f32 = 0.45;
/// A vertical run spanning more of the staff than this is a barline.
pub(crate) const REST_BARLINE_SPAN_FRAC: f32 = 0.60;

// ── Stems, beams, flags ─────────────────────────────────────────────
pub(crate) const STEM_PROBE_MIN_SPACINGS: f32 = 0.4;
pub(crate) const STEM_PROBE_MAX_SPACINGS: f32 = 1.0;
pub(crate) const STEM_GAP_TOLERANCE: u32 = 4;
pub(crate) const STEM_MIN_LEN_SPACINGS: f32 = 1.5;
pub(crate) const BEAM_LEVEL_STEP_SPACINGS: f32 = 0.45;
pub(crate) const BEAM_BAND_HALF_SPACINGS: f32 = 0.25;
pub(crate) const BEAM_MIN_RUN_SPACINGS: f32 = 0.5;
pub(crate) const BEAM_HOOK_MIN_SPACINGS: f32 = 0.3;
pub(crate) const BEAM_HOOK_MAX_SPACINGS: f32 = 1.5;
pub(crate) const FLAG_ZONE_W_SPACINGS: f32 = 0.7;
pub(crate) const FLAG_ZONE_H_SPACINGS: f32 = 1.2;
pub(crate) const FLAG_MIN_FILL: f32 = 0.25;

// ── Fill vote ───────────────────────────────────────────────────────
pub(crate) const FILL_RECT_MIN_DENSITY: f32 = 0.35;
pub(crate) const FILL_CROSS_MIN_DENSITY: f32 = 0.40;
pub(crate) const FILL_PATCH_MIN_DENSITY: f32 = 0.30;

// ── Augmentation dots ───────────────────────────────────────────────
pub(crate) const DOT_SCAN_MIN_SPACINGS: f32 = 0.7;
pub(crate) const DOT_SCAN_MAX_SPACINGS: f32 = 2.2;
pub(crate) const DOT_RADIUS_SPACINGS: f32 = 0.22;
pub(crate) const DOT_MIN_FILL: f32 = 0.55;

// ── Ties ────────────────────────────────────────────────────────────
pub(crate) const TIE_MAX_DISTANCE_SPACINGS: f32 = 8.0;
pub(crate) const TIE_BAND_THICKNESS_SPACINGS: f32 = 0.3;
pub(crate) const TIE_BAND_OFFSETS_SPACINGS: [f32; 2] = [0.8, 1.2];
pub(crate) const TIE_MIN_DENSITY: f32 = 0.12;
pub(crate) const TIE_MAX_DENSITY: f32 = 0.55;

// ── Quantization ────────────────────────────────────────────────────
/// Events within this many pixels share a beat column.
pub(crate) const BEAT_COLUMN_TOLERANCE_PX: u32 = 10;
/// Measures off by more than this many beats get rescaled.
pub(crate) const QUANTIZE_TRIGGER_BEATS: f32 = 0.1;
