//! Error types for the recognition pipeline and the audio renderer.
//!
//! Fatal errors (decode failures, empty staff detection) surface to the
//! caller; recoverable conditions (missing classifier models, unparsable
//! SoundFonts) are handled by documented fallbacks at the site that hits
//! them and never reach this enum from the public entry points.

use thiserror::Error;

/// Top-level error type for `process_sheet`, `load_soundfont` and
/// `render_audio`.
#[derive(Debug, Clone, Error)]
pub enum OmrError {
    /// The input bytes could not be decoded as an image.
    #[error("image decode failed: {0}")]
    ImageDecode(String),

    /// The decoded image is too small to contain readable music.
    #[error("image too small: {width}x{height} (minimum 50x50)")]
    ImageTooSmall { width: u32, height: u32 },

    /// No staves were found — the photo is likely blurry, rotated or
    /// not sheet music at all. The caller should advise re-photographing.
    #[error("no staves detected")]
    NoStavesDetected,

    /// A neural classifier was requested but not loaded. Only surfaced
    /// through FFI diagnostics; the pipeline itself falls back instead.
    #[error("classifier model unavailable: {0}")]
    ModelUnavailable(&'static str),

    /// The SoundFont bytes are not a valid SF2 file.
    #[error("SoundFont parse failed: {0}")]
    SoundFontParse(String),

    /// The active preset produced zero zones. The renderer recovers by
    /// rebuilding with the full zone list; this variant exists for callers
    /// that parse presets directly.
    #[error("SoundFont preset {0} has no zones")]
    SoundFontZoneEmpty(usize),

    /// The score contains no playable events. `render_audio` does not
    /// return this — it emits a short silent WAV instead — but preset and
    /// FFI helpers may.
    #[error("score has no playable events")]
    NoPlayableEvents,

    /// Cooperative cancellation was requested between pipeline stages.
    /// No partial result is returned.
    #[error("cancellation requested")]
    CancellationRequested,

    /// An internal invariant was violated (MIDI out of range, negative
    /// tie duration, quantization residual above 0.5 beats). Indicates a
    /// bug in this crate, not bad input.
    #[error("invariant violated: {0}")]
    InvariantViolated(String),

    /// Serialization of the score or timing map failed.
    #[error("serialization failed: {0}")]
    Serialization(String),
}
