//! omrlib — optical music recognition and audio rendering for NoteShot.
//!
//! Takes one photograph of printed sheet music and produces a symbolic
//! score plus rendered PCM audio that plays it with correct timing,
//! pitch, and (given a SoundFont) instrument timbre.
//!
//! # Example
//! ```no_run
//! use omrlib::{process_sheet, render_audio, Classifiers, RenderOptions};
//!
//! let image = std::fs::read("sheet.jpg").unwrap();
//! let score = process_sheet(&image, &Classifiers::none()).unwrap();
//! println!("{} notes, {} rests", score.metadata.total_notes, score.metadata.total_rests);
//!
//! let audio = render_audio(&score, &RenderOptions::default(), None).unwrap();
//! std::fs::write("sheet.wav", &audio.wav).unwrap();
//! ```

pub mod audio;
pub mod classifiers;
pub mod error;
pub mod model;
pub mod soundfont;

mod omr;
mod synth;

#[cfg(test)]
pub(crate) mod test_sf2;

#[cfg(target_os = "android")]
pub mod android;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

pub use audio::{render_audio, CursorEntry, RenderOptions, RenderedAudio, VoiceMask};
pub use classifiers::Classifiers;
pub use error::OmrError;
pub use model::Score;
pub use soundfont::SoundFont;
pub use synth::SAMPLE_RATE;

/// Default wall-clock limit for one recognition call.
const DEFAULT_OMR_TIMEOUT_SECS: f32 = 45.0;

/// Cooperative cancellation handle, checked between pipeline stages.
/// Cloning shares the flag; any clone can cancel.
#[derive(Debug, Clone)]
pub struct CancelFlag {
    cancelled: Arc<AtomicBool>,
    deadline: Option<Instant>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(false)), deadline: None }
    }

    /// A flag that also trips after `seconds` of wall-clock time.
    pub fn with_timeout(seconds: f32) -> Self {
        let mut flag = Self::new();
        flag.deadline =
            Some(Instant::now() + std::time::Duration::from_secs_f32(seconds.max(0.0)));
        flag
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
            || self.deadline.map_or(false, |d| Instant::now() >= d)
    }

    pub(crate) fn check(&self) -> Result<(), OmrError> {
        if self.is_cancelled() {
            Err(OmrError::CancellationRequested)
        } else {
            Ok(())
        }
    }
}

impl Default for CancelFlag {
    fn default() -> Self {
        Self::new()
    }
}

/// Recognize a score from encoded image bytes (JPEG or PNG).
///
/// Classifier models are optional: without them the key signature
/// reads as none and the OCR gate passes every candidate.
pub fn process_sheet(image_bytes: &[u8], classifiers: &Classifiers) -> Result<Score, OmrError> {
    process_sheet_with_cancel(
        image_bytes,
        classifiers,
        &CancelFlag::with_timeout(DEFAULT_OMR_TIMEOUT_SECS),
    )
}

/// [`process_sheet`] with an explicit cancellation handle. Returns
/// [`OmrError::CancellationRequested`] with no partial result when the
/// flag trips between stages.
pub fn process_sheet_with_cancel(
    image_bytes: &[u8],
    classifiers: &Classifiers,
    cancel: &CancelFlag,
) -> Result<Score, OmrError> {
    omr::run_pipeline(image_bytes, classifiers, cancel)
}

/// Parse an SF2 SoundFont buffer.
pub fn load_soundfont(sf2_bytes: &[u8]) -> Result<SoundFont, OmrError> {
    SoundFont::parse(sf2_bytes)
}

/// Serialize a score to JSON, e.g. for the FFI boundary.
pub fn score_to_json(score: &Score) -> Result<String, OmrError> {
    serde_json::to_string(score).map_err(|e| OmrError::Serialization(e.to_string()))
}

/// Parse a score back from its JSON form.
pub fn score_from_json(json: &str) -> Result<Score, OmrError> {
    serde_json::from_str(json).map_err(|e| OmrError::Serialization(e.to_string()))
}

/// Serialize a timing map to JSON.
pub fn timing_map_to_json(map: &[CursorEntry]) -> String {
    serde_json::to_string(map).unwrap_or_else(|_| "[]".to_string())
}

// ═══════════════════════════════════════════════════════════════════════
// C FFI — for the iOS static library and other native shells
// ═══════════════════════════════════════════════════════════════════════

use std::ffi::{c_char, CStr, CString};

/// An owned byte buffer handed across the FFI boundary. Free with
/// `omrlib_free_buffer`.
#[repr(C)]
pub struct OmrBuffer {
    pub ptr: *mut u8,
    pub len: usize,
}

/// Recognize a score and return it as a JSON C string, or null on
/// failure. Free the result with `omrlib_free_string`.
///
/// # Safety
/// `data` must point to `len` valid bytes.
#[no_mangle]
pub unsafe extern "C" fn omrlib_process_sheet(data: *const u8, len: usize) -> *mut c_char {
    if data.is_null() || len == 0 {
        return std::ptr::null_mut();
    }
    let bytes = unsafe { std::slice::from_raw_parts(data, len) };

    match process_sheet(bytes, &Classifiers::none()).and_then(|s| score_to_json(&s)) {
        Ok(json) => CString::new(json).unwrap_or_default().into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Render a score (as JSON from `omrlib_process_sheet`) to WAV bytes.
/// `sf2_data` may be null for the built-in fallback tone. Returns null
/// on failure; free the result with `omrlib_free_buffer`.
///
/// # Safety
/// `score_json` must be a valid null-terminated UTF-8 C string;
/// `sf2_data`, when non-null, must point to `sf2_len` valid bytes.
#[no_mangle]
pub unsafe extern "C" fn omrlib_render_wav(
    score_json: *const c_char,
    sf2_data: *const u8,
    sf2_len: usize,
    tempo_bpm: u16,
    preset_index: u32,
) -> *mut OmrBuffer {
    if score_json.is_null() {
        return std::ptr::null_mut();
    }
    let json = match unsafe { CStr::from_ptr(score_json) }.to_str() {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };
    let score = match score_from_json(json) {
        Ok(s) => s,
        Err(_) => return std::ptr::null_mut(),
    };

    let sf2 = if sf2_data.is_null() || sf2_len == 0 {
        None
    } else {
        let bytes = unsafe { std::slice::from_raw_parts(sf2_data, sf2_len) };
        SoundFont::parse(bytes).ok()
    };

    let options = RenderOptions {
        tempo_bpm,
        preset_index,
        voices: VoiceMask::all(),
    };
    match render_audio(&score, &options, sf2.as_ref()) {
        Ok(rendered) => {
            let mut wav = rendered.wav.into_boxed_slice();
            let buffer = Box::new(OmrBuffer { ptr: wav.as_mut_ptr(), len: wav.len() });
            std::mem::forget(wav);
            Box::into_raw(buffer)
        }
        Err(_) => std::ptr::null_mut(),
    }
}

/// Free a string previously returned by omrlib functions.
///
/// # Safety
/// `ptr` must be a string previously returned by an omrlib function,
/// or null.
#[no_mangle]
pub unsafe extern "C" fn omrlib_free_string(ptr: *mut c_char) {
    if !ptr.is_null() {
        unsafe {
            let _ = CString::from_raw(ptr);
        }
    }
}

/// Free a buffer previously returned by `omrlib_render_wav`.
///
/// # Safety
/// `ptr` must be a buffer previously returned by `omrlib_render_wav`,
/// or null.
#[no_mangle]
pub unsafe extern "C" fn omrlib_free_buffer(ptr: *mut OmrBuffer) {
    if !ptr.is_null() {
        unsafe {
            let buffer = Box::from_raw(ptr);
            let _ = Vec::from_raw_parts(buffer.ptr, buffer.len, buffer.len);
        }
    }
}
