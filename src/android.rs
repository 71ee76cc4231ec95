//! JNI bindings for Android.
//!
//! These functions are called from Kotlin via the JNI bridge.

use jni::objects::{JByteArray, JClass, JString};
use jni::sys::{jbyteArray, jint, jstring};
use jni::JNIEnv;

use crate::audio::{RenderOptions, VoiceMask};
use crate::classifiers::Classifiers;
use crate::{
    process_sheet, render_audio, score_from_json, score_to_json, timing_map_to_json, SoundFont,
};

/// Recognize a score from image bytes and return its JSON form.
///
/// Called from Kotlin as:
///   external fun processSheet(image: ByteArray): String?
#[no_mangle]
pub extern "system" fn Java_com_noteshot_app_OmrLib_processSheet(
    mut env: JNIEnv,
    _class: JClass,
    image: JByteArray,
) -> jstring {
    let bytes = match env.convert_byte_array(&image) {
        Ok(b) => b,
        Err(_) => return std::ptr::null_mut(),
    };

    match process_sheet(&bytes, &Classifiers::none()).and_then(|s| score_to_json(&s)) {
        Ok(json) => match env.new_string(&json) {
            Ok(js) => js.into_raw(),
            Err(_) => std::ptr::null_mut(),
        },
        Err(_) => std::ptr::null_mut(),
    }
}

/// Render a recognized score (JSON) to WAV bytes. `sf2` may be null
/// for the fallback tone.
///
/// Called from Kotlin as:
///   external fun renderWav(scoreJson: String, sf2: ByteArray?, tempo: Int, preset: Int): ByteArray?
#[no_mangle]
pub extern "system" fn Java_com_noteshot_app_OmrLib_renderWav(
    mut env: JNIEnv,
    _class: JClass,
    score_json: JString,
    sf2: JByteArray,
    tempo: jint,
    preset: jint,
) -> jbyteArray {
    let Some(rendered) = render_from_jni(&mut env, score_json, sf2, tempo, preset) else {
        return std::ptr::null_mut();
    };

    match env.byte_array_from_slice(&rendered.0) {
        Ok(arr) => arr.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

/// Cursor timing map for a recognized score (JSON in, JSON out).
/// Deterministic with `renderWav` for the same arguments.
///
/// Called from Kotlin as:
///   external fun renderCursorMap(scoreJson: String, sf2: ByteArray?, tempo: Int, preset: Int): String?
#[no_mangle]
pub extern "system" fn Java_com_noteshot_app_OmrLib_renderCursorMap(
    mut env: JNIEnv,
    _class: JClass,
    score_json: JString,
    sf2: JByteArray,
    tempo: jint,
    preset: jint,
) -> jstring {
    let Some(rendered) = render_from_jni(&mut env, score_json, sf2, tempo, preset) else {
        return std::ptr::null_mut();
    };

    match env.new_string(timing_map_to_json(&rendered.1)) {
        Ok(js) => js.into_raw(),
        Err(_) => std::ptr::null_mut(),
    }
}

fn render_from_jni(
    env: &mut JNIEnv,
    score_json: JString,
    sf2: JByteArray,
    tempo: jint,
    preset: jint,
) -> Option<(Vec<u8>, Vec<crate::CursorEntry>)> {
    let json: String = env.get_string(&score_json).ok()?.into();
    let score = score_from_json(&json).ok()?;

    let sf2 = if sf2.is_null() {
        None
    } else {
        let bytes = env.convert_byte_array(&sf2).ok()?;
        SoundFont::parse(&bytes).ok()
    };

    let options = RenderOptions {
        tempo_bpm: tempo.clamp(40, 240) as u16,
        preset_index: preset.max(0) as u32,
        voices: VoiceMask::all(),
    };
    let rendered = render_audio(&score, &options, sf2.as_ref()).ok()?;
    Some((rendered.wav, rendered.timing_map))
}
