//! Audio rendering: lay the score out in time as beat columns, mix
//! every note into one master buffer, normalize, and encode a
//! canonical 16-bit mono WAV. Also emits the cursor timing map that
//! lets the UI track playback over the photographed page.

use serde::{Deserialize, Serialize};

use crate::error::OmrError;
use crate::model::{Score, ScoreEvent, System, Voice};
use crate::soundfont::SoundFont;
use crate::synth::{Synth, SAMPLE_RATE};

/// Events closer than this many pixels sound together.
const COLUMN_TOLERANCE_PX: u32 = 8;
/// Decay tail appended after the last column.
const TAIL_SECONDS: f32 = 0.3;
/// Length of the silent output for a score with no playable notes.
const SILENT_SECONDS: f32 = 0.1;

/// Which SATB voices to render.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VoiceMask {
    pub soprano: bool,
    pub alto: bool,
    pub tenor: bool,
    pub bass: bool,
}

impl VoiceMask {
    pub fn all() -> Self {
        Self { soprano: true, alto: true, tenor: true, bass: true }
    }

    pub fn allows(&self, voice: Voice) -> bool {
        match voice {
            Voice::Soprano => self.soprano,
            Voice::Alto => self.alto,
            Voice::Tenor => self.tenor,
            Voice::Bass => self.bass,
        }
    }
}

impl Default for VoiceMask {
    fn default() -> Self {
        Self::all()
    }
}

/// Rendering options.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderOptions {
    /// Beats per minute, clamped to 40..=240.
    pub tempo_bpm: u16,
    /// Preset (instrument) index into the loaded SoundFont.
    pub preset_index: u32,
    pub voices: VoiceMask,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self { tempo_bpm: 120, preset_index: 0, voices: VoiceMask::all() }
    }
}

/// One cursor stop: where on the image the playback is at a time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CursorEntry {
    /// Seconds from the start of the audio.
    pub time: f32,
    /// Image pixel coordinates of the beat column.
    pub x: u32,
    pub y: u32,
    pub staff_index: u32,
    /// True when the whole column is rests.
    pub is_rest: bool,
}

/// The rendered result: WAV bytes, the cursor map, and the total
/// length in seconds.
#[derive(Debug, Clone)]
pub struct RenderedAudio {
    pub wav: Vec<u8>,
    pub timing_map: Vec<CursorEntry>,
    pub total_duration_sec: f32,
}

struct RenderTask {
    offset_samples: usize,
    /// (midi note, duration seconds, velocity)
    notes: Vec<(u8, f32, u8)>,
}

/// Render a recognized score to audio.
pub fn render_audio(
    score: &Score,
    options: &RenderOptions,
    sf2: Option<&SoundFont>,
) -> Result<RenderedAudio, OmrError> {
    let tempo = options.tempo_bpm.clamp(40, 240);
    let seconds_per_beat = 60.0 / tempo as f32;

    // Voice-mask filter keeps indices into the original event list
    let audible: Vec<&ScoreEvent> = score
        .events
        .iter()
        .filter(|e| options.voices.allows(e.voice()))
        .collect();

    let has_notes = audible.iter().any(|e| !e.is_rest());
    if !has_notes {
        log::debug!("no playable events, emitting {SILENT_SECONDS} s of silence");
        let samples = vec![0.0f32; (SILENT_SECONDS * SAMPLE_RATE as f32) as usize];
        return Ok(RenderedAudio {
            wav: encode_wav_mono16(&samples),
            timing_map: Vec::new(),
            total_duration_sec: SILENT_SECONDS,
        });
    }

    // ── Lay out beat columns system by system ───────────────────────
    let systems = effective_systems(score);
    let mut timing_map: Vec<CursorEntry> = Vec::new();
    let mut tasks: Vec<RenderTask> = Vec::new();
    let mut global_time = 0.0f32;

    for system in &systems {
        let mut events: Vec<&ScoreEvent> = audible
            .iter()
            .copied()
            .filter(|e| system.staff_indices.contains(&e.staff_index()))
            .collect();
        events.sort_by_key(|e| (e.x(), e.staff_index()));

        for column in columns_of(&events) {
            let mean_x =
                (column.iter().map(|e| e.x() as u64).sum::<u64>() / column.len() as u64) as u32;
            let mean_y =
                (column.iter().map(|e| e.y() as u64).sum::<u64>() / column.len() as u64) as u32;
            let all_rests = column.iter().all(|e| e.is_rest());

            timing_map.push(CursorEntry {
                time: global_time,
                x: mean_x,
                y: mean_y,
                staff_index: column[0].staff_index() as u32,
                is_rest: all_rests,
            });

            if !all_rests {
                let notes: Vec<(u8, f32, u8)> = column
                    .iter()
                    .filter_map(|e| match e {
                        ScoreEvent::Note(n) => {
                            Some((n.midi_note, n.beats() * seconds_per_beat, 96))
                        }
                        ScoreEvent::Rest(_) => None,
                    })
                    .collect();
                tasks.push(RenderTask {
                    offset_samples: (global_time * SAMPLE_RATE as f32).floor() as usize,
                    notes,
                });
            }

            let advance = column
                .iter()
                .map(|e| e.beats())
                .fold(f32::MAX, f32::min);
            global_time += advance * seconds_per_beat;
        }
    }

    // ── Mix ─────────────────────────────────────────────────────────
    let synth = Synth::new(sf2, options.preset_index as usize);
    let total_samples = ((global_time + TAIL_SECONDS) * SAMPLE_RATE as f32) as usize;
    let mut master = vec![0.0f32; total_samples.max(1)];

    for task in &tasks {
        for &(midi, dur_s, velocity) in &task.notes {
            let rendered = synth.render_note(midi, dur_s, velocity);
            let end = (task.offset_samples + rendered.len()).min(master.len());
            for (i, slot) in master[task.offset_samples..end].iter_mut().enumerate() {
                *slot += rendered[i];
            }
        }
    }

    // Sanitize, then normalize to ≤ 1.0 peak
    for s in master.iter_mut() {
        if !s.is_finite() {
            *s = 0.0;
        }
    }
    let peak = master.iter().fold(0.0f32, |p, &s| p.max(s.abs()));
    if peak > 1.0 {
        for s in master.iter_mut() {
            *s /= peak;
        }
    }

    let total_duration_sec = master.len() as f32 / SAMPLE_RATE as f32;
    Ok(RenderedAudio { wav: encode_wav_mono16(&master), timing_map, total_duration_sec })
}

/// Systems from metadata, or adjacent-staff pairs when none survive.
fn effective_systems(score: &Score) -> Vec<System> {
    if !score.metadata.systems.is_empty() {
        return score.metadata.systems.clone();
    }
    let staff_count = score.metadata.staves.len();
    (0..staff_count)
        .step_by(2)
        .map(|i| {
            let indices: Vec<usize> = (i..(i + 2).min(staff_count)).collect();
            System { top: 0, bottom: 0, staff_indices: indices }
        })
        .collect()
}

/// Split x-sorted events into beat columns.
fn columns_of<'a>(events: &[&'a ScoreEvent]) -> Vec<Vec<&'a ScoreEvent>> {
    let mut columns: Vec<Vec<&ScoreEvent>> = Vec::new();
    for &event in events {
        match columns.last_mut() {
            Some(col) if event.x().saturating_sub(col[0].x()) <= COLUMN_TOLERANCE_PX => {
                col.push(event);
            }
            _ => columns.push(vec![event]),
        }
    }
    columns
}

/// Canonical 44-byte-header PCM WAV: S16LE, mono, 44100 Hz.
pub(crate) fn encode_wav_mono16(samples: &[f32]) -> Vec<u8> {
    let data_len = (samples.len() * 2) as u32;
    let mut out = Vec::with_capacity(44 + samples.len() * 2);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1u16.to_le_bytes()); // mono
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&(SAMPLE_RATE * 2).to_le_bytes()); // byte rate
    out.extend_from_slice(&2u16.to_le_bytes()); // block align
    out.extend_from_slice(&16u16.to_le_bytes()); // bits per sample
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for &s in samples {
        let clipped = s.clamp(-1.0, 1.0);
        let v = if clipped < 0.0 {
            (clipped * 0x8000 as f32) as i16
        } else {
            (clipped * 0x7FFF as f32) as i16
        };
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}
