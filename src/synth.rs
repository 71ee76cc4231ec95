//! Note rendering: pitch-shifted, looped playback of the best-matching
//! SoundFont zone with its volume envelope, or a four-harmonic additive
//! fallback when no SoundFont is loaded.

use crate::soundfont::{SoundFont, Zone};

/// Output sample rate for everything this crate renders.
pub const SAMPLE_RATE: u32 = 44100;

/// Minimum loop length worth wrapping over.
const MIN_LOOP_SAMPLES: usize = 32;

/// A per-render synthesizer: the active preset's zone list plus a
/// note → zone cache rebuilt on preset switch.
pub(crate) struct Synth<'a> {
    sf2: Option<&'a SoundFont>,
    zones: Vec<&'a Zone>,
    /// Best zone per MIDI note at the reference velocity 80.
    cache: [Option<usize>; 128],
}

impl<'a> Synth<'a> {
    pub fn new(sf2: Option<&'a SoundFont>, preset_index: usize) -> Self {
        let zones = sf2.map(|sf| sf.zones_for_preset(preset_index)).unwrap_or_default();
        let mut cache = [None; 128];
        for note in 0u8..128 {
            cache[note as usize] = find_zone(&zones, note, 80);
        }
        Self { sf2, zones, cache }
    }

    /// Render one note as mono samples at 44100 Hz.
    pub fn render_note(&self, midi_note: u8, duration_s: f32, velocity: u8) -> Vec<f32> {
        match self.sf2 {
            Some(sf) => {
                let zone_idx = self
                    .cache
                    .get(midi_note as usize)
                    .copied()
                    .flatten()
                    .or_else(|| find_zone(&self.zones, midi_note, velocity));
                match zone_idx {
                    Some(idx) => {
                        render_zone(sf, self.zones[idx], midi_note, duration_s, velocity)
                    }
                    None => render_fallback(midi_note, duration_s, velocity),
                }
            }
            None => render_fallback(midi_note, duration_s, velocity),
        }
    }
}

/// Pick the best zone for a note/velocity: a zone whose key and
/// velocity ranges contain it, closest root key winning; otherwise the
/// zone whose key-range midpoint is nearest.
pub(crate) fn find_zone(zones: &[&Zone], note: u8, velocity: u8) -> Option<usize> {
    let mut best: Option<(usize, i32)> = None;
    for (i, zone) in zones.iter().enumerate() {
        if (zone.key_lo..=zone.key_hi).contains(&note)
            && (zone.vel_lo..=zone.vel_hi).contains(&velocity)
        {
            let dist = (note as i32 - zone.root_key as i32).abs();
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }
    }
    if let Some((i, _)) = best {
        return Some(i);
    }

    let mut nearest: Option<(usize, i32)> = None;
    for (i, zone) in zones.iter().enumerate() {
        let midpoint = (zone.key_lo as i32 + zone.key_hi as i32) / 2;
        let dist = (note as i32 - midpoint).abs();
        if nearest.map_or(true, |(_, d)| dist < d) {
            nearest = Some((i, dist));
        }
    }
    nearest.map(|(i, _)| i)
}

/// Sample-based rendering: fractional read through the pool at the
/// pitch ratio, linear interpolation, loop wrap, volume envelope.
fn render_zone(
    sf: &SoundFont,
    zone: &Zone,
    midi_note: u8,
    duration_s: f32,
    velocity: u8,
) -> Vec<f32> {
    let sample_count = (duration_s * SAMPLE_RATE as f32).max(1.0) as usize;
    let mut out = vec![0.0f32; sample_count];

    let semitones =
        midi_note as f32 - zone.root_key as f32 + zone.tuning_cents as f32 / 100.0;
    let pitch_ratio = (2.0f32).powf(semitones / 12.0)
        * (zone.sample_rate as f32 / SAMPLE_RATE as f32);

    let pool = &sf.sample_pool;
    let loop_len = zone.end_loop.saturating_sub(zone.start_loop);
    let looping = matches!(zone.loop_mode, 1 | 3)
        && loop_len >= MIN_LOOP_SAMPLES
        && zone.start_loop >= zone.start_offset
        && zone.end_loop <= zone.end_offset;

    let envelope = Envelope::from_zone(zone, duration_s, sample_count);
    let gain = velocity as f32 / 127.0 * 0.85;

    let mut pos = zone.start_offset as f64;
    for (i, slot) in out.iter_mut().enumerate() {
        if looping && pos >= zone.end_loop as f64 {
            pos = zone.start_loop as f64
                + (pos - zone.start_loop as f64) % loop_len as f64;
        }
        let idx = pos as usize;
        if idx + 1 >= zone.end_offset && !looping {
            break;
        }

        let frac = (pos - idx as f64) as f32;
        let s0 = pool.get(idx).copied().unwrap_or(0) as f32;
        let next_idx = if looping && idx + 1 >= zone.end_loop {
            zone.start_loop
        } else {
            idx + 1
        };
        let s1 = pool.get(next_idx).copied().unwrap_or(0) as f32;

        let sample = (s0 + (s1 - s0) * frac) / 32768.0;
        let v = sample * envelope.level_at(i) * gain;
        *slot = if v.is_finite() { v } else { 0.0 };

        pos += pitch_ratio as f64;
    }

    out
}

/// The SF2 volume envelope with the clamps applied: linear attack,
/// decay to the sustain level, and a release ramp that starts
/// `release` seconds before the end of the note.
struct Envelope {
    attack_samples: usize,
    decay_samples: usize,
    sustain_level: f32,
    release_start: usize,
    release_samples: usize,
}

impl Envelope {
    fn from_zone(zone: &Zone, duration_s: f32, sample_count: usize) -> Self {
        let attack = zone.attack_s.min(2.0).max(0.005);
        let decay = zone.decay_s.min(4.0).max(0.01);
        let release = zone.release_s.min(0.3 * duration_s).min(2.0).max(0.02);
        Self::new(attack, decay, zone.sustain_level, release, sample_count)
    }

    fn new(
        attack_s: f32,
        decay_s: f32,
        sustain_level: f32,
        release_s: f32,
        sample_count: usize,
    ) -> Self {
        let to_samples = |s: f32| (s * SAMPLE_RATE as f32).max(1.0) as usize;
        let release_samples = to_samples(release_s).min(sample_count);
        Self {
            attack_samples: to_samples(attack_s),
            decay_samples: to_samples(decay_s),
            sustain_level: sustain_level.clamp(0.0, 1.0),
            release_start: sample_count - release_samples,
            release_samples: release_samples.max(1),
        }
    }

    fn level_at(&self, i: usize) -> f32 {
        let base = if i < self.attack_samples {
            i as f32 / self.attack_samples as f32
        } else if i < self.attack_samples + self.decay_samples {
            let t = (i - self.attack_samples) as f32 / self.decay_samples as f32;
            1.0 - (1.0 - self.sustain_level) * t
        } else {
            self.sustain_level
        };

        if i >= self.release_start {
            let t = (i - self.release_start) as f32 / self.release_samples as f32;
            base * (1.0 - t).max(0.0)
        } else {
            base
        }
    }
}

/// No SoundFont: four harmonics of the note's equal-temperament
/// frequency under a fixed ADSR.
fn render_fallback(midi_note: u8, duration_s: f32, velocity: u8) -> Vec<f32> {
    const WEIGHTS: [f32; 4] = [1.0, 0.35, 0.15, 0.06];
    const NORM: f32 = 1.56;

    let sample_count = (duration_s * SAMPLE_RATE as f32).max(1.0) as usize;
    let f0 = 440.0 * (2.0f32).powf((midi_note as f32 - 69.0) / 12.0);
    let envelope = Envelope::new(
        0.008,
        0.150,
        0.6,
        (0.2f32).min(duration_s * 0.3).max(0.02),
        sample_count,
    );
    let gain = velocity as f32 / 127.0 * 0.75;

    let mut out = vec![0.0f32; sample_count];
    for (i, slot) in out.iter_mut().enumerate() {
        let t = i as f32 / SAMPLE_RATE as f32;
        let mut v = 0.0f32;
        for (h, &w) in WEIGHTS.iter().enumerate() {
            v += w * (std::f32::consts::TAU * f0 * (h + 1) as f32 * t).sin();
        }
        let v = v / NORM * envelope.level_at(i) * gain;
        *slot = if v.is_finite() { v } else { 0.0 };
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::soundfont::SoundFont;
    use crate::test_sf2::TestSoundFontBuilder;

    #[test]
    fn fallback_renders_expected_length() {
        let synth = Synth::new(None, 0);
        let samples = synth.render_note(69, 1.0, 100);
        assert_eq!(samples.len(), SAMPLE_RATE as usize);
        assert!(samples.iter().any(|&s| s.abs() > 0.01), "should not be silent");
        assert!(samples.iter().all(|s| s.is_finite()));
        assert!(samples.iter().all(|s| s.abs() <= 1.0));
    }

    #[test]
    fn fallback_pitch_tracks_midi_note() {
        let synth = Synth::new(None, 0);
        let a4 = synth.render_note(69, 0.5, 100);
        // Count zero crossings as a crude frequency estimate
        let crossings = a4.windows(2).filter(|w| w[0] < 0.0 && w[1] >= 0.0).count();
        // 440 Hz over 0.5 s ≈ 220 positive-going crossings
        assert!((crossings as i32 - 220).abs() < 25, "crossings {crossings}");
    }

    #[test]
    fn zone_render_is_finite_and_bounded() {
        let bytes = TestSoundFontBuilder::new().build();
        let sf = SoundFont::parse(&bytes).unwrap();
        let synth = Synth::new(Some(&sf), 0);
        let samples = synth.render_note(60, 0.5, 100);
        assert_eq!(samples.len(), SAMPLE_RATE as usize / 2);
        assert!(samples.iter().all(|s| s.is_finite()));
        assert!(samples.iter().any(|&s| s.abs() > 0.001));
    }

    #[test]
    fn looped_zone_sustains_past_sample_end() {
        // 8000-sample pool at 44100 Hz ≈ 0.18 s; a 1-second note needs
        // the loop to keep producing signal.
        let bytes = TestSoundFontBuilder::new().loop_mode(1).build();
        let sf = SoundFont::parse(&bytes).unwrap();
        let synth = Synth::new(Some(&sf), 0);
        let samples = synth.render_note(60, 1.0, 100);
        let late = &samples[(SAMPLE_RATE as usize / 2)..];
        assert!(late.iter().any(|&s| s.abs() > 0.001), "loop should sustain");
    }

    #[test]
    fn unlooped_zone_goes_silent_after_pool_ends() {
        let bytes = TestSoundFontBuilder::new().loop_mode(0).build();
        let sf = SoundFont::parse(&bytes).unwrap();
        let synth = Synth::new(Some(&sf), 0);
        let samples = synth.render_note(60, 1.0, 100);
        let late = &samples[(SAMPLE_RATE as usize / 2)..];
        assert!(late.iter().all(|&s| s == 0.0), "unlooped tail should be silent");
    }

    #[test]
    fn envelope_attack_rises_from_zero() {
        let env = Envelope::new(0.01, 0.1, 0.6, 0.02, SAMPLE_RATE as usize);
        assert_eq!(env.level_at(0), 0.0);
        let mid_attack = env.level_at(220);
        assert!(mid_attack > 0.3 && mid_attack < 0.7);
        // Past attack + decay, holds at sustain
        assert!((env.level_at(SAMPLE_RATE as usize / 2) - 0.6).abs() < 1e-3);
    }

    #[test]
    fn envelope_release_ends_near_zero() {
        let n = SAMPLE_RATE as usize;
        let env = Envelope::new(0.01, 0.1, 0.6, 0.1, n);
        assert!(env.level_at(n - 1) < 0.01);
    }

    #[test]
    fn zone_lookup_prefers_matching_range() {
        let bytes = TestSoundFontBuilder::new().build();
        let sf = SoundFont::parse(&bytes).unwrap();
        let zones: Vec<&crate::soundfont::Zone> = sf.zones.iter().collect();
        assert_eq!(find_zone(&zones, 60, 80), Some(0));
        assert_eq!(find_zone(&[], 60, 80), None);
    }
}
