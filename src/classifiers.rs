//! Injected neural classifier handles.
//!
//! The engine consumes three small pre-trained networks as opaque pure
//! functions: a symbol OCR (24×24 → 71 classes) used as a confidence gate
//! on notehead candidates, and two key-signature readers (type 30×15 → 3,
//! digit 30×27 → 11). The app shell owns the actual inference runtime and
//! hands the engine plain closures; a missing model is never an error —
//! the pipeline falls back (gate skipped, key signature `{None, 0}`).

use crate::model::Duration;

/// A pure inference function: flattened row-major single-channel input,
/// raw logits out.
pub type ModelFn = Box<dyn Fn(&[f32]) -> Vec<f32> + Send + Sync>;

/// Expected input lengths per model.
pub const OCR_INPUT_LEN: usize = 24 * 24;
pub const KEY_TYPE_INPUT_LEN: usize = 30 * 15;
pub const KEY_DIGIT_INPUT_LEN: usize = 30 * 27;

/// Number of OCR output classes.
pub const OCR_CLASSES: usize = 71;

/// The three classifier slots, all optional.
#[derive(Default)]
pub struct Classifiers {
    pub ocr: Option<ModelFn>,
    pub key_type: Option<ModelFn>,
    pub key_digit: Option<ModelFn>,
}

impl std::fmt::Debug for Classifiers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Classifiers")
            .field("ocr", &self.ocr.is_some())
            .field("key_type", &self.key_type.is_some())
            .field("key_digit", &self.key_digit.is_some())
            .finish()
    }
}

/// Coarse symbol category from the OCR head.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrCategory {
    Note,
    Rest,
    Unknown,
}

/// Category plus an optional duration hint for one OCR class.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OcrLabel {
    pub category: OcrCategory,
    pub subtype: Option<Duration>,
}

/// One OCR inference result attached to a notehead candidate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct OcrReading {
    /// argmax class index.
    pub class: usize,
    /// softmax probability of the argmax class.
    pub p: f32,
    /// Normalized entropy of the softmax distribution, 0..1.
    pub entropy: f32,
    pub label: OcrLabel,
}

impl Classifiers {
    /// No models loaded; every stage uses its fallback.
    pub fn none() -> Self {
        Self::default()
    }

    /// Run the symbol OCR on a standardized 24×24 patch. `None` when the
    /// model is not loaded or the patch has the wrong length.
    pub fn run_ocr(&self, patch: &[f32]) -> Option<OcrReading> {
        let model = self.ocr.as_ref()?;
        if patch.len() != OCR_INPUT_LEN {
            return None;
        }
        let logits = model(patch);
        if logits.len() != OCR_CLASSES {
            return None;
        }
        let probs = softmax(&logits);
        let class = argmax(&probs);
        Some(OcrReading {
            class,
            p: probs[class],
            entropy: normalized_entropy(&probs),
            label: label_for_class(class),
        })
    }

    /// Key-signature type: 0 = none, 1 = sharps, 2 = flats.
    pub fn run_key_type(&self, patch: &[f32]) -> Option<usize> {
        let model = self.key_type.as_ref()?;
        if patch.len() != KEY_TYPE_INPUT_LEN {
            return None;
        }
        let logits = model(patch);
        if logits.len() != 3 {
            return None;
        }
        Some(argmax(&logits))
    }

    /// Key-signature accidental count, 0..=10 (clamped to 7 by the caller).
    pub fn run_key_digit(&self, patch: &[f32]) -> Option<usize> {
        let model = self.key_digit.as_ref()?;
        if patch.len() != KEY_DIGIT_INPUT_LEN {
            return None;
        }
        let logits = model(patch);
        if logits.len() != 11 {
            return None;
        }
        Some(argmax(&logits))
    }
}

/// Class-index → (category, subtype) table for the 71-class symbol OCR.
///
/// Hand-curated from per-class sample counts on the training corpus: the
/// first block is note glyphs at the durations the corpus distinguishes
/// (several visual variants per duration — isolated, beamed, chorded),
/// the second block is rests, and the tail is text, dynamics, noise and
/// other non-event symbols. Swapping in a differently-trained OCR model
/// requires re-deriving this table.
pub fn label_for_class(class: usize) -> OcrLabel {
    use Duration::*;
    use OcrCategory::*;

    let (category, subtype) = match class {
        // 0..=5: isolated filled heads (quarter and shorter, no flag info)
        0..=5 => (Note, Some(Quarter)),
        // 6..=11: flagged/beamed eighth variants
        6..=11 => (Note, Some(Eighth)),
        // 12..=16: double-beamed sixteenth variants
        12..=16 => (Note, Some(Sixteenth)),
        // 17..=18: triple-beamed heads
        17..=18 => (Note, Some(ThirtySecond)),
        // 19..=23: hollow half-note heads
        19..=23 => (Note, Some(Half)),
        // 24..=26: whole notes
        24..=26 => (Note, Some(Whole)),
        // 27..=31: chord clusters (no reliable duration)
        27..=31 => (Note, None),
        // 32..=34: whole rests
        32..=34 => (Rest, Some(Whole)),
        // 35..=37: half rests
        35..=37 => (Rest, Some(Half)),
        // 38..=41: quarter rests
        38..=41 => (Rest, Some(Quarter)),
        // 42..=44: eighth rests
        42..=44 => (Rest, Some(Eighth)),
        // 45..=46: sixteenth rests
        45..=46 => (Rest, Some(Sixteenth)),
        // 47..=70: clef fragments, accidentals, digits, text, lyrics,
        // dynamics, smudges
        _ => (Unknown, None),
    };
    OcrLabel { category, subtype }
}

/// Numerically stable softmax.
pub fn softmax(logits: &[f32]) -> Vec<f32> {
    if logits.is_empty() {
        return Vec::new();
    }
    let max = logits.iter().copied().fold(f32::NEG_INFINITY, f32::max);
    let exps: Vec<f32> = logits.iter().map(|&x| (x - max).exp()).collect();
    let sum: f32 = exps.iter().sum();
    if sum <= 0.0 || !sum.is_finite() {
        let uniform = 1.0 / logits.len() as f32;
        return vec![uniform; logits.len()];
    }
    exps.iter().map(|&e| e / sum).collect()
}

/// Index of the largest value. Empty input returns 0.
pub fn argmax(values: &[f32]) -> usize {
    let mut best = 0;
    for (i, &v) in values.iter().enumerate() {
        if v > values[best] {
            best = i;
        }
    }
    best
}

/// Shannon entropy normalized by ln(n), so 1.0 is a uniform distribution.
pub fn normalized_entropy(probs: &[f32]) -> f32 {
    if probs.len() < 2 {
        return 0.0;
    }
    let h: f32 = probs
        .iter()
        .filter(|&&p| p > 0.0)
        .map(|&p| -p * p.ln())
        .sum();
    h / (probs.len() as f32).ln()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn softmax_sums_to_one() {
        let p = softmax(&[1.0, 2.0, 3.0]);
        let sum: f32 = p.iter().sum();
        assert!((sum - 1.0).abs() < 1e-6);
        assert!(p[2] > p[1] && p[1] > p[0]);
    }

    #[test]
    fn entropy_bounds() {
        let uniform = vec![0.25; 4];
        assert!((normalized_entropy(&uniform) - 1.0).abs() < 1e-6);

        let peaked = vec![1.0, 0.0, 0.0, 0.0];
        assert!(normalized_entropy(&peaked) < 1e-6);
    }

    #[test]
    fn label_table_covers_all_classes() {
        let mut notes = 0;
        let mut rests = 0;
        let mut unknown = 0;
        for c in 0..OCR_CLASSES {
            match label_for_class(c).category {
                OcrCategory::Note => notes += 1,
                OcrCategory::Rest => rests += 1,
                OcrCategory::Unknown => unknown += 1,
            }
        }
        assert_eq!(notes + rests + unknown, OCR_CLASSES);
        assert!(notes > 0 && rests > 0 && unknown > 0);
    }

    #[test]
    fn missing_model_returns_none() {
        let c = Classifiers::none();
        assert!(c.run_ocr(&vec![0.0; OCR_INPUT_LEN]).is_none());
        assert!(c.run_key_type(&vec![0.0; KEY_TYPE_INPUT_LEN]).is_none());
    }

    #[test]
    fn injected_model_runs() {
        let mut c = Classifiers::none();
        c.key_type = Some(Box::new(|_input| vec![0.1, 2.0, 0.3]));
        assert_eq!(c.run_key_type(&vec![0.0; KEY_TYPE_INPUT_LEN]), Some(1));
    }
}
