//! SoundFont 2 parsing.
//!
//! Reads the RIFF `sfbk` container: the 16-bit PCM sample pool from the
//! `sdta/smpl` chunk and the preset / instrument / sample records from
//! `pdta`. Modulators (`pmod`/`imod`) and every chunk not listed below
//! are ignored. All multibyte integers are little-endian.
//!
//! The sample pool is copied into an aligned `Vec<i16>` up front — the
//! source offset inside the file is not guaranteed to be 2-byte
//! aligned, and the host byte order is not the file's.

use crate::error::OmrError;

/// Record sizes in the pdta sub-chunks.
const PHDR_SIZE: usize = 38;
const BAG_SIZE: usize = 4;
const GEN_SIZE: usize = 4;
const INST_SIZE: usize = 22;
const SHDR_SIZE: usize = 46;

// Generator operators we interpret; everything else is skipped.
const GEN_START_OFFSET: u16 = 0;
const GEN_END_OFFSET: u16 = 1;
const GEN_START_LOOP_OFFSET: u16 = 2;
const GEN_END_LOOP_OFFSET: u16 = 3;
const GEN_START_COARSE: u16 = 4;
const GEN_END_COARSE: u16 = 12;
const GEN_ATTACK: u16 = 34;
const GEN_DECAY: u16 = 36;
const GEN_SUSTAIN: u16 = 37;
const GEN_RELEASE: u16 = 38;
const GEN_INSTRUMENT: u16 = 41;
const GEN_KEY_RANGE: u16 = 43;
const GEN_VEL_RANGE: u16 = 44;
const GEN_START_LOOP_COARSE: u16 = 45;
const GEN_END_LOOP_COARSE: u16 = 50;
const GEN_COARSE_TUNE: u16 = 51;
const GEN_FINE_TUNE: u16 = 52;
const GEN_SAMPLE_ID: u16 = 53;
const GEN_SAMPLE_MODES: u16 = 54;
const GEN_ROOT_KEY: u16 = 58;

/// One `shdr` record: offsets are sample indices into the global pool.
#[derive(Debug, Clone)]
pub struct SampleHeader {
    pub name: String,
    pub start: u32,
    pub end: u32,
    pub start_loop: u32,
    pub end_loop: u32,
    pub sample_rate: u32,
    pub original_pitch: u8,
    pub pitch_correction: i8,
    pub sample_link: u16,
    pub sample_type: u16,
}

/// A playable zone: key/velocity window onto one sample with tuning
/// and volume-envelope parameters resolved to seconds / linear level.
#[derive(Debug, Clone)]
pub struct Zone {
    pub key_lo: u8,
    pub key_hi: u8,
    pub vel_lo: u8,
    pub vel_hi: u8,
    pub sample_index: usize,
    pub instrument_index: usize,
    pub root_key: u8,
    pub tuning_cents: i32,
    /// Absolute sample-pool bounds after header + generator offsets.
    pub start_offset: usize,
    pub end_offset: usize,
    pub start_loop: usize,
    pub end_loop: usize,
    pub sample_rate: u32,
    /// 0 = no loop, 1 = continuous, 3 = loop until release.
    pub loop_mode: u8,
    pub attack_s: f32,
    pub decay_s: f32,
    pub sustain_level: f32,
    pub release_s: f32,
}

/// One `phdr` preset: a named set of instrument indices.
#[derive(Debug, Clone)]
pub struct Preset {
    pub name: String,
    pub preset_num: u16,
    pub bank: u16,
    pub instrument_indices: Vec<usize>,
}

/// A parsed SoundFont: the sample pool plus flattened zones and the
/// preset list. Read-only after load; safe to share between renders.
#[derive(Debug, Clone)]
pub struct SoundFont {
    pub sample_pool: Vec<i16>,
    pub samples: Vec<SampleHeader>,
    pub zones: Vec<Zone>,
    pub presets: Vec<Preset>,
}

impl SoundFont {
    /// Parse an SF2 byte buffer.
    pub fn parse(bytes: &[u8]) -> Result<Self, OmrError> {
        let mut r = Reader::new(bytes);

        if &r.tag()? != b"RIFF" {
            return Err(OmrError::SoundFontParse("missing RIFF header".into()));
        }
        let riff_len = r.u32()? as usize;
        let riff_end = (r.pos + riff_len).min(bytes.len());
        if &r.tag()? != b"sfbk" {
            return Err(OmrError::SoundFontParse("not an sfbk form".into()));
        }

        let mut sample_pool: Option<Vec<i16>> = None;
        let mut pdta: Option<&[u8]> = None;

        // Top-level LIST walk
        while r.pos + 8 <= riff_end {
            let tag = r.tag()?;
            let len = r.u32()? as usize;
            let body = r.slice(len)?;
            if &tag == b"LIST" && len >= 4 {
                match &body[..4] {
                    b"sdta" => sample_pool = Some(read_sample_pool(&body[4..])?),
                    b"pdta" => pdta = Some(&body[4..]),
                    _ => log::debug!("ignoring LIST chunk {:?}", String::from_utf8_lossy(&body[..4])),
                }
            }
            // Chunks are word-aligned; a missing final pad byte is fine
            if len % 2 == 1 {
                let _ = r.skip(1);
            }
        }

        let sample_pool =
            sample_pool.ok_or_else(|| OmrError::SoundFontParse("missing sdta/smpl chunk".into()))?;
        let pdta = pdta.ok_or_else(|| OmrError::SoundFontParse("missing pdta chunk".into()))?;

        let hydra = Hydra::read(pdta)?;
        let samples = hydra.sample_headers();
        let zones = hydra.build_zones(&samples, sample_pool.len());
        let presets = hydra.build_presets();

        if zones.is_empty() {
            log::warn!("SoundFont parsed with zero usable zones");
        }

        Ok(Self { sample_pool, samples, zones, presets })
    }

    /// Zones belonging to a preset's instruments. Falls back to the
    /// full zone list (with a warning) when the preset filters down to
    /// nothing.
    pub fn zones_for_preset(&self, preset_index: usize) -> Vec<&Zone> {
        if let Some(preset) = self.presets.get(preset_index) {
            let filtered: Vec<&Zone> = self
                .zones
                .iter()
                .filter(|z| preset.instrument_indices.contains(&z.instrument_index))
                .collect();
            if !filtered.is_empty() {
                return filtered;
            }
            log::warn!(
                "preset {} ('{}') has no zones, using the full zone list",
                preset_index,
                preset.name
            );
        }
        self.zones.iter().collect()
    }

    /// Preset names in preset order, for instrument pickers.
    pub fn preset_names(&self) -> Vec<&str> {
        self.presets.iter().map(|p| p.name.as_str()).collect()
    }
}

/// The seven pdta sub-chunks, kept as raw record slices.
struct Hydra<'a> {
    phdr: &'a [u8],
    pbag: &'a [u8],
    pgen: &'a [u8],
    inst: &'a [u8],
    ibag: &'a [u8],
    igen: &'a [u8],
    shdr: &'a [u8],
}

impl<'a> Hydra<'a> {
    fn read(pdta: &'a [u8]) -> Result<Self, OmrError> {
        let mut phdr = None;
        let mut pbag = None;
        let mut pgen = None;
        let mut inst = None;
        let mut ibag = None;
        let mut igen = None;
        let mut shdr = None;

        let mut r = Reader::new(pdta);
        while r.pos + 8 <= pdta.len() {
            let tag = r.tag()?;
            let len = r.u32()? as usize;
            let body = r.slice(len)?;
            match &tag {
                b"phdr" => phdr = Some(body),
                b"pbag" => pbag = Some(body),
                b"pgen" => pgen = Some(body),
                b"inst" => inst = Some(body),
                b"ibag" => ibag = Some(body),
                b"igen" => igen = Some(body),
                b"shdr" => shdr = Some(body),
                // pmod / imod and anything unknown
                _ => {}
            }
            if len % 2 == 1 {
                let _ = r.skip(1);
            }
        }

        let missing = |name: &str| OmrError::SoundFontParse(format!("missing pdta/{name} chunk"));
        Ok(Self {
            phdr: phdr.ok_or_else(|| missing("phdr"))?,
            pbag: pbag.ok_or_else(|| missing("pbag"))?,
            pgen: pgen.ok_or_else(|| missing("pgen"))?,
            inst: inst.ok_or_else(|| missing("inst"))?,
            ibag: ibag.ok_or_else(|| missing("ibag"))?,
            igen: igen.ok_or_else(|| missing("igen"))?,
            shdr: shdr.ok_or_else(|| missing("shdr"))?,
        })
    }

    /// All `shdr` records except the terminal EOS entry.
    fn sample_headers(&self) -> Vec<SampleHeader> {
        let count = (self.shdr.len() / SHDR_SIZE).saturating_sub(1);
        (0..count)
            .map(|i| {
                let rec = &self.shdr[i * SHDR_SIZE..(i + 1) * SHDR_SIZE];
                SampleHeader {
                    name: fixed_name(&rec[0..20]),
                    start: u32le(rec, 20),
                    end: u32le(rec, 24),
                    start_loop: u32le(rec, 28),
                    end_loop: u32le(rec, 32),
                    sample_rate: u32le(rec, 36),
                    original_pitch: rec[40],
                    pitch_correction: rec[41] as i8,
                    sample_link: u16le(rec, 42),
                    sample_type: u16le(rec, 44),
                }
            })
            .collect()
    }

    /// Flatten every instrument's bags into zones, applying global-zone
    /// defaults and skipping ROM / linked-stereo samples.
    fn build_zones(&self, samples: &[SampleHeader], pool_len: usize) -> Vec<Zone> {
        let inst_count = (self.inst.len() / INST_SIZE).saturating_sub(1);
        let bag_count = self.ibag.len() / BAG_SIZE;
        let gen_count = self.igen.len() / GEN_SIZE;
        let mut zones = Vec::new();

        for inst_idx in 0..inst_count {
            let bag_start = u16le(self.inst, inst_idx * INST_SIZE + 20) as usize;
            let bag_end = u16le(self.inst, (inst_idx + 1) * INST_SIZE + 20) as usize;
            if bag_start > bag_end || bag_end > bag_count {
                continue;
            }

            let mut global: Vec<(u16, u16)> = Vec::new();
            for bag_idx in bag_start..bag_end {
                let gen_start = u16le(self.ibag, bag_idx * BAG_SIZE) as usize;
                let gen_end = if bag_idx + 1 < bag_count {
                    u16le(self.ibag, (bag_idx + 1) * BAG_SIZE) as usize
                } else {
                    gen_count
                };
                if gen_start > gen_end || gen_end > gen_count {
                    continue;
                }

                let gens: Vec<(u16, u16)> = (gen_start..gen_end)
                    .map(|g| (u16le(self.igen, g * GEN_SIZE), u16le(self.igen, g * GEN_SIZE + 2)))
                    .collect();

                let has_sample = gens.iter().any(|&(op, _)| op == GEN_SAMPLE_ID);
                if !has_sample {
                    // First sample-less bag is the instrument's global
                    // zone; its generators are defaults for the rest.
                    if bag_idx == bag_start {
                        global = gens;
                    }
                    continue;
                }

                if let Some(zone) =
                    build_zone(&global, &gens, inst_idx, samples, pool_len)
                {
                    zones.push(zone);
                }
            }
        }
        zones
    }

    /// All presets except the terminal EOP entry, each with its
    /// instrument index set from generator 41.
    fn build_presets(&self) -> Vec<Preset> {
        let count = (self.phdr.len() / PHDR_SIZE).saturating_sub(1);
        let bag_count = self.pbag.len() / BAG_SIZE;
        let gen_count = self.pgen.len() / GEN_SIZE;

        (0..count)
            .map(|i| {
                let rec = &self.phdr[i * PHDR_SIZE..(i + 1) * PHDR_SIZE];
                let bag_start = u16le(rec, 24) as usize;
                let bag_end = u16le(self.phdr, (i + 1) * PHDR_SIZE + 24) as usize;

                let mut instruments = Vec::new();
                for bag_idx in bag_start..bag_end.min(bag_count) {
                    let gen_start = u16le(self.pbag, bag_idx * BAG_SIZE) as usize;
                    let gen_end = if bag_idx + 1 < bag_count {
                        u16le(self.pbag, (bag_idx + 1) * BAG_SIZE) as usize
                    } else {
                        gen_count
                    };
                    for g in gen_start..gen_end.min(gen_count) {
                        let op = u16le(self.pgen, g * GEN_SIZE);
                        if op == GEN_INSTRUMENT {
                            instruments.push(u16le(self.pgen, g * GEN_SIZE + 2) as usize);
                        }
                    }
                }

                Preset {
                    name: fixed_name(&rec[0..20]),
                    preset_num: u16le(rec, 20),
                    bank: u16le(rec, 22),
                    instrument_indices: instruments,
                }
            })
            .collect()
    }
}

/// Merge one bag's generators over the instrument's global zone and
/// resolve against the sample header. Returns `None` for ROM or linked
/// samples and for zones whose bounds fall outside the pool.
fn build_zone(
    global: &[(u16, u16)],
    gens: &[(u16, u16)],
    instrument_index: usize,
    samples: &[SampleHeader],
    pool_len: usize,
) -> Option<Zone> {
    let mut key_lo = 0u8;
    let mut key_hi = 127u8;
    let mut vel_lo = 0u8;
    let mut vel_hi = 127u8;
    let mut sample_index: Option<usize> = None;
    let mut root_override: Option<u8> = None;
    let mut fine_tune = 0i32;
    let mut coarse_tune = 0i32;
    let mut loop_mode = 0u8;
    let mut attack_tc = -12000i32;
    let mut decay_tc = -12000i32;
    let mut sustain_cb = 0i32;
    let mut release_tc = -12000i32;
    let mut start_fine = 0i32;
    let mut end_fine = 0i32;
    let mut start_loop_fine = 0i32;
    let mut end_loop_fine = 0i32;
    let mut start_coarse = 0i32;
    let mut end_coarse = 0i32;
    let mut start_loop_coarse = 0i32;
    let mut end_loop_coarse = 0i32;

    for &(op, raw) in global.iter().chain(gens.iter()) {
        let amount = raw as i16 as i32;
        match op {
            GEN_KEY_RANGE => {
                key_lo = (raw & 0xFF) as u8;
                key_hi = (raw >> 8) as u8;
            }
            GEN_VEL_RANGE => {
                vel_lo = (raw & 0xFF) as u8;
                vel_hi = (raw >> 8) as u8;
            }
            GEN_SAMPLE_ID => sample_index = Some(raw as usize),
            GEN_ROOT_KEY => {
                if amount >= 0 {
                    root_override = Some(amount.min(127) as u8);
                }
            }
            GEN_FINE_TUNE => fine_tune = amount,
            GEN_COARSE_TUNE => coarse_tune = amount,
            GEN_SAMPLE_MODES => loop_mode = (raw & 0x3) as u8,
            GEN_ATTACK => attack_tc = amount,
            GEN_DECAY => decay_tc = amount,
            GEN_SUSTAIN => sustain_cb = amount,
            GEN_RELEASE => release_tc = amount,
            GEN_START_OFFSET => start_fine = amount,
            GEN_END_OFFSET => end_fine = amount,
            GEN_START_LOOP_OFFSET => start_loop_fine = amount,
            GEN_END_LOOP_OFFSET => end_loop_fine = amount,
            GEN_START_COARSE => start_coarse = amount,
            GEN_END_COARSE => end_coarse = amount,
            GEN_START_LOOP_COARSE => start_loop_coarse = amount,
            GEN_END_LOOP_COARSE => end_loop_coarse = amount,
            _ => {}
        }
    }

    let sample = samples.get(sample_index?)?;
    // ROM samples and the far half of a stereo link are not rendered.
    if sample.sample_type > 1 {
        return None;
    }

    let offset = |base: u32, fine: i32, coarse: i32| -> i64 {
        base as i64 + fine as i64 + coarse as i64 * 32768
    };
    let start_offset = offset(sample.start, start_fine, start_coarse);
    let end_offset = offset(sample.end, end_fine, end_coarse);
    let start_loop = offset(sample.start_loop, start_loop_fine, start_loop_coarse);
    let end_loop = offset(sample.end_loop, end_loop_fine, end_loop_coarse);

    if start_offset < 0 || end_offset <= start_offset || end_offset as usize > pool_len {
        return None;
    }

    Some(Zone {
        key_lo,
        key_hi,
        vel_lo,
        vel_hi,
        sample_index: sample_index?,
        instrument_index,
        root_key: root_override.unwrap_or(sample.original_pitch),
        tuning_cents: coarse_tune * 100 + fine_tune + sample.pitch_correction as i32,
        start_offset: start_offset as usize,
        end_offset: end_offset as usize,
        start_loop: start_loop.max(0) as usize,
        end_loop: end_loop.max(0) as usize,
        sample_rate: sample.sample_rate.max(1),
        loop_mode,
        attack_s: timecents_to_seconds(attack_tc),
        decay_s: timecents_to_seconds(decay_tc),
        sustain_level: sustain_centibels_to_level(sustain_cb),
        release_s: timecents_to_seconds(release_tc),
    })
}

/// 2^(tc / 1200) seconds.
pub(crate) fn timecents_to_seconds(tc: i32) -> f32 {
    (2.0f32).powf(tc as f32 / 1200.0)
}

/// Centibels of attenuation → linear level, floored at silence.
pub(crate) fn sustain_centibels_to_level(cb: i32) -> f32 {
    (1.0 - cb as f32 / 1000.0).max(0.0)
}

/// Copy the 16-bit PCM pool out of the `smpl` sub-chunk.
fn read_sample_pool(sdta: &[u8]) -> Result<Vec<i16>, OmrError> {
    let mut r = Reader::new(sdta);
    while r.pos + 8 <= sdta.len() {
        let tag = r.tag()?;
        let len = r.u32()? as usize;
        let body = r.slice(len)?;
        if &tag == b"smpl" {
            let mut pool = Vec::with_capacity(len / 2);
            for pair in body.chunks_exact(2) {
                pool.push(i16::from_le_bytes([pair[0], pair[1]]));
            }
            return Ok(pool);
        }
        if len % 2 == 1 {
            let _ = r.skip(1);
        }
    }
    Err(OmrError::SoundFontParse("sdta list has no smpl chunk".into()))
}

// ── Byte-cursor primitives ──────────────────────────────────────────

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, pos: 0 }
    }

    fn tag(&mut self) -> Result<[u8; 4], OmrError> {
        let s = self.slice(4)?;
        Ok([s[0], s[1], s[2], s[3]])
    }

    fn u32(&mut self) -> Result<u32, OmrError> {
        let s = self.slice(4)?;
        Ok(u32::from_le_bytes([s[0], s[1], s[2], s[3]]))
    }

    fn slice(&mut self, len: usize) -> Result<&'a [u8], OmrError> {
        if self.pos + len > self.bytes.len() {
            return Err(OmrError::SoundFontParse("truncated chunk".into()));
        }
        let s = &self.bytes[self.pos..self.pos + len];
        self.pos += len;
        Ok(s)
    }

    fn skip(&mut self, len: usize) -> Result<(), OmrError> {
        self.slice(len).map(|_| ())
    }
}

fn u16le(bytes: &[u8], off: usize) -> u16 {
    u16::from_le_bytes([bytes[off], bytes[off + 1]])
}

fn u32le(bytes: &[u8], off: usize) -> u32 {
    u32::from_le_bytes([bytes[off], bytes[off + 1], bytes[off + 2], bytes[off + 3]])
}

/// Fixed 20-byte ASCII name field, NUL-truncated.
fn fixed_name(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).trim().to_string()
}
