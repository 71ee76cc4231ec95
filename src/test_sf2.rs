//! In-memory SF2 builder for tests: one preset → one instrument → one
//! zone → one mono sample, with the envelope and sample fields
//! configurable per test.

pub(crate) struct TestSoundFontBuilder {
    sample_count: u32,
    sample_rate: u32,
    original_pitch: u8,
    sample_type: u16,
    loop_start: u32,
    loop_end: u32,
    loop_mode: u16,
    attack_tc: i16,
    decay_tc: i16,
    sustain_cb: i16,
    release_tc: i16,
}

impl TestSoundFontBuilder {
    pub fn new() -> Self {
        Self {
            sample_count: 8000,
            sample_rate: 44100,
            original_pitch: 60,
            sample_type: 1,
            loop_start: 100,
            loop_end: 7900,
            loop_mode: 1,
            attack_tc: -12000,
            decay_tc: -12000,
            sustain_cb: 0,
            release_tc: -12000,
        }
    }

    pub fn attack_timecents(mut self, tc: i16) -> Self {
        self.attack_tc = tc;
        self
    }

    pub fn sustain_centibels(mut self, cb: i16) -> Self {
        self.sustain_cb = cb;
        self
    }

    pub fn sample_type(mut self, t: u16) -> Self {
        self.sample_type = t;
        self
    }

    pub fn loop_mode(mut self, mode: u16) -> Self {
        self.loop_mode = mode;
        self
    }

    pub fn loop_points(mut self, start: u32, end: u32) -> Self {
        self.loop_start = start;
        self.loop_end = end;
        self
    }

    pub fn build(&self) -> Vec<u8> {
        // smpl: a quiet 220 Hz sine
        let mut smpl = Vec::with_capacity(self.sample_count as usize * 2);
        for i in 0..self.sample_count {
            let t = i as f32 / self.sample_rate as f32;
            let v = ((t * 220.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
            smpl.extend_from_slice(&v.to_le_bytes());
        }

        let sdta = list_chunk(b"sdta", &chunk(b"smpl", &smpl));

        // phdr: TestPreset + EOP
        let mut phdr = Vec::new();
        phdr.extend_from_slice(&phdr_record("TestPreset", 0, 0, 0));
        phdr.extend_from_slice(&phdr_record("EOP", 0, 0, 1));

        // pbag: one bag + terminal
        let mut pbag = Vec::new();
        pbag.extend_from_slice(&bag_record(0, 0));
        pbag.extend_from_slice(&bag_record(1, 0));

        // pgen: instrument 0 + terminal
        let mut pgen = Vec::new();
        pgen.extend_from_slice(&gen_record(41, 0));
        pgen.extend_from_slice(&gen_record(0, 0));

        // inst: TestInst + EOI
        let mut inst = Vec::new();
        inst.extend_from_slice(&inst_record("TestInst", 0));
        inst.extend_from_slice(&inst_record("EOI", 1));

        // igen: the zone's generators, sampleID last, then terminal
        let zone_gens: Vec<[u8; 4]> = vec![
            gen_record(43, 0x7F00),                 // keyRange 0..127
            gen_record(44, 0x7F00),                 // velRange 0..127
            gen_record(54, self.loop_mode),         // sampleModes
            gen_record(34, self.attack_tc as u16),  // attack
            gen_record(36, self.decay_tc as u16),   // decay
            gen_record(37, self.sustain_cb as u16), // sustain
            gen_record(38, self.release_tc as u16), // release
            gen_record(53, 0),                      // sampleID
        ];
        let mut igen = Vec::new();
        for g in &zone_gens {
            igen.extend_from_slice(g);
        }
        igen.extend_from_slice(&gen_record(0, 0)); // terminal

        // ibag: one bag + terminal pointing past the zone gens
        let mut ibag = Vec::new();
        ibag.extend_from_slice(&bag_record(0, 0));
        ibag.extend_from_slice(&bag_record(zone_gens.len() as u16, 0));

        // shdr: TestSample + EOS
        let mut shdr = Vec::new();
        shdr.extend_from_slice(&self.shdr_record());
        shdr.extend_from_slice(&[0u8; 46]); // EOS

        let mut pdta_body = Vec::new();
        pdta_body.extend_from_slice(&chunk(b"phdr", &phdr));
        pdta_body.extend_from_slice(&chunk(b"pbag", &pbag));
        pdta_body.extend_from_slice(&chunk(b"pgen", &pgen));
        pdta_body.extend_from_slice(&chunk(b"inst", &inst));
        pdta_body.extend_from_slice(&chunk(b"ibag", &ibag));
        pdta_body.extend_from_slice(&chunk(b"igen", &igen));
        pdta_body.extend_from_slice(&chunk(b"shdr", &shdr));
        let pdta = list_chunk_raw(b"pdta", &pdta_body);

        let mut form = Vec::new();
        form.extend_from_slice(b"sfbk");
        form.extend_from_slice(&sdta);
        form.extend_from_slice(&pdta);

        let mut out = Vec::new();
        out.extend_from_slice(b"RIFF");
        out.extend_from_slice(&(form.len() as u32).to_le_bytes());
        out.extend_from_slice(&form);
        out
    }

    fn shdr_record(&self) -> [u8; 46] {
        let mut rec = [0u8; 46];
        rec[..10].copy_from_slice(b"TestSample");
        rec[20..24].copy_from_slice(&0u32.to_le_bytes());
        rec[24..28].copy_from_slice(&self.sample_count.to_le_bytes());
        rec[28..32].copy_from_slice(&self.loop_start.to_le_bytes());
        rec[32..36].copy_from_slice(&self.loop_end.to_le_bytes());
        rec[36..40].copy_from_slice(&self.sample_rate.to_le_bytes());
        rec[40] = self.original_pitch;
        rec[41] = 0; // pitch correction
        rec[42..44].copy_from_slice(&0u16.to_le_bytes());
        rec[44..46].copy_from_slice(&self.sample_type.to_le_bytes());
        rec
    }
}

fn chunk(tag: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(8 + body.len() + 1);
    out.extend_from_slice(tag);
    out.extend_from_slice(&(body.len() as u32).to_le_bytes());
    out.extend_from_slice(body);
    if body.len() % 2 == 1 {
        out.push(0);
    }
    out
}

fn list_chunk(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    let mut inner = Vec::with_capacity(4 + body.len());
    inner.extend_from_slice(kind);
    inner.extend_from_slice(body);
    chunk(b"LIST", &inner)
}

fn list_chunk_raw(kind: &[u8; 4], body: &[u8]) -> Vec<u8> {
    list_chunk(kind, body)
}

fn phdr_record(name: &str, preset: u16, bank: u16, bag: u16) -> [u8; 38] {
    let mut rec = [0u8; 38];
    let n = name.as_bytes();
    rec[..n.len().min(20)].copy_from_slice(&n[..n.len().min(20)]);
    rec[20..22].copy_from_slice(&preset.to_le_bytes());
    rec[22..24].copy_from_slice(&bank.to_le_bytes());
    rec[24..26].copy_from_slice(&bag.to_le_bytes());
    rec
}

fn inst_record(name: &str, bag: u16) -> [u8; 22] {
    let mut rec = [0u8; 22];
    let n = name.as_bytes();
    rec[..n.len().min(20)].copy_from_slice(&n[..n.len().min(20)]);
    rec[20..22].copy_from_slice(&bag.to_le_bytes());
    rec
}

fn bag_record(gen: u16, modulator: u16) -> [u8; 4] {
    let mut rec = [0u8; 4];
    rec[..2].copy_from_slice(&gen.to_le_bytes());
    rec[2..4].copy_from_slice(&modulator.to_le_bytes());
    rec
}

fn gen_record(op: u16, amount: u16) -> [u8; 4] {
    let mut rec = [0u8; 4];
    rec[..2].copy_from_slice(&op.to_le_bytes());
    rec[2..4].copy_from_slice(&amount.to_le_bytes());
    rec
}
