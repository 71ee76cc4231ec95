//! Shared helpers for the integration suites: a synthetic sheet-music
//! page drawn onto a gray image and encoded as PNG, plus an in-memory
//! SF2 builder.
//!
//! The page geometry uses a 16-px staff line spacing (about what a
//! 1400-px-wide photo of letter-format music yields) with 2-px lines,
//! so detected line centers sit one row below the drawn top edge.

#![allow(dead_code)]

use image::{GrayImage, Luma};

pub const SPACING: u32 = 16;
pub const LINE_THICKNESS: u32 = 2;

pub struct SheetPage {
    img: GrayImage,
    staff_tops: Vec<u32>,
}

impl SheetPage {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            img: GrayImage::from_pixel(width, height, Luma([255u8])),
            staff_tops: Vec::new(),
        }
    }

    /// Draw a 5-line staff whose drawn top edge is at `top`. Lines span
    /// 4 %..96 % of the page width.
    pub fn add_staff(&mut self, top: u32) -> usize {
        let w = self.img.width();
        for line in 0..5 {
            let y = top + line * SPACING;
            for yy in y..y + LINE_THICKNESS {
                for x in w / 25..w - w / 25 {
                    self.img.put_pixel(x, yy, Luma([0u8]));
                }
            }
        }
        self.staff_tops.push(top);
        self.staff_tops.len() - 1
    }

    /// Detected center row of staff line `line` (0 = top).
    pub fn line_y(&self, staff: usize, line: u32) -> i32 {
        (self.staff_tops[staff] + line * SPACING) as i32 + 1
    }

    /// Detected y of a staff position (0 = bottom line, +1 one
    /// half-space up).
    pub fn pos_y(&self, staff: usize, position: i32) -> i32 {
        self.line_y(staff, 4) - position * (SPACING as i32 / 2)
    }

    /// Filled notehead at a staff position.
    pub fn filled_head(&mut self, staff: usize, x: i32, position: i32) {
        let cy = self.pos_y(staff, position);
        self.disk(x, cy, 7);
    }

    /// Hollow (half/whole) notehead: a thick ring.
    pub fn hollow_head(&mut self, staff: usize, x: i32, position: i32) {
        let cy = self.pos_y(staff, position);
        for dy in -8i32..=8 {
            for dx in -8i32..=8 {
                let d2 = dx * dx + dy * dy;
                if (21..=72).contains(&d2) {
                    self.put(x + dx, cy + dy);
                }
            }
        }
    }

    /// Up-stem on the right edge of a head.
    pub fn stem_up(&mut self, staff: usize, x: i32, position: i32) {
        let y = self.pos_y(staff, position);
        for yy in (y - 44)..=y {
            self.put(x + 7, yy);
            self.put(x + 8, yy);
        }
    }

    /// Down-stem on the left edge of a head.
    pub fn stem_down(&mut self, staff: usize, x: i32, position: i32) {
        let y = self.pos_y(staff, position);
        for yy in y..=(y + 44) {
            self.put(x - 8, yy);
            self.put(x - 7, yy);
        }
    }

    /// Ledger line through a (whole-spacing) position outside the staff.
    pub fn ledger(&mut self, staff: usize, x: i32, position: i32) {
        let y = self.pos_y(staff, position);
        for dx in -11i32..=11 {
            self.put(x + dx, y);
        }
    }

    /// Bar line across one staff.
    pub fn barline(&mut self, staff: usize, x: i32) {
        let y0 = self.line_y(staff, 0) - 1;
        let y1 = self.line_y(staff, 4) + 1;
        for y in y0..=y1 {
            self.put(x, y);
            self.put(x + 1, y);
        }
    }

    /// Repeat dots in the two spaces flanking the middle line.
    /// `right_of` draws them right of the bar line at `x` (an opening
    /// repeat); otherwise to its left.
    pub fn repeat_dots(&mut self, staff: usize, x: i32, right_of: bool) {
        let upper = (self.line_y(staff, 1) + self.line_y(staff, 2)) / 2;
        let lower = (self.line_y(staff, 2) + self.line_y(staff, 3)) / 2;
        let cx = if right_of { x + 9 } else { x - 7 };
        for &cy in &[upper, lower] {
            for dy in -2i32..=2 {
                for dx in -2i32..=2 {
                    self.put(cx + dx, cy + dy);
                }
            }
        }
    }

    /// Augmentation dot right of a head, on the dot's space row.
    pub fn aug_dot(&mut self, staff: usize, head_x: i32, position: i32) {
        let y = if position % 2 == 0 {
            self.pos_y(staff, position) - SPACING as i32 / 2
        } else {
            self.pos_y(staff, position)
        };
        for dy in -3i32..=3 {
            for dx in -3i32..=3 {
                self.put(head_x + 14 + dx, y + dy);
            }
        }
    }

    /// Thin tie arc between two head x positions.
    pub fn tie_arc(&mut self, staff: usize, x0: i32, x1: i32, position: i32) {
        let y = self.pos_y(staff, position) - 13;
        for x in x0..=x1 {
            self.put(x, y);
        }
    }

    /// Natural glyph left of a head: two tall verticals with two short
    /// crossbars (narrower than a sharp's, which overhang the strokes).
    pub fn natural(&mut self, staff: usize, head_x: i32, position: i32) {
        let cx = head_x - 20;
        let cy = self.pos_y(staff, position);
        for yy in (cy - 11)..=(cy + 11) {
            self.put(cx - 3, yy);
            self.put(cx + 3, yy);
        }
        for &row in &[cy - 4, cy - 3, cy + 3, cy + 4] {
            for dx in -3i32..=2 {
                self.put(cx + dx, row);
            }
        }
    }

    fn disk(&mut self, cx: i32, cy: i32, r: i32) {
        for dy in -r..=r {
            for dx in -r..=r {
                if dx * dx + dy * dy <= r * r {
                    self.put(cx + dx, cy + dy);
                }
            }
        }
    }

    fn put(&mut self, x: i32, y: i32) {
        if x >= 0 && y >= 0 && (x as u32) < self.img.width() && (y as u32) < self.img.height() {
            self.img.put_pixel(x as u32, y as u32, Luma([0u8]));
        }
    }

    /// Encode as PNG bytes for `process_sheet`.
    pub fn png(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        image::DynamicImage::ImageLuma8(self.img.clone())
            .write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .expect("PNG encode");
        bytes
    }
}

// ═══════════════════════════════════════════════════════════════════════
// Minimal SF2 builder (one preset → one instrument → one looped sample)
// ═══════════════════════════════════════════════════════════════════════

pub fn minimal_sf2() -> Vec<u8> {
    let sample_count: u32 = 8000;
    let mut smpl = Vec::with_capacity(sample_count as usize * 2);
    for i in 0..sample_count {
        let t = i as f32 / 44100.0;
        let v = ((t * 220.0 * std::f32::consts::TAU).sin() * 8000.0) as i16;
        smpl.extend_from_slice(&v.to_le_bytes());
    }

    let mut phdr = Vec::new();
    phdr.extend_from_slice(&phdr_record("TestPreset", 0));
    phdr.extend_from_slice(&phdr_record("EOP", 1));

    let mut pbag = Vec::new();
    pbag.extend_from_slice(&four(0, 0));
    pbag.extend_from_slice(&four(1, 0));

    let mut pgen = Vec::new();
    pgen.extend_from_slice(&four(41, 0)); // instrument 0
    pgen.extend_from_slice(&four(0, 0));

    let mut inst = Vec::new();
    inst.extend_from_slice(&inst_record("TestInst", 0));
    inst.extend_from_slice(&inst_record("EOI", 1));

    let zone_gens: Vec<[u8; 4]> = vec![
        four(43, 0x7F00), // keyRange 0..127
        four(44, 0x7F00), // velRange 0..127
        four(54, 1),      // continuous loop
        four(53, 0),      // sampleID
    ];
    let mut igen = Vec::new();
    for g in &zone_gens {
        igen.extend_from_slice(g);
    }
    igen.extend_from_slice(&four(0, 0));

    let mut ibag = Vec::new();
    ibag.extend_from_slice(&four(0, 0));
    ibag.extend_from_slice(&four(zone_gens.len() as u16, 0));

    let mut shdr = Vec::new();
    shdr.extend_from_slice(&shdr_record(sample_count));
    shdr.extend_from_slice(&[0u8; 46]);

    let mut pdta_body = Vec::new();
    for (tag, body) in [
        (b"phdr", &phdr),
        (b"pbag", &pbag),
        (b"pgen", &pgen),
        (b"inst", &inst),
        (b"ibag", &ibag),
        (b"igen", &igen),
        (b"shdr", &shdr),
    ] {
        pdta_body.extend_from_slice(&chunk(tag, body));
    }

    let mut form = Vec::new();
    form.extend_from_slice(b"sfbk");
    form.extend_from_slice(&list_chunk(b"sdta", &chunk(b"smpl", &smpl)));
    form.extend_from_slice(&list_chunk(b"pdta", &pdta_body));

    let mut out = Vec::new();
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(form.len() as u32).to_le_bytes());
    out.extend_from_slice(&form);
    out
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

fn phdr_record(name: &str, bag: u16) -> [u8; 38] {
    let mut rec = [0u8; 38];
    let n = name.as_bytes();
    rec[..n.len().min(20)].copy_from_slice(&n[..n.len().min(20)]);
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

fn four(a: u16, b: u16) -> [u8; 4] {
    let mut rec = [0u8; 4];
    rec[..2].copy_from_slice(&a.to_le_bytes());
    rec[2..4].copy_from_slice(&b.to_le_bytes());
    rec
}

fn shdr_record(sample_count: u32) -> [u8; 46] {
    let mut rec = [0u8; 46];
    rec[..10].copy_from_slice(b"TestSample");
    rec[24..28].copy_from_slice(&sample_count.to_le_bytes());
    rec[28..32].copy_from_slice(&100u32.to_le_bytes());
    rec[32..36].copy_from_slice(&7900u32.to_le_bytes());
    rec[36..40].copy_from_slice(&44100u32.to_le_bytes());
    rec[40] = 60;
    rec[44..46].copy_from_slice(&1u16.to_le_bytes());
    rec
}
