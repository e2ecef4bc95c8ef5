//! CDU font packaging
//!
//! The device accepts bitmap fonts as a literal packet sequence. A
//! [`FontTemplate`] holds that sequence for one glyph geometry together
//! with the byte offsets of every placeholder: per-glyph bitmap bytes,
//! the global X/Y pixel offset, and the width/height values. Uploading
//! a font means copying the template, overwriting the placeholders and
//! emitting the filled buffer verbatim.
//!
//! A glyph missing from the uploaded font keeps whatever the template
//! already encodes (usually blank); glyphs beyond the template's mapped
//! set are ignored.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::error::FontError;

use super::reports::REPORT_LEN;

/// Leading tag byte of a font-upload report
pub const FONT_REPORT_ID: u8 = 0xF0;

/// Which glyph bank a glyph belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FontBank {
    Large,
    Small,
}

impl FontBank {
    fn code(&self) -> u8 {
        match self {
            FontBank::Large => 0x01,
            FontBank::Small => 0x02,
        }
    }
}

/// One glyph: a row-major 1-bit-per-pixel bitmap
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Glyph {
    /// Pixel width
    pub width: u8,
    /// Pixel height
    pub height: u8,
    /// `height * byte_width` bitmap bytes, row-major
    pub rows: Vec<u8>,
}

/// A bitmap font: two independent glyph sets keyed by character, plus a
/// global pixel offset applied by the device. Loadable from JSON.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CduFont {
    pub large: HashMap<char, Glyph>,
    pub small: HashMap<char, Glyph>,
    pub x_offset: i8,
    pub y_offset: i8,
}

impl CduFont {
    fn bank(&self, bank: FontBank) -> &HashMap<char, Glyph> {
        match bank {
            FontBank::Large => &self.large,
            FontBank::Small => &self.small,
        }
    }

    /// Nominal glyph width: the width of any glyph in the font
    fn glyph_width(&self) -> Option<u8> {
        self.large
            .values()
            .chain(self.small.values())
            .next()
            .map(|g| g.width)
    }
}

/// The character repertoire the built-in template maps, per bank:
/// printable ASCII plus the CDU specials.
fn template_charset() -> Vec<char> {
    let mut set: Vec<char> = (0x20u8..=0x7E).map(char::from).collect();
    set.extend(['←', '→', '↑', '↓', '☐', '°', 'Δ']);
    set
}

// Preamble of the font packet sequence. The four trailing bytes are the
// width / height / X offset / Y offset placeholders.
const PREAMBLE: &[u8] = &[
    0xF0, 0x00, 0x01, 0x57, 0x57, 0x46, 0x42, 0x00, 0x06, 0x09, 0x00, 0x00,
];
const WIDTH_POS: usize = 8;
const HEIGHT_POS: usize = 9;
const X_OFFSET_POS: usize = 10;
const Y_OFFSET_POS: usize = 11;

// Per-glyph record header: tag, bank code, character code (LE u16)
const RECORD_TAG: u8 = 0xAD;
const RECORD_HEADER_LEN: usize = 4;

/// A template-driven font packet sequence for one glyph geometry
#[derive(Debug, Clone)]
pub struct FontTemplate {
    glyph_height: u8,
    byte_width: u8,
    /// The literal template bytes, flattened across packets
    buffer: Vec<u8>,
    /// Placeholder offset of each mapped glyph's bitmap bytes
    glyph_offsets: HashMap<(FontBank, char), usize>,
}

impl FontTemplate {
    /// The built-in template: 9-pixel glyphs, one byte per row,
    /// printable ASCII and the CDU specials in both banks.
    pub fn airbus_9px() -> Self {
        Self::with_geometry(9, 1)
    }

    fn with_geometry(glyph_height: u8, byte_width: u8) -> Self {
        let bytes_per_glyph = usize::from(glyph_height) * usize::from(byte_width);
        let charset = template_charset();

        let mut buffer = PREAMBLE.to_vec();
        buffer[HEIGHT_POS] = glyph_height;
        let mut glyph_offsets = HashMap::new();

        for bank in [FontBank::Large, FontBank::Small] {
            for &ch in &charset {
                let code = ch as u32 as u16;
                buffer.push(RECORD_TAG);
                buffer.push(bank.code());
                buffer.extend_from_slice(&code.to_le_bytes());
                glyph_offsets.insert((bank, ch), buffer.len());
                buffer.extend(std::iter::repeat(0u8).take(bytes_per_glyph));
            }
        }

        debug_assert_eq!(
            buffer.len(),
            PREAMBLE.len() + 2 * charset.len() * (RECORD_HEADER_LEN + bytes_per_glyph)
        );

        Self {
            glyph_height,
            byte_width,
            buffer,
            glyph_offsets,
        }
    }

    /// Expected glyph pixel height
    pub fn glyph_height(&self) -> u8 {
        self.glyph_height
    }

    /// Bitmap bytes per glyph
    pub fn bytes_per_glyph(&self) -> usize {
        usize::from(self.glyph_height) * usize::from(self.byte_width)
    }

    /// Fill the template with a font's glyphs and return the packet
    /// sequence to send. Geometry mismatches are data errors and fail
    /// fast; nothing is emitted.
    pub fn fill(&self, font: &CduFont) -> Result<Vec<[u8; REPORT_LEN]>, FontError> {
        let bytes_per_glyph = self.bytes_per_glyph();

        // Validate every mapped glyph before touching the scratch buffer
        for (&(bank, ch), _) in &self.glyph_offsets {
            if let Some(glyph) = font.bank(bank).get(&ch) {
                if glyph.height != self.glyph_height {
                    return Err(FontError::HeightMismatch {
                        expected: self.glyph_height,
                        got: glyph.height,
                    });
                }
                if glyph.rows.len() != bytes_per_glyph {
                    return Err(FontError::SizeMismatch {
                        ch,
                        expected: bytes_per_glyph,
                        got: glyph.rows.len(),
                    });
                }
            }
        }

        let mut scratch = self.buffer.clone();
        if let Some(width) = font.glyph_width() {
            scratch[WIDTH_POS] = width;
        }
        scratch[X_OFFSET_POS] = font.x_offset as u8;
        scratch[Y_OFFSET_POS] = font.y_offset as u8;

        for (&(bank, ch), &offset) in &self.glyph_offsets {
            if let Some(glyph) = font.bank(bank).get(&ch) {
                scratch[offset..offset + bytes_per_glyph].copy_from_slice(&glyph.rows);
            }
        }

        Ok(Self::packetize(&scratch))
    }

    /// Extract a glyph's bitmap bytes back out of a filled packet
    /// sequence. Used to verify uploads; the inverse of [`fill`].
    pub fn glyph_bytes(
        &self,
        packets: &[[u8; REPORT_LEN]],
        bank: FontBank,
        ch: char,
    ) -> Option<Vec<u8>> {
        let offset = *self.glyph_offsets.get(&(bank, ch))?;
        let flat: Vec<u8> = packets
            .iter()
            .flat_map(|p| p[1..].iter().copied())
            .collect();
        flat.get(offset..offset + self.bytes_per_glyph())
            .map(|b| b.to_vec())
    }

    fn packetize(flat: &[u8]) -> Vec<[u8; REPORT_LEN]> {
        flat.chunks(REPORT_LEN - 1)
            .map(|chunk| {
                let mut report = [0u8; REPORT_LEN];
                report[0] = FONT_REPORT_ID;
                report[1..1 + chunk.len()].copy_from_slice(chunk);
                report
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn glyph(rows: [u8; 9]) -> Glyph {
        Glyph {
            width: 6,
            height: 9,
            rows: rows.to_vec(),
        }
    }

    #[test]
    fn test_fill_round_trips_glyph_bytes() {
        let template = FontTemplate::airbus_9px();
        let mut font = CduFont::default();
        let rows = [0x1E, 0x21, 0x21, 0x3F, 0x21, 0x21, 0x21, 0x00, 0x00];
        font.large.insert('A', glyph(rows));

        let packets = template.fill(&font).unwrap();
        let extracted = template
            .glyph_bytes(&packets, FontBank::Large, 'A')
            .unwrap();
        assert_eq!(extracted, rows.to_vec());
    }

    #[test]
    fn test_missing_glyph_keeps_template_bytes() {
        let template = FontTemplate::airbus_9px();
        let packets = template.fill(&CduFont::default()).unwrap();
        let extracted = template
            .glyph_bytes(&packets, FontBank::Small, 'Z')
            .unwrap();
        assert_eq!(extracted, vec![0u8; 9]);
    }

    #[test]
    fn test_extra_glyphs_ignored() {
        let template = FontTemplate::airbus_9px();
        let mut font = CduFont::default();
        // Not part of the template's mapped set
        font.large.insert('€', glyph([0xFF; 9]));
        assert!(template.fill(&font).is_ok());
    }

    #[test]
    fn test_height_mismatch_fails_fast() {
        let template = FontTemplate::airbus_9px();
        let mut font = CduFont::default();
        font.large.insert(
            'A',
            Glyph {
                width: 6,
                height: 7,
                rows: vec![0; 7],
            },
        );
        assert!(matches!(
            template.fill(&font),
            Err(FontError::HeightMismatch {
                expected: 9,
                got: 7
            })
        ));
    }

    #[test]
    fn test_byte_width_mismatch_fails_fast() {
        let template = FontTemplate::airbus_9px();
        let mut font = CduFont::default();
        font.small.insert(
            'B',
            Glyph {
                width: 6,
                height: 9,
                rows: vec![0; 18], // two bytes per row, template expects one
            },
        );
        assert!(matches!(
            template.fill(&font),
            Err(FontError::SizeMismatch { ch: 'B', .. })
        ));
    }

    #[test]
    fn test_geometry_patched_into_preamble() {
        let template = FontTemplate::airbus_9px();
        let mut font = CduFont::default();
        font.x_offset = 2;
        font.y_offset = -1;
        font.large.insert('A', glyph([0; 9]));

        let packets = template.fill(&font).unwrap();
        // The preamble sits at the start of the first packet's payload
        assert_eq!(packets[0][1 + WIDTH_POS], 6);
        assert_eq!(packets[0][1 + HEIGHT_POS], 9);
        assert_eq!(packets[0][1 + X_OFFSET_POS], 2);
        assert_eq!(packets[0][1 + Y_OFFSET_POS], 0xFF); // -1 as u8
    }
}
