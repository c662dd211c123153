//! Font metrics for the standard Type1 fonts used to fill values
//!
//! Widths are AFM advance widths in 1/1000 em. Only the glyphs reachable
//! through WinAnsiEncoding are ever drawn, so anything outside printable
//! ASCII is measured with the font's fallback width.

/// Width of a string at a given font size, in PDF points
pub trait TextMetrics {
    fn text_width(&self, text: &str, font_size: f64) -> f64;
}

/// Helvetica advance widths for 0x20..=0x7E
const HELVETICA_WIDTHS: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // ' '..'/'
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, // '0'..'9'
    278, 278, 584, 584, 584, 556, 1015, // ':'..'@'
    667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, // 'A'..'M'
    722, 778, 667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, // 'N'..'Z'
    278, 278, 278, 469, 556, 333, // '['..'`'
    556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, // 'a'..'m'
    556, 556, 556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, // 'n'..'z'
    334, 260, 334, 584, // '{'..'~'
];

const HELVETICA_FALLBACK: u16 = 556;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StandardFont {
    #[default]
    Helvetica,
}

impl StandardFont {
    /// PostScript name as written into the font dictionary
    pub fn base_font(&self) -> &'static str {
        match self {
            StandardFont::Helvetica => "Helvetica",
        }
    }

    pub fn glyph_width(&self, c: char) -> u16 {
        match self {
            StandardFont::Helvetica => match c {
                ' '..='~' => HELVETICA_WIDTHS[c as usize - 0x20],
                _ => HELVETICA_FALLBACK,
            },
        }
    }
}

impl TextMetrics for StandardFont {
    fn text_width(&self, text: &str, font_size: f64) -> f64 {
        let units: u32 = text.chars().map(|c| u32::from(self.glyph_width(c))).sum();
        f64::from(units) * font_size / 1000.0
    }
}

/// Encode text for a simple font using WinAnsiEncoding.
///
/// Latin-1 code points map to their own byte, which matches WinAnsi for
/// everything except 0x80..=0x9F; those and anything wider become `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|c| match u32::from(c) {
            0x20..=0x7E | 0xA0..=0xFF => c as u8,
            _ => b'?',
        })
        .collect()
}
