use crate::types::Pt;

/// The two standard PDF fonts the book uses. Neither is embedded; widths come
/// from the Adobe core font metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BuiltinFont {
    Helvetica,
    HelveticaBold,
}

// Advance widths for 0x20..=0x7E in 1/1000 em.
const HELVETICA_ASCII: [u16; 95] = [
    278, 278, 355, 556, 556, 889, 667, 191, 333, 333, 389, 584, 278, 333, 278, 278, // 0x20
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 278, 278, 584, 584, 584, 556, // 0x30
    1015, 667, 667, 722, 722, 667, 611, 778, 722, 278, 500, 667, 556, 833, 722, 778, // 0x40
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 278, 278, 278, 469, 556, // 0x50
    333, 556, 556, 500, 556, 556, 278, 556, 556, 222, 222, 500, 222, 833, 556, 556, // 0x60
    556, 556, 333, 500, 278, 556, 500, 722, 500, 500, 500, 334, 260, 334, 584, // 0x70
];

const HELVETICA_BOLD_ASCII: [u16; 95] = [
    278, 333, 474, 556, 556, 889, 722, 238, 333, 333, 389, 584, 278, 333, 278, 278, // 0x20
    556, 556, 556, 556, 556, 556, 556, 556, 556, 556, 333, 333, 584, 584, 584, 611, // 0x30
    975, 722, 722, 722, 722, 667, 611, 778, 722, 278, 556, 722, 611, 833, 722, 778, // 0x40
    667, 778, 722, 667, 611, 722, 667, 944, 667, 667, 611, 333, 278, 333, 584, 556, // 0x50
    333, 556, 611, 556, 611, 556, 333, 611, 611, 278, 278, 556, 278, 889, 611, 611, // 0x60
    611, 611, 389, 556, 333, 611, 556, 778, 556, 556, 500, 389, 280, 389, 584, // 0x70
];

// Advance widths for WinAnsi codes 0x80..=0xFF; 0 marks an unassigned code.
const HELVETICA_HIGH: [u16; 128] = [
    556, 0, 222, 556, 333, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0, // 0x80
    0, 222, 222, 333, 333, 350, 556, 1000, 333, 1000, 500, 333, 944, 0, 500, 667, // 0x90
    278, 333, 556, 556, 556, 556, 260, 556, 333, 737, 370, 556, 584, 333, 737, 333, // 0xA0
    400, 584, 333, 333, 333, 556, 537, 278, 333, 333, 365, 556, 834, 834, 834, 611, // 0xB0
    667, 667, 667, 667, 667, 667, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278, // 0xC0
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611, // 0xD0
    556, 556, 556, 556, 556, 556, 889, 500, 556, 556, 556, 556, 278, 278, 278, 278, // 0xE0
    556, 556, 556, 556, 556, 556, 556, 584, 611, 556, 556, 556, 556, 500, 556, 500, // 0xF0
];

const HELVETICA_BOLD_HIGH: [u16; 128] = [
    556, 0, 278, 556, 500, 1000, 556, 556, 333, 1000, 667, 333, 1000, 0, 611, 0, // 0x80
    0, 278, 278, 500, 500, 350, 556, 1000, 333, 1000, 556, 333, 944, 0, 500, 667, // 0x90
    278, 333, 556, 556, 556, 556, 280, 556, 333, 737, 370, 556, 584, 333, 737, 333, // 0xA0
    400, 584, 333, 333, 333, 611, 556, 278, 333, 333, 365, 556, 834, 834, 834, 611, // 0xB0
    722, 722, 722, 722, 722, 722, 1000, 722, 667, 667, 667, 667, 278, 278, 278, 278, // 0xC0
    722, 722, 778, 778, 778, 778, 778, 584, 778, 722, 722, 722, 722, 667, 667, 611, // 0xD0
    556, 556, 556, 556, 556, 556, 889, 556, 556, 556, 556, 556, 278, 278, 278, 278, // 0xE0
    611, 611, 611, 611, 611, 611, 611, 584, 611, 611, 611, 611, 611, 556, 611, 556, // 0xF0
];

const MISSING_WIDTH: u16 = 556;
const ASCENT: i32 = 718;
const DESCENT: i32 = -207;

// WinAnsiEncoding 0x80..=0x9F, in code order. Unassigned codes are None.
const WIN_ANSI_HIGH: [Option<char>; 32] = [
    Some('\u{20AC}'),
    None,
    Some('\u{201A}'),
    Some('\u{0192}'),
    Some('\u{201E}'),
    Some('\u{2026}'),
    Some('\u{2020}'),
    Some('\u{2021}'),
    Some('\u{02C6}'),
    Some('\u{2030}'),
    Some('\u{0160}'),
    Some('\u{2039}'),
    Some('\u{0152}'),
    None,
    Some('\u{017D}'),
    None,
    None,
    Some('\u{2018}'),
    Some('\u{2019}'),
    Some('\u{201C}'),
    Some('\u{201D}'),
    Some('\u{2022}'),
    Some('\u{2013}'),
    Some('\u{2014}'),
    Some('\u{02DC}'),
    Some('\u{2122}'),
    Some('\u{0161}'),
    Some('\u{203A}'),
    Some('\u{0153}'),
    None,
    Some('\u{017E}'),
    Some('\u{0178}'),
];

impl BuiltinFont {
    pub const ALL: [BuiltinFont; 2] = [BuiltinFont::Helvetica, BuiltinFont::HelveticaBold];

    pub fn base_font(self) -> &'static str {
        match self {
            BuiltinFont::Helvetica => "Helvetica",
            BuiltinFont::HelveticaBold => "Helvetica-Bold",
        }
    }

    /// Name of the font entry in each page's resource dictionary.
    pub fn resource_key(self) -> &'static str {
        match self {
            BuiltinFont::Helvetica => "F1",
            BuiltinFont::HelveticaBold => "F2",
        }
    }

    pub fn from_base_font(name: &str) -> Option<BuiltinFont> {
        BuiltinFont::ALL
            .into_iter()
            .find(|font| font.base_font().eq_ignore_ascii_case(name.trim()))
    }

    fn advance(self, ch: char) -> u16 {
        let (ascii, high) = match self {
            BuiltinFont::Helvetica => (&HELVETICA_ASCII, &HELVETICA_HIGH),
            BuiltinFont::HelveticaBold => (&HELVETICA_BOLD_ASCII, &HELVETICA_BOLD_HIGH),
        };
        let width = match win_ansi_code(ch) {
            Some(code @ 0x20..=0x7E) => ascii[(code - 0x20) as usize],
            Some(code @ 0x80..=0xFF) => high[(code - 0x80) as usize],
            _ => 0,
        };
        if width == 0 { MISSING_WIDTH } else { width }
    }

    pub fn measure(self, font_size: Pt, text: &str) -> Pt {
        let units: i32 = text
            .chars()
            .map(|ch| self.advance(ch) as i32)
            .fold(0i32, |acc, adv| acc.saturating_add(adv));
        if units <= 0 {
            return Pt::ZERO;
        }
        font_size.mul_ratio(units, 1000)
    }

    pub fn ascent(self, font_size: Pt) -> Pt {
        font_size.mul_ratio(ASCENT, 1000)
    }

    pub fn descent(self, font_size: Pt) -> Pt {
        font_size.mul_ratio(-DESCENT, 1000)
    }
}

/// Whether the character has a code in WinAnsiEncoding, i.e. whether the
/// standard fonts can draw it.
pub fn supports_char(ch: char) -> bool {
    win_ansi_code(ch).is_some()
}

pub fn win_ansi_code(ch: char) -> Option<u8> {
    let code = ch as u32;
    match code {
        0x20..=0x7E | 0xA0..=0xFF => Some(code as u8),
        _ => WIN_ANSI_HIGH
            .iter()
            .position(|mapped| *mapped == Some(ch))
            .map(|idx| 0x80 + idx as u8),
    }
}

/// Encodes text for a WinAnsi string operand. Tabs become spaces; anything
/// without a code becomes `?`.
pub fn encode_win_ansi(text: &str) -> Vec<u8> {
    text.chars()
        .map(|ch| match ch {
            '\t' => b' ',
            _ => win_ansi_code(ch).unwrap_or(b'?'),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn helvetica_widths_match_core_metrics() {
        let size = Pt::from_f32(10.0);
        // H=722 e=556 l=222 l=222 o=556 -> 2278 units
        assert_eq!(
            BuiltinFont::Helvetica.measure(size, "Hello"),
            Pt::from_f32(22.78)
        );
        assert!(
            BuiltinFont::HelveticaBold.measure(size, "Hello")
                > BuiltinFont::Helvetica.measure(size, "Hello"),
            "bold face should be wider"
        );
        assert_eq!(BuiltinFont::Helvetica.measure(size, ""), Pt::ZERO);
    }

    #[test]
    fn latin1_letters_use_their_own_widths() {
        let size = Pt::from_f32(10.0);
        // AE=1000 i-acute=278 oslash=611 -> 1889 units
        assert_eq!(
            BuiltinFont::Helvetica.measure(size, "\u{C6}\u{ED}\u{F8}"),
            Pt::from_f32(18.89)
        );
        assert_eq!(
            BuiltinFont::HelveticaBold.measure(size, "\u{201C}\u{FC}"),
            Pt::from_f32(11.11)
        );
    }

    #[test]
    fn win_ansi_covers_latin1_and_typographic_punctuation() {
        assert_eq!(win_ansi_code('e'), Some(b'e'));
        assert_eq!(win_ansi_code('é'), Some(0xE9));
        assert_eq!(win_ansi_code('\u{2014}'), Some(0x97));
        assert_eq!(win_ansi_code('\u{20AC}'), Some(0x80));
        assert!(!supports_char('\u{1F600}'));
        assert!(!supports_char('\u{03A9}'));
        assert_eq!(encode_win_ansi("a\u{2713}b"), b"a?b".to_vec());
    }

    #[test]
    fn base_font_lookup_is_case_insensitive() {
        assert_eq!(
            BuiltinFont::from_base_font("helvetica-bold"),
            Some(BuiltinFont::HelveticaBold)
        );
        assert_eq!(BuiltinFont::from_base_font("Times-Roman"), None);
    }
}
