//! SMuFL code points of the glyphs the layout measures.

use crate::fraction::Duration;
use crate::model::{Accidental, ClefShape};

pub const G_CLEF: u32 = 0xE050;
pub const C_CLEF: u32 = 0xE05C;
pub const F_CLEF: u32 = 0xE062;
pub const UNPITCHED_PERCUSSION_CLEF: u32 = 0xE069;

pub const TIME_SIG_0: u32 = 0xE080;
pub const TIME_SIG_COMMON: u32 = 0xE08A;

pub const NOTEHEAD_DOUBLE_WHOLE: u32 = 0xE0A0;
pub const NOTEHEAD_WHOLE: u32 = 0xE0A2;
pub const NOTEHEAD_HALF: u32 = 0xE0A3;
pub const NOTEHEAD_BLACK: u32 = 0xE0A4;

pub const AUGMENTATION_DOT: u32 = 0xE1E7;
pub const FLAG_8TH_UP: u32 = 0xE240;

pub const ACCIDENTAL_FLAT: u32 = 0xE260;
pub const ACCIDENTAL_NATURAL: u32 = 0xE261;
pub const ACCIDENTAL_SHARP: u32 = 0xE262;
pub const ACCIDENTAL_DOUBLE_SHARP: u32 = 0xE263;
pub const ACCIDENTAL_DOUBLE_FLAT: u32 = 0xE264;

pub const REST_DOUBLE_WHOLE: u32 = 0xE4E2;
pub const REST_WHOLE: u32 = 0xE4E3;
pub const REST_HALF: u32 = 0xE4E4;
pub const REST_QUARTER: u32 = 0xE4E5;
pub const REST_8TH: u32 = 0xE4E6;

/// Glyph substituted when a font lacks the requested one.
pub const FALLBACK: u32 = NOTEHEAD_BLACK;

pub fn notehead(dur: Duration) -> u32 {
    match dur {
        Duration::Maxima | Duration::Longa | Duration::Breve => NOTEHEAD_DOUBLE_WHOLE,
        Duration::Whole => NOTEHEAD_WHOLE,
        Duration::Half => NOTEHEAD_HALF,
        _ => NOTEHEAD_BLACK,
    }
}

/// Rest glyph; shorter values use the stacked 8th..1024th rests.
pub fn rest(dur: Duration) -> u32 {
    match dur {
        Duration::Maxima | Duration::Longa | Duration::Breve => REST_DOUBLE_WHOLE,
        Duration::Whole => REST_WHOLE,
        Duration::Half => REST_HALF,
        Duration::Quarter => REST_QUARTER,
        // rest8th through rest1024th are consecutive
        d => REST_8TH + (d.exponent() as u32).saturating_sub(3).min(7),
    }
}

pub fn accidental(accid: Accidental) -> u32 {
    match accid {
        Accidental::Sharp => ACCIDENTAL_SHARP,
        Accidental::Flat => ACCIDENTAL_FLAT,
        Accidental::Natural => ACCIDENTAL_NATURAL,
        Accidental::DoubleSharp => ACCIDENTAL_DOUBLE_SHARP,
        Accidental::DoubleFlat => ACCIDENTAL_DOUBLE_FLAT,
    }
}

pub fn clef(shape: ClefShape) -> u32 {
    match shape {
        ClefShape::G => G_CLEF,
        ClefShape::F => F_CLEF,
        ClefShape::C => C_CLEF,
        ClefShape::Perc => UNPITCHED_PERCUSSION_CLEF,
    }
}

/// Time signature digit glyphs for a number, most significant first.
pub fn time_sig_digits(value: u32) -> Vec<u32> {
    value.to_string().bytes().map(|b| TIME_SIG_0 + (b - b'0') as u32).collect()
}

/// Parse a code written as hex with an optional `U+` prefix (`E0A4`, `U+E0A4`).
pub fn parse_code(text: &str) -> Option<u32> {
    let hex = text.trim().trim_start_matches("U+").trim_start_matches("u+");
    u32::from_str_radix(hex, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rest_glyph_sequence() {
        assert_eq!(rest(Duration::Quarter), REST_QUARTER);
        assert_eq!(rest(Duration::Eighth), 0xE4E6);
        assert_eq!(rest(Duration::D32), 0xE4E8);
        assert_eq!(rest(Duration::D2048), 0xE4ED);
    }

    #[test]
    fn digits() {
        assert_eq!(time_sig_digits(12), vec![0xE081, 0xE082]);
        assert_eq!(parse_code("U+E0A4"), Some(NOTEHEAD_BLACK));
        assert_eq!(parse_code("zz"), None);
    }
}
