use crate::types::Orientation;

pub const SEG_A: u8 = 1 << 0;
pub const SEG_B: u8 = 1 << 1;
pub const SEG_C: u8 = 1 << 2;
pub const SEG_D: u8 = 1 << 3;
pub const SEG_E: u8 = 1 << 4;
pub const SEG_F: u8 = 1 << 5;
pub const SEG_G: u8 = 1 << 6;
/// Decimal point; on 4-digit clock modules digit 1's DP drives the colon.
pub const SEG_DP: u8 = 1 << 7;

pub type DigitSegments = [u8; 4];

pub const COLON_POSITION: usize = 1;

const DIGIT_CODES: [u8; 10] = [
    SEG_A | SEG_B | SEG_C | SEG_D | SEG_E | SEG_F,
    SEG_B | SEG_C,
    SEG_A | SEG_B | SEG_D | SEG_E | SEG_G,
    SEG_A | SEG_B | SEG_C | SEG_D | SEG_G,
    SEG_B | SEG_C | SEG_F | SEG_G,
    SEG_A | SEG_C | SEG_D | SEG_F | SEG_G,
    SEG_A | SEG_C | SEG_D | SEG_E | SEG_F | SEG_G,
    SEG_A | SEG_B | SEG_C,
    SEG_A | SEG_B | SEG_C | SEG_D | SEG_E | SEG_F | SEG_G,
    SEG_A | SEG_B | SEG_C | SEG_D | SEG_F | SEG_G,
];

// Target bit for each source bit under a 180° turn: A<->D, B<->E, C<->F.
const ROTATED_BIT: [u8; 8] = [3, 4, 5, 0, 1, 2, 6, 7];

/// Output side of the renderer. Writes never fail from the caller's view;
/// drivers log and drop frames they cannot deliver.
pub trait SegmentDisplay {
    fn set_brightness(&mut self, level: u8);
    fn write_segments(&mut self, segments: &DigitSegments);
}

pub const fn encode_digit(digit: u8) -> u8 {
    DIGIT_CODES[(digit % 10) as usize]
}

pub const fn rotate_segments(code: u8) -> u8 {
    let mut rotated = 0;
    let mut bit = 0;
    while bit < 8 {
        if code & (1 << bit) != 0 {
            rotated |= 1 << ROTATED_BIT[bit];
        }
        bit += 1;
    }
    rotated
}

pub fn time_digits(hours: u8, minutes: u8) -> [u8; 4] {
    [hours / 10, hours % 10, minutes / 10, minutes % 10]
}

pub fn render(hours: u8, minutes: u8, orientation: Orientation) -> DigitSegments {
    let digits = time_digits(hours, minutes);

    let mut segments = match orientation {
        Orientation::Normal => digits.map(encode_digit),
        Orientation::Rotated => {
            let mut rotated = digits.map(|digit| rotate_segments(encode_digit(digit)));
            rotated.reverse();
            rotated
        }
    };

    segments[COLON_POSITION] |= SEG_DP;
    segments
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn digit_table_matches_standard_codes() {
        let codes: Vec<u8> = (0..10).map(encode_digit).collect();
        assert_eq!(
            codes,
            vec![0x3F, 0x06, 0x5B, 0x4F, 0x66, 0x6D, 0x7D, 0x07, 0x7F, 0x6F]
        );
    }

    #[test]
    fn normal_orientation_keeps_digit_order() {
        let segments = render(9, 5, Orientation::Normal);

        assert_eq!(
            segments,
            [
                encode_digit(0),
                encode_digit(9) | SEG_DP,
                encode_digit(0),
                encode_digit(5)
            ]
        );
        assert_eq!(segments, [0x3F, 0xEF, 0x3F, 0x6D]);
    }

    #[test]
    fn rotated_orientation_reverses_and_flips() {
        let segments = render(13, 45, Orientation::Rotated);

        assert_eq!(
            segments,
            [
                rotate_segments(encode_digit(5)),
                rotate_segments(encode_digit(4)) | SEG_DP,
                rotate_segments(encode_digit(3)),
                rotate_segments(encode_digit(1)),
            ]
        );
    }

    #[test]
    fn rotation_maps_segments_to_their_opposites() {
        assert_eq!(rotate_segments(SEG_A), SEG_D);
        assert_eq!(rotate_segments(SEG_B), SEG_E);
        assert_eq!(rotate_segments(SEG_C), SEG_F);
        assert_eq!(rotate_segments(SEG_G), SEG_G);
        assert_eq!(rotate_segments(SEG_DP), SEG_DP);
        // "1" lit on the right becomes lit on the left.
        assert_eq!(rotate_segments(encode_digit(1)), SEG_E | SEG_F);
        // Symmetric glyphs survive the turn.
        assert_eq!(rotate_segments(encode_digit(0)), encode_digit(0));
        assert_eq!(rotate_segments(encode_digit(8)), encode_digit(8));
        assert_eq!(rotate_segments(encode_digit(5)), encode_digit(5));
    }

    #[test]
    fn rotation_is_an_involution_for_every_byte() {
        for code in 0..=u8::MAX {
            assert_eq!(rotate_segments(rotate_segments(code)), code, "code {code:#04x}");
        }
    }

    #[test]
    fn colon_is_always_lit() {
        for orientation in [Orientation::Normal, Orientation::Rotated] {
            for hours in 0..24 {
                for minutes in [0, 7, 30, 59] {
                    let segments = render(hours, minutes, orientation);
                    assert_ne!(segments[COLON_POSITION] & SEG_DP, 0);
                    assert_eq!(segments[0] & SEG_DP, 0);
                    assert_eq!(segments[2] & SEG_DP, 0);
                    assert_eq!(segments[3] & SEG_DP, 0);
                }
            }
        }
    }
}
