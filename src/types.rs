use fixed::types::I32F32;
use std::fmt;
use std::str::FromStr;

pub const POINTS_PER_INCH: f32 = 72.0;

/// Layout length in PDF points, stored as fixed point so that the two layout
/// passes make bit-identical placement decisions.
#[derive(Debug, Clone, Copy, Default, PartialEq, PartialOrd)]
pub struct Pt(I32F32);

impl Pt {
    pub const ZERO: Pt = Pt(I32F32::from_bits(0));

    pub fn from_f32(value: f32) -> Pt {
        if !value.is_finite() {
            return Pt::ZERO;
        }
        let milli = (value as f64 * 1000.0).round();
        let milli = milli.clamp(i64::MIN as f64, i64::MAX as f64) as i64;
        Pt::from_milli_i64(milli)
    }

    pub fn inches(value: f32) -> Pt {
        Pt::from_f32(value * POINTS_PER_INCH)
    }

    pub fn to_f32(self) -> f32 {
        self.0.to_num()
    }

    pub fn to_milli_i64(self) -> i64 {
        let bits = self.0.to_bits() as i128;
        let denom = 1i128 << 32;
        let scaled = bits * 1000;
        let adj = if scaled >= 0 { denom / 2 } else { -denom / 2 };
        let milli = (scaled + adj) / denom;
        milli.clamp(i64::MIN as i128, i64::MAX as i128) as i64
    }

    pub fn max(self, other: Pt) -> Pt {
        if self >= other { self } else { other }
    }

    pub fn min(self, other: Pt) -> Pt {
        if self <= other { self } else { other }
    }

    pub fn mul_ratio(self, num: i32, denom: i32) -> Pt {
        if denom == 0 {
            return Pt::ZERO;
        }
        let milli = self.to_milli_i64() as i128;
        let value = div_round_i128(milli.saturating_mul(num as i128), denom as i128);
        Pt::from_milli_i128(value)
    }

    pub fn from_milli_i64(milli: i64) -> Pt {
        Pt::from_milli_i128(milli as i128)
    }

    fn from_milli_i128(milli: i128) -> Pt {
        let denom = 1i128 << 32;
        let adj = if milli >= 0 { 500 } else { -500 };
        let bits = (milli * denom + adj) / 1000;
        let bits = bits.clamp(i64::MIN as i128, i64::MAX as i128) as i64;
        Pt(I32F32::from_bits(bits))
    }
}

impl std::ops::Add for Pt {
    type Output = Pt;
    fn add(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 + rhs.to_milli_i64() as i128)
    }
}

impl std::ops::AddAssign for Pt {
    fn add_assign(&mut self, rhs: Pt) {
        *self = *self + rhs;
    }
}

impl std::ops::Sub for Pt {
    type Output = Pt;
    fn sub(self, rhs: Pt) -> Pt {
        Pt::from_milli_i128(self.to_milli_i64() as i128 - rhs.to_milli_i64() as i128)
    }
}

impl std::ops::SubAssign for Pt {
    fn sub_assign(&mut self, rhs: Pt) {
        *self = *self - rhs;
    }
}

impl std::ops::Mul<i32> for Pt {
    type Output = Pt;
    fn mul(self, rhs: i32) -> Pt {
        let milli = self.to_milli_i64() as i128;
        Pt::from_milli_i128(milli.saturating_mul(rhs as i128))
    }
}

impl std::ops::Neg for Pt {
    type Output = Pt;
    fn neg(self) -> Pt {
        Pt::from_milli_i128(-(self.to_milli_i64() as i128))
    }
}

impl std::iter::Sum for Pt {
    fn sum<I: Iterator<Item = Pt>>(iter: I) -> Pt {
        iter.fold(Pt::ZERO, |acc, v| acc + v)
    }
}

fn div_round_i128(num: i128, den: i128) -> i128 {
    if den == 0 {
        return 0;
    }
    let den_abs = den.abs();
    if num >= 0 {
        (num + (den_abs / 2)) / den
    } else {
        -(((-num) + (den_abs / 2)) / den)
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Size {
    pub width: Pt,
    pub height: Pt,
}

impl Size {
    pub fn new(width: Pt, height: Pt) -> Self {
        Self { width, height }
    }

    pub fn from_points(width: f32, height: f32) -> Self {
        Self {
            width: Pt::from_f32(width),
            height: Pt::from_f32(height),
        }
    }

    pub fn from_mm(width_mm: f32, height_mm: f32) -> Self {
        Self::from_points(width_mm * 72.0 / 25.4, height_mm * 72.0 / 25.4)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PaperSize {
    #[default]
    Letter,
    A4,
    Legal,
    A3,
    A5,
    Tabloid,
}

impl PaperSize {
    pub const ALL: [PaperSize; 6] = [
        PaperSize::Letter,
        PaperSize::A4,
        PaperSize::Legal,
        PaperSize::A3,
        PaperSize::A5,
        PaperSize::Tabloid,
    ];

    pub fn size(self) -> Size {
        match self {
            // 8.5in x 11in at 72pt/in.
            PaperSize::Letter => Size::from_points(612.0, 792.0),
            PaperSize::A4 => Size::from_mm(210.0, 297.0),
            PaperSize::Legal => Size::from_points(612.0, 1008.0),
            PaperSize::A3 => Size::from_mm(297.0, 420.0),
            PaperSize::A5 => Size::from_mm(148.0, 210.0),
            PaperSize::Tabloid => Size::from_points(792.0, 1224.0),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            PaperSize::Letter => "letter",
            PaperSize::A4 => "a4",
            PaperSize::Legal => "legal",
            PaperSize::A3 => "a3",
            PaperSize::A5 => "a5",
            PaperSize::Tabloid => "tabloid",
        }
    }
}

impl fmt::Display for PaperSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaperSize {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let key = raw.trim().to_ascii_lowercase();
        PaperSize::ALL
            .into_iter()
            .find(|size| size.as_str() == key)
            .ok_or_else(|| format!("unknown paper size '{raw}'"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rect {
    pub x: Pt,
    pub y: Pt,
    pub width: Pt,
    pub height: Pt,
}

impl Rect {
    pub fn new(x: Pt, y: Pt, width: Pt, height: Pt) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Margins {
    pub top: Pt,
    pub right: Pt,
    pub bottom: Pt,
    pub left: Pt,
}

impl Margins {
    pub fn all(value: Pt) -> Self {
        Self {
            top: value,
            right: value,
            bottom: value,
            left: value,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Color {
    pub r: f32,
    pub g: f32,
    pub b: f32,
}

impl Color {
    pub const BLACK: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 0.0,
    };

    pub const LINK_BLUE: Color = Color {
        r: 0.0,
        g: 0.0,
        b: 1.0,
    };

    pub fn from_hex(hex: u32) -> Self {
        Self {
            r: ((hex >> 16) & 0xFF) as f32 / 255.0,
            g: ((hex >> 8) & 0xFF) as f32 / 255.0,
            b: (hex & 0xFF) as f32 / 255.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_point_arithmetic_is_exact_for_layout_steps() {
        let line = Pt::from_f32(15.0);
        let total: Pt = (0..40).map(|_| line).sum();
        assert_eq!(total, Pt::from_f32(600.0));
        assert_eq!(Pt::inches(0.75), Pt::from_f32(54.0));
        assert_eq!(Pt::from_f32(10.0).mul_ratio(1, 2), Pt::from_f32(5.0));
    }

    #[test]
    fn default_length_is_zero() {
        assert_eq!(Pt::default(), Pt::ZERO);
    }

    #[test]
    fn paper_sizes_parse_case_insensitively() {
        assert_eq!("A4".parse::<PaperSize>(), Ok(PaperSize::A4));
        assert_eq!("tabloid".parse::<PaperSize>(), Ok(PaperSize::Tabloid));
        assert!("b5".parse::<PaperSize>().is_err());
        let letter = PaperSize::Letter.size();
        assert_eq!(letter.width, Pt::from_f32(612.0));
        assert_eq!(letter.height, Pt::from_f32(792.0));
    }

    #[test]
    fn hex_colors_map_to_unit_range() {
        let grey = Color::from_hex(0x888888);
        assert!((grey.r - 136.0 / 255.0).abs() < 1e-6);
        assert_eq!(grey.r, grey.b);
    }
}
