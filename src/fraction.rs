//! Exact rational arithmetic for musical time.
//!
//! Time is measured in whole notes: a quarter note lasts `1/4`, a dotted
//! half `3/4`. Every value is kept reduced with a positive denominator, so
//! structural equality and numeric equality coincide.

use std::cmp::Ordering;
use std::fmt;
use std::ops::{Add, Div, Mul, Rem, Sub};

use serde::{Deserialize, Serialize};

/// A notated duration symbol, from maxima down to 2048th notes.
///
/// The discriminant is the power of two dividing a whole note, so
/// `Fraction::from(d) == 2^-(d as i8)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[repr(i8)]
pub enum Duration {
    #[serde(rename = "maxima")]
    Maxima = -3,
    #[serde(rename = "long")]
    Longa = -2,
    #[serde(rename = "breve")]
    Breve = -1,
    #[serde(rename = "1")]
    Whole = 0,
    #[serde(rename = "2")]
    Half = 1,
    #[serde(rename = "4")]
    Quarter = 2,
    #[serde(rename = "8")]
    Eighth = 3,
    #[serde(rename = "16")]
    D16 = 4,
    #[serde(rename = "32")]
    D32 = 5,
    #[serde(rename = "64")]
    D64 = 6,
    #[serde(rename = "128")]
    D128 = 7,
    #[serde(rename = "256")]
    D256 = 8,
    #[serde(rename = "512")]
    D512 = 9,
    #[serde(rename = "1024")]
    D1024 = 10,
    #[serde(rename = "2048")]
    D2048 = 11,
}

impl Duration {
    pub const LONGEST: Duration = Duration::Maxima;
    pub const SHORTEST: Duration = Duration::D2048;

    /// Power-of-two exponent: the symbol lasts `2^-exponent` whole notes.
    pub fn exponent(self) -> i8 {
        self as i8
    }

    /// Build a duration from its exponent, clamped to the supported range.
    pub fn from_exponent(exponent: i32) -> Duration {
        match exponent.clamp(Self::LONGEST as i32, Self::SHORTEST as i32) {
            -3 => Duration::Maxima,
            -2 => Duration::Longa,
            -1 => Duration::Breve,
            0 => Duration::Whole,
            1 => Duration::Half,
            2 => Duration::Quarter,
            3 => Duration::Eighth,
            4 => Duration::D16,
            5 => Duration::D32,
            6 => Duration::D64,
            7 => Duration::D128,
            8 => Duration::D256,
            9 => Duration::D512,
            10 => Duration::D1024,
            _ => Duration::D2048,
        }
    }

    /// Whether the symbol is drawn with a filled notehead.
    pub fn is_filled(self) -> bool {
        self >= Duration::Quarter
    }

    /// Number of flags (or beams) the symbol carries.
    pub fn flag_count(self) -> u8 {
        (self.exponent() - Duration::Quarter.exponent()).max(0) as u8
    }
}

/// Reduced rational number with a positive denominator.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "(i64, i64)", into = "(i64, i64)")]
pub struct Fraction {
    numerator: i64,
    denominator: i64,
}

impl Fraction {
    pub const ZERO: Fraction = Fraction { numerator: 0, denominator: 1 };
    pub const ONE: Fraction = Fraction { numerator: 1, denominator: 1 };

    /// Create a reduced fraction. A zero denominator is replaced by one.
    pub fn new(numerator: i64, denominator: i64) -> Self {
        if denominator == 0 {
            log::debug!("Denominator cannot be zero, using 1");
            return Self::reduced(numerator as i128, 1).unwrap_or(Self::ZERO);
        }
        Self::reduced(numerator as i128, denominator as i128).unwrap_or_else(|| {
            log::warn!("Fraction {numerator}/{denominator} cannot be represented");
            Self::ZERO
        })
    }

    pub fn from_int(value: i64) -> Self {
        Self { numerator: value, denominator: 1 }
    }

    pub fn numerator(&self) -> i64 {
        self.numerator
    }

    pub fn denominator(&self) -> i64 {
        self.denominator
    }

    pub fn is_zero(&self) -> bool {
        self.numerator == 0
    }

    pub fn is_negative(&self) -> bool {
        self.numerator < 0
    }

    pub fn to_f64(&self) -> f64 {
        self.numerator as f64 / self.denominator as f64
    }

    /// Decompose into the longest notatable symbol not exceeding `self`
    /// plus what is left over.
    ///
    /// Repeated application on the remainder terminates: the remainder is
    /// always strictly smaller than `self`, and is forced to zero when the
    /// clamped symbol would not make progress.
    pub fn to_dur(&self) -> (Option<Duration>, Fraction) {
        if self.numerator <= 0 {
            return (None, Fraction::ZERO);
        }
        // Smallest k with 2^-k <= num/den, i.e. num * 2^k >= den.
        let (num, den) = (self.numerator as i128, self.denominator as i128);
        let mut exponent: i32 = Duration::LONGEST as i32;
        while exponent < Duration::SHORTEST as i32 && !fits_power(num, den, exponent) {
            exponent += 1;
        }
        let dur = Duration::from_exponent(exponent);

        let mut remainder = *self - Fraction::from(dur);
        if remainder >= *self || remainder.is_negative() {
            log::debug!("Duration remainder of {self} does not decrease, dropping it");
            remainder = Fraction::ZERO;
        }
        (Some(dur), remainder)
    }

    /// Split into the full sequence of notatable symbols.
    pub fn to_durations(&self) -> Vec<Duration> {
        let mut durations = Vec::new();
        let mut rest = *self;
        while let (Some(dur), remainder) = rest.to_dur() {
            durations.push(dur);
            rest = remainder;
        }
        durations
    }

    fn reduced(mut num: i128, mut den: i128) -> Option<Self> {
        if den < 0 {
            num = -num;
            den = -den;
        }
        let divisor = gcd(num.unsigned_abs(), den.unsigned_abs()) as i128;
        if divisor > 1 {
            num /= divisor;
            den /= divisor;
        }
        Some(Self {
            numerator: i64::try_from(num).ok()?,
            denominator: i64::try_from(den).ok()?,
        })
    }

    fn combine(&self, num: i128, den: i128, op: &str) -> Fraction {
        Self::reduced(num, den).unwrap_or_else(|| {
            log::warn!("Overflow in {self} {op} operation, keeping left operand");
            *self
        })
    }
}

fn fits_power(num: i128, den: i128, exponent: i32) -> bool {
    if exponent >= 0 {
        num << exponent >= den
    } else {
        num >= den << (-exponent)
    }
}

fn gcd(mut a: u128, mut b: u128) -> u128 {
    while b != 0 {
        let t = a % b;
        a = b;
        b = t;
    }
    if a == 0 {
        1
    } else {
        a
    }
}

impl Default for Fraction {
    fn default() -> Self {
        Fraction::ZERO
    }
}

impl From<Duration> for Fraction {
    fn from(duration: Duration) -> Self {
        let exponent = duration.exponent();
        if exponent >= 0 {
            Fraction { numerator: 1, denominator: 1 << exponent }
        } else {
            Fraction { numerator: 1 << (-exponent), denominator: 1 }
        }
    }
}

impl TryFrom<(i64, i64)> for Fraction {
    type Error = String;

    fn try_from((numerator, denominator): (i64, i64)) -> Result<Self, Self::Error> {
        if denominator == 0 {
            return Err(format!("fraction {numerator}/0 has a zero denominator"));
        }
        Ok(Fraction::new(numerator, denominator))
    }
}

impl From<Fraction> for (i64, i64) {
    fn from(f: Fraction) -> Self {
        (f.numerator, f.denominator)
    }
}

impl Add for Fraction {
    type Output = Fraction;

    fn add(self, other: Fraction) -> Fraction {
        let num = self.numerator as i128 * other.denominator as i128
            + other.numerator as i128 * self.denominator as i128;
        let den = self.denominator as i128 * other.denominator as i128;
        self.combine(num, den, "+")
    }
}

impl Sub for Fraction {
    type Output = Fraction;

    fn sub(self, other: Fraction) -> Fraction {
        let num = self.numerator as i128 * other.denominator as i128
            - other.numerator as i128 * self.denominator as i128;
        let den = self.denominator as i128 * other.denominator as i128;
        self.combine(num, den, "-")
    }
}

impl Mul for Fraction {
    type Output = Fraction;

    fn mul(self, other: Fraction) -> Fraction {
        let num = self.numerator as i128 * other.numerator as i128;
        let den = self.denominator as i128 * other.denominator as i128;
        self.combine(num, den, "*")
    }
}

impl Div for Fraction {
    type Output = Fraction;

    /// Division by a zero fraction logs a warning and returns `self`.
    fn div(self, other: Fraction) -> Fraction {
        if other.is_zero() {
            log::warn!("Cannot divide {self} by zero");
            return self;
        }
        let num = self.numerator as i128 * other.denominator as i128;
        let den = self.denominator as i128 * other.numerator as i128;
        self.combine(num, den, "/")
    }
}

impl Rem for Fraction {
    type Output = Fraction;

    /// Remainder of the truncated division; a zero divisor returns `self`.
    fn rem(self, other: Fraction) -> Fraction {
        if other.is_zero() {
            log::warn!("Cannot take {self} modulo zero");
            return self;
        }
        let common = self.denominator as i128 * other.denominator as i128;
        let left = self.numerator as i128 * other.denominator as i128;
        let right = other.numerator as i128 * self.denominator as i128;
        let quotient = left / right;
        self.combine(left - quotient * right, common, "%")
    }
}

impl PartialOrd for Fraction {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Fraction {
    fn cmp(&self, other: &Self) -> Ordering {
        let left = self.numerator as i128 * other.denominator as i128;
        let right = other.numerator as i128 * self.denominator as i128;
        left.cmp(&right)
    }
}

impl fmt::Display for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.numerator, self.denominator)
    }
}

impl fmt::Debug for Fraction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Fraction({}/{})", self.numerator, self.denominator)
    }
}
