//! Numeric abstraction shared by the floating-point and exact instantiations.
//!
//! Every model, belief and approximation type is generic over [`Value`]; the
//! workspace instantiates it for `f64` and for `num::BigRational`.

use num::bigint::BigInt;
use num::rational::BigRational;
use num::traits::{One, Signed, ToPrimitive, Zero};
use std::fmt::{Debug, Display};
use std::hash::Hash;
use std::ops::{Add, Div, Mul, Neg, Sub};
use std::str::FromStr;
use thiserror::Error;

/// Arithmetic required by the belief-space approximation.
pub trait Value:
    Clone
    + PartialOrd
    + Debug
    + Display
    + Zero
    + One
    + Add<Output = Self>
    + Sub<Output = Self>
    + Mul<Output = Self>
    + Div<Output = Self>
    + Neg<Output = Self>
    + Send
    + Sync
    + 'static
{
    /// Hashable fingerprint used to deduplicate beliefs.
    type Key: Clone + Eq + Hash + Debug;

    /// Whether arithmetic on this type is exact.
    const IS_EXACT: bool;

    fn abs(&self) -> Self;
    fn floor(&self) -> Self;
    fn from_u64(value: u64) -> Self;
    fn from_f64(value: f64) -> Self;
    fn to_f64(&self) -> f64;
    /// Truncates towards zero; negative values map to zero and values above
    /// `u64::MAX` saturate.
    fn to_u64_saturating(&self) -> u64;
    /// Fingerprint of the value. Floating values are quantised at `precision`.
    fn fingerprint(&self, precision: f64) -> Self::Key;
    /// Parses `"0.25"`, `"1/3"` or `"1"`.
    fn parse(raw: &str) -> Result<Self, ParseValueError>;

    fn min_of(self, other: Self) -> Self {
        if other < self { other } else { self }
    }

    fn max_of(self, other: Self) -> Self {
        if other > self { other } else { self }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ParseValueError {
    #[error("'{0}' is not a number")]
    Malformed(String),
    #[error("'{0}' has a zero denominator")]
    ZeroDenominator(String),
}

impl Value for f64 {
    type Key = i64;

    const IS_EXACT: bool = false;

    fn abs(&self) -> Self {
        f64::abs(*self)
    }

    fn floor(&self) -> Self {
        f64::floor(*self)
    }

    fn from_u64(value: u64) -> Self {
        value as f64
    }

    fn from_f64(value: f64) -> Self {
        value
    }

    fn to_f64(&self) -> f64 {
        *self
    }

    fn to_u64_saturating(&self) -> u64 {
        if *self <= 0.0 { 0 } else { *self as u64 }
    }

    fn fingerprint(&self, precision: f64) -> i64 {
        if precision > 0.0 {
            (*self / precision).round() as i64
        } else {
            self.to_bits() as i64
        }
    }

    fn parse(raw: &str) -> Result<Self, ParseValueError> {
        let trimmed = raw.trim();
        let malformed = || ParseValueError::Malformed(raw.to_string());
        match trimmed.split_once('/') {
            Some((num, den)) => {
                let num: f64 = num.trim().parse().map_err(|_| malformed())?;
                let den: f64 = den.trim().parse().map_err(|_| malformed())?;
                if den == 0.0 {
                    return Err(ParseValueError::ZeroDenominator(raw.to_string()));
                }
                Ok(num / den)
            }
            None => trimmed.parse().map_err(|_| malformed()),
        }
    }
}

impl Value for BigRational {
    type Key = BigRational;

    const IS_EXACT: bool = true;

    fn abs(&self) -> Self {
        Signed::abs(self)
    }

    fn floor(&self) -> Self {
        BigRational::floor(self)
    }

    fn from_u64(value: u64) -> Self {
        BigRational::from_integer(BigInt::from(value))
    }

    fn from_f64(value: f64) -> Self {
        BigRational::from_float(value).unwrap_or_else(BigRational::zero)
    }

    fn to_f64(&self) -> f64 {
        ToPrimitive::to_f64(self).unwrap_or(f64::NAN)
    }

    fn to_u64_saturating(&self) -> u64 {
        if self.is_negative() {
            return 0;
        }
        self.to_integer().to_u64().unwrap_or(u64::MAX)
    }

    fn fingerprint(&self, _precision: f64) -> BigRational {
        self.clone()
    }

    fn parse(raw: &str) -> Result<Self, ParseValueError> {
        let trimmed = raw.trim();
        if let Some((num, den)) = trimmed.split_once('/') {
            let num = parse_decimal(num.trim()).ok_or_else(|| malformed(raw))?;
            let den = parse_decimal(den.trim()).ok_or_else(|| malformed(raw))?;
            if den.is_zero() {
                return Err(ParseValueError::ZeroDenominator(raw.to_string()));
            }
            return Ok(num / den);
        }
        if let Some(value) = parse_decimal(trimmed) {
            return Ok(value);
        }
        // Scientific notation goes through the exact binary expansion.
        let float: f64 = trimmed.parse().map_err(|_| malformed(raw))?;
        BigRational::from_float(float).ok_or_else(|| malformed(raw))
    }
}

fn malformed(raw: &str) -> ParseValueError {
    ParseValueError::Malformed(raw.to_string())
}

/// Exact parse of an optionally signed decimal literal such as `-12.0625`.
fn parse_decimal(raw: &str) -> Option<BigRational> {
    let (negative, digits) = match raw.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, raw.strip_prefix('+').unwrap_or(raw)),
    };
    let (int_part, frac_part) = digits.split_once('.').unwrap_or((digits, ""));
    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.chars().chain(frac_part.chars()).all(|c| c.is_ascii_digit()) {
        return None;
    }
    let combined = format!("{int_part}{frac_part}");
    let numerator = BigInt::from_str(if combined.is_empty() { "0" } else { &combined }).ok()?;
    let denominator = num::pow(BigInt::from(10u32), frac_part.len());
    let value = BigRational::new(numerator, denominator);
    Some(if negative { -value } else { value })
}

/// Relative gap between two bounds, `|upper - lower| * 2 / (|lower| + |upper|)`.
///
/// Two zero bounds have a zero gap.
pub fn relative_gap<V: Value>(lower: &V, upper: &V) -> V {
    let scale = lower.abs() + upper.abs();
    if scale.is_zero() {
        return V::zero();
    }
    (upper.clone() - lower.clone()).abs() * V::from_u64(2) / scale
}
