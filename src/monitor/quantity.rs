//! Kubernetes-style resource quantities.
//!
//! Values are held as exact milli-units in an `i128`, which covers every
//! storage size the API can express (`Ei` included) with room to spare, so
//! running sums never round. The notation a value was parsed from is kept as
//! its [`QuantityFormat`] and reused when the value is displayed: `100Gi`
//! plus `150Gi` prints as `250Gi`, not as a byte count.

#![allow(missing_docs)]

use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::iter::Sum;
use std::ops::{Add, AddAssign, Neg, Sub, SubAssign};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::core::errors::{PvcwError, Result};

/// Notation family a quantity is rendered in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuantityFormat {
    /// Powers of 1024: `Ki`, `Mi`, `Gi`, `Ti`, `Pi`, `Ei`.
    BinarySi,
    /// Powers of 1000: `m`, `k`, `M`, `G`, `T`, `P`, `E`.
    #[default]
    DecimalSi,
    /// Scientific notation: `1e9`, `5e-3`.
    DecimalExponent,
}

/// Exact signed capacity value.
///
/// Equality, ordering and hashing look at the value only; the format is a
/// display preference.
#[derive(Debug, Clone, Copy)]
pub struct Quantity {
    milli: i128,
    format: QuantityFormat,
}

const BINARY_SUFFIXES: [(u32, &str); 6] = [
    (60, "Ei"),
    (50, "Pi"),
    (40, "Ti"),
    (30, "Gi"),
    (20, "Mi"),
    (10, "Ki"),
];

const DECIMAL_SUFFIXES: [(u32, &str); 7] = [
    (18, "E"),
    (15, "P"),
    (12, "T"),
    (9, "G"),
    (6, "M"),
    (3, "k"),
    (0, ""),
];

/// Largest decimal exponent accepted in `NeM` notation.
const MAX_EXPONENT: i64 = 64;

/// Parsed suffix: value multiplier as `2^pow2 * 10^pow10`.
struct Scale {
    pow2: u32,
    pow10: i64,
    format: QuantityFormat,
}

impl Quantity {
    /// The zero quantity.
    #[must_use]
    pub const fn zero() -> Self {
        Self {
            milli: 0,
            format: QuantityFormat::DecimalSi,
        }
    }

    /// Build a quantity from a raw milli-unit count.
    #[must_use]
    pub const fn from_milli(milli: i128, format: QuantityFormat) -> Self {
        Self { milli, format }
    }

    /// Build a quantity of whole bytes rendered with binary suffixes.
    #[must_use]
    pub const fn from_bytes(bytes: i64) -> Self {
        Self {
            milli: bytes as i128 * 1000,
            format: QuantityFormat::BinarySi,
        }
    }

    /// Parse a quantity string such as `10Gi`, `1.5T`, `500m` or `2e9`.
    pub fn parse(input: &str) -> Result<Self> {
        let s = input.trim();
        let (negative, rest) = match s.as_bytes().first() {
            None => return Err(PvcwError::invalid_quantity(input, "empty quantity")),
            Some(b'-') => (true, &s[1..]),
            Some(b'+') => (false, &s[1..]),
            Some(_) => (false, s),
        };

        let number_end = rest
            .find(|c: char| !(c.is_ascii_digit() || c == '.'))
            .unwrap_or(rest.len());
        let (number, suffix) = rest.split_at(number_end);
        let (whole, fraction) = number.split_once('.').unwrap_or((number, ""));
        if fraction.contains('.') {
            return Err(PvcwError::invalid_quantity(
                input,
                "more than one decimal point",
            ));
        }
        if whole.is_empty() && fraction.is_empty() {
            return Err(PvcwError::invalid_quantity(input, "missing numeric part"));
        }
        // Trailing fraction zeros carry no value and must not count toward
        // the digit limit.
        let fraction = fraction.trim_end_matches('0');

        let scale = parse_suffix(suffix).ok_or_else(|| {
            PvcwError::invalid_quantity(input, format!("unknown suffix {suffix:?}"))
        })?;

        let digits = format!("{whole}{fraction}");
        let digits = digits.trim_start_matches('0');
        if digits.len() > 38 {
            return Err(PvcwError::invalid_quantity(input, "too many digits"));
        }
        let mantissa = if digits.is_empty() {
            0
        } else {
            digits
                .parse::<u128>()
                .map_err(|e| PvcwError::invalid_quantity(input, e.to_string()))?
        };

        // Convert to milli-units: shift the decimal point by the suffix exponent
        // plus three, minus the digits that sat after the point.
        let fraction_len = i64::try_from(fraction.len()).unwrap_or(i64::MAX);
        let pow10 = scale.pow10 + 3 - fraction_len;
        let magnitude = scale_magnitude(mantissa, scale.pow2, pow10)
            .and_then(|m| i128::try_from(m).ok())
            .ok_or_else(|| PvcwError::invalid_quantity(input, "value out of range"))?;

        Ok(Self {
            milli: if negative { -magnitude } else { magnitude },
            format: scale.format,
        })
    }

    /// Raw milli-unit count.
    #[must_use]
    pub const fn milli_value(&self) -> i128 {
        self.milli
    }

    /// Whole-unit value, rounded away from zero.
    #[must_use]
    pub const fn value(&self) -> i128 {
        let whole = self.milli / 1000;
        if self.milli % 1000 == 0 {
            whole
        } else if self.milli > 0 {
            whole + 1
        } else {
            whole - 1
        }
    }

    #[must_use]
    pub const fn format(&self) -> QuantityFormat {
        self.format
    }

    #[must_use]
    pub const fn is_zero(&self) -> bool {
        self.milli == 0
    }

    #[must_use]
    pub const fn is_negative(&self) -> bool {
        self.milli < 0
    }

    /// Sum of two quantities, `None` on `i128` overflow.
    #[must_use]
    pub fn checked_add(&self, other: &Self) -> Option<Self> {
        Some(Self {
            milli: self.milli.checked_add(other.milli)?,
            format: self.merged_format(other),
        })
    }

    /// Difference of two quantities, `None` on `i128` overflow.
    #[must_use]
    pub fn checked_sub(&self, other: &Self) -> Option<Self> {
        Some(Self {
            milli: self.milli.checked_sub(other.milli)?,
            format: self.merged_format(other),
        })
    }

    /// `self` as a percentage of `ceiling`; `None` for a zero ceiling.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn percent_of(&self, ceiling: &Self) -> Option<f64> {
        if ceiling.is_zero() {
            return None;
        }
        Some(self.milli as f64 / ceiling.milli as f64 * 100.0)
    }

    /// A zero accumulator takes on the notation of the first value added to it.
    const fn merged_format(&self, other: &Self) -> QuantityFormat {
        if self.milli == 0 {
            other.format
        } else {
            self.format
        }
    }
}

fn parse_suffix(suffix: &str) -> Option<Scale> {
    let decimal = |pow10| Scale {
        pow2: 0,
        pow10,
        format: QuantityFormat::DecimalSi,
    };
    let binary = |pow2| Scale {
        pow2,
        pow10: 0,
        format: QuantityFormat::BinarySi,
    };

    let scale = match suffix {
        "" => decimal(0),
        "m" => decimal(-3),
        "k" => decimal(3),
        "M" => decimal(6),
        "G" => decimal(9),
        "T" => decimal(12),
        "P" => decimal(15),
        "E" => decimal(18),
        "Ki" => binary(10),
        "Mi" => binary(20),
        "Gi" => binary(30),
        "Ti" => binary(40),
        "Pi" => binary(50),
        "Ei" => binary(60),
        _ => {
            let exponent = suffix
                .strip_prefix('e')
                .or_else(|| suffix.strip_prefix('E'))?;
            let unsigned = exponent
                .strip_prefix('-')
                .or_else(|| exponent.strip_prefix('+'))
                .unwrap_or(exponent);
            if unsigned.is_empty() || !unsigned.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let pow10: i64 = exponent.parse().ok()?;
            if pow10.abs() > MAX_EXPONENT {
                return None;
            }
            Scale {
                pow2: 0,
                pow10,
                format: QuantityFormat::DecimalExponent,
            }
        }
    };
    Some(scale)
}

/// `mantissa * 2^pow2 * 10^pow10`, rounded up when `pow10` is negative.
fn scale_magnitude(mantissa: u128, pow2: u32, pow10: i64) -> Option<u128> {
    let value = mantissa.checked_mul(1u128.checked_shl(pow2)?)?;
    if pow10 >= 0 {
        let factor = 10u128.checked_pow(u32::try_from(pow10).ok()?)?;
        value.checked_mul(factor)
    } else {
        let shift = pow10.unsigned_abs();
        if shift > 38 {
            return Some(u128::from(value != 0));
        }
        Some(value.div_ceil(10u128.pow(u32::try_from(shift).ok()?)))
    }
}

fn format_binary(bytes: u128) -> String {
    if bytes == 0 {
        return "0".to_string();
    }
    for (shift, suffix) in BINARY_SUFFIXES {
        if bytes % (1u128 << shift) == 0 {
            return format!("{}{suffix}", bytes >> shift);
        }
    }
    bytes.to_string()
}

fn format_decimal(milli: u128, exponent_style: bool) -> String {
    if milli == 0 {
        return "0".to_string();
    }
    for (exp, suffix) in DECIMAL_SUFFIXES {
        let unit = 10u128.pow(exp + 3);
        if milli % unit == 0 {
            let scaled = milli / unit;
            return match (exponent_style, exp) {
                (true, 0) => scaled.to_string(),
                (true, _) => format!("{scaled}e{exp}"),
                (false, _) => format!("{scaled}{suffix}"),
            };
        }
    }
    if exponent_style {
        format!("{milli}e-3")
    } else {
        format!("{milli}m")
    }
}

impl fmt::Display for Quantity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let magnitude = self.milli.unsigned_abs();
        let body = match self.format {
            QuantityFormat::BinarySi if magnitude % 1000 == 0 => format_binary(magnitude / 1000),
            QuantityFormat::BinarySi | QuantityFormat::DecimalSi => {
                format_decimal(magnitude, false)
            }
            QuantityFormat::DecimalExponent => format_decimal(magnitude, true),
        };
        if self.milli < 0 {
            write!(f, "-{body}")
        } else {
            f.write_str(&body)
        }
    }
}

impl FromStr for Quantity {
    type Err = PvcwError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl Default for Quantity {
    fn default() -> Self {
        Self::zero()
    }
}

impl PartialEq for Quantity {
    fn eq(&self, other: &Self) -> bool {
        self.milli == other.milli
    }
}

impl Eq for Quantity {}

impl PartialOrd for Quantity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Quantity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.milli.cmp(&other.milli)
    }
}

impl Hash for Quantity {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.milli.hash(state);
    }
}

impl Add for Quantity {
    type Output = Self;

    fn add(self, rhs: Self) -> Self {
        Self {
            milli: self.milli.saturating_add(rhs.milli),
            format: self.merged_format(&rhs),
        }
    }
}

impl Sub for Quantity {
    type Output = Self;

    fn sub(self, rhs: Self) -> Self {
        Self {
            milli: self.milli.saturating_sub(rhs.milli),
            format: self.merged_format(&rhs),
        }
    }
}

impl AddAssign for Quantity {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

impl SubAssign for Quantity {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Neg for Quantity {
    type Output = Self;

    fn neg(self) -> Self {
        Self {
            milli: self.milli.saturating_neg(),
            format: self.format,
        }
    }
}

impl<'a> Sum<&'a Quantity> for Quantity {
    fn sum<I: Iterator<Item = &'a Quantity>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc + *q)
    }
}

impl Sum for Quantity {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::zero(), |acc, q| acc + q)
    }
}

impl Serialize for Quantity {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Quantity {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}
