//! Unsigned fixed-point decimal used for every price and quantity.
//!
//! Values are stored as a `u128` scaled by 10^12, so twelve fractional
//! digits are exact. There is no floating point anywhere in the value path:
//! parsing and formatting go through decimal strings, multiplication and
//! division use a 256-bit intermediate product and truncate toward zero.
//!
//! `FixedPoint::MAX` doubles as the "unbounded" sentinel (slippage disabled,
//! unrestricted available budget, fully visible orders). Addition and
//! multiplication saturate at the sentinel instead of wrapping.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::iter::Sum;
use std::ops::{Add, AddAssign, Div, Mul, Rem, Sub, SubAssign};
use std::str::FromStr;
use thiserror::Error;

const LOW_MASK: u128 = u64::MAX as u128;

#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct FixedPoint(u128);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFixedPointError {
    #[error("empty decimal string")]
    Empty,

    #[error("invalid character {0:?} in decimal string")]
    InvalidCharacter(char),

    #[error("decimal value is out of range")]
    Overflow,
}

impl FixedPoint {
    /// Number of fractional decimal digits.
    pub const DECIMALS: usize = 12;
    pub const SCALE: u128 = 1_000_000_000_000;

    pub const ZERO: FixedPoint = FixedPoint(0);
    pub const ONE: FixedPoint = FixedPoint(Self::SCALE);
    pub const MAX: FixedPoint = FixedPoint(u128::MAX);

    /// Build from an already scaled raw value.
    pub const fn from_raw(raw: u128) -> Self {
        FixedPoint(raw)
    }

    pub const fn raw(self) -> u128 {
        self.0
    }

    /// Whole units, saturating at the sentinel.
    pub fn from_int(units: u64) -> Self {
        FixedPoint((units as u128).saturating_mul(Self::SCALE))
    }

    pub const fn is_zero(self) -> bool {
        self.0 == 0
    }

    /// True for the unbounded sentinel.
    pub const fn is_max(self) -> bool {
        self.0 == u128::MAX
    }

    pub fn checked_add(self, rhs: Self) -> Option<Self> {
        self.0.checked_add(rhs.0).map(FixedPoint)
    }

    pub fn checked_sub(self, rhs: Self) -> Option<Self> {
        self.0.checked_sub(rhs.0).map(FixedPoint)
    }

    pub fn saturating_add(self, rhs: Self) -> Self {
        FixedPoint(self.0.saturating_add(rhs.0))
    }

    pub fn saturating_sub(self, rhs: Self) -> Self {
        FixedPoint(self.0.saturating_sub(rhs.0))
    }

    /// Exact product truncated to twelve decimals, `None` when it does not fit.
    pub fn checked_mul(self, rhs: Self) -> Option<Self> {
        mul_div(self.0, rhs.0, Self::SCALE).map(FixedPoint)
    }

    pub fn saturating_mul(self, rhs: Self) -> Self {
        self.checked_mul(rhs).unwrap_or(Self::MAX)
    }

    /// Truncating quotient, `None` on division by zero or overflow.
    pub fn checked_div(self, rhs: Self) -> Option<Self> {
        if rhs.0 == 0 {
            return None;
        }
        mul_div(self.0, Self::SCALE, rhs.0).map(FixedPoint)
    }

    /// Divide by a plain integer scalar.
    pub fn div_scalar(self, divisor: u128) -> Option<Self> {
        self.0.checked_div(divisor).map(FixedPoint)
    }

    /// Whole number of `rhs` that fit into `self` and what is left over.
    pub fn div_rem(self, rhs: Self) -> Option<(u128, Self)> {
        if rhs.0 == 0 {
            return None;
        }
        Some((self.0 / rhs.0, FixedPoint(self.0 % rhs.0)))
    }

    /// Round down to a multiple of `step`. A zero step leaves the value unchanged.
    pub fn floor_to(self, step: Self) -> Self {
        match self.div_rem(step) {
            Some((_, rem)) => FixedPoint(self.0 - rem.0),
            None => self,
        }
    }

    /// True when `self` is an exact multiple of `step`.
    pub fn is_multiple_of(self, step: Self) -> bool {
        match self.div_rem(step) {
            Some((_, rem)) => rem.is_zero(),
            None => true,
        }
    }

    pub fn integer_part(self) -> u128 {
        self.0 / Self::SCALE
    }

    pub fn fractional_part(self) -> u128 {
        self.0 % Self::SCALE
    }
}

impl From<u64> for FixedPoint {
    fn from(units: u64) -> Self {
        FixedPoint::from_int(units)
    }
}

impl Add for FixedPoint {
    type Output = FixedPoint;

    fn add(self, rhs: Self) -> Self {
        self.saturating_add(rhs)
    }
}

impl AddAssign for FixedPoint {
    fn add_assign(&mut self, rhs: Self) {
        *self = *self + rhs;
    }
}

/// Callers must clamp the subtrahend with `min` first; underflow is a bug.
impl Sub for FixedPoint {
    type Output = FixedPoint;

    fn sub(self, rhs: Self) -> Self {
        debug_assert!(self >= rhs, "fixed-point underflow: {} - {}", self, rhs);
        self.saturating_sub(rhs)
    }
}

impl SubAssign for FixedPoint {
    fn sub_assign(&mut self, rhs: Self) {
        *self = *self - rhs;
    }
}

impl Mul for FixedPoint {
    type Output = FixedPoint;

    fn mul(self, rhs: Self) -> Self {
        self.saturating_mul(rhs)
    }
}

/// Panics on division by zero, like the integer types.
impl Div for FixedPoint {
    type Output = FixedPoint;

    fn div(self, rhs: Self) -> Self {
        assert!(!rhs.is_zero(), "fixed-point division by zero");
        self.checked_div(rhs).unwrap_or(Self::MAX)
    }
}

impl Rem for FixedPoint {
    type Output = FixedPoint;

    fn rem(self, rhs: Self) -> Self {
        assert!(!rhs.is_zero(), "fixed-point remainder by zero");
        FixedPoint(self.0 % rhs.0)
    }
}

impl Sum for FixedPoint {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(FixedPoint::ZERO, |acc, value| acc + value)
    }
}

impl FromStr for FixedPoint {
    type Err = ParseFixedPointError;

    /// Digits beyond the twelfth fractional place are truncated.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.is_empty() {
            return Err(ParseFixedPointError::Empty);
        }

        let (int_part, frac_part) = match s.split_once('.') {
            Some((int_part, frac_part)) => (int_part, frac_part),
            None => (s, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(ParseFixedPointError::Empty);
        }

        let mut integer: u128 = 0;
        for c in int_part.chars() {
            let digit = c.to_digit(10).ok_or(ParseFixedPointError::InvalidCharacter(c))?;
            integer = integer
                .checked_mul(10)
                .and_then(|v| v.checked_add(digit as u128))
                .ok_or(ParseFixedPointError::Overflow)?;
        }

        let mut fraction: u128 = 0;
        let mut digits = 0;
        for c in frac_part.chars() {
            let digit = c.to_digit(10).ok_or(ParseFixedPointError::InvalidCharacter(c))?;
            if digits < Self::DECIMALS {
                fraction = fraction * 10 + digit as u128;
                digits += 1;
            }
        }
        for _ in digits..Self::DECIMALS {
            fraction *= 10;
        }

        integer
            .checked_mul(Self::SCALE)
            .and_then(|v| v.checked_add(fraction))
            .map(FixedPoint)
            .ok_or(ParseFixedPointError::Overflow)
    }
}

impl fmt::Display for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let integer = self.integer_part();
        let fraction = self.fractional_part();
        if fraction == 0 {
            return write!(f, "{}", integer);
        }
        let digits = format!("{:012}", fraction);
        write!(f, "{}.{}", integer, digits.trim_end_matches('0'))
    }
}

impl fmt::Debug for FixedPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_max() {
            write!(f, "FixedPoint(MAX)")
        } else {
            write!(f, "FixedPoint({})", self)
        }
    }
}

impl Serialize for FixedPoint {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for FixedPoint {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// `a * b / d` with a 256-bit intermediate product.
fn mul_div(a: u128, b: u128, d: u128) -> Option<u128> {
    if d == 0 {
        return None;
    }
    match a.checked_mul(b) {
        Some(product) => Some(product / d),
        None => {
            let (hi, lo) = mul_wide(a, b);
            div_wide(hi, lo, d)
        }
    }
}

fn mul_wide(a: u128, b: u128) -> (u128, u128) {
    let (a_hi, a_lo) = (a >> 64, a & LOW_MASK);
    let (b_hi, b_lo) = (b >> 64, b & LOW_MASK);

    let ll = a_lo * b_lo;
    let lh = a_lo * b_hi;
    let hl = a_hi * b_lo;
    let hh = a_hi * b_hi;

    let mid = (ll >> 64) + (lh & LOW_MASK) + (hl & LOW_MASK);
    let lo = (ll & LOW_MASK) | (mid << 64);
    let hi = hh + (lh >> 64) + (hl >> 64) + (mid >> 64);
    (hi, lo)
}

/// Binary long division of the 256-bit value `hi:lo` by `d`.
fn div_wide(hi: u128, lo: u128, d: u128) -> Option<u128> {
    if hi >= d {
        return None;
    }

    let mut rem = hi;
    let mut quotient: u128 = 0;
    for bit in (0..128).rev() {
        let carry = rem >> 127;
        rem = (rem << 1) | ((lo >> bit) & 1);
        quotient <<= 1;
        if carry == 1 || rem >= d {
            rem = rem.wrapping_sub(d);
            quotient |= 1;
        }
    }
    Some(quotient)
}
