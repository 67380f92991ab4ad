//! Arbitrary precision decimal arithmetic for Comp numbers.
//!
//! Comp numbers are exact decimals: a coefficient (`BigInt`) and a power-of-ten
//! exponent, value = coefficient * 10^exponent. There is no binary float
//! representation anywhere in the core; literals are decoded from source text
//! directly into this form so input precision survives arithmetic.
//!
//! Division is the one operation that cannot always be exact. Non-terminating
//! quotients are rounded half-up to [`DIV_PRECISION`] significant digits;
//! terminating quotients are trimmed so `1 / 2` stays `0.5`.

use std::{cmp::Ordering, fmt, str::FromStr};

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{Signed, ToPrimitive, Zero};

/// Significant digits produced for non-terminating division.
pub const DIV_PRECISION: u32 = 28;

/// A decimal number with arbitrary precision.
///
/// Stored as coefficient * 10^exponent. Trailing zeros in the coefficient are
/// preserved for values parsed from source (`1.50` keeps its two fractional
/// digits), matching the significance behavior of general decimal arithmetic.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Decimal {
    coefficient: BigInt,
    exponent: i32,
}

/// Error produced by [`Decimal::checked_div`] when the divisor is zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DivideByZero;

impl Decimal {
    /// Creates a decimal from a raw coefficient and exponent.
    pub(crate) fn new(coefficient: BigInt, exponent: i32) -> Self {
        Self { coefficient, exponent }
    }

    /// Zero with exponent 0.
    #[must_use]
    pub fn zero() -> Self {
        Self::new(BigInt::ZERO, 0)
    }

    #[must_use]
    pub fn from_i64(n: i64) -> Self {
        Self::new(BigInt::from(n), 0)
    }

    /// Parses a decimal literal.
    ///
    /// Accepts `123`, `-123`, `+1.5`, `1.23e-4`, `.5`, `10.`. The string route
    /// is the only way floats enter the system, so no precision is lost.
    ///
    /// # Errors
    /// Returns a message when the text is not a valid decimal literal.
    pub fn parse(text: &str) -> Result<Self, String> {
        let s = text.trim();
        let (negative, rest) = match s.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, s.strip_prefix('+').unwrap_or(s)),
        };

        let (mantissa, exp_str) = match rest.find(['e', 'E']) {
            Some(pos) => (&rest[..pos], &rest[pos + 1..]),
            None => (rest, ""),
        };

        let mut exponent: i32 = 0;
        if !exp_str.is_empty() {
            exponent = exp_str
                .parse::<i32>()
                .map_err(|_| format!("invalid exponent in number: {text}"))?;
        }

        let (int_part, frac_part) = match mantissa.find('.') {
            Some(pos) => (&mantissa[..pos], &mantissa[pos + 1..]),
            None => (mantissa, ""),
        };
        if int_part.is_empty() && frac_part.is_empty() {
            return Err(format!("number has no digits: {text}"));
        }
        if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(format!("invalid digits in number: {text}"));
        }

        exponent -= i32::try_from(frac_part.len()).map_err(|_| format!("number too long: {text}"))?;

        let digits = format!("{}{frac_part}", int_part.trim_start_matches('0'));
        let coefficient = if digits.is_empty() || digits.bytes().all(|b| b == b'0') {
            BigInt::ZERO
        } else {
            BigInt::from_str(&digits).map_err(|_| format!("invalid digits in number: {text}"))?
        };

        let coefficient = if negative { -coefficient } else { coefficient };
        Ok(Self::new(coefficient, exponent))
    }

    /// Parses a base-prefixed integer literal body (the part after `0x`, `0o`, `0b`).
    ///
    /// # Errors
    /// Returns a message when a digit is out of range for the base.
    pub fn parse_radix(digits: &str, radix: u32) -> Result<Self, String> {
        BigInt::parse_bytes(digits.as_bytes(), radix)
            .map(|coefficient| Self::new(coefficient, 0))
            .ok_or_else(|| format!("invalid base-{radix} digits: {digits}"))
    }

    #[must_use]
    pub fn is_zero(&self) -> bool {
        self.coefficient.is_zero()
    }

    #[must_use]
    pub fn is_negative(&self) -> bool {
        self.coefficient.is_negative()
    }

    /// Exact negation. `BigInt` negation never loses digits.
    #[must_use]
    pub fn neg(&self) -> Self {
        Self::new(-self.coefficient.clone(), self.exponent)
    }

    /// Exact addition: the operand with the larger exponent is rescaled down.
    #[must_use]
    pub fn add(&self, other: &Self) -> Self {
        let (a, b, exponent) = Self::align(self, other);
        Self::new(a + b, exponent)
    }

    /// Exact subtraction.
    #[must_use]
    pub fn sub(&self, other: &Self) -> Self {
        let (a, b, exponent) = Self::align(self, other);
        Self::new(a - b, exponent)
    }

    /// Exact multiplication.
    #[must_use]
    pub fn mul(&self, other: &Self) -> Self {
        Self::new(
            &self.coefficient * &other.coefficient,
            self.exponent.saturating_add(other.exponent),
        )
    }

    /// Division.
    ///
    /// Terminating quotients are returned exactly (trailing zeros trimmed);
    /// non-terminating quotients are rounded half-up at [`DIV_PRECISION`]
    /// significant digits.
    ///
    /// # Errors
    /// Returns [`DivideByZero`] when `other` is zero.
    pub fn checked_div(&self, other: &Self) -> Result<Self, DivideByZero> {
        if other.coefficient.is_zero() {
            return Err(DivideByZero);
        }
        if self.coefficient.is_zero() {
            return Ok(Self::zero());
        }

        let num_digits = digit_count(&self.coefficient);
        let den_digits = digit_count(&other.coefficient);
        let shift = i64::from(DIV_PRECISION) + den_digits - num_digits;
        let shift = u32::try_from(shift.max(0)).unwrap_or(DIV_PRECISION);

        let scaled = &self.coefficient * BigInt::from(10u8).pow(shift);
        let (mut quotient, remainder) = scaled.div_rem(&other.coefficient);
        let mut exponent =
            i64::from(self.exponent) - i64::from(other.exponent) - i64::from(shift);

        if remainder.is_zero() {
            // Exact: trim trailing zeros so 1/2 renders as 0.5, not 0.5000…0.
            let ten = BigInt::from(10u8);
            while !quotient.is_zero() {
                let (q, r) = quotient.div_rem(&ten);
                if !r.is_zero() {
                    break;
                }
                quotient = q;
                exponent += 1;
            }
        } else if (&remainder.abs() * 2u8).cmp(&other.coefficient.abs()) != Ordering::Less {
            quotient += if quotient.is_negative() { -1 } else { 1 };
        }

        let exponent = i32::try_from(exponent).unwrap_or(i32::MIN);
        Ok(Self::new(quotient, exponent))
    }

    /// Rescales both coefficients to the smaller exponent.
    fn align(a: &Self, b: &Self) -> (BigInt, BigInt, i32) {
        match a.exponent.cmp(&b.exponent) {
            Ordering::Equal => (a.coefficient.clone(), b.coefficient.clone(), a.exponent),
            Ordering::Less => {
                let scale = BigInt::from(10u8).pow((b.exponent - a.exponent).unsigned_abs());
                (a.coefficient.clone(), &b.coefficient * scale, a.exponent)
            }
            Ordering::Greater => {
                let scale = BigInt::from(10u8).pow((a.exponent - b.exponent).unsigned_abs());
                (&a.coefficient * scale, b.coefficient.clone(), b.exponent)
            }
        }
    }

    /// Returns the value as `u64` when it is an exact non-negative integer in range.
    #[must_use]
    pub fn to_u64(&self) -> Option<u64> {
        if self.exponent < 0 {
            // Could still be integral with trailing zeros; normalize first.
            let ten = BigInt::from(10u8);
            let mut coefficient = self.coefficient.clone();
            for _ in self.exponent..0 {
                let (q, r) = coefficient.div_rem(&ten);
                if !r.is_zero() {
                    return None;
                }
                coefficient = q;
            }
            return coefficient.to_u64();
        }
        let scaled = &self.coefficient * BigInt::from(10u8).pow(self.exponent.unsigned_abs());
        scaled.to_u64()
    }
}

/// Number of decimal digits in the magnitude of `n` (0 counts as 1).
fn digit_count(n: &BigInt) -> i64 {
    let digits = n.abs().to_str_radix(10);
    digits.len() as i64
}

impl PartialEq for Decimal {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Decimal {}

impl PartialOrd for Decimal {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Decimal {
    fn cmp(&self, other: &Self) -> Ordering {
        let (a, b, _) = Self::align(self, other);
        a.cmp(&b)
    }
}

impl fmt::Display for Decimal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.exponent >= 0 {
            write!(f, "{}", &self.coefficient)?;
            for _ in 0..self.exponent {
                f.write_str("0")?;
            }
            return Ok(());
        }

        let digits = self.coefficient.abs().to_str_radix(10);
        let point = self.exponent.unsigned_abs() as usize;
        if self.coefficient.is_negative() {
            f.write_str("-")?;
        }
        if digits.len() > point {
            let (int_part, frac_part) = digits.split_at(digits.len() - point);
            write!(f, "{int_part}.{frac_part}")
        } else {
            write!(f, "0.{}{digits}", "0".repeat(point - digits.len()))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dec(s: &str) -> Decimal {
        Decimal::parse(s).unwrap()
    }

    #[test]
    fn parse_and_display() {
        assert_eq!(dec("123").to_string(), "123");
        assert_eq!(dec("-12.50").to_string(), "-12.50");
        assert_eq!(dec("0.05").to_string(), "0.05");
        assert_eq!(dec("1.23e2").to_string(), "123");
        assert_eq!(dec("1.23e-4").to_string(), "0.000123");
        assert_eq!(dec(".5").to_string(), "0.5");
        assert!(Decimal::parse("abc").is_err());
        assert!(Decimal::parse("1.2.3").is_err());
    }

    #[test]
    fn parse_radix() {
        assert_eq!(Decimal::parse_radix("ff", 16).unwrap(), dec("255"));
        assert_eq!(Decimal::parse_radix("101", 2).unwrap(), dec("5"));
        assert_eq!(Decimal::parse_radix("17", 8).unwrap(), dec("15"));
        assert!(Decimal::parse_radix("g", 16).is_err());
    }

    #[test]
    fn arithmetic_preserves_precision() {
        assert_eq!(dec("0.1").add(&dec("0.2")), dec("0.3"));
        assert_eq!(dec("1.50").add(&dec("0.25")).to_string(), "1.75");
        assert_eq!(dec("2").mul(&dec("3.5")).to_string(), "7.0");
        assert_eq!(dec("10").sub(&dec("0.001")).to_string(), "9.999");
    }

    #[test]
    fn division() {
        assert_eq!(dec("1").checked_div(&dec("2")).unwrap().to_string(), "0.5");
        assert_eq!(dec("10").checked_div(&dec("4")).unwrap().to_string(), "2.5");
        assert_eq!(dec("1").checked_div(&dec("0")), Err(DivideByZero));
        // Non-terminating quotient rounds at DIV_PRECISION significant digits.
        let third = dec("1").checked_div(&dec("3")).unwrap();
        assert_eq!(third.to_string(), format!("0.{}", "3".repeat(28)));
    }

    #[test]
    fn ordering_ignores_scale() {
        assert_eq!(dec("1.0"), dec("1"));
        assert!(dec("2") > dec("1.999"));
        assert!(dec("-3") < dec("0"));
    }

    #[test]
    fn to_u64() {
        assert_eq!(dec("42").to_u64(), Some(42));
        assert_eq!(dec("4.20e1").to_u64(), Some(42));
        assert_eq!(dec("4.2").to_u64(), None);
        assert_eq!(dec("-1").to_u64(), None);
    }
}
