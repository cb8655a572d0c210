//! Decimal arithmetic under NUMERIC DIGITS / FUZZ / FORM.
//!
//! Operands are rounded to DIGITS before use and results are rounded
//! half-up to DIGITS. DIGITS is capped at [`MAX_DIGITS`] so every rounded
//! coefficient fits in 64 bits and intermediate products fit in a `u128`.

use std::cmp::Ordering;

pub const MAX_DIGITS: usize = 18;
pub const DEFAULT_DIGITS: usize = 9;
/// Largest magnitude of the exponent of a number in exponential form.
pub const MAX_EXPONENT: i64 = 999_999_999;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum NumericForm {
    #[default]
    Scientific,
    Engineering,
}

impl NumericForm {
    pub fn name(self) -> &'static str {
        match self {
            NumericForm::Scientific => "SCIENTIFIC",
            NumericForm::Engineering => "ENGINEERING",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NumericSettings {
    pub digits: usize,
    pub fuzz: usize,
    pub form: NumericForm,
}

impl Default for NumericSettings {
    fn default() -> Self {
        Self {
            digits: DEFAULT_DIGITS,
            fuzz: 0,
            form: NumericForm::Scientific,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticError {
    DivideByZero,
    /// Integer division or remainder whose quotient needs more than DIGITS.
    IntegerOverflow,
    /// Result exponent above [`MAX_EXPONENT`].
    Overflow,
    /// Result exponent below `-MAX_EXPONENT`.
    Underflow,
}

/// `(-1)^negative * coefficient * 10^exponent`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RexxNumber {
    pub negative: bool,
    pub coefficient: u128,
    pub exponent: i64,
}

/// Result of parsing a numeric string against a DIGITS setting.
#[derive(Debug, Clone, Copy)]
pub struct ParsedNumber {
    pub number: RexxNumber,
    /// The string carried more significant digits than DIGITS.
    pub lost_digits: bool,
}

fn pow10(n: u32) -> Option<u128> {
    10u128.checked_pow(n)
}

fn digit_count(mut n: u128) -> usize {
    let mut count = 1;
    while n >= 10 {
        n /= 10;
        count += 1;
    }
    count
}

/// Exponent as it would appear in scientific notation.
fn adjusted_exponent(coefficient: u128, exponent: i64) -> i64 {
    if coefficient == 0 {
        exponent
    } else {
        exponent.saturating_add(digit_count(coefficient) as i64 - 1)
    }
}

/// Rounds a coefficient half-up to `digits` significant digits.
fn round_coefficient(coefficient: u128, exponent: i64, digits: usize) -> (u128, i64) {
    let n = digit_count(coefficient);
    if coefficient == 0 || n <= digits {
        return (coefficient, exponent);
    }
    let drop = (n - digits) as u32;
    let Some(divisor) = pow10(drop) else {
        return (0, exponent);
    };
    let mut q = coefficient / divisor;
    let r = coefficient % divisor;
    let mut exponent = exponent.saturating_add(drop as i64);
    if r * 2 >= divisor {
        q += 1;
        if digit_count(q) > digits {
            q /= 10;
            exponent += 1;
        }
    }
    (q, exponent)
}

impl RexxNumber {
    pub const ZERO: RexxNumber = RexxNumber {
        negative: false,
        coefficient: 0,
        exponent: 0,
    };

    pub fn from_i64(n: i64) -> Self {
        Self {
            negative: n < 0,
            coefficient: n.unsigned_abs() as u128,
            exponent: 0,
        }
    }

    pub fn is_zero(&self) -> bool {
        self.coefficient == 0
    }

    /// Parses REXX number syntax: optional blanks and sign, digits with an
    /// optional decimal point, an optional exponent.
    pub fn parse(text: &str, digits: usize) -> Option<ParsedNumber> {
        let text = text.trim_matches([' ', '\t']);
        let (negative, rest) = match text.as_bytes().first()? {
            b'-' => (true, text[1..].trim_start_matches([' ', '\t'])),
            b'+' => (false, text[1..].trim_start_matches([' ', '\t'])),
            _ => (false, text),
        };

        let (mantissa, exp_part) = match rest.find(['e', 'E']) {
            Some(pos) => (&rest[..pos], Some(&rest[pos + 1..])),
            None => (rest, None),
        };

        let mut significant: Vec<u8> = Vec::new();
        let mut exponent: i64 = 0;
        let mut seen_point = false;
        let mut seen_digit = false;
        for b in mantissa.bytes() {
            match b {
                b'0'..=b'9' => {
                    seen_digit = true;
                    if !(significant.is_empty() && b == b'0') {
                        significant.push(b - b'0');
                    }
                    if seen_point {
                        exponent -= 1;
                    }
                }
                b'.' if !seen_point => seen_point = true,
                _ => return None,
            }
        }
        if !seen_digit {
            return None;
        }
        if let Some(exp) = exp_part {
            let (sign, digits_part) = match exp.as_bytes().first()? {
                b'-' => (-1, &exp[1..]),
                b'+' => (1, &exp[1..]),
                _ => (1, exp),
            };
            if digits_part.is_empty() || !digits_part.bytes().all(|b| b.is_ascii_digit()) {
                return None;
            }
            let value: i64 = digits_part.parse().ok()?;
            exponent = exponent.checked_add(sign * value)?;
        }

        let lost_digits = significant.len() > digits;
        let number = if significant.is_empty() {
            RexxNumber {
                negative: false,
                coefficient: 0,
                exponent: exponent.min(0),
            }
        } else {
            let keep = significant.len().min(digits);
            let mut coefficient: u128 = 0;
            for &d in &significant[..keep] {
                coefficient = coefficient * 10 + d as u128;
            }
            let mut exponent = exponent.checked_add((significant.len() - keep) as i64)?;
            if keep < significant.len() && significant[keep] >= 5 {
                coefficient += 1;
                if digit_count(coefficient) > digits {
                    coefficient /= 10;
                    exponent += 1;
                }
            }
            RexxNumber {
                negative,
                coefficient,
                exponent,
            }
        };
        let adjusted = adjusted_exponent(number.coefficient, number.exponent);
        if !(-MAX_EXPONENT..=MAX_EXPONENT).contains(&adjusted) {
            return None;
        }
        Some(ParsedNumber {
            number,
            lost_digits,
        })
    }

    fn rounded(self, digits: usize) -> Self {
        let (coefficient, exponent) = round_coefficient(self.coefficient, self.exponent, digits);
        Self {
            negative: self.negative && coefficient != 0,
            coefficient,
            exponent,
        }
    }

    pub fn negate(self) -> Self {
        Self {
            negative: !self.negative && self.coefficient != 0,
            ..self
        }
    }

    /// Checks the exponent of an operation's result against the limits.
    fn checked(self) -> Result<Self, ArithmeticError> {
        if self.coefficient == 0 {
            return Ok(Self {
                negative: false,
                coefficient: 0,
                exponent: self.exponent.clamp(-MAX_EXPONENT, MAX_EXPONENT),
            });
        }
        let adjusted = adjusted_exponent(self.coefficient, self.exponent);
        if adjusted > MAX_EXPONENT {
            Err(ArithmeticError::Overflow)
        } else if adjusted < -MAX_EXPONENT {
            Err(ArithmeticError::Underflow)
        } else {
            Ok(self)
        }
    }

    pub fn add(self, other: RexxNumber, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        self.sum(other, digits).checked()
    }

    pub fn subtract(self, other: RexxNumber, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        self.sum(other.negate(), digits).checked()
    }

    /// Rounded sum with no limit on the result exponent.
    fn sum(self, other: RexxNumber, digits: usize) -> RexxNumber {
        if self.is_zero() && other.is_zero() {
            return RexxNumber {
                negative: false,
                coefficient: 0,
                exponent: self.exponent.min(other.exponent),
            };
        }
        if other.is_zero() && other.exponent >= self.exponent {
            return self.rounded(digits);
        }
        if self.is_zero() && self.exponent >= other.exponent {
            return other.rounded(digits);
        }

        let (high, mut low) = if self.exponent >= other.exponent {
            (self, other)
        } else {
            (other, self)
        };
        let mut diff = high.exponent.abs_diff(low.exponent);
        if diff > 20 {
            let k = diff - 20;
            let reduced = match pow10(k.min(u32::MAX as u64) as u32) {
                Some(p) => {
                    let mut q = low.coefficient / p;
                    if low.coefficient % p != 0 && q % 10 == 0 {
                        q += 1;
                    }
                    q
                }
                None => u128::from(low.coefficient != 0),
            };
            low.coefficient = reduced;
            low.exponent = low.exponent.saturating_add(k as i64);
            diff = 20;
        }
        let scaled = high.coefficient * pow10(diff as u32).unwrap_or(1);
        let (coefficient, negative) = if high.negative == low.negative {
            (scaled + low.coefficient, high.negative)
        } else if scaled >= low.coefficient {
            (scaled - low.coefficient, high.negative)
        } else {
            (low.coefficient - scaled, low.negative)
        };
        RexxNumber {
            negative: negative && coefficient != 0,
            coefficient,
            exponent: low.exponent,
        }
        .rounded(digits)
    }

    pub fn multiply(self, other: RexxNumber, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        let coefficient = self.coefficient * other.coefficient;
        let exponent = self
            .exponent
            .checked_add(other.exponent)
            .ok_or(ArithmeticError::Overflow)?;
        RexxNumber {
            negative: (self.negative != other.negative) && coefficient != 0,
            coefficient,
            exponent,
        }
        .rounded(digits)
        .checked()
    }

    pub fn divide(self, other: RexxNumber, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        if other.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        if self.is_zero() {
            return Ok(RexxNumber::ZERO);
        }
        let shift = (digits as i64 + 1 + digit_count(other.coefficient) as i64
            - digit_count(self.coefficient) as i64)
            .max(0) as u32;
        let numerator = self.coefficient * pow10(shift).unwrap_or(1);
        let quotient = numerator / other.coefficient;
        let mut result = RexxNumber {
            negative: self.negative != other.negative,
            coefficient: quotient,
            exponent: self.exponent.saturating_sub(other.exponent).saturating_sub(shift as i64),
        }
        .rounded(digits);
        while result.coefficient != 0 && result.coefficient % 10 == 0 {
            result.coefficient /= 10;
            result.exponent = result.exponent.saturating_add(1);
        }
        result.checked()
    }

    /// Exact integer quotient and remainder at a common exponent.
    fn integer_parts(
        self,
        other: RexxNumber,
        digits: usize,
    ) -> Result<(u128, u128, i64), ArithmeticError> {
        if other.is_zero() {
            return Err(ArithmeticError::DivideByZero);
        }
        let exponent = self.exponent.min(other.exponent);
        let scale = |n: RexxNumber| {
            let shift = u32::try_from(n.exponent.checked_sub(exponent)?).ok()?;
            n.coefficient.checked_mul(pow10(shift)?)
        };
        let Some(divisor) = scale(other) else {
            return Ok((0, self.coefficient, self.exponent));
        };
        let Some(dividend) = scale(self) else {
            return Err(ArithmeticError::IntegerOverflow);
        };
        let quotient = dividend / divisor;
        if quotient != 0 && digit_count(quotient) > digits {
            return Err(ArithmeticError::IntegerOverflow);
        }
        Ok((quotient, dividend - quotient * divisor, exponent))
    }

    pub fn integer_divide(
        self,
        other: RexxNumber,
        digits: usize,
    ) -> Result<RexxNumber, ArithmeticError> {
        let (quotient, _, _) = self.integer_parts(other, digits)?;
        Ok(RexxNumber {
            negative: (self.negative != other.negative) && quotient != 0,
            coefficient: quotient,
            exponent: 0,
        })
    }

    /// Remainder of integer division; takes the sign of the dividend.
    pub fn remainder(self, other: RexxNumber, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        let (_, remainder, exponent) = self.integer_parts(other, digits)?;
        Ok(RexxNumber {
            negative: self.negative && remainder != 0,
            coefficient: remainder,
            exponent,
        }
        .rounded(digits))
    }

    pub fn power(self, exponent: i64, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        let result = self.unsigned_power(exponent.unsigned_abs(), digits);
        if exponent >= 0 {
            return result;
        }
        match result {
            Ok(result) => RexxNumber::from_i64(1).divide(result, digits),
            Err(ArithmeticError::Overflow) => Err(ArithmeticError::Underflow),
            Err(ArithmeticError::Underflow) => Err(ArithmeticError::Overflow),
            Err(err) => Err(err),
        }
    }

    /// Powers are computed two digits wider than DIGITS, then rounded.
    fn unsigned_power(self, mut n: u64, digits: usize) -> Result<RexxNumber, ArithmeticError> {
        let working = (digits + 2).min(MAX_DIGITS);
        let mut result = RexxNumber::from_i64(1);
        let mut base = self.rounded(working);
        while n > 0 {
            if n & 1 == 1 {
                result = result.multiply(base, working)?;
            }
            n >>= 1;
            if n > 0 {
                base = base.multiply(base, working)?;
            }
        }
        Ok(result.rounded(digits))
    }

    /// Numeric comparison with FUZZ applied.
    pub fn compare(self, other: RexxNumber, settings: &NumericSettings) -> Ordering {
        let precision = settings.digits.saturating_sub(settings.fuzz).max(1);
        let difference = self
            .rounded(precision)
            .sum(other.rounded(precision).negate(), precision);
        if difference.is_zero() {
            Ordering::Equal
        } else if difference.negative {
            Ordering::Less
        } else {
            Ordering::Greater
        }
    }

    /// Value as a whole number, if it has no fractional part.
    pub fn to_i64(&self) -> Option<i64> {
        let magnitude = if self.exponent >= 0 {
            self.coefficient
                .checked_mul(pow10(u32::try_from(self.exponent).ok()?)?)?
        } else {
            let divisor = pow10(u32::try_from(-self.exponent).ok()?).unwrap_or(u128::MAX);
            if self.coefficient % divisor != 0 {
                return None;
            }
            self.coefficient / divisor
        };
        let magnitude = i64::try_from(magnitude).ok()?;
        Some(if self.negative { -magnitude } else { magnitude })
    }

    pub fn to_f64(&self) -> f64 {
        let magnitude = self.coefficient as f64 * 10f64.powi(self.exponent as i32);
        if self.negative { -magnitude } else { magnitude }
    }

    /// REXX string form under the given DIGITS and FORM.
    pub fn format(&self, digits: usize, form: NumericForm) -> String {
        if self.coefficient == 0 {
            return "0".to_string();
        }
        let coefficient = self.coefficient.to_string();
        let n = coefficient.len() as i64;
        let e = self.exponent;
        let sign = if self.negative { "-" } else { "" };

        if e >= 0 && n + e <= digits as i64 {
            return format!("{sign}{coefficient}{}", "0".repeat(e as usize));
        }
        if e < 0 && -e <= 2 * digits as i64 {
            let point = n + e;
            return if point > 0 {
                let (int, frac) = coefficient.split_at(point as usize);
                format!("{sign}{int}.{frac}")
            } else {
                format!("{sign}0.{}{coefficient}", "0".repeat((-point) as usize))
            };
        }

        let adjusted = n + e - 1;
        let (leading, exp) = match form {
            NumericForm::Scientific => (1, adjusted),
            NumericForm::Engineering => {
                let r = adjusted.rem_euclid(3);
                (r + 1, adjusted - r)
            }
        };
        let mut mantissa = coefficient;
        while (mantissa.len() as i64) < leading {
            mantissa.push('0');
        }
        let (int, frac) = mantissa.split_at(leading as usize);
        let frac = if frac.is_empty() {
            String::new()
        } else {
            format!(".{frac}")
        };
        let exp_sign = if exp < 0 { '-' } else { '+' };
        format!("{sign}{int}{frac}E{exp_sign}{}", exp.abs())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn num(s: &str) -> RexxNumber {
        RexxNumber::parse(s, 9).map(|p| p.number).unwrap_or(RexxNumber::ZERO)
    }

    fn fmt(n: RexxNumber) -> String {
        n.format(9, NumericForm::Scientific)
    }

    #[test]
    fn parses_rexx_number_syntax() {
        assert!(RexxNumber::parse(" - 12.5 ", 9).is_some());
        assert!(RexxNumber::parse("1e3", 9).is_some());
        assert!(RexxNumber::parse(".5", 9).is_some());
        assert!(RexxNumber::parse("1.2.3", 9).is_none());
        assert!(RexxNumber::parse("abc", 9).is_none());
        assert!(RexxNumber::parse("", 9).is_none());
        assert!(RexxNumber::parse("1e", 9).is_none());
        assert_eq!(fmt(num("1E3")), "1000");
        assert_eq!(fmt(num("-0012.50")), "-12.50");
    }

    #[test]
    fn addition_keeps_scale() {
        assert_eq!(fmt(num("1.50").add(num("1"), 9).unwrap()), "2.50");
        assert_eq!(fmt(num("0.00").add(num("1"), 9).unwrap()), "1.00");
        assert_eq!(fmt(num("5").subtract(num("7"), 9).unwrap()), "-2");
        assert_eq!(fmt(num("1E30").add(num("1"), 9).unwrap()), "1.00000000E+30");
    }

    #[test]
    fn division_rounds_and_strips() {
        assert_eq!(fmt(num("1").divide(num("3"), 9).unwrap_or(RexxNumber::ZERO)), "0.333333333");
        assert_eq!(fmt(num("2").divide(num("3"), 9).unwrap_or(RexxNumber::ZERO)), "0.666666667");
        assert_eq!(fmt(num("10").divide(num("4"), 9).unwrap_or(RexxNumber::ZERO)), "2.5");
        assert_eq!(num("1").divide(num("0"), 9), Err(ArithmeticError::DivideByZero));
    }

    #[test]
    fn integer_division_and_remainder() {
        assert_eq!(fmt(num("7").integer_divide(num("2"), 9).unwrap_or(RexxNumber::ZERO)), "3");
        assert_eq!(fmt(num("7").remainder(num("2"), 9).unwrap_or(RexxNumber::ZERO)), "1");
        assert_eq!(fmt(num("-7").remainder(num("2"), 9).unwrap_or(RexxNumber::ZERO)), "-1");
        assert_eq!(fmt(num("7.5").remainder(num("2"), 9).unwrap_or(RexxNumber::ZERO)), "1.5");
        assert_eq!(
            num("1E20").integer_divide(num("1"), 9),
            Err(ArithmeticError::IntegerOverflow)
        );
    }

    #[test]
    fn powers() {
        assert_eq!(fmt(num("2").power(10, 9).unwrap_or(RexxNumber::ZERO)), "1024");
        assert_eq!(fmt(num("2").power(-2, 9).unwrap_or(RexxNumber::ZERO)), "0.25");
        assert_eq!(fmt(num("7").power(0, 9).unwrap_or(RexxNumber::ZERO)), "1");
    }

    #[test]
    fn rounding_to_digits() {
        let parsed = RexxNumber::parse("1234567895", 9);
        assert!(parsed.is_some_and(|p| p.lost_digits));
        assert_eq!(fmt(num("1234567895")), "1.23456790E+9");
        assert_eq!(fmt(num("999999999").add(num("1"), 9).unwrap()), "1.00000000E+9");
        assert_eq!(num("123.45").format(4, NumericForm::Scientific), "123.45");
        assert_eq!(
            num("123.45").add(RexxNumber::ZERO, 4).unwrap().format(4, NumericForm::Scientific),
            "123.5"
        );
    }

    #[test]
    fn exponential_forms() {
        let big = num("12345").multiply(num("1E10"), 9).unwrap();
        assert_eq!(big.format(9, NumericForm::Scientific), "1.2345E+14");
        assert_eq!(big.format(9, NumericForm::Engineering), "123.45E+12");
        let tiny = num("1E-30");
        assert_eq!(tiny.format(9, NumericForm::Scientific), "1E-30");
    }

    #[test]
    fn fuzzy_comparison() {
        let settings = NumericSettings::default();
        assert_eq!(num("1.0").compare(num("1"), &settings), Ordering::Equal);
        assert_eq!(num("2").compare(num("10"), &settings), Ordering::Less);
        let fuzzy = NumericSettings {
            fuzz: 1,
            ..settings
        };
        assert_eq!(num("123456789").compare(num("123456788"), &settings), Ordering::Greater);
        assert_eq!(num("123456789").compare(num("123456788"), &fuzzy), Ordering::Equal);
    }

    #[test]
    fn whole_numbers() {
        assert_eq!(num("3.0").to_i64(), Some(3));
        assert_eq!(num("-12").to_i64(), Some(-12));
        assert_eq!(num("3.5").to_i64(), None);
        assert_eq!(num("1E3").to_i64(), Some(1000));
    }

    #[test]
    fn exponents_stay_within_limits() {
        assert!(RexxNumber::parse("1E999999999", 9).is_some());
        assert!(RexxNumber::parse("1E1000000000", 9).is_none());
        assert!(RexxNumber::parse("1E-1000000000", 9).is_none());
        assert!(RexxNumber::parse("1E5000000000000000000", 9).is_none());
        assert!(RexxNumber::parse("1E99999999999999999999", 9).is_none());

        let huge = num("1E999999999");
        let tiny = num("1E-999999999");
        assert_eq!(huge.add(tiny, 9).map(fmt), Ok("1.00000000E+999999999".to_string()));
        assert_eq!(huge.multiply(huge, 9), Err(ArithmeticError::Overflow));
        assert_eq!(tiny.multiply(tiny, 9), Err(ArithmeticError::Underflow));
        assert_eq!(tiny.divide(huge, 9), Err(ArithmeticError::Underflow));
        assert_eq!(num("9E999999999").add(num("9E999999999"), 9), Err(ArithmeticError::Overflow));
        assert_eq!(num("10").power(999_999_999_999, 9), Err(ArithmeticError::Overflow));
        assert_eq!(num("10").power(-999_999_999_999, 9), Err(ArithmeticError::Underflow));
        assert_eq!(huge.compare(tiny, &NumericSettings::default()), Ordering::Greater);
    }
}
