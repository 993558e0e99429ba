//! Fixed-point money types.
//!
//! # Motivation
//!
//! All monetary amounts in this system use a 1e-4 fixed-point representation
//! stored as `i64`.  Using raw `i64` for money is error-prone: it allows
//! accidental arithmetic with unrelated integers (versions, retry counters,
//! row ids) without any compile-time signal.
//!
//! `Amount` wraps the raw `i64` so the type system prevents:
//! - Implicit construction from raw `i64` (no `From<i64>` impl).
//! - Mixing `Amount` with unrelated `i64` values in arithmetic.
//!
//! # Scale
//!
//! 1 major unit = 10_000 minor units (`"1.0000"`).  This matches the
//! `NUMERIC(19,4)` columns in the ledger schema; the canonical string form
//! produced by `Display` is what crosses the driver and the wire.
//!
//! # Arithmetic
//!
//! Balance mutation in the ledger must never silently wrap, so the only
//! arithmetic offered is `checked_add` / `checked_sub` returning `Option`.
//! Callers handle `None` explicitly; overflow in a balance calculation is a
//! critical error, not a routine saturation.

use std::fmt;
use std::str::FromStr;

/// Minor units per major unit (scale 4).
pub const MINOR_PER_MAJOR: i64 = 10_000;

/// Number of fractional digits in the canonical string form.
pub const SCALE: u32 = 4;

// ---------------------------------------------------------------------------
// Amount newtype
// ---------------------------------------------------------------------------

/// A fixed-point monetary amount at 1e-4 scale.
///
/// `"100.00"` parses to `Amount::from_minor(1_000_000)`.
///
/// # Construction
///
/// Use [`Amount::from_minor`] or [`Amount::parse`].  There is intentionally
/// no `From<i64>` implementation — callers must be deliberate about when a
/// raw integer represents a monetary amount.
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Amount(i64);

impl Amount {
    /// Zero monetary amount.
    pub const ZERO: Amount = Amount(0);

    /// Construct from raw minor units (1e-4 scale).
    #[inline]
    pub const fn from_minor(minor: i64) -> Self {
        Amount(minor)
    }

    /// Extract the raw minor-unit count.
    #[inline]
    pub const fn minor(self) -> i64 {
        self.0
    }

    /// `true` if this amount is strictly greater than zero.
    #[inline]
    pub fn is_positive(self) -> bool {
        self.0 > 0
    }

    /// Checked addition.  `None` on `i64` overflow.
    #[inline]
    pub fn checked_add(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Amount)
    }

    /// Checked subtraction.  `None` on `i64` underflow.
    #[inline]
    pub fn checked_sub(self, rhs: Amount) -> Option<Amount> {
        self.0.checked_sub(rhs.0).map(Amount)
    }

    /// Parse a decimal string at scale ≤ 4 (`"100"`, `"100.5"`, `"100.0001"`).
    ///
    /// Rejects: empty input, signs, exponents, group separators, more than 4
    /// fraction digits, and values that overflow `i64` minor units.  Zero is
    /// accepted — the transfer engine layers its own strictly-positive check
    /// on top, while balance decoding legitimately sees `"0.0000"`.
    pub fn parse(s: &str) -> Result<Amount, AmountParseError> {
        let (int_part, frac_part) = match s.split_once('.') {
            // A trailing dot ("1.") is malformed, not an empty fraction.
            Some((_, "")) => return Err(AmountParseError::Malformed),
            Some((i, f)) => (i, f),
            None => (s, ""),
        };

        if int_part.is_empty() || !int_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }
        if frac_part.len() > SCALE as usize || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(AmountParseError::Malformed);
        }

        let major: i64 = int_part.parse().map_err(|_| AmountParseError::Overflow)?;

        // Right-pad the fraction to exactly 4 digits: "5" -> 5000 minor.
        let mut frac: i64 = 0;
        if !frac_part.is_empty() {
            frac = frac_part.parse().map_err(|_| AmountParseError::Malformed)?;
            for _ in frac_part.len()..SCALE as usize {
                frac *= 10;
            }
        }

        major
            .checked_mul(MINOR_PER_MAJOR)
            .and_then(|m| m.checked_add(frac))
            .map(Amount)
            .ok_or(AmountParseError::Overflow)
    }
}

impl FromStr for Amount {
    type Err = AmountParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Amount::parse(s)
    }
}

/// Canonical form: always 4 fraction digits (`"900.0000"`).
impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let major = self.0 / MINOR_PER_MAJOR;
        let frac = (self.0 % MINOR_PER_MAJOR).abs();
        // When |value| < 1 major unit and negative, `major` truncates to 0,
        // losing the sign.  Emit "-0" explicitly in that case.
        if self.0 < 0 && major == 0 {
            write!(f, "-{major}.{frac:04}")
        } else {
            write!(f, "{major}.{frac:04}")
        }
    }
}

/// Why an amount string failed to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AmountParseError {
    /// Not a plain unsigned decimal with at most 4 fraction digits.
    Malformed,
    /// Syntactically valid but outside the representable range.
    Overflow,
}

impl fmt::Display for AmountParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AmountParseError::Malformed => {
                write!(f, "amount must be an unsigned decimal with scale <= 4")
            }
            AmountParseError::Overflow => write!(f, "amount out of representable range"),
        }
    }
}

impl std::error::Error for AmountParseError {}

// ---------------------------------------------------------------------------
// Currency code
// ---------------------------------------------------------------------------

/// A 3-letter uppercase currency code (`"USD"`).
///
/// Stored inline as 3 bytes; validated on construction so every held value
/// is well-formed.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Currency([u8; 3]);

impl Currency {
    /// Parse a currency code: exactly 3 ASCII uppercase letters.
    pub fn parse(s: &str) -> Result<Currency, CurrencyParseError> {
        let bytes = s.as_bytes();
        if bytes.len() != 3 || !bytes.iter().all(|b| b.is_ascii_uppercase()) {
            return Err(CurrencyParseError);
        }
        Ok(Currency([bytes[0], bytes[1], bytes[2]]))
    }

    /// The code as a string slice.
    pub fn as_str(&self) -> &str {
        // Construction admits only ASCII uppercase, which is valid UTF-8.
        std::str::from_utf8(&self.0).expect("currency bytes are ASCII")
    }
}

impl FromStr for Currency {
    type Err = CurrencyParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Currency::parse(s)
    }
}

impl fmt::Display for Currency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The input was not exactly 3 ASCII uppercase letters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrencyParseError;

impl fmt::Display for CurrencyParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "currency must be exactly 3 uppercase letters")
    }
}

impl std::error::Error for CurrencyParseError {}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_integer_amount() {
        assert_eq!(Amount::parse("100").unwrap(), Amount::from_minor(1_000_000));
    }

    #[test]
    fn parse_two_decimal_amount() {
        assert_eq!(
            Amount::parse("100.00").unwrap(),
            Amount::from_minor(1_000_000)
        );
        assert_eq!(Amount::parse("99.99").unwrap(), Amount::from_minor(999_900));
    }

    #[test]
    fn parse_pads_short_fraction() {
        // "1.5" means 1.5000, not 1.0005.
        assert_eq!(Amount::parse("1.5").unwrap(), Amount::from_minor(15_000));
    }

    #[test]
    fn parse_full_scale_fraction() {
        assert_eq!(Amount::parse("0.0001").unwrap(), Amount::from_minor(1));
    }

    #[test]
    fn parse_zero_is_accepted() {
        assert_eq!(Amount::parse("0").unwrap(), Amount::ZERO);
        assert!(!Amount::ZERO.is_positive());
    }

    #[test]
    fn parse_rejects_scale_five() {
        assert_eq!(
            Amount::parse("1.00001").unwrap_err(),
            AmountParseError::Malformed
        );
    }

    #[test]
    fn parse_rejects_signs_and_garbage() {
        for bad in ["-1", "+1", "", ".", "1.", ".5", "1,000", "1e3", "abc", "1.2.3"] {
            assert!(Amount::parse(bad).is_err(), "expected reject: {bad:?}");
        }
    }

    #[test]
    fn parse_rejects_overflow() {
        assert_eq!(
            Amount::parse("99999999999999999999").unwrap_err(),
            AmountParseError::Overflow
        );
    }

    #[test]
    fn display_always_four_fraction_digits() {
        assert_eq!(Amount::from_minor(9_000_000).to_string(), "900.0000");
        assert_eq!(Amount::from_minor(1).to_string(), "0.0001");
        assert_eq!(Amount::ZERO.to_string(), "0.0000");
    }

    #[test]
    fn display_negative_below_one_keeps_sign() {
        assert_eq!(Amount::from_minor(-5_000).to_string(), "-0.5000");
    }

    #[test]
    fn display_parse_roundtrip() {
        let a = Amount::from_minor(12_345_678);
        assert_eq!(Amount::parse(&a.to_string()).unwrap(), a);
    }

    #[test]
    fn checked_add_detects_overflow() {
        let a = Amount::from_minor(i64::MAX);
        assert_eq!(a.checked_add(Amount::from_minor(1)), None);
        assert_eq!(
            Amount::from_minor(1).checked_add(Amount::from_minor(2)),
            Some(Amount::from_minor(3))
        );
    }

    #[test]
    fn checked_sub_detects_underflow() {
        let a = Amount::from_minor(i64::MIN);
        assert_eq!(a.checked_sub(Amount::from_minor(1)), None);
    }

    #[test]
    fn currency_parse_accepts_uppercase_triple() {
        assert_eq!(Currency::parse("USD").unwrap().as_str(), "USD");
    }

    #[test]
    fn currency_parse_rejects_bad_shapes() {
        for bad in ["usd", "US", "USDX", "U1D", "", "uS "] {
            assert!(Currency::parse(bad).is_err(), "expected reject: {bad:?}");
        }
    }
}
