//! Dotted-quad address decoding.
//!
//! An [`Address`] is four independent 8-bit components. It is never packed
//! into a `u32`: the trie descends one component per level.
//!
//! # Octet policy
//!
//! Fields are parsed as signed 64-bit decimals (leading `+`/`-` allowed).
//! What happens to values outside `0..=255` is selected by [`OctetPolicy`]:
//!
//! | Policy | `"1.2.3.256"` | `"1.2.3.-1"` |
//! |--------|---------------|--------------|
//! | [`OctetPolicy::Truncate`] (default) | `1.2.3.0` | `1.2.3.255` |
//! | [`OctetPolicy::Strict`] | `OutOfRange` | `OutOfRange` |
//!
//! # Example
//!
//! ```rust
//! use uniqip::{Address, OctetPolicy, parse_address};
//!
//! let addr = parse_address("192.168.1.1", OctetPolicy::Strict).unwrap();
//! assert_eq!(addr, Address::new(192, 168, 1, 1));
//! assert_eq!(addr.to_string(), "192.168.1.1");
//! ```

use std::fmt as StdFmt;
use std::net::Ipv4Addr;
use std::str::FromStr;

use crate::error::ParseError;

/// Field separator.
const SEPARATOR: char = '.';

// ============================================================================
//  Address
// ============================================================================

/// A 4-component address, each component `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Address([u8; 4]);

impl Address {
    /// Build an address from its four components, most significant first.
    #[must_use]
    #[inline]
    pub const fn new(b0: u8, b1: u8, b2: u8, b3: u8) -> Self {
        Self([b0, b1, b2, b3])
    }

    /// Rejoin a first component with the three decoded by [`parse_rest`].
    #[must_use]
    #[inline]
    pub const fn from_parts(first: u8, rest: [u8; 3]) -> Self {
        Self([first, rest[0], rest[1], rest[2]])
    }

    /// All four components.
    #[must_use]
    #[inline]
    pub const fn octets(self) -> [u8; 4] {
        self.0
    }

    /// Component at `pos` (0 = leading, 3 = trailing).
    ///
    /// # Panics
    ///
    /// Panics if `pos > 3`.
    #[must_use]
    #[inline]
    pub const fn octet(self, pos: usize) -> u8 {
        self.0[pos]
    }
}

impl From<[u8; 4]> for Address {
    fn from(octets: [u8; 4]) -> Self {
        Self(octets)
    }
}

impl From<Address> for [u8; 4] {
    fn from(addr: Address) -> Self {
        addr.0
    }
}

impl From<Ipv4Addr> for Address {
    fn from(ip: Ipv4Addr) -> Self {
        Self(ip.octets())
    }
}

impl StdFmt::Display for Address {
    fn fmt(&self, f: &mut StdFmt::Formatter<'_>) -> StdFmt::Result {
        let [a, b, c, d] = self.0;
        write!(f, "{a}.{b}.{c}.{d}")
    }
}

impl FromStr for Address {
    type Err = ParseError;

    /// Parses with [`OctetPolicy::Strict`]; use [`parse_address`] to choose.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_address(s, OctetPolicy::Strict)
    }
}

// ============================================================================
//  OctetPolicy
// ============================================================================

/// Treatment of integer fields outside `0..=255`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OctetPolicy {
    /// Keep the low 8 bits (`256 → 0`, `-1 → 255`), matching the historical
    /// behavior of the counting tools this crate replaces.
    #[default]
    Truncate,

    /// Reject out-of-range fields with [`ParseError::OutOfRange`].
    Strict,
}

impl OctetPolicy {
    /// Decode one field.
    ///
    /// # Errors
    ///
    /// [`ParseError::InvalidOctet`] if `field` is not a decimal integer that
    /// fits in `i64`; [`ParseError::OutOfRange`] under `Strict` for values
    /// outside `0..=255`.
    #[inline]
    pub fn decode(self, field: &str) -> Result<u8, ParseError> {
        let value: i64 = field.parse().map_err(|_| ParseError::InvalidOctet {
            field: field.to_string(),
        })?;

        match self {
            Self::Truncate => Ok(low_byte(value)),
            Self::Strict => u8::try_from(value).map_err(|_| ParseError::OutOfRange { value }),
        }
    }
}

#[expect(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    reason = "truncation is the policy"
)]
#[inline]
const fn low_byte(value: i64) -> u8 {
    value as u8
}

// ============================================================================
//  Parsers
// ============================================================================

/// Split `text` into exactly `N` fields without allocating.
fn split_fields<const N: usize>(text: &str) -> Result<[&str; N], ParseError> {
    let mut fields = [""; N];
    let mut found = 0;

    for field in text.split(SEPARATOR) {
        if found < N {
            fields[found] = field;
        }
        found += 1;
    }

    if found == N {
        Ok(fields)
    } else {
        Err(ParseError::FieldCount { expected: N, found })
    }
}

fn decode_fields<const N: usize>(text: &str, policy: OctetPolicy) -> Result<[u8; N], ParseError> {
    let fields = split_fields::<N>(text)?;
    let mut out = [0u8; N];
    for (slot, field) in out.iter_mut().zip(fields) {
        *slot = policy.decode(field)?;
    }
    Ok(out)
}

/// Decode a full dotted-quad line.
///
/// # Errors
///
/// [`ParseError::FieldCount`] unless the line has exactly four fields,
/// otherwise whatever [`OctetPolicy::decode`] reports for the first bad field.
#[inline]
pub fn parse_address(line: &str, policy: OctetPolicy) -> Result<Address, ParseError> {
    decode_fields::<4>(line, policy).map(Address)
}

/// Decode the three trailing fields left over by [`parse_partial`].
///
/// # Errors
///
/// Same contract as [`parse_address`], for exactly three fields.
#[inline]
pub fn parse_rest(rest: &str, policy: OctetPolicy) -> Result<[u8; 3], ParseError> {
    decode_fields::<3>(rest, policy)
}

/// First component decoded, remainder still text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PartialAddress<'a> {
    /// The leading component.
    pub first: u8,
    /// Everything after the first separator, e.g. `"2.3.4"` for `"1.2.3.4"`.
    pub rest: &'a str,
}

impl PartialAddress<'_> {
    /// Finish decoding with [`parse_rest`].
    ///
    /// # Errors
    ///
    /// Same errors [`parse_address`] reports for the whole line: field
    /// counts include the leading component already consumed.
    #[inline]
    pub fn complete(&self, policy: OctetPolicy) -> Result<Address, ParseError> {
        parse_rest(self.rest, policy)
            .map(|rest| Address::from_parts(self.first, rest))
            .map_err(|err| match err {
                ParseError::FieldCount { expected, found } => ParseError::FieldCount {
                    expected: expected + 1,
                    found: found + 1,
                },
                other => other,
            })
    }
}

/// Decode only the leading component, for routing before the full decode.
///
/// # Errors
///
/// [`ParseError::FieldCount`] if the line has no separator at all, otherwise
/// whatever [`OctetPolicy::decode`] reports for the leading field.
#[inline]
pub fn parse_partial(line: &str, policy: OctetPolicy) -> Result<PartialAddress<'_>, ParseError> {
    let Some((first, rest)) = line.split_once(SEPARATOR) else {
        return Err(ParseError::FieldCount {
            expected: 4,
            found: 1,
        });
    };

    Ok(PartialAddress {
        first: policy.decode(first)?,
        rest,
    })
}

#[cfg(test)]
#[expect(clippy::unwrap_used, reason = "Fail fast in tests")]
mod tests {
    use super::*;

    #[test]
    fn test_parse_basic() {
        let addr = parse_address("192.168.1.1", OctetPolicy::Truncate).unwrap();
        assert_eq!(addr.octets(), [192, 168, 1, 1]);
        assert_eq!(addr.octet(3), 1);
    }

    #[test]
    fn test_wrong_field_count() {
        assert_eq!(
            parse_address("1.2.3", OctetPolicy::Truncate),
            Err(ParseError::FieldCount {
                expected: 4,
                found: 3
            })
        );
        assert_eq!(
            parse_address("1.2.3.4.5", OctetPolicy::Truncate),
            Err(ParseError::FieldCount {
                expected: 4,
                found: 5
            })
        );
        assert_eq!(
            parse_address("1.2.3.4.", OctetPolicy::Strict),
            Err(ParseError::FieldCount {
                expected: 4,
                found: 5
            })
        );
    }

    #[test]
    fn test_non_numeric_field() {
        let err = parse_address("1.x.3.4", OctetPolicy::Truncate).unwrap_err();
        assert_eq!(
            err,
            ParseError::InvalidOctet {
                field: "x".to_string()
            }
        );

        assert!(parse_address("1..3.4", OctetPolicy::Truncate).is_err());
        assert!(parse_address(" 1.2.3.4", OctetPolicy::Truncate).is_err());
    }

    #[test]
    fn test_truncate_policy_wraps_out_of_range() {
        assert_eq!(
            parse_address("1.2.3.256", OctetPolicy::Truncate).unwrap(),
            Address::new(1, 2, 3, 0)
        );
        assert_eq!(
            parse_address("1.2.3.-1", OctetPolicy::Truncate).unwrap(),
            Address::new(1, 2, 3, 255)
        );
        assert_eq!(
            parse_address("+1.2.3.513", OctetPolicy::Truncate).unwrap(),
            Address::new(1, 2, 3, 1)
        );
    }

    #[test]
    fn test_strict_policy_rejects_out_of_range() {
        assert_eq!(
            parse_address("1.2.3.256", OctetPolicy::Strict),
            Err(ParseError::OutOfRange { value: 256 })
        );
        assert_eq!(
            parse_address("1.2.3.-1", OctetPolicy::Strict),
            Err(ParseError::OutOfRange { value: -1 })
        );
        assert!(parse_address("0.0.0.255", OctetPolicy::Strict).is_ok());
    }

    #[test]
    fn test_integer_overflow_is_invalid_under_both_policies() {
        let line = "1.2.3.99999999999999999999";
        assert!(matches!(
            parse_address(line, OctetPolicy::Truncate),
            Err(ParseError::InvalidOctet { .. })
        ));
        assert!(matches!(
            parse_address(line, OctetPolicy::Strict),
            Err(ParseError::InvalidOctet { .. })
        ));
    }

    #[test]
    fn test_partial_then_rest() {
        let partial = parse_partial("10.20.30.40", OctetPolicy::Strict).unwrap();
        assert_eq!(partial.first, 10);
        assert_eq!(partial.rest, "20.30.40");
        assert_eq!(
            partial.complete(OctetPolicy::Strict).unwrap(),
            Address::new(10, 20, 30, 40)
        );
    }

    #[test]
    fn test_partial_rest_is_revalidated() {
        let partial = parse_partial("10.20.30", OctetPolicy::Strict).unwrap();
        assert_eq!(
            partial.complete(OctetPolicy::Strict),
            Err(ParseError::FieldCount {
                expected: 4,
                found: 3
            })
        );
    }

    #[test]
    fn test_partial_errors_match_full_parse() {
        for line in ["1.2.3", "1.2", "1.2.3.4.5", "1..2.3", "1.2.x.4", "1.2.3.999"] {
            let full = parse_address(line, OctetPolicy::Strict);
            let split = parse_partial(line, OctetPolicy::Strict)
                .and_then(|partial| partial.complete(OctetPolicy::Strict));
            assert_eq!(split, full, "{line}");
        }
    }

    #[test]
    fn test_partial_without_separator() {
        assert!(matches!(
            parse_partial("10", OctetPolicy::Truncate),
            Err(ParseError::FieldCount { found: 1, .. })
        ));
    }

    #[test]
    fn test_display_and_from_str() {
        let addr: Address = "0.255.7.128".parse().unwrap();
        assert_eq!(addr.to_string(), "0.255.7.128");
        assert_eq!(Address::from(Ipv4Addr::new(0, 255, 7, 128)), addr);
    }
}
