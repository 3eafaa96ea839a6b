//! Literals encoded directly in a [`NodeId`].
//!
//! | type | datatype      | value                                      |
//! |------|---------------|--------------------------------------------|
//! | 1    | xsd:integer   | 56-bit two's complement                    |
//! | 2    | xsd:decimal   | scale u8 (bits 48..56), 48-bit signed unscaled |
//! | 3    | xsd:date      | year u16, month u4, day u5                 |
//! | 4    | xsd:boolean   | 0 or 1                                     |
//!
//! A literal is inlined only if decoding the id gives back exactly the
//! same lexical form, so inlining never changes a term.

use crate::node::node_id::NodeId;
use crate::node::term::{xsd, Literal, Term};

const TYPE_INTEGER: u8 = 1;
const TYPE_DECIMAL: u8 = 2;
const TYPE_DATE: u8 = 3;
const TYPE_BOOLEAN: u8 = 4;

const INTEGER_MIN: i64 = -(1 << 55);
const INTEGER_MAX: i64 = (1 << 55) - 1;
const UNSCALED_MIN: i64 = -(1 << 47);
const UNSCALED_MAX: i64 = (1 << 47) - 1;
const UNSCALED_MASK: u64 = (1 << 48) - 1;

/// Inline id for `term`, if it has one.
pub fn encode(term: &Term) -> Option<NodeId> {
    let Term::Literal(Literal::Typed { lexical, datatype }) = term else {
        return None;
    };
    let id = match datatype.as_str() {
        xsd::INTEGER => encode_integer(lexical)?,
        xsd::DECIMAL => encode_decimal(lexical)?,
        xsd::DATE => encode_date(lexical)?,
        xsd::BOOLEAN => match lexical.as_str() {
            "true" => NodeId::inline(TYPE_BOOLEAN, 1),
            "false" => NodeId::inline(TYPE_BOOLEAN, 0),
            _ => return None,
        },
        _ => return None,
    };
    // Only canonical lexical forms survive the trip.
    match decode(id) {
        Some(Term::Literal(Literal::Typed { lexical: back, .. })) if back == *lexical => Some(id),
        _ => None,
    }
}

/// Term of an inline id; `None` for pointer ids, sentinels and unknown
/// inline types.
pub fn decode(id: NodeId) -> Option<Term> {
    if !id.is_inline() {
        return None;
    }
    let value = id.inline_value();
    let (lexical, datatype) = match id.inline_type() {
        TYPE_INTEGER => (sign_extend(value, 56).to_string(), xsd::INTEGER),
        TYPE_DECIMAL => {
            let scale = (value >> 48) as u32;
            let unscaled = sign_extend(value & UNSCALED_MASK, 48);
            (format_decimal(unscaled, scale), xsd::DECIMAL)
        }
        TYPE_DATE => {
            let year = value >> 9;
            let month = (value >> 5) & 0xF;
            let day = value & 0x1F;
            (format!("{:04}-{:02}-{:02}", year, month, day), xsd::DATE)
        }
        TYPE_BOOLEAN => ((value != 0).to_string(), xsd::BOOLEAN),
        _ => return None,
    };
    Some(Term::typed_literal(lexical, datatype))
}

fn sign_extend(value: u64, bits: u32) -> i64 {
    let shift = 64 - bits;
    ((value << shift) as i64) >> shift
}

fn encode_integer(lexical: &str) -> Option<NodeId> {
    let n: i64 = lexical.parse().ok()?;
    if !(INTEGER_MIN..=INTEGER_MAX).contains(&n) {
        return None;
    }
    Some(NodeId::inline(TYPE_INTEGER, n as u64))
}

fn encode_decimal(lexical: &str) -> Option<NodeId> {
    let (negative, digits) = match lexical.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, lexical),
    };
    let (int_part, frac_part) = digits.split_once('.')?;
    if int_part.is_empty()
        || frac_part.is_empty()
        || !int_part.bytes().chain(frac_part.bytes()).all(|b| b.is_ascii_digit())
    {
        return None;
    }
    let scale = u8::try_from(frac_part.len()).ok()?;
    let magnitude: i64 = format!("{}{}", int_part, frac_part).parse().ok()?;
    let unscaled = if negative { -magnitude } else { magnitude };
    if !(UNSCALED_MIN..=UNSCALED_MAX).contains(&unscaled) {
        return None;
    }
    let value = ((scale as u64) << 48) | (unscaled as u64 & UNSCALED_MASK);
    Some(NodeId::inline(TYPE_DECIMAL, value))
}

fn format_decimal(unscaled: i64, scale: u32) -> String {
    let sign = if unscaled < 0 { "-" } else { "" };
    let digits = unscaled.unsigned_abs().to_string();
    if scale == 0 {
        return format!("{}{}.0", sign, digits);
    }
    let scale = scale as usize;
    let digits = format!("{:0>width$}", digits, width = scale + 1);
    let (int_part, frac_part) = digits.split_at(digits.len() - scale);
    format!("{}{}.{}", sign, int_part, frac_part)
}

fn encode_date(lexical: &str) -> Option<NodeId> {
    let bytes = lexical.as_bytes();
    if bytes.len() != 10 || bytes[4] != b'-' || bytes[7] != b'-' {
        return None;
    }
    let year: u64 = lexical[0..4].parse().ok()?;
    let month: u64 = lexical[5..7].parse().ok()?;
    let day: u64 = lexical[8..10].parse().ok()?;
    if !(1..=12).contains(&month) || day == 0 || day > days_in_month(year, month) {
        return None;
    }
    Some(NodeId::inline(TYPE_DATE, (year << 9) | (month << 5) | day))
}

fn days_in_month(year: u64, month: u64) -> u64 {
    match month {
        2 if year % 4 == 0 && (year % 100 != 0 || year % 400 == 0) => 29,
        2 => 28,
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn typed(lexical: &str, datatype: &str) -> Term {
        Term::typed_literal(lexical, datatype)
    }

    #[test]
    fn test_integers() {
        for lex in ["0", "42", "-7", "36028797018963967", "-36028797018963968"] {
            let t = typed(lex, xsd::INTEGER);
            let id = encode(&t).unwrap();
            assert_eq!(decode(id), Some(t));
        }
        // Out of range or not canonical
        for lex in ["36028797018963968", "+5", "007", "1e3", ""] {
            assert!(encode(&typed(lex, xsd::INTEGER)).is_none(), "{}", lex);
        }
    }

    #[test]
    fn test_decimals() {
        for lex in ["1.5", "-0.25", "3.0", "0.001", "12.50"] {
            let t = typed(lex, xsd::DECIMAL);
            assert_eq!(decode(encode(&t).unwrap()), Some(t), "{}", lex);
        }
        for lex in ["3", ".5", "5.", "-", "1.2.3", "00.5"] {
            assert!(encode(&typed(lex, xsd::DECIMAL)).is_none(), "{}", lex);
        }
    }

    #[test]
    fn test_dates() {
        let t = typed("2024-02-29", xsd::DATE);
        assert_eq!(decode(encode(&t).unwrap()), Some(t));
        for lex in ["2023-02-29", "2024-13-01", "2024-1-01", "2024-01-01Z"] {
            assert!(encode(&typed(lex, xsd::DATE)).is_none(), "{}", lex);
        }
    }

    #[test]
    fn test_booleans() {
        assert!(encode(&typed("true", xsd::BOOLEAN)).is_some());
        assert!(encode(&typed("1", xsd::BOOLEAN)).is_none());
    }

    #[test]
    fn test_not_inlined() {
        assert!(encode(&Term::iri("http://x/")).is_none());
        assert!(encode(&Term::literal("5")).is_none());
        assert!(encode(&typed("5", xsd::STRING)).is_none());
        assert!(decode(NodeId::from_offset(8)).is_none());
        assert!(decode(NodeId::UNDEFINED).is_none());
    }

    #[test]
    fn test_integer_order_within_sign() {
        let a = encode(&typed("3", xsd::INTEGER)).unwrap();
        let b = encode(&typed("40", xsd::INTEGER)).unwrap();
        assert!(a < b);
    }

    proptest! {
        #[test]
        fn test_round_trip_when_inlined(n in any::<i64>(), scale in 0u32..6) {
            let int = typed(&n.to_string(), xsd::INTEGER);
            if let Some(id) = encode(&int) {
                prop_assert_eq!(decode(id), Some(int));
            } else {
                prop_assert!(!(INTEGER_MIN..=INTEGER_MAX).contains(&n));
            }

            let dec = typed(&format_decimal(n % (1 << 40), scale), xsd::DECIMAL);
            let id = encode(&dec).unwrap();
            prop_assert_eq!(decode(id), Some(dec));
        }
    }
}
