//! Random identifiers and human duration strings.

use chrono::Duration;
use thiserror::Error;

/// Bytes of entropy in a file identifier (hex-encoded to 32 chars).
const FILE_ID_BYTES: usize = 16;

/// Bytes of entropy in a share token (hex-encoded to 64 chars).
const TOKEN_BYTES: usize = 32;

fn random_hex(len: usize) -> Result<String, getrandom::Error> {
    let mut buf = vec![0u8; len];
    getrandom::getrandom(&mut buf)?;
    Ok(hex::encode(buf))
}

/// Opaque identifier for a file record.
pub fn generate_id() -> Result<String, getrandom::Error> {
    random_hex(FILE_ID_BYTES)
}

/// Unguessable bearer token for a share link.
pub fn generate_token() -> Result<String, getrandom::Error> {
    random_hex(TOKEN_BYTES)
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DurationParseError {
    #[error("duration is empty")]
    Empty,
    #[error("missing unit after `{0}`")]
    MissingUnit(String),
    #[error("unknown unit `{0}` (expected d, h, m or s)")]
    UnknownUnit(char),
    #[error("expected a number before `{0}`")]
    MissingNumber(char),
    #[error("duration must be positive")]
    NotPositive,
    #[error("duration is too large")]
    Overflow,
}

/// Parse durations like `24h`, `7d`, `90m` or `1d12h`.
///
/// A duration is one or more `<integer><unit>` pairs with units `d`, `h`,
/// `m` and `s`. Unitless numbers and a zero total are rejected.
pub fn parse_duration(input: &str) -> Result<Duration, DurationParseError> {
    let s = input.trim();
    if s.is_empty() {
        return Err(DurationParseError::Empty);
    }

    let mut total: i64 = 0;
    let mut digits = String::new();
    for c in s.chars() {
        if c.is_ascii_digit() {
            digits.push(c);
            continue;
        }
        if digits.is_empty() {
            return Err(DurationParseError::MissingNumber(c));
        }
        let unit_secs: i64 = match c {
            'd' => 86_400,
            'h' => 3_600,
            'm' => 60,
            's' => 1,
            other => return Err(DurationParseError::UnknownUnit(other)),
        };
        let value: i64 = digits.parse().map_err(|_| DurationParseError::Overflow)?;
        total = value
            .checked_mul(unit_secs)
            .and_then(|secs| total.checked_add(secs))
            .ok_or(DurationParseError::Overflow)?;
        digits.clear();
    }
    if !digits.is_empty() {
        return Err(DurationParseError::MissingUnit(digits));
    }
    if total <= 0 {
        return Err(DurationParseError::NotPositive);
    }
    Duration::try_seconds(total).ok_or(DurationParseError::Overflow)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_hex_and_distinct() {
        let a = generate_token().unwrap();
        let b = generate_token().unwrap();
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
        assert_eq!(generate_id().unwrap().len(), 32);
    }

    #[test]
    fn parses_single_units() {
        assert_eq!(parse_duration("24h"), Ok(Duration::hours(24)));
        assert_eq!(parse_duration("7d"), Ok(Duration::days(7)));
        assert_eq!(parse_duration("90m"), Ok(Duration::minutes(90)));
        assert_eq!(parse_duration(" 45s "), Ok(Duration::seconds(45)));
    }

    #[test]
    fn parses_compound() {
        assert_eq!(
            parse_duration("1d12h"),
            Ok(Duration::days(1) + Duration::hours(12))
        );
        assert_eq!(
            parse_duration("1h30m"),
            Ok(Duration::hours(1) + Duration::minutes(30))
        );
    }

    #[test]
    fn rejects_garbage() {
        assert_eq!(parse_duration(""), Err(DurationParseError::Empty));
        assert_eq!(
            parse_duration("banana"),
            Err(DurationParseError::MissingNumber('b'))
        );
        assert_eq!(
            parse_duration("12"),
            Err(DurationParseError::MissingUnit("12".into()))
        );
        assert_eq!(parse_duration("3w"), Err(DurationParseError::UnknownUnit('w')));
        assert_eq!(parse_duration("0h"), Err(DurationParseError::NotPositive));
        assert_eq!(parse_duration("-1h"), Err(DurationParseError::MissingNumber('-')));
        assert_eq!(
            parse_duration("99999999999999999999d"),
            Err(DurationParseError::Overflow)
        );
    }
}
