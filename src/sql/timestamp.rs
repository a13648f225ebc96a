/// Canonicalization of loosely formatted reading timestamps.
///
/// Readings arrive with second, millisecond or microsecond precision, with or
/// without a zone offset. The readings table stores microseconds, so every
/// timestamp is rewritten to `YYYY-MM-DD HH:MM:SS.FFFFFF±HH:MM` before it is
/// embedded in an INSERT.
use chrono::NaiveDateTime;
use thiserror::Error;

const WHOLE_SECONDS: &str = "%Y-%m-%d %H:%M:%S";
const FRACTION_DIGITS: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TimestampError {
    #[error("Invalid date |{0}|")]
    Invalid(String),
}

/// Normalizes `YYYY-MM-DD HH:MM:SS[.fraction][±HH[:MM]]`.
///
/// Only the whole-second prefix is parsed strictly. Fractions are padded or
/// truncated to six digits; a missing zone becomes `+00:00`, a one digit hour
/// is left padded (`+1` → `+01`) and a one digit minute is right padded
/// (`:3` → `:30`). Unrecognised trailing text is ignored.
pub fn normalize(input: &str) -> Result<String, TimestampError> {
    let (datetime, mut rest) = NaiveDateTime::parse_and_remainder(input, WHOLE_SECONDS)
        .map_err(|_| TimestampError::Invalid(input.to_string()))?;

    let mut out = String::with_capacity(32);
    out.push_str(&datetime.format(WHOLE_SECONDS).to_string());
    out.push('.');

    let mut fraction = "";
    if let Some(after_dot) = rest.strip_prefix('.') {
        let (digits, tail) = take_digits(after_dot, usize::MAX);
        fraction = digits;
        rest = tail;
    }
    let kept = &fraction[..fraction.len().min(FRACTION_DIGITS)];
    out.push_str(kept);
    for _ in kept.len()..FRACTION_DIGITS {
        out.push('0');
    }

    match parse_zone(rest) {
        Some((sign, hour, minute)) => {
            out.push(sign);
            if hour.len() == 1 {
                out.push('0');
            }
            out.push_str(hour);
            out.push(':');
            match minute.len() {
                0 => out.push_str("00"),
                1 => {
                    out.push_str(minute);
                    out.push('0');
                }
                _ => out.push_str(minute),
            }
        }
        None => out.push_str("+00:00"),
    }

    Ok(out)
}

/// Splits off at most `max` leading ASCII digits.
fn take_digits(s: &str, max: usize) -> (&str, &str) {
    let end = s
        .char_indices()
        .take_while(|(i, c)| *i < max && c.is_ascii_digit())
        .count();
    s.split_at(end)
}

/// Parses `±H`, `±HH`, `±HH:M`, `±HH:MM` or `±HHMM`; `Z` counts as no offset.
fn parse_zone(rest: &str) -> Option<(char, &str, &str)> {
    let sign = rest.chars().next()?;
    if sign != '+' && sign != '-' {
        return None;
    }
    let (hour, tail) = take_digits(&rest[1..], 2);
    if hour.is_empty() {
        return None;
    }
    let minute = match tail.strip_prefix(':') {
        Some(after_colon) => take_digits(after_colon, 2).0,
        None if hour.len() == 2 => take_digits(tail, 2).0,
        None => "",
    };
    Some((sign, hour, minute))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn norm(s: &str) -> String {
        normalize(s).unwrap()
    }

    #[test]
    fn test_seconds_only() {
        assert_eq!(norm("2019-01-01 10:01:01"), "2019-01-01 10:01:01.000000+00:00");
        assert_eq!(norm("2019-02-01 10:02:01"), "2019-02-01 10:02:01.000000+00:00");
    }

    #[test]
    fn test_fraction_padding_and_truncation() {
        assert_eq!(norm("2019-02-01 10:02:01.0"), "2019-02-01 10:02:01.000000+00:00");
        assert_eq!(
            norm("2019-02-02 10:02:02.841"),
            "2019-02-02 10:02:02.841000+00:00"
        );
        assert_eq!(
            norm("2019-02-03 10:02:03.123456"),
            "2019-02-03 10:02:03.123456+00:00"
        );
        assert_eq!(
            norm("2019-02-03 10:02:03.123456789"),
            "2019-02-03 10:02:03.123456+00:00"
        );
    }

    #[test]
    fn test_explicit_zones() {
        assert_eq!(
            norm("2019-03-01 10:03:01.1+00:00"),
            "2019-03-01 10:03:01.100000+00:00"
        );
        assert_eq!(
            norm("2019-03-04 10:03:04.123456+01:00"),
            "2019-03-04 10:03:04.123456+01:00"
        );
        assert_eq!(
            norm("2019-03-05 10:03:05.123456-01:00"),
            "2019-03-05 10:03:05.123456-01:00"
        );
        assert_eq!(
            norm("2019-03-04 10:03:04.123456+02:30"),
            "2019-03-04 10:03:04.123456+02:30"
        );
        assert_eq!(
            norm("2019-03-05 10:03:05.123456-02:30"),
            "2019-03-05 10:03:05.123456-02:30"
        );
    }

    #[test]
    fn test_short_zone_components() {
        assert_eq!(
            norm("2019-03-04 10:03:04.123456+1:0"),
            "2019-03-04 10:03:04.123456+01:00"
        );
        assert_eq!(norm("2019-03-04 10:03:04.5-7"), "2019-03-04 10:03:04.500000-07:00");
        assert_eq!(norm("2019-03-04 10:03:04+05:3"), "2019-03-04 10:03:04.000000+05:30");
        assert_eq!(norm("2019-03-04 10:03:04+0530"), "2019-03-04 10:03:04.000000+05:30");
    }

    #[test]
    fn test_zone_without_fraction_and_zulu() {
        assert_eq!(
            norm("2019-03-04 10:03:04-03:00"),
            "2019-03-04 10:03:04.000000-03:00"
        );
        assert_eq!(norm("2019-03-04 10:03:04Z"), "2019-03-04 10:03:04.000000+00:00");
    }

    #[test]
    fn test_invalid_prefix() {
        assert!(matches!(
            normalize("not a date"),
            Err(TimestampError::Invalid(s)) if s == "not a date"
        ));
        assert!(normalize("2019-13-01 10:00:00").is_err());
        assert!(normalize("2019-01-01").is_err());
        assert!(normalize("").is_err());
    }

    #[test]
    fn test_error_message() {
        let err = normalize("xyz").unwrap_err();
        assert_eq!(err.to_string(), "Invalid date |xyz|");
    }
}
