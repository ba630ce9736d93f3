use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LiteralError {
    #[error("empty integer literal")]
    Empty,
    #[error("invalid integer literal '{0}'")]
    Invalid(String),
    #[error("integer literal '{0}' is out of range")]
    OutOfRange(String),
}

/// Parses an integer literal, detecting the base from its prefix.
///
/// `0x`, `0o` and `0b` select hexadecimal, octal and binary; anything else is
/// decimal. A sign may lead, `_` may separate digits, and non-zero decimal
/// literals may not start with `0`. Magnitudes up to 128 bits are accepted so
/// callers can mask wide values down to a byte or an address.
pub fn parse_int_literal(text: &str) -> Result<i128, LiteralError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(LiteralError::Empty);
    }
    let invalid = || LiteralError::Invalid(trimmed.to_string());

    let (negative, unsigned) = match trimmed.as_bytes()[0] {
        b'-' => (true, &trimmed[1..]),
        b'+' => (false, &trimmed[1..]),
        _ => (false, trimmed),
    };

    let lower = unsigned.to_ascii_lowercase();
    let (radix, digits, prefixed) = if let Some(rest) = lower.strip_prefix("0x") {
        (16, rest, true)
    } else if let Some(rest) = lower.strip_prefix("0o") {
        (8, rest, true)
    } else if let Some(rest) = lower.strip_prefix("0b") {
        (2, rest, true)
    } else {
        (10, lower.as_str(), false)
    };

    // A single underscore may follow the base prefix.
    let digits = if prefixed {
        digits.strip_prefix('_').unwrap_or(digits)
    } else {
        digits
    };

    if digits.is_empty() || digits.starts_with('_') || digits.ends_with('_') {
        return Err(invalid());
    }
    if digits.contains("__") {
        return Err(invalid());
    }

    let cleaned: String = digits.chars().filter(|c| *c != '_').collect();
    if !cleaned.chars().all(|c| c.is_digit(radix)) {
        return Err(invalid());
    }
    if radix == 10 && cleaned.len() > 1 && cleaned.starts_with('0') && cleaned.chars().any(|c| c != '0') {
        return Err(invalid());
    }

    let out_of_range = || LiteralError::OutOfRange(trimmed.to_string());
    let magnitude = u128::from_str_radix(&cleaned, radix).map_err(|_| out_of_range())?;
    if negative {
        0i128.checked_sub_unsigned(magnitude).ok_or_else(out_of_range)
    } else {
        i128::try_from(magnitude).map_err(|_| out_of_range())
    }
}
