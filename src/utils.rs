use crate::error::{EdfError, Result};
use crate::EDFLIB_TIME_DIMENSION;

/// 检查字符串是否为有效的整数
pub fn is_integer_number(s: &str) -> bool {
    let s = s.trim();
    if s.is_empty() {
        return false;
    }

    let digits = s.strip_prefix('+').or_else(|| s.strip_prefix('-')).unwrap_or(s);
    !digits.is_empty() && digits.chars().all(|c| c.is_ascii_digit())
}

/// Parses a decimal seconds value ("+12.5", "-0.0000001", "3") into 100 ns units
///
/// Digits beyond the 7th decimal place are ignored.
pub fn parse_edf_time(s: &str) -> Result<i64> {
    let invalid = || EdfError::InvalidFormat(format!("Time value: \"{}\"", s.trim()));
    let text = s.trim();
    let (negative, text) = match text.as_bytes().first() {
        Some(b'-') => (true, &text[1..]),
        Some(b'+') => (false, &text[1..]),
        Some(_) => (false, text),
        None => return Err(invalid()),
    };

    let (whole, fraction) = text.split_once('.').unwrap_or((text, ""));
    let all_digits = |part: &str| part.bytes().all(|b| b.is_ascii_digit());
    if (whole.is_empty() && fraction.is_empty()) || !all_digits(whole) || !all_digits(fraction) {
        return Err(invalid());
    }

    let mut value = match whole {
        "" => 0,
        _ => whole.parse::<i64>().map_err(|_| invalid())? * EDFLIB_TIME_DIMENSION,
    };
    // 100 ns 精度: 最多 7 位小数
    let fraction = &fraction[..fraction.len().min(7)];
    if !fraction.is_empty() {
        value += fraction.parse::<i64>().map_err(|_| invalid())? * 10i64.pow(7 - fraction.len() as u32);
    }

    Ok(if negative { -value } else { value })
}

/// Formats a time in 100 ns units as seconds without trailing zeros ("12.5", "3")
///
/// The sign is dropped; TAL writers put their own `+` or `-` in front.
pub fn format_edf_time(units: i64) -> String {
    let abs = units.unsigned_abs();
    let seconds = abs / EDFLIB_TIME_DIMENSION as u64;
    let fraction = abs % EDFLIB_TIME_DIMENSION as u64;

    if fraction == 0 {
        format!("{}", seconds)
    } else {
        let frac = format!("{:07}", fraction);
        format!("{}.{}", seconds, frac.trim_end_matches('0'))
    }
}

/// 非本地化的整数解析, 无法解析时为 0
pub fn atoi_nonlocalized(s: &str) -> i32 {
    s.trim().parse().unwrap_or(0)
}

/// 非本地化的浮点数解析, 无法解析时为 0.0
pub fn atof_nonlocalized(s: &str) -> f64 {
    s.trim().parse().unwrap_or(0.0)
}

/// Parses a run of ASCII digits at a fixed position, `None` if any byte is not a digit
pub fn fixed_digits(bytes: &[u8], start: usize, len: usize) -> Option<u32> {
    let field = bytes.get(start..start + len)?;
    if !field.iter().all(u8::is_ascii_digit) {
        return None;
    }
    field.iter().try_fold(0u32, |acc, b| Some(acc * 10 + (b - b'0') as u32))
}
