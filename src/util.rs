//! Decimal conversions with the exact round-trip rules the encodings rely on.

/// Longest decimal rendering of an `i64` ("-9223372036854775808").
pub const MAX_LONG_DIGITS: usize = 20;

/// Parse `s` as a canonical decimal `i64`.
///
/// Only strings that render back to exactly the same bytes are accepted: no
/// leading zeros, no `+`, no `-0`, no whitespace. Overflow is reported as
/// `None` and is a normal outcome, not an error.
pub fn string2ll(s: &[u8]) -> Option<i64> {
    if s.is_empty() || s.len() > MAX_LONG_DIGITS {
        return None;
    }
    if s == b"0" {
        return Some(0);
    }

    let (negative, digits) = match s[0] {
        b'-' => (true, &s[1..]),
        _ => (false, s),
    };
    match digits.first() {
        Some(b'1'..=b'9') => {}
        _ => return None,
    }

    let mut v: u64 = 0;
    for &c in digits {
        if !c.is_ascii_digit() {
            return None;
        }
        v = v.checked_mul(10)?.checked_add(u64::from(c - b'0'))?;
    }

    if negative {
        if v > i64::MAX as u64 + 1 {
            return None;
        }
        Some((v as i64).wrapping_neg())
    } else {
        i64::try_from(v).ok()
    }
}

/// Render `v` as decimal into `buf`, returning the number of bytes written.
pub fn ll2string(buf: &mut [u8; MAX_LONG_DIGITS + 1], v: i64) -> usize {
    let mut u = v.unsigned_abs();
    let len = digits10(u) + usize::from(v < 0);
    let mut i = len;
    loop {
        i -= 1;
        buf[i] = b'0' + (u % 10) as u8;
        u /= 10;
        if u == 0 {
            break;
        }
    }
    if v < 0 {
        buf[0] = b'-';
    }
    len
}

/// Number of decimal digits in `v`.
pub fn digits10(v: u64) -> usize {
    if v == 0 {
        return 1;
    }
    (v.ilog10() + 1) as usize
}

/// Render a sorted-set score the way it is stored in compact encodings.
///
/// Integral values inside the exactly representable range render without a
/// fractional part; everything else uses the shortest representation that
/// parses back to the same `f64`.
pub fn d2string(score: f64) -> String {
    if score.is_infinite() {
        return if score > 0.0 { "inf".into() } else { "-inf".into() };
    }
    if score == 0.0 && score.is_sign_negative() {
        return "-0".into();
    }
    const EXACT: f64 = (1u64 << 53) as f64;
    if score.fract() == 0.0 && score.abs() < EXACT {
        return format!("{}", score as i64);
    }
    format!("{score}")
}

/// Parse a score. Accepts `inf`, `+inf`, `-inf` and finite decimals; rejects NaN.
pub fn string2d(s: &[u8]) -> Option<f64> {
    let s = std::str::from_utf8(s).ok()?;
    if s.is_empty() || s.starts_with(char::is_whitespace) || s.ends_with(char::is_whitespace) {
        return None;
    }
    let v = match s {
        "inf" | "+inf" => f64::INFINITY,
        "-inf" => f64::NEG_INFINITY,
        _ => s.parse::<f64>().ok()?,
    };
    if v.is_nan() {
        return None;
    }
    Some(v)
}
