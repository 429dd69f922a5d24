//! Listpack entry codec.
//!
//! Every listpack entry is laid out as `[encoding+data][backlen]`:
//!
//! ```text
//! 0xxxxxxx                      7-bit unsigned integer
//! 10xxxxxx <data>               string, 6-bit length
//! 110xxxxx yyyyyyyy             13-bit signed integer
//! 1110xxxx yyyyyyyy <data>      string, 12-bit length
//! 11110000 <4 bytes len> <data> string, 32-bit length
//! 11110001 <2 bytes>            16-bit signed integer
//! 11110010 <3 bytes>            24-bit signed integer
//! 11110011 <4 bytes>            32-bit signed integer
//! 11110100 <8 bytes>            64-bit signed integer
//! 11111111                      end of listpack
//! ```
//!
//! Multi-byte fields are little endian; signed integers are two's complement
//! in their field width. `backlen` stores the length of `encoding+data` in 1-5
//! bytes, 7 bits per byte, and is read right to left starting from the last
//! byte of the entry: every byte but the leftmost has its MSB set.

use crate::sds::Sds;
use crate::util;

/// End-of-listpack marker.
pub const EOF: u8 = 0xFF;

pub const ENC_7BIT_UINT: u8 = 0x00;
pub const ENC_6BIT_STR: u8 = 0x80;
pub const ENC_13BIT_INT: u8 = 0xC0;
pub const ENC_12BIT_STR: u8 = 0xE0;
pub const ENC_32BIT_STR: u8 = 0xF0;
pub const ENC_16BIT_INT: u8 = 0xF1;
pub const ENC_24BIT_INT: u8 = 0xF2;
pub const ENC_32BIT_INT: u8 = 0xF3;
pub const ENC_64BIT_INT: u8 = 0xF4;

/// Largest `encoding+data + backlen` header overhead of a single entry.
pub const MAX_ENTRY_OVERHEAD: usize = 5 + 5;

/// A decoded entry: either a byte string view or an integer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Element<'a> {
    Str(&'a [u8]),
    Int(i64),
}

impl<'a> Element<'a> {
    /// Pick the representation an input string is stored as.
    ///
    /// Only canonical decimal strings become integers, so decoding always
    /// reproduces the input bytes.
    #[inline]
    pub fn classify(s: &'a [u8]) -> Self {
        match util::string2ll(s) {
            Some(v) => Element::Int(v),
            None => Element::Str(s),
        }
    }

    /// Render as bytes (integers in decimal).
    pub fn to_vec(&self) -> Vec<u8> {
        match *self {
            Element::Str(s) => s.to_vec(),
            Element::Int(v) => {
                let mut buf = [0u8; util::MAX_LONG_DIGITS + 1];
                let n = util::ll2string(&mut buf, v);
                buf[..n].to_vec()
            }
        }
    }

    pub fn to_sds(&self) -> Sds {
        match *self {
            Element::Str(s) => Sds::new(s),
            Element::Int(v) => Sds::from_i64(v),
        }
    }

    pub fn to_buf(&self) -> ElementBuf {
        match *self {
            Element::Str(s) => ElementBuf::Str(s.to_vec()),
            Element::Int(v) => ElementBuf::Int(v),
        }
    }

    /// Compare with a byte string the way stored values compare: an integer
    /// entry equals exactly its canonical decimal rendering.
    pub fn eq_bytes(&self, s: &[u8]) -> bool {
        match *self {
            Element::Str(own) => own == s,
            Element::Int(v) => util::string2ll(s) == Some(v),
        }
    }

    /// Length of the string form.
    pub fn str_len(&self) -> usize {
        match *self {
            Element::Str(s) => s.len(),
            Element::Int(v) => {
                util::digits10(v.unsigned_abs()) + usize::from(v < 0)
            }
        }
    }
}

/// Owned counterpart of [`Element`], returned when an entry leaves its listpack.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum ElementBuf {
    Str(Vec<u8>),
    Int(i64),
}

impl ElementBuf {
    pub fn as_element(&self) -> Element<'_> {
        match self {
            ElementBuf::Str(s) => Element::Str(s),
            ElementBuf::Int(v) => Element::Int(*v),
        }
    }

    pub fn into_vec(self) -> Vec<u8> {
        match self {
            ElementBuf::Str(s) => s,
            ElementBuf::Int(v) => Element::Int(v).to_vec(),
        }
    }
}

// ============================================================================
// Sizes
// ============================================================================

/// Bytes taken by the encoding+data of integer `v`.
#[inline]
pub fn int_encoded_size(v: i64) -> usize {
    if (0..=127).contains(&v) {
        1
    } else if (-4096..=4095).contains(&v) {
        2
    } else if (-32768..=32767).contains(&v) {
        3
    } else if (-8_388_608..=8_388_607).contains(&v) {
        4
    } else if i32::try_from(v).is_ok() {
        5
    } else {
        9
    }
}

/// Bytes taken by the encoding+data of a string of `len` bytes.
#[inline]
pub fn str_encoded_size(len: usize) -> usize {
    if len < 64 {
        1 + len
    } else if len < 4096 {
        2 + len
    } else {
        5 + len
    }
}

#[inline]
pub fn encoded_size(ele: Element<'_>) -> usize {
    match ele {
        Element::Int(v) => int_encoded_size(v),
        Element::Str(s) => str_encoded_size(s.len()),
    }
}

/// Bytes needed by the back-length field for an entry of `l` bytes.
#[inline]
pub fn backlen_size(l: usize) -> usize {
    if l <= 127 {
        1
    } else if l < 16383 {
        2
    } else if l < 2_097_151 {
        3
    } else if l < 268_435_455 {
        4
    } else {
        5
    }
}

/// Full entry size (encoding+data+backlen) of `ele`.
#[inline]
pub fn entry_size(ele: Element<'_>) -> usize {
    let l = encoded_size(ele);
    l + backlen_size(l)
}

// ============================================================================
// Encoding
// ============================================================================

/// Append the encoding+data of `ele` to `out`, returning the bytes written.
pub fn encode(ele: Element<'_>, out: &mut Vec<u8>) -> usize {
    let start = out.len();
    match ele {
        Element::Int(v) => encode_int(v, out),
        Element::Str(s) => encode_str(s, out),
    }
    out.len() - start
}

fn encode_int(v: i64, out: &mut Vec<u8>) {
    if (0..=127).contains(&v) {
        out.push(v as u8);
    } else if (-4096..=4095).contains(&v) {
        let u = if v < 0 { ((1i64 << 13) + v) as u64 } else { v as u64 };
        out.push(((u >> 8) as u8) | ENC_13BIT_INT);
        out.push(u as u8);
    } else if (-32768..=32767).contains(&v) {
        out.push(ENC_16BIT_INT);
        out.extend_from_slice(&(v as i16).to_le_bytes());
    } else if (-8_388_608..=8_388_607).contains(&v) {
        out.push(ENC_24BIT_INT);
        out.extend_from_slice(&(v as i32).to_le_bytes()[..3]);
    } else if let Ok(v32) = i32::try_from(v) {
        out.push(ENC_32BIT_INT);
        out.extend_from_slice(&v32.to_le_bytes());
    } else {
        out.push(ENC_64BIT_INT);
        out.extend_from_slice(&v.to_le_bytes());
    }
}

fn encode_str(s: &[u8], out: &mut Vec<u8>) {
    let len = s.len();
    if len < 64 {
        out.push(ENC_6BIT_STR | len as u8);
    } else if len < 4096 {
        out.push(ENC_12BIT_STR | (len >> 8) as u8);
        out.push(len as u8);
    } else {
        out.push(ENC_32BIT_STR);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
    out.extend_from_slice(s);
}

/// Append the back-length field for an entry of `l` bytes, returning its size.
pub fn encode_backlen(l: usize, out: &mut Vec<u8>) -> usize {
    let n = backlen_size(l);
    for i in (0..n).rev() {
        let chunk = ((l >> (7 * i)) & 127) as u8;
        if i == n - 1 {
            out.push(chunk);
        } else {
            out.push(chunk | 128);
        }
    }
    n
}

/// Append a complete entry (encoding+data+backlen) for `ele`.
pub fn encode_entry(ele: Element<'_>, out: &mut Vec<u8>) -> usize {
    let l = encode(ele, out);
    l + encode_backlen(l, out)
}

// ============================================================================
// Decoding
// ============================================================================

/// Decode the back-length field whose last byte is `buf[end - 1]`.
///
/// Returns `(encoded_len, backlen_bytes)`, or `None` if the field runs off the
/// start of `buf` or is longer than five bytes.
pub fn decode_backlen(buf: &[u8], end: usize) -> Option<(usize, usize)> {
    let mut val = 0usize;
    let mut shift = 0;
    let mut i = end;
    loop {
        i = i.checked_sub(1)?;
        let byte = buf[i];
        val |= usize::from(byte & 127) << shift;
        if byte & 128 == 0 {
            return Some((val, end - i));
        }
        shift += 7;
        if shift > 28 {
            return None;
        }
    }
}

/// Length of the encoding+data starting at `buf[0]`, without decoding it.
///
/// Returns `None` for the EOF marker, an unknown tag or a truncated header.
pub fn encoded_len(buf: &[u8]) -> Option<usize> {
    let b = *buf.first()?;
    let len = if b & 0x80 == 0 {
        1
    } else if b & 0xC0 == ENC_6BIT_STR {
        1 + usize::from(b & 0x3F)
    } else if b & 0xE0 == ENC_13BIT_INT {
        2
    } else if b & 0xF0 == ENC_12BIT_STR {
        2 + ((usize::from(b & 0x0F) << 8) | usize::from(*buf.get(1)?))
    } else {
        match b {
            ENC_16BIT_INT => 3,
            ENC_24BIT_INT => 4,
            ENC_32BIT_INT => 5,
            ENC_64BIT_INT => 9,
            ENC_32BIT_STR => {
                let len: [u8; 4] = buf.get(1..5)?.try_into().ok()?;
                5 + u32::from_le_bytes(len) as usize
            }
            _ => return None,
        }
    };
    Some(len)
}

/// Decode the entry starting at `buf[0]`.
///
/// Returns the element and the length of its encoding+data, or `None` if the
/// tag is unknown or the data would run past the end of `buf`.
pub fn decode(buf: &[u8]) -> Option<(Element<'_>, usize)> {
    let len = encoded_len(buf)?;
    if len > buf.len() {
        return None;
    }
    let b = buf[0];
    let ele = if b & 0x80 == 0 {
        Element::Int(i64::from(b & 0x7F))
    } else if b & 0xC0 == ENC_6BIT_STR {
        Element::Str(&buf[1..len])
    } else if b & 0xE0 == ENC_13BIT_INT {
        let u = (i64::from(b & 0x1F) << 8) | i64::from(buf[1]);
        Element::Int(if u >= 1 << 12 { u - (1 << 13) } else { u })
    } else if b & 0xF0 == ENC_12BIT_STR {
        Element::Str(&buf[2..len])
    } else {
        match b {
            ENC_16BIT_INT => Element::Int(i64::from(i16::from_le_bytes([buf[1], buf[2]]))),
            ENC_24BIT_INT => {
                // Sign-extend by placing the 3 bytes in the top of an i32.
                let v = i32::from_le_bytes([0, buf[1], buf[2], buf[3]]) >> 8;
                Element::Int(i64::from(v))
            }
            ENC_32BIT_INT => {
                Element::Int(i64::from(i32::from_le_bytes([buf[1], buf[2], buf[3], buf[4]])))
            }
            ENC_64BIT_INT => {
                let mut b8 = [0u8; 8];
                b8.copy_from_slice(&buf[1..9]);
                Element::Int(i64::from_le_bytes(b8))
            }
            ENC_32BIT_STR => Element::Str(&buf[5..len]),
            _ => return None,
        }
    };
    Some((ele, len))
}
