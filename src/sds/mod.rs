//! Dynamic byte strings with length-class headers.
//!
//! An [`Sds`] is a binary-safe byte buffer with an explicit length and a spare
//! capacity, always followed by a NUL byte so the content can be handed to
//! C-string consumers. Its header width is one of four size classes picked by
//! the length it must describe:
//!
//! | class   | len/alloc fields | header bytes | max length      |
//! |---------|------------------|--------------|-----------------|
//! | `Sds8`  | u8               | 3            | 2^8 - 2         |
//! | `Sds16` | u16              | 5            | 2^16 - 2        |
//! | `Sds32` | u32              | 9            | 2^32 - 2        |
//! | `Sds64` | u64              | 17           | 2^64 - 1        |
//!
//! Growth doubles the requested length below [`SDS_MAX_PREALLOC`] and adds a
//! fixed 1 MiB step above it. A growth that changes the size class needs a
//! fresh allocation and a copy; growth within a class reallocates in place.

use std::borrow::Borrow;
use std::cmp::Ordering;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;

use crate::error::{Error, Result};
use crate::util;

/// Growth switches from doubling to additive steps of this size.
pub const SDS_MAX_PREALLOC: usize = 1024 * 1024;

/// Header width class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum SdsClass {
    Sds8,
    Sds16,
    Sds32,
    Sds64,
}

impl SdsClass {
    /// Narrowest class able to describe `len`.
    #[inline]
    pub fn for_len(len: usize) -> Self {
        if len < 0xff {
            SdsClass::Sds8
        } else if len < 0xffff {
            SdsClass::Sds16
        } else if (len as u64) < 0xffff_ffff {
            SdsClass::Sds32
        } else {
            SdsClass::Sds64
        }
    }

    /// Bytes taken by the header: len + alloc + one flags byte.
    #[inline]
    pub fn header_size(self) -> usize {
        match self {
            SdsClass::Sds8 => 3,
            SdsClass::Sds16 => 5,
            SdsClass::Sds32 => 9,
            SdsClass::Sds64 => 17,
        }
    }
}

/// Dynamic string.
///
/// `buf` always holds `alloc + 1` bytes: the content, the spare capacity and
/// the trailing NUL slot. Bytes past `len` are kept zeroed up to `len + 1`.
pub struct Sds {
    buf: Vec<u8>,
    len: usize,
    alloc: usize,
    class: SdsClass,
}

impl Sds {
    /// Create a string holding a copy of `init`.
    pub fn new(init: &[u8]) -> Self {
        match Self::try_new(init) {
            Ok(s) => s,
            Err(e) => panic!("{e}"),
        }
    }

    /// Create a string holding a copy of `init`, reporting allocation failure.
    pub fn try_new(init: &[u8]) -> Result<Self> {
        let mut buf = Vec::new();
        buf.try_reserve_exact(init.len() + 1)?;
        buf.extend_from_slice(init);
        buf.push(0);
        Ok(Self {
            buf,
            len: init.len(),
            alloc: init.len(),
            class: SdsClass::for_len(init.len()),
        })
    }

    pub fn empty() -> Self {
        Self::new(b"")
    }

    /// Create a string of `len` zero bytes.
    pub fn zeroed(len: usize) -> Self {
        let mut s = Self::empty();
        if let Err(e) = s.grow_zero(len) {
            panic!("{e}");
        }
        s
    }

    /// Decimal rendering of `v`.
    pub fn from_i64(v: i64) -> Self {
        let mut buf = [0u8; util::MAX_LONG_DIGITS + 1];
        let n = util::ll2string(&mut buf, v);
        Self::new(&buf[..n])
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Spare bytes available without reallocating.
    #[inline]
    pub fn avail(&self) -> usize {
        self.alloc - self.len
    }

    /// Allocated content capacity (excluding header and NUL).
    #[inline]
    pub fn alloc(&self) -> usize {
        self.alloc
    }

    #[inline]
    pub fn class(&self) -> SdsClass {
        self.class
    }

    /// Total footprint: header, capacity and the NUL terminator.
    pub fn alloc_size(&self) -> usize {
        self.class.header_size() + self.alloc + 1
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[..self.len]
    }

    #[inline]
    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }

    /// Content followed by its NUL terminator.
    pub fn as_bytes_with_nul(&self) -> &[u8] {
        &self.buf[..=self.len]
    }

    /// Writable spare capacity past the current length.
    pub fn spare_mut(&mut self) -> &mut [u8] {
        let alloc = self.alloc;
        &mut self.buf[self.len..alloc]
    }

    /// Adjust the length after writing into [`Sds::spare_mut`] (or shrink it).
    ///
    /// # Panics
    /// Panics if the new length is outside `0..=alloc`.
    pub fn incr_len(&mut self, incr: isize) {
        let new_len = self
            .len
            .checked_add_signed(incr)
            .filter(|&l| l <= self.alloc)
            .unwrap_or_else(|| panic!("incr_len({incr}) out of range for len {}", self.len));
        self.set_len(new_len);
    }

    #[inline]
    fn set_len(&mut self, len: usize) {
        self.len = len;
        self.buf[len] = 0;
    }

    /// Make sure at least `addlen` bytes can be appended without reallocating.
    ///
    /// No-op when the slack already covers `addlen`. Otherwise the capacity
    /// becomes `2 * (len + addlen)` (or `len + addlen + 1MiB` past the
    /// preallocation cap). Crossing a size class takes a fresh allocation.
    pub fn make_room_for(&mut self, addlen: usize) -> Result<()> {
        if self.avail() >= addlen {
            return Ok(());
        }

        let required = self
            .len
            .checked_add(addlen)
            .ok_or(Error::TooLarge { what: "sds", bytes: usize::MAX })?;
        let new_alloc = if required < SDS_MAX_PREALLOC {
            required * 2
        } else {
            required
                .checked_add(SDS_MAX_PREALLOC)
                .filter(|&a| a < usize::MAX)
                .ok_or(Error::TooLarge { what: "sds", bytes: required })?
        };
        let class = SdsClass::for_len(new_alloc);

        if class == self.class {
            self.buf.try_reserve_exact(new_alloc + 1 - self.buf.len())?;
            self.buf.resize(new_alloc + 1, 0);
        } else {
            let mut fresh = Vec::new();
            fresh.try_reserve_exact(new_alloc + 1)?;
            fresh.extend_from_slice(&self.buf[..=self.len]);
            fresh.resize(new_alloc + 1, 0);
            self.buf = fresh;
            self.class = class;
        }
        self.alloc = new_alloc;
        Ok(())
    }

    /// Reallocate to exactly the current length.
    pub fn remove_free_space(&mut self) {
        if self.avail() == 0 {
            return;
        }
        self.buf.truncate(self.len + 1);
        self.buf.shrink_to_fit();
        self.alloc = self.len;
        self.class = SdsClass::for_len(self.len);
    }

    /// Append bytes.
    pub fn cat_len(&mut self, t: &[u8]) -> Result<()> {
        self.make_room_for(t.len())?;
        let cur = self.len;
        self.buf[cur..cur + t.len()].copy_from_slice(t);
        self.set_len(cur + t.len());
        Ok(())
    }

    /// Append another string.
    pub fn cat_sds(&mut self, t: &Sds) -> Result<()> {
        self.cat_len(t.as_bytes())
    }

    /// Append this string to itself.
    pub fn cat_self(&mut self) -> Result<()> {
        let len = self.len;
        self.make_room_for(len)?;
        self.buf.copy_within(0..len, len);
        self.set_len(len * 2);
        Ok(())
    }

    /// Append a quoted, escaped rendering of `p` (non-printables as `\xHH`).
    pub fn cat_repr(&mut self, p: &[u8]) -> Result<()> {
        let mut out = Vec::with_capacity(p.len() + 2);
        out.push(b'"');
        for &c in p {
            match c {
                b'\\' | b'"' => {
                    out.push(b'\\');
                    out.push(c);
                }
                b'\n' => out.extend_from_slice(b"\\n"),
                b'\r' => out.extend_from_slice(b"\\r"),
                b'\t' => out.extend_from_slice(b"\\t"),
                0x07 => out.extend_from_slice(b"\\a"),
                0x08 => out.extend_from_slice(b"\\b"),
                c if c.is_ascii_graphic() || c == b' ' => out.push(c),
                c => out.extend_from_slice(format!("\\x{c:02x}").as_bytes()),
            }
        }
        out.push(b'"');
        self.cat_len(&out)
    }

    /// Replace the content with `t`, growing only if the capacity is too small.
    pub fn cpy_len(&mut self, t: &[u8]) -> Result<()> {
        if self.alloc < t.len() {
            self.make_room_for(t.len() - self.len)?;
        }
        self.buf[..t.len()].copy_from_slice(t);
        self.set_len(t.len());
        Ok(())
    }

    /// Extend to `len` bytes, zero filling the new tail. No-op if already longer.
    pub fn grow_zero(&mut self, len: usize) -> Result<()> {
        let cur = self.len;
        if len <= cur {
            return Ok(());
        }
        self.make_room_for(len - cur)?;
        self.buf[cur..=len].fill(0);
        self.set_len(len);
        Ok(())
    }

    /// Strip leading and trailing bytes that appear in `cset`.
    pub fn trim(&mut self, cset: &[u8]) {
        let bytes = self.as_bytes();
        let start = bytes
            .iter()
            .position(|c| !cset.contains(c))
            .unwrap_or(bytes.len());
        let end = bytes
            .iter()
            .rposition(|c| !cset.contains(c))
            .map_or(start, |e| e + 1);
        let new_len = end.saturating_sub(start);
        if start != 0 && new_len != 0 {
            self.buf.copy_within(start..end, 0);
        }
        self.set_len(new_len);
    }

    /// Keep only the inclusive range `start..=end`.
    ///
    /// Negative indices count from the end (-1 is the last byte). Ranges that
    /// fall outside the string are clamped; an empty intersection empties it.
    pub fn range(&mut self, start: isize, end: isize) {
        let len = self.len as isize;
        if len == 0 {
            return;
        }
        let mut start = if start < 0 { (len + start).max(0) } else { start };
        let mut end = if end < 0 { (len + end).max(0) } else { end };

        let mut new_len = if start > end { 0 } else { end - start + 1 };
        if new_len != 0 {
            if start >= len {
                new_len = 0;
            } else if end >= len {
                end = len - 1;
                new_len = if start > end { 0 } else { end - start + 1 };
            }
        } else {
            start = 0;
        }

        if start != 0 && new_len != 0 {
            let s = start as usize;
            self.buf.copy_within(s..s + new_len as usize, 0);
        }
        self.set_len(new_len as usize);
    }

    /// Truncate to zero length, keeping the allocation.
    pub fn clear(&mut self) {
        self.set_len(0);
    }

    pub fn to_lower(&mut self) {
        self.as_bytes_mut().make_ascii_lowercase();
    }

    pub fn to_upper(&mut self) {
        self.as_bytes_mut().make_ascii_uppercase();
    }

    /// Split `s` on every occurrence of `sep`, returning independent strings.
    ///
    /// An empty input or an empty separator yields no tokens.
    pub fn split_len(s: &[u8], sep: &[u8]) -> Vec<Sds> {
        let mut tokens = Vec::new();
        if s.is_empty() || sep.is_empty() {
            return tokens;
        }

        let mut start = 0;
        let mut j = 0;
        while j + sep.len() <= s.len() {
            if &s[j..j + sep.len()] == sep {
                tokens.push(Sds::new(&s[start..j]));
                start = j + sep.len();
                j = start;
            } else {
                j += 1;
            }
        }
        tokens.push(Sds::new(&s[start..]));
        tokens
    }

    /// Parse the content as a canonical decimal integer.
    pub fn to_i64(&self) -> Option<i64> {
        util::string2ll(self.as_bytes())
    }
}

impl Clone for Sds {
    /// Deep copy sized to the content, like a fresh `Sds::new`.
    fn clone(&self) -> Self {
        Sds::new(self.as_bytes())
    }
}

impl Default for Sds {
    fn default() -> Self {
        Self::empty()
    }
}

impl Deref for Sds {
    type Target = [u8];

    #[inline]
    fn deref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl AsRef<[u8]> for Sds {
    fn as_ref(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl Borrow<[u8]> for Sds {
    fn borrow(&self) -> &[u8] {
        self.as_bytes()
    }
}

impl PartialEq for Sds {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Sds {}

impl PartialEq<[u8]> for Sds {
    fn eq(&self, other: &[u8]) -> bool {
        self.as_bytes() == other
    }
}

impl PartialEq<&[u8]> for Sds {
    fn eq(&self, other: &&[u8]) -> bool {
        self.as_bytes() == *other
    }
}

impl PartialEq<&str> for Sds {
    fn eq(&self, other: &&str) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Ord for Sds {
    /// Byte-wise comparison; a proper prefix sorts before its extensions.
    fn cmp(&self, other: &Self) -> Ordering {
        self.as_bytes().cmp(other.as_bytes())
    }
}

impl PartialOrd for Sds {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Hash for Sds {
    // Must hash exactly like `[u8]` so `&[u8]` lookups work through `Borrow`.
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.as_bytes().hash(state)
    }
}

impl fmt::Debug for Sds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Display for Sds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl From<&[u8]> for Sds {
    fn from(s: &[u8]) -> Self {
        Sds::new(s)
    }
}

impl From<&str> for Sds {
    fn from(s: &str) -> Self {
        Sds::new(s.as_bytes())
    }
}

impl From<Vec<u8>> for Sds {
    fn from(mut v: Vec<u8>) -> Self {
        let len = v.len();
        v.push(0);
        Sds {
            alloc: v.len() - 1,
            buf: v,
            len,
            class: SdsClass::for_len(len),
        }
    }
}

impl From<Sds> for Vec<u8> {
    fn from(mut s: Sds) -> Self {
        s.buf.truncate(s.len);
        s.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_and_nul_terminated() {
        let s = Sds::new(b"foo");
        assert_eq!(s.len(), 3);
        assert_eq!(s.avail(), 0);
        assert_eq!(s.as_bytes_with_nul(), b"foo\0");
        assert_eq!(s.class(), SdsClass::Sds8);
        assert_eq!(s.alloc_size(), 3 + 3 + 1);
    }

    #[test]
    fn test_binary_safe() {
        let s = Sds::new(b"a\0b");
        assert_eq!(s.len(), 3);
        assert_eq!(&s[..], b"a\0b");
    }

    #[test]
    fn test_cat_doubles_capacity() {
        let mut s = Sds::new(b"foo");
        s.cat_len(b"bar").unwrap();
        assert_eq!(s, "foobar");
        assert_eq!(s.alloc(), 12);
        assert_eq!(s.avail(), 6);

        // Enough slack: no growth.
        s.cat_len(b"baz").unwrap();
        assert_eq!(s.alloc(), 12);
        assert_eq!(s, "foobarbaz");
    }

    #[test]
    fn test_oversized_growth_is_an_error() {
        let mut s = Sds::new(b"abc");
        assert!(matches!(s.make_room_for(usize::MAX), Err(Error::TooLarge { what: "sds", .. })));
        assert!(s.make_room_for(usize::MAX - SDS_MAX_PREALLOC).is_err());
        assert!(s.grow_zero(usize::MAX).is_err());
        assert_eq!(s, "abc");
        assert_eq!(s.avail(), 0);
        assert_eq!(s.as_bytes_with_nul(), b"abc\0");

        let mut e = Sds::empty();
        assert!(e.make_room_for(usize::MAX).is_err());
        assert!(e.is_empty());
    }

    #[test]
    fn test_growth_past_prealloc_cap_is_additive() {
        let mut s = Sds::empty();
        s.make_room_for(SDS_MAX_PREALLOC).unwrap();
        assert_eq!(s.alloc(), 2 * SDS_MAX_PREALLOC);
        let mut t = Sds::empty();
        t.make_room_for(SDS_MAX_PREALLOC * 3).unwrap();
        assert_eq!(t.alloc(), SDS_MAX_PREALLOC * 4);
    }

    #[test]
    fn test_class_changes_with_growth() {
        let mut s = Sds::new(b"x");
        assert_eq!(s.class(), SdsClass::Sds8);
        s.cat_len(&[b'y'; 200]).unwrap();
        assert_eq!(s.class(), SdsClass::Sds16);
        assert_eq!(s.len(), 201);
        assert_eq!(s[0], b'x');
        assert!(s[1..].iter().all(|&c| c == b'y'));

        s.remove_free_space();
        assert_eq!(s.avail(), 0);
        assert_eq!(s.class(), SdsClass::Sds8);
    }

    #[test]
    fn test_cat_self() {
        let mut s = Sds::new(b"ab");
        s.cat_self().unwrap();
        assert_eq!(s, "abab");
    }

    #[test]
    fn test_cpy_len() {
        let mut s = Sds::new(b"hello world");
        s.cpy_len(b"a").unwrap();
        assert_eq!(s, "a");
        assert_eq!(s.alloc(), 11);
        s.cpy_len(b"a much longer replacement").unwrap();
        assert_eq!(s, "a much longer replacement");
    }

    #[test]
    fn test_trim() {
        let mut s = Sds::new(b"xxciaoyyy");
        s.trim(b"xy");
        assert_eq!(s, "ciao");

        let mut s = Sds::new(b"xxxx");
        s.trim(b"x");
        assert_eq!(s, "");

        let mut s = Sds::new(b"  ok");
        s.trim(b" ");
        assert_eq!(s, "ok");
    }

    #[test]
    fn test_range() {
        let cases: &[(isize, isize, &str)] = &[
            (1, 1, "i"),
            (1, -1, "iao"),
            (-2, -1, "ao"),
            (2, 1, ""),
            (1, 100, "iao"),
            (100, 100, ""),
            (0, 0, "c"),
            (-100, 1, "ci"),
        ];
        for &(start, end, expected) in cases {
            let mut s = Sds::new(b"ciao");
            s.range(start, end);
            assert_eq!(s, expected, "range({start}, {end})");
        }
    }

    #[test]
    fn test_grow_zero() {
        let mut s = Sds::new(b"ab");
        s.grow_zero(5).unwrap();
        assert_eq!(s.as_bytes(), b"ab\0\0\0");
        s.grow_zero(3).unwrap();
        assert_eq!(s.len(), 5);
    }

    #[test]
    fn test_compare_prefix_sorts_first() {
        assert!(Sds::new(b"foo") < Sds::new(b"foobar"));
        assert!(Sds::new(b"bar") < Sds::new(b"foo"));
        assert_eq!(Sds::new(b"aar").cmp(&Sds::new(b"aar")), Ordering::Equal);
        assert!(Sds::new(b"\x80") > Sds::new(b"a"));
    }

    #[test]
    fn test_split() {
        let parts = Sds::split_len(b"foo_-_bar_-_", b"_-_");
        assert_eq!(parts, vec![Sds::from("foo"), Sds::from("bar"), Sds::from("")]);
        assert!(Sds::split_len(b"", b",").is_empty());
        assert!(Sds::split_len(b"abc", b"").is_empty());
        assert_eq!(Sds::split_len(b"abc", b","), vec![Sds::from("abc")]);
    }

    #[test]
    fn test_spare_and_incr_len() {
        let mut s = Sds::new(b"0");
        s.make_room_for(4).unwrap();
        s.spare_mut()[..2].copy_from_slice(b"12");
        s.incr_len(2);
        assert_eq!(s, "012");
        s.incr_len(-1);
        assert_eq!(s.as_bytes_with_nul(), b"01\0");
    }

    #[test]
    fn test_case_and_repr() {
        let mut s = Sds::new(b"MiXeD");
        s.to_lower();
        assert_eq!(s, "mixed");
        s.to_upper();
        assert_eq!(s, "MIXED");

        let mut r = Sds::empty();
        r.cat_repr(b"a\"b\n\x01").unwrap();
        assert_eq!(r, "\"a\\\"b\\n\\x01\"");
    }

    #[test]
    fn test_from_i64() {
        assert_eq!(Sds::from_i64(-42), "-42");
        assert_eq!(Sds::from_i64(i64::MIN).to_i64(), Some(i64::MIN));
    }

    #[test]
    fn test_clone_is_deep() {
        let a = Sds::new(b"abc");
        let mut b = a.clone();
        b.cat_len(b"d").unwrap();
        assert_eq!(a, "abc");
        assert_eq!(b, "abcd");
    }
}
