//! Ziplist: the legacy packed sequence that listpack replaced.
//!
//! Blobs in this format still turn up in old snapshots, so the crate can read,
//! mutate and validate them and convert them to a [`Listpack`].
//!
//! ```text
//! <zlbytes u32> <zltail u32> <zllen u16> <entry> ... <0xFF>
//! entry = <prevlen> <encoding> <data>
//! ```
//!
//! `prevlen` is the full length of the previous entry: one byte below 254,
//! otherwise `0xFE` followed by a u32. Because an entry's size depends on its
//! predecessor's size, growing one entry may force its successor's `prevlen`
//! to widen, which may in turn widen the next one ("cascade update").
//!
//! Header fields and integers are little endian; string lengths in the 14 and
//! 32-bit string encodings are big endian.

use crate::encoding::Element;
use crate::error::{corruption, Error, Result};
use crate::listpack::{End, Listpack};
use crate::util;

pub const HDR_SIZE: usize = 10;
pub const END: u8 = 0xFF;
pub const BIG_PREVLEN: u8 = 0xFE;
const LEN_UNKNOWN: u16 = u16::MAX;

const STR_06B: u8 = 0x00;
const STR_14B: u8 = 0x40;
const STR_32B: u8 = 0x80;
const INT_16B: u8 = 0xC0;
const INT_32B: u8 = 0xD0;
const INT_64B: u8 = 0xE0;
const INT_24B: u8 = 0xF0;
const INT_8B: u8 = 0xFE;
const INT_IMM_MIN: u8 = 0xF1;
const INT_IMM_MAX: u8 = 0xFD;

/// Decoded entry header.
#[derive(Clone, Copy, Debug)]
struct ZlEntry {
    prevrawlensize: usize,
    prevrawlen: usize,
    /// Bytes of the encoding field.
    lensize: usize,
    /// Bytes of the data.
    len: usize,
    encoding: u8,
}

impl ZlEntry {
    #[inline]
    fn header_size(&self) -> usize {
        self.prevrawlensize + self.lensize
    }

    #[inline]
    fn raw_len(&self) -> usize {
        self.header_size() + self.len
    }
}

#[inline]
fn prevlen_size(len: usize) -> usize {
    if len < usize::from(BIG_PREVLEN) {
        1
    } else {
        5
    }
}

fn encode_prevlen(len: usize, large: bool, out: &mut Vec<u8>) {
    if !large && len < usize::from(BIG_PREVLEN) {
        out.push(len as u8);
    } else {
        out.push(BIG_PREVLEN);
        out.extend_from_slice(&(len as u32).to_le_bytes());
    }
}

/// Integer form of `s`, if it should be stored as one.
fn try_encoding(s: &[u8]) -> Option<i64> {
    if s.is_empty() || s.len() >= 32 {
        return None;
    }
    util::string2ll(s)
}

/// Append encoding+data for `ele`.
fn encode_value(ele: Element<'_>, out: &mut Vec<u8>) {
    match ele {
        Element::Int(v) => {
            if (0..=12).contains(&v) {
                out.push(INT_IMM_MIN + v as u8);
            } else if let Ok(b) = i8::try_from(v) {
                out.push(INT_8B);
                out.extend_from_slice(&b.to_le_bytes());
            } else if let Ok(h) = i16::try_from(v) {
                out.push(INT_16B);
                out.extend_from_slice(&h.to_le_bytes());
            } else if (-8_388_608..=8_388_607).contains(&v) {
                out.push(INT_24B);
                out.extend_from_slice(&(v as i32).to_le_bytes()[..3]);
            } else if let Ok(w) = i32::try_from(v) {
                out.push(INT_32B);
                out.extend_from_slice(&w.to_le_bytes());
            } else {
                out.push(INT_64B);
                out.extend_from_slice(&v.to_le_bytes());
            }
        }
        Element::Str(s) => {
            let len = s.len();
            if len <= 0x3f {
                out.push(STR_06B | len as u8);
            } else if len <= 0x3fff {
                out.push(STR_14B | ((len >> 8) as u8 & 0x3f));
                out.push(len as u8);
            } else {
                out.push(STR_32B);
                out.extend_from_slice(&(len as u32).to_be_bytes());
            }
            out.extend_from_slice(s);
        }
    }
}

/// Data size of an integer encoding.
fn int_size(encoding: u8) -> Option<usize> {
    match encoding {
        INT_8B => Some(1),
        INT_16B => Some(2),
        INT_24B => Some(3),
        INT_32B => Some(4),
        INT_64B => Some(8),
        INT_IMM_MIN..=INT_IMM_MAX => Some(0),
        _ => None,
    }
}

/// Decode the entry header at the start of `buf`, bounds-checked.
fn decode_entry(buf: &[u8]) -> Option<ZlEntry> {
    let first = *buf.first()?;
    let (prevrawlensize, prevrawlen) = if first < BIG_PREVLEN {
        (1, usize::from(first))
    } else {
        let b: [u8; 4] = buf.get(1..5)?.try_into().ok()?;
        (5, u32::from_le_bytes(b) as usize)
    };

    let enc = *buf.get(prevrawlensize)?;
    let (encoding, lensize, len) = if enc < 0xC0 {
        match enc & 0xC0 {
            STR_06B => (STR_06B, 1, usize::from(enc & 0x3f)),
            STR_14B => {
                let lo = *buf.get(prevrawlensize + 1)?;
                (STR_14B, 2, (usize::from(enc & 0x3f) << 8) | usize::from(lo))
            }
            _ if enc == STR_32B => {
                let b: [u8; 4] = buf.get(prevrawlensize + 1..prevrawlensize + 5)?.try_into().ok()?;
                (STR_32B, 5, u32::from_be_bytes(b) as usize)
            }
            _ => return None,
        }
    } else {
        (enc, 1, int_size(enc)?)
    };

    let entry = ZlEntry {
        prevrawlensize,
        prevrawlen,
        lensize,
        len,
        encoding,
    };
    if entry.raw_len() > buf.len() {
        return None;
    }
    Some(entry)
}

fn load_int(encoding: u8, data: &[u8]) -> i64 {
    match encoding {
        INT_8B => i64::from(data[0] as i8),
        INT_16B => i64::from(i16::from_le_bytes([data[0], data[1]])),
        INT_24B => i64::from(i32::from_le_bytes([0, data[0], data[1], data[2]]) >> 8),
        INT_32B => i64::from(i32::from_le_bytes([data[0], data[1], data[2], data[3]])),
        INT_64B => {
            let mut b = [0u8; 8];
            b.copy_from_slice(&data[..8]);
            i64::from_le_bytes(b)
        }
        imm => i64::from(imm & 0x0f) - 1,
    }
}

#[derive(Clone, PartialEq, Eq, Debug)]
pub struct Ziplist {
    buf: Vec<u8>,
}

impl Ziplist {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(HDR_SIZE + 1);
        buf.extend_from_slice(&((HDR_SIZE + 1) as u32).to_le_bytes());
        buf.extend_from_slice(&(HDR_SIZE as u32).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.push(END);
        Self { buf }
    }

    /// Adopt an externally supplied blob after full validation.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        Self::validate_integrity(&buf)?;
        Ok(Self { buf })
    }

    /// Walk every entry of `buf`, checking bounds, encodings, `prevlen`
    /// chaining, the tail offset and the stored length.
    pub fn validate_integrity(buf: &[u8]) -> Result<()> {
        const WHAT: &str = "ziplist";
        if buf.len() < HDR_SIZE + 1 {
            return Err(Error::corrupt(WHAT, "shorter than the header"));
        }
        let bytes = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if bytes != buf.len() {
            return Err(Error::corrupt(WHAT, format!("header says {bytes} bytes, blob has {}", buf.len())));
        }
        let end = buf.len() - 1;
        if buf[end] != END {
            return Err(Error::corrupt(WHAT, "missing end marker"));
        }

        let mut p = HDR_SIZE;
        let mut prev_raw = 0;
        let mut last = HDR_SIZE;
        let mut count = 0usize;
        while p < end {
            let e = decode_entry(&buf[p..end])
                .ok_or_else(|| Error::corrupt(WHAT, format!("bad entry at offset {p}")))?;
            if e.prevrawlen != prev_raw {
                return Err(Error::corrupt(WHAT, format!("prevlen mismatch at offset {p}")));
            }
            prev_raw = e.raw_len();
            last = p;
            p += e.raw_len();
            count += 1;
        }
        if p != end {
            return Err(Error::corrupt(WHAT, "entries overrun the end marker"));
        }
        let tail = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if tail != last {
            return Err(Error::corrupt(WHAT, format!("tail offset {tail}, last entry at {last}")));
        }
        let stored = u16::from_le_bytes([buf[8], buf[9]]);
        if stored != LEN_UNKNOWN && usize::from(stored) != count {
            return Err(Error::corrupt(WHAT, format!("header length {stored}, found {count} entries")));
        }
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    pub fn bytes(&self) -> usize {
        self.buf.len()
    }

    fn tail_offset(&self) -> usize {
        u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize
    }

    fn stored_len(&self) -> u16 {
        u16::from_le_bytes([self.buf[8], self.buf[9]])
    }

    fn set_stored_len(&mut self, n: usize) {
        let n = u16::try_from(n).unwrap_or(LEN_UNKNOWN);
        self.buf[8..10].copy_from_slice(&n.to_le_bytes());
    }

    /// Rewrite the byte count and tail offset after a mutation.
    fn sync_header(&mut self) {
        let total = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&total.to_le_bytes());
        let mut tail = HDR_SIZE;
        let mut p = HDR_SIZE;
        while self.buf[p] != END {
            tail = p;
            p += self.entry(p).raw_len();
        }
        self.buf[4..8].copy_from_slice(&(tail as u32).to_le_bytes());
    }

    pub fn len(&self) -> usize {
        match self.stored_len() {
            LEN_UNKNOWN => self.iter().count(),
            n => usize::from(n),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.buf[HDR_SIZE] == END
    }

    fn entry(&self, p: usize) -> ZlEntry {
        match decode_entry(&self.buf[p..]) {
            Some(e) => e,
            None => corruption("ziplist", format_args!("invalid entry at offset {p}")),
        }
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    pub fn first(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(HDR_SIZE)
        }
    }

    pub fn last(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(self.tail_offset())
        }
    }

    pub fn next(&self, p: usize) -> Option<usize> {
        if self.buf[p] == END {
            return None;
        }
        let q = p + self.entry(p).raw_len();
        if self.buf[q] == END {
            None
        } else {
            Some(q)
        }
    }

    /// Entry before `p`; `p` may be the end marker.
    pub fn prev(&self, p: usize) -> Option<usize> {
        if self.buf[p] == END {
            return self.last();
        }
        if p == HDR_SIZE {
            return None;
        }
        Some(p - self.entry(p).prevrawlen)
    }

    /// Position of the element at `index`; negative indices count from the tail.
    pub fn index(&self, index: isize) -> Option<usize> {
        if index < 0 {
            let mut p = self.last()?;
            for _ in 0..(-index - 1) {
                p = self.prev(p)?;
            }
            Some(p)
        } else {
            let mut p = self.first()?;
            for _ in 0..index {
                p = self.next(p)?;
            }
            Some(p)
        }
    }

    pub fn get(&self, p: usize) -> Element<'_> {
        let e = self.entry(p);
        let data = p + e.header_size();
        if e.encoding < 0xC0 {
            Element::Str(&self.buf[data..data + e.len])
        } else {
            Element::Int(load_int(e.encoding, &self.buf[data..data + e.len]))
        }
    }

    /// First entry equal to `value` at or after `p`, comparing every
    /// `skip + 1`-th entry.
    pub fn find(&self, p: usize, value: &[u8], skip: usize) -> Option<usize> {
        let want = match try_encoding(value) {
            Some(v) => Element::Int(v),
            None => Element::Str(value),
        };
        let mut cur = Some(p);
        let mut skipcnt = 0;
        while let Some(pos) = cur {
            if skipcnt == 0 {
                let hit = match (self.get(pos), want) {
                    (Element::Str(a), _) => a == value,
                    (Element::Int(a), Element::Int(b)) => a == b,
                    (Element::Int(_), Element::Str(_)) => false,
                };
                if hit {
                    return Some(pos);
                }
                skipcnt = skip;
            } else {
                skipcnt -= 1;
            }
            cur = self.next(pos);
        }
        None
    }

    pub fn iter(&self) -> impl Iterator<Item = Element<'_>> + '_ {
        std::iter::successors(self.first(), move |&p| self.next(p)).map(move |p| self.get(p))
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Point the `prevlen` field of the entry at `p` at `value`.
    ///
    /// Returns how many bytes the entry grew (negative if it shrank). A
    /// five-byte field is only narrowed when `allow_shrink` is set.
    fn set_prevlen(&mut self, p: usize, value: usize, allow_shrink: bool) -> isize {
        let cur = self.entry(p).prevrawlensize;
        let need = prevlen_size(value);
        let large = cur == 5 && !allow_shrink;
        let mut field = Vec::with_capacity(5);
        encode_prevlen(value, large || need == 5, &mut field);
        self.buf.splice(p..p + cur, field.iter().copied());
        field.len() as isize - cur as isize
    }

    /// The entry at `p` changed size: fix the successors' `prevlen` fields.
    fn cascade_update(&mut self, mut p: usize) {
        loop {
            let rawlen = self.entry(p).raw_len();
            let next = p + rawlen;
            if self.buf[next] == END {
                return;
            }
            if self.set_prevlen(next, rawlen, false) == 0 {
                return;
            }
            p = next;
        }
    }

    /// Insert `value` in front of the entry at `p` (or at the end if `p` is the
    /// end marker). Returns the position of the new entry.
    pub fn insert(&mut self, p: usize, value: &[u8]) -> Result<usize> {
        let prevlen = if self.buf[p] != END {
            self.entry(p).prevrawlen
        } else if let Some(tail) = self.last() {
            self.entry(tail).raw_len()
        } else {
            0
        };

        let ele = match try_encoding(value) {
            Some(v) => Element::Int(v),
            None => Element::Str(value),
        };
        let mut entry = Vec::with_capacity(value.len() + 11);
        encode_prevlen(prevlen, false, &mut entry);
        encode_value(ele, &mut entry);

        let new_total = self.buf.len() + entry.len() + 4;
        if new_total > u32::MAX as usize {
            return Err(Error::TooLarge {
                what: "ziplist",
                bytes: new_total,
            });
        }
        // Room for the entry plus a possibly widened successor prevlen.
        self.buf.try_reserve(entry.len() + 4)?;
        self.buf.splice(p..p, entry.iter().copied());

        let next = p + entry.len();
        if self.buf[next] != END && self.set_prevlen(next, entry.len(), false) != 0 {
            self.cascade_update(next);
        }
        let count = self.stored_len();
        if count != LEN_UNKNOWN {
            self.set_stored_len(usize::from(count) + 1);
        }
        self.sync_header();
        Ok(p)
    }

    pub fn push(&mut self, value: &[u8], end: End) -> Result<()> {
        let p = match end {
            End::Head => HDR_SIZE,
            End::Tail => self.buf.len() - 1,
        };
        self.insert(p, value).map(drop)
    }

    /// Remove up to `num` entries starting at `p`, returning how many went.
    pub fn delete_at(&mut self, p: usize, num: usize) -> usize {
        let first_prevlen = if self.buf[p] == END {
            return 0;
        } else {
            self.entry(p).prevrawlen
        };

        let mut end = p;
        let mut deleted = 0;
        while deleted < num && self.buf[end] != END {
            end += self.entry(end).raw_len();
            deleted += 1;
        }
        self.buf.drain(p..end);

        if self.buf[p] != END && self.set_prevlen(p, first_prevlen, true) != 0 {
            self.cascade_update(p);
        }
        let count = self.stored_len();
        if count != LEN_UNKNOWN {
            self.set_stored_len(usize::from(count) - deleted);
        } else {
            let n = self.iter().count();
            self.set_stored_len(n);
        }
        self.sync_header();
        deleted
    }

    /// Remove the entry at `p`, returning the position of its successor.
    pub fn delete(&mut self, p: usize) -> Option<usize> {
        self.delete_at(p, 1);
        if self.buf[p] == END {
            None
        } else {
            Some(p)
        }
    }

    /// Remove up to `num` entries starting at `index`.
    pub fn delete_range(&mut self, index: isize, num: usize) -> usize {
        match self.index(index) {
            Some(p) => self.delete_at(p, num),
            None => 0,
        }
    }

    /// Re-encode every entry into a listpack.
    pub fn to_listpack(&self) -> Result<Listpack> {
        let mut lp = Listpack::with_capacity(self.buf.len());
        for ele in self.iter() {
            match ele {
                Element::Int(v) => lp.append_int(v)?,
                Element::Str(s) => lp.append(s)?,
            }
        }
        Ok(lp)
    }
}

impl Default for Ziplist {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zl_of(items: &[&[u8]]) -> Ziplist {
        let mut zl = Ziplist::new();
        for s in items {
            zl.push(s, End::Tail).unwrap();
        }
        zl
    }

    fn collect(zl: &Ziplist) -> Vec<Vec<u8>> {
        zl.iter().map(|e| e.to_vec()).collect()
    }

    #[test]
    fn test_empty_layout() {
        let zl = Ziplist::new();
        assert_eq!(zl.as_bytes(), &[11, 0, 0, 0, 10, 0, 0, 0, 0, 0, 0xFF]);
        assert!(zl.first().is_none());
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();
    }

    #[test]
    fn test_push_layout() {
        let zl = zl_of(&[b"2", b"5"]);
        // prevlen 0, imm 2 | prevlen 2, imm 5
        assert_eq!(
            zl.as_bytes(),
            &[15, 0, 0, 0, 12, 0, 0, 0, 2, 0, 0x00, 0xF3, 0x02, 0xF6, 0xFF]
        );
    }

    #[test]
    fn test_integer_encodings() {
        let values: &[&[u8]] = &[
            b"0",
            b"12",
            b"13",
            b"-128",
            b"300",
            b"-70000",
            b"2000000000",
            b"9000000000",
            b"-9223372036854775808",
        ];
        let zl = zl_of(values);
        assert_eq!(collect(&zl), values.iter().map(|v| v.to_vec()).collect::<Vec<_>>());
        assert!(zl.iter().all(|e| matches!(e, Element::Int(_))));
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();
    }

    #[test]
    fn test_string_encodings() {
        let mid = vec![b'm'; 100];
        let big = vec![b'b'; 20_000];
        let long_num = b"12345678901234567890123456789012".to_vec();
        let zl = zl_of(&[b"", b"short", &mid, &big, &long_num]);
        assert_eq!(zl.get(zl.index(2).unwrap()), Element::Str(&mid[..]));
        assert_eq!(zl.get(zl.index(3).unwrap()), Element::Str(&big[..]));
        assert_eq!(zl.get(zl.index(-1).unwrap()), Element::Str(&long_num[..]));
        assert_eq!(zl.get(zl.index(0).unwrap()), Element::Str(b""));
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();
    }

    #[test]
    fn test_cascade_update_on_insert() {
        // Entries of 253 bytes each: prevlen 1 + enc 2 + data 250.
        let item = vec![b'x'; 250];
        let mut zl = zl_of(&[&item, &item, &item]);
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();

        // Inserting a big entry at the head widens every following prevlen.
        let big = vec![b'y'; 300];
        zl.insert(HDR_SIZE, &big).unwrap();
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();
        assert_eq!(zl.len(), 4);
        assert_eq!(zl.get(zl.index(-1).unwrap()), Element::Str(&item[..]));

        let mut p = zl.first();
        let mut sizes = Vec::new();
        while let Some(pos) = p {
            sizes.push(zl.entry(pos).prevrawlensize);
            p = zl.next(pos);
        }
        assert_eq!(sizes, [1, 5, 5, 5]);
    }

    #[test]
    fn test_delete_and_ranges() {
        let mut zl = zl_of(&[b"a", b"b", b"c", b"d", b"e"]);
        let p = zl.index(1).unwrap();
        let next = zl.delete(p).unwrap();
        assert_eq!(zl.get(next), Element::Str(b"c"));
        assert_eq!(zl.delete_range(-2, 5), 2);
        assert_eq!(collect(&zl), [b"a".to_vec(), b"c".to_vec()]);
        assert_eq!(zl.len(), 2);
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();

        let big = vec![b'z'; 400];
        let mut zl = zl_of(&[&big, b"small", b"tail"]);
        zl.delete_range(0, 1);
        Ziplist::validate_integrity(zl.as_bytes()).unwrap();
        assert_eq!(collect(&zl), [b"small".to_vec(), b"tail".to_vec()]);
    }

    #[test]
    fn test_prev_and_negative_index() {
        let zl = zl_of(&[b"a", b"1", b"c"]);
        let last = zl.index(-1).unwrap();
        assert_eq!(zl.get(last), Element::Str(b"c"));
        let mid = zl.prev(last).unwrap();
        assert_eq!(zl.get(mid), Element::Int(1));
        assert_eq!(zl.prev(zl.first().unwrap()), None);
        assert_eq!(zl.index(3), None);
        assert_eq!(zl.index(-4), None);
    }

    #[test]
    fn test_find_with_skip() {
        let zl = zl_of(&[b"f1", b"10", b"f2", b"f1", b"10", b"x"]);
        let first = zl.first().unwrap();
        assert_eq!(zl.find(first, b"f2", 1), zl.index(2));
        assert_eq!(zl.find(first, b"10", 1), zl.index(4));
        assert_eq!(zl.find(first, b"010", 0), None);
    }

    #[test]
    fn test_to_listpack() {
        let zl = zl_of(&[b"a", b"-5", b"hello world", b"123456"]);
        let lp = zl.to_listpack().unwrap();
        let items: Vec<_> = lp.iter().map(|e| e.to_vec()).collect();
        assert_eq!(items, collect(&zl));
        assert_eq!(lp.len(), 4);
    }

    #[test]
    fn test_validate_rejects_corruption() {
        let zl = zl_of(&[b"a", b"b"]);
        let good = zl.as_bytes().to_vec();
        assert!(Ziplist::from_bytes(good.clone()).is_ok());

        let mut bad_prev = good.clone();
        bad_prev[HDR_SIZE + 3] = 9;
        assert!(Ziplist::from_bytes(bad_prev).is_err());

        let mut bad_tail = good.clone();
        bad_tail[4] = HDR_SIZE as u8;
        assert!(Ziplist::from_bytes(bad_tail).is_err());

        let mut bad_enc = good;
        bad_enc[HDR_SIZE + 1] = 0xC5;
        assert!(Ziplist::from_bytes(bad_enc).is_err());
    }
}
