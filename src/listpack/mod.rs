//! Listpack: a compact packed sequence of strings and integers.
//!
//! One contiguous buffer holds the whole sequence:
//!
//! ```text
//! <total-bytes u32 LE> <count u16 LE> <entry> <entry> ... <0xFF>
//! ```
//!
//! Entries are encoded by [`crate::encoding`]. Each carries its own
//! back-length, so the sequence can be walked in both directions without an
//! index. Positions handed out by this module are byte offsets of an entry's
//! first byte and are invalidated by any mutation.
//!
//! The count field saturates at 65535 ("unknown"); once saturated, [`len`]
//! falls back to a full scan.
//!
//! [`len`]: Listpack::len

use std::fmt;

use crate::encoding::{self, Element, EOF};
use crate::error::{corruption, Error, Result};

/// Header size: total bytes (4) + element count (2).
pub const HDR_SIZE: usize = 6;

/// Count value meaning "count not stored, scan to find out".
pub const NUMELE_UNKNOWN: u16 = u16::MAX;

/// Largest listpack any caller should grow on purpose.
pub const MAX_SAFETY_SIZE: usize = 1 << 30;

/// Side of an existing entry at which to insert.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Where {
    Before,
    After,
}

/// End of a sequence.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum End {
    Head,
    Tail,
}

#[derive(Clone, PartialEq, Eq)]
pub struct Listpack {
    buf: Vec<u8>,
}

impl Listpack {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Empty listpack with room for `capacity` bytes of entries.
    pub fn with_capacity(capacity: usize) -> Self {
        let mut buf = Vec::with_capacity(HDR_SIZE + 1 + capacity);
        buf.extend_from_slice(&((HDR_SIZE + 1) as u32).to_le_bytes());
        buf.extend_from_slice(&0u16.to_le_bytes());
        buf.push(EOF);
        Self { buf }
    }

    /// Adopt an externally supplied blob after full integrity validation.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        Self::validate_integrity(&buf, true)?;
        Ok(Self { buf })
    }

    /// Adopt bytes this crate produced itself (e.g. a decompressed node).
    pub(crate) fn from_trusted(buf: Vec<u8>) -> Self {
        debug_assert!(Self::validate_integrity(&buf, false).is_ok());
        Self { buf }
    }

    /// Check that `buf` is a well-formed listpack.
    ///
    /// The shallow check covers the header and end marker only. The deep check
    /// also walks every entry, verifying each encoding, that back-lengths
    /// agree with forward lengths, and that the stored count is right.
    pub fn validate_integrity(buf: &[u8], deep: bool) -> Result<()> {
        const WHAT: &str = "listpack";
        if buf.len() < HDR_SIZE + 1 {
            return Err(Error::corrupt(WHAT, format!("{} bytes is shorter than the header", buf.len())));
        }
        let total = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if total != buf.len() {
            return Err(Error::corrupt(WHAT, format!("header says {total} bytes, blob has {}", buf.len())));
        }
        let eof = buf.len() - 1;
        if buf[eof] != EOF {
            return Err(Error::corrupt(WHAT, "missing end marker"));
        }
        if !deep {
            return Ok(());
        }

        let mut p = HDR_SIZE;
        let mut count = 0usize;
        while p < eof {
            let enc_len = encoding::encoded_len(&buf[p..eof])
                .ok_or_else(|| Error::corrupt(WHAT, format!("bad encoding at offset {p}")))?;
            let end = p + enc_len + encoding::backlen_size(enc_len);
            if end > eof {
                return Err(Error::corrupt(WHAT, format!("entry at offset {p} overruns the end")));
            }
            if encoding::decode(&buf[p..eof]).is_none() {
                return Err(Error::corrupt(WHAT, format!("undecodable entry at offset {p}")));
            }
            match encoding::decode_backlen(&buf[..end], end) {
                Some((l, _)) if l == enc_len => {}
                _ => {
                    return Err(Error::corrupt(WHAT, format!("back-length mismatch at offset {p}")));
                }
            }
            p = end;
            count += 1;
        }
        if p != eof {
            return Err(Error::corrupt(WHAT, "entries do not end at the end marker"));
        }

        let stored = u16::from_le_bytes([buf[4], buf[5]]);
        if stored != NUMELE_UNKNOWN && usize::from(stored) != count {
            return Err(Error::corrupt(WHAT, format!("header count {stored}, found {count} entries")));
        }
        Ok(())
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.buf
    }

    /// Total encoded size, header and end marker included.
    #[inline]
    pub fn bytes(&self) -> usize {
        self.buf.len()
    }

    /// Whether growing by `add` bytes keeps the listpack under the safety size.
    #[inline]
    pub fn safe_to_add(&self, add: usize) -> bool {
        self.buf.len() + add <= MAX_SAFETY_SIZE
    }

    /// Exact number of bytes `value` would take as a new entry.
    pub fn entry_size_for(value: &[u8]) -> usize {
        encoding::entry_size(Element::classify(value))
    }

    // ========================================================================
    // Header
    // ========================================================================

    #[inline]
    fn header_count(&self) -> u16 {
        u16::from_le_bytes([self.buf[4], self.buf[5]])
    }

    #[inline]
    fn set_header_count(&mut self, n: u16) {
        self.buf[4..6].copy_from_slice(&n.to_le_bytes());
    }

    #[inline]
    fn sync_total_bytes(&mut self) {
        let total = self.buf.len() as u32;
        self.buf[0..4].copy_from_slice(&total.to_le_bytes());
    }

    fn scan_count(&self) -> usize {
        let mut n = 0;
        let mut p = self.first();
        while let Some(pos) = p {
            n += 1;
            p = self.next(pos);
        }
        n
    }

    /// Number of elements. O(1) unless the stored count saturated.
    pub fn len(&self) -> usize {
        match self.header_count() {
            NUMELE_UNKNOWN => self.scan_count(),
            n => usize::from(n),
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.buf[HDR_SIZE] == EOF
    }

    fn add_count(&mut self, added: usize) {
        let cur = self.header_count();
        if cur == NUMELE_UNKNOWN {
            return;
        }
        let n = usize::from(cur) + added;
        self.set_header_count(u16::try_from(n).unwrap_or(NUMELE_UNKNOWN).min(NUMELE_UNKNOWN));
    }

    fn sub_count(&mut self, removed: usize) {
        let cur = self.header_count();
        let n = if cur == NUMELE_UNKNOWN {
            self.scan_count()
        } else {
            usize::from(cur) - removed
        };
        self.set_header_count(u16::try_from(n).unwrap_or(NUMELE_UNKNOWN).min(NUMELE_UNKNOWN));
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Offset of the end marker.
    #[inline]
    fn eof_pos(&self) -> usize {
        self.buf.len() - 1
    }

    /// Size of the whole entry (encoding+data+backlen) at `p`.
    fn entry_len_at(&self, p: usize) -> usize {
        match encoding::encoded_len(&self.buf[p..]) {
            Some(l) => l + encoding::backlen_size(l),
            None => corruption(
                "listpack",
                format_args!("invalid encoding byte {:#04x} at offset {p}", self.buf[p]),
            ),
        }
    }

    pub fn first(&self) -> Option<usize> {
        if self.is_empty() {
            None
        } else {
            Some(HDR_SIZE)
        }
    }

    pub fn last(&self) -> Option<usize> {
        self.prev(self.eof_pos())
    }

    /// Entry after `p`, or `None` at the end.
    pub fn next(&self, p: usize) -> Option<usize> {
        let q = p + self.entry_len_at(p);
        if q >= self.eof_pos() {
            None
        } else {
            Some(q)
        }
    }

    /// Entry before `p` (which may be the end marker), or `None` at the start.
    pub fn prev(&self, p: usize) -> Option<usize> {
        if p <= HDR_SIZE {
            return None;
        }
        match encoding::decode_backlen(&self.buf, p) {
            Some((l, bl)) if l + bl <= p - HDR_SIZE => Some(p - bl - l),
            _ => corruption("listpack", format_args!("bad back-length before offset {p}")),
        }
    }

    /// Decode the entry at `p`.
    pub fn get(&self, p: usize) -> Element<'_> {
        match encoding::decode(&self.buf[p..]) {
            Some((ele, _)) => ele,
            None => corruption("listpack", format_args!("undecodable entry at offset {p}")),
        }
    }

    /// Position of the element at `index`; negative indices count from the tail.
    ///
    /// Scans from whichever end is nearer.
    pub fn seek(&self, index: isize) -> Option<usize> {
        let len = self.len() as isize;
        let index = if index < 0 { len + index } else { index };
        if index < 0 || index >= len {
            return None;
        }

        if index < len / 2 {
            let mut p = self.first()?;
            for _ in 0..index {
                p = self.next(p)?;
            }
            Some(p)
        } else {
            let mut p = self.last()?;
            for _ in 0..(len - 1 - index) {
                p = self.prev(p)?;
            }
            Some(p)
        }
    }

    /// Element at `index` (negative counts from the tail).
    pub fn get_index(&self, index: isize) -> Option<Element<'_>> {
        self.seek(index).map(|p| self.get(p))
    }

    pub fn iter(&self) -> Iter<'_> {
        Iter {
            lp: self,
            front: self.first(),
            back: self.last(),
        }
    }

    /// Find the first entry equal to `value`, starting at `p` and comparing
    /// only every `skip + 1`-th entry (so `skip = 1` visits the keys of a
    /// key/value sequence).
    pub fn find(&self, p: usize, value: &[u8], skip: usize) -> Option<usize> {
        let want = Element::classify(value);
        let mut cur = Some(p);
        let mut skipcnt = 0;
        while let Some(pos) = cur {
            if skipcnt == 0 {
                if self.get(pos) == want {
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

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Replace `remove` bytes at `at` with `bytes`, keeping the header in sync.
    fn splice(&mut self, at: usize, remove: usize, bytes: &[u8]) -> Result<()> {
        let new_total = self.buf.len() - remove + bytes.len();
        if new_total > u32::MAX as usize {
            return Err(Error::TooLarge {
                what: "listpack",
                bytes: new_total,
            });
        }
        if bytes.len() > remove {
            self.buf.try_reserve(bytes.len() - remove)?;
        }
        self.buf.splice(at..at + remove, bytes.iter().copied());
        self.sync_total_bytes();
        Ok(())
    }

    fn insert_element(&mut self, ele: Element<'_>, p: usize, side: Where) -> Result<usize> {
        let at = match side {
            Where::Before => p,
            Where::After => p + self.entry_len_at(p),
        };
        let mut entry = Vec::with_capacity(encoding::entry_size(ele));
        encoding::encode_entry(ele, &mut entry);
        self.splice(at, 0, &entry)?;
        self.add_count(1);
        Ok(at)
    }

    /// Insert `value` before or after the entry at `p`, returning the new
    /// entry's position. `p` may be the end marker when inserting before it.
    pub fn insert(&mut self, p: usize, side: Where, value: &[u8]) -> Result<usize> {
        self.insert_element(Element::classify(value), p, side)
    }

    pub fn insert_int(&mut self, p: usize, side: Where, value: i64) -> Result<usize> {
        self.insert_element(Element::Int(value), p, side)
    }

    pub fn append(&mut self, value: &[u8]) -> Result<()> {
        let eof = self.eof_pos();
        self.insert(eof, Where::Before, value).map(drop)
    }

    pub fn append_int(&mut self, value: i64) -> Result<()> {
        let eof = self.eof_pos();
        self.insert_int(eof, Where::Before, value).map(drop)
    }

    pub fn prepend(&mut self, value: &[u8]) -> Result<()> {
        self.insert(HDR_SIZE, Where::Before, value).map(drop)
    }

    pub fn prepend_int(&mut self, value: i64) -> Result<()> {
        self.insert_int(HDR_SIZE, Where::Before, value).map(drop)
    }

    fn replace_element(&mut self, p: usize, ele: Element<'_>) -> Result<usize> {
        let old = self.entry_len_at(p);
        let mut entry = Vec::with_capacity(encoding::entry_size(ele));
        encoding::encode_entry(ele, &mut entry);
        self.splice(p, old, &entry)?;
        Ok(p)
    }

    /// Overwrite the entry at `p`. Its position does not change.
    pub fn replace(&mut self, p: usize, value: &[u8]) -> Result<usize> {
        self.replace_element(p, Element::classify(value))
    }

    pub fn replace_int(&mut self, p: usize, value: i64) -> Result<usize> {
        self.replace_element(p, Element::Int(value))
    }

    /// Remove the entry at `p`. Returns the position of the entry that took
    /// its place, or `None` if it was the last one.
    pub fn delete(&mut self, p: usize) -> Option<usize> {
        let len = self.entry_len_at(p);
        self.buf.drain(p..p + len);
        self.sync_total_bytes();
        self.sub_count(1);
        if self.buf[p] == EOF {
            None
        } else {
            Some(p)
        }
    }

    /// Remove up to `count` entries starting at position `p`, returning how
    /// many were removed.
    pub fn delete_range_at(&mut self, p: usize, count: usize) -> usize {
        let mut end = p;
        let mut removed = 0;
        while removed < count && self.buf[end] != EOF {
            end += self.entry_len_at(end);
            removed += 1;
        }
        if removed == 0 {
            return 0;
        }
        self.buf.drain(p..end);
        self.sync_total_bytes();
        self.sub_count(removed);
        removed
    }

    /// Remove up to `count` entries starting at `index` (negative counts from
    /// the tail), returning how many were removed.
    pub fn delete_range(&mut self, index: isize, count: usize) -> usize {
        match self.seek(index) {
            Some(p) if count > 0 => self.delete_range_at(p, count),
            _ => 0,
        }
    }

    /// Append every entry of `other` in one reallocation.
    pub fn append_listpack(&mut self, other: &Listpack) -> Result<()> {
        let entries = &other.buf[HDR_SIZE..other.eof_pos()];
        let eof = self.eof_pos();
        self.splice(eof, 0, entries)?;
        let known = self.header_count() != NUMELE_UNKNOWN && other.header_count() != NUMELE_UNKNOWN;
        if known {
            self.add_count(usize::from(other.header_count()));
        } else {
            self.set_header_count(NUMELE_UNKNOWN);
        }
        Ok(())
    }

    /// Insert every entry of `other` in front of this listpack's entries.
    pub fn prepend_listpack(&mut self, other: &Listpack) -> Result<()> {
        let entries = &other.buf[HDR_SIZE..other.eof_pos()];
        self.splice(HDR_SIZE, 0, entries)?;
        let known = self.header_count() != NUMELE_UNKNOWN && other.header_count() != NUMELE_UNKNOWN;
        if known {
            self.add_count(usize::from(other.header_count()));
        } else {
            self.set_header_count(NUMELE_UNKNOWN);
        }
        Ok(())
    }

    /// Return unused capacity to the allocator.
    pub fn shrink_to_fit(&mut self) {
        self.buf.shrink_to_fit();
    }
}

impl Default for Listpack {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Listpack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list()
            .entries(self.iter().map(|e| match e {
                Element::Int(v) => format!("{v}"),
                Element::Str(s) => format!("{:?}", String::from_utf8_lossy(s)),
            }))
            .finish()
    }
}

/// Double-ended iterator over a listpack's elements.
pub struct Iter<'a> {
    lp: &'a Listpack,
    front: Option<usize>,
    back: Option<usize>,
}

impl<'a> Iterator for Iter<'a> {
    type Item = Element<'a>;

    fn next(&mut self) -> Option<Element<'a>> {
        let p = self.front?;
        if self.front == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.front = self.lp.next(p);
        }
        Some(self.lp.get(p))
    }
}

impl<'a> DoubleEndedIterator for Iter<'a> {
    fn next_back(&mut self) -> Option<Element<'a>> {
        let p = self.back?;
        if self.front == self.back {
            self.front = None;
            self.back = None;
        } else {
            self.back = self.lp.prev(p);
        }
        Some(self.lp.get(p))
    }
}

impl<'a> IntoIterator for &'a Listpack {
    type Item = Element<'a>;
    type IntoIter = Iter<'a>;

    fn into_iter(self) -> Iter<'a> {
        self.iter()
    }
}
