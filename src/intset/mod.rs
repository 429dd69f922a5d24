//! Sorted set of distinct integers in a single packed buffer.
//!
//! ```text
//! <encoding u32 LE> <length u32 LE> <contents: length * encoding bytes>
//! ```
//!
//! Every member is stored at the width of the widest one (2, 4 or 8 bytes).
//! Adding a member that does not fit upgrades the whole set in place. Sets
//! never downgrade.

use rand::Rng;

use crate::error::{Error, Result};

const HDR_SIZE: usize = 8;

/// Member width in bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum IntWidth {
    I16 = 2,
    I32 = 4,
    I64 = 8,
}

impl IntWidth {
    /// Narrowest width that holds `v`.
    #[inline]
    pub fn for_value(v: i64) -> Self {
        if i16::try_from(v).is_ok() {
            IntWidth::I16
        } else if i32::try_from(v).is_ok() {
            IntWidth::I32
        } else {
            IntWidth::I64
        }
    }

    #[inline]
    fn bytes(self) -> usize {
        self as usize
    }

    fn from_header(v: u32) -> Option<Self> {
        match v {
            2 => Some(IntWidth::I16),
            4 => Some(IntWidth::I32),
            8 => Some(IntWidth::I64),
            _ => None,
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct Intset {
    buf: Vec<u8>,
}

impl Intset {
    pub fn new() -> Self {
        let mut buf = Vec::with_capacity(HDR_SIZE);
        buf.extend_from_slice(&(IntWidth::I16 as u32).to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        Self { buf }
    }

    /// Adopt an externally supplied blob, checking the header, the size and
    /// that members are strictly ascending.
    pub fn from_bytes(buf: Vec<u8>) -> Result<Self> {
        const WHAT: &str = "intset";
        if buf.len() < HDR_SIZE {
            return Err(Error::corrupt(WHAT, "shorter than the header"));
        }
        let enc = u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]);
        let width = IntWidth::from_header(enc)
            .ok_or_else(|| Error::corrupt(WHAT, format!("unknown encoding {enc}")))?;
        let len = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]) as usize;
        if HDR_SIZE + len * width.bytes() != buf.len() {
            return Err(Error::corrupt(WHAT, format!("{len} members do not fill {} bytes", buf.len())));
        }
        let set = Self { buf };
        let ascending = set.iter().zip(set.iter().skip(1)).all(|(a, b)| a < b);
        if !ascending {
            return Err(Error::corrupt(WHAT, "members not strictly ascending"));
        }
        Ok(set)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn width(&self) -> IntWidth {
        let enc = u32::from_le_bytes([self.buf[0], self.buf[1], self.buf[2], self.buf[3]]);
        IntWidth::from_header(enc).unwrap_or(IntWidth::I64)
    }

    fn set_width(&mut self, width: IntWidth) {
        self.buf[0..4].copy_from_slice(&(width as u32).to_le_bytes());
    }

    #[inline]
    pub fn len(&self) -> usize {
        u32::from_le_bytes([self.buf[4], self.buf[5], self.buf[6], self.buf[7]]) as usize
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn set_len(&mut self, len: usize) {
        self.buf[4..8].copy_from_slice(&(len as u32).to_le_bytes());
    }

    /// Size of the serialized blob.
    pub fn blob_len(&self) -> usize {
        self.buf.len()
    }

    #[inline]
    fn get_encoded(&self, pos: usize, width: IntWidth) -> i64 {
        let at = HDR_SIZE + pos * width.bytes();
        let b = &self.buf[at..at + width.bytes()];
        match width {
            IntWidth::I16 => i64::from(i16::from_le_bytes([b[0], b[1]])),
            IntWidth::I32 => i64::from(i32::from_le_bytes([b[0], b[1], b[2], b[3]])),
            IntWidth::I64 => {
                let mut b8 = [0u8; 8];
                b8.copy_from_slice(b);
                i64::from_le_bytes(b8)
            }
        }
    }

    #[inline]
    fn get_unchecked(&self, pos: usize) -> i64 {
        self.get_encoded(pos, self.width())
    }

    fn set_at(&mut self, pos: usize, value: i64, width: IntWidth) {
        let at = HDR_SIZE + pos * width.bytes();
        let dst = &mut self.buf[at..at + width.bytes()];
        match width {
            IntWidth::I16 => dst.copy_from_slice(&(value as i16).to_le_bytes()),
            IntWidth::I32 => dst.copy_from_slice(&(value as i32).to_le_bytes()),
            IntWidth::I64 => dst.copy_from_slice(&value.to_le_bytes()),
        }
    }

    /// Member at `pos` in ascending order.
    pub fn get(&self, pos: usize) -> Option<i64> {
        (pos < self.len()).then(|| self.get_unchecked(pos))
    }

    pub fn min(&self) -> Option<i64> {
        self.get(0)
    }

    pub fn max(&self) -> Option<i64> {
        self.len().checked_sub(1).map(|last| self.get_unchecked(last))
    }

    /// Binary search: `Ok(pos)` if present, else `Err(insert_pos)`.
    pub fn search(&self, value: i64) -> std::result::Result<usize, usize> {
        let len = self.len();
        if len == 0 {
            return Err(0);
        }
        // The ends are checked first so appends avoid the search.
        if value > self.get_unchecked(len - 1) {
            return Err(len);
        }
        if value < self.get_unchecked(0) {
            return Err(0);
        }

        let (mut lo, mut hi) = (0usize, len);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            let cur = self.get_unchecked(mid);
            if cur == value {
                return Ok(mid);
            } else if cur < value {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        Err(lo)
    }

    pub fn contains(&self, value: i64) -> bool {
        IntWidth::for_value(value) <= self.width() && self.search(value).is_ok()
    }

    /// Widen every member and add `value`, which lies outside the current range.
    fn upgrade_and_add(&mut self, value: i64) -> Result<()> {
        let old = self.width();
        let new = IntWidth::for_value(value);
        let len = self.len();
        let prepend = usize::from(value < 0);

        self.buf.try_reserve(HDR_SIZE + (len + 1) * new.bytes() - self.buf.len())?;
        self.buf.resize(HDR_SIZE + (len + 1) * new.bytes(), 0);
        // Back to front so no member is overwritten before it is read.
        for pos in (0..len).rev() {
            let v = self.get_encoded(pos, old);
            self.set_at(pos + prepend, v, new);
        }
        self.set_width(new);
        if prepend == 1 {
            self.set_at(0, value, new);
        } else {
            self.set_at(len, value, new);
        }
        self.set_len(len + 1);
        Ok(())
    }

    /// Add `value`. Returns `false` if it was already a member.
    pub fn add(&mut self, value: i64) -> Result<bool> {
        if IntWidth::for_value(value) > self.width() {
            self.upgrade_and_add(value)?;
            return Ok(true);
        }
        let pos = match self.search(value) {
            Ok(_) => return Ok(false),
            Err(pos) => pos,
        };
        let width = self.width();
        let at = HDR_SIZE + pos * width.bytes();
        self.buf.try_reserve(width.bytes())?;
        self.buf.splice(at..at, std::iter::repeat(0).take(width.bytes()));
        self.set_at(pos, value, width);
        let len = self.len();
        self.set_len(len + 1);
        Ok(true)
    }

    /// Remove `value`. Returns `false` if it was not a member.
    pub fn remove(&mut self, value: i64) -> bool {
        if IntWidth::for_value(value) > self.width() {
            return false;
        }
        match self.search(value) {
            Ok(pos) => {
                let width = self.width().bytes();
                let at = HDR_SIZE + pos * width;
                self.buf.drain(at..at + width);
                let len = self.len();
                self.set_len(len - 1);
                true
            }
            Err(_) => false,
        }
    }

    /// A uniformly chosen member.
    pub fn random<R: Rng + ?Sized>(&self, rng: &mut R) -> Option<i64> {
        if self.is_empty() {
            return None;
        }
        Some(self.get_unchecked(rng.gen_range(0..self.len())))
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = i64> + ExactSizeIterator + '_ {
        let width = self.width();
        (0..self.len()).map(move |pos| self.get_encoded(pos, width))
    }
}

impl Default for Intset {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Intset {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_set().entries(self.iter()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::SmallRng;
    use rand::SeedableRng;

    #[test]
    fn test_width_selection() {
        assert_eq!(IntWidth::for_value(32767), IntWidth::I16);
        assert_eq!(IntWidth::for_value(-32768), IntWidth::I16);
        assert_eq!(IntWidth::for_value(32768), IntWidth::I32);
        assert_eq!(IntWidth::for_value(i64::from(i32::MIN)), IntWidth::I32);
        assert_eq!(IntWidth::for_value(i64::from(i32::MAX) + 1), IntWidth::I64);
    }

    #[test]
    fn test_add_keeps_order_and_rejects_duplicates() {
        let mut is = Intset::new();
        for v in [5, 6, 4, 4] {
            is.add(v).unwrap();
        }
        assert!(!is.add(5).unwrap());
        assert_eq!(is.iter().collect::<Vec<_>>(), [4, 5, 6]);
        assert_eq!(is.blob_len(), 8 + 3 * 2);
        assert_eq!(is.as_bytes()[..8], [2, 0, 0, 0, 3, 0, 0, 0]);
    }

    #[test]
    fn test_upgrade_positive_and_negative() {
        let mut is = Intset::new();
        is.add(32).unwrap();
        is.add(65535).unwrap();
        assert_eq!(is.width(), IntWidth::I32);
        assert_eq!(is.iter().collect::<Vec<_>>(), [32, 65535]);

        is.add(-4_294_967_295).unwrap();
        assert_eq!(is.width(), IntWidth::I64);
        assert_eq!(is.iter().collect::<Vec<_>>(), [-4_294_967_295, 32, 65535]);
        assert_eq!(is.blob_len(), 8 + 3 * 8);
        assert!(is.contains(32));
        assert!(!is.contains(33));
    }

    #[test]
    fn test_remove() {
        let mut is = Intset::new();
        for v in [1, 2, 3] {
            is.add(v).unwrap();
        }
        assert!(is.remove(2));
        assert!(!is.remove(2));
        assert!(!is.remove(i64::MAX));
        assert_eq!(is.iter().collect::<Vec<_>>(), [1, 3]);
        assert_eq!(is.min(), Some(1));
        assert_eq!(is.max(), Some(3));
    }

    #[test]
    fn test_contains_wider_value_is_false() {
        let mut is = Intset::new();
        is.add(1).unwrap();
        assert!(!is.contains(1 << 40));
    }

    #[test]
    fn test_search_positions() {
        let mut is = Intset::new();
        for v in [10, 20, 30] {
            is.add(v).unwrap();
        }
        assert_eq!(is.search(20), Ok(1));
        assert_eq!(is.search(5), Err(0));
        assert_eq!(is.search(25), Err(2));
        assert_eq!(is.search(35), Err(3));
    }

    #[test]
    fn test_random_member() {
        let mut is = Intset::new();
        let mut rng = SmallRng::seed_from_u64(7);
        assert_eq!(is.random(&mut rng), None);
        for v in [-1, 0, 1] {
            is.add(v).unwrap();
        }
        for _ in 0..20 {
            assert!(is.contains(is.random(&mut rng).unwrap()));
        }
    }

    #[test]
    fn test_from_bytes_validation() {
        let mut is = Intset::new();
        for v in [1, 2, 3] {
            is.add(v).unwrap();
        }
        let good = is.as_bytes().to_vec();
        assert_eq!(Intset::from_bytes(good.clone()).unwrap(), is);

        let mut unsorted = good.clone();
        unsorted.swap(8, 10);
        assert!(Intset::from_bytes(unsorted).is_err());

        let mut bad_width = good.clone();
        bad_width[0] = 3;
        assert!(Intset::from_bytes(bad_width).is_err());

        let mut bad_len = good;
        bad_len[4] = 4;
        assert!(Intset::from_bytes(bad_len).is_err());
    }
}
