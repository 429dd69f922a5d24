//! Node compression for quicklist interior nodes.

use crate::error::corruption;
use crate::listpack::Listpack;

/// Nodes smaller than this are never compressed.
pub const MIN_COMPRESS_BYTES: usize = 48;

/// Compression must save at least this many bytes to be kept.
pub const MIN_COMPRESS_IMPROVE: usize = 8;

const ZSTD_LEVEL: i32 = 1;

/// A listpack held in compressed form.
#[derive(Clone, Debug)]
pub struct Compressed {
    data: Vec<u8>,
    raw_len: usize,
}

impl Compressed {
    /// Compress `lp`, or `None` if it is too small or does not shrink enough.
    pub fn new(lp: &Listpack) -> Option<Self> {
        let raw = lp.as_bytes();
        if raw.len() < MIN_COMPRESS_BYTES {
            return None;
        }
        let data = zstd::bulk::compress(raw, ZSTD_LEVEL).ok()?;
        if data.len() + MIN_COMPRESS_IMPROVE >= raw.len() {
            return None;
        }
        Some(Self {
            data,
            raw_len: raw.len(),
        })
    }

    /// Size of the compressed payload.
    pub fn compressed_len(&self) -> usize {
        self.data.len()
    }

    /// Size of the listpack once decompressed.
    pub fn raw_len(&self) -> usize {
        self.raw_len
    }

    pub fn decompress(&self) -> Listpack {
        match zstd::bulk::decompress(&self.data, self.raw_len) {
            Ok(buf) if buf.len() == self.raw_len => Listpack::from_trusted(buf),
            Ok(buf) => corruption(
                "quicklist node",
                format_args!("decompressed to {} bytes, expected {}", buf.len(), self.raw_len),
            ),
            Err(e) => corruption("quicklist node", format_args!("decompression failed: {e}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_small_listpacks_stay_raw() {
        let mut lp = Listpack::new();
        lp.append(b"tiny").unwrap();
        assert!(Compressed::new(&lp).is_none());
    }

    #[test]
    fn test_round_trip() {
        let mut lp = Listpack::new();
        for _ in 0..20 {
            lp.append(&[b'a'; 40]).unwrap();
        }
        let c = Compressed::new(&lp).unwrap();
        assert!(c.compressed_len() + MIN_COMPRESS_IMPROVE < lp.bytes());
        assert_eq!(c.raw_len(), lp.bytes());
        assert_eq!(c.decompress(), lp);
    }
}
