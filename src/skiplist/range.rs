//! Score and lexicographic range specifications.

use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::sds::Sds;
use crate::util::string2d;

/// A score interval with independently exclusive ends.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ScoreRange {
    pub min: f64,
    pub max: f64,
    pub min_exclusive: bool,
    pub max_exclusive: bool,
}

impl ScoreRange {
    pub fn new(min: f64, min_exclusive: bool, max: f64, max_exclusive: bool) -> Self {
        Self {
            min,
            max,
            min_exclusive,
            max_exclusive,
        }
    }

    pub fn inclusive(min: f64, max: f64) -> Self {
        Self::new(min, false, max, false)
    }

    /// Parse bounds such as `1.5`, `(1.5`, `-inf`, `+inf`.
    pub fn parse(min: &[u8], max: &[u8]) -> Result<Self> {
        let (min, min_exclusive) = parse_score_bound(min)?;
        let (max, max_exclusive) = parse_score_bound(max)?;
        Ok(Self::new(min, min_exclusive, max, max_exclusive))
    }

    #[inline]
    pub fn gte_min(&self, value: f64) -> bool {
        if self.min_exclusive {
            value > self.min
        } else {
            value >= self.min
        }
    }

    #[inline]
    pub fn lte_max(&self, value: f64) -> bool {
        if self.max_exclusive {
            value < self.max
        } else {
            value <= self.max
        }
    }

    pub fn contains(&self, value: f64) -> bool {
        self.gte_min(value) && self.lte_max(value)
    }

    /// Whether no score can satisfy both ends.
    pub fn is_empty(&self) -> bool {
        self.min > self.max || (self.min == self.max && (self.min_exclusive || self.max_exclusive))
    }
}

fn parse_score_bound(s: &[u8]) -> Result<(f64, bool)> {
    let (digits, exclusive) = match s.split_first() {
        Some((b'(', rest)) => (rest, true),
        _ => (s, false),
    };
    let value = string2d(digits).ok_or(Error::InvalidRange)?;
    Ok((value, exclusive))
}

/// One end of a lexicographic range.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum LexBound {
    /// `-`: below every string.
    NegInf,
    /// `+`: above every string.
    PosInf,
    /// `[value`
    Inclusive(Sds),
    /// `(value`
    Exclusive(Sds),
}

impl LexBound {
    pub fn parse(s: &[u8]) -> Option<Self> {
        match s.split_first()? {
            (b'-', []) => Some(LexBound::NegInf),
            (b'+', []) => Some(LexBound::PosInf),
            (b'[', rest) => Some(LexBound::Inclusive(Sds::new(rest))),
            (b'(', rest) => Some(LexBound::Exclusive(Sds::new(rest))),
            _ => None,
        }
    }

    fn is_exclusive(&self) -> bool {
        matches!(self, LexBound::Exclusive(_))
    }

    /// Order of the bound positions, ignoring exclusivity.
    fn cmp_position(&self, other: &LexBound) -> Ordering {
        use LexBound::*;
        match (self, other) {
            (NegInf, NegInf) | (PosInf, PosInf) => Ordering::Equal,
            (NegInf, _) | (_, PosInf) => Ordering::Less,
            (PosInf, _) | (_, NegInf) => Ordering::Greater,
            (Inclusive(a) | Exclusive(a), Inclusive(b) | Exclusive(b)) => a.cmp(b),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LexRange {
    pub min: LexBound,
    pub max: LexBound,
}

impl LexRange {
    pub fn new(min: LexBound, max: LexBound) -> Self {
        Self { min, max }
    }

    pub fn parse(min: &[u8], max: &[u8]) -> Result<Self> {
        match (LexBound::parse(min), LexBound::parse(max)) {
            (Some(min), Some(max)) => Ok(Self { min, max }),
            _ => Err(Error::InvalidRange),
        }
    }

    pub fn gte_min(&self, value: &[u8]) -> bool {
        match &self.min {
            LexBound::NegInf => true,
            LexBound::PosInf => false,
            LexBound::Inclusive(m) => value >= m.as_bytes(),
            LexBound::Exclusive(m) => value > m.as_bytes(),
        }
    }

    pub fn lte_max(&self, value: &[u8]) -> bool {
        match &self.max {
            LexBound::NegInf => false,
            LexBound::PosInf => true,
            LexBound::Inclusive(m) => value <= m.as_bytes(),
            LexBound::Exclusive(m) => value < m.as_bytes(),
        }
    }

    pub fn contains(&self, value: &[u8]) -> bool {
        self.gte_min(value) && self.lte_max(value)
    }

    pub fn is_empty(&self) -> bool {
        match self.min.cmp_position(&self.max) {
            Ordering::Greater => true,
            Ordering::Equal => self.min.is_exclusive() || self.max.is_exclusive(),
            Ordering::Less => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_score_parse() {
        let r = ScoreRange::parse(b"(1", b"+inf").unwrap();
        assert!(r.min_exclusive && !r.max_exclusive);
        assert!(!r.contains(1.0));
        assert!(r.contains(1e300));
        assert!(ScoreRange::parse(b"abc", b"1").is_err());
        assert!(ScoreRange::parse(b"(1", b"(1").unwrap().is_empty());
        assert!(!ScoreRange::parse(b"1", b"1").unwrap().is_empty());
    }

    #[test]
    fn test_lex_bounds() {
        assert_eq!(LexBound::parse(b"-"), Some(LexBound::NegInf));
        assert_eq!(LexBound::parse(b"[a"), Some(LexBound::Inclusive(Sds::from("a"))));
        assert_eq!(LexBound::parse(b"-a"), None);
        assert_eq!(LexBound::parse(b""), None);

        let r = LexRange::parse(b"(a", b"[c").unwrap();
        assert!(!r.contains(b"a"));
        assert!(r.contains(b"ab"));
        assert!(r.contains(b"c"));
        assert!(!r.contains(b"ca"));
        assert!(LexRange::parse(b"+", b"-").unwrap().is_empty());
        assert!(LexRange::parse(b"[a", b"(a").unwrap().is_empty());
        assert!(!LexRange::parse(b"[a", b"[a").unwrap().is_empty());
    }
}
