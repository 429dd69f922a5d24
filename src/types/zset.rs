//! Sorted set values.
//!
//! Small sorted sets are a listpack of alternating member and score entries
//! kept in (score, member) order. Past `zset_max_listpack_entries` members, or
//! once a member is longer than `zset_max_listpack_value` bytes, the set
//! becomes a member → score [`Dict`] plus a [`Skiplist`] holding the same
//! pairs in order.
//!
//! Ranks in this module are 0-based positions.

use std::cmp::Ordering;

use tracing::debug;

use crate::config::Config;
use crate::dict::Dict;
use crate::encoding::Element;
use crate::error::{corruption, Error, Result};
use crate::listpack::{Listpack, Where};
use crate::object::Encoding;
use crate::sds::Sds;
use crate::skiplist::{ScoreRange, Skiplist};
use crate::util::{d2string, ll2string, string2d, MAX_LONG_DIGITS};

/// Result of [`ZSetValue::add`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZAddOutcome {
    Added,
    Updated,
    Unchanged,
}

/// The full encoding: score lookup by member and order by score.
#[derive(Clone, Debug)]
pub struct ZSetIndex {
    dict: Dict<Sds, f64>,
    list: Skiplist,
}

#[derive(Clone, Debug)]
pub enum ZSetValue {
    Listpack(Listpack),
    SkipList(Box<ZSetIndex>),
}

impl Default for ZSetValue {
    fn default() -> Self {
        ZSetValue::Listpack(Listpack::new())
    }
}

fn element_score(ele: Element<'_>) -> f64 {
    match ele {
        Element::Int(v) => v as f64,
        Element::Str(s) => string2d(s).unwrap_or_else(|| {
            corruption(
                "zset listpack",
                format_args!("score {:?} is not a float", String::from_utf8_lossy(s)),
            )
        }),
    }
}

/// Compare a stored member with `member` as byte strings.
fn member_cmp(ele: Element<'_>, member: &[u8]) -> Ordering {
    match ele {
        Element::Str(s) => s.cmp(member),
        Element::Int(v) => {
            let mut buf = [0u8; MAX_LONG_DIGITS + 1];
            let n = ll2string(&mut buf, v);
            buf[..n].cmp(member)
        }
    }
}

/// Score of the pair whose member sits at `p`.
fn lp_score(lp: &Listpack, p: usize) -> f64 {
    match lp.next(p) {
        Some(s) => element_score(lp.get(s)),
        None => corruption("zset listpack", format_args!("member at {p} has no score")),
    }
}

/// Iterate `(member_pos, score)` over a listpack zset.
fn lp_pairs(lp: &Listpack) -> impl Iterator<Item = (usize, f64)> + '_ {
    std::iter::successors(lp.first(), move |&p| lp.next(p).and_then(|s| lp.next(s)))
        .map(move |p| (p, lp_score(lp, p)))
}

impl ZSetValue {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encoding(&self) -> Encoding {
        match self {
            ZSetValue::Listpack(_) => Encoding::Listpack,
            ZSetValue::SkipList(_) => Encoding::Skiplist,
        }
    }

    pub fn len(&self) -> usize {
        match self {
            ZSetValue::Listpack(lp) => lp.len() / 2,
            ZSetValue::SkipList(z) => z.list.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lp_find(lp: &Listpack, member: &[u8]) -> Option<usize> {
        lp.find(lp.first()?, member, 1)
    }

    pub fn score(&self, member: &[u8]) -> Option<f64> {
        match self {
            ZSetValue::Listpack(lp) => Self::lp_find(lp, member).map(|p| lp_score(lp, p)),
            ZSetValue::SkipList(z) => z.dict.get(member).copied(),
        }
    }

    /// Insert a pair keeping (score, member) order.
    fn lp_insert(lp: &mut Listpack, member: &[u8], score: f64) -> Result<()> {
        let score_repr = d2string(score);
        let at = lp_pairs(lp).find(|&(p, s)| {
            s > score || (s == score && member_cmp(lp.get(p), member) == Ordering::Greater)
        });
        match at {
            Some((p, _)) => {
                let m = lp.insert(p, Where::Before, member)?;
                if let Err(e) = lp.insert(m, Where::After, score_repr.as_bytes()) {
                    lp.delete(m);
                    return Err(e);
                }
            }
            None => {
                lp.append(member)?;
                if let Err(e) = lp.append(score_repr.as_bytes()) {
                    if let Some(last) = lp.last() {
                        lp.delete(last);
                    }
                    return Err(e);
                }
            }
        }
        Ok(())
    }

    /// Add `member` or change its score.
    pub fn add(&mut self, member: &[u8], score: f64, config: &Config) -> Result<ZAddOutcome> {
        if score.is_nan() {
            return Err(Error::NotFloat);
        }

        if let ZSetValue::Listpack(lp) = self {
            if let Some(p) = Self::lp_find(lp, member) {
                let old = lp_score(lp, p);
                if old == score {
                    return Ok(ZAddOutcome::Unchanged);
                }
                // The old pair stays until the new one is in place.
                Self::lp_insert(lp, member, score)?;
                let Some(stale) = lp_pairs(lp)
                    .find(|&(q, s)| s == old && member_cmp(lp.get(q), member) == Ordering::Equal)
                    .map(|(q, _)| q)
                else {
                    corruption("zset listpack", format_args!("lost old pair of updated member"));
                };
                lp.delete_range_at(stale, 2);
                return Ok(ZAddOutcome::Updated);
            }
            if lp.len() / 2 + 1 <= config.zset_max_listpack_entries
                && member.len() <= config.zset_max_listpack_value
            {
                Self::lp_insert(lp, member, score)?;
                return Ok(ZAddOutcome::Added);
            }
            self.convert(config)?;
        }

        let ZSetValue::SkipList(z) = self else {
            unreachable!("converted above");
        };
        if let Some(&old) = z.dict.get(member) {
            if old == score {
                return Ok(ZAddOutcome::Unchanged);
            }
            z.list.update_score(member, old, score)?;
            if let Some(cur) = z.dict.find(member) {
                *cur = score;
            }
            return Ok(ZAddOutcome::Updated);
        }
        let key = Sds::try_new(member)?;
        z.list.insert(score, key.clone())?;
        z.dict.replace(key, score)?;
        Ok(ZAddOutcome::Added)
    }

    /// Remove `member`. Returns `false` if it was absent.
    pub fn remove(&mut self, member: &[u8]) -> bool {
        match self {
            ZSetValue::Listpack(lp) => match Self::lp_find(lp, member) {
                Some(p) => lp.delete_range_at(p, 2) == 2,
                None => false,
            },
            ZSetValue::SkipList(z) => match z.dict.unlink(member) {
                Some((_, score)) => z.list.delete(score, member).is_some(),
                None => false,
            },
        }
    }

    /// 0-based position of `member`, counted from the highest score if
    /// `reverse`.
    pub fn rank(&self, member: &[u8], reverse: bool) -> Option<usize> {
        let (pos, len) = match self {
            ZSetValue::Listpack(lp) => {
                let p = Self::lp_find(lp, member)?;
                let pos = lp_pairs(lp).position(|(q, _)| q == p)?;
                (pos, lp.len() / 2)
            }
            ZSetValue::SkipList(z) => {
                let score = *z.dict.get(member)?;
                (z.list.rank(score, member)? - 1, z.list.len())
            }
        };
        Some(if reverse { len - 1 - pos } else { pos })
    }

    /// Pairs at 0-based positions `start..=end`; negative indices count from
    /// the end, as in LRANGE.
    pub fn range_by_rank(&self, start: isize, end: isize, reverse: bool) -> Vec<(Vec<u8>, f64)> {
        let len = self.len() as isize;
        let start = if start < 0 { (len + start).max(0) } else { start };
        let end = if end < 0 { len + end } else { end.min(len - 1) };
        if start > end || start >= len {
            return Vec::new();
        }
        let (start, end) = (start as usize, end as usize);
        // Positions counted from the low end.
        let (lo, hi) = if reverse {
            (len as usize - 1 - end, len as usize - 1 - start)
        } else {
            (start, end)
        };

        let mut out: Vec<(Vec<u8>, f64)> = match self {
            ZSetValue::Listpack(lp) => lp_pairs(lp)
                .skip(lo)
                .take(hi - lo + 1)
                .map(|(p, s)| (lp.get(p).to_vec(), s))
                .collect(),
            ZSetValue::SkipList(z) => z
                .list
                .range_by_rank(lo + 1, hi + 1)
                .map(|(m, s)| (m.as_bytes().to_vec(), s))
                .collect(),
        };
        if reverse {
            out.reverse();
        }
        out
    }

    /// Pairs with scores inside `range`, lowest first.
    pub fn range_by_score(&self, range: &ScoreRange) -> Vec<(Vec<u8>, f64)> {
        match self {
            ZSetValue::Listpack(lp) => lp_pairs(lp)
                .skip_while(|&(_, s)| !range.gte_min(s))
                .take_while(|&(_, s)| range.lte_max(s))
                .map(|(p, s)| (lp.get(p).to_vec(), s))
                .collect(),
            ZSetValue::SkipList(z) => z
                .list
                .range_by_score(range)
                .map(|(m, s)| (m.as_bytes().to_vec(), s))
                .collect(),
        }
    }

    /// Switch to the dict + skip list encoding.
    pub fn convert(&mut self, config: &Config) -> Result<()> {
        let ZSetValue::Listpack(lp) = self else {
            return Ok(());
        };
        let mut dict = Dict::with_seed(config.hash_seed);
        dict.expand(lp.len() / 2)?;
        let mut list = Skiplist::new();
        for (p, score) in lp_pairs(lp) {
            let member = lp.get(p).to_sds();
            list.insert(score, member.clone())?;
            dict.replace(member, score)?;
        }
        debug!(members = dict.len(), "zset converted from listpack to skiplist");
        *self = ZSetValue::SkipList(Box::new(ZSetIndex { dict, list }));
        Ok(())
    }

    pub fn free_effort(&self) -> usize {
        match self {
            ZSetValue::Listpack(_) => 1,
            ZSetValue::SkipList(z) => z.list.len(),
        }
    }

    /// Check that both halves of the full encoding agree.
    pub fn validate(&self) -> std::result::Result<(), String> {
        match self {
            ZSetValue::Listpack(lp) => {
                let pairs: Vec<(usize, f64)> = lp_pairs(lp).collect();
                for w in pairs.windows(2) {
                    let ((pa, sa), (pb, sb)) = (w[0], w[1]);
                    let next_member = lp.get(pb).to_vec();
                    if sa > sb || (sa == sb && member_cmp(lp.get(pa), &next_member) != Ordering::Less) {
                        return Err("listpack zset out of order".into());
                    }
                }
                Ok(())
            }
            ZSetValue::SkipList(z) => {
                z.list.validate()?;
                if z.dict.len() != z.list.len() {
                    return Err(format!("dict has {} members, list {}", z.dict.len(), z.list.len()));
                }
                for (m, s) in z.list.iter() {
                    if z.dict.get(m.as_bytes()) != Some(&s) {
                        return Err(format!("score mismatch for {m}"));
                    }
                }
                Ok(())
            }
        }
    }
}
