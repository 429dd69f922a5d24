//! Rank-aware skip list ordered by (score, member).
//!
//! Every forward link carries a span: the number of level-0 steps it covers.
//! Summing spans along a search path gives a node's rank, so rank queries and
//! rank lookups are O(log n) expected, like ordinary searches.
//!
//! Nodes live in a [`Slab`]; the header is an ordinary node with
//! [`MAX_LEVEL`] levels that never holds an element. Ranks are 1-based: the
//! first element has rank 1.
//!
//! The list does not check member uniqueness. The sorted-set layer keeps a
//! member → score table next to it and only inserts absent members.

mod range;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use smallvec::{smallvec, SmallVec};

use crate::arena::{NodeId, Slab};
use crate::error::Result;
use crate::sds::Sds;

pub use range::{LexBound, LexRange, ScoreRange};

pub const MAX_LEVEL: usize = 32;

/// Probability of promoting a node one more level.
pub const P: f64 = 0.25;

#[derive(Clone, Copy, Debug)]
struct Level {
    forward: NodeId,
    span: usize,
}

#[derive(Clone, Debug)]
struct Node {
    member: Sds,
    score: f64,
    backward: NodeId,
    levels: SmallVec<[Level; 4]>,
}

impl Node {
    /// Whether this node sorts strictly before `(score, member)`.
    #[inline]
    fn before(&self, score: f64, member: &[u8]) -> bool {
        self.score < score || (self.score == score && self.member.as_bytes() < member)
    }
}

type Update = [NodeId; MAX_LEVEL];

#[derive(Clone, Debug)]
pub struct Skiplist {
    nodes: Slab<Node>,
    header: NodeId,
    tail: NodeId,
    len: usize,
    /// Levels in use, at least 1.
    level: usize,
    rng: SmallRng,
}

impl Default for Skiplist {
    fn default() -> Self {
        Self::with_rng(SmallRng::from_entropy())
    }
}

impl Skiplist {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deterministic level draws, for tests and reproducible benchmarks.
    pub fn with_seed(seed: u64) -> Self {
        Self::with_rng(SmallRng::seed_from_u64(seed))
    }

    fn with_rng(rng: SmallRng) -> Self {
        let mut nodes = Slab::new();
        let header = nodes.insert(Node {
            member: Sds::empty(),
            score: 0.0,
            backward: NodeId::NIL,
            levels: smallvec![Level { forward: NodeId::NIL, span: 0 }; MAX_LEVEL],
        });
        Self {
            nodes,
            header,
            tail: NodeId::NIL,
            len: 0,
            level: 1,
            rng,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Number of levels currently in use.
    pub fn level(&self) -> usize {
        self.level
    }

    #[inline]
    fn forward(&self, id: NodeId, level: usize) -> NodeId {
        self.nodes[id].levels[level].forward
    }

    #[inline]
    fn span(&self, id: NodeId, level: usize) -> usize {
        self.nodes[id].levels[level].span
    }

    #[inline]
    fn entry(&self, id: NodeId) -> (&Sds, f64) {
        let node = &self.nodes[id];
        (&node.member, node.score)
    }

    fn random_level(&mut self) -> usize {
        let threshold = (P * 0xFFFF as f64) as u32;
        let mut level = 1;
        while level < MAX_LEVEL && (self.rng.gen::<u32>() & 0xFFFF) < threshold {
            level += 1;
        }
        level
    }

    /// Last node before `(score, member)` on every level in use.
    fn find_update(&self, score: f64, member: &[u8]) -> Update {
        let mut update = [NodeId::NIL; MAX_LEVEL];
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if !self.nodes[f].before(score, member) {
                    break;
                }
                x = f;
            }
            update[i] = x;
        }
        update
    }

    // ========================================================================
    // Insert / delete
    // ========================================================================

    /// Insert `member` with `score`. The member must not already be present.
    pub fn insert(&mut self, score: f64, member: Sds) -> Result<()> {
        debug_assert!(!score.is_nan(), "NaN score");
        let mut update = [NodeId::NIL; MAX_LEVEL];
        let mut rank = [0usize; MAX_LEVEL];

        let mut x = self.header;
        for i in (0..self.level).rev() {
            rank[i] = if i == self.level - 1 { 0 } else { rank[i + 1] };
            while let Some(f) = self.forward(x, i).get() {
                if !self.nodes[f].before(score, &member) {
                    break;
                }
                rank[i] += self.span(x, i);
                x = f;
            }
            update[i] = x;
        }

        let level = self.random_level();
        let id = self.nodes.try_insert(Node {
            member,
            score,
            backward: NodeId::NIL,
            levels: smallvec![Level { forward: NodeId::NIL, span: 0 }; level],
        })?;

        if level > self.level {
            for i in self.level..level {
                rank[i] = 0;
                update[i] = self.header;
                self.nodes[self.header].levels[i].span = self.len;
            }
            self.level = level;
        }

        for i in 0..level {
            let prev = self.nodes[update[i]].levels[i];
            self.nodes[id].levels[i] = Level {
                forward: prev.forward,
                span: prev.span - (rank[0] - rank[i]),
            };
            self.nodes[update[i]].levels[i] = Level {
                forward: id,
                span: rank[0] - rank[i] + 1,
            };
        }
        for i in level..self.level {
            self.nodes[update[i]].levels[i].span += 1;
        }

        self.nodes[id].backward = if update[0] == self.header { NodeId::NIL } else { update[0] };
        match self.forward(id, 0).get() {
            Some(next) => self.nodes[next].backward = id,
            None => self.tail = id,
        }
        self.len += 1;
        Ok(())
    }

    /// Unlink `id` given its predecessors and free it.
    fn delete_node(&mut self, id: NodeId, update: &Update) -> Node {
        for i in 0..self.level {
            let u = update[i];
            if self.forward(u, i) == id {
                let removed = self.nodes[id].levels[i];
                let pred = &mut self.nodes[u].levels[i];
                pred.span = pred.span + removed.span - 1;
                pred.forward = removed.forward;
            } else {
                self.nodes[u].levels[i].span -= 1;
            }
        }

        let backward = self.nodes[id].backward;
        match self.forward(id, 0).get() {
            Some(next) => self.nodes[next].backward = backward,
            None => self.tail = backward,
        }
        while self.level > 1 && self.forward(self.header, self.level - 1).is_nil() {
            self.level -= 1;
        }
        self.len -= 1;
        self.nodes.remove(id)
    }

    /// Node holding exactly `(score, member)`, given its predecessors.
    fn matching(&self, update: &Update, score: f64, member: &[u8]) -> Option<NodeId> {
        let id = self.forward(update[0], 0).get()?;
        let node = &self.nodes[id];
        (node.score == score && node.member.as_bytes() == member).then_some(id)
    }

    /// Remove `(score, member)`. Returns the stored member if it was present.
    pub fn delete(&mut self, score: f64, member: &[u8]) -> Option<Sds> {
        let update = self.find_update(score, member);
        let id = self.matching(&update, score, member)?;
        Some(self.delete_node(id, &update).member)
    }

    /// Move `member` from `cur_score` to `new_score`.
    ///
    /// The node is updated in place when it stays strictly between its
    /// neighbours; otherwise it is removed and reinserted. Returns `false` if
    /// `(cur_score, member)` is not in the list.
    pub fn update_score(&mut self, member: &[u8], cur_score: f64, new_score: f64) -> Result<bool> {
        let update = self.find_update(cur_score, member);
        let Some(id) = self.matching(&update, cur_score, member) else {
            return Ok(false);
        };

        let node = &self.nodes[id];
        let after_prev = node.backward.get().map_or(true, |b| self.nodes[b].score < new_score);
        let before_next = self.forward(id, 0).get().map_or(true, |f| self.nodes[f].score > new_score);
        if after_prev && before_next {
            self.nodes[id].score = new_score;
            return Ok(true);
        }

        let node = self.delete_node(id, &update);
        self.insert(new_score, node.member)?;
        Ok(true)
    }

    pub fn clear(&mut self) {
        let rng = self.rng.clone();
        *self = Self::with_rng(rng);
    }

    // ========================================================================
    // Rank
    // ========================================================================

    /// 1-based rank of `(score, member)`, or `None` if absent.
    pub fn rank(&self, score: f64, member: &[u8]) -> Option<usize> {
        let mut rank = 0;
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                let node = &self.nodes[f];
                if node.score < score || (node.score == score && node.member.as_bytes() <= member) {
                    rank += self.span(x, i);
                    x = f;
                } else {
                    break;
                }
            }
            if x != self.header {
                let node = &self.nodes[x];
                if node.score == score && node.member.as_bytes() == member {
                    return Some(rank);
                }
            }
        }
        None
    }

    fn node_by_rank(&self, rank: usize) -> Option<NodeId> {
        if rank == 0 || rank > self.len {
            return None;
        }
        let mut traversed = 0;
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if traversed + self.span(x, i) > rank {
                    break;
                }
                traversed += self.span(x, i);
                x = f;
            }
            if traversed == rank {
                return Some(x);
            }
        }
        None
    }

    /// Element at 1-based `rank`.
    pub fn element_by_rank(&self, rank: usize) -> Option<(&Sds, f64)> {
        self.node_by_rank(rank).map(|id| self.entry(id))
    }

    pub fn first(&self) -> Option<(&Sds, f64)> {
        self.forward(self.header, 0).get().map(|id| self.entry(id))
    }

    pub fn last(&self) -> Option<(&Sds, f64)> {
        self.tail.get().map(|id| self.entry(id))
    }

    // ========================================================================
    // Score ranges
    // ========================================================================

    /// Whether any element falls inside `range`.
    pub fn is_in_range(&self, range: &ScoreRange) -> bool {
        if range.is_empty() {
            return false;
        }
        match (self.tail.get(), self.forward(self.header, 0).get()) {
            (Some(last), Some(first)) => {
                range.gte_min(self.nodes[last].score) && range.lte_max(self.nodes[first].score)
            }
            _ => false,
        }
    }

    fn first_id_in_range(&self, range: &ScoreRange) -> Option<NodeId> {
        if !self.is_in_range(range) {
            return None;
        }
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if range.gte_min(self.nodes[f].score) {
                    break;
                }
                x = f;
            }
        }
        let id = self.forward(x, 0).get()?;
        range.lte_max(self.nodes[id].score).then_some(id)
    }

    fn last_id_in_range(&self, range: &ScoreRange) -> Option<NodeId> {
        if !self.is_in_range(range) {
            return None;
        }
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if !range.lte_max(self.nodes[f].score) {
                    break;
                }
                x = f;
            }
        }
        let id = x.get().filter(|&id| id != self.header)?;
        range.gte_min(self.nodes[id].score).then_some(id)
    }

    pub fn first_in_range(&self, range: &ScoreRange) -> Option<(&Sds, f64)> {
        self.first_id_in_range(range).map(|id| self.entry(id))
    }

    pub fn last_in_range(&self, range: &ScoreRange) -> Option<(&Sds, f64)> {
        self.last_id_in_range(range).map(|id| self.entry(id))
    }

    /// Elements inside `range`, lowest first.
    pub fn range_by_score<'a>(&'a self, range: &'a ScoreRange) -> impl Iterator<Item = (&'a Sds, f64)> + 'a {
        Iter::starting_at(self, self.first_id_in_range(range), false)
            .take_while(move |&(_, score)| range.lte_max(score))
    }

    /// Remove every element inside `range`, returning the removed members.
    pub fn delete_range_by_score(&mut self, range: &ScoreRange) -> Vec<Sds> {
        let mut update = [NodeId::NIL; MAX_LEVEL];
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if range.gte_min(self.nodes[f].score) {
                    break;
                }
                x = f;
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        let mut next = self.forward(x, 0);
        while let Some(id) = next.get() {
            if !range.lte_max(self.nodes[id].score) {
                break;
            }
            next = self.forward(id, 0);
            removed.push(self.delete_node(id, &update).member);
        }
        removed
    }

    // ========================================================================
    // Lexicographic ranges (all scores equal)
    // ========================================================================

    pub fn is_in_lex_range(&self, range: &LexRange) -> bool {
        if range.is_empty() {
            return false;
        }
        match (self.tail.get(), self.forward(self.header, 0).get()) {
            (Some(last), Some(first)) => {
                range.gte_min(&self.nodes[last].member) && range.lte_max(&self.nodes[first].member)
            }
            _ => false,
        }
    }

    fn first_id_in_lex_range(&self, range: &LexRange) -> Option<NodeId> {
        if !self.is_in_lex_range(range) {
            return None;
        }
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if range.gte_min(&self.nodes[f].member) {
                    break;
                }
                x = f;
            }
        }
        let id = self.forward(x, 0).get()?;
        range.lte_max(&self.nodes[id].member).then_some(id)
    }

    fn last_id_in_lex_range(&self, range: &LexRange) -> Option<NodeId> {
        if !self.is_in_lex_range(range) {
            return None;
        }
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if !range.lte_max(&self.nodes[f].member) {
                    break;
                }
                x = f;
            }
        }
        let id = x.get().filter(|&id| id != self.header)?;
        range.gte_min(&self.nodes[id].member).then_some(id)
    }

    pub fn first_in_lex_range(&self, range: &LexRange) -> Option<(&Sds, f64)> {
        self.first_id_in_lex_range(range).map(|id| self.entry(id))
    }

    pub fn last_in_lex_range(&self, range: &LexRange) -> Option<(&Sds, f64)> {
        self.last_id_in_lex_range(range).map(|id| self.entry(id))
    }

    pub fn range_by_lex<'a>(&'a self, range: &'a LexRange) -> impl Iterator<Item = (&'a Sds, f64)> + 'a {
        Iter::starting_at(self, self.first_id_in_lex_range(range), false)
            .take_while(move |(member, _)| range.lte_max(member))
    }

    pub fn delete_range_by_lex(&mut self, range: &LexRange) -> Vec<Sds> {
        let mut update = [NodeId::NIL; MAX_LEVEL];
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if range.gte_min(&self.nodes[f].member) {
                    break;
                }
                x = f;
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        let mut next = self.forward(x, 0);
        while let Some(id) = next.get() {
            if !range.lte_max(&self.nodes[id].member) {
                break;
            }
            next = self.forward(id, 0);
            removed.push(self.delete_node(id, &update).member);
        }
        removed
    }

    // ========================================================================
    // Rank ranges
    // ========================================================================

    /// Elements with 1-based ranks in `start..=end`.
    pub fn range_by_rank(&self, start: usize, end: usize) -> impl Iterator<Item = (&Sds, f64)> + '_ {
        let take = if start == 0 || end < start { 0 } else { end - start + 1 };
        Iter::starting_at(self, self.node_by_rank(start), false).take(take)
    }

    /// Elements with 1-based ranks in `start..=end`, from `end` down to `start`.
    pub fn range_by_rank_rev(&self, start: usize, end: usize) -> impl Iterator<Item = (&Sds, f64)> + '_ {
        let end = end.min(self.len);
        let take = if start == 0 || end < start { 0 } else { end - start + 1 };
        Iter::starting_at(self, self.node_by_rank(end), true).take(take)
    }

    /// Remove elements with 1-based ranks in `start..=end`.
    pub fn delete_range_by_rank(&mut self, start: usize, end: usize) -> Vec<Sds> {
        let mut update = [NodeId::NIL; MAX_LEVEL];
        let mut traversed = 0;
        let mut x = self.header;
        for i in (0..self.level).rev() {
            while let Some(f) = self.forward(x, i).get() {
                if traversed + self.span(x, i) >= start {
                    break;
                }
                traversed += self.span(x, i);
                x = f;
            }
            update[i] = x;
        }

        let mut removed = Vec::new();
        traversed += 1;
        let mut next = self.forward(x, 0);
        while let Some(id) = next.get() {
            if traversed > end {
                break;
            }
            next = self.forward(id, 0);
            removed.push(self.delete_node(id, &update).member);
            traversed += 1;
        }
        removed
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    /// Elements in ascending (score, member) order.
    pub fn iter(&self) -> Iter<'_> {
        Iter::starting_at(self, self.forward(self.header, 0).get(), false)
    }

    /// Elements in descending order.
    pub fn iter_rev(&self) -> Iter<'_> {
        Iter::starting_at(self, self.tail.get(), true)
    }

    /// Check ordering, spans, backward links, tail, and length.
    pub fn validate(&self) -> std::result::Result<(), String> {
        // Level-0 order gives every node its rank.
        let mut rank_of = std::collections::HashMap::new();
        rank_of.insert(self.header, 0usize);
        let mut prev = NodeId::NIL;
        let mut x = self.forward(self.header, 0);
        let mut n = 0;
        while let Some(id) = x.get() {
            n += 1;
            let node = &self.nodes[id];
            if node.backward != prev {
                return Err(format!("rank {n}: bad backward link"));
            }
            if let Some(p) = prev.get() {
                let p = &self.nodes[p];
                if !p.before(node.score, &node.member) {
                    return Err(format!("rank {n}: out of order"));
                }
            }
            rank_of.insert(id, n);
            prev = id;
            x = node.levels[0].forward;
        }
        if n != self.len || prev != self.tail {
            return Err(format!("len {} tail mismatch after walking {n}", self.len));
        }
        if self.nodes.len() != self.len + 1 {
            return Err("allocated nodes do not match length".into());
        }

        for (id, node) in self.nodes.iter() {
            let top = if id == self.header { self.level } else { node.levels.len() };
            if top > self.level {
                return Err(format!("node of height {top} above list level {}", self.level));
            }
            for i in 0..top {
                let from = rank_of[&id];
                let to = match node.levels[i].forward.get() {
                    Some(f) => rank_of[&f],
                    None => self.len,
                };
                let expect = to - from;
                if node.levels[i].span != expect {
                    return Err(format!("level {i} span {} at rank {from}, expected {expect}", node.levels[i].span));
                }
            }
        }
        if self.level > 1 && self.forward(self.header, self.level - 1).is_nil() {
            return Err("empty top level not trimmed".into());
        }
        Ok(())
    }
}

/// Iterator over `(member, score)` in either direction.
pub struct Iter<'a> {
    list: &'a Skiplist,
    next: Option<NodeId>,
    rev: bool,
}

impl<'a> Iter<'a> {
    fn starting_at(list: &'a Skiplist, start: Option<NodeId>, rev: bool) -> Self {
        Self { list, next: start, rev }
    }
}

impl<'a> Iterator for Iter<'a> {
    type Item = (&'a Sds, f64);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let list = self.list;
        let node = &list.nodes[id];
        self.next = if self.rev { node.backward.get() } else { node.levels[0].forward.get() };
        Some((&node.member, node.score))
    }
}
