//! Quicklist: a doubly linked list of listpack nodes.
//!
//! Large lists are kept as a chain of small listpacks, which gives O(1) push
//! and pop at both ends while keeping the per-element overhead of a packed
//! encoding. Node size is bounded by the fill factor:
//!
//! - `fill < 0`: node byte size is capped by a tier (-1 = 4KiB ... -5 = 64KiB)
//! - `fill >= 0`: node element count is capped at `fill`, and no node grows
//!   past [`SIZE_SAFETY_LIMIT`] bytes
//!
//! Inserting into a full node splits it, and the neighbourhood of the split is
//! merged back together wherever the fill factor allows, so the node count
//! follows the content rather than the insertion history.
//!
//! With a compression depth `d > 0`, every node more than `d` nodes away from
//! both ends is kept zstd-compressed. Reads through a compressed node
//! decompress a private copy; writes decompress the node in place and
//! recompress it afterwards.

mod compress;

use std::borrow::Cow;

use tracing::debug;

use crate::arena::{NodeId, Slab};
use crate::config::Config;
use crate::encoding::{self, ElementBuf};
use crate::error::{corruption, Result};
use crate::listpack::{End, Listpack, Where};
use crate::ziplist::Ziplist;

pub use compress::{Compressed, MIN_COMPRESS_BYTES, MIN_COMPRESS_IMPROVE};

/// Byte ceiling for count-limited nodes.
pub const SIZE_SAFETY_LIMIT: usize = 8192;

/// Byte-size tiers selected by negative fill factors.
const OPTIMIZATION_LEVEL: [usize; 5] = [4096, 8192, 16384, 32768, 65536];

pub const FILL_MAX: i32 = 1 << 15;
pub const COMPRESS_MAX: u32 = 1 << 16;

/// Listpack header + end marker, saved once when two nodes merge.
const LISTPACK_FRAMING: usize = 7;

/// Clamp a fill factor into `[-5, FILL_MAX]`.
pub fn clamp_fill(fill: i32) -> i32 {
    fill.clamp(-(OPTIMIZATION_LEVEL.len() as i32), FILL_MAX)
}

pub fn clamp_compress_depth(depth: u32) -> u32 {
    depth.min(COMPRESS_MAX)
}

/// Whether a node of `sz` bytes holding `count` elements respects `fill`.
fn fill_allows(fill: i32, sz: usize, count: usize) -> bool {
    if fill < 0 {
        let tier = OPTIMIZATION_LEVEL[(fill.unsigned_abs() as usize - 1).min(OPTIMIZATION_LEVEL.len() - 1)];
        if sz <= tier {
            return true;
        }
    }
    if sz > SIZE_SAFETY_LIMIT {
        return false;
    }
    fill >= 0 && count <= fill as usize
}

/// Direction of iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Head to tail.
    Forward,
    /// Tail to head.
    Backward,
}

#[derive(Clone, Debug)]
enum Payload {
    Raw(Listpack),
    Compressed(Compressed),
}

#[derive(Clone, Debug)]
struct Node {
    prev: NodeId,
    next: NodeId,
    payload: Payload,
    /// Raw listpack size in bytes.
    sz: usize,
    count: usize,
}

impl Node {
    fn new(lp: Listpack) -> Self {
        Self {
            prev: NodeId::NIL,
            next: NodeId::NIL,
            sz: lp.bytes(),
            count: lp.len(),
            payload: Payload::Raw(lp),
        }
    }

    /// Read access; compressed nodes are decompressed into a private copy.
    fn lp(&self) -> Cow<'_, Listpack> {
        match &self.payload {
            Payload::Raw(lp) => Cow::Borrowed(lp),
            Payload::Compressed(c) => Cow::Owned(c.decompress()),
        }
    }

    /// Write access; decompresses the node in place.
    fn lp_mut(&mut self) -> &mut Listpack {
        if let Payload::Compressed(c) = &self.payload {
            self.payload = Payload::Raw(c.decompress());
        }
        match &mut self.payload {
            Payload::Raw(lp) => lp,
            Payload::Compressed(_) => unreachable!("node was just decompressed"),
        }
    }

    fn is_compressed(&self) -> bool {
        matches!(self.payload, Payload::Compressed(_))
    }

    fn decompress(&mut self) {
        if self.is_compressed() {
            self.lp_mut();
        }
    }

    /// Compress if worthwhile; otherwise the node stays raw.
    fn compress(&mut self) {
        if let Payload::Raw(lp) = &self.payload {
            if let Some(c) = Compressed::new(lp) {
                self.payload = Payload::Compressed(c);
            }
        }
    }

    /// Refresh the cached size and count after the listpack changed.
    fn sync(&mut self) {
        if let Payload::Raw(lp) = &self.payload {
            self.sz = lp.bytes();
            self.count = lp.len();
        }
    }
}

/// Position of `offset` inside a node's listpack.
fn seek_in(lp: &Listpack, offset: usize) -> usize {
    lp.seek(offset as isize).unwrap_or_else(|| {
        corruption(
            "quicklist",
            format_args!("node holds {} entries, offset {offset} missing", lp.len()),
        )
    })
}

#[derive(Clone, Debug)]
pub struct Quicklist {
    nodes: Slab<Node>,
    head: NodeId,
    tail: NodeId,
    /// Total elements across all nodes.
    count: usize,
    fill: i32,
    compress: u32,
}

impl Quicklist {
    pub fn new(fill: i32, compress: u32) -> Self {
        Self {
            nodes: Slab::new(),
            head: NodeId::NIL,
            tail: NodeId::NIL,
            count: 0,
            fill: clamp_fill(fill),
            compress: clamp_compress_depth(compress),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.list_max_listpack_size, config.list_compress_depth)
    }

    pub fn set_fill(&mut self, fill: i32) {
        self.fill = clamp_fill(fill);
    }

    /// Change the compression depth. Existing nodes adjust as they are touched.
    pub fn set_compress_depth(&mut self, depth: u32) {
        self.compress = clamp_compress_depth(depth);
    }

    pub fn set_options(&mut self, fill: i32, depth: u32) {
        self.set_fill(fill);
        self.set_compress_depth(depth);
    }

    pub fn fill(&self) -> i32 {
        self.fill
    }

    pub fn compress_depth(&self) -> u32 {
        self.compress
    }

    /// Number of elements.
    #[inline]
    pub fn len(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn compressed_node_count(&self) -> usize {
        self.nodes.iter().filter(|(_, n)| n.is_compressed()).count()
    }

    // ========================================================================
    // Node management
    // ========================================================================

    fn allow_insert(&self, id: NodeId, value: &[u8]) -> bool {
        let node = &self.nodes[id];
        fill_allows(self.fill, node.sz + Listpack::entry_size_for(value), node.count + 1)
    }

    fn allow_merge(&self, a: NodeId, b: NodeId) -> bool {
        if a.is_nil() || b.is_nil() {
            return false;
        }
        let (a, b) = (&self.nodes[a], &self.nodes[b]);
        fill_allows(self.fill, a.sz + b.sz - LISTPACK_FRAMING, a.count + b.count)
    }

    /// Keep the compression window in shape after `id` was touched.
    ///
    /// Nodes within `compress` of either end are decompressed; `id` is
    /// compressed if it lies outside that window, and so are the two nodes
    /// just past it. `id` may be NIL to only refresh the window.
    fn compress_around(&mut self, id: NodeId) {
        let depth = self.compress as usize;
        if depth == 0 || self.nodes.len() < depth * 2 {
            return;
        }

        let mut forward = self.head;
        let mut reverse = self.tail;
        let mut in_depth = false;
        for _ in 0..depth {
            self.nodes[forward].decompress();
            self.nodes[reverse].decompress();
            if forward == id || reverse == id {
                in_depth = true;
            }
            // The two walks met: every node is within depth.
            if forward == reverse || self.nodes[forward].next == reverse {
                return;
            }
            forward = self.nodes[forward].next;
            reverse = self.nodes[reverse].prev;
        }

        if !in_depth {
            if let Some(id) = id.get() {
                self.nodes[id].compress();
            }
        }
        self.nodes[forward].compress();
        self.nodes[reverse].compress();
    }

    /// Link `new` next to `old` (before or after it). `old` may be NIL only
    /// when the list has no nodes yet, or to link at a NIL head/tail.
    fn link_node(&mut self, old: NodeId, new: NodeId, after: bool) {
        if after {
            self.nodes[new].prev = old;
            if let Some(o) = old.get() {
                let old_next = self.nodes[o].next;
                self.nodes[new].next = old_next;
                if let Some(n) = old_next.get() {
                    self.nodes[n].prev = new;
                }
                self.nodes[o].next = new;
            }
            if self.tail == old {
                self.tail = new;
            }
        } else {
            self.nodes[new].next = old;
            if let Some(o) = old.get() {
                let old_prev = self.nodes[o].prev;
                self.nodes[new].prev = old_prev;
                if let Some(p) = old_prev.get() {
                    self.nodes[p].next = new;
                }
                self.nodes[o].prev = new;
            }
            if self.head == old {
                self.head = new;
            }
        }
        if self.head.is_nil() {
            self.head = new;
        }
        if self.tail.is_nil() {
            self.tail = new;
        }
        if !old.is_nil() {
            self.compress_around(old);
        }
        self.compress_around(new);
    }

    /// Unlink and free a node, dropping its elements from the total.
    fn del_node(&mut self, id: NodeId) {
        let node = self.nodes.remove(id);
        if let Some(n) = node.next.get() {
            self.nodes[n].prev = node.prev;
        }
        if let Some(p) = node.prev.get() {
            self.nodes[p].next = node.next;
        }
        if self.tail == id {
            self.tail = node.prev;
        }
        if self.head == id {
            self.head = node.next;
        }
        self.count -= node.count;
        self.compress_around(NodeId::NIL);
    }

    /// After editing node `id`: free it if empty, else recompress as needed.
    fn settle(&mut self, id: NodeId) {
        if self.nodes[id].count == 0 {
            self.del_node(id);
        } else {
            self.compress_around(id);
        }
    }

    /// Split `id` at `offset`, returning a new unlinked node.
    ///
    /// With `after`, `id` keeps `[0, offset]` and the new node gets the rest.
    /// Otherwise `id` keeps `[offset, ..)` and the new node gets `[0, offset)`.
    fn split_node(&mut self, id: NodeId, offset: usize, after: bool) -> Result<NodeId> {
        let (orig_start, orig_extent) = if after { (offset + 1, usize::MAX) } else { (0, offset) };
        let (new_start, new_extent) = if after { (0, offset + 1) } else { (offset, usize::MAX) };

        let mut new_lp = self.nodes[id].lp().into_owned();
        new_lp.delete_range(new_start as isize, new_extent);
        let new_id = self.nodes.try_insert(Node::new(new_lp))?;

        let node = &mut self.nodes[id];
        node.lp_mut().delete_range(orig_start as isize, orig_extent);
        node.sync();
        let kept = node.count;
        debug!(
            kept,
            moved = self.nodes[new_id].count,
            "split quicklist node"
        );
        Ok(new_id)
    }

    /// Append `b`'s elements to `a` and free `b`. Returns the surviving node.
    fn merge_pair(&mut self, a: NodeId, b: NodeId) -> NodeId {
        let b_lp = self.nodes[b].lp().into_owned();
        let node = &mut self.nodes[a];
        if node.lp_mut().append_listpack(&b_lp).is_err() {
            // Merging is an optimisation; leave both nodes as they are.
            return a;
        }
        node.sync();
        debug!(count = node.count, bytes = node.sz, "merged quicklist nodes");
        // `b`'s elements now live in `a`.
        self.nodes[b].count = 0;
        self.del_node(b);
        self.compress_around(a);
        a
    }

    /// Merge around `center` wherever the fill factor allows: the two nodes
    /// before it, the two after it, then `center` with each neighbour.
    fn merge_nodes(&mut self, center: NodeId) {
        let prev = self.nodes[center].prev;
        let prev_prev = prev.get().map_or(NodeId::NIL, |p| self.nodes[p].prev);
        let next = self.nodes[center].next;
        let next_next = next.get().map_or(NodeId::NIL, |n| self.nodes[n].next);

        if self.allow_merge(prev_prev, prev) {
            self.merge_pair(prev_prev, prev);
        }
        if self.allow_merge(next, next_next) {
            self.merge_pair(next, next_next);
        }

        let center_prev = self.nodes[center].prev;
        let target = if self.allow_merge(center_prev, center) {
            self.merge_pair(center_prev, center)
        } else {
            center
        };

        let target_next = self.nodes[target].next;
        if self.allow_merge(target, target_next) {
            self.merge_pair(target, target_next);
        }
    }

    /// Node and in-node offset of element `index` (negative counts from the
    /// tail). Walks from whichever end is nearer.
    fn locate(&self, index: isize) -> Option<(NodeId, usize)> {
        let i = if index < 0 { self.count as isize + index } else { index };
        if i < 0 || i as usize >= self.count {
            return None;
        }
        let i = i as usize;

        if i < self.count / 2 {
            let mut acc = 0;
            let mut id = self.head;
            while let Some(cur) = id.get() {
                let c = self.nodes[cur].count;
                if i < acc + c {
                    return Some((cur, i - acc));
                }
                acc += c;
                id = self.nodes[cur].next;
            }
        } else {
            let j = self.count - 1 - i;
            let mut acc = 0;
            let mut id = self.tail;
            while let Some(cur) = id.get() {
                let c = self.nodes[cur].count;
                if j < acc + c {
                    return Some((cur, c - 1 - (j - acc)));
                }
                acc += c;
                id = self.nodes[cur].prev;
            }
        }
        None
    }

    // ========================================================================
    // Public operations
    // ========================================================================

    /// Push at either end. Returns `true` if a new node had to be created.
    pub fn push(&mut self, value: &[u8], end: End) -> Result<bool> {
        let target = match end {
            End::Head => self.head,
            End::Tail => self.tail,
        };

        if !target.is_nil() && self.allow_insert(target, value) {
            let node = &mut self.nodes[target];
            match end {
                End::Head => node.lp_mut().prepend(value)?,
                End::Tail => node.lp_mut().append(value)?,
            }
            node.sync();
            self.count += 1;
            self.compress_around(target);
            return Ok(false);
        }

        let mut lp = Listpack::new();
        lp.append(value)?;
        let id = self.nodes.try_insert(Node::new(lp))?;
        self.count += 1;
        self.link_node(target, id, end == End::Tail);
        Ok(true)
    }

    pub fn push_head(&mut self, value: &[u8]) -> Result<bool> {
        self.push(value, End::Head)
    }

    pub fn push_tail(&mut self, value: &[u8]) -> Result<bool> {
        self.push(value, End::Tail)
    }

    /// Remove and return the element at one end.
    pub fn pop(&mut self, end: End) -> Option<ElementBuf> {
        let id = match end {
            End::Head => self.head,
            End::Tail => self.tail,
        }
        .get()?;

        let node = &mut self.nodes[id];
        let lp = node.lp_mut();
        let p = match end {
            End::Head => lp.first(),
            End::Tail => lp.last(),
        }?;
        let value = lp.get(p).to_buf();
        lp.delete(p);
        node.sync();
        self.count -= 1;
        self.settle(id);
        Some(value)
    }

    /// Append a whole listpack as a new tail node.
    pub fn append_listpack(&mut self, lp: Listpack) -> Result<()> {
        if lp.is_empty() {
            return Ok(());
        }
        let node = Node::new(lp);
        let added = node.count;
        let id = self.nodes.try_insert(node)?;
        self.count += added;
        let tail = self.tail;
        self.link_node(tail, id, true);
        Ok(())
    }

    /// Append a legacy ziplist node, converting it to a listpack.
    pub fn append_ziplist(&mut self, zl: &Ziplist) -> Result<()> {
        self.append_listpack(zl.to_listpack()?)
    }

    /// Element at `index` (negative counts from the tail).
    pub fn get(&self, index: isize) -> Option<ElementBuf> {
        let (id, offset) = self.locate(index)?;
        let lp = self.nodes[id].lp();
        let p = seek_in(&lp, offset);
        Some(lp.get(p).to_buf())
    }

    /// Whether the element at `index` equals `value`.
    pub fn compare(&self, index: isize, value: &[u8]) -> bool {
        match self.locate(index) {
            Some((id, offset)) => {
                let lp = self.nodes[id].lp();
                let p = seek_in(&lp, offset);
                lp.get(p).eq_bytes(value)
            }
            None => false,
        }
    }

    /// Index of the first element equal to `value`.
    pub fn position(&self, value: &[u8]) -> Option<usize> {
        self.iter().position(|e| e.as_element().eq_bytes(value))
    }

    /// Insert `value` before or after the element at `index`.
    ///
    /// Returns `false` (and changes nothing) if `index` is out of range.
    pub fn insert(&mut self, index: isize, side: Where, value: &[u8]) -> Result<bool> {
        let Some((id, offset)) = self.locate(index) else {
            return Ok(false);
        };
        self.insert_at(id, offset, side == Where::After, value)?;
        Ok(true)
    }

    fn insert_at(&mut self, id: NodeId, offset: usize, after: bool, value: &[u8]) -> Result<()> {
        let node = &self.nodes[id];
        let (next, prev) = (node.next, node.prev);
        let full = !self.allow_insert(id, value);
        let at_tail = after && offset + 1 == node.count;
        let at_head = !after && offset == 0;
        let full_next = at_tail && !next.is_nil() && !self.allow_insert(next, value);
        let full_prev = at_head && !prev.is_nil() && !self.allow_insert(prev, value);

        if !full {
            let node = &mut self.nodes[id];
            let lp = node.lp_mut();
            let p = seek_in(lp, offset);
            lp.insert(p, if after { Where::After } else { Where::Before }, value)?;
            node.sync();
            self.count += 1;
            self.compress_around(id);
        } else if at_tail && !next.is_nil() && !full_next {
            let node = &mut self.nodes[next];
            node.lp_mut().prepend(value)?;
            node.sync();
            self.count += 1;
            self.compress_around(next);
        } else if at_head && !prev.is_nil() && !full_prev {
            let node = &mut self.nodes[prev];
            node.lp_mut().append(value)?;
            node.sync();
            self.count += 1;
            self.compress_around(prev);
        } else if (at_tail && !next.is_nil()) || (at_head && !prev.is_nil()) {
            // Both this node and the neighbour are full.
            let mut lp = Listpack::new();
            lp.append(value)?;
            let new_id = self.nodes.try_insert(Node::new(lp))?;
            self.count += 1;
            self.link_node(id, new_id, after);
        } else {
            let new_id = self.split_node(id, offset, after)?;
            let node = &mut self.nodes[new_id];
            let pushed = if after {
                node.lp_mut().prepend(value)
            } else {
                node.lp_mut().append(value)
            };
            node.sync();
            self.count += 1;
            self.link_node(id, new_id, after);
            if let Err(e) = pushed {
                // The split itself is consistent; only the new value is missing.
                self.count -= 1;
                self.merge_nodes(id);
                return Err(e);
            }
            self.merge_nodes(id);
        }
        Ok(())
    }

    /// Overwrite the element at `index`. Returns `false` if out of range.
    pub fn replace(&mut self, index: isize, value: &[u8]) -> Result<bool> {
        let Some((id, offset)) = self.locate(index) else {
            return Ok(false);
        };

        let node = &self.nodes[id];
        let old_size = {
            let lp = node.lp();
            let p = seek_in(&lp, offset);
            encoding::entry_size(lp.get(p))
        };
        let new_sz = node.sz - old_size + Listpack::entry_size_for(value);

        if node.count == 1 || fill_allows(self.fill, new_sz, node.count) {
            let node = &mut self.nodes[id];
            let lp = node.lp_mut();
            let p = seek_in(lp, offset);
            lp.replace(p, value)?;
            node.sync();
            self.compress_around(id);
        } else {
            let abs = if index < 0 { self.count as isize + index } else { index };
            self.insert_at(id, offset, true, value)?;
            self.delete(abs);
        }
        Ok(true)
    }

    /// Remove and return the element at `index`.
    pub fn delete(&mut self, index: isize) -> Option<ElementBuf> {
        let (id, offset) = self.locate(index)?;
        let node = &mut self.nodes[id];
        let lp = node.lp_mut();
        let p = seek_in(lp, offset);
        let value = lp.get(p).to_buf();
        lp.delete(p);
        node.sync();
        self.count -= 1;
        self.settle(id);
        Some(value)
    }

    /// Remove up to `count` elements starting at `start` (negative counts
    /// from the tail). Returns how many were removed.
    pub fn delete_range(&mut self, start: isize, count: usize) -> usize {
        if count == 0 {
            return 0;
        }
        let extent = if start >= 0 {
            count.min(self.count.saturating_sub(start as usize))
        } else {
            count.min(start.unsigned_abs())
        };
        let Some((mut id, mut offset)) = self.locate(start) else {
            return 0;
        };

        let mut remaining = extent;
        while remaining > 0 {
            let Some(cur) = id.get() else { break };
            let next = self.nodes[cur].next;
            let node_count = self.nodes[cur].count;

            if offset == 0 && remaining >= node_count {
                self.del_node(cur);
                remaining -= node_count;
            } else {
                let del = (node_count - offset).min(remaining);
                let node = &mut self.nodes[cur];
                node.lp_mut().delete_range(offset as isize, del);
                node.sync();
                self.count -= del;
                remaining -= del;
                self.settle(cur);
            }
            id = next;
            offset = 0;
        }
        extent - remaining
    }

    /// Remove elements equal to `value`: up to `limit` from the head if
    /// positive, up to `-limit` from the tail if negative, all if zero.
    pub fn remove_matching(&mut self, value: &[u8], limit: isize) -> usize {
        let backward = limit < 0;
        let max = if limit == 0 { usize::MAX } else { limit.unsigned_abs() };
        let mut removed = 0;
        let mut id = if backward { self.tail } else { self.head };

        while let Some(cur) = id.get() {
            if removed >= max {
                break;
            }
            let following = if backward { self.nodes[cur].prev } else { self.nodes[cur].next };
            if !self.nodes[cur].lp().iter().any(|e| e.eq_bytes(value)) {
                id = following;
                continue;
            }

            let node = &mut self.nodes[cur];
            let lp = node.lp_mut();
            let mut pos = if backward { lp.last() } else { lp.first() };
            let mut here = 0;
            while let Some(p) = pos {
                if removed + here >= max {
                    break;
                }
                if lp.get(p).eq_bytes(value) {
                    pos = if backward {
                        let before = lp.prev(p);
                        lp.delete(p);
                        before
                    } else {
                        lp.delete(p)
                    };
                    here += 1;
                } else {
                    pos = if backward { lp.prev(p) } else { lp.next(p) };
                }
            }
            node.sync();
            self.count -= here;
            removed += here;
            self.settle(cur);
            id = following;
        }
        removed
    }

    /// Move the tail element to the head.
    pub fn rotate(&mut self) -> Result<()> {
        if self.count <= 1 {
            return Ok(());
        }
        let Some(value) = self.get(-1) else {
            return Ok(());
        };
        self.push(&value.into_vec(), End::Head)?;
        self.pop(End::Tail);
        Ok(())
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.head = NodeId::NIL;
        self.tail = NodeId::NIL;
        self.count = 0;
    }

    // ========================================================================
    // Iteration
    // ========================================================================

    pub fn iter(&self) -> Iter<'_> {
        self.iter_dir(Direction::Forward)
    }

    pub fn iter_rev(&self) -> Iter<'_> {
        self.iter_dir(Direction::Backward)
    }

    fn iter_dir(&self, dir: Direction) -> Iter<'_> {
        Iter {
            ql: self,
            node: match dir {
                Direction::Forward => self.head,
                Direction::Backward => self.tail,
            },
            lp: None,
            pos: None,
            dir,
        }
    }

    /// Iterate in `dir` starting at element `index` (negative counts from the
    /// tail). Empty if `index` is out of range.
    pub fn iter_from(&self, index: isize, dir: Direction) -> Iter<'_> {
        match self.locate(index) {
            Some((id, offset)) => {
                let lp = self.nodes[id].lp();
                let pos = Some(seek_in(&lp, offset));
                Iter {
                    ql: self,
                    node: id,
                    lp: Some(lp),
                    pos,
                    dir,
                }
            }
            None => Iter {
                ql: self,
                node: NodeId::NIL,
                lp: None,
                pos: None,
                dir,
            },
        }
    }

    /// Check the structural invariants: links, cached sizes and counts, no
    /// empty nodes, and raw nodes at both ends of the compression window.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut id = self.head;
        let mut prev = NodeId::NIL;
        let mut total = 0;
        let mut nodes = 0;
        while let Some(cur) = id.get() {
            let node = &self.nodes[cur];
            if node.prev != prev {
                return Err(format!("node {nodes}: bad prev link"));
            }
            let lp = node.lp();
            if lp.len() != node.count || lp.bytes() != node.sz {
                return Err(format!(
                    "node {nodes}: cached count/sz {}/{} vs {}/{}",
                    node.count,
                    node.sz,
                    lp.len(),
                    lp.bytes()
                ));
            }
            if node.count == 0 {
                return Err(format!("node {nodes} is empty"));
            }
            let depth = self.compress as usize;
            let from_tail = self.nodes.len() - 1 - nodes;
            if depth > 0 && (nodes < depth || from_tail < depth) && node.is_compressed() {
                return Err(format!("node {nodes} compressed inside depth {depth}"));
            }
            total += node.count;
            nodes += 1;
            prev = cur;
            id = node.next;
        }
        if prev != self.tail {
            return Err("tail does not match last node".into());
        }
        if nodes != self.nodes.len() {
            return Err(format!("{nodes} linked nodes, {} allocated", self.nodes.len()));
        }
        if total != self.count {
            return Err(format!("count {} but nodes hold {total}", self.count));
        }
        Ok(())
    }
}

impl Default for Quicklist {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Iterator over quicklist elements. Yields owned values because elements in
/// compressed nodes only exist in a temporary decompressed copy.
pub struct Iter<'a> {
    ql: &'a Quicklist,
    node: NodeId,
    lp: Option<Cow<'a, Listpack>>,
    pos: Option<usize>,
    dir: Direction,
}

impl<'a> Iterator for Iter<'a> {
    type Item = ElementBuf;

    fn next(&mut self) -> Option<ElementBuf> {
        let ql: &'a Quicklist = self.ql;
        loop {
            if let Some(lp) = &self.lp {
                if let Some(p) = self.pos {
                    let value = lp.get(p).to_buf();
                    self.pos = match self.dir {
                        Direction::Forward => lp.next(p),
                        Direction::Backward => lp.prev(p),
                    };
                    return Some(value);
                }
                let node = &ql.nodes[self.node];
                self.node = match self.dir {
                    Direction::Forward => node.next,
                    Direction::Backward => node.prev,
                };
                self.lp = None;
            }

            let id = self.node.get()?;
            let lp = ql.nodes[id].lp();
            self.pos = match self.dir {
                Direction::Forward => lp.first(),
                Direction::Backward => lp.last(),
            };
            self.lp = Some(lp);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(ql: &Quicklist) -> Vec<Vec<u8>> {
        ql.iter().map(ElementBuf::into_vec).collect()
    }

    fn filled(fill: i32, depth: u32, items: impl IntoIterator<Item = String>) -> Quicklist {
        let mut ql = Quicklist::new(fill, depth);
        for s in items {
            ql.push_tail(s.as_bytes()).unwrap();
        }
        ql
    }

    #[test]
    fn test_push_three_then_pop_head() {
        let mut ql = Quicklist::new(-2, 0);
        for v in ["a", "b", "c"] {
            ql.push_tail(v.as_bytes()).unwrap();
        }
        assert_eq!(ql.node_count(), 1);
        assert_eq!(ql.len(), 3);
        assert_eq!(ql.pop(End::Head).unwrap().into_vec(), b"a");
        assert_eq!(ql.len(), 2);
        ql.validate().unwrap();
    }

    #[test]
    fn test_pop_empty() {
        let mut ql = Quicklist::new(-2, 0);
        assert_eq!(ql.pop(End::Head), None);
        assert_eq!(ql.pop(End::Tail), None);
        assert_eq!(ql.get(0), None);
    }

    #[test]
    fn test_count_limit_creates_new_node() {
        let mut ql = Quicklist::new(3, 0);
        assert!(ql.push_tail(b"1").unwrap());
        assert!(!ql.push_tail(b"2").unwrap());
        assert!(!ql.push_tail(b"3").unwrap());
        assert_eq!(ql.node_count(), 1);
        assert!(ql.push_tail(b"4").unwrap());
        assert_eq!(ql.node_count(), 2);
        assert!(ql.push_head(b"0").unwrap());
        assert_eq!(ql.node_count(), 3);
        ql.validate().unwrap();
    }

    #[test]
    fn test_byte_tier_boundary() {
        // Each 100-byte string takes 103 bytes; a 4KiB node fits 39.
        let item = "x".repeat(100);
        let mut ql = filled(-1, 0, std::iter::repeat(item.clone()).take(39));
        assert_eq!(ql.node_count(), 1);
        assert!(ql.push_tail(item.as_bytes()).unwrap());
        assert_eq!(ql.node_count(), 2);
        ql.validate().unwrap();
    }

    #[test]
    fn test_safety_limit_applies_to_count_fill() {
        let item = "y".repeat(3000);
        let mut ql = Quicklist::new(100, 0);
        ql.push_tail(item.as_bytes()).unwrap();
        ql.push_tail(item.as_bytes()).unwrap();
        assert_eq!(ql.node_count(), 1);
        ql.push_tail(item.as_bytes()).unwrap();
        assert_eq!(ql.node_count(), 2);
    }

    #[test]
    fn test_index_both_ends() {
        let ql = filled(2, 0, (0..9).map(|i| i.to_string()));
        assert_eq!(ql.node_count(), 5);
        for i in 0..9isize {
            assert_eq!(ql.get(i), Some(ElementBuf::Int(i as i64)));
            assert_eq!(ql.get(i - 9), Some(ElementBuf::Int(i as i64)));
        }
        assert_eq!(ql.get(9), None);
        assert_eq!(ql.get(-10), None);
    }

    #[test]
    fn test_insert_into_full_node_splits() {
        let mut ql = filled(4, 0, ["1", "2", "3", "4"].map(String::from));
        assert!(ql.insert(1, Where::After, b"x").unwrap());
        assert_eq!(values(&ql), [b"1".to_vec(), b"2".to_vec(), b"x".to_vec(), b"3".to_vec(), b"4".to_vec()]);
        assert_eq!(ql.node_count(), 2);
        assert_eq!(ql.len(), 5);
        ql.validate().unwrap();
    }

    #[test]
    fn test_split_merges_with_small_neighbour() {
        let mut ql = filled(4, 0, ["a1", "a2", "a3", "a4", "b1", "b2", "b3", "b4"].map(String::from));
        assert_eq!(ql.node_count(), 2);
        assert_eq!(ql.delete_range(2, 2), 2);

        // Splitting the second node leaves [b1 b2], which joins [a1 a2].
        ql.insert(3, Where::After, b"x").unwrap();
        assert_eq!(ql.node_count(), 2);
        let expect: Vec<Vec<u8>> = ["a1", "a2", "b1", "b2", "x", "b3", "b4"]
            .iter()
            .map(|s| s.as_bytes().to_vec())
            .collect();
        assert_eq!(values(&ql), expect);
        ql.validate().unwrap();
    }

    #[test]
    fn test_insert_spills_into_neighbour() {
        let mut ql = filled(2, 0, ["a", "b", "c"].map(String::from));
        // [a b] [c]: inserting after b goes to the head of [c].
        ql.insert(1, Where::After, b"x").unwrap();
        assert_eq!(ql.node_count(), 2);
        // [a b] [x c]: inserting before x goes to the tail of [a b]? It is full,
        // and so is [x c], so a new node appears between them.
        ql.insert(2, Where::Before, b"y").unwrap();
        assert_eq!(ql.node_count(), 3);
        assert_eq!(
            values(&ql),
            [b"a".to_vec(), b"b".to_vec(), b"y".to_vec(), b"x".to_vec(), b"c".to_vec()]
        );
        ql.validate().unwrap();
    }

    #[test]
    fn test_insert_before_head_and_out_of_range() {
        let mut ql = filled(-2, 0, ["b"].map(String::from));
        ql.insert(0, Where::Before, b"a").unwrap();
        ql.insert(-1, Where::After, b"c").unwrap();
        assert_eq!(values(&ql), [b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);
        assert!(!ql.insert(3, Where::After, b"z").unwrap());
    }

    #[test]
    fn test_delete_range_spans_nodes() {
        let mut ql = filled(3, 0, (0..10).map(|i| i.to_string()));
        assert_eq!(ql.delete_range(2, 6), 6);
        assert_eq!(values(&ql), [b"0".to_vec(), b"1".to_vec(), b"8".to_vec(), b"9".to_vec()]);
        assert_eq!(ql.delete_range(-1, 5), 1);
        assert_eq!(ql.delete_range(10, 1), 0);
        assert_eq!(ql.len(), 3);
        ql.validate().unwrap();
    }

    #[test]
    fn test_replace_and_delete() {
        let mut ql = filled(2, 0, ["a", "b", "c"].map(String::from));
        assert!(ql.replace(1, b"B").unwrap());
        assert!(ql.replace(-1, &[b'z'; 10_000]).unwrap());
        assert_eq!(ql.get(1).unwrap().into_vec(), b"B");
        assert_eq!(ql.get(2).unwrap().into_vec().len(), 10_000);
        assert_eq!(ql.delete(0).unwrap().into_vec(), b"a");
        assert!(!ql.replace(5, b"nope").unwrap());
        ql.validate().unwrap();
    }

    #[test]
    fn test_replace_in_full_node_moves_value() {
        let item = "p".repeat(2000);
        let mut ql = filled(-1, 0, std::iter::repeat(item).take(2));
        assert_eq!(ql.node_count(), 1);
        ql.replace(0, &[b'q'; 3000]).unwrap();
        assert_eq!(ql.len(), 2);
        assert_eq!(ql.get(0).unwrap().into_vec(), vec![b'q'; 3000]);
        ql.validate().unwrap();
    }

    #[test]
    fn test_rotate_and_remove_matching() {
        let mut ql = filled(2, 0, ["x", "a", "x", "b", "x"].map(String::from));
        ql.rotate().unwrap();
        assert_eq!(ql.get(0).unwrap().into_vec(), b"x");
        assert_eq!(ql.len(), 5);

        // x x a x b
        assert_eq!(ql.remove_matching(b"x", -1), 1);
        assert_eq!(values(&ql), [b"x".to_vec(), b"x".to_vec(), b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(ql.remove_matching(b"x", 0), 2);
        assert_eq!(values(&ql), [b"a".to_vec(), b"b".to_vec()]);
        assert_eq!(ql.remove_matching(b"missing", 0), 0);
        ql.validate().unwrap();
    }

    #[test]
    fn test_iterators() {
        let ql = filled(2, 0, (0..5).map(|i| i.to_string()));
        let rev: Vec<_> = ql.iter_rev().map(ElementBuf::into_vec).collect();
        assert_eq!(rev, [b"4".to_vec(), b"3".to_vec(), b"2".to_vec(), b"1".to_vec(), b"0".to_vec()]);
        let from: Vec<_> = ql.iter_from(2, Direction::Forward).map(ElementBuf::into_vec).collect();
        assert_eq!(from, [b"2".to_vec(), b"3".to_vec(), b"4".to_vec()]);
        let back: Vec<_> = ql.iter_from(-3, Direction::Backward).map(ElementBuf::into_vec).collect();
        assert_eq!(back, [b"2".to_vec(), b"1".to_vec(), b"0".to_vec()]);
        assert_eq!(ql.iter_from(7, Direction::Forward).count(), 0);
        assert_eq!(ql.position(b"3"), Some(3));
        assert!(ql.compare(4, b"4"));
    }

    #[test]
    fn test_compression_window() {
        let item = "a".repeat(50);
        let mut ql = filled(4, 1, std::iter::repeat(item.clone()).take(20));
        assert_eq!(ql.node_count(), 5);
        assert_eq!(ql.compressed_node_count(), 3);
        ql.validate().unwrap();
        assert!(ql.iter().all(|e| e.into_vec() == item.as_bytes()));
        assert_eq!(ql.get(10).unwrap().into_vec(), item.as_bytes());

        // Mutating an interior node keeps it compressed afterwards.
        ql.replace(9, b"changed").unwrap();
        assert_eq!(ql.get(9).unwrap().into_vec(), b"changed");
        assert_eq!(ql.compressed_node_count(), 3);
        ql.validate().unwrap();

        while ql.pop(End::Tail).is_some() {
            ql.validate().unwrap();
        }
        assert_eq!(ql.node_count(), 0);
    }

    #[test]
    fn test_append_listpack_and_clone() {
        let mut ql = Quicklist::new(-2, 0);
        ql.push_tail(b"a").unwrap();
        let mut lp = Listpack::new();
        lp.append(b"b").unwrap();
        lp.append(b"c").unwrap();
        ql.append_listpack(lp).unwrap();
        assert_eq!(ql.node_count(), 2);
        assert_eq!(ql.len(), 3);

        let mut copy = ql.clone();
        copy.push_tail(b"d").unwrap();
        assert_eq!(ql.len(), 3);
        assert_eq!(copy.len(), 4);
        ql.validate().unwrap();
        copy.validate().unwrap();
    }

    #[test]
    fn test_append_ziplist() {
        let mut zl = Ziplist::new();
        zl.push(b"x", End::Tail).unwrap();
        zl.push(b"12", End::Tail).unwrap();
        let mut ql = Quicklist::new(-2, 0);
        ql.append_ziplist(&zl).unwrap();
        ql.append_ziplist(&Ziplist::new()).unwrap();
        assert_eq!(ql.node_count(), 1);
        assert_eq!(ql.get(0).unwrap().into_vec(), b"x");
        assert_eq!(ql.get(-1).unwrap().into_vec(), b"12");
        ql.validate().unwrap();
    }

    #[test]
    fn test_clamps() {
        assert_eq!(clamp_fill(-9), -5);
        assert_eq!(clamp_fill(40_000), FILL_MAX);
        assert_eq!(clamp_fill(-2), -2);
        assert_eq!(clamp_compress_depth(100_000), COMPRESS_MAX);
        let ql = Quicklist::new(-100, 1 << 20);
        assert_eq!(ql.fill(), -5);
        assert_eq!(ql.compress_depth(), COMPRESS_MAX);
    }
}
