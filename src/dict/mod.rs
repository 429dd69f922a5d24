//! Hash table with incremental rehashing.
//!
//! Two tables of chained buckets. While idle only `tables[0]` is used. When
//! the load factor reaches 1 (or 5 with [`ResizePolicy::Avoid`]) a second
//! table twice the size of the element count is allocated and the table
//! enters the [`RehashState::Rehashing`] state: every add/find/delete then
//! migrates one bucket from the old table to the new one before doing its own
//! work, so the cost of a resize is spread over ordinary traffic. Once the
//! old table is drained the new table takes its place.
//!
//! Entries live in a [`Slab`] and buckets hold chains of [`NodeId`]s, so a
//! rehash only relinks indices and never moves keys or values.
//!
//! Keys are hashed with seeded xxh64. The seed is a constructor argument, not
//! global state.

mod iter;

use std::borrow::Borrow;
use std::hash::{Hash, Hasher};
use std::mem;
use std::time::{Duration, Instant};

use rand::Rng;
use tracing::debug;
use xxhash_rust::xxh64::Xxh64;

use crate::arena::{NodeId, Slab};
use crate::error::{Error, Result};

pub use iter::{Cursor, Iter};
use iter::SafeCursors;

/// Bucket count of a freshly initialised table.
pub const INITIAL_SIZE: usize = 4;

/// Load factor that forces growth even under [`ResizePolicy::Avoid`].
pub const FORCE_RESIZE_RATIO: usize = 5;

/// Empty buckets a rehash step may visit per bucket of work requested.
const EMPTY_VISITS_PER_STEP: usize = 10;

/// Buckets migrated per batch in [`Dict::rehash_for`].
const REHASH_BATCH: usize = 100;

/// [`Dict::clear`] invokes its callback once per this many buckets.
const CLEAR_CALLBACK_PERIOD: usize = 65536;

/// Whether the table may grow as soon as it is full.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ResizePolicy {
    #[default]
    Enable,
    /// Only grow past [`FORCE_RESIZE_RATIO`]; used while a forked snapshot
    /// would otherwise pay copy-on-write for every moved bucket.
    Avoid,
}

/// Progress of a resize.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RehashState {
    Idle,
    /// Buckets of `tables[0]` below `cursor` have been migrated.
    Rehashing { cursor: usize },
}

#[derive(Clone, Debug)]
struct Entry<K, V> {
    key: K,
    value: V,
    next: NodeId,
}

#[derive(Clone, Debug, Default)]
struct Table {
    buckets: Vec<NodeId>,
    used: usize,
    /// Generation number, distinct for every table ever allocated.
    id: u64,
}

impl Table {
    #[inline]
    fn size(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn mask(&self) -> usize {
        self.buckets.len().wrapping_sub(1)
    }
}

/// Error from [`Dict::add`].
#[derive(Debug)]
pub enum AddError<'a, K, V> {
    /// The key is already present. Carries the existing value and gives the
    /// rejected pair back.
    Occupied { existing: &'a mut V, key: K, value: V },
    /// The table or entry storage could not grow.
    Alloc(Error),
}

/// Thomas Wang's 64-bit integer mix.
#[inline]
fn mix64(mut key: u64) -> u64 {
    key = (!key).wrapping_add(key << 21);
    key ^= key >> 24;
    key = key.wrapping_add(key << 3).wrapping_add(key << 8);
    key ^= key >> 14;
    key = key.wrapping_add(key << 2).wrapping_add(key << 4);
    key ^= key >> 28;
    key.wrapping_add(key << 31)
}

#[derive(Clone, Debug)]
pub struct Dict<K, V> {
    entries: Slab<Entry<K, V>>,
    tables: [Table; 2],
    rehash: RehashState,
    /// Live safe cursors; rehash steps are suspended while any exist.
    iterators: SafeCursors,
    policy: ResizePolicy,
    seed: u64,
    next_table_id: u64,
}

impl<K, V> Default for Dict<K, V> {
    fn default() -> Self {
        Self::with_seed(0)
    }
}

impl<K, V> Dict<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            entries: Slab::new(),
            tables: [Table::default(), Table::default()],
            rehash: RehashState::Idle,
            iterators: SafeCursors::default(),
            policy: ResizePolicy::Enable,
            seed,
            next_table_id: 1,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.tables[0].used + self.tables[1].used
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total bucket count across both tables.
    pub fn buckets(&self) -> usize {
        self.tables[0].size() + self.tables[1].size()
    }

    #[inline]
    pub fn is_rehashing(&self) -> bool {
        matches!(self.rehash, RehashState::Rehashing { .. })
    }

    pub fn rehash_state(&self) -> RehashState {
        self.rehash
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn resize_policy(&self) -> ResizePolicy {
        self.policy
    }

    pub fn set_resize_policy(&mut self, policy: ResizePolicy) {
        self.policy = policy;
    }

    /// Mix of both tables' generation, size, and used count. Any structural
    /// change alters it; unsafe cursors compare it on release.
    pub fn fingerprint(&self) -> u64 {
        let [t0, t1] = &self.tables;
        let parts = [
            t0.id,
            t0.size() as u64,
            t0.used as u64,
            t1.id,
            t1.size() as u64,
            t1.used as u64,
        ];
        parts
            .iter()
            .fold(0u64, |hash, &part| mix64(hash.wrapping_add(part)))
    }

    /// Drop every entry. `callback` runs once per 65536 buckets visited, so a
    /// caller can keep serving other work while a huge table is released.
    pub fn clear(&mut self, mut callback: impl FnMut()) {
        for t in 0..2 {
            for i in 0..self.tables[t].size() {
                if i % CLEAR_CALLBACK_PERIOD == 0 {
                    callback();
                }
                let mut id = mem::replace(&mut self.tables[t].buckets[i], NodeId::NIL);
                while let Some(cur) = id.get() {
                    id = self.entries.remove(cur).next;
                }
            }
            self.tables[t] = Table::default();
        }
        self.entries.clear();
        self.rehash = RehashState::Idle;
    }

    /// Borrow-checked iteration over every entry. Order is unspecified.
    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter::new(self)
    }

    /// Cursor that suspends rehashing while active and tolerates deletion of
    /// the entry it last returned.
    pub fn safe_cursor(&self) -> Cursor {
        Cursor::new(true)
    }

    /// Cursor that asserts on release that the table was not modified.
    pub fn unsafe_cursor(&self) -> Cursor {
        Cursor::new(false)
    }

    fn new_table(&mut self, size: usize) -> Result<Table> {
        let mut buckets = Vec::new();
        buckets.try_reserve_exact(size)?;
        buckets.resize(size, NodeId::NIL);
        let id = self.next_table_id;
        self.next_table_id += 1;
        Ok(Table { buckets, used: 0, id })
    }
}

impl<K: Hash + Eq, V> Dict<K, V> {
    /// Seeded xxh64 hash of `key`.
    pub fn get_hash<Q>(&self, key: &Q) -> u64
    where
        K: Borrow<Q>,
        Q: Hash + ?Sized,
    {
        let mut hasher = Xxh64::new(self.seed);
        key.hash(&mut hasher);
        hasher.finish()
    }

    // ========================================================================
    // Resizing
    // ========================================================================

    /// Grow (or shrink) to the smallest power of two >= `size`.
    ///
    /// The first call allocates `tables[0]` directly; later calls allocate
    /// `tables[1]` and start an incremental rehash.
    pub fn expand(&mut self, size: usize) -> Result<()> {
        if self.is_rehashing() {
            return Err(Error::Expand("rehash in progress"));
        }
        if self.tables[0].used > size {
            return Err(Error::Expand("size below element count"));
        }
        let real = size.max(INITIAL_SIZE).checked_next_power_of_two().ok_or(Error::Expand("size overflow"))?;
        if real == self.tables[0].size() {
            return Err(Error::Expand("bucket count unchanged"));
        }

        let table = self.new_table(real)?;
        if self.tables[0].size() == 0 {
            self.tables[0] = table;
            return Ok(());
        }
        debug!(
            from = self.tables[0].size(),
            to = real,
            used = self.tables[0].used,
            "starting incremental rehash"
        );
        self.tables[1] = table;
        self.rehash = RehashState::Rehashing { cursor: 0 };
        Ok(())
    }

    /// Shrink to the smallest table that holds every element (at least
    /// [`INITIAL_SIZE`] buckets).
    pub fn resize(&mut self) -> Result<()> {
        if self.policy == ResizePolicy::Avoid {
            return Err(Error::Expand("resizing disabled"));
        }
        self.expand(self.tables[0].used.max(INITIAL_SIZE))
    }

    fn expand_if_needed(&mut self) -> Result<()> {
        if self.is_rehashing() {
            return Ok(());
        }
        let t0 = &self.tables[0];
        if t0.size() == 0 {
            return self.expand(INITIAL_SIZE);
        }
        if t0.used >= t0.size()
            && (self.policy == ResizePolicy::Enable || t0.used / t0.size() > FORCE_RESIZE_RATIO)
        {
            return self.expand(t0.used * 2);
        }
        Ok(())
    }

    /// Migrate up to `n` non-empty buckets from the old table.
    ///
    /// Gives up after visiting `n * 10` empty buckets. Returns `true` while
    /// more work remains.
    pub fn rehash(&mut self, n: usize) -> bool {
        let RehashState::Rehashing { mut cursor } = self.rehash else {
            return false;
        };
        let mut empty_visits = n * EMPTY_VISITS_PER_STEP;
        let mut n = n;

        while n > 0 && self.tables[0].used != 0 {
            n -= 1;
            while self.tables[0].buckets[cursor].is_nil() {
                cursor += 1;
                empty_visits = empty_visits.saturating_sub(1);
                if empty_visits == 0 {
                    self.rehash = RehashState::Rehashing { cursor };
                    return true;
                }
            }

            let mut id = mem::replace(&mut self.tables[0].buckets[cursor], NodeId::NIL);
            while let Some(cur) = id.get() {
                id = self.entries[cur].next;
                let slot = self.get_hash(&self.entries[cur].key) as usize & self.tables[1].mask();
                self.entries[cur].next = self.tables[1].buckets[slot];
                self.tables[1].buckets[slot] = cur;
                self.tables[0].used -= 1;
                self.tables[1].used += 1;
            }
            cursor += 1;
        }

        if self.tables[0].used == 0 {
            self.tables[0] = mem::take(&mut self.tables[1]);
            self.rehash = RehashState::Idle;
            debug!(size = self.tables[0].size(), used = self.tables[0].used, "rehash complete");
            return false;
        }
        self.rehash = RehashState::Rehashing { cursor };
        true
    }

    /// Rehash in batches of 100 buckets until done or `budget` has elapsed.
    /// Returns the number of buckets requested.
    pub fn rehash_for(&mut self, budget: Duration) -> usize {
        let start = Instant::now();
        let mut rehashed = 0;
        while self.rehash(REHASH_BATCH) {
            rehashed += REHASH_BATCH;
            if start.elapsed() > budget {
                break;
            }
        }
        rehashed
    }

    /// One bucket of rehash work, unless a safe cursor is live.
    #[inline]
    fn rehash_step(&mut self) {
        if self.iterators.live() == 0 {
            self.rehash(1);
        }
    }

    // ========================================================================
    // Lookup
    // ========================================================================

    fn find_id<Q>(&self, key: &Q) -> Option<NodeId>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        let hash = self.get_hash(key) as usize;
        for t in 0..2 {
            let table = &self.tables[t];
            if table.size() > 0 {
                let mut id = table.buckets[hash & table.mask()];
                while let Some(cur) = id.get() {
                    let entry = &self.entries[cur];
                    if entry.key.borrow() == key {
                        return Some(cur);
                    }
                    id = entry.next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Look up `key`, performing one rehash step first.
    pub fn find<Q>(&mut self, key: &Q) -> Option<&mut V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_rehashing() {
            self.rehash_step();
        }
        let id = self.find_id(key)?;
        Some(&mut self.entries[id].value)
    }

    /// Like [`Dict::find`] but read-only.
    pub fn fetch_value<Q>(&mut self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find(key).map(|v| &*v)
    }

    /// Look up `key` without advancing a rehash.
    pub fn get<Q>(&self, key: &Q) -> Option<&V>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_id(key).map(|id| &self.entries[id].value)
    }

    /// Look up the stored key and value for `key` without advancing a rehash.
    pub fn get_key_value<Q>(&self, key: &Q) -> Option<(&K, &V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_id(key).map(|id| {
            let entry = &self.entries[id];
            (&entry.key, &entry.value)
        })
    }

    pub fn contains_key<Q>(&self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.find_id(key).is_some()
    }

    // ========================================================================
    // Mutation
    // ========================================================================

    /// Link a new entry at the head of its chain in the table currently
    /// receiving writes.
    fn link_new(&mut self, key: K, value: V) -> Result<NodeId> {
        let t = usize::from(self.is_rehashing());
        let slot = self.get_hash(&key) as usize & self.tables[t].mask();
        let next = self.tables[t].buckets[slot];
        let id = self.entries.try_insert(Entry { key, value, next })?;
        self.tables[t].buckets[slot] = id;
        self.tables[t].used += 1;
        Ok(id)
    }

    /// Step the rehash, grow if needed, and look for `key`.
    fn prepare_insert(&mut self, key: &K) -> Result<Option<NodeId>> {
        if self.is_rehashing() {
            self.rehash_step();
        }
        self.expand_if_needed()?;
        Ok(self.find_id(key))
    }

    /// Insert a new key. Never overwrites: if `key` exists, the existing value
    /// and the rejected pair come back in [`AddError::Occupied`].
    pub fn add(&mut self, key: K, value: V) -> std::result::Result<(), AddError<'_, K, V>> {
        match self.prepare_insert(&key) {
            Err(e) => Err(AddError::Alloc(e)),
            Ok(Some(id)) => Err(AddError::Occupied {
                existing: &mut self.entries[id].value,
                key,
                value,
            }),
            Ok(None) => self.link_new(key, value).map(|_| ()).map_err(AddError::Alloc),
        }
    }

    /// Return the value for `key`, inserting `make()` first if absent. The
    /// flag is `true` when the entry was created.
    pub fn add_or_find(&mut self, key: K, make: impl FnOnce() -> V) -> Result<(&mut V, bool)> {
        let (id, created) = match self.prepare_insert(&key)? {
            Some(id) => (id, false),
            None => (self.link_new(key, make())?, true),
        };
        Ok((&mut self.entries[id].value, created))
    }

    /// Insert or overwrite. Returns the previous value if there was one.
    pub fn replace(&mut self, key: K, value: V) -> Result<Option<V>> {
        match self.prepare_insert(&key)? {
            Some(id) => Ok(Some(mem::replace(&mut self.entries[id].value, value))),
            None => {
                self.link_new(key, value)?;
                Ok(None)
            }
        }
    }

    /// Detach the entry for `key` and hand back ownership of it, leaving any
    /// expensive drop to the caller.
    pub fn unlink<Q>(&mut self, key: &Q) -> Option<(K, V)>
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        if self.is_empty() {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }
        let hash = self.get_hash(key) as usize;
        for t in 0..2 {
            if self.tables[t].size() > 0 {
                let slot = hash & self.tables[t].mask();
                let mut prev = NodeId::NIL;
                let mut id = self.tables[t].buckets[slot];
                while let Some(cur) = id.get() {
                    let next = self.entries[cur].next;
                    if self.entries[cur].key.borrow() == key {
                        match prev.get() {
                            Some(p) => self.entries[p].next = next,
                            None => self.tables[t].buckets[slot] = next,
                        }
                        self.tables[t].used -= 1;
                        let entry = self.entries.remove(cur);
                        return Some((entry.key, entry.value));
                    }
                    prev = cur;
                    id = next;
                }
            }
            if !self.is_rehashing() {
                break;
            }
        }
        None
    }

    /// Remove `key`. Returns `false` if it was absent.
    pub fn delete<Q>(&mut self, key: &Q) -> bool
    where
        K: Borrow<Q>,
        Q: Hash + Eq + ?Sized,
    {
        self.unlink(key).is_some()
    }

    /// A uniformly chosen bucket's random entry. Not uniform over entries when
    /// chain lengths differ.
    pub fn random_entry(&mut self, rng: &mut impl Rng) -> Option<(&K, &V)> {
        if self.is_empty() {
            return None;
        }
        if self.is_rehashing() {
            self.rehash_step();
        }

        let head = loop {
            let head = match self.rehash {
                RehashState::Rehashing { cursor } => {
                    // Buckets below the cursor in the old table are empty.
                    let s0 = self.tables[0].size();
                    let i = rng.gen_range(cursor..s0 + self.tables[1].size());
                    if i >= s0 {
                        self.tables[1].buckets[i - s0]
                    } else {
                        self.tables[0].buckets[i]
                    }
                }
                RehashState::Idle => self.tables[0].buckets[rng.gen_range(0..self.tables[0].size())],
            };
            if !head.is_nil() {
                break head;
            }
        };

        let mut chain = Vec::new();
        let mut id = head;
        while let Some(cur) = id.get() {
            chain.push(cur);
            id = self.entries[cur].next;
        }
        let entry = &self.entries[chain[rng.gen_range(0..chain.len())]];
        Some((&entry.key, &entry.value))
    }

    /// Check chain membership, used counts and rehash bookkeeping.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let mut seen = 0;
        for t in 0..2 {
            let table = &self.tables[t];
            let mut used = 0;
            for (i, &head) in table.buckets.iter().enumerate() {
                if let RehashState::Rehashing { cursor } = self.rehash {
                    if t == 0 && i < cursor && !head.is_nil() {
                        return Err(format!("bucket {i} below rehash cursor {cursor} not empty"));
                    }
                }
                let mut id = head;
                while let Some(cur) = id.get() {
                    let entry = &self.entries[cur];
                    let slot = self.get_hash(&entry.key) as usize & table.mask();
                    if slot != i {
                        return Err(format!("table {t}: entry in bucket {i} hashes to {slot}"));
                    }
                    used += 1;
                    id = entry.next;
                }
            }
            if used != table.used {
                return Err(format!("table {t}: used {} but chains hold {used}", table.used));
            }
            seen += used;
        }
        if !self.is_rehashing() && self.tables[1].size() != 0 {
            return Err("idle with a second table".into());
        }
        if seen != self.entries.len() {
            return Err(format!("{seen} chained entries, {} allocated", self.entries.len()));
        }
        Ok(())
    }
}
