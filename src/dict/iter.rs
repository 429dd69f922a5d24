//! Iteration over a [`Dict`].
//!
//! [`Iter`] borrows the table and is the normal way to walk it. [`Cursor`]
//! holds no borrow between steps, so the caller may use the table in between:
//!
//! - A safe cursor suspends rehash steps while it is live and allows deleting
//!   the entry it last returned.
//! - An unsafe cursor records the table fingerprint on its first step and
//!   asserts on release that nothing structural changed since.
//!
//! Dropping a safe cursor lets rehashing resume. An unsafe cursor only
//! checks the fingerprint when passed to [`Cursor::release`].

use std::sync::Arc;

use super::{Dict, NodeId};

/// Registry of live safe cursors. Each one holds a clone of the inner `Arc`,
/// so the count falls when a cursor is dropped, released or not.
#[derive(Debug, Default)]
pub(super) struct SafeCursors(Arc<()>);

impl SafeCursors {
    #[inline]
    pub(super) fn live(&self) -> usize {
        Arc::strong_count(&self.0) - 1
    }

    fn register(&self) -> Arc<()> {
        Arc::clone(&self.0)
    }
}

// A cloned table starts with no cursors of its own.
impl Clone for SafeCursors {
    fn clone(&self) -> Self {
        Self::default()
    }
}

pub struct Iter<'a, K, V> {
    dict: &'a Dict<K, V>,
    table: usize,
    bucket: usize,
    entry: NodeId,
    remaining: usize,
}

impl<'a, K, V> Iter<'a, K, V> {
    pub(super) fn new(dict: &'a Dict<K, V>) -> Self {
        Self {
            dict,
            table: 0,
            bucket: 0,
            entry: NodeId::NIL,
            remaining: dict.len(),
        }
    }
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    fn next(&mut self) -> Option<Self::Item> {
        let dict = self.dict;
        while self.entry.is_nil() {
            if self.remaining == 0 || self.table > 1 {
                return None;
            }
            let table = &dict.tables[self.table];
            if self.bucket >= table.size() {
                self.table += 1;
                self.bucket = 0;
                continue;
            }
            self.entry = table.buckets[self.bucket];
            self.bucket += 1;
        }
        let entry = &dict.entries[self.entry];
        self.entry = entry.next;
        self.remaining -= 1;
        Some((&entry.key, &entry.value))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}

impl<'a, K, V> IntoIterator for &'a Dict<K, V> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Detached iteration state. See the module docs.
#[derive(Debug)]
pub struct Cursor {
    safe: bool,
    started: bool,
    table: usize,
    /// Next bucket to load once the current chain runs out.
    bucket: usize,
    entry: NodeId,
    next_entry: NodeId,
    fingerprint: u64,
    /// Held by a started safe cursor; pauses rehashing until dropped.
    pause: Option<Arc<()>>,
}

impl Cursor {
    pub(super) fn new(safe: bool) -> Self {
        Self {
            safe,
            started: false,
            table: 0,
            bucket: 0,
            entry: NodeId::NIL,
            next_entry: NodeId::NIL,
            fingerprint: 0,
            pause: None,
        }
    }

    pub fn is_safe(&self) -> bool {
        self.safe
    }

    /// Advance and return the next entry, or `None` once both tables are
    /// exhausted.
    pub fn next<'a, K, V>(&mut self, dict: &'a mut Dict<K, V>) -> Option<(&'a K, &'a mut V)> {
        if !self.started {
            self.started = true;
            if self.safe {
                self.pause = Some(dict.iterators.register());
            } else {
                self.fingerprint = dict.fingerprint();
            }
        }

        loop {
            if self.entry.is_nil() {
                if self.table > 1 {
                    return None;
                }
                let table = &dict.tables[self.table];
                if self.bucket >= table.size() {
                    if self.table == 0 && dict.is_rehashing() {
                        self.table = 1;
                        self.bucket = 0;
                        continue;
                    }
                    self.table = 2;
                    return None;
                }
                self.entry = table.buckets[self.bucket];
                self.bucket += 1;
            } else {
                self.entry = self.next_entry;
            }

            if let Some(id) = self.entry.get() {
                // Saved now: the caller may delete `id` before the next step.
                self.next_entry = dict.entries[id].next;
                let entry = &mut dict.entries[id];
                return Some((&entry.key, &mut entry.value));
            }
        }
    }

    /// Finish iterating. Equivalent to dropping a safe cursor.
    ///
    /// # Panics
    /// For an unsafe cursor, panics if the table was structurally modified
    /// while the cursor was live.
    pub fn release<K, V>(self, dict: &mut Dict<K, V>) {
        if self.started && !self.safe {
            assert_eq!(
                self.fingerprint,
                dict.fingerprint(),
                "dict modified during unsafe iteration"
            );
        }
    }
}
