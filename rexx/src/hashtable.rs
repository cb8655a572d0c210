//! Chained hash table backing every keyed collection.
//!
//! Entries live in an insertion-ordered vector and buckets hold the head of
//! a chain threaded through that vector. Removal leaves a hole; holes are
//! squeezed out when the table is rebuilt. Growth always rebuilds the whole
//! table (new bucket vector, compacted entries) once the fill ratio passes
//! three quarters. The owning object holds the table by value, so a rebuilt
//! table is adopted in place and no stale handle can survive a mutation.

use std::fmt::Debug;
use std::hash::Hash;

use ahash::RandomState;

use crate::Value;
use crate::visitor::{Visitable, Visitor, VisitorMut};

const NO_ENTRY: u32 = u32::MAX;
const MIN_BUCKETS: usize = 8;

/// Key type of a [`HashCollection`].
///
/// String keys compare by value; `Value` keys compare by identity and are
/// themselves heap edges.
pub trait TableKey: Clone + Eq + Hash + Debug {
    fn visit_key(&self, _visitor: &mut impl Visitor) {}
    fn visit_key_mut(&mut self, _visitor: &mut impl VisitorMut) {}
}

impl TableKey for String {}

impl TableKey for Value {
    fn visit_key(&self, visitor: &mut impl Visitor) {
        self.visit_edges(visitor);
    }

    fn visit_key_mut(&mut self, visitor: &mut impl VisitorMut) {
        self.visit_edges_mut(visitor);
    }
}

#[derive(Debug, Clone)]
struct Entry<K> {
    key: K,
    value: Value,
    next: u32,
}

/// Opaque cursor over a table's entries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Link(usize);

#[derive(Debug, Clone)]
pub struct HashCollection<K: TableKey> {
    buckets: Vec<u32>,
    entries: Vec<Option<Entry<K>>>,
    len: usize,
    state: RandomState,
}

impl<K: TableKey> Default for HashCollection<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: TableKey> HashCollection<K> {
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let buckets = bucket_count_for(capacity);
        Self {
            buckets: vec![NO_ENTRY; buckets],
            entries: Vec::with_capacity(capacity),
            len: 0,
            state: RandomState::new(),
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

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }

    #[inline]
    fn bucket_of(&self, key: &K) -> usize {
        (self.state.hash_one(key) as usize) & (self.buckets.len() - 1)
    }

    fn find(&self, key: &K) -> Option<usize> {
        let mut cur = self.buckets[self.bucket_of(key)];
        while cur != NO_ENTRY {
            let entry = self.entries[cur as usize].as_ref()?;
            if entry.key == *key {
                return Some(cur as usize);
            }
            cur = entry.next;
        }
        None
    }

    /// Inserts or overwrites the single association for `key`.
    /// Returns the replaced value, or NULL.
    pub fn put(&mut self, value: Value, key: K) -> Value {
        if let Some(idx) = self.find(&key) {
            if let Some(entry) = self.entries[idx].as_mut() {
                return std::mem::replace(&mut entry.value, value);
            }
        }
        self.insert_new(value, key);
        Value::NULL
    }

    /// Inserts a new association even when `key` is already present.
    pub fn add(&mut self, value: Value, key: K) {
        self.insert_new(value, key);
    }

    fn insert_new(&mut self, value: Value, key: K) {
        if (self.entries.len() + 1) * 4 > self.buckets.len() * 3 {
            self.rebuild(self.len + 1);
        }
        let bucket = self.bucket_of(&key);
        let idx = self.entries.len() as u32;
        self.entries.push(Some(Entry {
            key,
            value,
            next: self.buckets[bucket],
        }));
        self.buckets[bucket] = idx;
        self.len += 1;
    }

    /// Reallocates buckets and compacts entries for at least `wanted`
    /// associations.
    fn rebuild(&mut self, wanted: usize) {
        let buckets = bucket_count_for(wanted.max(self.len) * 2);
        let old = std::mem::take(&mut self.entries);
        self.buckets = vec![NO_ENTRY; buckets];
        self.entries = Vec::with_capacity(buckets);
        self.len = 0;
        for entry in old.into_iter().flatten() {
            let bucket = self.bucket_of(&entry.key);
            let idx = self.entries.len() as u32;
            self.entries.push(Some(Entry {
                key: entry.key,
                value: entry.value,
                next: self.buckets[bucket],
            }));
            self.buckets[bucket] = idx;
            self.len += 1;
        }
    }

    /// Recomputes every bucket. Needed after identity keys are relocated.
    pub fn rehash(&mut self) {
        self.rebuild(self.len);
    }

    /// First value stored under `key` (the most recently added one when
    /// the key has duplicates), or NULL.
    pub fn get(&self, key: &K) -> Value {
        self.find(key)
            .and_then(|idx| self.entries[idx].as_ref())
            .map_or(Value::NULL, |e| e.value)
    }

    /// Every value stored under `key`, oldest first.
    pub fn get_all(&self, key: &K) -> Vec<Value> {
        let mut found = Vec::new();
        let mut cur = self.buckets[self.bucket_of(key)];
        while cur != NO_ENTRY {
            let Some(entry) = self.entries[cur as usize].as_ref() else {
                break;
            };
            if entry.key == *key {
                found.push(entry.value);
            }
            cur = entry.next;
        }
        found.reverse();
        found
    }

    pub fn has_index(&self, key: &K) -> bool {
        self.find(key).is_some()
    }

    fn unlink(&mut self, idx: usize) -> Option<Entry<K>> {
        let entry = self.entries[idx].take()?;
        let bucket = self.bucket_of(&entry.key);
        if self.buckets[bucket] == idx as u32 {
            self.buckets[bucket] = entry.next;
        } else {
            let mut cur = self.buckets[bucket];
            while cur != NO_ENTRY {
                let Some(prev) = self.entries[cur as usize].as_mut() else {
                    break;
                };
                if prev.next == idx as u32 {
                    prev.next = entry.next;
                    break;
                }
                cur = prev.next;
            }
        }
        self.len -= 1;
        if self.len == 0 {
            self.entries.clear();
        }
        Some(entry)
    }

    /// Removes the first association for `key` and returns its value, or NULL.
    pub fn remove(&mut self, key: &K) -> Value {
        match self.find(key) {
            Some(idx) => self.unlink(idx).map_or(Value::NULL, |e| e.value),
            None => Value::NULL,
        }
    }

    /// Removes every association for `key`.
    pub fn remove_all(&mut self, key: &K) -> Vec<Value> {
        let mut removed = Vec::new();
        while let Some(idx) = self.find(key) {
            match self.unlink(idx) {
                Some(e) => removed.push(e.value),
                None => break,
            }
        }
        removed.reverse();
        removed
    }

    fn position_of_item(&self, value: Value) -> Option<usize> {
        self.entries
            .iter()
            .position(|e| e.as_ref().is_some_and(|e| e.value == value))
    }

    /// Key of the first entry holding `value` (identity comparison).
    pub fn index_of(&self, value: Value) -> Option<&K> {
        let idx = self.position_of_item(value)?;
        self.entries[idx].as_ref().map(|e| &e.key)
    }

    pub fn has_item(&self, value: Value) -> bool {
        self.position_of_item(value).is_some()
    }

    /// Removes the first entry holding `value` and returns it, or NULL.
    pub fn remove_item(&mut self, value: Value) -> Value {
        match self.position_of_item(value) {
            Some(idx) => self.unlink(idx).map_or(Value::NULL, |e| e.value),
            None => Value::NULL,
        }
    }

    fn position_of_pair(&self, value: Value, key: &K) -> Option<usize> {
        let mut cur = self.buckets[self.bucket_of(key)];
        while cur != NO_ENTRY {
            let entry = self.entries[cur as usize].as_ref()?;
            if entry.key == *key && entry.value == value {
                return Some(cur as usize);
            }
            cur = entry.next;
        }
        None
    }

    pub fn has_item_at(&self, value: Value, key: &K) -> bool {
        self.position_of_pair(value, key).is_some()
    }

    pub fn remove_item_at(&mut self, value: Value, key: &K) -> Value {
        match self.position_of_pair(value, key) {
            Some(idx) => self.unlink(idx).map_or(Value::NULL, |e| e.value),
            None => Value::NULL,
        }
    }

    pub fn clear(&mut self) {
        self.entries.clear();
        self.buckets.iter_mut().for_each(|b| *b = NO_ENTRY);
        self.len = 0;
    }

    // ── Cursor ────────────────────────────────────────────────────────

    fn skip_holes(&self, mut pos: usize) -> Link {
        while pos < self.entries.len() && self.entries[pos].is_none() {
            pos += 1;
        }
        Link(pos)
    }

    pub fn first(&self) -> Link {
        self.skip_holes(0)
    }

    pub fn next(&self, link: Link) -> Link {
        self.skip_holes(link.0 + 1)
    }

    pub fn available(&self, link: Link) -> bool {
        self.entries.get(link.0).is_some_and(|e| e.is_some())
    }

    pub fn value(&self, link: Link) -> Value {
        self.entries
            .get(link.0)
            .and_then(|e| e.as_ref())
            .map_or(Value::NULL, |e| e.value)
    }

    pub fn index(&self, link: Link) -> Option<&K> {
        self.entries.get(link.0).and_then(|e| e.as_ref()).map(|e| &e.key)
    }

    /// Replaces the value under the cursor. This is the one mutation that
    /// keeps an in-progress iteration valid.
    pub fn replace_value(&mut self, link: Link, value: Value) {
        if let Some(Some(entry)) = self.entries.get_mut(link.0) {
            entry.value = value;
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&K, Value)> + '_ {
        self.entries
            .iter()
            .filter_map(|e| e.as_ref().map(|e| (&e.key, e.value)))
    }

    pub fn keys(&self) -> impl Iterator<Item = &K> + '_ {
        self.iter().map(|(k, _)| k)
    }

    pub fn values(&self) -> impl Iterator<Item = Value> + '_ {
        self.iter().map(|(_, v)| v)
    }
}

impl<K: TableKey> Visitable for HashCollection<K> {
    fn visit_edges(&self, visitor: &mut impl Visitor) {
        for entry in self.entries.iter().flatten() {
            entry.key.visit_key(visitor);
            entry.value.visit_edges(visitor);
        }
    }

    fn visit_edges_mut(&mut self, visitor: &mut impl VisitorMut) {
        for entry in self.entries.iter_mut().flatten() {
            entry.key.visit_key_mut(visitor);
            entry.value.visit_edges_mut(visitor);
        }
    }
}

fn bucket_count_for(capacity: usize) -> usize {
    capacity.max(MIN_BUCKETS).next_power_of_two()
}
