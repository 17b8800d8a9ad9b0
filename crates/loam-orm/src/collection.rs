//! Ordered, keyed collections with delta memory.
//!
//! A [`Collection`] is the general query-result container and the live
//! observed set behind an editable to-many relation. It keeps insertion
//! order, carries a lazily built primary-key index for O(1) point
//! lookups, and can shadow-record added/removed elements so diff-based
//! persistence never has to re-read the association table.

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use loam_sql_core::SqlValue;

type Extractor<T> = Rc<dyn Fn(&T) -> Option<SqlValue>>;

/// An ordered sequence of keyed elements with a primary-key index and
/// optional add/remove delta tracking.
pub struct Collection<T> {
    entries: Vec<(String, T)>,
    extract: Extractor<T>,
    // pk key -> position; rebuilt on demand, dropped on mutation
    index: RefCell<Option<HashMap<String, usize>>>,
    remember: bool,
    added: Vec<(String, T)>,
    removed: Vec<(String, T)>,
    seq: u64,
}

impl<T> std::fmt::Debug for Collection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collection")
            .field("len", &self.entries.len())
            .field("remember", &self.remember)
            .field("added", &self.added.len())
            .field("removed", &self.removed.len())
            .finish_non_exhaustive()
    }
}

impl<T> Clone for Collection<T>
where
    T: Clone,
{
    fn clone(&self) -> Self {
        Self {
            entries: self.entries.clone(),
            extract: Rc::clone(&self.extract),
            index: RefCell::new(None),
            remember: self.remember,
            added: self.added.clone(),
            removed: self.removed.clone(),
            seq: self.seq,
        }
    }
}

impl<T> Default for Collection<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Collection<T> {
    /// Creates a collection whose elements carry no extractable key.
    #[must_use]
    pub fn new() -> Self {
        Self::keyed_by(|_| None)
    }

    /// Creates a collection with a primary-key extraction strategy.
    ///
    /// The strategy survives `filter`/`map`/`partition` and is what
    /// `get_model`/`remove_model`/`contains` index by.
    pub fn keyed_by(extract: impl Fn(&T) -> Option<SqlValue> + 'static) -> Self {
        Self {
            entries: Vec::new(),
            extract: Rc::new(extract),
            index: RefCell::new(None),
            remember: false,
            added: Vec::new(),
            removed: Vec::new(),
            seq: 0,
        }
    }

    fn like(&self) -> Self {
        Self {
            entries: Vec::new(),
            extract: Rc::clone(&self.extract),
            index: RefCell::new(None),
            remember: self.remember,
            added: Vec::new(),
            removed: Vec::new(),
            seq: 0,
        }
    }

    fn invalidate(&self) {
        *self.index.borrow_mut() = None;
    }

    fn ensure_index(&self) {
        let mut slot = self.index.borrow_mut();
        if slot.is_none() {
            let mut map = HashMap::new();
            for (pos, (_, value)) in self.entries.iter().enumerate() {
                if let Some(pk) = (self.extract)(value) {
                    map.insert(pk.to_key(), pos);
                }
            }
            *slot = Some(map);
        }
    }

    fn position_of_pk(&self, pk: &SqlValue) -> Option<usize> {
        self.ensure_index();
        self.index
            .borrow()
            .as_ref()
            .and_then(|map| map.get(&pk.to_key()).copied())
    }

    fn next_key(&mut self, value: &T) -> String {
        (self.extract)(value).map_or_else(
            || {
                let key = self.seq.to_string();
                self.seq += 1;
                key
            },
            |pk| pk.to_key(),
        )
    }

    /// Number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true when empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns the element stored under `key`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&T> {
        self.entries.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Returns true when `key` is present.
    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.iter().any(|(k, _)| k == key)
    }

    /// Returns the first element.
    #[must_use]
    pub fn first(&self) -> Option<&T> {
        self.entries.first().map(|(_, v)| v)
    }

    /// Iterates key/element pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &T)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Iterates elements in order.
    pub fn values(&self) -> impl Iterator<Item = &T> {
        self.entries.iter().map(|(_, v)| v)
    }

    /// Iterates elements mutably, in order.
    ///
    /// Point-lookup state is rebuilt afterwards since keys may have moved.
    pub fn values_mut(&mut self) -> impl Iterator<Item = &mut T> {
        self.invalidate();
        self.entries.iter_mut().map(|(_, v)| v)
    }

    /// Iterates keys in order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    /// Looks up an element by extracted primary key.
    #[must_use]
    pub fn get_model(&self, pk: &SqlValue) -> Option<&T> {
        self.position_of_pk(pk).map(|pos| &self.entries[pos].1)
    }

    /// Returns true when an element with `value`'s primary key is present.
    ///
    /// Elements without an extractable key are never reported present.
    #[must_use]
    pub fn contains(&self, value: &T) -> bool {
        (self.extract)(value).is_some_and(|pk| self.position_of_pk(&pk).is_some())
    }

    /// Enables or disables delta memory.
    ///
    /// Deltas are recorded only while enabled; existing memory is kept
    /// until [`reset_memory`](Self::reset_memory).
    pub fn keep_memory(&mut self, remember: bool) {
        self.remember = remember;
    }

    /// Returns true when delta memory is on.
    #[must_use]
    pub const fn is_remembering(&self) -> bool {
        self.remember
    }

    /// Clears the added/removed shadows.
    pub fn reset_memory(&mut self) {
        self.added.clear();
        self.removed.clear();
    }

    /// Runs `f` with delta memory suspended.
    ///
    /// The prior memory flag is restored before the result, success or
    /// failure, is handed back.
    ///
    /// # Errors
    ///
    /// Propagates whatever `f` returns.
    pub fn dont_remember<R, E>(
        &mut self,
        f: impl FnOnce(&mut Self) -> std::result::Result<R, E>,
    ) -> std::result::Result<R, E> {
        let prior = self.remember;
        self.remember = false;
        let out = f(self);
        self.remember = prior;
        out
    }
}

impl<T: Clone> Collection<T> {
    /// Appends an element, keyed by its primary key when extractable.
    pub fn push(&mut self, value: T) {
        let key = self.next_key(&value);
        self.set(key.as_str(), value);
    }

    /// Stores an element under `key`, replacing any existing entry.
    ///
    /// Fresh insertions are recorded in the added shadow while memory
    /// is on; replacements are not.
    pub fn set(&mut self, key: &str, value: T) {
        self.invalidate();
        if let Some(entry) = self.entries.iter_mut().find(|(k, _)| k == key) {
            entry.1 = value;
            return;
        }
        if self.remember {
            self.added.push((key.to_string(), value.clone()));
        }
        self.entries.push((key.to_string(), value));
    }

    /// Removes the element under `key`.
    pub fn remove(&mut self, key: &str) -> Option<T> {
        let pos = self.entries.iter().position(|(k, _)| k == key)?;
        self.invalidate();
        let (key, value) = self.entries.remove(pos);
        self.record_removal(key, &value);
        Some(value)
    }

    /// Removes the element with the given primary key.
    pub fn remove_model(&mut self, pk: &SqlValue) -> Option<T> {
        let pos = self.position_of_pk(pk)?;
        self.invalidate();
        let (key, value) = self.entries.remove(pos);
        self.record_removal(key, &value);
        Some(value)
    }

    // Removing an element that was added since the last reset cancels the
    // pending add instead of landing in the removed shadow.
    fn record_removal(&mut self, key: String, value: &T) {
        if !self.remember {
            return;
        }
        if let Some(pos) = self.added.iter().position(|(k, _)| *k == key) {
            self.added.remove(pos);
        } else {
            self.removed.push((key, value.clone()));
        }
    }

    /// Returns the added shadow as a collection.
    #[must_use]
    pub fn get_added(&self) -> Self {
        let mut out = self.like();
        out.remember = false;
        out.entries = self.added.clone();
        out
    }

    /// Returns the removed shadow as a collection.
    #[must_use]
    pub fn get_removed(&self) -> Self {
        let mut out = self.like();
        out.remember = false;
        out.entries = self.removed.clone();
        out
    }

    /// Returns the elements satisfying `pred`, order preserved.
    #[must_use]
    pub fn filter(&self, pred: impl Fn(&T) -> bool) -> Self {
        let mut out = self.like();
        out.entries = self
            .entries
            .iter()
            .filter(|(_, v)| pred(v))
            .cloned()
            .collect();
        out
    }

    /// Returns a same-typed collection with `f` applied to every element.
    ///
    /// Keys are kept as-is.
    #[must_use]
    pub fn map(&self, f: impl Fn(&T) -> T) -> Self {
        let mut out = self.like();
        out.entries = self.entries.iter().map(|(k, v)| (k.clone(), f(v))).collect();
        out
    }

    /// Splits into (matching, non-matching) collections.
    #[must_use]
    pub fn partition(&self, pred: impl Fn(&T) -> bool) -> (Self, Self) {
        let (yes, no): (Vec<(String, T)>, Vec<(String, T)>) = self
            .entries
            .iter()
            .cloned()
            .partition(|(_, v)| pred(v));
        let mut left = self.like();
        left.entries = yes;
        let mut right = self.like();
        right.entries = no;
        (left, right)
    }

    /// Returns up to `len` elements starting at position `start`.
    #[must_use]
    pub fn slice(&self, start: usize, len: usize) -> Self {
        let mut out = self.like();
        out.entries = self
            .entries
            .iter()
            .skip(start)
            .take(len)
            .cloned()
            .collect();
        out
    }

    /// Returns the extracted primary keys of all elements, in order.
    #[must_use]
    pub fn pks(&self) -> Vec<SqlValue> {
        self.entries
            .iter()
            .filter_map(|(_, v)| (self.extract)(v))
            .collect()
    }
}
