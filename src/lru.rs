// this_file: src/lru.rs

//! A small recency-ordered list used as the building block for the face
//! and size sub-caches and for each cache's family list.
//!
//! Entries are kept in most-recently-used-first order in a plain `Vec`;
//! all lookups are linear scans. The lists this backs are tiny by design
//! (a handful of faces and sizes, a few families per cache), so the scan
//! is cheaper than maintaining link fields.

/// A bounded, recency-ordered list. A capacity of zero means unbounded.
#[derive(Debug)]
pub struct LruList<E> {
    entries: Vec<E>,
    capacity: usize,
}

impl<E> LruList<E> {
    /// Create a list holding at most `capacity` entries (0 = unbounded).
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: Vec::new(),
            capacity,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the list holds no entries.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Find the first entry matching `pred`, promote it to the front, and
    /// return a reference to it.
    pub fn touch<F>(&mut self, pred: F) -> Option<&E>
    where
        F: FnMut(&E) -> bool,
    {
        let pos = self.entries.iter().position(pred)?;
        if pos != 0 {
            let entry = self.entries.remove(pos);
            self.entries.insert(0, entry);
        }
        self.entries.first()
    }

    /// Insert a new entry at the front. If the list is bounded and full,
    /// the least-recently-used entry is evicted and handed back so the
    /// caller can run its teardown side effects.
    pub fn insert(&mut self, entry: E) -> Option<E> {
        let evicted = if self.capacity > 0 && self.entries.len() >= self.capacity {
            self.entries.pop()
        } else {
            None
        };
        self.entries.insert(0, entry);
        evicted
    }

    /// Remove the first entry matching `pred` and return it.
    pub fn remove<F>(&mut self, pred: F) -> Option<E>
    where
        F: FnMut(&E) -> bool,
    {
        let pos = self.entries.iter().position(pred)?;
        Some(self.entries.remove(pos))
    }

    /// Drop every entry matching `pred`.
    pub fn remove_selection<F>(&mut self, mut pred: F)
    where
        F: FnMut(&E) -> bool,
    {
        self.entries.retain(|e| !pred(e));
    }

    /// Drop all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate entries in recency order (most recent first).
    pub fn iter(&self) -> std::slice::Iter<'_, E> {
        self.entries.iter()
    }

    /// Drain all entries, most recent first.
    pub fn drain(&mut self) -> std::vec::Drain<'_, E> {
        self.entries.drain(..)
    }
}
