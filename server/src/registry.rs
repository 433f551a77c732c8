//! Thread-safe keyed collections with auto-incrementing ids
//!
//! Sessions, players and spores all live in a [`SharedRegistry`]. The
//! registry hands out ids starting at 1 and never reuses them, even after
//! removal. Every operation takes a single mutex for the shortest possible
//! critical section:
//! - `add`, `remove` and `get` hold the lock for one map operation
//! - `for_each` holds it only long enough to snapshot the map, then runs the
//!   callback without the lock
//!
//! The snapshot rule lets callbacks add to or remove from the same registry
//! (including the entry currently being visited) without deadlocking. A
//! traversal does not observe entries added or removed after its snapshot.

use parking_lot::Mutex;
use std::collections::HashMap;

struct Inner<T> {
    /// Live entries indexed by id
    entries: HashMap<u64, T>,
    /// Next id handed out by `add`
    next_id: u64,
}

/// Generic mutex-guarded map with server-assigned ids
pub struct SharedRegistry<T> {
    inner: Mutex<Inner<T>>,
}

impl<T: Clone> SharedRegistry<T> {
    /// Creates an empty registry whose first automatic id is 1
    pub fn new() -> Self {
        Self::with_capacity(0)
    }

    /// Creates an empty registry with room for `capacity` entries
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::with_capacity(capacity),
                next_id: 1,
            }),
        }
    }

    /// Inserts a value under the next free id and returns that id
    pub fn add(&self, value: T) -> u64 {
        let mut inner = self.inner.lock();
        let id = inner.next_id;
        inner.next_id += 1;
        inner.entries.insert(id, value);
        id
    }

    /// Inserts a value under a caller-chosen id, replacing any previous entry
    ///
    /// The automatic counter is moved past `id` so a later `add` can never
    /// hand out the same key.
    pub fn add_with_id(&self, value: T, id: u64) -> u64 {
        let mut inner = self.inner.lock();
        inner.next_id = inner.next_id.max(id.saturating_add(1));
        inner.entries.insert(id, value);
        id
    }

    /// Removes an entry, returning it if it was present
    ///
    /// Removing an absent id is a no-op.
    pub fn remove(&self, id: u64) -> Option<T> {
        self.inner.lock().entries.remove(&id)
    }

    /// Returns a clone of the entry stored under `id`
    pub fn get(&self, id: u64) -> Option<T> {
        self.inner.lock().entries.get(&id).cloned()
    }

    pub fn contains(&self, id: u64) -> bool {
        self.inner.lock().entries.contains_key(&id)
    }

    /// Calls `callback` for every entry in a point-in-time snapshot
    ///
    /// The lock is released before the first callback runs.
    pub fn for_each<F>(&self, mut callback: F)
    where
        F: FnMut(u64, T),
    {
        let snapshot: Vec<(u64, T)> = {
            let inner = self.inner.lock();
            inner
                .entries
                .iter()
                .map(|(id, value)| (*id, value.clone()))
                .collect()
        };

        for (id, value) in snapshot {
            callback(id, value);
        }
    }

    /// Point-in-time copy of all entries, ordered by id
    pub fn snapshot(&self) -> Vec<(u64, T)> {
        let mut entries = Vec::new();
        self.for_each(|id, value| entries.push((id, value)));
        entries.sort_by_key(|(id, _)| *id);
        entries
    }

    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().entries.is_empty()
    }
}

impl<T: Clone> Default for SharedRegistry<T> {
    fn default() -> Self {
        Self::new()
    }
}
