use crate::commitlog::{Index, RaftLogEntry};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// InFlightCache holds recently appended entries so that shipping them doesn't have to go
/// through the log. A miss is never an error; callers fall back to the log.
pub trait InFlightCache: Send + Sync {
    fn get(&self, index: Index) -> Option<RaftLogEntry>;
}

/// A bounded cache of a consecutive run of entries. The oldest entries are evicted first once
/// either bound is exceeded.
pub struct ConsecutiveInFlightCache {
    max_entries: usize,
    max_bytes: usize,
    inner: Mutex<Inner>,
}

struct Inner {
    enabled: bool,
    // Index of `entries[0]`.
    first_index: Index,
    entries: VecDeque<RaftLogEntry>,
    total_bytes: usize,
}

impl ConsecutiveInFlightCache {
    pub fn new(max_entries: usize, max_bytes: usize) -> Self {
        ConsecutiveInFlightCache {
            max_entries,
            max_bytes,
            inner: Mutex::new(Inner {
                enabled: true,
                first_index: Index::ZERO,
                entries: VecDeque::new(),
                total_bytes: 0,
            }),
        }
    }

    /// Caches the entry at `index`. If `index` doesn't directly follow the cached run, the
    /// cache starts over from `index`.
    pub fn put(&self, index: Index, entry: RaftLogEntry) {
        let mut inner = self.lock();
        if !inner.enabled {
            return;
        }

        if inner.entries.is_empty() || inner.next_index() != index {
            inner.clear();
            inner.first_index = index;
        }

        inner.total_bytes += entry.size_in_bytes();
        inner.entries.push_back(entry);

        while inner.entries.len() > self.max_entries || inner.total_bytes > self.max_bytes {
            if !inner.pop_front() {
                break;
            }
        }
    }

    /// Drops `from_index` and everything after it.
    pub fn truncate(&self, from_index: Index) {
        let mut inner = self.lock();
        while !inner.entries.is_empty() && inner.next_index() > from_index {
            if let Some(entry) = inner.entries.pop_back() {
                inner.total_bytes -= entry.size_in_bytes();
            }
        }
    }

    /// Drops everything at or below `upto`.
    pub fn prune(&self, upto: Index) {
        let mut inner = self.lock();
        while !inner.entries.is_empty() && inner.first_index <= upto {
            inner.pop_front();
        }
    }

    pub fn enable(&self) {
        self.lock().enabled = true;
    }

    pub fn disable(&self) {
        let mut inner = self.lock();
        inner.enabled = false;
        inner.clear();
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Inner {
    fn next_index(&self) -> Index {
        self.first_index.plus(self.entries.len() as u64)
    }

    fn pop_front(&mut self) -> bool {
        match self.entries.pop_front() {
            Some(entry) => {
                self.total_bytes -= entry.size_in_bytes();
                self.first_index = self.first_index.plus(1);
                true
            }
            None => false,
        }
    }

    fn clear(&mut self) {
        self.entries.clear();
        self.total_bytes = 0;
    }
}

impl InFlightCache for ConsecutiveInFlightCache {
    fn get(&self, index: Index) -> Option<RaftLogEntry> {
        let inner = self.lock();
        if !inner.enabled || index < inner.first_index {
            return None;
        }
        let offset = index.distance_after(inner.first_index) as usize;
        inner.entries.get(offset).cloned()
    }
}
