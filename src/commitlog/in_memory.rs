use crate::commitlog::{Index, RaftLogEntry, ReadableRaftLog, Term};
use std::io;
use std::sync::{PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

// Durability isn't the concern here. This log lives entirely in memory and is what tests and
// embedders without a disk log use as the leader's log.
pub struct InMemoryRaftLog {
    inner: RwLock<Inner>,
}

struct Inner {
    // Entry at `entries[i]` has index `prev_index + 1 + i`.
    entries: Vec<RaftLogEntry>,
    prev_index: Index,
    prev_term: Term,
}

impl InMemoryRaftLog {
    pub fn new() -> Self {
        InMemoryRaftLog {
            inner: RwLock::new(Inner {
                entries: vec![],
                prev_index: Index::ZERO,
                prev_term: Term::new(0),
            }),
        }
    }

    /// Appends an entry at the next index, and returns that index.
    pub fn append(&self, entry: RaftLogEntry) -> Result<Index, io::Error> {
        let mut inner = self.write();
        inner.entries.push(entry);

        Ok(inner.append_index())
    }

    /// Removes `from_index` and everything after it. Pruned entries are left alone.
    pub fn truncate(&self, from_index: Index) -> Result<(), io::Error> {
        let mut inner = self.write();
        if from_index <= inner.prev_index {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "Cannot truncate at {:?}, log is pruned up to {:?}",
                    from_index, inner.prev_index
                ),
            ));
        }

        let keep = (from_index.distance_after(inner.prev_index) - 1) as usize;
        inner.entries.truncate(keep);
        Ok(())
    }

    /// Compacts the log, dropping every entry at or below `upto`. The term of `upto` is kept.
    /// Returns the new retained lower bound.
    pub fn prune(&self, upto: Index) -> Index {
        let mut inner = self.write();
        let upto = upto.min(inner.append_index());
        if upto <= inner.prev_index {
            return inner.prev_index;
        }

        let drop_count = upto.distance_after(inner.prev_index) as usize;
        let prev_term = inner.entries[drop_count - 1].term;
        inner.entries.drain(..drop_count);
        inner.prev_index = upto;
        inner.prev_term = prev_term;

        upto
    }

    /// Discards the whole log and continues from `index`, as if everything up to it was
    /// installed from a snapshot.
    pub fn skip(&self, index: Index, term: Term) {
        let mut inner = self.write();
        if index > inner.append_index() {
            inner.entries.clear();
            inner.prev_index = index;
            inner.prev_term = term;
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Inner> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, Inner> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }
}

impl Default for InMemoryRaftLog {
    fn default() -> Self {
        Self::new()
    }
}

impl Inner {
    fn append_index(&self) -> Index {
        self.prev_index.plus(self.entries.len() as u64)
    }

    fn entry(&self, index: Index) -> Option<&RaftLogEntry> {
        if index <= self.prev_index {
            return None;
        }
        let offset = (index.distance_after(self.prev_index) - 1) as usize;
        self.entries.get(offset)
    }
}

impl ReadableRaftLog for InMemoryRaftLog {
    fn append_index(&self) -> Index {
        self.read().append_index()
    }

    fn prev_index(&self) -> Index {
        self.read().prev_index
    }

    fn read_entry_term(&self, index: Index) -> Result<Option<Term>, io::Error> {
        let inner = self.read();
        if index == inner.prev_index {
            return Ok(Some(inner.prev_term));
        }

        Ok(inner.entry(index).map(|entry| entry.term))
    }

    fn read_entry(&self, index: Index) -> Result<Option<RaftLogEntry>, io::Error> {
        Ok(self.read().entry(index).cloned())
    }
}
