use bytes::Bytes;
use std::{fmt, io};

/// Index is an index of an entry in the log; i.e. a log entry's index.
///
/// Index 0 is the position before the first entry. It never holds an entry, and its term is
/// always `Term(0)`. The first entry appended to an empty log is at index 1.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Default)]
pub struct Index(u64);

impl Index {
    pub const ZERO: Index = Index(0);

    pub const fn new(index: u64) -> Self {
        Index(index)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }

    /// Steps forward by `delta`, stopping at `u64::MAX`.
    pub fn plus(&self, delta: u64) -> Index {
        Index(self.0.saturating_add(delta))
    }

    /// Steps back by `delta`, stopping at index 0.
    pub fn saturating_minus(&self, delta: u64) -> Index {
        Index(self.0.saturating_sub(delta))
    }

    /// Number of indexes in `(other, self]`, or 0 if `other` is at or past `self`.
    pub fn distance_after(&self, other: Index) -> u64 {
        self.0.saturating_sub(other.0)
    }
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Raft leadership term.
#[derive(Copy, Clone, PartialOrd, PartialEq, Ord, Eq, Hash, Default)]
pub struct Term(u64);

impl Term {
    pub const fn new(term: u64) -> Self {
        Term(term)
    }

    pub fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Debug for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A single replicated log entry. The content is opaque to replication.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RaftLogEntry {
    pub term: Term,
    pub content: Bytes,
}

impl RaftLogEntry {
    pub fn new(term: Term, content: impl Into<Bytes>) -> Self {
        RaftLogEntry {
            term,
            content: content.into(),
        }
    }

    pub(crate) fn size_in_bytes(&self) -> usize {
        self.content.len()
    }
}

/// ReadableRaftLog is the leader's view of its local replicated log. Replication only ever
/// reads from it.
///
/// Entries are retained for indexes `(prev_index, append_index]`. Everything at or below
/// `prev_index` has been pruned, though the term at `prev_index` itself is still known so that
/// it can anchor an AppendEntries request.
pub trait ReadableRaftLog: Send + Sync {
    /// Highest index appended to the log, or 0 if nothing was ever appended.
    fn append_index(&self) -> Index;

    /// The retained lower bound of the log.
    fn prev_index(&self) -> Index;

    /// Term of the entry at `index`. Returns `None` if the entry was pruned or doesn't exist.
    fn read_entry_term(&self, index: Index) -> Result<Option<Term>, io::Error>;

    /// Read log entry at specified index.
    fn read_entry(&self, index: Index) -> Result<Option<RaftLogEntry>, io::Error>;
}
