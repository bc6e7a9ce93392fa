use crate::cache::InFlightCache;
use crate::commitlog::{Index, RaftLogEntry, ReadableRaftLog};
use std::io;

/// Reads entries from the in-flight cache when possible, and from the log otherwise.
pub(crate) struct EntryReader<'a> {
    raft_log: &'a dyn ReadableRaftLog,
    cache: Option<&'a dyn InFlightCache>,
}

impl<'a> EntryReader<'a> {
    pub(crate) fn new(raft_log: &'a dyn ReadableRaftLog, cache: Option<&'a dyn InFlightCache>) -> Self {
        EntryReader { raft_log, cache }
    }

    pub(crate) fn get(&self, index: Index) -> Result<Option<RaftLogEntry>, io::Error> {
        if let Some(entry) = self.cache.and_then(|cache| cache.get(index)) {
            return Ok(Some(entry));
        }

        self.raft_log.read_entry(index)
    }
}
