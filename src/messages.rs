use crate::commitlog::{Index, RaftLogEntry, Term};
use crate::membership::MemberId;

/// Messages a leader sends to its followers while replicating the log. These are logical
/// messages; encoding them for the wire is up to the `Outbound` implementation.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RaftMessage {
    AppendEntriesRequest(AppendEntriesRequest),
    Heartbeat(Heartbeat),
    LogCompactionInfo(LogCompactionInfo),
}

/// AppendEntries with zero entries is a probe. With entries, it's a batch.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AppendEntriesRequest {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_log_index: Index,
    pub prev_log_term: Term,
    pub entries: Vec<RaftLogEntry>,
    pub leader_commit: Index,
}

impl AppendEntriesRequest {
    pub fn is_probe(&self) -> bool {
        self.entries.is_empty()
    }

    /// Index of the last entry carried, or `prev_log_index` for a probe.
    pub fn last_index(&self) -> Index {
        self.prev_log_index.plus(self.entries.len() as u64)
    }
}

/// Commit-only heartbeat. Carries no log position, so it never conflicts with anything in flight.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Heartbeat {
    pub from: MemberId,
    pub leader_term: Term,
    pub commit_index: Index,
    pub commit_index_term: Term,
}

/// Tells a follower that the entries it needs are gone from the leader's log, so it must catch
/// up from a snapshot instead.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LogCompactionInfo {
    pub from: MemberId,
    pub leader_term: Term,
    pub prev_index: Index,
}

/// Outbound is a fire-and-forget channel to other members. Delivery and ordering are not
/// guaranteed.
pub trait Outbound: Send + Sync {
    fn send(&self, to: &MemberId, message: RaftMessage);
}
