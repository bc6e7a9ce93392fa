use crate::commitlog::{Index, RaftLogEntry, Term};
use crate::membership::MemberId;
use crate::shipping::LogShipper;
use crate::timers::Clock;

/// LeaderContext is the leader's term and commit index at the moment a decision was made.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct LeaderContext {
    pub term: Term,
    pub commit_index: Index,
}

impl LeaderContext {
    pub fn new(term: Term, commit_index: Index) -> Self {
        LeaderContext { term, commit_index }
    }
}

/// Commands the leader's role state machine issues to log shipping. Every command is broadcast
/// to every shipper; the acknowledgement commands are only acted on by the shipper of their
/// `target`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ShipCommand {
    /// `target` rejected an append because it doesn't hold the previous entry.
    Mismatch {
        target: MemberId,
        last_remote_append_index: Index,
    },
    /// `target` confirmed it holds everything up to `new_match_index`.
    Match { target: MemberId, new_match_index: Index },
    /// Entries were just appended to the leader's log, directly after `prev_log_index`.
    NewEntries {
        prev_log_index: Index,
        prev_log_term: Term,
        entries: Vec<RaftLogEntry>,
    },
    /// The commit index advanced without new entries.
    CommitUpdate,
}

impl ShipCommand {
    pub(crate) fn apply_to<C: Clock>(&self, shipper: &LogShipper<C>, leader_context: LeaderContext) {
        match self {
            ShipCommand::Mismatch {
                target,
                last_remote_append_index,
            } => {
                if shipper.follower() == target {
                    shipper.on_mismatch(*last_remote_append_index, leader_context);
                }
            }
            ShipCommand::Match {
                target,
                new_match_index,
            } => {
                if shipper.follower() == target {
                    shipper.on_match(*new_match_index, leader_context);
                }
            }
            ShipCommand::NewEntries {
                prev_log_index,
                prev_log_term,
                entries,
            } => shipper.on_new_entries(*prev_log_index, *prev_log_term, entries, leader_context),
            ShipCommand::CommitUpdate => shipper.on_commit_update(leader_context),
        }
    }
}
