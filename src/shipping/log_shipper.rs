use crate::cache::{EntryReader, InFlightCache};
use crate::commitlog::{Index, RaftLogEntry, ReadableRaftLog, Term};
use crate::membership::MemberId;
use crate::messages::{AppendEntriesRequest, Heartbeat, LogCompactionInfo, Outbound, RaftMessage};
use crate::options::ShippingConfig;
use crate::shipping::LeaderContext;
use crate::timers::{CancelMode, Clock, RealClock, Timer, TimerService};
use std::io;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tokio::time::{Duration, Instant};

// Logs with the shipper's status attached.
macro_rules! log_status {
    ($level:ident, $state:expr, $msg:literal) => {
        log_status!($level, $state, $msg;)
    };
    ($level:ident, $state:expr, $msg:literal; $($kv:tt)*) => {
        slog::$level!(
            $state.logger,
            $msg;
            "mode" => ?$state.mode,
            "match_index" => ?$state.match_index,
            "last_sent_index" => ?$state.last_sent_index,
            $($kv)*
        )
    };
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// We don't know where the follower's log matches ours, so we walk backwards with empty
    /// probes. Probes are cheap, which is the point of this mode.
    Mismatch,
    /// The follower matches but is behind. Send one bounded batch at a time, and only once the
    /// previous one was acknowledged.
    Catchup,
    /// The follower is believed current. New entries are forwarded as soon as they're appended,
    /// without waiting for acknowledgements, as long as the follower doesn't lag too far behind.
    Pipeline,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct ShipperStatus {
    pub mode: Mode,
    pub match_index: Option<Index>,
    pub last_sent_index: Index,
    pub timer_active: bool,
}

pub struct LogShipperConfig<C: Clock = RealClock> {
    pub logger: slog::Logger,
    pub leader: MemberId,
    pub follower: MemberId,
    pub raft_log: Arc<dyn ReadableRaftLog>,
    pub in_flight_cache: Option<Arc<dyn InFlightCache>>,
    pub outbound: Arc<dyn Outbound>,
    pub timer_service: TimerService<C>,
    pub shipping: ShippingConfig,
    pub initial_leader_context: LeaderContext,
}

/// LogShipper owns log replication to a single follower.
///
/// Every operation, including the retry timer's callback, runs under the shipper's own lock, so
/// state changes for one follower are serialized. Shippers of different followers never share a
/// lock. Nothing here blocks on I/O other than local log reads; the outbound channel is
/// fire-and-forget.
pub struct LogShipper<C: Clock = RealClock> {
    follower: MemberId,
    state: Arc<Mutex<ShipperState<C>>>,
}

struct ShipperState<C: Clock> {
    logger: slog::Logger,
    leader: MemberId,
    follower: MemberId,
    raft_log: Arc<dyn ReadableRaftLog>,
    in_flight_cache: Option<Arc<dyn InFlightCache>>,
    outbound: Arc<dyn Outbound>,
    timer_service: TimerService<C>,
    shipping: ShippingConfig,
    // The timer callback holds this instead of a strong reference, so a dropped shipper's
    // callback is a no-op.
    self_ref: Weak<Mutex<ShipperState<C>>>,

    mode: Mode,
    // > index of highest log entry known to be replicated on server
    // `None` until the follower first acknowledges a match. Never decreases after that.
    match_index: Option<Index>,
    // Highest index the follower was last asked about: a probe's previous index, or the last
    // entry of a batch.
    last_sent_index: Index,
    timeout_deadline: Option<Instant>,
    timer: Option<Timer>,
    last_leader_context: LeaderContext,
    stopped: bool,
}

// What a batch sent on a match achieved.
enum BatchSend {
    // The batch reaching the end of the log went out, or there was nothing left to send.
    CaughtUp,
    // A batch went out and more entries remain.
    Partial,
    // Nothing went out.
    Failed,
}

enum BatchRead {
    Entries {
        prev_log_term: Term,
        entries: Vec<RaftLogEntry>,
    },
    Missing,
    StaleTerm(Term),
}

impl<C: Clock> LogShipper<C> {
    pub fn new(config: LogShipperConfig<C>) -> Self {
        let follower = config.follower.clone();
        let logger = config.logger.new(slog::o!("follower" => follower.to_string()));

        let state = Arc::new_cyclic(|self_ref| {
            Mutex::new(ShipperState {
                logger,
                leader: config.leader,
                follower: config.follower,
                raft_log: config.raft_log,
                in_flight_cache: config.in_flight_cache,
                outbound: config.outbound,
                timer_service: config.timer_service,
                shipping: config.shipping,
                self_ref: self_ref.clone(),
                mode: Mode::Mismatch,
                match_index: None,
                last_sent_index: Index::ZERO,
                timeout_deadline: None,
                timer: None,
                last_leader_context: config.initial_leader_context,
                stopped: false,
            })
        });

        LogShipper { follower, state }
    }

    pub fn follower(&self) -> &MemberId {
        &self.follower
    }

    /// Sends the initial probe, anchored at the end of the leader's log.
    pub fn start(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        log_status!(info, state, "Starting log shipper");
        let leader_context = state.last_leader_context;
        let append_index = state.raft_log.append_index();
        state.send_empty(append_index, &leader_context);
    }

    /// Cancels the retry timer. Once this returns, the shipper never sends anything again. A
    /// timer callback that's already running is waited for.
    pub fn stop(&self) {
        let timer = {
            let mut state = self.lock();
            if state.stopped {
                return;
            }
            log_status!(info, state, "Stopping log shipper");
            state.stopped = true;
            state.timeout_deadline = None;
            state.timer.take()
        };

        // Must not hold our lock here, the running callback needs it to observe `stopped`.
        if let Some(timer) = timer {
            timer.cancel(CancelMode::Sync);
        }
    }

    /// The follower doesn't hold the entry before what we last sent. It reported its own last
    /// appended index as `last_remote_append_index`.
    pub fn on_mismatch(&self, last_remote_append_index: Index, leader_context: LeaderContext) {
        self.with_leader_context(leader_context, |state, ctx| {
            state.on_mismatch(last_remote_append_index, ctx)
        });
    }

    /// The follower holds everything up to `new_match_index`.
    pub fn on_match(&self, new_match_index: Index, leader_context: LeaderContext) {
        self.with_leader_context(leader_context, |state, ctx| state.on_match(new_match_index, ctx));
    }

    pub fn on_new_entries(
        &self,
        prev_log_index: Index,
        prev_log_term: Term,
        entries: &[RaftLogEntry],
        leader_context: LeaderContext,
    ) {
        self.with_leader_context(leader_context, |state, ctx| {
            state.on_new_entries(prev_log_index, prev_log_term, entries, ctx)
        });
    }

    pub fn on_commit_update(&self, leader_context: LeaderContext) {
        self.with_leader_context(leader_context, |state, ctx| state.on_commit_update(ctx));
    }

    pub fn status(&self) -> ShipperStatus {
        let state = self.lock();
        ShipperStatus {
            mode: state.mode,
            match_index: state.match_index,
            last_sent_index: state.last_sent_index,
            timer_active: state.timeout_deadline.is_some(),
        }
    }

    // The new context is recorded after `f`, whatever `f` did.
    fn with_leader_context<F>(&self, leader_context: LeaderContext, f: F)
    where
        F: FnOnce(&mut ShipperState<C>, &LeaderContext),
    {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        f(&mut *state, &leader_context);
        state.last_leader_context = leader_context;
    }

    fn lock(&self) -> MutexGuard<'_, ShipperState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock> ShipperState<C> {
    fn on_mismatch(&mut self, last_remote_append_index: Index, leader_context: &LeaderContext) {
        let probe_index = match self.mode {
            // Step back one at a time, unless the follower told us its log is even shorter.
            Mode::Mismatch => self
                .last_sent_index
                .saturating_minus(1)
                .min(last_remote_append_index),
            Mode::Catchup | Mode::Pipeline => {
                log_status!(info, self, "Mismatch from follower, moving to MISMATCH mode");
                self.mode = Mode::Mismatch;
                self.last_sent_index
            }
        };

        if last_remote_append_index < self.raft_log.prev_index() {
            // Nothing the follower holds can be matched against what's left of our log.
            self.schedule_timeout(self.shipping.retry_time);
            self.send_log_compaction_info(leader_context);
            return;
        }
        self.send_empty(probe_index, leader_context);
    }

    fn on_match(&mut self, new_match_index: Index, leader_context: &LeaderContext) {
        let (match_index, progress) = match self.match_index {
            Some(current) if current >= new_match_index => {
                log_status!(
                    warn,
                    self,
                    "Match index not progressing, this should be transient";
                    "new_match_index" => ?new_match_index
                );
                (current, false)
            }
            _ => {
                self.match_index = Some(new_match_index);
                (new_match_index, true)
            }
        };

        match self.mode {
            Mode::Mismatch => match self.send_next_batch_after_match(match_index, leader_context) {
                BatchSend::CaughtUp => {
                    log_status!(info, self, "Caught up after mismatch, moving to PIPELINE mode");
                    self.mode = Mode::Pipeline;
                }
                BatchSend::Partial => {
                    log_status!(info, self, "Starting catch up after mismatch, moving to CATCHUP mode");
                    self.mode = Mode::Catchup;
                }
                // The retry timer, if still set, tries again.
                BatchSend::Failed => return,
            },
            Mode::Catchup => {
                if match_index >= self.last_sent_index {
                    match self.send_next_batch_after_match(match_index, leader_context) {
                        BatchSend::CaughtUp => {
                            log_status!(info, self, "Caught up, moving to PIPELINE mode");
                            self.mode = Mode::Pipeline;
                        }
                        BatchSend::Partial => {}
                        BatchSend::Failed => return,
                    }
                } else if progress {
                    self.schedule_timeout(self.shipping.retry_time);
                }
            }
            Mode::Pipeline => {
                if match_index < self.last_sent_index && progress {
                    self.schedule_timeout(self.shipping.retry_time);
                }
            }
        }

        if match_index >= self.last_sent_index {
            // Nothing outstanding.
            self.abort_timeout();
        }
    }

    fn on_new_entries(
        &mut self,
        prev_log_index: Index,
        prev_log_term: Term,
        entries: &[RaftLogEntry],
        leader_context: &LeaderContext,
    ) {
        if self.mode != Mode::Pipeline || entries.is_empty() {
            return;
        }
        if self.last_sent_index > prev_log_index {
            // Already shipped.
            return;
        }

        if self.shipping_lag(prev_log_index) <= self.shipping.max_allowed_shipping_lag {
            self.send_new_entries(prev_log_index, prev_log_term, entries, leader_context);
        } else {
            // The retry timer is still running. Catch-up resumes once the follower acknowledges
            // the last pipelined entry, or when the timer fires.
            log_status!(
                info,
                self,
                "Follower has fallen behind, moving to CATCHUP mode";
                "prev_log_index" => ?prev_log_index,
                "max_allowed_shipping_lag" => self.shipping.max_allowed_shipping_lag
            );
            self.mode = Mode::Catchup;
        }
    }

    fn on_commit_update(&mut self, leader_context: &LeaderContext) {
        if self.mode == Mode::Pipeline {
            self.send_commit_update(leader_context);
        }
    }

    fn on_scheduled_timeout_expiry(&mut self) {
        if self.stopped {
            return;
        }
        let deadline = match self.timeout_deadline {
            Some(deadline) => deadline,
            None => return,
        };

        let now = self.timer_service.now();
        if now >= deadline {
            self.on_timeout();
        } else {
            // Deadline moved after this callback was already on its way.
            self.schedule_timeout(deadline - now);
        }
    }

    fn on_timeout(&mut self) {
        match self.mode {
            Mode::Pipeline => {
                // Stop pushing new entries at an unresponsive follower. Catch-up picks up once the
                // last pipelined entry matches.
                log_status!(info, self, "Timed out, moving to CATCHUP mode");
                self.mode = Mode::Catchup;
            }
            Mode::Catchup => {
                log_status!(info, self, "Timed out, moving to MISMATCH mode");
                self.mode = Mode::Mismatch;
            }
            Mode::Mismatch => {}
        }

        let leader_context = self.last_leader_context;
        let probe_index = self.last_sent_index;
        self.send_empty(probe_index, &leader_context);
    }

    // Lag of the follower if we shipped up to `upto`. An unknown match index counts as -1.
    fn shipping_lag(&self, upto: Index) -> u64 {
        match self.match_index {
            Some(match_index) => upto.distance_after(match_index),
            None => upto.as_u64().saturating_add(1),
        }
    }

    fn send_next_batch_after_match(&mut self, match_index: Index, leader_context: &LeaderContext) -> BatchSend {
        let last_index = self.raft_log.append_index();
        if last_index <= match_index {
            return BatchSend::CaughtUp;
        }

        let end_index = last_index.min(match_index.plus(self.shipping.catchup_batch_size));
        self.schedule_timeout(self.shipping.retry_time);
        if !self.send_range(match_index.plus(1), end_index, leader_context) {
            BatchSend::Failed
        } else if end_index == last_index {
            BatchSend::CaughtUp
        } else {
            BatchSend::Partial
        }
    }

    fn send_empty(&mut self, probe_index: Index, leader_context: &LeaderContext) {
        self.schedule_timeout(self.shipping.retry_time);

        let prev_log_index = probe_index
            .max(self.raft_log.prev_index())
            .min(self.raft_log.append_index());
        self.last_sent_index = prev_log_index;

        let prev_log_term = match self.raft_log.read_entry_term(prev_log_index) {
            Ok(term) => term,
            Err(e) => {
                log_status!(warn, self, "Failed to read log for probe"; "error" => %e);
                return;
            }
        };

        match prev_log_term {
            Some(prev_log_term) if prev_log_term > leader_context.term => {
                self.abort_stale_send(leader_context, prev_log_term);
            }
            Some(prev_log_term) => {
                self.send_append(prev_log_index, prev_log_term, vec![], leader_context);
            }
            None if self.raft_log.prev_index() > prev_log_index => {
                self.send_log_compaction_info(leader_context);
            }
            None => {
                log_status!(
                    error,
                    self,
                    "Could not read term of probe index, but log is not pruned past it";
                    "prev_log_index" => ?prev_log_index
                );
            }
        }
    }

    /// Returns whether the batch, or a compaction notice in its place, went out. `last_sent_index`
    /// only moves if it did.
    fn send_range(&mut self, start_index: Index, end_index: Index, leader_context: &LeaderContext) -> bool {
        if start_index > end_index {
            return false;
        }

        let prev_log_index = start_index.saturating_minus(1);
        if prev_log_index < self.raft_log.prev_index() {
            self.last_sent_index = end_index;
            self.send_log_compaction_info(leader_context);
            return true;
        }

        match self.read_batch(prev_log_index, start_index, end_index, leader_context) {
            Ok(BatchRead::Entries { prev_log_term, entries }) => {
                self.last_sent_index = end_index;
                self.send_append(prev_log_index, prev_log_term, entries, leader_context);
                true
            }
            Ok(BatchRead::StaleTerm(observed_term)) => {
                self.abort_stale_send(leader_context, observed_term);
                false
            }
            Ok(BatchRead::Missing) if self.raft_log.prev_index() >= prev_log_index => {
                self.last_sent_index = end_index;
                self.send_log_compaction_info(leader_context);
                true
            }
            Ok(BatchRead::Missing) => {
                log_status!(
                    error,
                    self,
                    "Could not send compaction info and entries were missing, but log is not behind";
                    "prev_log_index" => ?prev_log_index
                );
                false
            }
            Err(e) => {
                log_status!(warn, self, "Failed to read log for batch"; "error" => %e);
                false
            }
        }
    }

    fn read_batch(
        &self,
        prev_log_index: Index,
        start_index: Index,
        end_index: Index,
        leader_context: &LeaderContext,
    ) -> Result<BatchRead, io::Error> {
        let prev_log_term = match self.raft_log.read_entry_term(prev_log_index)? {
            Some(term) => term,
            None => return Ok(BatchRead::Missing),
        };
        if prev_log_term > leader_context.term {
            return Ok(BatchRead::StaleTerm(prev_log_term));
        }

        let reader = EntryReader::new(self.raft_log.as_ref(), self.in_flight_cache.as_deref());
        let mut entries = Vec::with_capacity(end_index.distance_after(prev_log_index) as usize);
        let mut index = start_index;
        while index <= end_index {
            match reader.get(index)? {
                None => return Ok(BatchRead::Missing),
                Some(entry) if entry.term > leader_context.term => return Ok(BatchRead::StaleTerm(entry.term)),
                Some(entry) => entries.push(entry),
            }
            index = index.plus(1);
        }

        Ok(BatchRead::Entries { prev_log_term, entries })
    }

    fn send_new_entries(
        &mut self,
        prev_log_index: Index,
        prev_log_term: Term,
        entries: &[RaftLogEntry],
        leader_context: &LeaderContext,
    ) {
        self.schedule_timeout(self.shipping.retry_time);
        self.last_sent_index = prev_log_index.plus(entries.len() as u64);

        let newest_term = entries.iter().map(|entry| entry.term).max().unwrap_or(prev_log_term);
        let observed_term = newest_term.max(prev_log_term);
        if observed_term > leader_context.term {
            self.abort_stale_send(leader_context, observed_term);
            return;
        }
        if prev_log_index < self.raft_log.prev_index() {
            self.send_log_compaction_info(leader_context);
            return;
        }

        self.send_append(prev_log_index, prev_log_term, entries.to_vec(), leader_context);
    }

    fn send_append(
        &self,
        prev_log_index: Index,
        prev_log_term: Term,
        entries: Vec<RaftLogEntry>,
        leader_context: &LeaderContext,
    ) {
        self.send(RaftMessage::AppendEntriesRequest(AppendEntriesRequest {
            from: self.leader.clone(),
            leader_term: leader_context.term,
            prev_log_index,
            prev_log_term,
            entries,
            leader_commit: leader_context.commit_index,
        }));
    }

    fn send_commit_update(&self, leader_context: &LeaderContext) {
        // A commit update means a quorum acknowledged entries of the current term, so the
        // committed entry's term is the leader's term.
        self.send(RaftMessage::Heartbeat(Heartbeat {
            from: self.leader.clone(),
            leader_term: leader_context.term,
            commit_index: leader_context.commit_index,
            commit_index_term: leader_context.term,
        }));
    }

    fn send_log_compaction_info(&self, leader_context: &LeaderContext) {
        let prev_index = self.raft_log.prev_index();
        log_status!(warn, self, "Sending log compaction info. Log pruned?"; "prev_index" => ?prev_index);

        self.send(RaftMessage::LogCompactionInfo(LogCompactionInfo {
            from: self.leader.clone(),
            leader_term: leader_context.term,
            prev_index,
        }));
    }

    // Our log holds a term newer than the one we lead in. The role state machine will step us
    // down; until then, stay quiet.
    fn abort_stale_send(&mut self, leader_context: &LeaderContext, observed_term: Term) {
        log_status!(
            warn,
            self,
            "Aborting send. Not leader anymore?";
            "leader_term" => ?leader_context.term,
            "observed_term" => ?observed_term
        );
        self.abort_timeout();
    }

    fn send(&self, message: RaftMessage) {
        self.outbound.send(&self.follower, message);
    }

    fn schedule_timeout(&mut self, delay: Duration) {
        self.timeout_deadline = Some(self.timer_service.now() + delay);

        if let Some(timer) = self.timer.take() {
            timer.cancel(CancelMode::Async);
        }

        let self_ref = self.self_ref.clone();
        self.timer = Some(self.timer_service.schedule(delay, move || {
            if let Some(state) = self_ref.upgrade() {
                state
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .on_scheduled_timeout_expiry();
            }
        }));
    }

    fn abort_timeout(&mut self) {
        if let Some(timer) = self.timer.take() {
            timer.cancel(CancelMode::Async);
        }
        self.timeout_deadline = None;
    }
}
