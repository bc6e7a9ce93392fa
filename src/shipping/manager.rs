use crate::cache::InFlightCache;
use crate::commitlog::ReadableRaftLog;
use crate::membership::{MemberId, MembershipListener, ReplicationMembership};
use crate::messages::Outbound;
use crate::options::ShippingConfig;
use crate::shipping::{LeaderContext, LogShipper, LogShipperConfig, ShipCommand, ShipperStatus};
use crate::timers::{Clock, RealClock, TimerService};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub struct LogShippingManagerConfig<C: Clock = RealClock> {
    pub logger: slog::Logger,
    pub my_id: MemberId,
    pub raft_log: Arc<dyn ReadableRaftLog>,
    pub in_flight_cache: Option<Arc<dyn InFlightCache>>,
    pub outbound: Arc<dyn Outbound>,
    pub membership: Arc<dyn ReplicationMembership>,
    pub timer_service: TimerService<C>,
    pub shipping: ShippingConfig,
}

/// LogShippingManager keeps one `LogShipper` per follower for as long as this member leads.
///
/// The leader's role state machine drives it: `resume` on becoming leader, `handle_commands` for
/// every batch of replication events, and `pause` on stepping down. `stop` is terminal.
pub struct LogShippingManager<C: Clock = RealClock> {
    logger: slog::Logger,
    my_id: MemberId,
    raft_log: Arc<dyn ReadableRaftLog>,
    in_flight_cache: Option<Arc<dyn InFlightCache>>,
    outbound: Arc<dyn Outbound>,
    membership: Arc<dyn ReplicationMembership>,
    timer_service: TimerService<C>,
    shipping: ShippingConfig,
    state: Mutex<ManagerState<C>>,
}

struct ManagerState<C: Clock> {
    running: bool,
    stopped: bool,
    // Context of the last resume or command batch. Shippers started on a membership change
    // begin from it.
    last_leader_context: Option<LeaderContext>,
    log_shippers: HashMap<MemberId, LogShipper<C>>,
}

impl<C: Clock> LogShippingManager<C> {
    pub fn new(config: LogShippingManagerConfig<C>) -> Self {
        LogShippingManager {
            logger: config.logger,
            my_id: config.my_id,
            raft_log: config.raft_log,
            in_flight_cache: config.in_flight_cache,
            outbound: config.outbound,
            membership: config.membership,
            timer_service: config.timer_service,
            shipping: config.shipping,
            state: Mutex::new(ManagerState {
                running: false,
                stopped: false,
                last_leader_context: None,
                log_shippers: HashMap::new(),
            }),
        }
    }

    /// Starts a shipper for every follower that doesn't have one. No-op once stopped.
    pub fn resume(&self, leader_context: LeaderContext) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        slog::info!(self.logger, "Resuming log shipping"; "leader_context" => ?leader_context);

        state.running = true;
        state.last_leader_context = Some(leader_context);
        for follower in self.followers() {
            self.start_shipper_if_absent(&mut state, follower, leader_context);
        }
    }

    /// Stops and forgets every shipper. A later `resume` starts fresh ones.
    pub fn pause(&self) {
        let mut state = self.lock();
        if state.running {
            slog::info!(self.logger, "Pausing log shipping");
        }
        Self::stop_all_shippers(&mut state);
    }

    /// Like `pause`, but permanent.
    pub fn stop(&self) {
        let mut state = self.lock();
        if state.stopped {
            return;
        }
        slog::info!(self.logger, "Stopping log shipping");
        state.stopped = true;
        Self::stop_all_shippers(&mut state);
    }

    /// Hands every command to every shipper, in order. Dropped unless running.
    pub fn handle_commands(&self, commands: &[ShipCommand], leader_context: LeaderContext) {
        let mut state = self.lock();
        if !state.running {
            slog::debug!(self.logger, "Dropping {} ship commands, not running", commands.len());
            return;
        }

        for command in commands {
            for shipper in state.log_shippers.values() {
                command.apply_to(shipper, leader_context);
            }
        }
        state.last_leader_context = Some(leader_context);
    }

    pub fn is_running(&self) -> bool {
        self.lock().running
    }

    pub fn live_followers(&self) -> Vec<MemberId> {
        let mut followers: Vec<_> = self.lock().log_shippers.keys().cloned().collect();
        followers.sort();
        followers
    }

    pub fn shipper_status(&self, follower: &MemberId) -> Option<ShipperStatus> {
        self.lock().log_shippers.get(follower).map(LogShipper::status)
    }

    fn followers(&self) -> Vec<MemberId> {
        self.membership
            .replication_members()
            .into_iter()
            .filter(|member| *member != self.my_id)
            .collect()
    }

    fn start_shipper_if_absent(&self, state: &mut ManagerState<C>, follower: MemberId, leader_context: LeaderContext) {
        if state.log_shippers.contains_key(&follower) {
            return;
        }
        slog::info!(self.logger, "Starting log shipper for {}", follower);

        let shipper = LogShipper::new(LogShipperConfig {
            logger: self.logger.clone(),
            leader: self.my_id.clone(),
            follower: follower.clone(),
            raft_log: self.raft_log.clone(),
            in_flight_cache: self.in_flight_cache.clone(),
            outbound: self.outbound.clone(),
            timer_service: self.timer_service.clone(),
            shipping: self.shipping,
            initial_leader_context: leader_context,
        });
        shipper.start();
        state.log_shippers.insert(follower, shipper);
    }

    fn stop_all_shippers(state: &mut ManagerState<C>) {
        state.running = false;
        for (_, shipper) in state.log_shippers.drain() {
            shipper.stop();
        }
    }

    fn lock(&self) -> MutexGuard<'_, ManagerState<C>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<C: Clock> MembershipListener for LogShippingManager<C> {
    /// Reconciles shippers with the current roster: departed followers' shippers are stopped and
    /// new followers get one. Ignored unless running.
    fn on_membership_changed(&self) {
        let mut state = self.lock();
        let leader_context = match (state.running, state.last_leader_context) {
            (true, Some(leader_context)) => leader_context,
            _ => return,
        };

        let followers = self.followers();
        let departed: Vec<_> = state
            .log_shippers
            .keys()
            .filter(|member| !followers.contains(member))
            .cloned()
            .collect();
        for member in departed {
            if let Some(shipper) = state.log_shippers.remove(&member) {
                slog::info!(self.logger, "Stopping log shipper for departed member {}", member);
                shipper.stop();
            }
        }

        for follower in followers {
            self.start_shipper_if_absent(&mut state, follower, leader_context);
        }
    }
}
