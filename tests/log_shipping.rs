use chrono::Utc;
use log_shipper::{
    InMemoryRaftLog, Index, LeaderContext, LogShippingManager, LogShippingManagerConfig, MemberId,
    MembershipListener, Outbound, RaftLogEntry, RaftMessage, ReadableRaftLog, ShipCommand, ShippingConfig,
    StaticMembership, Term, TimerService,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use slog::Drain;
use std::collections::HashMap;
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::time::{Duration, Instant};

const LEADER: &str = "leader";
const TERM: Term = Term::new(1);

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn followers_converge_over_lossy_network() {
    let cluster = Cluster::start(&["b", "c", "d"], 50, 0.2);
    cluster.manager.resume(cluster.leader_context());

    for round in 0..10 {
        cluster.append_and_ship(round, 7);
        sleep(Duration::from_millis(5)).await;
    }

    cluster.wait_for_convergence(&["b", "c", "d"], Duration::from_secs(10)).await;
    cluster.manager.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn membership_change_starts_and_stops_shippers() {
    let cluster = Cluster::start(&["b", "c"], 20, 0.0);
    cluster.manager.resume(cluster.leader_context());
    cluster.wait_for_convergence(&["b", "c"], Duration::from_secs(10)).await;

    cluster.membership.set_members(vec![member(LEADER), member("c"), member("d")]);
    assert_eq!(cluster.manager.live_followers(), vec![member("c"), member("d")]);

    cluster.append_and_ship(0, 5);
    cluster.wait_for_convergence(&["c", "d"], Duration::from_secs(10)).await;

    // b was removed before the new entries, so it never got them.
    assert_eq!(cluster.follower_append_index("b"), Index::new(20));
    cluster.manager.stop();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn follower_behind_compacted_log_is_told_to_install_snapshot() {
    let cluster = Cluster::start(&["b"], 100, 0.0);
    cluster.leader_log.prune(Index::new(60));
    cluster.manager.resume(cluster.leader_context());

    cluster.wait_for_convergence(&["b"], Duration::from_secs(10)).await;
    assert_eq!(cluster.follower_log("b").prev_index(), Index::new(60));
    cluster.manager.stop();
}

struct Cluster {
    leader_log: Arc<InMemoryRaftLog>,
    followers: Arc<HashMap<MemberId, Arc<InMemoryRaftLog>>>,
    membership: Arc<StaticMembership>,
    manager: Arc<LogShippingManager>,
}

impl Cluster {
    fn start(follower_ids: &[&str], initial_entries: u64, drop_probability: f64) -> Self {
        let logger = create_root_logger_for_stdout(LEADER.to_string());
        let leader_log = Arc::new(InMemoryRaftLog::new());
        for i in 0..initial_entries {
            leader_log
                .append(RaftLogEntry::new(TERM, format!("initial-{}", i)))
                .unwrap();
        }

        // Every follower the tests may ever add gets a log up front.
        let followers: Arc<HashMap<_, _>> = Arc::new(
            ["b", "c", "d"]
                .iter()
                .map(|id| (member(id), Arc::new(InMemoryRaftLog::new())))
                .collect(),
        );
        let mut members = vec![member(LEADER)];
        members.extend(follower_ids.iter().map(|id| member(id)));
        let membership = Arc::new(StaticMembership::new(members));

        let (tx, rx) = mpsc::unbounded_channel();
        let manager = Arc::new(LogShippingManager::new(LogShippingManagerConfig {
            logger,
            my_id: member(LEADER),
            raft_log: leader_log.clone(),
            in_flight_cache: None,
            outbound: Arc::new(ChannelOutbound { tx }),
            membership: membership.clone(),
            timer_service: TimerService::new(),
            shipping: ShippingConfig {
                retry_time: Duration::from_millis(20),
                catchup_batch_size: 8,
                max_allowed_shipping_lag: 16,
            },
        }));
        let listener: Arc<dyn MembershipListener> = manager.clone();
        membership.register_listener(Arc::downgrade(&listener));

        tokio::spawn(run_network(
            rx,
            Arc::downgrade(&manager),
            leader_log.clone(),
            followers.clone(),
            drop_probability,
        ));

        Cluster {
            leader_log,
            followers,
            membership,
            manager,
        }
    }

    fn leader_context(&self) -> LeaderContext {
        LeaderContext::new(TERM, Index::ZERO)
    }

    fn append_and_ship(&self, round: u64, count: u64) {
        let prev_log_index = self.leader_log.append_index();
        let entries: Vec<_> = (0..count)
            .map(|i| RaftLogEntry::new(TERM, format!("round-{}-{}", round, i)))
            .collect();
        for entry in &entries {
            self.leader_log.append(entry.clone()).unwrap();
        }

        self.manager.handle_commands(
            &[
                ShipCommand::NewEntries {
                    prev_log_index,
                    prev_log_term: self.leader_log.read_entry_term(prev_log_index).unwrap().unwrap(),
                    entries,
                },
                ShipCommand::CommitUpdate,
            ],
            self.leader_context(),
        );
    }

    fn follower_log(&self, id: &str) -> &InMemoryRaftLog {
        self.followers.get(&member(id)).unwrap()
    }

    fn follower_append_index(&self, id: &str) -> Index {
        self.follower_log(id).append_index()
    }

    async fn wait_for_convergence(&self, ids: &[&str], timeout: Duration) {
        let deadline = Instant::now() + timeout;
        loop {
            if ids.iter().all(|id| self.is_in_sync(id)) {
                return;
            }
            if Instant::now() > deadline {
                let state: Vec<_> = ids
                    .iter()
                    .map(|id| (id.to_string(), self.manager.shipper_status(&member(id))))
                    .collect();
                panic!("Followers did not converge: {:?}", state);
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    fn is_in_sync(&self, id: &str) -> bool {
        let follower = self.follower_log(id);
        let append_index = self.leader_log.append_index();
        if follower.append_index() != append_index {
            return false;
        }

        let mut index = follower.prev_index().plus(1);
        while index <= append_index {
            if follower.read_entry(index).unwrap() != self.leader_log.read_entry(index).unwrap() {
                return false;
            }
            index = index.plus(1);
        }
        true
    }
}

struct ChannelOutbound {
    tx: mpsc::UnboundedSender<(MemberId, RaftMessage)>,
}

impl Outbound for ChannelOutbound {
    fn send(&self, to: &MemberId, message: RaftMessage) {
        let _ = self.tx.send((to.clone(), message));
    }
}

// Delivers leader messages to the simulated followers and feeds their acknowledgements back to
// the manager. Messages are dropped at random in both directions.
async fn run_network(
    mut rx: mpsc::UnboundedReceiver<(MemberId, RaftMessage)>,
    manager: Weak<LogShippingManager>,
    leader_log: Arc<InMemoryRaftLog>,
    followers: Arc<HashMap<MemberId, Arc<InMemoryRaftLog>>>,
    drop_probability: f64,
) {
    let mut rng = StdRng::seed_from_u64(0xFACE);

    while let Some((to, message)) = rx.recv().await {
        if rng.gen_bool(drop_probability) {
            continue;
        }
        let follower = match followers.get(&to) {
            Some(follower) => follower,
            None => continue,
        };

        let reply = match message {
            RaftMessage::AppendEntriesRequest(request) => Some(handle_append(&to, follower, request)),
            RaftMessage::LogCompactionInfo(info) => {
                // Stands in for a snapshot install. The shipper's retry probe finds the new base.
                let term = leader_log.read_entry_term(info.prev_index).unwrap().unwrap();
                follower.skip(info.prev_index, term);
                None
            }
            RaftMessage::Heartbeat(_) => None,
        };

        let reply = match reply {
            Some(reply) if !rng.gen_bool(drop_probability) => reply,
            _ => continue,
        };
        match manager.upgrade() {
            Some(manager) => manager.handle_commands(&[reply], LeaderContext::new(TERM, Index::ZERO)),
            None => return,
        }
    }
}

fn handle_append(
    me: &MemberId,
    log: &InMemoryRaftLog,
    request: log_shipper::AppendEntriesRequest,
) -> ShipCommand {
    let matches = request.prev_log_index >= log.prev_index()
        && log.read_entry_term(request.prev_log_index).unwrap() == Some(request.prev_log_term);
    if !matches {
        return ShipCommand::Mismatch {
            target: me.clone(),
            last_remote_append_index: log.append_index(),
        };
    }

    let mut index = request.prev_log_index;
    for entry in request.entries {
        index = index.plus(1);
        match log.read_entry_term(index).unwrap() {
            Some(term) if term == entry.term => continue,
            Some(_) => log.truncate(index).unwrap(),
            None => {}
        }
        log.append(entry).unwrap();
    }

    ShipCommand::Match {
        target: me.clone(),
        new_match_index: index,
    }
}

fn member(id: &str) -> MemberId {
    MemberId::new(id)
}

fn create_root_logger_for_stdout(member_id: String) -> slog::Logger {
    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).use_file_location().build().fuse();
    let drain = slog_async::Async::new(drain).build().fuse();

    slog::Logger::root(
        drain,
        slog::o!("MemberId" => member_id, "StartedAt" => Utc::now().to_rfc3339()),
    )
}

async fn sleep(duration: Duration) {
    tokio::time::sleep(duration).await;
}
