mod cache;
mod commitlog;
mod membership;
mod messages;
mod options;
mod shipping;
mod timers;

#[cfg(test)]
mod test_utils;

pub use cache::ConsecutiveInFlightCache;
pub use cache::InFlightCache;
pub use commitlog::InMemoryRaftLog;
pub use commitlog::Index;
pub use commitlog::RaftLogEntry;
pub use commitlog::ReadableRaftLog;
pub use commitlog::Term;
pub use membership::MemberId;
pub use membership::MembershipListener;
pub use membership::ReplicationMembership;
pub use membership::StaticMembership;
pub use messages::AppendEntriesRequest;
pub use messages::Heartbeat;
pub use messages::LogCompactionInfo;
pub use messages::Outbound;
pub use messages::RaftMessage;
pub use options::ShippingConfig;
pub use options::ShippingOptions;
pub use options::ShippingOptionsError;
pub use shipping::LeaderContext;
pub use shipping::LogShipper;
pub use shipping::LogShipperConfig;
pub use shipping::LogShippingManager;
pub use shipping::LogShippingManagerConfig;
pub use shipping::Mode;
pub use shipping::ShipCommand;
pub use shipping::ShipperStatus;
pub use timers::CancelMode;
pub use timers::Clock;
pub use timers::RealClock;
pub use timers::Timer;
pub use timers::TimerService;

// Every root module is private, with nothing but `mod` and `pub use` statements in it. The rest
// of the crate, and users, only ever see what is re-exported here.
