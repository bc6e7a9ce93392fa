use std::collections::HashSet;
use std::fmt;
use std::sync::{PoisonError, RwLock, Weak};

#[derive(Clone, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct MemberId(String);

impl MemberId {
    pub fn new(id: impl Into<String>) -> Self {
        MemberId(id.into())
    }
}

impl fmt::Display for MemberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// ReplicationMembership is the roster of members the leader replicates its log to. It may
/// include the leader itself.
pub trait ReplicationMembership: Send + Sync {
    fn replication_members(&self) -> HashSet<MemberId>;
}

pub trait MembershipListener: Send + Sync {
    fn on_membership_changed(&self);
}

/// A roster that only changes when told to. Listeners are held weakly and notified after every
/// change.
pub struct StaticMembership {
    members: RwLock<HashSet<MemberId>>,
    listeners: RwLock<Vec<Weak<dyn MembershipListener>>>,
}

impl StaticMembership {
    pub fn new(members: impl IntoIterator<Item = MemberId>) -> Self {
        StaticMembership {
            members: RwLock::new(members.into_iter().collect()),
            listeners: RwLock::new(vec![]),
        }
    }

    pub fn register_listener(&self, listener: Weak<dyn MembershipListener>) {
        self.listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(listener);
    }

    pub fn set_members(&self, members: impl IntoIterator<Item = MemberId>) {
        *self.members.write().unwrap_or_else(PoisonError::into_inner) = members.into_iter().collect();
        self.notify_listeners();
    }

    fn notify_listeners(&self) {
        // Listener lock must be released before notifying.
        let live: Vec<_> = {
            let mut listeners = self.listeners.write().unwrap_or_else(PoisonError::into_inner);
            listeners.retain(|l| l.strong_count() > 0);
            listeners.iter().filter_map(Weak::upgrade).collect()
        };

        for listener in live {
            listener.on_membership_changed();
        }
    }
}

impl ReplicationMembership for StaticMembership {
    fn replication_members(&self) -> HashSet<MemberId> {
        self.members.read().unwrap_or_else(PoisonError::into_inner).clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingListener(AtomicUsize);

    impl MembershipListener for CountingListener {
        fn on_membership_changed(&self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn set_members_notifies_live_listeners() {
        let membership = StaticMembership::new(vec![MemberId::new("a")]);
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let dyn_listener: Arc<dyn MembershipListener> = listener.clone();
        membership.register_listener(Arc::downgrade(&dyn_listener));

        membership.set_members(vec![MemberId::new("a"), MemberId::new("b")]);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        assert_eq!(membership.replication_members().len(), 2);

        // Dropped listeners are forgotten.
        drop(dyn_listener);
        drop(listener);
        membership.set_members(vec![]);
        assert!(membership.replication_members().is_empty());
    }
}
