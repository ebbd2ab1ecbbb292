//! # Observers
//!
//! Synchronous change notification for repository mutations.
//!
//! - Explicit subscribe / unsubscribe; no implicit global listeners
//! - Per-node watchers keyed by node ID, removed when the node is deleted
//! - Notifications run inside the repository's exclusive lock, before the
//!   mutating call returns
//!
//! Observers must not call back into the server for the same repository:
//! the write lock is held while they run.

use crate::mutation::ChangeSet;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

/// Callbacks fired after a successful mutation. All methods default to no-ops.
pub trait RepositoryObserver: Send + Sync {
    fn partition_added(&self, _repository: &str, _partition: &str) {}
    fn partition_removed(&self, _repository: &str, _partition: &str) {}
    fn node_deleted(&self, _repository: &str, _node: &str) {}
}

/// Handle returned by `ObserverRegistry::subscribe`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(pub u64);

type WatchKey = (String, String);

#[derive(Default)]
pub struct ObserverRegistry {
    next_id: AtomicU64,
    subscribers: RwLock<BTreeMap<SubscriptionId, Arc<dyn RepositoryObserver>>>,
    watchers: RwLock<BTreeMap<WatchKey, Vec<Arc<dyn RepositoryObserver>>>>,
}

impl ObserverRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an observer for every repository.
    pub fn subscribe(&self, observer: Arc<dyn RepositoryObserver>) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().insert(id, observer);
        id
    }

    /// Remove a subscription. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().remove(&id).is_some()
    }

    /// Watch one node; the watcher sees its `node_deleted` and is then dropped.
    pub fn watch_node(
        &self,
        repository: &str,
        node: &str,
        observer: Arc<dyn RepositoryObserver>,
    ) {
        self.watchers
            .write()
            .entry((repository.to_string(), node.to_string()))
            .or_default()
            .push(observer);
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    /// Number of live node watchers across all repositories.
    #[must_use]
    pub fn watcher_count(&self) -> usize {
        self.watchers.read().values().map(Vec::len).sum()
    }

    /// Drop every watcher of `repository` (used when the repository is deleted).
    pub fn forget_repository(&self, repository: &str) {
        self.watchers.write().retain(|(repo, _), _| repo != repository);
    }

    /// Emit the notifications for `changes`.
    ///
    /// Order: partitions added, then nodes deleted, then partitions removed.
    pub fn notify(&self, repository: &str, changes: &ChangeSet) {
        let subscribers: Vec<Arc<dyn RepositoryObserver>> =
            self.subscribers.read().values().cloned().collect();

        for partition in &changes.partitions_added {
            for observer in &subscribers {
                observer.partition_added(repository, partition);
            }
        }

        for node in &changes.deleted {
            for observer in &subscribers {
                observer.node_deleted(repository, node);
            }
            let watchers = self
                .watchers
                .write()
                .remove(&(repository.to_string(), node.clone()));
            for watcher in watchers.into_iter().flatten() {
                watcher.node_deleted(repository, node);
            }
        }

        for partition in &changes.partitions_removed {
            for observer in &subscribers {
                observer.partition_removed(repository, partition);
            }
        }
    }
}

impl std::fmt::Debug for ObserverRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObserverRegistry")
            .field("subscribers", &self.subscriber_count())
            .field("watchers", &self.watcher_count())
            .finish()
    }
}
