//! # Repository Server
//!
//! Holds named repositories and routes every operation to the right one.
//!
//! ## Locking
//!
//! - The repository map has its own lock, held only to look up, add or
//!   remove a repository, never across a repository operation.
//! - Each repository sits behind its own `RwLock`. Mutations (`store`,
//!   `create_partitions`, `delete_partitions`, `ids`) hold the write lock for
//!   the whole call: validation, apply, sweep, persistence and observer
//!   notification. Reads hold the shared lock.
//!
//! ## Storage Backends
//!
//! - `InMemory`: volatile, state lives only in the process
//! - `Persistent`: every repository is loaded from redb at open; each
//!   successful mutation is written in one redb transaction before the
//!   call returns. A failed write restores the in-memory state.

use crate::builtins::Builtins;
use crate::consistency::{ConsistencyChecker, ValidationResult};
use crate::formats::{repository_to_bytes, snapshot_from_bytes};
use crate::inspection::{
    self, ClassifierKey, ClassifierResult, PartitionSummary, RepositoryMetrics,
};
use crate::mutation::ChangeSet;
use crate::observer::{ObserverRegistry, RepositoryObserver, SubscriptionId};
use crate::primitives::{DEFAULT_REPOSITORY, is_valid_repository_name};
use crate::repository::{RepositoryData, Retrieved, UnknownPolicy};
use crate::storage::RedbRepositoryStore;
use crate::{
    CanopyError, Chunk, ClassifierInstance, HistorySupport, RepositoryConfiguration,
    RepositoryVersionToken,
};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

/// Storage backend for a server.
#[derive(Debug)]
pub enum StorageBackend {
    /// Repositories live only in memory.
    InMemory,
    /// Repositories are written through to redb.
    Persistent(RedbRepositoryStore),
}

type SharedRepository = Arc<RwLock<RepositoryData>>;

/// The multi-repository storage engine.
#[derive(Debug)]
pub struct RepositoryServer {
    builtins: Arc<Builtins>,
    repositories: RwLock<BTreeMap<String, SharedRepository>>,
    observers: ObserverRegistry,
    backend: StorageBackend,
}

impl RepositoryServer {
    /// Create an empty in-memory server.
    #[must_use]
    pub fn new(builtins: Arc<Builtins>) -> Self {
        Self {
            builtins,
            repositories: RwLock::new(BTreeMap::new()),
            observers: ObserverRegistry::new(),
            backend: StorageBackend::InMemory,
        }
    }

    /// Open or create a persistent server at `path`, loading every stored repository.
    pub fn open(path: impl AsRef<Path>, builtins: Arc<Builtins>) -> Result<Self, CanopyError> {
        let store = RedbRepositoryStore::open(path)?;
        let repositories = store
            .load_all()?
            .into_iter()
            .map(|r| (r.name().to_string(), Arc::new(RwLock::new(r))))
            .collect();

        Ok(Self {
            builtins,
            repositories: RwLock::new(repositories),
            observers: ObserverRegistry::new(),
            backend: StorageBackend::Persistent(store),
        })
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self.backend, StorageBackend::Persistent(_))
    }

    #[must_use]
    pub fn builtins(&self) -> &Arc<Builtins> {
        &self.builtins
    }

    fn repository(&self, name: &str) -> Result<SharedRepository, CanopyError> {
        self.repositories
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| CanopyError::RepositoryNotFound(name.to_string()))
    }

    // =========================================================================
    // REPOSITORY LIFECYCLE
    // =========================================================================

    /// Create a repository.
    ///
    /// Rejects invalid names, duplicate names and history-enabled configurations.
    pub fn create_repository(&self, configuration: RepositoryConfiguration) -> Result<(), CanopyError> {
        if !is_valid_repository_name(&configuration.name) {
            return Err(CanopyError::InvalidRequest(format!(
                "Invalid repository name: {:?}",
                configuration.name
            )));
        }
        if configuration.history == HistorySupport::Enabled {
            return Err(CanopyError::HistoryUnsupported(configuration.name));
        }

        let mut repositories = self.repositories.write();
        if repositories.contains_key(&configuration.name) {
            return Err(CanopyError::RepositoryAlreadyExists(configuration.name));
        }

        let data = RepositoryData::new(configuration);
        if let StorageBackend::Persistent(store) = &self.backend {
            store.save_repository(&data)?;
        }
        tracing::info!(
            repository = data.name(),
            format = %data.configuration().format_version,
            "repository created"
        );
        repositories.insert(data.name().to_string(), Arc::new(RwLock::new(data)));
        Ok(())
    }

    /// Create the default repository if the server holds none.
    ///
    /// Returns `true` if it was created.
    pub fn ensure_default_repository(&self) -> Result<bool, CanopyError> {
        if !self.repositories.read().is_empty() {
            return Ok(false);
        }
        match self.create_repository(RepositoryConfiguration::new(DEFAULT_REPOSITORY)) {
            Ok(()) => Ok(true),
            Err(CanopyError::RepositoryAlreadyExists(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Delete a repository and everything in it.
    pub fn delete_repository(&self, name: &str) -> Result<(), CanopyError> {
        let mut repositories = self.repositories.write();
        if !repositories.contains_key(name) {
            return Err(CanopyError::RepositoryNotFound(name.to_string()));
        }
        if let StorageBackend::Persistent(store) = &self.backend {
            store.delete_repository(name)?;
        }
        repositories.remove(name);
        drop(repositories);

        self.observers.forget_repository(name);
        tracing::info!(repository = name, "repository deleted");
        Ok(())
    }

    /// Configurations of every repository, sorted by name.
    #[must_use]
    pub fn list_repositories(&self) -> Vec<RepositoryConfiguration> {
        let shared: Vec<SharedRepository> = self.repositories.read().values().cloned().collect();
        shared
            .iter()
            .map(|r| r.read().configuration().clone())
            .collect()
    }

    pub fn repository_configuration(&self, name: &str) -> Result<RepositoryConfiguration, CanopyError> {
        Ok(self.repository(name)?.read().configuration().clone())
    }

    /// Current version token of a repository.
    pub fn repository_version(&self, name: &str) -> Result<RepositoryVersionToken, CanopyError> {
        Ok(self.repository(name)?.read().version_token())
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Run a mutation under the repository's write lock.
    ///
    /// On success: bump the version, persist the change set, notify observers.
    fn mutate<F>(&self, name: &str, operation: &str, op: F) -> Result<RepositoryVersionToken, CanopyError>
    where
        F: FnOnce(&mut RepositoryData) -> Result<ChangeSet, CanopyError>,
    {
        let repository = self.repository(name)?;
        let mut data = repository.write();
        let previous_version = data.version();

        let changes = op(&mut *data).inspect_err(|e| {
            tracing::warn!(repository = name, operation, error = %e, "mutation rejected");
        })?;
        let token = data.bump_version();

        if let StorageBackend::Persistent(store) = &self.backend
            && let Err(e) = store.apply(&data, &changes)
        {
            tracing::error!(repository = name, operation, error = %e, "persisting change set failed");
            data.revert(&changes, previous_version);
            return Err(e);
        }

        self.observers.notify(name, &changes);
        tracing::debug!(
            repository = name,
            operation,
            version = %token,
            upserted = changes.upserted.len(),
            deleted = changes.deleted.len(),
            "mutation applied"
        );
        Ok(token)
    }

    /// Register new partitions from a chunk and store it.
    pub fn create_partitions(
        &self,
        name: &str,
        instances: Vec<ClassifierInstance>,
    ) -> Result<RepositoryVersionToken, CanopyError> {
        self.mutate(name, "create_partitions", |data| {
            data.create_partitions_from_chunk(instances)
        })
    }

    /// Store instances (insert or wholesale replace) and sweep.
    pub fn store(
        &self,
        name: &str,
        instances: Vec<ClassifierInstance>,
    ) -> Result<RepositoryVersionToken, CanopyError> {
        self.mutate(name, "store", |data| data.store(instances))
    }

    /// Unregister partitions and cascade deletion.
    pub fn delete_partitions(
        &self,
        name: &str,
        ids: &[String],
    ) -> Result<RepositoryVersionToken, CanopyError> {
        self.mutate(name, "delete_partitions", |data| data.delete_partitions(ids))
    }

    /// Allocate fresh IDs. Does not change the repository version.
    pub fn ids(&self, name: &str, count: usize) -> Result<Vec<String>, CanopyError> {
        if count == 0 {
            self.repository(name)?;
            return Ok(Vec::new());
        }

        let repository = self.repository(name)?;
        let mut data = repository.write();
        let previous = data.next_id();
        let allocated = data.ids(count);

        if let StorageBackend::Persistent(store) = &self.backend
            && let Err(e) = store.save_counters(&data)
        {
            data.rewind_next_id(previous);
            return Err(e);
        }
        Ok(allocated)
    }

    // =========================================================================
    // READS
    // =========================================================================

    pub fn list_partitions(&self, name: &str) -> Result<Vec<String>, CanopyError> {
        Ok(self.repository(name)?.read().list_partition_ids())
    }

    pub fn retrieve(
        &self,
        name: &str,
        ids: &[String],
        depth_limit: usize,
        policy: UnknownPolicy,
    ) -> Result<Retrieved, CanopyError> {
        self.repository(name)?.read().retrieve(ids, depth_limit, policy)
    }

    /// Every reachable node of a repository as one chunk.
    pub fn retrieve_all(&self, name: &str) -> Result<Chunk, CanopyError> {
        Ok(self.repository(name)?.read().retrieve_all())
    }

    pub fn nodes_by_classifier(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<BTreeMap<ClassifierKey, ClassifierResult>, CanopyError> {
        Ok(inspection::nodes_by_classifier(&self.repository(name)?.read(), limit))
    }

    pub fn nodes_by_language(
        &self,
        name: &str,
        limit: usize,
    ) -> Result<BTreeMap<String, ClassifierResult>, CanopyError> {
        Ok(inspection::nodes_by_language(&self.repository(name)?.read(), limit))
    }

    pub fn partition_summaries(&self, name: &str) -> Result<Vec<PartitionSummary>, CanopyError> {
        Ok(inspection::partition_summaries(&self.repository(name)?.read()))
    }

    pub fn metrics(&self, name: &str) -> Result<RepositoryMetrics, CanopyError> {
        Ok(inspection::metrics(&self.repository(name)?.read()))
    }

    // =========================================================================
    // CONSISTENCY
    // =========================================================================

    /// Audit one repository.
    pub fn validate_repository(&self, name: &str) -> Result<ValidationResult, CanopyError> {
        let repository = self.repository(name)?;
        let data = repository.read();
        Ok(ConsistencyChecker::new(self.builtins.as_ref()).check(&data))
    }

    /// Audit every repository, keyed by name.
    #[must_use]
    pub fn check_consistency(&self) -> BTreeMap<String, ValidationResult> {
        let shared: Vec<(String, SharedRepository)> = self
            .repositories
            .read()
            .iter()
            .map(|(name, r)| (name.clone(), Arc::clone(r)))
            .collect();

        let checker = ConsistencyChecker::new(self.builtins.as_ref());
        shared
            .into_iter()
            .map(|(name, r)| {
                let result = checker.check(&r.read());
                (name, result)
            })
            .collect()
    }

    // =========================================================================
    // OBSERVERS
    // =========================================================================

    pub fn subscribe(&self, observer: Arc<dyn RepositoryObserver>) -> SubscriptionId {
        self.observers.subscribe(observer)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.observers.unsubscribe(id)
    }

    /// Watch one node of a repository until it is deleted.
    pub fn watch_node(
        &self,
        name: &str,
        node: &str,
        observer: Arc<dyn RepositoryObserver>,
    ) -> Result<(), CanopyError> {
        let repository = self.repository(name)?;
        if !repository.read().contains(node) {
            return Err(CanopyError::UnknownNodes(vec![node.to_string()]));
        }
        self.observers.watch_node(name, node, observer);
        Ok(())
    }

    // =========================================================================
    // SNAPSHOTS
    // =========================================================================

    /// Encode a repository in the snapshot format.
    pub fn export_snapshot(&self, name: &str) -> Result<Vec<u8>, CanopyError> {
        repository_to_bytes(&self.repository(name)?.read())
    }

    /// Create a repository from snapshot bytes. Returns its name.
    ///
    /// The name must not be taken. The imported data is stored as is;
    /// run `validate_repository` to audit it.
    pub fn import_snapshot(&self, bytes: &[u8]) -> Result<String, CanopyError> {
        let snapshot = snapshot_from_bytes(bytes)?;
        let configuration = snapshot.configuration.clone();
        if !is_valid_repository_name(&configuration.name) {
            return Err(CanopyError::InvalidRequest(format!(
                "Invalid repository name: {:?}",
                configuration.name
            )));
        }
        if configuration.history == HistorySupport::Enabled {
            return Err(CanopyError::HistoryUnsupported(configuration.name));
        }

        let mut repositories = self.repositories.write();
        if repositories.contains_key(&configuration.name) {
            return Err(CanopyError::RepositoryAlreadyExists(configuration.name));
        }
        let data = RepositoryData::from(snapshot);
        if let StorageBackend::Persistent(store) = &self.backend {
            store.save_repository(&data)?;
        }
        tracing::info!(
            repository = data.name(),
            nodes = data.node_count(),
            "repository imported"
        );
        repositories.insert(configuration.name.clone(), Arc::new(RwLock::new(data)));
        Ok(configuration.name)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaPointer;
    use parking_lot::Mutex;

    fn server() -> RepositoryServer {
        let server = RepositoryServer::new(Arc::new(Builtins::lioncore()));
        server.ensure_default_repository().expect("default");
        server
    }

    fn root(id: &str) -> ClassifierInstance {
        ClassifierInstance::new(id, MetaPointer::new("t", "1", "Root"))
    }

    #[test]
    fn default_repository_created_once() {
        let server = server();
        assert!(!server.ensure_default_repository().expect("again"));
        let names: Vec<_> = server.list_repositories().into_iter().map(|c| c.name).collect();
        assert_eq!(names, vec![DEFAULT_REPOSITORY.to_string()]);
    }

    #[test]
    fn history_and_duplicates_rejected() {
        let server = server();
        let history = RepositoryConfiguration::new("h").with_history(HistorySupport::Enabled);
        assert!(matches!(
            server.create_repository(history),
            Err(CanopyError::HistoryUnsupported(_))
        ));
        assert!(matches!(
            server.create_repository(RepositoryConfiguration::new(DEFAULT_REPOSITORY)),
            Err(CanopyError::RepositoryAlreadyExists(_))
        ));
        assert!(matches!(
            server.create_repository(RepositoryConfiguration::new("bad name")),
            Err(CanopyError::InvalidRequest(_))
        ));
    }

    #[test]
    fn unknown_repository_rejected() {
        let server = server();
        assert!(matches!(
            server.list_partitions("nope"),
            Err(CanopyError::RepositoryNotFound(_))
        ));
    }

    #[test]
    fn versions_increase_per_mutation_only() {
        let server = server();
        let v1 = server
            .create_partitions(DEFAULT_REPOSITORY, vec![root("p1")])
            .expect("create");
        let rejected = server.store(DEFAULT_REPOSITORY, vec![root("unregistered")]);
        let v2 = server
            .store(DEFAULT_REPOSITORY, vec![root("p1")])
            .expect("store");

        assert!(rejected.is_err());
        assert_eq!(v1.as_str(), "v-1");
        assert_eq!(v2.as_str(), "v-2");
        server.ids(DEFAULT_REPOSITORY, 3).expect("ids");
        assert_eq!(
            server.repository_version(DEFAULT_REPOSITORY).expect("version").as_str(),
            "v-2"
        );
    }

    #[derive(Default)]
    struct Deletions(Mutex<Vec<String>>);

    impl RepositoryObserver for Deletions {
        fn node_deleted(&self, _repository: &str, node: &str) {
            self.0.lock().push(node.to_string());
        }
    }

    #[test]
    fn watchers_fire_on_cascade_delete() {
        let server = server();
        server
            .create_partitions(DEFAULT_REPOSITORY, vec![root("p1")])
            .expect("create");
        let watcher = Arc::new(Deletions::default());
        server
            .watch_node(DEFAULT_REPOSITORY, "p1", watcher.clone())
            .expect("watch");

        server
            .delete_partitions(DEFAULT_REPOSITORY, &["p1".to_string()])
            .expect("delete");

        assert_eq!(*watcher.0.lock(), vec!["p1".to_string()]);
        assert!(server.watch_node(DEFAULT_REPOSITORY, "p1", watcher).is_err());
    }

    #[test]
    fn snapshot_roundtrip_into_new_server() {
        let server = server();
        server
            .create_partitions(DEFAULT_REPOSITORY, vec![root("p1")])
            .expect("create");
        let bytes = server.export_snapshot(DEFAULT_REPOSITORY).expect("export");

        let other = RepositoryServer::new(Arc::new(Builtins::lioncore()));
        let name = other.import_snapshot(&bytes).expect("import");
        assert_eq!(name, DEFAULT_REPOSITORY);
        assert_eq!(other.list_partitions(&name).expect("list"), vec!["p1".to_string()]);
        assert!(server.import_snapshot(&bytes).is_err());
    }
}
