//! # redb-backed Repository Store
//!
//! Durable storage for repositories using the redb embedded database:
//! - ACID transactions (one write transaction per mutation)
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! ## Integration with the Server
//!
//! The server keeps every repository in memory and uses `RedbRepositoryStore`
//! as a write-through log: it loads all repositories at open, then applies
//! each successful `ChangeSet` while still holding the repository's write lock.

use crate::mutation::ChangeSet;
use crate::repository::RepositoryData;
use crate::{CanopyError, ClassifierInstance, RepositoryConfiguration};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

/// Table for repositories: name -> serialized `RepositoryRecord`
const REPOSITORIES: TableDefinition<&str, &[u8]> = TableDefinition::new("repositories");

/// Table for nodes: (repository, node id) -> serialized `ClassifierInstance`
const NODES: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("nodes");

/// Table for partition roots: (repository, node id) -> marker
const PARTITIONS: TableDefinition<(&str, &str), u8> = TableDefinition::new("partitions");

/// Per-repository header row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct RepositoryRecord {
    configuration: RepositoryConfiguration,
    version: u64,
    next_id: u64,
}

impl RepositoryRecord {
    fn of(repository: &RepositoryData) -> Self {
        Self {
            configuration: repository.configuration().clone(),
            version: repository.version(),
            next_id: repository.next_id(),
        }
    }

    fn to_bytes(&self) -> Result<Vec<u8>, CanopyError> {
        postcard::to_allocvec(self).map_err(|e| CanopyError::SerializationError(e.to_string()))
    }
}

fn encode_node(node: &ClassifierInstance) -> Result<Vec<u8>, CanopyError> {
    postcard::to_allocvec(node).map_err(|e| CanopyError::SerializationError(e.to_string()))
}

/// A disk-backed repository store.
pub struct RedbRepositoryStore {
    db: Database,
}

impl std::fmt::Debug for RedbRepositoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbRepositoryStore").finish_non_exhaustive()
    }
}

impl RedbRepositoryStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CanopyError> {
        let db =
            Database::create(path.as_ref()).map_err(|e| CanopyError::IoError(e.to_string()))?;

        {
            let write_txn = db
                .begin_write()
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(REPOSITORIES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(NODES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let _ = write_txn
                .open_table(PARTITIONS)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
        }

        Ok(Self { db })
    }

    /// Load every stored repository, sorted by name.
    pub fn load_all(&self) -> Result<Vec<RepositoryData>, CanopyError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;

        let mut records: BTreeMap<String, RepositoryRecord> = BTreeMap::new();
        {
            let table = read_txn
                .open_table(REPOSITORIES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            for entry in table
                .iter()
                .map_err(|e| CanopyError::IoError(e.to_string()))?
            {
                let (key, value) = entry.map_err(|e| CanopyError::IoError(e.to_string()))?;
                let record: RepositoryRecord = postcard::from_bytes(value.value())
                    .map_err(|e| CanopyError::DeserializationError(e.to_string()))?;
                records.insert(key.value().to_string(), record);
            }
        }

        let mut nodes: BTreeMap<String, BTreeMap<String, ClassifierInstance>> = BTreeMap::new();
        {
            let table = read_txn
                .open_table(NODES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            for entry in table
                .iter()
                .map_err(|e| CanopyError::IoError(e.to_string()))?
            {
                let (key, value) = entry.map_err(|e| CanopyError::IoError(e.to_string()))?;
                let (repository, id) = key.value();
                let node: ClassifierInstance = postcard::from_bytes(value.value())
                    .map_err(|e| CanopyError::DeserializationError(e.to_string()))?;
                nodes
                    .entry(repository.to_string())
                    .or_default()
                    .insert(id.to_string(), node);
            }
        }

        let mut partitions: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
        {
            let table = read_txn
                .open_table(PARTITIONS)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            for entry in table
                .iter()
                .map_err(|e| CanopyError::IoError(e.to_string()))?
            {
                let (key, _) = entry.map_err(|e| CanopyError::IoError(e.to_string()))?;
                let (repository, id) = key.value();
                partitions
                    .entry(repository.to_string())
                    .or_default()
                    .insert(id.to_string());
            }
        }

        let repositories = records
            .into_iter()
            .map(|(name, record)| {
                RepositoryData::from_parts(
                    record.configuration,
                    partitions.remove(&name).unwrap_or_default(),
                    nodes.remove(&name).unwrap_or_default(),
                    record.version,
                    record.next_id,
                )
            })
            .collect::<Vec<_>>();

        tracing::debug!(count = repositories.len(), "loaded repositories from redb");
        Ok(repositories)
    }

    /// Write a repository in full, replacing any stored rows under its name.
    pub fn save_repository(&self, repository: &RepositoryData) -> Result<(), CanopyError> {
        let name = repository.name();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;
        {
            let mut repos = write_txn
                .open_table(REPOSITORIES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let mut nodes = write_txn
                .open_table(NODES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let mut partitions = write_txn
                .open_table(PARTITIONS)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;

            let stale_nodes = Self::keys_of(&nodes, name)?;
            for id in &stale_nodes {
                nodes
                    .remove((name, id.as_str()))
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            let stale_partitions = Self::keys_of(&partitions, name)?;
            for id in &stale_partitions {
                partitions
                    .remove((name, id.as_str()))
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }

            for (id, node) in repository.nodes() {
                let bytes = encode_node(node)?;
                nodes
                    .insert((name, id.as_str()), bytes.as_slice())
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            for id in repository.partitions() {
                partitions
                    .insert((name, id.as_str()), 1u8)
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }

            let record = RepositoryRecord::of(repository).to_bytes()?;
            repos
                .insert(name, record.as_slice())
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Apply one mutation's change set in a single write transaction.
    ///
    /// `repository` is the post-mutation state; upserted rows are read from it.
    pub fn apply(&self, repository: &RepositoryData, changes: &ChangeSet) -> Result<(), CanopyError> {
        let name = repository.name();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;
        {
            let mut repos = write_txn
                .open_table(REPOSITORIES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let mut nodes = write_txn
                .open_table(NODES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let mut partitions = write_txn
                .open_table(PARTITIONS)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;

            for id in &changes.partitions_removed {
                partitions
                    .remove((name, id.as_str()))
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            for id in &changes.partitions_added {
                partitions
                    .insert((name, id.as_str()), 1u8)
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            for id in &changes.deleted {
                nodes
                    .remove((name, id.as_str()))
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            for id in &changes.upserted {
                if let Some(node) = repository.get(id) {
                    let bytes = encode_node(node)?;
                    nodes
                        .insert((name, id.as_str()), bytes.as_slice())
                        .map_err(|e| CanopyError::IoError(e.to_string()))?;
                }
            }

            let record = RepositoryRecord::of(repository).to_bytes()?;
            repos
                .insert(name, record.as_slice())
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;

        tracing::trace!(
            repository = name,
            upserted = changes.upserted.len(),
            deleted = changes.deleted.len(),
            "change set committed"
        );
        Ok(())
    }

    /// Persist only the header row (version and ID counter).
    pub fn save_counters(&self, repository: &RepositoryData) -> Result<(), CanopyError> {
        self.apply(repository, &ChangeSet::new())
    }

    /// Remove every row of a repository.
    pub fn delete_repository(&self, name: &str) -> Result<(), CanopyError> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;
        {
            let mut repos = write_txn
                .open_table(REPOSITORIES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let mut nodes = write_txn
                .open_table(NODES)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
            let mut partitions = write_txn
                .open_table(PARTITIONS)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;

            for id in Self::keys_of(&nodes, name)? {
                nodes
                    .remove((name, id.as_str()))
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            for id in Self::keys_of(&partitions, name)? {
                partitions
                    .remove((name, id.as_str()))
                    .map_err(|e| CanopyError::IoError(e.to_string()))?;
            }
            repos
                .remove(name)
                .map_err(|e| CanopyError::IoError(e.to_string()))?;
        }
        write_txn
            .commit()
            .map_err(|e| CanopyError::IoError(e.to_string()))?;
        Ok(())
    }

    /// Node IDs stored under `repository` in a `(repository, id)`-keyed table.
    fn keys_of<V: redb::Value + 'static>(
        table: &impl ReadableTable<(&'static str, &'static str), V>,
        repository: &str,
    ) -> Result<Vec<String>, CanopyError> {
        let mut ids = Vec::new();
        for entry in table
            .range((repository, "")..)
            .map_err(|e| CanopyError::IoError(e.to_string()))?
        {
            let (key, _) = entry.map_err(|e| CanopyError::IoError(e.to_string()))?;
            let (owner, id) = key.value();
            if owner != repository {
                break;
            }
            ids.push(id.to_string());
        }
        Ok(ids)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaPointer;
    use tempfile::tempdir;

    fn repo(name: &str) -> RepositoryData {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new(name));
        repo.create_partitions_from_chunk(vec![
            ClassifierInstance::new("p1", MetaPointer::new("t", "1", "Root"))
                .with_child(MetaPointer::new("t", "1", "items"), "c1"),
            ClassifierInstance::new("c1", MetaPointer::new("t", "1", "Item")).with_parent("p1"),
        ])
        .expect("create");
        repo
    }

    #[test]
    fn save_and_reload() {
        let temp = tempdir().expect("temp dir");
        let db_path = temp.path().join("test.redb");

        {
            let store = RedbRepositoryStore::open(&db_path).expect("open db");
            store.save_repository(&repo("a")).expect("save");
            store.save_repository(&repo("b")).expect("save");
        }

        let store = RedbRepositoryStore::open(&db_path).expect("reopen db");
        let loaded = store.load_all().expect("load");
        assert_eq!(loaded.len(), 2);
        assert_eq!(loaded[0].name(), "a");
        assert_eq!(loaded[1].node_count(), 2);
        assert_eq!(loaded[1].list_partition_ids(), vec!["p1".to_string()]);
    }

    #[test]
    fn apply_writes_only_changes() {
        let temp = tempdir().expect("temp dir");
        let store = RedbRepositoryStore::open(temp.path().join("t.redb")).expect("open db");
        let mut data = repo("a");
        store.save_repository(&data).expect("save");

        let changes = data
            .store(vec![ClassifierInstance::new("p1", MetaPointer::new("t", "1", "Root"))])
            .expect("store");
        data.bump_version();
        store.apply(&data, &changes).expect("apply");

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded[0].node_count(), 1);
        assert_eq!(loaded[0].version(), 1);
    }

    #[test]
    fn delete_repository_leaves_others() {
        let temp = tempdir().expect("temp dir");
        let store = RedbRepositoryStore::open(temp.path().join("t.redb")).expect("open db");
        store.save_repository(&repo("a")).expect("save");
        store.save_repository(&repo("ab")).expect("save");

        store.delete_repository("a").expect("delete");

        let loaded = store.load_all().expect("load");
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].name(), "ab");
        assert_eq!(loaded[0].node_count(), 2);
    }
}
