//! # Repository Data
//!
//! The per-repository state of the storage engine: the partition registry,
//! the node index, the version counter and the ID allocator.
//!
//! All data structures use `BTreeMap`/`BTreeSet` for deterministic ordering.
//! `RepositoryData` is not synchronized; the server wraps each repository in
//! its own `RwLock` and calls the `&mut self` operations under the write lock.

use crate::mutation::{ChangeSet, MutationEngine, NodeIndex};
use crate::primitives::{ID_PREFIX, UNBOUNDED_DEPTH, VERSION_PREFIX};
use crate::{
    CanopyError, Chunk, ClassifierInstance, HasContainments, RepositoryConfiguration,
    RepositoryVersionToken,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// =============================================================================
// RETRIEVAL
// =============================================================================

/// How `retrieve` treats root IDs absent from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum UnknownPolicy {
    /// Fail with `CanopyError::UnknownNodes` listing every unknown root.
    #[default]
    FailFast,
    /// Return the known part and list the unknown roots alongside.
    Report,
}

/// Result of a retrieve call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retrieved {
    /// Reachable instances, deduplicated, in visit order.
    pub chunk: Chunk,
    /// Requested roots absent from the index (empty under `FailFast`).
    pub unknown: Vec<String>,
}

// =============================================================================
// REPOSITORY DATA
// =============================================================================

/// The state of one named repository.
#[derive(Debug, Clone)]
pub struct RepositoryData {
    configuration: RepositoryConfiguration,
    partitions: BTreeSet<String>,
    nodes: NodeIndex,
    version: u64,
    next_id: u64,
}

impl RepositoryData {
    /// Create an empty repository.
    #[must_use]
    pub fn new(configuration: RepositoryConfiguration) -> Self {
        Self {
            configuration,
            partitions: BTreeSet::new(),
            nodes: NodeIndex::new(),
            version: 0,
            next_id: 1,
        }
    }

    /// Rebuild a repository from stored parts.
    ///
    /// Used by the persistent store and snapshot import. The parts are
    /// taken as they are; run the consistency checker to audit them.
    #[must_use]
    pub fn from_parts(
        configuration: RepositoryConfiguration,
        partitions: BTreeSet<String>,
        nodes: NodeIndex,
        version: u64,
        next_id: u64,
    ) -> Self {
        Self {
            configuration,
            partitions,
            nodes,
            version,
            next_id: next_id.max(1),
        }
    }

    #[must_use]
    pub fn configuration(&self) -> &RepositoryConfiguration {
        &self.configuration
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.configuration.name
    }

    /// Registered partition roots, sorted.
    #[must_use]
    pub fn partitions(&self) -> &BTreeSet<String> {
        &self.partitions
    }

    /// The node index.
    #[must_use]
    pub fn nodes(&self) -> &NodeIndex {
        &self.nodes
    }

    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ClassifierInstance> {
        self.nodes.get(id)
    }

    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.nodes.contains_key(id)
    }

    #[must_use]
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of successful mutations so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Next candidate for ID allocation.
    #[must_use]
    pub fn next_id(&self) -> u64 {
        self.next_id
    }

    /// The current version as a token.
    #[must_use]
    pub fn version_token(&self) -> RepositoryVersionToken {
        RepositoryVersionToken(format!("{}{}", VERSION_PREFIX, self.version))
    }

    /// Advance the version counter and return the new token.
    pub fn bump_version(&mut self) -> RepositoryVersionToken {
        self.version = self.version.saturating_add(1);
        self.version_token()
    }

    /// Registered partition roots as a list.
    #[must_use]
    pub fn list_partition_ids(&self) -> Vec<String> {
        self.partitions.iter().cloned().collect()
    }

    // =========================================================================
    // MUTATION
    // =========================================================================

    /// Insert or wholesale-replace `instances`, then sweep unreachable nodes.
    ///
    /// Fails without mutating if any child or annotation dangles, any ID is
    /// malformed or repeated, or a parentless instance is not a registered
    /// partition.
    pub fn store(&mut self, instances: Vec<ClassifierInstance>) -> Result<ChangeSet, CanopyError> {
        MutationEngine::validate_store(
            &self.nodes,
            &self.partitions,
            &instances,
            &BTreeSet::new(),
        )?;

        let mut changes = ChangeSet::new();
        MutationEngine::apply_store(&mut self.nodes, instances, &mut changes);
        MutationEngine::finish(&mut self.nodes, &self.partitions, &mut changes);
        Ok(changes)
    }

    /// Register every parentless instance not yet registered, then store.
    ///
    /// Already-registered roots are not re-registered; their instances are
    /// stored like any other. A chunk without a parentless instance is rejected.
    pub fn create_partitions_from_chunk(
        &mut self,
        instances: Vec<ClassifierInstance>,
    ) -> Result<ChangeSet, CanopyError> {
        let roots: Vec<&ClassifierInstance> = instances.iter().filter(|i| i.is_root()).collect();
        if roots.is_empty() {
            return Err(CanopyError::InvalidRequest(
                "Chunk contains no partition root".to_string(),
            ));
        }

        let pending: BTreeSet<String> = roots
            .iter()
            .filter(|r| !self.partitions.contains(&r.id))
            .map(|r| r.id.clone())
            .collect();

        MutationEngine::validate_store(&self.nodes, &self.partitions, &instances, &pending)?;

        let mut changes = ChangeSet::new();
        self.partitions.extend(pending.iter().cloned());
        changes.partitions_added = pending;
        MutationEngine::apply_store(&mut self.nodes, instances, &mut changes);
        MutationEngine::finish(&mut self.nodes, &self.partitions, &mut changes);
        Ok(changes)
    }

    /// Unregister partitions and cascade deletion through their subtrees.
    ///
    /// Every ID must be a registered partition; otherwise nothing changes.
    pub fn delete_partitions(&mut self, ids: &[String]) -> Result<ChangeSet, CanopyError> {
        if let Some(missing) = ids.iter().find(|id| !self.partitions.contains(*id)) {
            return Err(CanopyError::PartitionNotFound(missing.clone()));
        }

        let mut changes = ChangeSet::new();
        for id in ids {
            if self.partitions.remove(id) {
                changes.partitions_removed.insert(id.clone());
            }
        }
        MutationEngine::finish(&mut self.nodes, &self.partitions, &mut changes);
        Ok(changes)
    }

    /// Allocate `count` fresh IDs ("id-N"), skipping IDs already indexed.
    ///
    /// The counter is monotonic: IDs are never handed out twice, even if
    /// the caller never stores them.
    pub fn ids(&mut self, count: usize) -> Vec<String> {
        let mut allocated = Vec::with_capacity(count);
        while allocated.len() < count {
            let candidate = format!("{}{}", ID_PREFIX, self.next_id);
            self.next_id = self.next_id.saturating_add(1);
            if !self.nodes.contains_key(&candidate) {
                allocated.push(candidate);
            }
        }
        allocated
    }

    /// Restore the pre-call state of a mutation described by `changes`.
    ///
    /// Touches only the nodes and partitions the mutation touched.
    pub(crate) fn revert(&mut self, changes: &ChangeSet, version: u64) {
        for id in &changes.created {
            self.nodes.remove(id);
        }
        for (id, node) in &changes.pre_images {
            self.nodes.insert(id.clone(), node.clone());
        }
        for id in &changes.partitions_added {
            self.partitions.remove(id);
        }
        self.partitions.extend(changes.partitions_removed.iter().cloned());
        self.version = version;
    }

    /// Undo an allocation whose counter could not be persisted.
    pub(crate) fn rewind_next_id(&mut self, next_id: u64) {
        self.next_id = next_id;
    }

    // =========================================================================
    // RETRIEVAL
    // =========================================================================

    /// Collect the subtrees under `ids`, bounded by `depth_limit` containment hops.
    ///
    /// - `depth_limit = 0` returns only the requested nodes (plus their annotations)
    /// - `UNBOUNDED_DEPTH` follows containment to the leaves
    /// - annotations of every visited node are always included and do not
    ///   consume depth budget
    ///
    /// The result is deduplicated across roots and keeps visit order.
    pub fn retrieve(
        &self,
        ids: &[String],
        depth_limit: usize,
        policy: UnknownPolicy,
    ) -> Result<Retrieved, CanopyError> {
        let unknown: Vec<String> = ids
            .iter()
            .filter(|id| !self.nodes.contains_key(*id))
            .cloned()
            .collect();
        if !unknown.is_empty() && policy == UnknownPolicy::FailFast {
            return Err(CanopyError::UnknownNodes(unknown));
        }

        // Best remaining budget seen per node. A node is revisited only when
        // reached with strictly more budget, which bounds the walk on cycles.
        let mut budgets: BTreeMap<&str, usize> = BTreeMap::new();
        let mut emitted: BTreeSet<&str> = BTreeSet::new();
        let mut collected = Vec::new();
        let mut queue: VecDeque<(&str, usize)> = VecDeque::new();

        for id in ids {
            if self.nodes.contains_key(id) {
                queue.push_back((id.as_str(), depth_limit));
            }
        }

        while let Some((current, budget)) = queue.pop_front() {
            if budgets.get(current).is_some_and(|seen| *seen >= budget) {
                continue;
            }
            budgets.insert(current, budget);

            let Some(node) = self.nodes.get(current) else {
                continue;
            };
            if emitted.insert(current) {
                collected.push(node.clone());
            }

            for annotation in &node.annotations {
                queue.push_back((annotation.as_str(), budget));
            }
            if budget > 0 {
                let next = if budget == UNBOUNDED_DEPTH {
                    UNBOUNDED_DEPTH
                } else {
                    budget - 1
                };
                for child in node.child_ids() {
                    queue.push_back((child.as_str(), next));
                }
            }
        }

        Ok(Retrieved {
            chunk: Chunk::from_instances(self.configuration.format_version, collected),
            unknown,
        })
    }

    /// Every reachable node of every partition, as one chunk.
    #[must_use]
    pub fn retrieve_all(&self) -> Chunk {
        let roots = self.list_partition_ids();
        let instances = self
            .retrieve(&roots, UNBOUNDED_DEPTH, UnknownPolicy::Report)
            .map(|r| r.chunk.instances)
            .unwrap_or_default();
        Chunk::from_instances(self.configuration.format_version, instances)
    }

    /// Export the full state for snapshotting.
    #[must_use]
    pub fn to_snapshot(&self) -> RepositorySnapshot {
        RepositorySnapshot {
            configuration: self.configuration.clone(),
            partitions: self.list_partition_ids(),
            nodes: self.nodes.values().cloned().collect(),
            version: self.version,
            next_id: self.next_id,
        }
    }
}

impl From<RepositorySnapshot> for RepositoryData {
    fn from(snapshot: RepositorySnapshot) -> Self {
        let nodes = snapshot
            .nodes
            .into_iter()
            .map(|n| (n.id.clone(), n))
            .collect();
        Self::from_parts(
            snapshot.configuration,
            snapshot.partitions.into_iter().collect(),
            nodes,
            snapshot.version,
            snapshot.next_id,
        )
    }
}

/// Serializable form of a repository, used by the snapshot format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositorySnapshot {
    pub configuration: RepositoryConfiguration,
    pub partitions: Vec<String>,
    pub nodes: Vec<ClassifierInstance>,
    pub version: u64,
    pub next_id: u64,
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MetaPointer;

    fn children() -> MetaPointer {
        MetaPointer::new("t", "1", "children")
    }

    fn node(id: &str, parent: Option<&str>, kids: &[&str]) -> ClassifierInstance {
        let mut n = ClassifierInstance::new(id, MetaPointer::new("t", "1", "Node"));
        n.parent = parent.map(String::from);
        for kid in kids {
            n.add_child(children(), *kid);
        }
        n
    }

    fn ids(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn tree() -> RepositoryData {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new("r"));
        repo.create_partitions_from_chunk(vec![
            node("n1", None, &["n2"]),
            node("n2", Some("n1"), &["n3", "n4"]),
            node("n3", Some("n2"), &[]),
            node("n4", Some("n2"), &[]),
        ])
        .expect("create");
        repo
    }

    #[test]
    fn create_registers_root_and_stores_tree() {
        let repo = tree();
        assert_eq!(repo.list_partition_ids(), ids(&["n1"]));
        assert_eq!(repo.node_count(), 4);
    }

    #[test]
    fn create_without_root_rejected() {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new("r"));
        let result = repo.create_partitions_from_chunk(vec![node("x", Some("y"), &[])]);
        assert!(matches!(result, Err(CanopyError::InvalidRequest(_))));
    }

    #[test]
    fn failed_create_registers_nothing() {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new("r"));
        let result = repo.create_partitions_from_chunk(vec![node("p", None, &["ghost"])]);
        assert!(matches!(
            result,
            Err(CanopyError::DanglingContainment { .. })
        ));
        assert!(repo.partitions().is_empty());
        assert_eq!(repo.node_count(), 0);
    }

    #[test]
    fn store_failure_leaves_index_untouched() {
        let mut repo = tree();
        let before = repo.nodes().clone();
        let result = repo.store(vec![node("n1", None, &["n2", "ghost"])]);
        assert!(result.is_err());
        assert_eq!(repo.nodes(), &before);
    }

    #[test]
    fn retrieve_depth_zero_returns_roots_only() {
        let repo = tree();
        let result = repo
            .retrieve(&ids(&["n1"]), 0, UnknownPolicy::FailFast)
            .expect("retrieve");
        assert_eq!(result.chunk.ids().collect::<Vec<_>>(), vec!["n1"]);
    }

    #[test]
    fn retrieve_depth_one_includes_children() {
        let repo = tree();
        let result = repo
            .retrieve(&ids(&["n1"]), 1, UnknownPolicy::FailFast)
            .expect("retrieve");
        assert_eq!(result.chunk.ids().collect::<Vec<_>>(), vec!["n1", "n2"]);
    }

    #[test]
    fn retrieve_dedups_overlapping_roots() {
        let repo = tree();
        let result = repo
            .retrieve(&ids(&["n2", "n1"]), UNBOUNDED_DEPTH, UnknownPolicy::FailFast)
            .expect("retrieve");
        assert_eq!(result.chunk.len(), 4);
    }

    #[test]
    fn retrieve_revisits_node_reached_with_more_budget() {
        let repo = tree();
        // n2 is first reached as a child of n1 with budget 0, then as a root with budget 1.
        let result = repo
            .retrieve(&ids(&["n1", "n2"]), 1, UnknownPolicy::FailFast)
            .expect("retrieve");
        let mut got: Vec<_> = result.chunk.ids().collect();
        got.sort_unstable();
        assert_eq!(got, vec!["n1", "n2", "n3", "n4"]);
    }

    #[test]
    fn retrieve_unknown_policies() {
        let repo = tree();
        let fail = repo.retrieve(&ids(&["n1", "nope"]), 0, UnknownPolicy::FailFast);
        assert!(matches!(fail, Err(CanopyError::UnknownNodes(u)) if u == ids(&["nope"])));

        let report = repo
            .retrieve(&ids(&["n1", "nope"]), 0, UnknownPolicy::Report)
            .expect("report");
        assert_eq!(report.unknown, ids(&["nope"]));
        assert_eq!(report.chunk.len(), 1);
    }

    #[test]
    fn ids_skip_existing_and_never_repeat() {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new("r"));
        repo.create_partitions_from_chunk(vec![node("id-2", None, &[])])
            .expect("create");

        assert_eq!(repo.ids(2), ids(&["id-1", "id-3"]));
        assert_eq!(repo.ids(1), ids(&["id-4"]));
        assert!(repo.ids(0).is_empty());
        assert_eq!(repo.next_id(), 5);
    }

    #[test]
    fn delete_unknown_partition_changes_nothing() {
        let mut repo = tree();
        let result = repo.delete_partitions(&ids(&["n1", "zzz"]));
        assert!(matches!(result, Err(CanopyError::PartitionNotFound(id)) if id == "zzz"));
        assert_eq!(repo.node_count(), 4);
        assert_eq!(repo.list_partition_ids(), ids(&["n1"]));
    }

    #[test]
    fn version_tokens_increase() {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new("r"));
        assert_eq!(repo.bump_version().as_str(), "v-1");
        assert_eq!(repo.bump_version().as_str(), "v-2");
    }

    #[test]
    fn revert_restores_touched_state() {
        let mut repo = tree();
        let nodes_before = repo.nodes().clone();
        let partitions_before = repo.partitions().clone();
        let version_before = repo.version();

        let changes = repo
            .create_partitions_from_chunk(vec![
                node("n1", None, &["n3", "fresh"]),
                node("n3", Some("n1"), &[]),
                node("fresh", Some("n1"), &[]),
                node("q", None, &[]),
            ])
            .expect("create");
        assert!(!repo.contains("n2"));
        assert!(repo.partitions().contains("q"));
        repo.bump_version();
        repo.revert(&changes, version_before);

        assert_eq!(repo.nodes(), &nodes_before);
        assert_eq!(repo.partitions(), &partitions_before);
        assert_eq!(repo.version(), version_before);

        let changes = repo.delete_partitions(&ids(&["n1"])).expect("delete");
        assert_eq!(repo.node_count(), 0);
        repo.revert(&changes, version_before);
        assert_eq!(repo.nodes(), &nodes_before);
        assert_eq!(repo.partitions(), &partitions_before);
    }

    #[test]
    fn snapshot_roundtrip_preserves_state() {
        let mut repo = tree();
        repo.bump_version();
        let restored = RepositoryData::from(repo.to_snapshot());
        assert_eq!(restored.nodes(), repo.nodes());
        assert_eq!(restored.partitions(), repo.partitions());
        assert_eq!(restored.version(), 1);
    }
}
