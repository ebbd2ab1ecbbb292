//! # Mutation Engine
//!
//! Consolidates index mutation for the Canopy engine.
//!
//! Every mutating repository operation runs in two phases:
//!
//! 1. **Validate**: every check that can fail runs against the untouched
//!    index. A failure returns an error and nothing has changed.
//! 2. **Apply**: upserts, detaching moved nodes from old parents, and the
//!    reachability sweep. Nothing in this phase can fail.
//!
//! The sweep is the only way nodes leave the index. It walks containment and
//! annotation edges from the partition roots using post-update edge lists,
//! so a node moved within the same call is never collected.

use crate::ingestor::Ingestor;
use crate::{CanopyError, ClassifierInstance, HasContainments};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

/// Node index type shared by the engine: ID -> instance.
pub type NodeIndex = BTreeMap<String, ClassifierInstance>;

// =============================================================================
// CHANGE SET
// =============================================================================

/// What a mutation did to a repository.
///
/// Consumed by the persistent store (to write exactly the touched rows), by
/// the observer registry (to emit notifications) and by the server to roll
/// back a mutation whose write failed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangeSet {
    /// IDs whose stored instance was inserted or replaced.
    pub upserted: BTreeSet<String>,
    /// IDs removed from the index. Only nodes indexed before the call.
    pub deleted: BTreeSet<String>,
    /// Partition roots registered by this mutation.
    pub partitions_added: BTreeSet<String>,
    /// Partition roots unregistered by this mutation.
    pub partitions_removed: BTreeSet<String>,
    /// IDs absent from the index before the call.
    pub(crate) created: BTreeSet<String>,
    /// Pre-call instance of every previously indexed node the call touched.
    pub(crate) pre_images: BTreeMap<String, ClassifierInstance>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `true` if the mutation changed nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.upserted.is_empty()
            && self.deleted.is_empty()
            && self.partitions_added.is_empty()
            && self.partitions_removed.is_empty()
    }
}

// =============================================================================
// MUTATION ENGINE
// =============================================================================

/// The MutationEngine holds the validate and apply phases of every write.
pub struct MutationEngine;

impl MutationEngine {
    /// Validate a store call against the current index.
    ///
    /// Checks, in order:
    /// - stateless instance checks and duplicate IDs (see `Ingestor`)
    /// - every child and annotation resolves to the call or the index
    /// - every parentless instance is a registered partition, or one of
    ///   `pending_partitions` registered by the same call
    pub fn validate_store(
        index: &NodeIndex,
        partitions: &BTreeSet<String>,
        instances: &[ClassifierInstance],
        pending_partitions: &BTreeSet<String>,
    ) -> Result<(), CanopyError> {
        Ingestor::validate_batch(instances)?;

        let submitted: BTreeSet<&str> = instances.iter().map(|i| i.id.as_str()).collect();

        for instance in instances {
            for owned in instance.owned_ids() {
                if !submitted.contains(owned.as_str()) && !index.contains_key(owned) {
                    return Err(CanopyError::DanglingContainment {
                        node: instance.id.clone(),
                        missing: owned.clone(),
                    });
                }
            }

            if instance.is_root()
                && !partitions.contains(&instance.id)
                && !pending_partitions.contains(&instance.id)
            {
                return Err(CanopyError::UnregisteredPartition(instance.id.clone()));
            }
        }

        Ok(())
    }

    /// Apply a validated store call.
    ///
    /// A resubmitted node whose parent changed, and whose old parent is not
    /// itself resubmitted, is removed from the old parent's containments and
    /// annotations. Then every instance replaces its stored version wholesale.
    pub fn apply_store(
        index: &mut NodeIndex,
        instances: Vec<ClassifierInstance>,
        changes: &mut ChangeSet,
    ) {
        let submitted: BTreeSet<String> = instances.iter().map(|i| i.id.clone()).collect();

        for instance in &instances {
            let Some(old_parent) = index.get(&instance.id).and_then(|n| n.parent.clone()) else {
                continue;
            };
            if submitted.contains(&old_parent) || instance.parent.as_ref() == Some(&old_parent) {
                continue;
            }
            let Some(parent) = index.get_mut(&old_parent) else {
                continue;
            };
            if !parent.contains(&instance.id) {
                continue;
            }
            changes
                .pre_images
                .entry(old_parent.clone())
                .or_insert_with(|| parent.clone());
            parent.remove_contained(&instance.id);
            tracing::trace!(node = %instance.id, from = %old_parent, "detached moved node");
            changes.upserted.insert(old_parent);
        }

        for instance in instances {
            let id = instance.id.clone();
            match index.insert(id.clone(), instance) {
                Some(previous) => {
                    changes.pre_images.entry(id.clone()).or_insert(previous);
                }
                None => {
                    changes.created.insert(id.clone());
                }
            }
            changes.upserted.insert(id);
        }
    }

    /// Remove every node not reachable from `partitions`.
    ///
    /// Traverses containment and annotation edges breadth-first with a
    /// visited set, so malformed cycles terminate. Returns the deleted IDs.
    pub fn sweep(index: &mut NodeIndex, partitions: &BTreeSet<String>) -> BTreeSet<String> {
        Self::collect(index, partitions).into_keys().collect()
    }

    /// Like `sweep`, but hands back the removed instances.
    fn collect(index: &mut NodeIndex, partitions: &BTreeSet<String>) -> NodeIndex {
        let unreachable: Vec<String> = {
            let reachable = Self::reachable(index, partitions);
            index
                .keys()
                .filter(|id| !reachable.contains(id.as_str()))
                .cloned()
                .collect()
        };

        let removed: NodeIndex = unreachable
            .into_iter()
            .filter_map(|id| index.remove(&id).map(|node| (id, node)))
            .collect();

        if !removed.is_empty() {
            tracing::debug!(count = removed.len(), "reachability sweep removed nodes");
        }
        removed
    }

    /// IDs reachable from `partitions` over containment and annotation edges.
    #[must_use]
    pub fn reachable<'a>(
        index: &'a NodeIndex,
        partitions: &'a BTreeSet<String>,
    ) -> BTreeSet<&'a str> {
        let mut visited: BTreeSet<&str> = BTreeSet::new();
        let mut queue: VecDeque<&str> = partitions
            .iter()
            .filter(|p| index.contains_key(*p))
            .map(String::as_str)
            .collect();

        while let Some(current) = queue.pop_front() {
            if !visited.insert(current) {
                continue;
            }
            let Some(node) = index.get(current) else {
                continue;
            };
            for owned in node.child_ids().chain(node.annotations.iter()) {
                if index.contains_key(owned) && !visited.contains(owned.as_str()) {
                    queue.push_back(owned.as_str());
                }
            }
        }

        visited
    }

    /// Finish a write: sweep, then reconcile the change set.
    ///
    /// Swept nodes leave the upsert set. A node created by this call and
    /// swept by it never existed as far as callers can tell, so it is not
    /// reported as deleted.
    pub fn finish(index: &mut NodeIndex, partitions: &BTreeSet<String>, changes: &mut ChangeSet) {
        for (id, node) in Self::collect(index, partitions) {
            changes.upserted.remove(&id);
            if changes.created.remove(&id) {
                tracing::trace!(node = %id, "dropped unattached new node");
                continue;
            }
            changes.pre_images.entry(id.clone()).or_insert(node);
            changes.deleted.insert(id);
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
