//! # Inspection
//!
//! Read-only queries over a repository's index: nodes grouped by classifier
//! or by language, partition summaries, and structural metrics.
//!
//! All results are computed under the repository's shared lock and are
//! deterministic (sorted keys, sorted ID lists).

use crate::mutation::MutationEngine;
use crate::repository::RepositoryData;
use crate::{HasContainments, HasReferences, InstanceView, NamedView};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet, VecDeque};

// =============================================================================
// GROUPED QUERIES
// =============================================================================

/// A classifier identified by (language key, classifier key), version-agnostic.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ClassifierKey {
    pub language: String,
    pub key: String,
}

/// IDs of matching nodes (up to the limit) and the full match count.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassifierResult {
    pub ids: Vec<String>,
    pub size: usize,
}

impl ClassifierResult {
    fn record(&mut self, id: &str, limit: usize) {
        self.size += 1;
        if self.ids.len() < limit {
            self.ids.push(id.to_string());
        }
    }
}

/// Nodes grouped by classifier.
///
/// `limit` caps each group's `ids`; `size` always counts every node.
/// Nodes with an incomplete classifier pointer are grouped under empty strings.
#[must_use]
pub fn nodes_by_classifier(
    repository: &RepositoryData,
    limit: usize,
) -> BTreeMap<ClassifierKey, ClassifierResult> {
    let mut result: BTreeMap<ClassifierKey, ClassifierResult> = BTreeMap::new();
    for (id, node) in repository.nodes() {
        let key = ClassifierKey {
            language: node.classifier.language.clone().unwrap_or_default(),
            key: node.classifier.key.clone().unwrap_or_default(),
        };
        result.entry(key).or_default().record(id, limit);
    }
    result
}

/// Nodes grouped by the language key of their classifier.
#[must_use]
pub fn nodes_by_language(
    repository: &RepositoryData,
    limit: usize,
) -> BTreeMap<String, ClassifierResult> {
    let mut result: BTreeMap<String, ClassifierResult> = BTreeMap::new();
    for (id, node) in repository.nodes() {
        let language = node.classifier.language.clone().unwrap_or_default();
        result.entry(language).or_default().record(id, limit);
    }
    result
}

// =============================================================================
// PARTITION SUMMARIES
// =============================================================================

/// One registered partition, as listed by inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionSummary {
    pub id: String,
    pub classifier: String,
    /// `INamed.name` of the root, when it has one.
    pub name: Option<String>,
    /// Nodes in the partition, root included.
    pub size: usize,
}

/// Summaries of every registered partition, sorted by ID.
#[must_use]
pub fn partition_summaries(repository: &RepositoryData) -> Vec<PartitionSummary> {
    repository
        .partitions()
        .iter()
        .filter_map(|id| {
            let root = repository.get(id)?;
            let single = BTreeSet::from([id.clone()]);
            let size = MutationEngine::reachable(repository.nodes(), &single).len();
            Some(PartitionSummary {
                id: id.clone(),
                classifier: root.classifier.to_string(),
                name: NamedView::view(root).map(|v| v.name().to_string()),
                size,
            })
        })
        .collect()
}

// =============================================================================
// METRICS
// =============================================================================

/// Structural metrics of a repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryMetrics {
    pub node_count: usize,
    pub partition_count: usize,
    pub annotation_count: usize,
    /// Reference entries with a target ID.
    pub reference_count: usize,
    /// Targeted reference entries whose target is not in the index.
    pub dangling_reference_count: usize,
    /// Longest containment path from a partition root (a lone root has depth 0).
    pub max_depth: usize,
    pub version: u64,
}

/// Compute metrics for a repository.
#[must_use]
pub fn metrics(repository: &RepositoryData) -> RepositoryMetrics {
    let nodes = repository.nodes();
    let mut metrics = RepositoryMetrics {
        node_count: nodes.len(),
        partition_count: repository.partitions().len(),
        version: repository.version(),
        ..RepositoryMetrics::default()
    };

    for node in nodes.values() {
        metrics.annotation_count += node.annotations.len();
        for target in node.reference_targets() {
            metrics.reference_count += 1;
            if !nodes.contains_key(target) {
                metrics.dangling_reference_count += 1;
            }
        }
    }

    metrics.max_depth = max_depth(repository);
    metrics
}

fn max_depth(repository: &RepositoryData) -> usize {
    let nodes = repository.nodes();
    let mut visited: BTreeSet<&str> = BTreeSet::new();
    let mut queue: VecDeque<(&str, usize)> = repository
        .partitions()
        .iter()
        .map(|p| (p.as_str(), 0))
        .collect();
    let mut deepest = 0;

    while let Some((current, depth)) = queue.pop_front() {
        if !visited.insert(current) {
            continue;
        }
        let Some(node) = nodes.get(current) else {
            continue;
        };
        deepest = deepest.max(depth);
        for child in node.child_ids() {
            queue.push_back((child.as_str(), depth + 1));
        }
    }
    deepest
}
