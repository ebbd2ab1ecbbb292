//! # Consistency Checker
//!
//! Audits a repository against the at-rest invariants and reports issues.
//! The checker never fails and never mutates: findings come back as
//! `Issue` values with a severity, a kind and the offending node.
//!
//! Every check walks the index with explicit visited sets, so corrupted
//! data (cycles, shared children) cannot make it loop.

use crate::mutation::MutationEngine;
use crate::primitives::is_valid_id;
use crate::repository::RepositoryData;
use crate::{HasContainments, MetaPointer};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

// =============================================================================
// ISSUES
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Warning,
    Error,
}

/// What kind of invariant an issue violates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    InvalidId,
    DanglingChild,
    ParentMismatch,
    SharedOwnership,
    ParentDoesNotContain,
    MissingParent,
    CyclicHierarchy,
    AnnotationMismatch,
    PartitionHasParent,
    MissingPartitionRoot,
    NotPartitionCapable,
    Unreachable,
}

/// One finding of the checker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub severity: Severity,
    pub kind: IssueKind,
    pub message: String,
    /// ID of the offending node.
    pub subject: String,
}

impl Issue {
    #[must_use]
    pub fn error(kind: IssueKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Error,
            kind,
            message: message.into(),
            subject: subject.into(),
        }
    }

    #[must_use]
    pub fn warning(kind: IssueKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Severity::Warning,
            kind,
            message: message.into(),
            subject: subject.into(),
        }
    }
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{:?}] {}: {}", self.severity, self.subject, self.message)
    }
}

/// All issues found for one repository.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub issues: Vec<Issue>,
}

impl ValidationResult {
    /// `true` when no issue of severity `Error` was found.
    #[must_use]
    pub fn is_successful(&self) -> bool {
        !self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    #[must_use]
    pub fn has_kind(&self, kind: IssueKind) -> bool {
        self.issues.iter().any(|i| i.kind == kind)
    }

    #[must_use]
    pub fn count(&self, severity: Severity) -> usize {
        self.issues.iter().filter(|i| i.severity == severity).count()
    }

    fn push(&mut self, issue: Issue) {
        self.issues.push(issue);
    }
}

// =============================================================================
// CLASSIFIER CATALOG
// =============================================================================

/// Source of knowledge about classifiers.
pub trait ClassifierCatalog: Send + Sync {
    /// `Some(flag)` for known classifiers, `None` when the classifier is unknown.
    fn is_partition_capable(&self, classifier: &MetaPointer) -> Option<bool>;
}

// =============================================================================
// CHECKER
// =============================================================================

pub struct ConsistencyChecker<'a> {
    catalog: &'a dyn ClassifierCatalog,
}

impl<'a> ConsistencyChecker<'a> {
    #[must_use]
    pub fn new(catalog: &'a dyn ClassifierCatalog) -> Self {
        Self { catalog }
    }

    /// Run every check against `repository`.
    #[must_use]
    pub fn check(&self, repository: &RepositoryData) -> ValidationResult {
        let mut result = ValidationResult::default();

        self.check_ids(repository, &mut result);
        self.check_ownership(repository, &mut result);
        self.check_parents(repository, &mut result);
        self.check_cycles(repository, &mut result);
        self.check_partitions(repository, &mut result);
        self.check_reachability(repository, &mut result);

        if !result.issues.is_empty() {
            tracing::warn!(
                repository = repository.name(),
                issues = result.issues.len(),
                "consistency check found issues"
            );
        }
        result
    }

    fn check_ids(&self, repository: &RepositoryData, result: &mut ValidationResult) {
        for id in repository.nodes().keys() {
            if !is_valid_id(id) {
                result.push(Issue::error(
                    IssueKind::InvalidId,
                    id,
                    format!("Node id {:?} does not satisfy the id grammar", id),
                ));
            }
        }
    }

    /// Children and annotations resolve, agree on parent, and have one owner.
    fn check_ownership(&self, repository: &RepositoryData, result: &mut ValidationResult) {
        let nodes = repository.nodes();
        let mut owners: BTreeMap<&str, Vec<&str>> = BTreeMap::new();

        for (id, node) in nodes {
            for child in node.child_ids() {
                owners.entry(child.as_str()).or_default().push(id.as_str());
                match nodes.get(child) {
                    None => result.push(Issue::error(
                        IssueKind::DanglingChild,
                        id,
                        format!("Child {} is not in the index", child),
                    )),
                    Some(c) if c.parent.as_deref() != Some(id.as_str()) => {
                        result.push(Issue::error(
                            IssueKind::ParentMismatch,
                            child,
                            format!(
                                "Listed as child of {} but records parent {:?}",
                                id, c.parent
                            ),
                        ));
                    }
                    Some(_) => {}
                }
            }

            for annotation in &node.annotations {
                owners.entry(annotation.as_str()).or_default().push(id.as_str());
                let Some(a) = nodes.get(annotation) else {
                    result.push(Issue::error(
                        IssueKind::DanglingChild,
                        id,
                        format!("Annotation {} is not in the index", annotation),
                    ));
                    continue;
                };
                if a.parent.as_deref() != Some(id.as_str()) {
                    result.push(Issue::error(
                        IssueKind::ParentMismatch,
                        annotation,
                        format!(
                            "Listed as annotation of {} but records parent {:?}",
                            id, a.parent
                        ),
                    ));
                }
                if let Some(host) = &a.annotated
                    && host != id
                {
                    result.push(Issue::error(
                        IssueKind::AnnotationMismatch,
                        annotation,
                        format!("Annotates {} but is listed by {}", host, id),
                    ));
                }
            }
        }

        for (child, holders) in owners {
            if holders.len() > 1 {
                result.push(Issue::error(
                    IssueKind::SharedOwnership,
                    child,
                    format!("Held by {} slots: {}", holders.len(), holders.join(", ")),
                ));
            }
        }
    }

    /// Each recorded parent exists and lists the node.
    fn check_parents(&self, repository: &RepositoryData, result: &mut ValidationResult) {
        let nodes = repository.nodes();
        for (id, node) in nodes {
            let Some(parent_id) = &node.parent else {
                continue;
            };
            match nodes.get(parent_id) {
                None => result.push(Issue::error(
                    IssueKind::MissingParent,
                    id,
                    format!("Parent {} is not in the index", parent_id),
                )),
                Some(parent) if !parent.contains(id) => result.push(Issue::error(
                    IssueKind::ParentDoesNotContain,
                    id,
                    format!("Parent {} does not list this node", parent_id),
                )),
                Some(_) => {}
            }
        }
    }

    /// A node whose parent chain leads back to itself is a cycle member.
    fn check_cycles(&self, repository: &RepositoryData, result: &mut ValidationResult) {
        let nodes = repository.nodes();
        for (id, node) in nodes {
            let mut visited: BTreeSet<&str> = BTreeSet::new();
            let mut current = node.parent.as_deref();
            while let Some(ancestor) = current {
                if ancestor == id.as_str() {
                    result.push(Issue::error(
                        IssueKind::CyclicHierarchy,
                        id,
                        "Parent chain returns to this node",
                    ));
                    break;
                }
                if !visited.insert(ancestor) {
                    break;
                }
                current = nodes.get(ancestor).and_then(|n| n.parent.as_deref());
            }
        }
    }

    fn check_partitions(&self, repository: &RepositoryData, result: &mut ValidationResult) {
        for id in repository.partitions() {
            let Some(root) = repository.get(id) else {
                result.push(Issue::error(
                    IssueKind::MissingPartitionRoot,
                    id,
                    "Registered partition is not in the index",
                ));
                continue;
            };
            if let Some(parent) = &root.parent {
                result.push(Issue::error(
                    IssueKind::PartitionHasParent,
                    id,
                    format!("Partition root has parent {}", parent),
                ));
            }
            if self.catalog.is_partition_capable(&root.classifier) == Some(false) {
                result.push(Issue::error(
                    IssueKind::NotPartitionCapable,
                    id,
                    format!("Classifier {} cannot be a partition", root.classifier),
                ));
            }
        }
    }

    fn check_reachability(&self, repository: &RepositoryData, result: &mut ValidationResult) {
        let reachable = MutationEngine::reachable(repository.nodes(), repository.partitions());
        for id in repository.nodes().keys() {
            if !reachable.contains(id.as_str()) {
                result.push(Issue::warning(
                    IssueKind::Unreachable,
                    id,
                    "Not reachable from any partition root",
                ));
            }
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
