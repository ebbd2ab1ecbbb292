//! # Core Type Definitions
//!
//! This module contains all core types for the Canopy repository engine:
//! - Meta-level identifiers (`MetaPointer`, `LanguageVersion`)
//! - The chunk data model (`PropertyValue`, `ContainmentValue`, `ReferenceValue`,
//!   `ClassifierInstance`, `Chunk`)
//! - Capability traits over instances (`HasProperties`, `HasContainments`, `HasReferences`)
//! - Repository descriptors (`RepositoryConfiguration`, `RepositoryVersionToken`)
//! - Error types (`CanopyError`)
//!
//! ## Determinism Guarantees
//!
//! All types in this module:
//! - Implement `Ord` where they take part in canonical ordering
//! - Sort absent (`None`) components after present ones
//! - Carry no interior mutability

mod view;

pub use view::{INAMED_NAME_KEY, InstanceView, NamedView};

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;

/// Compare two optional strings, sorting `None` after every `Some`.
fn cmp_nulls_last(a: &Option<String>, b: &Option<String>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

// =============================================================================
// META POINTER
// =============================================================================

/// Identifies a classifier or a feature by (language key, version, key).
///
/// Equality is structural on all three fields. Ordering is by
/// (language, version, key) with absent components sorted last.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct MetaPointer {
    pub language: Option<String>,
    pub version: Option<String>,
    pub key: Option<String>,
}

impl MetaPointer {
    /// Create a fully specified meta pointer.
    #[must_use]
    pub fn new(
        language: impl Into<String>,
        version: impl Into<String>,
        key: impl Into<String>,
    ) -> Self {
        Self {
            language: Some(language.into()),
            version: Some(version.into()),
            key: Some(key.into()),
        }
    }

    /// The (language, version) pair this pointer belongs to, if both are known.
    #[must_use]
    pub fn language_version(&self) -> Option<LanguageVersion> {
        match (&self.language, &self.version) {
            (Some(key), Some(version)) => Some(LanguageVersion::new(key, version)),
            _ => None,
        }
    }
}

impl Ord for MetaPointer {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_nulls_last(&self.language, &other.language)
            .then_with(|| cmp_nulls_last(&self.version, &other.version))
            .then_with(|| cmp_nulls_last(&self.key, &other.key))
    }
}

impl PartialOrd for MetaPointer {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for MetaPointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@{}:{}",
            self.language.as_deref().unwrap_or("?"),
            self.version.as_deref().unwrap_or("?"),
            self.key.as_deref().unwrap_or("?")
        )
    }
}

/// A (language key, version) pair used by a chunk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LanguageVersion {
    pub key: String,
    pub version: String,
}

impl LanguageVersion {
    #[must_use]
    pub fn new(key: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            version: version.into(),
        }
    }
}

// =============================================================================
// FEATURE VALUES
// =============================================================================

/// The value of one property of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PropertyValue {
    pub meta_pointer: MetaPointer,
    pub value: Option<String>,
}

impl PropertyValue {
    #[must_use]
    pub fn new(meta_pointer: MetaPointer, value: Option<String>) -> Self {
        Self {
            meta_pointer,
            value,
        }
    }
}

/// The ordered child IDs of one containment of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContainmentValue {
    pub meta_pointer: MetaPointer,
    pub children: Vec<String>,
}

impl ContainmentValue {
    #[must_use]
    pub fn new(meta_pointer: MetaPointer, children: Vec<String>) -> Self {
        Self {
            meta_pointer,
            children,
        }
    }
}

/// One entry of a reference: a target ID and/or a resolve-info label.
///
/// At least one of the two must be present; the Ingestor rejects entries
/// where both are absent.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceEntry {
    pub target: Option<String>,
    pub resolve_info: Option<String>,
}

impl ReferenceEntry {
    #[must_use]
    pub fn new(target: Option<String>, resolve_info: Option<String>) -> Self {
        Self {
            target,
            resolve_info,
        }
    }

    /// An entry pointing at a node ID without resolve info.
    #[must_use]
    pub fn to(target: impl Into<String>) -> Self {
        Self::new(Some(target.into()), None)
    }

    /// Returns `true` if neither target nor resolve info is set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.target.is_none() && self.resolve_info.is_none()
    }
}

impl Ord for ReferenceEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        cmp_nulls_last(&self.target, &other.target)
            .then_with(|| cmp_nulls_last(&self.resolve_info, &other.resolve_info))
    }
}

impl PartialOrd for ReferenceEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The ordered entries of one reference of an instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReferenceValue {
    pub meta_pointer: MetaPointer,
    pub entries: Vec<ReferenceEntry>,
}

impl ReferenceValue {
    #[must_use]
    pub fn new(meta_pointer: MetaPointer, entries: Vec<ReferenceEntry>) -> Self {
        Self {
            meta_pointer,
            entries,
        }
    }
}

// =============================================================================
// CAPABILITY TRAITS
// =============================================================================

/// Read access to the properties of an instance, keyed by meta pointer.
pub trait HasProperties {
    fn property_values(&self) -> &[PropertyValue];

    /// The value of the property identified by `meta_pointer`, if set.
    fn property(&self, meta_pointer: &MetaPointer) -> Option<&str> {
        self.property_values()
            .iter()
            .find(|p| &p.meta_pointer == meta_pointer)
            .and_then(|p| p.value.as_deref())
    }

    /// The value of the first property whose key is `key`, ignoring language and version.
    fn property_by_key(&self, key: &str) -> Option<&str> {
        self.property_values()
            .iter()
            .find(|p| p.meta_pointer.key.as_deref() == Some(key))
            .and_then(|p| p.value.as_deref())
    }
}

/// Read access to the containments of an instance.
pub trait HasContainments {
    fn containment_values(&self) -> &[ContainmentValue];

    /// The children held by the containment identified by `meta_pointer`.
    fn children_of(&self, meta_pointer: &MetaPointer) -> &[String] {
        self.containment_values()
            .iter()
            .find(|c| &c.meta_pointer == meta_pointer)
            .map(|c| c.children.as_slice())
            .unwrap_or(&[])
    }

    /// All child IDs across every containment, in declaration order.
    fn child_ids(&self) -> Box<dyn Iterator<Item = &String> + '_> {
        Box::new(
            self.containment_values()
                .iter()
                .flat_map(|c| c.children.iter()),
        )
    }
}

/// Read access to the references of an instance.
pub trait HasReferences {
    fn reference_values(&self) -> &[ReferenceValue];

    /// Every target ID across every reference entry.
    fn reference_targets(&self) -> Vec<&str> {
        self.reference_values()
            .iter()
            .flat_map(|r| r.entries.iter())
            .filter_map(|e| e.target.as_deref())
            .collect()
    }
}

// =============================================================================
// CLASSIFIER INSTANCE
// =============================================================================

/// A node or annotation instance, as exchanged in chunks and held in the index.
///
/// `parent` is absent only for partition roots. For annotations `parent` is
/// the host node, and `annotated`, when present, must name the same host.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ClassifierInstance {
    pub id: String,
    pub classifier: MetaPointer,
    pub parent: Option<String>,
    pub properties: Vec<PropertyValue>,
    pub containments: Vec<ContainmentValue>,
    pub references: Vec<ReferenceValue>,
    pub annotations: Vec<String>,
    pub annotated: Option<String>,
}

impl ClassifierInstance {
    /// Create an instance with no features and no parent.
    #[must_use]
    pub fn new(id: impl Into<String>, classifier: MetaPointer) -> Self {
        Self {
            id: id.into(),
            classifier,
            parent: None,
            properties: Vec::new(),
            containments: Vec::new(),
            references: Vec::new(),
            annotations: Vec::new(),
            annotated: None,
        }
    }

    /// Builder-style parent assignment.
    #[must_use]
    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    /// Builder-style property assignment.
    #[must_use]
    pub fn with_property(mut self, meta_pointer: MetaPointer, value: impl Into<String>) -> Self {
        self.set_property(meta_pointer, Some(value.into()));
        self
    }

    /// Builder-style child addition.
    #[must_use]
    pub fn with_child(mut self, meta_pointer: MetaPointer, child: impl Into<String>) -> Self {
        self.add_child(meta_pointer, child);
        self
    }

    /// Builder-style annotation addition.
    #[must_use]
    pub fn with_annotation(mut self, annotation: impl Into<String>) -> Self {
        self.annotations.push(annotation.into());
        self
    }

    /// Builder-style reference addition.
    #[must_use]
    pub fn with_reference(mut self, meta_pointer: MetaPointer, entry: ReferenceEntry) -> Self {
        match self
            .references
            .iter_mut()
            .find(|r| r.meta_pointer == meta_pointer)
        {
            Some(reference) => reference.entries.push(entry),
            None => self
                .references
                .push(ReferenceValue::new(meta_pointer, vec![entry])),
        }
        self
    }

    /// Mark this instance as an annotation of `host`.
    ///
    /// Sets both `parent` and `annotated` to the host ID.
    #[must_use]
    pub fn annotating(mut self, host: impl Into<String>) -> Self {
        let host = host.into();
        self.parent = Some(host.clone());
        self.annotated = Some(host);
        self
    }

    /// Returns `true` if the instance has no parent.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    /// Set (or clear) a property value, replacing an existing entry.
    pub fn set_property(&mut self, meta_pointer: MetaPointer, value: Option<String>) {
        match self
            .properties
            .iter_mut()
            .find(|p| p.meta_pointer == meta_pointer)
        {
            Some(property) => property.value = value,
            None => self.properties.push(PropertyValue::new(meta_pointer, value)),
        }
    }

    /// Append a child to the containment identified by `meta_pointer`.
    pub fn add_child(&mut self, meta_pointer: MetaPointer, child: impl Into<String>) {
        let child = child.into();
        match self
            .containments
            .iter_mut()
            .find(|c| c.meta_pointer == meta_pointer)
        {
            Some(containment) => containment.children.push(child),
            None => self
                .containments
                .push(ContainmentValue::new(meta_pointer, vec![child])),
        }
    }

    /// Returns `true` if `id` is one of this instance's children or annotations.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.child_ids().any(|c| c == id) || self.annotations.iter().any(|a| a == id)
    }

    /// Remove `id` from every containment and from the annotation list.
    ///
    /// Returns `true` if anything was removed.
    pub fn remove_contained(&mut self, id: &str) -> bool {
        let mut removed = false;
        for containment in &mut self.containments {
            let before = containment.children.len();
            containment.children.retain(|c| c != id);
            removed |= containment.children.len() != before;
        }
        let before = self.annotations.len();
        self.annotations.retain(|a| a != id);
        removed | (self.annotations.len() != before)
    }

    /// Child IDs followed by annotation IDs: every edge the reachability sweep follows.
    pub fn owned_ids(&self) -> impl Iterator<Item = &String> {
        self.child_ids().chain(self.annotations.iter())
    }
}

impl HasProperties for ClassifierInstance {
    fn property_values(&self) -> &[PropertyValue] {
        &self.properties
    }
}

impl HasContainments for ClassifierInstance {
    fn containment_values(&self) -> &[ContainmentValue] {
        &self.containments
    }
}

impl HasReferences for ClassifierInstance {
    fn reference_values(&self) -> &[ReferenceValue] {
        &self.references
    }
}

// =============================================================================
// FORMAT VERSION & CHUNK
// =============================================================================

/// Serialization format version declared by a chunk or a repository.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub enum FormatVersion {
    #[serde(rename = "2023.1")]
    V2023_1,
    #[default]
    #[serde(rename = "2024.1")]
    V2024_1,
}

impl FormatVersion {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::V2023_1 => "2023.1",
            Self::V2024_1 => "2024.1",
        }
    }
}

impl fmt::Display for FormatVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for FormatVersion {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "2023.1" => Ok(Self::V2023_1),
            "2024.1" => Ok(Self::V2024_1),
            other => Err(CanopyError::InvalidRequest(format!(
                "Unsupported serialization format version: {}",
                other
            ))),
        }
    }
}

/// A bag of classifier instances exchanged between client and engine.
///
/// A chunk may be structurally incomplete (children pointing outside the
/// chunk); that is the expected shape of data in flight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Chunk {
    pub format_version: FormatVersion,
    pub languages: Vec<LanguageVersion>,
    pub instances: Vec<ClassifierInstance>,
}

impl Chunk {
    /// Build a chunk from instances, deriving the used-language set.
    #[must_use]
    pub fn from_instances(format_version: FormatVersion, instances: Vec<ClassifierInstance>) -> Self {
        let mut chunk = Self {
            format_version,
            languages: Vec::new(),
            instances,
        };
        chunk.populate_used_languages();
        chunk
    }

    /// Recompute `languages` from every meta pointer used by the instances.
    pub fn populate_used_languages(&mut self) {
        let mut used = BTreeSet::new();
        for instance in &self.instances {
            used.extend(instance.classifier.language_version());
            used.extend(
                instance
                    .properties
                    .iter()
                    .filter_map(|p| p.meta_pointer.language_version()),
            );
            used.extend(
                instance
                    .containments
                    .iter()
                    .filter_map(|c| c.meta_pointer.language_version()),
            );
            used.extend(
                instance
                    .references
                    .iter()
                    .filter_map(|r| r.meta_pointer.language_version()),
            );
        }
        self.languages = used.into_iter().collect();
    }

    /// Instance IDs in chunk order.
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.instances.iter().map(|i| i.id.as_str())
    }

    /// Look up an instance of this chunk by ID.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<&ClassifierInstance> {
        self.instances.iter().find(|i| i.id == id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.instances.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances.is_empty()
    }
}

// =============================================================================
// REPOSITORY DESCRIPTORS
// =============================================================================

/// Whether a repository keeps history. Only `Disabled` is supported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum HistorySupport {
    #[default]
    Disabled,
    Enabled,
}

/// Name and declared format of a repository.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryConfiguration {
    pub name: String,
    pub format_version: FormatVersion,
    pub history: HistorySupport,
}

impl RepositoryConfiguration {
    /// A configuration with the given name, the current format, and no history.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            format_version: FormatVersion::default(),
            history: HistorySupport::Disabled,
        }
    }

    #[must_use]
    pub fn with_format_version(mut self, format_version: FormatVersion) -> Self {
        self.format_version = format_version;
        self
    }

    #[must_use]
    pub fn with_history(mut self, history: HistorySupport) -> Self {
        self.history = history;
        self
    }
}

/// Opaque token identifying a repository state after a mutation ("v-N").
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RepositoryVersionToken(pub String);

impl RepositoryVersionToken {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RepositoryVersionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// =============================================================================
// ERROR TYPES
// =============================================================================

/// Errors that can occur in the Canopy engine.
///
/// - No silent failures
/// - Use `Result<T, CanopyError>` for fallible operations
/// - A call that returns a validation error has not mutated any state
#[derive(Debug, Error)]
pub enum CanopyError {
    /// An ID does not satisfy the identifier grammar.
    #[error("Invalid node id: {0:?}")]
    InvalidId(String),

    /// A containment or annotation lists an ID absent from the call and the index.
    #[error("Dangling containment: {node} lists unknown child {missing}")]
    DanglingContainment { node: String, missing: String },

    /// Requested root IDs are not present in the index.
    #[error("Unknown nodes: {0:?}")]
    UnknownNodes(Vec<String>),

    /// The named repository does not exist.
    #[error("Repository not found: {0}")]
    RepositoryNotFound(String),

    /// A repository with this name already exists.
    #[error("Repository already exists: {0}")]
    RepositoryAlreadyExists(String),

    /// The ID is not a registered partition root.
    #[error("Partition not found: {0}")]
    PartitionNotFound(String),

    /// A parentless node was stored without being registered as a partition.
    #[error("Node {0} has no parent and is not a registered partition")]
    UnregisteredPartition(String),

    /// The same ID appears more than once in a single call.
    #[error("Duplicate id in request: {0}")]
    DuplicateId(String),

    /// A reference entry has neither a target nor resolve info.
    #[error("Invalid reference on {node}: entry has neither target nor resolve info")]
    InvalidReference { node: String },

    /// The request is malformed (counts, empty lists, format mismatch).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Repositories with history are not supported.
    #[error("History is not supported (repository {0})")]
    HistoryUnsupported(String),

    /// A serialization error occurred.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// A deserialization error occurred.
    #[error("Deserialization error: {0}")]
    DeserializationError(String),

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    IoError(String),
}

impl CanopyError {
    /// Returns `true` for errors raised before any state was touched.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidId(_)
                | Self::DanglingContainment { .. }
                | Self::UnregisteredPartition(_)
                | Self::DuplicateId(_)
                | Self::InvalidReference { .. }
                | Self::InvalidRequest(_)
                | Self::HistoryUnsupported(_)
        )
    }
}

// =============================================================================
// TESTS
// =============================================================================
