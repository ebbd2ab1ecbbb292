//! # Builtins
//!
//! The catalog of classifiers the engine knows about, with a
//! partition-capable flag per classifier.
//!
//! Built once at process start and shared by `Arc`. Immutable after
//! construction; use `BuiltinsBuilder` to add language-specific classifiers.

use crate::MetaPointer;
use crate::consistency::ClassifierCatalog;
use std::collections::BTreeMap;

/// Language key of the LionCore M3 metamodel.
pub const LIONCORE_M3: &str = "LionCore-M3";

/// Language key of the LionCore builtin types.
pub const LIONCORE_BUILTINS: &str = "LionCore-builtins";

/// LionWeb releases whose builtins are registered by `Builtins::lioncore`.
pub const LIONWEB_VERSIONS: [&str; 2] = ["2023.1", "2024.1"];

const M3_CONCEPTS: [&str; 11] = [
    "Annotation",
    "Concept",
    "Containment",
    "Enumeration",
    "EnumerationLiteral",
    "Interface",
    "Language",
    "PrimitiveType",
    "Property",
    "Reference",
    "StructuredDataType",
];

const BUILTIN_TYPES: [&str; 6] = ["Boolean", "INamed", "Integer", "JSON", "Node", "String"];

/// Immutable classifier catalog.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Builtins {
    classifiers: BTreeMap<MetaPointer, bool>,
}

impl Builtins {
    /// An empty catalog: every classifier is unknown.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// The LionCore M3 concepts and builtin primitive types.
    ///
    /// Only `Language` is partition-capable.
    #[must_use]
    pub fn lioncore() -> Self {
        Self::builder().build()
    }

    /// A builder pre-populated with the LionCore classifiers.
    #[must_use]
    pub fn builder() -> BuiltinsBuilder {
        let mut builder = BuiltinsBuilder::default();
        for version in LIONWEB_VERSIONS {
            for concept in M3_CONCEPTS {
                builder = builder.classifier(
                    MetaPointer::new(LIONCORE_M3, version, concept),
                    concept == "Language",
                );
            }
            for ty in BUILTIN_TYPES {
                builder = builder.classifier(
                    MetaPointer::new(LIONCORE_BUILTINS, version, format!("{LIONCORE_BUILTINS}-{ty}")),
                    false,
                );
            }
        }
        builder
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.classifiers.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.classifiers.is_empty()
    }

    #[must_use]
    pub fn contains(&self, classifier: &MetaPointer) -> bool {
        self.classifiers.contains_key(classifier)
    }
}

impl ClassifierCatalog for Builtins {
    fn is_partition_capable(&self, classifier: &MetaPointer) -> Option<bool> {
        self.classifiers.get(classifier).copied()
    }
}

/// Builder for `Builtins`.
#[derive(Debug, Default)]
pub struct BuiltinsBuilder {
    classifiers: BTreeMap<MetaPointer, bool>,
}

impl BuiltinsBuilder {
    /// Register (or re-flag) a classifier.
    #[must_use]
    pub fn classifier(mut self, classifier: MetaPointer, partition_capable: bool) -> Self {
        self.classifiers.insert(classifier, partition_capable);
        self
    }

    /// Register a partition-capable concept.
    #[must_use]
    pub fn partition(self, classifier: MetaPointer) -> Self {
        self.classifier(classifier, true)
    }

    #[must_use]
    pub fn build(self) -> Builtins {
        Builtins {
            classifiers: self.classifiers,
        }
    }
}
