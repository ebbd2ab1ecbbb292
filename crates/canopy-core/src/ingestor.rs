//! # Ingestor Module
//!
//! Instance validation for Canopy chunks.
//!
//! - Validate instances before any index mutation
//! - Reject malformed input (ID grammar, empty reference entries, oversized values)
//! - Reject repeated IDs within one call
//! - No repair, no inference
//!
//! The checks here are stateless: they look at the submitted instances only.
//! Checks that need the index (dangling children, partition registration)
//! live in the mutation module.

use crate::primitives::{MAX_CHUNK_INSTANCES, MAX_PROPERTY_VALUE_LENGTH, is_valid_id};
use crate::{CanopyError, Chunk, ClassifierInstance, FormatVersion};
use std::collections::BTreeSet;

/// The Ingestor handles stateless validation of submitted instances.
pub struct Ingestor;

impl Ingestor {
    /// Validate a single ID against the identifier grammar.
    pub fn validate_id(id: &str) -> Result<(), CanopyError> {
        if is_valid_id(id) {
            Ok(())
        } else {
            Err(CanopyError::InvalidId(id.to_string()))
        }
    }

    /// Validate every ID in a list.
    pub fn validate_ids<'a>(ids: impl IntoIterator<Item = &'a String>) -> Result<(), CanopyError> {
        for id in ids {
            Self::validate_id(id)?;
        }
        Ok(())
    }

    /// Validate one instance.
    ///
    /// An instance is valid if:
    /// - Its own ID, its parent, its children, its annotations and its
    ///   annotated host all satisfy the ID grammar
    /// - Every reference entry has a target or resolve info
    /// - Every property value is within `MAX_PROPERTY_VALUE_LENGTH`
    ///
    /// Reference targets are not checked against the grammar: references
    /// may dangle and are carried as given.
    pub fn validate_instance(instance: &ClassifierInstance) -> Result<(), CanopyError> {
        Self::validate_id(&instance.id)?;

        if let Some(parent) = &instance.parent {
            Self::validate_id(parent)?;
        }
        if let Some(host) = &instance.annotated {
            Self::validate_id(host)?;
        }

        for containment in &instance.containments {
            Self::validate_ids(&containment.children)?;
        }
        Self::validate_ids(&instance.annotations)?;

        for reference in &instance.references {
            if reference.entries.iter().any(|e| e.is_empty()) {
                return Err(CanopyError::InvalidReference {
                    node: instance.id.clone(),
                });
            }
        }

        for property in &instance.properties {
            if property
                .value
                .as_ref()
                .is_some_and(|v| v.len() > MAX_PROPERTY_VALUE_LENGTH)
            {
                return Err(CanopyError::InvalidRequest(format!(
                    "Property value on {} exceeds {} bytes",
                    instance.id, MAX_PROPERTY_VALUE_LENGTH
                )));
            }
        }

        Ok(())
    }

    /// Validate a batch of instances submitted in one call.
    ///
    /// Rejects batches over `MAX_CHUNK_INSTANCES`, invalid instances, and
    /// IDs that repeat within the batch.
    pub fn validate_batch(instances: &[ClassifierInstance]) -> Result<(), CanopyError> {
        if instances.len() > MAX_CHUNK_INSTANCES {
            return Err(CanopyError::InvalidRequest(format!(
                "Chunk has {} instances, maximum is {}",
                instances.len(),
                MAX_CHUNK_INSTANCES
            )));
        }

        let mut seen = BTreeSet::new();
        for instance in instances {
            Self::validate_instance(instance)?;
            if !seen.insert(instance.id.as_str()) {
                return Err(CanopyError::DuplicateId(instance.id.clone()));
            }
        }
        Ok(())
    }

    /// Validate a chunk destined for a repository declaring `expected` format.
    pub fn validate_chunk(chunk: &Chunk, expected: FormatVersion) -> Result<(), CanopyError> {
        if chunk.format_version != expected {
            return Err(CanopyError::InvalidRequest(format!(
                "Chunk format {} does not match repository format {}",
                chunk.format_version, expected
            )));
        }
        Self::validate_batch(&chunk.instances)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{MetaPointer, ReferenceEntry};

    fn concept() -> MetaPointer {
        MetaPointer::new("lib", "1", "Book")
    }

    #[test]
    fn valid_instance_accepted() {
        let node = ClassifierInstance::new("b1", concept())
            .with_parent("lib1")
            .with_child(MetaPointer::new("lib", "1", "chapters"), "c1");
        assert!(Ingestor::validate_instance(&node).is_ok());
    }

    #[test]
    fn invalid_child_id_rejected() {
        let node = ClassifierInstance::new("b1", concept())
            .with_child(MetaPointer::new("lib", "1", "chapters"), "c 1");
        assert!(matches!(
            Ingestor::validate_instance(&node),
            Err(CanopyError::InvalidId(id)) if id == "c 1"
        ));
    }

    #[test]
    fn empty_reference_entry_rejected() {
        let node = ClassifierInstance::new("b1", concept()).with_reference(
            MetaPointer::new("lib", "1", "author"),
            ReferenceEntry::new(None, None),
        );
        assert!(matches!(
            Ingestor::validate_instance(&node),
            Err(CanopyError::InvalidReference { .. })
        ));
    }

    #[test]
    fn dangling_reference_target_accepted() {
        let node = ClassifierInstance::new("b1", concept()).with_reference(
            MetaPointer::new("lib", "1", "author"),
            ReferenceEntry::new(Some("elsewhere".to_string()), Some("Herbert".to_string())),
        );
        assert!(Ingestor::validate_instance(&node).is_ok());
    }

    #[test]
    fn duplicate_ids_in_batch_rejected() {
        let batch = vec![
            ClassifierInstance::new("b1", concept()),
            ClassifierInstance::new("b1", concept()),
        ];
        assert!(matches!(
            Ingestor::validate_batch(&batch),
            Err(CanopyError::DuplicateId(id)) if id == "b1"
        ));
    }

    #[test]
    fn chunk_format_mismatch_rejected() {
        let chunk = Chunk::from_instances(FormatVersion::V2023_1, Vec::new());
        assert!(Ingestor::validate_chunk(&chunk, FormatVersion::V2023_1).is_ok());
        assert!(matches!(
            Ingestor::validate_chunk(&chunk, FormatVersion::V2024_1),
            Err(CanopyError::InvalidRequest(_))
        ));
    }
}
