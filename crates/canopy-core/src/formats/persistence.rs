//! # Snapshot Format
//!
//! Binary serialization for whole repositories.
//!
//! File I/O lives in the app layer; this module is a pure transformation.
//!
//! Format: Header (5 bytes) + postcard-serialized `RepositorySnapshot`.
//! - 4 bytes: Magic ("CNPY")
//! - 1 byte: Version
//!
//! ## Size Limits
//!
//! - Maximum payload size (`MAX_SNAPSHOT_PAYLOAD_SIZE`) is checked first
//! - Header validation runs before payload parsing
//! - Corrupted data surfaces as `DeserializationError`

use crate::repository::RepositorySnapshot;
use crate::{CanopyError, RepositoryData, primitives};

/// Maximum accepted snapshot size (500 MB), validated before decoding.
pub const MAX_SNAPSHOT_PAYLOAD_SIZE: usize = 500 * 1024 * 1024;

const HEADER_SIZE: usize = 5;

// =============================================================================
// FILE HEADER
// =============================================================================

/// The snapshot header precedes all repository data.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotHeader {
    pub magic: [u8; 4],
    pub version: u8,
}

impl SnapshotHeader {
    /// Create a new header with current format version.
    #[must_use]
    pub fn new() -> Self {
        Self {
            magic: *primitives::MAGIC_BYTES,
            version: primitives::FORMAT_VERSION,
        }
    }

    pub fn validate(&self) -> Result<(), CanopyError> {
        if &self.magic != primitives::MAGIC_BYTES {
            return Err(CanopyError::DeserializationError(
                "Invalid magic bytes".to_string(),
            ));
        }
        if self.version != primitives::FORMAT_VERSION {
            return Err(CanopyError::DeserializationError(format!(
                "Unsupported version: {} (expected {})",
                self.version,
                primitives::FORMAT_VERSION
            )));
        }
        Ok(())
    }

    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut bytes = [0u8; HEADER_SIZE];
        bytes[0..4].copy_from_slice(&self.magic);
        bytes[4] = self.version;
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CanopyError> {
        let Some((magic, rest)) = bytes.split_first_chunk::<4>() else {
            return Err(CanopyError::DeserializationError(
                "Header too short".to_string(),
            ));
        };
        let Some(version) = rest.first() else {
            return Err(CanopyError::DeserializationError(
                "Header too short".to_string(),
            ));
        };
        Ok(Self {
            magic: *magic,
            version: *version,
        })
    }
}

impl Default for SnapshotHeader {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// SERIALIZATION FUNCTIONS
// =============================================================================

/// Serialize a repository to bytes (header + payload).
pub fn repository_to_bytes(repository: &RepositoryData) -> Result<Vec<u8>, CanopyError> {
    let payload = postcard::to_stdvec(&repository.to_snapshot())
        .map_err(|e| CanopyError::SerializationError(e.to_string()))?;

    let mut result = Vec::with_capacity(HEADER_SIZE + payload.len());
    result.extend_from_slice(&SnapshotHeader::new().to_bytes());
    result.extend_from_slice(&payload);
    Ok(result)
}

/// Deserialize a repository snapshot from bytes.
///
/// Size and header are validated before the payload is decoded. The
/// decoded repository is not audited; run the consistency checker on it.
pub fn snapshot_from_bytes(bytes: &[u8]) -> Result<RepositorySnapshot, CanopyError> {
    if bytes.len() < HEADER_SIZE {
        return Err(CanopyError::DeserializationError(format!(
            "Data too short: minimum {} bytes required",
            HEADER_SIZE
        )));
    }
    if bytes.len() > MAX_SNAPSHOT_PAYLOAD_SIZE {
        return Err(CanopyError::DeserializationError(format!(
            "Data size {} bytes exceeds maximum allowed {} bytes",
            bytes.len(),
            MAX_SNAPSHOT_PAYLOAD_SIZE
        )));
    }

    SnapshotHeader::from_bytes(bytes)?.validate()?;

    postcard::from_bytes(&bytes[HEADER_SIZE..]).map_err(|e| {
        CanopyError::DeserializationError(format!("Failed to decode repository snapshot: {}", e))
    })
}

/// Deserialize straight into `RepositoryData`.
pub fn repository_from_bytes(bytes: &[u8]) -> Result<RepositoryData, CanopyError> {
    snapshot_from_bytes(bytes).map(RepositoryData::from)
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassifierInstance, MetaPointer, RepositoryConfiguration};

    fn sample() -> RepositoryData {
        let mut repo = RepositoryData::new(RepositoryConfiguration::new("r"));
        repo.create_partitions_from_chunk(vec![
            ClassifierInstance::new("p1", MetaPointer::new("t", "1", "Root"))
                .with_child(MetaPointer::new("t", "1", "items"), "c1"),
            ClassifierInstance::new("c1", MetaPointer::new("t", "1", "Item")).with_parent("p1"),
        ])
        .expect("create");
        repo.bump_version();
        repo
    }

    #[test]
    fn header_roundtrip() {
        let bytes = SnapshotHeader::new().to_bytes();
        let restored = SnapshotHeader::from_bytes(&bytes).expect("parse header");
        assert_eq!(restored, SnapshotHeader::new());
    }

    #[test]
    fn bytes_roundtrip_bit_exact() {
        let bytes1 = repository_to_bytes(&sample()).expect("first serialize");
        let restored = repository_from_bytes(&bytes1).expect("deserialize");
        let bytes2 = repository_to_bytes(&restored).expect("second serialize");

        assert_eq!(bytes1, bytes2, "save -> load -> save must produce identical bytes");
        assert_eq!(restored.version(), 1);
    }

    #[test]
    fn invalid_magic_rejected() {
        let mut bytes = vec![0u8; 10];
        bytes[0..4].copy_from_slice(b"XXXX");
        assert!(repository_from_bytes(&bytes).is_err());
        assert!(repository_from_bytes(b"CN").is_err());
    }
}
