//! # Canonical Chunk Module
//!
//! Deterministic normal form for chunks, used to compare chunks by meaning
//! rather than by the order their lists happen to arrive in.
//!
//! Canonical order:
//! - languages by (key, version)
//! - instances by ID
//! - properties, containments and references by meta pointer
//! - reference entries by (target, resolve info), absent values last
//! - containment children and annotation IDs lexicographically
//!
//! Two chunks are semantically equivalent iff their canonical forms are equal.
//! The canonical postcard encoding is bit-exact, so its checksum is stable
//! across runs and processes.

use crate::{CanopyError, Chunk, ClassifierInstance};
use serde::{Deserialize, Serialize};

/// Magic bytes for canonical chunk encodings.
pub const CANONICAL_MAGIC: [u8; 4] = *b"CNPC";

/// Current canonical encoding version.
pub const CANONICAL_VERSION: u8 = 1;

/// Header prepended to a canonical encoding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalHeader {
    pub magic: [u8; 4],
    pub version: u8,
    /// Number of instances in the chunk.
    pub instance_count: u64,
    /// `CanonicalChunk::checksum` of the payload.
    pub checksum: u64,
}

impl CanonicalHeader {
    #[must_use]
    pub fn new(instance_count: u64, checksum: u64) -> Self {
        Self {
            magic: CANONICAL_MAGIC,
            version: CANONICAL_VERSION,
            instance_count,
            checksum,
        }
    }

    /// Validate magic and version.
    ///
    /// Error messages are generic and do not echo the offending bytes.
    pub fn validate(&self) -> Result<(), CanopyError> {
        if self.magic != CANONICAL_MAGIC {
            return Err(CanopyError::DeserializationError(
                "Invalid canonical format".to_string(),
            ));
        }
        if self.version != CANONICAL_VERSION {
            return Err(CanopyError::DeserializationError(
                "Unsupported canonical version".to_string(),
            ));
        }
        Ok(())
    }
}

// =============================================================================
// CANONICAL CHUNK
// =============================================================================

/// A chunk in canonical order.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CanonicalChunk(Chunk);

impl CanonicalChunk {
    /// Sort every list of `chunk` into canonical order.
    #[must_use]
    pub fn from_chunk(chunk: &Chunk) -> Self {
        let mut languages = chunk.languages.clone();
        languages.sort();
        languages.dedup();

        let mut instances: Vec<ClassifierInstance> =
            chunk.instances.iter().map(canonical_instance).collect();
        instances.sort_by(|a, b| a.id.cmp(&b.id));

        Self(Chunk {
            format_version: chunk.format_version,
            languages,
            instances,
        })
    }

    #[must_use]
    pub fn as_chunk(&self) -> &Chunk {
        &self.0
    }

    #[must_use]
    pub fn into_chunk(self) -> Chunk {
        self.0
    }

    /// Bit-exact postcard encoding of the canonical form.
    pub fn to_bytes(&self) -> Result<Vec<u8>, CanopyError> {
        postcard::to_allocvec(&self.0).map_err(|e| CanopyError::SerializationError(e.to_string()))
    }

    /// Deterministic 64-bit checksum of the canonical encoding.
    ///
    /// Rotate/xor digest over the encoded bytes, position-mixed so that
    /// reordered payloads differ. Detects accidental corruption only; it is
    /// not collision resistant. Use `crypto_hash` where that matters.
    pub fn checksum(&self) -> Result<u64, CanopyError> {
        let bytes = self.to_bytes()?;
        Ok(rotate_xor(&bytes))
    }

    /// BLAKE3 hex digest (64 characters) of the canonical encoding.
    #[cfg(feature = "crypto-hash")]
    pub fn crypto_hash(&self) -> Result<String, CanopyError> {
        let bytes = self.to_bytes()?;
        Ok(blake3::hash(&bytes).to_hex().to_string())
    }
}

fn rotate_xor(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0;
    for (position, byte) in bytes.iter().enumerate() {
        hash = hash.rotate_left(5) ^ u64::from(*byte) ^ (position as u64).rotate_left(29);
    }
    hash ^ (bytes.len() as u64).rotate_left(3)
}

fn canonical_instance(instance: &ClassifierInstance) -> ClassifierInstance {
    let mut instance = instance.clone();

    instance
        .properties
        .sort_by(|a, b| a.meta_pointer.cmp(&b.meta_pointer));

    for containment in &mut instance.containments {
        containment.children.sort();
    }
    instance
        .containments
        .sort_by(|a, b| a.meta_pointer.cmp(&b.meta_pointer));

    for reference in &mut instance.references {
        reference.entries.sort();
    }
    instance
        .references
        .sort_by(|a, b| a.meta_pointer.cmp(&b.meta_pointer));

    instance.annotations.sort();
    instance
}

// =============================================================================
// FUNCTIONS
// =============================================================================

/// Returns `true` if `a` and `b` are equal once both are in canonical order.
#[must_use]
pub fn semantically_equivalent(a: &Chunk, b: &Chunk) -> bool {
    CanonicalChunk::from_chunk(a) == CanonicalChunk::from_chunk(b)
}

/// Encode a chunk canonically with a checksummed header.
///
/// Format: `[header_len: u32 LE] [CanonicalHeader] [CanonicalChunk]`, all postcard.
pub fn export_canonical(chunk: &Chunk) -> Result<Vec<u8>, CanopyError> {
    let canonical = CanonicalChunk::from_chunk(chunk);
    let header = CanonicalHeader::new(canonical.0.len() as u64, canonical.checksum()?);

    let header_bytes = postcard::to_allocvec(&header)
        .map_err(|e| CanopyError::SerializationError(format!("Header: {}", e)))?;
    let data_bytes = canonical.to_bytes()?;

    let mut result = Vec::with_capacity(4 + header_bytes.len() + data_bytes.len());
    result.extend_from_slice(&(header_bytes.len() as u32).to_le_bytes());
    result.extend_from_slice(&header_bytes);
    result.extend_from_slice(&data_bytes);
    Ok(result)
}

/// Decode a canonical encoding, verifying header, count and checksum.
pub fn import_canonical(data: &[u8]) -> Result<Chunk, CanopyError> {
    let Some((len_bytes, rest)) = data.split_first_chunk::<4>() else {
        return Err(CanopyError::DeserializationError(
            "Data too short".to_string(),
        ));
    };
    let header_len = u32::from_le_bytes(*len_bytes) as usize;
    if rest.len() < header_len {
        return Err(CanopyError::DeserializationError(
            "Data too short for header".to_string(),
        ));
    }
    let (header_bytes, payload) = rest.split_at(header_len);

    let header: CanonicalHeader = postcard::from_bytes(header_bytes)
        .map_err(|e| CanopyError::DeserializationError(format!("Header: {}", e)))?;
    header.validate()?;

    let canonical: CanonicalChunk = postcard::from_bytes(payload)
        .map_err(|e| CanopyError::DeserializationError(format!("Data: {}", e)))?;

    if canonical.0.len() as u64 != header.instance_count {
        return Err(CanopyError::DeserializationError(
            "Instance count mismatch".to_string(),
        ));
    }
    let computed = canonical.checksum()?;
    if computed != header.checksum {
        return Err(CanopyError::DeserializationError(format!(
            "Checksum mismatch: expected {}, got {}",
            header.checksum, computed
        )));
    }

    Ok(canonical.into_chunk())
}

/// Canonical checksum of a chunk.
pub fn canonical_checksum(chunk: &Chunk) -> Result<u64, CanopyError> {
    CanonicalChunk::from_chunk(chunk).checksum()
}

/// BLAKE3 hex digest of a chunk's canonical encoding.
#[cfg(feature = "crypto-hash")]
pub fn canonical_crypto_hash(chunk: &Chunk) -> Result<String, CanopyError> {
    CanonicalChunk::from_chunk(chunk).crypto_hash()
}

// =============================================================================
// TESTS
// =============================================================================
