//! # Innate Primitives
//!
//! Hardcoded runtime constants and primitives for the Canopy engine.
//!
//! These primitives are compiled into the binary and are immutable at runtime.
//!
//! ## Primitives
//!
//! 1. **ID Primitive**: the identifier grammar every stored ID must satisfy.
//! 2. **Depth Primitive**: the sentinel for unbounded retrieval.
//! 3. **Allocation Primitive**: prefixes for allocated IDs and version tokens.

/// Retrieval depth meaning "no limit".
pub const UNBOUNDED_DEPTH: usize = usize::MAX;

/// Prefix of IDs handed out by `ids(count)`.
pub const ID_PREFIX: &str = "id-";

/// Prefix of repository version tokens.
pub const VERSION_PREFIX: &str = "v-";

/// Magic bytes for the Canopy snapshot format header.
///
/// - File Header = Magic Bytes ("CNPY") + Version (u8) before payload.
pub const MAGIC_BYTES: &[u8; 4] = b"CNPY";

/// Current snapshot format version.
///
/// Increment this when making breaking changes to the snapshot format.
pub const FORMAT_VERSION: u8 = 1;

/// Name of the repository created when a server starts empty.
pub const DEFAULT_REPOSITORY: &str = "default";

// =============================================================================
// INPUT VALIDATION LIMITS
// =============================================================================

/// Maximum length of a node ID in bytes.
pub const MAX_ID_LENGTH: usize = 256;

/// Maximum length of a property value (1 MB).
///
/// Values longer than this are rejected by the Ingestor.
pub const MAX_PROPERTY_VALUE_LENGTH: usize = 1024 * 1024;

/// Maximum number of instances accepted in a single store call.
pub const MAX_CHUNK_INSTANCES: usize = 100_000;

/// Maximum number of IDs in a single retrieve or delete request.
pub const MAX_REQUEST_IDS: usize = 10_000;

/// Maximum number of IDs allocated by a single `ids(count)` call.
pub const MAX_ALLOCATED_IDS: usize = 10_000;

/// Maximum length of a repository name.
pub const MAX_REPOSITORY_NAME_LENGTH: usize = 128;

// =============================================================================
// ID GRAMMAR
// =============================================================================

/// Check an ID against the identifier grammar.
///
/// Valid IDs are non-empty and consist only of ASCII letters, ASCII digits,
/// `_` and `-`. Accented and other non-ASCII letters are rejected.
#[must_use]
pub fn is_valid_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_ID_LENGTH
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'_' || b == b'-')
}

/// Check a repository name. Same grammar as node IDs, shorter limit.
#[must_use]
pub fn is_valid_repository_name(name: &str) -> bool {
    name.len() <= MAX_REPOSITORY_NAME_LENGTH && is_valid_id(name)
}
