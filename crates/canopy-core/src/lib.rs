//! # canopy-core
//!
//! The repository storage engine for Canopy - THE ENGINE.
//!
//! This crate stores partitions of tree-shaped model nodes (the LionWeb
//! chunk data model) and keeps their containment integrity correct while
//! clients overwrite them with partial chunks.
//!
//! ## Layout
//!
//! - `types`: meta pointers, instances, chunks, errors
//! - `ingestor` + `mutation`: validate-then-apply writes and the reachability sweep
//! - `repository`: one repository's partitions, index, version and ID counter
//! - `server`: named repositories, locking, persistence, observers
//! - `bulk`: request validation in front of the server
//! - `consistency`, `inspection`, `canonical`: read-only analysis
//! - `formats`, `storage`: snapshot bytes and the redb backend
//!
//! ## Architectural Constraints
//!
//! - No async, no network dependencies (pure Rust)
//! - Deterministic: `BTreeMap`/`BTreeSet` only
//! - A call that fails validation has not mutated anything

// =============================================================================
// MODULES
// =============================================================================

pub mod builtins;
pub mod bulk;
pub mod canonical;
pub mod consistency;
pub mod formats;
pub mod ingestor;
pub mod inspection;
pub mod mutation;
pub mod observer;
pub mod primitives;
pub mod repository;
pub mod server;
pub mod storage;
pub mod types;

// =============================================================================
// RE-EXPORTS: Core Types (from types module)
// =============================================================================

pub use types::{
    CanopyError, Chunk, ClassifierInstance, ContainmentValue, FormatVersion, HasContainments,
    HasProperties, HasReferences, HistorySupport, INAMED_NAME_KEY, InstanceView, LanguageVersion,
    MetaPointer, NamedView, PropertyValue, ReferenceEntry, ReferenceValue, RepositoryConfiguration,
    RepositoryVersionToken,
};

// =============================================================================
// RE-EXPORTS: Engine
// =============================================================================

pub use builtins::{Builtins, BuiltinsBuilder};
pub use bulk::BulkApi;
pub use canonical::{CanonicalChunk, canonical_checksum, semantically_equivalent};
#[cfg(feature = "crypto-hash")]
pub use canonical::canonical_crypto_hash;
pub use consistency::{
    ClassifierCatalog, ConsistencyChecker, Issue, IssueKind, Severity, ValidationResult,
};
pub use ingestor::Ingestor;
pub use inspection::{ClassifierKey, ClassifierResult, PartitionSummary, RepositoryMetrics};
pub use mutation::{ChangeSet, MutationEngine};
pub use observer::{ObserverRegistry, RepositoryObserver, SubscriptionId};
pub use repository::{RepositoryData, RepositorySnapshot, Retrieved, UnknownPolicy};
pub use server::{RepositoryServer, StorageBackend};
pub use storage::RedbRepositoryStore;

// =============================================================================
// RE-EXPORTS: Formats (from formats module)
// =============================================================================

pub use formats::{SnapshotHeader, repository_from_bytes, repository_to_bytes};
