//! # Formats
//!
//! Byte-level encodings owned by the engine. The JSON chunk codec lives in
//! the app crate; the engine never sees raw JSON.

mod persistence;

pub use persistence::{
    MAX_SNAPSHOT_PAYLOAD_SIZE, SnapshotHeader, repository_from_bytes, repository_to_bytes,
    snapshot_from_bytes,
};
