//! # Storage
//!
//! Durable backends for the repository server.

mod redb_store;

pub use redb_store::RedbRepositoryStore;
