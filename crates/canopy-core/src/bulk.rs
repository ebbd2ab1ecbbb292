//! # Bulk API
//!
//! The client-facing operation surface over a `RepositoryServer`.
//!
//! Raw request values (signed counts and depths, ID lists, chunks) are
//! validated here before any engine call:
//! - ID lists are non-empty, bounded and well-formed
//! - depth limits and counts are non-negative
//! - a chunk's format version equals the repository's declared version
//!
//! A rejected request never reaches the engine.

use crate::ingestor::Ingestor;
use crate::primitives::{MAX_ALLOCATED_IDS, MAX_REQUEST_IDS, UNBOUNDED_DEPTH};
use crate::repository::{Retrieved, UnknownPolicy};
use crate::server::RepositoryServer;
use crate::{CanopyError, Chunk, RepositoryVersionToken};

/// Convert a signed depth limit; the maximum representable value means unbounded.
pub fn depth_limit(raw: i64) -> Result<usize, CanopyError> {
    if raw < 0 {
        return Err(CanopyError::InvalidRequest(format!(
            "depthLimit must be non-negative, got {}",
            raw
        )));
    }
    if raw >= i64::from(i32::MAX) {
        return Ok(UNBOUNDED_DEPTH);
    }
    usize::try_from(raw).map_err(|_| CanopyError::InvalidRequest("depthLimit out of range".to_string()))
}

/// Convert a signed ID count, bounded by `MAX_ALLOCATED_IDS`.
pub fn id_count(raw: i64) -> Result<usize, CanopyError> {
    let count = usize::try_from(raw).map_err(|_| {
        CanopyError::InvalidRequest(format!("count must be non-negative, got {}", raw))
    })?;
    if count > MAX_ALLOCATED_IDS {
        return Err(CanopyError::InvalidRequest(format!(
            "count {} exceeds maximum {}",
            count, MAX_ALLOCATED_IDS
        )));
    }
    Ok(count)
}

fn validate_id_list(ids: &[String], what: &str) -> Result<(), CanopyError> {
    if ids.is_empty() {
        return Err(CanopyError::InvalidRequest(format!("{} must not be empty", what)));
    }
    if ids.len() > MAX_REQUEST_IDS {
        return Err(CanopyError::InvalidRequest(format!(
            "{} has {} entries, maximum is {}",
            what,
            ids.len(),
            MAX_REQUEST_IDS
        )));
    }
    Ingestor::validate_ids(ids)
}

/// Request validation in front of a server.
#[derive(Debug, Clone, Copy)]
pub struct BulkApi<'a> {
    server: &'a RepositoryServer,
}

impl<'a> BulkApi<'a> {
    #[must_use]
    pub fn new(server: &'a RepositoryServer) -> Self {
        Self { server }
    }

    fn check_chunk(&self, repository: &str, chunk: &Chunk) -> Result<(), CanopyError> {
        if chunk.is_empty() {
            return Err(CanopyError::InvalidRequest("Chunk has no nodes".to_string()));
        }
        let configuration = self.server.repository_configuration(repository)?;
        Ingestor::validate_chunk(chunk, configuration.format_version)
    }

    pub fn list_partitions(&self, repository: &str) -> Result<Vec<String>, CanopyError> {
        self.server.list_partitions(repository)
    }

    pub fn create_partitions(
        &self,
        repository: &str,
        chunk: Chunk,
    ) -> Result<RepositoryVersionToken, CanopyError> {
        self.check_chunk(repository, &chunk)?;
        self.server.create_partitions(repository, chunk.instances)
    }

    pub fn delete_partitions(
        &self,
        repository: &str,
        ids: &[String],
    ) -> Result<RepositoryVersionToken, CanopyError> {
        validate_id_list(ids, "ids")?;
        self.server.delete_partitions(repository, ids)
    }

    pub fn store(&self, repository: &str, chunk: Chunk) -> Result<RepositoryVersionToken, CanopyError> {
        self.check_chunk(repository, &chunk)?;
        self.server.store(repository, chunk.instances)
    }

    /// Retrieve with a raw depth limit; unknown roots are reported, not fatal.
    pub fn retrieve(
        &self,
        repository: &str,
        ids: &[String],
        raw_depth: i64,
    ) -> Result<Retrieved, CanopyError> {
        validate_id_list(ids, "ids")?;
        let depth = depth_limit(raw_depth)?;
        self.server
            .retrieve(repository, ids, depth, UnknownPolicy::Report)
    }

    pub fn ids(&self, repository: &str, raw_count: i64) -> Result<Vec<String>, CanopyError> {
        let count = id_count(raw_count)?;
        self.server.ids(repository, count)
    }
}
