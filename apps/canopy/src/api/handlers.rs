//! # API Endpoint Handlers
//!
//! This module implements the actual HTTP endpoint handlers.
//!
//! Every engine call runs through `AppState::run`, which moves it onto the
//! blocking pool. Errors are mapped onto status codes by `status_for`.

use super::{
    AppState,
    types::{
        BulkResponse, ChunkJson, ClassifierCountJson, CreateRepositoryRequest, ExportJson,
        HealthResponse, IdsParams, LanguageCountJson, LimitParams, RepositoryJson,
        RepositoryParams, RetrieveParams, RetrieveRequest, VersionJson,
    },
};
use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use canopy_core::{
    BulkApi, CanopyError, Chunk, PartitionSummary, RepositoryMetrics, RepositoryVersionToken,
    ValidationResult, canonical_checksum, canonical_crypto_hash, repository_from_bytes,
};
use std::collections::BTreeMap;

/// Default row limit for inspection listings.
const DEFAULT_INSPECTION_LIMIT: usize = 1000;

type Reply<T> = (StatusCode, Json<BulkResponse<T>>);

/// Map an engine error onto an HTTP status.
#[must_use]
pub fn status_for(error: &CanopyError) -> StatusCode {
    match error {
        CanopyError::RepositoryNotFound(_)
        | CanopyError::PartitionNotFound(_)
        | CanopyError::UnknownNodes(_) => StatusCode::NOT_FOUND,
        CanopyError::RepositoryAlreadyExists(_) => StatusCode::CONFLICT,
        CanopyError::DeserializationError(_) => StatusCode::BAD_REQUEST,
        e if e.is_validation() => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn reply<T>(result: Result<T, CanopyError>) -> Reply<T> {
    match result {
        Ok(data) => (StatusCode::OK, Json(BulkResponse::success(data))),
        Err(e) => (status_for(&e), Json(BulkResponse::error(e.to_string()))),
    }
}

fn version_reply(result: Result<RepositoryVersionToken, CanopyError>) -> Reply<VersionJson> {
    reply(result.map(|token| VersionJson {
        version: token.0,
    }))
}

// =============================================================================
// HEALTH HANDLER
// =============================================================================

/// Health check endpoint.
pub async fn health_handler() -> impl IntoResponse {
    Json(HealthResponse::default())
}

// =============================================================================
// BULK HANDLERS
// =============================================================================

/// List the partition root IDs of a repository.
pub async fn list_partitions_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
) -> impl IntoResponse {
    let result = state
        .run(move |server| BulkApi::new(server).list_partitions(&params.repository))
        .await;
    reply(result)
}

/// Create partitions from a chunk of parentless roots and their descendants.
pub async fn create_partitions_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
    Json(body): Json<ChunkJson>,
) -> impl IntoResponse {
    let result = match Chunk::try_from(body) {
        Ok(chunk) => {
            state
                .run(move |server| {
                    BulkApi::new(server).create_partitions(&params.repository, chunk)
                })
                .await
        }
        Err(e) => Err(e),
    };
    version_reply(result)
}

/// Delete partitions by root ID.
pub async fn delete_partitions_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
    Json(ids): Json<Vec<String>>,
) -> impl IntoResponse {
    let result = state
        .run(move |server| BulkApi::new(server).delete_partitions(&params.repository, &ids))
        .await;
    version_reply(result)
}

/// Store a chunk.
pub async fn store_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
    Json(body): Json<ChunkJson>,
) -> impl IntoResponse {
    let result = match Chunk::try_from(body) {
        Ok(chunk) => {
            state
                .run(move |server| BulkApi::new(server).store(&params.repository, chunk))
                .await
        }
        Err(e) => Err(e),
    };
    version_reply(result)
}

/// Retrieve subtrees; unknown IDs are listed in `unknown`.
pub async fn retrieve_handler(
    State(state): State<AppState>,
    Query(params): Query<RetrieveParams>,
    Json(request): Json<RetrieveRequest>,
) -> impl IntoResponse {
    let depth = params.depth_limit.unwrap_or(i64::MAX);
    let result = state
        .run(move |server| BulkApi::new(server).retrieve(&params.repository, &request.ids, depth))
        .await;

    match result {
        Ok(retrieved) => (
            StatusCode::OK,
            Json(
                BulkResponse::success(ChunkJson::from(&retrieved.chunk))
                    .with_unknown(retrieved.unknown),
            ),
        ),
        Err(e) => (status_for(&e), Json(BulkResponse::error(e.to_string()))),
    }
}

/// Allocate fresh node IDs.
pub async fn ids_handler(
    State(state): State<AppState>,
    Query(params): Query<IdsParams>,
) -> impl IntoResponse {
    let result = state
        .run(move |server| BulkApi::new(server).ids(&params.repository, params.count))
        .await;
    reply(result)
}

// =============================================================================
// INSPECTION HANDLERS
// =============================================================================

/// Node IDs grouped by classifier.
pub async fn nodes_by_classifier_handler(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_INSPECTION_LIMIT);
    let result = state
        .run(move |server| server.nodes_by_classifier(&params.repository, limit))
        .await
        .map(|groups| {
            groups
                .into_iter()
                .map(ClassifierCountJson::from)
                .collect::<Vec<_>>()
        });
    reply(result)
}

/// Node IDs grouped by language.
pub async fn nodes_by_language_handler(
    State(state): State<AppState>,
    Query(params): Query<LimitParams>,
) -> impl IntoResponse {
    let limit = params.limit.unwrap_or(DEFAULT_INSPECTION_LIMIT);
    let result = state
        .run(move |server| server.nodes_by_language(&params.repository, limit))
        .await
        .map(|groups| {
            groups
                .into_iter()
                .map(LanguageCountJson::from)
                .collect::<Vec<_>>()
        });
    reply(result)
}

/// Per-partition summaries (root classifier, name, size).
pub async fn partitions_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
) -> impl IntoResponse {
    let result: Result<Vec<PartitionSummary>, CanopyError> = state
        .run(move |server| server.partition_summaries(&params.repository))
        .await;
    reply(result)
}

/// Repository metrics.
pub async fn metrics_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
) -> impl IntoResponse {
    let result: Result<RepositoryMetrics, CanopyError> = state
        .run(move |server| server.metrics(&params.repository))
        .await;
    reply(result)
}

// =============================================================================
// ADMIN HANDLERS
// =============================================================================

/// List repositories.
pub async fn repositories_handler(State(state): State<AppState>) -> impl IntoResponse {
    let result = state
        .run(|server| {
            Ok(server
                .list_repositories()
                .iter()
                .map(RepositoryJson::from)
                .collect::<Vec<_>>())
        })
        .await;
    reply(result)
}

/// Create a repository.
pub async fn create_repository_handler(
    State(state): State<AppState>,
    Json(request): Json<CreateRepositoryRequest>,
) -> impl IntoResponse {
    let name = request.name.clone();
    let result = state
        .run(move |server| server.create_repository(request.into()))
        .await
        .map(|()| name);
    reply(result)
}

/// Delete a repository.
pub async fn delete_repository_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
) -> impl IntoResponse {
    let name = params.repository.clone();
    let result = state
        .run(move |server| server.delete_repository(&params.repository))
        .await
        .map(|()| name);
    reply(result)
}

/// Audit every repository.
pub async fn check_consistency_handler(State(state): State<AppState>) -> impl IntoResponse {
    let result: Result<BTreeMap<String, ValidationResult>, CanopyError> =
        state.run(|server| Ok(server.check_consistency())).await;
    reply(result)
}

/// Export a repository snapshot with the canonical checksum of its content.
pub async fn export_handler(
    State(state): State<AppState>,
    Query(params): Query<RepositoryParams>,
) -> impl IntoResponse {
    let result = state
        .run(move |server| {
            let bytes = server.export_snapshot(&params.repository)?;
            let content = repository_from_bytes(&bytes)?.retrieve_all();
            let checksum = canonical_checksum(&content)?;
            let hash = canonical_crypto_hash(&content)?;
            Ok(ExportJson::new(&bytes, checksum, hash))
        })
        .await;
    reply(result)
}
