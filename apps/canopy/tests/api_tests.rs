//! Integration tests for the Canopy HTTP API.
//!
//! Uses axum-test to drive the router without starting a real server.

// Allow unwrap and panic in tests - these are standard for test code
#![allow(clippy::unwrap_used, clippy::panic)]

use axum::http::{HeaderValue, StatusCode, header};
use axum_test::TestServer;
use base64::Engine;
use canopy::api::{
    AppState, BulkResponse, ChunkJson, ClassifierCountJson, ExportJson, HealthResponse,
    RepositoryJson, VersionJson, create_router,
};
use canopy::config::{ApiSettings, DEFAULT_BODY_LIMIT};
use canopy_core::{
    Builtins, RepositoryMetrics, RepositoryServer, ValidationResult, primitives::DEFAULT_REPOSITORY,
};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

// =============================================================================
// HELPER FUNCTIONS
// =============================================================================

fn settings() -> ApiSettings {
    ApiSettings {
        rate_limit: 0,
        cors_origins: None,
        body_limit_bytes: DEFAULT_BODY_LIMIT,
        api_key: None,
    }
}

fn in_memory() -> RepositoryServer {
    let server = RepositoryServer::new(Arc::new(Builtins::lioncore()));
    server.ensure_default_repository().unwrap();
    server
}

fn test_server_for(server: RepositoryServer, settings: &ApiSettings) -> TestServer {
    TestServer::new(create_router(AppState::new(server), settings)).unwrap()
}

/// A fresh in-memory server with the default repository.
fn create_test_server() -> TestServer {
    test_server_for(in_memory(), &settings())
}

fn mp(key: &str) -> Value {
    json!({"language": "library", "version": "1", "key": key})
}

fn book(id: &str, parent: &str, title: &str) -> Value {
    json!({
        "id": id,
        "classifier": mp("Book"),
        "properties": [{"property": mp("title"), "value": title}],
        "containments": [],
        "references": [],
        "annotations": [],
        "parent": parent
    })
}

fn library(id: &str, books: &[&str]) -> Value {
    json!({
        "id": id,
        "classifier": mp("Library"),
        "properties": [{"property": mp("name"), "value": "City"}],
        "containments": [{"containment": mp("books"), "children": books}],
        "references": [],
        "annotations": [],
        "parent": null
    })
}

fn chunk(nodes: Vec<Value>) -> Value {
    json!({
        "serializationFormatVersion": "2024.1",
        "languages": [{"key": "library", "version": "1"}],
        "nodes": nodes
    })
}

fn library_chunk() -> Value {
    chunk(vec![
        library("lib", &["b1", "b2"]),
        book("b1", "lib", "Dune"),
        book("b2", "lib", "Emma"),
    ])
}

async fn create_library(server: &TestServer) {
    let response = server
        .post("/bulk/createPartitions?repository=default")
        .json(&library_chunk())
        .await;
    response.assert_status_ok();
}

async fn retrieve(server: &TestServer, ids: &[&str], depth: Option<i64>) -> BulkResponse<ChunkJson> {
    let url = match depth {
        Some(d) => format!("/bulk/retrieve?repository=default&depthLimit={}", d),
        None => "/bulk/retrieve?repository=default".to_string(),
    };
    server.post(&url).json(&json!({"ids": ids})).await.json()
}

fn node_ids(chunk: &ChunkJson) -> Vec<String> {
    let mut ids: Vec<String> = chunk.nodes.iter().map(|n| n.id.clone()).collect();
    ids.sort();
    ids
}

// =============================================================================
// HEALTH ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_health_endpoint() {
    let server = create_test_server();

    let response = server.get("/health").await;

    response.assert_status_ok();
    let health: HealthResponse = response.json();
    assert_eq!(health.status, "ok");
    assert_eq!(health.version, env!("CARGO_PKG_VERSION"));
}

// =============================================================================
// BULK ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_create_partitions_then_list() {
    let server = create_test_server();

    let response = server
        .post("/bulk/createPartitions?repository=default")
        .json(&library_chunk())
        .await;
    response.assert_status_ok();
    let body: BulkResponse<VersionJson> = response.json();
    assert!(body.success);
    assert_eq!(body.data.unwrap().version, "v-1");

    let listed: BulkResponse<Vec<String>> =
        server.post("/bulk/listPartitions?repository=default").await.json();
    assert_eq!(listed.data.unwrap(), vec!["lib".to_string()]);
}

#[tokio::test]
async fn test_repository_defaults_to_default() {
    let server = create_test_server();
    create_library(&server).await;

    let listed: BulkResponse<Vec<String>> = server.post("/bulk/listPartitions").await.json();
    assert_eq!(listed.data.unwrap(), vec!["lib".to_string()]);
}

#[tokio::test]
async fn test_retrieve_round_trip_unbounded() {
    let server = create_test_server();
    create_library(&server).await;

    let body = retrieve(&server, &["lib"], None).await;

    assert!(body.success);
    assert!(body.unknown.is_none());
    let chunk = body.data.unwrap();
    assert_eq!(chunk.serialization_format_version, "2024.1");
    assert_eq!(node_ids(&chunk), vec!["b1", "b2", "lib"]);

    let dune = chunk.nodes.iter().find(|n| n.id == "b1").unwrap();
    assert_eq!(dune.parent.as_deref(), Some("lib"));
    assert_eq!(dune.properties[0].value.as_deref(), Some("Dune"));
}

#[tokio::test]
async fn test_retrieve_depth_zero_returns_roots_only() {
    let server = create_test_server();
    create_library(&server).await;

    let body = retrieve(&server, &["lib"], Some(0)).await;

    assert_eq!(node_ids(&body.data.unwrap()), vec!["lib"]);
}

#[tokio::test]
async fn test_retrieve_reports_unknown_ids() {
    let server = create_test_server();
    create_library(&server).await;

    let body = retrieve(&server, &["b1", "ghost"], None).await;

    assert!(body.success);
    assert_eq!(node_ids(&body.data.unwrap()), vec!["b1"]);
    assert_eq!(body.unknown.unwrap(), vec!["ghost".to_string()]);
}

#[tokio::test]
async fn test_retrieve_negative_depth_rejected() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server
        .post("/bulk/retrieve?repository=default&depthLimit=-1")
        .json(&json!({"ids": ["lib"]}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body: BulkResponse<Value> = response.json();
    assert!(!body.success);
    assert!(body.error.is_some());
}

#[tokio::test]
async fn test_store_overwrite_sweeps_removed_child() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server
        .post("/bulk/store?repository=default")
        .json(&chunk(vec![library("lib", &["b1"])]))
        .await;
    response.assert_status_ok();
    let body: BulkResponse<VersionJson> = response.json();
    assert_eq!(body.data.unwrap().version, "v-2");

    let body = retrieve(&server, &["lib", "b2"], None).await;
    assert_eq!(node_ids(&body.data.unwrap()), vec!["b1", "lib"]);
    assert_eq!(body.unknown.unwrap(), vec!["b2".to_string()]);
}

#[tokio::test]
async fn test_store_dangling_child_rejected_without_change() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server
        .post("/bulk/store?repository=default")
        .json(&chunk(vec![library("lib", &["b1", "b2", "missing"])]))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let body = retrieve(&server, &["lib"], None).await;
    assert_eq!(node_ids(&body.data.unwrap()), vec!["b1", "b2", "lib"]);
}

#[tokio::test]
async fn test_store_unregistered_root_rejected() {
    let server = create_test_server();

    let response = server
        .post("/bulk/store?repository=default")
        .json(&chunk(vec![library("stray", &[])]))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_format_version_mismatch_rejected() {
    let server = create_test_server();
    let mut old = library_chunk();
    old["serializationFormatVersion"] = json!("2023.1");

    let response = server
        .post("/bulk/createPartitions?repository=default")
        .json(&old)
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
    let listed: BulkResponse<Vec<String>> = server.post("/bulk/listPartitions").await.json();
    assert!(listed.data.unwrap().is_empty());
}

#[tokio::test]
async fn test_unsupported_format_version_rejected() {
    let server = create_test_server();
    let mut bad = library_chunk();
    bad["serializationFormatVersion"] = json!("1.0");

    let response = server.post("/bulk/store").json(&bad).await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_delete_partitions_cascades() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server
        .post("/bulk/deletePartitions?repository=default")
        .json(&json!(["lib"]))
        .await;
    response.assert_status_ok();

    let body = retrieve(&server, &["lib", "b1"], None).await;
    assert!(body.data.unwrap().nodes.is_empty());
    assert_eq!(body.unknown.unwrap().len(), 2);
}

#[tokio::test]
async fn test_delete_unknown_partition_not_found() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server
        .post("/bulk/deletePartitions?repository=default")
        .json(&json!(["lib", "nope"]))
        .await;

    response.assert_status(StatusCode::NOT_FOUND);
    let listed: BulkResponse<Vec<String>> = server.post("/bulk/listPartitions").await.json();
    assert_eq!(listed.data.unwrap(), vec!["lib".to_string()]);
}

#[tokio::test]
async fn test_ids_are_fresh() {
    let server = create_test_server();

    let first: BulkResponse<Vec<String>> = server
        .post("/bulk/ids?repository=default&count=3")
        .await
        .json();
    let second: BulkResponse<Vec<String>> = server
        .post("/bulk/ids?repository=default&count=2")
        .await
        .json();

    let mut all = first.data.unwrap();
    all.extend(second.data.unwrap());
    assert_eq!(all, vec!["id-1", "id-2", "id-3", "id-4", "id-5"]);
}

#[tokio::test]
async fn test_ids_negative_count_rejected() {
    let server = create_test_server();

    let response = server.post("/bulk/ids?repository=default&count=-1").await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_invalid_json_body() {
    let server = create_test_server();

    let response = server
        .post("/bulk/store")
        .bytes(bytes::Bytes::from("not valid json"))
        .content_type("application/json")
        .await;

    assert!(response.status_code().is_client_error());
}

#[tokio::test]
async fn test_bulk_routes_are_post_only() {
    let server = create_test_server();

    let response = server.get("/bulk/listPartitions").await;

    response.assert_status(StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_unknown_repository_not_found() {
    let server = create_test_server();

    let response = server.post("/bulk/listPartitions?repository=nope").await;

    response.assert_status(StatusCode::NOT_FOUND);
    let body: BulkResponse<Vec<String>> = response.json();
    assert!(!body.success);
}

// =============================================================================
// INSPECTION ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_metrics() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server.get("/inspection/metrics?repository=default").await;

    response.assert_status_ok();
    let body: BulkResponse<RepositoryMetrics> = response.json();
    let metrics = body.data.unwrap();
    assert_eq!(metrics.node_count, 3);
    assert_eq!(metrics.partition_count, 1);
    assert_eq!(metrics.version, 1);
}

#[tokio::test]
async fn test_nodes_by_classifier_respects_limit() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server
        .get("/inspection/nodesByClassifier?repository=default&limit=1")
        .await;

    response.assert_status_ok();
    let body: BulkResponse<Vec<ClassifierCountJson>> = response.json();
    let rows = body.data.unwrap();
    let books = rows.iter().find(|r| r.classifier == "Book").unwrap();
    assert_eq!(books.size, 2);
    assert_eq!(books.ids.len(), 1);
    assert_eq!(books.language, "library");
}

// =============================================================================
// ADMIN ENDPOINT TESTS
// =============================================================================

#[tokio::test]
async fn test_create_and_delete_repository() {
    let server = create_test_server();

    let response = server
        .post("/admin/createRepository")
        .json(&json!({"name": "legacy", "formatVersion": "2023.1"}))
        .await;
    response.assert_status_ok();

    let listed: BulkResponse<Vec<RepositoryJson>> = server.get("/admin/repositories").await.json();
    let names: Vec<String> = listed.data.unwrap().into_iter().map(|r| r.name).collect();
    assert_eq!(names, vec![DEFAULT_REPOSITORY.to_string(), "legacy".to_string()]);

    let response = server.post("/admin/deleteRepository?repository=legacy").await;
    response.assert_status_ok();
    let response = server.post("/bulk/listPartitions?repository=legacy").await;
    response.assert_status(StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_duplicate_repository_conflict() {
    let server = create_test_server();

    let response = server
        .post("/admin/createRepository")
        .json(&json!({"name": DEFAULT_REPOSITORY}))
        .await;

    response.assert_status(StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_history_repository_rejected() {
    let server = create_test_server();

    let response = server
        .post("/admin/createRepository")
        .json(&json!({"name": "h", "history": "enabled"}))
        .await;

    response.assert_status(StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_repositories_are_isolated() {
    let server = create_test_server();
    server
        .post("/admin/createRepository")
        .json(&json!({"name": "other"}))
        .await
        .assert_status_ok();
    create_library(&server).await;

    let listed: BulkResponse<Vec<String>> = server
        .post("/bulk/listPartitions?repository=other")
        .await
        .json();
    assert!(listed.data.unwrap().is_empty());
}

#[tokio::test]
async fn test_check_consistency_clean() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server.get("/admin/checkConsistency").await;

    response.assert_status_ok();
    let body: BulkResponse<BTreeMap<String, ValidationResult>> = response.json();
    let results = body.data.unwrap();
    assert!(results[DEFAULT_REPOSITORY].is_successful());
}

#[tokio::test]
async fn test_export_snapshot_imports_elsewhere() {
    let server = create_test_server();
    create_library(&server).await;

    let response = server.get("/admin/export?repository=default").await;
    response.assert_status_ok();
    let body: BulkResponse<ExportJson> = response.json();
    let export = body.data.unwrap();
    assert_eq!(export.hash.len(), 64);

    let bytes = base64::engine::general_purpose::STANDARD
        .decode(export.data)
        .unwrap();
    let other = RepositoryServer::new(Arc::new(Builtins::lioncore()));
    let name = other.import_snapshot(&bytes).unwrap();
    assert_eq!(other.metrics(&name).unwrap().node_count, 3);
}

#[tokio::test]
async fn test_export_checksum_is_stable() {
    let server = create_test_server();
    create_library(&server).await;

    let first: BulkResponse<ExportJson> = server.get("/admin/export").await.json();
    // Resubmitting identical content bumps the version but not the checksum.
    server
        .post("/bulk/store")
        .json(&library_chunk())
        .await
        .assert_status_ok();
    let second: BulkResponse<ExportJson> = server.get("/admin/export").await.json();

    assert_eq!(first.data.unwrap().checksum, second.data.unwrap().checksum);
}

// =============================================================================
// MIDDLEWARE TESTS
// =============================================================================

#[tokio::test]
async fn test_rate_limit_rejects_burst() {
    let limited = ApiSettings {
        rate_limit: 1,
        ..settings()
    };
    let server = test_server_for(in_memory(), &limited);

    server.get("/health").await.assert_status_ok();
    server
        .get("/health")
        .await
        .assert_status(StatusCode::TOO_MANY_REQUESTS);
}

fn create_auth_test_server(api_key: &str) -> TestServer {
    let secured = ApiSettings {
        api_key: Some(api_key.to_string()),
        ..settings()
    };
    test_server_for(in_memory(), &secured)
}

#[tokio::test]
async fn test_auth_missing_header_rejected() {
    let server = create_auth_test_server("secret-key");

    let response = server.post("/bulk/listPartitions").await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_auth_health_always_allowed() {
    let server = create_auth_test_server("secret-key");

    server.get("/health").await.assert_status_ok();
}

#[tokio::test]
async fn test_auth_valid_bearer_token() {
    let server = create_auth_test_server("secret-key");

    let response = server
        .post("/bulk/listPartitions")
        .add_header(
            header::AUTHORIZATION,
            "Bearer secret-key".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status_ok();
}

#[tokio::test]
async fn test_auth_wrong_key_rejected() {
    let server = create_auth_test_server("secret-key");

    let response = server
        .post("/bulk/listPartitions")
        .add_header(
            header::AUTHORIZATION,
            "Bearer secret-kez".parse::<HeaderValue>().unwrap(),
        )
        .await;

    response.assert_status(StatusCode::UNAUTHORIZED);
}

// =============================================================================
// PERSISTENT BACKEND TESTS
// =============================================================================

fn persistent(path: &Path) -> RepositoryServer {
    let server = RepositoryServer::open(path, Arc::new(Builtins::lioncore())).unwrap();
    server.ensure_default_repository().unwrap();
    server
}

#[tokio::test]
async fn test_persistent_backend_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("canopy.redb");

    {
        let server = test_server_for(persistent(&path), &settings());
        create_library(&server).await;
        server
            .post("/bulk/store")
            .json(&chunk(vec![library("lib", &["b2"])]))
            .await
            .assert_status_ok();
    }

    let server = test_server_for(persistent(&path), &settings());
    let body = retrieve(&server, &["lib", "b1"], None).await;
    assert_eq!(node_ids(&body.data.unwrap()), vec!["b2", "lib"]);
    assert_eq!(body.unknown.unwrap(), vec!["b1".to_string()]);

    let metrics: BulkResponse<RepositoryMetrics> = server.get("/inspection/metrics").await.json();
    assert_eq!(metrics.data.unwrap().version, 2);
}
