//! # CLI Command Implementations
//!
//! This module contains the actual implementations of CLI commands.

use super::Runtime;
use crate::api::{self, ChunkJson, RepositoryJson};
use crate::config::Backend;
use canopy_core::{
    BulkApi, Builtins, CanopyError, FormatVersion, RepositoryConfiguration, RepositoryServer,
    Severity, canonical::export_canonical, canonical_checksum,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;

// =============================================================================
// FILE SIZE LIMITS
// =============================================================================

/// Maximum chunk file size for store and create-partitions (100 MB).
const MAX_CHUNK_FILE_SIZE: u64 = 100 * 1024 * 1024;

/// Maximum snapshot file size for import (500 MB).
const MAX_IMPORT_FILE_SIZE: u64 = 500 * 1024 * 1024;

fn validate_file_size(path: &Path, max_size: u64) -> Result<(), CanopyError> {
    let metadata = std::fs::metadata(path)
        .map_err(|e| CanopyError::IoError(format!("Cannot read file metadata: {}", e)))?;

    if metadata.len() > max_size {
        return Err(CanopyError::InvalidRequest(format!(
            "File size {} bytes exceeds maximum allowed {} bytes",
            metadata.len(),
            max_size
        )));
    }
    Ok(())
}

/// Resolve an input path: it must exist and be a regular file.
fn validate_file_path(path: &Path) -> Result<PathBuf, CanopyError> {
    let canonical = path.canonicalize().map_err(|e| {
        CanopyError::IoError(format!("Invalid file path '{}': {}", path.display(), e))
    })?;

    if !canonical.is_file() {
        return Err(CanopyError::IoError(format!(
            "Path '{}' is not a regular file",
            path.display()
        )));
    }

    Ok(canonical)
}

/// Resolve an output path: its parent must be an existing directory.
fn validate_output_path(path: &Path) -> Result<PathBuf, CanopyError> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };

    let canonical_parent = parent.canonicalize().map_err(|e| {
        CanopyError::IoError(format!(
            "Invalid output directory '{}': {}",
            parent.display(),
            e
        ))
    })?;

    if !canonical_parent.is_dir() {
        return Err(CanopyError::IoError(format!(
            "Output directory '{}' is not a valid directory",
            parent.display()
        )));
    }

    let filename = path
        .file_name()
        .ok_or_else(|| CanopyError::IoError("Output path has no filename".to_string()))?;

    Ok(canonical_parent.join(filename))
}

fn read_input(path: &Path, max_size: u64) -> Result<Vec<u8>, CanopyError> {
    let validated = validate_file_path(path)?;
    validate_file_size(&validated, max_size)?;
    std::fs::read(&validated).map_err(|e| CanopyError::IoError(format!("Read file: {}", e)))
}

fn print_json(value: &impl serde::Serialize) -> Result<(), CanopyError> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| CanopyError::SerializationError(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

// =============================================================================
// SERVER OPENING
// =============================================================================

/// Open the server for the resolved backend without creating anything.
fn open_bare(runtime: &Runtime) -> Result<RepositoryServer, CanopyError> {
    let builtins = Arc::new(Builtins::lioncore());
    match runtime.backend {
        Backend::Memory => Ok(RepositoryServer::new(builtins)),
        Backend::Redb => RepositoryServer::open(&runtime.database, builtins),
    }
}

/// Open the server for the resolved backend.
///
/// Repositories named in the config file are created if missing; the
/// default repository is created when the server holds none.
pub fn open_server(runtime: &Runtime) -> Result<RepositoryServer, CanopyError> {
    let server = open_bare(runtime)?;

    for configuration in runtime.config.repository_configurations() {
        match server.create_repository(configuration) {
            Ok(()) | Err(CanopyError::RepositoryAlreadyExists(_)) => {}
            Err(e) => return Err(e),
        }
    }
    if server.ensure_default_repository()? {
        tracing::info!("created default repository");
    }
    Ok(server)
}

// =============================================================================
// SERVER COMMAND
// =============================================================================

/// Start the HTTP server.
pub async fn cmd_server(
    runtime: &Runtime,
    host: Option<String>,
    port: Option<u16>,
) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    let host = host.unwrap_or_else(|| runtime.config.server.host.clone());
    let port = port.unwrap_or(runtime.config.server.port);
    let settings = runtime.config.api_settings();

    println!("Canopy Repository Server Starting...");
    println!();
    println!("Configuration:");
    println!("  Host:         {}", host);
    println!("  Port:         {}", port);
    println!("  Backend:      {}", runtime.backend);
    println!("  Database:     {:?}", runtime.database);
    println!("  Repositories: {}", server.list_repositories().len());
    println!();
    println!("Endpoints:");
    println!("  POST /bulk/{{listPartitions,createPartitions,deletePartitions,store,retrieve,ids}}");
    println!("  GET  /inspection/{{nodesByClassifier,nodesByLanguage,partitions,metrics}}");
    println!("  *    /admin/{{repositories,createRepository,deleteRepository,checkConsistency,export}}");
    println!("  GET  /health");
    println!();
    println!("Press Ctrl+C to stop");
    println!();

    let addr = format!("{}:{}", host, port);
    api::run_server(&addr, server, &settings).await
}

// =============================================================================
// INIT COMMAND
// =============================================================================

/// Initialize a new database.
pub fn cmd_init(runtime: &Runtime, force: bool) -> Result<(), CanopyError> {
    if runtime.backend == Backend::Memory {
        return Err(CanopyError::InvalidRequest(
            "init requires the redb backend".to_string(),
        ));
    }
    if runtime.database.exists() {
        if !force {
            return Err(CanopyError::InvalidRequest(
                "Database already exists. Use --force to overwrite.".to_string(),
            ));
        }
        std::fs::remove_file(&runtime.database)
            .map_err(|e| CanopyError::IoError(format!("Remove database: {}", e)))?;
    }

    let server = open_server(runtime)?;
    println!(
        "Initialized new redb database at {:?} ({} repositories)",
        runtime.database,
        server.list_repositories().len()
    );
    Ok(())
}

// =============================================================================
// REPOSITORY COMMANDS
// =============================================================================

/// List repositories.
pub fn cmd_repos(runtime: &Runtime) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    let repositories = server.list_repositories();

    if runtime.json_mode {
        let rows: Vec<RepositoryJson> = repositories.iter().map(RepositoryJson::from).collect();
        return print_json(&rows);
    }

    println!("Repositories");
    println!("============");
    for configuration in &repositories {
        let version = server.repository_version(&configuration.name)?;
        println!(
            "  {:<24} format {}  version {}",
            configuration.name, configuration.format_version, version
        );
    }
    Ok(())
}

/// Create a repository.
pub fn cmd_create_repo(
    runtime: &Runtime,
    name: &str,
    format_version: FormatVersion,
) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    server.create_repository(
        RepositoryConfiguration::new(name).with_format_version(format_version),
    )?;
    println!("Created repository {} (format {})", name, format_version);
    Ok(())
}

/// Delete a repository.
pub fn cmd_delete_repo(runtime: &Runtime, name: &str) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    server.delete_repository(name)?;
    println!("Deleted repository {}", name);
    Ok(())
}

// =============================================================================
// STATUS COMMAND
// =============================================================================

/// Show repository metrics.
pub fn cmd_status(runtime: &Runtime) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    let metrics = server.metrics(&runtime.repository)?;

    if runtime.json_mode {
        let output = serde_json::json!({
            "database": runtime.database.to_string_lossy(),
            "backend": runtime.backend.to_string(),
            "repository": runtime.repository,
            "metrics": metrics,
        });
        return print_json(&output);
    }

    println!("Canopy Repository Status");
    println!("========================");
    println!("Database:   {:?}", runtime.database);
    println!("Backend:    {}", runtime.backend);
    println!("Repository: {}", runtime.repository);
    println!();
    println!("Version:           v-{}", metrics.version);
    println!("Nodes:             {}", metrics.node_count);
    println!("Partitions:        {}", metrics.partition_count);
    println!("Annotations:       {}", metrics.annotation_count);
    println!(
        "References:        {} ({} dangling)",
        metrics.reference_count, metrics.dangling_reference_count
    );
    println!("Max Depth:         {}", metrics.max_depth);

    Ok(())
}

// =============================================================================
// CHECK COMMAND
// =============================================================================

/// Audit every repository. Fails if any repository has an error-level issue.
pub fn cmd_check(runtime: &Runtime) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    let results = server.check_consistency();

    if runtime.json_mode {
        print_json(&results)?;
    } else {
        for (name, result) in &results {
            if result.issues.is_empty() {
                println!("{}: consistent", name);
                continue;
            }
            println!("{}: {} issue(s)", name, result.issues.len());
            for issue in &result.issues {
                println!("  {}", issue);
            }
        }
    }

    let failing = results
        .values()
        .flat_map(|r| r.issues.iter())
        .filter(|i| i.severity == Severity::Error)
        .count();
    if failing > 0 {
        return Err(CanopyError::InvalidRequest(format!(
            "consistency check found {} error(s)",
            failing
        )));
    }
    Ok(())
}

// =============================================================================
// WRITE COMMANDS
// =============================================================================

/// Store a chunk file.
pub fn cmd_store(runtime: &Runtime, file: &Path) -> Result<(), CanopyError> {
    let chunk = ChunkJson::parse(&read_input(file, MAX_CHUNK_FILE_SIZE)?)?;
    let count = chunk.len();

    let server = open_server(runtime)?;
    let version = BulkApi::new(&server).store(&runtime.repository, chunk)?;
    println!("Stored {} node(s) in {} -> {}", count, runtime.repository, version);
    Ok(())
}

/// Create partitions from a chunk file.
pub fn cmd_create_partitions(runtime: &Runtime, file: &Path) -> Result<(), CanopyError> {
    let chunk = ChunkJson::parse(&read_input(file, MAX_CHUNK_FILE_SIZE)?)?;
    let count = chunk.len();

    let server = open_server(runtime)?;
    let version = BulkApi::new(&server).create_partitions(&runtime.repository, chunk)?;
    println!(
        "Created partitions from {} node(s) in {} -> {}",
        count, runtime.repository, version
    );
    Ok(())
}

// =============================================================================
// READ COMMANDS
// =============================================================================

/// Retrieve subtrees as a JSON chunk.
pub fn cmd_retrieve(
    runtime: &Runtime,
    ids: &str,
    depth: Option<i64>,
    output: Option<&Path>,
) -> Result<(), CanopyError> {
    let ids: Vec<String> = ids
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect();

    let server = open_server(runtime)?;
    let retrieved =
        BulkApi::new(&server).retrieve(&runtime.repository, &ids, depth.unwrap_or(i64::MAX))?;
    for id in &retrieved.unknown {
        tracing::warn!(id = id.as_str(), "unknown node id");
    }

    let text = serde_json::to_string_pretty(&ChunkJson::from(&retrieved.chunk))
        .map_err(|e| CanopyError::SerializationError(e.to_string()))?;
    match output {
        Some(path) => {
            let validated = validate_output_path(path)?;
            std::fs::write(&validated, text.as_bytes())
                .map_err(|e| CanopyError::IoError(format!("Write file: {}", e)))?;
            println!("Wrote {} node(s) to {:?}", retrieved.chunk.len(), validated);
        }
        None => println!("{}", text),
    }
    Ok(())
}

/// List partitions with their root classifier, name and size.
pub fn cmd_partitions(runtime: &Runtime) -> Result<(), CanopyError> {
    let server = open_server(runtime)?;
    let summaries = server.partition_summaries(&runtime.repository)?;

    if runtime.json_mode {
        return print_json(&summaries);
    }

    if summaries.is_empty() {
        println!("No partitions in {}", runtime.repository);
        return Ok(());
    }
    for summary in &summaries {
        println!(
            "  {:<24} {:<32} {:>8} node(s)  {}",
            summary.id,
            summary.classifier,
            summary.size,
            summary.name.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

// =============================================================================
// EXPORT / IMPORT COMMANDS
// =============================================================================

/// Export a repository.
///
/// - `snapshot`: the full repository state, importable with `import`
/// - `canonical`: content only, in canonical order with a checksum header
/// - `json`: content only, as a LionWeb JSON chunk
pub fn cmd_export(runtime: &Runtime, output: &Path, format: &str) -> Result<(), CanopyError> {
    let validated_output = validate_output_path(output)?;
    let server = open_server(runtime)?;

    let data = match format {
        "snapshot" => server.export_snapshot(&runtime.repository)?,
        "canonical" => {
            let content = server.retrieve_all(&runtime.repository)?;
            println!("Checksum: {}", canonical_checksum(&content)?);
            export_canonical(&content)?
        }
        "json" => {
            let content = server.retrieve_all(&runtime.repository)?;
            serde_json::to_vec_pretty(&ChunkJson::from(&content))
                .map_err(|e| CanopyError::SerializationError(e.to_string()))?
        }
        _ => {
            return Err(CanopyError::InvalidRequest(format!(
                "Unknown format: {}. Use: snapshot, canonical, json",
                format
            )));
        }
    };

    std::fs::write(&validated_output, &data)
        .map_err(|e| CanopyError::IoError(format!("Write file: {}", e)))?;

    println!("Exported {} bytes to {:?}", data.len(), validated_output);
    Ok(())
}

/// Import a repository snapshot.
pub fn cmd_import(runtime: &Runtime, input: &Path) -> Result<(), CanopyError> {
    let data = read_input(input, MAX_IMPORT_FILE_SIZE)?;

    // The snapshot may carry the default repository itself.
    let server = open_bare(runtime)?;
    let name = server.import_snapshot(&data)?;
    let result = server.validate_repository(&name)?;
    let metrics = server.metrics(&name)?;

    println!(
        "Imported repository {}: {} nodes, {} partitions",
        name, metrics.node_count, metrics.partition_count
    );
    if !result.is_successful() {
        println!("Warning: {} consistency issue(s); run `canopy check`", result.issues.len());
    }
    Ok(())
}
