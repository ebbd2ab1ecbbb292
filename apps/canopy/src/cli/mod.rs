//! # Canopy CLI Module
//!
//! This module implements the CLI interface for Canopy.
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `init` - Initialize a new database
//! - `repos` / `create-repo` / `delete-repo` - Repository administration
//! - `status` - Show repository metrics
//! - `check` - Run the consistency checker over every repository
//! - `store` / `create-partitions` - Write a JSON chunk file
//! - `retrieve` - Print subtrees as a JSON chunk
//! - `partitions` - List partitions with their sizes
//! - `export` / `import` - Repository snapshots

mod commands;

use crate::config::{Backend, CanopyConfig, DEFAULT_DATABASE};
use canopy_core::{CanopyError, FormatVersion, primitives::DEFAULT_REPOSITORY};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// Canopy - model repository server
///
/// Stores partitions of LionWeb model trees and keeps their containment
/// integrity while clients overwrite them with partial chunks.
#[derive(Parser, Debug)]
#[command(name = "canopy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Path to a TOML configuration file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the redb database [default: canopy.redb]
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend: "memory" or "redb" [default: redb]
    #[arg(short = 'B', long, global = true)]
    pub backend: Option<Backend>,

    /// Repository to operate on
    #[arg(short, long, global = true, default_value = DEFAULT_REPOSITORY)]
    pub repository: String,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available CLI commands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to [default: 127.0.0.1]
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to [default: 8080]
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Initialize a new database with the default repository
    Init {
        /// Overwrite an existing database
        #[arg(short, long)]
        force: bool,
    },

    /// List repositories
    Repos,

    /// Create a repository
    CreateRepo {
        /// Repository name
        name: String,

        /// Serialization format version (2023.1, 2024.1)
        #[arg(short = 'F', long, default_value = "2024.1")]
        format_version: FormatVersion,
    },

    /// Delete a repository and everything in it
    DeleteRepo {
        /// Repository name
        name: String,
    },

    /// Show repository metrics
    Status,

    /// Check every repository for integrity violations
    Check,

    /// Store a JSON chunk file (insert or replace nodes)
    Store {
        /// Path to the chunk file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Create partitions from a JSON chunk file
    CreatePartitions {
        /// Path to the chunk file
        #[arg(short, long)]
        file: PathBuf,
    },

    /// Retrieve subtrees and print them as a JSON chunk
    Retrieve {
        /// Root node IDs (comma-separated)
        #[arg(short, long)]
        ids: String,

        /// Depth limit (omit for unbounded)
        #[arg(short, long)]
        depth: Option<i64>,

        /// Write the chunk to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// List partitions with their sizes
    Partitions,

    /// Export a repository
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,

        /// Export format (snapshot, canonical, json)
        #[arg(short = 't', long, default_value = "snapshot")]
        format: String,
    },

    /// Import a repository snapshot
    Import {
        /// Input file path
        #[arg(short, long)]
        input: PathBuf,
    },
}

// =============================================================================
// RESOLVED SETTINGS
// =============================================================================

/// Storage settings after merging flags, config file and defaults.
#[derive(Debug, Clone)]
pub struct Runtime {
    pub config: CanopyConfig,
    pub backend: Backend,
    pub database: PathBuf,
    pub repository: String,
    pub json_mode: bool,
}

impl Runtime {
    /// Merge CLI flags over the config file. Flags win.
    pub fn resolve(cli: &Cli) -> Result<Self, CanopyError> {
        let config = CanopyConfig::load_optional(cli.config.as_deref())?;
        let backend = cli
            .backend
            .or(config.storage.backend)
            .unwrap_or_default();
        let database = cli
            .database
            .clone()
            .or_else(|| config.storage.database.clone())
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATABASE));

        Ok(Self {
            config,
            backend,
            database,
            repository: cli.repository.clone(),
            json_mode: cli.json_mode,
        })
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

/// Execute the CLI with parsed arguments.
pub async fn execute(cli: Cli) -> Result<(), CanopyError> {
    let runtime = Runtime::resolve(&cli)?;

    match cli.command {
        Some(Commands::Server { host, port }) => cmd_server(&runtime, host, port).await,
        Some(Commands::Init { force }) => cmd_init(&runtime, force),
        Some(Commands::Repos) => cmd_repos(&runtime),
        Some(Commands::CreateRepo {
            name,
            format_version,
        }) => cmd_create_repo(&runtime, &name, format_version),
        Some(Commands::DeleteRepo { name }) => cmd_delete_repo(&runtime, &name),
        Some(Commands::Check) => cmd_check(&runtime),
        Some(Commands::Store { file }) => cmd_store(&runtime, &file),
        Some(Commands::CreatePartitions { file }) => cmd_create_partitions(&runtime, &file),
        Some(Commands::Retrieve { ids, depth, output }) => {
            cmd_retrieve(&runtime, &ids, depth, output.as_deref())
        }
        Some(Commands::Partitions) => cmd_partitions(&runtime),
        Some(Commands::Export { output, format }) => cmd_export(&runtime, &output, &format),
        Some(Commands::Import { input }) => cmd_import(&runtime, &input),
        Some(Commands::Status) | None => cmd_status(&runtime),
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_parse() {
        let cli = Cli::try_parse_from([
            "canopy",
            "-B",
            "memory",
            "-r",
            "models",
            "retrieve",
            "--ids",
            "a,b",
            "--depth",
            "2",
        ])
        .expect("parse");

        assert_eq!(cli.backend, Some(Backend::Memory));
        assert_eq!(cli.repository, "models");
        assert!(matches!(
            cli.command,
            Some(Commands::Retrieve { depth: Some(2), .. })
        ));
    }

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::try_parse_from(["canopy", "-D", "x.redb", "status"]).expect("parse");
        let runtime = Runtime::resolve(&cli).expect("resolve");
        assert_eq!(runtime.backend, Backend::Redb);
        assert_eq!(runtime.database, PathBuf::from("x.redb"));
        assert_eq!(runtime.repository, DEFAULT_REPOSITORY);
    }

    #[test]
    fn bad_format_version_rejected() {
        let result = Cli::try_parse_from(["canopy", "create-repo", "m", "-F", "1999.1"]);
        assert!(result.is_err());
    }
}
