//! # Canopy - Model Repository Server
//!
//! The main binary for the Canopy repository engine.
//!
//! This application provides:
//! - HTTP bulk API server (axum-based)
//! - CLI interface for repository operations
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              apps/canopy (THE BINARY)        │
//! │                                              │
//! │   ┌─────────────┐        ┌─────────────┐     │
//! │   │    CLI      │        │  HTTP API   │     │
//! │   │   (clap)    │        │   (axum)    │     │
//! │   └──────┬──────┘        └──────┬──────┘     │
//! │          └───────────┬──────────┘            │
//! │                      ▼                       │
//! │              ┌───────────────┐               │
//! │              │  canopy-core  │               │
//! │              │ (THE ENGINE)  │               │
//! │              └───────────────┘               │
//! └──────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//!
//! ```bash
//! # Start the HTTP server
//! canopy server --host 0.0.0.0 --port 8080
//!
//! # CLI operations
//! canopy status
//! canopy create-partitions -f library.json
//! canopy retrieve --ids lib-1 --depth 2
//! ```

use canopy::cli;
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// =============================================================================
// APPLICATION ENTRY POINT
// =============================================================================

#[tokio::main]
async fn main() {
    // CANOPY_LOG_FORMAT=json enables machine-parseable output.
    let log_format = std::env::var("CANOPY_LOG_FORMAT").unwrap_or_else(|_| "text".to_string());

    let cli = cli::Cli::parse();

    let default_filter = if cli.verbose {
        "canopy=debug,canopy_core=debug,tower_http=debug"
    } else {
        "canopy=info,canopy_core=info,tower_http=debug"
    };
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| default_filter.into());

    match log_format.as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(filter)
                .with(tracing_subscriber::fmt::layer())
                .init();
        }
    }

    if !cli.quiet && !cli.json_mode {
        print_banner();
    }

    if let Err(e) = cli::execute(cli).await {
        tracing::error!("Error: {}", e);
        std::process::exit(1);
    }
}

/// Print the startup banner.
fn print_banner() {
    println!(
        r#"
   ___ __ _ _ __   ___  _ __  _   _
  / __/ _` | '_ \ / _ \| '_ \| | | |
 | (_| (_| | | | | (_) | |_) | |_| |
  \___\__,_|_| |_|\___/| .__/ \__, |
                       |_|    |___/

  Model Repository Server v{}
"#,
        env!("CARGO_PKG_VERSION")
    );
}
