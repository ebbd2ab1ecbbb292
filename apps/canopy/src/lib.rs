//! # canopy
//!
//! The Canopy application: HTTP bulk API, CLI and configuration on top of
//! `canopy-core`. The binary in `main.rs` is a thin wrapper; the library
//! target lets integration tests drive the router directly.

pub mod api;
pub mod cli;
pub mod config;
