//! Command-line interface for shelf-scan.
//!
//! This module provides CLI commands for configuring libraries, running scan
//! jobs and listing the catalog.

mod commands;

pub use commands::{Cli, Commands, run_command};
