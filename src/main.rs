//! shelf-scan - ingestion core of a personal media-library cataloger.
//!
//! Walks configured libraries for ebooks (`.epub`), comic archives (`.cbz`)
//! and audiobooks (`.m4b`), merges metadata from file contents, naming
//! conventions and sidecar files, and records the result in a SQLite
//! catalog. Root-level files can be reorganized into per-book directories.

pub mod cli;
pub mod config;
pub mod cover;
pub mod db;
pub mod error;
pub mod library;
pub mod metadata;
pub mod model;
pub mod organizer;
pub mod resolve;
pub mod scanner;
pub mod sidecar;
#[cfg(test)]
pub mod test_utils;

use clap::Parser;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

fn main() -> anyhow::Result<()> {
    let args = cli::Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(true))
        .with(EnvFilter::from_default_env().add_directive("shelf_scan=info".parse()?))
        .init();

    cli::run_command(&args)
}
