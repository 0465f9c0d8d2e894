//! CLI command definitions and dispatch.
//!
//! Each subcommand is implemented in its own submodule:
//! - `scan`: run a scan job over the configured libraries
//! - `list`: print cataloged books
//! - `library`: add a library to the config file

mod library;
mod list;
mod scan;

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tokio::runtime::Runtime;

pub use library::cmd_add_library;
pub use list::cmd_list;
pub use scan::cmd_scan;

use crate::config::{self, Config};
use crate::db::{self, SqliteCatalog};

/// shelf-scan CLI
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Config file (defaults to the OS config directory)
    #[arg(long, global = true, env = "SHELF_SCAN_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available subcommands
#[derive(Subcommand)]
pub enum Commands {
    /// Scan all configured libraries
    Scan {
        /// Files processed concurrently (overrides the config)
        #[arg(short, long)]
        workers: Option<usize>,
        /// Don't write sidecar files
        #[arg(long)]
        no_sidecars: bool,
    },
    /// List cataloged books
    List {
        /// Only this library
        #[arg(short, long)]
        library: Option<String>,
    },
    /// Add a library to the config file
    AddLibrary {
        /// Library name
        name: String,
        /// Root directories
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        /// Move root-level files into per-book directories when scanning
        #[arg(long)]
        organize: bool,
    },
}

/// Run the specified CLI command.
pub fn run_command(cli: &Cli) -> anyhow::Result<()> {
    let config_path = cli.config.clone().or_else(config::config_path);
    let config = match &config_path {
        Some(path) => config::load_from(path),
        None => config::load(),
    };

    match &cli.command {
        Commands::Scan {
            workers,
            no_sidecars,
        } => {
            let rt = Runtime::new()?;
            cmd_scan(&rt, &config, *workers, !*no_sidecars)
        }
        Commands::List { library } => {
            let rt = Runtime::new()?;
            cmd_list(&rt, &config, library.as_deref())
        }
        Commands::AddLibrary {
            name,
            paths,
            organize,
        } => {
            let path = config_path
                .ok_or_else(|| anyhow::anyhow!("no config path; pass --config"))?;
            cmd_add_library(config, &path, name, paths, *organize)
        }
    }
}

// ============================================================================
// Shared helper functions
// ============================================================================

/// Open (creating if needed) the catalog database named by the config.
pub(crate) async fn open_catalog(config: &Config) -> anyhow::Result<SqliteCatalog> {
    let db_path: &Path = &config.database.path;
    if let Some(dir) = db_path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)?;
    }
    let pool = db::init_db(&db::db_url(Some(db_path))).await?;
    Ok(SqliteCatalog::new(pool))
}
