//! Library configuration command.

use std::path::{Path, PathBuf};

use crate::config::{self, Config, LibraryConfig};

/// Add (or replace) a library in the config file
pub fn cmd_add_library(
    mut config: Config,
    config_path: &Path,
    name: &str,
    paths: &[PathBuf],
    organize: bool,
) -> anyhow::Result<()> {
    let mut roots = Vec::with_capacity(paths.len());
    for path in paths {
        let root = std::fs::canonicalize(path)
            .map_err(|e| anyhow::anyhow!("{}: {e}", path.display()))?;
        if !root.is_dir() {
            anyhow::bail!("{} is not a directory", root.display());
        }
        roots.push(root);
    }

    let library = LibraryConfig {
        name: name.to_string(),
        paths: roots,
        organize_file_structure: organize,
    };
    match config.libraries.iter_mut().find(|l| l.name == name) {
        Some(existing) => *existing = library,
        None => config.libraries.push(library),
    }

    config::save_to(&config, config_path)?;
    println!("Saved library '{name}' to {}", config_path.display());
    Ok(())
}
