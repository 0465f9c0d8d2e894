//! Root-level vs directory-grouped placement of media files.

use std::path::{Path, PathBuf};

/// Where a file sits relative to its library roots.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Placement {
    /// Directly inside a root; the file is its own book.
    RootLevel,
    /// Inside a subdirectory; the directory is the book.
    Grouped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub placement: Placement,
    /// The file itself for root-level files, its parent directory otherwise
    pub book_path: PathBuf,
    /// Base name the title and filename patterns are read from
    pub title_seed: String,
}

impl Classification {
    pub fn is_root_level(&self) -> bool {
        self.placement == Placement::RootLevel
    }
}

fn lossy_stem(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Base name of a file without its extension.
pub fn file_base_name(path: &Path) -> String {
    lossy_stem(path)
}

/// Classify `file` against the library's configured `roots`.
pub fn classify(file: &Path, roots: &[PathBuf]) -> Classification {
    let parent = file.parent().unwrap_or(Path::new(""));

    if roots.iter().any(|root| root.as_path() == parent) {
        return Classification {
            placement: Placement::RootLevel,
            book_path: file.to_path_buf(),
            title_seed: lossy_stem(file),
        };
    }

    Classification {
        placement: Placement::Grouped,
        book_path: parent.to_path_buf(),
        title_seed: parent
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
    }
}

/// Directory covers for `file` are written to.
pub fn cover_dir(file: &Path) -> PathBuf {
    file.parent().map(Path::to_path_buf).unwrap_or_default()
}
