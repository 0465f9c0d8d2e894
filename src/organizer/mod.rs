//! Moves root-level books into per-book directories.
//!
//! A root-level book `<root>/Dune.epub` becomes `<root>/[Frank Herbert] Dune/`
//! holding the media file, its extracted cover and its file sidecar. The book
//! sidecar is renamed to the directory form (`<dir>/<dir name>.metadata.json`).
//!
//! # Features
//! - Collision-free directory names (` (2)`, ` (3)`, ...)
//! - Rename with copy + remove fallback across devices
//! - Moves are rolled back if the catalog update fails

use std::fs;
use std::path::{Path, PathBuf};

use crate::db::{BookColumn, Catalog, FileColumn};
use crate::error::{Error, Result, ResultExt};
use crate::library::Placement;
use crate::model::BookFile;
use crate::sidecar::{book_sidecar_path, file_sidecar_path};

/// A record of a file move operation, used to roll back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MoveRecord {
    pub source: PathBuf,
    pub destination: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrganizeOutcome {
    /// Book now lives in `to`
    Moved { from: PathBuf, to: PathBuf },
    /// Book path is already a directory
    AlreadyOrganized,
    /// Book path no longer exists on disk
    Missing,
}

/// Sanitizes a filename by removing/replacing invalid characters
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            _ => c,
        })
        .collect()
}

/// Directory name for a book: `[Author, ...] Title`, or just the title.
pub fn book_dir_name(title: &str, authors: &[String]) -> String {
    let name = if authors.is_empty() {
        title.to_string()
    } else {
        format!("[{}] {}", authors.join(", "), title)
    };
    let name = sanitize_filename(name.trim());
    let name = name.trim_end_matches(['.', ' ']);
    if name.is_empty() {
        "Untitled".to_string()
    } else {
        name.to_string()
    }
}

/// First of `name`, `name (2)`, `name (3)`, ... not present in `parent`.
pub fn unique_dir(parent: &Path, name: &str) -> PathBuf {
    let candidate = parent.join(name);
    if !candidate.exists() {
        return candidate;
    }
    (2..)
        .map(|n| parent.join(format!("{name} ({n})")))
        .find(|p| !p.exists())
        .unwrap_or(candidate)
}

/// Moves `source` to `destination`, never overwriting.
pub fn move_file(source: &Path, destination: &Path) -> Result<()> {
    if destination.exists() {
        return Err(Error::organization(format!(
            "destination already exists: {}",
            destination.display()
        )));
    }

    if fs::rename(source, destination).is_err() {
        // Cross-device: copy then delete
        fs::copy(source, destination)
            .with_context(format!("copy {} to {}", source.display(), destination.display()))?;
        fs::remove_file(source).with_context(format!("remove {}", source.display()))?;
    }
    Ok(())
}

/// Moves files back in reverse order. Failures are logged.
pub fn undo_moves(moves: &[MoveRecord]) {
    for record in moves.iter().rev() {
        if let Err(e) = move_file(&record.destination, &record.source) {
            tracing::error!(
                target: "shelf_scan::organizer",
                from = %record.destination.display(),
                to = %record.source.display(),
                error = %e,
                "Failed to roll back move"
            );
        }
    }
}

/// Moves each `(source, destination)` pair, rolling back on the first failure.
fn apply_moves(plan: &[(PathBuf, PathBuf)]) -> Result<Vec<MoveRecord>> {
    let mut done = Vec::with_capacity(plan.len());
    for (source, destination) in plan {
        if let Err(e) = move_file(source, destination) {
            undo_moves(&done);
            return Err(e);
        }
        done.push(MoveRecord {
            source: source.clone(),
            destination: destination.clone(),
        });
    }
    Ok(done)
}

fn rebase(path: &Path, dir: &Path) -> Option<PathBuf> {
    path.file_name().map(|name| dir.join(name))
}

/// Files of the book that live directly in `root`, plus their cover and
/// file sidecar.
fn plan_moves(files: &[BookFile], root: &Path, dir: &Path) -> Vec<(PathBuf, PathBuf)> {
    let mut plan = Vec::new();
    for file in files {
        let media = file.path_buf();
        if media.parent() != Some(root) {
            continue;
        }
        if let Some(dest) = rebase(&media, dir) {
            plan.push((media.clone(), dest));
        }

        if let Some(cover) = file.cover_image_path.as_deref().map(PathBuf::from)
            && cover.parent() == Some(root)
            && cover.exists()
            && let Some(dest) = rebase(&cover, dir)
        {
            plan.push((cover, dest));
        }

        let sidecar = file_sidecar_path(&media);
        if sidecar.exists()
            && let Some(dest) = rebase(&sidecar, dir)
        {
            plan.push((sidecar, dest));
        }
    }
    plan
}

/// Move a root-level book into its own directory and update the catalog.
pub async fn organize_book(catalog: &dyn Catalog, book_id: i64) -> Result<OrganizeOutcome> {
    let detail = catalog.book_detail(book_id).await?;
    let book_path = detail.book.path_buf();

    if book_path.is_dir() {
        return Ok(OrganizeOutcome::AlreadyOrganized);
    }
    if !book_path.exists() {
        tracing::warn!(target: "shelf_scan::organizer", path = %book_path.display(), "Book file missing");
        return Ok(OrganizeOutcome::Missing);
    }
    let Some(root) = book_path.parent().map(Path::to_path_buf) else {
        return Err(Error::organization(format!(
            "book has no parent directory: {}",
            book_path.display()
        )));
    };

    let files = catalog.list_files_for_book(book_id).await?;
    let dir = unique_dir(&root, &book_dir_name(&detail.book.title, &detail.authors));

    let mut plan = plan_moves(&files, &root, &dir);
    let book_sidecar = book_sidecar_path(&book_path, Placement::RootLevel);
    if book_sidecar.exists() {
        plan.push((book_sidecar, book_sidecar_path(&dir, Placement::Grouped)));
    }

    fs::create_dir(&dir).with_context(format!("create {}", dir.display()))?;
    let moves = match apply_moves(&plan) {
        Ok(moves) => moves,
        Err(e) => {
            let _ = fs::remove_dir(&dir);
            return Err(e);
        }
    };

    if let Err(e) = update_catalog(catalog, &detail.book, &files, &moves, &dir).await {
        undo_moves(&moves);
        let _ = fs::remove_dir(&dir);
        return Err(e);
    }

    tracing::info!(
        target: "shelf_scan::organizer",
        book_id,
        from = %book_path.display(),
        to = %dir.display(),
        "Organized book"
    );
    Ok(OrganizeOutcome::Moved {
        from: book_path,
        to: dir,
    })
}

async fn update_catalog(
    catalog: &dyn Catalog,
    book: &crate::model::Book,
    files: &[BookFile],
    moves: &[MoveRecord],
    dir: &Path,
) -> Result<()> {
    let moved_to = |path: &str| {
        moves
            .iter()
            .find(|m| m.source == Path::new(path))
            .map(|m| m.destination.to_string_lossy().into_owned())
    };

    let mut updated_files = Vec::new();
    for file in files {
        let Some(filepath) = moved_to(&file.filepath) else {
            continue;
        };
        let mut updated = file.clone();
        updated.filepath = filepath;
        if let Some(cover) = file.cover_image_path.as_deref().and_then(moved_to) {
            updated.cover_image_path = Some(cover);
        }
        catalog
            .update_file(&updated, &[FileColumn::Filepath, FileColumn::Cover])
            .await?;
        updated_files.push(file);
    }

    let mut updated_book = book.clone();
    updated_book.filepath = dir.to_string_lossy().into_owned();
    if let Err(e) = catalog.update_book(&updated_book, &[BookColumn::Filepath]).await {
        // Put the file rows back where the files are about to return
        for file in updated_files {
            let _ = catalog
                .update_file(file, &[FileColumn::Filepath, FileColumn::Cover])
                .await;
        }
        return Err(e);
    }
    Ok(())
}


/// Property-based tests using proptest
#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    /// Generate valid filename characters (excluding path separators and invalid chars)
    fn valid_filename_char() -> impl Strategy<Value = char> {
        prop::char::range('!', '~').prop_filter("no invalid chars", |c| {
            !matches!(c, '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|')
        })
    }

    fn valid_filename() -> impl Strategy<Value = String> {
        prop::collection::vec(valid_filename_char(), 1..50)
            .prop_map(|chars| chars.into_iter().collect())
    }

    fn arbitrary_filename() -> impl Strategy<Value = String> {
        prop::string::string_regex("[a-zA-Z0-9 /:*?\"<>|_-]{1,50}")
            .unwrap()
            .prop_filter("non-empty", |s| !s.is_empty())
    }

    proptest! {
        #[test]
        fn sanitize_removes_path_separators(input in arbitrary_filename()) {
            let sanitized = sanitize_filename(&input);
            prop_assert!(!sanitized.contains('/'), "Found / in: {}", sanitized);
            prop_assert!(!sanitized.contains('\\'), "Found \\ in: {}", sanitized);
        }

        #[test]
        fn sanitize_preserves_length(input in arbitrary_filename()) {
            let sanitized = sanitize_filename(&input);
            prop_assert_eq!(input.chars().count(), sanitized.chars().count());
        }

        #[test]
        fn sanitize_preserves_valid_names(input in valid_filename()) {
            let sanitized = sanitize_filename(&input);
            prop_assert_eq!(input, sanitized);
        }

        /// Book directories are always a single path component
        #[test]
        fn book_dir_is_one_component(
            title in arbitrary_filename(),
            authors in prop::collection::vec(arbitrary_filename(), 0..3),
        ) {
            let name = book_dir_name(&title, &authors);
            let root = PathBuf::from("/library");
            let dir = root.join(&name);
            prop_assert!(!name.is_empty());
            prop_assert_eq!(dir.parent(), Some(root.as_path()));
        }
    }
}
