//! Test utilities and fixtures for shelf-scan tests.
//!
//! This module provides common test helpers, mock factories, and
//! database utilities to reduce boilerplate in tests.
//!
//! # Example
//!
//! ```ignore
//! use crate::test_utils::{insert_library, temp_catalog};
//!
//! #[tokio::test]
//! async fn test_something() {
//!     let (catalog, _dir) = temp_catalog().await;
//!     let lib = insert_library(&catalog, "/books", false).await;
//!     // ... test logic
//! }
//! ```

use sqlx::sqlite::SqlitePool;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

use crate::config::LibraryConfig;
use crate::db::{Catalog, NewBook, NewBookFile, SqliteCatalog};
use crate::model::{Book, BookFile, DataSource, FileType, Library};

/// Creates a temporary database for testing.
///
/// The database is created in a temporary directory that is automatically
/// cleaned up when the returned `TempDir` is dropped. Migrations are run
/// automatically.
///
/// Keep the TempDir alive for the duration of your test.
pub async fn temp_db() -> (SqlitePool, TempDir) {
    let dir = tempfile::tempdir().expect("Failed to create temp directory");
    let db_path = dir.path().join("test.db");
    let db_url = crate::db::db_url(Some(&db_path));

    let pool = crate::db::init_db(&db_url)
        .await
        .expect("Failed to initialize test database");

    (pool, dir)
}

/// [`temp_db`] wrapped in a catalog.
pub async fn temp_catalog() -> (SqliteCatalog, TempDir) {
    let (pool, dir) = temp_db().await;
    (SqliteCatalog::new(pool), dir)
}

/// Registers a single-root library named after its root.
pub async fn insert_library(catalog: &SqliteCatalog, root: &str, organize: bool) -> Library {
    catalog
        .upsert_library(&LibraryConfig {
            name: root.to_string(),
            paths: vec![PathBuf::from(root)],
            organize_file_structure: organize,
        })
        .await
        .expect("Failed to insert library")
}

/// Catalogs `media` as a root-level book with one file, registering the
/// parent directory as a library.
pub async fn insert_book_with_file(
    catalog: &SqliteCatalog,
    media: &Path,
    file_type: FileType,
    cover: Option<&Path>,
) -> (Book, BookFile) {
    let root = media.parent().expect("media has a parent");
    let lib = insert_library(catalog, &root.to_string_lossy(), false).await;
    let filepath = media.to_string_lossy().into_owned();

    let book = catalog
        .create_book(&NewBook {
            library_id: lib.id,
            filepath: filepath.clone(),
            title: crate::library::file_base_name(media),
            title_source: DataSource::Filepath,
            author_source: None,
            series_source: None,
            genre_source: None,
            tag_source: None,
        })
        .await
        .expect("Failed to create book");

    let file = catalog
        .create_file(&NewBookFile {
            library_id: lib.id,
            book_id: book.id,
            filepath,
            file_type,
            filesize_bytes: 0,
            cover_image_path: cover.map(|p| p.to_string_lossy().into_owned()),
            cover_mime_type: cover.map(|p| {
                let ext = p.extension().map(|e| e.to_string_lossy().into_owned()).unwrap_or_default();
                crate::cover::mime_for_extension(&ext).to_string()
            }),
            cover_source: cover.map(|_| file_type.metadata_source()),
            narrator_source: None,
        })
        .await
        .expect("Failed to create file");

    (book, file)
}

/// An unsaved book at `path` with filepath-sourced fields.
pub fn mock_book(path: &Path) -> Book {
    Book {
        id: 1,
        library_id: 1,
        filepath: path.to_string_lossy().into_owned(),
        title: crate::library::file_base_name(path),
        title_source: DataSource::Filepath,
        author_source: None,
        series_source: None,
        genre_source: None,
        tag_source: None,
        created_at: String::new(),
        updated_at: String::new(),
    }
}

/// Writes `bytes` to `dir/relative`, creating parent directories.
pub fn write_file(dir: &Path, relative: &str, bytes: &[u8]) -> PathBuf {
    let path = dir.join(relative);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).expect("Failed to create parent directory");
    }
    std::fs::write(&path, bytes).expect("Failed to write test file");
    path
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_temp_db_creates_valid_pool() {
        let (pool, _dir) = temp_db().await;

        let result: (i64,) = sqlx::query_as("SELECT 1").fetch_one(&pool).await.unwrap();
        assert_eq!(result.0, 1);
    }

    #[tokio::test]
    async fn test_insert_book_with_file() {
        let (catalog, _db) = temp_catalog().await;
        let dir = tempfile::tempdir().unwrap();
        let media = write_file(dir.path(), "Dune.epub", b"x");

        let (book, file) = insert_book_with_file(&catalog, &media, FileType::Epub, None).await;
        assert_eq!(book.title, "Dune");
        assert_eq!(file.book_id, book.id);
        assert!(file.cover_mime_type.is_none());
    }
}
