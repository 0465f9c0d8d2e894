//! Persistence contracts consumed by the scan pipeline.
//!
//! These traits enable dependency injection and mocking for tests.
//! Production code uses [`SqliteCatalog`](super::SqliteCatalog), while tests
//! can substitute small in-memory implementations.
//!
//! Lookups by unique key return `Ok(None)` when nothing matches, which keeps
//! "not found" distinct from real failures. Updates take a column subset so a
//! caller never clobbers fields it did not mean to touch.

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    Book, BookFile, BookSeriesLink, DataSource, FileType, Genre, Library, Person, Series, Tag,
};

/// Find-or-create for the shared, per-library dimensions.
#[async_trait]
pub trait DimensionStore: Send + Sync {
    async fn find_or_create_person(&self, name: &str, library_id: i64) -> Result<Person>;

    /// Creates with `source` as the name source; an existing row keeps its own.
    async fn find_or_create_series(
        &self,
        name: &str,
        library_id: i64,
        source: DataSource,
    ) -> Result<Series>;

    async fn find_or_create_genre(&self, name: &str, library_id: i64) -> Result<Genre>;

    async fn find_or_create_tag(&self, name: &str, library_id: i64) -> Result<Tag>;

    async fn update_series_source(&self, series_id: i64, source: DataSource) -> Result<()>;
}

/// Columns of `books` that [`Catalog::update_book`] may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookColumn {
    Filepath,
    /// `title` and `title_source`
    Title,
    AuthorSource,
    SeriesSource,
    GenreSource,
    TagSource,
}

/// Columns of `files` that [`Catalog::update_file`] may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileColumn {
    Filepath,
    FilesizeBytes,
    /// `cover_image_path`, `cover_mime_type` and `cover_source`
    Cover,
    NarratorSource,
}

/// Values for a new book row.
#[derive(Debug, Clone)]
pub struct NewBook {
    pub library_id: i64,
    pub filepath: String,
    pub title: String,
    pub title_source: DataSource,
    pub author_source: Option<DataSource>,
    pub series_source: Option<DataSource>,
    pub genre_source: Option<DataSource>,
    pub tag_source: Option<DataSource>,
}

/// Values for a new file row.
#[derive(Debug, Clone)]
pub struct NewBookFile {
    pub library_id: i64,
    pub book_id: i64,
    pub filepath: String,
    pub file_type: FileType,
    pub filesize_bytes: i64,
    pub cover_image_path: Option<String>,
    pub cover_mime_type: Option<String>,
    pub cover_source: Option<DataSource>,
    pub narrator_source: Option<DataSource>,
}

/// A book with its linked dimension names, in sort order.
#[derive(Debug, Clone)]
pub struct BookDetail {
    pub book: Book,
    pub authors: Vec<String>,
    pub series: Vec<(String, Option<f64>)>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

/// Typed CRUD over the catalog.
#[async_trait]
pub trait Catalog: DimensionStore {
    async fn list_libraries(&self) -> Result<Vec<Library>>;

    async fn find_file(&self, filepath: &str, library_id: i64) -> Result<Option<BookFile>>;

    async fn find_book_by_path(&self, filepath: &str, library_id: i64) -> Result<Option<Book>>;

    /// Fails with [`Error::NotFound`](crate::error::Error::NotFound) for an unknown id.
    async fn get_book(&self, book_id: i64) -> Result<Book>;

    async fn list_books(&self, library_id: i64) -> Result<Vec<Book>>;

    async fn create_book(&self, book: &NewBook) -> Result<Book>;

    async fn update_book(&self, book: &Book, columns: &[BookColumn]) -> Result<()>;

    async fn replace_authors(&self, book_id: i64, person_ids: &[i64]) -> Result<()>;

    async fn replace_book_series(&self, book_id: i64, links: &[BookSeriesLink]) -> Result<()>;

    async fn replace_genres(&self, book_id: i64, genre_ids: &[i64]) -> Result<()>;

    async fn replace_tags(&self, book_id: i64, tag_ids: &[i64]) -> Result<()>;

    async fn create_file(&self, file: &NewBookFile) -> Result<BookFile>;

    async fn update_file(&self, file: &BookFile, columns: &[FileColumn]) -> Result<()>;

    async fn replace_narrators(&self, file_id: i64, person_ids: &[i64]) -> Result<()>;

    async fn list_files_for_book(&self, book_id: i64) -> Result<Vec<BookFile>>;

    async fn book_detail(&self, book_id: i64) -> Result<BookDetail>;

    async fn file_narrators(&self, file_id: i64) -> Result<Vec<String>>;

    /// Returns the number of rows removed.
    async fn delete_orphaned_series(&self) -> Result<u64>;

    /// Removes people no longer linked as author or narrator.
    async fn delete_orphaned_people(&self) -> Result<u64>;
}

/// Post-scan search index maintenance.
#[async_trait]
pub trait SearchIndex: Send + Sync {
    async fn rebuild(&self) -> Result<()>;
}
