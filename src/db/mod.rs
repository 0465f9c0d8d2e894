//! Catalog persistence on SQLite.
//!
//! Uses SQLx with SQLite for lightweight, embedded storage. [`SqliteCatalog`]
//! implements the [`DimensionStore`], [`Catalog`] and [`SearchIndex`]
//! contracts the scanner is written against.
//!
//! # Example
//!
//! ```ignore
//! use shelf_scan::db::{init_db, SqliteCatalog};
//!
//! let pool = init_db("sqlite:catalog.db").await?;
//! let catalog = SqliteCatalog::new(pool);
//! let libraries = catalog.list_libraries().await?;
//! ```

mod traits;

pub use traits::{
    BookColumn, BookDetail, Catalog, DimensionStore, FileColumn, NewBook, NewBookFile,
    SearchIndex,
};

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite};

use crate::config::LibraryConfig;
use crate::error::{Error, Result, ResultExt};
use crate::model::{
    Book, BookFile, BookSeriesLink, DataSource, Genre, Library, Person, Series, Tag,
};

/// Default database filename.
pub const DEFAULT_DB_NAME: &str = "shelf_scan.db";

const BOOK_COLUMNS: &str = "id, library_id, filepath, title, title_source, author_source, \
     series_source, genre_source, tag_source, created_at, updated_at";

const FILE_COLUMNS: &str = "id, library_id, book_id, filepath, file_type, filesize_bytes, \
     cover_image_path, cover_mime_type, cover_source, narrator_source";

/// Build a SQLite database URL from an optional path.
///
/// If no path is provided, uses [`DEFAULT_DB_NAME`] in the current directory.
pub fn db_url(path: Option<&Path>) -> String {
    match path {
        Some(p) => format!("sqlite:{}", p.display()),
        None => format!("sqlite:{}", DEFAULT_DB_NAME),
    }
}

/// Initialize the database connection pool and run migrations.
///
/// Creates the database file if it doesn't exist, enables WAL and foreign
/// keys, establishes a pool of up to 5 connections, and runs all pending
/// migrations.
///
/// # Errors
///
/// Returns an error if the URL is malformed, the connection cannot be
/// established, or a migration fails.
pub async fn init_db(db_url: &str) -> std::result::Result<SqlitePool, sqlx::Error> {
    let options = SqliteConnectOptions::from_str(db_url)?
        .create_if_missing(true)
        .journal_mode(SqliteJournalMode::Wal)
        .foreign_keys(true)
        // Concurrent scan workers all write; wait for the lock instead of failing.
        .busy_timeout(Duration::from_secs(5));

    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .connect_with(options)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    Ok(pool)
}

fn now() -> String {
    chrono::Utc::now().to_rfc3339()
}

/// SQLite-backed catalog.
#[derive(Debug, Clone)]
pub struct SqliteCatalog {
    pool: SqlitePool,
}

impl SqliteCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Insert or update a library from config, replacing its path list.
    pub async fn upsert_library(&self, config: &LibraryConfig) -> Result<Library> {
        let mut tx = self.pool.begin().await?;

        let (id,): (i64,) = sqlx::query_as(
            r#"
            INSERT INTO libraries (name, organize_file_structure)
            VALUES (?, ?)
            ON CONFLICT(name) DO UPDATE SET
                organize_file_structure = excluded.organize_file_structure
            RETURNING id
            "#,
        )
        .bind(&config.name)
        .bind(config.organize_file_structure)
        .fetch_one(&mut *tx)
        .await
        .with_context(format!("upsert library {}", config.name))?;

        sqlx::query("DELETE FROM library_paths WHERE library_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        for path in &config.paths {
            sqlx::query("INSERT OR IGNORE INTO library_paths (library_id, filepath) VALUES (?, ?)")
                .bind(id)
                .bind(path.to_string_lossy().as_ref())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;

        Ok(Library {
            id,
            name: config.name.clone(),
            organize_file_structure: config.organize_file_structure,
            paths: config.paths.clone(),
        })
    }

    /// Count rows in a catalog table. Test and CLI helper.
    pub async fn count(&self, table: CountedTable) -> Result<i64> {
        let sql = format!("SELECT COUNT(*) FROM {}", table.as_str());
        let (n,): (i64,) = sqlx::query_as(&sql).fetch_one(&self.pool).await?;
        Ok(n)
    }

    async fn link_names(&self, sql: &str, id: i64) -> Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(sql).bind(id).fetch_all(&self.pool).await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }
}

/// Tables [`SqliteCatalog::count`] can report on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CountedTable {
    Books,
    Files,
    Persons,
    Series,
    Genres,
    Tags,
}

impl CountedTable {
    fn as_str(self) -> &'static str {
        match self {
            Self::Books => "books",
            Self::Files => "files",
            Self::Persons => "persons",
            Self::Series => "series",
            Self::Genres => "genres",
            Self::Tags => "tags",
        }
    }
}

#[async_trait]
impl DimensionStore for SqliteCatalog {
    async fn find_or_create_person(&self, name: &str, library_id: i64) -> Result<Person> {
        let row: Option<Person> = sqlx::query_as(
            "SELECT id, library_id, name FROM persons WHERE library_id = ? AND name = ?",
        )
        .bind(library_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(person) = row {
            return Ok(person);
        }

        sqlx::query_as::<_, Person>("INSERT INTO persons (library_id, name) VALUES (?, ?) RETURNING id, library_id, name")
            .bind(library_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .with_context(format!("create person {name}"))
    }

    async fn find_or_create_series(
        &self,
        name: &str,
        library_id: i64,
        source: DataSource,
    ) -> Result<Series> {
        let row: Option<Series> = sqlx::query_as(
            "SELECT id, library_id, name, name_source FROM series WHERE library_id = ? AND name = ?",
        )
        .bind(library_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(series) = row {
            return Ok(series);
        }

        sqlx::query_as::<_, Series>(
            "INSERT INTO series (library_id, name, name_source) VALUES (?, ?, ?) \
             RETURNING id, library_id, name, name_source",
        )
        .bind(library_id)
        .bind(name)
        .bind(source)
        .fetch_one(&self.pool)
        .await
        .with_context(format!("create series {name}"))
    }

    async fn find_or_create_genre(&self, name: &str, library_id: i64) -> Result<Genre> {
        let row: Option<Genre> = sqlx::query_as(
            "SELECT id, library_id, name FROM genres WHERE library_id = ? AND name = ?",
        )
        .bind(library_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(genre) = row {
            return Ok(genre);
        }

        sqlx::query_as::<_, Genre>("INSERT INTO genres (library_id, name) VALUES (?, ?) RETURNING id, library_id, name")
            .bind(library_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .with_context(format!("create genre {name}"))
    }

    async fn find_or_create_tag(&self, name: &str, library_id: i64) -> Result<Tag> {
        let row: Option<Tag> = sqlx::query_as(
            "SELECT id, library_id, name FROM tags WHERE library_id = ? AND name = ?",
        )
        .bind(library_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(tag) = row {
            return Ok(tag);
        }

        sqlx::query_as::<_, Tag>("INSERT INTO tags (library_id, name) VALUES (?, ?) RETURNING id, library_id, name")
            .bind(library_id)
            .bind(name)
            .fetch_one(&self.pool)
            .await
            .with_context(format!("create tag {name}"))
    }

    async fn update_series_source(&self, series_id: i64, source: DataSource) -> Result<()> {
        sqlx::query("UPDATE series SET name_source = ? WHERE id = ?")
            .bind(source)
            .bind(series_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for SqliteCatalog {
    async fn list_libraries(&self) -> Result<Vec<Library>> {
        let rows: Vec<(i64, String, bool)> = sqlx::query_as(
            "SELECT id, name, organize_file_structure FROM libraries ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut libraries = Vec::with_capacity(rows.len());
        for (id, name, organize_file_structure) in rows {
            let paths: Vec<(String,)> = sqlx::query_as(
                "SELECT filepath FROM library_paths WHERE library_id = ? ORDER BY id",
            )
            .bind(id)
            .fetch_all(&self.pool)
            .await?;

            libraries.push(Library {
                id,
                name,
                organize_file_structure,
                paths: paths.into_iter().map(|(p,)| PathBuf::from(p)).collect(),
            });
        }
        Ok(libraries)
    }

    async fn find_file(&self, filepath: &str, library_id: i64) -> Result<Option<BookFile>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE library_id = ? AND filepath = ?");
        Ok(sqlx::query_as(&sql)
            .bind(library_id)
            .bind(filepath)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn find_book_by_path(&self, filepath: &str, library_id: i64) -> Result<Option<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE library_id = ? AND filepath = ?");
        Ok(sqlx::query_as(&sql)
            .bind(library_id)
            .bind(filepath)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn get_book(&self, book_id: i64) -> Result<Book> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE id = ?");
        sqlx::query_as(&sql)
            .bind(book_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| Error::not_found(format!("book {book_id}")))
    }

    async fn list_books(&self, library_id: i64) -> Result<Vec<Book>> {
        let sql = format!("SELECT {BOOK_COLUMNS} FROM books WHERE library_id = ? ORDER BY title");
        Ok(sqlx::query_as(&sql)
            .bind(library_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn create_book(&self, book: &NewBook) -> Result<Book> {
        let stamp = now();
        let sql = format!(
            "INSERT INTO books (library_id, filepath, title, title_source, author_source, \
             series_source, genre_source, tag_source, created_at, updated_at) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {BOOK_COLUMNS}"
        );
        sqlx::query_as::<_, Book>(&sql)
            .bind(book.library_id)
            .bind(&book.filepath)
            .bind(&book.title)
            .bind(book.title_source)
            .bind(book.author_source)
            .bind(book.series_source)
            .bind(book.genre_source)
            .bind(book.tag_source)
            .bind(&stamp)
            .bind(&stamp)
            .fetch_one(&self.pool)
            .await
            .with_context(format!("create book {}", book.filepath))
    }

    async fn update_book(&self, book: &Book, columns: &[BookColumn]) -> Result<()> {
        if columns.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE books SET updated_at = ");
        qb.push_bind(now());
        for column in columns {
            match column {
                BookColumn::Filepath => {
                    qb.push(", filepath = ").push_bind(&book.filepath);
                }
                BookColumn::Title => {
                    qb.push(", title = ").push_bind(&book.title);
                    qb.push(", title_source = ").push_bind(book.title_source);
                }
                BookColumn::AuthorSource => {
                    qb.push(", author_source = ").push_bind(book.author_source);
                }
                BookColumn::SeriesSource => {
                    qb.push(", series_source = ").push_bind(book.series_source);
                }
                BookColumn::GenreSource => {
                    qb.push(", genre_source = ").push_bind(book.genre_source);
                }
                BookColumn::TagSource => {
                    qb.push(", tag_source = ").push_bind(book.tag_source);
                }
            }
        }
        qb.push(" WHERE id = ").push_bind(book.id);

        qb.build()
            .execute(&self.pool)
            .await
            .with_context(format!("update book {}", book.id))?;
        Ok(())
    }

    async fn replace_authors(&self, book_id: i64, person_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM authors WHERE book_id = ?")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;
        for (i, person_id) in person_ids.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO authors (book_id, person_id, sort_order) VALUES (?, ?, ?)")
                .bind(book_id)
                .bind(person_id)
                .bind(i as i64 + 1)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_book_series(&self, book_id: i64, links: &[BookSeriesLink]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM book_series WHERE book_id = ?")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;
        for link in links {
            sqlx::query(
                "INSERT OR IGNORE INTO book_series (book_id, series_id, series_number, sort_order) \
                 VALUES (?, ?, ?, ?)",
            )
            .bind(book_id)
            .bind(link.series_id)
            .bind(link.series_number)
            .bind(link.sort_order)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_genres(&self, book_id: i64, genre_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM book_genres WHERE book_id = ?")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;
        for genre_id in genre_ids {
            sqlx::query("INSERT OR IGNORE INTO book_genres (book_id, genre_id) VALUES (?, ?)")
                .bind(book_id)
                .bind(genre_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn replace_tags(&self, book_id: i64, tag_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM book_tags WHERE book_id = ?")
            .bind(book_id)
            .execute(&mut *tx)
            .await?;
        for tag_id in tag_ids {
            sqlx::query("INSERT OR IGNORE INTO book_tags (book_id, tag_id) VALUES (?, ?)")
                .bind(book_id)
                .bind(tag_id)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn create_file(&self, file: &NewBookFile) -> Result<BookFile> {
        let sql = format!(
            "INSERT INTO files (library_id, book_id, filepath, file_type, filesize_bytes, \
             cover_image_path, cover_mime_type, cover_source, narrator_source) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) RETURNING {FILE_COLUMNS}"
        );
        sqlx::query_as::<_, BookFile>(&sql)
            .bind(file.library_id)
            .bind(file.book_id)
            .bind(&file.filepath)
            .bind(file.file_type)
            .bind(file.filesize_bytes)
            .bind(&file.cover_image_path)
            .bind(&file.cover_mime_type)
            .bind(file.cover_source)
            .bind(file.narrator_source)
            .fetch_one(&self.pool)
            .await
            .with_context(format!("create file {}", file.filepath))
    }

    async fn update_file(&self, file: &BookFile, columns: &[FileColumn]) -> Result<()> {
        if columns.is_empty() {
            return Ok(());
        }

        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new("UPDATE files SET ");
        let mut set = qb.separated(", ");
        for column in columns {
            match column {
                FileColumn::Filepath => {
                    set.push("filepath = ").push_bind_unseparated(&file.filepath);
                }
                FileColumn::FilesizeBytes => {
                    set.push("filesize_bytes = ")
                        .push_bind_unseparated(file.filesize_bytes);
                }
                FileColumn::Cover => {
                    set.push("cover_image_path = ")
                        .push_bind_unseparated(&file.cover_image_path);
                    set.push("cover_mime_type = ")
                        .push_bind_unseparated(&file.cover_mime_type);
                    set.push("cover_source = ")
                        .push_bind_unseparated(file.cover_source);
                }
                FileColumn::NarratorSource => {
                    set.push("narrator_source = ")
                        .push_bind_unseparated(file.narrator_source);
                }
            }
        }
        qb.push(" WHERE id = ").push_bind(file.id);

        qb.build()
            .execute(&self.pool)
            .await
            .with_context(format!("update file {}", file.id))?;
        Ok(())
    }

    async fn replace_narrators(&self, file_id: i64, person_ids: &[i64]) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM narrators WHERE file_id = ?")
            .bind(file_id)
            .execute(&mut *tx)
            .await?;
        for (i, person_id) in person_ids.iter().enumerate() {
            sqlx::query("INSERT OR IGNORE INTO narrators (file_id, person_id, sort_order) VALUES (?, ?, ?)")
                .bind(file_id)
                .bind(person_id)
                .bind(i as i64 + 1)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn list_files_for_book(&self, book_id: i64) -> Result<Vec<BookFile>> {
        let sql = format!("SELECT {FILE_COLUMNS} FROM files WHERE book_id = ? ORDER BY filepath");
        Ok(sqlx::query_as(&sql)
            .bind(book_id)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn book_detail(&self, book_id: i64) -> Result<BookDetail> {
        let book = self.get_book(book_id).await?;

        let authors = self
            .link_names(
                "SELECT p.name FROM authors a JOIN persons p ON p.id = a.person_id \
                 WHERE a.book_id = ? ORDER BY a.sort_order",
                book_id,
            )
            .await?;

        let series: Vec<(String, Option<f64>)> = sqlx::query_as(
            "SELECT s.name, bs.series_number FROM book_series bs \
             JOIN series s ON s.id = bs.series_id \
             WHERE bs.book_id = ? ORDER BY bs.sort_order",
        )
        .bind(book_id)
        .fetch_all(&self.pool)
        .await?;

        let genres = self
            .link_names(
                "SELECT g.name FROM book_genres bg JOIN genres g ON g.id = bg.genre_id \
                 WHERE bg.book_id = ? ORDER BY g.name",
                book_id,
            )
            .await?;

        let tags = self
            .link_names(
                "SELECT t.name FROM book_tags bt JOIN tags t ON t.id = bt.tag_id \
                 WHERE bt.book_id = ? ORDER BY t.name",
                book_id,
            )
            .await?;

        Ok(BookDetail {
            book,
            authors,
            series,
            genres,
            tags,
        })
    }

    async fn file_narrators(&self, file_id: i64) -> Result<Vec<String>> {
        self.link_names(
            "SELECT p.name FROM narrators n JOIN persons p ON p.id = n.person_id \
             WHERE n.file_id = ? ORDER BY n.sort_order",
            file_id,
        )
        .await
    }

    async fn delete_orphaned_series(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM series WHERE id NOT IN (SELECT series_id FROM book_series)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn delete_orphaned_people(&self) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM persons \
             WHERE id NOT IN (SELECT person_id FROM authors) \
               AND id NOT IN (SELECT person_id FROM narrators)",
        )
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl SearchIndex for SqliteCatalog {
    async fn rebuild(&self) -> Result<()> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM book_search")
            .execute(&mut *tx)
            .await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO book_search (book_id, title, authors, series, narrators)
            SELECT
                b.id,
                b.title,
                COALESCE((SELECT group_concat(p.name, ' ') FROM authors a
                          JOIN persons p ON p.id = a.person_id WHERE a.book_id = b.id), ''),
                COALESCE((SELECT group_concat(s.name, ' ') FROM book_series bs
                          JOIN series s ON s.id = bs.series_id WHERE bs.book_id = b.id), ''),
                COALESCE((SELECT group_concat(DISTINCT p.name) FROM files f
                          JOIN narrators n ON n.file_id = f.id
                          JOIN persons p ON p.id = n.person_id WHERE f.book_id = b.id), '')
            FROM books b
            "#,
        )
        .execute(&mut *tx)
        .await
        .with_context("rebuild search index")?;
        tx.commit().await?;

        tracing::debug!(target: "shelf_scan::db::search", rows = inserted.rows_affected(), "Search index rebuilt");
        Ok(())
    }
}
