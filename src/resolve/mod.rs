//! Entity resolution cache for a single scan job.
//!
//! Shared dimensions (people, series, genres, tags) are resolved through a
//! memo keyed by `(name, library_id)`. The first caller for a key takes that
//! key's lock and calls the store; concurrent callers wait on the same lock
//! and then read the memo, so the store sees at most one find-or-create per
//! key for the cache's lifetime.
//!
//! Books are mutated under [`ResolutionCache::lock_book_path`] and
//! [`ResolutionCache::lock_book`]. Callers that need both take the path lock
//! first.
//!
//! Build one cache per job and drop it afterwards. Nothing is carried between
//! jobs.

mod keyed;

pub use keyed::ResourceGuard;

use std::sync::Arc;

use keyed::{KeyedLocks, Memo};

use crate::db::DimensionStore;
use crate::error::Result;
use crate::model::{DataSource, Genre, Person, Series, Tag};

type NameKey = (String, i64);

pub struct ResolutionCache {
    store: Arc<dyn DimensionStore>,
    persons: Memo<NameKey, Person>,
    series: Memo<NameKey, Series>,
    genres: Memo<NameKey, Genre>,
    tags: Memo<NameKey, Tag>,
    book_paths: KeyedLocks<NameKey>,
    books: KeyedLocks<i64>,
}

impl ResolutionCache {
    pub fn new(store: Arc<dyn DimensionStore>) -> Self {
        Self {
            store,
            persons: Memo::default(),
            series: Memo::default(),
            genres: Memo::default(),
            tags: Memo::default(),
            book_paths: KeyedLocks::default(),
            books: KeyedLocks::default(),
        }
    }

    pub async fn resolve_person(&self, name: &str, library_id: i64) -> Result<Person> {
        self.persons
            .get_or_try_insert((name.to_string(), library_id), || {
                self.store.find_or_create_person(name, library_id)
            })
            .await
    }

    pub async fn resolve_genre(&self, name: &str, library_id: i64) -> Result<Genre> {
        self.genres
            .get_or_try_insert((name.to_string(), library_id), || {
                self.store.find_or_create_genre(name, library_id)
            })
            .await
    }

    pub async fn resolve_tag(&self, name: &str, library_id: i64) -> Result<Tag> {
        self.tags
            .get_or_try_insert((name.to_string(), library_id), || {
                self.store.find_or_create_tag(name, library_id)
            })
            .await
    }

    /// Resolve a series, promoting its stored name source when `source`
    /// outranks what the first writer recorded.
    pub async fn resolve_series(
        &self,
        name: &str,
        library_id: i64,
        source: DataSource,
    ) -> Result<Series> {
        let key = (name.to_string(), library_id);

        if let Some(series) = self.series.get(&key)
            && !source.outranks(Some(series.name_source))
        {
            return Ok(series);
        }

        let _guard = self.series.lock(&key).await;

        match self.series.get(&key) {
            Some(mut series) => {
                if source.outranks(Some(series.name_source)) {
                    self.store.update_series_source(series.id, source).await?;
                    tracing::debug!(
                        target: "shelf_scan::resolve",
                        series = %series.name,
                        from = ?series.name_source,
                        to = ?source,
                        "Promoted series name source"
                    );
                    series.name_source = source;
                    self.series.insert(key, series.clone());
                }
                Ok(series)
            }
            None => {
                let mut series = self
                    .store
                    .find_or_create_series(name, library_id, source)
                    .await?;
                // Row predates this job with a weaker source.
                if source.outranks(Some(series.name_source)) {
                    self.store.update_series_source(series.id, source).await?;
                    series.name_source = source;
                }
                self.series.insert(key, series.clone());
                Ok(series)
            }
        }
    }

    /// Exclusive access to the book at `path` in `library_id`.
    pub async fn lock_book_path(&self, path: &str, library_id: i64) -> ResourceGuard {
        self.book_paths.lock(&(path.to_string(), library_id)).await
    }

    /// Exclusive access to book `book_id`.
    pub async fn lock_book(&self, book_id: i64) -> ResourceGuard {
        self.books.lock(&book_id).await
    }

    pub fn person_count(&self) -> usize {
        self.persons.len()
    }

    pub fn series_count(&self) -> usize {
        self.series.len()
    }

    pub fn genre_count(&self) -> usize {
        self.genres.len()
    }

    pub fn tag_count(&self) -> usize {
        self.tags.len()
    }
}

impl std::fmt::Debug for ResolutionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolutionCache")
            .field("persons", &self.person_count())
            .field("series", &self.series_count())
            .field("genres", &self.genre_count())
            .field("tags", &self.tag_count())
            .finish()
    }
}
