//! Per-file scan pipeline.
//!
//! Steps run strictly in order for one file: idempotency check, stat,
//! classify, parse, book-path lock, sidecar read, merge, book resolution,
//! dimension linking, cover, file record, sidecar sync. Errors returned from
//! [`FileProcessor::process`] are fatal to the job; everything recoverable
//! becomes a [`FileOutcome`].

use std::path::Path;
use std::sync::Arc;

use super::classify::{Classification, classify, cover_dir, file_base_name};
use crate::cover::CoverPipeline;
use crate::db::{BookColumn, Catalog, NewBook, NewBookFile};
use crate::error::{Error, Result};
use crate::metadata::{AdapterRegistry, MergeInput, MergedMetadata, ParsedMetadata, merge};
use crate::model::{Book, BookSeriesLink, DataSource, FileType, Library};
use crate::resolve::ResolutionCache;
use crate::sidecar::{BookSidecar, FileSidecar, SidecarSeries, SidecarStore};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FileOutcome {
    /// New file record created
    Cataloged {
        book_id: i64,
        /// Root-level file in an organizing library with no prior book
        organize: bool,
    },
    /// File record already existed
    AlreadyCataloged { cover_recovered: bool },
    /// Not cataloged; logged and the job continues
    Skipped { reason: String },
}

/// Book-level dimension lists that need relinking.
#[derive(Debug, Default, Clone, Copy)]
struct Relink {
    authors: bool,
    series: bool,
    genres: bool,
    tags: bool,
}

/// Apply `merged` to `book` where the merged source outranks the stored one.
/// Returns the columns that changed and which link lists to rewrite.
fn upgrade_book(book: &mut Book, merged: &MergedMetadata) -> (Vec<BookColumn>, Relink) {
    let mut columns = Vec::new();
    let mut relink = Relink::default();

    if merged.title_source.outranks(Some(book.title_source)) {
        book.title = merged.title.clone();
        book.title_source = merged.title_source;
        columns.push(BookColumn::Title);
    }

    let mut upgrade = |values_present: bool,
                       incoming: Option<DataSource>,
                       current: &mut Option<DataSource>,
                       column: BookColumn|
     -> bool {
        match incoming {
            Some(source) if values_present && source.outranks(*current) => {
                *current = Some(source);
                columns.push(column);
                true
            }
            _ => false,
        }
    };

    relink.authors = upgrade(
        !merged.authors.is_empty(),
        merged.author_source,
        &mut book.author_source,
        BookColumn::AuthorSource,
    );
    relink.series = upgrade(
        !merged.series.is_empty(),
        merged.series_source,
        &mut book.series_source,
        BookColumn::SeriesSource,
    );
    relink.genres = upgrade(
        !merged.genres.is_empty(),
        merged.genre_source,
        &mut book.genre_source,
        BookColumn::GenreSource,
    );
    relink.tags = upgrade(
        !merged.tags.is_empty(),
        merged.tag_source,
        &mut book.tag_source,
        BookColumn::TagSource,
    );

    (columns, relink)
}

fn present(values_empty: bool, source: Option<DataSource>) -> Option<DataSource> {
    if values_empty { None } else { source }
}

/// Shared state for the files of one library.
pub struct FileProcessor {
    pub(crate) catalog: Arc<dyn Catalog>,
    pub(crate) cache: Arc<ResolutionCache>,
    pub(crate) adapters: Arc<AdapterRegistry>,
    pub(crate) sidecars: Arc<dyn SidecarStore>,
    pub(crate) covers: CoverPipeline,
    pub(crate) library: Library,
    pub(crate) write_sidecars: bool,
}

impl std::fmt::Debug for FileProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileProcessor")
            .field("library", &self.library.name)
            .field("write_sidecars", &self.write_sidecars)
            .finish_non_exhaustive()
    }
}

impl FileProcessor {
    pub async fn process(&self, path: &Path, file_type: FileType) -> Result<FileOutcome> {
        let library_id = self.library.id;
        let filepath = path.to_string_lossy().into_owned();

        if let Some(existing) = self.catalog.find_file(&filepath, library_id).await? {
            let cover_recovered = match self
                .covers
                .recover_missing_cover(self.catalog.as_ref(), &self.adapters, &existing)
                .await
            {
                Ok(recovered) => recovered,
                Err(e) => {
                    tracing::warn!(target: "shelf_scan::scan", path = %path.display(), error = %e, "Cover recovery failed");
                    false
                }
            };
            return Ok(FileOutcome::AlreadyCataloged { cover_recovered });
        }

        let stat_path = path.to_path_buf();
        let stat = match tokio::task::spawn_blocking(move || std::fs::metadata(&stat_path)).await? {
            Ok(stat) => stat,
            Err(e) => {
                tracing::warn!(target: "shelf_scan::scan", path = %path.display(), error = %e, "File not accessible");
                return Ok(FileOutcome::Skipped {
                    reason: format!("not accessible: {e}"),
                });
            }
        };

        let classification = classify(path, &self.library.paths);

        let parsed = match self.parse(path, file_type).await {
            Ok(parsed) => parsed,
            Err(e) if file_type.is_audio() => {
                tracing::warn!(target: "shelf_scan::scan", path = %path.display(), error = %e, "Audio parse failed");
                return Ok(FileOutcome::Skipped {
                    reason: format!("parse failed: {e}"),
                });
            }
            Err(e) => return Err(e),
        };

        let book_path = classification.book_path.to_string_lossy().into_owned();
        let _path_guard = self.cache.lock_book_path(&book_path, library_id).await;

        // Same file reached twice (overlapping roots) while we waited.
        if self.catalog.find_file(&filepath, library_id).await?.is_some() {
            tracing::debug!(target: "shelf_scan::scan", path = %path.display(), "Cataloged concurrently");
            return Ok(FileOutcome::AlreadyCataloged {
                cover_recovered: false,
            });
        }

        // Under the path lock a sibling's sidecar write is either complete or
        // not yet started.
        let book_sidecar = self
            .sidecars
            .read_book(&classification.book_path, classification.placement)
            .await
            .unwrap_or_else(|e| {
                tracing::warn!(target: "shelf_scan::scan", error = %e, "Ignoring unreadable book sidecar");
                None
            });
        let file_sidecar = self.sidecars.read_file(path).await.unwrap_or_else(|e| {
            tracing::warn!(target: "shelf_scan::scan", error = %e, "Ignoring unreadable file sidecar");
            None
        });

        let base_name = file_base_name(path);
        let merged = merge(MergeInput {
            file_type,
            title_seed: &classification.title_seed,
            file_base_name: &base_name,
            parsed: Some(&parsed),
            book_sidecar: book_sidecar.as_ref(),
            file_sidecar: file_sidecar.as_ref(),
        });

        let by_file_path = self.catalog.find_book_by_path(&filepath, library_id).await?;
        let organize = self.library.organize_file_structure
            && classification.is_root_level()
            && by_file_path.is_none();

        let existing = match by_file_path {
            Some(book) => Some(book),
            None => self.catalog.find_book_by_path(&book_path, library_id).await?,
        };

        let (book_id, created) = match existing {
            Some(book) => (book.id, false),
            None => {
                let book = self.create_book(&book_path, &merged).await?;
                tracing::debug!(target: "shelf_scan::scan", book_id = book.id, path = %book_path, "Created book");
                (book.id, true)
            }
        };

        let _book_guard = self.cache.lock_book(book_id).await;

        let relink = if created {
            Relink {
                authors: !merged.authors.is_empty(),
                series: !merged.series.is_empty(),
                genres: !merged.genres.is_empty(),
                tags: !merged.tags.is_empty(),
            }
        } else {
            let mut book = self.catalog.get_book(book_id).await?;
            let (columns, relink) = upgrade_book(&mut book, &merged);
            if !columns.is_empty() {
                self.catalog.update_book(&book, &columns).await?;
                tracing::debug!(target: "shelf_scan::scan", book_id, ?columns, "Upgraded book fields");
            }
            relink
        };
        self.relink(book_id, &merged, relink).await?;

        let stored_cover = match self
            .covers
            .persist(path, &cover_dir(path), merged.cover.as_ref())
            .await
        {
            Ok(stored) => stored,
            Err(e) => {
                tracing::warn!(target: "shelf_scan::scan", path = %path.display(), error = %e, "Cover write failed");
                None
            }
        };

        let narrator_source = present(merged.narrators.is_empty(), merged.narrator_source);
        let file = self
            .catalog
            .create_file(&NewBookFile {
                library_id,
                book_id,
                filepath,
                file_type,
                filesize_bytes: i64::try_from(stat.len()).unwrap_or(i64::MAX),
                cover_image_path: stored_cover
                    .as_ref()
                    .map(|c| c.path.to_string_lossy().into_owned()),
                cover_mime_type: stored_cover.as_ref().map(|c| c.mime_type.clone()),
                cover_source: stored_cover.as_ref().map(|c| c.source),
                narrator_source,
            })
            .await?;

        if !merged.narrators.is_empty() {
            let ids = self.resolve_people(&merged.narrators).await;
            self.catalog.replace_narrators(file.id, &ids).await?;
        }

        if self.write_sidecars {
            self.sync_sidecars(book_id, &classification, path, &merged.narrators)
                .await;
        }

        Ok(FileOutcome::Cataloged { book_id, organize })
    }

    async fn parse(&self, path: &Path, file_type: FileType) -> Result<ParsedMetadata> {
        let adapter = self
            .adapters
            .get(file_type)
            .ok_or_else(|| Error::InvalidFormat(format!("no adapter for {file_type:?}")))?;
        let path = path.to_path_buf();
        tokio::task::spawn_blocking(move || adapter.parse(&path)).await?
    }

    async fn create_book(&self, book_path: &str, merged: &MergedMetadata) -> Result<Book> {
        self.catalog
            .create_book(&NewBook {
                library_id: self.library.id,
                filepath: book_path.to_string(),
                title: merged.title.clone(),
                title_source: merged.title_source,
                author_source: present(merged.authors.is_empty(), merged.author_source),
                series_source: present(merged.series.is_empty(), merged.series_source),
                genre_source: present(merged.genres.is_empty(), merged.genre_source),
                tag_source: present(merged.tags.is_empty(), merged.tag_source),
            })
            .await
    }

    /// Resolve names to person ids, skipping any that fail.
    async fn resolve_people(&self, names: &[String]) -> Vec<i64> {
        let mut ids = Vec::with_capacity(names.len());
        for name in names {
            match self.cache.resolve_person(name, self.library.id).await {
                Ok(person) if !ids.contains(&person.id) => ids.push(person.id),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(target: "shelf_scan::scan", person = %name, error = %e, "Failed to resolve person");
                }
            }
        }
        ids
    }

    async fn relink(&self, book_id: i64, merged: &MergedMetadata, relink: Relink) -> Result<()> {
        let library_id = self.library.id;

        if relink.authors {
            let ids = self.resolve_people(&merged.authors).await;
            self.catalog.replace_authors(book_id, &ids).await?;
        }

        if relink.series {
            let source = merged.series_source.unwrap_or(DataSource::Filepath);
            let mut links: Vec<BookSeriesLink> = Vec::new();
            for entry in &merged.series {
                match self.cache.resolve_series(&entry.name, library_id, source).await {
                    Ok(series) if !links.iter().any(|l| l.series_id == series.id) => {
                        links.push(BookSeriesLink {
                            series_id: series.id,
                            series_number: entry.number,
                            sort_order: entry.sort_order,
                        });
                    }
                    Ok(_) => {}
                    Err(e) => {
                        tracing::warn!(target: "shelf_scan::scan", series = %entry.name, error = %e, "Failed to resolve series");
                    }
                }
            }
            self.catalog.replace_book_series(book_id, &links).await?;
        }

        if relink.genres {
            let mut ids = Vec::new();
            for name in &merged.genres {
                match self.cache.resolve_genre(name, library_id).await {
                    Ok(genre) if !ids.contains(&genre.id) => ids.push(genre.id),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(target: "shelf_scan::scan", genre = %name, error = %e, "Failed to resolve genre"),
                }
            }
            self.catalog.replace_genres(book_id, &ids).await?;
        }

        if relink.tags {
            let mut ids = Vec::new();
            for name in &merged.tags {
                match self.cache.resolve_tag(name, library_id).await {
                    Ok(tag) if !ids.contains(&tag.id) => ids.push(tag.id),
                    Ok(_) => {}
                    Err(e) => tracing::warn!(target: "shelf_scan::scan", tag = %name, error = %e, "Failed to resolve tag"),
                }
            }
            self.catalog.replace_tags(book_id, &ids).await?;
        }

        Ok(())
    }

    /// Write sidecars mirroring the cataloged record. Failures are logged.
    async fn sync_sidecars(
        &self,
        book_id: i64,
        classification: &Classification,
        file_path: &Path,
        narrators: &[String],
    ) {
        let detail = match self.catalog.book_detail(book_id).await {
            Ok(detail) => detail,
            Err(e) => {
                tracing::warn!(target: "shelf_scan::scan", book_id, error = %e, "Sidecar sync skipped");
                return;
            }
        };

        let book_sidecar = BookSidecar {
            title: Some(detail.book.title),
            authors: detail.authors,
            series: detail
                .series
                .into_iter()
                .map(|(name, number)| SidecarSeries { name, number })
                .collect(),
            genres: detail.genres,
            tags: detail.tags,
            ..BookSidecar::default()
        };
        if let Err(e) = self
            .sidecars
            .write_book(&classification.book_path, classification.placement, &book_sidecar)
            .await
        {
            tracing::warn!(target: "shelf_scan::scan", book_id, error = %e, "Book sidecar write failed");
        }

        if !narrators.is_empty() {
            let file_sidecar = FileSidecar {
                narrators: narrators.to_vec(),
                ..FileSidecar::default()
            };
            if let Err(e) = self.sidecars.write_file(file_path, &file_sidecar).await {
                tracing::warn!(target: "shelf_scan::scan", path = %file_path.display(), error = %e, "File sidecar write failed");
            }
        }
    }
}
