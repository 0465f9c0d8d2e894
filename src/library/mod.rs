//! Scan orchestration.
//!
//! A [`Scanner`] runs one scan job over every configured library:
//!
//! 1. discover files (walk + content sniff) before any processing starts
//! 2. process files on up to `workers` concurrent tasks, sharing one
//!    [`ResolutionCache`] for the whole job
//! 3. organize the root-level books marked during the library's pass
//! 4. after all libraries: orphan cleanup and search index rebuild
//!
//! Organization is deferred to step 3 so that renames never invalidate the
//! path-based lookups of files still waiting to be scanned.

mod classify;
mod process;

pub use classify::{Classification, Placement, classify, cover_dir, file_base_name};
pub use process::{FileOutcome, FileProcessor};

use futures::StreamExt;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::cover::{CoverPipeline, ImageNormalizer};
use crate::db::{Catalog, DimensionStore, SearchIndex};
use crate::error::{Error, Result};
use crate::metadata::AdapterRegistry;
use crate::model::Library;
use crate::organizer::{self, OrganizeOutcome};
use crate::resolve::ResolutionCache;
use crate::scanner::{self, ContentSniffer, InferSniffer};
use crate::sidecar::{JsonSidecarStore, SidecarStore};

/// Progress notifications from a running scan.
#[derive(Debug, Clone, PartialEq)]
pub enum ScanEvent {
    LibraryStarted { library_id: i64, name: String },
    DiscoveryComplete { library_id: i64, total: usize },
    FileProcessed(PathBuf),
    FileSkipped { path: PathBuf, reason: String },
    BookOrganized { book_id: i64, path: PathBuf },
    LibraryComplete { library_id: i64 },
}

#[derive(Debug, Clone)]
pub struct ScanOptions {
    /// Files processed concurrently; at least one
    pub workers: usize,
    /// Write sidecars after cataloging each file
    pub write_sidecars: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            workers: 4,
            write_sidecars: true,
        }
    }
}

/// Totals for a finished (or cancelled) job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    pub libraries: usize,
    /// Files that passed both discovery filters
    pub discovered: usize,
    pub cataloged: usize,
    /// Already in the catalog
    pub unchanged: usize,
    pub covers_recovered: usize,
    /// Content mismatches plus per-file failures
    pub skipped: usize,
    pub organized: usize,
    pub cancelled: bool,
}

/// Runs scan jobs against a catalog.
pub struct Scanner {
    catalog: Arc<dyn Catalog>,
    dimensions: Arc<dyn DimensionStore>,
    index: Arc<dyn SearchIndex>,
    adapters: Arc<AdapterRegistry>,
    sidecars: Arc<dyn SidecarStore>,
    sniffer: Arc<dyn ContentSniffer>,
    covers: CoverPipeline,
    options: ScanOptions,
    events: Option<UnboundedSender<ScanEvent>>,
}

impl std::fmt::Debug for Scanner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scanner")
            .field("adapters", &self.adapters)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

impl Scanner {
    /// Scanner with the built-in adapters, JSON sidecars, `infer` sniffing
    /// and the default image normalizer.
    pub fn new<C>(catalog: Arc<C>) -> Self
    where
        C: Catalog + SearchIndex + 'static,
    {
        Self {
            catalog: catalog.clone(),
            dimensions: catalog.clone(),
            index: catalog,
            adapters: Arc::new(AdapterRegistry::with_defaults()),
            sidecars: Arc::new(JsonSidecarStore),
            sniffer: Arc::new(InferSniffer::new()),
            covers: CoverPipeline::default(),
            options: ScanOptions::default(),
            events: None,
        }
    }

    pub fn with_adapters(mut self, adapters: AdapterRegistry) -> Self {
        self.adapters = Arc::new(adapters);
        self
    }

    pub fn with_sidecars(mut self, sidecars: Arc<dyn SidecarStore>) -> Self {
        self.sidecars = sidecars;
        self
    }

    pub fn with_sniffer(mut self, sniffer: Arc<dyn ContentSniffer>) -> Self {
        self.sniffer = sniffer;
        self
    }

    pub fn with_normalizer(mut self, normalizer: Arc<dyn ImageNormalizer>) -> Self {
        self.covers = CoverPipeline::new(normalizer);
        self
    }

    pub fn with_options(mut self, options: ScanOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_events(mut self, events: UnboundedSender<ScanEvent>) -> Self {
        self.events = Some(events);
        self
    }

    fn emit(&self, event: ScanEvent) {
        if let Some(tx) = &self.events {
            // Receiver gone just means nobody is watching
            let _ = tx.send(event);
        }
    }

    /// Scan every library in the catalog.
    ///
    /// Cancellation stops new files from starting; work in flight finishes
    /// and the partial report is returned with `cancelled` set.
    pub async fn run(&self, cancel: CancellationToken) -> Result<ScanReport> {
        let cache = Arc::new(ResolutionCache::new(Arc::clone(&self.dimensions)));
        let libraries = self.catalog.list_libraries().await?;
        let mut report = ScanReport::default();

        tracing::info!(target: "shelf_scan::scan", libraries = libraries.len(), "Scan started");

        for library in libraries {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }
            self.scan_library(library, &cache, &cancel, &mut report).await?;
            report.libraries += 1;
        }

        if report.cancelled {
            tracing::info!(target: "shelf_scan::scan", ?report, "Scan cancelled");
            return Ok(report);
        }

        self.cleanup().await;

        tracing::info!(
            target: "shelf_scan::scan",
            discovered = report.discovered,
            cataloged = report.cataloged,
            unchanged = report.unchanged,
            skipped = report.skipped,
            organized = report.organized,
            persons = cache.person_count(),
            series = cache.series_count(),
            "Scan complete"
        );
        Ok(report)
    }

    async fn scan_library(
        &self,
        library: Library,
        cache: &Arc<ResolutionCache>,
        cancel: &CancellationToken,
        report: &mut ScanReport,
    ) -> Result<()> {
        let library_id = library.id;
        tracing::info!(target: "shelf_scan::scan", library = %library.name, paths = library.paths.len(), "Scanning library");
        self.emit(ScanEvent::LibraryStarted {
            library_id,
            name: library.name.clone(),
        });

        let discovery = scanner::discover(library.paths.clone(), Arc::clone(&self.sniffer)).await?;
        report.discovered += discovery.files.len();
        report.skipped += discovery.rejected.len();
        for rejected in discovery.rejected {
            self.emit(ScanEvent::FileSkipped {
                path: rejected.path,
                reason: rejected.reason,
            });
        }
        self.emit(ScanEvent::DiscoveryComplete {
            library_id,
            total: discovery.files.len(),
        });

        let processor = Arc::new(FileProcessor {
            catalog: Arc::clone(&self.catalog),
            cache: Arc::clone(cache),
            adapters: Arc::clone(&self.adapters),
            sidecars: Arc::clone(&self.sidecars),
            covers: self.covers.clone(),
            library,
            write_sidecars: self.options.write_sidecars,
        });

        // Child token: a fatal file error stops this job without touching
        // the caller's token.
        let job = cancel.child_token();
        let mut results = futures::stream::iter(discovery.files)
            .map(|file| {
                let processor = Arc::clone(&processor);
                let job = job.clone();
                async move {
                    if job.is_cancelled() {
                        return (file.path, Err(Error::Cancelled));
                    }
                    let path = file.path.clone();
                    let handle = tokio::spawn(async move {
                        processor.process(&file.path, file.file_type).await
                    });
                    let result = match handle.await {
                        Ok(result) => result,
                        Err(e) => Err(Error::from(e)),
                    };
                    (path, result)
                }
            })
            .buffer_unordered(self.options.workers.max(1));

        let mut marked = Vec::new();
        let mut fatal: Option<Error> = None;

        while let Some((path, result)) = results.next().await {
            match result {
                Ok(FileOutcome::Cataloged { book_id, organize }) => {
                    report.cataloged += 1;
                    if organize {
                        marked.push(book_id);
                    }
                    self.emit(ScanEvent::FileProcessed(path));
                }
                Ok(FileOutcome::AlreadyCataloged { cover_recovered }) => {
                    report.unchanged += 1;
                    if cover_recovered {
                        report.covers_recovered += 1;
                    }
                    self.emit(ScanEvent::FileProcessed(path));
                }
                Ok(FileOutcome::Skipped { reason }) => {
                    report.skipped += 1;
                    self.emit(ScanEvent::FileSkipped { path, reason });
                }
                Err(Error::Cancelled) => {}
                Err(e) => {
                    tracing::error!(target: "shelf_scan::scan", path = %path.display(), error = %e, "Scan job failed");
                    if fatal.is_none() {
                        fatal = Some(e.context(format!("scan {}", path.display())));
                    }
                    job.cancel();
                }
            }
        }
        drop(results);

        if let Some(e) = fatal {
            return Err(e);
        }
        if cancel.is_cancelled() {
            report.cancelled = true;
        }

        // Marked books are organized even after cancellation; a rescan
        // would no longer mark them.
        for book_id in marked {
            match organizer::organize_book(self.catalog.as_ref(), book_id).await {
                Ok(OrganizeOutcome::Moved { to, .. }) => {
                    report.organized += 1;
                    self.emit(ScanEvent::BookOrganized { book_id, path: to });
                }
                Ok(outcome) => {
                    tracing::debug!(target: "shelf_scan::scan", book_id, ?outcome, "Book not moved");
                }
                Err(e) => {
                    tracing::warn!(target: "shelf_scan::scan", book_id, error = %e, "Failed to organize book");
                }
            }
        }

        self.emit(ScanEvent::LibraryComplete { library_id });
        Ok(())
    }

    /// Post-scan maintenance. Failures are logged.
    async fn cleanup(&self) {
        match self.catalog.delete_orphaned_series().await {
            Ok(removed) if removed > 0 => {
                tracing::info!(target: "shelf_scan::scan", removed, "Removed orphaned series");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "shelf_scan::scan", error = %e, "Orphaned series cleanup failed"),
        }

        match self.catalog.delete_orphaned_people().await {
            Ok(removed) if removed > 0 => {
                tracing::info!(target: "shelf_scan::scan", removed, "Removed orphaned people");
            }
            Ok(_) => {}
            Err(e) => tracing::warn!(target: "shelf_scan::scan", error = %e, "Orphaned people cleanup failed"),
        }

        if let Err(e) = self.index.rebuild().await {
            tracing::warn!(target: "shelf_scan::scan", error = %e, "Search index rebuild failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LibraryConfig;
    use crate::db::{CountedTable, SqliteCatalog};
    use crate::metadata::{EmbeddedCover, FormatAdapter, ParsedMetadata};
    use crate::model::{DataSource, FileType};
    use crate::sidecar::{BookSidecar, FileSidecar};
    use crate::test_utils::{insert_library, temp_catalog, write_file};
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::TempDir;

    /// Sniffs by extension so fixtures can be plain bytes.
    struct ExtensionSniffer;

    impl ContentSniffer for ExtensionSniffer {
        fn detect(&self, path: &Path) -> Option<String> {
            FileType::from_path(path).map(|t| t.accepted_mime_types()[0].to_string())
        }
    }

    /// Audio adapter returning fixed metadata.
    struct FixedAudio(ParsedMetadata);

    impl FormatAdapter for FixedAudio {
        fn file_type(&self) -> FileType {
            FileType::M4b
        }

        fn parse(&self, _path: &Path) -> crate::error::Result<ParsedMetadata> {
            Ok(self.0.clone())
        }
    }

    struct Failing(FileType);

    impl FormatAdapter for Failing {
        fn file_type(&self) -> FileType {
            self.0
        }

        fn parse(&self, path: &Path) -> crate::error::Result<ParsedMetadata> {
            Err(Error::metadata(path, "corrupt"))
        }
    }

    fn adapters_with(adapter: Arc<dyn FormatAdapter>) -> AdapterRegistry {
        let mut adapters = AdapterRegistry::with_defaults();
        adapters.register(adapter);
        adapters
    }

    fn empty_audio() -> Arc<dyn FormatAdapter> {
        Arc::new(FixedAudio(ParsedMetadata::empty(DataSource::M4bMetadata)))
    }

    async fn setup(organize: bool) -> (Arc<SqliteCatalog>, TempDir, TempDir) {
        let (catalog, db_dir) = temp_catalog().await;
        let lib = tempfile::tempdir().unwrap();
        insert_library(&catalog, &lib.path().to_string_lossy(), organize).await;
        (Arc::new(catalog), db_dir, lib)
    }

    fn scanner(catalog: &Arc<SqliteCatalog>) -> Scanner {
        Scanner::new(Arc::clone(catalog))
            .with_sniffer(Arc::new(ExtensionSniffer))
            .with_adapters(adapters_with(empty_audio()))
            .with_options(ScanOptions {
                workers: 4,
                write_sidecars: false,
            })
    }

    async fn count(catalog: &SqliteCatalog, table: CountedTable) -> i64 {
        catalog.count(table).await.unwrap()
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_scan_catalogs_root_level_and_grouped_books() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "[Frank Herbert] Dune.epub", b"epub");
        write_file(lib.path(), "Saga/Saga 01.cbz", b"cbz");
        write_file(lib.path(), "Saga/Saga 02.cbz", b"cbz");
        write_file(lib.path(), "notes.txt", b"text");

        let report = scanner(&catalog).run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.discovered, 3);
        assert_eq!(report.cataloged, 3);
        assert_eq!(report.libraries, 1);
        assert!(!report.cancelled);

        assert_eq!(count(&catalog, CountedTable::Books).await, 2);
        assert_eq!(count(&catalog, CountedTable::Files).await, 3);
        assert_eq!(count(&catalog, CountedTable::Persons).await, 1);

        let lib_id = catalog.list_libraries().await.unwrap()[0].id;
        let dune_path = lib.path().join("[Frank Herbert] Dune.epub");
        let dune = catalog
            .find_book_by_path(&dune_path.to_string_lossy(), lib_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(dune.title, "Dune");
        assert_eq!(dune.author_source, Some(DataSource::Filepath));
        let detail = catalog.book_detail(dune.id).await.unwrap();
        assert_eq!(detail.authors, vec!["Frank Herbert"]);

        let saga = catalog
            .find_book_by_path(&lib.path().join("Saga").to_string_lossy(), lib_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(saga.title, "Saga");
        assert_eq!(catalog.list_files_for_book(saga.id).await.unwrap().len(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_rescan_is_idempotent() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "[Ann Leckie] Ancillary Justice.epub", b"epub");
        write_file(lib.path(), "Imperial Radch/[Ann Leckie] part1.m4b", b"m4b");
        write_file(lib.path(), "Imperial Radch/[Ann Leckie] part2.m4b", b"m4b");

        let scanner = scanner(&catalog).with_options(ScanOptions {
            workers: 4,
            write_sidecars: true,
        });
        scanner.run(CancellationToken::new()).await.unwrap();

        let lib_id = catalog.list_libraries().await.unwrap()[0].id;
        let before = catalog.list_books(lib_id).await.unwrap();
        let tables = [
            CountedTable::Books,
            CountedTable::Files,
            CountedTable::Persons,
            CountedTable::Series,
        ];
        let mut counts = Vec::new();
        for table in tables {
            counts.push(count(&catalog, table).await);
        }

        let second = scanner.run(CancellationToken::new()).await.unwrap();
        assert_eq!(second.cataloged, 0);
        assert_eq!(second.unchanged, 3);

        let after = catalog.list_books(lib_id).await.unwrap();
        assert_eq!(before, after);
        for (table, expected) in tables.into_iter().zip(counts) {
            assert_eq!(count(&catalog, table).await, expected);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_files_share_one_book_and_author() {
        let (catalog, _db, lib) = setup(false).await;
        for i in 0..20 {
            write_file(
                lib.path(),
                &format!("[Same Author] Long Book/part{i:02}.m4b"),
                b"m4b",
            );
        }

        let scanner = scanner(&catalog).with_options(ScanOptions {
            workers: 8,
            write_sidecars: false,
        });
        let report = scanner.run(CancellationToken::new()).await.unwrap();

        assert_eq!(report.cataloged, 20);
        assert_eq!(count(&catalog, CountedTable::Books).await, 1);
        assert_eq!(count(&catalog, CountedTable::Files).await, 20);
        assert_eq!(count(&catalog, CountedTable::Persons).await, 1);
    }

    #[tokio::test]
    async fn test_title_falls_back_to_file_name() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "[Author]{Narrator}/track01.m4b", b"m4b");

        scanner(&catalog).run(CancellationToken::new()).await.unwrap();

        let lib_id = catalog.list_libraries().await.unwrap()[0].id;
        let books = catalog.list_books(lib_id).await.unwrap();
        assert_eq!(books.len(), 1);
        assert_eq!(books[0].title, "track01");

        let files = catalog.list_files_for_book(books[0].id).await.unwrap();
        assert_eq!(files[0].narrator_source, Some(DataSource::Filepath));
        assert_eq!(
            catalog.file_narrators(files[0].id).await.unwrap(),
            vec!["Narrator"]
        );
        assert_eq!(
            catalog.book_detail(books[0].id).await.unwrap().authors,
            vec!["Author"]
        );
    }

    #[tokio::test]
    async fn test_sidecar_outranks_filename_and_metadata() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "[Wrong Author] Dune.m4b", b"m4b");
        write_file(
            lib.path(),
            "[Wrong Author] Dune.m4b.book.metadata.json",
            br#"{"title": "Dune Messiah", "authors": ["Frank Herbert"], "series": [{"name": "Dune", "number": 2}]}"#,
        );

        let adapter = Arc::new(FixedAudio(ParsedMetadata {
            title: Some("Dune (Unabridged)".to_string()),
            ..ParsedMetadata::empty(DataSource::M4bMetadata)
        }));
        Scanner::new(Arc::clone(&catalog))
            .with_sniffer(Arc::new(ExtensionSniffer))
            .with_adapters(adapters_with(adapter))
            .run(CancellationToken::new())
            .await
            .unwrap();

        let lib_id = catalog.list_libraries().await.unwrap()[0].id;
        let book = &catalog.list_books(lib_id).await.unwrap()[0];
        assert_eq!(book.title, "Dune Messiah");
        assert_eq!(book.title_source, DataSource::Sidecar);
        assert_eq!(book.author_source, Some(DataSource::Sidecar));

        let detail = catalog.book_detail(book.id).await.unwrap();
        assert_eq!(detail.authors, vec!["Frank Herbert"]);
        assert_eq!(detail.series, vec![("Dune".to_string(), Some(2.0))]);
    }

    #[tokio::test]
    async fn test_existing_cover_is_kept() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "Dune.m4b", b"m4b");
        let custom = write_file(lib.path(), "Dune.m4b.cover.webp", b"user art");

        let adapter = Arc::new(FixedAudio(ParsedMetadata {
            cover: Some(EmbeddedCover {
                data: b"embedded".to_vec(),
                mime_type: "image/jpeg".to_string(),
            }),
            ..ParsedMetadata::empty(DataSource::M4bMetadata)
        }));
        Scanner::new(Arc::clone(&catalog))
            .with_sniffer(Arc::new(ExtensionSniffer))
            .with_adapters(adapters_with(adapter))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(std::fs::read(&custom).unwrap(), b"user art");
        let lib_id = catalog.list_libraries().await.unwrap()[0].id;
        let file = catalog
            .find_file(&lib.path().join("Dune.m4b").to_string_lossy(), lib_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(file.cover_source, Some(DataSource::ExistingCover));
        assert_eq!(file.cover_image_path.map(PathBuf::from), Some(custom));
    }

    #[tokio::test]
    async fn test_audio_parse_failure_skips_file() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "broken.m4b", b"m4b");
        write_file(lib.path(), "Dune.epub", b"epub");

        let report = Scanner::new(Arc::clone(&catalog))
            .with_sniffer(Arc::new(ExtensionSniffer))
            .with_adapters(adapters_with(Arc::new(Failing(FileType::M4b))))
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.cataloged, 1);
        assert_eq!(report.skipped, 1);
    }

    #[tokio::test]
    async fn test_ebook_parse_failure_is_fatal() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "broken.epub", b"epub");

        let result = Scanner::new(Arc::clone(&catalog))
            .with_sniffer(Arc::new(ExtensionSniffer))
            .with_adapters(adapters_with(Arc::new(Failing(FileType::Epub))))
            .run(CancellationToken::new())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_content_mismatch_is_skipped() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "not really.epub", b"plain text");

        // Real sniffing: plain text has no recognizable type
        let report = Scanner::new(Arc::clone(&catalog))
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.discovered, 0);
        assert_eq!(report.skipped, 1);
        assert_eq!(count(&catalog, CountedTable::Books).await, 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "Dune.epub", b"epub");

        let cancel = CancellationToken::new();
        cancel.cancel();
        let report = scanner(&catalog).run(cancel).await.unwrap();

        assert!(report.cancelled);
        assert_eq!(report.cataloged, 0);
        assert_eq!(count(&catalog, CountedTable::Files).await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_organize_moves_new_root_level_books_after_scan() {
        let (catalog, _db, lib) = setup(true).await;
        write_file(lib.path(), "[Frank Herbert] Dune.epub", b"epub");
        write_file(lib.path(), "[Frank Herbert] Children of Dune.epub", b"epub");
        write_file(lib.path(), "Grouped/part1.m4b", b"m4b");

        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let report = scanner(&catalog)
            .with_events(tx)
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.cataloged, 3);
        assert_eq!(report.organized, 2);
        let dir = lib.path().join("[Frank Herbert] Dune");
        assert!(dir.join("[Frank Herbert] Dune.epub").exists());
        assert!(lib.path().join("Grouped/part1.m4b").exists());

        let mut events = Vec::new();
        while let Ok(event) = rx.try_recv() {
            events.push(event);
        }
        assert!(matches!(events.first(), Some(ScanEvent::LibraryStarted { .. })));
        assert!(events.contains(&ScanEvent::DiscoveryComplete {
            library_id: catalog.list_libraries().await.unwrap()[0].id,
            total: 3
        }));
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, ScanEvent::BookOrganized { .. }))
                .count(),
            2
        );

        // Moved files are recognized by their new path
        let second = scanner(&catalog).run(CancellationToken::new()).await.unwrap();
        assert_eq!(second.cataloged, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(second.organized, 0);
        assert_eq!(count(&catalog, CountedTable::Books).await, 3);
    }

    #[tokio::test]
    async fn test_same_stem_root_files_keep_separate_sidecars() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "Dune.epub", b"epub");
        write_file(lib.path(), "Dune.m4b", b"m4b");

        let adapter = Arc::new(FixedAudio(ParsedMetadata {
            title: Some("Dune Messiah".to_string()),
            ..ParsedMetadata::empty(DataSource::M4bMetadata)
        }));
        // One worker: the epub's sidecar is on disk before the m4b is read.
        let report = scanner(&catalog)
            .with_adapters(adapters_with(adapter))
            .with_options(ScanOptions {
                workers: 1,
                write_sidecars: true,
            })
            .run(CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(report.cataloged, 2);

        let lib_id = catalog.list_libraries().await.unwrap()[0].id;
        let epub = catalog
            .find_book_by_path(&lib.path().join("Dune.epub").to_string_lossy(), lib_id)
            .await
            .unwrap()
            .unwrap();
        let m4b = catalog
            .find_book_by_path(&lib.path().join("Dune.m4b").to_string_lossy(), lib_id)
            .await
            .unwrap()
            .unwrap();
        assert_ne!(epub.id, m4b.id);
        assert_eq!(epub.title, "Dune");
        assert_eq!(m4b.title, "Dune Messiah");
        assert!(lib.path().join("Dune.epub.book.metadata.json").exists());
        assert!(lib.path().join("Dune.m4b.book.metadata.json").exists());
    }

    #[tokio::test]
    async fn test_rescan_recovers_deleted_cover() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "Dune.m4b", b"m4b");

        let adapter = Arc::new(FixedAudio(ParsedMetadata {
            cover: Some(EmbeddedCover {
                data: b"embedded".to_vec(),
                mime_type: "image/jpeg".to_string(),
            }),
            ..ParsedMetadata::empty(DataSource::M4bMetadata)
        }));
        let scanner = scanner(&catalog).with_adapters(adapters_with(adapter));

        scanner.run(CancellationToken::new()).await.unwrap();
        let cover = lib.path().join("Dune.m4b.cover.jpg");
        assert!(cover.exists());
        std::fs::remove_file(&cover).unwrap();

        let second = scanner.run(CancellationToken::new()).await.unwrap();
        assert_eq!(second.unchanged, 1);
        assert_eq!(second.covers_recovered, 1);
        assert_eq!(std::fs::read(&cover).unwrap(), b"embedded");

        // Nothing left to recover
        let third = scanner.run(CancellationToken::new()).await.unwrap();
        assert_eq!(third.covers_recovered, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_overlapping_library_paths_catalog_once() {
        let (catalog, _db) = temp_catalog().await;
        let catalog = Arc::new(catalog);
        let lib = tempfile::tempdir().unwrap();
        let sub = lib.path().join("sub");
        write_file(&sub, "Dune.epub", b"epub");
        write_file(&sub, "Children of Dune.epub", b"epub");
        catalog
            .upsert_library(&LibraryConfig {
                name: "overlapping".to_string(),
                paths: vec![lib.path().to_path_buf(), sub.clone()],
                organize_file_structure: false,
            })
            .await
            .unwrap();

        let report = scanner(&catalog).run(CancellationToken::new()).await.unwrap();
        assert_eq!(report.discovered, 2);
        assert_eq!(report.cataloged, 2);
        assert_eq!(count(&catalog, CountedTable::Files).await, 2);
    }

    /// JSON sidecars, counting book sidecar reads that found something.
    #[derive(Default)]
    struct CountingSidecars {
        inner: JsonSidecarStore,
        book_hits: AtomicUsize,
    }

    #[async_trait]
    impl SidecarStore for CountingSidecars {
        async fn read_book(
            &self,
            book_path: &Path,
            placement: Placement,
        ) -> crate::error::Result<Option<BookSidecar>> {
            let found = self.inner.read_book(book_path, placement).await?;
            if found.is_some() {
                self.book_hits.fetch_add(1, Ordering::SeqCst);
            }
            Ok(found)
        }

        async fn read_file(&self, file_path: &Path) -> crate::error::Result<Option<FileSidecar>> {
            self.inner.read_file(file_path).await
        }

        async fn write_book(
            &self,
            book_path: &Path,
            placement: Placement,
            sidecar: &BookSidecar,
        ) -> crate::error::Result<()> {
            self.inner.write_book(book_path, placement, sidecar).await
        }

        async fn write_file(
            &self,
            file_path: &Path,
            sidecar: &FileSidecar,
        ) -> crate::error::Result<()> {
            self.inner.write_file(file_path, sidecar).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_sibling_reads_book_sidecar_written_under_path_lock() {
        let (catalog, _db, lib) = setup(false).await;
        write_file(lib.path(), "[Ann Leckie] Ancillary Sword/part1.m4b", b"m4b");
        write_file(lib.path(), "[Ann Leckie] Ancillary Sword/part2.m4b", b"m4b");

        let sidecars = Arc::new(CountingSidecars::default());
        let report = scanner(&catalog)
            .with_sidecars(sidecars.clone())
            .with_options(ScanOptions {
                workers: 2,
                write_sidecars: true,
            })
            .run(CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(report.cataloged, 2);
        // First sibling finds nothing; the second sees the first one's write.
        assert_eq!(sidecars.book_hits.load(Ordering::SeqCst), 1);
        assert_eq!(count(&catalog, CountedTable::Books).await, 1);
    }
}
