//! Cover extraction, persistence and canonical-cover lookup.
//!
//! Every media file gets at most one extracted cover, written next to it as
//! `<file name>.cover.<ext>` (so `Dune.epub` -> `Dune.epub.cover.jpg`).
//! A file already present under that base name, with any extension, is never
//! overwritten: it is adopted with source [`DataSource::ExistingCover`].
//!
//! The canonical per-book cover is resolved when read, see
//! [`canonical_cover`]; no copies are made.

mod normalize;

pub use normalize::{ColorProfileNormalizer, ImageNormalizer};

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::db::{Catalog, FileColumn};
use crate::error::{Error, Result, ResultExt};
use crate::metadata::{AdapterRegistry, CoverCandidate};
use crate::model::{Book, BookFile, DataSource};

const COVER_MARKER: &str = ".cover";

/// Base name (no extension) of the cover extracted from `file_path`.
pub fn cover_base_name(file_path: &Path) -> String {
    let name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    format!("{name}{COVER_MARKER}")
}

/// File extension for a cover MIME type.
pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/png" => "png",
        "image/gif" => "gif",
        "image/webp" => "webp",
        "image/bmp" => "bmp",
        "image/tiff" => "tiff",
        _ => "jpg",
    }
}

/// MIME type for a cover file extension.
pub fn mime_for_extension(ext: &str) -> &'static str {
    match ext.to_ascii_lowercase().as_str() {
        "png" => "image/png",
        "gif" => "image/gif",
        "webp" => "image/webp",
        "bmp" => "image/bmp",
        "tif" | "tiff" => "image/tiff",
        _ => "image/jpeg",
    }
}

/// Any file in `dir` whose stem equals `base_name`.
pub fn find_existing_cover(dir: &Path, base_name: &str) -> Option<PathBuf> {
    let entries = std::fs::read_dir(dir).ok()?;
    entries
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .find(|p| p.file_stem().is_some_and(|s| s.to_string_lossy() == base_name))
}

/// A cover on disk, as recorded on the file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCover {
    pub path: PathBuf,
    pub mime_type: String,
    pub source: DataSource,
}

impl StoredCover {
    /// Copy onto the file's cover columns.
    pub fn apply_to(&self, file: &mut BookFile) {
        file.cover_image_path = Some(self.path.to_string_lossy().into_owned());
        file.cover_mime_type = Some(self.mime_type.clone());
        file.cover_source = Some(self.source);
    }
}

/// Writes extracted covers without clobbering existing ones.
#[derive(Clone)]
pub struct CoverPipeline {
    normalizer: Arc<dyn ImageNormalizer>,
}

impl Default for CoverPipeline {
    fn default() -> Self {
        Self::new(Arc::new(ColorProfileNormalizer))
    }
}

impl std::fmt::Debug for CoverPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoverPipeline").finish_non_exhaustive()
    }
}

impl CoverPipeline {
    pub fn new(normalizer: Arc<dyn ImageNormalizer>) -> Self {
        Self { normalizer }
    }

    /// Adopt an existing cover for `file_path` or write `candidate`.
    ///
    /// Returns `None` when there is neither.
    pub async fn persist(
        &self,
        file_path: &Path,
        cover_dir: &Path,
        candidate: Option<&CoverCandidate>,
    ) -> Result<Option<StoredCover>> {
        let base = cover_base_name(file_path);

        let dir = cover_dir.to_path_buf();
        let lookup = base.clone();
        let existing =
            tokio::task::spawn_blocking(move || find_existing_cover(&dir, &lookup)).await?;
        if let Some(existing) = existing {
            let ext = existing
                .extension()
                .map(|e| e.to_string_lossy().into_owned())
                .unwrap_or_default();
            tracing::debug!(target: "shelf_scan::cover", path = %existing.display(), "Keeping existing cover");
            return Ok(Some(StoredCover {
                mime_type: mime_for_extension(&ext).to_string(),
                path: existing,
                source: DataSource::ExistingCover,
            }));
        }

        let Some(candidate) = candidate.filter(|c| !c.data.is_empty()) else {
            return Ok(None);
        };

        let normalizer = Arc::clone(&self.normalizer);
        let data = candidate.data.clone();
        let mime = candidate.mime_type.clone();
        let dir = cover_dir.to_path_buf();
        let (path, mime_type) = tokio::task::spawn_blocking(move || -> Result<(PathBuf, String)> {
            let (bytes, mime_type) = normalizer.normalize(&data, &mime);
            let path = dir.join(format!("{base}.{}", extension_for_mime(&mime_type)));
            std::fs::write(&path, &bytes)
                .with_context(format!("write cover {}", path.display()))?;
            Ok((path, mime_type))
        })
        .await??;

        tracing::debug!(target: "shelf_scan::cover", path = %path.display(), mime = %mime_type, "Wrote cover");
        Ok(Some(StoredCover {
            path,
            mime_type,
            source: candidate.source,
        }))
    }

    /// Re-extract the cover of an already cataloged file whose cover file
    /// has gone missing. Returns whether a cover was restored.
    pub async fn recover_missing_cover(
        &self,
        catalog: &dyn Catalog,
        adapters: &AdapterRegistry,
        file: &BookFile,
    ) -> Result<bool> {
        if file.cover_mime_type.is_none() {
            return Ok(false);
        }
        let present = match file.cover_image_path.clone() {
            Some(p) => tokio::task::spawn_blocking(move || Path::new(&p).exists()).await?,
            None => false,
        };
        if present {
            return Ok(false);
        }

        let file_path = file.path_buf();
        let Some(cover_dir) = file_path.parent().map(Path::to_path_buf) else {
            return Ok(false);
        };
        let adapter = adapters
            .get(file.file_type)
            .ok_or_else(|| Error::InvalidFormat(format!("no adapter for {:?}", file.file_type)))?;

        let parse_path = file_path.clone();
        let parsed = tokio::task::spawn_blocking(move || adapter.parse(&parse_path)).await??;
        let candidate = parsed.cover.map(|c| CoverCandidate {
            data: c.data,
            mime_type: c.mime_type,
            source: parsed.source,
        });

        let Some(stored) = self
            .persist(&file_path, &cover_dir, candidate.as_ref())
            .await?
        else {
            return Ok(false);
        };

        let mut updated = file.clone();
        stored.apply_to(&mut updated);
        catalog.update_file(&updated, &[FileColumn::Cover]).await?;

        tracing::info!(target: "shelf_scan::cover", file = %file.filepath, "Recovered missing cover");
        Ok(true)
    }
}

/// Canonical cover for a book.
///
/// Grouped books prefer a `cover.<ext>` (or `audiobook_cover.<ext>` when the
/// book has audio files) in the book directory; otherwise the first file's
/// own cover that still exists.
pub fn canonical_cover(book: &Book, files: &[BookFile]) -> Option<PathBuf> {
    let book_path = book.path_buf();
    if book_path.is_dir() {
        let stem = if files.iter().any(|f| f.file_type.is_audio()) {
            "audiobook_cover"
        } else {
            "cover"
        };
        if let Some(found) = find_existing_cover(&book_path, stem) {
            return Some(found);
        }
    }

    files
        .iter()
        .filter_map(|f| f.cover_image_path.as_deref())
        .map(PathBuf::from)
        .find(|p| p.exists())
}
