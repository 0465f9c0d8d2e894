//! Per-book and per-file metadata override files.
//!
//! Sidecars are JSON documents stored next to the media:
//! - root-level book `Dune.epub` -> `Dune.epub.book.metadata.json`
//! - grouped book `Dune/` -> `Dune/Dune.metadata.json`
//! - any file `Dune.epub` -> `Dune.epub.metadata.json` (file-level fields)
//!
//! They are the highest-priority metadata source. Reads of a missing sidecar
//! return `Ok(None)`; writes go to a temp file and are renamed into place.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::library::Placement;

/// Current sidecar schema version.
pub const SIDECAR_VERSION: u32 = 1;

const SIDECAR_SUFFIX: &str = ".metadata.json";
const BOOK_MARKER: &str = ".book";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidecarSeries {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub number: Option<f64>,
}

/// Book-level overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BookSidecar {
    pub version: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub series: Vec<SidecarSeries>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
}

impl Default for BookSidecar {
    fn default() -> Self {
        Self {
            version: SIDECAR_VERSION,
            title: None,
            authors: Vec::new(),
            series: Vec::new(),
            genres: Vec::new(),
            tags: Vec::new(),
        }
    }
}

/// File-level overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FileSidecar {
    pub version: u32,
    pub narrators: Vec<String>,
}

impl Default for FileSidecar {
    fn default() -> Self {
        Self {
            version: SIDECAR_VERSION,
            narrators: Vec::new(),
        }
    }
}

/// Location of the book sidecar for a book path.
pub fn book_sidecar_path(book_path: &Path, placement: Placement) -> PathBuf {
    match placement {
        Placement::Grouped => {
            let name = book_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            book_path.join(format!("{name}{SIDECAR_SUFFIX}"))
        }
        // Full file name: `Dune.epub` and `Dune.m4b` are different books.
        Placement::RootLevel => {
            let name = book_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            book_path.with_file_name(format!("{name}{BOOK_MARKER}{SIDECAR_SUFFIX}"))
        }
    }
}

/// Location of the file sidecar for a media file.
pub fn file_sidecar_path(file_path: &Path) -> PathBuf {
    let name = file_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    file_path.with_file_name(format!("{name}{SIDECAR_SUFFIX}"))
}

/// Read/write access to sidecars.
#[async_trait]
pub trait SidecarStore: Send + Sync {
    async fn read_book(
        &self,
        book_path: &Path,
        placement: Placement,
    ) -> Result<Option<BookSidecar>>;

    async fn read_file(&self, file_path: &Path) -> Result<Option<FileSidecar>>;

    async fn write_book(
        &self,
        book_path: &Path,
        placement: Placement,
        sidecar: &BookSidecar,
    ) -> Result<()>;

    async fn write_file(&self, file_path: &Path, sidecar: &FileSidecar) -> Result<()>;
}

/// Pretty-printed JSON sidecars on the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonSidecarStore;

impl JsonSidecarStore {
    fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<Option<T>> {
        let contents = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(Error::sidecar(path, e.to_string())),
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::sidecar(path, e.to_string()))
    }

    fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
        let json =
            serde_json::to_string_pretty(value).map_err(|e| Error::sidecar(path, e.to_string()))?;

        // Write atomically (write to temp, then rename)
        let temp_path = path.with_extension("json.tmp");
        std::fs::write(&temp_path, json).map_err(|e| Error::sidecar(&temp_path, e.to_string()))?;
        std::fs::rename(&temp_path, path).map_err(|e| Error::sidecar(path, e.to_string()))?;

        tracing::debug!(target: "shelf_scan::sidecar", path = %path.display(), "Wrote sidecar");
        Ok(())
    }
}

#[async_trait]
impl SidecarStore for JsonSidecarStore {
    async fn read_book(
        &self,
        book_path: &Path,
        placement: Placement,
    ) -> Result<Option<BookSidecar>> {
        let path = book_sidecar_path(book_path, placement);
        tokio::task::spawn_blocking(move || Self::read_json(&path)).await?
    }

    async fn read_file(&self, file_path: &Path) -> Result<Option<FileSidecar>> {
        let path = file_sidecar_path(file_path);
        tokio::task::spawn_blocking(move || Self::read_json(&path)).await?
    }

    async fn write_book(
        &self,
        book_path: &Path,
        placement: Placement,
        sidecar: &BookSidecar,
    ) -> Result<()> {
        let path = book_sidecar_path(book_path, placement);
        let sidecar = sidecar.clone();
        tokio::task::spawn_blocking(move || Self::write_json(&path, &sidecar)).await?
    }

    async fn write_file(&self, file_path: &Path, sidecar: &FileSidecar) -> Result<()> {
        let path = file_sidecar_path(file_path);
        let sidecar = sidecar.clone();
        tokio::task::spawn_blocking(move || Self::write_json(&path, &sidecar)).await?
    }
}
