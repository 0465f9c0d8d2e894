//! Metadata extraction and merging.
//!
//! Each recognized container has a [`FormatAdapter`] that turns a file into
//! a normalized [`ParsedMetadata`] record. The [`merge`] module combines that
//! record with filename conventions and sidecar overrides.
//!
//! Adapters are synchronous; the scanner runs them on the blocking pool.

mod audiobook;
pub mod merge;
pub mod patterns;
pub mod volume;

pub use audiobook::AudiobookAdapter;
pub use merge::{CoverCandidate, MergeInput, MergedMetadata, SeriesEntry, merge};

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use crate::error::Result;
use crate::model::{DataSource, FileType};

/// Cover image bytes as found inside a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmbeddedCover {
    pub data: Vec<u8>,
    pub mime_type: String,
}

/// Normalized output of a format adapter.
///
/// Empty strings and empty lists mean "not present"; the merge engine never
/// lets them overwrite anything.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedMetadata {
    pub title: Option<String>,
    pub authors: Vec<String>,
    pub narrators: Vec<String>,
    pub series: Option<String>,
    pub series_number: Option<f64>,
    pub genres: Vec<String>,
    pub tags: Vec<String>,
    pub cover: Option<EmbeddedCover>,
    /// Stamped on every field taken from this record
    pub source: DataSource,
}

impl ParsedMetadata {
    pub fn empty(source: DataSource) -> Self {
        Self {
            title: None,
            authors: Vec::new(),
            narrators: Vec::new(),
            series: None,
            series_number: None,
            genres: Vec::new(),
            tags: Vec::new(),
            cover: None,
            source,
        }
    }
}

/// Per-format metadata reader.
pub trait FormatAdapter: Send + Sync {
    fn file_type(&self) -> FileType;

    /// Fails only on unreadable or corrupt input.
    fn parse(&self, path: &Path) -> Result<ParsedMetadata>;
}

/// Adapter for containers whose internals are not read; everything comes
/// from the filename and sidecars.
#[derive(Debug, Clone, Copy)]
pub struct FilenameOnlyAdapter {
    file_type: FileType,
}

impl FilenameOnlyAdapter {
    pub fn new(file_type: FileType) -> Self {
        Self { file_type }
    }
}

impl FormatAdapter for FilenameOnlyAdapter {
    fn file_type(&self) -> FileType {
        self.file_type
    }

    fn parse(&self, path: &Path) -> Result<ParsedMetadata> {
        // Still surface unreadable files as adapter failures.
        std::fs::metadata(path)
            .map_err(|e| crate::error::Error::metadata(path, e.to_string()))?;
        Ok(ParsedMetadata::empty(self.file_type.metadata_source()))
    }
}

/// Adapters keyed by file type.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<FileType, Arc<dyn FormatAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in adapter for every recognized type.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(FilenameOnlyAdapter::new(FileType::Epub)));
        registry.register(Arc::new(FilenameOnlyAdapter::new(FileType::Cbz)));
        registry.register(Arc::new(AudiobookAdapter));
        registry
    }

    /// Replace the adapter for the adapter's own file type.
    pub fn register(&mut self, adapter: Arc<dyn FormatAdapter>) {
        self.adapters.insert(adapter.file_type(), adapter);
    }

    pub fn get(&self, file_type: FileType) -> Option<Arc<dyn FormatAdapter>> {
        self.adapters.get(&file_type).cloned()
    }
}

impl std::fmt::Debug for AdapterRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdapterRegistry")
            .field("types", &self.adapters.keys().collect::<Vec<_>>())
            .finish()
    }
}
