//! Core data models for the catalog.
//!
//! Defines the primary entities: [`Library`], [`Book`], [`BookFile`] and the
//! shared dimensions ([`Person`], [`Series`], [`Genre`], [`Tag`]). Rows map
//! through SQLx; provenance is tracked with [`DataSource`].
//!
//! # Database Schema
//!
//! - `libraries`, `library_paths` - configured roots
//! - `books` - one per root-level file or per book directory
//! - `files` - one per physical media file, unique per library
//! - `persons`, `series`, `genres`, `tags` - deduplicated per library
//! - `authors`, `narrators`, `book_series`, `book_genres`, `book_tags` - links

use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::path::{Path, PathBuf};

/// Provenance of a metadata field.
///
/// Lower [`rank`](Self::rank) wins. Sidecars beat embedded metadata, which
/// beats anything parsed out of a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(rename_all = "snake_case")]
pub enum DataSource {
    Sidecar,
    EpubMetadata,
    CbzMetadata,
    M4bMetadata,
    ExistingCover,
    Filepath,
}

impl DataSource {
    /// Priority rank; smaller is stronger.
    pub const fn rank(self) -> u8 {
        match self {
            Self::Sidecar => 0,
            Self::EpubMetadata | Self::CbzMetadata | Self::M4bMetadata | Self::ExistingCover => 1,
            Self::Filepath => 2,
        }
    }

    /// Whether a value from `self` may replace a field currently stamped
    /// with `current`. Unset fields accept anything.
    pub fn outranks(self, current: Option<DataSource>) -> bool {
        match current {
            None => true,
            Some(current) => self.rank() < current.rank(),
        }
    }
}

/// Recognized media container types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(rename_all = "lowercase")]
pub enum FileType {
    Epub,
    Cbz,
    M4b,
}

impl FileType {
    pub const ALL: [FileType; 3] = [FileType::Epub, FileType::Cbz, FileType::M4b];

    /// Map a file extension (any case) to a type.
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "epub" => Some(Self::Epub),
            "cbz" => Some(Self::Cbz),
            "m4b" => Some(Self::M4b),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|e| e.to_str())
            .and_then(Self::from_extension)
    }

    pub const fn extension(self) -> &'static str {
        match self {
            Self::Epub => "epub",
            Self::Cbz => "cbz",
            Self::M4b => "m4b",
        }
    }

    /// Sniffed content types accepted for this extension.
    pub const fn accepted_mime_types(self) -> &'static [&'static str] {
        match self {
            Self::Epub => &["application/epub+zip"],
            Self::Cbz => &["application/zip"],
            Self::M4b => &[
                "audio/m4a",
                "audio/mp4",
                "audio/x-m4a",
                "audio/x-m4b",
                "video/mp4",
            ],
        }
    }

    pub fn accepts_mime(self, mime: &str) -> bool {
        self.accepted_mime_types().contains(&mime)
    }

    /// Source stamped on fields read from this container's own metadata.
    pub const fn metadata_source(self) -> DataSource {
        match self {
            Self::Epub => DataSource::EpubMetadata,
            Self::Cbz => DataSource::CbzMetadata,
            Self::M4b => DataSource::M4bMetadata,
        }
    }

    pub const fn is_audio(self) -> bool {
        matches!(self, Self::M4b)
    }
}

/// A configured library with its root directories.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Library {
    pub id: i64,
    pub name: String,
    pub organize_file_structure: bool,
    pub paths: Vec<PathBuf>,
}

/// A catalog entry. `filepath` is the media file for root-level books and
/// the containing directory for grouped books.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Book {
    pub id: i64,
    pub library_id: i64,
    pub filepath: String,
    pub title: String,
    pub title_source: DataSource,
    pub author_source: Option<DataSource>,
    pub series_source: Option<DataSource>,
    pub genre_source: Option<DataSource>,
    pub tag_source: Option<DataSource>,
    pub created_at: String,
    pub updated_at: String,
}

impl Book {
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.filepath)
    }
}

/// One physical media file.
#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BookFile {
    pub id: i64,
    pub library_id: i64,
    pub book_id: i64,
    pub filepath: String,
    pub file_type: FileType,
    pub filesize_bytes: i64,
    /// Absolute path of the extracted cover
    pub cover_image_path: Option<String>,
    pub cover_mime_type: Option<String>,
    pub cover_source: Option<DataSource>,
    pub narrator_source: Option<DataSource>,
}

impl BookFile {
    pub fn path_buf(&self) -> PathBuf {
        PathBuf::from(&self.filepath)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Person {
    pub id: i64,
    pub library_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Series {
    pub id: i64,
    pub library_id: i64,
    pub name: String,
    pub name_source: DataSource,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Genre {
    pub id: i64,
    pub library_id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Tag {
    pub id: i64,
    pub library_id: i64,
    pub name: String,
}

/// A book's membership in a series.
#[derive(Debug, Clone, PartialEq)]
pub struct BookSeriesLink {
    pub series_id: i64,
    pub series_number: Option<f64>,
    pub sort_order: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_priority_ranks() {
        assert!(DataSource::Sidecar.rank() < DataSource::EpubMetadata.rank());
        assert!(DataSource::M4bMetadata.rank() < DataSource::Filepath.rank());
        assert_eq!(
            DataSource::ExistingCover.rank(),
            DataSource::CbzMetadata.rank()
        );
    }

    #[test]
    fn test_outranks_is_strict() {
        assert!(DataSource::Filepath.outranks(None));
        assert!(DataSource::Sidecar.outranks(Some(DataSource::EpubMetadata)));
        assert!(!DataSource::EpubMetadata.outranks(Some(DataSource::M4bMetadata)));
        assert!(!DataSource::Filepath.outranks(Some(DataSource::Filepath)));
        assert!(!DataSource::Filepath.outranks(Some(DataSource::Sidecar)));
    }

    #[test]
    fn test_file_type_from_extension() {
        assert_eq!(FileType::from_extension("EPUB"), Some(FileType::Epub));
        assert_eq!(FileType::from_extension("m4b"), Some(FileType::M4b));
        assert_eq!(FileType::from_extension("Cbz"), Some(FileType::Cbz));
        assert_eq!(FileType::from_extension("pdf"), None);
        assert_eq!(
            FileType::from_path(Path::new("/lib/a/Book.M4B")),
            Some(FileType::M4b)
        );
    }

    #[test]
    fn test_m4b_accepts_generic_mp4() {
        assert!(FileType::M4b.accepts_mime("video/mp4"));
        assert!(FileType::M4b.accepts_mime("audio/m4a"));
        assert!(!FileType::Cbz.accepts_mime("application/epub+zip"));
        assert!(!FileType::Epub.accepts_mime("application/zip"));
    }
}
