//! Audiobook (M4B) tags via lofty.
//!
//! Mapping follows common audiobook tagging tools:
//! - title, falling back to album
//! - artist (or album artist) as authors
//! - composer as narrators
//! - grouping as series, with an optional `#N` suffix as the number

use lofty::file::TaggedFileExt;
use lofty::picture::{MimeType, PictureType};
use lofty::probe::Probe;
use lofty::tag::{Accessor, ItemKey, Tag};
use std::path::Path;

use super::patterns::split_series_number;
use super::{EmbeddedCover, FormatAdapter, ParsedMetadata};
use crate::error::{Error, Result};
use crate::model::{DataSource, FileType};

#[derive(Debug, Clone, Copy, Default)]
pub struct AudiobookAdapter;

impl FormatAdapter for AudiobookAdapter {
    fn file_type(&self) -> FileType {
        FileType::M4b
    }

    fn parse(&self, path: &Path) -> Result<ParsedMetadata> {
        let tagged_file = Probe::open(path)
            .map_err(|e| Error::metadata(path, format!("open: {e}")))?
            .guess_file_type()
            .map_err(|e| Error::metadata(path, format!("probe: {e}")))?
            .read()
            .map_err(|e| Error::metadata(path, format!("read: {e}")))?;

        let mut parsed = ParsedMetadata::empty(DataSource::M4bMetadata);

        let Some(tag) = tagged_file
            .primary_tag()
            .or_else(|| tagged_file.first_tag())
        else {
            return Ok(parsed);
        };

        parsed.title = non_empty(tag.title().as_deref())
            .or_else(|| non_empty(tag.album().as_deref()));

        let authors = tag
            .artist()
            .map(|a| a.to_string())
            .or_else(|| tag.get_string(&ItemKey::AlbumArtist).map(str::to_string));
        parsed.authors = authors.as_deref().map(split_people).unwrap_or_default();

        parsed.narrators = tag
            .get_string(&ItemKey::Composer)
            .map(split_people)
            .unwrap_or_default();

        if let Some(grouping) = non_empty(tag.get_string(&ItemKey::ContentGroup)) {
            let (name, number) = split_series_number(&grouping);
            parsed.series = Some(name);
            parsed.series_number = number;
        }

        parsed.genres = tag
            .genre()
            .map(|g| super::patterns::split_names(&g))
            .unwrap_or_default();

        parsed.cover = front_cover(tag);

        Ok(parsed)
    }
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

/// Tag values use `,`, `;` or `&` between people.
fn split_people(raw: &str) -> Vec<String> {
    raw.split([',', ';', '&'])
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn front_cover(tag: &Tag) -> Option<EmbeddedCover> {
    let pictures = tag.pictures();

    // Prefer front cover, fall back to first picture
    let picture = pictures
        .iter()
        .find(|p| p.pic_type() == PictureType::CoverFront)
        .or_else(|| pictures.first())?;

    if picture.data().is_empty() {
        return None;
    }

    let mime_type = match picture.mime_type() {
        Some(MimeType::Jpeg) => "image/jpeg",
        Some(MimeType::Png) => "image/png",
        Some(MimeType::Gif) => "image/gif",
        Some(MimeType::Bmp) => "image/bmp",
        Some(MimeType::Tiff) => "image/tiff",
        _ => "image/jpeg",
    };

    Some(EmbeddedCover {
        data: picture.data().to_vec(),
        mime_type: mime_type.to_string(),
    })
}
