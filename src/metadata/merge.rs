//! Source-priority merge of filename conventions, adapter output and
//! sidecar overrides.
//!
//! Order of application:
//! 1. title seed with the `[authors]` / `{narrators}` groups stripped
//! 2. non-empty adapter fields, stamped with the adapter's source
//! 3. authors from the seed's `[...]` group if still empty
//! 4. narrators from `{...}`, seed first then the file's own base name
//! 5. book and file sidecars, only where they outrank the current source
//! 6. comic volume normalization
//! 7. never leave the title empty

use super::patterns::{authors_from, narrators_from, strip_markers};
use super::volume::normalize_volume;
use super::ParsedMetadata;
use crate::model::{DataSource, FileType};
use crate::sidecar::{BookSidecar, FileSidecar};

/// Everything the merge needs for one file.
#[derive(Debug, Clone, Copy)]
pub struct MergeInput<'a> {
    pub file_type: FileType,
    /// File stem for root-level files, directory name for grouped ones
    pub title_seed: &'a str,
    /// Stem of the media file itself
    pub file_base_name: &'a str,
    pub parsed: Option<&'a ParsedMetadata>,
    pub book_sidecar: Option<&'a BookSidecar>,
    pub file_sidecar: Option<&'a FileSidecar>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SeriesEntry {
    pub name: String,
    pub number: Option<f64>,
    pub sort_order: i64,
}

/// Cover bytes waiting to be written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoverCandidate {
    pub data: Vec<u8>,
    pub mime_type: String,
    pub source: DataSource,
}

/// Merged candidate record. List fields share one source each.
#[derive(Debug, Clone, PartialEq)]
pub struct MergedMetadata {
    pub title: String,
    pub title_source: DataSource,
    pub authors: Vec<String>,
    pub author_source: Option<DataSource>,
    pub narrators: Vec<String>,
    pub narrator_source: Option<DataSource>,
    pub series: Vec<SeriesEntry>,
    pub series_source: Option<DataSource>,
    pub genres: Vec<String>,
    pub genre_source: Option<DataSource>,
    pub tags: Vec<String>,
    pub tag_source: Option<DataSource>,
    pub cover: Option<CoverCandidate>,
}

fn clean(values: &[String]) -> Vec<String> {
    values
        .iter()
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .collect()
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|v| v.trim())
        .filter(|v| !v.is_empty())
        .map(str::to_string)
}

/// Apply `values` to a list field when non-empty and allowed by priority.
fn apply_list(
    field: &mut Vec<String>,
    source: &mut Option<DataSource>,
    values: &[String],
    incoming: DataSource,
) {
    let values = clean(values);
    if !values.is_empty() && incoming.outranks(*source) {
        *field = values;
        *source = Some(incoming);
    }
}

pub fn merge(input: MergeInput<'_>) -> MergedMetadata {
    let stripped = strip_markers(input.title_seed);
    let title = if stripped.is_empty() {
        input.file_base_name.to_string()
    } else {
        stripped
    };

    let mut merged = MergedMetadata {
        title,
        title_source: DataSource::Filepath,
        authors: Vec::new(),
        author_source: None,
        narrators: Vec::new(),
        narrator_source: None,
        series: Vec::new(),
        series_source: None,
        genres: Vec::new(),
        genre_source: None,
        tags: Vec::new(),
        tag_source: None,
        cover: None,
    };

    if let Some(parsed) = input.parsed {
        apply_parsed(&mut merged, parsed);
    }

    if merged.authors.is_empty() {
        let authors = authors_from(input.title_seed);
        if !authors.is_empty() {
            merged.authors = authors;
            merged.author_source = Some(DataSource::Filepath);
        }
    }

    if merged.narrators.is_empty() {
        let mut narrators = narrators_from(input.title_seed);
        if narrators.is_empty() {
            narrators = narrators_from(input.file_base_name);
        }
        if !narrators.is_empty() {
            merged.narrators = narrators;
            merged.narrator_source = Some(DataSource::Filepath);
        }
    }

    if let Some(sidecar) = input.book_sidecar {
        apply_book_sidecar(&mut merged, sidecar);
    }

    if let Some(sidecar) = input.file_sidecar {
        apply_list(
            &mut merged.narrators,
            &mut merged.narrator_source,
            &sidecar.narrators,
            DataSource::Sidecar,
        );
    }

    if input.file_type == FileType::Cbz && merged.title_source != DataSource::Sidecar {
        merged.title = normalize_volume(&merged.title);
    }

    if merged.title.trim().is_empty() {
        merged.title = input.file_base_name.to_string();
        merged.title_source = DataSource::Filepath;
    }

    merged
}

fn apply_parsed(merged: &mut MergedMetadata, parsed: &ParsedMetadata) {
    let source = parsed.source;

    if let Some(title) = non_empty(parsed.title.as_ref()) {
        merged.title = title;
        merged.title_source = source;
    }

    apply_list(&mut merged.authors, &mut merged.author_source, &parsed.authors, source);
    apply_list(
        &mut merged.narrators,
        &mut merged.narrator_source,
        &parsed.narrators,
        source,
    );

    if let Some(name) = non_empty(parsed.series.as_ref()) {
        merged.series = vec![SeriesEntry {
            name,
            number: parsed.series_number,
            sort_order: 1,
        }];
        merged.series_source = Some(source);
    }

    apply_list(&mut merged.genres, &mut merged.genre_source, &parsed.genres, source);
    apply_list(&mut merged.tags, &mut merged.tag_source, &parsed.tags, source);

    if let Some(cover) = parsed.cover.as_ref().filter(|c| !c.data.is_empty()) {
        merged.cover = Some(CoverCandidate {
            data: cover.data.clone(),
            mime_type: cover.mime_type.clone(),
            source,
        });
    }
}

fn apply_book_sidecar(merged: &mut MergedMetadata, sidecar: &BookSidecar) {
    let source = DataSource::Sidecar;

    if let Some(title) = non_empty(sidecar.title.as_ref())
        && source.outranks(Some(merged.title_source))
    {
        merged.title = title;
        merged.title_source = source;
    }

    apply_list(&mut merged.authors, &mut merged.author_source, &sidecar.authors, source);

    let series: Vec<SeriesEntry> = sidecar
        .series
        .iter()
        .filter(|s| !s.name.trim().is_empty())
        .enumerate()
        .map(|(i, s)| SeriesEntry {
            name: s.name.trim().to_string(),
            number: s.number,
            sort_order: i as i64 + 1,
        })
        .collect();
    if !series.is_empty() && source.outranks(merged.series_source) {
        merged.series = series;
        merged.series_source = Some(source);
    }

    apply_list(&mut merged.genres, &mut merged.genre_source, &sidecar.genres, source);
    apply_list(&mut merged.tags, &mut merged.tag_source, &sidecar.tags, source);
}
