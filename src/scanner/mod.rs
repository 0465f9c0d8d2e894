//! File discovery for library roots.
//!
//! Discovery is two-stage: a sequential walk keeps files whose extension is
//! recognized, then each candidate's content is sniffed (in parallel) and
//! checked against the types its extension allows. The full list is known
//! before any file is processed.

use rayon::prelude::*;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::model::FileType;

/// Detects a file's content type from its bytes.
pub trait ContentSniffer: Send + Sync {
    /// Best-effort; `None` when the type is unknown or the file unreadable.
    fn detect(&self, path: &Path) -> Option<String>;
}

/// Magic-number sniffing via `infer`, extended with an M4B matcher.
pub struct InferSniffer {
    infer: infer::Infer,
}

impl InferSniffer {
    pub fn new() -> Self {
        let mut infer = infer::Infer::new();
        // Custom matchers are consulted before the built-in table.
        infer.add("audio/x-m4b", "m4b", is_m4b_container);
        Self { infer }
    }
}

impl Default for InferSniffer {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for InferSniffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InferSniffer").finish_non_exhaustive()
    }
}

impl ContentSniffer for InferSniffer {
    fn detect(&self, path: &Path) -> Option<String> {
        match self.infer.get_from_path(path) {
            Ok(kind) => kind.map(|k| k.mime_type().to_string()),
            Err(e) => {
                tracing::debug!(target: "shelf_scan::scanner", path = %path.display(), error = %e, "Sniff failed");
                None
            }
        }
    }
}

const M4B_BRAND: &[u8; 4] = b"M4B ";

/// An ISO-BMFF `ftyp` box whose major or a compatible brand is `M4B `.
fn is_m4b_container(buf: &[u8]) -> bool {
    if buf.len() < 12 || &buf[4..8] != b"ftyp" {
        return false;
    }
    if &buf[8..12] == M4B_BRAND {
        return true;
    }
    // Compatible brands follow the 4-byte minor version.
    let box_len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
    let end = box_len.min(buf.len());
    end > 16 && buf[16..end].chunks_exact(4).any(|brand| brand == M4B_BRAND)
}

/// A file that passed both discovery filters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredFile {
    pub path: PathBuf,
    pub file_type: FileType,
}

/// A candidate dropped by the content check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejected {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default)]
pub struct Discovery {
    pub files: Vec<DiscoveredFile>,
    pub rejected: Vec<Rejected>,
}

/// Walk `roots` and return every regular file with a recognized extension,
/// sorted by path within each root. A file reachable from several
/// (overlapping) roots is returned once.
///
/// An unreadable root fails the walk; unreadable entries below it are skipped.
pub fn walk(roots: &[PathBuf]) -> Result<Vec<DiscoveredFile>> {
    let mut found = Vec::new();
    let mut seen = HashSet::new();

    for root in roots {
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) if e.depth() == 0 => {
                    return Err(Error::Io(e.into()).context(format!("walk {}", root.display())));
                }
                Err(e) => {
                    tracing::warn!(target: "shelf_scan::scanner", error = %e, "Skipping unreadable entry");
                    continue;
                }
            };

            if !entry.file_type().is_file() {
                continue;
            }
            if let Some(file_type) = FileType::from_path(entry.path())
                && seen.insert(entry.path().to_path_buf())
            {
                found.push(DiscoveredFile {
                    path: entry.into_path(),
                    file_type,
                });
            }
        }
    }

    Ok(found)
}

/// Keep the candidates whose sniffed type matches their extension.
pub fn filter_by_content(candidates: Vec<DiscoveredFile>, sniffer: &dyn ContentSniffer) -> Discovery {
    let checked: Vec<(DiscoveredFile, Option<String>)> = candidates
        .into_par_iter()
        .map(|file| {
            let detected = sniffer.detect(&file.path);
            (file, detected)
        })
        .collect();

    let mut discovery = Discovery::default();
    for (file, detected) in checked {
        match detected {
            Some(mime) if file.file_type.accepts_mime(&mime) => discovery.files.push(file),
            other => {
                let reason = match other {
                    Some(mime) => format!(
                        "content type {mime} does not match .{}",
                        file.file_type.extension()
                    ),
                    None => "content type could not be detected".to_string(),
                };
                tracing::warn!(target: "shelf_scan::scanner", path = %file.path.display(), %reason, "Skipping file");
                discovery.rejected.push(Rejected {
                    path: file.path,
                    reason,
                });
            }
        }
    }
    discovery
}

/// Walk and sniff on the blocking pool.
pub async fn discover(roots: Vec<PathBuf>, sniffer: Arc<dyn ContentSniffer>) -> Result<Discovery> {
    tokio::task::spawn_blocking(move || {
        let candidates = walk(&roots)?;
        tracing::debug!(target: "shelf_scan::scanner", candidates = candidates.len(), "Walk complete");
        Ok(filter_by_content(candidates, sniffer.as_ref()))
    })
    .await?
}
