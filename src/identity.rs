//! Deterministic unit ids.
//!
//! An id is `<source_file>_<kind>_<index>`, for example `report.pdf_chunk_3`,
//! `talk.mp3_segment_0` or `photo.jpg_image_0`. Re-ingesting the same file
//! produces the same ids, which is what makes upserts idempotent.

use std::path::Path;

use crate::models::UnitKind;

pub fn make_id(source_file: &str, kind: UnitKind, index: usize) -> String {
    format!("{}_{}_{}", source_file, kind.id_tag(), index)
}

/// Splits an id back into `(source_file, kind, index)`.
///
/// The kind and index are read from the right, so source files containing
/// underscores (or even `_chunk_` themselves) still round-trip.
pub fn parse_id(id: &str) -> Option<(&str, UnitKind, usize)> {
    let (rest, index) = id.rsplit_once('_')?;
    if index.is_empty() || !index.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let index: usize = index.parse().ok()?;
    let (source_file, tag) = rest.rsplit_once('_')?;
    let kind = UnitKind::from_id_tag(tag)?;
    if source_file.is_empty() {
        return None;
    }
    Some((source_file, kind, index))
}

/// Source file identity of `path`: its file name.
///
/// The same rule applies whether the file is ingested alone or found by a
/// directory walk, so both produce the same ids for one file.
pub fn source_file_for(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}
